//! Integration tests against an in-process mock collection server.

use activity_agent::{
    AgentConfig, AgentError, ApiClient, CollectionLoop, CollectionResult, Collector,
    CollectorEvent, ConnectionStatus, Credentials, DeliveryClient, DeliveryStats, LoopState,
    ProcessInfo, ProcessSource, Sampler, SessionManager, SessionState,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const PASSWORD: &str = "secret";

/// Scriptable stand-in for the collection server.
#[derive(Default)]
struct MockServer {
    logins: AtomicUsize,
    batch_posts: AtomicUsize,
    /// Statuses to return for upcoming batch posts; 200 once exhausted
    batch_script: Mutex<VecDeque<u16>>,
    /// Bearer tokens presented with each batch post
    tokens_seen: Mutex<Vec<String>>,
    /// Bodies of accepted batches
    accepted: Mutex<Vec<Vec<Value>>>,
}

impl MockServer {
    fn script_batches(&self, statuses: &[u16]) {
        self.batch_script.lock().unwrap().extend(statuses);
    }

    fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    fn batch_posts(&self) -> usize {
        self.batch_posts.load(Ordering::SeqCst)
    }

    fn accepted_sizes(&self) -> Vec<usize> {
        self.accepted.lock().unwrap().iter().map(Vec::len).collect()
    }
}

async fn login(State(state): State<Arc<MockServer>>, Json(body): Json<Value>) -> Response {
    let n = state.logins.fetch_add(1, Ordering::SeqCst) + 1;
    if body["password"] == PASSWORD && body["username"].is_string() {
        (StatusCode::OK, Json(json!({ "token": format!("token-{n}") }))).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "bad credentials").into_response()
    }
}

async fn batch(
    State(state): State<Arc<MockServer>>,
    headers: HeaderMap,
    Json(body): Json<Vec<Value>>,
) -> StatusCode {
    state.batch_posts.fetch_add(1, Ordering::SeqCst);

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_string();
    state.tokens_seen.lock().unwrap().push(token);

    let status = state.batch_script.lock().unwrap().pop_front().unwrap_or(200);
    if (200..300).contains(&status) {
        state.accepted.lock().unwrap().push(body);
    }
    StatusCode::from_u16(status).unwrap()
}

async fn spawn_server() -> (SocketAddr, Arc<MockServer>) {
    let state = Arc::new(MockServer::default());
    let app = Router::new()
        .route("/api/users/login", post(login))
        .route("/api/logs/batch", post(batch))
        .route("/api/test/tracking", get(|| async { StatusCode::OK }))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Process source that reports a fixed number of windowed processes.
struct FixedSource {
    count: u32,
}

impl ProcessSource for FixedSource {
    fn processes(&mut self) -> Vec<ProcessInfo> {
        (1..=self.count)
            .map(|pid| ProcessInfo {
                pid,
                name: format!("app{pid}"),
                window_title: Some(format!("Window {pid}")),
                path: Some(PathBuf::from(format!("/apps/app{pid}"))),
            })
            .chain(std::iter::once(ProcessInfo {
                pid: 9999,
                name: "daemon".to_string(),
                window_title: None,
                path: None,
            }))
            .collect()
    }
}

fn url(addr: SocketAddr) -> String {
    format!("http://{addr}")
}

fn valid_credentials() -> Credentials {
    Credentials::new("tester", PASSWORD)
}

fn api_client(addr: SocketAddr) -> ApiClient {
    ApiClient::new(&url(addr), Duration::from_secs(5)).unwrap()
}

async fn authenticated_session(addr: SocketAddr) -> SessionManager {
    let mut session = SessionManager::new(api_client(addr), 20, valid_credentials());
    session.authenticate().await.unwrap();
    session
}

async fn collector(addr: SocketAddr, processes: u32) -> Collector {
    let stats = Arc::new(DeliveryStats::new());
    let sampler = Sampler::new(Box::new(FixedSource { count: processes }), Duration::from_secs(60));
    Collector::new(
        20,
        3,
        authenticated_session(addr).await,
        DeliveryClient::new(api_client(addr), stats.clone()),
        Arc::new(Mutex::new(sampler)),
        stats,
    )
}

fn sample_batch(count: u32) -> Vec<activity_agent::ActivityRecord> {
    let mut sampler = Sampler::new(Box::new(FixedSource { count }), Duration::from_secs(60));
    sampler.sample(20, chrono::Local::now().naive_local())
}

/// Drain events until one matches `pred`, returning everything seen.
async fn events_until<F>(agent: &CollectionLoop, mut pred: F) -> Vec<CollectorEvent>
where
    F: FnMut(&CollectorEvent) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        while let Ok(event) = agent.events().try_recv() {
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for event");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_event<F>(agent: &CollectionLoop, mut pred: F) -> CollectorEvent
where
    F: FnMut(&CollectorEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        while let Ok(event) = agent.events().try_recv() {
            if pred(&event) {
                return event;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for event");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_authenticate_and_invalidate() {
    let (addr, server) = spawn_server().await;
    let mut session = SessionManager::new(api_client(addr), 20, valid_credentials());
    assert!(session.current_token().is_none());

    let state = session.authenticate().await.unwrap();
    assert_eq!(state.state(), SessionState::Authenticated);
    assert_eq!(session.current_token(), Some("token-1"));

    session.invalidate();
    assert!(session.current_token().is_none());
    assert_eq!(session.session().state(), SessionState::Unauthenticated);
    assert_eq!(server.logins(), 1);
}

#[tokio::test]
async fn test_rejected_credentials_are_auth_error() {
    let (addr, _server) = spawn_server().await;
    let mut session = SessionManager::new(api_client(addr), 20, Credentials::new("tester", "wrong"));

    let err = session.authenticate().await.unwrap_err();
    assert!(matches!(err, AgentError::Auth(_)));
    assert!(session.current_token().is_none());
}

#[tokio::test]
async fn test_batch_body_matches_record_contract() {
    let (addr, server) = spawn_server().await;
    let mut session = authenticated_session(addr).await;
    let delivery = DeliveryClient::new(api_client(addr), Arc::new(DeliveryStats::new()));

    delivery.send(&sample_batch(2), &mut session).await.unwrap();

    let accepted = server.accepted.lock().unwrap();
    let first = &accepted[0][0];
    assert_eq!(first["userId"], 20);
    assert_eq!(first["processName"], "app1");
    assert_eq!(first["windowTitle"], "Window 1");
    assert_eq!(first["processId"], "1");
    assert_eq!(first["applicationPath"], "/apps/app1");
    assert_eq!(first["durationSeconds"], 60);
    assert_eq!(first["activityType"], "PROCESS_MONITORING");
    assert_eq!(first["startTime"].as_str().unwrap().len(), "2024-05-01T09:30:00".len());
    assert_eq!(server.tokens_seen.lock().unwrap().clone(), vec!["token-1".to_string()]);
}

#[tokio::test]
async fn test_unauthorized_triggers_single_reauth_and_retry() {
    let (addr, server) = spawn_server().await;
    let mut session = authenticated_session(addr).await;
    let stats = Arc::new(DeliveryStats::new());
    let delivery = DeliveryClient::new(api_client(addr), stats.clone());

    server.script_batches(&[401]);
    delivery.send(&sample_batch(3), &mut session).await.unwrap();

    assert_eq!(server.logins(), 2);
    assert_eq!(server.batch_posts(), 2);
    assert_eq!(
        server.tokens_seen.lock().unwrap().clone(),
        vec!["token-1".to_string(), "token-2".to_string()]
    );
    assert_eq!(session.current_token(), Some("token-2"));
    assert_eq!(stats.snapshot().reauthentications, 1);
    assert_eq!(stats.snapshot().batches_delivered, 1);
}

#[tokio::test]
async fn test_forbidden_is_treated_like_unauthorized() {
    let (addr, server) = spawn_server().await;
    let mut session = authenticated_session(addr).await;
    let delivery = DeliveryClient::new(api_client(addr), Arc::new(DeliveryStats::new()));

    server.script_batches(&[403]);
    delivery.send(&sample_batch(1), &mut session).await.unwrap();

    assert_eq!(server.logins(), 2);
    assert_eq!(server.batch_posts(), 2);
}

#[tokio::test]
async fn test_second_unauthorized_surfaces_delivery_error() {
    let (addr, server) = spawn_server().await;
    let mut session = authenticated_session(addr).await;
    let delivery = DeliveryClient::new(api_client(addr), Arc::new(DeliveryStats::new()));

    server.script_batches(&[401, 401]);
    let err = delivery.send(&sample_batch(3), &mut session).await.unwrap_err();

    assert!(matches!(err, AgentError::Delivery(_)));
    assert_eq!(server.logins(), 2);
    assert_eq!(server.batch_posts(), 2);
    // The token the server just rejected is not kept.
    assert!(session.current_token().is_none());
    assert_eq!(session.session().state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn test_unauthorized_after_lazy_login_is_not_retried() {
    let (addr, server) = spawn_server().await;
    let stats = Arc::new(DeliveryStats::new());
    let delivery = DeliveryClient::new(api_client(addr), stats.clone());
    let mut session = SessionManager::new(api_client(addr), 20, valid_credentials());

    server.script_batches(&[401]);
    let err = delivery.send(&sample_batch(2), &mut session).await.unwrap_err();

    assert!(matches!(err, AgentError::Delivery(_)));
    assert_eq!(server.logins(), 1);
    assert_eq!(server.batch_posts(), 1);
    assert_eq!(stats.snapshot().reauthentications, 1);
    assert!(session.current_token().is_none());
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let (addr, server) = spawn_server().await;
    let mut session = authenticated_session(addr).await;
    let delivery = DeliveryClient::new(api_client(addr), Arc::new(DeliveryStats::new()));

    server.script_batches(&[500]);
    let err = delivery.send(&sample_batch(3), &mut session).await.unwrap_err();

    assert!(matches!(err, AgentError::Delivery(_)));
    assert_eq!(server.logins(), 1);
    assert_eq!(server.batch_posts(), 1);
    assert_eq!(session.current_token(), Some("token-1"));
}

#[tokio::test]
async fn test_failed_reauthentication_is_delivery_error() {
    let (addr, server) = spawn_server().await;
    let delivery = DeliveryClient::new(api_client(addr), Arc::new(DeliveryStats::new()));

    // Stored password no longer works.
    let mut stale = SessionManager::new(api_client(addr), 20, Credentials::new("tester", "rotated"));
    assert!(stale.authenticate().await.is_err());

    let err = delivery.send(&sample_batch(1), &mut stale).await.unwrap_err();
    assert!(matches!(err, AgentError::Delivery(_)));
    assert!(stale.current_token().is_none());
    // The unauthenticated session tries to log in first; nothing is posted.
    assert_eq!(server.logins(), 2);
    assert_eq!(server.batch_posts(), 0);
}

#[tokio::test]
async fn test_tick_delivers_snapshot_in_chunks() {
    let (addr, server) = spawn_server().await;
    let mut collector = collector(addr, 7).await;

    let result = collector.tick().await.unwrap();

    assert_eq!(
        result,
        CollectionResult {
            process_count: 7,
            batch_count: 3
        }
    );
    assert_eq!(server.accepted_sizes(), vec![3, 3, 1]);

    let ids: Vec<String> = server
        .accepted
        .lock()
        .unwrap()
        .iter()
        .flatten()
        .map(|r| r["processId"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (1..=7).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_tick_aborts_on_first_failure_and_next_tick_is_independent() {
    let (addr, server) = spawn_server().await;
    let mut collector = collector(addr, 5).await;

    server.script_batches(&[500]);
    let failure = collector.tick().await.unwrap_err();
    assert!(matches!(failure.error, AgentError::Delivery(_)));
    assert_eq!(failure.sampled, 5);
    assert_eq!(failure.delivered, CollectionResult::default());
    assert_eq!(server.batch_posts(), 1);
    assert!(server.accepted_sizes().is_empty());

    let result = collector.tick().await.unwrap();
    assert_eq!(
        result,
        CollectionResult {
            process_count: 5,
            batch_count: 2
        }
    );
    assert_eq!(server.accepted_sizes(), vec![3, 2]);
}

#[tokio::test]
async fn test_tick_stops_at_failing_middle_batch() {
    let (addr, server) = spawn_server().await;
    let mut collector = collector(addr, 7).await;

    server.script_batches(&[200, 500]);
    let failure = collector.tick().await.unwrap_err();

    assert!(matches!(failure.error, AgentError::Delivery(_)));
    assert_eq!(failure.sampled, 7);
    assert_eq!(
        failure.delivered,
        CollectionResult {
            process_count: 3,
            batch_count: 1
        }
    );
    // The third batch is never posted.
    assert_eq!(server.batch_posts(), 2);
    assert_eq!(server.accepted_sizes(), vec![3]);
}

#[tokio::test]
async fn test_tick_with_no_windowed_processes() {
    let (addr, server) = spawn_server().await;
    let mut collector = collector(addr, 0).await;

    let result = collector.tick().await.unwrap();
    assert_eq!(result, CollectionResult::default());
    assert_eq!(server.batch_posts(), 0);
}

#[tokio::test]
async fn test_server_available_checks_health_endpoint() {
    let (addr, _server) = spawn_server().await;
    let client = api_client(addr);

    assert!(client.server_available().await.unwrap());
    assert_eq!(client.connection_status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_unreachable_server_is_reported_unavailable() {
    // Bind then drop to get a port nobody listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = api_client(addr);
    assert!(matches!(client.server_available().await, Err(activity_agent::ApiError::Network(_))));
    assert_eq!(client.connection_status(), ConnectionStatus::ServerUnavailable);
}

#[tokio::test]
async fn test_connection_status_follows_deliveries() {
    let (addr, server) = spawn_server().await;
    let client = api_client(addr);
    let mut session = SessionManager::new(client.clone(), 20, valid_credentials());
    let delivery = DeliveryClient::new(client.clone(), Arc::new(DeliveryStats::new()));

    assert_eq!(client.connection_status(), ConnectionStatus::NotConnected);
    session.authenticate().await.unwrap();
    assert_eq!(client.connection_status(), ConnectionStatus::Connected);

    server.script_batches(&[503]);
    assert!(delivery.send(&sample_batch(1), &mut session).await.is_err());
    assert_eq!(client.connection_status(), ConnectionStatus::Error);

    delivery.send(&sample_batch(1), &mut session).await.unwrap();
    assert_eq!(client.connection_status(), ConnectionStatus::Connected);
}

fn fast_config(addr: SocketAddr) -> AgentConfig {
    AgentConfig {
        server_url: url(addr),
        min_interval_secs: 1,
        ..AgentConfig::default()
    }
}

#[tokio::test]
async fn test_loop_runs_ticks_and_stops() {
    let (addr, server) = spawn_server().await;
    let sampler = Sampler::new(Box::new(FixedSource { count: 7 }), Duration::from_secs(60));
    let mut agent = CollectionLoop::with_sampler(fast_config(addr), sampler).unwrap();

    agent.start(20, 1, valid_credentials()).await.unwrap();
    assert_eq!(agent.state(), LoopState::Running);

    let started = wait_for_event(&agent, |_| true).await;
    assert_eq!(
        started,
        CollectorEvent::Started {
            user_id: 20,
            interval: Duration::from_secs(1)
        }
    );

    let tick = wait_for_event(&agent, |e| matches!(e, CollectorEvent::TickCompleted(_))).await;
    assert_eq!(
        tick,
        CollectorEvent::TickCompleted(CollectionResult {
            process_count: 7,
            batch_count: 3
        })
    );

    agent.shutdown().await;
    agent.stop();
    assert_eq!(agent.state(), LoopState::Stopped);

    let mut stopped = 0;
    while let Ok(event) = agent.events().try_recv() {
        if event == CollectorEvent::Stopped {
            stopped += 1;
        }
    }
    assert_eq!(stopped, 1);

    // No further ticks after stop.
    let posts = server.batch_posts();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(server.batch_posts(), posts);
    assert!(agent.stats().snapshot().ticks_completed >= 1);
}

#[tokio::test]
async fn test_loop_reports_failed_tick_and_keeps_running() {
    let (addr, server) = spawn_server().await;
    let sampler = Sampler::new(Box::new(FixedSource { count: 5 }), Duration::from_secs(60));
    let mut agent = CollectionLoop::with_sampler(fast_config(addr), sampler).unwrap();

    server.script_batches(&[500]);
    agent.start(20, 1, valid_credentials()).await.unwrap();
    assert_eq!(agent.connection_status(), ConnectionStatus::Connected);

    let seen = events_until(&agent, |e| matches!(e, CollectorEvent::TickCompleted(_))).await;
    let failed = seen
        .iter()
        .find_map(|e| match e {
            CollectorEvent::TickFailed(failure) => Some(failure.clone()),
            _ => None,
        })
        .expect("a failed tick before the completed one");
    assert_eq!(failed.sampled, 5);
    assert_eq!(failed.delivered.batch_count, 0);

    assert_eq!(seen[0], CollectorEvent::Started { user_id: 20, interval: Duration::from_secs(1) });
    assert!(seen.contains(&CollectorEvent::ConnectionChanged(ConnectionStatus::Connected)));
    assert!(seen.contains(&CollectorEvent::ConnectionChanged(ConnectionStatus::Error)));
    assert_eq!(
        seen.last(),
        Some(&CollectorEvent::TickCompleted(CollectionResult {
            process_count: 5,
            batch_count: 2
        }))
    );
    assert_eq!(agent.state(), LoopState::Running);

    agent.shutdown().await;
    assert_eq!(agent.stats().snapshot().ticks_failed, 1);
}

#[tokio::test]
async fn test_start_rejected_while_running() {
    let (addr, _server) = spawn_server().await;
    let sampler = Sampler::new(Box::new(FixedSource { count: 1 }), Duration::from_secs(60));
    let mut agent = CollectionLoop::with_sampler(fast_config(addr), sampler).unwrap();

    agent.start(20, 60, valid_credentials()).await.unwrap();
    let err = agent.start(20, 60, valid_credentials()).await.unwrap_err();
    assert_eq!(err, AgentError::AlreadyRunning);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_start_with_bad_credentials_stays_stopped() {
    let (addr, server) = spawn_server().await;
    let sampler = Sampler::new(Box::new(FixedSource { count: 1 }), Duration::from_secs(60));
    let mut agent = CollectionLoop::with_sampler(fast_config(addr), sampler).unwrap();

    let err = agent
        .start(20, 60, Credentials::new("tester", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Auth(_)));
    assert_eq!(agent.state(), LoopState::Stopped);
    assert_eq!(server.logins(), 1);
    assert!(agent.events().try_recv().is_err());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let (addr, _server) = spawn_server().await;
    let sampler = Sampler::new(Box::new(FixedSource { count: 2 }), Duration::from_secs(60));
    let mut agent = CollectionLoop::with_sampler(fast_config(addr), sampler).unwrap();

    agent.start(20, 60, valid_credentials()).await.unwrap();
    agent.stop();
    assert_eq!(agent.state(), LoopState::Stopped);

    agent.start(21, 1, valid_credentials()).await.unwrap();
    let tick = wait_for_event(&agent, |e| matches!(e, CollectorEvent::TickCompleted(_))).await;
    assert_eq!(
        tick,
        CollectorEvent::TickCompleted(CollectionResult {
            process_count: 2,
            batch_count: 1
        })
    );
    agent.shutdown().await;
}

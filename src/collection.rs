//! The collection loop: sample, chunk and deliver on a fixed interval.
//!
//! ```text
//!   timer tick ──▶ Sampler ──▶ chunk ──▶ DeliveryClient (batch 1..n) ──▶ event
//! ```
//!
//! Exactly one tick runs at a time. The tick is awaited inside the loop task
//! before the timer is polled again, and missed ticks are delayed rather than
//! bursted, so a slow tick pushes the schedule back instead of overlapping.
//! The process scan runs on the blocking pool so it never stalls the runtime.

use crate::batch::chunk;
use crate::client::{ApiClient, ConnectionStatus};
use crate::config::{validate_user_id, AgentConfig};
use crate::delivery::DeliveryClient;
use crate::error::AgentError;
use crate::sampler::Sampler;
use crate::session::{Credentials, SessionManager};
use crate::stats::{DeliveryStats, SharedStats};
use chrono::Local;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome counts of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResult {
    pub process_count: usize,
    pub batch_count: usize,
}

/// A tick that stopped at a delivery failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickFailure {
    pub error: AgentError,
    /// Records in the snapshot
    pub sampled: usize,
    /// What made it to the server before the failure
    pub delivered: CollectionResult,
}

/// Events reported to whoever drives the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorEvent {
    Started { user_id: u64, interval: Duration },
    TickCompleted(CollectionResult),
    TickFailed(TickFailure),
    /// The server's reachability changed after a login or delivery.
    ConnectionChanged(ConnectionStatus),
    Stopped,
}

/// Whether the loop is scheduling ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
}

/// State for one running session: everything a tick needs.
pub struct Collector {
    user_id: u64,
    chunk_size: usize,
    session: SessionManager,
    delivery: DeliveryClient,
    sampler: Arc<Mutex<Sampler>>,
    stats: SharedStats,
}

impl Collector {
    pub fn new(
        user_id: u64,
        chunk_size: usize,
        session: SessionManager,
        delivery: DeliveryClient,
        sampler: Arc<Mutex<Sampler>>,
        stats: SharedStats,
    ) -> Self {
        Self {
            user_id,
            chunk_size,
            session,
            delivery,
            sampler,
            stats,
        }
    }

    /// Run one sample, chunk, deliver pass.
    ///
    /// Batches are sent in order; the first delivery failure aborts the tick
    /// and the remaining batches are dropped.
    pub async fn tick(&mut self) -> Result<CollectionResult, TickFailure> {
        let now = Local::now().naive_local();
        let sampler = Arc::clone(&self.sampler);
        let user_id = self.user_id;
        let snapshot = tokio::task::spawn_blocking(move || {
            let mut sampler = match sampler.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sampler.sample(user_id, now)
        })
        .await;

        let records = match snapshot {
            Ok(records) => records,
            Err(e) => {
                self.stats.record_tick_failed();
                return Err(TickFailure {
                    error: AgentError::Sampling(e.to_string()),
                    sampled: 0,
                    delivered: CollectionResult::default(),
                });
            }
        };
        let sampled = records.len();

        let mut delivered = CollectionResult::default();
        let fail = |error: AgentError, delivered: CollectionResult| TickFailure {
            error,
            sampled,
            delivered,
        };

        let batches = match chunk(&records, self.chunk_size) {
            Ok(batches) => batches,
            Err(e) => {
                self.stats.record_tick_failed();
                return Err(fail(e, delivered));
            }
        };
        tracing::debug!(records = sampled, batches = batches.len(), "snapshot taken");

        for batch in &batches {
            if let Err(e) = self.delivery.send(batch, &mut self.session).await {
                self.stats.record_tick_failed();
                return Err(fail(e, delivered));
            }
            delivered.process_count += batch.len();
            delivered.batch_count += 1;
        }

        self.stats.record_tick_completed();
        Ok(delivered)
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }
}

/// Starts and stops periodic collection and reports what happened.
pub struct CollectionLoop {
    config: AgentConfig,
    sampler: Arc<Mutex<Sampler>>,
    stats: SharedStats,
    events_tx: Sender<CollectorEvent>,
    events_rx: Receiver<CollectorEvent>,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
    connection: Option<watch::Receiver<ConnectionStatus>>,
}

impl CollectionLoop {
    /// Loop over the host's real process table.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let sampler = Sampler::system(config.sample_window);
        Self::with_sampler(config, sampler)
    }

    /// Loop over a caller-provided sampler.
    pub fn with_sampler(config: AgentConfig, sampler: Sampler) -> Result<Self, AgentError> {
        config.validate()?;

        let (events_tx, events_rx) = bounded(1024);
        Ok(Self {
            config,
            sampler: Arc::new(Mutex::new(sampler)),
            stats: Arc::new(DeliveryStats::new()),
            events_tx,
            events_rx,
            stop_tx: None,
            handle: None,
            connection: None,
        })
    }

    /// Validate, authenticate and begin ticking every `interval_secs`.
    ///
    /// Nothing is changed when validation or the initial login fails.
    pub async fn start(
        &mut self,
        user_id: u64,
        interval_secs: u64,
        credentials: Credentials,
    ) -> Result<(), AgentError> {
        if self.state() == LoopState::Running {
            return Err(AgentError::AlreadyRunning);
        }

        let user_id = validate_user_id(user_id)?;
        let interval = self.config.validate_interval(interval_secs)?;
        credentials.validate()?;

        let client = ApiClient::new(&self.config.server_url, self.config.request_timeout)?;
        let status_rx = client.subscribe_status();
        self.connection = Some(client.subscribe_status());
        let mut session = SessionManager::new(client.clone(), user_id, credentials);
        session.authenticate().await?;

        // A tick from a previous run may still be finishing.
        if let Some(previous) = self.handle.take() {
            let _ = previous.await;
        }

        tracing::info!(
            agent_id = client.agent_id(),
            user_id,
            interval_secs,
            server = %self.config.server_url,
            "collection started"
        );

        let collector = Collector::new(
            user_id,
            self.config.chunk_size,
            session,
            DeliveryClient::new(client, self.stats.clone()),
            self.sampler.clone(),
            self.stats.clone(),
        );

        self.emit(CollectorEvent::Started { user_id, interval });

        let (stop_tx, stop_rx) = watch::channel(false);
        self.handle = Some(tokio::spawn(run_loop(
            collector,
            interval,
            stop_rx,
            status_rx,
            self.events_tx.clone(),
        )));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    /// Stop scheduling ticks. An in-flight tick runs to completion.
    ///
    /// Calling this while stopped does nothing.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
            tracing::info!("collection stopped");
            self.emit(CollectorEvent::Stopped);
        }
    }

    /// Stop and wait for any in-flight tick to finish.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("collection task ended abnormally: {e}");
            }
        }
    }

    pub fn state(&self) -> LoopState {
        if self.stop_tx.is_some() {
            LoopState::Running
        } else {
            LoopState::Stopped
        }
    }

    /// Reachability seen by the most recent start or tick.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(ConnectionStatus::NotConnected)
    }

    /// Get the receiver for collector events.
    pub fn events(&self) -> &Receiver<CollectorEvent> {
        &self.events_rx
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn emit(&self, event: CollectorEvent) {
        emit(&self.events_tx, event);
    }
}

impl Drop for CollectionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn emit(events: &Sender<CollectorEvent>, event: CollectorEvent) {
    if events.try_send(event).is_err() {
        tracing::debug!("event channel full, dropping event");
    }
}

async fn run_loop(
    mut collector: Collector,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    mut status_rx: watch::Receiver<ConnectionStatus>,
    events: Sender<CollectorEvent>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            Ok(()) = status_rx.changed() => {
                let status = *status_rx.borrow_and_update();
                emit(&events, CollectorEvent::ConnectionChanged(status));
            }
            _ = ticker.tick() => {
                match collector.tick().await {
                    Ok(result) => {
                        tracing::info!(
                            processes = result.process_count,
                            batches = result.batch_count,
                            "tick delivered"
                        );
                        emit(&events, CollectorEvent::TickCompleted(result));
                    }
                    Err(failure) => {
                        tracing::warn!(
                            sampled = failure.sampled,
                            delivered_batches = failure.delivered.batch_count,
                            "tick failed: {}",
                            failure.error
                        );
                        emit(&events, CollectorEvent::TickFailed(failure));
                    }
                }
            }
        }
    }
}

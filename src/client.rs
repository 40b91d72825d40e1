//! HTTP client for the collection server.
//!
//! Wraps the endpoints the agent talks to: `POST /api/users/login`,
//! `POST /api/logs/batch` and the `GET /api/test/tracking` health check.
//! Retry and re-authentication policy live in [`delivery`](crate::delivery);
//! this layer only classifies responses and tracks whether the server is
//! reachable.

use crate::error::AgentError;
use crate::sampler::ActivityRecord;
use crate::session::Credentials;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Header carrying the agent instance id.
pub const AGENT_ID_HEADER: &str = "X-Agent-Id";

/// Errors returned by a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Connection, DNS, TLS or timeout failure
    #[error("network error: {0}")]
    Network(String),
    /// Server answered with a non-success status
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    /// Response body could not be decoded
    #[error("unexpected response: {0}")]
    Serialization(String),
}

impl ApiError {
    /// True when the server rejected our credentials or token.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            ApiError::Server { status, .. }
                if *status == StatusCode::UNAUTHORIZED.as_u16()
                    || *status == StatusCode::FORBIDDEN.as_u16()
        )
    }
}

/// Reachability of the collection server, as seen by the last exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No request has completed yet
    NotConnected,
    /// The server answered
    Connected,
    /// The server could not be reached
    ServerUnavailable,
    /// The server answered with a 5xx or an unreadable body
    Error,
}

impl ConnectionStatus {
    fn after<T>(result: &Result<T, ApiError>) -> Self {
        match result {
            Ok(_) => ConnectionStatus::Connected,
            Err(ApiError::Network(_)) => ConnectionStatus::ServerUnavailable,
            Err(ApiError::Server { status, .. }) if *status >= 500 => ConnectionStatus::Error,
            Err(ApiError::Server { .. }) => ConnectionStatus::Connected,
            Err(ApiError::Serialization(_)) => ConnectionStatus::Error,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionStatus::NotConnected => "Not connected",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::ServerUnavailable => "Server unavailable",
            ConnectionStatus::Error => "Error",
        };
        f.write_str(text)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Client for the collection server endpoints.
///
/// Clones share one [`ConnectionStatus`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    agent_id: String,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl ApiClient {
    /// Create a client for `base_url` with the given per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            agent_id: generate_agent_id(),
            status: Arc::new(watch::channel(ConnectionStatus::NotConnected).0),
        })
    }

    /// Get the login endpoint URL.
    pub fn login_url(&self) -> String {
        format!("{}/api/users/login", self.base_url)
    }

    /// Get the batch ingest endpoint URL.
    pub fn batch_url(&self) -> String {
        format!("{}/api/logs/batch", self.base_url)
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/api/test/tracking", self.base_url)
    }

    /// Get the agent ID sent with every request.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Connection status after the most recent exchange.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch connection status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Check whether the server answers its health endpoint with 200.
    pub async fn server_available(&self) -> Result<bool, ApiError> {
        let result = self
            .client
            .get(self.health_url())
            .header(AGENT_ID_HEADER, &self.agent_id)
            .send()
            .await
            .map(|response| response.status() == StatusCode::OK)
            .map_err(|e| ApiError::Network(e.to_string()));
        self.observe(&result);
        result
    }

    /// Exchange credentials for a bearer token.
    pub async fn login(&self, credentials: &Credentials) -> Result<String, ApiError> {
        let result = self.request_token(credentials).await;
        self.observe(&result);
        result
    }

    /// POST one batch of records with the given bearer token.
    pub async fn post_batch(&self, token: &str, batch: &[ActivityRecord]) -> Result<(), ApiError> {
        let result = self.send_batch(token, batch).await;
        self.observe(&result);
        result
    }

    fn observe<T>(&self, result: &Result<T, ApiError>) {
        let next = ConnectionStatus::after(result);
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::info!(status = %next, "connection status changed");
        }
    }

    async fn request_token(&self, credentials: &Credentials) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.login_url())
            .header(AGENT_ID_HEADER, &self.agent_id)
            .json(&LoginRequest {
                username: &credentials.username,
                password: credentials.password(),
            })
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let response = check_status(response).await?;

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Serialization(e.to_string()))?;

        match body.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ApiError::Serialization(
                "login response did not contain a token".to_string(),
            )),
        }
    }

    async fn send_batch(&self, token: &str, batch: &[ActivityRecord]) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.batch_url())
            .bearer_auth(token)
            .header(AGENT_ID_HEADER, &self.agent_id)
            .json(batch)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ApiError::Server {
        status: status.as_u16(),
        message,
    })
}

/// Agent ID from hostname plus a random instance suffix.
fn generate_agent_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("agent-{}-{}", hostname, &uuid::Uuid::new_v4().simple().to_string()[..8])
}

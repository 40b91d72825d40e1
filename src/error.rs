//! Error kinds surfaced by the collection pipeline.

use thiserror::Error;

/// Errors produced by the agent core.
///
/// `Config` and the initial `Auth` failure are returned synchronously from
/// [`CollectionLoop::start`](crate::collection::CollectionLoop::start).
/// Anything that goes wrong inside a tick is reported as an event instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Invalid interval, user id, chunk size or endpoint.
    #[error("configuration error: {0}")]
    Config(String),
    /// Login was rejected or the server could not be reached.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// A batch could not be delivered after any applicable retry.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// The process snapshot could not be taken.
    #[error("sampling failed: {0}")]
    Sampling(String),
    /// `start` was called while the loop is already running.
    #[error("collection loop is already running")]
    AlreadyRunning,
}

impl AgentError {
    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "config",
            AgentError::Auth(_) => "auth",
            AgentError::Delivery(_) => "delivery",
            AgentError::Sampling(_) => "sampling",
            AgentError::AlreadyRunning => "already_running",
        }
    }
}

//! Batch delivery with a single re-authentication on token rejection.
//!
//! Delivery is at most once per tick: nothing is buffered, and a batch that
//! cannot be delivered is dropped together with the rest of its snapshot.

use crate::client::ApiClient;
use crate::error::AgentError;
use crate::sampler::ActivityRecord;
use crate::session::SessionManager;
use crate::stats::SharedStats;

/// Sends batches using the session manager's current token.
pub struct DeliveryClient {
    client: ApiClient,
    stats: SharedStats,
}

impl DeliveryClient {
    pub fn new(client: ApiClient, stats: SharedStats) -> Self {
        Self { client, stats }
    }

    /// Deliver one batch.
    ///
    /// A 401/403 response invalidates the session, triggers exactly one
    /// re-authentication and exactly one retry. Any other failure, or a
    /// failure of the retry, is returned as [`AgentError::Delivery`]. A
    /// rejected token never stays in the session.
    pub async fn send(
        &self,
        batch: &[ActivityRecord],
        session: &mut SessionManager,
    ) -> Result<(), AgentError> {
        if batch.is_empty() {
            return Ok(());
        }

        // A previous re-authentication may have failed; log in lazily. That
        // login is this send's one re-authentication.
        let (token, fresh) = match session.current_token() {
            Some(token) => (token.to_string(), false),
            None => (self.reauthenticate(session).await?, true),
        };

        match self.client.post_batch(&token, batch).await {
            Ok(()) => {}
            Err(e) if e.is_auth_rejection() && fresh => {
                session.invalidate();
                return Err(AgentError::Delivery(format!(
                    "batch rejected right after login: {e}"
                )));
            }
            Err(e) if e.is_auth_rejection() => {
                tracing::warn!("batch rejected ({e}), re-authenticating");
                session.invalidate();
                let token = self.reauthenticate(session).await?;

                if let Err(e) = self.client.post_batch(&token, batch).await {
                    if e.is_auth_rejection() {
                        session.invalidate();
                    }
                    return Err(AgentError::Delivery(format!(
                        "retry after re-authentication failed: {e}"
                    )));
                }
            }
            Err(e) => return Err(AgentError::Delivery(e.to_string())),
        }

        self.stats.record_batch_delivered(batch.len());
        tracing::debug!(records = batch.len(), "batch delivered");
        Ok(())
    }

    async fn reauthenticate(&self, session: &mut SessionManager) -> Result<String, AgentError> {
        self.stats.record_reauthentication();
        let session = session
            .authenticate()
            .await
            .map_err(|e| AgentError::Delivery(format!("re-authentication failed: {e}")))?;

        session
            .token()
            .map(str::to_string)
            .ok_or_else(|| AgentError::Delivery("re-authentication produced no token".to_string()))
    }
}

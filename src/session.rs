//! Authenticated session lifecycle.
//!
//! A [`SessionManager`] owns the credentials and the current bearer token for
//! one collection loop. Tokens are never refreshed on a timer; they are only
//! replaced when delivery reports an auth rejection.

use crate::client::ApiClient;
use crate::error::AgentError;
use std::fmt;

/// Login credentials supplied by configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Both fields are required.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.username.trim().is_empty() {
            return Err(AgentError::Config("username must not be empty".to_string()));
        }
        if self.password.is_empty() {
            return Err(AgentError::Config("password must not be empty".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authentication state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// The authenticated identity records are produced under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    user_id: u64,
    token: Option<String>,
    state: SessionState,
}

impl Session {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            token: None,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn authenticated(&mut self, token: String) {
        self.token = Some(token);
        self.state = SessionState::Authenticated;
    }

    fn invalidate(&mut self) {
        self.token = None;
        self.state = SessionState::Unauthenticated;
    }
}

/// Owns the session and re-authenticates it on demand.
pub struct SessionManager {
    client: ApiClient,
    credentials: Credentials,
    session: Session,
}

impl SessionManager {
    pub fn new(client: ApiClient, user_id: u64, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            session: Session::new(user_id),
        }
    }

    /// Log in with the stored credentials.
    ///
    /// On failure the session is left unauthenticated.
    pub async fn authenticate(&mut self) -> Result<&Session, AgentError> {
        self.session.invalidate();

        let token = self.client.login(&self.credentials).await.map_err(|e| {
            tracing::warn!(username = %self.credentials.username, "login failed: {e}");
            AgentError::Auth(e.to_string())
        })?;

        self.session.authenticated(token);
        tracing::info!(
            username = %self.credentials.username,
            user_id = self.session.user_id,
            "authenticated"
        );
        Ok(&self.session)
    }

    /// The active token, if authenticated.
    pub fn current_token(&self) -> Option<&str> {
        match self.session.state {
            SessionState::Authenticated => self.session.token(),
            SessionState::Unauthenticated => None,
        }
    }

    /// Drop the current token.
    pub fn invalidate(&mut self) {
        if self.session.state == SessionState::Authenticated {
            tracing::debug!(user_id = self.session.user_id, "session invalidated");
        }
        self.session.invalidate();
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

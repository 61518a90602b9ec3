//! # Session Registry
//!
//! Maps live connection identifiers to authenticated identities. The hub
//! asks the registry who a session belongs to before letting it join a
//! project room.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Authenticated user behind a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Turns presented credentials (usually a bearer token) into an identity
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credentials: &str) -> Result<Identity>;
}

impl<F> CredentialVerifier for F
where
    F: Fn(&str) -> Result<Identity> + Send + Sync,
{
    fn verify(&self, credentials: &str) -> Result<Identity> {
        self(credentials)
    }
}

/// Session-scoped identity lookup
pub trait SessionRegistry: Send + Sync {
    /// Verify credentials and bind the identity to `session`.
    fn authenticate(&self, session: &str, credentials: &str) -> Result<Identity>;

    fn identity(&self, session: &str) -> Option<Identity>;

    /// Forget the session, returning the identity it was bound to.
    fn revoke(&self, session: &str) -> Option<Identity>;
}

/// Registry backed by a concurrency-safe map
pub struct InMemorySessionRegistry {
    verifier: Arc<dyn CredentialVerifier>,
    sessions: RwLock<HashMap<String, Identity>>,
}

impl InMemorySessionRegistry {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            verifier,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionRegistry for InMemorySessionRegistry {
    fn authenticate(&self, session: &str, credentials: &str) -> Result<Identity> {
        let identity = self.verifier.verify(credentials)?;

        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        sessions.insert(session.to_string(), identity.clone());

        tracing::info!(session, user_id = %identity.user_id, "Session authenticated");
        Ok(identity)
    }

    fn identity(&self, session: &str) -> Option<Identity> {
        self.sessions.read().ok()?.get(session).cloned()
    }

    fn revoke(&self, session: &str) -> Option<Identity> {
        let removed = self.sessions.write().ok()?.remove(session);
        if removed.is_some() {
            tracing::info!(session, "Session revoked");
        }
        removed
    }
}

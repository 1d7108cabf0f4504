//! Lookup and lifecycle of Comet sessions across HTTP sessions.

use std::sync::Arc;
use std::time::Instant;

use super::{CometSession, HttpSessionStore};
use crate::config::SessionConfig;
use crate::error::{CometError, Result};
use crate::policy::ConnectionPolicy;

/// Finds or creates the Comet session bound to an HTTP session.
///
/// Creation happens under the store's binding, so concurrent first requests
/// for one HTTP session always end up sharing a single Comet session.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    store: Arc<dyn HttpSessionStore>,
    policy: Arc<dyn ConnectionPolicy>,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Create a registry over `store`.
    pub fn new(
        store: Arc<dyn HttpSessionStore>,
        policy: Arc<dyn ConnectionPolicy>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            policy,
            config,
        }
    }

    /// The Comet session for `http_id`, created on first use.
    ///
    /// Fails with `InvalidSession` when the HTTP session does not exist.
    pub fn get_or_create(&self, http_id: &str) -> Result<Arc<CometSession>> {
        let mut create = || {
            CometSession::new(
                http_id,
                Arc::clone(&self.store),
                Arc::clone(&self.policy),
                &self.config,
            )
        };
        self.store
            .bind_or_get(http_id, &mut create)
            .ok_or_else(|| CometError::InvalidSession(http_id.to_string()))
    }

    /// The Comet session for `http_id`, if one is bound and valid.
    pub fn get(&self, http_id: &str) -> Option<Arc<CometSession>> {
        self.store
            .bound(http_id)
            .filter(|session| session.is_valid())
    }

    /// Invalidate the HTTP session and the Comet session it carried.
    pub fn invalidate(&self, http_id: &str) -> bool {
        match self.store.invalidate(http_id) {
            Some(session) => {
                self.policy.invalidate(&session);
                true
            },
            None => false,
        }
    }

    /// Expire idle HTTP sessions. Returns how many Comet sessions went down.
    pub fn sweep(&self) -> usize {
        let expired = self.store.expire_idle(Instant::now());
        for session in &expired {
            tracing::debug!(session = %session.id(), "HTTP session expired");
            self.policy.invalidate(session);
        }
        expired.len()
    }

    /// Every bound, valid Comet session.
    pub fn sessions(&self) -> Vec<Arc<CometSession>> {
        self.store
            .bound_sessions()
            .into_iter()
            .filter(|session| session.is_valid())
            .collect()
    }

    /// Number of bound, valid Comet sessions.
    pub fn count(&self) -> usize {
        self.sessions().len()
    }

    /// The underlying HTTP session store.
    pub fn store(&self) -> &Arc<dyn HttpSessionStore> {
        &self.store
    }
}

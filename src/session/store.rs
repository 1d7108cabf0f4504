//! HTTP session store abstraction.
//!
//! A Comet session lives inside an HTTP session the way a servlet attribute
//! does: the store owns the binding, and expiring or invalidating the HTTP
//! session takes the Comet session down with it. Hosts with their own session
//! machinery implement [`HttpSessionStore`]; [`MemorySessionStore`] is the
//! built-in one used by the server.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::CometSession;

/// Host session store as seen by the Comet layer.
pub trait HttpSessionStore: Send + Sync + fmt::Debug {
    /// Last time the HTTP session was accessed.
    fn last_accessed(&self, id: &str) -> Option<Instant>;

    /// Idle interval after which the HTTP session expires.
    fn max_inactive(&self, id: &str) -> Option<Duration>;

    /// Refresh the last-accessed time without a request.
    ///
    /// Returns false when the HTTP session is gone or already expired.
    fn access(&self, id: &str, secure: bool) -> bool;

    /// Return the bound Comet session, creating and binding one with `create`
    /// if none is bound or the bound one was invalidated. `None` when the HTTP
    /// session does not exist.
    fn bind_or_get(
        &self,
        id: &str,
        create: &mut dyn FnMut() -> Arc<CometSession>,
    ) -> Option<Arc<CometSession>>;

    /// The bound Comet session, if any.
    fn bound(&self, id: &str) -> Option<Arc<CometSession>>;

    /// Remove the binding, keeping the HTTP session.
    fn unbind(&self, id: &str) -> Option<Arc<CometSession>>;

    /// Invalidate the HTTP session, returning the Comet session it carried.
    fn invalidate(&self, id: &str) -> Option<Arc<CometSession>>;

    /// Drop HTTP sessions idle past their interval, returning the Comet
    /// sessions they carried.
    fn expire_idle(&self, now: Instant) -> Vec<Arc<CometSession>>;

    /// Every bound Comet session.
    fn bound_sessions(&self) -> Vec<Arc<CometSession>>;
}

#[derive(Debug)]
struct HttpSessionEntry {
    last_accessed: Instant,
    max_inactive: Duration,
    comet: Option<Arc<CometSession>>,
}

impl HttpSessionEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_accessed) >= self.max_inactive
    }
}

/// In-memory HTTP session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, HttpSessionEntry>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new HTTP session and return its id.
    pub fn create(&self, max_inactive: Duration) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.insert(&id, max_inactive);
        id
    }

    /// Register an HTTP session under a known id.
    pub fn insert(&self, id: &str, max_inactive: Duration) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.to_string(),
                HttpSessionEntry {
                    last_accessed: Instant::now(),
                    max_inactive,
                    comet: None,
                },
            );
    }

    /// Record an ordinary request against the session.
    pub fn touch(&self, id: &str) -> bool {
        self.access(id, false)
    }

    /// Whether the HTTP session exists and has not expired.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Number of HTTP sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HttpSessionStore for MemorySessionStore {
    fn last_accessed(&self, id: &str) -> Option<Instant> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|entry| entry.last_accessed)
    }

    fn max_inactive(&self, id: &str) -> Option<Duration> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|entry| entry.max_inactive)
    }

    fn access(&self, id: &str, _secure: bool) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match sessions.get_mut(id) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = now;
                true
            },
            _ => false,
        }
    }

    fn bind_or_get(
        &self,
        id: &str,
        create: &mut dyn FnMut() -> Arc<CometSession>,
    ) -> Option<Arc<CometSession>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let entry = sessions.get_mut(id)?;
        match &entry.comet {
            Some(existing) if existing.is_valid() => Some(Arc::clone(existing)),
            _ => {
                let session = create();
                entry.comet = Some(Arc::clone(&session));
                Some(session)
            },
        }
    }

    fn bound(&self, id: &str) -> Option<Arc<CometSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(|entry| entry.comet.clone())
    }

    fn unbind(&self, id: &str) -> Option<Arc<CometSession>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
            .and_then(|entry| entry.comet.take())
    }

    fn invalidate(&self, id: &str) -> Option<Arc<CometSession>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .and_then(|entry| entry.comet)
    }

    fn expire_idle(&self, now: Instant) -> Vec<Arc<CometSession>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id).and_then(|entry| entry.comet))
            .collect()
    }

    fn bound_sessions(&self) -> Vec<Arc<CometSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|entry| entry.comet.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_access() {
        let store = MemorySessionStore::new();
        let id = store.create(Duration::from_secs(60));
        assert_eq!(id.len(), 32);
        assert!(store.contains(&id));

        let before = store.last_accessed(&id).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.access(&id, false));
        assert!(store.last_accessed(&id).unwrap() > before);
        assert_eq!(store.max_inactive(&id), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_access_fails_for_unknown_or_expired() {
        let store = MemorySessionStore::new();
        assert!(!store.access("missing", false));

        let id = store.create(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!store.access(&id, false));
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_expire_idle_removes_sessions() {
        let store = MemorySessionStore::new();
        let short = store.create(Duration::from_millis(10));
        let long = store.create(Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));

        let carried = store.expire_idle(Instant::now());
        assert!(carried.is_empty());
        assert!(!store.contains(&short));
        assert!(store.contains(&long));
        assert_eq!(store.len(), 1);
    }
}

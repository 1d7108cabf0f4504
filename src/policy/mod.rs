//! Connection strategies.
//!
//! Once a connection has been initiated it has to wait for work: queued
//! messages, heartbeats and keep-alive probes. Two strategies are provided:
//!
//! | Strategy     | Idle connection holds        | Enqueue wakes by          |
//! |--------------|------------------------------|---------------------------|
//! | Blocking     | a worker thread on a condvar | notifying the condvar     |
//! | Non-blocking | two scheduler entries        | writing on the producer   |
//!
//! The blocking one is simple and needs nothing from the host; the
//! non-blocking one scales to many idle clients but relies on the HTTP
//! session store's `access` hook for keep-alives.

mod blocking;
mod nonblocking;

pub use blocking::BlockingPolicy;
pub use nonblocking::NonBlockingPolicy;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connection::CometConnection;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::session::CometSession;

/// Which strategy handles suspended connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// One worker thread per suspended connection
    Blocking,
    /// Shared scheduler, no thread held while idle
    #[default]
    NonBlocking,
}

impl PolicyKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::NonBlocking => "non-blocking",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocking" => Ok(Self::Blocking),
            "non-blocking" | "nonblocking" | "async" => Ok(Self::NonBlocking),
            _ => Err(format!("Unknown connection policy: {s}")),
        }
    }
}

/// Strategy contract shared by connections and sessions.
pub trait ConnectionPolicy: Send + Sync + fmt::Debug {
    /// Strategy in use.
    fn kind(&self) -> PolicyKind;

    /// Park an initiated connection until it has work.
    ///
    /// The blocking strategy returns only once the connection has ended; the
    /// non-blocking one registers its tasks and returns immediately.
    fn suspend(&self, connection: &Arc<CometConnection>) -> Result<()>;

    /// End a connection. `server_initiated` writes a terminate frame; a
    /// client-side end writes nothing.
    fn terminate(&self, connection: &CometConnection, server_initiated: bool) {
        if server_initiated {
            connection.terminate();
        } else {
            connection.abort();
        }
    }

    /// A message was queued on `session`.
    fn enqueued(&self, session: &CometSession);

    /// The session's HTTP session is gone.
    fn invalidate(&self, session: &CometSession) {
        session.invalidate();
    }
}

/// Build the strategy for `kind`.
pub fn create(kind: PolicyKind, scheduler: &Scheduler) -> Arc<dyn ConnectionPolicy> {
    match kind {
        PolicyKind::Blocking => Arc::new(BlockingPolicy::new()),
        PolicyKind::NonBlocking => Arc::new(NonBlockingPolicy::new(scheduler.clone())),
    }
}

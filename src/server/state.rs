//! Server state shared across handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::ServerConfig;
use crate::connection::ConnectionOptions;
use crate::error::Result;
use crate::policy::{self, ConnectionPolicy};
use crate::protocol::{JsonCodec, MessageCodec};
use crate::scheduler::Scheduler;
use crate::session::{MemorySessionStore, SessionRegistry};
use crate::transport::ConnectionParams;

/// Application state shared across handlers
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Built-in HTTP session store
    pub store: Arc<MemorySessionStore>,
    /// Comet sessions bound to HTTP sessions
    pub registry: SessionRegistry,
    /// Connection strategy
    pub policy: Arc<dyn ConnectionPolicy>,
    /// Shared heartbeat / keep-alive scheduler
    pub scheduler: Scheduler,
    /// Codec for object messages
    pub codec: Arc<dyn MessageCodec>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create state with a dedicated scheduler thread
    pub fn new(config: ServerConfig) -> Result<Self> {
        let scheduler = Scheduler::new()?;
        Ok(Self::with_scheduler(config, scheduler))
    }

    /// Create state on an existing scheduler
    pub fn with_scheduler(config: ServerConfig, scheduler: Scheduler) -> Self {
        let store = Arc::new(MemorySessionStore::new());
        let policy = policy::create(config.comet.transport.policy, &scheduler);
        let registry = SessionRegistry::new(
            store.clone(),
            Arc::clone(&policy),
            config.comet.session.clone(),
        );

        Self {
            config,
            store,
            registry,
            policy,
            scheduler,
            codec: Arc::new(JsonCodec),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Start a new HTTP session with the configured idle interval
    pub fn create_http_session(&self) -> String {
        self.store.create(self.config.comet.session.max_inactive())
    }

    /// Connection options for one request
    ///
    /// A client-requested padding is capped at `max_padding`.
    pub fn connection_options(&self, params: &ConnectionParams) -> ConnectionOptions {
        let transport = &self.config.comet.transport;
        ConnectionOptions {
            heartbeat: transport.heartbeat(),
            client_requested_length: params.length,
            padding: params.padding.map(|n| n.min(transport.max_padding)),
            batch_size: self.config.comet.session.batch_size,
            codec: Arc::clone(&self.codec),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("addr", &self.config.addr)
            .field("policy", &self.policy.kind())
            .field("sessions", &self.registry.count())
            .finish_non_exhaustive()
    }
}

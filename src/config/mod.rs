//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`COMET_*`)
//! - CLI arguments (for the server binary)
//!
//! Every tunable of the window and termination heuristics lives here. The
//! defaults were picked for browsers that keep the whole response body in
//! memory, so deployments talking to newer clients will usually want larger
//! windows.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CometError, Result};
use crate::policy::PolicyKind;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CometConfig {
    /// Session and adaptive window configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Transport framing configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// HTTP listener configuration
    #[serde(default)]
    pub server: ListenConfig,
}

impl CometConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| CometError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| CometError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`<config dir>/comet/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("comet").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `COMET_*` environment variables
    pub fn apply_env(&mut self) {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        if let Ok(host) = std::env::var("COMET_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed("COMET_PORT") {
            self.server.port = port;
        }
        if let Some(ms) = parsed("COMET_HEARTBEAT_MS") {
            self.transport.heartbeat_ms = ms;
        }
        if let Some(policy) = std::env::var("COMET_POLICY")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.transport.policy = policy;
        }
        if let Some(size) = parsed("COMET_INITIAL_WINDOW") {
            self.session.initial_window_size = size;
        }
        if let Some(secs) = parsed("COMET_MAX_INACTIVE_SECS") {
            self.session.max_inactive_secs = secs;
        }
    }

    /// Check invariants between related settings
    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        if s.min_window_size == 0 {
            return Err(CometError::Config("min_window_size must be positive".into()));
        }
        if s.min_window_size > s.max_window_size {
            return Err(CometError::Config(format!(
                "min_window_size {} exceeds max_window_size {}",
                s.min_window_size, s.max_window_size
            )));
        }
        if !(s.min_window_size..=s.htmlfile_max_window_size.max(s.max_window_size))
            .contains(&s.initial_window_size)
        {
            return Err(CometError::Config(format!(
                "initial_window_size {} outside [{}, {}]",
                s.initial_window_size, s.min_window_size, s.max_window_size
            )));
        }
        if s.terminate_multiplier < 1.0 {
            return Err(CometError::Config(
                "terminate_multiplier must be at least 1.0".into(),
            ));
        }
        if s.batch_size == 0 {
            return Err(CometError::Config("batch_size must be positive".into()));
        }
        let t = &self.transport;
        if t.htmlfile_padding > t.max_padding || t.webkit_padding > t.max_padding {
            return Err(CometError::Config(format!(
                "transport padding exceeds max_padding {}",
                t.max_padding
            )));
        }
        if self.transport.heartbeat_ms == 0 {
            return Err(CometError::Config("heartbeat_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Session queue and adaptive window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Window size a new session starts with (bytes)
    pub initial_window_size: u64,

    /// Lower bound of the adaptive window (bytes)
    pub min_window_size: u64,

    /// Upper bound of the adaptive window (bytes)
    pub max_window_size: u64,

    /// Upper bound when the refreshed connection uses the htmlfile transport
    pub htmlfile_max_window_size: u64,

    /// Refresh round trips slower than this shrink the window
    pub refresh_latency_cutoff_ms: u64,

    /// Hard cutoff as a multiple of the window size
    pub terminate_multiplier: f64,

    /// Safety margin subtracted from the keep-alive deadline
    pub keep_alive_buffer_ms: u64,

    /// Max inactive interval of HTTP sessions created by the built-in store
    pub max_inactive_secs: u64,

    /// Messages popped from the queue per write
    pub batch_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_window_size: 64 * 1024,
            min_window_size: 8 * 1024,
            max_window_size: 1024 * 1024,
            htmlfile_max_window_size: 4 * 1024 * 1024,
            refresh_latency_cutoff_ms: 1000,
            terminate_multiplier: 1.1,
            keep_alive_buffer_ms: 10_000,
            max_inactive_secs: 30 * 60,
            batch_size: 10,
        }
    }
}

impl SessionConfig {
    /// Refresh latency cutoff as a duration
    pub fn refresh_latency_cutoff(&self) -> Duration {
        Duration::from_millis(self.refresh_latency_cutoff_ms)
    }

    /// Max inactive interval as a duration
    pub fn max_inactive(&self) -> Duration {
        Duration::from_secs(self.max_inactive_secs)
    }
}

/// Transport framing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Heartbeat interval announced on connect
    pub heartbeat_ms: u64,

    /// Client memory estimate at which a session-less stream is terminated
    pub client_memory_limit: u64,

    /// Head padding of the htmlfile document
    pub htmlfile_padding: usize,

    /// Padding primed for WebKit clients on the http-request transport
    pub webkit_padding: usize,

    /// Upper bound on the padding a client may request
    pub max_padding: usize,

    /// How suspended connections wait for work
    pub policy: PolicyKind,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 30_000,
            client_memory_limit: 1024 * 1024,
            htmlfile_padding: 256,
            webkit_padding: 256,
            max_padding: 64 * 1024,
            policy: PolicyKind::NonBlocking,
        }
    }
}

impl TransportConfig {
    /// Heartbeat interval as a duration
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ListenConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

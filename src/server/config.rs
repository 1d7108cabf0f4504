//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config::CometConfig;
use crate::error::{CometError, Result};
use crate::policy::PolicyKind;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub addr: SocketAddr,
    /// Session, transport and window tunables
    pub comet: CometConfig,
    /// How often idle HTTP sessions are expired
    pub sweep_interval: Duration,
    /// Enable request logging
    pub logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            comet: CometConfig::default(),
            sweep_interval: Duration::from_secs(30),
            logging: true,
        }
    }
}

impl ServerConfig {
    /// Build from a loaded Comet configuration
    pub fn from_comet_config(comet: CometConfig) -> Result<Self> {
        let addr: SocketAddr = comet
            .server
            .listen_addr()
            .parse()
            .map_err(|e| CometError::Config(format!("Invalid listen address: {e}")))?;
        Ok(Self {
            addr,
            comet,
            ..Self::default()
        })
    }

    /// Create with custom port
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self.comet.server.port = port;
        self
    }

    /// Bind to all interfaces
    pub fn bind_all(mut self) -> Self {
        self.addr.set_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        self.comet.server.host = "0.0.0.0".to_string();
        self
    }

    /// Set address directly
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self.comet.server.host = addr.ip().to_string();
        self.comet.server.port = addr.port();
        self
    }

    /// Choose the connection strategy
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.comet.transport.policy = policy;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.comet.transport.heartbeat_ms = heartbeat.as_millis() as u64;
        self
    }

    /// Set the idle-session sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Disable logging
    pub fn without_logging(mut self) -> Self {
        self.logging = false;
        self
    }
}

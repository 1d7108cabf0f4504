//! Comet HTTP server.
//!
//! Serves the Comet channel over axum:
//! - `GET /comet` - open a stream (transport picked per request)
//! - `DELETE /comet` - invalidate the caller's session
//! - `POST /comet/publish` - enqueue a message on live sessions
//! - `GET /health`, `GET /status`
//!
//! # Example
//!
//! ```rust,ignore
//! use comet::server::{serve, ServerConfig};
//!
//! let config = ServerConfig::default().with_port(8080);
//! serve(config).await?;
//! ```

mod config;
mod handlers;
mod state;

pub use config::ServerConfig;
pub use handlers::{create_router, health_check, session_cookie, SESSION_COOKIE};
pub use state::AppState;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{CometError, Result};

/// Bind and serve until the listener fails.
pub async fn serve(config: ServerConfig) -> Result<()> {
    config.comet.validate()?;
    let state = Arc::new(AppState::new(config.clone())?);
    let app = create_router(Arc::clone(&state));
    let sweeper = spawn_sweeper(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| CometError::Server(format!("Failed to bind {}: {e}", config.addr)))?;
    tracing::info!(
        addr = %config.addr,
        policy = %state.policy.kind(),
        "Comet server listening"
    );

    let result = axum::serve(listener, app)
        .await
        .map_err(|e| CometError::Server(format!("Server error: {e}")));
    sweeper.abort();
    result
}

/// Periodically expire idle HTTP sessions and the Comet sessions they carry.
pub fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let expired = state.registry.sweep();
            if expired > 0 {
                tracing::info!(expired, "Expired idle sessions");
            }
        }
    })
}

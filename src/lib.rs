//! # Comet - Server Push over Long-Lived HTTP Responses
//!
//! A Comet server keeps a logical *session* of queued server-to-browser
//! messages alive across one or more long-lived HTTP connections, without
//! relying on native server push.
//!
//! ## Features
//!
//! - **Reconnect-spanning sessions**: one ordered queue per browser channel,
//!   drained by whichever connection is currently attached
//! - **Four transports**: raw stream, IE htmlfile, event stream, and
//!   XMLHttpRequest streaming
//! - **Adaptive window**: each response grows until it asks the client to
//!   reconnect; the reconnect latency resizes the next window
//! - **Two connection strategies**: thread-per-connection (blocking) or a
//!   shared scheduler (non-blocking)
//! - **HTTP session binding**: keep-alives stop the host session from expiring
//!   under an idle stream
//!
//! ## Overview
//!
//! ### Architecture
//!
//! ```text
//! Producer                     Comet Server                       Browser
//!    |                              |                                |
//!    |                              |<------ GET /comet -------------|
//!    |                              |------- !30000 (connect) ------>|
//!    |--- session.enqueue(msg) --->|                                |
//!    |                              |------- |msg ------------------>|
//!    |                              |------- # (heartbeat) --------->|
//!    |                              |------- @ (refresh) ----------->|
//!    |                              |<------ GET /comet -------------|
//!    |                              |------- !30000 ---------------->|
//! ```
//!
//! ### Connection State Machine
//!
//! ```text
//!                   initiate()
//!     [Initiated] ──────────────> [Suspended] <────> [Writing]
//!                                      │
//!                 over window          │          invalidate / failed write
//!          ┌───────────────────────────┴───────────────────────┐
//!          v                                                   v
//!     [Refreshing] ─────────────────────────────────────> [Terminated]
//! ```
//!
//! ### Wire Format
//!
//! | Char | Frame     | Payload                        |
//! |------|-----------|--------------------------------|
//! | `!`  | connect   | heartbeat interval in millis   |
//! | `#`  | heartbeat |                                |
//! | `?`  | terminate | optional `<status> <text>`     |
//! | `@`  | refresh   |                                |
//! | `\|` | string    | verbatim text                  |
//! | `]`  | string    | escaped text                   |
//! | `[`  | object    | escaped codec output           |
//!
//! ## Quick Start
//!
//! ### Embedded
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use comet::{
//!     config::SessionConfig, policy::BlockingPolicy, CometConnection, ConnectionOptions,
//!     MemorySessionStore, MemorySink, RawFraming, SessionRegistry,
//! };
//!
//! let store = Arc::new(MemorySessionStore::new());
//! let http_id = store.create(Duration::from_secs(1800));
//! let registry = SessionRegistry::new(store, Arc::new(BlockingPolicy::new()), SessionConfig::default());
//!
//! let session = registry.get_or_create(&http_id)?;
//! session.enqueue("hello")?;
//!
//! let (sink, output) = MemorySink::with_handle();
//! let connection = CometConnection::new(
//!     Box::new(RawFraming::new(1024 * 1024)),
//!     Box::new(sink),
//!     Some(session),
//!     ConnectionOptions::default(),
//! );
//! connection.initiate()?;
//! assert_eq!(output.contents(), "!30000\n|hello\n");
//! ```
//!
//! ### HTTP Server
//!
//! ```rust,ignore
//! use comet::server::{serve, ServerConfig};
//!
//! serve(ServerConfig::default().with_port(8080)).await?;
//! ```
//!
//! ## Modules
//!
//! - [`session`]: Sessions, adaptive window, HTTP session store, registry
//! - [`connection`]: One physical connection and its length checks
//! - [`policy`]: Blocking and non-blocking connection strategies
//! - [`transport`]: Framings and response sinks
//! - [`protocol`]: Messages, control characters, escaping
//! - [`scheduler`]: Cancel-safe delayed and periodic tasks
//! - [`server`]: HTTP server (Axum-based)
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod connection;
pub mod error;
pub mod policy;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::{CometConfig, SessionConfig, TransportConfig};
pub use connection::{CometConnection, ConnectionOptions, ConnectionState};
pub use error::{CometError, Result};
pub use policy::{BlockingPolicy, ConnectionPolicy, NonBlockingPolicy, PolicyKind};
pub use protocol::{Frame, JsonCodec, Message, MessageCodec};
pub use scheduler::{Cancelable, Scheduler};
pub use server::{AppState, ServerConfig};
pub use session::{
    AdaptiveWindow, CometSession, HttpSessionStore, MemorySessionStore, SessionRegistry,
};
pub use transport::{
    build_framing, ConnectionParams, EventSourceFraming, Framing, HtmlFileFraming,
    HttpRequestFraming, MemorySink, RawFraming, ResponseSink, TransportKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

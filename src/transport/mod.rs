//! Transport framings for Comet connections.
//!
//! A framing turns connection events (connect, messages, heartbeat, refresh,
//! terminate) into bytes for one kind of browser transport. Four are
//! provided:
//!
//! | Transport      | Content-Type        | Frame                           |
//! |----------------|---------------------|---------------------------------|
//! | Raw            | `application/comet` | `<char><payload>\n`             |
//! | HtmlFile       | `text/html`         | `<script>m('...')</script>`     |
//! | EventSource    | `text/event-stream` | `data: <char><payload>\n\n`     |
//! | HttpRequest    | `application/comet` | raw frames, CORS origin echoed  |
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              CometConnection              │
//! │  (locking, byte accounting, lifecycle)   │
//! └───────────────┬──────────────────────────┘
//!                 │ Box<dyn Framing>
//!     ┌───────────┼────────────┬─────────────┐
//!     ▼           ▼            ▼             ▼
//!  RawFraming  HtmlFile   EventSource   HttpRequest
//!     │                        │             │
//!     └──── CountingSink<Box<dyn ResponseSink>> ────┘
//! ```
//!
//! Framings only format. They never touch the network: the connection asks
//! for a complete frame, then writes it to its sink in one call, so a failed
//! write can never leave half a frame on the wire.

mod eventsource;
mod htmlfile;
mod http_request;
mod raw;
mod sink;

pub use eventsource::EventSourceFraming;
pub use htmlfile::HtmlFileFraming;
pub use http_request::HttpRequestFraming;
pub use raw::RawFraming;
pub use sink::{channel, ChannelSink, CountingSink, MemoryHandle, MemorySink, ResponseBody, ResponseSink};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};

use crate::config::TransportConfig;
use crate::error::Result;
use crate::protocol::{Message, MessageCodec};

/// Browser transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Raw data stream (`application/comet`)
    Raw,
    /// IE htmlfile streaming document
    HtmlFile,
    /// Server-sent events stream
    EventSource,
    /// XMLHttpRequest streaming with CORS
    HttpRequest,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::HtmlFile => "htmlfile",
            Self::EventSource => "eventsource",
            Self::HttpRequest => "httprequest",
        }
    }

    /// Response content type.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Raw | Self::HttpRequest => "application/comet",
            Self::HtmlFile => "text/html; charset=utf-8",
            Self::EventSource => "text/event-stream",
        }
    }

    /// Pick the transport for a request.
    ///
    /// An explicit `t` parameter wins; otherwise the `Accept` header and user
    /// agent decide.
    pub fn select(params: &ConnectionParams) -> Self {
        if let Some(kind) = params.transport {
            return kind;
        }
        let accept = params.accept.as_deref().unwrap_or("");
        let agent = params.user_agent.as_deref().unwrap_or("");
        if accept.contains("text/event-stream") {
            Self::EventSource
        } else if agent.contains("MSIE") || agent.contains("Trident/") {
            Self::HtmlFile
        } else if accept.contains("application/comet") {
            Self::Raw
        } else {
            Self::HttpRequest
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" | "r" => Ok(Self::Raw),
            "html" | "htmlfile" | "h" => Ok(Self::HtmlFile),
            "sse" | "eventsource" | "s" => Ok(Self::EventSource),
            "http" | "httprequest" | "xhr" | "x" => Ok(Self::HttpRequest),
            _ => Err(format!("Unknown transport kind: {s}")),
        }
    }
}

/// Per-request parameters read from the query string and headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    /// `padding`: override of the computed padding
    pub padding: Option<usize>,
    /// `length`: maximum response length requested by the client
    pub length: Option<u64>,
    /// `d`: `document.domain` for cross-domain htmlfile
    pub domain: Option<String>,
    /// `t`: forced transport
    pub transport: Option<TransportKind>,
    /// `session`: whether the channel binds to the HTTP session (default yes)
    pub session: bool,
    /// `User-Agent` header
    pub user_agent: Option<String>,
    /// `Origin` header
    pub origin: Option<String>,
    /// `Accept` header
    pub accept: Option<String>,
}

impl ConnectionParams {
    /// Read parameters from a parsed query string and request headers.
    ///
    /// Malformed numeric values are ignored rather than rejected, and a
    /// `length` of zero means no limit.
    pub fn from_request(query: &HashMap<String, String>, headers: &HeaderMap) -> Self {
        let header = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            padding: query.get("padding").and_then(|v| v.parse().ok()),
            length: query
                .get("length")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &u64| n > 0),
            domain: query.get("d").filter(|d| !d.is_empty()).cloned(),
            transport: query.get("t").and_then(|v| v.parse().ok()),
            session: query
                .get("session")
                .map_or(true, |v| !matches!(v.as_str(), "false" | "0" | "no")),
            user_agent: header(header::USER_AGENT),
            origin: header(header::ORIGIN),
            accept: header(header::ACCEPT),
        }
    }

    /// Whether the client is WebKit based (needs buffer priming).
    pub fn is_webkit(&self) -> bool {
        self.user_agent
            .as_deref()
            .is_some_and(|agent| agent.contains("AppleWebKit"))
    }
}

/// Formatting policy for one transport.
///
/// Every method appends complete frames to `out`. Implementations keep their
/// own client-side memory estimate, updated as frames are produced.
pub trait Framing: Send + fmt::Debug {
    /// Transport implemented by this framing.
    fn kind(&self) -> TransportKind;

    /// Response headers, including `Content-Type`.
    fn headers(&self, _params: &ConnectionParams) -> HeaderMap {
        base_headers(self.kind())
    }

    /// Document head (if any) and the connect frame.
    fn initiate(&mut self, out: &mut String, heartbeat: Duration);

    /// Frames for a batch of messages.
    fn write_messages(
        &mut self,
        out: &mut String,
        messages: &[Message],
        codec: &dyn MessageCodec,
    ) -> Result<()>;

    /// Heartbeat frame.
    fn heartbeat(&mut self, out: &mut String);

    /// Terminate frame, optionally carrying an error.
    fn terminate(&mut self, out: &mut String, error: Option<(u16, &str)>);

    /// Refresh frame asking the client to reconnect.
    fn do_refresh(&mut self, out: &mut String);

    /// Trailer written once when the response ends.
    fn close(&mut self, _out: &mut String) {}

    /// Bytes the client must receive before it processes anything.
    fn padding_required(&self) -> usize;

    /// Exactly `n` bytes of filler the client ignores.
    fn padding(&mut self, out: &mut String, n: usize);

    /// Own length heuristic for connections without a session window.
    fn is_over_terminate_length(&self, written: u64) -> bool;
}

/// Headers shared by every transport.
pub(crate) fn base_headers(kind: TransportKind) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(kind.content_type()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

/// Build the framing for a transport.
pub fn build_framing(
    kind: TransportKind,
    params: &ConnectionParams,
    config: &TransportConfig,
) -> Box<dyn Framing> {
    match kind {
        TransportKind::Raw => Box::new(RawFraming::new(config.client_memory_limit)),
        TransportKind::HtmlFile => Box::new(HtmlFileFraming::new(
            params.domain.clone(),
            config.htmlfile_padding,
            config.client_memory_limit,
        )),
        TransportKind::EventSource => {
            Box::new(EventSourceFraming::new(config.client_memory_limit))
        },
        TransportKind::HttpRequest => {
            let padding = if params.is_webkit() {
                config.webkit_padding
            } else {
                0
            };
            Box::new(HttpRequestFraming::new(padding, config.client_memory_limit))
        },
    }
}

//! XMLHttpRequest streaming framing.
//!
//! Same frames as raw, but the browser keeps `responseText` as UTF-16 and
//! copies it on every progress event, so each byte received is charged twice
//! against the client memory limit. Cross-origin clients get their `Origin`
//! echoed back.

use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};

use super::raw::{Envelope, RawFraming};
use super::{base_headers, ConnectionParams, Framing, TransportKind};
use crate::error::Result;
use crate::protocol::{Message, MessageCodec};

/// HTTP request streaming framing.
#[derive(Debug, Clone)]
pub struct HttpRequestFraming {
    raw: RawFraming,
}

impl HttpRequestFraming {
    /// Create with the padding the client needs before it fires progress
    /// events.
    pub fn new(padding_required: usize, memory_limit: u64) -> Self {
        Self {
            raw: RawFraming::derived(
                TransportKind::HttpRequest,
                Envelope::LINE,
                2,
                padding_required,
                memory_limit,
            ),
        }
    }

    /// Estimated client memory.
    pub fn client_memory(&self) -> u64 {
        self.raw.client_memory()
    }
}

impl Framing for HttpRequestFraming {
    fn kind(&self) -> TransportKind {
        TransportKind::HttpRequest
    }

    fn headers(&self, params: &ConnectionParams) -> HeaderMap {
        let mut headers = base_headers(self.kind());
        if let Some(origin) = params
            .origin
            .as_deref()
            .and_then(|o| HeaderValue::from_str(o).ok())
        {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        headers
    }

    fn initiate(&mut self, out: &mut String, heartbeat: Duration) {
        self.raw.initiate(out, heartbeat);
    }

    fn write_messages(
        &mut self,
        out: &mut String,
        messages: &[Message],
        codec: &dyn MessageCodec,
    ) -> Result<()> {
        self.raw.write_messages(out, messages, codec)
    }

    fn heartbeat(&mut self, out: &mut String) {
        self.raw.heartbeat(out);
    }

    fn terminate(&mut self, out: &mut String, error: Option<(u16, &str)>) {
        self.raw.terminate(out, error);
    }

    fn do_refresh(&mut self, out: &mut String) {
        self.raw.do_refresh(out);
    }

    fn padding_required(&self) -> usize {
        self.raw.padding_required()
    }

    fn padding(&mut self, out: &mut String, n: usize) {
        self.raw.padding(out, n);
    }

    fn is_over_terminate_length(&self, written: u64) -> bool {
        self.raw.is_over_terminate_length(written)
    }
}

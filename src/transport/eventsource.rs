//! Server-sent events framing (`text/event-stream`).
//!
//! Each raw frame becomes one `data:` event. `Connection: Close` is forced so
//! the response is not chunk-encoded, which some EventSource implementations
//! buffer.

use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};

use super::raw::{Envelope, RawFraming};
use super::{base_headers, ConnectionParams, Framing, TransportKind};
use crate::error::Result;
use crate::protocol::{Message, MessageCodec};

const EVENT: Envelope = Envelope {
    header: "data: ",
    trailer: "\n\n",
    filler: ": ",
};

/// Event-stream framing.
#[derive(Debug, Clone)]
pub struct EventSourceFraming {
    raw: RawFraming,
}

impl EventSourceFraming {
    /// Create with the raw client memory limit.
    pub fn new(memory_limit: u64) -> Self {
        Self {
            raw: RawFraming::derived(TransportKind::EventSource, EVENT, 1, 0, memory_limit),
        }
    }
}

impl Framing for EventSourceFraming {
    fn kind(&self) -> TransportKind {
        TransportKind::EventSource
    }

    fn headers(&self, _params: &ConnectionParams) -> HeaderMap {
        let mut headers = base_headers(self.kind());
        headers.insert(header::CONNECTION, HeaderValue::from_static("Close"));
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

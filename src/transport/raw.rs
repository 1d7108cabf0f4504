//! Raw line framing (`application/comet`).
//!
//! Frames are `<control><payload>\n`. Event-stream and http-request framings
//! reuse this one and only change the envelope around each frame, the
//! padding, and how client memory is estimated.

use std::borrow::Cow;
use std::fmt::Write;
use std::time::Duration;

use super::{Framing, TransportKind};
use crate::error::Result;
use crate::protocol::{
    escape, Message, MessageCodec, CONNECT, ESCAPED_STRING, HEARTBEAT, OBJECT, REFRESH, STRING,
    TERMINATE,
};

/// Text placed around every frame.
#[derive(Debug, Clone, Copy)]
pub(super) struct Envelope {
    pub header: &'static str,
    pub trailer: &'static str,
    /// Prefix of a filler line the client ignores
    pub filler: &'static str,
}

impl Envelope {
    pub(super) const LINE: Envelope = Envelope {
        header: "",
        trailer: "\n",
        filler: "",
    };
}

/// Raw data framing.
#[derive(Debug, Clone)]
pub struct RawFraming {
    kind: TransportKind,
    envelope: Envelope,
    /// Bytes the client keeps per byte received
    memory_factor: u64,
    client_memory: u64,
    memory_limit: u64,
    padding_required: usize,
}

impl RawFraming {
    /// Raw framing terminating once the client holds `memory_limit` bytes.
    pub fn new(memory_limit: u64) -> Self {
        Self {
            kind: TransportKind::Raw,
            envelope: Envelope::LINE,
            memory_factor: 1,
            client_memory: 0,
            memory_limit,
            padding_required: 0,
        }
    }

    pub(super) fn derived(
        kind: TransportKind,
        envelope: Envelope,
        memory_factor: u64,
        padding_required: usize,
        memory_limit: u64,
    ) -> Self {
        Self {
            kind,
            envelope,
            memory_factor,
            client_memory: 0,
            memory_limit,
            padding_required,
        }
    }

    /// Estimated bytes retained by the client so far.
    pub fn client_memory(&self) -> u64 {
        self.client_memory
    }

    fn frame(&mut self, out: &mut String, control: char, payload: &str) {
        let start = out.len();
        out.push_str(self.envelope.header);
        out.push(control);
        out.push_str(payload);
        out.push_str(self.envelope.trailer);
        self.client_memory += (out.len() - start) as u64 * self.memory_factor;
    }

    fn string_frame(&mut self, out: &mut String, text: &str) {
        match escape(text) {
            Cow::Borrowed(plain) => self.frame(out, STRING, plain),
            Cow::Owned(escaped) => self.frame(out, ESCAPED_STRING, &escaped),
        }
    }
}

impl Framing for RawFraming {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn initiate(&mut self, out: &mut String, heartbeat: Duration) {
        self.frame(out, CONNECT, &heartbeat.as_millis().to_string());
    }

    fn write_messages(
        &mut self,
        out: &mut String,
        messages: &[Message],
        codec: &dyn MessageCodec,
    ) -> Result<()> {
        for message in messages {
            match message {
                Message::Text(text) => self.string_frame(out, text),
                Message::Object(value) => {
                    let encoded = codec.encode(value)?;
                    self.frame(out, OBJECT, &escape(&encoded));
                },
            }
        }
        Ok(())
    }

    fn heartbeat(&mut self, out: &mut String) {
        self.frame(out, HEARTBEAT, "");
    }

    fn terminate(&mut self, out: &mut String, error: Option<(u16, &str)>) {
        match error {
            Some((status, text)) => {
                let mut payload = String::with_capacity(text.len() + 4);
                let _ = write!(payload, "{status} {}", escape(text));
                self.frame(out, TERMINATE, &payload);
            },
            None => self.frame(out, TERMINATE, ""),
        }
    }

    fn do_refresh(&mut self, out: &mut String) {
        self.frame(out, REFRESH, "");
    }

    fn padding_required(&self) -> usize {
        self.padding_required
    }

    fn padding(&mut self, out: &mut String, n: usize) {
        if n == 0 {
            return;
        }
        // one filler line: prefix, spaces, newline; n bytes in total
        let prefix = self.envelope.filler;
        out.push_str(&prefix[..prefix.len().min(n - 1)]);
        let spaces = n.saturating_sub(prefix.len() + 1);
        out.extend(std::iter::repeat(' ').take(spaces));
        out.push('\n');
    }

    fn is_over_terminate_length(&self, _written: u64) -> bool {
        self.client_memory > self.memory_limit
    }
}

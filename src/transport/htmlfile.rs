//! IE "htmlfile" streaming document.
//!
//! The response is one HTML document that never finishes loading. Each event
//! is a `<script>` block calling back into the parent frame:
//!
//! | Call          | Meaning                         |
//! |---------------|---------------------------------|
//! | `c(ms)`       | connected, heartbeat interval   |
//! | `h()`         | heartbeat                       |
//! | `m('s')`      | string message                  |
//! | `o('json')`   | object message                  |
//! | `r()`         | refresh                         |
//! | `t()`         | terminate                       |
//! | `e(code,'s')` | terminate with error            |
//!
//! Script blocks stay in the DOM, so everything written counts against the
//! client memory limit.

use std::fmt::Write;
use std::time::Duration;

use super::{Framing, TransportKind};
use crate::error::Result;
use crate::protocol::{escape_script, Message, MessageCodec};

const HEAD: &str = "<html><head>\
<meta http-equiv=\"Content-Type\" content=\"text/html; charset=utf-8\">";

const CALLBACKS: &str = "<script>var p=parent.__comet;\
function c(h){p.c(h)}function h(){p.h()}function m(s){p.m(s)}function o(s){p.o(s)}\
function r(){p.r()}function t(){p.t()}function e(s,x){p.e(s,x)}</script>\
</head><body>";

/// htmlfile framing.
#[derive(Debug, Clone)]
pub struct HtmlFileFraming {
    domain: Option<String>,
    padding_required: usize,
    client_memory: u64,
    memory_limit: u64,
}

impl HtmlFileFraming {
    /// Create a framing, optionally setting `document.domain` for
    /// cross-subdomain parents.
    pub fn new(domain: Option<String>, padding_required: usize, memory_limit: u64) -> Self {
        Self {
            domain,
            padding_required,
            client_memory: 0,
            memory_limit,
        }
    }

    /// Estimated bytes retained by the client document.
    pub fn client_memory(&self) -> u64 {
        self.client_memory
    }

    fn script(&mut self, out: &mut String, body: &str) {
        let start = out.len();
        out.push_str("<script>");
        out.push_str(body);
        out.push_str("</script>");
        self.client_memory += (out.len() - start) as u64;
    }
}

impl Framing for HtmlFileFraming {
    fn kind(&self) -> TransportKind {
        TransportKind::HtmlFile
    }

    fn initiate(&mut self, out: &mut String, heartbeat: Duration) {
        out.push_str(HEAD);
        if let Some(domain) = &self.domain {
            let _ = write!(
                out,
                "<script>document.domain='{}';</script>",
                escape_script(domain)
            );
        }
        out.push_str(CALLBACKS);
        self.script(out, &format!("c({});", heartbeat.as_millis()));
    }

    fn write_messages(
        &mut self,
        out: &mut String,
        messages: &[Message],
        codec: &dyn MessageCodec,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut calls = String::new();
        for message in messages {
            match message {
                Message::Text(text) => {
                    let _ = write!(calls, "m('{}');", escape_script(text));
                },
                Message::Object(value) => {
                    let encoded = codec.encode(value)?;
                    let _ = write!(calls, "o('{}');", escape_script(&encoded));
                },
            }
        }
        self.script(out, &calls);
        Ok(())
    }

    fn heartbeat(&mut self, out: &mut String) {
        self.script(out, "h();");
    }

    fn terminate(&mut self, out: &mut String, error: Option<(u16, &str)>) {
        match error {
            Some((status, text)) => {
                self.script(out, &format!("e({status},'{}');", escape_script(text)));
            },
            None => self.script(out, "t();"),
        }
    }

    fn do_refresh(&mut self, out: &mut String) {
        self.script(out, "r();");
    }

    fn close(&mut self, out: &mut String) {
        out.push_str("</body></html>");
    }

    fn padding_required(&self) -> usize {
        self.padding_required
    }

    fn padding(&mut self, out: &mut String, n: usize) {
        if n >= 7 {
            out.push_str("<!--");
            out.push_str(&" ".repeat(n - 7));
            out.push_str("-->");
        } else {
            out.push_str(&" ".repeat(n));
        }
    }

    fn is_over_terminate_length(&self, _written: u64) -> bool {
        self.client_memory > self.memory_limit
    }
}

//! Decoding of line-protocol frames.
//!
//! The server never needs this; it exists for Rust clients and for tests that
//! read a response body back.

use super::escape::unescape;
use super::{CONNECT, ESCAPED_STRING, HEARTBEAT, OBJECT, REFRESH, STRING, TERMINATE};

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Stream opened, heartbeat interval in millis
    Connect {
        /// Heartbeat interval announced by the server
        heartbeat_ms: u64,
    },
    /// Keep the connection alive
    Heartbeat,
    /// Channel closed, optionally with an error
    Terminate {
        /// Status code and description when the close was an error
        error: Option<(u16, String)>,
    },
    /// Reconnect now
    Refresh,
    /// String message (already unescaped)
    Text(String),
    /// Codec output of an object message (already unescaped)
    Object(String),
}

impl Frame {
    /// Decode a single frame line (without the trailing newline).
    ///
    /// Returns `None` for blank/padding lines and unknown control characters.
    pub fn parse(line: &str) -> Option<Frame> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut chars = line.chars();
        let control = chars.next()?;
        let payload = chars.as_str();

        match control {
            CONNECT => payload
                .parse()
                .ok()
                .map(|heartbeat_ms| Frame::Connect { heartbeat_ms }),
            HEARTBEAT => Some(Frame::Heartbeat),
            TERMINATE => {
                let error = payload.split_once(' ').and_then(|(status, text)| {
                    status
                        .parse()
                        .ok()
                        .map(|status| (status, unescape(text).into_owned()))
                });
                Some(Frame::Terminate { error })
            },
            REFRESH => Some(Frame::Refresh),
            STRING => Some(Frame::Text(payload.to_string())),
            ESCAPED_STRING => Some(Frame::Text(unescape(payload).into_owned())),
            OBJECT => Some(Frame::Object(unescape(payload).into_owned())),
            _ => None,
        }
    }

    /// Decode every frame in a raw or event-stream body.
    pub fn parse_stream(body: &str) -> Vec<Frame> {
        body.split('\n')
            .map(|line| line.strip_prefix("data: ").unwrap_or(line))
            .filter(|line| !line.trim().is_empty())
            .filter_map(Frame::parse)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            Frame::parse("!30000"),
            Some(Frame::Connect {
                heartbeat_ms: 30000
            })
        );
        assert_eq!(Frame::parse("#"), Some(Frame::Heartbeat));
        assert_eq!(Frame::parse("@"), Some(Frame::Refresh));
        assert_eq!(Frame::parse("?"), Some(Frame::Terminate { error: None }));
        assert_eq!(
            Frame::parse("?503 going\\ndown"),
            Some(Frame::Terminate {
                error: Some((503, "going\ndown".to_string()))
            })
        );
    }

    #[test]
    fn test_parse_messages() {
        assert_eq!(Frame::parse("|a\\b"), Some(Frame::Text("a\\b".to_string())));
        assert_eq!(Frame::parse("]a\\\\b"), Some(Frame::Text("a\\b".to_string())));
        assert_eq!(
            Frame::parse("[{\"k\":1}"),
            Some(Frame::Object("{\"k\":1}".to_string()))
        );
        assert_eq!(Frame::parse("x"), None);
    }

    #[test]
    fn test_parse_stream_skips_padding() {
        let body = "!100\n        \n|one\n#\ndata: |two\n\n";
        assert_eq!(
            Frame::parse_stream(body),
            vec![
                Frame::Connect { heartbeat_ms: 100 },
                Frame::Text("one".to_string()),
                Frame::Heartbeat,
                Frame::Text("two".to_string()),
            ]
        );
    }
}

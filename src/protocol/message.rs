//! Messages pushed from the server to the browser.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CometError, Result};

/// A unit of payload queued on a session.
///
/// Text takes the fast path and is written as is (escaped if needed). Objects
/// go through the connection's [`MessageCodec`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Raw character sequence
    Text(Arc<str>),
    /// Serializable object
    Object(Value),
}

impl Message {
    /// Create a text message
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Message::Text(text.into())
    }

    /// Create an object message from anything serializable
    pub fn object<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Message::Object(serde_json::to_value(value)?))
    }

    /// Text payload, if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::Object(_) => None,
        }
    }

    /// Whether this message takes the character fast path
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(Arc::from(text))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(Arc::from(text))
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Object(value)
    }
}

/// Encodes object messages for the wire.
///
/// The output is treated as an opaque string and escaped by the framing.
pub trait MessageCodec: Send + Sync + fmt::Debug {
    /// Serialize an object payload
    fn encode(&self, value: &Value) -> Result<String>;
}

/// JSON codec (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| CometError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Progress {
        job: String,
        percent: u8,
    }

    #[test]
    fn test_text_conversions() {
        let a: Message = "hello".into();
        let b: Message = String::from("hello").into();
        assert_eq!(a, b);
        assert_eq!(a.as_text(), Some("hello"));
        assert!(a.is_text());
    }

    #[test]
    fn test_object_message() {
        let msg = Message::object(&Progress {
            job: "search".to_string(),
            percent: 40,
        })
        .unwrap();
        assert!(!msg.is_text());
        assert_eq!(msg, Message::Object(json!({"job": "search", "percent": 40})));
    }

    #[test]
    fn test_json_codec() {
        let encoded = JsonCodec.encode(&json!({"a": [1, 2]})).unwrap();
        assert_eq!(encoded, r#"{"a":[1,2]}"#);
    }
}

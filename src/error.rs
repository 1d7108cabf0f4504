//! Comet error types.
//!
//! Only a few of these ever reach a caller. Write failures are absorbed by the
//! connection (which hard-terminates itself), scheduling races are silent
//! no-ops, and an expired HTTP session during a keep-alive probe is turned
//! into a terminate. `InvalidSession` is the one producers are expected to
//! handle: enqueueing onto a dead channel fails loudly.

use thiserror::Error;

/// Comet server errors.
#[derive(Error, Debug)]
pub enum CometError {
    /// The session has been invalidated and accepts no more messages.
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// Writing a frame to the response failed (usually a client disconnect).
    #[error("Write failure: {0}")]
    WriteFailure(#[source] std::io::Error),

    /// The connection has already been terminated.
    #[error("Connection terminated")]
    Terminated,

    /// The underlying HTTP session expired before a keep-alive could reach it.
    #[error("HTTP session expired: {0}")]
    SessionExpired(String),

    /// Error reported before the response started; becomes the HTTP status.
    #[error("Rejected with {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Reason sent to the client
        message: String,
    },

    /// Message payload could not be encoded by the codec.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Comet operations
pub type Result<T> = std::result::Result<T, CometError>;

impl CometError {
    /// Whether this error means the connection is gone for good.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CometError::WriteFailure(_) | CometError::Terminated)
    }

    /// HTTP status for errors that reach a client before streaming starts.
    pub fn status_code(&self) -> u16 {
        match self {
            CometError::Rejected { status, .. } => *status,
            CometError::InvalidSession(_) | CometError::SessionExpired(_) => 410,
            CometError::Codec(_) | CometError::Json(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let rejected = CometError::Rejected {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(rejected.status_code(), 403);
        assert_eq!(rejected.to_string(), "Rejected with 403: forbidden");
        assert_eq!(CometError::InvalidSession("s".into()).status_code(), 410);
        assert_eq!(CometError::Server("x".into()).status_code(), 500);
    }

    #[test]
    fn test_disconnect_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(CometError::WriteFailure(io).is_disconnect());
        assert!(CometError::Terminated.is_disconnect());
        assert!(!CometError::Config("bad".into()).is_disconnect());
    }
}

//! Comet wire protocol: messages, control characters and escaping.
//!
//! Every framing except htmlfile speaks the same line protocol. Each frame is
//! one control character, an optional payload, and a newline:
//!
//! | Char | Frame        | Payload                           |
//! |------|--------------|-----------------------------------|
//! | `!`  | connect      | heartbeat interval in millis      |
//! | `#`  | heartbeat    | none                              |
//! | `?`  | terminate    | optional `<status> <text>` error  |
//! | `@`  | refresh      | none                              |
//! | `\|` | string       | text that needed no escaping      |
//! | `]`  | string       | escaped text                      |
//! | `[`  | object       | escaped codec output              |
//!
//! The htmlfile framing carries the same semantics as script calls, so the
//! [`Frame`] type describes both.

mod escape;
mod frame;
mod message;

pub use escape::{escape, escape_script, unescape};
pub use frame::Frame;
pub use message::{JsonCodec, Message, MessageCodec};

/// Connect frame, followed by the heartbeat interval
pub const CONNECT: char = '!';
/// Heartbeat frame
pub const HEARTBEAT: char = '#';
/// Terminate frame
pub const TERMINATE: char = '?';
/// Refresh frame, asks the client to reconnect
pub const REFRESH: char = '@';
/// String message written verbatim
pub const STRING: char = '|';
/// String message that went through [`escape`]
pub const ESCAPED_STRING: char = ']';
/// Codec-serialized object message
pub const OBJECT: char = '[';

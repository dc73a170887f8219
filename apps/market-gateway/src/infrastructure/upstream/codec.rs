//! Frame Codec
//!
//! Encodes and decodes the broker's Engine.IO / Socket.IO text framing.
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `0{...}` | Engine.IO open handshake |
//! | `1` | close |
//! | `2` | ping (the client keepalive) |
//! | `3` | pong |
//! | `40` | namespace connect |
//! | `42[name, payload]` | application event |
//!
//! Only application events carry data. Decoding never fails: anything that
//! is not a well-formed `42[...]` frame decodes to `None`.

use serde_json::Value;

/// Marker prefix of an application event frame.
pub const EVENT_PREFIX: &str = "42";

/// Client keepalive frame.
pub const HEARTBEAT_FRAME: &str = "2";

/// Reply to a server ping.
pub const PONG_FRAME: &str = "3";

/// Control-level classification of a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// `0{...}` handshake.
    Open,
    /// `1` or `41` close.
    Close,
    /// `2` ping.
    Ping,
    /// `3` pong.
    Pong,
    /// `40` namespace connect.
    Connect,
    /// `42[...]` application event.
    Event,
    /// Anything else.
    Other,
}

impl Frame {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Connect => "connect",
            Self::Event => "event",
            Self::Other => "other",
        }
    }
}

/// Socket.IO frame codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify a raw frame without parsing its body.
    #[must_use]
    pub fn classify(&self, frame: &str) -> Frame {
        if frame.starts_with(EVENT_PREFIX) {
            return Frame::Event;
        }
        match frame.as_bytes() {
            [b'0', ..] => Frame::Open,
            [b'1'] | [b'4', b'1', ..] => Frame::Close,
            [b'2', ..] => Frame::Ping,
            [b'3', ..] => Frame::Pong,
            [b'4', b'0', ..] => Frame::Connect,
            _ => Frame::Other,
        }
    }

    /// Encode an application event.
    ///
    /// Events without a payload encode as `42["name"]`.
    #[must_use]
    pub fn encode(&self, event: &str, payload: Option<&Value>) -> String {
        let body = match payload {
            Some(payload) => Value::Array(vec![Value::String(event.to_string()), payload.clone()]),
            None => Value::Array(vec![Value::String(event.to_string())]),
        };
        format!("{EVENT_PREFIX}{body}")
    }

    /// Decode an application event into its name and payload.
    ///
    /// A missing payload decodes as `null`. Control frames and malformed
    /// bodies decode to `None`.
    #[must_use]
    pub fn decode(&self, frame: &str) -> Option<(String, Value)> {
        let body = frame.strip_prefix(EVENT_PREFIX)?;
        let Ok(Value::Array(mut items)) = serde_json::from_str::<Value>(body) else {
            return None;
        };
        if items.is_empty() {
            return None;
        }
        let payload = if items.len() > 1 {
            items.swap_remove(1)
        } else {
            Value::Null
        };
        match items.swap_remove(0) {
            Value::String(name) => Some((name, payload)),
            _ => None,
        }
    }
}

//! Wire frames exchanged with the remote client.
//!
//! A frame is a single ASCII digit type tag followed by a payload. The
//! transport delimits messages itself, so there is no length prefix.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::{self, Deserialize, Deserializer, Unexpected};
use serde_json::{Map, Value};

/// Tags of frames sent by the client.
pub mod input {
    /// Unknown message type, usually sent by a buggy client.
    pub const UNKNOWN: u8 = b'0';
    /// Keyboard input for the terminal.
    pub const INPUT: u8 = b'1';
    pub const PING: u8 = b'2';
    /// The client's terminal size changed.
    pub const RESIZE_TERMINAL: u8 = b'3';
}

/// Tags of frames sent to the client.
pub mod output {
    pub const UNKNOWN: u8 = b'0';
    /// Terminal output, base64 encoded.
    pub const OUTPUT: u8 = b'1';
    pub const PONG: u8 = b'2';
    pub const SET_WINDOW_TITLE: u8 = b'3';
    pub const SET_PREFERENCES: u8 = b'4';
    pub const SET_RECONNECT: u8 = b'5';
}

/// Errors from decoding a client frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected zero-length read from connection")]
    ZeroLength,
    #[error("unknown message type `{}`", char::from(*.0))]
    UnknownType(u8),
    #[error("received malformed remote command for terminal resize: empty payload")]
    EmptyResize,
    #[error("received malformed remote command for terminal resize: {0}")]
    MalformedResize(#[source] serde_json::Error),
}

/// Payload of a `ResizeTerminal` frame.
///
/// Browsers report sizes as JSON numbers that may be fractional, so both
/// fields are kept as `f64` and truncated when applied. Field names match
/// case-insensitively, and a missing or null field reads as 0.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResizeRequest {
    pub columns: f64,
    pub rows: f64,
}

impl<'de> Deserialize<'de> for ResizeRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            columns: number_field(&fields, "columns")?,
            rows: number_field(&fields, "rows")?,
        })
    }
}

/// Look up `name`, preferring an exact match over a case-insensitive one.
fn number_field<E: de::Error>(fields: &Map<String, Value>, name: &str) -> Result<f64, E> {
    let value = fields.get(name).or_else(|| {
        fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    });

    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| E::custom(format!("`{name}` is out of range"))),
        Some(_) => Err(E::invalid_type(Unexpected::Other("non-number"), &"a number")),
    }
}

impl ResizeRequest {
    /// Column count as terminal dimensions (saturating, negatives become 0).
    pub fn columns(&self) -> u16 {
        self.columns as u16
    }

    pub fn rows(&self) -> u16 {
        self.rows as u16
    }
}

/// A decoded client frame. `Input` borrows its payload from the message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame<'a> {
    Input(&'a [u8]),
    Ping,
    ResizeTerminal(ResizeRequest),
}

impl<'a> InboundFrame<'a> {
    /// Decode one text message received from the client.
    pub fn decode(data: &'a [u8]) -> Result<Self, ProtocolError> {
        let (&tag, payload) = data.split_first().ok_or(ProtocolError::ZeroLength)?;

        match tag {
            input::INPUT => Ok(InboundFrame::Input(payload)),
            input::PING => Ok(InboundFrame::Ping),
            input::RESIZE_TERMINAL => {
                if payload.is_empty() {
                    return Err(ProtocolError::EmptyResize);
                }
                let request =
                    serde_json::from_slice(payload).map_err(ProtocolError::MalformedResize)?;
                Ok(InboundFrame::ResizeTerminal(request))
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame<'a> {
    /// Raw terminal bytes; base64 encoded on the wire.
    Output(&'a [u8]),
    Pong,
    SetWindowTitle(&'a str),
    /// Client-side terminal preferences as a JSON object.
    SetPreferences(&'a serde_json::Value),
    /// Seconds the client waits before reconnecting.
    SetReconnect(u32),
}

impl OutboundFrame<'_> {
    pub fn tag(&self) -> u8 {
        match self {
            OutboundFrame::Output(_) => output::OUTPUT,
            OutboundFrame::Pong => output::PONG,
            OutboundFrame::SetWindowTitle(_) => output::SET_WINDOW_TITLE,
            OutboundFrame::SetPreferences(_) => output::SET_PREFERENCES,
            OutboundFrame::SetReconnect(_) => output::SET_RECONNECT,
        }
    }

    /// Encode the frame as a text message.
    pub fn encode(&self) -> String {
        let mut frame = String::new();
        frame.push(char::from(self.tag()));
        match self {
            OutboundFrame::Output(data) => STANDARD.encode_string(*data, &mut frame),
            OutboundFrame::Pong => {}
            OutboundFrame::SetWindowTitle(title) => frame.push_str(title),
            OutboundFrame::SetPreferences(preferences) => frame.push_str(&preferences.to_string()),
            OutboundFrame::SetReconnect(seconds) => frame.push_str(&seconds.to_string()),
        }
        frame
    }
}

//! JSON hub protocol framing
//!
//! Frames are JSON records terminated by [`RECORD_SEPARATOR`]. Only the
//! message types a client needs are modelled; anything else decodes to
//! [`HubMessage::Other`] and is ignored by the transport.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Record terminator between frames
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Protocol name announced during the handshake
const PROTOCOL_NAME: &str = "json";

/// Protocol version announced during the handshake
const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_COMPLETION: u8 = 3;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// Framing errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invocation without target")]
    MissingTarget,
    #[error("Completion without invocation id")]
    MissingInvocationId,
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),
}

/// A decoded hub frame
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Hub invoking a client method
    Invocation { target: String, arguments: Vec<Value> },
    /// Result of a client invocation
    Completion {
        invocation_id: String,
        result: Result<Value, String>,
    },
    /// Keep-alive
    Ping,
    /// Hub closing the connection
    Close { error: Option<String> },
    /// Message type the client does not handle
    Other(u8),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: u8,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    invocation_id: Option<String>,
    result: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    error: Option<String>,
}

/// Handshake request sent right after the socket opens
pub fn handshake_request() -> String {
    let mut frame = json!({ "protocol": PROTOCOL_NAME, "version": PROTOCOL_VERSION }).to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

/// Parse the hub's handshake answer. Any trailing frames in the same
/// text message are returned for normal processing.
pub fn parse_handshake_response(text: &str) -> Result<&str, ProtocolError> {
    let (head, rest) = text
        .split_once(RECORD_SEPARATOR)
        .unwrap_or((text, ""));
    let response: HandshakeResponse = serde_json::from_str(head)?;
    match response.error {
        Some(error) => Err(ProtocolError::HandshakeRejected(error)),
        None => Ok(rest),
    }
}

/// Split a text message into frames and decode each one
pub fn decode_frames(text: &str) -> Vec<Result<HubMessage, ProtocolError>> {
    text.split(RECORD_SEPARATOR)
        .filter(|frame| !frame.trim().is_empty())
        .map(decode_frame)
        .collect()
}

fn decode_frame(frame: &str) -> Result<HubMessage, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(frame)?;
    match raw.kind {
        TYPE_INVOCATION => Ok(HubMessage::Invocation {
            target: raw.target.ok_or(ProtocolError::MissingTarget)?,
            arguments: raw.arguments,
        }),
        TYPE_COMPLETION => {
            let invocation_id = raw.invocation_id.ok_or(ProtocolError::MissingInvocationId)?;
            let result = match raw.error {
                Some(error) => Err(error),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            Ok(HubMessage::Completion {
                invocation_id,
                result,
            })
        }
        TYPE_PING => Ok(HubMessage::Ping),
        TYPE_CLOSE => Ok(HubMessage::Close { error: raw.error }),
        other => Ok(HubMessage::Other(other)),
    }
}

/// Encode a client invocation. Without an id the hub sends no completion.
pub fn encode_invocation(target: &str, arguments: &[Value], invocation_id: Option<&str>) -> String {
    let mut frame = match invocation_id {
        Some(id) => json!({
            "type": TYPE_INVOCATION,
            "invocationId": id,
            "target": target,
            "arguments": arguments,
        }),
        None => json!({
            "type": TYPE_INVOCATION,
            "target": target,
            "arguments": arguments,
        }),
    }
    .to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

/// Encode a keep-alive ping
pub fn encode_ping() -> String {
    let mut frame = json!({ "type": TYPE_PING }).to_string();
    frame.push(RECORD_SEPARATOR);
    frame
}

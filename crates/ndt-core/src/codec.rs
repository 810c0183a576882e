//! NDT message codec
//!
//! Turns [`Message`] values into control frames and back. The payload of
//! every frame is a JSON object; only its `msg` field is ever read.

use crate::types::*;
use crate::{Frame, FrameError, Result};
use bytes::Bytes;
use serde_json::Value as JsonValue;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Encode a message type and body into a complete frame
pub fn encode(msg_type: MessageType, body: &MessageBody) -> Result<Bytes> {
    let payload = serde_json::to_vec(body)?;
    Frame::new(msg_type, payload).encode()
}

/// Encode a message with only a `msg` field
pub fn encode_message(msg_type: MessageType, msg: &str) -> Result<Bytes> {
    encode(msg_type, &MessageBody::new(msg))
}

/// Encode the extended login advertising `tests`
pub fn encode_login(version: &str, tests: &TestSet) -> Result<Bytes> {
    let body = MessageBody::new(version).with_tests(tests.login_mask().to_string());
    encode(MessageType::ExtendedLogin, &body)
}

/// Decode a frame and extract the message
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let frame = Frame::decode(bytes)?;
    let body = decode_body(&frame.payload)?;
    Ok(Message {
        msg_type: frame.msg_type,
        body,
    })
}

/// Parse a frame payload into a body.
///
/// Anything but a JSON object is rejected. A missing `msg` is an empty
/// body; `tests` is never read back.
pub fn decode_body(payload: &[u8]) -> Result<MessageBody> {
    let value: JsonValue = serde_json::from_slice(payload)?;
    let object = value
        .as_object()
        .ok_or_else(|| FrameError::ParseError(format!("expected JSON object, got {}", kind_of(&value))))?;

    let msg = match object.get("msg") {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => {
            return Err(FrameError::ParseError(format!(
                "msg must be a string, got {}",
                kind_of(other)
            )))
        }
    };

    Ok(MessageBody { msg, tests: None })
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

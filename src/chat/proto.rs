//! Chat event names and payload shapes.
//!
//! Join, leave, and public messages go out under two event names each so
//! servers listening on either naming convention receive them. Direct
//! messages use a single event name.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const JOIN: &str = "join";
pub const CHAT_JOIN: &str = "chat_join";
pub const MESSAGE: &str = "message";
pub const CHAT_MESSAGE: &str = "chat_message";
pub const PRIVATE_MESSAGE: &str = "private_message";
pub const LEAVE: &str = "leave";
pub const CHAT_LEAVE: &str = "chat_leave";
pub const USER_JOINED: &str = "user_joined";
pub const USER_LEFT: &str = "user_left";

/// Events emitted when joining, in emission order.
pub const JOIN_EVENTS: [&str; 2] = [JOIN, CHAT_JOIN];
/// Events emitted for a public message, in emission order.
pub const MESSAGE_EVENTS: [&str; 2] = [MESSAGE, CHAT_MESSAGE];
/// Events emitted when leaving, in emission order.
pub const LEAVE_EVENTS: [&str; 2] = [LEAVE, CHAT_LEAVE];

/// Sender name recorded when an inbound message omits one.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Payload of `join`, `chat_join`, `leave`, and `chat_leave`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PresencePayload<'a> {
    pub username: &'a str,
}

/// Payload of `message` and `chat_message`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatLinePayload<'a> {
    pub username: &'a str,
    pub message: &'a str,
}

/// Payload of `private_message`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PrivateMessagePayload<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub message: &'a str,
}

/// Fields pulled out of an inbound `message` / `chat_message` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChatLine {
    pub username: String,
    pub message: String,
    /// Server-side time label. Shown in logs only.
    pub time: Option<String>,
}

impl InboundChatLine {
    /// Extracts a chat line from an event payload.
    ///
    /// The payload must be a JSON object. A missing or null `username` becomes
    /// [`UNKNOWN_SENDER`], a missing `message` becomes empty, and non-string
    /// scalars are kept as their JSON text.
    pub fn from_payload(payload: &Value) -> Result<Self, PayloadError> {
        let fields = payload.as_object().ok_or(PayloadError::NotAnObject)?;
        Ok(Self {
            username: field_text(fields, "username").unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
            message: field_text(fields, "message").unwrap_or_default(),
            time: field_text(fields, "time"),
        })
    }
}

/// Extracts the username carried by `user_joined` / `user_left`.
pub fn presence_username(payload: &Value) -> Result<&str, PayloadError> {
    payload.as_str().ok_or(PayloadError::NotAString)
}

/// Inbound payload did not have the expected shape.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload is not a string")]
    NotAString,
}

fn field_text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

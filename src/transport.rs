//! Transport abstraction consumed by the chat session.
//!
//! A transport owns one connection to a realtime event server. It exposes
//! outbound `emit`/`disconnect` calls and hands inbound events plus lifecycle
//! notifications back over channels once `connect` succeeds.

use std::future::Future;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::socketio::packet::PacketError;

/// Named event received from the server.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEvent {
    /// Event name as sent by the server.
    pub name: String,
    /// Event arguments in wire order.
    pub args: Vec<Value>,
}

impl InboundEvent {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Returns the first argument, which carries the payload for every event
    /// this client understands.
    pub fn payload(&self) -> &Value {
        self.args.first().unwrap_or(&Value::Null)
    }

    /// Renders all arguments as JSON text for diagnostics.
    pub fn raw(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] => single.to_string(),
            many => Value::Array(many.to_vec()).to_string(),
        }
    }
}

/// Connection lifecycle updates produced by a transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Channels handed out by a successful [`Transport::connect`].
#[derive(Debug)]
pub struct TransportLink {
    /// Inbound server events in arrival order.
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
    /// Lifecycle notifications.
    pub status: mpsc::UnboundedReceiver<ConnectionStatus>,
}

/// Realtime event transport.
///
/// Implementations must be safe to call from several tasks at once; the chat
/// session only holds a shared reference.
pub trait Transport: Send + Sync + 'static {
    /// Opens the connection. Resolves once the server accepted the session.
    fn connect(&self) -> impl Future<Output = Result<TransportLink, TransportError>> + Send;

    /// Sends one named event with a single payload argument.
    fn emit(
        &self,
        event: &str,
        payload: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Leaves the server namespace and closes the connection.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Errors produced by transport setup and traffic.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame could not be decoded or encoded as a Socket.IO packet.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Server refused the namespace connection.
    #[error("connection rejected by server: {0}")]
    Rejected(String),

    /// No connection has been opened, or it was already torn down.
    #[error("transport is not connected")]
    NotConnected,

    /// Background connection worker is gone.
    #[error("connection closed")]
    Closed,

    /// Handshake contract violated.
    #[error("protocol error: {0}")]
    Protocol(String),
}

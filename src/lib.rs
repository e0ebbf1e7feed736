//! Console chat client for Socket.IO event servers.
//!
//! The crate is organized by layer:
//! - `transport`: the transport abstraction the session talks to.
//! - `socketio`: websocket-backed Socket.IO implementation of that transport.
//! - `chat`: messages, history, event routing, and the chat session.
//! - `config`: endpoint and path settings.
//! - `cli`: command-line arguments and console input parsing.

/// Interactive console front end helpers.
pub mod cli;
/// Chat session, history, and protocol payloads.
pub mod chat;
/// Endpoint and path settings.
pub mod config;
/// Socket.IO websocket transport.
pub mod socketio;
/// Transport trait and shared transport types.
pub mod transport;

pub use chat::history::{Message, MessageHistory, User};
pub use chat::session::{ChatError, ChatSession, Delivery, SessionState};
pub use config::ChatConfig;
pub use socketio::client::SocketIoTransport;

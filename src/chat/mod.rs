//! Chat modules.
//!
//! - `history`: user identity, messages, and the shared message log.
//! - `proto`: event names and payload shapes exchanged with the server.
//! - `dispatch`: name-based routing of inbound events to handlers.
//! - `session`: the connection-owning chat session.

/// Inbound event router.
pub mod dispatch;
/// Users, messages, and message history.
pub mod history;
/// Chat event names and payloads.
pub mod proto;
/// Chat session driving one connection.
pub mod session;

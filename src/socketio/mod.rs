//! Socket.IO modules.
//!
//! - `packet`: Engine.IO / Socket.IO text packet codec.
//! - `client`: websocket transport worker implementing [`crate::transport::Transport`].

/// Websocket transport for Socket.IO servers.
pub mod client;
/// Text packet encoding and decoding.
pub mod packet;

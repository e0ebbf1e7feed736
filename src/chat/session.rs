//! Chat session over a realtime event transport.
//!
//! `ChatSession` turns local intents (send, send private, leave) into
//! outbound events and inbound chat events into [`MessageHistory`] entries.
//! Only a failed connect reaches the caller as an error. Emit, close, and
//! payload failures are logged and absorbed.
//!
//! Inbound `message` and `chat_message` are recorded independently, so a
//! peer that emits both names for one line shows up twice in the history.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::dispatch::EventRouter;
use crate::chat::history::{Message, MessageHistory, User};
use crate::chat::proto::{
    presence_username, ChatLinePayload, InboundChatLine, PresencePayload, PrivateMessagePayload,
    JOIN_EVENTS, LEAVE_EVENTS, MESSAGE_EVENTS, PRIVATE_MESSAGE, USER_JOINED, USER_LEFT,
};
use crate::transport::{ConnectionStatus, InboundEvent, Transport, TransportError};

/// Lifecycle of one session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome of a send operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// Blank input; nothing was emitted or recorded.
    Skipped,
    /// Emitted and recorded locally.
    Sent,
    /// Emit failed; the message was still recorded locally.
    EchoedOnly,
}

/// Errors surfaced by the session API.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("could not connect to chat server: {0}")]
    Connect(#[from] TransportError),

    #[error("username must not be empty")]
    InvalidUsername,

    #[error("session is already connected")]
    AlreadyConnected,
}

/// Session state plus the number of the connection it belongs to. A
/// lifecycle watcher only updates the state while its connection is current.
#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    epoch: u64,
}

#[derive(Clone, Copy, Debug)]
enum Presence {
    Joined,
    Left,
}

/// One user's connection to the chat server.
pub struct ChatSession<T: Transport> {
    transport: T,
    user: User,
    history: MessageHistory,
    lifecycle: Arc<Mutex<Lifecycle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> ChatSession<T> {
    /// Creates a disconnected session. `history` is shared with the caller.
    pub fn new(transport: T, user: User, history: MessageHistory) -> Self {
        Self {
            transport,
            user,
            history,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: SessionState::Disconnected,
                epoch: 0,
            })),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Connects, installs inbound handlers, and announces the user.
    ///
    /// Handlers are in place before any inbound event is dispatched. Join
    /// announcement failures are logged only.
    pub async fn connect(&self) -> Result<(), ChatError> {
        let epoch = self.begin_connect()?;
        let router = self.build_router();

        info!(event = "chat_connecting", "Connecting to server...");
        let link = match self.transport.connect().await {
            Ok(link) => link,
            Err(err) => {
                self.set_state(SessionState::Disconnected);
                warn!(event = "chat_connect_failed", error = %err, "Connection failed");
                return Err(ChatError::Connect(err));
            }
        };

        self.set_state(SessionState::Connected);
        let dispatch = tokio::spawn(router.run(link.events));
        let lifecycle = tokio::spawn(watch_lifecycle(
            link.status,
            Arc::clone(&self.lifecycle),
            epoch,
        ));
        self.replace_tasks(vec![dispatch, lifecycle]);
        info!(
            event = "chat_connected",
            username = %self.user.username(),
            "Connected to chat!"
        );

        let announce = PresencePayload {
            username: self.user.username(),
        };
        match self.emit_all(&JOIN_EVENTS, announce).await {
            Ok(()) => info!(event = "chat_join_sent", "Join emitted (join + chat_join)"),
            Err(err) => warn!(event = "chat_join_failed", error = %err, "Error emitting join"),
        }
        Ok(())
    }

    /// Sends a public message under both message event names.
    ///
    /// The message is appended to the history whether or not the emit
    /// succeeds. Blank text is ignored.
    pub async fn send_message(&self, text: &str) -> Delivery {
        if text.trim().is_empty() {
            return Delivery::Skipped;
        }

        let username = self.user.username();
        let payload = ChatLinePayload {
            username,
            message: text,
        };
        let delivery = match self.emit_all(&MESSAGE_EVENTS, payload).await {
            Ok(()) => {
                info!(event = "chat_line_sent", "Sent (message + chat_message): {text}");
                Delivery::Sent
            }
            Err(err) => {
                warn!(event = "chat_line_emit_failed", error = %err, "Error emitting message");
                Delivery::EchoedOnly
            }
        };

        self.history.add(Message::public(username, text));
        delivery
    }

    /// Sends a direct message as a single `private_message` event.
    ///
    /// Recorded locally regardless of emit outcome. Blank recipient or text
    /// is ignored.
    pub async fn send_private_message(&self, recipient: &str, text: &str) -> Delivery {
        if recipient.trim().is_empty() || text.trim().is_empty() {
            return Delivery::Skipped;
        }

        let username = self.user.username();
        let message = Message::private(username, recipient, text);
        let payload = PrivateMessagePayload {
            from: username,
            to: recipient,
            message: text,
        };
        let delivery = match self.emit_all(&[PRIVATE_MESSAGE], payload).await {
            Ok(()) => {
                info!(event = "private_message_sent", to = %recipient, "(DM to {recipient}) {text}");
                Delivery::Sent
            }
            Err(err) => {
                warn!(
                    event = "private_message_emit_failed",
                    error = %err,
                    "Error emitting private_message"
                );
                Delivery::EchoedOnly
            }
        };

        self.history.add(message);
        delivery
    }

    /// Announces departure and closes the connection.
    ///
    /// Always completes. Failures while announcing or closing are logged.
    pub async fn disconnect(&self) {
        let announce = PresencePayload {
            username: self.user.username(),
        };
        match self.emit_all(&LEAVE_EVENTS, announce).await {
            Ok(()) => info!(event = "chat_leave_sent", "Leave emitted (leave + chat_leave)"),
            Err(err) => warn!(event = "chat_leave_failed", error = %err, "Error emitting leave"),
        }

        if let Err(err) = self.transport.disconnect().await {
            warn!(event = "chat_close_failed", error = %err, "Error closing connection");
        }

        self.replace_tasks(Vec::new());
        self.set_state(SessionState::Disconnected);
        info!(event = "chat_left", "You have left the chat.");
    }

    /// Emits `payload` under each name in order, stopping at the first failure.
    async fn emit_all<P>(&self, events: &[&str], payload: P) -> Result<(), TransportError>
    where
        P: Serialize + Send,
    {
        let payload = serde_json::to_value(payload)?;
        for event in events {
            self.transport.emit(event, payload.clone()).await?;
        }
        Ok(())
    }

    fn build_router(&self) -> EventRouter {
        let mut router = EventRouter::new();
        for event in MESSAGE_EVENTS {
            let history = self.history.clone();
            router = router.on(event, move |inbound| record_chat_line(inbound, &history));
        }
        router
            .on(USER_JOINED, |inbound| announce_presence(inbound, Presence::Joined))
            .on(USER_LEFT, |inbound| announce_presence(inbound, Presence::Left))
            .on_any(log_unhandled)
    }

    /// Claims the session for a new connection and retires the tasks of the
    /// previous one. Returns the new connection's epoch.
    fn begin_connect(&self) -> Result<u64, ChatError> {
        let epoch = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if lifecycle.state != SessionState::Disconnected {
                return Err(ChatError::AlreadyConnected);
            }
            lifecycle.state = SessionState::Connecting;
            lifecycle.epoch += 1;
            lifecycle.epoch
        };
        self.replace_tasks(Vec::new());
        Ok(epoch)
    }

    fn set_state(&self, next: SessionState) {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state = next;
    }

    fn replace_tasks(&self, next: Vec<JoinHandle<()>>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
        tasks.extend(next);
    }
}

impl<T: Transport> Drop for ChatSession<T> {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn record_chat_line(event: &InboundEvent, history: &MessageHistory) {
    debug!(event = "chat_line_raw", name = %event.name, raw = %event.raw());

    let line = match InboundChatLine::from_payload(event.payload()) {
        Ok(line) => line,
        Err(err) => {
            warn!(
                event = "chat_line_malformed",
                name = %event.name,
                error = %err,
                raw = %event.raw(),
                "{} handler could not read payload",
                event.name
            );
            return;
        }
    };

    // The server's time label is display-only; the local clock stamps the entry.
    let received_at = Local::now();
    let time = line
        .time
        .unwrap_or_else(|| received_at.format("%H:%M").to_string());
    info!(
        event = "chat_line_received",
        name = %event.name,
        "[{time}] {}: {}",
        line.username,
        line.message
    );
    history.add(Message::public(line.username, line.message).with_timestamp(received_at));
}

fn announce_presence(event: &InboundEvent, presence: Presence) {
    debug!(event = "presence_raw", name = %event.name, raw = %event.raw());

    let Ok(username) = presence_username(event.payload()) else {
        return;
    };
    match presence {
        Presence::Joined => info!(event = "user_joined", username = %username, "*** {username} has joined ***"),
        Presence::Left => info!(event = "user_left", username = %username, "*** {username} has left ***"),
    }
}

fn log_unhandled(event: &InboundEvent) {
    info!(
        event = "inbound_event",
        name = %event.name,
        raw = %event.raw(),
        "Event: {}, Payload: {}",
        event.name,
        event.raw()
    );
}

async fn watch_lifecycle(
    mut status: mpsc::UnboundedReceiver<ConnectionStatus>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    epoch: u64,
) {
    while let Some(update) = status.recv().await {
        match update {
            ConnectionStatus::Connected => debug!(event = "transport_connected"),
            ConnectionStatus::Disconnected => {
                let mut current = lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
                if current.epoch != epoch {
                    debug!(event = "stale_disconnect_ignored", epoch);
                    return;
                }
                current.state = SessionState::Disconnected;
                drop(current);
                info!(event = "chat_disconnected", "Disconnected from server.");
            }
        }
    }
}

//! Chat identities, messages, and the shared message log.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local};

use crate::chat::session::ChatError;

/// Local chat identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    username: String,
}

impl User {
    /// Creates a user. Surrounding whitespace is trimmed and the remaining
    /// name must not be empty.
    pub fn new(username: impl Into<String>) -> Result<Self, ChatError> {
        let username = username.into();
        let trimmed = username.trim();
        if trimmed.is_empty() {
            return Err(ChatError::InvalidUsername);
        }
        Ok(Self {
            username: trimmed.to_string(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

/// One chat line, public or direct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    sender: String,
    text: String,
    timestamp: DateTime<Local>,
    recipient: Option<String>,
}

impl Message {
    /// Public message stamped with the current local time.
    pub fn public(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: Local::now(),
            recipient: None,
        }
    }

    /// Direct message stamped with the current local time.
    pub fn private(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: Local::now(),
            recipient: Some(recipient.into()),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn is_private(&self) -> bool {
        self.recipient.is_some()
    }

    /// Recipient of a direct message; `None` for public messages.
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.timestamp.format("%H:%M");
        match &self.recipient {
            Some(recipient) => write!(
                f,
                "[{time}] (DM to {recipient}) {}: {}",
                self.sender, self.text
            ),
            None => write!(f, "[{time}] {}: {}", self.sender, self.text),
        }
    }
}

/// Append-only, insertion-ordered message log.
///
/// Clones share the same log, so inbound handlers and readers can each hold
/// a handle. Appends and snapshots are serialized by an internal lock.
#[derive(Clone, Debug, Default)]
pub struct MessageHistory {
    entries: Arc<RwLock<Vec<Message>>>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, message: Message) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Returns every message recorded so far, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Inbound event routing.
//!
//! Handlers are registered by event name before the connection is handed
//! over. Events without a named handler go to the catch-all, if any.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::InboundEvent;

/// Callback invoked for one inbound event.
pub type Handler = Box<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Handler>,
    fallback: Option<Handler>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `event`, replacing any earlier binding.
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.handlers.insert(event.into(), Box::new(handler));
        self
    }

    /// Binds the catch-all handler for events without a named binding.
    pub fn on_any<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Routes one event. Returns `false` when nothing handled it.
    pub fn dispatch(&self, event: &InboundEvent) -> bool {
        if let Some(handler) = self.handlers.get(&event.name) {
            handler(event);
            return true;
        }
        match &self.fallback {
            Some(fallback) => {
                fallback(event);
                true
            }
            None => {
                debug!(event = "inbound_event_dropped", name = %event.name);
                false
            }
        }
    }

    /// Dispatches events in arrival order until the channel closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut events: Vec<_> = self.handlers.keys().collect();
        events.sort();
        f.debug_struct("EventRouter")
            .field("events", &events)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

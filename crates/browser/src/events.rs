//! Event Bus - page lifecycle notifications
//!
//! Design: one enum, one broadcast channel. Slow receivers lag and lose the
//! oldest events rather than blocking publishers.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::settle::SettleReason;

/// Things a page reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageEvent {
    Settled {
        reason: SettleReason,
        pending: usize,
        elapsed: Duration,
    },
    /// A same-process frame was given the main target's session
    SessionAliased { frame_id: String },
    SessionInvalidated { target_id: String },
    OrdinalsReset,
    MainFrameNavigated { url: String },
}

/// Simple event bus using tokio broadcast channel
pub struct EventBus {
    tx: broadcast::Sender<PageEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: PageEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

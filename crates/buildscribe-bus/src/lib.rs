// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internal typed event bus.
//!
//! A thin wrapper over `tokio::sync::broadcast`. Publishing never blocks and
//! never fails: with no subscribers the event is dropped, and slow
//! subscribers observe `Lagged` instead of slowing the engine down.

pub mod events;

pub use events::{BusEvent, EngineEvent};

use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to the engine's event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event, returning the number of subscribers reached.
    pub fn publish(&self, event: EngineEvent) -> usize {
        let kind = event.kind();
        let reached = self.sender.send(BusEvent::new(event)).unwrap_or(0);
        trace!(kind, reached, "bus event published");
        reached
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

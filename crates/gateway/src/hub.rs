//! Typed broadcast hub for Registry change / resource-update events.
//!
//! Resolves the cyclic-reference shape flagged in Design Notes §9: the
//! Registry never holds a `Session` reference, and a `Session` never holds a
//! `Registry` callback list. Both sides only know about the hub. Each
//! `Session` subscribes its own receiver and runs a task forwarding matching
//! events to its client.

use goblin_core::prelude::Strng;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Tools,
    Prompts,
    Resources,
    Templates,
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// One aggregation category changed for a given upstream (or `None` for
    /// an aggregate/global change such as upstream add/remove).
    ListChanged {
        category: Category,
        upstream: Option<Strng>,
    },
    /// An upstream pushed `resources/updated` for `raw_uri`; `namespaced_uri`
    /// is filled in by the Registry before publishing so subscribers never
    /// need to re-derive the mapping themselves.
    ResourceUpdated {
        upstream: Strng,
        namespaced_uri: Strng,
    },
}

const CHANNEL_CAPACITY: usize = 1024;

/// Multiplexing hub: one broadcast channel, many subscribers. Lagging
/// subscribers (a slow session) drop old events rather than back-pressuring
/// the Registry — per spec §4.7, "when a notification cannot be delivered...
/// it is dropped with a warn log", which the session-side consumer handles.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: broadcast::Sender<GatewayEvent>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: GatewayEvent) {
        // No receivers is a normal state (no sessions yet) — not an error.
        let _ = self.tx.send(event);
    }
}

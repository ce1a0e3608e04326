// ABOUTME: Synchronous publish/subscribe event bus shared by the whole hub.
// ABOUTME: Listeners are callbacks invoked on the firing thread, in registration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::event::Event;

/// Subscribe to every event type.
pub const MATCH_ALL: &str = "*";

/// Identifies a registered listener so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    by_type: HashMap<String, Vec<(ListenerId, Listener)>>,
}

/// The hub's event bus. Cloning yields another handle to the same bus.
///
/// `fire` runs every matching listener before returning, so a listener that
/// only enqueues work gives callers a strict happens-before between firing and
/// the enqueue. Listeners must stay short and must not block.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event type, or [`MATCH_ALL`].
    ///
    /// Listeners run synchronously on the firing thread. A `state_changed`
    /// listener runs while the state machine holds its write lock: it may read
    /// states but must not set or remove them, or the write deadlocks. Hand
    /// such work off to a queue instead.
    pub fn listen<F>(&self, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry
            .by_type
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = false;
        for listeners in registry.by_type.values_mut() {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            removed |= listeners.len() != before;
        }
        registry.by_type.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    /// Deliver an event to every listener for its type and to catch-all listeners.
    pub fn fire(&self, event: Event) {
        let targets: Vec<Listener> = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            let specific = registry.by_type.get(&event.event_type).into_iter().flatten();
            let catch_all = registry.by_type.get(MATCH_ALL).into_iter().flatten();
            specific
                .chain(catch_all)
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        tracing::trace!(event_type = %event.event_type, listeners = targets.len(), "firing event");
        for listener in targets {
            listener(&event);
        }
    }

    /// Number of listeners per event type, for diagnostics.
    pub fn listener_counts(&self) -> HashMap<String, usize> {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry
            .by_type
            .iter()
            .map(|(event_type, listeners)| (event_type.clone(), listeners.len()))
            .collect()
    }
}

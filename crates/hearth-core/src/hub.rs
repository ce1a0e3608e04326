// ABOUTME: The hub context object: event bus, state machine, and lifecycle phase.
// ABOUTME: Components receive a Hub handle at construction instead of reaching for globals.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde_json::json;

use crate::bus::EventBus;
use crate::entity::{EntityIdError, split_entity_id};
use crate::event::{EVENT_HUB_START, EVENT_HUB_STOP, Event, StateChangedData};
use crate::state::State;

/// Lifecycle phase of the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    NotRunning,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoreState::NotRunning => "not_running",
            CoreState::Starting => "starting",
            CoreState::Running => "running",
            CoreState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Tracks the current State of every entity and announces transitions on the bus.
#[derive(Clone)]
pub struct StateMachine {
    states: Arc<Mutex<HashMap<String, State>>>,
    // Serializes write-then-fire so events leave in the order writes were applied.
    writes: Arc<Mutex<()>>,
    bus: EventBus,
}

impl StateMachine {
    pub fn new(bus: EventBus) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            writes: Arc::new(Mutex::new(())),
            bus,
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(entity_id).cloned()
    }

    pub fn entity_ids(&self) -> Vec<String> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = states.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Set the state of an entity. Writing an identical value and attributes is
    /// a no-op; otherwise a `state_changed` event is fired.
    ///
    /// Writes are serialized and each event is fired before the next write
    /// starts, so listeners observe transitions in the order they were applied.
    /// The table itself is unlocked while firing: listeners may read states,
    /// but must not write them synchronously.
    pub fn set(
        &self,
        entity_id: &str,
        new_state: &str,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Result<State, EntityIdError> {
        let entity_id = entity_id.to_lowercase();
        split_entity_id(&entity_id)?;

        let _write = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        let (old_state, state) = {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let old_state = states.get(&entity_id).cloned();

            if let Some(old) = &old_state
                && old.state == new_state
                && old.attributes == attributes
            {
                return Ok(old.clone());
            }

            let now = Utc::now();
            let last_changed = match &old_state {
                Some(old) if old.state == new_state => old.last_changed,
                _ => now,
            };
            let state =
                State::with_timestamps(&entity_id, new_state, attributes, last_changed, now)?;
            states.insert(entity_id.clone(), state.clone());
            (old_state, state)
        };

        self.bus.fire(Event::state_changed(StateChangedData {
            entity_id,
            old_state,
            new_state: Some(state.clone()),
        }));

        Ok(state)
    }

    /// Remove an entity. Fires a `state_changed` event with no new state.
    pub fn remove(&self, entity_id: &str) -> bool {
        let entity_id = entity_id.to_lowercase();
        let _write = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        let removed = self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&entity_id);
        let Some(old_state) = removed else {
            return false;
        };

        self.bus.fire(Event::state_changed(StateChangedData {
            entity_id,
            old_state: Some(old_state),
            new_state: None,
        }));
        true
    }
}

/// The hub: bus, state machine, and lifecycle phase bundled into one handle.
#[derive(Clone)]
pub struct Hub {
    pub bus: EventBus,
    pub states: StateMachine,
    phase: Arc<RwLock<CoreState>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let bus = EventBus::new();
        Self {
            states: StateMachine::new(bus.clone()),
            bus,
            phase: Arc::new(RwLock::new(CoreState::NotRunning)),
        }
    }

    pub fn core_state(&self) -> CoreState {
        *self.phase.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_core_state(&self, next: CoreState) {
        let mut phase = self.phase.write().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(from = %*phase, to = %next, "hub lifecycle transition");
        *phase = next;
    }

    /// Enter the starting phase, during which components set themselves up.
    pub fn begin_startup(&self) {
        self.set_core_state(CoreState::Starting);
    }

    /// Finish startup: fires `hub_start`, then the hub is running.
    pub fn start(&self) {
        if self.core_state() == CoreState::NotRunning {
            self.begin_startup();
        }
        self.bus.fire(Event::new(EVENT_HUB_START, json!({})));
        self.set_core_state(CoreState::Running);
        tracing::info!("hub started");
    }

    /// Fire `hub_stop` and return to the not-running phase.
    pub fn stop(&self) {
        self.set_core_state(CoreState::Stopping);
        self.bus.fire(Event::new(EVENT_HUB_STOP, json!({})));
        self.set_core_state(CoreState::NotRunning);
        tracing::info!("hub stopped");
    }
}

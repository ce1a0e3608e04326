// ABOUTME: Startup restore cache: the last known state of every entity from the previous run.
// ABOUTME: Populated once while the hub is starting, discarded when the hub finishes starting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hearth_core::{CoreState, EVENT_HUB_START, EventBus, Hub, ListenerId, State};
use hearth_store::{Database, get_states_at, last_recorder_run};

type Cache = Arc<Mutex<Option<HashMap<String, State>>>>;

/// Snapshot of entity states as of the end of the previous recorder run.
pub struct RestoreCache {
    hub: Hub,
    states: Cache,
    listener: Option<ListenerId>,
}

impl RestoreCache {
    /// Build the cache from the last closed run. Only loads while the hub is
    /// starting; at any other phase the cache stays empty and unloaded.
    pub fn load(hub: &Hub, db: &Database) -> Self {
        if hub.core_state() != CoreState::Starting {
            tracing::debug!(phase = %hub.core_state(), "hub not starting, restore cache disabled");
            return Self {
                hub: hub.clone(),
                states: Arc::new(Mutex::new(None)),
                listener: None,
            };
        }

        let last_end = last_recorder_run(db).and_then(|run| run.ended);
        let snapshot: HashMap<String, State> = match last_end {
            Some(ended) => {
                get_states_at(db, ended, None)
                    .into_iter()
                    .filter_map(|record| match record.to_native() {
                        Ok(state) => Some((state.entity_id.clone(), state)),
                        Err(e) => {
                            tracing::warn!(
                                entity_id = %record.entity_id,
                                error = %e,
                                "skipping unrestorable state"
                            );
                            None
                        }
                    })
                    .collect()
            }
            None => {
                tracing::info!("no previous recorder run, nothing to restore");
                HashMap::new()
            }
        };
        tracing::info!(entities = snapshot.len(), "restore cache loaded");

        let states: Cache = Arc::new(Mutex::new(Some(snapshot)));
        let listener = discard_on_start(&hub.bus, Arc::clone(&states));
        Self {
            hub: hub.clone(),
            states,
            listener: Some(listener),
        }
    }

    /// The state an entity had when the previous run ended. Always `None`
    /// once the hub has left the starting phase.
    pub fn get_last_state(&self, entity_id: &str) -> Option<State> {
        if self.hub.core_state() != CoreState::Starting {
            return None;
        }
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.as_ref()?.get(&entity_id.to_lowercase()).cloned()
    }

    /// Whether a snapshot is currently held.
    pub fn is_loaded(&self) -> bool {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Drop for RestoreCache {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.hub.bus.remove_listener(listener);
        }
    }
}

fn discard_on_start(bus: &EventBus, states: Cache) -> ListenerId {
    bus.listen(EVENT_HUB_START, move |_| {
        if states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            tracing::debug!("hub started, restore cache discarded");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use hearth_store::{RetryPolicy, StateRecord, end_run, start_run};
    use serde_json::Map;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory(RetryPolicy::immediate(1)).unwrap();
        let started = Utc::now() - Duration::minutes(10);
        let run = start_run(&db, started).unwrap();

        let state = State::with_timestamps(
            "input_boolean.b1",
            "on",
            Map::new(),
            started + Duration::minutes(1),
            started + Duration::minutes(1),
        )
        .unwrap();
        db.commit("seed", |conn| StateRecord::from_state(&state, None).insert(conn))
            .unwrap();

        end_run(&db, run.run_id, started + Duration::minutes(5)).unwrap();
        db
    }

    #[test]
    fn restores_last_state_while_starting() {
        let db = seeded_db();
        let hub = Hub::new();
        hub.begin_startup();

        let cache = RestoreCache::load(&hub, &db);
        assert!(cache.is_loaded());
        let state = cache.get_last_state("input_boolean.b1").unwrap();
        assert_eq!(state.state, "on");
        assert!(cache.get_last_state("input_boolean.b2").is_none());
    }

    #[test]
    fn cache_is_cleared_when_hub_starts() {
        let db = seeded_db();
        let hub = Hub::new();
        hub.begin_startup();

        let cache = RestoreCache::load(&hub, &db);
        hub.start();

        assert!(!cache.is_loaded());
        assert!(cache.get_last_state("input_boolean.b1").is_none());
    }

    #[test]
    fn does_not_load_when_hub_already_running() {
        let db = seeded_db();
        let hub = Hub::new();
        hub.start();

        let cache = RestoreCache::load(&hub, &db);
        assert!(!cache.is_loaded());
        assert!(cache.get_last_state("input_boolean.b1").is_none());
    }

    #[test]
    fn empty_store_loads_empty_cache() {
        let db = Database::open_in_memory(RetryPolicy::immediate(1)).unwrap();
        let hub = Hub::new();
        hub.begin_startup();

        let cache = RestoreCache::load(&hub, &db);
        assert!(cache.is_loaded());
        assert!(cache.get_last_state("input_boolean.b1").is_none());
    }

    #[test]
    fn dropping_cache_removes_listener() {
        let db = seeded_db();
        let hub = Hub::new();
        hub.begin_startup();

        let cache = RestoreCache::load(&hub, &db);
        assert_eq!(hub.bus.listener_counts().get(EVENT_HUB_START), Some(&1));
        drop(cache);
        assert_eq!(hub.bus.listener_counts().get(EVENT_HUB_START), None);
    }
}

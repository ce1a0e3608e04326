// ABOUTME: End-to-end recorder tests against an on-disk store.
// ABOUTME: Covers round-trip, concurrent ordering, filtering, purge, restart restore, bad schemas.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use hearth_core::{EVENT_STATE_CHANGED, FilterConfig, Hub, MATCH_ALL, State};
use hearth_recorder::{Recorder, RecorderConfig, RecorderError, RestoreCache, Toggle};
use hearth_store::{
    Database, Retention, RetryPolicy, StateQuery, StateRecord, StoreError, get_states, open_runs,
};
use serde_json::{Map, json};
use tempfile::TempDir;

fn config(dir: &TempDir) -> RecorderConfig {
    let mut config = RecorderConfig::new(dir.path().join("hearth.db"));
    config.retry = RetryPolicy::immediate(3);
    config
}

fn attrs(value: serde_json::Value) -> Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn state_change_round_trips_through_store() {
    let dir = TempDir::new().unwrap();
    let hub = Hub::new();
    let recorder = Recorder::start(&hub, config(&dir)).unwrap();

    hub.states
        .set("test.round_trip", "on", attrs(json!({"x": 5})))
        .unwrap();
    recorder.flush().await.unwrap();

    let rows = get_states(recorder.database(), &StateQuery::entity("test.round_trip"));
    assert_eq!(rows.len(), 1);
    let state = rows[0].to_native().unwrap();
    assert_eq!(state.entity_id, "test.round_trip");
    assert_eq!(state.state, "on");
    assert_eq!(state.attributes, attrs(json!({"x": 5})));
    assert!(state.last_changed <= state.last_updated);

    recorder.shutdown().await.unwrap();
}

#[tokio::test]
async fn changes_to_one_entity_persist_in_order() {
    let dir = TempDir::new().unwrap();
    let hub = Hub::new();
    let recorder = Recorder::start(&hub, config(&dir)).unwrap();

    for i in 0..40 {
        hub.states
            .set("sensor.counter", &i.to_string(), Map::new())
            .unwrap();
    }
    recorder.flush().await.unwrap();

    let values: Vec<String> = get_states(recorder.database(), &StateQuery::entity("sensor.counter"))
        .into_iter()
        .map(|row| row.state)
        .collect();
    let expected: Vec<String> = (0..40).map(|i| i.to_string()).collect();
    assert_eq!(values, expected);

    recorder.shutdown().await.unwrap();
}

#[test]
fn concurrent_writers_keep_per_entity_order() {
    let dir = TempDir::new().unwrap();
    let hub = Hub::new();
    let recorder = Recorder::start(&hub, config(&dir)).unwrap();

    // Order in which writes to the shared entity were applied.
    let applied = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&applied);
    hub.bus.listen(EVENT_STATE_CHANGED, move |event| {
        if let Some(change) = event.as_state_changed()
            && change.entity_id == "sensor.shared"
            && let Some(state) = &change.new_state
        {
            sink.lock().unwrap().push(state.state.clone());
        }
    });

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let hub = hub.clone();
            std::thread::spawn(move || {
                let own = format!("sensor.writer_{w}");
                for i in 0..30 {
                    hub.states.set(&own, &i.to_string(), Map::new()).unwrap();
                    hub.states
                        .set("sensor.shared", &format!("{w}-{i}"), Map::new())
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    recorder.block_till_done();

    let db = recorder.database();
    let values = |entity_id: &str| -> Vec<String> {
        get_states(db, &StateQuery::entity(entity_id))
            .into_iter()
            .map(|row| row.state)
            .collect()
    };
    let expected: Vec<String> = (0..30).map(|i| i.to_string()).collect();
    for w in 0..4 {
        assert_eq!(values(&format!("sensor.writer_{w}")), expected);
    }
    let shared = values("sensor.shared");
    assert_eq!(shared.len(), 120);
    assert_eq!(shared, *applied.lock().unwrap());
}

#[tokio::test]
async fn oversized_retention_does_not_stop_the_worker() {
    let dir = TempDir::new().unwrap();
    let hub = Hub::new();
    let mut config = config(&dir);
    config.retention = Retention::Days(1_000_000_000);
    let recorder = Recorder::start(&hub, config).unwrap();

    hub.states.set("light.before", "on", Map::new()).unwrap();
    assert_eq!(recorder.purge_now().await.unwrap(), None);
    hub.states.set("light.after", "on", Map::new()).unwrap();
    recorder.flush().await.unwrap();

    let db = recorder.database();
    assert_eq!(get_states(db, &StateQuery::entity("light.before")).len(), 1);
    assert_eq!(get_states(db, &StateQuery::entity("light.after")).len(), 1);

    recorder.shutdown().await.unwrap();
}

#[tokio::test]
async fn include_entity_overrides_excluded_domain() {
    let dir = TempDir::new().unwrap();
    let hub = Hub::new();
    let mut config = config(&dir);
    config.filter = FilterConfig {
        include_entities: ["switch.kept".to_string()].into(),
        exclude_domains: ["switch".to_string()].into(),
        ..Default::default()
    };
    let recorder = Recorder::start(&hub, config).unwrap();

    hub.states.set("switch.kept", "on", Map::new()).unwrap();
    hub.states.set("switch.dropped", "on", Map::new()).unwrap();
    recorder.flush().await.unwrap();

    let db = recorder.database();
    assert_eq!(get_states(db, &StateQuery::entity("switch.kept")).len(), 1);
    assert!(get_states(db, &StateQuery::entity("switch.dropped")).is_empty());

    recorder.shutdown().await.unwrap();
}

#[tokio::test]
async fn removal_is_recorded_as_empty_state() {
    let dir = TempDir::new().unwrap();
    let hub = Hub::new();
    let recorder = Recorder::start(&hub, config(&dir)).unwrap();

    hub.states.set("light.attic", "on", Map::new()).unwrap();
    assert!(hub.states.remove("light.attic"));
    recorder.flush().await.unwrap();

    let values: Vec<String> = get_states(recorder.database(), &StateQuery::entity("light.attic"))
        .into_iter()
        .map(|row| row.state)
        .collect();
    assert_eq!(values, vec!["on".to_string(), String::new()]);

    recorder.shutdown().await.unwrap();
}

#[tokio::test]
async fn purge_deletes_rows_outside_retention() {
    let dir = TempDir::new().unwrap();
    {
        let db = Database::open(&dir.path().join("hearth.db"), RetryPolicy::immediate(1)).unwrap();
        let now = Utc::now();
        for (i, age_days) in [10, 8, 6, 1, 0].into_iter().enumerate() {
            let at = now - Duration::days(age_days);
            let state =
                State::with_timestamps(&format!("sensor.s{i}"), "1", Map::new(), at, at).unwrap();
            db.commit("seed", |conn| StateRecord::from_state(&state, None).insert(conn))
                .unwrap();
        }
    }

    let hub = Hub::new();
    let mut config = config(&dir);
    config.retention = Retention::Days(4);
    let recorder = Recorder::start(&hub, config).unwrap();

    // Nothing is purged at startup.
    recorder.flush().await.unwrap();
    assert_eq!(get_states(recorder.database(), &StateQuery::default()).len(), 5);

    let summary = recorder.purge_now().await.unwrap().unwrap();
    assert_eq!(summary.states_deleted, 3);
    let left: Vec<String> = get_states(recorder.database(), &StateQuery::default())
        .into_iter()
        .map(|row| row.entity_id)
        .collect();
    assert_eq!(left, vec!["sensor.s3".to_string(), "sensor.s4".to_string()]);

    recorder.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_restores_last_state_during_startup() {
    let dir = TempDir::new().unwrap();

    // First session: record `a.b` as on, then stop cleanly.
    {
        let hub = Hub::new();
        hub.begin_startup();
        let recorder = Recorder::start(&hub, config(&dir)).unwrap();
        hub.start();
        hub.states.set("a.b", "on", Map::new()).unwrap();
        hub.stop();
        recorder.shutdown().await.unwrap();
    }

    // Second session: `a.b` has no configured initial value.
    let hub = Hub::new();
    hub.begin_startup();
    let recorder = Recorder::start(&hub, config(&dir)).unwrap();
    let cache = RestoreCache::load(&hub, recorder.database());
    let toggle = Toggle::setup(&hub, "a.b", None, Some(&cache)).unwrap();
    assert!(toggle.is_on());
    assert_eq!(hub.states.get("a.b").unwrap().state, "on");

    hub.start();
    assert!(!cache.is_loaded());
    assert!(cache.get_last_state("a.b").is_none());

    recorder.shutdown().await.unwrap();
}

#[tokio::test]
async fn restore_skips_data_from_crashed_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hearth.db");

    {
        let hub = Hub::new();
        let recorder = Recorder::start(&hub, config(&dir)).unwrap();
        hub.states.set("a.b", "on", Map::new()).unwrap();
        recorder.flush().await.unwrap();
        // Simulate a crash: the worker keeps its run open and is never joined.
        std::mem::forget(recorder);
    }

    let db = Database::open(&path, RetryPolicy::immediate(1)).unwrap();
    assert_eq!(open_runs(&db).len(), 1);

    let hub = Hub::new();
    hub.begin_startup();
    let cache = RestoreCache::load(&hub, &db);
    assert!(cache.is_loaded());
    assert!(cache.get_last_state("a.b").is_none());
}

#[test]
fn block_till_done_works_without_runtime() {
    let dir = TempDir::new().unwrap();
    let hub = Hub::new();
    let recorder = Recorder::start(&hub, config(&dir)).unwrap();

    hub.states.set("light.porch", "off", Map::new()).unwrap();
    recorder.block_till_done();

    assert_eq!(
        get_states(recorder.database(), &StateQuery::entity("light.porch")).len(),
        1
    );
}

#[tokio::test]
async fn newer_schema_is_fatal_to_startup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hearth.db");
    {
        let db = Database::open(&path, RetryPolicy::immediate(1)).unwrap();
        db.commit("stamp future version", |conn| {
            conn.execute(
                "INSERT INTO schema_changes (schema_version, changed) VALUES (99, ?1)",
                [hearth_store::models::fmt_ts(&Utc::now())],
            )?;
            Ok(())
        })
        .unwrap();
    }

    let hub = Hub::new();
    let err = Recorder::start(&hub, config(&dir)).err().unwrap();
    assert!(matches!(
        err,
        RecorderError::Store(StoreError::SchemaTooNew { .. })
    ));
    assert!(hub.bus.listener_counts().get(MATCH_ALL).is_none());

    let db = Database::open(&path, RetryPolicy::immediate(1)).unwrap();
    assert!(open_runs(&db).is_empty());
}

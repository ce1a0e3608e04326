// ABOUTME: Hub assembly: wires the recorder, restore cache, and configured toggles onto a Hub.
// ABOUTME: The binary drives one Session from startup until a shutdown signal arrives.

use std::collections::BTreeMap;

use anyhow::Context;
use hearth_core::Hub;
use hearth_recorder::{HubConfig, Recorder, RecorderHandle, RestoreCache, Toggle};

/// A running hub with its recorder attached.
pub struct Session {
    hub: Hub,
    recorder: RecorderHandle,
    toggles: BTreeMap<String, Toggle>,
}

impl Session {
    /// Run startup: recorder first, then restorable entities, then `hub_start`.
    pub fn start(config: &HubConfig) -> anyhow::Result<Self> {
        let hub = Hub::new();
        hub.begin_startup();

        let recorder = Recorder::start(&hub, config.recorder.clone())
            .context("failed to start recorder")?;

        let toggles = {
            let cache = RestoreCache::load(&hub, recorder.database());
            let mut toggles = BTreeMap::new();
            for (object_id, toggle) in &config.toggles {
                let entity_id = format!("toggle.{object_id}");
                let toggle = Toggle::setup(&hub, &entity_id, toggle.initial, Some(&cache))
                    .with_context(|| format!("failed to set up {entity_id}"))?;
                toggles.insert(entity_id, toggle);
            }
            toggles
        };

        hub.start();
        tracing::info!(
            run_id = recorder.run().run_id,
            entities = hub.states.entity_ids().len(),
            "hub running"
        );

        Ok(Self {
            hub,
            recorder,
            toggles,
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn recorder(&self) -> &RecorderHandle {
        &self.recorder
    }

    pub fn toggle(&self, entity_id: &str) -> Option<&Toggle> {
        self.toggles.get(entity_id)
    }

    /// Fire `hub_stop` and wait for the recorder to close its run.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.hub.stop();
        self.recorder
            .shutdown()
            .await
            .context("recorder did not shut down cleanly")?;
        Ok(())
    }
}

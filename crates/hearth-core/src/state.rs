// ABOUTME: The in-memory State object the hub tracks for every entity.
// ABOUTME: Carries value, attributes, and the last-changed/last-updated timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityIdError, split_entity_id};

/// The current state of one entity. `last_changed` moves only when the value
/// changes; `last_updated` moves on every write, so `last_changed <= last_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub entity_id: String,
    pub state: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl State {
    /// Build a fresh state stamped with the current time.
    pub fn new(
        entity_id: impl Into<String>,
        state: impl Into<String>,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, EntityIdError> {
        let now = Utc::now();
        Self::with_timestamps(entity_id, state, attributes, now, now)
    }

    /// Build a state with explicit timestamps. `last_changed` is clamped so it
    /// never lies after `last_updated`.
    pub fn with_timestamps(
        entity_id: impl Into<String>,
        state: impl Into<String>,
        attributes: serde_json::Map<String, serde_json::Value>,
        last_changed: DateTime<Utc>,
        last_updated: DateTime<Utc>,
    ) -> Result<Self, EntityIdError> {
        let entity_id = entity_id.into();
        split_entity_id(&entity_id)?;
        Ok(Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: last_changed.min(last_updated),
            last_updated,
        })
    }

    /// The domain prefix of the entity id.
    pub fn domain(&self) -> &str {
        // The id was validated at construction.
        self.entity_id
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or(&self.entity_id)
    }

    pub fn object_id(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map(|(_, object_id)| object_id)
            .unwrap_or_default()
    }
}

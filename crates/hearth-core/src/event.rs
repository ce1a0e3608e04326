// ABOUTME: Defines the bus event envelope and its two payload shapes.
// ABOUTME: Generic events carry opaque JSON; state-changed events carry old and new State.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::state::State;

pub const EVENT_STATE_CHANGED: &str = "state_changed";
pub const EVENT_HUB_START: &str = "hub_start";
pub const EVENT_HUB_STOP: &str = "hub_stop";

/// Where an event was fired from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventOrigin {
    Local,
    Remote,
}

impl EventOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOrigin::Local => "LOCAL",
            EventOrigin::Remote => "REMOTE",
        }
    }
}

impl fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(EventOrigin::Local),
            "REMOTE" => Ok(EventOrigin::Remote),
            other => Err(format!("unknown event origin: {other}")),
        }
    }
}

/// Payload of a `state_changed` event. `new_state` is `None` when the entity
/// was removed; `old_state` is `None` the first time an entity is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedData {
    pub entity_id: String,
    pub old_state: Option<State>,
    pub new_state: Option<State>,
}

/// The two payload shapes the bus carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    StateChanged(StateChangedData),
    Generic(serde_json::Value),
}

/// A single event as delivered on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub context_id: Ulid,
    pub event_type: String,
    pub data: EventData,
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
}

impl Event {
    /// Build a locally-originated generic event fired now.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            context_id: Ulid::new(),
            event_type: event_type.into(),
            data: EventData::Generic(data),
            origin: EventOrigin::Local,
            time_fired: Utc::now(),
        }
    }

    /// Build a `state_changed` event for the given transition.
    pub fn state_changed(data: StateChangedData) -> Self {
        let time_fired = data
            .new_state
            .as_ref()
            .map(|s| s.last_updated)
            .unwrap_or_else(Utc::now);
        Self {
            context_id: Ulid::new(),
            event_type: EVENT_STATE_CHANGED.to_string(),
            data: EventData::StateChanged(data),
            origin: EventOrigin::Local,
            time_fired,
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// The entity this event is scoped to, if any. Generic events count as
    /// entity-scoped when their payload has a string `entity_id` field.
    pub fn entity_id(&self) -> Option<&str> {
        match &self.data {
            EventData::StateChanged(change) => Some(change.entity_id.as_str()),
            EventData::Generic(value) => value.get("entity_id").and_then(|v| v.as_str()),
        }
    }

    pub fn as_state_changed(&self) -> Option<&StateChangedData> {
        match &self.data {
            EventData::StateChanged(change) => Some(change),
            EventData::Generic(_) => None,
        }
    }

    /// The payload as a JSON value, the form it is persisted in.
    pub fn data_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match &self.data {
            EventData::Generic(value) => Ok(value.clone()),
            EventData::StateChanged(change) => serde_json::to_value(change),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generic_event_entity_scope_comes_from_payload() {
        let scoped = Event::new("call_service", json!({"entity_id": "light.desk"}));
        assert_eq!(scoped.entity_id(), Some("light.desk"));

        let unscoped = Event::new("call_service", json!({"service": "reload"}));
        assert_eq!(unscoped.entity_id(), None);

        let numeric = Event::new("call_service", json!({"entity_id": 5}));
        assert_eq!(numeric.entity_id(), None);
    }

    #[test]
    fn state_changed_event_is_fired_at_new_state_update() {
        let new_state = State::new("switch.fan", "on", serde_json::Map::new()).unwrap();
        let updated = new_state.last_updated;
        let event = Event::state_changed(StateChangedData {
            entity_id: "switch.fan".to_string(),
            old_state: None,
            new_state: Some(new_state),
        });
        assert_eq!(event.event_type, EVENT_STATE_CHANGED);
        assert_eq!(event.time_fired, updated);
        assert_eq!(event.entity_id(), Some("switch.fan"));
        assert!(event.as_state_changed().is_some());
    }

    #[test]
    fn origin_parses_its_own_rendering() {
        for origin in [EventOrigin::Local, EventOrigin::Remote] {
            assert_eq!(origin.as_str().parse::<EventOrigin>().unwrap(), origin);
        }
        assert!("ELSEWHERE".parse::<EventOrigin>().is_err());
    }

    #[test]
    fn state_changed_payload_persists_as_object() {
        let event = Event::state_changed(StateChangedData {
            entity_id: "switch.fan".to_string(),
            old_state: None,
            new_state: None,
        });
        let value = event.data_json().unwrap();
        assert_eq!(value["entity_id"], "switch.fan");
        assert!(value["new_state"].is_null());
    }
}

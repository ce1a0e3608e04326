// ABOUTME: A simple on/off entity whose initial value can come from the restore cache.
// ABOUTME: Used to exercise restore-on-startup end to end.

use hearth_core::{EntityIdError, Hub, State};
use serde_json::Map;

use crate::restore::RestoreCache;

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";

pub struct Toggle {
    hub: Hub,
    entity_id: String,
}

impl Toggle {
    /// Register the entity and write its initial state.
    ///
    /// An explicit `initial` wins; otherwise the value restored from the
    /// previous run is used, and with neither the toggle starts off.
    pub fn setup(
        hub: &Hub,
        entity_id: &str,
        initial: Option<bool>,
        restore: Option<&RestoreCache>,
    ) -> Result<Self, EntityIdError> {
        let restored = || {
            restore
                .and_then(|cache| cache.get_last_state(entity_id))
                .map(|state| state.state == STATE_ON)
        };
        let is_on = initial.or_else(restored).unwrap_or(false);

        let toggle = Self {
            hub: hub.clone(),
            entity_id: entity_id.to_lowercase(),
        };
        toggle.write(is_on)?;
        tracing::debug!(entity_id = %toggle.entity_id, is_on, "toggle set up");
        Ok(toggle)
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn is_on(&self) -> bool {
        self.hub
            .states
            .get(&self.entity_id)
            .is_some_and(|state| state.state == STATE_ON)
    }

    pub fn turn_on(&self) -> Result<State, EntityIdError> {
        self.write(true)
    }

    pub fn turn_off(&self) -> Result<State, EntityIdError> {
        self.write(false)
    }

    fn write(&self, on: bool) -> Result<State, EntityIdError> {
        let value = if on { STATE_ON } else { STATE_OFF };
        self.hub.states.set(&self.entity_id, value, Map::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_off_without_restore() {
        let hub = Hub::new();
        let toggle = Toggle::setup(&hub, "toggle.porch", None, None).unwrap();
        assert!(!toggle.is_on());
        assert_eq!(hub.states.get("toggle.porch").unwrap().state, STATE_OFF);
    }

    #[test]
    fn explicit_initial_wins() {
        let hub = Hub::new();
        let toggle = Toggle::setup(&hub, "toggle.porch", Some(true), None).unwrap();
        assert!(toggle.is_on());
    }

    #[test]
    fn turn_on_and_off() {
        let hub = Hub::new();
        let toggle = Toggle::setup(&hub, "toggle.porch", None, None).unwrap();
        toggle.turn_on().unwrap();
        assert!(toggle.is_on());
        toggle.turn_off().unwrap();
        assert!(!toggle.is_on());
    }

    #[test]
    fn rejects_invalid_entity_id() {
        let hub = Hub::new();
        assert!(Toggle::setup(&hub, "no_domain", None, None).is_err());
    }
}

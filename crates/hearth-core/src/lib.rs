// ABOUTME: Core library for hearth, containing the hub's domain types and event bus.
// ABOUTME: Defines entity ids, states, bus events, hub lifecycle, and the recording filter.

pub mod bus;
pub mod entity;
pub mod event;
pub mod filter;
pub mod hub;
pub mod state;

pub use bus::{EventBus, ListenerId, MATCH_ALL};
pub use entity::{EntityIdError, split_entity_id, valid_entity_id};
pub use event::{
    EVENT_HUB_START, EVENT_HUB_STOP, EVENT_STATE_CHANGED, Event, EventData, EventOrigin,
    StateChangedData,
};
pub use filter::{EntityFilter, FilterConfig};
pub use hub::{CoreState, Hub, StateMachine};
pub use state::State;

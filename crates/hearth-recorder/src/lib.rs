// ABOUTME: Recorder service for hearth: ingests bus events into the store on a worker thread.
// ABOUTME: Also provides configuration loading, startup state restore, and restorable toggles.

pub mod config;
pub mod recorder;
pub mod restore;
pub mod toggle;

pub use config::{ConfigError, HubConfig, RecorderConfig, ToggleConfig};
pub use recorder::{Recorder, RecorderError, RecorderHandle};
pub use restore::RestoreCache;
pub use toggle::{STATE_OFF, STATE_ON, Toggle};

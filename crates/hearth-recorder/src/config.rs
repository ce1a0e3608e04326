// ABOUTME: Configuration loading and validation for the hub and its recorder.
// ABOUTME: Reads a YAML file located via environment variables, then applies env overrides.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hearth_core::{FilterConfig, valid_entity_id};
use hearth_store::{Retention, RetryPolicy};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Longest accepted retention window, in days.
pub const MAX_PURGE_KEEP_DAYS: u32 = 36_500;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("recorder.purge_interval_days must be at least 1")]
    InvalidPurgeInterval,

    #[error("recorder.purge_keep_days must be between 1 and 36500, got {0}")]
    InvalidPurgeKeepDays(u32),

    #[error("HEARTH_PURGE_KEEP_DAYS must be 1 to 36500 or 'off', got {0:?}")]
    InvalidPurgeOverride(String),

    #[error("recorder.commit_retries must be at least 1")]
    InvalidRetries,

    #[error("{field} contains an invalid entity id: {entity_id}")]
    InvalidEntityId { field: &'static str, entity_id: String },

    #[error("toggle object id {0:?} is not a valid slug")]
    InvalidToggle(String),
}

/// Accept either a single string or a list of strings, as hand-written
/// configs use both forms.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInclude {
    #[serde(default, deserialize_with = "one_or_many")]
    domains: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    entities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExclude {
    #[serde(default, deserialize_with = "one_or_many")]
    domains: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    entities: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    event_types: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecorder {
    db_path: Option<PathBuf>,
    purge_keep_days: Option<u32>,
    purge_interval_days: Option<u32>,
    commit_retries: Option<u32>,
    retry_wait_ms: Option<u64>,
    #[serde(default)]
    include: RawInclude,
    #[serde(default)]
    exclude: RawExclude,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleConfig {
    pub initial: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHubConfig {
    #[serde(default)]
    recorder: RawRecorder,
    #[serde(default)]
    toggle: BTreeMap<String, Option<ToggleConfig>>,
}

/// Recorder settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub db_path: PathBuf,
    pub retention: Retention,
    pub purge_interval: Duration,
    pub retry: RetryPolicy,
    pub filter: FilterConfig,
}

impl RecorderConfig {
    /// Defaults: no purge, daily purge interval once enabled, three attempts per unit of work.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            retention: Retention::Disabled,
            purge_interval: Duration::from_secs(24 * 60 * 60),
            retry: RetryPolicy::default(),
            filter: FilterConfig::default(),
        }
    }
}

/// Whole-hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub home: PathBuf,
    pub recorder: RecorderConfig,
    /// Toggle entities keyed by object id.
    pub toggles: BTreeMap<String, ToggleConfig>,
}

fn to_set(items: Vec<String>) -> HashSet<String> {
    items.into_iter().map(|s| s.to_lowercase()).collect()
}

fn check_entities(field: &'static str, ids: &HashSet<String>) -> Result<(), ConfigError> {
    match ids.iter().find(|id| !valid_entity_id(id)) {
        Some(bad) => Err(ConfigError::InvalidEntityId {
            field,
            entity_id: bad.clone(),
        }),
        None => Ok(()),
    }
}

fn parse_purge_override(raw: &str) -> Result<Retention, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("off") {
        return Ok(Retention::Disabled);
    }
    match trimmed.parse::<u32>() {
        Ok(days) if (1..=MAX_PURGE_KEEP_DAYS).contains(&days) => Ok(Retention::Days(days)),
        _ => Err(ConfigError::InvalidPurgeOverride(raw.to_string())),
    }
}

impl HubConfig {
    /// Load configuration from the environment.
    ///
    /// Environment variables:
    /// - HEARTH_HOME: data directory (default: ~/.hearth)
    /// - HEARTH_CONFIG: YAML config file (default: $HEARTH_HOME/configuration.yaml)
    /// - HEARTH_PURGE_KEEP_DAYS: overrides recorder.purge_keep_days; `off` disables purge
    pub fn load() -> Result<Self, ConfigError> {
        let home = std::env::var("HEARTH_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".hearth")
            });

        let config_path = std::env::var("HEARTH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("configuration.yaml"));

        let mut config = Self::from_file(&home, &config_path)?;

        if let Ok(raw) = std::env::var("HEARTH_PURGE_KEEP_DAYS") {
            config.recorder.retention = parse_purge_override(&raw)?;
        }

        Ok(config)
    }

    /// Load from a YAML file. A missing file yields the defaults.
    pub fn from_file(home: &Path, path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Self::from_yaml_str(home, "");
        }
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(home, &yaml)
    }

    /// Parse and validate YAML text. Relative paths resolve against `home`.
    pub fn from_yaml_str(home: &Path, yaml: &str) -> Result<Self, ConfigError> {
        let raw: RawHubConfig = if yaml.trim().is_empty() {
            RawHubConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        let rec = raw.recorder;

        let db_path = match rec.db_path {
            Some(path) if path.is_absolute() => path,
            Some(path) => home.join(path),
            None => home.join("hearth.db"),
        };

        let retention = match rec.purge_keep_days {
            Some(days) if !(1..=MAX_PURGE_KEEP_DAYS).contains(&days) => {
                return Err(ConfigError::InvalidPurgeKeepDays(days));
            }
            days => Retention::from_days(days),
        };

        let interval_days = rec.purge_interval_days.unwrap_or(1);
        if interval_days == 0 {
            return Err(ConfigError::InvalidPurgeInterval);
        }

        let max_attempts = rec.commit_retries.unwrap_or(3);
        if max_attempts == 0 {
            return Err(ConfigError::InvalidRetries);
        }
        let retry = RetryPolicy {
            max_attempts,
            wait: Duration::from_millis(rec.retry_wait_ms.unwrap_or(100)),
        };

        let filter = FilterConfig {
            include_domains: to_set(rec.include.domains),
            include_entities: to_set(rec.include.entities),
            exclude_domains: to_set(rec.exclude.domains),
            exclude_entities: to_set(rec.exclude.entities),
            exclude_event_types: rec.exclude.event_types.into_iter().collect(),
        };
        check_entities("recorder.include.entities", &filter.include_entities)?;
        check_entities("recorder.exclude.entities", &filter.exclude_entities)?;

        let mut toggles = BTreeMap::new();
        for (object_id, toggle) in raw.toggle {
            if !valid_entity_id(&format!("toggle.{object_id}")) {
                return Err(ConfigError::InvalidToggle(object_id));
            }
            toggles.insert(object_id, toggle.unwrap_or_default());
        }

        Ok(Self {
            home: home.to_path_buf(),
            recorder: RecorderConfig {
                db_path,
                retention,
                purge_interval: Duration::from_secs(u64::from(interval_days) * 24 * 60 * 60),
                retry,
                filter,
            },
            toggles,
        })
    }
}

// ABOUTME: Base table layout and the versioned migration engine for the recorder store.
// ABOUTME: Migrations run one version at a time, each in its own transaction.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::database::Database;
use crate::error::StoreError;
use crate::models::fmt_ts;

/// The schema version this build of the recorder writes.
pub const SCHEMA_VERSION: i64 = 3;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// Tables as they existed before any versioned migration (version 0).
pub const BASE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_type TEXT NOT NULL,
    event_data TEXT NOT NULL,
    origin TEXT NOT NULL,
    time_fired TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS states (
    state_id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    state TEXT NOT NULL,
    attributes TEXT NOT NULL,
    event_id INTEGER,
    last_changed TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recorder_runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    started TEXT NOT NULL,
    ended TEXT,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_changes (
    change_id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema_version INTEGER NOT NULL,
    changed TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_events_event_type ON events (event_type);
CREATE INDEX IF NOT EXISTS ix_states_entity_id ON states (entity_id);
"#;

/// One versioned schema change.
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "index events by fired time",
        sql: "CREATE INDEX IF NOT EXISTS ix_events_time_fired ON events (time_fired);",
    },
    Migration {
        version: 2,
        description: "index states by last update",
        sql: "CREATE INDEX IF NOT EXISTS ix_states_last_updated ON states (last_updated);
              CREATE INDEX IF NOT EXISTS ix_states_entity_id_last_updated
                  ON states (entity_id, last_updated);",
    },
    Migration {
        version: 3,
        description: "record event context ids",
        sql: "ALTER TABLE events ADD COLUMN context_id TEXT;
              CREATE INDEX IF NOT EXISTS ix_events_context_id ON events (context_id);",
    },
];

/// Result of a migration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    UpToDate { version: i64 },
    Migrated { from: i64, to: i64 },
}

/// The operations the migrator needs from a store.
pub trait SchemaMigration {
    /// The recorded schema version, or `None` if no marker exists yet.
    fn schema_version(&mut self) -> Result<Option<i64>, StoreError>;

    /// Work out the version of an unmarked store from its table shape.
    fn inspect_schema_version(&mut self) -> Result<i64, StoreError>;

    /// Apply the update that brings the store to `new_version` and record it.
    fn apply_update(&mut self, new_version: i64) -> Result<(), StoreError>;

    /// Record `version` as current without changing the schema.
    fn stamp_version(&mut self, version: i64) -> Result<(), StoreError>;
}

/// Bring the store up to `target`, one version at a time.
///
/// A store already at `target` is left untouched: no inspection and no
/// updates. A failed step stops the pass and reports the version it was
/// trying to reach; versions applied before it stay applied.
pub fn migrate_schema<M>(store: &mut M, target: i64) -> Result<MigrationOutcome, StoreError>
where
    M: SchemaMigration + ?Sized,
{
    let current = match store.schema_version()? {
        Some(version) if version == target => {
            tracing::debug!(version, "schema is up to date");
            return Ok(MigrationOutcome::UpToDate { version });
        }
        Some(version) => version,
        None => {
            let inspected = store.inspect_schema_version()?;
            if inspected == target {
                tracing::info!(version = target, "unmarked store already has the current schema");
                store.stamp_version(target)?;
                return Ok(MigrationOutcome::UpToDate { version: target });
            }
            inspected
        }
    };

    if current > target {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported: target,
        });
    }

    tracing::warn!(from = current, to = target, "database requires upgrade, do not stop the hub");
    for version in (current + 1)..=target {
        store
            .apply_update(version)
            .map_err(|e| StoreError::Migration {
                version,
                source: Box::new(e),
            })?;
        tracing::info!(version, "schema upgraded");
    }

    Ok(MigrationOutcome::Migrated {
        from: current,
        to: target,
    })
}

/// [`SchemaMigration`] over a real SQLite [`Database`].
pub struct SqliteSchema<'a> {
    db: &'a Database,
}

impl<'a> SqliteSchema<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Run the migrator against this store up to [`SCHEMA_VERSION`].
    pub fn migrate(&mut self) -> Result<MigrationOutcome, StoreError> {
        migrate_schema(self, SCHEMA_VERSION)
    }
}

fn record_version(conn: &Connection, version: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO schema_changes (schema_version, changed) VALUES (?1, ?2)",
        params![version, fmt_ts(&Utc::now())],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn has_index(conn: &Connection, index: &str) -> Result<bool, StoreError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?1",
            params![index],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl SchemaMigration for SqliteSchema<'_> {
    fn schema_version(&mut self) -> Result<Option<i64>, StoreError> {
        self.db.transaction(|conn| {
            Ok(conn
                .query_row(
                    "SELECT schema_version FROM schema_changes ORDER BY change_id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    fn inspect_schema_version(&mut self) -> Result<i64, StoreError> {
        self.db.transaction(|conn| {
            let current = has_column(conn, "events", "context_id")?
                && has_index(conn, "ix_events_time_fired")?
                && has_index(conn, "ix_states_last_updated")?;
            if current {
                Ok(SCHEMA_VERSION)
            } else {
                tracing::warn!("store has no schema version marker, assuming version 0");
                Ok(0)
            }
        })
    }

    fn apply_update(&mut self, new_version: i64) -> Result<(), StoreError> {
        if new_version <= 0 {
            return Err(StoreError::InvalidSchemaVersion(new_version));
        }
        let migration = MIGRATIONS
            .iter()
            .find(|m| m.version == new_version)
            .ok_or(StoreError::InvalidSchemaVersion(new_version))?;

        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applying schema update"
        );
        self.db.transaction(|conn| {
            conn.execute_batch(migration.sql)?;
            record_version(conn, migration.version)
        })
    }

    fn stamp_version(&mut self, version: i64) -> Result<(), StoreError> {
        self.db.transaction(|conn| record_version(conn, version))
    }
}

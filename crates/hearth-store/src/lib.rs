// ABOUTME: Persistence layer for hearth, recording bus events and entity states in SQLite.
// ABOUTME: Provides schema migration, retrying transactions, queries, purge, and run tracking.

pub mod database;
pub mod error;
pub mod models;
pub mod purge;
pub mod queries;
pub mod runs;
pub mod schema;

pub use database::{Database, RetryPolicy};
pub use error::StoreError;
pub use models::{EventRecord, RecorderRun, StateRecord};
pub use purge::{PurgeSummary, Retention, purge_old_data};
pub use queries::{EventQuery, StateQuery, get_events, get_states, get_states_at};
pub use runs::{current_run, end_run, last_recorder_run, open_runs, start_run};
pub use schema::{
    MigrationOutcome, SCHEMA_VERSION, SchemaMigration, SqliteSchema, migrate_schema,
};

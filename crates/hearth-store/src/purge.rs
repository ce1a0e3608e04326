// ABOUTME: Retention enforcement: deletes states and events older than the keep window.
// ABOUTME: Each table is purged in its own unit of work, purely by timestamp threshold.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::StoreError;
use crate::models::fmt_ts;

/// How long recorded rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    #[default]
    Disabled,
    Days(u32),
}

impl Retention {
    pub fn from_days(days: Option<u32>) -> Self {
        days.map_or(Retention::Disabled, Retention::Days)
    }

    /// Rows last written before this instant are due for deletion. `None`
    /// when disabled, or when the window reaches past the earliest
    /// representable time so that no row can be old enough.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Retention::Disabled => None,
            Retention::Days(days) => Duration::try_days(i64::from(*days))
                .and_then(|window| now.checked_sub_signed(window)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    pub cutoff: DateTime<Utc>,
    pub states_deleted: usize,
    pub events_deleted: usize,
}

/// Delete rows older than the retention window. Returns `Ok(None)` without
/// opening a transaction when retention is disabled or no row can be old
/// enough to delete.
pub fn purge_old_data(
    db: &Database,
    retention: Retention,
) -> Result<Option<PurgeSummary>, StoreError> {
    let Some(cutoff) = retention.cutoff(Utc::now()) else {
        if retention == Retention::Disabled {
            tracing::debug!("purge disabled, keeping all rows");
        } else {
            tracing::warn!(?retention, "retention window exceeds the calendar, nothing to purge");
        }
        return Ok(None);
    };
    purge_before(db, cutoff).map(Some)
}

/// Delete states last updated, and events fired, before `cutoff`. Both tables
/// are attempted even if the first fails; the first error is returned.
pub fn purge_before(db: &Database, cutoff: DateTime<Utc>) -> Result<PurgeSummary, StoreError> {
    let threshold = fmt_ts(&cutoff);

    let states = db.commit("purge states", |conn| {
        Ok(conn.execute(
            "DELETE FROM states WHERE last_updated < ?1",
            params![threshold],
        )?)
    });
    let events = db.commit("purge events", |conn| {
        Ok(conn.execute(
            "DELETE FROM events WHERE time_fired < ?1",
            params![threshold],
        )?)
    });

    let summary = PurgeSummary {
        cutoff,
        states_deleted: states?,
        events_deleted: events?,
    };
    tracing::info!(
        cutoff = %threshold,
        states = summary.states_deleted,
        events = summary.events_deleted,
        "purged old data"
    );
    Ok(summary)
}

// ABOUTME: Recorder run tracking: one row per operating session of the recorder.
// ABOUTME: A run opens when the worker starts and closes on clean shutdown only.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::StoreError;
use crate::models::{RUN_COLUMNS, RecorderRun, fmt_ts};

/// Open a new run starting at `at`. Runs left open by a crash are not touched.
pub fn start_run(db: &Database, at: DateTime<Utc>) -> Result<RecorderRun, StoreError> {
    let created = Utc::now();
    let run_id = db.commit("start recorder run", |conn| {
        conn.execute(
            "INSERT INTO recorder_runs (started, ended, created) VALUES (?1, NULL, ?2)",
            params![fmt_ts(&at), fmt_ts(&created)],
        )?;
        Ok(conn.last_insert_rowid())
    })?;

    tracing::info!(run_id, "recorder run started");
    Ok(RecorderRun {
        run_id,
        started: at,
        ended: None,
        created,
    })
}

/// Close an open run at `at`. The end is never recorded before the start.
pub fn end_run(db: &Database, run_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
    let updated = db.commit("end recorder run", |conn| {
        Ok(conn.execute(
            "UPDATE recorder_runs SET ended = MAX(started, ?2)
             WHERE run_id = ?1 AND ended IS NULL",
            params![run_id, fmt_ts(&at)],
        )?)
    })?;

    if updated == 0 {
        return Err(StoreError::RunNotOpen(run_id));
    }
    tracing::info!(run_id, "recorder run ended");
    Ok(())
}

fn runs_where(db: &Database, operation: &str, clause: &str) -> Vec<RecorderRun> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM recorder_runs {clause}");
    db.query(operation, |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], RecorderRun::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

/// The most recently closed run, if any run was ever closed cleanly.
pub fn last_recorder_run(db: &Database) -> Option<RecorderRun> {
    runs_where(
        db,
        "last recorder run",
        "WHERE ended IS NOT NULL ORDER BY ended DESC, run_id DESC LIMIT 1",
    )
    .into_iter()
    .next()
}

/// The newest open run: the one belonging to the running recorder.
pub fn current_run(db: &Database) -> Option<RecorderRun> {
    runs_where(
        db,
        "current recorder run",
        "WHERE ended IS NULL ORDER BY started DESC, run_id DESC LIMIT 1",
    )
    .into_iter()
    .next()
}

/// Every run that was never closed, oldest first.
pub fn open_runs(db: &Database) -> Vec<RecorderRun> {
    runs_where(
        db,
        "open recorder runs",
        "WHERE ended IS NULL ORDER BY started ASC, run_id ASC",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::RetryPolicy;
    use chrono::Duration;

    fn db() -> Database {
        Database::open_in_memory(RetryPolicy::immediate(3)).unwrap()
    }

    #[test]
    fn run_lifecycle() {
        let db = db();
        assert!(last_recorder_run(&db).is_none());

        let t0 = Utc::now();
        let run = start_run(&db, t0).unwrap();
        assert!(run.is_open());
        assert_eq!(current_run(&db).unwrap().run_id, run.run_id);
        assert!(last_recorder_run(&db).is_none());

        end_run(&db, run.run_id, t0 + Duration::minutes(5)).unwrap();
        assert!(current_run(&db).is_none());

        let last = last_recorder_run(&db).unwrap();
        assert_eq!(last.run_id, run.run_id);
        assert_eq!(last.ended, Some(t0 + Duration::minutes(5)));
    }

    #[test]
    fn closing_twice_is_an_error() {
        let db = db();
        let run = start_run(&db, Utc::now()).unwrap();
        end_run(&db, run.run_id, Utc::now()).unwrap();
        assert!(matches!(
            end_run(&db, run.run_id, Utc::now()),
            Err(StoreError::RunNotOpen(id)) if id == run.run_id
        ));
    }

    #[test]
    fn end_is_never_before_start() {
        let db = db();
        let t0 = Utc::now();
        let run = start_run(&db, t0).unwrap();
        end_run(&db, run.run_id, t0 - Duration::hours(1)).unwrap();

        let last = last_recorder_run(&db).unwrap();
        assert!(last.started <= last.ended.unwrap());
    }

    #[test]
    fn crashed_run_stays_open() {
        let db = db();
        let t0 = Utc::now() - Duration::hours(1);
        let crashed = start_run(&db, t0).unwrap();
        let current = start_run(&db, Utc::now()).unwrap();

        let open: Vec<i64> = open_runs(&db).iter().map(|r| r.run_id).collect();
        assert_eq!(open, vec![crashed.run_id, current.run_id]);
        assert_eq!(current_run(&db).unwrap().run_id, current.run_id);
        assert!(last_recorder_run(&db).is_none());
    }
}

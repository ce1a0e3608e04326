// ABOUTME: The Database context object and its retrying transaction executor.
// ABOUTME: Every unit of work runs in a scoped transaction that is released on all exit paths.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::StoreError;
use crate::schema;

/// How many times a unit of work is attempted and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            wait: Duration::ZERO,
        }
    }

    /// Linear backoff: the n-th failed attempt waits n times the base wait.
    fn backoff(&self, failed_attempt: u32) -> Duration {
        self.wait.saturating_mul(failed_attempt)
    }
}

/// Counts held transaction scopes; decremented when the guard drops.
struct SessionGuard {
    open: Arc<AtomicUsize>,
}

impl SessionGuard {
    fn acquire(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            open: Arc::clone(open),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to the recorder's SQLite store. Cloning shares the same connection.
///
/// The connection sits behind a mutex so one unit of work owns it for the
/// whole life of its transaction.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    retry: RetryPolicy,
    open_sessions: Arc<AtomicUsize>,
}

impl Database {
    /// Open or create the database at `path`, applying pragmas and the base tables.
    /// Schema migration is a separate step; see [`crate::schema::migrate_schema`].
    pub fn open(path: &Path, retry: RetryPolicy) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(schema::BASE_TABLES)?;

        tracing::info!(path = %path.display(), "database opened");
        Ok(Self::from_connection(conn, path.to_path_buf(), retry))
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory(retry: RetryPolicy) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::PRAGMAS)?;
        conn.execute_batch(schema::BASE_TABLES)?;
        Ok(Self::from_connection(conn, PathBuf::from(":memory:"), retry))
    }

    fn from_connection(conn: Connection, path: PathBuf, retry: RetryPolicy) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            retry,
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Number of transaction scopes currently held. Zero whenever no unit of
    /// work is running.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Run `work` once inside a transaction. Commits on success; any error,
    /// including one from `work`, rolls back when the transaction drops.
    pub fn transaction<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let _session = SessionGuard::acquire(&self.open_sessions);
        // A panic inside an earlier unit of work leaves nothing half-done: its
        // transaction rolled back on unwind, so the connection is still usable.
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        let value = work(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a write-oriented unit of work with bounded retries.
    ///
    /// Each failure is logged with the operation name. Once the attempts are
    /// used up, or on a failure that is not worth retrying, the last error is
    /// returned to the caller.
    pub fn commit<T, F>(&self, operation: &str, mut work: F) -> Result<T, StoreError>
    where
        F: FnMut(&Connection) -> Result<T, StoreError>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transaction(&mut work) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::error!(
                        operation,
                        attempt,
                        max_attempts,
                        transient = e.is_transient(),
                        error = %e,
                        "error executing unit of work"
                    );
                    if !e.is_retryable() || attempt >= max_attempts {
                        return Err(e);
                    }
                    let wait = self.retry.backoff(attempt);
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Run a read query with the same retry budget. A query that still fails
    /// after the last attempt yields an empty result instead of an error.
    pub fn query<T, F>(&self, operation: &str, work: F) -> Vec<T>
    where
        F: FnMut(&Connection) -> Result<Vec<T>, StoreError>,
    {
        match self.commit(operation, work) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(operation, error = %e, "query failed, returning no rows");
                Vec::new()
            }
        }
    }
}

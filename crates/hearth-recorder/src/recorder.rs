// ABOUTME: The recorder: a bus listener feeding a single worker thread that persists events.
// ABOUTME: The worker also runs scheduled purges and closes the run row on shutdown.

use std::thread::JoinHandle;

use chrono::Utc;
use hearth_core::{EVENT_HUB_STOP, EntityFilter, Event, EventBus, Hub, ListenerId, MATCH_ALL};
use hearth_store::{
    Database, EventRecord, PurgeSummary, RecorderRun, Retention, SqliteSchema, StateRecord,
    StoreError, end_run, purge_old_data, start_run,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::RecorderConfig;

/// Errors surfaced by the recorder's control surface.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder store error: {0}")]
    Store(#[from] StoreError),

    #[error("could not spawn recorder worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("recorder worker has stopped")]
    Stopped,

    #[error("recorder worker panicked")]
    WorkerPanicked,
}

/// Work items consumed by the worker, in arrival order.
enum Task {
    Event(Event),
    Purge(Option<oneshot::Sender<Option<PurgeSummary>>>),
    Flush(oneshot::Sender<()>),
    Shutdown(Option<oneshot::Sender<()>>),
}

pub struct Recorder;

impl Recorder {
    /// Open and migrate the store, open a run, subscribe to the bus, and start
    /// the worker. A migration failure is fatal: nothing is subscribed and no
    /// run is opened.
    ///
    /// Scheduled purges begin one purge interval after start, so startup
    /// restore always sees the store as the previous run left it. They need a
    /// tokio runtime; outside one, purges only run through
    /// [`RecorderHandle::purge_now`].
    pub fn start(hub: &Hub, config: RecorderConfig) -> Result<RecorderHandle, RecorderError> {
        let db = Database::open(&config.db_path, config.retry)?;

        let outcome = SqliteSchema::new(&db).migrate()?;
        tracing::info!(path = %db.path().display(), ?outcome, "recorder store ready");

        let run = start_run(&db, Utc::now())?;
        tracing::info!(run_id = run.run_id, "recorder run opened");

        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            db: db.clone(),
            filter: EntityFilter::new(config.filter),
            retention: config.retention,
            run_id: run.run_id,
            rx,
        };
        let worker = std::thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || worker.run())
            .map_err(RecorderError::Spawn)?;

        let listener_tx = tx.clone();
        let listener = hub.bus.listen(MATCH_ALL, move |event| {
            // Sends only fail once the worker has exited; late events are dropped.
            let _ = listener_tx.send(Task::Event(event.clone()));
        });

        let purge_timer = match (config.retention, tokio::runtime::Handle::try_current()) {
            (Retention::Disabled, _) => None,
            (Retention::Days(_), Ok(runtime)) => {
                let timer_tx = tx.clone();
                let period = config.purge_interval;
                Some(runtime.spawn(async move {
                    // First purge one period after start, never during startup restore.
                    let first = tokio::time::Instant::now() + period;
                    let mut interval = tokio::time::interval_at(first, period);
                    loop {
                        interval.tick().await;
                        if timer_tx.send(Task::Purge(None)).is_err() {
                            break;
                        }
                    }
                }))
            }
            (Retention::Days(_), Err(_)) => {
                tracing::warn!("no async runtime available, scheduled purge is off");
                None
            }
        };

        Ok(RecorderHandle {
            db,
            run,
            tx,
            bus: hub.bus.clone(),
            listener: Some(listener),
            purge_timer,
            worker: Some(worker),
        })
    }
}

/// Control surface of a running recorder. Dropping the handle unsubscribes
/// from the bus; the worker then drains what is queued and closes its run.
pub struct RecorderHandle {
    db: Database,
    run: RecorderRun,
    tx: mpsc::UnboundedSender<Task>,
    bus: EventBus,
    listener: Option<ListenerId>,
    purge_timer: Option<tokio::task::JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RecorderHandle {
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The run opened when this recorder started.
    pub fn run(&self) -> &RecorderRun {
        &self.run
    }

    /// Wait until every event enqueued before this call has been handled.
    /// Returns immediately once the worker has stopped.
    pub async fn flush(&self) -> Result<(), RecorderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Task::Flush(reply_tx)).is_err() {
            return Ok(());
        }
        // A dropped reply means the worker exited after draining.
        let _ = reply_rx.await;
        Ok(())
    }

    /// Blocking form of [`flush`](Self::flush) for synchronous callers.
    /// Must not be called from within an async runtime.
    pub fn block_till_done(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Task::Flush(reply_tx)).is_ok() {
            let _ = reply_rx.blocking_recv();
        }
    }

    /// Queue a purge on the worker and wait for its outcome. `None` means
    /// retention is disabled or the purge failed (the failure is logged).
    pub async fn purge_now(&self) -> Result<Option<PurgeSummary>, RecorderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Task::Purge(Some(reply_tx)))
            .map_err(|_| RecorderError::Stopped)?;
        reply_rx.await.map_err(|_| RecorderError::Stopped)
    }

    /// Unsubscribe, drain the queue, close the run, and join the worker.
    pub async fn shutdown(mut self) -> Result<(), RecorderError> {
        self.detach();

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Task::Shutdown(Some(reply_tx))).is_ok() {
            let _ = reply_rx.await;
        }

        if let Some(worker) = self.worker.take() {
            let joined = tokio::task::spawn_blocking(move || worker.join())
                .await
                .map_err(|_| RecorderError::WorkerPanicked)?;
            joined.map_err(|_| RecorderError::WorkerPanicked)?;
        }
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.bus.remove_listener(listener);
        }
        if let Some(timer) = self.purge_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

struct Worker {
    db: Database,
    filter: EntityFilter,
    retention: Retention,
    run_id: i64,
    rx: mpsc::UnboundedReceiver<Task>,
}

impl Worker {
    fn run(mut self) {
        tracing::debug!(run_id = self.run_id, "recorder worker started");
        while let Some(task) = self.rx.blocking_recv() {
            match task {
                Task::Event(event) => {
                    let stopping = event.event_type == EVENT_HUB_STOP;
                    self.record(&event);
                    if stopping {
                        tracing::info!("hub stopping, shutting down recorder");
                        self.finish(Vec::new());
                        return;
                    }
                }
                Task::Purge(reply) => {
                    let summary = self.purge();
                    if let Some(reply) = reply {
                        let _ = reply.send(summary);
                    }
                }
                Task::Flush(reply) => {
                    let _ = reply.send(());
                }
                Task::Shutdown(reply) => {
                    self.finish(reply.into_iter().collect());
                    return;
                }
            }
        }
        // Every sender is gone: the handle was dropped.
        self.finish(Vec::new());
    }

    /// Drain what is already queued, then close the run. Pending flushes and
    /// shutdowns are acknowledged only after the run is closed.
    fn finish(&mut self, mut acks: Vec<oneshot::Sender<()>>) {
        self.rx.close();
        while let Ok(task) = self.rx.try_recv() {
            match task {
                Task::Event(event) => self.record(&event),
                Task::Flush(reply) => acks.push(reply),
                Task::Purge(reply) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(None);
                    }
                }
                Task::Shutdown(reply) => acks.extend(reply),
            }
        }

        match end_run(&self.db, self.run_id, Utc::now()) {
            Ok(()) => tracing::info!(run_id = self.run_id, "recorder run closed"),
            Err(e) => {
                tracing::error!(run_id = self.run_id, error = %e, "failed to close recorder run")
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }

    fn purge(&self) -> Option<PurgeSummary> {
        match purge_old_data(&self.db, self.retention) {
            Ok(Some(summary)) => {
                tracing::info!(
                    cutoff = %summary.cutoff,
                    states = summary.states_deleted,
                    events = summary.events_deleted,
                    "purged old recorder data"
                );
                Some(summary)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "purge failed");
                None
            }
        }
    }

    fn should_record(&self, event: &Event) -> bool {
        if let Some(entity_id) = event.entity_id()
            && !self.filter.should_keep(entity_id)
        {
            return false;
        }
        event.as_state_changed().is_some()
            || self.filter.should_record_event_type(&event.event_type)
    }

    /// Persist one event, plus its state row for a state change, as a single
    /// unit of work. Failures are logged and the event is dropped.
    fn record(&self, event: &Event) {
        if !self.should_record(event) {
            tracing::trace!(event_type = %event.event_type, "event filtered out");
            return;
        }

        let record = match EventRecord::from_event(event) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    event_type = %event.event_type,
                    error = %e,
                    "could not serialize event"
                );
                return;
            }
        };
        let change = event.as_state_changed();

        let result = self.db.commit("record event", |conn| {
            let event_id = record.insert(conn)?;
            if let Some(change) = change {
                StateRecord::from_state_change(change, event.time_fired, Some(event_id))
                    .insert(conn)?;
            }
            Ok(event_id)
        });

        if let Err(e) = result {
            tracing::error!(
                event_type = %event.event_type,
                error = %e,
                "dropping event after failed commit"
            );
        }
    }
}

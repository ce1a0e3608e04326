// ABOUTME: Row types for the recorder tables and their mapping to and from hub objects.
// ABOUTME: Timestamps are stored as fixed-width RFC 3339 text so they order lexically.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use hearth_core::{
    EVENT_STATE_CHANGED, Event, EventData, EventOrigin, State, StateChangedData,
    split_entity_id,
};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use ulid::Ulid;

use crate::error::StoreError;

/// Render a timestamp the way every table stores it.
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => ts_column(row, idx).map(Some),
    }
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// A persisted entity state. Rows are insert-only; a change is a new row.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub state_id: Option<i64>,
    pub domain: String,
    pub entity_id: String,
    pub state: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub event_id: Option<i64>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

pub(crate) const STATE_COLUMNS: &str = "state_id, domain, entity_id, state, attributes, event_id, \
     last_changed, last_updated, created";

impl StateRecord {
    pub fn from_state(state: &State, event_id: Option<i64>) -> Self {
        Self {
            state_id: None,
            domain: state.domain().to_string(),
            entity_id: state.entity_id.clone(),
            state: state.state.clone(),
            attributes: state.attributes.clone(),
            event_id,
            last_changed: state.last_changed,
            last_updated: state.last_updated,
            created: Utc::now(),
        }
    }

    /// Map a `state_changed` event to a row. A removal (no new state) is stored
    /// with an empty value, stamped with the event's fired time.
    pub fn from_state_change(
        change: &StateChangedData,
        time_fired: DateTime<Utc>,
        event_id: Option<i64>,
    ) -> Self {
        match &change.new_state {
            Some(state) => Self::from_state(state, event_id),
            None => Self {
                state_id: None,
                domain: split_entity_id(&change.entity_id)
                    .map(|(domain, _)| domain.to_string())
                    .unwrap_or_default(),
                entity_id: change.entity_id.clone(),
                state: String::new(),
                attributes: serde_json::Map::new(),
                event_id,
                last_changed: time_fired,
                last_updated: time_fired,
                created: Utc::now(),
            },
        }
    }

    /// Convert back to a hub State.
    pub fn to_native(&self) -> Result<State, StoreError> {
        State::with_timestamps(
            &self.entity_id,
            &self.state,
            self.attributes.clone(),
            self.last_changed,
            self.last_updated,
        )
        .map_err(StoreError::from)
    }

    pub fn insert(&self, conn: &Connection) -> Result<i64, StoreError> {
        let attributes = serde_json::to_string(&self.attributes)?;
        conn.execute(
            "INSERT INTO states (domain, entity_id, state, attributes, event_id,
                                 last_changed, last_updated, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.domain,
                self.entity_id,
                self.state,
                attributes,
                self.event_id,
                fmt_ts(&self.last_changed),
                fmt_ts(&self.last_updated),
                fmt_ts(&self.created),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let attributes = match json_column(row, 4)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(Self {
            state_id: row.get(0)?,
            domain: row.get(1)?,
            entity_id: row.get(2)?,
            state: row.get(3)?,
            attributes,
            event_id: row.get(5)?,
            last_changed: ts_column(row, 6)?,
            last_updated: ts_column(row, 7)?,
            created: ts_column(row, 8)?,
        })
    }
}

/// A persisted bus event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_id: Option<i64>,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub context_id: Option<Ulid>,
}

pub(crate) const EVENT_COLUMNS: &str =
    "event_id, event_type, event_data, origin, time_fired, created, context_id";

impl EventRecord {
    pub fn from_event(event: &Event) -> Result<Self, StoreError> {
        Ok(Self {
            event_id: None,
            event_type: event.event_type.clone(),
            event_data: event.data_json()?,
            origin: event.origin,
            time_fired: event.time_fired,
            created: Utc::now(),
            context_id: Some(event.context_id),
        })
    }

    /// Convert back to a bus Event. Rows written before context ids existed
    /// get a fresh one.
    pub fn to_native(&self) -> Result<Event, StoreError> {
        let data = if self.event_type == EVENT_STATE_CHANGED {
            EventData::StateChanged(serde_json::from_value(self.event_data.clone())?)
        } else {
            EventData::Generic(self.event_data.clone())
        };
        Ok(Event {
            context_id: self.context_id.unwrap_or_else(Ulid::new),
            event_type: self.event_type.clone(),
            data,
            origin: self.origin,
            time_fired: self.time_fired,
        })
    }

    pub fn insert(&self, conn: &Connection) -> Result<i64, StoreError> {
        conn.execute(
            "INSERT INTO events (event_type, event_data, origin, time_fired, created, context_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.event_type,
                serde_json::to_string(&self.event_data)?,
                self.origin.as_str(),
                fmt_ts(&self.time_fired),
                fmt_ts(&self.created),
                self.context_id.map(|id| id.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let origin: String = row.get(3)?;
        let origin = EventOrigin::from_str(&origin).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
        })?;
        let context_id = row
            .get::<_, Option<String>>(6)?
            .and_then(|raw| Ulid::from_string(&raw).ok());
        Ok(Self {
            event_id: row.get(0)?,
            event_type: row.get(1)?,
            event_data: json_column(row, 2)?,
            origin,
            time_fired: ts_column(row, 4)?,
            created: ts_column(row, 5)?,
            context_id,
        })
    }
}

/// One operating session of the recorder. `ended` is `None` while the run is open.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderRun {
    pub run_id: i64,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

pub(crate) const RUN_COLUMNS: &str = "run_id, started, ended, created";

impl RecorderRun {
    pub fn is_open(&self) -> bool {
        self.ended.is_none()
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            started: ts_column(row, 1)?,
            ended: opt_ts_column(row, 2)?,
            created: ts_column(row, 3)?,
        })
    }
}

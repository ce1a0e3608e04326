// ABOUTME: Read-side query surface over recorded states and events.
// ABOUTME: Queries degrade to empty results on store failure instead of erroring.

use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;

use crate::database::Database;
use crate::models::{EVENT_COLUMNS, EventRecord, STATE_COLUMNS, StateRecord, fmt_ts};

/// Filter for [`get_states`]. Empty lists match everything; the time range is
/// half-open over `last_updated`.
#[derive(Debug, Clone, Default)]
pub struct StateQuery {
    pub entity_ids: Vec<String>,
    pub domains: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl StateQuery {
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_ids: vec![entity_id.into()],
            ..Default::default()
        }
    }

    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domains: vec![domain.into()],
            ..Default::default()
        }
    }
}

/// Filter for [`get_events`]. The time range is half-open over `time_fired`.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_types: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Accumulates `WHERE` clauses with positional parameters.
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    values: Vec<String>,
}

impl Conditions {
    fn any_of(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let start = self.values.len() + 1;
        let slots: Vec<String> = (start..start + values.len()).map(|i| format!("?{i}")).collect();
        self.clauses.push(format!("{column} IN ({})", slots.join(", ")));
        self.values.extend(values.iter().cloned());
    }

    fn compare(&mut self, column: &str, op: &str, value: Option<&DateTime<Utc>>) {
        if let Some(ts) = value {
            self.values.push(fmt_ts(ts));
            self.clauses.push(format!("{column} {op} ?{}", self.values.len()));
        }
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// States matching `query`, in the order they were recorded.
pub fn get_states(db: &Database, query: &StateQuery) -> Vec<StateRecord> {
    let mut conditions = Conditions::default();
    conditions.any_of("entity_id", &query.entity_ids);
    conditions.any_of("domain", &query.domains);
    conditions.compare("last_updated", ">=", query.start.as_ref());
    conditions.compare("last_updated", "<", query.end.as_ref());

    let sql = format!(
        "SELECT {STATE_COLUMNS} FROM states {} ORDER BY state_id ASC",
        conditions.where_sql()
    );

    db.query("get states", |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows =
            stmt.query_map(params_from_iter(conditions.values.iter()), StateRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

/// Events matching `query`, in the order they were recorded.
pub fn get_events(db: &Database, query: &EventQuery) -> Vec<EventRecord> {
    let mut conditions = Conditions::default();
    conditions.any_of("event_type", &query.event_types);
    conditions.compare("time_fired", ">=", query.start.as_ref());
    conditions.compare("time_fired", "<", query.end.as_ref());

    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events {} ORDER BY event_id ASC",
        conditions.where_sql()
    );

    db.query("get events", |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows =
            stmt.query_map(params_from_iter(conditions.values.iter()), EventRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

/// The latest recorded state of each entity as of `at`, sorted by entity id.
/// Entities whose latest row is a removal are left out.
pub fn get_states_at(
    db: &Database,
    at: DateTime<Utc>,
    entity_ids: Option<&[String]>,
) -> Vec<StateRecord> {
    let mut conditions = Conditions::default();
    conditions.compare("last_updated", "<=", Some(&at));
    if let Some(ids) = entity_ids {
        if ids.is_empty() {
            return Vec::new();
        }
        conditions.any_of("entity_id", ids);
    }

    let columns: Vec<String> = STATE_COLUMNS
        .split(", ")
        .map(|column| format!("s.{column}"))
        .collect();
    let sql = format!(
        "SELECT {} FROM states s
         JOIN (SELECT MAX(state_id) AS max_state_id FROM states {} GROUP BY entity_id) latest
           ON s.state_id = latest.max_state_id
         WHERE s.state != ''
         ORDER BY s.entity_id ASC",
        columns.join(", "),
        conditions.where_sql()
    );

    db.query("get states at point in time", |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows =
            stmt.query_map(params_from_iter(conditions.values.iter()), StateRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    })
}

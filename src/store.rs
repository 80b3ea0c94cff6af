//! # Store Module
//!
//! The store accessor seam: paged projected reads, partial update by id and
//! bulk create. `MemoryStore` is the in-process implementation; the HTTP one
//! lives in [`crate::rest`].

use crate::model::{Patch, RecordId};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Mutex;

/// A row as returned by the store, restricted to the projected fields.
pub type Row = Map<String, Value>;

/// Row filter understood by every store implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    Prefix(String, String),
    NotNull(String),
}

impl Filter {
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq(field, expected) => row
                .get(field)
                .map(|value| value_text(value).as_deref() == Some(expected.as_str()))
                .unwrap_or(false),
            Filter::Prefix(field, prefix) => row
                .get(field)
                .and_then(value_text)
                .map(|text| text.starts_with(prefix.as_str()))
                .unwrap_or(false),
            Filter::NotNull(field) => row.get(field).map(|v| !v.is_null()).unwrap_or(false),
        }
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One paged read: table, projection, filters, ordering and window.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub table: String,
    /// Empty means every column
    pub fields: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Selector {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: 1000,
            offset: 0,
        }
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// Store accessor failures.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The call did not finish within its deadline.
    Timeout,
    /// Connection reset, 5xx, throttling; worth retrying.
    Transient(String),
    /// The store refused the request; retrying will not help.
    Rejected { status: u16, message: String },
    /// The response could not be decoded.
    Decode(String),
    /// Update target does not exist.
    NotFound(RecordId),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Transient(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "store request timed out"),
            Self::Transient(msg) => write!(f, "transient store failure: {msg}"),
            Self::Rejected { status, message } => {
                write!(f, "store rejected request (status {status}): {message}")
            }
            Self::Decode(msg) => write!(f, "cannot decode store response: {msg}"),
            Self::NotFound(id) => write!(f, "record {id} not found"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Paged read, partial update and bulk create against the registry store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one page of rows matching the selector.
    async fn fetch_page(&self, selector: &Selector) -> Result<Vec<Row>, StoreError>;

    /// Apply a partial update to one row. The whole patch lands or none of it does.
    async fn update(&self, table: &str, id: &RecordId, patch: &Patch) -> Result<(), StoreError>;

    /// Insert rows and return their store-assigned ids.
    async fn create_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<RecordId>, StoreError>;
}

/// Migration that adds the crossref field the engine depends on.
pub fn crossref_migration_sql(table: &str) -> String {
    format!(
        "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS crossref_ids jsonb NOT NULL DEFAULT '[]'::jsonb;\n\
         CREATE INDEX IF NOT EXISTS {table}_crossref_ids_idx ON {table} USING gin (crossref_ids);"
    )
}

#[derive(Debug, Default)]
struct MemoryTable {
    name: String,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Vec<MemoryTable>,
    next_id: u64,
}

impl MemoryState {
    fn table_mut(&mut self, name: &str) -> &mut MemoryTable {
        let pos = match self.tables.iter().position(|table| table.name == name) {
            Some(pos) => pos,
            None => {
                self.tables.push(MemoryTable {
                    name: name.to_string(),
                    rows: Vec::new(),
                });
                self.tables.len() - 1
            }
        };
        &mut self.tables[pos]
    }

    fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.iter().find(|table| table.name == name)
    }
}

/// Thread-safe in-memory store keeping rows as JSON objects.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows synchronously, assigning ids to rows that lack one.
    pub fn insert_rows(&self, table: &str, rows: Vec<Row>) -> Vec<RecordId> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids = Vec::with_capacity(rows.len());
        let mut assigned = Vec::with_capacity(rows.len());
        for mut row in rows {
            let existing = row
                .get("id")
                .and_then(value_text)
                .filter(|id| !id.is_empty());
            let id = match existing {
                Some(id) => id,
                None => {
                    state.next_id += 1;
                    state.next_id.to_string()
                }
            };
            row.insert("id".into(), Value::String(id.clone()));
            ids.push(RecordId::new(id));
            assigned.push(row);
        }
        state.table_mut(table).rows.extend(assigned);
        ids
    }

    /// Insert serializable records (e.g. installation records).
    pub fn insert_records<T: serde::Serialize>(&self, table: &str, records: &[T]) -> Vec<RecordId> {
        let rows = records
            .iter()
            .filter_map(|record| match serde_json::to_value(record) {
                Ok(Value::Object(mut row)) => {
                    if row.get("id").map(|id| id.as_str() == Some("")).unwrap_or(false) {
                        row.remove("id");
                    }
                    Some(row)
                }
                _ => None,
            })
            .collect();
        self.insert_rows(table, rows)
    }

    /// Snapshot of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .table(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    /// Decode a table into typed records, skipping rows that do not fit.
    pub fn records<T: serde::de::DeserializeOwned>(&self, table: &str) -> Vec<T> {
        self.rows(table)
            .into_iter()
            .filter_map(|row| serde_json::from_value(Value::Object(row)).ok())
            .collect()
    }

    pub fn len(&self, table: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.table(table).map(|table| table.rows.len()).unwrap_or(0)
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    let as_number = |v: Option<&Value>| v.and_then(value_text).and_then(|t| t.parse::<f64>().ok());
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.and_then(value_text).cmp(&b.and_then(value_text)),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch_page(&self, selector: &Selector) -> Result<Vec<Row>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(table) = state.table(&selector.table) else {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("relation '{}' does not exist", selector.table),
            });
        };

        let mut matching: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| selector.filters.iter().all(|filter| filter.matches(row)))
            .collect();
        if let Some(order) = &selector.order_by {
            matching.sort_by(|a, b| compare_values(a.get(order), b.get(order)));
        }

        Ok(matching
            .into_iter()
            .skip(selector.offset)
            .take(selector.limit)
            .map(|row| {
                if selector.fields.is_empty() {
                    return row.clone();
                }
                selector
                    .fields
                    .iter()
                    .filter_map(|field| row.get(field).map(|v| (field.clone(), v.clone())))
                    .collect()
            })
            .collect())
    }

    async fn update(&self, table: &str, id: &RecordId, patch: &Patch) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let table = state.table_mut(table);
        let row = table
            .rows
            .iter_mut()
            .find(|row| row.get("id").and_then(value_text).as_deref() == Some(id.as_str()))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        for (key, value) in patch.to_json() {
            row.insert(key, value);
        }
        Ok(())
    }

    async fn create_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<RecordId>, StoreError> {
        Ok(self.insert_rows(table, rows))
    }
}

//! # Record Loader
//!
//! Pages every canonical record into memory and builds the auxiliary
//! equipment foreign-id index. Paging is sequential: the next page is
//! requested only while the previous one came back full.

use crate::config::SolarlinkConfig;
use crate::model::{InstallationRecord, RecordId};
use crate::retry::{attempt, RetryPolicy};
use crate::store::{Filter, RecordStore, Row, Selector, StoreError};
use hashbrown::HashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info, instrument, warn};

const CROSSREF_FIELD: &str = "crossref_ids";

#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// The store has no crossref field; nothing can run until it is migrated.
    MissingCrossrefField { table: String },
    /// The very first page was refused outright.
    Store(StoreError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCrossrefField { table } => write!(
                f,
                "table '{table}' has no '{CROSSREF_FIELD}' field; run `solarlink --setup-schema` \
                 and apply the printed migration before matching"
            ),
            Self::Store(err) => write!(f, "cannot read records: {err}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Paging counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub rows_seen: usize,
    pub rows_skipped: usize,
    pub duplicate_keys: usize,
    pub equipment_links: usize,
}

/// Installation id -> foreign plant codes reported on its equipment.
#[derive(Debug, Clone, Default)]
pub struct EquipmentIndex {
    links: HashMap<RecordId, Vec<String>>,
}

impl EquipmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, installation: RecordId, foreign_id: impl Into<String>) {
        let foreign_id = foreign_id.into();
        let ids = self.links.entry(installation).or_default();
        if let Err(pos) = ids.binary_search(&foreign_id) {
            ids.insert(pos, foreign_id);
        }
    }

    pub fn foreign_ids(&self, installation: &RecordId) -> &[String] {
        self.links
            .get(installation)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// All canonical records of a run, addressable by position, id or natural key.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<InstallationRecord>,
    by_key: HashMap<String, usize>,
    by_id: HashMap<RecordId, usize>,
    equipment: EquipmentIndex,
    stats: LoadStats,
}

impl RecordSet {
    /// Build from in-memory records. Later duplicates of a natural key are dropped.
    pub fn from_records(records: Vec<InstallationRecord>, equipment: EquipmentIndex) -> Self {
        let mut set = Self {
            equipment,
            ..Self::default()
        };
        for record in records {
            set.push(record);
        }
        set.stats.equipment_links = set.equipment.len();
        set
    }

    fn push(&mut self, record: InstallationRecord) {
        if record.source_record_id.is_empty() || self.by_key.contains_key(&record.source_record_id) {
            self.stats.duplicate_keys += 1;
            return;
        }
        let idx = self.records.len();
        self.by_key.insert(record.source_record_id.clone(), idx);
        self.by_id.insert(record.id.clone(), idx);
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, idx: usize) -> &InstallationRecord {
        &self.records[idx]
    }

    pub fn records(&self) -> &[InstallationRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &InstallationRecord)> {
        self.records.iter().enumerate()
    }

    pub fn index_of_key(&self, source_record_id: &str) -> Option<usize> {
        self.by_key.get(source_record_id).copied()
    }

    pub fn index_of_id(&self, id: &RecordId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Foreign plant codes reported on the record's equipment.
    pub fn foreign_ids(&self, idx: usize) -> &[String] {
        self.equipment.foreign_ids(&self.records[idx].id)
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }
}

/// Load the canonical records and the equipment index.
#[instrument(skip(store, config), level = "debug")]
pub async fn load(store: &dyn RecordStore, config: &SolarlinkConfig) -> Result<RecordSet, LoadError> {
    let policy = RetryPolicy::from_config(&config.store);
    let table = &config.store.installations_table;

    let selector = Selector::new(table.as_str())
        .fields(InstallationRecord::columns())
        .order_by("id");
    let (rows, mut stats) = fetch_all(store, selector, &policy, config, Some(CROSSREF_FIELD)).await?;

    let equipment = match &config.loader.equipment_scheme {
        Some(_) => load_equipment(store, config, &policy).await,
        None => EquipmentIndex::new(),
    };

    let mut set = RecordSet {
        equipment,
        ..RecordSet::default()
    };
    for row in rows {
        match serde_json::from_value::<InstallationRecord>(Value::Object(row)) {
            Ok(record) => set.push(record),
            Err(err) => {
                debug!(error = %err, "Skipping undecodable record row");
                stats.rows_skipped += 1;
            }
        }
    }
    stats.duplicate_keys += set.stats.duplicate_keys;
    stats.equipment_links = set.equipment.len();
    set.stats = stats;

    info!(
        records = set.len(),
        pages = set.stats.pages_fetched,
        failed_pages = set.stats.pages_failed,
        skipped = set.stats.rows_skipped,
        equipment_links = set.stats.equipment_links,
        "Loaded canonical records"
    );
    Ok(set)
}

async fn load_equipment(
    store: &dyn RecordStore,
    config: &SolarlinkConfig,
    policy: &RetryPolicy,
) -> EquipmentIndex {
    let field = config.loader.equipment_foreign_field.as_str();
    let selector = Selector::new(config.store.equipment_table.as_str())
        .fields(["installation_id", field])
        .filter(Filter::NotNull(field.to_string()))
        .order_by("id");

    let rows = match fetch_all(store, selector, policy, config, None).await {
        Ok((rows, _)) => rows,
        Err(err) => {
            warn!(error = %err, "Equipment foreign ids unavailable; continuing without them");
            return EquipmentIndex::new();
        }
    };

    let mut index = EquipmentIndex::new();
    for row in rows {
        let installation = row
            .get("installation_id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RecordId>(id).ok());
        let foreign = row.get(field).and_then(|value| match value {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        if let (Some(installation), Some(foreign)) = (installation, foreign) {
            if !foreign.is_empty() {
                index.add(installation, foreign);
            }
        }
    }
    index
}

fn names_field(err: &StoreError, field: &str) -> bool {
    match err {
        StoreError::Rejected { message, .. } => message.contains(field),
        _ => false,
    }
}

/// Page through every row matching `base`. Failed pages are skipped.
async fn fetch_all(
    store: &dyn RecordStore,
    base: Selector,
    policy: &RetryPolicy,
    config: &SolarlinkConfig,
    required_field: Option<&str>,
) -> Result<(Vec<Row>, LoadStats), LoadError> {
    let page_size = config.loader.page_size;
    let mut stats = LoadStats::default();
    let mut rows = Vec::new();
    let mut offset = 0;
    let mut consecutive_failures = 0;
    let mut verified = required_field.is_none();
    let mut any_page_ok = false;

    loop {
        let selector = base.clone().page(page_size, offset);
        let page = &selector;
        match attempt(policy, "fetch_page", move || store.fetch_page(page)).await {
            Ok(page_rows) => {
                consecutive_failures = 0;
                any_page_ok = true;
                stats.pages_fetched += 1;
                if let (false, Some(field), Some(first)) = (verified, required_field, page_rows.first()) {
                    if !first.contains_key(field) {
                        return Err(LoadError::MissingCrossrefField {
                            table: base.table.clone(),
                        });
                    }
                    verified = true;
                }
                let full = page_rows.len() >= page_size;
                stats.rows_seen += page_rows.len();
                rows.extend(page_rows);
                if !full {
                    break;
                }
            }
            Err(err) => {
                if let Some(field) = required_field {
                    if !verified && names_field(&err, field) {
                        return Err(LoadError::MissingCrossrefField {
                            table: base.table.clone(),
                        });
                    }
                }
                if !any_page_ok && !err.is_transient() {
                    return Err(LoadError::Store(err));
                }
                stats.pages_failed += 1;
                consecutive_failures += 1;
                warn!(table = %base.table, offset, error = %err, "Page failed; skipping");
                if consecutive_failures >= config.loader.max_consecutive_failed_pages.max(1) {
                    warn!(table = %base.table, offset, "Too many consecutive page failures; stopping");
                    break;
                }
            }
        }
        offset += page_size;
    }

    Ok((rows, stats))
}

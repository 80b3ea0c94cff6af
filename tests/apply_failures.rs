#[path = "../src/test_support.rs"]
mod test_support;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use solarlink_rs::model::{InstallationRecord, Patch, RecordId};
use solarlink_rs::store::{MemoryStore, RecordStore, Row, Selector, StoreError};
use solarlink_rs::{PhaseSelection, Solarlink, SolarlinkConfig};
use test_support::{generate_dataset, seeded_store, TABLE};

/// Rejects updates for some ids and fails others transiently a fixed number of times.
struct FaultyStore {
    inner: MemoryStore,
    rejected: HashSet<RecordId>,
    flaky: Mutex<Vec<RecordId>>,
    flaky_failures: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FaultyStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            rejected: HashSet::new(),
            flaky: Mutex::new(Vec::new()),
            flaky_failures: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn fetch_page(&self, selector: &Selector) -> Result<Vec<Row>, StoreError> {
        self.inner.fetch_page(selector).await
    }

    async fn update(&self, table: &str, id: &RecordId, patch: &Patch) -> Result<(), StoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let result = if self.rejected.contains(id) {
            Err(StoreError::Rejected {
                status: 400,
                message: "row locked".into(),
            })
        } else {
            let first_try = {
                let mut flaky = self.flaky.lock().unwrap();
                match flaky.iter().position(|f| f == id) {
                    Some(pos) => {
                        flaky.remove(pos);
                        true
                    }
                    None => false,
                }
            };
            if first_try {
                self.flaky_failures.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Transient("connection reset".into()))
            } else {
                self.inner.update(table, id, patch).await
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn create_many(&self, table: &str, rows: Vec<Row>) -> Result<Vec<RecordId>, StoreError> {
        self.inner.create_many(table, rows).await
    }
}

fn fast_config(concurrency: usize) -> SolarlinkConfig {
    let mut config = SolarlinkConfig::default();
    config.store.retry_base_delay_ms = 1;
    config.store.max_retries = 2;
    config.apply.concurrency = concurrency;
    config
}

#[tokio::test]
async fn rejected_updates_do_not_abort_the_batch() -> anyhow::Result<()> {
    let dataset = generate_dataset(150, 0.6, 3);
    let (inner, _) = seeded_store(&dataset.records);

    // Patch targets computed on an identical copy of the data.
    let copy = {
        let (copy, _) = seeded_store(&dataset.records);
        let engine = Solarlink::new(Arc::new(copy), fast_config(4))?;
        let records = engine.load().await?;
        let report = engine.match_records(&records, PhaseSelection::All);
        solarlink_rs::merge(&records, &report.pairs)
    };
    let targets: Vec<RecordId> = copy.patches.keys().cloned().collect();
    assert!(targets.len() > 4);

    let mut store = FaultyStore::new(inner);
    store.rejected.insert(targets[0].clone());
    store.rejected.insert(targets[1].clone());
    *store.flaky.lock().unwrap() = vec![targets[2].clone(), targets[3].clone()];
    let store = Arc::new(store);

    let engine = Solarlink::new(store.clone(), fast_config(4))?;
    let summary = engine.run(PhaseSelection::All, false).await?;

    assert_eq!(summary.apply.attempted, targets.len());
    assert_eq!(summary.apply.failed, 2);
    assert_eq!(summary.apply.applied, targets.len() - 2);
    let failed: Vec<&RecordId> = summary.apply.failures.iter().map(|(id, _)| id).collect();
    assert!(failed.contains(&&targets[0]));
    assert!(failed.contains(&&targets[1]));
    assert_eq!(store.flaky_failures.load(Ordering::SeqCst), 2);

    let rows: Vec<InstallationRecord> = store.inner.records(TABLE);
    let untouched = rows.iter().find(|r| r.id == targets[0]).unwrap();
    let original = dataset
        .records
        .iter()
        .find(|r| r.source_record_id == untouched.source_record_id)
        .unwrap();
    assert_eq!(untouched.crossref_ids, original.crossref_ids);
    Ok(())
}

#[tokio::test]
async fn concurrency_is_bounded() -> anyhow::Result<()> {
    let dataset = generate_dataset(200, 0.7, 4);
    let (inner, _) = seeded_store(&dataset.records);
    let store = Arc::new(FaultyStore::new(inner));

    let engine = Solarlink::new(store.clone(), fast_config(3))?;
    let summary = engine.run(PhaseSelection::All, false).await?;

    assert!(summary.apply.applied > 3);
    assert!(store.peak_in_flight.load(Ordering::SeqCst) <= 3);
    Ok(())
}

//! # Patch Applicator
//!
//! Writes patches back to the store with bounded concurrency. Each update
//! goes through the retry policy; a failure is counted and logged and never
//! aborts the batch. Dry runs skip every write but report the same counts.

use crate::config::ApplyConfig;
use crate::model::{Patch, RecordId};
use crate::retry::{self, RetryPolicy};
use crate::store::{RecordStore, StoreError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Outcome of one apply pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
    pub dry_run: bool,
    /// Failed target ids with the final error, sorted by id
    pub failures: Vec<(RecordId, String)>,
    /// First few patches in id order, filled on dry runs only
    #[serde(skip)]
    pub sample: Vec<(RecordId, Patch)>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Apply every patch to `table`.
#[instrument(skip(store, patches, config, policy), fields(patches = patches.len()))]
pub async fn apply_patches(
    store: &dyn RecordStore,
    table: &str,
    patches: &BTreeMap<RecordId, Patch>,
    dry_run: bool,
    config: &ApplyConfig,
    policy: &RetryPolicy,
) -> ApplyReport {
    let mut report = ApplyReport {
        attempted: patches.len(),
        dry_run,
        ..ApplyReport::default()
    };

    if dry_run {
        report.applied = patches.len();
        report.sample = patches
            .iter()
            .take(config.dry_run_sample)
            .map(|(id, patch)| (id.clone(), patch.clone()))
            .collect();
        info!(targets = report.attempted, "Dry run: no updates written");
        return report;
    }

    let concurrency = config.concurrency.max(1);
    let results: Vec<(&RecordId, Result<(), StoreError>)> = stream::iter(patches.iter())
        .map(|(id, patch)| async move {
            let result = retry::attempt(policy, "update", move || store.update(table, id, patch)).await;
            (id, result)
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    for (id, result) in results {
        match result {
            Ok(()) => report.applied += 1,
            Err(err) => {
                warn!(id = %id, error = %err, "Update failed");
                report.failed += 1;
                report.failures.push((id.clone(), err.to_string()));
            }
        }
    }
    report.failures.sort();

    info!(
        attempted = report.attempted,
        applied = report.applied,
        failed = report.failed,
        concurrency,
        "Patches applied"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldValue, InstallationRecord, ScalarField};
    use crate::store::MemoryStore;
    use std::time::Duration;

    const TABLE: &str = "solar_installations";

    fn owner_patch(name: &str) -> Patch {
        let mut patch = Patch::default();
        patch
            .fields
            .insert(ScalarField::OwnerName, FieldValue::Text(name.into()));
        patch
    }

    fn seeded(n: usize) -> (MemoryStore, Vec<RecordId>) {
        let store = MemoryStore::new();
        let records: Vec<_> = (0..n)
            .map(|i| InstallationRecord::new("", format!("tts3_{i}")))
            .collect();
        let ids = store.insert_records(TABLE, &records);
        (store, ids)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::once(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_apply_writes_all() {
        let (store, ids) = seeded(3);
        let patches: BTreeMap<_, _> = ids
            .iter()
            .map(|id| (id.clone(), owner_patch("Acme")))
            .collect();
        let config = ApplyConfig {
            concurrency: 2,
            ..ApplyConfig::default()
        };

        let report = apply_patches(&store, TABLE, &patches, false, &config, &policy()).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.applied, 3);
        assert!(report.is_clean());

        let records: Vec<InstallationRecord> = store.records(TABLE);
        assert!(records
            .iter()
            .all(|r| r.owner_name.as_deref() == Some("Acme")));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (store, ids) = seeded(8);
        let patches: BTreeMap<_, _> = ids
            .iter()
            .map(|id| (id.clone(), owner_patch("Acme")))
            .collect();

        let report = apply_patches(
            &store,
            TABLE,
            &patches,
            true,
            &ApplyConfig::default(),
            &policy(),
        )
        .await;
        assert!(report.dry_run);
        assert_eq!(report.attempted, 8);
        assert_eq!(report.sample.len(), ApplyConfig::default().dry_run_sample);

        let records: Vec<InstallationRecord> = store.records(TABLE);
        assert!(records.iter().all(|r| r.owner_name.is_none()));
    }

    #[tokio::test]
    async fn test_missing_target_counts_as_failure() {
        let (store, ids) = seeded(1);
        let mut patches = BTreeMap::new();
        patches.insert(ids[0].clone(), owner_patch("Acme"));
        patches.insert(RecordId::new("999"), owner_patch("Ghost"));

        let report = apply_patches(
            &store,
            TABLE,
            &patches,
            false,
            &ApplyConfig::default(),
            &policy(),
        )
        .await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, RecordId::new("999"));
    }
}

//! # Solarlink
//!
//! Cross-source entity resolution and enrichment for solar installation records.
//!
//! Records from many registries and incentive programs are loaded from a
//! shared store, matched in three ordered phases (identifier, proximity,
//! broad proximity), merged under a fill-only policy and written back as
//! minimal patches. Re-running over already enriched data produces no
//! further writes.

pub mod apply;
pub mod config;
pub mod loader;
pub mod matching;
pub mod merge;
pub mod model;
pub mod rest;
pub mod retry;
pub mod spatial;
pub mod store;
pub mod tiers;

// Re-export main types for convenience
pub use apply::{apply_patches, ApplyReport};
pub use config::{ConfigError, ConfigOverrides, SolarlinkConfig};
pub use loader::{LoadError, LoadStats, RecordSet};
pub use matching::{MatchEngine, MatchReport, PhaseSelection, PhaseStats};
pub use merge::{merge, EnrichmentStats, MergeOutcome};
pub use model::{InstallationRecord, LocationPrecision, MatchPair, MatchPhase, Patch, RecordId};
pub use rest::RestStore;
pub use retry::RetryPolicy;
pub use store::{MemoryStore, RecordStore, StoreError};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

/// Everything one run did, phase by phase.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub records: usize,
    pub load: LoadStats,
    pub phases: BTreeMap<MatchPhase, PhaseStats>,
    pub enrichment: EnrichmentStats,
    pub apply: ApplyReport,
}

/// Main API: load, match, merge and apply against one store.
pub struct Solarlink {
    store: Arc<dyn RecordStore>,
    config: SolarlinkConfig,
}

impl Solarlink {
    /// Create an engine over `store`. The config is validated up front.
    pub fn new(store: Arc<dyn RecordStore>, config: SolarlinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &SolarlinkConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Page every installation and the equipment index into memory.
    pub async fn load(&self) -> Result<RecordSet, LoadError> {
        loader::load(self.store.as_ref(), &self.config).await
    }

    /// Run the matching phases needed by `selection` over a loaded set.
    pub fn match_records(&self, records: &RecordSet, selection: PhaseSelection) -> MatchReport {
        MatchEngine::new(records, &self.config.matching)
            .with_equipment_scheme(self.config.loader.equipment_scheme.as_deref())
            .run(selection)
    }

    /// Full pass: load, match, merge, then apply (or only report on a dry run).
    #[instrument(skip(self), level = "debug")]
    pub async fn run(&self, selection: PhaseSelection, dry_run: bool) -> anyhow::Result<RunSummary> {
        let records = self.load().await?;
        let report = self.match_records(&records, selection);
        let merged = merge::merge(&records, &report.pairs);

        let policy = RetryPolicy::from_config(&self.config.store);
        let applied = apply::apply_patches(
            self.store.as_ref(),
            &self.config.store.installations_table,
            &merged.patches,
            dry_run,
            &self.config.apply,
            &policy,
        )
        .await;

        info!(
            records = records.len(),
            pairs = report.pairs.len(),
            patches = merged.patches.len(),
            applied = applied.applied,
            failed = applied.failed,
            dry_run,
            "Run complete"
        );

        Ok(RunSummary {
            records: records.len(),
            load: records.stats().clone(),
            phases: report.phases,
            enrichment: merged.stats,
            apply: applied,
        })
    }
}

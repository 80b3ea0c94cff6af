//! # Enrichment Merger
//!
//! Turns match pairs into one minimal patch per target under a fill-only
//! policy: existing values are never overwritten, location precision never
//! moves down, and crossref lists stay bounded. Stored crossref lists that
//! carry the record's own key, repeats or more than the cap are cleaned on
//! every record, matched or not. A record whose computed patch is empty is
//! left out entirely.

use crate::loader::RecordSet;
use crate::model::{
    InstallationRecord, LocationPrecision, LocationUpdate, MatchPair, Patch, RecordId, ScalarField,
    CROSSREF_CAP,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Counters describing what a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub fields: BTreeMap<ScalarField, usize>,
    pub coordinates_filled: usize,
    pub location_upgrades: usize,
    pub crossrefs_added: usize,
    pub crossrefs_dropped_at_cap: usize,
    /// Records whose stored crossref list had to be cleaned
    pub crossrefs_cleaned: usize,
    pub targets_patched: usize,
    pub targets_unchanged: usize,
}

impl EnrichmentStats {
    pub fn field(&self, field: ScalarField) -> usize {
        self.fields.get(&field).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Exactly one non-empty patch per target id
    pub patches: BTreeMap<RecordId, Patch>,
    pub stats: EnrichmentStats,
}

/// Build patches for every target named in `pairs`.
pub fn merge(records: &RecordSet, pairs: &[MatchPair]) -> MergeOutcome {
    let mut by_target: BTreeMap<usize, Vec<MatchPair>> = BTreeMap::new();
    for pair in pairs {
        if pair.target != pair.source {
            by_target.entry(pair.target).or_default().push(*pair);
        }
    }

    let mut outcome = MergeOutcome::default();
    for (idx, original) in records.iter() {
        let Some(group) = by_target.get_mut(&idx) else {
            let patch = enrich(original, &[], &mut outcome.stats);
            if !patch.is_empty() {
                record_stats(original, &patch, &mut outcome.stats);
                outcome.patches.insert(original.id.clone(), patch);
            }
            continue;
        };
        // Stable: within a phase the first-found contributor keeps priority.
        group.sort_by_key(|pair| pair.phase);
        let sources: Vec<&InstallationRecord> =
            group.iter().map(|pair| records.get(pair.source)).collect();
        let patch = enrich(original, &sources, &mut outcome.stats);

        if patch.is_empty() {
            outcome.stats.targets_unchanged += 1;
            continue;
        }
        record_stats(original, &patch, &mut outcome.stats);
        outcome.patches.insert(original.id.clone(), patch);
    }

    info!(
        patched = outcome.stats.targets_patched,
        unchanged = outcome.stats.targets_unchanged,
        crossrefs = outcome.stats.crossrefs_added,
        cleaned = outcome.stats.crossrefs_cleaned,
        "Enrichment merged"
    );
    outcome
}

/// Patch for one target given its contributing sources in priority order.
pub fn enrich(
    original: &InstallationRecord,
    sources: &[&InstallationRecord],
    stats: &mut EnrichmentStats,
) -> Patch {
    let mut patch = Patch::default();
    let mut coordinates = original.coordinates();
    let mut precision = original.location_precision;
    let mut crossrefs = original.clean_crossrefs();
    if crossrefs != original.crossref_ids {
        warn!(
            key = %original.source_record_id,
            stored = original.crossref_ids.len(),
            kept = crossrefs.len(),
            "Cleaning stored crossref list"
        );
        stats.crossrefs_cleaned += 1;
    }

    for source in sources {
        for field in ScalarField::ALL {
            if original.is_set(field) || patch.fields.contains_key(&field) {
                continue;
            }
            if let Some(value) = source.scalar(field) {
                patch.fields.insert(field, value);
            }
        }

        if let Some((lat, lon)) = source.coordinates() {
            match coordinates {
                None => {
                    let offered = source.location_precision.unwrap_or(LocationPrecision::City);
                    let adopted = offered.outranks(precision).then_some(offered);
                    patch.location = Some(LocationUpdate {
                        latitude: lat,
                        longitude: lon,
                        precision: adopted,
                    });
                    coordinates = Some((lat, lon));
                    if adopted.is_some() {
                        precision = adopted;
                    }
                }
                Some(_)
                    if source.location_precision == Some(LocationPrecision::MAX)
                        && precision != Some(LocationPrecision::MAX) =>
                {
                    patch.location = Some(LocationUpdate {
                        latitude: lat,
                        longitude: lon,
                        precision: Some(LocationPrecision::MAX),
                    });
                    coordinates = Some((lat, lon));
                    precision = Some(LocationPrecision::MAX);
                }
                Some(_) => {}
            }
        }

        let key = &source.source_record_id;
        if key.is_empty() || *key == original.source_record_id || crossrefs.contains(key) {
            continue;
        }
        if crossrefs.len() < CROSSREF_CAP {
            crossrefs.push(key.clone());
        } else {
            stats.crossrefs_dropped_at_cap += 1;
        }
    }

    if crossrefs != original.crossref_ids {
        patch.crossref_ids = Some(crossrefs);
    }
    patch
}

fn record_stats(original: &InstallationRecord, patch: &Patch, stats: &mut EnrichmentStats) {
    stats.targets_patched += 1;
    for field in patch.fields.keys() {
        *stats.fields.entry(*field).or_insert(0) += 1;
    }
    if patch.location.is_some() {
        if original.coordinates().is_none() {
            stats.coordinates_filled += 1;
        } else {
            stats.location_upgrades += 1;
        }
    }
    if let Some(crossrefs) = &patch.crossref_ids {
        let kept = original.clean_crossrefs().len();
        stats.crossrefs_added += crossrefs.len().saturating_sub(kept);
    }
}

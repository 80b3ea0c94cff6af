//! Phase 3: broad proximity, the last resort for records nothing else matched.
//!
//! One grid is built over every remaining classified record with
//! coordinates. A pair needs a different source prefix, a different tier,
//! distance inside the radius and capacity inside the tight tolerance.
//! Pairs are one-directional: the target-tier record receives enrichment.

use super::normalize::capacity_matches;
use super::{MatchContext, PhaseOutcome};
use crate::config::BroadConfig;
use crate::model::{MatchPair, MatchPhase};
use crate::spatial::GridIndex;
use crate::tiers::Tier;
use tracing::debug;

pub(super) fn match_broad(ctx: &MatchContext<'_>, config: &BroadConfig) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::default();
    let mut grid: GridIndex<usize> = GridIndex::new(ctx.cell_size_km);
    let mut tiers = vec![Tier::Unclassified; ctx.records.len()];

    for (idx, record) in ctx.records.iter() {
        if ctx.excluded.contains(&idx) {
            continue;
        }
        let tier = ctx.tiers.classify(record.source_prefix());
        let Some((lat, lon)) = record.coordinates() else {
            outcome.skipped += 1;
            continue;
        };
        if tier == Tier::Unclassified {
            outcome.skipped += 1;
            continue;
        }
        tiers[idx] = tier;
        grid.insert(lat, lon, idx);
    }

    for (target, record) in ctx.records.iter() {
        if tiers[target] != config.target_tier {
            continue;
        }
        let Some((lat, lon)) = record.coordinates() else {
            continue;
        };

        let source = grid
            .within(lat, lon, config.radius_km)
            .into_iter()
            .map(|n| n.item)
            .find(|&candidate| {
                let other = ctx.records.get(candidate);
                candidate != target
                    && !other
                        .source_prefix()
                        .eq_ignore_ascii_case(record.source_prefix())
                    && tiers[candidate] != Tier::Unclassified
                    && tiers[candidate] != tiers[target]
                    && capacity_matches(record.capacity_mw, other.capacity_mw, config.capacity_tolerance)
            });

        if let Some(source) = source {
            outcome
                .pairs
                .push(MatchPair::new(target, source, MatchPhase::BroadProximity));
        }
    }

    debug!(
        candidates = grid.len(),
        pairs = outcome.pairs.len(),
        skipped = outcome.skipped,
        "Broad proximity matched"
    );
    outcome
}

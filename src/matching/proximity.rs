//! Phase 2: high-confidence proximity matching.
//!
//! City rules group one source tier by `(state, normalized city)` and demand
//! capacity agreement; coordinate rules pick the nearest capacity-confirmed
//! neighbour inside a tight radius. Both emit bidirectional pairs.

use super::normalize::{capacity_matches, capacity_ratio, normalize_city, normalize_state};
use super::{MatchContext, PhaseOutcome};
use crate::config::{CityRule, CoordinateRule, ProximityConfig};
use crate::model::{MatchPair, MatchPhase};
use crate::spatial::GridIndex;
use hashbrown::{HashMap, HashSet};
use tracing::debug;

fn prefix_set(prefixes: &[String]) -> HashSet<String> {
    prefixes.iter().map(|p| p.to_ascii_lowercase()).collect()
}

fn has_prefix(ctx: &MatchContext<'_>, idx: usize, set: &HashSet<String>) -> bool {
    set.contains(&ctx.records.get(idx).source_prefix().to_ascii_lowercase())
}

fn different_source(ctx: &MatchContext<'_>, a: usize, b: usize) -> bool {
    a != b
        && !ctx
            .records
            .get(a)
            .source_prefix()
            .eq_ignore_ascii_case(ctx.records.get(b).source_prefix())
}

/// Run every city rule, then every coordinate rule. Records matched by an
/// earlier rule are left alone by later ones.
pub(super) fn match_proximity(ctx: &MatchContext<'_>, config: &ProximityConfig) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::default();
    let mut claimed: HashSet<usize> = HashSet::new();

    for rule in &config.city_rules {
        let found = match_city_rule(ctx, rule, config.capacity_tolerance, &claimed, &mut outcome);
        claimed.extend(found);
    }
    for rule in &config.coordinate_rules {
        let radius = rule.radius_km.unwrap_or(config.radius_km);
        let found = match_coordinate_rule(ctx, rule, radius, config, &claimed, &mut outcome);
        claimed.extend(found);
    }
    outcome
}

fn city_key(ctx: &MatchContext<'_>, idx: usize) -> Option<(String, String)> {
    let record = ctx.records.get(idx);
    let state = normalize_state(record.state.as_deref()?)?;
    let city = normalize_city(record.city.as_deref()?)?;
    Some((state, city))
}

fn match_city_rule(
    ctx: &MatchContext<'_>,
    rule: &CityRule,
    tolerance: f64,
    claimed: &HashSet<usize>,
    outcome: &mut PhaseOutcome,
) -> Vec<usize> {
    let indexed = prefix_set(&rule.indexed_prefixes);
    let queries = prefix_set(&rule.query_prefixes);
    let available = |idx: usize| !ctx.excluded.contains(&idx) && !claimed.contains(&idx);

    let mut groups: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (idx, _) in ctx.records.iter() {
        if !available(idx) || !has_prefix(ctx, idx, &indexed) {
            continue;
        }
        if let Some(key) = city_key(ctx, idx) {
            groups.entry(key).or_default().push(idx);
        }
    }

    let mut found = Vec::new();
    for (query, record) in ctx.records.iter() {
        if !available(query) || !has_prefix(ctx, query, &queries) {
            continue;
        }
        let (Some(key), Some(_)) = (city_key(ctx, query), record.usable_capacity()) else {
            outcome.skipped += 1;
            continue;
        };
        let Some(group) = groups.get(&key) else {
            continue;
        };

        // Closest capacity wins; the first candidate keeps ties.
        let mut best: Option<(usize, f64)> = None;
        for &candidate in group {
            if !different_source(ctx, query, candidate) {
                continue;
            }
            let other = ctx.records.get(candidate);
            if !capacity_matches(record.capacity_mw, other.capacity_mw, tolerance) {
                continue;
            }
            let ratio = capacity_ratio(record.capacity_mw, other.capacity_mw).unwrap_or(0.0);
            if best.map(|(_, r)| ratio > r).unwrap_or(true) {
                best = Some((candidate, ratio));
            }
        }

        if let Some((candidate, _)) = best {
            let pair = MatchPair::new(candidate, query, MatchPhase::Proximity);
            outcome.pairs.push(pair);
            outcome.pairs.push(pair.reversed());
            found.push(query);
            found.push(candidate);
        }
    }

    debug!(groups = groups.len(), matched = found.len() / 2, "City rule matched");
    found
}

fn match_coordinate_rule(
    ctx: &MatchContext<'_>,
    rule: &CoordinateRule,
    radius_km: f64,
    config: &ProximityConfig,
    claimed: &HashSet<usize>,
    outcome: &mut PhaseOutcome,
) -> Vec<usize> {
    let indexed = prefix_set(&rule.indexed_prefixes);
    let queries = prefix_set(&rule.query_prefixes);
    let available = |idx: usize| !ctx.excluded.contains(&idx) && !claimed.contains(&idx);

    let mut grid: GridIndex<usize> = GridIndex::new(ctx.cell_size_km);
    for (idx, record) in ctx.records.iter() {
        if !available(idx) || !has_prefix(ctx, idx, &indexed) {
            continue;
        }
        if let Some((lat, lon)) = record.coordinates() {
            grid.insert(lat, lon, idx);
        }
    }
    if grid.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    for (query, record) in ctx.records.iter() {
        if !available(query) || !has_prefix(ctx, query, &queries) {
            continue;
        }
        let Some((lat, lon)) = record.coordinates() else {
            outcome.skipped += 1;
            continue;
        };

        let neighbours: Vec<_> = grid
            .within(lat, lon, radius_km)
            .into_iter()
            .filter(|n| different_source(ctx, query, n.item))
            .collect();

        let confirmed = neighbours.iter().find(|n| {
            capacity_matches(
                record.capacity_mw,
                ctx.records.get(n.item).capacity_mw,
                config.capacity_tolerance,
            )
        });
        let chosen = match confirmed {
            Some(n) => Some(n.item),
            None if config.allow_nearest_fallback => neighbours
                .iter()
                .find(|n| {
                    capacity_ratio(record.capacity_mw, ctx.records.get(n.item).capacity_mw)
                        .is_none()
                })
                .map(|n| n.item),
            None => None,
        };

        if let Some(candidate) = chosen {
            let pair = MatchPair::new(candidate, query, MatchPhase::Proximity);
            outcome.pairs.push(pair);
            outcome.pairs.push(pair.reversed());
            found.push(query);
            found.push(candidate);
        }
    }

    debug!(
        indexed = grid.len(),
        radius_km,
        matched = found.len() / 2,
        "Coordinate rule matched"
    );
    found
}

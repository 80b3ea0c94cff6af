//! Phase 1: exact matching on registry identifiers embedded in natural keys.
//!
//! Sources sharing a numbering scheme encode `<prefix>_<plantCode>[_<generatorId>]`.
//! Records are indexed by `(plantCode, generatorId)` with a plant-only
//! fallback, and every structural match is emitted in both directions.

use super::{MatchContext, PhaseOutcome};
use crate::config::IdentifierScheme;
use crate::model::{source_local_id, source_prefix, MatchPair, MatchPhase};
use hashbrown::{HashMap, HashSet};
use tracing::debug;

/// Plant and optional generator parsed from a natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlantKey {
    pub plant: u64,
    pub generator: Option<String>,
}

/// Parse `<prefix>_<plantCode>[_<generatorId>]`. Plant codes compare as integers.
pub fn parse_plant_key(source_record_id: &str) -> Option<PlantKey> {
    let local = source_local_id(source_record_id)?;
    let (plant, generator) = match local.split_once('_') {
        Some((plant, generator)) => (plant, Some(generator)),
        None => (local, None),
    };
    let plant = plant.trim().parse::<u64>().ok()?;
    let generator = generator
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string);
    Some(PlantKey { plant, generator })
}

#[derive(Debug, Clone)]
struct Entry<'a> {
    record: usize,
    prefix: &'a str,
    key: PlantKey,
}

/// Run phase 1 over every configured scheme.
pub(super) fn match_identifiers(
    ctx: &MatchContext<'_>,
    schemes: &[IdentifierScheme],
) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::default();
    for scheme in schemes {
        match_scheme(ctx, scheme, &mut outcome);
    }
    outcome
}

fn match_scheme(ctx: &MatchContext<'_>, scheme: &IdentifierScheme, outcome: &mut PhaseOutcome) {
    let members: HashSet<String> = scheme
        .prefixes
        .iter()
        .map(|p| p.to_ascii_lowercase())
        .collect();
    let uses_equipment = ctx.equipment_scheme == Some(scheme.name.as_str());

    let mut entries: Vec<Entry<'_>> = Vec::new();
    for (idx, record) in ctx.records.iter() {
        if ctx.excluded.contains(&idx) {
            continue;
        }
        let prefix = source_prefix(&record.source_record_id);
        if members.contains(&prefix.to_ascii_lowercase()) {
            match parse_plant_key(&record.source_record_id) {
                Some(key) => entries.push(Entry {
                    record: idx,
                    prefix,
                    key,
                }),
                None => outcome.skipped += 1,
            }
        }
        if uses_equipment {
            for foreign in ctx.records.foreign_ids(idx) {
                if let Ok(plant) = foreign.trim().parse::<u64>() {
                    entries.push(Entry {
                        record: idx,
                        prefix,
                        key: PlantKey {
                            plant,
                            generator: None,
                        },
                    });
                }
            }
        }
    }

    let mut by_generator: HashMap<(u64, &str), Vec<usize>> = HashMap::new();
    let mut by_plant: HashMap<u64, Vec<usize>> = HashMap::new();
    for (pos, entry) in entries.iter().enumerate() {
        if let Some(generator) = entry.key.generator.as_deref() {
            by_generator
                .entry((entry.key.plant, generator))
                .or_default()
                .push(pos);
        }
        by_plant.entry(entry.key.plant).or_default().push(pos);
    }

    let cross_source = |entry: &Entry<'_>, other: &Entry<'_>| {
        other.record != entry.record && !other.prefix.eq_ignore_ascii_case(entry.prefix)
    };

    let before = outcome.pairs.len();
    for entry in &entries {
        let exact: Vec<usize> = entry
            .key
            .generator
            .as_deref()
            .and_then(|generator| by_generator.get(&(entry.key.plant, generator)))
            .map(|hits| {
                hits.iter()
                    .copied()
                    .filter(|&pos| cross_source(entry, &entries[pos]))
                    .collect()
            })
            .unwrap_or_default();

        let hits = if exact.is_empty() {
            by_plant
                .get(&entry.key.plant)
                .map(|hits| {
                    hits.iter()
                        .copied()
                        .filter(|&pos| cross_source(entry, &entries[pos]))
                        .collect()
                })
                .unwrap_or_default()
        } else {
            exact
        };

        for pos in hits {
            let pair = MatchPair::new(entry.record, entries[pos].record, MatchPhase::Identifier);
            outcome.pairs.push(pair);
            outcome.pairs.push(pair.reversed());
        }
    }

    debug!(
        scheme = %scheme.name,
        entries = entries.len(),
        pairs = outcome.pairs.len() - before,
        "Identifier scheme matched"
    );
}

//! # Matching Engine
//!
//! Three ordered phases decide which records describe the same site:
//! identifier matching (exact), proximity matching (high confidence) and
//! broad proximity (last resort). Each phase sees the records matched by the
//! phases before it and leaves them alone.
//!
//! Records that an earlier run already linked to another source (a stored
//! crossref other than their own key) are resolved: identifier matching
//! still sees them, the proximity phases do not. Proximity matching must
//! never read values an earlier run filled in.

mod broad;
mod identifier;
pub mod normalize;
mod proximity;

pub use identifier::{parse_plant_key, PlantKey};

use crate::config::MatchingConfig;
use crate::loader::RecordSet;
use crate::model::{MatchPair, MatchPhase};
use crate::tiers::TierMap;
use hashbrown::HashSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{info, instrument};

/// Which phases contribute pairs to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseSelection {
    One,
    Two,
    Three,
    #[default]
    All,
}

impl PhaseSelection {
    pub fn includes(self, phase: MatchPhase) -> bool {
        match self {
            Self::All => true,
            Self::One => phase == MatchPhase::Identifier,
            Self::Two => phase == MatchPhase::Proximity,
            Self::Three => phase == MatchPhase::BroadProximity,
        }
    }

    /// Last phase that has to run for this selection.
    fn last_phase(self) -> MatchPhase {
        match self {
            Self::One => MatchPhase::Identifier,
            Self::Two => MatchPhase::Proximity,
            Self::Three | Self::All => MatchPhase::BroadProximity,
        }
    }
}

impl FromStr for PhaseSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" => Ok(Self::One),
            "2" => Ok(Self::Two),
            "3" => Ok(Self::Three),
            "all" => Ok(Self::All),
            other => Err(format!("phase must be 1, 2, 3 or all, got '{other}'")),
        }
    }
}

/// Per-phase counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseStats {
    /// Directed pairs emitted (after de-duplication)
    pub pairs: usize,
    /// Records newly matched by this phase
    pub records_matched: usize,
    /// Candidates skipped for missing or unparsable data
    pub skipped: usize,
}

/// Result of a matching pass.
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    /// De-duplicated pairs in phase order
    pub pairs: Vec<MatchPair>,
    pub phases: BTreeMap<MatchPhase, PhaseStats>,
    /// Every record matched by any phase that ran
    pub matched: HashSet<usize>,
    /// Records resolved by an earlier run, withheld from the proximity phases
    pub linked: HashSet<usize>,
}

impl MatchReport {
    pub fn pairs_for(&self, phase: MatchPhase) -> impl Iterator<Item = &MatchPair> {
        self.pairs.iter().filter(move |pair| pair.phase == phase)
    }
}

/// Shared, read-only view handed to every phase.
pub(crate) struct MatchContext<'a> {
    pub records: &'a RecordSet,
    pub excluded: &'a HashSet<usize>,
    pub equipment_scheme: Option<&'a str>,
    pub tiers: &'a TierMap,
    pub cell_size_km: f64,
}

#[derive(Debug, Default)]
pub(crate) struct PhaseOutcome {
    pub pairs: Vec<MatchPair>,
    pub skipped: usize,
}

/// Runs the phases in order over one loaded record set.
pub struct MatchEngine<'a> {
    records: &'a RecordSet,
    config: &'a MatchingConfig,
    equipment_scheme: Option<&'a str>,
    tiers: TierMap,
}

impl<'a> MatchEngine<'a> {
    pub fn new(records: &'a RecordSet, config: &'a MatchingConfig) -> Self {
        Self {
            records,
            config,
            equipment_scheme: None,
            tiers: config.broad.tier_map(),
        }
    }

    /// Let records with equipment foreign ids join this identifier scheme.
    pub fn with_equipment_scheme(mut self, scheme: Option<&'a str>) -> Self {
        self.equipment_scheme = scheme;
        self
    }

    /// Run the phases needed by `selection`. Unselected earlier phases still
    /// run so later phases exclude what they would have matched.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self, selection: PhaseSelection) -> MatchReport {
        let mut report = MatchReport::default();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut excluded: HashSet<usize> = HashSet::new();
        let last = selection.last_phase();
        report.linked = self
            .records
            .iter()
            .filter(|(_, record)| record.is_linked())
            .map(|(idx, _)| idx)
            .collect();

        for phase in [
            MatchPhase::Identifier,
            MatchPhase::Proximity,
            MatchPhase::BroadProximity,
        ] {
            if phase > last {
                break;
            }
            if phase == MatchPhase::Proximity {
                excluded.extend(report.linked.iter().copied());
            }
            let ctx = MatchContext {
                records: self.records,
                excluded: &excluded,
                equipment_scheme: self.equipment_scheme,
                tiers: &self.tiers,
                cell_size_km: self.config.cell_size_km,
            };
            let outcome = match phase {
                MatchPhase::Identifier => {
                    identifier::match_identifiers(&ctx, &self.config.identifier.schemes)
                }
                MatchPhase::Proximity => proximity::match_proximity(&ctx, &self.config.proximity),
                MatchPhase::BroadProximity => broad::match_broad(&ctx, &self.config.broad),
            };

            let mut stats = PhaseStats {
                skipped: outcome.skipped,
                ..PhaseStats::default()
            };
            let mut newly_matched: HashSet<usize> = HashSet::new();
            for pair in outcome.pairs {
                if pair.target == pair.source || !seen.insert((pair.target, pair.source)) {
                    continue;
                }
                newly_matched.insert(pair.target);
                newly_matched.insert(pair.source);
                if selection.includes(phase) {
                    stats.pairs += 1;
                    report.pairs.push(pair);
                }
            }
            stats.records_matched = newly_matched.len();
            excluded.extend(newly_matched.iter().copied());
            report.matched.extend(newly_matched);

            info!(
                phase = phase.number(),
                pairs = stats.pairs,
                records = stats.records_matched,
                skipped = stats.skipped,
                emitted = selection.includes(phase),
                "Matching phase complete"
            );
            report.phases.insert(phase, stats);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::EquipmentIndex;
    use crate::model::{InstallationRecord, LocationPrecision};

    const KM_PER_DEGREE: f64 = 111.32;

    fn record(id: &str, key: &str) -> InstallationRecord {
        InstallationRecord::new(id, key)
    }

    fn located(id: &str, key: &str, lat: f64, lon: f64, mw: f64) -> InstallationRecord {
        let mut r = record(id, key);
        r.latitude = Some(lat);
        r.longitude = Some(lon);
        r.location_precision = Some(LocationPrecision::Exact);
        r.capacity_mw = Some(mw);
        r
    }

    fn set(records: Vec<InstallationRecord>) -> RecordSet {
        RecordSet::from_records(records, EquipmentIndex::new())
    }

    fn directed(report: &MatchReport) -> Vec<(usize, usize, MatchPhase)> {
        report
            .pairs
            .iter()
            .map(|p| (p.target, p.source, p.phase))
            .collect()
    }

    #[test]
    fn test_phase_selection_parse() {
        assert_eq!("all".parse::<PhaseSelection>(), Ok(PhaseSelection::All));
        assert_eq!("2".parse::<PhaseSelection>(), Ok(PhaseSelection::Two));
        assert!("4".parse::<PhaseSelection>().is_err());
    }

    #[test]
    fn test_identifier_match_is_symmetric() {
        let records = set(vec![
            record("1", "eia860_4321_GEN1"),
            record("2", "eia860m_4321_GEN1"),
            record("3", "eia860m_9999_GEN1"),
        ]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::One);
        let pairs = directed(&report);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&(0, 1, MatchPhase::Identifier)));
        assert!(pairs.contains(&(1, 0, MatchPhase::Identifier)));
        assert_eq!(report.phases[&MatchPhase::Identifier].records_matched, 2);
    }

    #[test]
    fn test_identifier_prefers_generator_then_plant() {
        let records = set(vec![
            record("1", "eia860_10_A"),
            record("2", "eia860m_10_A"),
            record("3", "eia860m_10_B"),
            record("4", "eia860m_20"),
            record("5", "eia860_20_X"),
        ]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::One);
        let pairs = directed(&report);
        // 10_A pairs exactly with its generator twin.
        assert!(pairs.contains(&(0, 1, MatchPhase::Identifier)));
        // 10_B has no generator twin and falls back to the plant.
        assert!(pairs.contains(&(2, 0, MatchPhase::Identifier)));
        // Plant-only key on one side.
        assert!(pairs.contains(&(3, 4, MatchPhase::Identifier)));
        assert!(pairs.contains(&(4, 3, MatchPhase::Identifier)));
    }

    #[test]
    fn test_identifier_same_prefix_and_garbage_skipped() {
        let records = set(vec![
            record("1", "eia860_10_A"),
            record("2", "eia860_10_B"),
            record("3", "eia860_notaplant"),
        ]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::One);
        assert!(report.pairs.is_empty());
        assert_eq!(report.phases[&MatchPhase::Identifier].skipped, 1);
    }

    #[test]
    fn test_equipment_foreign_ids_join_scheme() {
        let records = vec![record("1", "eia860_4321_1"), record("77", "lbnl_abc")];
        let mut equipment = EquipmentIndex::new();
        equipment.add(crate::model::RecordId::new("77"), "4321");
        let records = RecordSet::from_records(records, equipment);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config)
            .with_equipment_scheme(Some("eia"))
            .run(PhaseSelection::One);
        assert_eq!(report.pairs.len(), 2);

        let without = MatchEngine::new(&records, &config).run(PhaseSelection::One);
        assert!(without.pairs.is_empty());
    }

    #[test]
    fn test_city_match_requires_capacity() {
        let mut federal = record("1", "uspvdb_1");
        federal.state = Some("ca".into());
        federal.city = Some("City of Fresno".into());
        federal.capacity_mw = Some(10.0);
        let mut close = record("2", "cadg_9");
        close.state = Some("CA".into());
        close.city = Some("Fresno".into());
        close.capacity_mw = Some(6.0);
        let mut far = record("3", "nysun_4");
        far.state = Some("CA".into());
        far.city = Some("Fresno".into());
        far.capacity_mw = Some(4.0);

        let records = set(vec![federal, close, far]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::Two);
        let pairs = directed(&report);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&(0, 1, MatchPhase::Proximity)));
        assert!(pairs.contains(&(1, 0, MatchPhase::Proximity)));
    }

    #[test]
    fn test_coordinate_match_prefers_capacity_confirmed() {
        let lat = 35.0;
        let records = set(vec![
            located("1", "uspvdb_1", lat, -100.0, 50.0),
            located("2", "uspvdb_2", lat + 0.3 / KM_PER_DEGREE, -100.0, 5.0),
            located("3", "eia860_77_1", lat + 0.1 / KM_PER_DEGREE, -100.0, 5.5),
        ]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::Two);
        let pairs = directed(&report);
        // Nearest is uspvdb_1 but only uspvdb_2 agrees on capacity.
        assert!(pairs.contains(&(1, 2, MatchPhase::Proximity)));
        assert!(pairs.contains(&(2, 1, MatchPhase::Proximity)));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_earlier_phase_excludes_later() {
        let lat = 35.0;
        let records = set(vec![
            located("1", "uspvdb_1", lat, -100.0, 5.0),
            located("2", "eia860_77_1", lat, -100.0, 5.0),
            located("3", "eia860m_77_1", lat + 5.0, -100.0, 5.0),
        ]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::All);
        assert!(report.pairs_for(MatchPhase::Proximity).next().is_none());
        assert_eq!(report.pairs_for(MatchPhase::Identifier).count(), 2);
    }

    #[test]
    fn test_broad_same_prefix_never_matches() {
        let lat = 40.0;
        let records = set(vec![
            located("1", "tts3_1", lat, -75.0, 1.0),
            located("2", "tts3_2", lat + 0.4 / KM_PER_DEGREE, -75.0, 1.0),
        ]);
        let mut config = MatchingConfig::default();
        config.broad.target_tier = crate::tiers::Tier::StateRegistry;
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::Three);
        assert!(report.pairs.is_empty());
    }

    #[test]
    fn test_broad_is_one_directional_and_tight() {
        let lat = 40.0;
        let records = set(vec![
            located("1", "lbnl_1", lat, -75.0, 10.0),
            located("2", "tts3_2", lat + 0.4 / KM_PER_DEGREE, -75.0, 8.0),
            located("3", "nrel_3", lat + 20.0, -75.0, 10.0),
            located("4", "nysun_4", lat + 20.0 + 0.2 / KM_PER_DEGREE, -75.0, 6.0),
        ]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::Three);
        let pairs = directed(&report);
        assert_eq!(pairs, vec![(0, 1, MatchPhase::BroadProximity)]);
    }

    #[test]
    fn test_unselected_phase_still_excludes() {
        let lat = 35.0;
        let records = set(vec![
            located("1", "eia860_77_1", lat, -100.0, 5.0),
            located("2", "eia860m_77_1", lat, -100.0, 5.0),
            located("3", "tts3_1", lat, -100.0, 5.0),
        ]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::Three);
        assert!(report.pairs.is_empty());
        assert!(report.matched.contains(&0));
    }

    #[test]
    fn test_linked_records_skip_proximity_phases() {
        let lat = 36.7;
        let mut federal = located("1", "uspvdb_1", lat, -119.8, 10.0);
        federal.state = Some("CA".into());
        federal.city = Some("Fresno".into());
        federal.crossref_ids = vec!["tts3_000001".into()];
        let mut program = located("2", "tts3_000001", lat + 0.3 / KM_PER_DEGREE, -119.8, 9.0);
        program.city = Some("Fresno".into());
        let mut state = record("3", "cadg_2");
        state.state = Some("CA".into());
        state.city = Some("Fresno".into());
        state.capacity_mw = Some(10.0);
        let mut twin = record("4", "eia860_55_1");
        twin.crossref_ids = vec!["eia860m_55_1".into()];
        let monthly = record("5", "eia860m_55_1");

        let records = set(vec![federal, program, state, twin, monthly]);
        let config = MatchingConfig::default();
        let report = MatchEngine::new(&records, &config).run(PhaseSelection::All);
        assert_eq!(report.linked.len(), 2);
        // Keys never change, so identifier pairs come back as before.
        assert_eq!(report.pairs_for(MatchPhase::Identifier).count(), 2);
        assert!(report.pairs_for(MatchPhase::Proximity).next().is_none());
        assert!(report.pairs_for(MatchPhase::BroadProximity).next().is_none());

        // The same records without stored crossrefs do match by city.
        let mut fresh: Vec<_> = records.records().to_vec();
        fresh.iter_mut().for_each(|r| r.crossref_ids.clear());
        let report = MatchEngine::new(&set(fresh), &config).run(PhaseSelection::All);
        assert!(report.pairs_for(MatchPhase::Proximity).next().is_some());
    }
}

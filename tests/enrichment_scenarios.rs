#[path = "../src/test_support.rs"]
mod test_support;

use std::sync::Arc;

use solarlink_rs::model::{InstallationRecord, LocationPrecision};
use solarlink_rs::{MatchPhase, PhaseSelection, Solarlink, SolarlinkConfig};
use test_support::{by_key, located, seeded_store};

const KM_PER_DEGREE: f64 = 111.32;

fn engine(store: solarlink_rs::MemoryStore) -> (Arc<solarlink_rs::MemoryStore>, Solarlink) {
    let store = Arc::new(store);
    let engine = Solarlink::new(store.clone(), SolarlinkConfig::default()).unwrap();
    (store, engine)
}

fn in_city(mut record: InstallationRecord, city: &str, state: &str) -> InstallationRecord {
    record.city = Some(city.into());
    record.state = Some(state.into());
    record
}

#[tokio::test]
async fn exact_key_match_fills_owner_and_crossref() -> anyhow::Result<()> {
    let target = InstallationRecord::new("", "eia860_4321_GEN1");
    let mut source = InstallationRecord::new("", "eia860m_4321_GEN1");
    source.owner_name = Some("Acme Solar".into());

    let (store, _) = seeded_store(&[target, source]);
    let (store, engine) = engine(store);
    let summary = engine.run(PhaseSelection::All, false).await?;

    assert_eq!(summary.phases[&MatchPhase::Identifier].pairs, 2);
    let target = by_key(&store, "eia860_4321_GEN1").unwrap();
    assert_eq!(target.owner_name.as_deref(), Some("Acme Solar"));
    assert_eq!(target.crossref_ids, vec!["eia860m_4321_GEN1".to_string()]);

    let source = by_key(&store, "eia860m_4321_GEN1").unwrap();
    assert_eq!(source.owner_name.as_deref(), Some("Acme Solar"));
    assert_eq!(source.crossref_ids, vec!["eia860_4321_GEN1".to_string()]);
    Ok(())
}

#[tokio::test]
async fn exact_source_fills_missing_coordinates() -> anyhow::Result<()> {
    let mut target = InstallationRecord::new("", "tts3_000123");
    target.location_precision = Some(LocationPrecision::City);
    target.capacity_mw = Some(5.0);
    let mut source = located("uspvdb_77", 40.0, -75.0, 5.0);
    source.location_precision = Some(LocationPrecision::Exact);

    let (store, _) = seeded_store(&[
        in_city(target, "Lancaster", "PA"),
        in_city(source, "Lancaster", "PA"),
    ]);
    let (store, engine) = engine(store);
    engine.run(PhaseSelection::All, false).await?;

    let target = by_key(&store, "tts3_000123").unwrap();
    assert_eq!(target.latitude, Some(40.0));
    assert_eq!(target.longitude, Some(-75.0));
    assert_eq!(target.location_precision, Some(LocationPrecision::Exact));
    Ok(())
}

#[tokio::test]
async fn exact_target_keeps_its_location() -> anyhow::Result<()> {
    let mut target = located("uspvdb_77", 40.0, -75.0, 5.0);
    target.location_precision = Some(LocationPrecision::Exact);
    let mut source = located("tts3_000123", 40.01, -75.01, 5.0);
    source.location_precision = Some(LocationPrecision::City);

    let (store, _) = seeded_store(&[
        in_city(target, "Lancaster", "PA"),
        in_city(source, "Lancaster", "PA"),
    ]);
    let (store, engine) = engine(store);
    let summary = engine.run(PhaseSelection::All, false).await?;
    assert_eq!(summary.phases[&MatchPhase::Proximity].pairs, 2);

    let target = by_key(&store, "uspvdb_77").unwrap();
    assert_eq!(target.latitude, Some(40.0));
    assert_eq!(target.longitude, Some(-75.0));
    assert_eq!(target.location_precision, Some(LocationPrecision::Exact));
    assert_eq!(target.crossref_ids, vec!["tts3_000123".to_string()]);
    Ok(())
}

#[tokio::test]
async fn same_prefix_neighbours_are_never_matched() -> anyhow::Result<()> {
    let north = 0.4 / KM_PER_DEGREE;
    let a = located("tts3_000001", 35.0, -110.0, 8.0);
    let b = located("tts3_000002", 35.0 + north, -110.0, 8.0);

    let (store, _) = seeded_store(&[a, b]);
    let (store, engine) = engine(store);
    let summary = engine.run(PhaseSelection::All, false).await?;

    assert_eq!(summary.phases[&MatchPhase::BroadProximity].pairs, 0);
    assert_eq!(summary.apply.attempted, 0);
    assert!(by_key(&store, "tts3_000001").unwrap().crossref_ids.is_empty());
    assert!(by_key(&store, "tts3_000002").unwrap().crossref_ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn broad_match_across_tiers_enriches_federal_target() -> anyhow::Result<()> {
    let north = 0.4 / KM_PER_DEGREE;
    let federal = located("lbnl_9001", 35.0, -110.0, 8.0);
    let mut state = located("tts3_000002", 35.0 + north, -110.0, 7.0);
    state.installer_name = Some("Sunward Installers".into());

    let (store, _) = seeded_store(&[federal, state]);
    let (store, engine) = engine(store);
    let summary = engine.run(PhaseSelection::All, false).await?;
    assert_eq!(summary.phases[&MatchPhase::BroadProximity].pairs, 1);

    let federal = by_key(&store, "lbnl_9001").unwrap();
    assert_eq!(federal.installer_name.as_deref(), Some("Sunward Installers"));
    assert_eq!(federal.crossref_ids, vec!["tts3_000002".to_string()]);

    let state = by_key(&store, "tts3_000002").unwrap();
    assert!(state.crossref_ids.is_empty());
    Ok(())
}

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use solarlink_rs::model::{InstallationRecord, LocationPrecision, RecordId};
use solarlink_rs::store::MemoryStore;

pub const TABLE: &str = "solar_installations";

const KM_PER_DEGREE: f64 = 111.32;

#[derive(Debug, Clone)]
pub struct GeneratedDataset {
    pub records: Vec<InstallationRecord>,
    #[allow(dead_code)]
    pub sites: usize,
}

/// Synthetic registry data: every site has a federal registry record, and
/// with `overlap_probability` each of the other sources also reports it.
///
/// Sites sit on a ~10 km lattice so records of different sites never fall
/// inside any matching radius of each other.
pub fn generate_dataset(sites: usize, overlap_probability: f64, seed: u64) -> GeneratedDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut records = Vec::new();

    for i in 0..sites {
        let lat = 30.0 + (i / 40) as f64 * 0.1;
        let lon = -100.0 + (i % 40) as f64 * 0.1;
        let capacity = rng.random_range(1.0..200.0);
        let plant = 10_000 + i;
        let city = town_name(i);

        let mut registry = located(format!("eia860_{plant}_PV1"), lat, lon, capacity);
        registry.location_precision = Some(LocationPrecision::Address);
        registry.city = Some(city.clone());
        registry.state = Some("TX".into());
        if rng.random_bool(0.5) {
            registry.owner_name = Some(format!("Owner {i}"));
        }
        records.push(registry);

        if rng.random_bool(overlap_probability) {
            let mut monthly = located(format!("eia860m_{plant}_PV1"), lat, lon, capacity);
            monthly.location_precision = Some(LocationPrecision::Address);
            monthly.city = Some(city.clone());
            monthly.state = Some("TX".into());
            monthly.owner_name = Some(format!("Owner {i}"));
            monthly.operator_name = Some(format!("Operator {i}"));
            records.push(monthly);
        }

        let (db_lat, db_lon) = (lat + 0.1 / KM_PER_DEGREE, lon);
        if rng.random_bool(overlap_probability) {
            let mut db = located(
                format!("uspvdb_{}", 500_000 + i),
                db_lat,
                db_lon,
                capacity * rng.random_range(0.95..1.05),
            );
            db.location_precision = Some(LocationPrecision::Exact);
            db.city = Some(city.clone());
            db.state = Some("TX".into());
            db.total_cost = Some((capacity * 1.1e6).round());
            records.push(db);
        }

        if rng.random_bool(overlap_probability) {
            let mut program = InstallationRecord::new("", format!("tts3_{i:06}"));
            program.capacity_mw = Some(capacity * rng.random_range(0.9..1.1));
            program.city = Some(city.clone());
            program.state = Some("TX".into());
            program.location_precision = Some(LocationPrecision::City);
            program.installer_name = Some(format!("Installer {}", i % 17));
            program.cost_per_watt = Some(rng.random_range(1.5..3.5));
            records.push(program);
        }

        if rng.random_bool(overlap_probability) {
            let east = 0.3 / (KM_PER_DEGREE * db_lat.to_radians().cos());
            let mut incentive = located(
                format!("nysun_{i}"),
                db_lat,
                db_lon + east,
                capacity * rng.random_range(0.9..1.0),
            );
            // Incentive programs report a zip code but no city.
            incentive.location_precision = Some(LocationPrecision::Zip);
            incentive.zip_code = Some(format!("{:05}", 75_000 + i));
            incentive.state = Some("TX".into());
            incentive.developer_name = Some(format!("Developer {}", i % 11));
            records.push(incentive);
        }
    }

    GeneratedDataset { records, sites }
}

/// Record without an id; the store assigns one on insert.
pub fn located(key: impl Into<String>, lat: f64, lon: f64, capacity: f64) -> InstallationRecord {
    let mut record = InstallationRecord::new("", key);
    record.latitude = Some(lat);
    record.longitude = Some(lon);
    record.capacity_mw = Some(capacity);
    record
}

/// Fresh memory store holding `records` in the installations table.
pub fn seeded_store(records: &[InstallationRecord]) -> (MemoryStore, Vec<RecordId>) {
    let store = MemoryStore::new();
    let ids = store.insert_records(TABLE, records);
    (store, ids)
}

/// Installation looked up by natural key.
#[allow(dead_code)]
pub fn by_key(store: &MemoryStore, key: &str) -> Option<InstallationRecord> {
    store
        .records::<InstallationRecord>(TABLE)
        .into_iter()
        .find(|record| record.source_record_id == key)
}

/// Distinct letters-only city name for site `i`.
fn town_name(mut i: usize) -> String {
    let mut name = String::new();
    loop {
        name.insert(0, (b'a' + (i % 26) as u8) as char);
        i /= 26;
        if i == 0 {
            break;
        }
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{}{} Springs", first.to_ascii_uppercase(), chars.as_str()),
        None => "Springs".to_string(),
    }
}

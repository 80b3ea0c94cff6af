//! Default constants for solarlink configuration.
//!
//! All tuned numbers are centralized here with documentation.

// =============================================================================
// Store Defaults
// =============================================================================

/// Canonical installation table
pub const DEFAULT_INSTALLATIONS_TABLE: &str = "solar_installations";

/// Equipment table carrying foreign plant codes
pub const DEFAULT_EQUIPMENT_TABLE: &str = "solar_equipment";

/// Environment variable holding the store API key
pub const DEFAULT_API_KEY_ENV: &str = "SOLARLINK_STORE_KEY";

/// Per-request timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Retries after the first attempt of a store call
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff delay; doubles on every retry
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;

// =============================================================================
// Loader Defaults
// =============================================================================

/// Records requested per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Consecutive failed pages after which paging gives up
pub const DEFAULT_MAX_CONSECUTIVE_FAILED_PAGES: usize = 3;

/// Equipment column holding the foreign plant code
pub const DEFAULT_EQUIPMENT_FOREIGN_FIELD: &str = "eia_plant_code";

/// Identifier scheme fed by equipment foreign ids
pub const DEFAULT_EQUIPMENT_SCHEME: &str = "eia";

// =============================================================================
// Matching Defaults
// =============================================================================

/// Grid cell edge in kilometres (about 0.01 degree of latitude)
pub const DEFAULT_CELL_SIZE_KM: f64 = 1.1;

/// Phase 2 capacity ratio tolerance
pub const DEFAULT_PROXIMITY_CAPACITY_TOLERANCE: f64 = 0.5;

/// Phase 2 coordinate search radius in kilometres
pub const DEFAULT_PROXIMITY_RADIUS_KM: f64 = 0.75;

/// Phase 3 capacity ratio tolerance; tighter because nothing else corroborates the match
pub const DEFAULT_BROAD_CAPACITY_TOLERANCE: f64 = 0.25;

/// Phase 3 search radius in kilometres
pub const DEFAULT_BROAD_RADIUS_KM: f64 = 0.5;

/// Mean Earth radius used for haversine distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// =============================================================================
// Apply Defaults
// =============================================================================

/// Concurrent patch writes
pub const DEFAULT_APPLY_CONCURRENCY: usize = 16;

/// Patches shown by a dry run
pub const DEFAULT_DRY_RUN_SAMPLE: usize = 5;

// =============================================================================
// Source Catalogue Defaults
// =============================================================================

/// Sources sharing the EIA plant/generator numbering.
pub fn default_eia_prefixes() -> Vec<String> {
    to_strings(&["eia860", "eia860m"])
}

/// Federal and national datasets.
pub fn default_federal_prefixes() -> Vec<String> {
    to_strings(&["eia860", "eia860m", "uspvdb", "lbnl", "nrel"])
}

/// State program registries.
pub fn default_state_prefixes() -> Vec<String> {
    to_strings(&[
        "tts3",
        "cadg",
        "nysun",
        "njcep",
        "masmart",
        "ilshines",
        "ctgreen",
    ])
}

pub(crate) fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

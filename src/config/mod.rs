//! Layered configuration for solarlink runs.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (solarlink.toml)
//! ```toml
//! [store]
//! base_url = "https://registry.example.org/rest/v1"
//! installations_table = "solar_installations"
//!
//! [matching]
//! cell_size_km = 1.1
//!
//! [matching.broad]
//! radius_km = 0.5
//! capacity_tolerance = 0.25
//!
//! [[matching.identifier.schemes]]
//! name = "eia"
//! prefixes = ["eia860", "eia860m"]
//!
//! [apply]
//! concurrency = 16
//! ```
//!
//! Environment variables use the `SOLARLINK_` prefix with `__` between
//! sections, e.g. `SOLARLINK_APPLY__CONCURRENCY=8`.

mod defaults;

pub use defaults::*;

use crate::tiers::{Tier, TierMap};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a solarlink run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolarlinkConfig {
    /// Store accessor settings
    pub store: StoreConfig,
    /// Record loader settings
    pub loader: LoaderConfig,
    /// Matching phase tuning
    pub matching: MatchingConfig,
    /// Patch applicator settings
    pub apply: ApplyConfig,
}

impl SolarlinkConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(SolarlinkConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with SOLARLINK_ prefix
        figment = figment.merge(Env::prefixed("SOLARLINK_").split("__"));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: SolarlinkConfig = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerances = [
            ("matching.proximity.capacity_tolerance", self.matching.proximity.capacity_tolerance),
            ("matching.broad.capacity_tolerance", self.matching.broad.capacity_tolerance),
        ];
        for (name, value) in tolerances {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigError::new(format!(
                    "{name} must be in [0, 1), got {value}"
                )));
            }
        }

        let mut distances = vec![
            ("matching.cell_size_km", self.matching.cell_size_km),
            ("matching.proximity.radius_km", self.matching.proximity.radius_km),
            ("matching.broad.radius_km", self.matching.broad.radius_km),
        ];
        for rule in &self.matching.proximity.coordinate_rules {
            if let Some(radius) = rule.radius_km {
                distances.push(("matching.proximity.coordinate_rules.radius_km", radius));
            }
        }
        for (name, value) in distances {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::new(format!("{name} must be positive, got {value}")));
            }
        }

        if self.matching.broad.target_tier == Tier::Unclassified {
            return Err(ConfigError::new(
                "matching.broad.target_tier must be federal or state_registry",
            ));
        }
        if self.apply.concurrency == 0 {
            return Err(ConfigError::new("apply.concurrency must be at least 1"));
        }
        if self.loader.page_size == 0 {
            return Err(ConfigError::new("loader.page_size must be at least 1"));
        }
        if let Some(scheme) = &self.loader.equipment_scheme {
            if !self
                .matching
                .identifier
                .schemes
                .iter()
                .any(|candidate| &candidate.name == scheme)
            {
                return Err(ConfigError::new(format!(
                    "loader.equipment_scheme '{scheme}' is not a configured identifier scheme"
                )));
            }
        }
        Ok(())
    }
}

/// Store accessor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// REST endpoint root; unset means no remote store
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Canonical installation table
    pub installations_table: String,
    /// Equipment table used for foreign ids
    pub equipment_table: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            installations_table: DEFAULT_INSTALLATIONS_TABLE.to_string(),
            equipment_table: DEFAULT_EQUIPMENT_TABLE.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Record loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub page_size: usize,
    pub max_consecutive_failed_pages: usize,
    /// Equipment column holding a foreign plant code
    pub equipment_foreign_field: String,
    /// Identifier scheme the equipment plant codes belong to; unset disables the lookup
    pub equipment_scheme: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_consecutive_failed_pages: DEFAULT_MAX_CONSECUTIVE_FAILED_PAGES,
            equipment_foreign_field: DEFAULT_EQUIPMENT_FOREIGN_FIELD.to_string(),
            equipment_scheme: Some(DEFAULT_EQUIPMENT_SCHEME.to_string()),
        }
    }
}

/// Matching engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Spatial grid cell edge in kilometres
    pub cell_size_km: f64,
    pub identifier: IdentifierConfig,
    pub proximity: ProximityConfig,
    pub broad: BroadConfig,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            cell_size_km: DEFAULT_CELL_SIZE_KM,
            identifier: IdentifierConfig::default(),
            proximity: ProximityConfig::default(),
            broad: BroadConfig::default(),
        }
    }
}

/// Phase 1: sources sharing a registry numbering scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
    pub schemes: Vec<IdentifierScheme>,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            schemes: vec![IdentifierScheme {
                name: DEFAULT_EQUIPMENT_SCHEME.to_string(),
                prefixes: default_eia_prefixes(),
            }],
        }
    }
}

/// Natural keys of these prefixes follow `<prefix>_<plantCode>[_<generatorId>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierScheme {
    pub name: String,
    pub prefixes: Vec<String>,
}

/// Phase 2 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    pub capacity_tolerance: f64,
    /// Default coordinate search radius
    pub radius_km: f64,
    /// Accept the merely-nearest neighbour when capacity cannot be compared
    pub allow_nearest_fallback: bool,
    pub city_rules: Vec<CityRule>,
    pub coordinate_rules: Vec<CoordinateRule>,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            capacity_tolerance: DEFAULT_PROXIMITY_CAPACITY_TOLERANCE,
            radius_km: DEFAULT_PROXIMITY_RADIUS_KM,
            allow_nearest_fallback: false,
            city_rules: vec![CityRule {
                indexed_prefixes: default_federal_prefixes(),
                query_prefixes: default_state_prefixes(),
            }],
            coordinate_rules: vec![CoordinateRule {
                indexed_prefixes: defaults::to_strings(&["uspvdb"]),
                query_prefixes: defaults::to_strings(&["eia860", "eia860m", "lbnl"]),
                radius_km: None,
            }],
        }
    }
}

/// Match query records to indexed records sharing `(state, city)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRule {
    pub indexed_prefixes: Vec<String>,
    pub query_prefixes: Vec<String>,
}

/// Match query records to the nearest indexed record within a radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRule {
    pub indexed_prefixes: Vec<String>,
    pub query_prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
}

/// Phase 3 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadConfig {
    pub radius_km: f64,
    pub capacity_tolerance: f64,
    /// Tier whose records receive phase 3 enrichment
    pub target_tier: Tier,
    pub federal_prefixes: Vec<String>,
    pub state_prefixes: Vec<String>,
}

impl Default for BroadConfig {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_BROAD_RADIUS_KM,
            capacity_tolerance: DEFAULT_BROAD_CAPACITY_TOLERANCE,
            target_tier: Tier::Federal,
            federal_prefixes: default_federal_prefixes(),
            state_prefixes: default_state_prefixes(),
        }
    }
}

impl BroadConfig {
    pub fn tier_map(&self) -> TierMap {
        TierMap::new(&self.federal_prefixes, &self.state_prefixes)
    }
}

/// Patch applicator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub concurrency: usize,
    pub dry_run_sample: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_APPLY_CONCURRENCY,
            dry_run_sample: DEFAULT_DRY_RUN_SAMPLE,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

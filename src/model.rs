//! # Data Model
//!
//! Core data structures for cross-source site resolution: the canonical
//! installation record, source-qualified natural keys, the ordered location
//! precision scale, match pairs and the minimal patches written back to the store.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum number of crossref ids carried by a record.
pub const CROSSREF_CAP: usize = 20;

/// Opaque store-assigned identifier for a canonical record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Stores hand back integer or uuid primary keys.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(value) => RecordId(value.to_string()),
            Raw::Text(value) => RecordId(value),
        })
    }
}

/// Returns the leading token of a natural key (`<prefix>_<local-id>`).
pub fn source_prefix(source_record_id: &str) -> &str {
    source_record_id
        .split_once('_')
        .map(|(prefix, _)| prefix)
        .unwrap_or(source_record_id)
}

/// Returns the source-local part of a natural key, if any.
pub fn source_local_id(source_record_id: &str) -> Option<&str> {
    source_record_id
        .split_once('_')
        .map(|(_, local)| local)
        .filter(|local| !local.is_empty())
}

/// Ordered confidence level of a record's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationPrecision {
    State,
    County,
    Zip,
    City,
    Address,
    Exact,
}

impl LocationPrecision {
    pub const MAX: LocationPrecision = LocationPrecision::Exact;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::County => "county",
            Self::Zip => "zip",
            Self::City => "city",
            Self::Address => "address",
            Self::Exact => "exact",
        }
    }

    /// True when `self` strictly outranks `other`; an absent precision is outranked by everything.
    pub fn outranks(self, other: Option<LocationPrecision>) -> bool {
        match other {
            Some(current) => self > current,
            None => true,
        }
    }
}

impl fmt::Display for LocationPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(Self::State),
            "county" => Ok(Self::County),
            "zip" | "zipcode" | "zip_code" => Ok(Self::Zip),
            "city" => Ok(Self::City),
            "address" => Ok(Self::Address),
            "exact" => Ok(Self::Exact),
            other => Err(format!("unknown location precision '{other}'")),
        }
    }
}

fn lenient_precision<'de, D>(deserializer: D) -> Result<Option<LocationPrecision>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default())
}

/// A scalar value copied between records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    fn from_text(value: Option<&str>) -> Option<Self> {
        value
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| FieldValue::Text(text.to_string()))
    }

    fn from_number(value: Option<f64>) -> Option<Self> {
        value.filter(|n| n.is_finite()).map(FieldValue::Number)
    }

    fn to_json(&self) -> Value {
        match self {
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(text) => Value::String(text.clone()),
        }
    }
}

/// Scalar fields eligible for fill-only enrichment, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarField {
    OwnerName,
    OperatorName,
    DeveloperName,
    InstallerName,
    Address,
    City,
    County,
    ZipCode,
    InstallDate,
    InterconnectionDate,
    TotalCost,
    CostPerWatt,
}

impl ScalarField {
    pub const ALL: [ScalarField; 12] = [
        ScalarField::OwnerName,
        ScalarField::OperatorName,
        ScalarField::DeveloperName,
        ScalarField::InstallerName,
        ScalarField::Address,
        ScalarField::City,
        ScalarField::County,
        ScalarField::ZipCode,
        ScalarField::InstallDate,
        ScalarField::InterconnectionDate,
        ScalarField::TotalCost,
        ScalarField::CostPerWatt,
    ];

    /// Store column name.
    pub fn column(self) -> &'static str {
        match self {
            Self::OwnerName => "owner_name",
            Self::OperatorName => "operator_name",
            Self::DeveloperName => "developer_name",
            Self::InstallerName => "installer_name",
            Self::Address => "address",
            Self::City => "city",
            Self::County => "county",
            Self::ZipCode => "zip_code",
            Self::InstallDate => "install_date",
            Self::InterconnectionDate => "interconnection_date",
            Self::TotalCost => "total_cost",
            Self::CostPerWatt => "cost_per_watt",
        }
    }
}

impl fmt::Display for ScalarField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// The canonical site entity as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationRecord {
    pub id: RecordId,
    pub source_record_id: String,
    pub site_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(deserialize_with = "lenient_precision")]
    pub location_precision: Option<LocationPrecision>,
    pub capacity_mw: Option<f64>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub zip_code: Option<String>,
    pub address: Option<String>,
    pub install_date: Option<String>,
    pub interconnection_date: Option<String>,
    pub owner_name: Option<String>,
    pub operator_name: Option<String>,
    pub developer_name: Option<String>,
    pub installer_name: Option<String>,
    pub total_cost: Option<f64>,
    pub cost_per_watt: Option<f64>,
    #[serde(deserialize_with = "null_as_empty")]
    pub crossref_ids: Vec<String>,
}

impl Default for RecordId {
    fn default() -> Self {
        RecordId(String::new())
    }
}

impl InstallationRecord {
    /// Create a record with only its natural key set.
    pub fn new(id: impl Into<String>, source_record_id: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(id),
            source_record_id: source_record_id.into(),
            ..Self::default()
        }
    }

    /// Store columns the engine reads.
    pub fn columns() -> Vec<&'static str> {
        let mut columns = vec![
            "id",
            "source_record_id",
            "site_name",
            "latitude",
            "longitude",
            "location_precision",
            "capacity_mw",
            "state",
        ];
        columns.extend(ScalarField::ALL.iter().map(|field| field.column()));
        columns.push("crossref_ids");
        columns
    }

    pub fn source_prefix(&self) -> &str {
        source_prefix(&self.source_record_id)
    }

    /// Coordinates when both components are present and finite.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Capacity usable for comparisons; zero and negative values count as missing.
    pub fn usable_capacity(&self) -> Option<f64> {
        self.capacity_mw.filter(|mw| mw.is_finite() && *mw > 0.0)
    }

    /// Value an enrichable field can contribute to another record. Blank
    /// text contributes nothing.
    pub fn scalar(&self, field: ScalarField) -> Option<FieldValue> {
        match field {
            ScalarField::TotalCost => FieldValue::from_number(self.total_cost),
            ScalarField::CostPerWatt => FieldValue::from_number(self.cost_per_watt),
            text => FieldValue::from_text(self.text(text)),
        }
    }

    /// Whether the store holds a non-null value for `field`. Blank text is
    /// still a value and is never overwritten.
    pub fn is_set(&self, field: ScalarField) -> bool {
        match field {
            ScalarField::TotalCost => self.total_cost.is_some(),
            ScalarField::CostPerWatt => self.cost_per_watt.is_some(),
            text => self.text(text).is_some(),
        }
    }

    fn text(&self, field: ScalarField) -> Option<&str> {
        let value = match field {
            ScalarField::OwnerName => &self.owner_name,
            ScalarField::OperatorName => &self.operator_name,
            ScalarField::DeveloperName => &self.developer_name,
            ScalarField::InstallerName => &self.installer_name,
            ScalarField::Address => &self.address,
            ScalarField::City => &self.city,
            ScalarField::County => &self.county,
            ScalarField::ZipCode => &self.zip_code,
            ScalarField::InstallDate => &self.install_date,
            ScalarField::InterconnectionDate => &self.interconnection_date,
            ScalarField::TotalCost | ScalarField::CostPerWatt => return None,
        };
        value.as_deref()
    }

    /// Stored crossrefs without blanks, repeats or the record's own key,
    /// truncated to [`CROSSREF_CAP`].
    pub fn clean_crossrefs(&self) -> Vec<String> {
        let mut clean: Vec<String> = Vec::new();
        for key in &self.crossref_ids {
            if clean.len() == CROSSREF_CAP {
                break;
            }
            if key.is_empty() || *key == self.source_record_id || clean.contains(key) {
                continue;
            }
            clean.push(key.clone());
        }
        clean
    }

    /// True once an earlier run has linked this record to another source.
    pub fn is_linked(&self) -> bool {
        self.crossref_ids
            .iter()
            .any(|key| !key.is_empty() && *key != self.source_record_id)
    }
}

/// Matching phase that produced a pair. Ordering is merge priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchPhase {
    Identifier = 1,
    Proximity = 2,
    BroadProximity = 3,
}

impl MatchPhase {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier => write!(f, "phase 1 (identifier)"),
            Self::Proximity => write!(f, "phase 2 (proximity)"),
            Self::BroadProximity => write!(f, "phase 3 (broad proximity)"),
        }
    }
}

/// "source may enrich target". Indices refer to positions in the loaded record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchPair {
    pub target: usize,
    pub source: usize,
    pub phase: MatchPhase,
}

impl MatchPair {
    pub fn new(target: usize, source: usize, phase: MatchPhase) -> Self {
        Self {
            target,
            source,
            phase,
        }
    }

    pub fn reversed(&self) -> Self {
        Self {
            target: self.source,
            source: self.target,
            phase: self.phase,
        }
    }
}

/// New coordinates for a record, with the precision to adopt if it changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub precision: Option<LocationPrecision>,
}

/// Minimal partial update for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub fields: BTreeMap<ScalarField, FieldValue>,
    pub location: Option<LocationUpdate>,
    pub crossref_ids: Option<Vec<String>>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.location.is_none() && self.crossref_ids.is_none()
    }

    /// JSON body for a partial update.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut body = Map::new();
        for (field, value) in &self.fields {
            body.insert(field.column().to_string(), value.to_json());
        }
        if let Some(location) = &self.location {
            body.insert("latitude".into(), Value::from(location.latitude));
            body.insert("longitude".into(), Value::from(location.longitude));
            if let Some(precision) = location.precision {
                body.insert(
                    "location_precision".into(),
                    Value::String(precision.as_str().to_string()),
                );
            }
        }
        if let Some(crossrefs) = &self.crossref_ids {
            body.insert(
                "crossref_ids".into(),
                Value::Array(crossrefs.iter().cloned().map(Value::String).collect()),
            );
        }
        body
    }
}

//! # Source Tiers
//!
//! Coarse classification of source prefixes used by broad proximity matching
//! to keep two records from the same noisy category apart.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Federal and national datasets
    Federal,
    /// State program registries
    StateRegistry,
    Unclassified,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Federal => write!(f, "federal"),
            Self::StateRegistry => write!(f, "state_registry"),
            Self::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Maps every known source prefix to exactly one tier.
#[derive(Debug, Clone, Default)]
pub struct TierMap {
    tiers: HashMap<String, Tier>,
}

impl TierMap {
    /// Build from prefix lists. A prefix listed in both is treated as federal.
    pub fn new(federal: &[String], state: &[String]) -> Self {
        let mut tiers = HashMap::new();
        for prefix in state {
            tiers.insert(prefix.to_ascii_lowercase(), Tier::StateRegistry);
        }
        for prefix in federal {
            tiers.insert(prefix.to_ascii_lowercase(), Tier::Federal);
        }
        Self { tiers }
    }

    pub fn classify(&self, prefix: &str) -> Tier {
        self.tiers
            .get(prefix.to_ascii_lowercase().as_str())
            .copied()
            .unwrap_or(Tier::Unclassified)
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

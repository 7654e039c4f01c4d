//! The five-level storage ladder.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FabricError;

/// Storage tiers ordered by increasing latency and decreasing cost.
///
/// `RedHot` is the warmest tier (in-process vector index), `Glacier` the
/// coldest (remote object stores and external data sources). Promotion always
/// moves one step towards `RedHot`; demotion one step towards `Glacier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    RedHot,
    Hot,
    Warm,
    Cold,
    Glacier,
}

impl Tier {
    /// All tiers in priority order, warmest first.
    pub const ALL: [Tier; 5] = [Tier::RedHot, Tier::Hot, Tier::Warm, Tier::Cold, Tier::Glacier];

    /// Canonical lowercase name used in the catalog and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::RedHot => "red_hot",
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
            Tier::Glacier => "glacier",
        }
    }

    /// Position on the ladder; 0 is warmest.
    pub fn rank(&self) -> usize {
        match self {
            Tier::RedHot => 0,
            Tier::Hot => 1,
            Tier::Warm => 2,
            Tier::Cold => 3,
            Tier::Glacier => 4,
        }
    }

    /// The next warmer tier, if any.
    pub fn warmer(&self) -> Option<Tier> {
        match self {
            Tier::RedHot => None,
            Tier::Hot => Some(Tier::RedHot),
            Tier::Warm => Some(Tier::Hot),
            Tier::Cold => Some(Tier::Warm),
            Tier::Glacier => Some(Tier::Cold),
        }
    }

    /// The next colder tier, if any.
    pub fn colder(&self) -> Option<Tier> {
        match self {
            Tier::RedHot => Some(Tier::Hot),
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => Some(Tier::Glacier),
            Tier::Glacier => None,
        }
    }

    /// Whether moving `self → target` is a single-step promotion.
    pub fn is_adjacent_promotion(&self, target: Tier) -> bool {
        self.warmer() == Some(target)
    }

    /// Whether moving `self → target` is a single-step demotion.
    pub fn is_adjacent_demotion(&self, target: Tier) -> bool {
        self.colder() == Some(target)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red_hot" => Ok(Tier::RedHot),
            "hot" => Ok(Tier::Hot),
            "warm" => Ok(Tier::Warm),
            "cold" => Ok(Tier::Cold),
            "glacier" => Ok(Tier::Glacier),
            other => Err(FabricError::TierUnknown(other.to_string())),
        }
    }
}

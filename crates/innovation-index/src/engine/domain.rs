use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier wrapper for scored units. Ordering is the last ranking tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scoring period expressed as a calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(pub i32);

impl Period {
    pub const fn year(self) -> i32 {
        self.0
    }

    pub const fn previous(self) -> Self {
        Self(self.0 - 1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse size class used when grouping peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationBand {
    Small,
    Medium,
    Large,
    Metropolitan,
}

impl PopulationBand {
    pub const fn from_population(population: u64) -> Self {
        match population {
            0..=19_999 => Self::Small,
            20_000..=99_999 => Self::Medium,
            100_000..=499_999 => Self::Large,
            _ => Self::Metropolitan,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            PopulationBand::Small => "small",
            PopulationBand::Medium => "medium",
            PopulationBand::Large => "large",
            PopulationBand::Metropolitan => "metropolitan",
        }
    }
}

/// Structural attributes that drive peer grouping and similarity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProfile {
    pub unit_type: String,
    pub region: String,
    pub population: u64,
}

impl PeerProfile {
    pub const fn population_band(&self) -> PopulationBand {
        PopulationBand::from_population(self.population)
    }
}

/// Denormalized projection of a unit's most recent published result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatestScore {
    pub period: Period,
    pub overall: f64,
    pub national_rank: u32,
}

/// A scored organizational unit (municipality).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub active: bool,
    pub profile: PeerProfile,
    #[serde(default)]
    pub latest: Option<LatestScore>,
}

/// Peer group identity. Attributes excluded by the grouping configuration are `None`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerGroupKey {
    pub unit_type: Option<String>,
    pub region: Option<String>,
    pub population_band: Option<PopulationBand>,
}

impl fmt::Display for PeerGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            self.unit_type.as_deref(),
            self.region.as_deref(),
            self.population_band.map(PopulationBand::label),
        ];
        let rendered: Vec<&str> = parts.into_iter().flatten().collect();
        if rendered.is_empty() {
            f.write_str("all")
        } else {
            f.write_str(&rendered.join("/"))
        }
    }
}

/// Which attributes form a peer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerGrouping {
    pub by_type: bool,
    pub by_region: bool,
    pub by_population_band: bool,
}

impl Default for PeerGrouping {
    fn default() -> Self {
        Self {
            by_type: true,
            by_region: true,
            by_population_band: true,
        }
    }
}

impl PeerGrouping {
    pub fn key_for(&self, profile: &PeerProfile) -> PeerGroupKey {
        PeerGroupKey {
            unit_type: self.by_type.then(|| profile.unit_type.clone()),
            region: self.by_region.then(|| profile.region.clone()),
            population_band: self
                .by_population_band
                .then(|| profile.population_band()),
        }
    }
}

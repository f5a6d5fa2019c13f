use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dimension::DimensionKey;
use super::domain::{LatestScore, Period, Unit, UnitId};
use super::gap_fill::EstimationMethod;
use super::peers::{PeerComparison, PeerGroupSummary};
use super::trend::TrendAssessment;

/// Identifier of one calculation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Computing,
    Computed,
    Published,
    Superseded,
    Failed,
}

impl ResultStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ResultStatus::Computing => "computing",
            ResultStatus::Computed => "computed",
            ResultStatus::Published => "published",
            ResultStatus::Superseded => "superseded",
            ResultStatus::Failed => "failed",
        }
    }

    pub const fn can_transition_to(self, next: ResultStatus) -> bool {
        matches!(
            (self, next),
            (ResultStatus::Computing, ResultStatus::Computed)
                | (ResultStatus::Computing, ResultStatus::Failed)
                | (ResultStatus::Computed, ResultStatus::Published)
                | (ResultStatus::Published, ResultStatus::Superseded)
        )
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("result cannot move from {from} to {to}")]
pub struct TransitionError {
    pub from: ResultStatus,
    pub to: ResultStatus,
}

/// Whether a dimension input was observed or estimated, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Observed,
    Estimated { method: EstimationMethod },
}

impl Provenance {
    pub fn is_estimated(&self) -> bool {
        matches!(self, Provenance::Estimated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub raw: f64,
    pub normalized: f64,
    pub provenance: Provenance,
}

/// One unit's index result for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    pub unit_id: UnitId,
    pub period: Period,
    pub run_id: RunId,
    pub config_version: u32,
    pub status: ResultStatus,
    pub overall: f64,
    pub dimensions: BTreeMap<DimensionKey, DimensionScore>,
    pub completeness: f64,
    pub low_confidence: bool,
    pub national_rank: u32,
    pub peer_rank: u32,
    pub peer_group: PeerGroupSummary,
    pub trend: Option<TrendAssessment>,
    pub peers: Vec<PeerComparison>,
}

impl IndexResult {
    pub fn transition(&mut self, next: ResultStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_published(&self) -> bool {
        self.status == ResultStatus::Published
    }

    pub fn estimated_dimensions(&self) -> impl Iterator<Item = &DimensionKey> + '_ {
        self.dimensions
            .iter()
            .filter(|(_, score)| score.provenance.is_estimated())
            .map(|(key, _)| key)
    }

    pub fn latest_score(&self) -> LatestScore {
        LatestScore {
            period: self.period,
            overall: self.overall,
            national_rank: self.national_rank,
        }
    }

    /// Same scores, ranks and annotations, ignoring run identity and lifecycle state.
    pub fn same_outcome(&self, other: &IndexResult) -> bool {
        self.unit_id == other.unit_id
            && self.period == other.period
            && self.config_version == other.config_version
            && self.overall == other.overall
            && self.dimensions == other.dimensions
            && self.completeness == other.completeness
            && self.low_confidence == other.low_confidence
            && self.national_rank == other.national_rank
            && self.peer_rank == other.peer_rank
            && self.peer_group == other.peer_group
            && self.trend == other.trend
            && self.peers == other.peers
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Durable history of index results.
pub trait ResultRepository: Send + Sync {
    /// Published results for a period, in no particular order.
    fn published(&self, period: Period) -> Result<Vec<IndexResult>, RepositoryError>;

    /// Most recent published result for `unit` from a period strictly before `period`.
    fn latest_published_before(
        &self,
        unit: &UnitId,
        period: Period,
    ) -> Result<Option<IndexResult>, RepositoryError>;

    /// Every result ever written for a period, superseded ones included.
    fn history(&self, period: Period) -> Result<Vec<IndexResult>, RepositoryError>;

    /// Publish `results` for `period` as one all-or-nothing write, superseding the
    /// period's previously published results.
    fn commit(&self, period: Period, results: Vec<IndexResult>) -> Result<(), RepositoryError>;
}

/// Source of units and target of the latest-score projection.
pub trait UnitRepository: Send + Sync {
    fn active_units(&self) -> Result<Vec<Unit>, RepositoryError>;
    fn fetch(&self, id: &UnitId) -> Result<Option<Unit>, RepositoryError>;
    fn project_latest(&self, scores: &[(UnitId, LatestScore)]) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_allows_only_forward_transitions() {
        use ResultStatus::*;

        assert!(Computing.can_transition_to(Computed));
        assert!(Computing.can_transition_to(Failed));
        assert!(Computed.can_transition_to(Published));
        assert!(Published.can_transition_to(Superseded));

        assert!(!Computed.can_transition_to(Computing));
        assert!(!Failed.can_transition_to(Computed));
        assert!(!Published.can_transition_to(Computed));
        assert!(!Superseded.can_transition_to(Published));
        assert!(!Computing.can_transition_to(Published));
    }
}

use serde::{Deserialize, Serialize};

use super::completeness::DEFAULT_COMPLETENESS_CUTOFF;
use super::domain::PeerGrouping;
use super::peers::{SimilarityWeights, DEFAULT_PEER_COUNT};
use super::trend::TrendThresholds;

/// Tunables of a calculation run. Defaults are calibration placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Units below this completeness are flagged low-confidence and left out of
    /// the normalization reference set.
    pub completeness_cutoff: f64,
    pub trend: TrendThresholds,
    pub peer_count: usize,
    pub max_concurrency: usize,
    /// Fraction of failed units tolerated before the run refuses to publish.
    pub max_failed_fraction: f64,
    pub grouping: PeerGrouping,
    pub similarity: SimilarityWeights,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            completeness_cutoff: DEFAULT_COMPLETENESS_CUTOFF,
            trend: TrendThresholds::default(),
            peer_count: DEFAULT_PEER_COUNT,
            max_concurrency: 4,
            max_failed_fraction: 0.0,
            grouping: PeerGrouping::default(),
            similarity: SimilarityWeights::default(),
        }
    }
}

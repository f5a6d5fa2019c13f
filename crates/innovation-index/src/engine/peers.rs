use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::composer::round_score;
use super::dimension::DimensionKey;
use super::domain::{PeerGroupKey, PeerProfile, UnitId};

pub const DEFAULT_PEER_COUNT: usize = 5;

/// Weights of the similarity components; exact type and region matches dominate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub type_match: f64,
    pub region_match: f64,
    pub population: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            type_match: 0.4,
            region_match: 0.4,
            population: 0.2,
        }
    }
}

/// Similarity in [0, 1] between two structural profiles.
pub fn similarity(a: &PeerProfile, b: &PeerProfile, weights: &SimilarityWeights) -> f64 {
    let type_score = if a.unit_type == b.unit_type { 1.0 } else { 0.0 };
    let region_score = if a.region == b.region { 1.0 } else { 0.0 };
    let larger = a.population.max(b.population);
    let population_score = if larger == 0 {
        1.0
    } else {
        1.0 - a.population.abs_diff(b.population) as f64 / larger as f64
    };

    weights.type_match * type_score
        + weights.region_match * region_score
        + weights.population * population_score
}

/// A scored unit that may appear in another unit's benchmark.
pub struct PeerCandidate<'a> {
    pub unit_id: &'a UnitId,
    pub profile: &'a PeerProfile,
    pub overall: f64,
    pub dimensions: &'a BTreeMap<DimensionKey, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerComparison {
    pub unit_id: UnitId,
    pub similarity: f64,
    pub overall: f64,
    pub dimensions: BTreeMap<DimensionKey, f64>,
}

/// The `k` most similar other units, most similar first, identifier breaking ties.
pub fn nearest_peers(
    target: &UnitId,
    profile: &PeerProfile,
    candidates: &[PeerCandidate<'_>],
    k: usize,
    weights: &SimilarityWeights,
) -> Vec<PeerComparison> {
    let mut comparisons: Vec<PeerComparison> = candidates
        .iter()
        .filter(|candidate| candidate.unit_id != target)
        .map(|candidate| PeerComparison {
            unit_id: candidate.unit_id.clone(),
            similarity: round_score(similarity(profile, candidate.profile, weights)),
            overall: candidate.overall,
            dimensions: candidate.dimensions.clone(),
        })
        .collect();

    comparisons.sort_by(compare_similarity);
    comparisons.truncate(k);
    comparisons
}

/// Aggregate view of a peer group for side-by-side comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerGroupSummary {
    pub key: PeerGroupKey,
    pub members: Vec<UnitId>,
    pub mean_overall: f64,
    pub dimension_means: BTreeMap<DimensionKey, f64>,
}

pub fn group_summary(key: &PeerGroupKey, members: &[&PeerCandidate<'_>]) -> PeerGroupSummary {
    let mut member_ids: Vec<UnitId> = members
        .iter()
        .map(|member| member.unit_id.clone())
        .collect();
    member_ids.sort();

    let count = members.len().max(1) as f64;
    let mean_overall = round_score(members.iter().map(|member| member.overall).sum::<f64>() / count);

    let mut totals: BTreeMap<DimensionKey, (f64, usize)> = BTreeMap::new();
    for member in members {
        for (dimension, score) in member.dimensions {
            let entry = totals.entry(dimension.clone()).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }
    let dimension_means = totals
        .into_iter()
        .map(|(dimension, (total, seen))| (dimension, round_score(total / seen as f64)))
        .collect();

    PeerGroupSummary {
        key: key.clone(),
        members: member_ids,
        mean_overall,
        dimension_means,
    }
}

/// Orders comparisons the way `nearest_peers` does.
pub fn compare_similarity(a: &PeerComparison, b: &PeerComparison) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.unit_id.cmp(&b.unit_id))
}

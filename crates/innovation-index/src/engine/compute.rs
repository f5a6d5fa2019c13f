//! Cross-unit half of a run: everything that needs the full period in view.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::aggregation::UnitAggregation;
use super::completeness::CompletenessAssessment;
use super::composer::{round_score, ScoreComposer};
use super::dimension::{DimensionKey, DimensionSet};
use super::domain::{Period, PeerGroupKey, Unit, UnitId};
use super::gap_fill::{EstimationContext, EstimationMethod, FilledValue, GapFiller};
use super::normalization::{normalize_period, NormalizationInput};
use super::peers::{group_summary, nearest_peers, PeerCandidate, PeerGroupSummary};
use super::ranking::{rank, RankInput};
use super::result::{
    DimensionScore, IndexResult, Provenance, ResultStatus, RunId, TransitionError,
};
use super::settings::EngineSettings;
use super::trend;

/// A unit that made it through aggregation.
#[derive(Debug, Clone)]
pub struct AggregatedUnit {
    pub unit: Unit,
    pub aggregation: UnitAggregation,
    pub completeness: CompletenessAssessment,
}

/// Audit entry for one estimated dimension input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapFillEntry {
    pub unit_id: UnitId,
    pub dimension: DimensionKey,
    pub method: EstimationMethod,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct PeriodComputation {
    /// Computed results in national rank order.
    pub results: Vec<IndexResult>,
    pub gap_fills: Vec<GapFillEntry>,
}

pub struct PeriodInputs<'a> {
    pub run_id: RunId,
    pub period: Period,
    pub dimensions: &'a DimensionSet,
    pub units: &'a [AggregatedUnit],
    pub prior: &'a BTreeMap<UnitId, IndexResult>,
}

/// Gap fill, normalize, compose, rank, then attach trend and peer benchmarks.
pub fn compute_period(
    inputs: &PeriodInputs<'_>,
    composer: &ScoreComposer<'_>,
    gap_filler: &GapFiller,
    settings: &EngineSettings,
) -> Result<PeriodComputation, TransitionError> {
    let units = inputs.units;

    let peer_groups: BTreeMap<UnitId, PeerGroupKey> = units
        .iter()
        .map(|entry| {
            (
                entry.unit.id.clone(),
                settings.grouping.key_for(&entry.unit.profile),
            )
        })
        .collect();

    let mut observed: BTreeMap<DimensionKey, BTreeMap<UnitId, f64>> = BTreeMap::new();
    for entry in units {
        for (key, input) in &entry.aggregation.dimensions {
            if let Some(raw) = input.raw {
                observed
                    .entry(key.clone())
                    .or_default()
                    .insert(entry.unit.id.clone(), raw);
            }
        }
    }

    let context = EstimationContext {
        period: inputs.period,
        peer_groups: &peer_groups,
        observed: &observed,
        prior: inputs.prior,
    };

    let filled: BTreeMap<UnitId, BTreeMap<DimensionKey, FilledValue>> = units
        .iter()
        .map(|entry| {
            (
                entry.unit.id.clone(),
                gap_filler.fill_unit(&entry.aggregation, &context),
            )
        })
        .collect();

    let gap_fills: Vec<GapFillEntry> = filled
        .iter()
        .flat_map(|(unit_id, values)| {
            values.iter().filter_map(move |(dimension, value)| match &value.provenance {
                Provenance::Estimated { method } => Some(GapFillEntry {
                    unit_id: unit_id.clone(),
                    dimension: dimension.clone(),
                    method: method.clone(),
                    value: value.raw,
                }),
                Provenance::Observed => None,
            })
        })
        .collect();

    let normalization_inputs: Vec<NormalizationInput<'_>> = units
        .iter()
        .filter_map(|entry| {
            filled.get(&entry.unit.id).map(|values| NormalizationInput {
                unit_id: &entry.unit.id,
                values,
                excluded: entry.completeness.low_confidence,
            })
        })
        .collect();
    let normalized: BTreeMap<UnitId, BTreeMap<DimensionKey, f64>> =
        normalize_period(inputs.dimensions, &normalization_inputs)
            .into_iter()
            .map(|(unit_id, scores)| {
                let rounded = scores
                    .into_iter()
                    .map(|(key, score)| (key, round_score(score)))
                    .collect();
                (unit_id, rounded)
            })
            .collect();

    let empty = BTreeMap::new();
    let overall: BTreeMap<&UnitId, f64> = units
        .iter()
        .map(|entry| {
            let scores = normalized.get(&entry.unit.id).unwrap_or(&empty);
            (&entry.unit.id, composer.compose(scores))
        })
        .collect();

    let rank_inputs: Vec<RankInput> = units
        .iter()
        .map(|entry| RankInput {
            unit_id: entry.unit.id.clone(),
            overall: overall[&entry.unit.id],
            completeness: entry.completeness.score,
            peer_group: peer_groups[&entry.unit.id].clone(),
        })
        .collect();
    let ranking = rank(&rank_inputs);

    let candidates: Vec<PeerCandidate<'_>> = units
        .iter()
        .map(|entry| PeerCandidate {
            unit_id: &entry.unit.id,
            profile: &entry.unit.profile,
            overall: overall[&entry.unit.id],
            dimensions: normalized.get(&entry.unit.id).unwrap_or(&empty),
        })
        .collect();

    let mut members: BTreeMap<&PeerGroupKey, Vec<&PeerCandidate<'_>>> = BTreeMap::new();
    for candidate in &candidates {
        members
            .entry(&peer_groups[candidate.unit_id])
            .or_default()
            .push(candidate);
    }
    let summaries: BTreeMap<&PeerGroupKey, PeerGroupSummary> = members
        .iter()
        .map(|(key, group)| (*key, group_summary(key, group)))
        .collect();

    let by_id: BTreeMap<&UnitId, &AggregatedUnit> =
        units.iter().map(|entry| (&entry.unit.id, entry)).collect();

    let mut results = Vec::with_capacity(units.len());
    for unit_id in &ranking.order {
        let entry = by_id[unit_id];
        let values = filled.get(unit_id).cloned().unwrap_or_default();
        let scores = normalized.get(unit_id).unwrap_or(&empty);
        let dimensions = values
            .into_iter()
            .map(|(key, value)| {
                let normalized = scores.get(&key).copied().unwrap_or(0.0);
                (
                    key,
                    DimensionScore {
                        raw: value.raw,
                        normalized,
                        provenance: value.provenance,
                    },
                )
            })
            .collect();
        let score = overall[unit_id];

        let mut result = IndexResult {
            unit_id: unit_id.clone(),
            period: inputs.period,
            run_id: inputs.run_id,
            config_version: inputs.dimensions.version(),
            status: ResultStatus::Computing,
            overall: score,
            dimensions,
            completeness: entry.completeness.score,
            low_confidence: entry.completeness.low_confidence,
            national_rank: ranking.national[unit_id],
            peer_rank: ranking.peer[unit_id],
            peer_group: summaries[&peer_groups[unit_id]].clone(),
            trend: trend::assess(score, inputs.prior.get(unit_id), &settings.trend),
            peers: nearest_peers(
                unit_id,
                &entry.unit.profile,
                &candidates,
                settings.peer_count,
                &settings.similarity,
            ),
        };
        result.transition(ResultStatus::Computed)?;
        results.push(result);
    }

    Ok(PeriodComputation { results, gap_fills })
}

use serde::{Deserialize, Serialize};

use super::aggregation::{SourceStatus, UnitAggregation};
use super::dimension::DimensionSet;

pub const DEFAULT_COMPLETENESS_CUTOFF: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletenessAssessment {
    /// Weighted share of expected sources that returned data, on a 0-100 scale.
    pub score: f64,
    pub low_confidence: bool,
}

/// Scores how much expected input a unit has, weighting each source by the dimension it feeds.
#[derive(Debug, Clone, Copy)]
pub struct CompletenessAssessor {
    cutoff: f64,
}

impl Default for CompletenessAssessor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETENESS_CUTOFF)
    }
}

impl CompletenessAssessor {
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff: cutoff.clamp(0.0, 100.0),
        }
    }

    pub fn assess(
        &self,
        aggregation: &UnitAggregation,
        dimensions: &DimensionSet,
    ) -> CompletenessAssessment {
        let total_weight = dimensions.weight_sum();
        let mut observed_weight = 0.0;

        for dimension in dimensions.active() {
            let Some(input) = aggregation.dimensions.get(&dimension.key) else {
                continue;
            };
            if input.sources.is_empty() {
                continue;
            }
            let share = dimension.weight / input.sources.len() as f64;
            observed_weight += input
                .sources
                .iter()
                .filter(|aggregate| aggregate.status == SourceStatus::Present)
                .count() as f64
                * share;
        }

        let score = if total_weight > 0.0 {
            (100.0 * observed_weight / total_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let score = (score * 1e4).round() / 1e4;

        CompletenessAssessment {
            score,
            low_confidence: score < self.cutoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregation::SourceAggregator;
    use crate::engine::domain::{Period, UnitId};
    use crate::engine::store::{MemoryRecordStore, SourceRecord};

    fn assess(sources: &[&str]) -> CompletenessAssessment {
        let store = MemoryRecordStore::new();
        let unit = UnitId::new("mun-001");
        for source in sources {
            store.push(&unit, Period(2024), source, SourceRecord::value(1.0));
        }
        let dimensions = DimensionSet::standard();
        let aggregation = SourceAggregator::new(&store)
            .aggregate(&unit, Period(2024), &dimensions)
            .expect("aggregation succeeds");
        CompletenessAssessor::default().assess(&aggregation, &dimensions)
    }

    #[test]
    fn full_data_scores_one_hundred() {
        let assessment = assess(&[
            "challenges",
            "pilots",
            "partnerships",
            "digital_services",
            "innovation_staff",
            "training_sessions",
        ]);
        assert_eq!(assessment.score, 100.0);
        assert!(!assessment.low_confidence);
    }

    #[test]
    fn missing_high_weight_source_costs_more_than_low_weight() {
        let without_challenges = assess(&[
            "pilots",
            "partnerships",
            "digital_services",
            "innovation_staff",
            "training_sessions",
        ]);
        let without_training = assess(&[
            "challenges",
            "pilots",
            "partnerships",
            "digital_services",
            "innovation_staff",
        ]);

        assert_eq!(without_challenges.score, 75.0);
        assert_eq!(without_training.score, 95.0);
    }

    #[test]
    fn flags_units_below_cutoff() {
        let assessment = assess(&["challenges", "innovation_staff"]);
        assert_eq!(assessment.score, 30.0);
        assert!(assessment.low_confidence);
    }
}

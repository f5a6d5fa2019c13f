//! Deterministic estimation of missing dimension inputs.
//!
//! The default chain tries the unit's own prior observed value, then the mean of its
//! peer group in the current period, then the mean across every unit. Additional
//! strategies plug in through [`EstimationStrategy`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::aggregation::UnitAggregation;
use super::dimension::DimensionKey;
use super::domain::{PeerGroupKey, Period, UnitId};
use super::result::{IndexResult, Provenance};

/// How an estimated value was derived, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EstimationMethod {
    PriorPeriod { period: Period },
    PeerMean { sample: usize },
    GlobalMean { sample: usize },
    NoReference,
    Custom { strategy: String },
}

impl EstimationMethod {
    pub fn label(&self) -> &str {
        match self {
            EstimationMethod::PriorPeriod { .. } => "prior_period",
            EstimationMethod::PeerMean { .. } => "peer_mean",
            EstimationMethod::GlobalMean { .. } => "global_mean",
            EstimationMethod::NoReference => "no_reference",
            EstimationMethod::Custom { strategy } => strategy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub value: f64,
    pub method: EstimationMethod,
}

/// Dimension input after gap filling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledValue {
    pub raw: f64,
    pub provenance: Provenance,
}

/// Cross-unit view of the period available to estimators.
pub struct EstimationContext<'a> {
    pub period: Period,
    pub peer_groups: &'a BTreeMap<UnitId, PeerGroupKey>,
    /// Observed raw values per dimension, keyed by unit.
    pub observed: &'a BTreeMap<DimensionKey, BTreeMap<UnitId, f64>>,
    /// Latest published result before `period`, per unit.
    pub prior: &'a BTreeMap<UnitId, IndexResult>,
}

impl EstimationContext<'_> {
    fn observed_for(&self, dimension: &DimensionKey) -> Vec<(&UnitId, f64)> {
        self.observed
            .get(dimension)
            .map(|values| values.iter().map(|(unit, value)| (unit, *value)).collect())
            .unwrap_or_default()
    }
}

pub trait EstimationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn estimate(
        &self,
        unit: &UnitId,
        dimension: &DimensionKey,
        context: &EstimationContext<'_>,
    ) -> Option<Estimate>;
}

/// Reuse the unit's own observed value from its latest published prior result.
pub struct PriorPeriodStrategy;

impl EstimationStrategy for PriorPeriodStrategy {
    fn name(&self) -> &'static str {
        "prior_period"
    }

    fn estimate(
        &self,
        unit: &UnitId,
        dimension: &DimensionKey,
        context: &EstimationContext<'_>,
    ) -> Option<Estimate> {
        let prior = context.prior.get(unit)?;
        let score = prior.dimensions.get(dimension)?;
        if score.provenance.is_estimated() {
            return None;
        }
        Some(Estimate {
            value: score.raw,
            method: EstimationMethod::PriorPeriod {
                period: prior.period,
            },
        })
    }
}

/// Mean of observed values within the unit's peer group.
pub struct PeerMeanStrategy;

impl EstimationStrategy for PeerMeanStrategy {
    fn name(&self) -> &'static str {
        "peer_mean"
    }

    fn estimate(
        &self,
        unit: &UnitId,
        dimension: &DimensionKey,
        context: &EstimationContext<'_>,
    ) -> Option<Estimate> {
        let group = context.peer_groups.get(unit)?;
        let values: Vec<f64> = context
            .observed_for(dimension)
            .into_iter()
            .filter(|(other, _)| *other != unit && context.peer_groups.get(*other) == Some(group))
            .map(|(_, value)| value)
            .collect();
        mean(&values).map(|value| Estimate {
            value,
            method: EstimationMethod::PeerMean {
                sample: values.len(),
            },
        })
    }
}

/// Mean of observed values across every unit in the period.
pub struct GlobalMeanStrategy;

impl EstimationStrategy for GlobalMeanStrategy {
    fn name(&self) -> &'static str {
        "global_mean"
    }

    fn estimate(
        &self,
        unit: &UnitId,
        dimension: &DimensionKey,
        context: &EstimationContext<'_>,
    ) -> Option<Estimate> {
        let values: Vec<f64> = context
            .observed_for(dimension)
            .into_iter()
            .filter(|(other, _)| *other != unit)
            .map(|(_, value)| value)
            .collect();
        mean(&values).map(|value| Estimate {
            value,
            method: EstimationMethod::GlobalMean {
                sample: values.len(),
            },
        })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Ordered chain of estimation strategies.
pub struct GapFiller {
    strategies: Vec<Box<dyn EstimationStrategy>>,
}

impl Default for GapFiller {
    fn default() -> Self {
        Self::statistical()
    }
}

impl GapFiller {
    /// Own history, then peer mean, then global mean.
    pub fn statistical() -> Self {
        Self {
            strategies: vec![
                Box::new(PriorPeriodStrategy),
                Box::new(PeerMeanStrategy),
                Box::new(GlobalMeanStrategy),
            ],
        }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn EstimationStrategy>>) -> Self {
        Self { strategies }
    }

    /// Consult `strategy` before the existing chain.
    pub fn prepend(mut self, strategy: Box<dyn EstimationStrategy>) -> Self {
        self.strategies.insert(0, strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    pub fn estimate(
        &self,
        unit: &UnitId,
        dimension: &DimensionKey,
        context: &EstimationContext<'_>,
    ) -> Estimate {
        self.strategies
            .iter()
            .find_map(|strategy| {
                strategy
                    .estimate(unit, dimension, context)
                    .filter(|estimate| estimate.value.is_finite())
            })
            .unwrap_or(Estimate {
                value: 0.0,
                method: EstimationMethod::NoReference,
            })
    }

    /// Complete a unit's inputs. Observed values pass through untouched.
    pub fn fill_unit(
        &self,
        aggregation: &UnitAggregation,
        context: &EstimationContext<'_>,
    ) -> BTreeMap<DimensionKey, FilledValue> {
        aggregation
            .dimensions
            .iter()
            .map(|(key, input)| {
                let filled = match input.raw {
                    Some(raw) => FilledValue {
                        raw,
                        provenance: Provenance::Observed,
                    },
                    None => {
                        let estimate = self.estimate(&aggregation.unit_id, key, context);
                        debug!(
                            unit = %aggregation.unit_id,
                            dimension = %key,
                            method = estimate.method.label(),
                            value = estimate.value,
                            "dimension gap filled"
                        );
                        FilledValue {
                            raw: estimate.value,
                            provenance: Provenance::Estimated {
                                method: estimate.method,
                            },
                        }
                    }
                };
                (key.clone(), filled)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::domain::PopulationBand;

    fn key(unit_type: &str) -> PeerGroupKey {
        PeerGroupKey {
            unit_type: Some(unit_type.to_string()),
            region: Some("north".to_string()),
            population_band: Some(PopulationBand::Medium),
        }
    }

    struct Fixture {
        groups: BTreeMap<UnitId, PeerGroupKey>,
        observed: BTreeMap<DimensionKey, BTreeMap<UnitId, f64>>,
        prior: BTreeMap<UnitId, IndexResult>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut groups = BTreeMap::new();
            groups.insert(UnitId::new("a"), key("city"));
            groups.insert(UnitId::new("b"), key("city"));
            groups.insert(UnitId::new("c"), key("city"));
            groups.insert(UnitId::new("d"), key("village"));

            let mut values = BTreeMap::new();
            values.insert(UnitId::new("b"), 10.0);
            values.insert(UnitId::new("c"), 20.0);
            values.insert(UnitId::new("d"), 90.0);
            let mut observed = BTreeMap::new();
            observed.insert(DimensionKey::new("capacity"), values);

            Self {
                groups,
                observed,
                prior: BTreeMap::new(),
            }
        }

        fn context(&self) -> EstimationContext<'_> {
            EstimationContext {
                period: Period(2024),
                peer_groups: &self.groups,
                observed: &self.observed,
                prior: &self.prior,
            }
        }
    }

    #[test]
    fn falls_back_to_peer_mean_without_history() {
        let fixture = Fixture::new();
        let estimate = GapFiller::statistical().estimate(
            &UnitId::new("a"),
            &DimensionKey::new("capacity"),
            &fixture.context(),
        );

        assert_eq!(estimate.value, 15.0);
        assert_eq!(estimate.method, EstimationMethod::PeerMean { sample: 2 });
    }

    #[test]
    fn falls_back_to_global_mean_for_isolated_units() {
        let mut fixture = Fixture::new();
        fixture
            .groups
            .insert(UnitId::new("e"), key("metropolis"));

        let estimate = GapFiller::statistical().estimate(
            &UnitId::new("e"),
            &DimensionKey::new("capacity"),
            &fixture.context(),
        );

        assert_eq!(estimate.value, 40.0);
        assert_eq!(estimate.method, EstimationMethod::GlobalMean { sample: 3 });
    }

    #[test]
    fn reports_no_reference_when_nobody_observed_the_dimension() {
        let fixture = Fixture::new();
        let estimate = GapFiller::statistical().estimate(
            &UnitId::new("a"),
            &DimensionKey::new("unknown"),
            &fixture.context(),
        );

        assert_eq!(estimate.value, 0.0);
        assert_eq!(estimate.method, EstimationMethod::NoReference);
    }

    struct Fixed;

    impl EstimationStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn estimate(
            &self,
            _unit: &UnitId,
            _dimension: &DimensionKey,
            _context: &EstimationContext<'_>,
        ) -> Option<Estimate> {
            Some(Estimate {
                value: 7.0,
                method: EstimationMethod::Custom {
                    strategy: "fixed".to_string(),
                },
            })
        }
    }

    #[test]
    fn custom_strategies_can_take_precedence() {
        let fixture = Fixture::new();
        let filler = GapFiller::statistical().prepend(Box::new(Fixed));

        assert_eq!(
            filler.strategy_names(),
            vec!["fixed", "prior_period", "peer_mean", "global_mean"]
        );
        let estimate = filler.estimate(
            &UnitId::new("a"),
            &DimensionKey::new("capacity"),
            &fixture.context(),
        );
        assert_eq!(estimate.value, 7.0);
        assert_eq!(estimate.method.label(), "fixed");
    }
}

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::dimension::{AggregationMethod, DimensionKey, DimensionSet};
use super::domain::{Period, UnitId};
use super::store::{RecordStore, SourceError, SourceRecord};

/// Whether a source returned usable data for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Present,
    Absent,
    Unavailable,
}

/// Aggregated value of one source mapping for one unit and period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAggregate {
    pub source: String,
    pub aggregation: AggregationMethod,
    pub value: Option<f64>,
    pub status: SourceStatus,
}

/// Raw input for one dimension; `raw` is `None` unless every mapped source was present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionInput {
    pub raw: Option<f64>,
    pub sources: Vec<SourceAggregate>,
}

/// Per-unit output of the source aggregation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitAggregation {
    pub unit_id: UnitId,
    pub period: Period,
    pub dimensions: BTreeMap<DimensionKey, DimensionInput>,
}

impl UnitAggregation {
    pub fn raw(&self, key: &DimensionKey) -> Option<f64> {
        self.dimensions.get(key).and_then(|input| input.raw)
    }

    pub fn missing(&self) -> impl Iterator<Item = &DimensionKey> + '_ {
        self.dimensions
            .iter()
            .filter(|(_, input)| input.raw.is_none())
            .map(|(key, _)| key)
    }

    /// Status of every source touched for this unit, by source name.
    pub fn source_statuses(&self) -> BTreeMap<&str, SourceStatus> {
        self.dimensions
            .values()
            .flat_map(|input| input.sources.iter())
            .map(|aggregate| (aggregate.source.as_str(), aggregate.status))
            .collect()
    }
}

/// Failure that prevents a unit from being aggregated at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("unit {unit}: {error}")]
    Source { unit: UnitId, error: SourceError },
    #[error("unit {unit}: source {source_name} produced a non-finite value")]
    NonFinite { unit: UnitId, source_name: String },
}

/// Pure reader turning raw records into dimension inputs.
pub struct SourceAggregator<'a, S: RecordStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RecordStore + ?Sized> SourceAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn aggregate(
        &self,
        unit: &UnitId,
        period: Period,
        dimensions: &DimensionSet,
    ) -> Result<UnitAggregation, AggregationError> {
        let mut fetched: HashMap<&str, Option<Vec<SourceRecord>>> = HashMap::new();
        let mut inputs = BTreeMap::new();

        for dimension in dimensions.active() {
            let mut sources = Vec::with_capacity(dimension.sources.len());
            for mapping in &dimension.sources {
                if !fetched.contains_key(mapping.source.as_str()) {
                    let records = match self.store.fetch(unit, period, &mapping.source) {
                        Ok(records) => Some(records),
                        Err(SourceError::Unavailable { name, reason }) => {
                            warn!(%unit, source = %name, %reason, "source unavailable, treating as missing");
                            None
                        }
                        Err(error) => {
                            return Err(AggregationError::Source {
                                unit: unit.clone(),
                                error,
                            })
                        }
                    };
                    fetched.insert(mapping.source.as_str(), records);
                }

                let aggregate = match fetched.get(mapping.source.as_str()) {
                    Some(Some(records)) if !records.is_empty() => {
                        let value = reduce(mapping.aggregation, records);
                        if !value.is_finite() {
                            return Err(AggregationError::NonFinite {
                                unit: unit.clone(),
                                source_name: mapping.source.clone(),
                            });
                        }
                        SourceAggregate {
                            source: mapping.source.clone(),
                            aggregation: mapping.aggregation,
                            value: Some(value),
                            status: SourceStatus::Present,
                        }
                    }
                    Some(Some(_)) => SourceAggregate {
                        source: mapping.source.clone(),
                        aggregation: mapping.aggregation,
                        value: None,
                        status: SourceStatus::Absent,
                    },
                    _ => SourceAggregate {
                        source: mapping.source.clone(),
                        aggregation: mapping.aggregation,
                        value: None,
                        status: SourceStatus::Unavailable,
                    },
                };
                sources.push(aggregate);
            }

            let values: Option<Vec<f64>> = sources.iter().map(|aggregate| aggregate.value).collect();
            let raw = values.map(|values| dimension.formula.combine(&values));
            inputs.insert(dimension.key.clone(), DimensionInput { raw, sources });
        }

        debug!(%unit, %period, dimensions = inputs.len(), "unit aggregated");
        Ok(UnitAggregation {
            unit_id: unit.clone(),
            period,
            dimensions: inputs,
        })
    }
}

/// Reduce a non-empty record list with the declared aggregation method.
pub fn reduce(method: AggregationMethod, records: &[SourceRecord]) -> f64 {
    match method {
        AggregationMethod::Count => records.len() as f64,
        AggregationMethod::Rate => {
            let numerator: f64 = records.iter().map(|record| record.value).sum();
            let denominator: f64 = records
                .iter()
                .map(|record| record.denominator.unwrap_or(1.0))
                .sum();
            if denominator == 0.0 {
                0.0
            } else {
                numerator / denominator
            }
        }
        AggregationMethod::Average => {
            if records.is_empty() {
                0.0
            } else {
                records.iter().map(|record| record.value).sum::<f64>() / records.len() as f64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::MemoryRecordStore;

    fn unit() -> UnitId {
        UnitId::new("mun-001")
    }

    #[test]
    fn reduce_supports_each_method() {
        let records = [
            SourceRecord::ratio(3.0, 4.0),
            SourceRecord::ratio(1.0, 4.0),
        ];
        assert_eq!(reduce(AggregationMethod::Count, &records), 2.0);
        assert_eq!(reduce(AggregationMethod::Rate, &records), 0.5);
        assert_eq!(reduce(AggregationMethod::Average, &records), 2.0);
    }

    #[test]
    fn rate_guards_zero_denominator() {
        let records = [SourceRecord::ratio(5.0, 0.0)];
        assert_eq!(reduce(AggregationMethod::Rate, &records), 0.0);
    }

    #[test]
    fn aggregates_standard_dimensions_and_flags_gaps() {
        let store = MemoryRecordStore::new();
        let period = Period(2024);
        for _ in 0..4 {
            store.push(&unit(), period, "challenges", SourceRecord::value(1.0));
        }
        store.push(&unit(), period, "pilots", SourceRecord::value(1.0));
        store.push(&unit(), period, "pilots", SourceRecord::value(0.0));
        store.push(&unit(), period, "innovation_staff", SourceRecord::value(1.0));
        store.set_outage("partnerships", true);

        let aggregation = SourceAggregator::new(&store)
            .aggregate(&unit(), period, &DimensionSet::standard())
            .expect("aggregation succeeds");

        assert_eq!(
            aggregation.raw(&DimensionKey::new("challenge_activity")),
            Some(4.0)
        );
        assert_eq!(
            aggregation.raw(&DimensionKey::new("pilot_performance")),
            Some(0.5)
        );
        assert_eq!(
            aggregation.raw(&DimensionKey::new("innovation_capacity")),
            None,
            "training sessions absent so the dimension is incomplete"
        );

        let statuses = aggregation.source_statuses();
        assert_eq!(statuses["partnerships"], SourceStatus::Unavailable);
        assert_eq!(statuses["digital_services"], SourceStatus::Absent);
        assert_eq!(statuses["innovation_staff"], SourceStatus::Present);

        let missing: Vec<_> = aggregation.missing().map(|key| key.0.as_str()).collect();
        assert_eq!(
            missing,
            vec!["digital_adoption", "innovation_capacity", "partnership_health"]
        );
    }

    #[test]
    fn non_finite_values_fail_the_unit() {
        let store = MemoryRecordStore::new();
        store.push(&unit(), Period(2024), "partnerships", SourceRecord::value(f64::NAN));

        let err = SourceAggregator::new(&store)
            .aggregate(&unit(), Period(2024), &DimensionSet::standard())
            .expect_err("NaN is rejected");

        assert!(matches!(err, AggregationError::NonFinite { .. }));
    }
}

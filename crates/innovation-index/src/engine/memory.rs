use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use super::domain::{LatestScore, Period, Unit, UnitId};
use super::result::{IndexResult, RepositoryError, ResultRepository, ResultStatus, UnitRepository};

/// Result history kept in process. Superseded rows are retained for audit.
#[derive(Debug, Default, Clone)]
pub struct MemoryResultRepository {
    records: Arc<Mutex<Vec<IndexResult>>>,
}

impl MemoryResultRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("result repository mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultRepository for MemoryResultRepository {
    fn published(&self, period: Period) -> Result<Vec<IndexResult>, RepositoryError> {
        let guard = self.records.lock().expect("result repository mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| record.period == period && record.is_published())
            .cloned()
            .collect())
    }

    fn latest_published_before(
        &self,
        unit: &UnitId,
        period: Period,
    ) -> Result<Option<IndexResult>, RepositoryError> {
        let guard = self.records.lock().expect("result repository mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| {
                &record.unit_id == unit && record.period < period && record.is_published()
            })
            .max_by_key(|record| record.period)
            .cloned())
    }

    fn history(&self, period: Period) -> Result<Vec<IndexResult>, RepositoryError> {
        let guard = self.records.lock().expect("result repository mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| record.period == period)
            .cloned()
            .collect())
    }

    fn commit(&self, period: Period, results: Vec<IndexResult>) -> Result<(), RepositoryError> {
        let mut seen = BTreeSet::new();
        for result in &results {
            if result.period != period {
                return Err(RepositoryError::Conflict(format!(
                    "result for {} belongs to period {}, not {period}",
                    result.unit_id, result.period
                )));
            }
            if result.status != ResultStatus::Published {
                return Err(RepositoryError::Conflict(format!(
                    "result for {} is {}, expected published",
                    result.unit_id, result.status
                )));
            }
            if !seen.insert(&result.unit_id) {
                return Err(RepositoryError::Conflict(format!(
                    "duplicate result for {}",
                    result.unit_id
                )));
            }
        }

        // Stage on a copy so a failed transition leaves stored rows untouched.
        let mut guard = self.records.lock().expect("result repository mutex poisoned");
        let mut staged = guard.clone();
        for record in staged
            .iter_mut()
            .filter(|record| record.period == period && record.is_published())
        {
            record
                .transition(ResultStatus::Superseded)
                .map_err(|err| RepositoryError::Conflict(err.to_string()))?;
        }
        staged.extend(results);
        *guard = staged;
        Ok(())
    }
}

/// Units keyed by identifier, with the latest-score projection stored inline.
#[derive(Debug, Default, Clone)]
pub struct MemoryUnitRepository {
    units: Arc<Mutex<BTreeMap<UnitId, Unit>>>,
}

impl MemoryUnitRepository {
    pub fn new(units: impl IntoIterator<Item = Unit>) -> Self {
        let units = units.into_iter().map(|unit| (unit.id.clone(), unit)).collect();
        Self {
            units: Arc::new(Mutex::new(units)),
        }
    }

    pub fn all(&self) -> Vec<Unit> {
        self.units
            .lock()
            .expect("unit repository mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl UnitRepository for MemoryUnitRepository {
    fn active_units(&self) -> Result<Vec<Unit>, RepositoryError> {
        let guard = self.units.lock().expect("unit repository mutex poisoned");
        Ok(guard.values().filter(|unit| unit.active).cloned().collect())
    }

    fn fetch(&self, id: &UnitId) -> Result<Option<Unit>, RepositoryError> {
        let guard = self.units.lock().expect("unit repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    /// Never moves a unit's projection backwards to an older period.
    fn project_latest(&self, scores: &[(UnitId, LatestScore)]) -> Result<(), RepositoryError> {
        let mut guard = self.units.lock().expect("unit repository mutex poisoned");
        for (unit_id, score) in scores {
            let unit = guard.get_mut(unit_id).ok_or(RepositoryError::NotFound)?;
            let stale = unit
                .latest
                .is_some_and(|latest| latest.period > score.period);
            if !stale {
                unit.latest = Some(*score);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::domain::{PeerGroupKey, PeerProfile};
    use crate::engine::peers::PeerGroupSummary;
    use crate::engine::result::RunId;

    fn published(unit: &str, period: i32, overall: f64) -> IndexResult {
        IndexResult {
            unit_id: UnitId::new(unit),
            period: Period(period),
            run_id: RunId::new(),
            config_version: 1,
            status: ResultStatus::Published,
            overall,
            dimensions: BTreeMap::new(),
            completeness: 100.0,
            low_confidence: false,
            national_rank: 1,
            peer_rank: 1,
            peer_group: PeerGroupSummary {
                key: PeerGroupKey {
                    unit_type: None,
                    region: None,
                    population_band: None,
                },
                members: vec![UnitId::new(unit)],
                mean_overall: overall,
                dimension_means: BTreeMap::new(),
            },
            trend: None,
            peers: Vec::new(),
        }
    }

    fn unit(id: &str, latest: Option<LatestScore>) -> Unit {
        Unit {
            id: UnitId::new(id),
            name: id.to_uppercase(),
            active: true,
            profile: PeerProfile {
                unit_type: "city".to_string(),
                region: "north".to_string(),
                population: 40_000,
            },
            latest,
        }
    }

    #[test]
    fn commit_supersedes_previous_publication() {
        let repository = MemoryResultRepository::new();
        repository
            .commit(Period(2024), vec![published("a", 2024, 60.0)])
            .expect("first commit");
        repository
            .commit(Period(2024), vec![published("a", 2024, 65.0)])
            .expect("second commit");

        let current = repository.published(Period(2024)).expect("published");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].overall, 65.0);

        let history = repository.history(Period(2024)).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ResultStatus::Superseded);
    }

    #[test]
    fn rejected_commit_leaves_history_untouched() {
        let repository = MemoryResultRepository::new();
        repository
            .commit(Period(2024), vec![published("a", 2024, 60.0)])
            .expect("first commit");

        let mut unpublished = published("b", 2024, 50.0);
        unpublished.status = ResultStatus::Computed;
        let err = repository
            .commit(Period(2024), vec![published("a", 2024, 70.0), unpublished])
            .expect_err("computed rows cannot be committed");

        assert!(matches!(err, RepositoryError::Conflict(_)));
        let current = repository.published(Period(2024)).expect("published");
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].overall, 60.0);
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn latest_published_before_skips_current_and_future_periods() {
        let repository = MemoryResultRepository::new();
        for period in [2022, 2023, 2025] {
            repository
                .commit(Period(period), vec![published("a", period, period as f64 - 1990.0)])
                .expect("commit");
        }

        let previous = repository
            .latest_published_before(&UnitId::new("a"), Period(2025))
            .expect("lookup")
            .expect("prior result exists");
        assert_eq!(previous.period, Period(2023));
        assert!(repository
            .latest_published_before(&UnitId::new("a"), Period(2022))
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn projection_never_moves_backwards() {
        let newer = LatestScore {
            period: Period(2025),
            overall: 70.0,
            national_rank: 2,
        };
        let repository = MemoryUnitRepository::new([unit("a", Some(newer)), unit("b", None)]);

        let older = LatestScore {
            period: Period(2024),
            overall: 40.0,
            national_rank: 9,
        };
        repository
            .project_latest(&[(UnitId::new("a"), older), (UnitId::new("b"), older)])
            .expect("projection");

        let a = repository.fetch(&UnitId::new("a")).expect("fetch").expect("unit a");
        let b = repository.fetch(&UnitId::new("b")).expect("fetch").expect("unit b");
        assert_eq!(a.latest, Some(newer));
        assert_eq!(b.latest, Some(older));
    }

    #[test]
    fn inactive_units_are_not_listed() {
        let mut retired = unit("z", None);
        retired.active = false;
        let repository = MemoryUnitRepository::new([unit("a", None), retired]);

        let active = repository.active_units().expect("units");
        assert_eq!(active.len(), 1);
        assert_eq!(repository.all().len(), 2);
    }
}

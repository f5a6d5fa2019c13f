use std::sync::Arc;

use axum::response::Response;
use serde_json::Value;

use crate::engine::domain::{PeerProfile, Period, Unit, UnitId};
use crate::engine::memory::{MemoryResultRepository, MemoryUnitRepository};
use crate::engine::registry::DimensionRegistry;
use crate::engine::result::{IndexResult, RepositoryError, ResultRepository};
use crate::engine::run::IndexEngine;
use crate::engine::settings::EngineSettings;
use crate::engine::store::{MemoryRecordStore, RecordStore, SourceError, SourceRecord};
use crate::engine::{DimensionKey, DimensionSet};

pub(super) const PERIOD: Period = Period(2024);

pub(super) fn city(id: &str, population: u64) -> Unit {
    Unit {
        id: UnitId::new(id),
        name: format!("Municipality {}", id.to_uppercase()),
        active: true,
        profile: PeerProfile {
            unit_type: "city".to_string(),
            region: "north".to_string(),
            population,
        },
        latest: None,
    }
}

pub(super) fn village(id: &str) -> Unit {
    Unit {
        id: UnitId::new(id),
        name: format!("Village {}", id.to_uppercase()),
        active: true,
        profile: PeerProfile {
            unit_type: "village".to_string(),
            region: "south".to_string(),
            population: 4_000,
        },
        latest: None,
    }
}

/// Five medium-sized northern cities sharing one peer group.
pub(super) fn cities() -> Vec<Unit> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .enumerate()
        .map(|(index, id)| city(id, 30_000 + index as u64 * 10_000))
        .collect()
}

/// Seed every standard source so that each input grows with `level`.
pub(super) fn seed_unit(store: &MemoryRecordStore, unit: &str, period: Period, level: u32) {
    let id = UnitId::new(unit);
    let level_f = f64::from(level);

    store.replace(&id, period, "challenges", vec![SourceRecord::value(1.0); level as usize]);
    store.replace(&id, period, "pilots", vec![SourceRecord::ratio(level_f, 10.0)]);
    store.replace(
        &id,
        period,
        "partnerships",
        vec![SourceRecord::value(level_f), SourceRecord::value(level_f + 1.0)],
    );
    store.replace(
        &id,
        period,
        "digital_services",
        vec![SourceRecord::ratio(level_f * 10.0, 100.0)],
    );
    store.replace(
        &id,
        period,
        "innovation_staff",
        vec![SourceRecord::value(1.0); level as usize],
    );
    store.replace(
        &id,
        period,
        "training_sessions",
        vec![SourceRecord::value(1.0); 2],
    );
}

/// Seed the five cities with levels 1 through 5 (`a` lowest, `e` highest).
pub(super) fn seed_cities(store: &MemoryRecordStore, period: Period) {
    for (level, id) in (1..).zip(["a", "b", "c", "d", "e"]) {
        seed_unit(store, id, period, level);
    }
}

pub(super) struct Harness<S = MemoryRecordStore, R = MemoryResultRepository> {
    pub engine: Arc<IndexEngine<S, MemoryUnitRepository, R>>,
    pub store: Arc<S>,
    pub units: Arc<MemoryUnitRepository>,
    pub results: Arc<R>,
}

pub(super) fn harness_with<S, R>(
    store: S,
    results: R,
    units: Vec<Unit>,
    dimensions: DimensionSet,
    settings: EngineSettings,
) -> Harness<S, R>
where
    S: RecordStore + 'static,
    R: ResultRepository + 'static,
{
    let store = Arc::new(store);
    let units = Arc::new(MemoryUnitRepository::new(units));
    let results = Arc::new(results);
    let registry = Arc::new(DimensionRegistry::new(Period(2020), dimensions));
    let engine = Arc::new(IndexEngine::new(
        registry,
        store.clone(),
        units.clone(),
        results.clone(),
        settings,
    ));
    Harness {
        engine,
        store,
        units,
        results,
    }
}

/// Standard dimensions, default settings, five seeded cities.
pub(super) fn harness() -> Harness {
    let store = MemoryRecordStore::new();
    seed_cities(&store, PERIOD);
    harness_with(
        store,
        MemoryResultRepository::new(),
        cities(),
        DimensionSet::standard(),
        EngineSettings::default(),
    )
}

pub(super) fn result_for<'a>(results: &'a [IndexResult], unit: &str) -> &'a IndexResult {
    results
        .iter()
        .find(|result| result.unit_id.as_str() == unit)
        .unwrap_or_else(|| panic!("result for {unit} present"))
}

pub(super) fn key(value: &str) -> DimensionKey {
    DimensionKey::new(value)
}

/// Record store whose reads for one unit blow up mid-aggregation.
pub(super) struct PanickingStore {
    pub inner: MemoryRecordStore,
    pub poisoned: UnitId,
}

impl RecordStore for PanickingStore {
    fn fetch(
        &self,
        unit: &UnitId,
        period: Period,
        source: &str,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        if unit == &self.poisoned {
            panic!("corrupt record batch for {unit}");
        }
        self.inner.fetch(unit, period, source)
    }
}

/// Record store returning malformed data for one unit.
pub(super) struct InvalidDataStore {
    pub inner: MemoryRecordStore,
    pub broken: UnitId,
}

impl RecordStore for InvalidDataStore {
    fn fetch(
        &self,
        unit: &UnitId,
        period: Period,
        source: &str,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        if unit == &self.broken {
            return Err(SourceError::Invalid {
                name: source.to_string(),
                reason: "negative denominator".to_string(),
            });
        }
        self.inner.fetch(unit, period, source)
    }
}

/// Result repository that refuses every write.
#[derive(Default)]
pub(super) struct ReadOnlyResults {
    pub inner: MemoryResultRepository,
}

impl ResultRepository for ReadOnlyResults {
    fn published(&self, period: Period) -> Result<Vec<IndexResult>, RepositoryError> {
        self.inner.published(period)
    }

    fn latest_published_before(
        &self,
        unit: &UnitId,
        period: Period,
    ) -> Result<Option<IndexResult>, RepositoryError> {
        self.inner.latest_published_before(unit, period)
    }

    fn history(&self, period: Period) -> Result<Vec<IndexResult>, RepositoryError> {
        self.inner.history(period)
    }

    fn commit(&self, _period: Period, _results: Vec<IndexResult>) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database read only".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

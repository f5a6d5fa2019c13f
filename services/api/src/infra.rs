use innovation_index::engine::import::{
    dimensions_from_path, load_records, records_from_path, units_from_path,
};
use innovation_index::engine::{
    DimensionRegistry, DimensionSet, EngineSettings, ImportedRecord, IndexEngine,
    MemoryRecordStore, MemoryResultRepository, MemoryUnitRepository, Period, Unit,
};
use innovation_index::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type InMemoryEngine =
    IndexEngine<MemoryRecordStore, MemoryUnitRepository, MemoryResultRepository>;

/// Earliest period any configuration applies to when no records pin it down.
const DEFAULT_EFFECTIVE_FROM: Period = Period(2000);

/// Unit, record and dimension files an engine is hydrated from.
#[derive(Debug, Clone)]
pub(crate) struct DataFiles {
    pub(crate) units: PathBuf,
    pub(crate) records: PathBuf,
    pub(crate) dimensions: Option<PathBuf>,
}

impl DataFiles {
    pub(crate) fn load(&self, settings: EngineSettings) -> Result<InMemoryEngine, AppError> {
        let units = units_from_path(&self.units)?;
        let records = records_from_path(&self.records)?;
        let dimensions = match &self.dimensions {
            Some(path) => dimensions_from_path(path)?,
            None => DimensionSet::standard(),
        };

        info!(
            units = units.len(),
            records = records.len(),
            config_version = dimensions.version(),
            "index data loaded"
        );
        Ok(build_engine(units, &records, dimensions, settings))
    }
}

/// Wire in-memory repositories around the supplied dataset.
pub(crate) fn build_engine(
    units: Vec<Unit>,
    records: &[ImportedRecord],
    dimensions: DimensionSet,
    settings: EngineSettings,
) -> InMemoryEngine {
    let effective_from = records
        .iter()
        .map(|record| record.period)
        .min()
        .unwrap_or(DEFAULT_EFFECTIVE_FROM);

    let store = MemoryRecordStore::new();
    load_records(&store, records);

    IndexEngine::new(
        Arc::new(DimensionRegistry::new(effective_from, dimensions)),
        Arc::new(store),
        Arc::new(MemoryUnitRepository::new(units)),
        Arc::new(MemoryResultRepository::new()),
        settings,
    )
}

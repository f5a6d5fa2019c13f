//! Innovation index calculation engine.
//!
//! Source records are aggregated per unit in parallel, scored against the versioned
//! dimension configuration, ranked nationally and within peer groups, and published
//! for a period as one atomic set of results.

pub mod aggregation;
pub mod completeness;
pub mod composer;
pub mod compute;
pub mod dimension;
pub mod domain;
pub mod gap_fill;
pub mod import;
pub mod memory;
pub mod normalization;
pub mod peers;
pub mod ranking;
pub mod registry;
pub mod result;
pub mod router;
pub mod run;
pub mod settings;
pub mod store;
pub mod trend;

#[cfg(test)]
mod tests;

pub use aggregation::{SourceAggregator, SourceStatus, UnitAggregation};
pub use completeness::{CompletenessAssessment, CompletenessAssessor};
pub use composer::ScoreComposer;
pub use compute::GapFillEntry;
pub use dimension::{
    AggregationMethod, Dimension, DimensionKey, DimensionSet, Formula, NormalizationMethod,
    SourceMapping, ThresholdBands,
};
pub use domain::{
    LatestScore, PeerGroupKey, PeerGrouping, PeerProfile, Period, PopulationBand, Unit, UnitId,
};
pub use gap_fill::{EstimationContext, EstimationMethod, EstimationStrategy, GapFiller};
pub use import::{ImportError, ImportedRecord};
pub use memory::{MemoryResultRepository, MemoryUnitRepository};
pub use peers::{PeerComparison, PeerGroupSummary};
pub use registry::{DimensionRegistry, RegistryError};
pub use result::{
    DimensionScore, IndexResult, Provenance, RepositoryError, ResultRepository, ResultStatus,
    RunId, UnitRepository,
};
pub use router::{index_router, RunRequest};
pub use run::{
    CancellationToken, IndexEngine, RunError, RunFailure, RunReport, RunStatus, UnitFailure,
};
pub use settings::EngineSettings;
pub use store::{MemoryRecordStore, RecordStore, SourceError, SourceRecord};
pub use trend::{Trend, TrendAssessment, TrendThresholds};

//! Calculation run orchestration.
//!
//! A run aggregates every unit in parallel, waits for all of them at a barrier, then
//! computes the cross-unit stages and publishes the period in one commit. Nothing is
//! written unless every gate passes.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

use super::aggregation::{SourceAggregator, SourceStatus};
use super::completeness::CompletenessAssessor;
use super::composer::ScoreComposer;
use super::compute::{compute_period, AggregatedUnit, GapFillEntry, PeriodInputs};
use super::dimension::DimensionSet;
use super::domain::{LatestScore, Period, Unit, UnitId};
use super::gap_fill::GapFiller;
use super::registry::{DimensionRegistry, RegistryError};
use super::result::{
    IndexResult, RepositoryError, ResultRepository, ResultStatus, RunId, TransitionError,
    UnitRepository,
};
use super::settings::EngineSettings;
use super::store::RecordStore;

/// Cooperative cancellation shared between a caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Published,
    Failed,
    Cancelled,
}

/// Why a run refused to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunFailure {
    Configuration { message: String },
    UnknownUnits { units: Vec<UnitId> },
    NoUnits,
    SourceOutage { sources: Vec<String> },
    UnitFailures {
        failed: usize,
        total: usize,
        allowed_fraction: f64,
    },
    Commit { message: String },
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::Configuration { message } => {
                write!(f, "invalid dimension configuration: {message}")
            }
            RunFailure::UnknownUnits { units } => {
                let names: Vec<&str> = units.iter().map(UnitId::as_str).collect();
                write!(f, "unknown units requested: {}", names.join(", "))
            }
            RunFailure::NoUnits => f.write_str("no units to calculate"),
            RunFailure::SourceOutage { sources } => {
                write!(f, "sources unavailable for every unit: {}", sources.join(", "))
            }
            RunFailure::UnitFailures {
                failed,
                total,
                allowed_fraction,
            } => write!(
                f,
                "{failed} of {total} units failed (tolerance {:.1}%)",
                allowed_fraction * 100.0
            ),
            RunFailure::Commit { message } => write!(f, "publication failed: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit_id: UnitId,
    pub reason: String,
}

/// Outcome and audit trail of one calculation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub period: Period,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub config_version: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units_requested: usize,
    /// Units aggregated and ranked; never smaller than the period's published set.
    pub units_scored: usize,
    pub units_published: usize,
    pub gap_fills: Vec<GapFillEntry>,
    pub low_confidence: Vec<UnitId>,
    pub unit_failures: Vec<UnitFailure>,
}

impl RunReport {
    fn start(run_id: RunId, period: Period) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            period,
            status: RunStatus::Failed,
            failure: None,
            config_version: None,
            started_at: now,
            finished_at: now,
            units_requested: 0,
            units_scored: 0,
            units_published: 0,
            gap_fills: Vec::new(),
            low_confidence: Vec::new(),
            unit_failures: Vec::new(),
        }
    }

    fn fail(mut self, failure: RunFailure) -> Self {
        error!(run_id = %self.run_id, period = %self.period, %failure, "calculation run failed");
        self.status = RunStatus::Failed;
        self.failure = Some(failure);
        self.finished_at = Utc::now();
        self
    }

    fn cancel(mut self) -> Self {
        warn!(run_id = %self.run_id, period = %self.period, "calculation run cancelled");
        self.status = RunStatus::Cancelled;
        self.finished_at = Utc::now();
        self
    }

    fn publish(mut self, published: usize) -> Self {
        self.status = RunStatus::Published;
        self.units_published = published;
        self.finished_at = Utc::now();
        self
    }

    pub fn is_published(&self) -> bool {
        self.status == RunStatus::Published
    }
}

/// Errors that abort a run before it can produce a report.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("worker pool could not start: {0}")]
    WorkerPool(String),
}

struct ResolvedUnits {
    units: Vec<Unit>,
    requested: usize,
    unknown: Vec<UnitId>,
}

enum UnitOutcome {
    Aggregated(Box<AggregatedUnit>),
    Failed(UnitFailure),
    Skipped,
}

/// Batch engine computing and publishing one period of index results.
pub struct IndexEngine<S, U, R> {
    registry: Arc<DimensionRegistry>,
    store: Arc<S>,
    units: Arc<U>,
    results: Arc<R>,
    gap_filler: GapFiller,
    settings: EngineSettings,
}

impl<S, U, R> IndexEngine<S, U, R>
where
    S: RecordStore + 'static,
    U: UnitRepository + 'static,
    R: ResultRepository + 'static,
{
    pub fn new(
        registry: Arc<DimensionRegistry>,
        store: Arc<S>,
        units: Arc<U>,
        results: Arc<R>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            store,
            units,
            results,
            gap_filler: GapFiller::statistical(),
            settings,
        }
    }

    pub fn with_gap_filler(mut self, gap_filler: GapFiller) -> Self {
        self.gap_filler = gap_filler;
        self
    }

    pub fn registry(&self) -> &Arc<DimensionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn units(&self) -> &Arc<U> {
        &self.units
    }

    pub fn results(&self) -> &Arc<R> {
        &self.results
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Calculate `period` for the given units, or every active unit when `None`.
    pub fn run(
        &self,
        period: Period,
        unit_ids: Option<Vec<UnitId>>,
    ) -> Result<RunReport, RunError> {
        self.run_with_cancellation(period, unit_ids, &CancellationToken::new())
    }

    pub fn run_with_cancellation(
        &self,
        period: Period,
        unit_ids: Option<Vec<UnitId>>,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunError> {
        let run_id = RunId::new();
        let span = info_span!("index_run", %run_id, %period);
        let _entered = span.enter();

        let _lock = self.registry.lock_period(period)?;
        let mut report = RunReport::start(run_id, period);
        info!(
            scope = if unit_ids.is_some() { "selected" } else { "all_active" },
            "calculation run started"
        );

        let dimensions = match self.registry.snapshot(period) {
            Ok(dimensions) => dimensions,
            Err(err) => {
                return Ok(report.fail(RunFailure::Configuration {
                    message: err.to_string(),
                }))
            }
        };
        report.config_version = Some(dimensions.version());
        let composer = match ScoreComposer::new(&dimensions) {
            Ok(composer) => composer,
            Err(err) => {
                return Ok(report.fail(RunFailure::Configuration {
                    message: err.to_string(),
                }))
            }
        };

        let ResolvedUnits {
            units,
            requested,
            unknown,
        } = self.resolve_units(period, unit_ids)?;
        if !unknown.is_empty() {
            return Ok(report.fail(RunFailure::UnknownUnits { units: unknown }));
        }
        if units.is_empty() {
            return Ok(report.fail(RunFailure::NoUnits));
        }
        report.units_requested = requested;
        report.units_scored = units.len();

        let outcomes = self.aggregate_units(units, period, &dimensions, cancel)?;

        // Barrier: every unit has been aggregated or has failed.
        if cancel.is_cancelled() {
            return Ok(report.cancel());
        }

        let mut aggregated = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Aggregated(entry) => aggregated.push(*entry),
                UnitOutcome::Failed(failure) => report.unit_failures.push(failure),
                UnitOutcome::Skipped => return Ok(report.cancel()),
            }
        }

        let outage = sources_down_everywhere(&aggregated, &dimensions);
        if !outage.is_empty() {
            return Ok(report.fail(RunFailure::SourceOutage { sources: outage }));
        }

        let failed = report.unit_failures.len();
        let total = report.units_scored;
        if failed > 0 && failed as f64 / total as f64 > self.settings.max_failed_fraction {
            return Ok(report.fail(RunFailure::UnitFailures {
                failed,
                total,
                allowed_fraction: self.settings.max_failed_fraction,
            }));
        }
        if aggregated.is_empty() {
            return Ok(report.fail(RunFailure::NoUnits));
        }

        report.low_confidence = aggregated
            .iter()
            .filter(|entry| entry.completeness.low_confidence)
            .map(|entry| entry.unit.id.clone())
            .collect();

        let mut prior = BTreeMap::new();
        for entry in &aggregated {
            if let Some(previous) = self.results.latest_published_before(&entry.unit.id, period)? {
                prior.insert(entry.unit.id.clone(), previous);
            }
        }

        let computation = compute_period(
            &PeriodInputs {
                run_id,
                period,
                dimensions: &dimensions,
                units: &aggregated,
                prior: &prior,
            },
            &composer,
            &self.gap_filler,
            &self.settings,
        )?;
        report.gap_fills = computation.gap_fills;

        if cancel.is_cancelled() {
            return Ok(report.cancel());
        }

        let mut results = computation.results;
        for result in &mut results {
            result.transition(ResultStatus::Published)?;
        }
        let published = results.len();
        let projection = projection_for(&aggregated, &results, period);

        if let Err(err) = self.results.commit(period, results) {
            return Ok(report.fail(RunFailure::Commit {
                message: err.to_string(),
            }));
        }

        if let Err(err) = self.units.project_latest(&projection) {
            warn!(%err, "latest score projection failed; results remain published");
        }

        info!(
            published,
            gap_fills = report.gap_fills.len(),
            low_confidence = report.low_confidence.len(),
            failed_units = report.unit_failures.len(),
            config_version = dimensions.version(),
            "calculation run published"
        );
        Ok(report.publish(published))
    }

    /// Units to score for `period`, sorted by identifier.
    ///
    /// Every active unit and every unit already published for the period is scored,
    /// so a selection only adds units (inactive ones included) and never narrows the
    /// set that normalization and ranking see.
    fn resolve_units(
        &self,
        period: Period,
        unit_ids: Option<Vec<UnitId>>,
    ) -> Result<ResolvedUnits, RunError> {
        let mut scored: BTreeMap<UnitId, Unit> = self
            .units
            .active_units()?
            .into_iter()
            .map(|unit| (unit.id.clone(), unit))
            .collect();

        for result in self.results.published(period)? {
            if scored.contains_key(&result.unit_id) {
                continue;
            }
            if let Some(unit) = self.units.fetch(&result.unit_id)? {
                scored.insert(unit.id.clone(), unit);
            }
        }

        let mut unknown = Vec::new();
        let requested = match unit_ids {
            None => scored.len(),
            Some(ids) => {
                let ids: BTreeSet<UnitId> = ids.into_iter().collect();
                for id in &ids {
                    if scored.contains_key(id) {
                        continue;
                    }
                    match self.units.fetch(id)? {
                        Some(unit) => {
                            scored.insert(unit.id.clone(), unit);
                        }
                        None => unknown.push(id.clone()),
                    }
                }
                ids.len()
            }
        };

        Ok(ResolvedUnits {
            units: scored.into_values().collect(),
            requested,
            unknown,
        })
    }

    fn aggregate_units(
        &self,
        units: Vec<Unit>,
        period: Period,
        dimensions: &DimensionSet,
        cancel: &CancellationToken,
    ) -> Result<Vec<UnitOutcome>, RunError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.max_concurrency.max(1))
            .thread_name(|index| format!("index-worker-{index}"))
            .build()
            .map_err(|err| RunError::WorkerPool(err.to_string()))?;

        let aggregator = SourceAggregator::new(self.store.as_ref());
        let assessor = CompletenessAssessor::new(self.settings.completeness_cutoff);

        Ok(pool.install(|| {
            units
                .into_par_iter()
                .map(|unit| {
                    if cancel.is_cancelled() {
                        return UnitOutcome::Skipped;
                    }
                    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
                        aggregator.aggregate(&unit.id, period, dimensions)
                    }));
                    match attempt {
                        Ok(Ok(aggregation)) => {
                            let completeness = assessor.assess(&aggregation, dimensions);
                            UnitOutcome::Aggregated(Box::new(AggregatedUnit {
                                unit,
                                aggregation,
                                completeness,
                            }))
                        }
                        Ok(Err(err)) => {
                            warn!(unit = %unit.id, %err, "unit aggregation failed");
                            UnitOutcome::Failed(UnitFailure {
                                unit_id: unit.id,
                                reason: err.to_string(),
                            })
                        }
                        Err(payload) => {
                            let reason = panic_message(&*payload);
                            error!(unit = %unit.id, %reason, "unit aggregation panicked");
                            UnitOutcome::Failed(UnitFailure {
                                unit_id: unit.id,
                                reason: format!("aggregation panicked: {reason}"),
                            })
                        }
                    }
                })
                .collect()
        }))
    }
}

/// Sources reported unavailable for every aggregated unit.
fn sources_down_everywhere(units: &[AggregatedUnit], dimensions: &DimensionSet) -> Vec<String> {
    if units.is_empty() {
        return Vec::new();
    }
    let statuses: Vec<_> = units
        .iter()
        .map(|entry| entry.aggregation.source_statuses())
        .collect();
    dimensions
        .sources()
        .into_iter()
        .filter(|source| {
            statuses
                .iter()
                .all(|unit| unit.get(source) == Some(&SourceStatus::Unavailable))
        })
        .map(str::to_string)
        .collect()
}

/// Latest-score updates, skipping units whose projection already points at a newer period.
fn projection_for(
    units: &[AggregatedUnit],
    results: &[IndexResult],
    period: Period,
) -> Vec<(UnitId, LatestScore)> {
    let current: BTreeMap<&UnitId, &Unit> =
        units.iter().map(|entry| (&entry.unit.id, &entry.unit)).collect();
    results
        .iter()
        .filter(|result| {
            current
                .get(&result.unit_id)
                .and_then(|unit| unit.latest)
                .map_or(true, |latest| latest.period <= period)
        })
        .map(|result| (result.unit_id.clone(), result.latest_score()))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

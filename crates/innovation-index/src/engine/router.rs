use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::domain::{Period, UnitId};
use super::registry::RegistryError;
use super::result::{IndexResult, ResultRepository, UnitRepository};
use super::run::{IndexEngine, RunError, RunStatus};
use super::store::RecordStore;

/// Request body for triggering a calculation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub period: Period,
    #[serde(default)]
    pub unit_ids: Option<Vec<UnitId>>,
}

/// Published results of one period in national rank order.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodResultsView {
    pub period: Period,
    pub count: usize,
    pub results: Vec<IndexResult>,
}

/// Router builder exposing run triggering and result reads.
pub fn index_router<S, U, R>(engine: Arc<IndexEngine<S, U, R>>) -> Router
where
    S: RecordStore + 'static,
    U: UnitRepository + 'static,
    R: ResultRepository + 'static,
{
    Router::new()
        .route("/api/v1/index/runs", post(run_handler::<S, U, R>))
        .route(
            "/api/v1/index/periods/:period/results",
            get(period_results_handler::<S, U, R>),
        )
        .route(
            "/api/v1/index/periods/:period/units/:unit_id",
            get(unit_result_handler::<S, U, R>),
        )
        .with_state(engine)
}

pub(crate) async fn run_handler<S, U, R>(
    State(engine): State<Arc<IndexEngine<S, U, R>>>,
    axum::Json(request): axum::Json<RunRequest>,
) -> Response
where
    S: RecordStore + 'static,
    U: UnitRepository + 'static,
    R: ResultRepository + 'static,
{
    let RunRequest { period, unit_ids } = request;
    let outcome =
        tokio::task::spawn_blocking(move || engine.run(period, unit_ids)).await;

    match outcome {
        Ok(Ok(report)) => {
            let status = match report.status {
                RunStatus::Published => StatusCode::OK,
                RunStatus::Failed => StatusCode::UNPROCESSABLE_ENTITY,
                RunStatus::Cancelled => StatusCode::CONFLICT,
            };
            (status, axum::Json(report)).into_response()
        }
        Ok(Err(RunError::Registry(RegistryError::RunInFlight(period)))) => {
            let payload = json!({
                "error": format!("a calculation run for period {period} is already in flight"),
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Ok(Err(other)) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
        Err(join_error) => {
            error!(%join_error, "calculation run task aborted");
            let payload = json!({
                "error": "calculation run aborted",
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn period_results_handler<S, U, R>(
    State(engine): State<Arc<IndexEngine<S, U, R>>>,
    Path(period): Path<i32>,
) -> Response
where
    S: RecordStore + 'static,
    U: UnitRepository + 'static,
    R: ResultRepository + 'static,
{
    let period = Period(period);
    match engine.results().published(period) {
        Ok(results) if results.is_empty() => {
            let payload = json!({
                "error": format!("no published results for period {period}"),
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Ok(mut results) => {
            results.sort_by(|a, b| {
                a.national_rank
                    .cmp(&b.national_rank)
                    .then_with(|| a.unit_id.cmp(&b.unit_id))
            });
            let view = PeriodResultsView {
                period,
                count: results.len(),
                results,
            };
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(other) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn unit_result_handler<S, U, R>(
    State(engine): State<Arc<IndexEngine<S, U, R>>>,
    Path((period, unit_id)): Path<(i32, String)>,
) -> Response
where
    S: RecordStore + 'static,
    U: UnitRepository + 'static,
    R: ResultRepository + 'static,
{
    let period = Period(period);
    let unit_id = UnitId(unit_id);
    match engine.results().published(period) {
        Ok(results) => match results.into_iter().find(|result| result.unit_id == unit_id) {
            Some(result) => (StatusCode::OK, axum::Json(result)).into_response(),
            None => {
                let payload = json!({
                    "error": format!("no published result for unit {unit_id} in period {period}"),
                });
                (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
            }
        },
        Err(other) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

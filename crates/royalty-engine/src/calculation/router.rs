use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::domain::{CalculationPeriod, ContractId, RunId, SalesTransaction};
use super::engine::RunError;
use super::repository::{ContractSource, RepositoryError, RunRepository};
use super::service::{CalculationService, CalculationServiceError};

#[derive(Debug, Deserialize)]
pub struct CalculationRequest {
    pub contract_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Only honoured by the preview endpoint.
    #[serde(default)]
    pub transactions: Option<Vec<SalesTransaction>>,
}

impl CalculationRequest {
    fn period(&self) -> CalculationPeriod {
        CalculationPeriod {
            start: self.period_start,
            end: self.period_end,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub approver_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectionRequest {
    pub approver_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AggregateQuery {
    #[serde(default)]
    pub dimension: String,
}

/// Router builder exposing calculation runs, their line items, and approvals.
pub fn calculation_router<S, R>(service: Arc<CalculationService<S, R>>) -> Router
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    Router::new()
        .route("/api/v1/calculations", post(run_handler::<S, R>))
        .route("/api/v1/calculations/preview", post(preview_handler::<S, R>))
        .route("/api/v1/calculations/:run_id", get(run_status_handler::<S, R>))
        .route(
            "/api/v1/calculations/:run_id/line-items",
            get(line_items_handler::<S, R>),
        )
        .route(
            "/api/v1/calculations/:run_id/execution-logs",
            get(execution_logs_handler::<S, R>),
        )
        .route(
            "/api/v1/calculations/:run_id/aggregate",
            get(aggregate_handler::<S, R>),
        )
        .route(
            "/api/v1/calculations/:run_id/approve",
            post(approve_handler::<S, R>),
        )
        .route(
            "/api/v1/calculations/:run_id/reject",
            post(reject_handler::<S, R>),
        )
        .route(
            "/api/v1/calculations/:run_id/paid",
            post(paid_handler::<S, R>),
        )
        .route(
            "/api/v1/contracts/:contract_id/calculations",
            get(contract_runs_handler::<S, R>),
        )
        .with_state(service)
}

pub(crate) async fn run_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    axum::Json(request): axum::Json<CalculationRequest>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    let contract_id = ContractId(request.contract_id.clone());
    match service.run_calculation(&contract_id, request.period()) {
        Ok(record) => (StatusCode::CREATED, axum::Json(record.run)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn preview_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    axum::Json(request): axum::Json<CalculationRequest>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    let contract_id = ContractId(request.contract_id.clone());
    let period = request.period();
    match service.preview(&contract_id, period, request.transactions) {
        Ok(outcome) => {
            let payload = json!({
                "run": outcome.run,
                "line_items": outcome.line_items,
                "execution_logs": outcome.execution_logs,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn run_status_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(run_id): Path<String>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.get_run(&RunId(run_id)) {
        Ok(run) => (StatusCode::OK, axum::Json(run)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn line_items_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(run_id): Path<String>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.get_line_items(&RunId(run_id)) {
        Ok(items) => (StatusCode::OK, axum::Json(items)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn execution_logs_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(run_id): Path<String>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.get_execution_logs(&RunId(run_id)) {
        Ok(logs) => (StatusCode::OK, axum::Json(logs)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn aggregate_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(run_id): Path<String>,
    Query(query): Query<AggregateQuery>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.get_aggregate(&RunId(run_id), &query.dimension) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn approve_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(run_id): Path<String>,
    axum::Json(request): axum::Json<ApprovalRequest>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.approve(&RunId(run_id), &request.approver_id) {
        Ok(run) => (StatusCode::OK, axum::Json(run)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn reject_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(run_id): Path<String>,
    axum::Json(request): axum::Json<RejectionRequest>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.reject(&RunId(run_id), &request.approver_id, &request.reason) {
        Ok(run) => (StatusCode::OK, axum::Json(run)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn paid_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(run_id): Path<String>,
    axum::Json(request): axum::Json<PaymentRequest>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.mark_paid(&RunId(run_id), &request.actor_id) {
        Ok(run) => (StatusCode::OK, axum::Json(run)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn contract_runs_handler<S, R>(
    State(service): State<Arc<CalculationService<S, R>>>,
    Path(contract_id): Path<String>,
) -> Response
where
    S: ContractSource + 'static,
    R: RunRepository + 'static,
{
    match service.list_runs(&ContractId(contract_id)) {
        Ok(runs) => (StatusCode::OK, axum::Json(runs)).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: CalculationServiceError) -> Response {
    let status = match &error {
        CalculationServiceError::Run(RunError::ContractNotFound(_))
        | CalculationServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        CalculationServiceError::Run(RunError::InvalidPeriod { .. })
        | CalculationServiceError::UnknownDimension(_) => StatusCode::BAD_REQUEST,
        CalculationServiceError::Run(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CalculationServiceError::RunFailed { source, .. } => match source {
            RunError::ContractNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
        CalculationServiceError::Transition(_)
        | CalculationServiceError::Repository(RepositoryError::Conflict)
        | CalculationServiceError::Repository(RepositoryError::StaleStatus { .. }) => {
            StatusCode::CONFLICT
        }
        CalculationServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let payload = match &error {
        CalculationServiceError::RunFailed { run, source } => json!({
            "error": source.to_string(),
            "run_id": run.0,
            "status": "failed",
        }),
        other => json!({
            "error": other.to_string(),
        }),
    };
    (status, axum::Json(payload)).into_response()
}

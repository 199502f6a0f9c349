use crate::infra::{AppState, InMemoryContractSource};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router};
use royalty_engine::calculation::{
    calculation_router, CalculationService, ContractSnapshot, RunRepository, SalesTransaction,
    TransactionImporter,
};
use royalty_engine::error::AppError;
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

/// Contract data pushed by the surrounding contract-management system.
#[derive(Debug, Deserialize)]
pub(crate) struct ContractUpload {
    pub(crate) snapshot: ContractSnapshot,
    #[serde(default)]
    pub(crate) transactions: Vec<SalesTransaction>,
    /// Sales export in CSV form, appended after `transactions`.
    #[serde(default)]
    pub(crate) sales_csv: Option<String>,
}

pub(crate) fn with_calculation_routes<R>(
    service: Arc<CalculationService<InMemoryContractSource, R>>,
    contracts: Arc<InMemoryContractSource>,
) -> Router
where
    R: RunRepository + 'static,
{
    let contract_routes = Router::new()
        .route(
            "/api/v1/contracts/:contract_id",
            axum::routing::put(load_contract_endpoint),
        )
        .with_state(contracts);

    calculation_router(service)
        .merge(contract_routes)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub(crate) async fn load_contract_endpoint(
    State(contracts): State<Arc<InMemoryContractSource>>,
    Path(contract_id): Path<String>,
    Json(upload): Json<ContractUpload>,
) -> Response {
    if upload.snapshot.contract_id.0 != contract_id {
        let payload = json!({
            "error": format!(
                "snapshot is for contract {}, not {contract_id}",
                upload.snapshot.contract_id
            ),
        });
        return (StatusCode::BAD_REQUEST, Json(payload)).into_response();
    }

    match load_contract(&contracts, upload) {
        Ok((rules, transactions)) => {
            info!(contract = %contract_id, rules, transactions, "contract data loaded");
            let payload = json!({
                "contract_id": contract_id,
                "rules": rules,
                "transactions": transactions,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

fn load_contract(
    contracts: &InMemoryContractSource,
    upload: ContractUpload,
) -> Result<(usize, usize), AppError> {
    let ContractUpload {
        snapshot,
        mut transactions,
        sales_csv,
    } = upload;

    if let Some(csv) = sales_csv {
        let imported = TransactionImporter::from_reader(Cursor::new(csv.into_bytes()))?;
        transactions.extend(imported);
    }

    let counts = (snapshot.rules.len(), transactions.len());
    contracts.load(snapshot, transactions);
    Ok(counts)
}

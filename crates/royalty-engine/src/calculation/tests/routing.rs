use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::calculation::router::{
    aggregate_handler, calculation_router, run_handler, AggregateQuery, CalculationRequest,
};
use crate::calculation::service::CalculationService;
use crate::config::CalculationConfig;

fn q1_request() -> Value {
    json!({
        "contract_id": CONTRACT,
        "period_start": "2025-01-01",
        "period_end": "2025-03-31",
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::to_vec(body).expect("serialize request"),
        ))
        .expect("build request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("build request")
}

fn decimal_at(payload: &Value, key: &str) -> Decimal {
    payload
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| panic!("decimal field {key} in {payload}"))
}

fn router() -> Router {
    let (service, _, _) = build_service();
    calculation_router(Arc::new(service))
}

async fn start_run(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(post_json("/api/v1/calculations", &q1_request()))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    payload
        .get("id")
        .and_then(Value::as_str)
        .expect("run id")
        .to_string()
}

#[tokio::test]
async fn run_route_creates_pending_runs() {
    let router = router();

    let response = router
        .clone()
        .oneshot(post_json("/api/v1/calculations", &q1_request()))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(
        payload.get("status").and_then(Value::as_str),
        Some("pending_approval")
    );
    assert_eq!(decimal_at(&payload, "total_fee"), d("350"));
}

#[tokio::test]
async fn run_detail_routes_return_stored_records() {
    let router = router();
    let run_id = start_run(&router).await;

    let response = router
        .clone()
        .oneshot(get(&format!("/api/v1/calculations/{run_id}/line-items")))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let items = read_json_body(response).await;
    assert_eq!(items.as_array().map(Vec::len), Some(2));

    let response = router
        .clone()
        .oneshot(get(&format!(
            "/api/v1/calculations/{run_id}/aggregate?dimension=territory"
        )))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let report = read_json_body(response).await;
    assert_eq!(
        report.pointer("/rows/0/dimension_value").and_then(Value::as_str),
        Some("US")
    );

    let response = router
        .oneshot(get(&format!("/api/v1/contracts/{CONTRACT}/calculations")))
        .await
        .expect("route executes");
    let runs = read_json_body(response).await;
    assert_eq!(runs.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn unknown_runs_return_not_found() {
    let response = router()
        .oneshot(get("/api/v1/calculations/calc-missing"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_contracts_return_not_found() {
    let mut body = q1_request();
    body["contract_id"] = json!("contract-404");

    let response = router()
        .oneshot(post_json("/api/v1/calculations", &body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_approval_conflicts() {
    let router = router();
    let run_id = start_run(&router).await;
    let approval = json!({ "approver_id": "finance-lead" });
    let uri = format!("/api/v1/calculations/{run_id}/approve");

    let first = router
        .clone()
        .oneshot(post_json(&uri, &approval))
        .await
        .expect("route executes");
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .oneshot(post_json(&uri, &approval))
        .await
        .expect("route executes");
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn rejection_route_records_the_reason() {
    let router = router();
    let run_id = start_run(&router).await;

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/calculations/{run_id}/reject"),
            &json!({ "approver_id": "finance-lead", "reason": "missing March feed" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(
        payload.pointer("/approvals/0/reason").and_then(Value::as_str),
        Some("missing March feed")
    );
}

#[tokio::test]
async fn preview_route_prices_supplied_transactions() {
    let mut body = q1_request();
    body["transactions"] = json!([{
        "id": "p-1",
        "date": "2025-03-01",
        "product": "Blue Fescue",
        "quantity": "4",
        "gross_amount": "800",
    }]);

    let response = router()
        .oneshot(post_json("/api/v1/calculations/preview", &body))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let run = payload.get("run").expect("run payload");
    assert_eq!(decimal_at(run, "total_fee"), d("80"));
    assert_eq!(
        payload.get("line_items").and_then(Value::as_array).map(Vec::len),
        Some(1)
    );
}

#[tokio::test]
async fn aggregate_handler_rejects_blank_dimensions() {
    let (service, _, _) = build_service();
    let service = Arc::new(service);
    let record = service
        .run_calculation(&crate::calculation::domain::ContractId(CONTRACT.to_string()), q1())
        .expect("run succeeds");

    let response = aggregate_handler::<MemorySource, MemoryRuns>(
        State(service),
        Path(record.run.id.0.clone()),
        Query(AggregateQuery {
            dimension: String::new(),
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn run_handler_returns_internal_error_on_storage_outage() {
    let service = Arc::new(CalculationService::new(
        Arc::new(seeded_source()),
        Arc::new(UnavailableRuns),
        CalculationConfig::default(),
    ));

    let response = run_handler::<MemorySource, UnavailableRuns>(
        State(service),
        axum::Json(CalculationRequest {
            contract_id: CONTRACT.to_string(),
            period_start: date(2025, 1, 1),
            period_end: date(2025, 3, 31),
            transactions: None,
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn invalid_rules_report_the_failed_run() {
    let (service, source, _) = build_service();
    source.load(
        snapshot(vec![crate::calculation::rules::fixtures::rule(
            "no-rate",
            crate::calculation::rules::RuleType::Percentage,
            1,
        )]),
        Vec::new(),
    );
    let router = calculation_router(Arc::new(service));

    let response = router
        .oneshot(post_json("/api/v1/calculations", &q1_request()))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("status").and_then(Value::as_str), Some("failed"));
    assert!(payload.get("run_id").and_then(Value::as_str).is_some());
}

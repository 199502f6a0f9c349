use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryContractSource, InMemoryRunRepository};
use crate::routes::with_calculation_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use royalty_engine::calculation::CalculationService;
use royalty_engine::config::AppConfig;
use royalty_engine::error::AppError;
use royalty_engine::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let contracts = Arc::new(InMemoryContractSource::default());
    let runs = Arc::new(InMemoryRunRepository::default());
    let approach = config.calculation.approach;
    let calculation_service = Arc::new(CalculationService::new(
        contracts.clone(),
        runs,
        config.calculation.clone(),
    ));

    let app = with_calculation_routes(calculation_service, contracts)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, ?approach, %addr, "royalty calculation service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

use crate::cli::ServeArgs;
use crate::infra::{seeded_store, AppState, LogAuditLog, LogNotifier};
use crate::routes::with_pass_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use exit_pass::config::AppConfig;
use exit_pass::error::AppError;
use exit_pass::telemetry;
use exit_pass::workflows::exit_pass::ExitPassService;
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

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let pass_service = Arc::new(
        ExitPassService::new(
            Arc::new(seeded_store()),
            Arc::new(LogNotifier),
            Arc::new(LogAuditLog),
        )
        .with_page_size(config.review.page_size),
    );

    let app = with_pass_routes(pass_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        page_size = config.review.page_size,
        "exit pass service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryApplicationRepository, TracingNotifier};
use crate::routes::with_application_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use jobflow::config::AppConfig;
use jobflow::error::AppError;
use jobflow::telemetry;
use jobflow::workflows::applications::LifecycleGateway;
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

    let repository = Arc::new(InMemoryApplicationRepository::default());
    let notifier = Arc::new(TracingNotifier);
    let gateway = Arc::new(LifecycleGateway::new(
        repository,
        notifier,
        config.lifecycle.clone(),
    ));
    let resumed = gateway.resume_timers()?;

    let app = with_application_routes(gateway)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        %addr,
        assessment_window_secs = config.lifecycle.assessment_window.as_secs(),
        resumed_timers = resumed,
        "job application lifecycle service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

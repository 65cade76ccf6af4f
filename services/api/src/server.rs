use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use prolink::config::AppConfig;
use prolink::error::AppError;
use prolink::telemetry;
use prolink::workflows::registration::{
    DraftStore, FileStore, HttpDraftGateway, RegistrationService, SessionStore,
};
use tracing::info;

use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_registration_routes;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(backend) = args.backend.take() {
        config.backend.base_url = backend;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(FileStore::new(config.drafts.dir.clone()));
    let gateway = Arc::new(HttpDraftGateway::new(
        config.backend.base_url.clone(),
        config.backend.timeout,
    )?);
    let service = Arc::new(RegistrationService::with_stores(
        DraftStore::with_key(store.clone(), config.drafts.key.clone()),
        SessionStore::new(store),
        gateway,
        config.drafts.service_options(),
    ));

    let app = with_registration_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        backend = %config.backend.base_url,
        drafts = %config.drafts.dir.display(),
        "registration draft service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

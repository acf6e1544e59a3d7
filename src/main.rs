use std::sync::Arc;

use order_tracker::api;
use order_tracker::backend::{HttpBackend, SharedBackend};
use order_tracker::config::Config;
use order_tracker::engine::geolocation::FixedPositionSource;
use order_tracker::engine::tracker::{Tracker, TrackerSettings};
use order_tracker::error::AppError;
use order_tracker::observability::metrics::Metrics;
use order_tracker::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let backend: SharedBackend = Arc::new(HttpBackend::new(
        &config.api_base_url,
        config.api_token.as_deref(),
        config.request_timeout,
    )?);
    let settings = TrackerSettings::from_config(&config)?;
    let position_source = Arc::new(FixedPositionSource::new(config.user_position));

    let tracker = Tracker::start(backend, Metrics::new(), settings, position_source);
    // The daemon is its own consumer: keep the selected order polled even
    // with no websocket client connected.
    let _attached = tracker.attach();

    let state = Arc::new(AppState::new(tracker.clone(), config.clone()));
    let app = api::rest::router(state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        api_base_url = %config.api_base_url,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    tracker.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

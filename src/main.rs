mod api;
mod config;
mod engine;
mod error;
mod events;
mod geo;
mod models;
mod notify;
mod observability;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::api::http::HttpDeliveryApi;
use crate::engine::location::StaticLocationSource;
use crate::engine::session::SessionGate;
use crate::models::courier::GeoPoint;
use crate::notify::LogSignal;
use crate::state::SessionState;

#[tokio::main]
async fn main() -> Result<(), error::DispatchError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let (session_state, _events_rx) =
        SessionState::new(config.courier_id, config.event_buffer_size);
    let shared_state = Arc::new(session_state);

    let delivery_api = Arc::new(HttpDeliveryApi::new(config.api_base_url.clone()));
    let location_source = Arc::new(StaticLocationSource::new(GeoPoint {
        lat: config.courier_lat,
        lng: config.courier_lng,
    }));

    let mut gate = SessionGate::connect(
        &config,
        shared_state.clone(),
        delivery_api,
        location_source,
        Arc::new(LogSignal),
    )
    .await;

    gate.go_online().await?;

    let app = observability::http::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::DispatchError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "debug server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::DispatchError::Internal(format!("server error: {err}")))?;

    gate.go_offline().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

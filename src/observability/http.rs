use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use serde::Serialize;

use crate::models::courier::SessionSnapshot;
use crate::state::SessionState;

pub fn router(state: Arc<SessionState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    session: SessionSnapshot,
}

async fn health(State(state): State<Arc<SessionState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        session: state.snapshot().await,
    })
}

async fn metrics(State(state): State<Arc<SessionState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

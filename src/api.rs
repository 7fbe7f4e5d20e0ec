use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::engine::FeedEngine;
use crate::protocol::Notification;

#[derive(Clone)]
pub struct AppState {
    pub engine: FeedEngine,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/notify", post(notify))
        .route("/status/{instance_id}", get(status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn notify(State(state): State<AppState>, Json(n): Json<Notification>) -> Response {
    // STATUS answers inline; everything else is fire-and-forget.
    if let Notification::Status { instance_id } = &n {
        return status_response(&state, instance_id);
    }
    state.engine.handle(n);
    StatusCode::ACCEPTED.into_response()
}

async fn status(State(state): State<AppState>, Path(instance_id): Path<String>) -> Response {
    status_response(&state, &instance_id)
}

fn status_response(state: &AppState, instance_id: &str) -> Response {
    match state.engine.status(instance_id) {
        Some(report) => Json(report).into_response(),
        None => (StatusCode::NOT_FOUND, "instance not configured").into_response(),
    }
}

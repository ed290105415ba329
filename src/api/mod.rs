//! HTTP and WebSocket surface.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::orchestration::{Command, CommandOutcome};
use crate::runtime::Runtime;
use crate::self_healing::{ActionOutcome, ErrorReport, HealthSummary, TickReport};

pub mod ws;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub health: HealthSummary,
}

pub fn router(runtime: Arc<Runtime>) -> Router {
    let state = AppState { runtime };
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/health/check", post(health_check_handler))
        .route("/api/status", get(status_handler))
        .route("/api/commands", post(command_handler))
        .route("/api/autonomy", get(autonomy_handler))
        .route("/api/autonomy/enable", post(enable_autonomy_handler))
        .route("/api/autonomy/disable", post(disable_autonomy_handler))
        .route("/api/optimize", post(optimize_handler))
        .route("/api/recovery/history", get(recovery_history_handler))
        .route("/api/diagnose", post(diagnose_handler))
        .route("/ws", get(ws::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.runtime.uptime_secs(),
        health: state.runtime.healing().get_health_summary(),
    })
}

async fn health_check_handler(
    State(state): State<AppState>,
) -> Result<Json<TickReport>, ApiError> {
    let healing = Arc::clone(state.runtime.healing());
    tokio::task::spawn_blocking(move || healing.force_health_check())
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map(Json)
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runtime.director().status())
}

async fn command_handler(
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> Json<CommandOutcome> {
    Json(state.runtime.execute(command).await)
}

async fn autonomy_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runtime.healing().get_autonomy_status())
}

async fn enable_autonomy_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.runtime.healing().enable_autonomy();
    Json(json!({ "autonomy_enabled": true }))
}

async fn disable_autonomy_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.runtime.healing().disable_autonomy();
    Json(json!({ "autonomy_enabled": false }))
}

async fn optimize_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let healing = Arc::clone(state.runtime.healing());
    let report = tokio::task::spawn_blocking(move || healing.system_optimize())
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(report).into_response())
}

async fn recovery_history_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runtime.healing().recovery_history())
}

async fn diagnose_handler(
    State(state): State<AppState>,
    Json(report): Json<ErrorReport>,
) -> Json<ActionOutcome> {
    let outcome = state.runtime.healing().handle_error(&report);
    if !outcome.success {
        warn!(category = ?report.category, "No automatic fix for reported error");
    }
    Json(outcome)
}

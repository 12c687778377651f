//! Liveness and readiness endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::batching::ModelState;
use crate::error::GatewayError;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerReady {
    ready: bool,
}

#[derive(Serialize)]
struct ModelReady {
    name: String,
    ready: bool,
    state: ModelState,
}

/// GET /health - Process is up.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /v2/health/ready - Every registered model accepts requests.
async fn server_ready(State(state): State<Arc<AppState>>) -> Response {
    let ready = state
        .gateway
        .models()
        .iter()
        .all(|model| state.gateway.model_state(model) == Some(ModelState::Open));

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ServerReady { ready })).into_response()
}

/// GET /v2/models/:model/ready
async fn model_ready(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
) -> Result<Response, GatewayError> {
    let model_state = state
        .gateway
        .model_state(&model)
        .ok_or_else(|| GatewayError::ModelNotReady(model.clone()))?;

    let ready = model_state == ModelState::Open;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ModelReady {
        name: model,
        ready,
        state: model_state,
    };
    Ok((status, Json(body)).into_response())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/v2/health/ready", get(server_ready))
        .route("/v2/models/:model/ready", get(model_ready))
}

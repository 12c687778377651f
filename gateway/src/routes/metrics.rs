//! Metrics endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use batchgate_common::{BatchingAnalysis, MetricSample};
use serde::Serialize;

use crate::batching::ModelState;
use crate::error::GatewayError;
use crate::AppState;

/// Counters for one model plus its live queue state.
#[derive(Debug, Serialize)]
pub struct ModelStats {
    #[serde(flatten)]
    pub sample: MetricSample,
    pub state: ModelState,
    pub queue_len: usize,
    /// Absent until the first batch has executed.
    pub analysis: Option<BatchingAnalysis>,
}

/// GET /metrics - Prometheus text exposition.
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.render_prometheus();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// GET /v2/models/:model/stats
async fn model_stats(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
) -> Result<Json<ModelStats>, GatewayError> {
    let model_state = state
        .gateway
        .model_state(&model)
        .ok_or_else(|| GatewayError::ModelNotReady(model.clone()))?;

    let sample = state.metrics.snapshot_or_zero(&model);
    let analysis = sample.analysis();
    Ok(Json(ModelStats {
        queue_len: state.gateway.queue_len(&model).unwrap_or(0),
        state: model_state,
        analysis,
        sample,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/v2/models/:model/stats", get(model_stats))
}

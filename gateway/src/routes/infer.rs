//! Inference endpoint.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::{routing::post, Json, Router};
use batchgate_common::{InferRequest, InferResponse};

use crate::error::GatewayError;
use crate::AppState;

/// POST /v2/models/:model/infer
///
/// Waits for the request's batch. If the client disconnects first, the
/// dropped handle withdraws the request from the queue.
async fn infer(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    body: Result<Json<InferRequest>, JsonRejection>,
) -> Result<Json<InferResponse>, GatewayError> {
    let Json(request) = body.map_err(|e| GatewayError::InvalidInput(e.body_text()))?;

    let handle = state.gateway.submit(&model, request.inputs)?;
    tracing::debug!("Queued request {} for model {}", handle.id(), model);
    let outputs = handle.await?;

    Ok(Json(InferResponse {
        model_name: model,
        id: request.id,
        outputs,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v2/models/:model/infer", post(infer))
}

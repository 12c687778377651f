//! KServe-v2 compatible HTTP API.

pub mod health;
pub mod infer;
pub mod metrics;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::router())
        .merge(infer::router())
        .merge(metrics::router())
}

pub mod batching;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod routes;

pub use batching::{BatchPolicy, Gateway, InferenceHandle, ModelState};
pub use crate::config::{Config, ConfigError, ModelConfig};
pub use error::GatewayError;
pub use metrics::MetricsRegistry;
pub use processor::{Processor, ProcessorConfig};

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Register every configured model with a new gateway.
///
/// Models are registered in name order. Must be called from within a tokio
/// runtime.
pub fn build_gateway(
    config: &crate::config::Config,
    metrics: Arc<MetricsRegistry>,
) -> Result<Gateway, crate::config::ConfigError> {
    let gateway = Gateway::new(metrics);

    let mut names: Vec<&String> = config.models.keys().collect();
    names.sort();
    for name in names {
        let model = &config.models[name];
        let invalid = |reason: String| crate::config::ConfigError::Invalid {
            model: name.clone(),
            reason,
        };

        let policy = model.policy(name)?;
        let executor =
            batchgate_executor::build(&model.executor).map_err(|e| invalid(e.to_string()))?;
        let processor = processor::build(name, &model.processor)?;
        gateway
            .register_model(name.clone(), policy, model.instance_count, executor, processor)
            .map_err(|e| invalid(e.to_string()))?;
    }

    Ok(gateway)
}

/// Build the HTTP application with logging and CORS layers.
pub fn app(state: Arc<AppState>) -> Router {
    routes::router()
        .with_state(state)
        .layer(middleware::from_fn(logging::request_logger))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

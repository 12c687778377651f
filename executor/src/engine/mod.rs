//! Model executor abstraction.
//!
//! This module defines the `ModelExecutor` trait that hides how a batch is
//! actually run (a remote inference server, an in-process model) behind a
//! single call per batch.

mod linear;
mod remote;

pub use linear::LinearExecutor;
pub use remote::RemoteExecutor;

use std::sync::Arc;

use async_trait::async_trait;
use batchgate_common::Tensor;

use crate::config::ExecutorConfig;
use crate::error::Result;

/// Runs one batch of already-concatenated inputs.
///
/// Implementations receive tensors whose leading dimension is the batch
/// dimension and must return outputs with the same number of rows.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    /// Short identifier of the executor type (e.g., "remote", "linear").
    fn kind(&self) -> &'static str;

    /// Execute `model` on `inputs`.
    async fn execute(&self, model: &str, inputs: Vec<Tensor>) -> Result<Vec<Tensor>>;
}

/// Build the executor described by `config`.
pub fn build(config: &ExecutorConfig) -> Result<Arc<dyn ModelExecutor>> {
    match config {
        ExecutorConfig::Remote {
            base_url,
            remote_model,
            timeout_secs,
        } => Ok(Arc::new(RemoteExecutor::new(
            base_url,
            remote_model.clone(),
            *timeout_secs,
        )?)),
        ExecutorConfig::Linear { weight, bias } => {
            Ok(Arc::new(LinearExecutor::new(*weight, *bias)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_from_config() {
        let linear = build(&ExecutorConfig::Linear {
            weight: 2.5,
            bias: 0.5,
        })
        .unwrap();
        assert_eq!(linear.kind(), "linear");

        let remote = build(&ExecutorConfig::Remote {
            base_url: "http://localhost:8000".to_string(),
            remote_model: None,
            timeout_secs: 30,
        })
        .unwrap();
        assert_eq!(remote.kind(), "remote");
    }
}

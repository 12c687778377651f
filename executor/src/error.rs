//! Error types for model executors.

use batchgate_common::TensorError;

/// Error types for executor calls.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Upstream returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid executor output: {0}")]
    InvalidOutput(String),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl From<reqwest::Error> for ExecutionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

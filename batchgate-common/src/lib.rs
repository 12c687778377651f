//! batchgate common types
//!
//! Shared by the executors and the gateway.

pub mod metrics;
pub mod protocol;
pub mod tensor;

pub use metrics::{BatchingAnalysis, MetricSample};
pub use protocol::{ErrorBody, InferRequest, InferResponse};
pub use tensor::{DataType, Tensor, TensorData, TensorError};

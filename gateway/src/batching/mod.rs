//! Dynamic batching: queueing, batch formation, and execution.

mod dispatcher;
mod former;
mod gateway;
mod queue;

pub use dispatcher::ExecutionDispatcher;
pub use former::{Batch, BatchFormer, BatchPolicy};
pub use gateway::{Gateway, InferenceHandle, ModelState};
pub use queue::{InferResult, PendingRequest, RequestQueue};

//! batchgate executors - run formed batches against a model.
//!
//! The gateway treats these as an external capability: one `execute` call per
//! dispatched batch.

pub mod config;
pub mod engine;
pub mod error;

pub use config::ExecutorConfig;
pub use engine::{build, LinearExecutor, ModelExecutor, RemoteExecutor};
pub use error::{ExecutionError, Result};

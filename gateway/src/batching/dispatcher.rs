//! Execution dispatcher.
//!
//! Turns a formed batch into one executor call and fans the result back out
//! to the requests that made up the batch.

use std::sync::Arc;

use batchgate_common::{Tensor, TensorError};
use batchgate_executor::ModelExecutor;

use super::former::Batch;
use super::queue::PendingRequest;
use crate::error::GatewayError;
use crate::metrics::MetricsRegistry;
use crate::processor::Processor;

/// Runs batches for one model.
pub struct ExecutionDispatcher {
    executor: Arc<dyn ModelExecutor>,
    processor: Arc<dyn Processor>,
    metrics: Arc<MetricsRegistry>,
}

impl ExecutionDispatcher {
    pub fn new(
        executor: Arc<dyn ModelExecutor>,
        processor: Arc<dyn Processor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            executor,
            processor,
            metrics,
        }
    }

    /// Execute `batch` and resolve every request in it exactly once.
    pub async fn dispatch(&self, batch: Batch) {
        let Batch {
            id,
            model,
            requests,
            formed_at,
        } = batch;

        let size = requests.len();
        let queue_nanos: u64 = requests
            .iter()
            .map(|r| formed_at.saturating_duration_since(r.arrived_at).as_nanos() as u64)
            .sum();
        let rows: Vec<usize> = requests.iter().map(PendingRequest::rows).collect();

        tracing::info!(
            "Dispatching batch {} of {} requests for model {} via {}",
            id,
            size,
            model,
            self.executor.kind()
        );

        let outcome = match concat_inputs(&requests) {
            Ok(inputs) => self
                .executor
                .execute(&model, inputs)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let compute_nanos = formed_at.elapsed().as_nanos() as u64;
        self.metrics
            .record_execution(&model, size, queue_nanos, compute_nanos);

        let per_request = outcome
            .and_then(|outputs| split_outputs(&outputs, &rows).map_err(|e| e.to_string()));

        match per_request {
            Ok(slices) => {
                for (request, outputs) in requests.into_iter().zip(slices) {
                    let result = self.processor.postprocess(outputs);
                    if result.is_ok() {
                        self.metrics.record_success(&model);
                    } else {
                        self.metrics.record_failure(&model);
                    }
                    if !request.resolve(result) {
                        tracing::debug!("Caller for a request in batch {} went away", id);
                    }
                }
            }
            Err(reason) => {
                tracing::warn!(
                    "Batch {} for model {} failed ({} requests): {}",
                    id,
                    model,
                    size,
                    reason
                );
                let error = GatewayError::ExecutionFailed(reason);
                for request in requests {
                    self.metrics.record_failure(&model);
                    request.resolve(Err(error.clone()));
                }
            }
        }
    }
}

/// Stack every request's inputs by name, in request order.
///
/// The first request fixes the input names and their order.
fn concat_inputs(requests: &[PendingRequest]) -> Result<Vec<Tensor>, TensorError> {
    let first = requests.first().ok_or(TensorError::Empty)?;

    first
        .inputs
        .iter()
        .map(|template| {
            let parts = requests
                .iter()
                .map(|r| {
                    if r.inputs.len() != first.inputs.len() {
                        return Err(TensorError::Incompatible(format!(
                            "request {} has {} inputs, expected {}",
                            r.id,
                            r.inputs.len(),
                            first.inputs.len()
                        )));
                    }
                    r.inputs
                        .iter()
                        .find(|t| t.name == template.name)
                        .ok_or_else(|| {
                            TensorError::Incompatible(format!(
                                "request {} is missing input '{}'",
                                r.id, template.name
                            ))
                        })
                })
                .collect::<Result<Vec<&Tensor>, _>>()?;
            Tensor::concat(&parts)
        })
        .collect()
}

/// Split every output along the batch dimension; entry `i` holds request
/// `i`'s slice of each output.
fn split_outputs(outputs: &[Tensor], rows: &[usize]) -> Result<Vec<Vec<Tensor>>, TensorError> {
    if outputs.is_empty() {
        return Err(TensorError::Incompatible(
            "executor returned no outputs".to_string(),
        ));
    }

    let mut per_request: Vec<Vec<Tensor>> = (0..rows.len())
        .map(|_| Vec::with_capacity(outputs.len()))
        .collect();
    for output in outputs {
        for (slot, part) in per_request.iter_mut().zip(output.split(rows)?) {
            slot.push(part);
        }
    }
    Ok(per_request)
}

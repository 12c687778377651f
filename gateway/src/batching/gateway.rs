//! Model registry and request entry point.
//!
//! Every registered model owns a queue, a processor, and a background
//! batching task that cuts batches from the queue and hands them to the
//! model's executor. A model moves `Open -> Draining -> Closed` and never back.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{ready, Context, Poll};

use batchgate_common::Tensor;
use batchgate_executor::ModelExecutor;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{oneshot, watch, Semaphore};
use uuid::Uuid;

use super::dispatcher::ExecutionDispatcher;
use super::former::{BatchFormer, BatchPolicy};
use super::queue::{InferResult, PendingRequest, RequestQueue};
use crate::error::{GatewayError, Result};
use crate::metrics::MetricsRegistry;
use crate::processor::Processor;

/// Lifecycle of a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    /// Accepting requests.
    Open,
    /// Rejecting new requests, flushing queued ones.
    Draining,
    /// Batching task finished; nothing queued or in flight.
    Closed,
}

struct ModelEntry {
    queue: Arc<RequestQueue>,
    processor: Arc<dyn Processor>,
    state: watch::Sender<ModelState>,
}

/// Dynamic batching front end for a set of models.
pub struct Gateway {
    models: RwLock<HashMap<String, Arc<ModelEntry>>>,
    metrics: Arc<MetricsRegistry>,
}

impl Gateway {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    fn entry(&self, model: &str) -> Option<Arc<ModelEntry>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }

    /// Register a model and start its batching task.
    ///
    /// Must be called from within a tokio runtime. `instance_count` bounds
    /// how many of the model's batches execute at once.
    pub fn register_model(
        &self,
        name: impl Into<String>,
        policy: BatchPolicy,
        instance_count: usize,
        executor: Arc<dyn ModelExecutor>,
        processor: Arc<dyn Processor>,
    ) -> Result<()> {
        let name = name.into();
        let instances = u32::try_from(instance_count)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                GatewayError::InvalidPolicy(format!(
                    "instance_count {} is outside 1..={}",
                    instance_count,
                    u32::MAX
                ))
            })?;

        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        if models.contains_key(&name) {
            return Err(GatewayError::ModelExists(name));
        }

        tracing::info!(
            "Registering model {} (executor={}, processor={}, max_batch_size={}, preferred={:?}, max_queue_delay={:?}, instances={})",
            name,
            executor.kind(),
            processor.kind(),
            policy.max_batch_size(),
            policy.preferred_batch_sizes(),
            policy.max_queue_delay(),
            instances
        );

        let queue = Arc::new(RequestQueue::new(name.clone()));
        let (state, _) = watch::channel(ModelState::Open);
        let entry = Arc::new(ModelEntry {
            queue: queue.clone(),
            processor: processor.clone(),
            state,
        });

        let former = BatchFormer::new(policy, queue);
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            executor,
            processor,
            self.metrics.clone(),
        ));
        tokio::spawn(run_batching(entry.clone(), former, dispatcher, instances));

        models.insert(name, entry);
        Ok(())
    }

    /// Validate and queue a request.
    ///
    /// The returned handle resolves once the request's batch has executed.
    pub fn submit(&self, model: &str, inputs: Vec<Tensor>) -> Result<InferenceHandle> {
        let entry = self
            .entry(model)
            .ok_or_else(|| GatewayError::ModelNotReady(model.to_string()))?;

        let result = self.enqueue(&entry, model, inputs);
        if result.is_err() {
            self.metrics.record_failure(model);
        }
        result
    }

    fn enqueue(
        &self,
        entry: &Arc<ModelEntry>,
        model: &str,
        inputs: Vec<Tensor>,
    ) -> Result<InferenceHandle> {
        let state = *entry.state.borrow();
        match state {
            ModelState::Open => {}
            ModelState::Draining => return Err(GatewayError::QueueClosed),
            ModelState::Closed => return Err(GatewayError::ModelNotReady(model.to_string())),
        }

        let inputs = entry.processor.preprocess(inputs)?;
        let (request, rx) = PendingRequest::new(model, inputs);
        let id = request.id;
        entry.queue.enqueue(request)?;

        Ok(InferenceHandle {
            id,
            model: model.to_string(),
            rx,
            queue: Arc::downgrade(&entry.queue),
            done: false,
        })
    }

    /// Submit and wait for the result.
    pub async fn infer(&self, model: &str, inputs: Vec<Tensor>) -> InferResult {
        self.submit(model, inputs)?.await
    }

    /// Stop accepting requests for `model`; queued requests still execute.
    pub fn begin_drain(&self, model: &str) -> Result<()> {
        let entry = self
            .entry(model)
            .ok_or_else(|| GatewayError::ModelNotReady(model.to_string()))?;

        let changed = entry.state.send_if_modified(|state| {
            if *state == ModelState::Open {
                *state = ModelState::Draining;
                true
            } else {
                false
            }
        });
        entry.queue.close();

        if changed {
            tracing::info!(
                "Draining model {} ({} requests queued)",
                model,
                entry.queue.len()
            );
        }
        Ok(())
    }

    /// Wait until `model` is `Closed`.
    pub async fn wait_closed(&self, model: &str) -> Result<()> {
        let entry = self
            .entry(model)
            .ok_or_else(|| GatewayError::ModelNotReady(model.to_string()))?;

        let mut rx = entry.state.subscribe();
        let closed = rx
            .wait_for(|state| *state == ModelState::Closed)
            .await
            .is_ok();
        if closed {
            Ok(())
        } else {
            Err(GatewayError::ModelNotReady(model.to_string()))
        }
    }

    /// `begin_drain` followed by `wait_closed`.
    pub async fn drain(&self, model: &str) -> Result<()> {
        self.begin_drain(model)?;
        self.wait_closed(model).await
    }

    /// Drain every model concurrently.
    pub async fn shutdown(&self) {
        let models = self.models();
        tracing::info!("Shutting down, draining {} models", models.len());

        let results = join_all(models.iter().map(|model| self.drain(model))).await;
        for (model, result) in models.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Failed to drain model {}: {}", model, e);
            }
        }
        tracing::info!("All models closed");
    }

    pub fn model_state(&self, model: &str) -> Option<ModelState> {
        let entry = self.entry(model)?;
        let state = *entry.state.borrow();
        Some(state)
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn queue_len(&self, model: &str) -> Option<usize> {
        self.entry(model).map(|entry| entry.queue.len())
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}

/// Batching loop for one model.
///
/// A permit is taken before each batch is cut, so at most `instances`
/// batches are in flight and no batch is formed that could not run yet.
async fn run_batching(
    entry: Arc<ModelEntry>,
    mut former: BatchFormer,
    dispatcher: Arc<ExecutionDispatcher>,
    instances: u32,
) {
    let permits = Arc::new(Semaphore::new(instances as usize));
    let model = entry.queue.model().to_string();

    loop {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let Some(batch) = former.next_batch().await else {
            break;
        };

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.dispatch(batch).await;
            drop(permit);
        });
    }

    // Every permit back means no batch is still executing.
    if permits.acquire_many(instances).await.is_err() {
        tracing::warn!("Instance semaphore for model {} closed early", model);
    }
    entry.state.send_replace(ModelState::Closed);
    tracing::info!("Model {} closed", model);
}

/// Pending result of a submitted request.
///
/// Resolves to the request's outputs or the error that failed it. Dropping
/// an unresolved handle cancels the request if it is still queued.
pub struct InferenceHandle {
    id: Uuid,
    model: String,
    rx: oneshot::Receiver<InferResult>,
    queue: Weak<RequestQueue>,
    done: bool,
}

impl InferenceHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Withdraw the request if it has not been batched yet.
    ///
    /// On success the handle resolves to `Cancelled`. Returns false if the
    /// request is already part of a batch.
    pub fn cancel(&self) -> bool {
        self.queue
            .upgrade()
            .map(|queue| queue.cancel(self.id))
            .unwrap_or(false)
    }
}

impl Future for InferenceHandle {
    type Output = InferResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.rx).poll(cx));
        self.done = true;
        Poll::Ready(result.unwrap_or_else(|_| {
            Err(GatewayError::ExecutionFailed("result slot dropped".to_string()))
        }))
    }
}

impl Drop for InferenceHandle {
    fn drop(&mut self) {
        if !self.done && self.cancel() {
            tracing::debug!("Request {} for model {} dropped while queued", self.id, self.model);
        }
    }
}

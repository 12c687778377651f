//! Per-model request queue.
//!
//! A FIFO of pending requests guarded by a short-lived lock. Producers
//! (`Gateway::submit`) append; the model's batching task waits on the queue
//! and drains it in arrival order.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use batchgate_common::Tensor;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{GatewayError, Result};

/// Outcome delivered to the caller of a request.
pub type InferResult = std::result::Result<Vec<Tensor>, GatewayError>;

/// A request waiting for its batch.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: Uuid,
    pub model: String,
    pub inputs: Vec<Tensor>,
    pub arrived_at: Instant,
    result_tx: oneshot::Sender<InferResult>,
}

impl PendingRequest {
    /// Create a request and the receiving end of its result slot.
    pub fn new(
        model: impl Into<String>,
        inputs: Vec<Tensor>,
    ) -> (Self, oneshot::Receiver<InferResult>) {
        let (result_tx, result_rx) = oneshot::channel();
        let request = Self {
            id: Uuid::new_v4(),
            model: model.into(),
            inputs,
            arrived_at: Instant::now(),
            result_tx,
        };
        (request, result_rx)
    }

    /// Rows this request contributes to a batch.
    pub fn rows(&self) -> usize {
        self.inputs.first().map(Tensor::rows).unwrap_or(0)
    }

    /// Fulfil the result slot. Returns false if the caller is gone.
    pub fn resolve(self, result: InferResult) -> bool {
        self.result_tx.send(result).is_ok()
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingRequest>,
    closed: bool,
}

impl QueueState {
    fn take(&mut self, n: usize) -> Vec<PendingRequest> {
        let count = n.min(self.pending.len());
        self.pending.drain(..count).collect()
    }
}

/// FIFO of pending requests for one model.
pub struct RequestQueue {
    model: String,
    state: Mutex<QueueState>,
    /// Woken on enqueue and close.
    notify: Notify,
}

impl RequestQueue {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a request and wake the batching task.
    pub fn enqueue(&self, request: PendingRequest) -> Result<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(GatewayError::QueueClosed);
            }
            state.pending.push_back(request);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Wait until `n` requests are queued or `max_wait` elapses, then take up
    /// to `n` of them in arrival order.
    ///
    /// May return fewer than `n`, and returns an empty vec if the wait timed
    /// out with nothing queued. A closed queue never waits.
    pub async fn drain_up_to(&self, n: usize, max_wait: Duration) -> Vec<PendingRequest> {
        let n = n.max(1);
        let deadline = Instant::now() + max_wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue between the check and
            // the await is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.pending.len() >= n || state.closed {
                    return state.take(n);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.lock().take(n);
            }
        }
    }

    /// Wait for at least one queued request and return the queue length.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn wait_nonempty(&self) -> Option<usize> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if !state.pending.is_empty() {
                    return Some(state.pending.len());
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Remove a still-queued request and resolve it with `Cancelled`.
    ///
    /// Returns false if the request already left the queue.
    pub fn cancel(&self, id: Uuid) -> bool {
        let request = {
            let mut state = self.lock();
            match state.pending.iter().position(|r| r.id == id) {
                Some(pos) => state.pending.remove(pos),
                None => None,
            }
        };

        match request {
            Some(request) => {
                tracing::debug!("Cancelled queued request {} for model {}", id, self.model);
                request.resolve(Err(GatewayError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Stop accepting requests. Already queued requests stay drainable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// How long the oldest queued request has been waiting.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.lock().pending.front().map(|r| r.arrived_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tag: f32) -> (PendingRequest, oneshot::Receiver<InferResult>) {
        let input = Tensor::fp32("INPUT__0", vec![1, 1], vec![tag]).unwrap();
        PendingRequest::new("model-a", vec![input])
    }

    fn tag(request: &PendingRequest) -> f32 {
        request.inputs[0].as_fp32().unwrap()[0]
    }

    #[tokio::test]
    async fn test_enqueue_and_len() {
        let queue = RequestQueue::new("model-a");
        assert!(queue.is_empty());

        let (r, _rx) = request(1.0);
        queue.enqueue(r).unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.model(), "model-a");
    }

    #[tokio::test]
    async fn test_drain_returns_when_n_available() {
        let queue = RequestQueue::new("model-a");
        let mut receivers = vec![];
        for i in 0..5 {
            let (r, rx) = request(i as f32);
            queue.enqueue(r).unwrap();
            receivers.push(rx);
        }

        let batch = queue.drain_up_to(3, Duration::from_secs(60)).await;
        let tags: Vec<f32> = batch.iter().map(tag).collect();
        assert_eq!(tags, vec![0.0, 1.0, 2.0]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_with_partial_batch() {
        let queue = RequestQueue::new("model-a");
        let (r, _rx) = request(1.0);
        queue.enqueue(r).unwrap();

        let start = Instant::now();
        let batch = queue.drain_up_to(4, Duration::from_millis(20)).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(start.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_empty_on_timeout() {
        let queue = RequestQueue::new("model-a");
        let batch = queue.drain_up_to(2, Duration::from_millis(5)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_drain_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(RequestQueue::new("model-a"));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain_up_to(2, Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;

        let (a, _rx_a) = request(1.0);
        let (b, _rx_b) = request(2.0);
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        let batch = waiter.await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_flushes() {
        let queue = RequestQueue::new("model-a");
        let (r, _rx) = request(1.0);
        queue.enqueue(r).unwrap();
        queue.close();

        let (late, _late_rx) = request(2.0);
        assert_eq!(queue.enqueue(late), Err(GatewayError::QueueClosed));

        // Closed queues hand out what they have without waiting.
        let batch = queue.drain_up_to(8, Duration::from_secs(60)).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(queue.wait_nonempty().await, None);
    }

    #[tokio::test]
    async fn test_cancel_queued_request() {
        let queue = RequestQueue::new("model-a");
        let (a, rx_a) = request(1.0);
        let (b, _rx_b) = request(2.0);
        let id = a.id;
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert_eq!(rx_a.await.unwrap(), Err(GatewayError::Cancelled));

        let batch = queue.drain_up_to(8, Duration::ZERO).await;
        assert_eq!(batch.iter().map(tag).collect::<Vec<_>>(), vec![2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_age_tracks_front() {
        let queue = RequestQueue::new("model-a");
        assert!(queue.oldest_age().is_none());

        let (r, _rx) = request(1.0);
        queue.enqueue(r).unwrap();
        tokio::time::advance(Duration::from_millis(7)).await;

        assert_eq!(queue.oldest_age(), Some(Duration::from_millis(7)));
    }
}

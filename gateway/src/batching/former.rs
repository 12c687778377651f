//! Batch formation.
//!
//! Decides where one batch ends and the next begins: cut as soon as the
//! target size is queued, or when the oldest request has waited
//! `max_queue_delay`, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::queue::{PendingRequest, RequestQueue};
use crate::error::{GatewayError, Result};

/// Per-model batching configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPolicy {
    max_batch_size: usize,
    preferred_batch_sizes: Vec<usize>,
    max_queue_delay: Duration,
}

impl BatchPolicy {
    /// Build a policy.
    ///
    /// `preferred_batch_sizes` must be strictly ascending and within
    /// `1..=max_batch_size`.
    pub fn new(
        max_batch_size: usize,
        preferred_batch_sizes: Vec<usize>,
        max_queue_delay: Duration,
    ) -> Result<Self> {
        if max_batch_size == 0 {
            return Err(GatewayError::InvalidPolicy(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if let Some(&bad) = preferred_batch_sizes
            .iter()
            .find(|&&s| s == 0 || s > max_batch_size)
        {
            return Err(GatewayError::InvalidPolicy(format!(
                "preferred batch size {} is outside 1..={}",
                bad, max_batch_size
            )));
        }
        if preferred_batch_sizes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(GatewayError::InvalidPolicy(format!(
                "preferred batch sizes {:?} are not strictly ascending",
                preferred_batch_sizes
            )));
        }

        Ok(Self {
            max_batch_size,
            preferred_batch_sizes,
            max_queue_delay,
        })
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn preferred_batch_sizes(&self) -> &[usize] {
        &self.preferred_batch_sizes
    }

    pub fn max_queue_delay(&self) -> Duration {
        self.max_queue_delay
    }

    /// Size to wait for given the current queue length.
    ///
    /// The smallest preferred size that is at least `queue_len`, falling back
    /// to `max_batch_size` when there is none.
    pub fn target_size(&self, queue_len: usize) -> usize {
        self.preferred_batch_sizes
            .iter()
            .copied()
            .find(|&size| size >= queue_len)
            .unwrap_or(self.max_batch_size)
    }
}

/// Requests executed together in one executor call.
#[derive(Debug)]
pub struct Batch {
    pub id: u64,
    pub model: String,
    /// In arrival order.
    pub requests: Vec<PendingRequest>,
    pub formed_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Cuts batches from one model's queue.
pub struct BatchFormer {
    policy: BatchPolicy,
    queue: Arc<RequestQueue>,
    next_id: u64,
}

impl BatchFormer {
    pub fn new(policy: BatchPolicy, queue: Arc<RequestQueue>) -> Self {
        Self {
            policy,
            queue,
            next_id: 0,
        }
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// Wait for and cut the next batch.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn next_batch(&mut self) -> Option<Batch> {
        loop {
            let queued = self.queue.wait_nonempty().await?;
            let target = self.policy.target_size(queued);
            let remaining = self
                .queue
                .oldest_age()
                .map(|age| self.policy.max_queue_delay.saturating_sub(age))
                .unwrap_or(Duration::ZERO);

            let requests = self.queue.drain_up_to(target, remaining).await;
            // Everything queued was cancelled while we waited.
            if requests.is_empty() {
                continue;
            }

            let batch = Batch {
                id: self.next_id,
                model: self.queue.model().to_string(),
                requests,
                formed_at: Instant::now(),
            };
            self.next_id += 1;

            tracing::debug!(
                model = %batch.model,
                batch_id = batch.id,
                size = batch.len(),
                target_size = target,
                "Cut batch"
            );
            return Some(batch);
        }
    }
}

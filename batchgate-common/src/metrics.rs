//! Per-model metric samples and the figures derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of one model's counters.
///
/// Durations are cumulative nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    pub model: String,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub exec_count: u64,
    /// Sum of executed batch sizes.
    pub inference_count: u64,
    pub queue_duration_total: u64,
    pub compute_duration_total: u64,
    pub taken_at: DateTime<Utc>,
}

impl MetricSample {
    /// Derived batching figures, or `None` before the first execution.
    pub fn analysis(&self) -> Option<BatchingAnalysis> {
        if self.exec_count == 0 || self.requests_success == 0 {
            return None;
        }
        let success = self.requests_success as f64;
        let execs = self.exec_count as f64;
        Some(BatchingAnalysis {
            avg_batch_size: success / execs,
            batching_efficiency: 1.0 - execs / success,
            avg_queue_ms_per_request: self.queue_duration_total as f64 / success / 1e6,
            avg_compute_ms_per_execution: self.compute_duration_total as f64 / execs / 1e6,
        })
    }
}

/// Ratios computed from a sample. Approximate: counters are read one by one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchingAnalysis {
    pub avg_batch_size: f64,
    /// Fraction of executor calls saved by batching.
    pub batching_efficiency: f64,
    pub avg_queue_ms_per_request: f64,
    pub avg_compute_ms_per_execution: f64,
}

//! Process-wide inference metrics.
//!
//! One set of atomic counters per model, created on first use. Recording
//! never blocks on other recorders; fields are read one at a time, so ratios
//! derived from a snapshot are approximate.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use batchgate_common::MetricSample;
use chrono::Utc;

#[derive(Debug, Default)]
struct ModelCounters {
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    exec_count: AtomicU64,
    inference_count: AtomicU64,
    queue_duration_ns: AtomicU64,
    compute_duration_ns: AtomicU64,
}

impl ModelCounters {
    fn sample(&self, model: &str) -> MetricSample {
        MetricSample {
            model: model.to_string(),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            exec_count: self.exec_count.load(Ordering::Relaxed),
            inference_count: self.inference_count.load(Ordering::Relaxed),
            queue_duration_total: self.queue_duration_ns.load(Ordering::Relaxed),
            compute_duration_total: self.compute_duration_ns.load(Ordering::Relaxed),
            taken_at: Utc::now(),
        }
    }
}

/// Registry of per-model counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    models: RwLock<HashMap<String, Arc<ModelCounters>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, model: &str) -> Arc<ModelCounters> {
        if let Some(counters) = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
        {
            return counters.clone();
        }

        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(model.to_string())
            .or_default()
            .clone()
    }

    pub fn record_success(&self, model: &str) {
        self.counters(model)
            .requests_success
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, model: &str) {
        self.counters(model)
            .requests_failed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record one executor call.
    ///
    /// `queue_duration_nanos` is the summed wait of every request in the batch.
    pub fn record_execution(
        &self,
        model: &str,
        batch_size: usize,
        queue_duration_nanos: u64,
        compute_duration_nanos: u64,
    ) {
        let counters = self.counters(model);
        counters.exec_count.fetch_add(1, Ordering::Relaxed);
        counters
            .inference_count
            .fetch_add(batch_size as u64, Ordering::Relaxed);
        counters
            .queue_duration_ns
            .fetch_add(queue_duration_nanos, Ordering::Relaxed);
        counters
            .compute_duration_ns
            .fetch_add(compute_duration_nanos, Ordering::Relaxed);
    }

    /// Current counters for `model`, if anything was recorded for it.
    pub fn snapshot(&self, model: &str) -> Option<MetricSample> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .map(|c| c.sample(model))
    }

    /// Like `snapshot`, but all-zero for models with no activity yet.
    pub fn snapshot_or_zero(&self, model: &str) -> MetricSample {
        self.snapshot(model)
            .unwrap_or_else(|| ModelCounters::default().sample(model))
    }

    /// Every model's counters, sorted by model name.
    pub fn snapshot_all(&self) -> Vec<MetricSample> {
        let mut samples: Vec<MetricSample> = self
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(model, c)| c.sample(model))
            .collect();
        samples.sort_by(|a, b| a.model.cmp(&b.model));
        samples
    }

    /// Prometheus text exposition of all models.
    pub fn render_prometheus(&self) -> String {
        let samples = self.snapshot_all();
        let families: [(&str, &str, fn(&MetricSample) -> u64); 6] = [
            (
                "batchgate_request_success",
                "Number of successful inference requests",
                |s| s.requests_success,
            ),
            (
                "batchgate_request_failure",
                "Number of failed inference requests",
                |s| s.requests_failed,
            ),
            (
                "batchgate_inference_count",
                "Number of inferences performed (sum of batch sizes)",
                |s| s.inference_count,
            ),
            (
                "batchgate_exec_count",
                "Number of batched executor calls",
                |s| s.exec_count,
            ),
            (
                "batchgate_queue_duration_us",
                "Cumulative queue duration in microseconds",
                |s| s.queue_duration_total / 1_000,
            ),
            (
                "batchgate_compute_duration_us",
                "Cumulative compute duration in microseconds",
                |s| s.compute_duration_total / 1_000,
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in families {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            for sample in &samples {
                let _ = writeln!(out, "{}{{model=\"{}\"}} {}", name, sample.model, value(sample));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_additive() {
        let metrics = MetricsRegistry::new();
        for size in [3usize, 5, 2] {
            metrics.record_execution("resnet_model", size, 1_000, 2_000);
            for _ in 0..size {
                metrics.record_success("resnet_model");
            }
        }

        let sample = metrics.snapshot("resnet_model").unwrap();
        assert_eq!(sample.requests_success, 10);
        assert_eq!(sample.exec_count, 3);
        assert_eq!(sample.inference_count, 10);
        assert_eq!(sample.queue_duration_total, 3_000);
        assert_eq!(sample.compute_duration_total, 6_000);
        assert_eq!(sample.requests_failed, 0);
    }

    #[test]
    fn test_entries_are_lazy() {
        let metrics = MetricsRegistry::new();
        assert!(metrics.snapshot("sentiment").is_none());
        assert_eq!(metrics.snapshot_or_zero("sentiment").requests_success, 0);

        metrics.record_failure("sentiment");
        assert_eq!(metrics.snapshot("sentiment").unwrap().requests_failed, 1);
    }

    #[test]
    fn test_snapshot_all_sorted() {
        let metrics = MetricsRegistry::new();
        metrics.record_success("b");
        metrics.record_success("a");

        let names: Vec<String> = metrics.snapshot_all().into_iter().map(|s| s.model).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.record_success("m");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot("m").unwrap().requests_success, 8_000);
    }

    #[test]
    fn test_render_prometheus() {
        let metrics = MetricsRegistry::new();
        metrics.record_execution("resnet_model", 4, 8_000, 3_000_000);
        for _ in 0..4 {
            metrics.record_success("resnet_model");
        }

        let text = metrics.render_prometheus();
        assert!(text.contains("# TYPE batchgate_exec_count counter"));
        assert!(text.contains("batchgate_request_success{model=\"resnet_model\"} 4"));
        assert!(text.contains("batchgate_exec_count{model=\"resnet_model\"} 1"));
        assert!(text.contains("batchgate_queue_duration_us{model=\"resnet_model\"} 8"));
        assert!(text.contains("batchgate_compute_duration_us{model=\"resnet_model\"} 3000"));
    }
}

//! Prometheus metrics for the executor worker.
//!
//! All collectors are labeled by `runtime` so one process can host several
//! runtime instances. Registration happens exactly once per process, on
//! first access through [`worker()`]; later calls return the same collectors
//! regardless of how many nodes are constructed.

use prometheus::{
    exponential_buckets, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec,
};
use std::sync::OnceLock;

/// Executor worker collectors, labeled by `runtime`.
pub struct WorkerMetrics {
    /// Number of detected execution discrepancies.
    pub execution_discrepancy_detected_count: IntCounterVec,
    /// Number of aborted batches.
    pub aborted_batch_count: IntCounterVec,
    /// Latency of storage commit calls (state + outputs) in seconds.
    pub storage_commit_latency: HistogramVec,
    /// Time it takes to read a batch from storage in seconds.
    pub batch_read_time: HistogramVec,
    /// Time it takes for a batch to finalize in seconds.
    pub batch_processing_time: HistogramVec,
    /// Time it takes for a batch to be processed by the runtime in seconds.
    pub batch_runtime_processing_time: HistogramVec,
    /// Number of transactions in a batch.
    pub batch_size: HistogramVec,
}

impl WorkerMetrics {
    fn register() -> Self {
        let latency_buckets = exponential_buckets(0.001, 2.0, 16).unwrap();
        let size_buckets = exponential_buckets(1.0, 2.0, 12).unwrap();

        Self {
            execution_discrepancy_detected_count: register_int_counter_vec!(
                "peridot_worker_execution_discrepancy_detected_count",
                "Number of detected execute discrepancies.",
                &["runtime"]
            )
            .unwrap(),
            aborted_batch_count: register_int_counter_vec!(
                "peridot_worker_aborted_batch_count",
                "Number of aborted batches.",
                &["runtime"]
            )
            .unwrap(),
            storage_commit_latency: register_histogram_vec!(
                "peridot_worker_storage_commit_latency",
                "Latency of storage commit calls (state + outputs) (seconds).",
                &["runtime"],
                latency_buckets.clone()
            )
            .unwrap(),
            batch_read_time: register_histogram_vec!(
                "peridot_worker_batch_read_time",
                "Time it takes to read a batch from storage (seconds).",
                &["runtime"],
                latency_buckets.clone()
            )
            .unwrap(),
            batch_processing_time: register_histogram_vec!(
                "peridot_worker_batch_processing_time",
                "Time it takes for a batch to finalize (seconds).",
                &["runtime"],
                latency_buckets.clone()
            )
            .unwrap(),
            batch_runtime_processing_time: register_histogram_vec!(
                "peridot_worker_batch_runtime_processing_time",
                "Time it takes for a batch to be processed by the runtime (seconds).",
                &["runtime"],
                latency_buckets
            )
            .unwrap(),
            batch_size: register_histogram_vec!(
                "peridot_worker_batch_size",
                "Number of transactions in a batch.",
                &["runtime"],
                size_buckets
            )
            .unwrap(),
        }
    }
}

static METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Get the process-wide worker metrics, registering them on first use.
pub fn worker() -> &'static WorkerMetrics {
    METRICS.get_or_init(WorkerMetrics::register)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_idempotent() {
        // A second access must not attempt to re-register the collectors.
        let a = worker() as *const WorkerMetrics;
        let b = worker() as *const WorkerMetrics;
        assert_eq!(a, b);

        worker()
            .aborted_batch_count
            .with_label_values(&["test-runtime"])
            .inc();
        assert_eq!(
            worker()
                .aborted_batch_count
                .with_label_values(&["test-runtime"])
                .get(),
            1
        );
    }
}

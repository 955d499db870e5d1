//! Metrics for the staging queue and batch assembler.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for monitoring queue and batch assembly activity
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    /// Total requests accepted into the queue
    pub requests_enqueued: AtomicU64,

    /// Requests currently queued
    pub requests_queued: AtomicU64,

    /// Requests refused at enqueue because a level was full
    pub requests_rejected_full: AtomicU64,

    /// Requests rejected after their queue deadline passed
    pub requests_timed_out: AtomicU64,

    /// Requests rejected because their shape tensors could not be read
    pub requests_rejected_shape: AtomicU64,

    /// Requests handed to the runner in committed batches
    pub requests_dispatched: AtomicU64,

    /// Number of batches committed
    pub batches_committed: AtomicU64,

    /// Total requests across committed batches (for batch size averaging)
    pub total_batched_requests: AtomicU64,

    /// Maximum queue depth observed
    pub max_queue_depth: AtomicU64,
}

impl BatcherMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request entering the queue
    pub fn record_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::Relaxed);
        let queued = self.requests_queued.fetch_add(1, Ordering::Relaxed) + 1;
        // Update max queue depth if needed
        let mut current_max = self.max_queue_depth.load(Ordering::Relaxed);
        while queued > current_max {
            match self.max_queue_depth.compare_exchange_weak(
                current_max,
                queued,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    /// Record a request refused because its level was full
    pub fn record_rejected_full(&self) {
        self.requests_rejected_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a queued request rejected on deadline expiry
    pub fn record_timed_out(&self) {
        self.requests_queued.fetch_sub(1, Ordering::Relaxed);
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a queued request rejected for unreadable shape tensors
    pub fn record_rejected_shape(&self) {
        self.requests_queued.fetch_sub(1, Ordering::Relaxed);
        self.requests_rejected_shape.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed batch of `batch_size` requests
    pub fn record_batch(&self, batch_size: usize) {
        self.requests_queued.fetch_sub(batch_size as u64, Ordering::Relaxed);
        self.requests_dispatched.fetch_add(batch_size as u64, Ordering::Relaxed);
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.total_batched_requests.fetch_add(batch_size as u64, Ordering::Relaxed);
    }

    /// Get current queue depth
    pub fn queue_depth(&self) -> u64 {
        self.requests_queued.load(Ordering::Relaxed)
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_committed.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        let total = self.total_batched_requests.load(Ordering::Relaxed);
        total as f64 / batches as f64
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::Relaxed),
            requests_queued: self.requests_queued.load(Ordering::Relaxed),
            requests_rejected_full: self.requests_rejected_full.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_rejected_shape: self.requests_rejected_shape.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_enqueued: u64,
    pub requests_queued: u64,
    pub requests_rejected_full: u64,
    pub requests_timed_out: u64,
    pub requests_rejected_shape: u64,
    pub requests_dispatched: u64,
    pub batches_committed: u64,
    pub max_queue_depth: u64,
    pub avg_batch_size: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = BatcherMetrics::new();

        metrics.record_enqueued();
        metrics.record_enqueued();
        assert_eq!(metrics.queue_depth(), 2);

        metrics.record_batch(2);
        assert_eq!(metrics.queue_depth(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_enqueued, 2);
        assert_eq!(snapshot.requests_dispatched, 2);
        assert_eq!(snapshot.batches_committed, 1);
        assert_eq!(snapshot.avg_batch_size, 2.0);
    }

    #[test]
    fn test_max_queue_depth() {
        let metrics = BatcherMetrics::new();

        for _ in 0..5 {
            metrics.record_enqueued();
        }
        metrics.record_batch(3);

        // Max depth remembers the high-water mark
        assert_eq!(metrics.max_queue_depth.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.queue_depth(), 2);
    }

    #[test]
    fn test_rejection_counters() {
        let metrics = BatcherMetrics::new();

        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_timed_out();
        metrics.record_rejected_shape();
        metrics.record_rejected_full();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_timed_out, 1);
        assert_eq!(snapshot.requests_rejected_shape, 1);
        assert_eq!(snapshot.requests_rejected_full, 1);
        assert_eq!(snapshot.requests_queued, 0);
    }

    #[test]
    fn test_avg_batch_size() {
        let metrics = BatcherMetrics::new();
        assert_eq!(metrics.avg_batch_size(), 0.0);

        metrics.record_batch(4);
        metrics.record_batch(6);
        assert_eq!(metrics.avg_batch_size(), 5.0);
    }
}

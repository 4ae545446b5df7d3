//! Recording facade over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code
//! can record unconditionally.

use super::prometheus::{
    ACTIVE_WORKERS, QUEUE_DEPTH, RECORDS_TOTAL, SCAN_EPISODES, SEGMENTS_TOTAL, TASKS_IN_PROGRESS,
    TASKS_TOTAL, TASK_DURATION, UNAVAILABLE_FEATURES,
};

/// Metrics collector for recording episode_forge operational metrics.
///
/// # Example
///
/// ```ignore
/// use episode_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_task("bos", "success", "chunking", 42.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one finished conversion task.
    pub fn record_task(&self, source: &str, status: &str, strategy: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[source, status]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration
                .with_label_values(&[strategy])
                .observe(duration_secs);
        }

        tracing::trace!(
            source = source,
            status = status,
            strategy = strategy,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Record the detector's segment outcome for one episode.
    pub fn record_segments(&self, emitted: usize, dropped: usize) {
        if let Some(segments) = SEGMENTS_TOTAL.get() {
            segments
                .with_label_values(&["emitted"])
                .inc_by(emitted as f64);
            segments
                .with_label_values(&["dropped"])
                .inc_by(dropped as f64);
        }
    }

    pub fn record_records(&self, count: usize) {
        if let Some(records) = RECORDS_TOTAL.get() {
            records.inc_by(count as f64);
        }
    }

    /// Record features of `stream` that had no sample within tolerance.
    pub fn record_unavailable(&self, stream: &str, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(unavailable) = UNAVAILABLE_FEATURES.get() {
            unavailable
                .with_label_values(&[stream])
                .inc_by(count as f64);
        }
    }

    /// Record scanner candidates at one stage (`found`, `ready`, ...).
    pub fn record_scan(&self, stage: &str, count: usize) {
        if let Some(scan) = SCAN_EPISODES.get() {
            scan.with_label_values(&[stage]).inc_by(count as f64);
        }
    }

    /// Update the length of one queue list.
    pub fn update_queue_depth(&self, queue: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.with_label_values(&[queue]).set(depth as f64);
        }

        tracing::trace!(queue = queue, depth = depth, "Updated queue depth metric");
    }

    /// Update the count of active workers.
    pub fn update_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }

        tracing::trace!(count = count, "Updated active workers metric");
    }

    pub fn inc_tasks_in_progress(&self) {
        if let Some(in_progress) = TASKS_IN_PROGRESS.get() {
            in_progress.inc();
        }
    }

    pub fn dec_tasks_in_progress(&self) {
        if let Some(in_progress) = TASKS_IN_PROGRESS.get() {
            in_progress.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_task() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_task("bos", "success", "chunking", 120.5);
        collector.record_task("bos", "failed", "nearest", 3.0);
    }

    #[test]
    fn test_record_alignment_metrics() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_segments(2, 1);
        collector.record_records(50);
        collector.record_unavailable("left_executed", 3);
        collector.record_unavailable("left_executed", 0);
    }

    #[test]
    fn test_update_gauges() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_queue_depth("pending", 42);
        collector.update_workers(8);
        collector.inc_tasks_in_progress();
        collector.dec_tasks_in_progress();
        collector.record_scan("found", 10);
    }
}

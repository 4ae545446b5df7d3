//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by episode_forge and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all episode_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Conversion tasks finished, labeled by source and status.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Conversion duration in seconds, labeled by alignment strategy.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Length of each queue list, labeled by list (`pending`, `processing`, `failed`).
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of tasks currently being converted.
pub static TASKS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of active workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Segments seen by the detector, labeled by outcome (`emitted`, `dropped`).
pub static SEGMENTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Aligned records written.
pub static RECORDS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Record features left unavailable, labeled by arm stream.
pub static UNAVAILABLE_FEATURES: OnceLock<CounterVec> = OnceLock::new();

/// Scanner candidates, labeled by stage.
pub static SCAN_EPISODES: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls build a fresh registry but keep the
/// statics from the first call.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Task metrics
    let tasks_total = CounterVec::new(
        Opts::new("episode_forge_tasks_total", "Conversion tasks finished"),
        &["source", "status"],
    )?;

    let task_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "episode_forge_task_duration_seconds",
            "Conversion duration in seconds",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["strategy"],
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("episode_forge_queue_depth", "Number of tasks per queue list"),
        &["queue"],
    )?;

    let tasks_in_progress = Gauge::new(
        "episode_forge_tasks_in_progress",
        "Number of tasks currently being converted",
    )?;

    let active_workers = Gauge::new("episode_forge_active_workers", "Number of active workers")?;

    // Alignment metrics
    let segments_total = CounterVec::new(
        Opts::new("episode_forge_segments_total", "Segments by detector outcome"),
        &["outcome"],
    )?;

    let records_total = Counter::new("episode_forge_records_total", "Aligned records written")?;

    let unavailable_features = CounterVec::new(
        Opts::new(
            "episode_forge_unavailable_features_total",
            "Record features outside the matching tolerance",
        ),
        &["stream"],
    )?;

    // Scanner metrics
    let scan_episodes = CounterVec::new(
        Opts::new("episode_forge_scan_episodes_total", "Scanner candidates by stage"),
        &["stage"],
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(tasks_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(segments_total.clone()))?;
    registry.register(Box::new(records_total.clone()))?;
    registry.register(Box::new(unavailable_features.clone()))?;
    registry.register(Box::new(scan_episodes.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = TASKS_IN_PROGRESS.set(tasks_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = SEGMENTS_TOTAL.set(segments_total);
    let _ = RECORDS_TOTAL.set(records_total);
    let _ = UNAVAILABLE_FEATURES.set(unavailable_features);
    let _ = SCAN_EPISODES.set(scan_episodes);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();
        if let Some(records) = RECORDS_TOTAL.get() {
            records.inc_by(3.0);
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("episode_forge_records_total"));
    }
}

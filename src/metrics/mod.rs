//! Prometheus metrics.
//!
//! # Example
//!
//! ```ignore
//! use episode_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.record_segments(2, 1);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, QUEUE_DEPTH, RECORDS_TOTAL, REGISTRY, SCAN_EPISODES, SEGMENTS_TOTAL,
    TASKS_IN_PROGRESS, TASKS_TOTAL, TASK_DURATION, UNAVAILABLE_FEATURES,
};

//! Task message and bookkeeping types.
//!
//! - `ConversionTask`: the queue payload
//! - `ClaimedTask`: a task popped by a worker, with its raw payload
//! - `FailedTask`: an entry in the failure sink
//! - `TaskResult`: outcome reported by a worker

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::align::StrategyKind;

/// One episode conversion request.
///
/// Serialized as `{episode_id, source, strategy, config_overrides, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionTask {
    pub episode_id: String,
    /// Fleet or bucket the episode came from; part of the dedup key.
    pub source: String,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Deep-merged over the conversion profile by the worker.
    #[serde(default)]
    pub config_overrides: Map<String, Value>,
    /// Enqueue time, seconds since the Unix epoch.
    pub timestamp: f64,
}

impl ConversionTask {
    pub fn new(
        episode_id: impl Into<String>,
        source: impl Into<String>,
        strategy: StrategyKind,
    ) -> Self {
        Self {
            episode_id: episode_id.into(),
            source: source.into(),
            strategy,
            config_overrides: Map::new(),
            timestamp: Utc::now().timestamp_micros() as f64 / 1e6,
        }
    }

    pub fn with_overrides(mut self, overrides: Map<String, Value>) -> Self {
        self.config_overrides = overrides;
        self
    }

    /// `source:episode_id`, the identity used by the dedup index.
    pub fn dedup_id(&self) -> String {
        format!("{}:{}", self.source, self.episode_id)
    }

    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_micros((self.timestamp * 1e6) as i64).single()
    }
}

/// A task claimed from the queue.
///
/// `payload` is the exact serialized form that sits in the processing list,
/// so the claim can be released without re-serializing.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub task: ConversionTask,
    pub payload: String,
}

/// What `publish` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Enqueued,
    /// A successful conversion is still inside the dedup window.
    SkippedProcessed,
    /// The same episode is already pending or being converted.
    SkippedQueued,
}

impl PublishOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, PublishOutcome::Enqueued)
    }
}

impl std::fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishOutcome::Enqueued => write!(f, "enqueued"),
            PublishOutcome::SkippedProcessed => write!(f, "skipped (already processed)"),
            PublishOutcome::SkippedQueued => write!(f, "skipped (already queued)"),
        }
    }
}

/// Per-source counter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStat {
    Success,
    Failed,
    Published,
    Skipped,
}

impl TaskStat {
    pub const ALL: [TaskStat; 4] = [
        TaskStat::Success,
        TaskStat::Failed,
        TaskStat::Published,
        TaskStat::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStat::Success => "success",
            TaskStat::Failed => "failed",
            TaskStat::Published => "published",
            TaskStat::Skipped => "skipped",
        }
    }
}

/// Counter values for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub success: u64,
    pub failed: u64,
    pub published: u64,
    pub skipped: u64,
}

impl SourceStats {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, stat: TaskStat, value: u64) {
        match stat {
            TaskStat::Success => self.success = value,
            TaskStat::Failed => self.failed = value,
            TaskStat::Published => self.published = value,
            TaskStat::Skipped => self.skipped = value,
        }
    }

    pub fn get(&self, stat: TaskStat) -> u64 {
        match stat {
            TaskStat::Success => self.success,
            TaskStat::Failed => self.failed,
            TaskStat::Published => self.published,
            TaskStat::Skipped => self.skipped,
        }
    }
}

/// Failure sink entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task: ConversionTask,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl FailedTask {
    pub fn new(task: ConversionTask, error: impl Into<String>) -> Self {
        Self {
            task,
            error: error.into(),
            failed_at: Utc::now(),
            worker_id: None,
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }
}

/// Terminal state of one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What a worker reports after handling a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub episode_id: String,
    pub source: String,
    pub status: TaskStatus,
    /// Dataset episodes written (one per kept segment).
    pub episodes: usize,
    pub frames: usize,
    pub error: Option<String>,
    pub worker_id: String,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(
        task: &ConversionTask,
        worker_id: impl Into<String>,
        episodes: usize,
        frames: usize,
        duration_ms: u64,
    ) -> Self {
        Self {
            episode_id: task.episode_id.clone(),
            source: task.source.clone(),
            status: TaskStatus::Succeeded,
            episodes,
            frames,
            error: None,
            worker_id: worker_id.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(
        task: &ConversionTask,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            episode_id: task.episode_id.clone(),
            source: task.source.clone(),
            status: TaskStatus::Failed,
            episodes: 0,
            frames: 0,
            error: Some(error.into()),
            worker_id: worker_id.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

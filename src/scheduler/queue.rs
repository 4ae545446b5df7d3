//! Conversion task queue with a dedup index and failure sink.
//!
//! # Key layout (Redis)
//!
//! All keys live under a configurable prefix `<p>`:
//!
//! - `<p>:pending`: FIFO of task payloads (LPUSH in, BRPOPLPUSH out)
//! - `<p>:processing`: payloads claimed by a worker (for crash recovery)
//! - `<p>:failed`: failure sink, newest first
//! - `<p>:processed:<source>:<episode_id>`: dedup key, written on success, with TTL
//! - `<p>:queued:<source>:<episode_id>`: in-flight marker, set on publish
//! - `<p>:stats:<source>`: hash of `success`, `failed`, `published`, `skipped`
//! - `<p>:sources`: set of sources that have counters
//! - `<p>:scan_cursor`: last episode key the scanner committed
//!
//! # Reliability
//!
//! A claim moves the payload atomically from `pending` to `processing`. A
//! worker releases it with [`TaskQueue::ack`] after recording the outcome.
//! Payloads left in `processing` by a crashed worker are re-queued by
//! [`TaskQueue::recover_processing`]. The list is shared by every pool on
//! the queue, so recovery is an operator action taken while no pool runs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use super::job::{ClaimedTask, ConversionTask, FailedTask, PublishOutcome, SourceStats, TaskStat};
use crate::pipeline::config::ConfigError;

/// Default lifetime of a dedup key.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

pub const DEFAULT_QUEUE_PREFIX: &str = "episode_forge";

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize or parse a task payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Queue settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub redis_url: String,
    pub prefix: String,
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            prefix: DEFAULT_QUEUE_PREFIX.to_string(),
            dedup_ttl: DEFAULT_DEDUP_TTL,
        }
    }
}

impl QueueConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue prefix must not be empty".to_string(),
            ));
        }
        if self.dedup_ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "dedup TTL must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lengths of the queue lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.failed
    }
}

/// The narrow interface the scanner, workers and CLI use.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues `task` unless it is deduplicated. `force` clears both the
    /// dedup key and the in-flight marker first.
    async fn publish(&self, task: &ConversionTask, force: bool) -> Result<PublishOutcome, QueueError>;

    /// Claims the oldest pending task, waiting up to `timeout`.
    async fn pop(&self, timeout: Duration) -> Result<Option<ClaimedTask>, QueueError>;

    /// Releases a claim and clears the in-flight marker.
    async fn ack(&self, claimed: &ClaimedTask) -> Result<(), QueueError>;

    /// Appends an entry to the failure sink.
    async fn push_failed(&self, entry: &FailedTask) -> Result<(), QueueError>;

    /// Writes the dedup key for a successful conversion.
    async fn mark_processed(&self, task: &ConversionTask) -> Result<(), QueueError>;

    async fn is_processed(&self, source: &str, episode_id: &str) -> Result<bool, QueueError>;

    async fn incr_stat(&self, source: &str, stat: TaskStat) -> Result<(), QueueError>;

    async fn stats(&self, source: &str) -> Result<SourceStats, QueueError>;

    /// Sources with counters, sorted.
    async fn sources(&self) -> Result<Vec<String>, QueueError>;

    async fn queue_stats(&self) -> Result<QueueStats, QueueError>;

    /// Newest failure entries first.
    async fn peek_failed(&self, limit: usize) -> Result<Vec<FailedTask>, QueueError>;

    /// Moves every claimed-but-unreleased payload back to pending,
    /// including claims held by live workers.
    async fn recover_processing(&self) -> Result<usize, QueueError>;

    async fn cursor(&self) -> Result<Option<String>, QueueError>;

    async fn set_cursor(&self, key: &str) -> Result<(), QueueError>;

    async fn reset_cursor(&self) -> Result<(), QueueError>;

    /// Number of pending tasks.
    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.queue_stats().await?.pending)
    }

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Number of entries in the failure sink.
    async fn failed_len(&self) -> Result<usize, QueueError> {
        Ok(self.queue_stats().await?.failed)
    }
}

/// Redis-backed [`TaskQueue`].
pub struct RedisTaskQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    prefix: String,
    dedup_ttl: Duration,
}

impl RedisTaskQueue {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, config))
    }

    /// Creates a queue from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, config: &QueueConfig) -> Self {
        Self {
            redis,
            prefix: config.prefix.clone(),
            dedup_ttl: config.dedup_ttl,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn processed_key(&self, source: &str, episode_id: &str) -> String {
        format!("{}:processed:{}:{}", self.prefix, source, episode_id)
    }

    fn queued_key(&self, source: &str, episode_id: &str) -> String {
        format!("{}:queued:{}:{}", self.prefix, source, episode_id)
    }

    fn stats_key(&self, source: &str) -> String {
        format!("{}:stats:{}", self.prefix, source)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn publish(&self, task: &ConversionTask, force: bool) -> Result<PublishOutcome, QueueError> {
        let mut conn = self.redis.clone();
        let processed = self.processed_key(&task.source, &task.episode_id);
        let queued = self.queued_key(&task.source, &task.episode_id);

        if force {
            conn.del::<_, ()>(vec![processed.clone(), queued.clone()])
                .await?;
        } else if conn.exists::<_, bool>(&processed).await? {
            self.incr_stat(&task.source, TaskStat::Skipped).await?;
            return Ok(PublishOutcome::SkippedProcessed);
        }

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&queued)
            .arg(task.timestamp)
            .arg("NX")
            .arg("EX")
            .arg(self.dedup_ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            self.incr_stat(&task.source, TaskStat::Skipped).await?;
            return Ok(PublishOutcome::SkippedQueued);
        }

        let payload = serde_json::to_string(task)?;
        conn.lpush::<_, _, ()>(self.key("pending"), payload).await?;
        self.incr_stat(&task.source, TaskStat::Published).await?;
        Ok(PublishOutcome::Enqueued)
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<ClaimedTask>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from source and pushes to destination
        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.key("pending"))
            .arg(self.key("processing"))
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        let Some(payload) = result else {
            return Ok(None);
        };
        match serde_json::from_str::<ConversionTask>(&payload) {
            Ok(task) => Ok(Some(ClaimedTask { task, payload })),
            Err(e) => {
                // Unparseable payloads would otherwise be re-queued forever.
                tracing::error!(payload = %payload, error = %e, "Dropping malformed task payload");
                conn.lrem::<_, _, ()>(self.key("processing"), 1, &payload).await?;
                Err(e.into())
            }
        }
    }

    async fn ack(&self, claimed: &ClaimedTask) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.key("processing"), 1, &claimed.payload)
            .del(self.queued_key(&claimed.task.source, &claimed.task.episode_id));
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn push_failed(&self, entry: &FailedTask) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let serialized = serde_json::to_string(entry)?;
        conn.lpush::<_, _, ()>(self.key("failed"), serialized).await?;
        Ok(())
    }

    async fn mark_processed(&self, task: &ConversionTask) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("SET")
            .arg(self.processed_key(&task.source, &task.episode_id))
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("EX")
            .arg(self.dedup_ttl.as_secs())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_processed(&self, source: &str, episode_id: &str) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.exists(self.processed_key(source, episode_id)).await?)
    }

    async fn incr_stat(&self, source: &str, stat: TaskStat) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.hincr(self.stats_key(source), stat.as_str(), 1)
            .ignore()
            .sadd(self.key("sources"), source)
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn stats(&self, source: &str) -> Result<SourceStats, QueueError> {
        let mut conn = self.redis.clone();
        let raw: HashMap<String, u64> = conn.hgetall(self.stats_key(source)).await?;
        let mut stats = SourceStats::new(source);
        for stat in TaskStat::ALL {
            stats.set(stat, raw.get(stat.as_str()).copied().unwrap_or(0));
        }
        Ok(stats)
    }

    async fn sources(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.redis.clone();
        let mut sources: Vec<String> = conn.smembers(self.key("sources")).await?;
        sources.sort();
        Ok(sources)
    }

    async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.redis.clone();
        let (pending, processing, failed): (usize, usize, usize) = redis::pipe()
            .llen(self.key("pending"))
            .llen(self.key("processing"))
            .llen(self.key("failed"))
            .query_async(&mut conn)
            .await?;
        Ok(QueueStats {
            pending,
            processing,
            failed,
        })
    }

    async fn peek_failed(&self, limit: usize) -> Result<Vec<FailedTask>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(self.key("failed"), 0, limit as isize - 1)
            .await?;

        let entries: Result<Vec<FailedTask>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();
        Ok(entries?)
    }

    async fn recover_processing(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let processing = self.key("processing");
        let pending = self.key("pending");

        let payloads: Vec<String> = conn.lrange(&processing, 0, -1).await?;
        let mut recovered = 0;
        for payload in payloads {
            // RPUSH puts recovered work at the consuming end of the FIFO.
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(&processing, 1, &payload)
                .rpush(&pending, &payload);
            pipe.query_async::<_, ()>(&mut conn).await?;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!(recovered, "Re-queued tasks left in processing");
        }
        Ok(recovered)
    }

    async fn cursor(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.get(self.key("scan_cursor")).await?)
    }

    async fn set_cursor(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(self.key("scan_cursor"), key).await?;
        Ok(())
    }

    async fn reset_cursor(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(self.key("scan_cursor")).await?;
        Ok(())
    }
}

//! Worker pool for converting episodes from the task queue.
//!
//! Each worker runs as an independent async task, claims one task at a
//! time and records the outcome:
//!
//! - success: dedup key written, `success` counter incremented
//! - failure (error or panic): entry pushed to the failure sink, `failed`
//!   counter incremented, no dedup key so the episode can be re-published
//!
//! Either way the claim is released afterwards. Conversions run in their
//! own spawned task so that a panic is contained to that task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{ClaimedTask, ConversionTask, FailedTask, TaskResult, TaskStat};
use super::queue::{QueueError, TaskQueue};
use crate::metrics::MetricsCollector;
use crate::pipeline::{ConversionOutcome, ConvertError};

/// Default number of concurrent conversions.
pub const DEFAULT_NUM_WORKERS: usize = 8;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The queue could not be reached.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Runs one conversion. Implemented by the episode converter.
#[async_trait]
pub trait TaskProcessor: Send + Sync + 'static {
    async fn process(&self, task: &ConversionTask) -> Result<ConversionOutcome, ConvertError>;
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn. Bounds concurrent memory use.
    pub num_workers: usize,
    /// How long a worker waits on an empty queue before checking for shutdown.
    pub poll_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Re-queue the whole processing list before the workers start.
    ///
    /// Only safe when no other pool is consuming the same queue, since
    /// the claims of a live pool look exactly like orphaned ones.
    pub recover_on_start: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(600),
            recover_on_start: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enables crash recovery on start.
    pub fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently converting.
    pub active_workers: usize,
    /// Tasks converted successfully.
    pub tasks_completed: u64,
    /// Tasks that failed or panicked.
    pub tasks_failed: u64,
    /// Average task duration.
    pub average_task_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of tasks processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.tasks_completed.load(Ordering::SeqCst);
        let failed = self.tasks_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total = completed + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            tasks_completed: completed,
            tasks_failed: failed,
            average_task_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers consuming one queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn TaskQueue>,
    processor: Arc<dyn TaskProcessor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    metrics: MetricsCollector,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn TaskQueue>,
        processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            processor,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
            metrics: MetricsCollector::new(),
        }
    }

    /// Starts all workers.
    ///
    /// Claims already in the processing list are left alone unless
    /// `recover_on_start` is set; they may belong to another live pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        if self.config.recover_on_start {
            match self.queue.recover_processing().await {
                Ok(recovered) => {
                    if recovered > 0 {
                        info!(recovered = recovered, "Recovered tasks from processing list");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to recover processing tasks");
                }
            }
        }

        for i in 0..self.config.num_workers {
            let worker = Worker::new(
                format!("worker-{}", i),
                Arc::clone(&self.queue),
                Arc::clone(&self.processor),
                self.shutdown_tx.subscribe(),
                self.config.poll_interval,
                Arc::clone(&self.stats),
            );

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        self.metrics.update_workers(self.config.num_workers);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Signals all workers and waits for their current task to finish.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let timeout = self.config.shutdown_timeout;
        let handles: Vec<JoinHandle<()>> = self.worker_handles.drain(..).collect();
        let shutdown_future = async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.update_workers(0);

        match result {
            Ok(()) => {
                info!(stats = ?self.stats(), "Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }
}

/// A single worker that processes tasks from the queue.
pub struct Worker {
    id: String,
    queue: Arc<dyn TaskQueue>,
    processor: Arc<dyn TaskProcessor>,
    shutdown_rx: broadcast::Receiver<()>,
    /// Interval between poll attempts when queue is empty.
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    fn new(
        id: String,
        queue: Arc<dyn TaskQueue>,
        processor: Arc<dyn TaskProcessor>,
        shutdown_rx: broadcast::Receiver<()>,
        poll_interval: Duration,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            shutdown_rx,
            poll_interval,
            stats,
            metrics: MetricsCollector::new(),
        }
    }

    /// Claims and converts tasks until a shutdown signal is received.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.pop(self.poll_interval).await {
                Ok(Some(claimed)) => {
                    self.process_task(claimed).await;
                    self.refresh_queue_depth().await;
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No tasks available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to claim task");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Converts one claimed task and records its outcome.
    async fn process_task(&self, claimed: ClaimedTask) -> TaskResult {
        let task = &claimed.task;
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            episode_id = %task.episode_id,
            source = %task.source,
            strategy = %task.strategy,
            "Processing task"
        );

        self.stats.increment_active();
        self.metrics.inc_tasks_in_progress();

        let outcome = self.execute(task).await;
        let duration = start_time.elapsed();

        self.stats.decrement_active();
        self.metrics.dec_tasks_in_progress();

        let result = match outcome {
            Ok(outcome) => {
                self.stats.record_completion(duration);
                self.record_success(task).await;
                info!(
                    worker_id = %self.id,
                    episode_id = %task.episode_id,
                    source = %task.source,
                    episodes = outcome.episodes,
                    frames = outcome.frames,
                    duration_ms = duration.as_millis() as u64,
                    "Task completed"
                );
                TaskResult::success(
                    task,
                    &self.id,
                    outcome.episodes,
                    outcome.frames,
                    duration.as_millis() as u64,
                )
            }
            Err(message) => {
                self.stats.record_failure(duration);
                self.record_failure(task, &message).await;
                warn!(
                    worker_id = %self.id,
                    episode_id = %task.episode_id,
                    source = %task.source,
                    error = %message,
                    "Task failed"
                );
                TaskResult::failure(task, &self.id, message, duration.as_millis() as u64)
            }
        };

        if let Err(e) = self.queue.ack(&claimed).await {
            error!(
                worker_id = %self.id,
                episode_id = %task.episode_id,
                error = %e,
                "Failed to release task claim"
            );
        }

        self.metrics.record_task(
            &task.source,
            &result.status.to_string(),
            task.strategy.as_str(),
            duration.as_secs_f64(),
        );
        result
    }

    /// Runs the processor in its own task so a panic becomes an error.
    async fn execute(&self, task: &ConversionTask) -> Result<ConversionOutcome, String> {
        let processor = Arc::clone(&self.processor);
        let owned = task.clone();
        let handle = tokio::spawn(async move { processor.process(&owned).await });

        match handle.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err(format!("conversion panicked: {}", panic_message(e))),
            Err(e) => Err(format!("conversion task aborted: {}", e)),
        }
    }

    async fn record_success(&self, task: &ConversionTask) {
        if let Err(e) = self.queue.mark_processed(task).await {
            error!(worker_id = %self.id, episode_id = %task.episode_id, error = %e, "Failed to write dedup key");
        }
        if let Err(e) = self.queue.incr_stat(&task.source, TaskStat::Success).await {
            error!(worker_id = %self.id, error = %e, "Failed to increment success counter");
        }
    }

    async fn record_failure(&self, task: &ConversionTask, message: &str) {
        let entry = FailedTask::new(task.clone(), message).with_worker(&self.id);
        if let Err(e) = self.queue.push_failed(&entry).await {
            error!(worker_id = %self.id, episode_id = %task.episode_id, error = %e, "Failed to push to failure sink");
        }
        if let Err(e) = self.queue.incr_stat(&task.source, TaskStat::Failed).await {
            error!(worker_id = %self.id, error = %e, "Failed to increment failure counter");
        }
    }

    async fn refresh_queue_depth(&self) {
        if let Ok(stats) = self.queue.queue_stats().await {
            self.metrics.update_queue_depth("pending", stats.pending);
            self.metrics.update_queue_depth("processing", stats.processing);
            self.metrics.update_queue_depth("failed", stats.failed);
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

//! In-process [`TaskQueue`] for tests and single-host runs.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::job::{ClaimedTask, ConversionTask, FailedTask, PublishOutcome, SourceStats, TaskStat};
use super::queue::{QueueError, QueueStats, TaskQueue, DEFAULT_DEDUP_TTL};

#[derive(Default)]
struct State {
    pending: VecDeque<String>,
    processing: Vec<String>,
    /// Newest first.
    failed: VecDeque<FailedTask>,
    processed: HashMap<String, Instant>,
    queued: HashSet<String>,
    stats: BTreeMap<String, SourceStats>,
    cursor: Option<String>,
}

impl State {
    fn bump(&mut self, source: &str, stat: TaskStat) {
        let stats = self
            .stats
            .entry(source.to_string())
            .or_insert_with(|| SourceStats::new(source));
        stats.set(stat, stats.get(stat) + 1);
    }
}

/// Mirrors the Redis queue semantics in memory.
pub struct MemoryTaskQueue {
    state: Mutex<State>,
    notify: Notify,
    dedup_ttl: Duration,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}

impl MemoryTaskQueue {
    pub fn new(dedup_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            dedup_ttl,
        }
    }

    async fn try_claim(&self) -> Result<Option<ClaimedTask>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(payload) = state.pending.pop_front() else {
            return Ok(None);
        };
        let task: ConversionTask = serde_json::from_str(&payload)?;
        state.processing.push(payload.clone());
        Ok(Some(ClaimedTask { task, payload }))
    }

    fn is_live(&self, written: Instant) -> bool {
        written.elapsed() < self.dedup_ttl
    }

    /// Drops expired dedup keys, as Redis does with the key TTL.
    fn prune_processed(&self, state: &mut State) {
        let ttl = self.dedup_ttl;
        state.processed.retain(|_, written| written.elapsed() < ttl);
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn publish(&self, task: &ConversionTask, force: bool) -> Result<PublishOutcome, QueueError> {
        let id = task.dedup_id();
        let payload = serde_json::to_string(task)?;
        let mut state = self.state.lock().await;
        self.prune_processed(&mut state);

        if force {
            state.processed.remove(&id);
            state.queued.remove(&id);
        } else if state.processed.contains_key(&id) {
            state.bump(&task.source, TaskStat::Skipped);
            return Ok(PublishOutcome::SkippedProcessed);
        }

        if !state.queued.insert(id) {
            state.bump(&task.source, TaskStat::Skipped);
            return Ok(PublishOutcome::SkippedQueued);
        }

        state.pending.push_back(payload);
        state.bump(&task.source, TaskStat::Published);
        drop(state);
        self.notify.notify_one();
        Ok(PublishOutcome::Enqueued)
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<ClaimedTask>, QueueError> {
        if let Some(claimed) = self.try_claim().await? {
            return Ok(Some(claimed));
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.try_claim().await
    }

    async fn ack(&self, claimed: &ClaimedTask) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.processing.iter().position(|p| p == &claimed.payload) {
            state.processing.remove(pos);
        }
        state.queued.remove(&claimed.task.dedup_id());
        Ok(())
    }

    async fn push_failed(&self, entry: &FailedTask) -> Result<(), QueueError> {
        self.state.lock().await.failed.push_front(entry.clone());
        Ok(())
    }

    async fn mark_processed(&self, task: &ConversionTask) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        self.prune_processed(&mut state);
        state.processed.insert(task.dedup_id(), Instant::now());
        Ok(())
    }

    async fn is_processed(&self, source: &str, episode_id: &str) -> Result<bool, QueueError> {
        let state = self.state.lock().await;
        Ok(state
            .processed
            .get(&format!("{}:{}", source, episode_id))
            .is_some_and(|written| self.is_live(*written)))
    }

    async fn incr_stat(&self, source: &str, stat: TaskStat) -> Result<(), QueueError> {
        self.state.lock().await.bump(source, stat);
        Ok(())
    }

    async fn stats(&self, source: &str) -> Result<SourceStats, QueueError> {
        let state = self.state.lock().await;
        Ok(state
            .stats
            .get(source)
            .cloned()
            .unwrap_or_else(|| SourceStats::new(source)))
    }

    async fn sources(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.state.lock().await.stats.keys().cloned().collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            failed: state.failed.len(),
        })
    }

    async fn peek_failed(&self, limit: usize) -> Result<Vec<FailedTask>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.failed.iter().take(limit).cloned().collect())
    }

    async fn recover_processing(&self) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        let recovered: Vec<String> = state.processing.drain(..).collect();
        let count = recovered.len();
        for payload in recovered.into_iter().rev() {
            state.pending.push_front(payload);
        }
        drop(state);
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    async fn cursor(&self) -> Result<Option<String>, QueueError> {
        Ok(self.state.lock().await.cursor.clone())
    }

    async fn set_cursor(&self, key: &str) -> Result<(), QueueError> {
        self.state.lock().await.cursor = Some(key.to_string());
        Ok(())
    }

    async fn reset_cursor(&self) -> Result<(), QueueError> {
        self.state.lock().await.cursor = None;
        Ok(())
    }
}

//! Episode scanner: finds fully uploaded episodes and publishes tasks.
//!
//! Each cycle lists the storage root, keeps first-level directories whose
//! name matches the episode pattern, checks readiness, and publishes a
//! conversion task for every ready episode. A persisted cursor (the last
//! committed episode id) lets later cycles skip what was already seen.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use super::job::{ConversionTask, PublishOutcome};
use super::queue::{QueueError, TaskQueue};
use crate::align::StrategyKind;
use crate::error::TransferError;
use crate::metrics::MetricsCollector;
use crate::storage::{join_key, ObjectStore};

pub const DEFAULT_EPISODE_PATTERN: &str = r"^episode_\d+$";

/// Errors that stop a scan cycle.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid episode pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Listing failed: {0}")]
    Transfer(#[from] TransferError),
}

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Storage prefix whose first-level directories are episodes.
    pub root: String,
    /// Source label written into every task.
    pub source: String,
    pub strategy: StrategyKind,
    pub config_overrides: Map<String, Value>,
    pub episode_pattern: String,
    /// Minimum number of objects an episode needs before it is ready.
    pub min_file_count: usize,
    /// When set, an episode is ready only if two listings this far apart
    /// agree on object count and total size.
    pub stability_wait: Option<Duration>,
    /// Ignore the cursor for this scan.
    pub full_scan: bool,
    pub interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            root: String::new(),
            source: "default".to_string(),
            strategy: StrategyKind::default(),
            config_overrides: Map::new(),
            episode_pattern: DEFAULT_EPISODE_PATTERN.to_string(),
            min_file_count: 1,
            stability_wait: None,
            full_scan: false,
            interval: Duration::from_secs(300),
        }
    }
}

/// Counters of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub found: usize,
    pub ready: usize,
    pub not_ready: usize,
    pub published: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Cursor value after the cycle.
    pub cursor: Option<String>,
}

/// Object count and total size of one episode listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    files: usize,
    bytes: u64,
}

pub struct EpisodeScanner {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn TaskQueue>,
    config: ScannerConfig,
    pattern: Regex,
    metrics: MetricsCollector,
}

impl EpisodeScanner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn TaskQueue>,
        config: ScannerConfig,
    ) -> Result<Self, ScanError> {
        let pattern = Regex::new(&config.episode_pattern)?;
        Ok(Self {
            store,
            queue,
            config,
            pattern,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Runs one scan cycle.
    pub async fn scan_once(&self) -> Result<ScanReport, ScanError> {
        let stored = self.queue.cursor().await?;
        let cursor = if self.config.full_scan {
            None
        } else {
            stored.clone()
        };

        let mut candidates: Vec<String> = self
            .store
            .list_dirs(&self.config.root)
            .await?
            .into_iter()
            .filter(|name| self.pattern.is_match(name))
            .filter(|name| {
                cursor
                    .as_deref()
                    .map_or(true, |c| episode_order(name, c) == Ordering::Greater)
            })
            .collect();
        candidates.sort_by(|a, b| episode_order(a, b));

        let mut report = ScanReport {
            found: candidates.len(),
            cursor: stored.clone(),
            ..Default::default()
        };

        let readiness = self.check_readiness(&candidates).await;

        let mut blocked = false;
        let mut committed = None;
        for (episode_id, ready) in candidates.iter().zip(readiness) {
            match ready {
                Ok(true) => report.ready += 1,
                Ok(false) => {
                    report.not_ready += 1;
                    blocked = true;
                    tracing::debug!(episode_id = %episode_id, "Episode not ready yet");
                    continue;
                }
                Err(e) => {
                    report.errors += 1;
                    blocked = true;
                    tracing::warn!(episode_id = %episode_id, error = %e, "Readiness check failed");
                    continue;
                }
            }

            let task = ConversionTask::new(episode_id, &self.config.source, self.config.strategy)
                .with_overrides(self.config.config_overrides.clone());
            match self.queue.publish(&task, false).await {
                Ok(PublishOutcome::Enqueued) => {
                    report.published += 1;
                    tracing::info!(
                        episode_id = %episode_id,
                        source = %self.config.source,
                        strategy = %self.config.strategy,
                        "Task published"
                    );
                }
                Ok(outcome) => {
                    report.skipped += 1;
                    tracing::debug!(episode_id = %episode_id, outcome = %outcome, "Publish skipped");
                }
                Err(e) => {
                    report.errors += 1;
                    blocked = true;
                    tracing::warn!(episode_id = %episode_id, error = %e, "Publish failed");
                    continue;
                }
            }

            if !blocked {
                committed = Some(episode_id.clone());
            }
        }

        // The cursor only moves forward; a full scan never rewinds it.
        if let Some(last) = committed {
            let advances = stored
                .as_deref()
                .map_or(true, |c| episode_order(&last, c) == Ordering::Greater);
            if advances {
                self.queue.set_cursor(&last).await?;
                report.cursor = Some(last);
            }
        }

        self.record(&report);
        tracing::info!(
            found = report.found,
            ready = report.ready,
            not_ready = report.not_ready,
            published = report.published,
            skipped = report.skipped,
            errors = report.errors,
            cursor = report.cursor.as_deref().unwrap_or("-"),
            "Scan cycle finished"
        );
        Ok(report)
    }

    /// Scans every `interval` until `shutdown` fires. Cycle errors are
    /// logged and the loop continues.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Scanner received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::error!(error = %e, "Scan cycle failed");
                    }
                }
            }
        }
    }

    async fn check_readiness(&self, candidates: &[String]) -> Vec<Result<bool, TransferError>> {
        let mut first = Vec::with_capacity(candidates.len());
        for episode_id in candidates {
            first.push(self.snapshot(episode_id).await);
        }

        let min = self.config.min_file_count;
        let Some(wait) = self.config.stability_wait else {
            return first.into_iter().map(|s| s.map(|s| s.files >= min)).collect();
        };

        let needs_second = first
            .iter()
            .any(|s| matches!(s, Ok(snap) if snap.files >= min));
        if needs_second {
            tokio::time::sleep(wait).await;
        }

        let mut results = Vec::with_capacity(candidates.len());
        for (episode_id, before) in candidates.iter().zip(first) {
            let result = match before {
                Ok(before) if before.files >= min => self
                    .snapshot(episode_id)
                    .await
                    .map(|after| after == before),
                Ok(_) => Ok(false),
                Err(e) => Err(e),
            };
            results.push(result);
        }
        results
    }

    async fn snapshot(&self, episode_id: &str) -> Result<Snapshot, TransferError> {
        let entries = self
            .store
            .list(&join_key(&[&self.config.root, episode_id]))
            .await?;
        Ok(Snapshot {
            files: entries.len(),
            bytes: entries.iter().map(|e| e.size).sum(),
        })
    }

    fn record(&self, report: &ScanReport) {
        for (stage, count) in [
            ("found", report.found),
            ("ready", report.ready),
            ("not_ready", report.not_ready),
            ("published", report.published),
            ("skipped", report.skipped),
            ("errors", report.errors),
        ] {
            self.metrics.record_scan(stage, count);
        }
    }
}

/// Orders episode ids by their trailing number, then by name, so that
/// `episode_10` sorts after `episode_9`.
pub fn episode_order(a: &str, b: &str) -> Ordering {
    trailing_number(a)
        .cmp(&trailing_number(b))
        .then_with(|| a.cmp(b))
}

fn trailing_number(name: &str) -> Option<u64> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::memory::MemoryTaskQueue;
    use crate::storage::LocalObjectStore;
    use std::path::Path;
    use tempfile::TempDir;

    fn make_episode(root: &Path, id: &str, files: usize) {
        let dir = root.join("raw").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..files {
            std::fs::write(dir.join(format!("f{i}.jsonl")), b"{}").unwrap();
        }
    }

    fn scanner(tmp: &TempDir, queue: Arc<MemoryTaskQueue>, config: ScannerConfig) -> EpisodeScanner {
        let store = Arc::new(LocalObjectStore::new(tmp.path()));
        EpisodeScanner::new(store, queue, config).unwrap()
    }

    fn config() -> ScannerConfig {
        ScannerConfig {
            root: "raw".into(),
            source: "bos".into(),
            min_file_count: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_episode_order() {
        assert_eq!(episode_order("episode_9", "episode_10"), Ordering::Less);
        assert_eq!(episode_order("episode_0002", "episode_0002"), Ordering::Equal);
        assert_eq!(trailing_number("episode_"), None);
    }

    #[tokio::test]
    async fn test_scan_publishes_ready_and_stops_cursor_at_first_not_ready() {
        let tmp = TempDir::new().unwrap();
        make_episode(tmp.path(), "episode_0001", 3);
        make_episode(tmp.path(), "episode_0002", 1);
        make_episode(tmp.path(), "episode_0003", 2);
        make_episode(tmp.path(), "calibration", 5);

        let queue = Arc::new(MemoryTaskQueue::default());
        let report = scanner(&tmp, queue.clone(), config()).scan_once().await.unwrap();

        assert_eq!(report.found, 3);
        assert_eq!(report.ready, 2);
        assert_eq!(report.not_ready, 1);
        assert_eq!(report.published, 2);
        assert_eq!(report.cursor.as_deref(), Some("episode_0001"));
        assert_eq!(queue.len().await.unwrap(), 2);

        // Second cycle re-checks episode_0002 and skips the queued episode_0003.
        make_episode(tmp.path(), "episode_0002", 2);
        let report = scanner(&tmp, queue.clone(), config()).scan_once().await.unwrap();
        assert_eq!(report.found, 2);
        assert_eq!(report.published, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.cursor.as_deref(), Some("episode_0003"));
        assert_eq!(queue.len().await.unwrap(), 3);

        let report = scanner(&tmp, queue.clone(), config()).scan_once().await.unwrap();
        assert_eq!(report.found, 0);
    }

    #[tokio::test]
    async fn test_full_scan_relies_on_dedup() {
        let tmp = TempDir::new().unwrap();
        make_episode(tmp.path(), "episode_0001", 2);
        make_episode(tmp.path(), "episode_0002", 2);

        let queue = Arc::new(MemoryTaskQueue::default());
        scanner(&tmp, queue.clone(), config()).scan_once().await.unwrap();

        let full = ScannerConfig {
            full_scan: true,
            ..config()
        };
        let report = scanner(&tmp, queue.clone(), full).scan_once().await.unwrap();
        assert_eq!(report.found, 2);
        assert_eq!(report.published, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.cursor.as_deref(), Some("episode_0002"));
    }

    #[tokio::test]
    async fn test_full_scan_never_moves_cursor_backwards() {
        let tmp = TempDir::new().unwrap();
        make_episode(tmp.path(), "episode_0001", 2);
        make_episode(tmp.path(), "episode_0002", 1);
        make_episode(tmp.path(), "episode_0003", 2);

        let queue = Arc::new(MemoryTaskQueue::default());
        queue.set_cursor("episode_0003").await.unwrap();

        let full = ScannerConfig {
            full_scan: true,
            ..config()
        };
        let report = scanner(&tmp, queue.clone(), full).scan_once().await.unwrap();
        assert_eq!(report.found, 3);
        assert_eq!(report.published, 2);
        assert_eq!(report.not_ready, 1);
        // episode_0002 blocks at episode_0001, which is behind the stored cursor.
        assert_eq!(report.cursor.as_deref(), Some("episode_0003"));
        assert_eq!(queue.cursor().await.unwrap().as_deref(), Some("episode_0003"));
    }

    #[tokio::test]
    async fn test_stability_wait_accepts_unchanged_listing() {
        let tmp = TempDir::new().unwrap();
        make_episode(tmp.path(), "episode_0001", 2);

        let queue = Arc::new(MemoryTaskQueue::default());
        let stable = ScannerConfig {
            stability_wait: Some(Duration::from_millis(10)),
            ..config()
        };
        let report = scanner(&tmp, queue, stable).scan_once().await.unwrap();
        assert_eq!(report.ready, 1);
        assert_eq!(report.published, 1);
    }

    #[test]
    fn test_invalid_pattern() {
        let tmp = TempDir::new().unwrap();
        let result = EpisodeScanner::new(
            Arc::new(LocalObjectStore::new(tmp.path())),
            Arc::new(MemoryTaskQueue::default()),
            ScannerConfig {
                episode_pattern: "(".into(),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(ScanError::InvalidPattern(_))));
    }
}

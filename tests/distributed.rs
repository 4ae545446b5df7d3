//! Scanner, queue and worker pool running together against a local bucket.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{config, write_episode, EpisodeSpec, StubEncoder};
use episode_forge::align::StrategyKind;
use episode_forge::export::DatasetMeta;
use episode_forge::pipeline::EpisodeConverter;
use episode_forge::scheduler::{
    ConversionTask, EpisodeScanner, MemoryTaskQueue, PublishOutcome, ScannerConfig, TaskQueue,
    WorkerPool, WorkerPoolConfig,
};
use episode_forge::storage::{LocalObjectStore, ObjectStore};
use tempfile::TempDir;

fn scanner(
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn TaskQueue>,
    full_scan: bool,
) -> EpisodeScanner {
    let config = ScannerConfig {
        root: "raw".to_string(),
        source: "bos".to_string(),
        full_scan,
        ..Default::default()
    };
    EpisodeScanner::new(store, queue, config).unwrap()
}

#[tokio::test]
async fn test_publish_is_idempotent() {
    let queue = MemoryTaskQueue::default();
    let task = ConversionTask::new("episode_0001", "bos", StrategyKind::Nearest);

    assert_eq!(queue.publish(&task, false).await.unwrap(), PublishOutcome::Enqueued);
    assert_eq!(
        queue.publish(&task, false).await.unwrap(),
        PublishOutcome::SkippedQueued
    );
    assert_eq!(queue.len().await.unwrap(), 1);

    // After a successful conversion the dedup key suppresses re-publishing.
    let claimed = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    queue.mark_processed(&claimed.task).await.unwrap();
    queue.ack(&claimed).await.unwrap();
    assert_eq!(
        queue.publish(&task, false).await.unwrap(),
        PublishOutcome::SkippedProcessed
    );
    assert!(queue.is_empty().await.unwrap());

    assert_eq!(queue.publish(&task, true).await.unwrap(), PublishOutcome::Enqueued);
    let stats = queue.stats("bos").await.unwrap();
    assert_eq!((stats.published, stats.skipped), (2, 2));
}

#[tokio::test]
async fn test_scan_convert_and_rescan() {
    let tmp = TempDir::new().unwrap();
    let bucket = tmp.path().join("bucket");
    for id in ["episode_1", "episode_2", "episode_10"] {
        write_episode(&bucket.join("raw").join(id), &EpisodeSpec::new(4, 20));
    }
    // Not an episode directory.
    std::fs::create_dir_all(bucket.join("raw/calibration")).unwrap();
    std::fs::write(bucket.join("raw/calibration/cam.yaml"), b"k: 1").unwrap();

    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&bucket));
    let queue = Arc::new(MemoryTaskQueue::default());

    let report = scanner(store.clone(), queue.clone(), false)
        .scan_once()
        .await
        .unwrap();
    assert_eq!(report.found, 3);
    assert_eq!(report.published, 3);
    assert_eq!(report.cursor.as_deref(), Some("episode_10"));

    // Nothing past the cursor.
    let report = scanner(store.clone(), queue.clone(), false)
        .scan_once()
        .await
        .unwrap();
    assert_eq!(report.found, 0);

    let converter = EpisodeConverter::new(config(), Arc::new(StubEncoder::default()))
        .with_store(store.clone(), "raw", "lerobot")
        .with_work_dir(tmp.path().join("scratch"));
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(20)),
        queue.clone(),
        Arc::new(converter),
    );
    pool.start().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while pool.stats().total_processed() < 3 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pool.shutdown().await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.tasks_completed, 3);
    assert_eq!(stats.tasks_failed, 0);

    for id in ["episode_1", "episode_2", "episode_10"] {
        assert!(queue.is_processed("bos", id).await.unwrap());
        let meta = DatasetMeta::load_from_directory(bucket.join("lerobot/bos").join(id)).unwrap();
        assert_eq!(meta.info.total_frames, 20);
        assert_eq!(meta.episodes[0].source_episode.as_deref(), Some(id));
    }

    // A full rescan finds everything again but publishes nothing.
    let report = scanner(store.clone(), queue.clone(), true)
        .scan_once()
        .await
        .unwrap();
    assert_eq!(report.found, 3);
    assert_eq!(report.published, 0);
    assert_eq!(report.skipped, 3);

    let source = queue.stats("bos").await.unwrap();
    assert_eq!(source.published, 3);
    assert_eq!(source.success, 3);
    assert_eq!(source.skipped, 3);
    assert_eq!(queue.queue_stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_broken_episode_goes_to_failure_sink() {
    let tmp = TempDir::new().unwrap();
    let bucket = tmp.path().join("bucket");
    write_episode(&bucket.join("raw/episode_1"), &EpisodeSpec::new(4, 20));
    write_episode(&bucket.join("raw/episode_2"), &EpisodeSpec::new(4, 20));
    std::fs::remove_file(bucket.join("raw/episode_2/main_executed.jsonl")).unwrap();

    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&bucket));
    let queue = Arc::new(MemoryTaskQueue::default());
    for id in ["episode_1", "episode_2"] {
        queue
            .publish(&ConversionTask::new(id, "bos", StrategyKind::Nearest), false)
            .await
            .unwrap();
    }

    let converter = EpisodeConverter::new(config(), Arc::new(StubEncoder::default()))
        .with_store(store, "raw", "lerobot");
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(20)),
        queue.clone(),
        Arc::new(converter),
    );
    pool.start().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(30);
    while pool.stats().total_processed() < 2 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pool.shutdown().await.unwrap();

    assert!(queue.is_processed("bos", "episode_1").await.unwrap());
    assert!(!queue.is_processed("bos", "episode_2").await.unwrap());

    let failed = queue.peek_failed(5).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].task.episode_id, "episode_2");
    assert!(failed[0].error.contains("main_executed"));
    assert_eq!(failed[0].worker_id.as_deref(), Some("worker-0"));
    assert_eq!(queue.failed_len().await.unwrap(), 1);

    // The failed episode stays eligible for re-publishing.
    assert_eq!(
        queue
            .publish(&ConversionTask::new("episode_2", "bos", StrategyKind::Nearest), false)
            .await
            .unwrap(),
        PublishOutcome::Enqueued
    );
}

//! Distributed conversion scheduling over a Redis task queue.
//!
//! - **EpisodeScanner**: lists raw episodes in object storage and publishes
//!   the ready ones
//! - **TaskQueue**: FIFO queue with a processing list, a failure sink, a
//!   dedup index and per-source counters
//! - **WorkerPool**: bounded pool of workers converting claimed tasks
//!
//! # Architecture
//!
//! ```text
//!     ┌──────────────┐        ┌──────────────┐
//!     │   Scanner    │        │  CLI publish │
//!     └──────┬───────┘        └──────┬───────┘
//!            └───────────┬───────────┘
//!                 ┌──────▼───────┐
//!                 │    Redis     │  pending / processing / failed
//!                 │    Queue     │  processed:<source>:<episode>
//!                 └──────┬───────┘
//!         ┌──────────────┼──────────────┐
//!         ▼              ▼              ▼
//!    ┌─────────┐    ┌─────────┐    ┌─────────┐
//!    │ Worker 1│    │ Worker 2│    │ Worker N│
//!    └─────────┘    └─────────┘    └─────────┘
//! ```
//!
//! # Reliability
//!
//! - **Atomic claim**: tasks move to the processing list as they are popped
//! - **Crash recovery**: the processing list is re-queued on request (`recover`
//!   or `worker --recover`), never implicitly on pool start
//! - **Failure sink**: failed tasks are kept with their error for inspection
//! - **Idempotent publish**: processed episodes are skipped for the dedup TTL

pub mod job;
pub mod memory;
pub mod queue;
pub mod scanner;
pub mod worker_pool;

pub use job::{
    ClaimedTask, ConversionTask, FailedTask, PublishOutcome, SourceStats, TaskResult, TaskStat,
    TaskStatus,
};
pub use memory::MemoryTaskQueue;
pub use queue::{QueueConfig, QueueError, QueueStats, RedisTaskQueue, TaskQueue};
pub use scanner::{episode_order, EpisodeScanner, ScanError, ScanReport, ScannerConfig};
pub use worker_pool::{
    PoolError, PoolStats, TaskProcessor, Worker, WorkerPool, WorkerPoolConfig,
};

//! Dataset export.
//!
//! Writes aligned segments as a LeRobot-style dataset (Parquet frame
//! tables, per-camera videos, JSON metadata) and merges datasets.

pub mod columns;
pub mod merge;
pub mod metadata;
pub mod parquet_writer;
pub mod video;
pub mod writer;

pub use merge::{MergeConfig, MergeEngine, MergeSummary};
pub use metadata::{DatasetInfo, DatasetMeta, EpisodeEntry, Feature, FeatureStats, TaskEntry};
pub use parquet_writer::{read_parquet, write_parquet};
pub use video::{FfmpegEncoder, VideoConfig, VideoEncoder};
pub use writer::{DatasetWriter, WriteSummary, WriterConfig};

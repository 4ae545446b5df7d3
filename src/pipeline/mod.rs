//! Episode conversion pipeline.
//!
//! - **config**: YAML conversion profile and per-task overrides
//! - **converter**: the per-task chain from raw episode to uploaded dataset
//!
//! # Conversion Flow
//!
//! 1. **Download**: the raw episode directory is copied from object storage
//!    into a per-task scratch directory
//! 2. **Load**: arm streams and camera timelines are read and sorted
//! 3. **Segment**: camera gaps cut the reference timeline into segments
//! 4. **Align**: every reference frame gets state, action and camera frames
//! 5. **Write**: each kept segment becomes one dataset episode
//! 6. **Upload**: the dataset is copied to `{output_root}/{source}/{episode_id}`
//!
//! # Example
//!
//! ```rust,ignore
//! use episode_forge::export::{FfmpegEncoder, VideoConfig};
//! use episode_forge::pipeline::{ConversionConfig, EpisodeConverter};
//! use std::sync::Arc;
//!
//! let config = ConversionConfig::from_file("profile.yaml".as_ref())?;
//! let encoder = Arc::new(FfmpegEncoder::new(config.video.clone()));
//! let converter = EpisodeConverter::new(config, encoder);
//!
//! let outcome = converter
//!     .convert_local("episode_0001", raw_dir, out_dir, StrategyKind::Nearest)
//!     .await?;
//! println!("{} episodes, {} frames", outcome.episodes, outcome.frames);
//! ```

pub mod config;
pub mod converter;

pub use config::{deep_merge, ConfigError, ConversionConfig};
pub use converter::{ConversionOutcome, ConvertError, EpisodeConverter};

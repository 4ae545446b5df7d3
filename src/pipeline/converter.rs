//! Per-task conversion chain.
//!
//! download → load → detect segments → align → write dataset → upload
//!
//! All per-task state (scratch directory, resolved config, loaded episode)
//! lives on the task's stack; the converter itself is shared read-only
//! between workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::{ConfigError, ConversionConfig};
use crate::align::{Aligner, EpisodeAlignment, StrategyKind};
use crate::episode::EpisodeLoader;
use crate::error::{AlignError, ExportError, LoaderError, TransferError};
use crate::export::{DatasetWriter, VideoEncoder};
use crate::metrics::MetricsCollector;
use crate::scheduler::{ConversionTask, TaskProcessor};
use crate::storage::{join_key, ObjectStore};

/// Errors that can occur while converting one episode.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Load failed: {0}")]
    Loader(#[from] LoaderError),

    #[error("Alignment failed: {0}")]
    Align(#[from] AlignError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("No object store configured for remote conversion")]
    NoStore,

    #[error("Conversion step '{0}' did not complete")]
    Interrupted(String),

    #[error("IO error on '{1}': {0}")]
    Io(#[source] std::io::Error, PathBuf),
}

impl ConvertError {
    /// True when the raw episode is incomplete rather than malformed.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, ConvertError::Loader(e) if e.is_missing_data())
    }
}

/// What one conversion produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub episode_id: String,
    pub source: String,
    /// Dataset episodes written, one per kept segment.
    pub episodes: usize,
    pub frames: usize,
    /// Segments shorter than the minimum length.
    pub dropped_segments: usize,
    /// Remote key of the uploaded dataset; `None` when nothing was written.
    pub output: Option<String>,
}

/// Converts raw episodes into datasets.
pub struct EpisodeConverter {
    base: ConversionConfig,
    encoder: Arc<dyn VideoEncoder>,
    store: Option<Arc<dyn ObjectStore>>,
    raw_root: String,
    output_root: String,
    work_dir: Option<PathBuf>,
    metrics: MetricsCollector,
}

impl EpisodeConverter {
    pub fn new(base: ConversionConfig, encoder: Arc<dyn VideoEncoder>) -> Self {
        Self {
            base,
            encoder,
            store: None,
            raw_root: String::new(),
            output_root: "lerobot".to_string(),
            work_dir: None,
            metrics: MetricsCollector::new(),
        }
    }

    /// Raw episodes are read from `{raw_root}/{episode_id}` and datasets
    /// uploaded to `{output_root}/{source}/{episode_id}`.
    pub fn with_store(
        mut self,
        store: Arc<dyn ObjectStore>,
        raw_root: impl Into<String>,
        output_root: impl Into<String>,
    ) -> Self {
        self.store = Some(store);
        self.raw_root = raw_root.into();
        self.output_root = output_root.into();
        self
    }

    /// Parent directory for per-task scratch space. Defaults to the system temp dir.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn base_config(&self) -> &ConversionConfig {
        &self.base
    }

    pub fn raw_key(&self, episode_id: &str) -> String {
        join_key(&[&self.raw_root, episode_id])
    }

    pub fn output_key(&self, source: &str, episode_id: &str) -> String {
        join_key(&[&self.output_root, source, episode_id])
    }

    /// Converts one queued task end to end through the object store.
    pub async fn convert(&self, task: &ConversionTask) -> Result<ConversionOutcome, ConvertError> {
        let store = self.store.as_ref().ok_or(ConvertError::NoStore)?;
        let config = self.base.with_overrides(&task.config_overrides)?;

        let scratch = self.scratch_dir(&task.episode_id)?;
        let raw_dir = scratch.path().join("raw");
        let output_dir = scratch.path().join("dataset");

        let raw_key = self.raw_key(&task.episode_id);
        debug!(episode_id = %task.episode_id, remote = %raw_key, "Downloading raw episode");
        store.copy_in(&raw_key, &raw_dir).await?;

        let mut outcome = self
            .convert_dir(
                &task.episode_id,
                &raw_dir,
                &scratch.path().join("work"),
                &output_dir,
                task.strategy,
                &config,
            )
            .await?;
        outcome.source = task.source.clone();

        if outcome.episodes > 0 {
            let output_key = self.output_key(&task.source, &task.episode_id);
            store.copy_out(&output_dir, &output_key).await?;
            info!(
                episode_id = %task.episode_id,
                source = %task.source,
                remote = %output_key,
                "Dataset uploaded"
            );
            outcome.output = Some(output_key);
        }

        Ok(outcome)
    }

    /// Converts a raw episode directory into a dataset directory on local disk.
    pub async fn convert_local(
        &self,
        episode_id: &str,
        raw_dir: &Path,
        output_dir: &Path,
        strategy: StrategyKind,
    ) -> Result<ConversionOutcome, ConvertError> {
        let scratch = self.scratch_dir(episode_id)?;
        self.convert_dir(
            episode_id,
            raw_dir,
            scratch.path(),
            output_dir,
            strategy,
            &self.base,
        )
        .await
    }

    async fn convert_dir(
        &self,
        episode_id: &str,
        raw_dir: &Path,
        work_dir: &Path,
        output_dir: &Path,
        strategy: StrategyKind,
        config: &ConversionConfig,
    ) -> Result<ConversionOutcome, ConvertError> {
        let aligner = Aligner::from_config(strategy, &config.alignment)?;
        let loader = EpisodeLoader::new(config.robot.clone());

        let alignment = {
            let id = episode_id.to_string();
            let raw_dir = raw_dir.to_path_buf();
            let work_dir = work_dir.to_path_buf();
            tokio::task::spawn_blocking(move || -> Result<EpisodeAlignment, ConvertError> {
                std::fs::create_dir_all(&work_dir)
                    .map_err(|e| ConvertError::Io(e, work_dir.clone()))?;
                let episode = loader.load(&id, &raw_dir, &work_dir)?;
                Ok(aligner.align_episode(&episode)?)
            })
            .await
            .map_err(|e| ConvertError::Interrupted(format!("load and align: {}", e)))??
        };

        let emitted = alignment.segments.len();
        let dropped = alignment.plan.dropped_segments;
        self.metrics.record_segments(emitted, dropped);
        for segment in &alignment.segments {
            for (stream, count) in segment.streams.iter().zip(&segment.unavailable) {
                if *count > 0 {
                    self.metrics.record_unavailable(&stream.key, *count);
                }
            }
        }

        info!(
            episode_id,
            strategy = %strategy,
            segments = emitted,
            dropped_segments = dropped,
            gaps = alignment.plan.gaps.len(),
            discarded_frames = alignment.plan.discarded_frames,
            "Episode aligned"
        );

        let mut outcome = ConversionOutcome {
            episode_id: episode_id.to_string(),
            source: String::new(),
            episodes: 0,
            frames: 0,
            dropped_segments: dropped,
            output: None,
        };

        if alignment.segments.is_empty() {
            warn!(episode_id, "No segment long enough to keep, nothing written");
            return Ok(outcome);
        }

        let writer = DatasetWriter::new(config.output.clone(), Arc::clone(&self.encoder));
        let summary = writer.write(alignment.segments, output_dir).await?;
        self.metrics.record_records(summary.frames);

        outcome.episodes = summary.episodes;
        outcome.frames = summary.frames;
        Ok(outcome)
    }

    fn scratch_dir(&self, episode_id: &str) -> Result<tempfile::TempDir, ConvertError> {
        let prefix = format!("{}-", episode_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        match &self.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| ConvertError::Io(e, dir.clone()))?;
                builder
                    .tempdir_in(dir)
                    .map_err(|e| ConvertError::Io(e, dir.clone()))
            }
            None => builder
                .tempdir()
                .map_err(|e| ConvertError::Io(e, std::env::temp_dir())),
        }
    }
}

#[async_trait]
impl TaskProcessor for EpisodeConverter {
    async fn process(&self, task: &ConversionTask) -> Result<ConversionOutcome, ConvertError> {
        self.convert(task).await
    }
}

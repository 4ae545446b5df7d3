//! Dataset metadata: `meta/info.json`, `meta/episodes.jsonl`,
//! `meta/tasks.jsonl` and `meta/stats.json`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

pub const CODEBASE_VERSION: &str = "v2.0";
pub const DEFAULT_CHUNKS_SIZE: usize = 1000;
pub const DATA_PATH: &str = "data/chunk-{episode_chunk:03d}/episode_{episode_index:06d}.parquet";
pub const VIDEO_PATH: &str =
    "videos/chunk-{episode_chunk:03d}/{video_key}/episode_{episode_index:06d}.mp4";

pub const STATE_PREFIX: &str = "observation.state.";
pub const ACTION_PREFIX: &str = "action.";
pub const IMAGE_PREFIX: &str = "observation.images.";
pub const SOURCE_FRAME_SUFFIX: &str = ".source_frame";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Video,
    Image,
    Bool,
    Float32,
    Float64,
    Int64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Feature {
    pub dtype: DType,
    pub shape: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
}

impl Feature {
    pub fn new(dtype: DType, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            names: None,
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, vec![1])
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }
}

/// Returns true for state and action features.
pub fn is_vector_feature(key: &str) -> bool {
    key.starts_with(STATE_PREFIX) || key.starts_with(ACTION_PREFIX)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub codebase_version: String,
    pub robot_type: String,
    pub total_episodes: usize,
    pub total_frames: usize,
    pub total_tasks: usize,
    pub total_videos: usize,
    pub total_chunks: usize,
    pub chunks_size: usize,
    pub fps: u32,
    #[serde(default)]
    pub splits: BTreeMap<String, String>,
    pub data_path: String,
    #[serde(default)]
    pub video_path: Option<String>,
    pub features: BTreeMap<String, Feature>,
}

impl DatasetInfo {
    pub fn new(robot_type: impl Into<String>, fps: u32) -> Self {
        Self {
            codebase_version: CODEBASE_VERSION.to_string(),
            robot_type: robot_type.into(),
            total_episodes: 0,
            total_frames: 0,
            total_tasks: 0,
            total_videos: 0,
            total_chunks: 0,
            chunks_size: DEFAULT_CHUNKS_SIZE,
            fps,
            splits: BTreeMap::new(),
            data_path: DATA_PATH.to_string(),
            video_path: Some(VIDEO_PATH.to_string()),
            features: BTreeMap::new(),
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ExportError::Io(e, path.to_path_buf()))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| ExportError::Io(e, path.to_path_buf()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.get(key)
    }

    pub fn chunk_index(&self, episode_index: usize) -> usize {
        episode_index / self.chunks_size.max(1)
    }

    pub fn episode_data_path(&self, episode_index: usize) -> PathBuf {
        let chunk = self.chunk_index(episode_index);
        self.data_path
            .replace("{episode_chunk:03d}", &format!("{chunk:03}"))
            .replace("{episode_index:06d}", &format!("{episode_index:06}"))
            .into()
    }

    /// Path of one camera's video for an episode, relative to the dataset root.
    pub fn video_path(&self, video_key: &str, episode_index: usize) -> Option<PathBuf> {
        let chunk = self.chunk_index(episode_index);
        self.video_path.as_ref().map(|template| {
            template
                .replace("{episode_chunk:03d}", &format!("{chunk:03}"))
                .replace("{episode_index:06d}", &format!("{episode_index:06}"))
                .replace("{video_key}", video_key)
                .into()
        })
    }

    /// Feature keys with `video` dtype, in key order.
    pub fn video_keys(&self) -> Vec<String> {
        self.features
            .iter()
            .filter(|(_, f)| f.dtype == DType::Video)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Recomputes episode, frame, chunk and video totals.
    pub fn update_totals(&mut self, episodes: &[EpisodeEntry], tasks: &[TaskEntry]) {
        self.total_episodes = episodes.len();
        self.total_frames = episodes.iter().map(|e| e.length).sum();
        self.total_tasks = tasks.len();
        self.total_chunks = if episodes.is_empty() {
            0
        } else {
            self.chunk_index(episodes.len() - 1) + 1
        };
        self.total_videos = self.video_keys().len() * episodes.len();
        self.splits.clear();
        if !episodes.is_empty() {
            self.splits
                .insert("train".to_string(), format!("0:{}", episodes.len()));
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EpisodeEntry {
    pub episode_index: usize,
    pub tasks: Vec<String>,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_episode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub task_index: usize,
    pub task: String,
}

/// Per-dimension statistics of one vector feature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureStats {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub count: usize,
}

/// Running per-dimension statistics; innermost vectors are the samples.
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    count: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    min: Vec<f64>,
    max: Vec<f64>,
}

impl StatsAccumulator {
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0,
            sum: vec![0.0; dim],
            sum_sq: vec![0.0; dim],
            min: vec![f64::INFINITY; dim],
            max: vec![f64::NEG_INFINITY; dim],
        }
    }

    /// Adds every `dim`-wide vector in `flat`.
    pub fn add_flat(&mut self, flat: &[f32]) {
        let dim = self.sum.len();
        if dim == 0 {
            return;
        }
        for sample in flat.chunks_exact(dim) {
            self.count += 1;
            for (d, &x) in sample.iter().enumerate() {
                let x = x as f64;
                self.sum[d] += x;
                self.sum_sq[d] += x * x;
                self.min[d] = self.min[d].min(x);
                self.max[d] = self.max[d].max(x);
            }
        }
    }

    pub fn finish(&self) -> Option<FeatureStats> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let mean: Vec<f64> = self.sum.iter().map(|s| s / n).collect();
        let std = self
            .sum_sq
            .iter()
            .zip(&mean)
            .map(|(sq, m)| (sq / n - m * m).max(0.0).sqrt())
            .collect();

        Some(FeatureStats {
            min: self.min.clone(),
            max: self.max.clone(),
            mean,
            std,
            count: self.count,
        })
    }
}

/// Everything under `meta/`.
#[derive(Debug, Clone)]
pub struct DatasetMeta {
    pub info: DatasetInfo,
    pub episodes: Vec<EpisodeEntry>,
    pub tasks: Vec<TaskEntry>,
    pub stats: BTreeMap<String, FeatureStats>,
}

impl DatasetMeta {
    pub fn load_from_directory(root: impl AsRef<Path>) -> Result<Self, ExportError> {
        let meta = root.as_ref().join("meta");
        let info = DatasetInfo::load_from_file(meta.join("info.json"))?;
        let episodes = load_jsonl_file(meta.join("episodes.jsonl"))?;
        let tasks = load_jsonl_file(meta.join("tasks.jsonl"))?;

        let stats_path = meta.join("stats.json");
        let stats = if stats_path.exists() {
            let file = File::open(&stats_path).map_err(|e| ExportError::Io(e, stats_path.clone()))?;
            serde_json::from_reader(BufReader::new(file))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            info,
            episodes,
            tasks,
            stats,
        })
    }

    pub fn save_to_directory(&self, root: impl AsRef<Path>) -> Result<(), ExportError> {
        let meta = root.as_ref().join("meta");
        std::fs::create_dir_all(&meta).map_err(|e| ExportError::Io(e, meta.clone()))?;

        self.info.save_to_file(meta.join("info.json"))?;
        write_jsonl_file(meta.join("episodes.jsonl"), &self.episodes)?;
        write_jsonl_file(meta.join("tasks.jsonl"), &self.tasks)?;

        let stats_path = meta.join("stats.json");
        let file = File::create(&stats_path).map_err(|e| ExportError::Io(e, stats_path.clone()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.stats)?;
        Ok(())
    }

    /// Checks the invariants every written dataset must satisfy.
    pub fn validate(&self) -> Result<(), ExportError> {
        for (i, episode) in self.episodes.iter().enumerate() {
            if episode.episode_index != i {
                return Err(ExportError::InvalidMetadata(format!(
                    "episode index {} at position {}",
                    episode.episode_index, i
                )));
            }
        }
        if self.info.total_episodes != self.episodes.len() {
            return Err(ExportError::InvalidMetadata(format!(
                "info.json reports {} episodes, episodes.jsonl has {}",
                self.info.total_episodes,
                self.episodes.len()
            )));
        }
        Ok(())
    }
}

pub fn load_jsonl_file<D>(path: impl AsRef<Path>) -> Result<Vec<D>, ExportError>
where
    D: DeserializeOwned,
{
    let path = path.as_ref();
    let entries = std::fs::read_to_string(path)
        .map_err(|e| ExportError::Io(e, path.to_path_buf()))?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect::<Result<Vec<D>, _>>()?;

    Ok(entries)
}

pub fn write_jsonl_file<S>(path: impl AsRef<Path>, entries: &[S]) -> Result<(), ExportError>
where
    S: Serialize,
{
    let path = path.as_ref();
    let io_err = |e| ExportError::Io(e, path.to_path_buf());

    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n").map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;
    Ok(())
}

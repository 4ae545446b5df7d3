//! Dataset writer: aligned segments to a LeRobot-style dataset directory.
//!
//! Every segment becomes one self-contained episode with its own frame
//! table and one video per camera.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use super::columns::{read_vectors, vector_field, VectorColumn, VectorShape};
use super::metadata::{
    is_vector_feature, DType, DatasetInfo, DatasetMeta, EpisodeEntry, Feature, FeatureStats,
    StatsAccumulator, TaskEntry, ACTION_PREFIX, DEFAULT_CHUNKS_SIZE, IMAGE_PREFIX,
    SOURCE_FRAME_SUFFIX, STATE_PREFIX,
};
use super::parquet_writer::write_parquet;
use super::video::{frame_dimensions, VideoEncoder};
use crate::align::{search::median_delta, ActionValue, AlignedSegment};
use crate::error::ExportError;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Fixed output fps; derived from the reference camera when unset.
    pub fps: Option<u32>,
    /// Task description recorded for every episode.
    pub task: String,
    pub chunks_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            fps: None,
            task: "robot manipulation".to_string(),
            chunks_size: DEFAULT_CHUNKS_SIZE,
        }
    }
}

/// What a write produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSummary {
    pub root: PathBuf,
    pub episodes: usize,
    pub frames: usize,
    pub videos: usize,
    pub fps: u32,
}

/// Writes aligned segments as a dataset.
pub struct DatasetWriter {
    config: WriterConfig,
    encoder: Arc<dyn VideoEncoder>,
}

impl DatasetWriter {
    pub fn new(config: WriterConfig, encoder: Arc<dyn VideoEncoder>) -> Self {
        Self { config, encoder }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Writes `segments` as episodes `0..n` of a new dataset under `root`.
    pub async fn write(
        &self,
        segments: Vec<AlignedSegment>,
        root: &Path,
    ) -> Result<WriteSummary, ExportError> {
        let first = segments.first().ok_or(ExportError::NoSegments)?;
        check_layout(&segments)?;

        let fps = match self.config.fps {
            Some(fps) => fps,
            None => derive_fps(first),
        };

        let mut info = DatasetInfo::new(first.robot_type.clone(), fps);
        info.chunks_size = self.config.chunks_size.max(1);

        let segments = Arc::new(segments);
        let tables = {
            let segments = Arc::clone(&segments);
            let root = root.to_path_buf();
            let info = info.clone();
            tokio::task::spawn_blocking(move || write_tables(&segments, &root, &info))
                .await
                .map_err(|e| ExportError::InvalidMetadata(format!("table writer task failed: {}", e)))??
        };

        info.features = tables.features;

        let mut videos = 0;
        for (episode_index, segment) in segments.iter().enumerate() {
            let jobs = segment.cameras.iter().enumerate().map(|(cam, name)| {
                let frames: Vec<PathBuf> = segment
                    .records
                    .iter()
                    .map(|r| r.frames[cam].path.clone())
                    .collect();
                let key = format!("{}{}", IMAGE_PREFIX, name);
                let output = info
                    .video_path(&key, episode_index)
                    .map(|p| root.join(p))
                    .unwrap_or_else(|| root.join(format!("{}_{}.mp4", key, episode_index)));
                async move { self.encoder.encode(&frames, fps, &output).await }
            });
            videos += try_join_all(jobs).await?.len();
        }

        let tasks = vec![TaskEntry {
            task_index: 0,
            task: self.config.task.clone(),
        }];
        let episodes: Vec<EpisodeEntry> = segments
            .iter()
            .enumerate()
            .map(|(i, s)| EpisodeEntry {
                episode_index: i,
                tasks: vec![self.config.task.clone()],
                length: s.len(),
                source_episode: Some(s.episode_id.clone()),
                segment_index: Some(s.segment.index),
            })
            .collect();
        info.update_totals(&episodes, &tasks);

        let meta = DatasetMeta {
            info,
            episodes,
            tasks,
            stats: tables.stats,
        };
        meta.save_to_directory(root)?;

        let summary = WriteSummary {
            root: root.to_path_buf(),
            episodes: meta.info.total_episodes,
            frames: meta.info.total_frames,
            videos,
            fps,
        };

        tracing::info!(
            root = %root.display(),
            episodes = summary.episodes,
            frames = summary.frames,
            videos = summary.videos,
            fps,
            encoder = self.encoder.name(),
            "Dataset written"
        );

        Ok(summary)
    }
}

struct TableOutput {
    features: BTreeMap<String, Feature>,
    stats: BTreeMap<String, FeatureStats>,
}

fn write_tables(
    segments: &[AlignedSegment],
    root: &Path,
    info: &DatasetInfo,
) -> Result<TableOutput, ExportError> {
    let mut features = segment_features(&segments[0]);
    let mut accumulators: BTreeMap<String, StatsAccumulator> = BTreeMap::new();

    let mut offset = 0;
    for (episode_index, segment) in segments.iter().enumerate() {
        let batch = build_frame_table(segment, episode_index, offset, 0)?;
        accumulate_stats(&batch, &mut accumulators)?;
        write_parquet(&batch, &root.join(info.episode_data_path(episode_index)))?;
        offset += segment.len();
    }

    for (key, shape) in image_shapes(&segments[0])? {
        features.insert(
            key,
            Feature::new(DType::Video, shape).with_names(vec![
                "height".to_string(),
                "width".to_string(),
                "channels".to_string(),
            ]),
        );
    }

    let stats = accumulators
        .into_iter()
        .filter_map(|(k, acc)| acc.finish().map(|s| (k, s)))
        .collect();

    Ok(TableOutput { features, stats })
}

fn check_layout(segments: &[AlignedSegment]) -> Result<(), ExportError> {
    let first = &segments[0];
    for segment in &segments[1..] {
        if segment.streams != first.streams {
            return Err(ExportError::LayoutMismatch(format!(
                "segment {} of '{}' has different arm streams",
                segment.segment.index, segment.episode_id
            )));
        }
        if segment.cameras != first.cameras {
            return Err(ExportError::LayoutMismatch(format!(
                "segment {} of '{}' has different cameras",
                segment.segment.index, segment.episode_id
            )));
        }
        if segment.chunk_size != first.chunk_size {
            return Err(ExportError::LayoutMismatch(
                "segments were aligned with different action shapes".to_string(),
            ));
        }
    }
    Ok(())
}

/// Output fps from the reference camera's median frame interval.
pub fn derive_fps(segment: &AlignedSegment) -> u32 {
    let timestamps: Vec<i64> = segment.records.iter().map(|r| r.timestamp_ns).collect();
    match median_delta(&timestamps) {
        Some(median) if median > 0.0 => (NANOS_PER_SEC / median).round().max(1.0) as u32,
        _ => 1,
    }
}

fn action_shape(segment: &AlignedSegment, dim: usize) -> VectorShape {
    match segment.chunk_size {
        Some(chunk) => VectorShape::Chunked(chunk, dim),
        None => VectorShape::Flat(dim),
    }
}

/// Non-video features of a segment's frame table.
pub fn segment_features(segment: &AlignedSegment) -> BTreeMap<String, Feature> {
    let mut features = BTreeMap::new();
    features.insert("timestamp".to_string(), Feature::scalar(DType::Float32));
    features.insert("timestamp_ns".to_string(), Feature::scalar(DType::Int64));

    for stream in &segment.streams {
        features.insert(
            format!("{}{}", STATE_PREFIX, stream.key),
            Feature::new(DType::Float32, vec![stream.dim]),
        );
        features.insert(
            format!("{}{}", ACTION_PREFIX, stream.key),
            Feature::new(DType::Float32, action_shape(segment, stream.dim).dims()),
        );
    }
    for camera in &segment.cameras {
        features.insert(
            format!("{}{}{}", IMAGE_PREFIX, camera, SOURCE_FRAME_SUFFIX),
            Feature::scalar(DType::Int64),
        );
    }
    for key in ["episode_index", "frame_index", "index", "task_index"] {
        features.insert(key.to_string(), Feature::scalar(DType::Int64));
    }
    features.insert("next.done".to_string(), Feature::scalar(DType::Bool));
    features
}

fn image_shapes(segment: &AlignedSegment) -> Result<Vec<(String, Vec<usize>)>, ExportError> {
    let Some(record) = segment.records.first() else {
        return Ok(Vec::new());
    };
    segment
        .cameras
        .iter()
        .zip(&record.frames)
        .map(|(camera, frame)| {
            let (h, w) = frame_dimensions(&frame.path)?;
            Ok((
                format!("{}{}", IMAGE_PREFIX, camera),
                vec![h as usize, w as usize, 3],
            ))
        })
        .collect()
}

/// Builds the frame table of one episode.
///
/// `index_offset` is the global index of the episode's first frame.
pub fn build_frame_table(
    segment: &AlignedSegment,
    episode_index: usize,
    index_offset: usize,
    task_index: usize,
) -> Result<RecordBatch, ExportError> {
    let n = segment.len();
    let start_ns = segment.records.first().map(|r| r.timestamp_ns).unwrap_or(0);

    let mut fields = vec![
        Field::new("timestamp", DataType::Float32, false),
        Field::new("timestamp_ns", DataType::Int64, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Float32Array::from_iter_values(
            segment
                .records
                .iter()
                .map(|r| ((r.timestamp_ns - start_ns) as f64 / NANOS_PER_SEC) as f32),
        )),
        Arc::new(Int64Array::from_iter_values(
            segment.records.iter().map(|r| r.timestamp_ns),
        )),
    ];

    for (s, stream) in segment.streams.iter().enumerate() {
        let state_name = format!("{}{}", STATE_PREFIX, stream.key);
        let mut state = VectorColumn::with_capacity(VectorShape::Flat(stream.dim), n);
        for record in &segment.records {
            state.push_vector(&state_name, record.state[s].as_deref())?;
        }
        fields.push(vector_field(&state_name, state.shape()));
        columns.push(state.finish()?);

        let action_name = format!("{}{}", ACTION_PREFIX, stream.key);
        let mut action = VectorColumn::with_capacity(action_shape(segment, stream.dim), n);
        for record in &segment.records {
            match &record.action[s] {
                Some(ActionValue::Vector(v)) => action.push_vector(&action_name, Some(v.as_slice()))?,
                Some(ActionValue::Chunk(c)) => action.push_chunk(&action_name, Some(c.as_slice()))?,
                None => action.push_null(),
            }
        }
        fields.push(vector_field(&action_name, action.shape()));
        columns.push(action.finish()?);
    }

    for (c, camera) in segment.cameras.iter().enumerate() {
        fields.push(Field::new(
            format!("{}{}{}", IMAGE_PREFIX, camera, SOURCE_FRAME_SUFFIX),
            DataType::Int64,
            false,
        ));
        columns.push(Arc::new(Int64Array::from_iter_values(
            segment.records.iter().map(|r| r.frames[c].index as i64),
        )));
    }

    let ints = |f: &dyn Fn(usize) -> usize| -> ArrayRef {
        Arc::new(Int64Array::from_iter_values((0..n).map(|i| f(i) as i64)))
    };
    fields.push(Field::new("episode_index", DataType::Int64, false));
    columns.push(ints(&|_| episode_index));
    fields.push(Field::new("frame_index", DataType::Int64, false));
    columns.push(ints(&|i| i));
    fields.push(Field::new("index", DataType::Int64, false));
    columns.push(ints(&|i| index_offset + i));
    fields.push(Field::new("task_index", DataType::Int64, false));
    columns.push(ints(&|_| task_index));
    fields.push(Field::new("next.done", DataType::Boolean, false));
    columns.push(Arc::new(BooleanArray::from(
        (0..n).map(|i| i + 1 == n).collect::<Vec<bool>>(),
    )));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Adds every state and action column of `batch` to `accumulators`.
pub fn accumulate_stats(
    batch: &RecordBatch,
    accumulators: &mut BTreeMap<String, StatsAccumulator>,
) -> Result<(), ExportError> {
    let schema = batch.schema();
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if !is_vector_feature(field.name()) {
            continue;
        }
        let (shape, rows) = read_vectors(field.name(), column)?;
        let acc = accumulators
            .entry(field.name().clone())
            .or_insert_with(|| StatsAccumulator::new(shape.inner_dim()));
        for row in rows.iter().flatten() {
            acc.add_flat(row);
        }
    }
    Ok(())
}

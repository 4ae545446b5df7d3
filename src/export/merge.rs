//! Merges independently written datasets into one.
//!
//! Vector features are zero-padded to the widest width observed across
//! sources, episodes are renumbered in input order, tasks are re-interned,
//! videos are copied to their new paths and statistics are recomputed.
//! Every source is validated before anything is written.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef, AsArray, BooleanArray, Int64Array};
use arrow::datatypes::{DataType, Field, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use super::columns::{pad_cell, read_vectors, vector_field, VectorColumn, VectorShape};
use super::metadata::{
    is_vector_feature, DType, DatasetInfo, DatasetMeta, EpisodeEntry, Feature, StatsAccumulator,
    TaskEntry,
};
use super::parquet_writer::{read_parquet, write_parquet};
use super::writer::accumulate_stats;
use crate::error::MergeError;

const LEADING_COLUMNS: &[&str] = &["timestamp", "timestamp_ns"];
const INDEX_COLUMNS: &[&str] = &["episode_index", "frame_index", "index", "task_index", "next.done"];

/// Merge settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Maximum inner width per feature key or dotted key prefix,
    /// e.g. `observation.state` or `action.left_executed`.
    pub max_dims: BTreeMap<String, usize>,
    /// Output fps; required when sources disagree.
    pub fps: Option<u32>,
    pub robot_type: Option<String>,
}

impl MergeConfig {
    pub fn with_limit(mut self, prefix: impl Into<String>, max: usize) -> Self {
        self.max_dims.insert(prefix.into(), max);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    /// Limit for `feature`: an exact key, else the longest matching prefix.
    pub fn limit_for(&self, feature: &str) -> Option<usize> {
        if let Some(max) = self.max_dims.get(feature) {
            return Some(*max);
        }
        self.max_dims
            .iter()
            .filter(|(prefix, _)| {
                feature
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, max)| *max)
    }
}

/// What a merge produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub sources: usize,
    pub episodes: usize,
    pub frames: usize,
    pub fps: u32,
    /// Final shape of every vector feature.
    pub vector_shapes: BTreeMap<String, VectorShape>,
}

struct Source {
    root: PathBuf,
    meta: DatasetMeta,
}

/// Consolidates datasets.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merges `sources` in order into a new dataset at `output`.
    pub fn merge(&self, sources: &[PathBuf], output: &Path) -> Result<MergeSummary, MergeError> {
        if sources.is_empty() {
            return Err(MergeError::NoSources);
        }
        if output.exists() {
            let mut entries =
                std::fs::read_dir(output).map_err(|e| MergeError::Io(e, output.to_path_buf()))?;
            if entries.next().is_some() {
                return Err(MergeError::OutputExists(output.to_path_buf()));
            }
        }

        let sources = sources
            .iter()
            .map(|root| {
                Ok(Source {
                    root: root.clone(),
                    meta: DatasetMeta::load_from_directory(root)?,
                })
            })
            .collect::<Result<Vec<_>, MergeError>>()?;

        let fps = self.resolve_fps(&sources)?;
        let (features, vector_shapes) = self.plan_features(&sources)?;

        let robot_type = self
            .config
            .robot_type
            .clone()
            .unwrap_or_else(|| sources[0].meta.info.robot_type.clone());
        let mut info = DatasetInfo::new(robot_type, fps);
        info.chunks_size = sources[0].meta.info.chunks_size;
        info.features = features;

        let columns = column_order(&info.features);

        let mut tasks: Vec<TaskEntry> = Vec::new();
        let mut task_ids: HashMap<String, usize> = HashMap::new();
        let mut intern = |task: &str| -> usize {
            *task_ids.entry(task.to_string()).or_insert_with(|| {
                tasks.push(TaskEntry {
                    task_index: tasks.len(),
                    task: task.to_string(),
                });
                tasks.len() - 1
            })
        };

        let mut episodes = Vec::new();
        let mut accumulators: BTreeMap<String, StatsAccumulator> = BTreeMap::new();
        let mut offset = 0;

        for source in &sources {
            let task_map: HashMap<usize, usize> = source
                .meta
                .tasks
                .iter()
                .map(|t| (t.task_index, intern(&t.task)))
                .collect();

            for entry in &source.meta.episodes {
                let new_index = episodes.len();
                let fallback_task = entry.tasks.first().map(|t| intern(t)).unwrap_or(0);

                let data_path = source.root.join(source.meta.info.episode_data_path(entry.episode_index));
                let table = read_parquet(&data_path)?;
                let batch = rebuild_table(
                    &table,
                    &info,
                    &columns,
                    &vector_shapes,
                    new_index,
                    offset,
                    |old| task_map.get(&old).copied().unwrap_or(fallback_task),
                )?;

                accumulate_stats(&batch, &mut accumulators)?;
                write_parquet(&batch, &output.join(info.episode_data_path(new_index)))?;

                for key in source.meta.info.video_keys() {
                    copy_video(source, &info, &key, entry.episode_index, new_index, output)?;
                }

                offset += batch.num_rows();
                episodes.push(EpisodeEntry {
                    episode_index: new_index,
                    tasks: entry.tasks.clone(),
                    length: batch.num_rows(),
                    source_episode: entry.source_episode.clone(),
                    segment_index: entry.segment_index,
                });
            }
        }

        info.update_totals(&episodes, &tasks);
        let meta = DatasetMeta {
            info,
            episodes,
            tasks,
            stats: accumulators
                .into_iter()
                .filter_map(|(k, acc)| acc.finish().map(|s| (k, s)))
                .collect(),
        };
        meta.save_to_directory(output)?;

        tracing::info!(
            output = %output.display(),
            sources = sources.len(),
            episodes = meta.info.total_episodes,
            frames = meta.info.total_frames,
            fps,
            "Datasets merged"
        );

        Ok(MergeSummary {
            output: output.to_path_buf(),
            sources: sources.len(),
            episodes: meta.info.total_episodes,
            frames: meta.info.total_frames,
            fps,
            vector_shapes,
        })
    }

    fn resolve_fps(&self, sources: &[Source]) -> Result<u32, MergeError> {
        if let Some(fps) = self.config.fps {
            return Ok(fps);
        }
        let expected = sources[0].meta.info.fps;
        for source in &sources[1..] {
            if source.meta.info.fps != expected {
                return Err(MergeError::IncompatibleFps {
                    source_path: source.root.clone(),
                    expected,
                    actual: source.meta.info.fps,
                });
            }
        }
        Ok(expected)
    }

    /// Feature union plus the padded shape of every vector feature.
    #[allow(clippy::type_complexity)]
    fn plan_features(
        &self,
        sources: &[Source],
    ) -> Result<(BTreeMap<String, Feature>, BTreeMap<String, VectorShape>), MergeError> {
        let mut features: BTreeMap<String, Feature> = BTreeMap::new();
        let mut shapes: BTreeMap<String, VectorShape> = BTreeMap::new();

        for source in sources {
            for (key, feature) in &source.meta.info.features {
                if is_vector_feature(key) {
                    let shape = feature_shape(key, feature)?;
                    let max = self
                        .config
                        .limit_for(key)
                        .ok_or_else(|| MergeError::MissingLimit(key.clone()))?;
                    if shape.inner_dim() > max {
                        return Err(MergeError::DimensionOverflow {
                            source_path: source.root.clone(),
                            feature: key.clone(),
                            dim: shape.inner_dim(),
                            max,
                        });
                    }

                    match shapes.get(key).copied() {
                        None => {
                            shapes.insert(key.clone(), shape);
                        }
                        Some(current) => {
                            let merged = merge_shapes(key, current, shape)?;
                            shapes.insert(key.clone(), merged);
                        }
                    }
                    continue;
                }

                match features.get(key) {
                    Some(existing) if existing.dtype != feature.dtype => {
                        return Err(MergeError::IncompatibleShape {
                            feature: key.clone(),
                            reason: format!("dtype {:?} vs {:?}", existing.dtype, feature.dtype),
                        });
                    }
                    Some(_) => {}
                    None => {
                        features.insert(key.clone(), feature.clone());
                    }
                }
            }
        }

        for (key, shape) in &shapes {
            features.insert(key.clone(), Feature::new(DType::Float32, shape.dims()));
        }

        Ok((features, shapes))
    }
}

fn feature_shape(key: &str, feature: &Feature) -> Result<VectorShape, MergeError> {
    match feature.shape.as_slice() {
        [d] => Ok(VectorShape::Flat(*d)),
        [c, d] => Ok(VectorShape::Chunked(*c, *d)),
        other => Err(MergeError::IncompatibleShape {
            feature: key.to_string(),
            reason: format!("unsupported shape {:?}", other),
        }),
    }
}

fn merge_shapes(key: &str, a: VectorShape, b: VectorShape) -> Result<VectorShape, MergeError> {
    match (a, b) {
        (VectorShape::Flat(x), VectorShape::Flat(y)) => Ok(VectorShape::Flat(x.max(y))),
        (VectorShape::Chunked(c1, x), VectorShape::Chunked(c2, y)) if c1 == c2 => {
            Ok(VectorShape::Chunked(c1, x.max(y)))
        }
        _ => Err(MergeError::IncompatibleShape {
            feature: key.to_string(),
            reason: format!("{:?} vs {:?}", a.dims(), b.dims()),
        }),
    }
}

/// Column order of merged frame tables.
fn column_order(features: &BTreeMap<String, Feature>) -> Vec<String> {
    let mut columns: Vec<String> = LEADING_COLUMNS
        .iter()
        .filter(|c| features.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    columns.extend(
        features
            .iter()
            .filter(|(k, f)| {
                f.dtype != DType::Video
                    && !LEADING_COLUMNS.contains(&k.as_str())
                    && !INDEX_COLUMNS.contains(&k.as_str())
            })
            .map(|(k, _)| k.clone()),
    );
    columns.extend(INDEX_COLUMNS.iter().map(|c| c.to_string()));
    columns
}

fn arrow_type(dtype: DType) -> DataType {
    match dtype {
        DType::Bool => DataType::Boolean,
        DType::Float32 => DataType::Float32,
        DType::Float64 => DataType::Float64,
        DType::Int64 | DType::Video | DType::Image => DataType::Int64,
    }
}

fn rebuild_table(
    table: &RecordBatch,
    info: &DatasetInfo,
    columns: &[String],
    shapes: &BTreeMap<String, VectorShape>,
    episode_index: usize,
    index_offset: usize,
    remap_task: impl Fn(usize) -> usize,
) -> Result<RecordBatch, MergeError> {
    let n = table.num_rows();
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());

    for name in columns {
        match name.as_str() {
            "episode_index" => {
                fields.push(Field::new(name, DataType::Int64, false));
                arrays.push(Arc::new(Int64Array::from(vec![episode_index as i64; n])));
            }
            "frame_index" => {
                fields.push(Field::new(name, DataType::Int64, false));
                arrays.push(Arc::new(Int64Array::from_iter_values(0..n as i64)));
            }
            "index" => {
                fields.push(Field::new(name, DataType::Int64, false));
                arrays.push(Arc::new(Int64Array::from_iter_values(
                    (0..n).map(|i| (index_offset + i) as i64),
                )));
            }
            "task_index" => {
                let old: Vec<usize> = match table.column_by_name(name) {
                    Some(col) if col.data_type() == &DataType::Int64 => col
                        .as_primitive::<Int64Type>()
                        .iter()
                        .map(|v| v.unwrap_or(0) as usize)
                        .collect(),
                    _ => vec![0; n],
                };
                fields.push(Field::new(name, DataType::Int64, false));
                arrays.push(Arc::new(Int64Array::from_iter_values(
                    old.into_iter().map(|t| remap_task(t) as i64),
                )));
            }
            "next.done" => {
                fields.push(Field::new(name, DataType::Boolean, false));
                arrays.push(Arc::new(BooleanArray::from(
                    (0..n).map(|i| i + 1 == n).collect::<Vec<bool>>(),
                )));
            }
            _ if shapes.contains_key(name) => {
                let target = shapes[name];
                let mut column = VectorColumn::with_capacity(target, n);
                match table.column_by_name(name) {
                    Some(source) => {
                        let (shape, rows) = read_vectors(name, source)?;
                        for row in rows {
                            let padded = row.map(|cell| pad_cell(&cell, shape, target));
                            column.push_flat(name, padded.as_deref())?;
                        }
                    }
                    None => (0..n).for_each(|_| column.push_null()),
                }
                fields.push(vector_field(name, target));
                arrays.push(column.finish()?);
            }
            _ => {
                let array = match table.column_by_name(name) {
                    Some(col) => col.clone(),
                    None => {
                        let dtype = info
                            .feature(name)
                            .map(|f| arrow_type(f.dtype))
                            .unwrap_or(DataType::Int64);
                        new_null_array(&dtype, n)
                    }
                };
                fields.push(Field::new(name, array.data_type().clone(), true));
                arrays.push(array);
            }
        }
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(crate::error::ExportError::from)?;
    Ok(batch)
}

fn copy_video(
    source: &Source,
    info: &DatasetInfo,
    key: &str,
    old_index: usize,
    new_index: usize,
    output: &Path,
) -> Result<(), MergeError> {
    let (Some(from), Some(to)) = (
        source.meta.info.video_path(key, old_index),
        info.video_path(key, new_index),
    ) else {
        return Ok(());
    };
    let from = source.root.join(from);
    let to = output.join(to);

    if !from.exists() {
        tracing::warn!(video = %from.display(), "Source video missing, skipping");
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MergeError::Io(e, parent.to_path_buf()))?;
    }
    std::fs::copy(&from, &to).map_err(|e| MergeError::Io(e, from.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::metadata::DatasetMeta;
    use arrow::array::{Array, Float32Array};
    use tempfile::TempDir;

    /// Writes a one-episode dataset whose state feature has width `dim`.
    fn write_source(root: &Path, dim: usize, frames: usize, fps: u32, task: &str) {
        let mut info = DatasetInfo::new("arm", fps);
        let key = "observation.state.main_executed";

        let mut state = VectorColumn::new(VectorShape::Flat(dim));
        for i in 0..frames {
            let cell: Vec<f32> = (0..dim).map(|d| (i * 100 + d + 1) as f32).collect();
            state.push_flat(key, Some(&cell)).unwrap();
        }
        let schema = Arc::new(Schema::new(vec![
            Field::new("timestamp", DataType::Float32, false),
            vector_field(key, VectorShape::Flat(dim)),
            Field::new("episode_index", DataType::Int64, false),
            Field::new("frame_index", DataType::Int64, false),
            Field::new("index", DataType::Int64, false),
            Field::new("task_index", DataType::Int64, false),
            Field::new("next.done", DataType::Boolean, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float32Array::from_iter_values((0..frames).map(|i| i as f32 / fps as f32))),
                state.finish().unwrap(),
                Arc::new(Int64Array::from(vec![0; frames])),
                Arc::new(Int64Array::from_iter_values(0..frames as i64)),
                Arc::new(Int64Array::from_iter_values(0..frames as i64)),
                Arc::new(Int64Array::from(vec![0; frames])),
                Arc::new(BooleanArray::from((0..frames).map(|i| i + 1 == frames).collect::<Vec<_>>())),
            ],
        )
        .unwrap();
        write_parquet(&batch, &root.join(info.episode_data_path(0))).unwrap();

        info.features.insert("timestamp".into(), Feature::scalar(DType::Float32));
        info.features.insert(key.into(), Feature::new(DType::Float32, vec![dim]));
        for k in ["episode_index", "frame_index", "index", "task_index"] {
            info.features.insert(k.into(), Feature::scalar(DType::Int64));
        }
        info.features.insert("next.done".into(), Feature::scalar(DType::Bool));
        info.features.insert(
            "observation.images.front".into(),
            Feature::new(DType::Video, vec![6, 8, 3]),
        );
        let video = root.join(info.video_path("observation.images.front", 0).unwrap());
        std::fs::create_dir_all(video.parent().unwrap()).unwrap();
        std::fs::write(&video, format!("video-{dim}")).unwrap();

        let episodes = vec![EpisodeEntry {
            episode_index: 0,
            tasks: vec![task.to_string()],
            length: frames,
            source_episode: Some(format!("episode_{dim:04}")),
            segment_index: Some(0),
        }];
        let tasks = vec![TaskEntry {
            task_index: 0,
            task: task.to_string(),
        }];
        info.update_totals(&episodes, &tasks);
        DatasetMeta {
            info,
            episodes,
            tasks,
            stats: BTreeMap::new(),
        }
        .save_to_directory(root)
        .unwrap();
    }

    #[test]
    fn test_limit_lookup() {
        let config = MergeConfig::default()
            .with_limit("observation.state", 14)
            .with_limit("observation.state.left_executed", 7);
        assert_eq!(config.limit_for("observation.state.right_executed"), Some(14));
        assert_eq!(config.limit_for("observation.state.left_executed"), Some(7));
        assert_eq!(config.limit_for("action.left_executed"), None);
        assert_eq!(config.limit_for("observation.statefoo"), None);
    }

    #[test]
    fn test_merge_pads_to_widest_source() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_source(&a, 10, 5, 25, "pick");
        write_source(&b, 14, 3, 25, "place");

        let out = tmp.path().join("merged");
        let engine = MergeEngine::new(MergeConfig::default().with_limit("observation.state", 14));
        let summary = engine.merge(&[a, b], &out).unwrap();

        assert_eq!(summary.episodes, 2);
        assert_eq!(summary.frames, 8);
        assert_eq!(
            summary.vector_shapes["observation.state.main_executed"],
            VectorShape::Flat(14)
        );

        let meta = DatasetMeta::load_from_directory(&out).unwrap();
        assert!(meta.validate().is_ok());
        assert_eq!(meta.tasks.len(), 2);
        assert_eq!(meta.tasks[1].task, "place");

        let first = read_parquet(&out.join("data/chunk-000/episode_000000.parquet")).unwrap();
        let (_, rows) = read_vectors(
            "s",
            first.column_by_name("observation.state.main_executed").unwrap(),
        )
        .unwrap();
        for row in rows {
            let row = row.unwrap();
            assert_eq!(row.len(), 14);
            assert!(row[10..].iter().all(|&x| x == 0.0));
            assert!(row[..10].iter().all(|&x| x != 0.0));
        }

        let second = read_parquet(&out.join("data/chunk-000/episode_000001.parquet")).unwrap();
        let ep = second.column_by_name("episode_index").unwrap().as_primitive::<Int64Type>();
        assert!(ep.iter().all(|v| v == Some(1)));
        let frame = second.column_by_name("frame_index").unwrap().as_primitive::<Int64Type>();
        assert_eq!(frame.values().to_vec(), vec![0, 1, 2]);
        let index = second.column_by_name("index").unwrap().as_primitive::<Int64Type>();
        assert_eq!(index.values().to_vec(), vec![5, 6, 7]);
        let task = second.column_by_name("task_index").unwrap().as_primitive::<Int64Type>();
        assert!(task.iter().all(|v| v == Some(1)));

        let video = out.join("videos/chunk-000/observation.images.front/episode_000001.mp4");
        assert_eq!(std::fs::read_to_string(video).unwrap(), "video-14");
    }

    #[test]
    fn test_dimension_overflow_fails_before_writing() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_source(&a, 10, 2, 25, "pick");
        write_source(&b, 14, 2, 25, "pick");

        let out = tmp.path().join("merged");
        let engine = MergeEngine::new(MergeConfig::default().with_limit("observation.state", 12));
        let err = engine.merge(&[a, b.clone()], &out).unwrap_err();

        match err {
            MergeError::DimensionOverflow {
                source_path,
                dim,
                max,
                ..
            } => {
                assert_eq!(source_path, b);
                assert_eq!((dim, max), (14, 12));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_limit_and_fps_mismatch() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_source(&a, 4, 2, 25, "pick");
        write_source(&b, 4, 2, 30, "pick");

        let engine = MergeEngine::new(MergeConfig::default());
        let err = engine.merge(&[a.clone()], &tmp.path().join("m1")).unwrap_err();
        assert!(matches!(err, MergeError::MissingLimit(_)));

        let engine = MergeEngine::new(MergeConfig::default().with_limit("observation.state", 4));
        let err = engine
            .merge(&[a.clone(), b.clone()], &tmp.path().join("m2"))
            .unwrap_err();
        assert!(matches!(err, MergeError::IncompatibleFps { expected: 25, actual: 30, .. }));

        let engine = MergeEngine::new(
            MergeConfig::default()
                .with_limit("observation.state", 4)
                .with_fps(30),
        );
        let summary = engine.merge(&[a, b], &tmp.path().join("m3")).unwrap();
        assert_eq!(summary.fps, 30);
    }

    #[test]
    fn test_missing_feature_becomes_null() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write_source(&a, 4, 2, 25, "pick");
        write_source(&b, 4, 2, 25, "pick");

        // Give source b an extra feature source a lacks.
        let mut meta = DatasetMeta::load_from_directory(&b).unwrap();
        let extra = "action.main_executed";
        meta.info.features.insert(extra.into(), Feature::new(DType::Float32, vec![4]));
        meta.save_to_directory(&b).unwrap();

        let out = tmp.path().join("merged");
        let engine = MergeEngine::new(
            MergeConfig::default()
                .with_limit("observation.state", 4)
                .with_limit("action", 4),
        );
        engine.merge(&[a, b], &out).unwrap();

        let first = read_parquet(&out.join("data/chunk-000/episode_000000.parquet")).unwrap();
        assert_eq!(first.column_by_name(extra).unwrap().null_count(), 2);
    }

    #[test]
    fn test_refuses_non_empty_output() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        write_source(&a, 4, 2, 25, "pick");
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("junk"), b"x").unwrap();

        let engine = MergeEngine::new(MergeConfig::default().with_limit("observation.state", 4));
        assert!(matches!(
            engine.merge(&[a], &out),
            Err(MergeError::OutputExists(_))
        ));
        assert!(matches!(
            engine.merge(&[], &tmp.path().join("x")),
            Err(MergeError::NoSources)
        ));
    }
}

//! Reads one raw episode directory into typed in-memory streams.
//!
//! Arm streams come from JSONL or parquet tables; camera streams come from
//! timestamp-named frame files, optionally packed in a `.tar.gz` container.
//! All I/O here is blocking; async callers run it through `spawn_blocking`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::record_batch::RecordBatch;
use flate2::read::GzDecoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value;
use walkdir::WalkDir;

use super::profile::{ArmFileFormat, ArmSpec, CameraSpec, RobotProfile, TimestampFields};
use super::{ArmStream, CameraStream, RawEpisode, TimestampNs};
use crate::error::LoaderError;

const NANOS_PER_SEC: i64 = 1_000_000_000;
const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Loads raw episodes laid out according to a [`RobotProfile`].
#[derive(Debug, Clone)]
pub struct EpisodeLoader {
    profile: RobotProfile,
}

impl EpisodeLoader {
    pub fn new(profile: RobotProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &RobotProfile {
        &self.profile
    }

    /// Loads every stream the profile declares.
    ///
    /// `work_dir` receives unpacked frame containers and must outlive the
    /// returned episode, since camera streams reference frames by path.
    pub fn load(
        &self,
        episode_id: &str,
        root: &Path,
        work_dir: &Path,
    ) -> Result<RawEpisode, LoaderError> {
        if !root.is_dir() {
            return Err(LoaderError::MissingStreamData {
                stream: episode_id.to_string(),
                reason: format!("episode directory '{}' does not exist", root.display()),
            });
        }

        let arms = self
            .profile
            .arms
            .iter()
            .map(|spec| self.load_arm(root, spec))
            .collect::<Result<Vec<_>, _>>()?;

        let cameras = self
            .profile
            .cameras
            .iter()
            .map(|spec| self.load_camera(root, spec, work_dir))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            episode_id,
            arms = arms.len(),
            cameras = cameras.len(),
            arm_samples = arms.iter().map(ArmStream::len).sum::<usize>(),
            "Raw episode loaded"
        );

        Ok(RawEpisode {
            id: episode_id.to_string(),
            root: root.to_path_buf(),
            robot_type: self.profile.robot_type.clone(),
            arms,
            cameras,
            reference_camera: self.profile.reference_camera.clone(),
        })
    }

    /// Loads one arm stream file.
    pub fn load_arm(&self, root: &Path, spec: &ArmSpec) -> Result<ArmStream, LoaderError> {
        let stream = format!("{}_{}", spec.arm, spec.role);
        let path = root.join(&spec.file);
        if !path.is_file() {
            return Err(LoaderError::MissingStreamData {
                stream,
                reason: format!("file '{}' not found", path.display()),
            });
        }

        let samples = match spec.format {
            ArmFileFormat::Jsonl => self.read_jsonl(&path)?,
            ArmFileFormat::Parquet => self.read_parquet(&path)?,
        };

        if samples.is_empty() {
            return Err(LoaderError::MissingStreamData {
                stream,
                reason: format!("'{}' contains no samples", path.display()),
            });
        }

        let dim = samples[0].1.len();
        if let Some((row, (_, values))) = samples
            .iter()
            .enumerate()
            .find(|(_, (_, values))| values.len() != dim)
        {
            return Err(LoaderError::InconsistentDimension {
                stream,
                expected: dim,
                actual: values.len(),
                row,
            });
        }

        Ok(ArmStream::from_samples(
            spec.arm.clone(),
            spec.role,
            dim,
            samples,
        ))
    }

    fn read_jsonl(&self, path: &Path) -> Result<Vec<(TimestampNs, Vec<f64>)>, LoaderError> {
        let file = File::open(path).map_err(|e| LoaderError::Io(e, path.to_path_buf()))?;
        let reader = BufReader::new(file);

        let mut samples = Vec::new();
        for (row, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| LoaderError::Io(e, path.to_path_buf()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let invalid = |reason: String| LoaderError::InvalidRow {
                path: path.to_path_buf(),
                row,
                reason,
            };

            let value: Value =
                serde_json::from_str(line).map_err(|e| invalid(format!("bad JSON: {}", e)))?;
            let ts = json_timestamp(&value, &self.profile.timestamp).map_err(&invalid)?;

            let mut vector = Vec::new();
            for field in &self.profile.value_fields {
                let array = lookup(&value, field)
                    .and_then(Value::as_array)
                    .ok_or_else(|| invalid(format!("missing array field '{}'", field)))?;
                for item in array {
                    let x = item
                        .as_f64()
                        .ok_or_else(|| invalid(format!("non-numeric entry in '{}'", field)))?;
                    vector.push(x);
                }
            }

            samples.push((ts, vector));
        }

        Ok(samples)
    }

    fn read_parquet(&self, path: &Path) -> Result<Vec<(TimestampNs, Vec<f64>)>, LoaderError> {
        let file = File::open(path).map_err(|e| LoaderError::Io(e, path.to_path_buf()))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut samples = Vec::new();
        for batch in reader {
            let batch = batch?;
            let timestamps =
                batch_timestamps(&batch, path, &self.profile.timestamp, samples.len())?;

            let mut vectors = vec![Vec::new(); batch.num_rows()];
            for field in &self.profile.value_fields {
                let column = column(&batch, path, field)?;
                append_list_column(&column, path, field, &mut vectors)?;
            }

            samples.extend(timestamps.into_iter().zip(vectors));
        }

        Ok(samples)
    }

    /// Loads one camera directory, unpacking its frame container if present.
    pub fn load_camera(
        &self,
        root: &Path,
        spec: &CameraSpec,
        work_dir: &Path,
    ) -> Result<CameraStream, LoaderError> {
        let dir = root.join(spec.dir());
        if !dir.is_dir() {
            return Err(LoaderError::MissingStreamData {
                stream: spec.name.clone(),
                reason: format!("camera directory '{}' not found", dir.display()),
            });
        }

        let container = dir.join(&self.profile.frame_container);
        let (frame_dir, max_depth) = if container.is_file() {
            let target = work_dir.join("frames").join(&spec.name);
            unpack_container(&container, &target)?;
            (target, usize::MAX)
        } else {
            (dir, 1)
        };

        let mut frames = Vec::new();
        for entry in WalkDir::new(&frame_dir).min_depth(1).max_depth(max_depth) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| frame_dir.clone());
                LoaderError::Io(e.into(), path)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            match parse_frame_timestamp(&name) {
                Some(ts) => frames.push((ts, entry.path().to_path_buf())),
                None => tracing::trace!(file = %name, camera = %spec.name, "Skipping non-frame file"),
            }
        }

        if frames.is_empty() {
            return Err(LoaderError::MissingStreamData {
                stream: spec.name.clone(),
                reason: format!("no frames under '{}'", frame_dir.display()),
            });
        }

        Ok(CameraStream::from_frames(spec.name.clone(), frames))
    }
}

/// Parses a frame file name into a nanosecond timestamp.
///
/// Accepted stems: `<ns>`, `<sec>_<nsec>` and `<sec>.<fraction>`, with a
/// `jpg`, `jpeg` or `png` extension.
pub fn parse_frame_timestamp(name: &str) -> Option<TimestampNs> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return None;
    }

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if let Some((sec, nsec)) = stem.split_once('_') {
        if !digits(sec) || !digits(nsec) {
            return None;
        }
        let nsec: i64 = nsec.parse().ok()?;
        if nsec >= NANOS_PER_SEC {
            return None;
        }
        return sec.parse::<i64>().ok()?.checked_mul(NANOS_PER_SEC)?.checked_add(nsec);
    }

    if let Some((sec, frac)) = stem.split_once('.') {
        if !digits(sec) || !digits(frac) {
            return None;
        }
        // Fraction digits beyond nanosecond precision are dropped.
        let mut padded: String = frac.chars().take(9).collect();
        while padded.len() < 9 {
            padded.push('0');
        }
        let nsec: i64 = padded.parse().ok()?;
        return sec.parse::<i64>().ok()?.checked_mul(NANOS_PER_SEC)?.checked_add(nsec);
    }

    if !digits(stem) {
        return None;
    }
    stem.parse().ok()
}

fn unpack_container(container: &Path, target: &Path) -> Result<(), LoaderError> {
    let file = File::open(container).map_err(|e| LoaderError::Io(e, container.to_path_buf()))?;
    std::fs::create_dir_all(target).map_err(|e| LoaderError::Io(e, target.to_path_buf()))?;

    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.unpack(target).map_err(|e| LoaderError::Container {
        path: container.to_path_buf(),
        reason: e.to_string(),
    })?;

    tracing::debug!(
        container = %container.display(),
        target = %target.display(),
        "Frame container unpacked"
    );
    Ok(())
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}

/// `sec * 1e9 + nsec`, or `None` when it does not fit in an `i64`.
fn combine_timestamp(sec: i64, nsec: i64) -> Option<TimestampNs> {
    sec.checked_mul(NANOS_PER_SEC)?.checked_add(nsec)
}

fn float_seconds_timestamp(sec: f64) -> Option<TimestampNs> {
    let ns = (sec * NANOS_PER_SEC as f64).round();
    (ns.is_finite() && ns >= i64::MIN as f64 && ns < i64::MAX as f64).then_some(ns as i64)
}

fn json_timestamp(value: &Value, fields: &TimestampFields) -> Result<TimestampNs, String> {
    let sec = lookup(value, &fields.sec)
        .ok_or_else(|| format!("missing timestamp field '{}'", fields.sec))?;

    match &fields.nsec {
        Some(nsec_field) => {
            let sec = sec
                .as_i64()
                .or_else(|| sec.as_f64().map(|f| f.trunc() as i64))
                .ok_or_else(|| format!("field '{}' is not numeric", fields.sec))?;
            let nsec = lookup(value, nsec_field)
                .and_then(Value::as_i64)
                .ok_or_else(|| format!("missing integer field '{}'", nsec_field))?;
            combine_timestamp(sec, nsec)
                .ok_or_else(|| format!("timestamp {}s {}ns out of range", sec, nsec))
        }
        None => {
            let sec = sec
                .as_f64()
                .ok_or_else(|| format!("field '{}' is not numeric", fields.sec))?;
            float_seconds_timestamp(sec).ok_or_else(|| format!("timestamp {}s out of range", sec))
        }
    }
}

fn column(batch: &RecordBatch, path: &Path, name: &str) -> Result<ArrayRef, LoaderError> {
    batch
        .column_by_name(name)
        .cloned()
        .ok_or_else(|| LoaderError::InvalidRow {
            path: path.to_path_buf(),
            row: 0,
            reason: format!("missing column '{}'", name),
        })
}

fn batch_timestamps(
    batch: &RecordBatch,
    path: &Path,
    fields: &TimestampFields,
    first_row: usize,
) -> Result<Vec<TimestampNs>, LoaderError> {
    let sec = column(batch, path, &fields.sec)?;
    let out_of_range = |row: usize| LoaderError::InvalidRow {
        path: path.to_path_buf(),
        row: first_row + row,
        reason: "timestamp out of range".to_string(),
    };

    match &fields.nsec {
        Some(nsec_field) => {
            let sec = numeric_column::<Int64Type>(&sec, path, &fields.sec, DataType::Int64)?;
            let nsec_column = column(batch, path, nsec_field)?;
            let nsec = numeric_column::<Int64Type>(&nsec_column, path, nsec_field, DataType::Int64)?;
            sec.iter()
                .zip(nsec.iter())
                .enumerate()
                .map(|(row, (s, n))| combine_timestamp(*s, *n).ok_or_else(|| out_of_range(row)))
                .collect()
        }
        None => {
            let sec = numeric_column::<Float64Type>(&sec, path, &fields.sec, DataType::Float64)?;
            sec.iter()
                .enumerate()
                .map(|(row, s)| float_seconds_timestamp(*s).ok_or_else(|| out_of_range(row)))
                .collect()
        }
    }
}

fn numeric_column<T>(
    array: &ArrayRef,
    path: &Path,
    name: &str,
    target: DataType,
) -> Result<Vec<T::Native>, LoaderError>
where
    T: arrow::datatypes::ArrowPrimitiveType,
{
    if !array.data_type().is_numeric() {
        return Err(LoaderError::UnsupportedColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
            data_type: array.data_type().to_string(),
        });
    }
    if array.null_count() > 0 {
        return Err(LoaderError::InvalidRow {
            path: path.to_path_buf(),
            row: (0..array.len()).find(|&i| array.is_null(i)).unwrap_or(0),
            reason: format!("null in column '{}'", name),
        });
    }

    let casted = cast(array, &target)?;
    Ok(casted.as_primitive::<T>().values().to_vec())
}

fn append_list_column(
    array: &ArrayRef,
    path: &Path,
    name: &str,
    vectors: &mut [Vec<f64>],
) -> Result<(), LoaderError> {
    let row_values = |row: usize| -> Option<ArrayRef> {
        match array.data_type() {
            DataType::List(_) => Some(array.as_list::<i32>().value(row)),
            DataType::LargeList(_) => Some(array.as_list::<i64>().value(row)),
            DataType::FixedSizeList(_, _) => Some(array.as_fixed_size_list().value(row)),
            _ => None,
        }
    };

    for (row, vector) in vectors.iter_mut().enumerate() {
        if array.is_null(row) {
            return Err(LoaderError::InvalidRow {
                path: path.to_path_buf(),
                row,
                reason: format!("null in column '{}'", name),
            });
        }
        let values = row_values(row).ok_or_else(|| LoaderError::UnsupportedColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
            data_type: array.data_type().to_string(),
        })?;
        vector.extend(numeric_column::<Float64Type>(
            &values,
            path,
            name,
            DataType::Float64,
        )?);
    }

    Ok(())
}

/// Writes a JSONL arm stream in the default profile schema. Test helper.
#[cfg(test)]
pub(crate) fn write_jsonl_stream(path: &Path, samples: &[(TimestampNs, Vec<f64>)]) {
    use std::io::Write;

    let mut file = File::create(path).unwrap();
    for (ts, values) in samples {
        let row = serde_json::json!({
            "sec": ts / NANOS_PER_SEC,
            "nsec": ts % NANOS_PER_SEC,
            "position": values,
        });
        writeln!(file, "{}", row).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::profile::ArmSpec;
    use crate::episode::ArmRole;
    use arrow::array::{FixedSizeListArray, Float32Array, Int64Array, UInt32Array};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn single_arm_profile(format: ArmFileFormat, file: &str) -> RobotProfile {
        RobotProfile {
            robot_type: "test_arm".to_string(),
            arms: vec![ArmSpec {
                arm: "main".to_string(),
                role: ArmRole::Executed,
                file: file.to_string(),
                format,
            }],
            cameras: vec![CameraSpec {
                name: "front".to_string(),
                dir: None,
            }],
            reference_camera: "front".to_string(),
            ..Default::default()
        }
    }

    fn touch_frames(dir: &Path, names: &[&str]) {
        std::fs::create_dir_all(dir).unwrap();
        for name in names {
            File::create(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn test_parse_frame_timestamp() {
        assert_eq!(parse_frame_timestamp("1700000000123456789.jpg"), Some(1_700_000_000_123_456_789));
        assert_eq!(parse_frame_timestamp("12_500000000.jpg"), Some(12_500_000_000));
        assert_eq!(parse_frame_timestamp("12.5.jpeg"), Some(12_500_000_000));
        assert_eq!(parse_frame_timestamp("12.000000001.png"), Some(12_000_000_001));
        assert_eq!(parse_frame_timestamp("3.JPG"), Some(3));
        assert_eq!(parse_frame_timestamp("notes.txt"), None);
        assert_eq!(parse_frame_timestamp("frame_001.jpg"), None);
        assert_eq!(parse_frame_timestamp("1_2000000000.jpg"), None);
    }

    #[test]
    fn test_load_jsonl_episode() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("episode_0001");
        std::fs::create_dir_all(&root).unwrap();

        write_jsonl_stream(
            &root.join("arm.jsonl"),
            &[
                (2_000_000_000, vec![2.0, 2.5]),
                (1_000_000_000, vec![1.0, 1.5]),
                (1_000_000_000, vec![9.0, 9.5]),
            ],
        );
        touch_frames(&root.join("front"), &["1_0.jpg", "1_40000000.jpg", "readme.md"]);

        let loader = EpisodeLoader::new(single_arm_profile(ArmFileFormat::Jsonl, "arm.jsonl"));
        let episode = loader.load("episode_0001", &root, tmp.path()).unwrap();

        assert_eq!(episode.arms.len(), 1);
        let arm = &episode.arms[0];
        assert_eq!(arm.dim, 2);
        assert_eq!(arm.timestamps, vec![1_000_000_000, 2_000_000_000]);
        assert_eq!(arm.values[0], vec![1.0, 1.5]);

        let cam = episode.reference().unwrap();
        assert_eq!(cam.timestamps, vec![1_000_000_000, 1_040_000_000]);
    }

    #[test]
    fn test_nested_timestamp_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("arm.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"header":{{"stamp":{{"sec":5,"nanosec":7}}}},"position":[1.0],"velocity":[0.5]}}"#
        )
        .unwrap();

        let mut profile = single_arm_profile(ArmFileFormat::Jsonl, "arm.jsonl");
        profile.timestamp = TimestampFields {
            sec: "header.stamp.sec".to_string(),
            nsec: Some("header.stamp.nanosec".to_string()),
        };
        profile.value_fields = vec!["position".to_string(), "velocity".to_string()];

        let loader = EpisodeLoader::new(profile.clone());
        let arm = loader.load_arm(tmp.path(), &profile.arms[0]).unwrap();
        assert_eq!(arm.timestamps, vec![5_000_000_007]);
        assert_eq!(arm.values[0], vec![1.0, 0.5]);
    }

    #[test]
    fn test_inconsistent_dimension() {
        let tmp = TempDir::new().unwrap();
        write_jsonl_stream(
            &tmp.path().join("arm.jsonl"),
            &[(1, vec![1.0, 2.0]), (2, vec![1.0])],
        );

        let profile = single_arm_profile(ArmFileFormat::Jsonl, "arm.jsonl");
        let loader = EpisodeLoader::new(profile.clone());
        let err = loader.load_arm(tmp.path(), &profile.arms[0]).unwrap_err();

        match err {
            LoaderError::InconsistentDimension {
                expected, actual, row, ..
            } => {
                assert_eq!((expected, actual, row), (2, 1, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_out_of_range_json_timestamp_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut file = File::create(tmp.path().join("arm.jsonl")).unwrap();
        writeln!(file, r#"{{"sec": 1, "nsec": 0, "position": [1.0]}}"#).unwrap();
        writeln!(file, r#"{{"sec": {}, "nsec": 0, "position": [2.0]}}"#, i64::MAX / 10).unwrap();

        let profile = single_arm_profile(ArmFileFormat::Jsonl, "arm.jsonl");
        let loader = EpisodeLoader::new(profile.clone());
        let err = loader.load_arm(tmp.path(), &profile.arms[0]).unwrap_err();
        match err {
            LoaderError::InvalidRow { row, reason, .. } => {
                assert_eq!(row, 1);
                assert!(reason.contains("out of range"), "{}", reason);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(combine_timestamp(2, 5), Some(2_000_000_005));
        assert_eq!(combine_timestamp(i64::MAX, 0), None);
        assert_eq!(combine_timestamp(i64::MAX / NANOS_PER_SEC, NANOS_PER_SEC), None);
        assert_eq!(float_seconds_timestamp(1.5), Some(1_500_000_000));
        assert_eq!(float_seconds_timestamp(1e300), None);
        assert_eq!(float_seconds_timestamp(f64::NAN), None);
    }

    #[test]
    fn test_out_of_range_parquet_timestamp_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("arm.parquet");

        let item = Arc::new(Field::new("item", DataType::Float32, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("sec", DataType::Int64, false),
            Field::new("nsec", DataType::UInt32, false),
            Field::new("position", DataType::FixedSizeList(item.clone(), 1), false),
        ]));
        let positions =
            FixedSizeListArray::try_new(item, 1, Arc::new(Float32Array::from(vec![0.5, 1.5])), None)
                .unwrap();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, i64::MAX])),
                Arc::new(UInt32Array::from(vec![0, 0])),
                Arc::new(positions),
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let profile = single_arm_profile(ArmFileFormat::Parquet, "arm.parquet");
        let loader = EpisodeLoader::new(profile.clone());
        let err = loader.load_arm(tmp.path(), &profile.arms[0]).unwrap_err();
        assert!(
            matches!(err, LoaderError::InvalidRow { row: 1, .. }),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_missing_stream_data() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ep");
        std::fs::create_dir_all(&root).unwrap();
        write_jsonl_stream(&root.join("arm.jsonl"), &[(1, vec![1.0])]);

        let loader = EpisodeLoader::new(single_arm_profile(ArmFileFormat::Jsonl, "arm.jsonl"));
        let err = loader.load("ep", &root, tmp.path()).unwrap_err();
        assert!(err.is_missing_data());

        touch_frames(&root.join("front"), &["notes.txt"]);
        let err = loader.load("ep", &root, tmp.path()).unwrap_err();
        assert!(err.is_missing_data());

        std::fs::remove_file(root.join("arm.jsonl")).unwrap();
        let err = loader.load("ep", &root, tmp.path()).unwrap_err();
        assert!(err.is_missing_data());
    }

    #[test]
    fn test_load_parquet_stream() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("arm.parquet");

        let item = Arc::new(Field::new("item", DataType::Float32, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("sec", DataType::Int64, false),
            Field::new("nsec", DataType::UInt32, false),
            Field::new("position", DataType::FixedSizeList(item.clone(), 2), false),
        ]));
        let positions = FixedSizeListArray::try_new(
            item,
            2,
            Arc::new(Float32Array::from(vec![0.5, 1.5, 2.5, 3.5])),
            None,
        )
        .unwrap();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![2, 1])),
                Arc::new(UInt32Array::from(vec![0, 500])),
                Arc::new(positions),
            ],
        )
        .unwrap();

        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let profile = single_arm_profile(ArmFileFormat::Parquet, "arm.parquet");
        let loader = EpisodeLoader::new(profile.clone());
        let arm = loader.load_arm(tmp.path(), &profile.arms[0]).unwrap();

        assert_eq!(arm.timestamps, vec![1_000_000_500, 2_000_000_000]);
        assert_eq!(arm.values, vec![vec![2.5, 3.5], vec![0.5, 1.5]]);
    }

    #[test]
    fn test_frame_container_is_unpacked() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ep");
        let cam_dir = root.join("front");
        std::fs::create_dir_all(&cam_dir).unwrap();

        let staging = tmp.path().join("staging");
        touch_frames(&staging, &["100.jpg", "200.jpg", "300.jpg"]);

        let tar_gz = File::create(cam_dir.join("frames.tar.gz")).unwrap();
        let encoder = flate2::write::GzEncoder::new(tar_gz, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all("frames", &staging).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let work = tmp.path().join("work");
        let profile = single_arm_profile(ArmFileFormat::Jsonl, "arm.jsonl");
        let loader = EpisodeLoader::new(profile.clone());
        let cam = loader.load_camera(&root, &profile.cameras[0], &work).unwrap();

        assert_eq!(cam.timestamps, vec![100, 200, 300]);
        assert!(cam.frames[0].starts_with(work.join("frames").join("front")));
    }
}

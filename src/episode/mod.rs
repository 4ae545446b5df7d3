//! Raw episode data model and the stream loader.
//!
//! A raw episode is one recorded robot-arm session: a handful of high-rate
//! arm streams (one per arm and role) and several lower-rate camera streams.
//! All timestamps are absolute nanoseconds.
//!
//! - **profile**: robot-type description of where each stream lives on disk
//! - **loader**: reads an episode directory into typed, sorted streams

pub mod loader;
pub mod profile;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use loader::EpisodeLoader;
pub use profile::{ArmFileFormat, ArmSpec, CameraSpec, RobotProfile, TimestampFields};

/// Nanoseconds since the Unix epoch.
pub type TimestampNs = i64;

/// Which side of the control loop an arm stream records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmRole {
    /// Operator / teleoperation input.
    Commanded,
    /// The robot's measured state.
    Executed,
}

impl fmt::Display for ArmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmRole::Commanded => write!(f, "commanded"),
            ArmRole::Executed => write!(f, "executed"),
        }
    }
}

/// A borrowed, time-sorted run of samples from one arm stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamView<'a> {
    pub timestamps: &'a [TimestampNs],
    pub values: &'a [Vec<f64>],
}

impl<'a> StreamView<'a> {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// High-rate joint/actuator samples for one arm and role.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmStream {
    pub arm: String,
    pub role: ArmRole,
    /// Vector width, fixed for the whole stream.
    pub dim: usize,
    /// Strictly increasing sample timestamps.
    pub timestamps: Vec<TimestampNs>,
    pub values: Vec<Vec<f64>>,
}

impl ArmStream {
    /// Builds a stream from unsorted samples.
    ///
    /// Samples are ordered by timestamp; of several samples sharing a
    /// timestamp only the first one read is kept.
    pub fn from_samples(
        arm: impl Into<String>,
        role: ArmRole,
        dim: usize,
        mut samples: Vec<(TimestampNs, Vec<f64>)>,
    ) -> Self {
        samples.sort_by_key(|(ts, _)| *ts);
        samples.dedup_by_key(|(ts, _)| *ts);

        let (timestamps, values) = samples.into_iter().unzip();
        Self {
            arm: arm.into(),
            role,
            dim,
            timestamps,
            values,
        }
    }

    /// Stable identifier used for feature names, e.g. `left_executed`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.arm, self.role)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn view(&self) -> StreamView<'_> {
        StreamView {
            timestamps: &self.timestamps,
            values: &self.values,
        }
    }

    /// Samples whose timestamp lies in `[start, end]`.
    pub fn window(&self, start: TimestampNs, end: TimestampNs) -> StreamView<'_> {
        let lo = self.timestamps.partition_point(|&ts| ts < start);
        let hi = self.timestamps.partition_point(|&ts| ts <= end).max(lo);
        StreamView {
            timestamps: &self.timestamps[lo..hi],
            values: &self.values[lo..hi],
        }
    }
}

/// Timestamped frames of one camera. Frames stay on disk; only paths are held.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraStream {
    pub name: String,
    pub timestamps: Vec<TimestampNs>,
    pub frames: Vec<PathBuf>,
}

impl CameraStream {
    /// Builds a stream from unsorted `(timestamp, path)` pairs.
    pub fn from_frames(name: impl Into<String>, mut frames: Vec<(TimestampNs, PathBuf)>) -> Self {
        frames.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        frames.dedup_by_key(|(ts, _)| *ts);

        let (timestamps, frames) = frames.into_iter().unzip();
        Self {
            name: name.into(),
            timestamps,
            frames,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// One fully loaded raw episode.
#[derive(Debug, Clone)]
pub struct RawEpisode {
    pub id: String,
    pub root: PathBuf,
    pub robot_type: String,
    pub arms: Vec<ArmStream>,
    pub cameras: Vec<CameraStream>,
    /// Name of the camera whose timeline drives alignment.
    pub reference_camera: String,
}

impl RawEpisode {
    pub fn camera(&self, name: &str) -> Option<&CameraStream> {
        self.cameras.iter().find(|c| c.name == name)
    }

    pub fn reference(&self) -> Option<&CameraStream> {
        self.camera(&self.reference_camera)
    }
}

//! Segment detection and time alignment.
//!
//! The reference camera's frame timestamps drive alignment: every segment
//! yields exactly one [`AlignedRecord`] per reference frame, holding the
//! state and action of each arm stream plus the matching frame of every
//! camera.
//!
//! - **search**: nearest-timestamp search and median helpers
//! - **segment**: per-camera gap detection and timeline splitting
//! - **strategy**: the nearest / chunking / window / linear strategies

pub mod search;
pub mod segment;
pub mod strategy;

use std::path::PathBuf;

pub use segment::{Gap, Segment, SegmentDetector, SegmentPlan};
pub use strategy::{
    ActionValue, Aggregation, AlignStrategy, AlignmentConfig, PaddingMode, StrategyKind,
};

use crate::episode::{RawEpisode, TimestampNs};
use crate::error::AlignError;

/// Name and width of one arm stream in the aligned output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLayout {
    pub key: String,
    pub dim: usize,
}

/// The frame a camera contributes to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    /// Index into the camera's raw timeline.
    pub index: usize,
    pub path: PathBuf,
}

/// One output row.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRecord {
    pub timestamp_ns: TimestampNs,
    /// One entry per stream in [`AlignedSegment::streams`] order; `None` when unavailable.
    pub state: Vec<Option<Vec<f64>>>,
    pub action: Vec<Option<ActionValue>>,
    /// One entry per camera in [`AlignedSegment::cameras`] order.
    pub frames: Vec<FrameRef>,
}

/// All records of one segment.
#[derive(Debug, Clone)]
pub struct AlignedSegment {
    pub episode_id: String,
    pub robot_type: String,
    pub segment: Segment,
    pub strategy: StrategyKind,
    pub chunk_size: Option<usize>,
    pub streams: Vec<StreamLayout>,
    pub cameras: Vec<String>,
    pub reference_camera: String,
    pub records: Vec<AlignedRecord>,
    /// Per-stream count of records whose state was unavailable.
    pub unavailable: Vec<usize>,
}

impl AlignedSegment {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Segments and aligned records of one episode.
#[derive(Debug, Clone)]
pub struct EpisodeAlignment {
    pub plan: SegmentPlan,
    pub segments: Vec<AlignedSegment>,
}

/// Detects segments and aligns them with one strategy.
#[derive(Debug, Clone)]
pub struct Aligner {
    strategy: AlignStrategy,
    tolerance_ns: i64,
    detector: SegmentDetector,
}

impl Aligner {
    pub fn new(strategy: AlignStrategy, config: &AlignmentConfig) -> Self {
        Self {
            strategy,
            tolerance_ns: config.tolerance_ns(),
            detector: SegmentDetector::new(config.gap_factor, config.min_segment_frames),
        }
    }

    /// Resolves `kind` against `config` and builds the aligner.
    pub fn from_config(kind: StrategyKind, config: &AlignmentConfig) -> Result<Self, AlignError> {
        let strategy = AlignStrategy::from_task(kind, config)?;
        Ok(Self::new(strategy, config))
    }

    pub fn align_episode(&self, episode: &RawEpisode) -> Result<EpisodeAlignment, AlignError> {
        let plan = self
            .detector
            .detect(&episode.cameras, &episode.reference_camera)?;

        let segments = plan
            .segments
            .iter()
            .map(|segment| self.align_segment(episode, segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EpisodeAlignment { plan, segments })
    }

    /// Aligns every reference frame of `segment`.
    pub fn align_segment(
        &self,
        episode: &RawEpisode,
        segment: &Segment,
    ) -> Result<AlignedSegment, AlignError> {
        let reference = episode
            .reference()
            .ok_or_else(|| AlignError::MissingReferenceCamera(episode.reference_camera.clone()))?;

        if segment.start_frame >= segment.end_frame || segment.end_frame > reference.len() {
            return Err(AlignError::SegmentOutOfRange {
                segment: segment.index,
                start: segment.start_frame,
                end: segment.end_frame,
                len: reference.len(),
            });
        }

        let tol = self.tolerance_ns;
        let reach = self.strategy.reach_ns(tol);
        let views: Vec<_> = episode
            .arms
            .iter()
            .map(|arm| arm.window(segment.start_ns - reach, segment.end_ns + reach))
            .collect();

        let mut unavailable = vec![0usize; episode.arms.len()];
        let mut records = Vec::with_capacity(segment.frame_count());

        for &t in &reference.timestamps[segment.start_frame..segment.end_frame] {
            let mut state = Vec::with_capacity(views.len());
            let mut action = Vec::with_capacity(views.len());

            for (i, view) in views.iter().enumerate() {
                let estimate = self.strategy.state(*view, t, tol);
                if estimate.is_none() {
                    unavailable[i] += 1;
                }
                action.push(self.strategy.action(*view, t, tol, estimate.as_ref()));
                state.push(estimate);
            }

            let frames = episode
                .cameras
                .iter()
                .filter_map(|camera| {
                    let index = search::nearest_index(&camera.timestamps, t)?;
                    Some(FrameRef {
                        index,
                        path: camera.frames[index].clone(),
                    })
                })
                .collect();

            records.push(AlignedRecord {
                timestamp_ns: t,
                state,
                action,
                frames,
            });
        }

        for (arm, &missing) in episode.arms.iter().zip(&unavailable) {
            if missing > 0 {
                tracing::debug!(
                    episode_id = %episode.id,
                    segment = segment.index,
                    stream = %arm.key(),
                    unavailable = missing,
                    "Records without a match within tolerance"
                );
            }
        }

        Ok(AlignedSegment {
            episode_id: episode.id.clone(),
            robot_type: episode.robot_type.clone(),
            segment: segment.clone(),
            strategy: self.strategy.kind(),
            chunk_size: self.strategy.chunk_size(),
            streams: episode
                .arms
                .iter()
                .map(|arm| StreamLayout {
                    key: arm.key(),
                    dim: arm.dim,
                })
                .collect(),
            cameras: episode
                .cameras
                .iter()
                .filter(|c| !c.is_empty())
                .map(|c| c.name.clone())
                .collect(),
            reference_camera: episode.reference_camera.clone(),
            records,
            unavailable,
        })
    }
}

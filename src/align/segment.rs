//! Gap detection and segment splitting.
//!
//! Every camera is checked for abnormal inter-frame gaps independently,
//! since cameras drop frames independently of each other. The union of all
//! gaps then cuts the reference camera's timeline into segments.

use serde::{Deserialize, Serialize};

use super::search::median_delta;
use crate::episode::{CameraStream, TimestampNs};
use crate::error::AlignError;

pub const DEFAULT_GAP_FACTOR: f64 = 4.0;
pub const DEFAULT_MIN_SEGMENT_FRAMES: usize = 30;

/// A corrupted time region found on one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub camera: String,
    /// Timestamp of the last frame before the gap.
    pub start_ns: TimestampNs,
    /// Timestamp of the first frame after the gap.
    pub end_ns: TimestampNs,
    pub median_delta_ns: f64,
}

impl Gap {
    /// True when `t` lies strictly inside the gap.
    pub fn contains(&self, t: TimestampNs) -> bool {
        self.start_ns < t && t < self.end_ns
    }
}

/// A gap-free run of reference-camera frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Position among the emitted segments of the episode.
    pub index: usize,
    /// First reference frame (inclusive).
    pub start_frame: usize,
    /// Last reference frame (exclusive).
    pub end_frame: usize,
    pub start_ns: TimestampNs,
    pub end_ns: TimestampNs,
}

impl Segment {
    pub fn frame_count(&self) -> usize {
        self.end_frame - self.start_frame
    }
}

/// Result of segment detection for one episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentPlan {
    pub segments: Vec<Segment>,
    pub gaps: Vec<Gap>,
    /// Candidate segments dropped for being too short.
    pub dropped_segments: usize,
    /// Reference frames belonging to dropped segments.
    pub dropped_frames: usize,
    /// Reference frames lying inside a gap.
    pub discarded_frames: usize,
}

impl SegmentPlan {
    pub fn is_degenerate(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Splits episodes at abnormal camera gaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentDetector {
    pub gap_factor: f64,
    pub min_segment_frames: usize,
}

impl Default for SegmentDetector {
    fn default() -> Self {
        Self {
            gap_factor: DEFAULT_GAP_FACTOR,
            min_segment_frames: DEFAULT_MIN_SEGMENT_FRAMES,
        }
    }
}

impl SegmentDetector {
    pub fn new(gap_factor: f64, min_segment_frames: usize) -> Self {
        Self {
            gap_factor,
            min_segment_frames,
        }
    }

    /// Gaps on one camera. Cameras with fewer than 3 frames are not checked.
    pub fn camera_gaps(&self, camera: &CameraStream) -> Vec<Gap> {
        if camera.len() < 3 {
            return Vec::new();
        }
        let Some(median) = median_delta(&camera.timestamps) else {
            return Vec::new();
        };
        if median <= 0.0 {
            return Vec::new();
        }

        let threshold = median * self.gap_factor;
        camera
            .timestamps
            .windows(2)
            .filter(|w| (w[1] - w[0]) as f64 > threshold)
            .map(|w| Gap {
                camera: camera.name.clone(),
                start_ns: w[0],
                end_ns: w[1],
                median_delta_ns: median,
            })
            .collect()
    }

    /// Detects gaps on all cameras and cuts the reference timeline.
    pub fn detect(
        &self,
        cameras: &[CameraStream],
        reference: &str,
    ) -> Result<SegmentPlan, AlignError> {
        let reference_stream = cameras
            .iter()
            .find(|c| c.name == reference)
            .ok_or_else(|| AlignError::MissingReferenceCamera(reference.to_string()))?;

        let mut gaps: Vec<Gap> = cameras.iter().flat_map(|c| self.camera_gaps(c)).collect();
        gaps.sort_by_key(|g| (g.start_ns, g.end_ns));

        let mut ends: Vec<TimestampNs> = gaps.iter().map(|g| g.end_ns).collect();
        ends.sort_unstable();

        let mut plan = SegmentPlan::default();
        // (zone, first frame, end frame) for each run of kept frames
        let mut runs: Vec<(usize, usize, usize)> = Vec::new();

        for (i, &t) in reference_stream.timestamps.iter().enumerate() {
            if gaps.iter().any(|g| g.contains(t)) {
                plan.discarded_frames += 1;
                continue;
            }

            // Frames separated by a gap have passed a different number of gap ends.
            let zone = ends.partition_point(|&end| end <= t);
            match runs.last_mut() {
                Some((z, _, end)) if *z == zone && *end == i => *end = i + 1,
                _ => runs.push((zone, i, i + 1)),
            }
        }

        for (_, start, end) in runs {
            if end - start < self.min_segment_frames {
                plan.dropped_segments += 1;
                plan.dropped_frames += end - start;
                continue;
            }
            plan.segments.push(Segment {
                index: plan.segments.len(),
                start_frame: start,
                end_frame: end,
                start_ns: reference_stream.timestamps[start],
                end_ns: reference_stream.timestamps[end - 1],
            });
        }

        if !gaps.is_empty() || plan.dropped_segments > 0 {
            tracing::info!(
                gaps = gaps.len(),
                segments = plan.segments.len(),
                dropped_segments = plan.dropped_segments,
                discarded_frames = plan.discarded_frames,
                "Episode timeline split"
            );
        }

        plan.gaps = gaps;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const FRAME_NS: i64 = 40_000_000;

    fn camera(name: &str, timestamps: Vec<i64>) -> CameraStream {
        let frames = timestamps
            .into_iter()
            .map(|ts| (ts, PathBuf::from(format!("{ts}.jpg"))))
            .collect();
        CameraStream::from_frames(name, frames)
    }

    fn regular(n: usize, offset: i64) -> Vec<i64> {
        (0..n as i64).map(|i| offset + i * FRAME_NS).collect()
    }

    #[test]
    fn test_no_gap_single_segment() {
        let cams = vec![camera("ref", regular(100, 0))];
        let plan = SegmentDetector::default().detect(&cams, "ref").unwrap();

        assert_eq!(plan.segments.len(), 1);
        assert_eq!(plan.segments[0].frame_count(), 100);
        assert!(plan.gaps.is_empty());
    }

    #[test]
    fn test_single_gap_splits_at_k() {
        let n = 100;
        let k = 40;
        let mut ts = regular(k, 0);
        let resume = ts[k - 1] + 10 * FRAME_NS;
        ts.extend(regular(n - k, resume));

        let cams = vec![camera("ref", ts)];
        let plan = SegmentDetector::default().detect(&cams, "ref").unwrap();

        assert_eq!(plan.segments.len(), 2);
        assert_eq!(plan.segments[0].frame_count(), k);
        assert_eq!(plan.segments[1].frame_count(), n - k);
        assert_eq!(plan.segments[1].start_frame, k);
        assert_eq!(plan.segments[1].index, 1);
        assert_eq!(plan.discarded_frames, 0);
    }

    #[test]
    fn test_gap_on_other_camera_cuts_reference() {
        let reference = regular(100, 0);
        // Wrist camera loses frames between 2.0s and 2.4s.
        let wrist: Vec<i64> = regular(100, 0)
            .into_iter()
            .filter(|&t| t <= 2_000_000_000 || t >= 2_400_000_000)
            .collect();

        let cams = vec![camera("ref", reference), camera("wrist", wrist)];
        let plan = SegmentDetector::default().detect(&cams, "ref").unwrap();

        assert_eq!(plan.gaps.len(), 1);
        assert_eq!(plan.gaps[0].camera, "wrist");
        assert_eq!(plan.segments.len(), 2);
        // Frames at 2.04s..2.36s fall inside the gap.
        assert_eq!(plan.discarded_frames, 9);
        assert_eq!(plan.segments[0].end_ns, 2_000_000_000);
        assert_eq!(plan.segments[1].start_ns, 2_400_000_000);
    }

    #[test]
    fn test_short_segments_dropped() {
        let mut ts = regular(10, 0);
        let resume = ts[9] + 20 * FRAME_NS;
        ts.extend(regular(50, resume));

        let cams = vec![camera("ref", ts)];
        let plan = SegmentDetector::default().detect(&cams, "ref").unwrap();

        assert_eq!(plan.segments.len(), 1);
        assert_eq!(plan.segments[0].index, 0);
        assert_eq!(plan.segments[0].start_frame, 10);
        assert_eq!(plan.dropped_segments, 1);
        assert_eq!(plan.dropped_frames, 10);
    }

    #[test]
    fn test_degenerate_episode() {
        let cams = vec![camera("ref", regular(5, 0))];
        let plan = SegmentDetector::default().detect(&cams, "ref").unwrap();
        assert!(plan.is_degenerate());
    }

    #[test]
    fn test_emitted_segments_have_no_internal_gap() {
        let mut ts = Vec::new();
        let mut t = 0;
        for i in 0..300i64 {
            ts.push(t);
            t += if i % 97 == 96 { 7 * FRAME_NS } else { FRAME_NS };
        }
        let cams = vec![camera("ref", ts.clone())];
        let detector = SegmentDetector::default();
        let plan = detector.detect(&cams, "ref").unwrap();
        let limit = median_delta(&ts).unwrap() * detector.gap_factor;

        // The 9-frame tail after the third gap is too short to keep.
        assert_eq!(plan.segments.len(), 3);
        assert_eq!(plan.dropped_segments, 1);
        for seg in &plan.segments {
            assert!(seg.frame_count() >= detector.min_segment_frames);
            for w in ts[seg.start_frame..seg.end_frame].windows(2) {
                assert!(((w[1] - w[0]) as f64) <= limit);
            }
        }
    }

    #[test]
    fn test_short_cameras_not_checked() {
        let cams = vec![
            camera("ref", regular(40, 0)),
            camera("still", vec![0, 1_000_000_000]),
        ];
        let plan = SegmentDetector::default().detect(&cams, "ref").unwrap();
        assert!(plan.gaps.is_empty());
        assert_eq!(plan.segments.len(), 1);
    }

    #[test]
    fn test_missing_reference_camera() {
        let cams = vec![camera("a", regular(40, 0))];
        let err = SegmentDetector::default().detect(&cams, "b").unwrap_err();
        assert!(matches!(err, AlignError::MissingReferenceCamera(_)));
    }
}

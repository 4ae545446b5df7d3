//! Synthetic raw episodes and a stub video encoder shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use episode_forge::episode::{ArmFileFormat, ArmRole, ArmSpec, CameraSpec, RobotProfile};
use episode_forge::export::VideoEncoder;
use episode_forge::pipeline::ConversionConfig;
use episode_forge::ExportError;

pub const MS: i64 = 1_000_000;
pub const FRAME_MS: i64 = 40;
pub const ARM_PERIOD_MS: i64 = 4;

/// Writes a placeholder file instead of encoding.
#[derive(Default)]
pub struct StubEncoder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl VideoEncoder for StubEncoder {
    async fn encode(&self, frames: &[PathBuf], _fps: u32, output: &Path) -> Result<(), ExportError> {
        assert!(!frames.is_empty());
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(output, b"mp4").unwrap();
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Layout of a synthetic episode.
#[derive(Debug, Clone)]
pub struct EpisodeSpec {
    pub arm_dim: usize,
    pub frames: usize,
    /// Extra delay inserted on every camera before this frame index.
    pub gap_before: Option<(usize, i64)>,
    /// Offset of the wrist camera timeline relative to the front camera.
    pub wrist_offset_ms: i64,
}

impl EpisodeSpec {
    pub fn new(arm_dim: usize, frames: usize) -> Self {
        Self {
            arm_dim,
            frames,
            gap_before: None,
            wrist_offset_ms: 7,
        }
    }

    pub fn with_wrist_offset(mut self, offset_ms: i64) -> Self {
        self.wrist_offset_ms = offset_ms;
        self
    }

    pub fn with_gap(mut self, frame: usize, extra_ms: i64) -> Self {
        self.gap_before = Some((frame, extra_ms));
        self
    }

    pub fn frame_ts(&self, i: usize) -> i64 {
        let base = i as i64 * FRAME_MS * MS;
        match self.gap_before {
            Some((at, extra)) if i >= at => base + extra * MS,
            _ => base,
        }
    }
}

pub fn profile() -> RobotProfile {
    RobotProfile {
        robot_type: "test_arm".to_string(),
        arms: vec![ArmSpec {
            arm: "main".to_string(),
            role: ArmRole::Executed,
            file: "main_executed.jsonl".to_string(),
            format: ArmFileFormat::Jsonl,
        }],
        cameras: vec![
            CameraSpec {
                name: "front".to_string(),
                dir: None,
            },
            CameraSpec {
                name: "wrist".to_string(),
                dir: None,
            },
        ],
        reference_camera: "front".to_string(),
        ..Default::default()
    }
}

pub fn config() -> ConversionConfig {
    let mut config = ConversionConfig::new().with_robot(profile());
    config.alignment.min_segment_frames = 10;
    config
}

/// Writes a raw episode: one 250Hz arm stream covering every camera frame,
/// plus `front` and `wrist` cameras at 25fps.
pub fn write_episode(dir: &Path, spec: &EpisodeSpec) {
    let last_frame = spec.frame_ts(spec.frames - 1);
    let samples = (last_frame / (ARM_PERIOD_MS * MS)) + 10;

    let rows: Vec<String> = (0..samples)
        .map(|i| {
            let ts = i * ARM_PERIOD_MS * MS;
            let position: Vec<f64> = (0..spec.arm_dim).map(|d| i as f64 + d as f64 / 100.0).collect();
            serde_json::json!({
                "sec": ts / 1_000_000_000,
                "nsec": ts % 1_000_000_000,
                "position": position,
            })
            .to_string()
        })
        .collect();
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("main_executed.jsonl"), rows.join("\n")).unwrap();

    for (camera, offset_ms) in [("front", 0), ("wrist", spec.wrist_offset_ms)] {
        let camera_dir = dir.join(camera);
        std::fs::create_dir_all(&camera_dir).unwrap();
        for i in 0..spec.frames {
            let ts = spec.frame_ts(i) + offset_ms * MS;
            let name = format!("{}_{:09}.jpg", ts / 1_000_000_000, ts % 1_000_000_000);
            image::RgbImage::from_pixel(8, 6, image::Rgb([i as u8, 64, 128]))
                .save(camera_dir.join(name))
                .unwrap();
        }
    }
}

//! Per-camera video encoding.
//!
//! The selected frames of one camera are staged as a numbered image
//! sequence and handed to an external encoder.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::ExportError;

/// Encodes an ordered frame sequence into one video file.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encodes `frames` (one per output record, in order) at `fps`.
    async fn encode(&self, frames: &[PathBuf], fps: u32, output: &Path) -> Result<(), ExportError>;

    fn name(&self) -> &str;
}

/// ffmpeg settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub ffmpeg_bin: String,
    pub codec: String,
    pub pix_fmt: String,
    pub crf: u32,
    pub gop: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            codec: "libsvtav1".to_string(),
            pix_fmt: "yuv420p".to_string(),
            crf: 30,
            gop: 2,
        }
    }
}

/// Shells out to `ffmpeg` over an image2 sequence.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    config: VideoConfig,
}

impl FfmpegEncoder {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// Check whether the configured ffmpeg binary can be run.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(&self, frames: &[PathBuf], fps: u32, output: &Path) -> Result<(), ExportError> {
        let encoding_error = |reason: String| ExportError::VideoEncoding {
            path: output.to_path_buf(),
            reason,
        };

        if frames.is_empty() {
            return Err(encoding_error("no frames to encode".to_string()));
        }

        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExportError::Io(e, parent.to_path_buf()))?;

        let staging = tempfile::Builder::new()
            .prefix(".frames-")
            .tempdir_in(parent)
            .map_err(|e| ExportError::Io(e, parent.to_path_buf()))?;

        let frames_owned = frames.to_vec();
        let staging_path = staging.path().to_path_buf();
        let pattern = tokio::task::spawn_blocking(move || stage_frames(&frames_owned, &staging_path))
            .await
            .map_err(|e| encoding_error(format!("staging task failed: {}", e)))??;

        let result = Command::new(&self.config.ffmpeg_bin)
            .args(["-y", "-loglevel", "error", "-f", "image2"])
            .arg("-framerate")
            .arg(fps.to_string())
            .arg("-i")
            .arg(&pattern)
            .arg("-c:v")
            .arg(&self.config.codec)
            .arg("-pix_fmt")
            .arg(&self.config.pix_fmt)
            .arg("-g")
            .arg(self.config.gop.to_string())
            .arg("-crf")
            .arg(self.config.crf.to_string())
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| encoding_error(format!("failed to run {}: {}", self.config.ffmpeg_bin, e)))?;

        if !result.status.success() {
            return Err(encoding_error(format!(
                "{} exited with code {}: {}",
                self.config.ffmpeg_bin,
                result.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        tracing::debug!(
            output = %output.display(),
            frames = frames.len(),
            fps,
            "Video encoded"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Links (or copies) frames into `dir` as `frame_000000.<ext>`, ... and
/// returns the printf-style input pattern.
pub fn stage_frames(frames: &[PathBuf], dir: &Path) -> Result<PathBuf, ExportError> {
    let ext = frame_extension(&frames[0]);
    if let Some(other) = frames.iter().find(|f| frame_extension(f) != ext) {
        return Err(ExportError::Image {
            path: other.clone(),
            reason: format!("frame format differs from '.{}' used by the sequence", ext),
        });
    }

    for (i, frame) in frames.iter().enumerate() {
        let target = dir.join(format!("frame_{:06}.{}", i, ext));
        if std::fs::hard_link(frame, &target).is_err() {
            std::fs::copy(frame, &target).map_err(|e| ExportError::Io(e, frame.clone()))?;
        }
    }

    Ok(dir.join(format!("frame_%06d.{}", ext)))
}

fn frame_extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}

/// Height and width of a frame image.
pub fn frame_dimensions(path: &Path) -> Result<(u32, u32), ExportError> {
    let (width, height) = image::image_dimensions(path).map_err(|e| ExportError::Image {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok((height, width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_stage_frames_repeats_reused_frames() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("100.jpg");
        let b = tmp.path().join("200.jpg");
        write_jpeg(&a, 4, 4);
        write_jpeg(&b, 4, 4);

        let staging = tmp.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let pattern = stage_frames(&[a.clone(), a, b], &staging).unwrap();

        assert_eq!(pattern, staging.join("frame_%06d.jpg"));
        assert!(staging.join("frame_000000.jpg").exists());
        assert!(staging.join("frame_000001.jpg").exists());
        assert!(staging.join("frame_000002.jpg").exists());
    }

    #[test]
    fn test_stage_frames_rejects_mixed_formats() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("1.jpg");
        let b = tmp.path().join("2.png");
        std::fs::write(&a, b"x").unwrap();
        std::fs::write(&b, b"x").unwrap();

        let err = stage_frames(&[a, b], tmp.path()).unwrap_err();
        assert!(matches!(err, ExportError::Image { .. }));
    }

    #[test]
    fn test_frame_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.jpg");
        write_jpeg(&path, 64, 48);
        assert_eq!(frame_dimensions(&path).unwrap(), (48, 64));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_binary_reports_encoding_error() {
        let tmp = TempDir::new().unwrap();
        let frame = tmp.path().join("1.jpg");
        write_jpeg(&frame, 4, 4);

        let encoder = FfmpegEncoder::new(VideoConfig {
            ffmpeg_bin: "definitely-not-ffmpeg-binary".to_string(),
            ..Default::default()
        });
        assert!(!encoder.is_available().await);

        let err = encoder
            .encode(&[frame], 25, &tmp.path().join("out/video.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::VideoEncoding { .. }));
    }
}

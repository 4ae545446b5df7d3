//! Conversion profile: robot layout, alignment and output settings.
//!
//! Profiles are YAML files. Each task may carry `config_overrides`, a JSON
//! object deep-merged over the profile before the task is converted.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::align::AlignmentConfig;
use crate::episode::RobotProfile;
use crate::export::{VideoConfig, WriterConfig};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The profile or an override could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to convert one raw episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub robot: RobotProfile,
    pub alignment: AlignmentConfig,
    pub output: WriterConfig,
    pub video: VideoConfig,
}

impl ConversionConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a YAML profile. Missing sections take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a YAML profile file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Returns a copy with `overrides` deep-merged on top.
    ///
    /// Objects merge key by key; any other value replaces the base value.
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> Result<Self, ConfigError> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }

        let mut base = serde_json::to_value(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        deep_merge(&mut base, &Value::Object(overrides.clone()));

        let merged: Self = serde_json::from_value(base)
            .map_err(|e| ConfigError::Parse(format!("invalid config_overrides: {}", e)))?;
        merged.validate()?;
        Ok(merged)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.robot.validate().map_err(ConfigError::ValidationFailed)?;

        self.alignment
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        if self.output.chunks_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "output.chunks_size must be greater than 0".to_string(),
            ));
        }

        if self.output.fps == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "output.fps must be greater than 0".to_string(),
            ));
        }

        if self.video.ffmpeg_bin.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "video.ffmpeg_bin cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the robot profile.
    pub fn with_robot(mut self, robot: RobotProfile) -> Self {
        self.robot = robot;
        self
    }

    /// Builder method to set the alignment parameters.
    pub fn with_alignment(mut self, alignment: AlignmentConfig) -> Self {
        self.alignment = alignment;
        self
    }

    /// Builder method to set the output settings.
    pub fn with_output(mut self, output: WriterConfig) -> Self {
        self.output = output;
        self
    }

    /// Builder method to set the video settings.
    pub fn with_video(mut self, video: VideoConfig) -> Self {
        self.video = video;
        self
    }
}

/// Merges `overlay` into `base` recursively.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

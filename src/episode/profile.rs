//! Robot profiles: where each stream of a raw episode lives and how it is encoded.

use serde::{Deserialize, Serialize};

use super::ArmRole;

/// On-disk encoding of an arm stream file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArmFileFormat {
    /// One JSON object per line.
    #[default]
    Jsonl,
    /// Parquet table, one row per sample.
    Parquet,
}

/// Field names holding the sample timestamp.
///
/// With `nsec` set the timestamp is `sec * 1e9 + nsec`; without it `sec`
/// holds fractional seconds. JSONL fields may be dotted paths such as
/// `header.stamp.sec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFields {
    pub sec: String,
    #[serde(default)]
    pub nsec: Option<String>,
}

impl Default for TimestampFields {
    fn default() -> Self {
        Self {
            sec: "sec".to_string(),
            nsec: Some("nsec".to_string()),
        }
    }
}

/// One arm stream file in the episode directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSpec {
    pub arm: String,
    pub role: ArmRole,
    /// Path relative to the episode root.
    pub file: String,
    #[serde(default)]
    pub format: ArmFileFormat,
}

/// One camera sub-directory in the episode directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSpec {
    pub name: String,
    /// Directory relative to the episode root; defaults to the camera name.
    #[serde(default)]
    pub dir: Option<String>,
}

impl CameraSpec {
    pub fn dir(&self) -> &str {
        self.dir.as_deref().unwrap_or(&self.name)
    }
}

/// Description of one robot type's raw recording layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotProfile {
    pub robot_type: String,
    pub arms: Vec<ArmSpec>,
    pub cameras: Vec<CameraSpec>,
    pub reference_camera: String,
    #[serde(default)]
    pub timestamp: TimestampFields,
    /// Per-row array fields concatenated into the sample vector, in order.
    #[serde(default = "default_value_fields")]
    pub value_fields: Vec<String>,
    /// File name of the compressed frame container inside a camera directory.
    #[serde(default = "default_frame_container")]
    pub frame_container: String,
}

fn default_value_fields() -> Vec<String> {
    vec!["position".to_string()]
}

fn default_frame_container() -> String {
    "frames.tar.gz".to_string()
}

impl Default for RobotProfile {
    fn default() -> Self {
        let arms = ["left", "right"]
            .iter()
            .flat_map(|arm| {
                [ArmRole::Commanded, ArmRole::Executed]
                    .into_iter()
                    .map(move |role| ArmSpec {
                        arm: arm.to_string(),
                        role,
                        file: format!("{}_{}.jsonl", arm, role),
                        format: ArmFileFormat::Jsonl,
                    })
            })
            .collect();

        Self {
            robot_type: "dual_arm".to_string(),
            arms,
            cameras: vec![
                CameraSpec {
                    name: "cam_high".to_string(),
                    dir: None,
                },
                CameraSpec {
                    name: "cam_left_wrist".to_string(),
                    dir: None,
                },
                CameraSpec {
                    name: "cam_right_wrist".to_string(),
                    dir: None,
                },
            ],
            reference_camera: "cam_high".to_string(),
            timestamp: TimestampFields::default(),
            value_fields: default_value_fields(),
            frame_container: default_frame_container(),
        }
    }
}

impl RobotProfile {
    /// Checks that the profile is internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.arms.is_empty() {
            return Err("profile declares no arm streams".to_string());
        }
        if self.cameras.is_empty() {
            return Err("profile declares no cameras".to_string());
        }
        if !self.cameras.iter().any(|c| c.name == self.reference_camera) {
            return Err(format!(
                "reference camera '{}' is not among the declared cameras",
                self.reference_camera
            ));
        }
        if self.value_fields.is_empty() {
            return Err("value_fields cannot be empty".to_string());
        }

        let mut keys: Vec<(String, ArmRole)> =
            self.arms.iter().map(|a| (a.arm.clone(), a.role)).collect();
        keys.sort();
        let before = keys.len();
        keys.dedup();
        if keys.len() != before {
            return Err("duplicate (arm, role) pair in profile".to_string());
        }

        Ok(())
    }
}

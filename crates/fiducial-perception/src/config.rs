//! Service configuration, loadable from JSON. Every field has a default, so
//! `{}` is a valid config.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use fiducial_pose::PoseEstimatorParams;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Square-marker detector settings, handed to the detector unmodified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagDetectorParams {
    pub threads: u32,
    pub quad_decimate: f32,
    pub quad_sigma: f32,
    pub refine_edges: bool,
    pub decode_sharpening: f64,
}

impl Default for TagDetectorParams {
    fn default() -> Self {
        Self {
            threads: 4,
            quad_decimate: 2.0,
            quad_sigma: 0.0,
            refine_edges: true,
            decode_sharpening: 0.25,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectDetectorParams {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for ObjectDetectorParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub camera_index: u32,
    /// Frames per second; values below 1 run at 1 fps.
    pub target_fps: u32,
    /// Printed marker edge length in meters.
    pub tag_size_m: f64,
    pub calibration_path: PathBuf,
    /// Publish a status report every N frames; 0 disables it.
    pub status_every: u64,
    /// Pause after a failed frame read.
    pub read_backoff_ms: u64,
    /// Project object footprints onto the floor when the camera is posed.
    pub localize_objects: bool,
    pub tag_detector: TagDetectorParams,
    pub object_detector: ObjectDetectorParams,
    pub pose: PoseEstimatorParams,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            target_fps: 30,
            tag_size_m: 0.015,
            calibration_path: PathBuf::from("calibration.json"),
            status_every: 100,
            read_backoff_ms: 100,
            localize_objects: true,
            tag_detector: TagDetectorParams::default(),
            object_detector: ObjectDetectorParams::default(),
            pose: PoseEstimatorParams::default(),
        }
    }
}

impl PerceptionConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// `1 / max(target_fps, 1)` seconds.
    pub fn target_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.target_fps.max(1)))
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }
}

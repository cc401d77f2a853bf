//! Detector stand-ins: recorded marker observations played back by frame
//! index, and detectors that find nothing.

use std::{collections::BTreeMap, fs, path::Path};

use fiducial_core::CameraModel;
use fiducial_perception::{DetectedObject, Frame, ObjectDetector, TagDetector};
use fiducial_pose::DetectedMarkerObservation;
use log::info;

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Plays back recorded corner observations.
///
/// The JSON document maps a frame index to that frame's observations:
///
/// ```json
/// { "1": [{ "id": 3, "corners": [[280, 200], [360, 200], [360, 280], [280, 280]],
///           "center": [320, 240], "decision_margin": 48.0, "hamming": 0 }] }
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReplayTagDetector {
    frames: BTreeMap<u64, Vec<DetectedMarkerObservation>>,
}

impl ReplayTagDetector {
    pub fn new(frames: BTreeMap<u64, Vec<DetectedMarkerObservation>>) -> Self {
        Self { frames }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ReplayError> {
        Ok(Self::new(serde_json::from_str(raw)?))
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let replay = Self::from_json_str(&fs::read_to_string(path)?)?;
        info!(
            "loaded {} recorded frame(s) of marker observations from {}",
            replay.frames.len(),
            path.display()
        );
        Ok(replay)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl TagDetector for ReplayTagDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        _camera: Option<&CameraModel>,
    ) -> Vec<DetectedMarkerObservation> {
        self.frames.get(&frame.index).cloned().unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullTagDetector;

impl TagDetector for NullTagDetector {
    fn detect(&mut self, _frame: &Frame, _camera: Option<&CameraModel>) -> Vec<DetectedMarkerObservation> {
        Vec::new()
    }
}

/// Object detector without a model. Never ready.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObjectDetector;

impl ObjectDetector for NullObjectDetector {
    fn is_ready(&self) -> bool {
        false
    }

    fn detect(&mut self, _frame: &Frame) -> Vec<DetectedObject> {
        Vec::new()
    }
}

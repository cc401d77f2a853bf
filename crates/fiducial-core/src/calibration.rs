//! Calibration document I/O and the calibration provider seam.
//!
//! The document is a flat JSON object:
//!
//! ```json
//! {
//!   "camera_matrix": [fx, 0, cx, 0, fy, cy, 0, 0, 1],
//!   "dist_coeffs": [k1, k2, p1, p2, k3],
//!   "image_width": 640,
//!   "image_height": 480,
//!   "reprojection_error": 0.21,
//!   "rotation": [9 floats, row-major, camera -> world],
//!   "translation": [3 floats, camera -> world]
//! }
//! ```
//!
//! `rotation`/`translation` are present only when a world pose was
//! calibrated as well.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{CameraModel, CameraModelError, CameraPose, Distortion, ImageSize, Intrinsics};

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] CameraModelError),
    #[error("extrinsics must provide both rotation and translation")]
    PartialExtrinsics,
}

/// On-disk calibration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub camera_matrix: [f64; 9],
    #[serde(default)]
    pub dist_coeffs: Vec<f64>,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default)]
    pub reprojection_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<[f64; 9]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<[f64; 3]>,
}

impl CalibrationFile {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Validated calibration: intrinsics plus an optional camera -> world pose.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub camera: CameraModel,
    pub pose: Option<CameraPose>,
    pub reprojection_error: f64,
}

impl Calibration {
    pub fn new(camera: CameraModel) -> Self {
        Self {
            camera,
            pose: None,
            reprojection_error: 0.0,
        }
    }

    pub fn with_pose(mut self, pose: CameraPose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn from_file(file: &CalibrationFile) -> Result<Self, CalibrationError> {
        let camera = CameraModel::new(
            Intrinsics::from_row_major(&file.camera_matrix),
            Distortion::from_coeffs(&file.dist_coeffs)?,
            ImageSize::new(file.image_width, file.image_height),
        )?;
        let pose = match (&file.rotation, &file.translation) {
            (Some(r), Some(t)) => Some(CameraPose::from_row_major(r, t)),
            (None, None) => None,
            _ => return Err(CalibrationError::PartialExtrinsics),
        };
        Ok(Self {
            camera,
            pose,
            reprojection_error: file.reprojection_error,
        })
    }

    pub fn to_file(&self) -> CalibrationFile {
        let size = self.camera.image_size();
        CalibrationFile {
            camera_matrix: self.camera.intrinsics().to_row_major(),
            dist_coeffs: self.camera.distortion().coeffs().to_vec(),
            image_width: size.width,
            image_height: size.height,
            reprojection_error: self.reprojection_error,
            rotation: self.pose.map(|p| p.rotation_row_major()),
            translation: self.pose.map(|p| p.translation_array()),
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let calib = Self::from_file(&CalibrationFile::load_json(path)?)?;
        info!("calibration loaded from {}", path.display());
        Ok(calib)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationError> {
        let path = path.as_ref();
        self.to_file().write_json(path)?;
        info!("calibration saved to {}", path.display());
        Ok(())
    }
}

/// Source of camera calibration at startup.
///
/// `Ok(None)` means "no calibration available", which callers treat as a
/// soft condition rather than an error.
pub trait CalibrationProvider: Send {
    fn load(&self) -> Result<Option<Calibration>, CalibrationError>;
}

/// Reads a [`CalibrationFile`] from disk; a missing file yields `Ok(None)`.
#[derive(Debug, Clone)]
pub struct FileCalibrationProvider {
    path: PathBuf,
}

impl FileCalibrationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationProvider for FileCalibrationProvider {
    fn load(&self) -> Result<Option<Calibration>, CalibrationError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Calibration::load_json(&self.path).map(Some)
    }
}

/// In-memory calibration, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCalibrationProvider(pub Option<Calibration>);

impl CalibrationProvider for StaticCalibrationProvider {
    fn load(&self) -> Result<Option<Calibration>, CalibrationError> {
        Ok(self.0.clone())
    }
}

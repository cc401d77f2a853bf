//! Core types for fiducial pose estimation and camera geometry.
//!
//! This crate is intentionally small and purely geometric: a calibrated
//! camera model, rigid transforms with one fixed frame convention, a
//! 4-point homography solver, grayscale image helpers and the calibration
//! document. It does *not* depend on any concrete detector or capture
//! backend.

mod calibration;
mod camera;
mod homography;
mod image;
mod logger;
mod transform;

pub use calibration::{
    Calibration, CalibrationError, CalibrationFile, CalibrationProvider,
    FileCalibrationProvider, StaticCalibrationProvider,
};
pub use camera::{CameraModel, CameraModelError, Distortion, ImageSize, Intrinsics};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, undistort_image, GrayImage, GrayImageView};
pub use transform::{is_rotation_matrix, CameraPose, RigidTransform};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;

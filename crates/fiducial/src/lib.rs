//! High-level facade for the `fiducial-*` workspace.
//!
//! This crate provides:
//! - re-exports of the core, pose, geometry and perception crates
//! - detector stand-ins for running the perception loop without a vision
//!   library: recorded observations ([`ReplayTagDetector`]) and empty
//!   detectors
//! - (feature `image`) an image-directory [`FrameSource`](perception::FrameSource)
//! - (features `cli` + `image`) the `fiducial-vision` service binary
//!
//! ## Quickstart
//!
//! ```no_run
//! use fiducial::core::Calibration;
//! use fiducial::geometry::CoordinateTransform;
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let calib = Calibration::load_json("calibration.json")?;
//! let transform = CoordinateTransform::from_calibration(&calib);
//! let floor = transform.image_to_world(Point2::new(320.0, 400.0), 0.0)?;
//! println!("pixel hits the floor at {floor:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `fiducial::core`: camera model, rigid transforms, homography, calibration I/O.
//! - `fiducial::pose`: square-marker pose from four corners.
//! - `fiducial::geometry`: rays, plane intersection, pixel <-> world mapping.
//! - `fiducial::perception`: the fixed-rate loop and its capability traits.

pub use fiducial_core as core;
pub use fiducial_geometry as geometry;
pub use fiducial_perception as perception;
pub use fiducial_pose as pose;

pub use fiducial_core::{Calibration, CameraModel, CameraPose, RigidTransform};
pub use fiducial_geometry::{CoordinateTransform, ProjectionError};
pub use fiducial_perception::{PerceptionConfig, PerceptionLoop};
pub use fiducial_pose::{DetectedMarkerObservation, MarkerPose, MarkerPoseEstimator};

mod replay;
pub use replay::{NullObjectDetector, NullTagDetector, ReplayError, ReplayTagDetector};

#[cfg(feature = "image")]
mod sequence;
#[cfg(feature = "image")]
pub use sequence::{gray_view, load_gray, ImageSequenceSource};

#[cfg(all(feature = "cli", feature = "image"))]
pub mod cli;

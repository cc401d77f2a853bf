//! Metric pose of square fiducial markers.
//!
//! Given the four image corners of a detected marker, its printed size and a
//! calibrated [`CameraModel`](fiducial_core::CameraModel), the
//! [`MarkerPoseEstimator`] recovers the marker -> camera transform and, if the
//! camera pose is known, the marker position in the world.
//!
//! ```no_run
//! use fiducial_core::{CameraModel, ImageSize, Intrinsics};
//! use fiducial_pose::{DetectedMarkerObservation, MarkerPoseEstimator};
//! use nalgebra::Point2;
//!
//! let camera = CameraModel::pinhole(
//!     Intrinsics::new(800.0, 800.0, 320.0, 240.0),
//!     ImageSize::new(640, 480),
//! )?;
//! let obs = DetectedMarkerObservation::from_corners(
//!     0,
//!     [
//!         Point2::new(280.0, 200.0),
//!         Point2::new(360.0, 200.0),
//!         Point2::new(360.0, 280.0),
//!         Point2::new(280.0, 280.0),
//!     ],
//! );
//! let pose = MarkerPoseEstimator::default().estimate(&obs, &camera, 0.1);
//! println!("valid={} distance={:?}", pose.valid, pose.distance());
//! # Ok::<(), fiducial_core::CameraModelError>(())
//! ```

mod estimator;
mod observation;

pub use estimator::{MarkerPose, MarkerPoseEstimator, PoseEstimatorParams};
pub use observation::DetectedMarkerObservation;

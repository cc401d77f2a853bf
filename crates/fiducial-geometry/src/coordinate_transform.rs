//! Pixel <-> world mapping for one camera.
//!
//! World coordinates follow the camera pose convention of
//! [`fiducial_core::CameraPose`]: the pose maps camera-frame points into the
//! world, so the camera center is its translation and every world -> camera
//! step goes through [`RigidTransform::inverse`](fiducial_core::RigidTransform::inverse).

use fiducial_core::{Calibration, CameraModel, CameraPose};
use log::debug;
use nalgebra::{Point2, Point3, Vector3};

use crate::ray::{Plane, PlaneMiss, Ray};

/// Camera-frame depth at or below which a point cannot be imaged.
const MIN_DEPTH: f64 = 1e-9;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("camera is not calibrated")]
    NotCalibrated,
    #[error("camera pose is unknown")]
    NoPose,
    #[error("ray is parallel to the target plane")]
    ParallelRay,
    #[error("target lies behind the camera")]
    BehindCamera,
}

impl From<PlaneMiss> for ProjectionError {
    fn from(miss: PlaneMiss) -> Self {
        match miss {
            PlaneMiss::Parallel => Self::ParallelRay,
            PlaneMiss::Behind => Self::BehindCamera,
        }
    }
}

/// Calibration plus (optionally) the camera's world pose.
///
/// Set both before handing the transform to concurrent readers; all queries
/// take `&self`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoordinateTransform {
    camera: Option<CameraModel>,
    pose: Option<CameraPose>,
}

impl CoordinateTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_calibration(calibration: &Calibration) -> Self {
        Self {
            camera: Some(calibration.camera.clone()),
            pose: calibration.pose,
        }
    }

    pub fn set_calibration(&mut self, camera: CameraModel) {
        self.camera = Some(camera);
    }

    /// Set the camera -> world pose.
    pub fn set_camera_pose(&mut self, pose: CameraPose) {
        self.pose = Some(pose);
    }

    pub fn clear_camera_pose(&mut self) {
        self.pose = None;
    }

    pub fn is_calibrated(&self) -> bool {
        self.camera.is_some()
    }

    pub fn has_pose(&self) -> bool {
        self.pose.is_some()
    }

    pub fn camera(&self) -> Option<&CameraModel> {
        self.camera.as_ref()
    }

    pub fn camera_pose(&self) -> Option<&CameraPose> {
        self.pose.as_ref()
    }

    fn require_camera(&self) -> Result<&CameraModel, ProjectionError> {
        self.camera.as_ref().ok_or_else(|| {
            debug!("coordinate transform used without calibration");
            ProjectionError::NotCalibrated
        })
    }

    fn require_pose(&self) -> Result<&CameraPose, ProjectionError> {
        self.pose.as_ref().ok_or_else(|| {
            debug!("coordinate transform used without camera pose");
            ProjectionError::NoPose
        })
    }

    fn require_both(&self) -> Result<(&CameraModel, &CameraPose), ProjectionError> {
        Ok((self.require_camera()?, self.require_pose()?))
    }

    /// Camera center in world coordinates.
    pub fn camera_position(&self) -> Result<Point3<f64>, ProjectionError> {
        Ok(self.require_pose()?.origin())
    }

    /// Unit viewing direction of `pixel` in the camera frame. Needs only the
    /// calibration.
    pub fn camera_ray_direction(&self, pixel: Point2<f64>) -> Result<Vector3<f64>, ProjectionError> {
        let camera = self.require_camera()?;
        let n = camera.undistort_pixel(pixel);
        Ok(Vector3::new(n.x, n.y, 1.0).normalize())
    }

    /// Unit viewing direction of `pixel` in the world frame.
    pub fn ray_direction(&self, pixel: Point2<f64>) -> Result<Vector3<f64>, ProjectionError> {
        let (_, pose) = self.require_both()?;
        let dir = self.camera_ray_direction(pixel)?;
        Ok(pose.transform_vector(&dir).normalize())
    }

    /// World-frame ray from the camera center through `pixel`.
    pub fn ray(&self, pixel: Point2<f64>) -> Result<Ray, ProjectionError> {
        let (_, pose) = self.require_both()?;
        Ok(Ray {
            origin: pose.origin(),
            direction: self.ray_direction(pixel)?,
        })
    }

    /// Where the viewing ray of `pixel` meets the horizontal plane
    /// `z = z_plane`.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn image_to_world(
        &self,
        pixel: Point2<f64>,
        z_plane: f64,
    ) -> Result<Point3<f64>, ProjectionError> {
        let mut hit = self.image_to_plane(pixel, &Plane::horizontal(z_plane))?;
        hit.z = z_plane;
        Ok(hit)
    }

    /// Where the viewing ray of `pixel` meets an arbitrary world plane.
    pub fn image_to_plane(
        &self,
        pixel: Point2<f64>,
        plane: &Plane,
    ) -> Result<Point3<f64>, ProjectionError> {
        let ray = self.ray(pixel)?;
        ray.intersect(plane).map_err(|miss| {
            debug!("pixel ({:.1}, {:.1}) does not reach plane: {miss:?}", pixel.x, pixel.y);
            ProjectionError::from(miss)
        })
    }

    /// World point to camera-frame point.
    pub fn world_to_camera(&self, point: &Point3<f64>) -> Result<Point3<f64>, ProjectionError> {
        Ok(self.require_pose()?.inverse().transform_point(point))
    }

    /// Ideal pinhole pixel of a world point. Lens distortion is *not*
    /// applied, so the result is in undistorted image coordinates; see
    /// [`world_to_distorted_image`](Self::world_to_distorted_image).
    pub fn world_to_image(&self, point: &Point3<f64>) -> Result<Point2<f64>, ProjectionError> {
        let camera = self.require_camera()?;
        let pc = self.world_to_camera(point)?;
        if pc.z <= MIN_DEPTH {
            return Err(ProjectionError::BehindCamera);
        }
        camera
            .project_undistorted(&pc)
            .ok_or(ProjectionError::BehindCamera)
    }

    /// Pixel of a world point as the real (distorting) lens images it.
    pub fn world_to_distorted_image(
        &self,
        point: &Point3<f64>,
    ) -> Result<Point2<f64>, ProjectionError> {
        let camera = self.require_camera()?;
        let pc = self.world_to_camera(point)?;
        if pc.z <= MIN_DEPTH {
            return Err(ProjectionError::BehindCamera);
        }
        camera.project(&pc).ok_or(ProjectionError::BehindCamera)
    }
}

//! Square-marker pose from four corners.
//!
//! The marker frame has its origin at the marker center, x to the right,
//! y down and z pointing into the marker, so a marker seen head-on yields
//! an identity rotation. Corners are matched to object points in the order
//! TL, TR, BR, BL:
//!
//! ```text
//! (-s/2, -s/2, 0)  ( s/2, -s/2, 0)
//! (-s/2,  s/2, 0)  ( s/2,  s/2, 0)
//! ```
//!
//! The solve runs in two stages: a linear initialization from the
//! marker-plane homography, then Levenberg-Marquardt on the reprojection
//! error over all six degrees of freedom.

use fiducial_core::{
    homography_from_4pt, is_rotation_matrix, CameraModel, CameraPose, RigidTransform,
};
use log::debug;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, SMatrix, SVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::DetectedMarkerObservation;

/// Relative cost decrease below which an exhausted solve still counts as
/// converged.
const STALLED_DECREASE: f64 = 1e-6;

type Jacobian = SMatrix<f64, 8, 6>;
type Residual = SVector<f64, 8>;

/// Tunables of the pose solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseEstimatorParams {
    /// Maximum Levenberg-Marquardt iterations.
    pub max_iterations: usize,
    /// Converged once the update norm is below this, scaled by
    /// `1 + |t|` so the test follows the translation magnitude.
    pub step_tolerance: f64,
    /// Converged once an accepted step lowers the squared error by less
    /// than this fraction of `1 + cost`.
    pub cost_tolerance: f64,
    /// Converged once `max |Jᵀr|` is below this fraction of `1 + cost`.
    pub gradient_tolerance: f64,
    /// Allowed Frobenius deviation of `R Rᵀ` from identity.
    pub orthonormality_tolerance: f64,
}

impl Default for PoseEstimatorParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            step_tolerance: 1e-10,
            cost_tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            orthonormality_tolerance: 1e-6,
        }
    }
}

/// Pose of one marker. Not mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    pub id: u32,
    /// Marker -> camera transform; `None` unless `valid`.
    pub marker_to_camera: Option<RigidTransform>,
    /// Marker center in world coordinates, present when a camera pose was
    /// supplied.
    pub world_position: Option<Point3<f64>>,
    /// Marker -> world transform, present alongside `world_position`.
    pub marker_to_world: Option<RigidTransform>,
    /// RMS reprojection error in pixels.
    pub reprojection_error: Option<f64>,
    pub valid: bool,
}

impl MarkerPose {
    /// Unsolved pose for marker `id`.
    pub fn invalid(id: u32) -> Self {
        Self {
            id,
            marker_to_camera: None,
            world_position: None,
            marker_to_world: None,
            reprojection_error: None,
            valid: false,
        }
    }

    pub fn rotation(&self) -> Option<&Rotation3<f64>> {
        self.marker_to_camera.as_ref().map(|p| &p.rotation)
    }

    pub fn translation(&self) -> Option<&Vector3<f64>> {
        self.marker_to_camera.as_ref().map(|p| &p.translation)
    }

    /// Distance from the camera center to the marker center, in meters.
    pub fn distance(&self) -> Option<f64> {
        self.translation().map(|t| t.norm())
    }

    /// Compose with a camera -> world pose:
    /// `world_position = R_cam * t_marker + t_cam`.
    ///
    /// Invalid poses are returned unchanged.
    pub fn in_world(mut self, camera_pose: &CameraPose) -> Self {
        if let Some(m2c) = self.marker_to_camera {
            let m2w = camera_pose.compose(&m2c);
            self.world_position = Some(m2w.origin());
            self.marker_to_world = Some(m2w);
        }
        self
    }
}

/// Solves the marker pose for a calibrated camera.
#[derive(Clone, Debug, Default)]
pub struct MarkerPoseEstimator {
    params: PoseEstimatorParams,
}

impl MarkerPoseEstimator {
    pub fn new(params: PoseEstimatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PoseEstimatorParams {
        &self.params
    }

    /// Marker corners in the marker frame, canonical order.
    pub fn object_points(tag_size_m: f64) -> [Point3<f64>; 4] {
        let h = tag_size_m * 0.5;
        [
            Point3::new(-h, -h, 0.0),
            Point3::new(h, -h, 0.0),
            Point3::new(h, h, 0.0),
            Point3::new(-h, h, 0.0),
        ]
    }

    /// Marker -> camera pose. Never fails: degenerate input, a solve that
    /// does not converge, or a solution that shows the back of the marker
    /// all come back with `valid == false`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(id = observation.id))
    )]
    pub fn estimate(
        &self,
        observation: &DetectedMarkerObservation,
        camera: &CameraModel,
        tag_size_m: f64,
    ) -> MarkerPose {
        let id = observation.id;
        if !(tag_size_m.is_finite() && tag_size_m > 0.0) {
            debug!("marker {id}: invalid tag size {tag_size_m}");
            return MarkerPose::invalid(id);
        }
        if !observation.is_finite() {
            debug!("marker {id}: non-finite corners");
            return MarkerPose::invalid(id);
        }

        let object = Self::object_points(tag_size_m);
        let image: [Vector2<f64>; 4] = observation.corners.map(|c| camera.undistort_pixel(c));
        let focal = Vector2::new(camera.intrinsics().fx, camera.intrinsics().fy);

        let Some(initial) = initial_pose(&object, &image) else {
            debug!("marker {id}: homography decomposition failed");
            return MarkerPose::invalid(id);
        };

        let Some((pose, cost)) = self.refine(initial, &object, &image, &focal) else {
            debug!("marker {id}: pose refinement did not converge");
            return MarkerPose::invalid(id);
        };

        if !self.is_plausible(&pose) {
            debug!("marker {id}: rejected implausible pose (t={:?})", pose.translation);
            return MarkerPose::invalid(id);
        }

        MarkerPose {
            id,
            marker_to_camera: Some(pose),
            world_position: None,
            marker_to_world: None,
            reprojection_error: Some((cost / 4.0).sqrt()),
            valid: true,
        }
    }

    /// [`estimate`](Self::estimate), then compose with `camera_pose` when one
    /// is known.
    pub fn estimate_in_world(
        &self,
        observation: &DetectedMarkerObservation,
        camera: &CameraModel,
        tag_size_m: f64,
        camera_pose: Option<&CameraPose>,
    ) -> MarkerPose {
        let pose = self.estimate(observation, camera, tag_size_m);
        match camera_pose {
            Some(cp) => pose.in_world(cp),
            None => pose,
        }
    }

    fn is_plausible(&self, pose: &RigidTransform) -> bool {
        if !pose.translation.iter().all(|v| v.is_finite()) {
            return false;
        }
        if !is_rotation_matrix(pose.rotation.matrix(), self.params.orthonormality_tolerance) {
            return false;
        }
        if pose.translation.z <= 0.0 {
            return false;
        }
        // marker z points into the marker, i.e. away from a camera seeing its face
        let normal = pose.rotation * Vector3::z();
        normal.dot(&pose.translation) > 0.0
    }

    /// Levenberg-Marquardt on the reprojection error in pixels. Returns the
    /// refined pose and its final squared-error sum.
    ///
    /// Stops as soon as any relative tolerance in [`PoseEstimatorParams`] is
    /// met. When the iteration budget runs out the pose is kept if the cost
    /// had stopped moving.
    fn refine(
        &self,
        mut pose: RigidTransform,
        object: &[Point3<f64>; 4],
        image: &[Vector2<f64>; 4],
        focal: &Vector2<f64>,
    ) -> Option<(RigidTransform, f64)> {
        let p = &self.params;
        let mut lambda = 1e-3;
        let (mut jac, mut res) = linearize(&pose, object, image, focal)?;
        let mut cost = res.norm_squared();
        let mut last_decrease = f64::INFINITY;

        for _ in 0..p.max_iterations {
            let jtj = jac.transpose() * jac;
            let jtr = jac.transpose() * res;
            if jtr.amax() <= p.gradient_tolerance * (1.0 + cost) {
                return Some((pose, cost));
            }

            let mut damped = jtj;
            for i in 0..6 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }
            let delta = damped.cholesky()?.solve(&(-jtr));
            let step = delta.norm();
            if !step.is_finite() {
                return None;
            }
            if step <= p.step_tolerance * (1.0 + pose.translation.norm()) {
                return Some((pose, cost));
            }

            let candidate = apply_update(&pose, &delta);
            match linearize(&candidate, object, image, focal) {
                Some((j, r)) if r.norm_squared() <= cost => {
                    let new_cost = r.norm_squared();
                    last_decrease = cost - new_cost;
                    pose = candidate;
                    jac = j;
                    res = r;
                    cost = new_cost;
                    if last_decrease <= p.cost_tolerance * (1.0 + cost) {
                        return Some((pose, cost));
                    }
                    lambda = (lambda * 0.1).max(1e-12);
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > 1e12 {
                        return None;
                    }
                }
            }
        }

        if last_decrease <= STALLED_DECREASE * (1.0 + cost) {
            debug!("pose refinement hit the iteration limit at a stationary cost {cost:.3e}");
            return Some((pose, cost));
        }
        None
    }
}

/// Linear pose from the homography between the marker plane and the
/// normalized image plane: `H ~ [r1 r2 t]`.
fn initial_pose(object: &[Point3<f64>; 4], image: &[Vector2<f64>; 4]) -> Option<RigidTransform> {
    let src = object.map(|p| Point2::new(p.x, p.y));
    let dst = image.map(Point2::from);
    let h = homography_from_4pt(&src, &dst)?.h;

    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let denom = 0.5 * (h1.norm() + h2.norm());
    if denom <= 1e-12 {
        return None;
    }
    let mut lambda = 1.0 / denom;
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t = h3 * lambda;
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    Some(RigidTransform::from_parts(r_orth, t))
}

/// Left-multiplicative rotation update, additive translation.
fn apply_update(pose: &RigidTransform, delta: &SVector<f64, 6>) -> RigidTransform {
    let omega = Vector3::new(delta[0], delta[1], delta[2]);
    let dt = Vector3::new(delta[3], delta[4], delta[5]);
    RigidTransform::new(
        Rotation3::new(omega) * pose.rotation,
        pose.translation + dt,
    )
}

/// Stacked residuals (projected - observed, in pixels) and their Jacobian
/// w.r.t. `[omega, t]`. `None` if a corner falls behind the camera.
fn linearize(
    pose: &RigidTransform,
    object: &[Point3<f64>; 4],
    image: &[Vector2<f64>; 4],
    focal: &Vector2<f64>,
) -> Option<(Jacobian, Residual)> {
    let mut jac = Jacobian::zeros();
    let mut res = Residual::zeros();

    for (k, (p, obs)) in object.iter().zip(image.iter()).enumerate() {
        let rp = pose.rotation * p.coords;
        let pc = rp + pose.translation;
        if pc.z <= 1e-9 {
            return None;
        }
        let inv_z = 1.0 / pc.z;
        let x = pc.x * inv_z;
        let y = pc.y * inv_z;

        res[2 * k] = focal.x * (x - obs.x);
        res[2 * k + 1] = focal.y * (y - obs.y);

        // d(pixel)/d(pc)
        let dproj = SMatrix::<f64, 2, 3>::new(
            focal.x * inv_z,
            0.0,
            -focal.x * x * inv_z,
            0.0,
            focal.y * inv_z,
            -focal.y * y * inv_z,
        );
        // d(pc)/d(omega) = -[R p]x, d(pc)/d(t) = I
        let d_omega = -rp.cross_matrix();
        let j_rot = dproj * d_omega;

        for c in 0..3 {
            jac[(2 * k, c)] = j_rot[(0, c)];
            jac[(2 * k + 1, c)] = j_rot[(1, c)];
            jac[(2 * k, 3 + c)] = dproj[(0, c)];
            jac[(2 * k + 1, 3 + c)] = dproj[(1, c)];
        }
    }

    Some((jac, res))
}

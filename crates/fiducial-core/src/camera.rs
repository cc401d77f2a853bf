//! Calibrated pinhole camera with OpenCV-ordered lens distortion.

use nalgebra::{Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

const UNDISTORT_MAX_ITERS: usize = 20;
const UNDISTORT_EPS: f64 = 1e-12;

/// Errors produced while building a [`CameraModel`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraModelError {
    #[error("focal lengths must be positive and finite (fx={fx}, fy={fy})")]
    InvalidFocalLength { fx: f64, fy: f64 },
    #[error("principal point must be finite (cx={cx}, cy={cy})")]
    InvalidPrincipalPoint { cx: f64, cy: f64 },
    #[error("unsupported distortion length {0} (expected 0, 4, 5 or 8)")]
    UnsupportedDistortion(usize),
    #[error("distortion coefficients must be finite")]
    NonFiniteDistortion,
}

/// Pinhole intrinsics in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Read fx, fy, cx, cy from a row-major 3x3 matrix. Skew is ignored.
    pub fn from_row_major(m: &[f64; 9]) -> Self {
        Self::new(m[0], m[4], m[2], m[5])
    }

    pub fn to_row_major(&self) -> [f64; 9] {
        [
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        ]
    }

    /// The 3x3 intrinsic matrix `K`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    fn validate(&self) -> Result<(), CameraModelError> {
        let focal_ok =
            self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0;
        if !focal_ok {
            return Err(CameraModelError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        if !(self.cx.is_finite() && self.cy.is_finite()) {
            return Err(CameraModelError::InvalidPrincipalPoint {
                cx: self.cx,
                cy: self.cy,
            });
        }
        Ok(())
    }
}

/// Image size in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Radial/tangential distortion in OpenCV order `k1 k2 p1 p2 [k3 [k4 k5 k6]]`.
///
/// The coefficient count is kept so the model serializes back to the same
/// length it was read with. An empty model is the identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Distortion {
    coeffs: [f64; 8],
    len: usize,
}

impl Distortion {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_coeffs(coeffs: &[f64]) -> Result<Self, CameraModelError> {
        if !matches!(coeffs.len(), 0 | 4 | 5 | 8) {
            return Err(CameraModelError::UnsupportedDistortion(coeffs.len()));
        }
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(CameraModelError::NonFiniteDistortion);
        }
        let mut out = [0.0; 8];
        out[..coeffs.len()].copy_from_slice(coeffs);
        Ok(Self {
            coeffs: out,
            len: coeffs.len(),
        })
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs[..self.len]
    }

    /// True when every coefficient is zero (or there are none).
    pub fn is_identity(&self) -> bool {
        self.coeffs().iter().all(|&c| c == 0.0)
    }

    /// Apply distortion to an ideal normalized point.
    pub fn distort(&self, p: Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return p;
        }
        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.coeffs;
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        Vector2::new(xd, yd)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, pd: Vector2<f64>) -> Vector2<f64> {
        if self.is_identity() {
            return pd;
        }
        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.coeffs;
        let (x0, y0) = (pd.x, pd.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_MAX_ITERS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let icdist =
                (1.0 + k4 * r2 + k5 * r4 + k6 * r6) / (1.0 + k1 * r2 + k2 * r4 + k3 * r6);
            if !icdist.is_finite() || icdist <= 0.0 {
                break;
            }
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            let nx = (x0 - dx) * icdist;
            let ny = (y0 - dy) * icdist;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < UNDISTORT_EPS {
                break;
            }
        }
        Vector2::new(x, y)
    }
}

impl TryFrom<Vec<f64>> for Distortion {
    type Error = CameraModelError;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        Self::from_coeffs(&value)
    }
}

impl From<Distortion> for Vec<f64> {
    fn from(value: Distortion) -> Self {
        value.coeffs().to_vec()
    }
}

/// Immutable calibrated camera description.
///
/// Only serializable; build it through [`CameraModel::new`] (or a
/// calibration document) so the focal-length invariant holds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CameraModel {
    intrinsics: Intrinsics,
    distortion: Distortion,
    image_size: ImageSize,
}

impl CameraModel {
    pub fn new(
        intrinsics: Intrinsics,
        distortion: Distortion,
        image_size: ImageSize,
    ) -> Result<Self, CameraModelError> {
        intrinsics.validate()?;
        Ok(Self {
            intrinsics,
            distortion,
            image_size,
        })
    }

    /// Ideal pinhole camera without distortion.
    pub fn pinhole(intrinsics: Intrinsics, image_size: ImageSize) -> Result<Self, CameraModelError> {
        Self::new(intrinsics, Distortion::none(), image_size)
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    pub fn image_size(&self) -> ImageSize {
        self.image_size
    }

    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.matrix()
    }

    /// Apply `K^{-1}` to a pixel, without touching distortion.
    pub fn pixel_to_normalized(&self, pixel: Point2<f64>) -> Vector2<f64> {
        let k = &self.intrinsics;
        Vector2::new((pixel.x - k.cx) / k.fx, (pixel.y - k.cy) / k.fy)
    }

    /// Apply `K` to a normalized point, without touching distortion.
    pub fn normalized_to_pixel(&self, n: Vector2<f64>) -> Point2<f64> {
        let k = &self.intrinsics;
        Point2::new(k.fx * n.x + k.cx, k.fy * n.y + k.cy)
    }

    /// Distorted pixel -> ideal normalized coordinates on the `z = 1` plane.
    pub fn undistort_pixel(&self, pixel: Point2<f64>) -> Vector2<f64> {
        self.distortion.undistort(self.pixel_to_normalized(pixel))
    }

    /// Ideal normalized coordinates -> distorted pixel.
    pub fn distort_normalized(&self, n: Vector2<f64>) -> Point2<f64> {
        self.normalized_to_pixel(self.distortion.distort(n))
    }

    /// Project a camera-frame point to a (distorted) pixel.
    ///
    /// Returns `None` for points at or behind the camera center.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        let n = normalize_camera_point(p)?;
        Some(self.distort_normalized(n))
    }

    /// Project a camera-frame point with intrinsics only.
    pub fn project_undistorted(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        let n = normalize_camera_point(p)?;
        Some(self.normalized_to_pixel(n))
    }
}

fn normalize_camera_point(p: &Point3<f64>) -> Option<Vector2<f64>> {
    if p.z <= f64::EPSILON {
        return None;
    }
    Some(Vector2::new(p.x / p.z, p.y / p.z))
}

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Below this `|d·n|` a ray is treated as parallel to a plane.
pub const PARALLEL_EPS: f64 = 1e-6;

/// Why a ray failed to hit a plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneMiss {
    Parallel,
    Behind,
}

/// Half-line `origin + t * direction`, `t >= 0`, with a unit direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    /// Normalizes `direction`; `None` for a zero or non-finite direction.
    pub fn new(origin: Point3<f64>, direction: Vector3<f64>) -> Option<Self> {
        let norm = direction.norm();
        if !norm.is_finite() || norm <= f64::EPSILON {
            return None;
        }
        Some(Self {
            origin,
            direction: direction / norm,
        })
    }

    pub fn at(&self, t: f64) -> Point3<f64> {
        self.origin + self.direction * t
    }

    pub fn intersect(&self, plane: &Plane) -> Result<Point3<f64>, PlaneMiss> {
        let t = plane_parameter(&self.origin, &self.direction, plane)?;
        Ok(self.at(t))
    }
}

/// Plane through `point` with normal `normal`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vector3<f64>,
    pub point: Point3<f64>,
}

impl Plane {
    pub fn new(normal: Vector3<f64>, point: Point3<f64>) -> Self {
        Self { normal, point }
    }

    /// The horizontal plane `z = z`.
    pub fn horizontal(z: f64) -> Self {
        Self::new(Vector3::z(), Point3::new(0.0, 0.0, z))
    }
}

/// Ray parameter of the hit, `t = ((p0 - o)·n) / (d·n)`.
fn plane_parameter(
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
    plane: &Plane,
) -> Result<f64, PlaneMiss> {
    let denom = direction.dot(&plane.normal);
    if !denom.is_finite() || denom.abs() < PARALLEL_EPS {
        return Err(PlaneMiss::Parallel);
    }
    let t = (plane.point - origin).dot(&plane.normal) / denom;
    if t < 0.0 {
        return Err(PlaneMiss::Behind);
    }
    Ok(t)
}

/// Intersect the ray `origin + t * direction` (`t >= 0`) with a plane.
///
/// `None` when the ray is parallel to the plane (`|d·n| < 1e-6`) or the
/// plane lies behind the origin. `direction` is used as given, not
/// normalized.
pub fn intersect_ray_plane(
    origin: &Point3<f64>,
    direction: &Vector3<f64>,
    plane_normal: &Vector3<f64>,
    plane_point: &Point3<f64>,
) -> Option<Point3<f64>> {
    let plane = Plane::new(*plane_normal, *plane_point);
    let t = plane_parameter(origin, direction, &plane).ok()?;
    Some(origin + direction * t)
}

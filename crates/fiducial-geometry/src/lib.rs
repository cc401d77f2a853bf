//! Ray geometry and image <-> world mapping for a calibrated, posed camera.
//!
//! [`CoordinateTransform`] answers "where does this pixel meet the floor" and
//! "where does this world point appear in the image". Operations that need
//! state the transform does not have fail with a typed
//! [`ProjectionError`] instead of returning a sentinel point.

mod coordinate_transform;
mod ray;

pub use coordinate_transform::{CoordinateTransform, ProjectionError};
pub use ray::{intersect_ray_plane, Plane, PlaneMiss, Ray, PARALLEL_EPS};

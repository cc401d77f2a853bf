//! Fixed-rate perception loop for a robot camera.
//!
//! Each iteration pulls one frame from a [`FrameSource`], asks a
//! [`TagDetector`] for marker corners, solves every marker pose with
//! [`fiducial_pose::MarkerPoseEstimator`], runs an [`ObjectDetector`] and
//! places detected objects on the floor through
//! [`fiducial_geometry::CoordinateTransform`]. Results go to a
//! [`TelemetrySink`]; counters live in [`LoopMetrics`].
//!
//! Detectors and capture backends are traits: this crate ships no vision
//! library bindings.

mod capability;
mod config;
mod error;
mod metrics;
mod pacing;
mod perception_loop;
mod telemetry;

pub use capability::{
    BoundingBox, DetectedObject, Frame, FrameSource, ObjectDetector, TagDetector,
};
pub use config::{ObjectDetectorParams, PerceptionConfig, TagDetectorParams};
pub use error::{ConfigError, FrameSourceError, PerceptionError};
pub use metrics::{LoopMetrics, MetricsSnapshot, StatusReport};
pub use pacing::{sleep_budget, Pacer};
pub use perception_loop::{LoopResources, PerceptionLoop};
pub use telemetry::{
    JsonLinesSink, LogSink, MarkerReport, TelemetryEvent, TelemetryFanout, TelemetrySink,
};

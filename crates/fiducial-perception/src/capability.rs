//! Seams to the outside world: frame capture, tag corner detection and
//! object detection. Implementations are moved onto the loop thread, hence
//! the `Send` bounds.

use fiducial_core::{CameraModel, GrayImage};
use fiducial_pose::DetectedMarkerObservation;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::{FrameSourceError, ObjectDetectorParams, TagDetectorParams};

/// One captured grayscale frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    /// Sequence number assigned by the source.
    pub index: u64,
    pub image: GrayImage,
}

impl Frame {
    pub fn new(index: u64, image: GrayImage) -> Self {
        Self { index, image }
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), FrameSourceError>;

    /// Next frame, or `None` if none could be acquired right now.
    fn read(&mut self) -> Option<Frame>;

    fn release(&mut self);

    /// True once a finite source has handed out its last frame, so that
    /// further reads return `None` for good.
    fn is_exhausted(&self) -> bool {
        false
    }

    fn name(&self) -> String {
        "frame source".to_string()
    }
}

/// External square-marker corner detector.
pub trait TagDetector: Send {
    /// Receives the detector parameters once at startup, unmodified.
    fn configure(&mut self, _params: &TagDetectorParams) {}

    /// Corner observations for `frame`. `camera` is the current calibration,
    /// if any.
    fn detect(
        &mut self,
        frame: &Frame,
        camera: Option<&CameraModel>,
    ) -> Vec<DetectedMarkerObservation>;
}

/// Axis-aligned box in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x + 0.5 * self.width, self.y + 0.5 * self.height)
    }

    /// Middle of the bottom edge, where an object standing on the floor
    /// touches it.
    pub fn bottom_center(&self) -> Point2<f64> {
        Point2::new(self.x + 0.5 * self.width, self.y + self.height)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub object_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub center: Point2<f64>,
    /// Floor contact point, filled in by the loop when the camera is posed.
    #[serde(default)]
    pub world_position: Option<Point3<f64>>,
    #[serde(default)]
    pub distance_m: Option<f64>,
}

impl DetectedObject {
    pub fn new(object_id: u32, class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            object_id,
            class_name: class_name.into(),
            confidence,
            center: bbox.center(),
            bbox,
            world_position: None,
            distance_m: None,
        }
    }
}

/// External object detector.
pub trait ObjectDetector: Send {
    fn configure(&mut self, _params: &ObjectDetectorParams) {}

    /// `false` when the detector could not load its model; the loop still
    /// calls [`detect`](Self::detect).
    fn is_ready(&self) -> bool;

    fn detect(&mut self, frame: &Frame) -> Vec<DetectedObject>;
}

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// One square marker as reported by an external corner detector.
///
/// `corners` must follow the canonical order top-left, top-right,
/// bottom-right, bottom-left as seen on the printed marker (clockwise in an
/// image with the y axis pointing down).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedMarkerObservation {
    pub id: u32,
    pub corners: [Point2<f64>; 4],
    pub center: Point2<f64>,
    /// Detector confidence, >= 0.
    #[serde(default)]
    pub decision_margin: f64,
    /// Bits corrected while decoding the id.
    #[serde(default)]
    pub hamming: u32,
}

impl DetectedMarkerObservation {
    /// Observation with the center set to the corner centroid.
    pub fn from_corners(id: u32, corners: [Point2<f64>; 4]) -> Self {
        let sum = corners.iter().fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
        Self {
            id,
            corners,
            center: Point2::from(sum / 4.0),
            decision_margin: 0.0,
            hamming: 0,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.corners
            .iter()
            .chain(std::iter::once(&self.center))
            .all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

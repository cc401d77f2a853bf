use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Running totals of the perception loop.
///
/// Only the loop thread writes; any thread may read a [`snapshot`](Self::snapshot)
/// without locking. Counters only grow and survive stop/start.
#[derive(Debug, Default)]
pub struct LoopMetrics {
    frames_processed: AtomicU64,
    markers_detected: AtomicU64,
    objects_detected: AtomicU64,
    frame_index: AtomicU64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one acquired frame; returns the new frame index.
    pub(crate) fn record_frame(&self) -> u64 {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.frame_index.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_markers(&self, n: usize) {
        self.markers_detected.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_objects(&self, n: usize) {
        self.objects_detected.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            markers_detected: self.markers_detected.load(Ordering::Relaxed),
            objects_detected: self.objects_detected.load(Ordering::Relaxed),
            frame_index: self.frame_index.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames_processed: u64,
    pub markers_detected: u64,
    pub objects_detected: u64,
    pub frame_index: u64,
}

impl MetricsSnapshot {
    /// `frames_processed / (frame_index / target_fps)`; `None` before the
    /// first frame.
    pub fn average_fps(&self, target_fps: u32) -> Option<f64> {
        if self.frame_index == 0 {
            return None;
        }
        let nominal_secs = self.frame_index as f64 / f64::from(target_fps.max(1));
        Some(self.frames_processed as f64 / nominal_secs)
    }
}

/// Periodic loop summary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub average_fps: f64,
}

impl StatusReport {
    pub fn new(metrics: MetricsSnapshot, target_fps: u32) -> Self {
        Self {
            metrics,
            average_fps: metrics.average_fps(target_fps).unwrap_or(0.0),
        }
    }
}

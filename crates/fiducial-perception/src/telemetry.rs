//! Per-frame results leaving the loop.

use std::io::Write;

use fiducial_pose::{DetectedMarkerObservation, MarkerPose};
use log::{info, warn};
use nalgebra::Point3;
use serde::Serialize;

use crate::{DetectedObject, StatusReport};

/// A detected marker together with its solved pose.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkerReport {
    pub observation: DetectedMarkerObservation,
    pub pose: MarkerPose,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Markers { frame: u64, markers: Vec<MarkerReport> },
    Objects { frame: u64, objects: Vec<DetectedObject> },
    Status(StatusReport),
}

pub trait TelemetrySink: Send {
    fn publish(&mut self, event: &TelemetryEvent);
}

/// Writes a readable summary of every event to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::Markers { frame, markers } => {
                info!("frame {frame}: {} marker(s)", markers.len());
                for m in markers {
                    let c = m.observation.center;
                    match m.pose.world_position.or(m.pose.translation().map(|t| Point3::from(*t))) {
                        Some(p) if m.pose.valid => info!(
                            "  marker {} at ({:.1}, {:.1}) -> ({:.3}, {:.3}, {:.3}) m",
                            m.observation.id, c.x, c.y, p.x, p.y, p.z
                        ),
                        _ => info!("  marker {} at ({:.1}, {:.1}), no pose", m.observation.id, c.x, c.y),
                    }
                }
            }
            TelemetryEvent::Objects { frame, objects } => {
                info!("frame {frame}: {} object(s)", objects.len());
                for o in objects {
                    match o.distance_m {
                        Some(d) => info!(
                            "  {} ({:.2}) at ({:.1}, {:.1}), {d:.2} m away",
                            o.class_name, o.confidence, o.center.x, o.center.y
                        ),
                        None => info!(
                            "  {} ({:.2}) at ({:.1}, {:.1})",
                            o.class_name, o.confidence, o.center.x, o.center.y
                        ),
                    }
                }
            }
            TelemetryEvent::Status(s) => info!(
                "status: frames={} markers={} objects={} avg_fps={:.1}",
                s.metrics.frames_processed,
                s.metrics.markers_detected,
                s.metrics.objects_detected,
                s.average_fps
            ),
        }
    }
}

/// One JSON document per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn publish(&mut self, event: &TelemetryEvent) {
        let written = serde_json::to_writer(&mut self.out, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(self.out))
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            warn!("failed to write telemetry event: {e}");
        }
    }
}

/// Fans one event out to several sinks.
#[derive(Default)]
pub struct TelemetryFanout {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl TelemetryFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl TelemetrySink for TelemetryFanout {
    fn publish(&mut self, event: &TelemetryEvent) {
        for sink in &mut self.sinks {
            sink.publish(event);
        }
    }
}

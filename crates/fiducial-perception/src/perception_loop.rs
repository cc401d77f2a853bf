//! The fixed-rate perception loop.
//!
//! [`PerceptionLoop`] is either stopped or running. While running, one
//! background thread owns the frame source, the detectors and the telemetry
//! sink; the controlling thread only flips the shared `running` flag and
//! joins. Shutdown is cooperative: the flag is checked once per iteration,
//! so `stop` waits for the current frame to finish. Detector calls have no
//! timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use fiducial_core::{CalibrationProvider, CameraModel};
use fiducial_geometry::CoordinateTransform;
use fiducial_pose::{DetectedMarkerObservation, MarkerPose, MarkerPoseEstimator};
use log::{debug, error, info, warn};

use crate::{
    DetectedObject, Frame, FrameSource, LoopMetrics, MarkerReport, MetricsSnapshot, ObjectDetector,
    Pacer, PerceptionConfig, PerceptionError, StatusReport, TagDetector, TelemetryEvent,
    TelemetrySink,
};

/// Everything the loop thread owns while running. Handed back on stop.
pub struct LoopResources {
    pub frame_source: Box<dyn FrameSource>,
    pub tag_detector: Box<dyn TagDetector>,
    pub object_detector: Box<dyn ObjectDetector>,
    pub sink: Box<dyn TelemetrySink>,
}

impl LoopResources {
    pub fn new(
        frame_source: impl FrameSource + 'static,
        tag_detector: impl TagDetector + 'static,
        object_detector: impl ObjectDetector + 'static,
        sink: impl TelemetrySink + 'static,
    ) -> Self {
        Self {
            frame_source: Box::new(frame_source),
            tag_detector: Box::new(tag_detector),
            object_detector: Box::new(object_detector),
            sink: Box::new(sink),
        }
    }
}

pub struct PerceptionLoop {
    config: PerceptionConfig,
    calibration: Box<dyn CalibrationProvider>,
    transform: CoordinateTransform,
    metrics: Arc<LoopMetrics>,
    running: Arc<AtomicBool>,
    resources: Option<LoopResources>,
    worker: Option<JoinHandle<LoopResources>>,
}

impl PerceptionLoop {
    pub fn new(
        config: PerceptionConfig,
        resources: LoopResources,
        calibration: impl CalibrationProvider + 'static,
    ) -> Self {
        Self {
            config,
            calibration: Box::new(calibration),
            transform: CoordinateTransform::new(),
            metrics: Arc::new(LoopMetrics::new()),
            running: Arc::new(AtomicBool::new(false)),
            resources: Some(resources),
            worker: None,
        }
    }

    pub fn config(&self) -> &PerceptionConfig {
        &self.config
    }

    /// True while the loop thread is alive. A thread that died from a
    /// panic reports false even before `stop` reaps it.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared counters, readable while the loop runs.
    pub fn metrics_handle(&self) -> Arc<LoopMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Calibration and camera pose as of the last `start`.
    pub fn coordinate_transform(&self) -> &CoordinateTransform {
        &self.transform
    }

    /// Open the frame source, load calibration, configure the detectors and
    /// spawn the loop thread.
    ///
    /// On error the loop stays stopped.
    pub fn start(&mut self) -> Result<(), PerceptionError> {
        if self.worker.as_ref().is_some_and(|h| h.is_finished()) {
            // reap a thread that died on its own
            self.stop();
        }
        if self.worker.is_some() {
            warn!("perception loop already running");
            return Err(PerceptionError::AlreadyRunning);
        }
        let mut res = self.resources.take().ok_or(PerceptionError::ResourcesLost)?;

        info!("opening {} (camera {})", res.frame_source.name(), self.config.camera_index);
        if let Err(e) = res.frame_source.open() {
            error!("failed to open {}: {e}", res.frame_source.name());
            self.resources = Some(res);
            return Err(e.into());
        }

        self.transform = match self.calibration.load() {
            Ok(Some(calib)) => {
                info!(
                    "camera calibration loaded (reprojection error {:.3} px, pose {})",
                    calib.reprojection_error,
                    if calib.pose.is_some() { "known" } else { "unknown" }
                );
                CoordinateTransform::from_calibration(&calib)
            }
            Ok(None) => {
                warn!("no calibration available; marker poses and object localization disabled");
                CoordinateTransform::new()
            }
            Err(e) => {
                warn!("failed to load calibration: {e}; continuing uncalibrated");
                CoordinateTransform::new()
            }
        };

        res.tag_detector.configure(&self.config.tag_detector);
        res.object_detector.configure(&self.config.object_detector);
        if !res.object_detector.is_ready() {
            warn!("object detector not ready; object detection disabled");
        }

        let worker = Worker {
            config: self.config.clone(),
            transform: self.transform.clone(),
            estimator: MarkerPoseEstimator::new(self.config.pose.clone()),
            metrics: Arc::clone(&self.metrics),
            running: Arc::clone(&self.running),
        };

        self.running.store(true, Ordering::Release);
        // a failed spawn drops the resources along with the closure
        let spawned = thread::Builder::new()
            .name("perception-loop".to_string())
            .spawn(move || worker.run(res));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(
                    "perception loop started at {} fps, tag size {} m",
                    self.config.target_fps, self.config.tag_size_m
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                error!("failed to spawn perception thread: {e}");
                Err(PerceptionError::Spawn(e))
            }
        }
    }

    /// Signal the loop thread, wait for its current iteration to finish and
    /// release the frame source. No-op when stopped.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        info!("stopping perception loop");
        self.running.store(false, Ordering::Release);

        match handle.join() {
            Ok(mut res) => {
                res.frame_source.release();
                self.resources = Some(res);
                info!("perception loop stopped");
            }
            Err(_) => error!("perception loop thread panicked; resources lost"),
        }
    }
}

impl Drop for PerceptionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read-only state the loop thread needs besides its resources.
struct Worker {
    config: PerceptionConfig,
    transform: CoordinateTransform,
    estimator: MarkerPoseEstimator,
    metrics: Arc<LoopMetrics>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, mut res: LoopResources) -> LoopResources {
        let pacer = Pacer::new(self.config.target_period());
        let backoff = self.config.read_backoff();

        // reads that came back empty since the last frame
        let mut misses = 0u64;
        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();

            let Some(frame) = res.frame_source.read() else {
                let name = res.frame_source.name();
                if res.frame_source.is_exhausted() {
                    if misses == 0 {
                        info!("end of frames from {name}; idling until stopped");
                    }
                } else if misses == 0 {
                    warn!("failed to read frame from {name}");
                } else {
                    debug!("failed to read frame from {name} ({} in a row)", misses + 1);
                }
                misses += 1;
                thread::sleep(backoff);
                continue;
            };
            misses = 0;

            self.process(&frame, &mut res);
            pacer.wait(started);
        }
        debug!("perception loop thread exiting");
        res
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(frame = frame.index))
    )]
    fn process(&self, frame: &Frame, res: &mut LoopResources) {
        let frame_index = self.metrics.record_frame();
        let camera = self.transform.camera();

        let observations = res.tag_detector.detect(frame, camera);
        self.metrics.record_markers(observations.len());
        if !observations.is_empty() {
            let markers = observations
                .into_iter()
                .map(|observation| MarkerReport {
                    pose: self.solve(&observation, camera),
                    observation,
                })
                .collect();
            res.sink.publish(&TelemetryEvent::Markers {
                frame: frame.index,
                markers,
            });
        }

        let mut objects = res.object_detector.detect(frame);
        self.metrics.record_objects(objects.len());
        if !objects.is_empty() {
            if self.config.localize_objects {
                for obj in &mut objects {
                    self.localize(obj);
                }
            }
            res.sink.publish(&TelemetryEvent::Objects {
                frame: frame.index,
                objects,
            });
        }

        let every = self.config.status_every;
        if every > 0 && frame_index % every == 0 {
            res.sink.publish(&TelemetryEvent::Status(StatusReport::new(
                self.metrics.snapshot(),
                self.config.target_fps,
            )));
        }
    }

    fn solve(
        &self,
        observation: &DetectedMarkerObservation,
        camera: Option<&CameraModel>,
    ) -> MarkerPose {
        match camera {
            Some(camera) => self.estimator.estimate_in_world(
                observation,
                camera,
                self.config.tag_size_m,
                self.transform.camera_pose(),
            ),
            None => MarkerPose::invalid(observation.id),
        }
    }

    /// Floor position of the object's bottom-center and its distance from
    /// the camera. Left empty when the camera is not posed.
    fn localize(&self, obj: &mut DetectedObject) {
        if !(self.transform.is_calibrated() && self.transform.has_pose()) {
            return;
        }
        let foot = obj.bbox.bottom_center();
        match (
            self.transform.image_to_world(foot, 0.0),
            self.transform.camera_position(),
        ) {
            (Ok(world), Ok(cam)) => {
                obj.distance_m = Some((world - cam).norm());
                obj.world_position = Some(world);
            }
            (Err(e), _) | (_, Err(e)) => {
                debug!("object {} not localized: {e}", obj.object_id);
            }
        }
    }
}

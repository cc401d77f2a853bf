use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use fiducial_core::{
    Calibration, CameraModel, CameraPose, GrayImage, ImageSize, Intrinsics,
    StaticCalibrationProvider,
};
use fiducial_perception::{
    BoundingBox, DetectedObject, Frame, FrameSource, FrameSourceError, LoopResources,
    ObjectDetector, PerceptionConfig, PerceptionError, PerceptionLoop, TagDetector,
    TagDetectorParams, TelemetryEvent, TelemetrySink,
};
use fiducial_pose::DetectedMarkerObservation;
use nalgebra::{Matrix3, Point2, Point3, Vector3};

#[derive(Clone, Default)]
struct Recorder {
    reads: Arc<Mutex<Vec<Instant>>>,
    released: Arc<AtomicBool>,
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
    tag_params: Arc<Mutex<Option<TagDetectorParams>>>,
}

impl Recorder {
    fn read_intervals(&self) -> Vec<Duration> {
        let reads = self.reads.lock().expect("lock");
        reads.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().expect("lock").clone()
    }
}

struct SyntheticSource {
    recorder: Recorder,
    next: u64,
    fail_open: bool,
    fail_reads: bool,
    // frames to hand out before running dry, unbounded when `None`
    limit: Option<u64>,
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), FrameSourceError> {
        if self.fail_open {
            return Err(FrameSourceError::Unavailable {
                name: "synthetic".to_string(),
                reason: "no device".to_string(),
            });
        }
        self.recorder.released.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        if self.fail_reads || self.is_exhausted() {
            return None;
        }
        self.recorder.reads.lock().expect("lock").push(Instant::now());
        self.next += 1;
        Some(Frame::new(self.next, GrayImage::new(8, 6)))
    }

    fn release(&mut self) {
        self.recorder.released.store(true, Ordering::SeqCst);
    }

    fn is_exhausted(&self) -> bool {
        self.limit.is_some_and(|n| self.next >= n)
    }
}

/// Reports one fronto-parallel marker per frame after `work` of fake
/// processing.
struct SquareTagDetector {
    recorder: Recorder,
    work: Duration,
}

impl TagDetector for SquareTagDetector {
    fn configure(&mut self, params: &TagDetectorParams) {
        *self.recorder.tag_params.lock().expect("lock") = Some(params.clone());
    }

    fn detect(
        &mut self,
        _frame: &Frame,
        _camera: Option<&CameraModel>,
    ) -> Vec<DetectedMarkerObservation> {
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        vec![DetectedMarkerObservation::from_corners(
            7,
            [
                Point2::new(280.0, 200.0),
                Point2::new(360.0, 200.0),
                Point2::new(360.0, 280.0),
                Point2::new(280.0, 280.0),
            ],
        )]
    }
}

struct OneObject;

impl ObjectDetector for OneObject {
    fn is_ready(&self) -> bool {
        true
    }

    fn detect(&mut self, _frame: &Frame) -> Vec<DetectedObject> {
        // bottom edge centered 50 px below the principal point
        vec![DetectedObject::new(
            1,
            "box",
            0.8,
            BoundingBox::new(300.0, 250.0, 40.0, 40.0),
        )]
    }
}

struct CollectingSink(Arc<Mutex<Vec<TelemetryEvent>>>);

impl TelemetrySink for CollectingSink {
    fn publish(&mut self, event: &TelemetryEvent) {
        self.0.lock().expect("lock").push(event.clone());
    }
}

fn resources(recorder: &Recorder, work: Duration) -> LoopResources {
    LoopResources::new(
        SyntheticSource {
            recorder: recorder.clone(),
            next: 0,
            fail_open: false,
            fail_reads: false,
            limit: None,
        },
        SquareTagDetector {
            recorder: recorder.clone(),
            work,
        },
        OneObject,
        CollectingSink(Arc::clone(&recorder.events)),
    )
}

fn fast_config() -> PerceptionConfig {
    PerceptionConfig {
        target_fps: 200,
        tag_size_m: 0.1,
        status_every: 5,
        read_backoff_ms: 5,
        ..PerceptionConfig::default()
    }
}

/// f = 500 camera, 1 m above the floor, looking along world +x.
fn posed_calibration() -> Calibration {
    let camera = CameraModel::pinhole(
        Intrinsics::new(500.0, 500.0, 320.0, 240.0),
        ImageSize::new(640, 480),
    )
    .expect("camera");
    let pose = CameraPose::from_parts(
        Matrix3::from_columns(&[
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 0.0),
        ]),
        Vector3::new(0.0, 0.0, 1.0),
    );
    Calibration::new(camera).with_pose(pose)
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn run_for_reads(lp: &mut PerceptionLoop, recorder: &Recorder, n: usize) {
    lp.start().expect("start");
    assert!(wait_until(Duration::from_secs(10), || {
        recorder.reads.lock().expect("lock").len() >= n
    }));
    lp.stop();
}

#[test]
fn fast_iterations_are_paced_to_the_period() {
    let recorder = Recorder::default();
    let config = PerceptionConfig {
        target_fps: 30,
        ..fast_config()
    };
    let mut lp = PerceptionLoop::new(
        config,
        resources(&recorder, Duration::from_millis(10)),
        StaticCalibrationProvider(None),
    );
    run_for_reads(&mut lp, &recorder, 6);

    let intervals = recorder.read_intervals();
    assert!(intervals.len() >= 5);
    for dt in &intervals {
        assert!(*dt >= Duration::from_millis(32), "iteration too short: {dt:?}");
    }
    let mean = intervals.iter().sum::<Duration>() / intervals.len() as u32;
    assert!(mean < Duration::from_millis(80), "mean interval {mean:?}");
}

#[test]
fn overrunning_iterations_do_not_sleep_or_catch_up() {
    let recorder = Recorder::default();
    let config = PerceptionConfig {
        target_fps: 30,
        ..fast_config()
    };
    let mut lp = PerceptionLoop::new(
        config,
        resources(&recorder, Duration::from_millis(50)),
        StaticCalibrationProvider(None),
    );
    run_for_reads(&mut lp, &recorder, 5);

    let intervals = recorder.read_intervals();
    for dt in &intervals {
        assert!(*dt >= Duration::from_millis(50), "iteration too short: {dt:?}");
    }
    let mean = intervals.iter().sum::<Duration>() / intervals.len() as u32;
    // an iteration is the 50 ms body and nothing else
    assert!(mean < Duration::from_millis(90), "mean interval {mean:?}");
}

#[test]
fn counters_never_decrease_across_restarts() {
    let recorder = Recorder::default();
    let mut lp = PerceptionLoop::new(
        fast_config(),
        resources(&recorder, Duration::ZERO),
        StaticCalibrationProvider(None),
    );
    let metrics = lp.metrics_handle();

    lp.start().expect("start");
    let mut last = metrics.snapshot();
    for _ in 0..50 {
        thread::sleep(Duration::from_millis(1));
        let now = metrics.snapshot();
        assert!(now.frames_processed >= last.frames_processed);
        assert!(now.markers_detected >= last.markers_detected);
        assert!(now.objects_detected >= last.objects_detected);
        assert!(now.frame_index >= last.frame_index);
        last = now;
    }
    lp.stop();

    let after_first = lp.metrics();
    assert!(after_first.frames_processed > 0);
    assert_eq!(after_first.markers_detected, after_first.frames_processed);
    assert_eq!(after_first.objects_detected, after_first.frames_processed);

    lp.start().expect("restart");
    assert!(wait_until(Duration::from_secs(10), || {
        lp.metrics().frames_processed > after_first.frames_processed
    }));
    lp.stop();
    assert!(lp.metrics().frame_index > after_first.frame_index);
}

#[test]
fn start_and_stop_follow_the_state_machine() {
    let recorder = Recorder::default();
    let mut lp = PerceptionLoop::new(
        fast_config(),
        resources(&recorder, Duration::ZERO),
        StaticCalibrationProvider(None),
    );
    assert!(!lp.is_running());
    lp.stop();
    assert!(!lp.is_running());

    lp.start().expect("start");
    assert!(lp.is_running());
    assert!(matches!(lp.start(), Err(PerceptionError::AlreadyRunning)));
    assert!(lp.is_running());

    lp.stop();
    assert!(!lp.is_running());
    assert!(recorder.released.load(Ordering::SeqCst));
    lp.stop();

    let params = recorder.tag_params.lock().expect("lock").clone();
    assert_eq!(params, Some(TagDetectorParams::default()));
}

#[test]
fn open_failure_leaves_loop_stopped() {
    let recorder = Recorder::default();
    let mut res = resources(&recorder, Duration::ZERO);
    res.frame_source = Box::new(SyntheticSource {
        recorder: recorder.clone(),
        next: 0,
        fail_open: true,
        fail_reads: false,
        limit: None,
    });
    let mut lp = PerceptionLoop::new(fast_config(), res, StaticCalibrationProvider(None));

    assert!(matches!(lp.start(), Err(PerceptionError::FrameSource(_))));
    assert!(!lp.is_running());
    assert_eq!(lp.metrics().frames_processed, 0);
    // resources are kept, so a second attempt reports the same failure
    assert!(matches!(lp.start(), Err(PerceptionError::FrameSource(_))));
}

#[test]
fn failed_reads_back_off_without_counting() {
    let recorder = Recorder::default();
    let mut res = resources(&recorder, Duration::ZERO);
    res.frame_source = Box::new(SyntheticSource {
        recorder: recorder.clone(),
        next: 0,
        fail_open: false,
        fail_reads: true,
        limit: None,
    });
    let mut lp = PerceptionLoop::new(fast_config(), res, StaticCalibrationProvider(None));
    lp.start().expect("start");
    thread::sleep(Duration::from_millis(30));

    let stop_began = Instant::now();
    lp.stop();
    assert!(stop_began.elapsed() < Duration::from_secs(1));
    assert_eq!(lp.metrics().frames_processed, 0);
    assert!(recorder.events().is_empty());
}

#[test]
fn finite_source_idles_after_its_last_frame() {
    let recorder = Recorder::default();
    let mut res = resources(&recorder, Duration::ZERO);
    res.frame_source = Box::new(SyntheticSource {
        recorder: recorder.clone(),
        next: 0,
        fail_open: false,
        fail_reads: false,
        limit: Some(3),
    });
    let mut lp = PerceptionLoop::new(fast_config(), res, StaticCalibrationProvider(None));
    lp.start().expect("start");
    assert!(wait_until(Duration::from_secs(10), || {
        lp.metrics().frames_processed == 3
    }));
    // several backoff periods past the end
    thread::sleep(Duration::from_millis(40));

    assert!(lp.is_running());
    assert_eq!(lp.metrics().frames_processed, 3);
    lp.stop();
    assert!(!lp.is_running());
    assert!(recorder.released.load(Ordering::SeqCst));
}

/// Panics on the first frame it sees.
struct PanickingDetector;

impl TagDetector for PanickingDetector {
    fn detect(
        &mut self,
        _frame: &Frame,
        _camera: Option<&CameraModel>,
    ) -> Vec<DetectedMarkerObservation> {
        panic!("detector crashed");
    }
}

#[test]
fn panicked_worker_is_not_reported_as_running() {
    let recorder = Recorder::default();
    let mut res = resources(&recorder, Duration::ZERO);
    res.tag_detector = Box::new(PanickingDetector);
    let mut lp = PerceptionLoop::new(fast_config(), res, StaticCalibrationProvider(None));

    lp.start().expect("start");
    assert!(wait_until(Duration::from_secs(10), || !lp.is_running()));

    // the dead thread is reaped and its resources are gone with it
    assert!(matches!(lp.start(), Err(PerceptionError::ResourcesLost)));
    assert!(!lp.is_running());
    lp.stop();
    assert!(matches!(lp.start(), Err(PerceptionError::ResourcesLost)));
}

#[test]
fn status_is_published_every_n_frames() {
    let recorder = Recorder::default();
    let mut lp = PerceptionLoop::new(
        fast_config(),
        resources(&recorder, Duration::ZERO),
        StaticCalibrationProvider(None),
    );
    lp.start().expect("start");
    assert!(wait_until(Duration::from_secs(10), || lp.metrics().frame_index >= 12));
    lp.stop();

    let statuses: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            TelemetryEvent::Status(s) => Some(s),
            _ => None,
        })
        .collect();
    assert!(statuses.len() >= 2);
    for (i, s) in statuses.iter().enumerate() {
        assert_eq!(s.metrics.frame_index, 5 * (i as u64 + 1));
        assert_relative_eq!(s.average_fps, 200.0, epsilon = 1e-9);
    }
}

#[test]
fn uncalibrated_loop_reports_unposed_markers() {
    let recorder = Recorder::default();
    let mut lp = PerceptionLoop::new(
        fast_config(),
        resources(&recorder, Duration::ZERO),
        StaticCalibrationProvider(None),
    );
    run_for_reads(&mut lp, &recorder, 2);
    assert!(!lp.coordinate_transform().is_calibrated());

    let events = recorder.events();
    let markers = events
        .iter()
        .find_map(|e| match e {
            TelemetryEvent::Markers { markers, .. } => Some(markers),
            _ => None,
        })
        .expect("marker event");
    assert_eq!(markers[0].observation.id, 7);
    assert!(!markers[0].pose.valid);

    let objects = events
        .iter()
        .find_map(|e| match e {
            TelemetryEvent::Objects { objects, .. } => Some(objects),
            _ => None,
        })
        .expect("object event");
    assert!(objects[0].world_position.is_none());
}

#[test]
fn calibrated_loop_poses_markers_and_places_objects() {
    let recorder = Recorder::default();
    let mut lp = PerceptionLoop::new(
        fast_config(),
        resources(&recorder, Duration::ZERO),
        StaticCalibrationProvider(Some(posed_calibration())),
    );
    run_for_reads(&mut lp, &recorder, 2);
    assert!(lp.coordinate_transform().has_pose());

    let events = recorder.events();
    let marker = events
        .iter()
        .find_map(|e| match e {
            TelemetryEvent::Markers { markers, .. } => markers.first(),
            _ => None,
        })
        .expect("marker event");
    assert!(marker.pose.valid);
    // 80 px wide 0.1 m tag at f = 500 sits 0.625 m in front of the camera
    assert_relative_eq!(
        *marker.pose.translation().expect("translation"),
        Vector3::new(0.0, 0.0, 0.625),
        epsilon = 1e-9
    );
    assert_relative_eq!(
        marker.pose.world_position.expect("world"),
        Point3::new(0.625, 0.0, 1.0),
        epsilon = 1e-9
    );

    let object = events
        .iter()
        .find_map(|e| match e {
            TelemetryEvent::Objects { objects, .. } => objects.first(),
            _ => None,
        })
        .expect("object event");
    assert_relative_eq!(
        object.world_position.expect("on floor"),
        Point3::new(10.0, 0.0, 0.0),
        epsilon = 1e-9
    );
    assert_relative_eq!(
        object.distance_m.expect("distance"),
        101.0_f64.sqrt(),
        epsilon = 1e-9
    );
}

#[test]
fn localization_can_be_disabled() {
    let recorder = Recorder::default();
    let config = PerceptionConfig {
        localize_objects: false,
        ..fast_config()
    };
    let mut lp = PerceptionLoop::new(
        config,
        resources(&recorder, Duration::ZERO),
        StaticCalibrationProvider(Some(posed_calibration())),
    );
    run_for_reads(&mut lp, &recorder, 2);

    let located = recorder.events().iter().any(|e| match e {
        TelemetryEvent::Objects { objects, .. } => objects.iter().any(|o| o.distance_m.is_some()),
        _ => false,
    });
    assert!(!located);
}

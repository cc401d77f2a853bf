use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fiducial_core::{CameraModel, Distortion, ImageSize, Intrinsics, RigidTransform};
use fiducial_pose::{DetectedMarkerObservation, MarkerPoseEstimator};
use nalgebra::{Rotation3, Vector3};

fn observation(camera: &CameraModel, pose: &RigidTransform, size: f64) -> DetectedMarkerObservation {
    let corners = MarkerPoseEstimator::object_points(size).map(|p| {
        camera
            .project(&pose.transform_point(&p))
            .expect("marker in front of camera")
    });
    DetectedMarkerObservation::from_corners(0, corners)
}

fn bench_estimate(c: &mut Criterion) {
    let pinhole = CameraModel::pinhole(
        Intrinsics::new(900.0, 900.0, 640.0, 360.0),
        ImageSize::new(1280, 720),
    )
    .expect("camera");
    let distorted = CameraModel::new(
        Intrinsics::new(900.0, 900.0, 640.0, 360.0),
        Distortion::from_coeffs(&[-0.25, 0.08, 0.001, -0.0005, -0.01]).expect("distortion"),
        ImageSize::new(1280, 720),
    )
    .expect("camera");

    let pose = RigidTransform::new(
        Rotation3::from_euler_angles(0.35, -0.2, 0.6),
        Vector3::new(0.08, -0.05, 0.9),
    );
    let estimator = MarkerPoseEstimator::default();

    let obs = observation(&pinhole, &pose, 0.05);
    c.bench_function("estimate_pinhole", |b| {
        b.iter(|| estimator.estimate(black_box(&obs), &pinhole, 0.05))
    });

    let obs = observation(&distorted, &pose, 0.05);
    c.bench_function("estimate_distorted", |b| {
        b.iter(|| estimator.estimate(black_box(&obs), &distorted, 0.05))
    });
}

criterion_group!(benches, bench_estimate);
criterion_main!(benches);

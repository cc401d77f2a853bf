use approx::assert_relative_eq;
use fiducial_core::{
    Calibration, CameraModel, CameraPose, Distortion, ImageSize, Intrinsics,
};
use fiducial_geometry::{CoordinateTransform, Plane, ProjectionError};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};

fn pinhole() -> CameraModel {
    CameraModel::pinhole(
        Intrinsics::new(500.0, 500.0, 320.0, 240.0),
        ImageSize::new(640, 480),
    )
    .expect("camera")
}

/// Camera 1 m above the floor looking along world +x; image x goes to -y,
/// image y goes down.
fn horizontal_pose() -> CameraPose {
    CameraPose::from_parts(
        Matrix3::from_columns(&[
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(1.0, 0.0, 0.0),
        ]),
        Vector3::new(0.0, 0.0, 1.0),
    )
}

/// Camera 1.5 m up, pitched down ~35 degrees and yawed a little.
fn oblique_pose() -> CameraPose {
    let look_down = Rotation3::from_euler_angles(-std::f64::consts::FRAC_PI_2 - 0.6, 0.0, 0.0);
    let yaw = Rotation3::from_euler_angles(0.0, 0.0, 0.3);
    CameraPose::new(yaw * look_down, Vector3::new(0.4, -0.2, 1.5))
}

fn transform(camera: CameraModel, pose: CameraPose) -> CoordinateTransform {
    let mut ct = CoordinateTransform::new();
    ct.set_calibration(camera);
    ct.set_camera_pose(pose);
    ct
}

#[test]
fn oblique_pose_is_a_rotation() {
    assert!(oblique_pose().is_orthonormal(1e-12));
    assert!(horizontal_pose().is_orthonormal(1e-12));
}

#[test]
fn image_world_image_round_trip() {
    let ct = transform(pinhole(), oblique_pose());
    for pixel in [
        Point2::new(320.0, 240.0),
        Point2::new(100.0, 400.0),
        Point2::new(600.0, 300.0),
        Point2::new(250.0, 470.0),
    ] {
        let world = ct.image_to_world(pixel, 0.0).expect("floor hit");
        assert_eq!(world.z, 0.0);
        let back = ct.world_to_image(&world).expect("visible");
        assert_relative_eq!(back, pixel, epsilon = 1e-6);
    }
}

#[test]
fn round_trip_through_distorting_lens() {
    let camera = CameraModel::new(
        Intrinsics::new(480.0, 485.0, 322.0, 236.0),
        Distortion::from_coeffs(&[-0.18, 0.04, 0.0005, -0.0004]).expect("distortion"),
        ImageSize::new(640, 480),
    )
    .expect("camera");
    let ct = transform(camera, oblique_pose());

    let pixel = Point2::new(150.0, 380.0);
    let world = ct.image_to_world(pixel, 0.25).expect("plane hit");
    assert_relative_eq!(world.z, 0.25);
    assert_relative_eq!(
        ct.world_to_distorted_image(&world).expect("visible"),
        pixel,
        epsilon = 1e-6
    );
    // intrinsics-only projection lands somewhere else under distortion
    let ideal = ct.world_to_image(&world).expect("visible");
    assert!((ideal - pixel).norm() > 1.0);
}

#[test]
fn horizon_ray_is_parallel_to_floor() {
    let ct = transform(pinhole(), horizontal_pose());
    assert_eq!(
        ct.image_to_world(Point2::new(320.0, 240.0), 0.0),
        Err(ProjectionError::ParallelRay)
    );
}

#[test]
fn ray_above_horizon_never_hits_floor() {
    let ct = transform(pinhole(), horizontal_pose());
    assert_eq!(
        ct.image_to_world(Point2::new(320.0, 100.0), 0.0),
        Err(ProjectionError::BehindCamera)
    );
}

#[test]
fn ray_below_horizon_hits_floor_ahead() {
    let ct = transform(pinhole(), horizontal_pose());
    // 50 px below the principal point at f = 500 is a 1:10 slope
    let hit = ct
        .image_to_world(Point2::new(320.0, 290.0), 0.0)
        .expect("floor hit");
    assert_relative_eq!(hit, Point3::new(10.0, 0.0, 0.0), epsilon = 1e-9);
}

#[test]
fn camera_position_is_pose_translation() {
    let ct = transform(pinhole(), oblique_pose());
    assert_relative_eq!(
        ct.camera_position().expect("pose"),
        Point3::new(0.4, -0.2, 1.5)
    );
    let ray = ct.ray(Point2::new(10.0, 20.0)).expect("ray");
    assert_relative_eq!(ray.origin, Point3::new(0.4, -0.2, 1.5));
    assert_relative_eq!(ray.direction.norm(), 1.0, epsilon = 1e-12);
}

#[test]
fn arbitrary_plane_intersection() {
    let ct = transform(pinhole(), horizontal_pose());
    // wall 3 m ahead, facing the camera
    let wall = Plane::new(-Vector3::x(), Point3::new(3.0, 0.0, 0.0));
    let hit = ct
        .image_to_plane(Point2::new(320.0, 240.0), &wall)
        .expect("wall hit");
    assert_relative_eq!(hit, Point3::new(3.0, 0.0, 1.0), epsilon = 1e-12);
}

#[test]
fn built_from_calibration_document() {
    let calib = Calibration::new(pinhole()).with_pose(oblique_pose());
    let ct = CoordinateTransform::from_calibration(&calib);
    assert!(ct.is_calibrated());
    assert!(ct.has_pose());

    let calib_only = CoordinateTransform::from_calibration(&Calibration::new(pinhole()));
    assert!(!calib_only.has_pose());
    assert_eq!(
        calib_only.image_to_world(Point2::new(0.0, 0.0), 0.0),
        Err(ProjectionError::NoPose)
    );
}

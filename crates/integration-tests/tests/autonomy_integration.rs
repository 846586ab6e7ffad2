//! Integration tests for the autonomy stack
//!
//! Tests the full pipeline: odometry → ICP scan matching → pose-graph SLAM → planning
//!
//! Run with: cargo test --test autonomy_integration

use nalgebra::{Isometry2, Matrix3, Vector2};

use costmap::OccupancyGrid;
use engine::{Engine, EngineConfig, MapRecord, SegmentRecord, StepOutcome};
use maze::Maze;
use planner::plan;
use slam::{odometry_measurement, PoseGraph, LOOP_CLOSURE_INFORMATION, ODOMETRY_INFORMATION};
use transforms::Segment;
use types::{Pose, RangeScan};

mod common;

/// Test basic odometry integration over a straight line
#[test]
fn test_odometry_straight_line() {
    // Simulate 10 meters forward at 1 m/s
    let dt = 0.01; // 10ms
    let velocity = 1.0; // m/s
    let duration = 10.0; // seconds

    let mut pose = Isometry2::identity();
    let mut traveled = 0.0;

    for _ in 0..(duration / dt) as usize {
        // Simulate differential drive (equal wheel speeds = straight)
        let delta = Isometry2::new(Vector2::new(velocity * dt, 0.0), 0.0);
        pose = pose * delta;
        traveled += velocity * dt;
    }

    // Should be at (10, 0) with small numerical error
    assert!(
        (pose.translation.x - 10.0_f64).abs() < 0.01,
        "X position error: expected ~10.0, got {}",
        pose.translation.x
    );
    assert!(
        (pose.translation.y as f64).abs() < 0.01,
        "Y position error: expected ~0.0, got {}",
        pose.translation.y
    );
    assert!(
        (pose.rotation.angle() as f64).abs() < 0.01,
        "Heading error: expected ~0.0, got {}",
        pose.rotation.angle()
    );
}

/// Test arc motion (differential drive with different wheel speeds)
#[test]
fn test_odometry_arc_motion() {
    // Simulate a 90-degree left turn with 1m radius
    let wheel_radius = 0.1; // 10cm wheels
    let track_width = 0.5; // 50cm between wheels
    let dt = 0.01;

    // Right wheel faster than left → turn left
    let left_vel = 5.0; // rad/s
    let right_vel = 15.0; // rad/s

    let v = (left_vel + right_vel) / 2.0 * wheel_radius;
    let omega = (right_vel - left_vel) / track_width * wheel_radius;

    let mut pose = Isometry2::identity();

    // Turn for π/2 radians (90 degrees)
    let turn_duration = (std::f64::consts::FRAC_PI_2 / omega).abs();
    let steps = (turn_duration / dt) as usize;

    for _ in 0..steps {
        // Arc motion
        let r = v / omega;
        let dtheta = omega * dt;
        let dx = r * dtheta.sin();
        let dy = r * (1.0 - dtheta.cos());

        let delta = Isometry2::new(Vector2::new(dx, dy), dtheta);
        pose = pose * delta;
    }

    // After 90° left turn with 1m radius, should be at (1, 1) facing left (π/2)
    let expected_x = 1.0;
    let expected_y = 1.0;
    let expected_theta = std::f64::consts::FRAC_PI_2;

    assert!(
        (pose.translation.x - expected_x).abs() < 0.05,
        "X position error: expected ~{}, got {}",
        expected_x,
        pose.translation.x
    );
    assert!(
        (pose.translation.y - expected_y).abs() < 0.05,
        "Y position error: expected ~{}, got {}",
        expected_y,
        pose.translation.y
    );
    assert!(
        (pose.rotation.angle() - expected_theta).abs() < 0.05,
        "Heading error: expected ~{}, got {}",
        expected_theta,
        pose.rotation.angle()
    );
}

/// Test angle normalization edge cases
#[test]
fn test_angle_normalization() {
    use std::f64::consts::PI;

    fn normalize_angle(angle: f64) -> f64 {
        let mut a = angle % (2.0 * PI);
        if a > PI {
            a -= 2.0 * PI;
        } else if a < -PI {
            a += 2.0 * PI;
        }
        a
    }

    assert!((normalize_angle(0.0) - 0.0).abs() < 1e-10);
    assert!((normalize_angle(PI) - PI).abs() < 1e-10);
    assert!((normalize_angle(-PI) - (-PI)).abs() < 1e-10);
    assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-10);
    assert!((normalize_angle(-3.0 * PI) - (-PI)).abs() < 1e-10);
    assert!((normalize_angle(2.0 * PI) - 0.0).abs() < 1e-10);
    assert!((normalize_angle(5.0 * PI) - PI).abs() < 1e-10);
}

/// Test coordinate frame transforms
#[test]
fn test_coordinate_frame_chain() {
    // world ← odom ← base ← lidar

    let T_world_odom = Isometry2::new(Vector2::new(1.0, 2.0), 0.0); // Odom is at (1, 2) in world
    let T_odom_base = Isometry2::new(Vector2::new(0.5, 0.0), std::f64::consts::FRAC_PI_2); // Robot facing left
    let T_base_lidar = Isometry2::new(Vector2::new(0.15, 0.0), 0.0); // LiDAR 15cm ahead

    // Point 1m ahead of LiDAR
    let point_lidar = Vector2::new(1.0, 0.0);

    // Transform through chain
    let point_base = T_base_lidar * point_lidar;
    let point_odom = T_odom_base * point_base;
    let point_world = T_world_odom * point_odom;

    // LiDAR at (0.15, 0) in base, point at (1.15, 0) in base
    // Base rotated 90° left in odom, so (1.15, 0) → (0, 1.15) in odom
    // Odom offset by (1, 2) in world → (1, 3.15) in world

    assert!(
        (point_world.x - 1.0).abs() < 0.01,
        "X error: expected ~1.0, got {}",
        point_world.x
    );
    assert!(
        (point_world.y - 3.15).abs() < 0.01,
        "Y error: expected ~3.15, got {}",
        point_world.y
    );
}

/// Test that covariance stays positive definite after many updates
#[test]
fn test_covariance_stays_positive_definite() {
    use nalgebra::Matrix3;

    let mut covariance = Matrix3::identity() * 0.01;

    // Simulate 1000 odometry updates
    for _ in 0..1000 {
        // Simulate motion noise
        let v = 1.0; // m/s
        let _omega = 0.1; // rad/s
        let dt = 0.01; // 10ms

        // Jacobian (simplified)
        let g = Matrix3::new(1.0, 0.0, -v * dt * 0.0, 0.0, 1.0, v * dt * 1.0, 0.0, 0.0, 1.0);

        // Process noise
        let q = Matrix3::new(0.01, 0.0, 0.0, 0.0, 0.01, 0.0, 0.0, 0.0, 0.001);

        // Propagate covariance
        covariance = g * covariance * g.transpose() + q;

        // Check eigenvalues are positive
        let eigenvalues = covariance.symmetric_eigenvalues();
        for e in eigenvalues.iter() {
            assert!(
                *e > 0.0,
                "Negative eigenvalue detected: {}. Covariance:\n{}",
                e,
                covariance
            );
        }
    }

    // After 1000 updates, covariance should be larger but still reasonable
    let eigenvalues = covariance.symmetric_eigenvalues();
    let max_eigenvalue = eigenvalues.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert!(
        max_eigenvalue < 100.0,
        "Covariance exploded: max eigenvalue = {}",
        max_eigenvalue
    );
}

/// Drive a pose graph around a 3m square loop with accumulated odometry
/// drift, close the loop, and verify optimization pulls the drifted
/// return-to-start node back toward the anchored start node.
#[test]
fn test_slam_square_loop() {
    let ground_truth = [
        Pose::new(0.0, 0.0, 0.0),
        Pose::new(3.0, 0.0, std::f64::consts::FRAC_PI_2),
        Pose::new(3.0, 3.0, std::f64::consts::PI),
        Pose::new(0.0, 3.0, -std::f64::consts::FRAC_PI_2),
        Pose::new(0.0, 0.0, 0.0),
    ];
    // Monotonically increasing drift, as a dead-reckoning odometry source
    // would accumulate along the loop.
    let drift = [
        (0.0, 0.0, 0.0),
        (0.05, 0.05, 0.02),
        (0.15, 0.10, 0.05),
        (0.30, 0.20, 0.08),
        (0.50, 0.35, 0.12),
    ];
    let estimates: Vec<Pose> = ground_truth
        .iter()
        .zip(drift.iter())
        .map(|(gt, (dx, dy, dtheta))| Pose::new(gt.x + dx, gt.y + dy, gt.theta + dtheta))
        .collect();

    let mut graph = PoseGraph::new();
    for pose in &estimates {
        graph.add_node(*pose, Vec::new());
    }
    for i in 0..4 {
        let measurement = odometry_measurement(ground_truth[i], ground_truth[i + 1]);
        graph
            .add_edge(i, i + 1, measurement, Matrix3::identity() * ODOMETRY_INFORMATION)
            .unwrap();
    }
    // Loop closure: node 4 and node 0 are the same physical location, so
    // their true relative measurement is the identity transform.
    let loop_measurement = odometry_measurement(ground_truth[4], ground_truth[0]);
    graph
        .add_edge(4, 0, loop_measurement, Matrix3::identity() * LOOP_CLOSURE_INFORMATION)
        .unwrap();
    assert_eq!(graph.loop_closure_count(), 1);

    let drift_before = {
        let a = graph.keyframes()[4].pose;
        let b = graph.keyframes()[0].pose;
        ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
    };

    graph.optimize();

    let drift_after = {
        let a = graph.keyframes()[4].pose;
        let b = graph.keyframes()[0].pose;
        ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
    };

    assert!(
        drift_after < drift_before * 0.5,
        "expected loop closure to shrink return-to-start drift: before={drift_before}, after={drift_after}"
    );
    assert!(drift_after < 0.1, "residual loop drift too large: {drift_after}");
}

/// Plan a path around a wall that splits a room in two, leaving gaps at the
/// top and bottom, and verify the planner routes through a gap instead of
/// cutting straight through the wall.
#[test]
fn test_path_planning_around_obstacle() {
    let segments = vec![
        Segment::new(Vector2::new(0.0, 0.0), Vector2::new(6.0, 0.0)),
        Segment::new(Vector2::new(6.0, 0.0), Vector2::new(6.0, 6.0)),
        Segment::new(Vector2::new(6.0, 6.0), Vector2::new(0.0, 6.0)),
        Segment::new(Vector2::new(0.0, 6.0), Vector2::new(0.0, 0.0)),
        // Center divider, leaving a 1m gap at both the top and bottom.
        Segment::new(Vector2::new(3.0, 1.0), Vector2::new(3.0, 5.0)),
    ];
    let maze = Maze::new(segments, Vector2::new(1.0, 3.0), 6.0, 6.0).unwrap();

    let mut grid = OccupancyGrid::new(&maze, 0.1);
    // Mark the whole room free with a single max-range scan from the center.
    let center = Pose::new(3.0, 3.0, 0.0);
    let ranges: Vec<f64> = (0..360).map(|_| 4.0).collect();
    grid.integrate_scan(&center, &RangeScan::new(ranges, vec![false; 360], 4.0));

    // Stamp the divider as occupied: scan into it from the side at every
    // height along its length, repeated to overpower the prior free marking.
    let mut y = 1.0_f64;
    while y <= 5.0 {
        let hit_pose = Pose::new(3.0 - 0.15, y, 0.0);
        let hit_scan = RangeScan::new(vec![0.15], vec![false], 4.0);
        for _ in 0..3 {
            grid.integrate_scan(&hit_pose, &hit_scan);
        }
        y += 0.1;
    }

    let path = plan(&grid, &maze, Vector2::new(1.0, 3.0), Vector2::new(5.0, 3.0), false)
        .expect("a path exists via the top or bottom gap");

    assert!(
        path.waypoints
            .iter()
            .all(|w| !((w.x - 3.0).abs() < 0.15 && w.y > 1.0 && w.y < 5.0)),
        "path must not cross the divider: {:?}",
        path.waypoints
    );
    assert!(
        path.waypoints
            .iter()
            .any(|w| (w.x - 3.0).abs() < 0.4 && (w.y < 1.2 || w.y > 4.8)),
        "expected the path to detour through a gap: {:?}",
        path.waypoints
    );
}

/// Run the full autonomy pipeline (mapping, frontier exploration, pose-graph
/// SLAM, planning, control) end to end against a box room with a single
/// exit gap, and verify the mission reaches completion with a plausible
/// exploration ratio and an exit pose near the gap.
#[test]
fn test_full_autonomy_pipeline() {
    let map = MapRecord {
        segments: vec![
            SegmentRecord { start: [0.0, 0.0], end: [4.0, 0.0] },
            SegmentRecord { start: [4.0, 0.0], end: [4.0, 4.0] },
            SegmentRecord { start: [4.0, 4.0], end: [2.5, 4.0] },
            SegmentRecord { start: [1.5, 4.0], end: [0.0, 4.0] },
            SegmentRecord { start: [0.0, 4.0], end: [0.0, 0.0] },
        ],
        start_point: [2.0, 1.0],
        goal_point: None,
    };
    let mut config = EngineConfig::default();
    config.max_steps = Some(20_000);

    let mut engine = Engine::new(map, config).expect("valid map builds an engine");
    let outcome = engine.run();
    let snapshot = engine.snapshot();

    assert_eq!(
        outcome,
        StepOutcome::MissionComplete,
        "mission should complete within the step budget, got {outcome:?} at tick {}",
        snapshot.tick
    );
    assert!(
        snapshot.exploration_ratio >= 0.9,
        "expected most of the room to be mapped, got {}",
        snapshot.exploration_ratio
    );
    let exit = snapshot.exit_pose.expect("a gap in the wall should be found and recorded");
    assert!(
        (exit.x - 2.0).abs() < 0.6 && (exit.y - 4.0).abs() < 0.6,
        "exit pose should be near the wall gap at (2, 4), got ({}, {})",
        exit.x,
        exit.y
    );
}

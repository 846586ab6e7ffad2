//! Shared value types for the maze exploration and SLAM engine.

use serde::{Deserialize, Serialize};

/// 2D pose in world frame (meters, radians).
///
/// `theta` is not guaranteed normalized by this type alone; callers that
/// need the `(-pi, pi]` invariant should run it through
/// `transforms::normalize_angle`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// X position in meters
    pub x: f64,
    /// Y position in meters
    pub y: f64,
    /// Heading in radians, positive counter-clockwise from +X
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn distance_to(&self, other: &Pose) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A single simulated 360-degree range scan, relative to the robot's heading.
///
/// `ranges[i]` is the distance (meters) measured along the ray at angle
/// `i * (2*pi / ranges.len())` relative to the robot's current heading.
/// A reading equal to `max_range` is a miss. `frame_hits[i]` is set when
/// that ray's closest intersection lay on the maze's outer extended frame
/// rather than an interior wall segment (see `maze` and `rangesim`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeScan {
    pub ranges: Vec<f64>,
    pub frame_hits: Vec<bool>,
    pub max_range: f64,
}

impl RangeScan {
    pub fn new(ranges: Vec<f64>, frame_hits: Vec<bool>, max_range: f64) -> Self {
        debug_assert_eq!(ranges.len(), frame_hits.len());
        Self {
            ranges,
            frame_hits,
            max_range,
        }
    }

    pub fn num_rays(&self) -> usize {
        self.ranges.len()
    }

    pub fn angle_increment(&self) -> f64 {
        std::f64::consts::TAU / self.ranges.len() as f64
    }

    /// Angle of ray `i` relative to the robot's heading.
    pub fn ray_angle(&self, i: usize) -> f64 {
        i as f64 * self.angle_increment()
    }

    /// Fraction of rays that returned `max_range` (a "miss").
    pub fn inefficiency(&self) -> f64 {
        if self.ranges.is_empty() {
            return 0.0;
        }
        let misses = self
            .ranges
            .iter()
            .filter(|&&d| d >= self.max_range - 1e-9)
            .count();
        misses as f64 / self.ranges.len() as f64
    }

    /// True if every reading is below the minimum plausible range, i.e. the
    /// scan looks like sensor noise rather than a real reading.
    pub fn is_empty_noise(&self, min_range: f64) -> bool {
        !self.ranges.is_empty() && self.ranges.iter().all(|&d| d < min_range)
    }
}

/// Top-level mission phase: the outer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissionPhase {
    #[default]
    ExploringMaze,
    ReturningToStart,
    GoingToExit,
    MissionComplete,
}

/// Inner exploration state, active only while `MissionPhase::ExploringMaze`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExplorationState {
    #[default]
    FindTarget,
    FollowPath,
    ConfirmingExit,
    ReturningToMaze,
}

/// Velocity command produced by the go-to-goal controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionCmd {
    /// Linear velocity in m/s
    pub v: f64,
    /// Angular velocity in rad/s
    pub omega: f64,
}

impl MotionCmd {
    pub fn new(v: f64, omega: f64) -> Self {
        Self { v, omega }
    }

    pub fn stop() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_serde_roundtrip() {
        let pose = Pose::new(1.5, -2.5, std::f64::consts::FRAC_PI_4);
        let json = serde_json::to_string(&pose).unwrap();
        let decoded: Pose = serde_json::from_str(&json).unwrap();
        assert!((decoded.x - pose.x).abs() < 1e-9);
        assert!((decoded.y - pose.y).abs() < 1e-9);
        assert!((decoded.theta - pose.theta).abs() < 1e-9);
    }

    #[test]
    fn test_pose_distance() {
        let a = Pose::new(0.0, 0.0, 0.0);
        let b = Pose::new(3.0, 4.0, 0.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_scan_inefficiency() {
        let scan = RangeScan::new(vec![4.0, 4.0, 1.0, 4.0], vec![false; 4], 4.0);
        assert!((scan.inefficiency() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_range_scan_angle_increment() {
        let scan = RangeScan::new(vec![0.0; 4], vec![false; 4], 4.0);
        assert!((scan.angle_increment() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        assert!((scan.ray_angle(2) - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn test_range_scan_empty_noise() {
        let noisy = RangeScan::new(vec![0.01, 0.02, 0.0], vec![false; 3], 4.0);
        assert!(noisy.is_empty_noise(0.1));
        let real = RangeScan::new(vec![0.01, 2.0, 0.0], vec![false; 3], 4.0);
        assert!(!real.is_empty_noise(0.1));
    }

    #[test]
    fn test_mission_phase_default() {
        assert_eq!(MissionPhase::default(), MissionPhase::ExploringMaze);
    }

    #[test]
    fn test_exploration_state_serde_roundtrip() {
        for state in [
            ExplorationState::FindTarget,
            ExplorationState::FollowPath,
            ExplorationState::ConfirmingExit,
            ExplorationState::ReturningToMaze,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            let decoded: ExplorationState = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, state);
        }
    }

    #[test]
    fn test_motion_cmd_stop() {
        let cmd = MotionCmd::stop();
        assert_eq!(cmd.v, 0.0);
        assert_eq!(cmd.omega, 0.0);
    }
}

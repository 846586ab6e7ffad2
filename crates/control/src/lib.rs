//! Go-to-goal controller and kinematics integration.
//!
//! Grounded on `sim::Physics::update_with_world`'s differential-drive
//! integration branch and `localization::estimator::update_odometry`'s
//! rotate-then-translate composition, generalized from wheel RPMs to the
//! single `(v, omega)` holonomic command this engine's controller issues.
//! This integrator follows a literal semi-implicit Euler step (heading
//! updates first, then position uses the updated heading).

use nalgebra::Vector2;
use transforms::{angle_diff, normalize_angle};
use types::{MotionCmd, Pose};

/// Kinematic limits and go-to-goal gains.
#[derive(Debug, Clone, Copy)]
pub struct ControlConfig {
    /// Maximum linear speed, m/s.
    pub v_max: f64,
    /// Maximum angular speed, rad/s.
    pub omega_max: f64,
    /// Bearing error beyond which the controller turns in place rather than
    /// driving forward, radians (default 15 degrees).
    pub turn_in_place_threshold: f64,
    /// Proportional gain applied to bearing error once driving forward.
    pub heading_gain: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            v_max: 0.3,
            omega_max: 1.0,
            turn_in_place_threshold: 15.0_f64.to_radians(),
            heading_gain: 2.5,
        }
    }
}

/// Compute the bearing error from `pose` to `goal`: `wrap(atan2(dy, dx) - theta)`.
pub fn bearing_error(pose: Pose, goal: Vector2<f64>) -> f64 {
    let bearing = (goal.y - pose.y).atan2(goal.x - pose.x);
    angle_diff(pose.theta, bearing)
}

/// Go-to-goal controller: turn in place when the bearing
/// error exceeds `turn_in_place_threshold`, otherwise drive forward with
/// angular velocity proportional to the bearing error, clamped to
/// `omega_max`. Performs no collision checking — that is the planner's and
/// the follow-path interrupt's responsibility.
pub fn go_to_goal(pose: Pose, goal: Vector2<f64>, config: &ControlConfig) -> MotionCmd {
    let e_psi = bearing_error(pose, goal);

    if e_psi.abs() > config.turn_in_place_threshold {
        MotionCmd::new(0.0, e_psi.signum() * config.omega_max)
    } else {
        let omega = (config.heading_gain * e_psi).clamp(-config.omega_max, config.omega_max);
        MotionCmd::new(config.v_max, omega)
    }
}

/// Integrate one kinematic timestep: heading advances first, then position
/// advances using the *updated* heading (semi-implicit Euler).
pub fn integrate(pose: Pose, cmd: MotionCmd, dt: f64) -> Pose {
    let theta = normalize_angle(pose.theta + cmd.omega * dt);
    let x = pose.x + cmd.v * theta.cos() * dt;
    let y = pose.y + cmd.v * theta.sin() * dt;
    Pose::new(x, y, theta)
}

/// True iff `pose` is within `tolerance` meters of `target` (used for the
/// various "within N m of X" transition guards in).
pub fn within_distance(pose: Pose, target: Vector2<f64>, tolerance: f64) -> bool {
    let dx = pose.x - target.x;
    let dy = pose.y - target.y;
    (dx * dx + dy * dy).sqrt() <= tolerance
}

//! Per-tick exploration orchestration.
//!
//! Ties `state`'s two-level state machine, `control`'s go-to-goal
//! controller, `frontier`'s target selection, `planner`'s A*, `slam`'s
//! pose graph and `costmap`'s occupancy grid together into one `step`.
//! Grounded on `crates/state/src/lib.rs`'s "one module owns the state
//! machine and is driven by an explicit per-tick call" shape, generalized
//! from a single flat `Mode` to the two nested machines this mission needs.
//! `Explorer` owns every piece of mutable map/graph/frontier state; it does not own the cancellation flag or the
//! bounded recent-position ring buffer the engine reports externally — both
//! of those are `engine::Engine`'s concern.

use std::collections::VecDeque;

use control::{go_to_goal, integrate, within_distance, ControlConfig};
use costmap::OccupancyGrid;
use frontier::FrontierEngine;
use maze::Maze;
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rangesim::RangeSim;
use slam::PoseGraph;
use state::{ExplorationEvent, ExplorationStateMachine, MissionEvent, MissionStateMachine};
use tracing::{debug, info, warn};
use types::{ExplorationState, MissionPhase, MotionCmd, Pose, RangeScan};

/// Minimum plausible range reading; anything shorter is sensor noise.
const MIN_PLAUSIBLE_RANGE: f64 = 0.02;
/// Point-cloud range window kept in a keyframe.
const CLOUD_MIN_RANGE: f64 = 0.01;
const CLOUD_MAX_RANGE: f64 = 3.99;

const RECENT_POSITIONS_CAP: usize = 10;
const RECENTLY_VISITED_CELL_RADIUS: f64 = 3.0;
const PLAN_COST_LIMIT: f64 = 5000.0;
const PLAN_FAILURE_LIMIT: u32 = 2;
const MAX_RECOVERY_ATTEMPTS: u32 = 3;

const FRONT_SECTOR_HALF_ANGLE_DEG: f64 = 30.0;
const FRONT_SECTOR_RANGE: f64 = 0.3;
const FRONT_SECTOR_BLOCKED_FRACTION: f64 = 0.6;
const REVERSE_SPEED: f64 = -0.5;

const EXIT_AHEAD_DISTANCE: f64 = 1.0;
const EXIT_CONFIRMATION_TOLERANCE: f64 = 0.2;
const RETURN_TO_MAZE_INWARD_DISTANCE: f64 = 1.5;
const ARRIVAL_TOLERANCE: f64 = 0.3;
const WAYPOINT_TOLERANCE: f64 = 0.15;

/// Tunable parameters driving a single `Explorer`.
#[derive(Debug, Clone, Copy)]
pub struct ExplorerConfig {
    pub dt: f64,
    pub linear_speed: f64,
    pub angular_speed: f64,
    pub keyframe_interval: u64,
    pub loop_search_radius: f64,
    pub icp_max_error: f64,
    pub exit_inefficiency_threshold: f64,
    pub exploration_threshold: f64,
    pub recovery_rng_seed: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            dt: 0.05,
            linear_speed: 0.3,
            angular_speed: 1.0,
            keyframe_interval: 100,
            loop_search_radius: 2.0,
            icp_max_error: 0.5,
            exit_inefficiency_threshold: 0.6,
            exploration_threshold: 0.98,
            recovery_rng_seed: 42,
        }
    }
}

/// Owns every piece of mutable exploration state and advances it one tick
/// at a time.
pub struct Explorer {
    grid: OccupancyGrid,
    frontiers: FrontierEngine,
    graph: PoseGraph,
    pose: Pose,
    mission: MissionStateMachine,
    exploration: ExplorationStateMachine,
    path: Vec<Vector2<f64>>,
    path_index: usize,
    confirmation_target: Option<Vector2<f64>>,
    exit_pose: Option<Pose>,
    recent_positions: VecDeque<Vector2<f64>>,
    consecutive_plan_failures: u32,
    recovery_attempts: u32,
    last_keyframe_tick: Option<u64>,
    pending_cmd: MotionCmd,
    control_config: ControlConfig,
    rng: StdRng,
    last_scan_inefficiency: f64,
}

impl Explorer {
    pub fn new(maze: &Maze, grid_resolution: f64, config: &ExplorerConfig) -> Self {
        let pose = Pose::new(maze.start().x, maze.start().y, 0.0);
        Self {
            grid: OccupancyGrid::new(maze, grid_resolution),
            frontiers: FrontierEngine::new(),
            graph: PoseGraph::new(),
            pose,
            mission: MissionStateMachine::new(),
            exploration: ExplorationStateMachine::new(),
            path: Vec::new(),
            path_index: 0,
            confirmation_target: None,
            exit_pose: None,
            recent_positions: VecDeque::with_capacity(RECENT_POSITIONS_CAP),
            consecutive_plan_failures: 0,
            recovery_attempts: 0,
            last_keyframe_tick: None,
            pending_cmd: MotionCmd::stop(),
            control_config: ControlConfig {
                v_max: config.linear_speed,
                omega_max: config.angular_speed,
                ..ControlConfig::default()
            },
            rng: StdRng::seed_from_u64(config.recovery_rng_seed),
            last_scan_inefficiency: 0.0,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn mission_phase(&self) -> MissionPhase {
        self.mission.phase()
    }

    pub fn exploration_state(&self) -> ExplorationState {
        self.exploration.state()
    }

    pub fn exit_pose(&self) -> Option<Pose> {
        self.exit_pose
    }

    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }

    pub fn frontiers(&self) -> &FrontierEngine {
        &self.frontiers
    }

    pub fn pose_graph(&self) -> &PoseGraph {
        &self.graph
    }

    pub fn path(&self) -> &[Vector2<f64>] {
        &self.path
    }

    pub fn exploration_ratio(&self) -> f64 {
        self.grid.exploration_ratio()
    }

    /// Advance the exploration one tick.
    pub fn step(&mut self, maze: &Maze, rangesim: &RangeSim, config: &ExplorerConfig, tick: u64) {
        self.pose = integrate(self.pose, self.pending_cmd, config.dt);

        self.record_recent_position();

        let scan = rangesim.scan(maze, &self.pose);
        self.last_scan_inefficiency = scan.inefficiency();

        if scan.is_empty_noise(MIN_PLAUSIBLE_RANGE) {
            warn!(tick, "scan looked like sensor noise, skipping occupancy update");
        } else {
            self.grid.integrate_scan(&self.pose, &scan);
        }

        self.maybe_add_keyframe(&scan, config, tick);

        self.frontiers.update(&self.grid, maze, tick);

        self.pending_cmd = self.control_step(maze, &scan, config, tick);
    }

    fn record_recent_position(&mut self) {
        if self.recent_positions.len() == RECENT_POSITIONS_CAP {
            self.recent_positions.pop_front();
        }
        self.recent_positions.push_back(Vector2::new(self.pose.x, self.pose.y));
    }

    fn is_recently_visited(&self, p: Vector2<f64>) -> bool {
        let radius = RECENTLY_VISITED_CELL_RADIUS * self.grid.resolution();
        self.recent_positions.iter().any(|&visited| (visited - p).norm() <= radius)
    }

    fn maybe_add_keyframe(&mut self, scan: &RangeScan, config: &ExplorerConfig, tick: u64) {
        let due = match self.last_keyframe_tick {
            None => true,
            Some(last) => tick.saturating_sub(last) >= config.keyframe_interval,
        };
        if !due {
            return;
        }

        let cloud = local_point_cloud(scan);
        let id = self.graph.add_node(self.pose, cloud);
        self.last_keyframe_tick = Some(tick);

        if id > 0 {
            if let Err(err) = self.graph.add_odometry_edge(id - 1, id) {
                warn!(tick, ?err, "failed to add odometry edge");
            }
        }

        if self
            .graph
            .try_loop_closure(id, config.loop_search_radius, config.icp_max_error, 10)
        {
            self.graph.optimize();
        }
    }

    fn control_step(&mut self, maze: &Maze, scan: &RangeScan, config: &ExplorerConfig, tick: u64) -> MotionCmd {
        match self.mission.phase() {
            MissionPhase::ExploringMaze => self.step_exploring(maze, scan, config, tick),
            MissionPhase::ReturningToStart => {
                let target = maze.start();
                if within_distance(self.pose, target, ARRIVAL_TOLERANCE) {
                    self.mission.transition(MissionEvent::ArrivedAtStart {
                        exit_confirmed: self.exit_pose.is_some(),
                    });
                    MotionCmd::stop()
                } else {
                    go_to_goal(self.pose, target, &self.control_config)
                }
            }
            MissionPhase::GoingToExit => self.step_going_to_exit(maze),
            MissionPhase::MissionComplete => MotionCmd::stop(),
        }
    }

    fn step_exploring(&mut self, maze: &Maze, scan: &RangeScan, config: &ExplorerConfig, tick: u64) -> MotionCmd {
        let triggerable = matches!(
            self.exploration.state(),
            ExplorationState::FindTarget | ExplorationState::FollowPath
        );
        if triggerable && self.exit_pose.is_none() && self.last_scan_inefficiency > config.exit_inefficiency_threshold {
            let ahead = Vector2::new(
                self.pose.x + EXIT_AHEAD_DISTANCE * self.pose.theta.cos(),
                self.pose.y + EXIT_AHEAD_DISTANCE * self.pose.theta.sin(),
            );
            self.confirmation_target = Some(ahead);
            self.path.clear();
            self.path_index = 0;
            self.exploration.transition(ExplorationEvent::ExitCandidateTriggered);
        }

        let cmd = match self.exploration.state() {
            ExplorationState::FindTarget => self.find_target(maze, config, tick),
            ExplorationState::FollowPath => self.follow_path(maze, scan),
            ExplorationState::ConfirmingExit => self.confirm_exit(config),
            ExplorationState::ReturningToMaze => self.return_to_maze(),
        };

        self.maybe_complete_exploration(maze, config);

        cmd
    }

    fn maybe_complete_exploration(&mut self, maze: &Maze, config: &ExplorerConfig) {
        if self.mission.phase() != MissionPhase::ExploringMaze {
            return;
        }
        let ratio = self.grid.exploration_ratio();
        let no_reachable_frontier = self
            .frontiers
            .select_target(Vector2::new(self.pose.x, self.pose.y), maze, &|_| false)
            .is_none();
        if ratio >= config.exploration_threshold || (no_reachable_frontier && self.exit_pose.is_some()) {
            self.mission.transition(MissionEvent::ExplorationComplete);
        }
    }

    fn find_target(&mut self, maze: &Maze, _config: &ExplorerConfig, tick: u64) -> MotionCmd {
        let robot_pos = Vector2::new(self.pose.x, self.pose.y);
        let mut target = self
            .frontiers
            .select_target(robot_pos, maze, &|p| self.is_recently_visited(p));

        if target.is_none() {
            self.recent_positions.clear();
            target = self.frontiers.select_target(robot_pos, maze, &|_| false);
        }

        let Some(target) = target else {
            debug!(tick, "no reachable frontier remains");
            return MotionCmd::stop();
        };

        match planner::plan(&self.grid, maze, robot_pos, target, true) {
            Some(path) if path.cost <= PLAN_COST_LIMIT => {
                self.consecutive_plan_failures = 0;
                self.recovery_attempts = 0;
                self.path = path.waypoints;
                self.path_index = 0;
                self.exploration.transition(ExplorationEvent::TargetSelected);
                MotionCmd::stop()
            }
            _ => {
                self.consecutive_plan_failures += 1;
                if self.consecutive_plan_failures >= PLAN_FAILURE_LIMIT {
                    self.recent_positions.clear();
                    self.consecutive_plan_failures = 0;
                }
                if self.recovery_attempts < MAX_RECOVERY_ATTEMPTS {
                    self.recovery_attempts += 1;
                    let nudge: f64 = self.rng.gen_range(-1.0..1.0);
                    MotionCmd::new(0.0, nudge * self.control_config.omega_max)
                } else {
                    MotionCmd::stop()
                }
            }
        }
    }

    fn follow_path(&mut self, _maze: &Maze, scan: &RangeScan) -> MotionCmd {
        if front_sector_blocked(scan) {
            self.record_recent_position();
            self.path.clear();
            self.path_index = 0;
            self.exploration.transition(ExplorationEvent::PathBlocked);
            return MotionCmd::new(REVERSE_SPEED, 0.0);
        }

        if self.path_index >= self.path.len() {
            self.exploration.transition(ExplorationEvent::FollowingComplete);
            return MotionCmd::stop();
        }

        let waypoint = self.path[self.path_index];
        if within_distance(self.pose, waypoint, WAYPOINT_TOLERANCE) {
            self.path_index += 1;
            if self.path_index >= self.path.len() {
                self.exploration.transition(ExplorationEvent::FollowingComplete);
                return MotionCmd::stop();
            }
        }
        go_to_goal(self.pose, self.path[self.path_index], &self.control_config)
    }

    fn confirm_exit(&mut self, config: &ExplorerConfig) -> MotionCmd {
        let Some(target) = self.confirmation_target else {
            self.exploration.transition(ExplorationEvent::ExitNotConfirmed);
            return MotionCmd::stop();
        };

        if within_distance(self.pose, target, EXIT_CONFIRMATION_TOLERANCE) {
            if self.last_scan_inefficiency > config.exit_inefficiency_threshold {
                self.exit_pose = Some(self.pose);
                info!(pose = ?self.pose, "exit candidate confirmed");
                self.exploration.transition(ExplorationEvent::ExitConfirmed);
            } else {
                self.exploration.transition(ExplorationEvent::ExitNotConfirmed);
            }
            self.confirmation_target = None;
            MotionCmd::stop()
        } else {
            go_to_goal(self.pose, target, &self.control_config)
        }
    }

    fn return_to_maze(&mut self) -> MotionCmd {
        let Some(exit_pose) = self.exit_pose else {
            self.exploration.transition(ExplorationEvent::ReturnedToMaze);
            return MotionCmd::stop();
        };
        let inward = Vector2::new(
            exit_pose.x - RETURN_TO_MAZE_INWARD_DISTANCE * exit_pose.theta.cos(),
            exit_pose.y - RETURN_TO_MAZE_INWARD_DISTANCE * exit_pose.theta.sin(),
        );
        if within_distance(self.pose, inward, ARRIVAL_TOLERANCE) {
            self.exploration.transition(ExplorationEvent::ReturnedToMaze);
            MotionCmd::stop()
        } else {
            go_to_goal(self.pose, inward, &self.control_config)
        }
    }

    /// Drive the optimal, uncapped eight-connected path from the current
    /// position to the recorded exit pose.
    fn step_going_to_exit(&mut self, maze: &Maze) -> MotionCmd {
        let Some(exit_pose) = self.exit_pose else {
            self.mission.transition(MissionEvent::ArrivedAtExit);
            return MotionCmd::stop();
        };
        let target = Vector2::new(exit_pose.x, exit_pose.y);

        if within_distance(self.pose, target, ARRIVAL_TOLERANCE) {
            self.mission.transition(MissionEvent::ArrivedAtExit);
            self.path.clear();
            self.path_index = 0;
            return MotionCmd::stop();
        }

        if self.path.is_empty() || self.path_index >= self.path.len() {
            self.plan_exit_path(maze, exit_pose);
        }

        match self.path.get(self.path_index).copied() {
            Some(waypoint) => {
                if within_distance(self.pose, waypoint, WAYPOINT_TOLERANCE) {
                    self.path_index += 1;
                }
                let next = self.path.get(self.path_index).copied().unwrap_or(target);
                go_to_goal(self.pose, next, &self.control_config)
            }
            None => go_to_goal(self.pose, target, &self.control_config),
        }
    }

    fn plan_exit_path(&mut self, maze: &Maze, exit_pose: Pose) {
        let robot_pos = Vector2::new(self.pose.x, self.pose.y);
        let exit_pos = Vector2::new(exit_pose.x, exit_pose.y);
        let half_plane = planner::ExitHalfPlane {
            origin: exit_pos,
            outward: Vector2::new(exit_pose.theta.cos(), exit_pose.theta.sin()),
        };
        self.path = match planner::plan_avoiding_exit(&self.grid, maze, robot_pos, exit_pos, false, half_plane) {
            Some(path) => planner::smooth(&path.waypoints, maze),
            None => Vec::new(),
        };
        self.path_index = 0;
    }
}

/// Keep only rays in the plausible range window, converted to robot-local
/// Cartesian coordinates.
fn local_point_cloud(scan: &RangeScan) -> Vec<Vector2<f64>> {
    let mut cloud = Vec::new();
    for i in 0..scan.num_rays() {
        let d = scan.ranges[i];
        if d > CLOUD_MIN_RANGE && d < CLOUD_MAX_RANGE {
            let angle = scan.ray_angle(i);
            cloud.push(Vector2::new(d * angle.cos(), d * angle.sin()));
        }
    }
    cloud
}

/// True if at least 60% of rays in the front 60-degree sector read below
/// 0.3 m.
fn front_sector_blocked(scan: &RangeScan) -> bool {
    let half_angle = FRONT_SECTOR_HALF_ANGLE_DEG.to_radians();
    let mut total = 0usize;
    let mut close = 0usize;
    for i in 0..scan.num_rays() {
        let angle = transforms::normalize_angle(scan.ray_angle(i));
        if angle.abs() <= half_angle {
            total += 1;
            if scan.ranges[i] < FRONT_SECTOR_RANGE {
                close += 1;
            }
        }
    }
    if total == 0 {
        return false;
    }
    (close as f64 / total as f64) >= FRONT_SECTOR_BLOCKED_FRACTION
}

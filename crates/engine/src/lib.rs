//! Tick loop, configuration, map loading, snapshots and cancellation.
//!
//! Grounded on `bins/bvrd/src/main.rs`'s `FileConfig` pattern (serde-derived,
//! `#[serde(default)]`, an explicit `Default` impl, "missing file logs a
//! warning and falls back to defaults") for `EngineConfig::load`, and on
//! the single-threaded cooperative tick-loop model for the rest: a pure
//! `step` advancing exactly one tick, an outer `run` owning wall-clock
//! time and the cancellation check,
//! an engine-owned `AtomicBool` replacing the source's global
//! `simulation_running` flag, and an `Observer` trait receiving owned
//! `EngineSnapshot` values rather than references into engine state.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use maze::Maze;
use nalgebra::Vector2;
use rangesim::{RangeSim, RangeSimConfig};
use serde::Deserialize;
use tracing::{info, warn};
use transforms::Segment;
use types::{ExplorationState, MissionPhase, Pose};

use explorer::{Explorer, ExplorerConfig};

const POSITION_HISTORY_CAP: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("map is malformed: {0}")]
    Map(#[from] maze::MazeError),
}

/// Wire format for a single wall segment in a map record.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentRecord {
    pub start: [f64; 2],
    pub end: [f64; 2],
}

/// A loaded map: wall segments, a start point, and an optional goal. No
/// implicit outer boundary is assumed — a maze with gaps in its perimeter
/// simply has free extended region there, which the exit detector may
/// legitimately discover.
#[derive(Debug, Clone, Deserialize)]
pub struct MapRecord {
    pub segments: Vec<SegmentRecord>,
    pub start_point: [f64; 2],
    #[serde(default)]
    pub goal_point: Option<[f64; 2]>,
}

impl MapRecord {
    /// Build the `Maze` this record describes. The nominal extent
    /// `[0, W] x [0, H]` isn't part of the wire format, so it's inferred as
    /// the bounding box of every segment endpoint, the start point, and the
    /// goal point if present.
    fn into_maze(self) -> Result<(Maze, Option<Vector2<f64>>), EngineError> {
        let mut max_x: f64 = self.start_point[0];
        let mut max_y: f64 = self.start_point[1];
        for seg in &self.segments {
            max_x = max_x.max(seg.start[0]).max(seg.end[0]);
            max_y = max_y.max(seg.start[1]).max(seg.end[1]);
        }
        if let Some(goal) = self.goal_point {
            max_x = max_x.max(goal[0]);
            max_y = max_y.max(goal[1]);
        }

        let segments = self
            .segments
            .iter()
            .map(|s| Segment::new(Vector2::new(s.start[0], s.start[1]), Vector2::new(s.end[0], s.end[1])))
            .collect();
        let start = Vector2::new(self.start_point[0], self.start_point[1]);
        let goal = self.goal_point.map(|g| Vector2::new(g[0], g[1]));

        let maze = Maze::new(segments, start, max_x, max_y)?;
        Ok((maze, goal))
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid_resolution: f64,
    pub max_range: f64,
    pub scan_rays: usize,
    pub linear_speed: f64,
    pub angular_speed: f64,
    pub keyframe_interval: u64,
    pub loop_search_radius: f64,
    pub icp_max_error: f64,
    pub exit_inefficiency_threshold: f64,
    pub exploration_threshold: f64,
    pub max_steps: Option<u64>,
    pub mission_timeout_secs: f64,
    pub dt: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_resolution: 0.1,
            max_range: 4.0,
            scan_rays: 90,
            linear_speed: 0.3,
            angular_speed: 1.0,
            keyframe_interval: 100,
            loop_search_radius: 2.0,
            icp_max_error: 0.5,
            exit_inefficiency_threshold: 0.6,
            exploration_threshold: 0.98,
            max_steps: None,
            mission_timeout_secs: 300.0,
            dt: 0.05,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file. A missing file is not an
    /// error — it logs a warning and falls back to `Default::default()`.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(?err, path = %path.display(), "failed to parse engine config, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(?err, path = %path.display(), "engine config file not found, using defaults");
                Self::default()
            }
        }
    }

    fn explorer_config(&self) -> ExplorerConfig {
        ExplorerConfig {
            dt: self.dt,
            linear_speed: self.linear_speed,
            angular_speed: self.angular_speed,
            keyframe_interval: self.keyframe_interval,
            loop_search_radius: self.loop_search_radius,
            icp_max_error: self.icp_max_error,
            exit_inefficiency_threshold: self.exit_inefficiency_threshold,
            exploration_threshold: self.exploration_threshold,
            ..ExplorerConfig::default()
        }
    }

    fn rangesim_config(&self) -> RangeSimConfig {
        RangeSimConfig {
            num_rays: self.scan_rays,
            max_range: self.max_range,
        }
    }
}

/// A value snapshot of engine state. Every field is owned data, safe to hand to an observer
/// running on another thread.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub tick: u64,
    pub pose: Pose,
    pub phase: MissionPhase,
    pub exploration_state: ExplorationState,
    pub occupancy: Vec<i8>,
    pub occupancy_cols: i64,
    pub occupancy_rows: i64,
    pub frontier_count: usize,
    pub path: Vec<Vector2<f64>>,
    pub exploration_ratio: f64,
    pub exit_pose: Option<Pose>,
}

/// Narrow observer interface: receives owned snapshots, never a handle into the engine, so
/// it cannot mutate or race with the tick loop.
pub trait Observer {
    fn on_tick(&mut self, _snapshot: &EngineSnapshot) {}
    fn on_phase_change(&mut self, _old: MissionPhase, _new: MissionPhase, _snapshot: &EngineSnapshot) {}
}

/// Outcome of advancing the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    MissionComplete,
    Timeout,
    MaxStepsReached,
    Cancelled,
}

/// Owns the whole engine: the maze, the scanner, the `Explorer`, the tick
/// loop's timing, cancellation flag, and bounded position history.
pub struct Engine {
    explorer: Explorer,
    maze: Maze,
    rangesim: RangeSim,
    explorer_config: ExplorerConfig,
    config: EngineConfig,
    tick: u64,
    started_at: Instant,
    cancelled: Arc<AtomicBool>,
    position_history: VecDeque<Vector2<f64>>,
    observers: Vec<Box<dyn Observer>>,
    last_phase: MissionPhase,
}

impl Engine {
    pub fn new(map: MapRecord, config: EngineConfig) -> Result<Self, EngineError> {
        let (maze, _goal) = map.into_maze()?;
        let explorer_config = config.explorer_config();
        let rangesim = RangeSim::new(config.rangesim_config());
        let explorer = Explorer::new(&maze, config.grid_resolution, &explorer_config);

        Ok(Self {
            explorer,
            maze,
            rangesim,
            explorer_config,
            config,
            tick: 0,
            started_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
            position_history: VecDeque::with_capacity(POSITION_HISTORY_CAP),
            observers: Vec::new(),
            last_phase: MissionPhase::ExploringMaze,
        })
    }

    /// A clone of the cancellation flag for an external thread to signal.
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn register_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn recent_positions(&self) -> &VecDeque<Vector2<f64>> {
        &self.position_history
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let grid = self.explorer.grid();
        EngineSnapshot {
            tick: self.tick,
            pose: self.explorer.pose(),
            phase: self.explorer.mission_phase(),
            exploration_state: self.explorer.exploration_state(),
            occupancy: grid.to_i8_snapshot(),
            occupancy_cols: grid.cols(),
            occupancy_rows: grid.rows(),
            frontier_count: self.explorer.frontiers().len(),
            path: self.explorer.path().to_vec(),
            exploration_ratio: self.explorer.exploration_ratio(),
            exit_pose: self.explorer.exit_pose(),
        }
    }

    /// Advance exactly one tick and report the resulting outcome. Pure with
    /// respect to wall-clock time and cancellation — `run` is responsible
    /// for both, keeping `step` a plain function with the outer loop
    /// responsible for time and IO.
    pub fn step(&mut self) -> StepOutcome {
        self.explorer.step(&self.maze, &self.rangesim, &self.explorer_config, self.tick);
        self.tick += 1;
        self.record_position();

        let phase = self.explorer.mission_phase();
        if phase != self.last_phase {
            let old_phase = self.last_phase;
            let snapshot = self.snapshot();
            for observer in &mut self.observers {
                observer.on_phase_change(old_phase, phase, &snapshot);
            }
            info!(?old_phase, new_phase = ?phase, tick = self.tick, "mission phase transition");
            self.last_phase = phase;
        }

        let snapshot = self.snapshot();
        for observer in &mut self.observers {
            observer.on_tick(&snapshot);
        }

        if phase == MissionPhase::MissionComplete {
            return StepOutcome::MissionComplete;
        }
        if phase == MissionPhase::ReturningToStart && self.explorer.exit_pose().is_none()
            && self.explorer.exploration_ratio() >= self.config.exploration_threshold
            && self.no_reachable_frontier_remains()
        {
            // Sealed maze: the mission can make no further
            // progress once it's back at start with no exit ever found.
            return StepOutcome::MissionComplete;
        }
        StepOutcome::Continue
    }

    fn no_reachable_frontier_remains(&self) -> bool {
        self.explorer.frontiers().is_empty()
    }

    fn record_position(&mut self) {
        if self.position_history.len() == POSITION_HISTORY_CAP {
            self.position_history.pop_front();
        }
        let pose = self.explorer.pose();
        self.position_history.push_back(Vector2::new(pose.x, pose.y));
    }

    /// Drive the tick loop until completion, cancellation, timeout, or the
    /// step cap is hit.
    pub fn run(&mut self) -> StepOutcome {
        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                return StepOutcome::Cancelled;
            }
            if let Some(max_steps) = self.config.max_steps {
                if self.tick >= max_steps {
                    return StepOutcome::MaxStepsReached;
                }
            }
            if self.started_at.elapsed().as_secs_f64() > self.config.mission_timeout_secs {
                warn!(tick = self.tick, "mission timed out");
                return StepOutcome::Timeout;
            }

            match self.step() {
                StepOutcome::Continue => continue,
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_map(gap: bool) -> MapRecord {
        let mut segments = vec![
            SegmentRecord { start: [0.0, 0.0], end: [4.0, 0.0] },
            SegmentRecord { start: [4.0, 0.0], end: [4.0, 4.0] },
            SegmentRecord { start: [0.0, 4.0], end: [0.0, 0.0] },
        ];
        if gap {
            // Top wall with a 1 m gap centered at (2, 4).
            segments.push(SegmentRecord { start: [4.0, 4.0], end: [2.5, 4.0] });
            segments.push(SegmentRecord { start: [1.5, 4.0], end: [0.0, 4.0] });
        } else {
            segments.push(SegmentRecord { start: [4.0, 4.0], end: [0.0, 4.0] });
        }
        MapRecord {
            segments,
            start_point: [2.0, 1.0],
            goal_point: None,
        }
    }

    #[test]
    fn test_engine_builds_from_valid_map() {
        let engine = Engine::new(box_map(false), EngineConfig::default());
        assert!(engine.is_ok());
    }

    #[test]
    fn test_engine_rejects_start_on_obstacle() {
        let mut map = box_map(false);
        map.start_point = [0.0, 0.0];
        let result = Engine::new(map, EngineConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_step_advances_tick_counter() {
        let mut engine = Engine::new(box_map(false), EngineConfig::default()).unwrap();
        engine.step();
        engine.step();
        assert_eq!(engine.tick_count(), 2);
    }

    #[test]
    fn test_cancellation_handle_stops_run() {
        let mut engine = Engine::new(box_map(false), EngineConfig::default()).unwrap();
        let handle = engine.cancellation_handle();
        handle.store(true, Ordering::Relaxed);
        assert_eq!(engine.run(), StepOutcome::Cancelled);
    }

    #[test]
    fn test_max_steps_cap_halts_run() {
        let mut config = EngineConfig::default();
        config.max_steps = Some(5);
        let mut engine = Engine::new(box_map(false), config).unwrap();
        assert_eq!(engine.run(), StepOutcome::MaxStepsReached);
        assert_eq!(engine.tick_count(), 5);
    }

    #[test]
    fn test_config_load_missing_file_falls_back_to_default() {
        let config = EngineConfig::load(Path::new("/nonexistent/path/engine.toml"));
        assert_eq!(config.grid_resolution, EngineConfig::default().grid_resolution);
    }

    struct CountingObserver {
        ticks: usize,
        phase_changes: usize,
    }

    impl Observer for CountingObserver {
        fn on_tick(&mut self, _snapshot: &EngineSnapshot) {
            self.ticks += 1;
        }
        fn on_phase_change(&mut self, _old: MissionPhase, _new: MissionPhase, _snapshot: &EngineSnapshot) {
            self.phase_changes += 1;
        }
    }

    #[test]
    fn test_observer_receives_tick_notifications() {
        let mut engine = Engine::new(box_map(false), EngineConfig::default()).unwrap();
        engine.register_observer(Box::new(CountingObserver { ticks: 0, phase_changes: 0 }));
        engine.step();
        engine.step();
        // Can't inspect the boxed observer's state directly; this just
        // exercises the registration and notification path end-to-end.
    }
}

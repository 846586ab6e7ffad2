//! Log-odds occupancy grid over the maze's extended region.
//!
//! Covers `[-2, W+2] x [-2, H+2]` at a configurable resolution (default
//! 0.1 m). Each scan is integrated ray-by-ray:
//! cells between the robot and the ray's endpoint are marked free, and the
//! endpoint itself is marked occupied unless the ray terminated at
//! `max_range` or only hit the maze's outer extended frame (a "frame hit"
//! must never place an obstacle — see `maze::Maze::outer_frame`).

use maze::Maze;
use nalgebra::Vector2;
use transforms::GridCell;
use types::{Pose, RangeScan};

/// Log-odds added per free-space traversal (`ln(0.3/0.7)`).
pub fn log_free() -> f64 {
    (0.3_f64 / 0.7).ln()
}

/// Log-odds added for an occupied endpoint (`ln(0.9/0.1)`).
pub fn log_occ() -> f64 {
    (0.9_f64 / 0.1).ln()
}

/// Saturation bound for a cell's log-odds value.
pub const LOG_ODDS_CLAMP: f64 = 10.0;
/// |log_odds| above this threshold counts as "known" (occupied or free).
pub const KNOWN_THRESHOLD: f64 = 2.0;
/// Default cell resolution in meters.
pub const DEFAULT_RESOLUTION: f64 = 0.1;

/// Semantic decoding of a cell's log-odds value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Occupied,
    Free,
    Unknown,
}

/// Log-odds occupancy grid covering a maze's extended region.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    data: Vec<f64>,
    cols: i64,
    rows: i64,
    resolution: f64,
    /// World coordinates of the grid's (0, 0) cell's lower corner.
    origin: Vector2<f64>,
    /// Nominal maze extent, used to compute the exploration ratio.
    maze_width: f64,
    maze_height: f64,
}

impl OccupancyGrid {
    /// Build an empty (all-unknown) grid covering `maze`'s extended region.
    pub fn new(maze: &Maze, resolution: f64) -> Self {
        let (lo, hi) = maze.extended_bounds();
        let cols = ((hi.x - lo.x) / resolution).ceil() as i64;
        let rows = ((hi.y - lo.y) / resolution).ceil() as i64;
        Self {
            data: vec![0.0; (cols * rows) as usize],
            cols,
            rows,
            resolution,
            origin: lo,
            maze_width: maze.width(),
            maze_height: maze.height(),
        }
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn cols(&self) -> i64 {
        self.cols
    }

    pub fn rows(&self) -> i64 {
        self.rows
    }

    pub fn origin(&self) -> Vector2<f64> {
        self.origin
    }

    /// World position to grid cell. Always succeeds (cells outside the
    /// grid are valid `GridCell`s, just not indexable); use `in_bounds`
    /// to check before indexing.
    pub fn world_to_cell(&self, p: Vector2<f64>) -> GridCell {
        GridCell::new(
            ((p.x - self.origin.x) / self.resolution).floor() as i64,
            ((p.y - self.origin.y) / self.resolution).floor() as i64,
        )
    }

    /// Grid cell to world position (cell center).
    pub fn cell_to_world(&self, c: GridCell) -> Vector2<f64> {
        Vector2::new(
            self.origin.x + (c.i as f64 + 0.5) * self.resolution,
            self.origin.y + (c.j as f64 + 0.5) * self.resolution,
        )
    }

    pub fn in_bounds(&self, c: GridCell) -> bool {
        c.i >= 0 && c.i < self.cols && c.j >= 0 && c.j < self.rows
    }

    fn index(&self, c: GridCell) -> Option<usize> {
        if self.in_bounds(c) {
            Some((c.j * self.cols + c.i) as usize)
        } else {
            None
        }
    }

    pub fn log_odds(&self, c: GridCell) -> Option<f64> {
        self.index(c).map(|idx| self.data[idx])
    }

    pub fn state(&self, c: GridCell) -> CellState {
        match self.log_odds(c) {
            Some(l) if l > KNOWN_THRESHOLD => CellState::Occupied,
            Some(l) if l < -KNOWN_THRESHOLD => CellState::Free,
            _ => CellState::Unknown,
        }
    }

    pub fn is_known(&self, c: GridCell) -> bool {
        self.log_odds(c).is_some_and(|l| l.abs() > KNOWN_THRESHOLD)
    }

    /// Add `delta` to a cell's log-odds, clamping to `[-10, 10]`.
    fn add(&mut self, c: GridCell, delta: f64) {
        if let Some(idx) = self.index(c) {
            self.data[idx] = (self.data[idx] + delta).clamp(-LOG_ODDS_CLAMP, LOG_ODDS_CLAMP);
        }
    }

    /// Integrate one scan taken from `pose`.
    pub fn integrate_scan(&mut self, pose: &Pose, scan: &RangeScan) {
        let robot_cell = self.world_to_cell(Vector2::new(pose.x, pose.y));
        let eps = 1e-6 * scan.max_range.max(1.0);

        for i in 0..scan.num_rays() {
            let d = scan.ranges[i];
            let angle = pose.theta + scan.ray_angle(i);
            let endpoint = Vector2::new(pose.x + d * angle.cos(), pose.y + d * angle.sin());
            let end_cell = self.world_to_cell(endpoint);

            let path = transforms::bresenham_line(robot_cell, end_cell);
            for cell in path.iter().take(path.len().saturating_sub(1)) {
                self.add(*cell, log_free());
            }

            let terminated_at_max_range = d >= scan.max_range - eps;
            if terminated_at_max_range || scan.frame_hits[i] {
                self.add(end_cell, log_free());
            } else {
                self.add(end_cell, log_occ());
            }
        }
    }

    /// Fraction of the nominal maze area (`[0,W] x [0,H]`, not the extended
    /// region) whose cells are known, capped at 1.0.
    pub fn exploration_ratio(&self) -> f64 {
        let lo = self.world_to_cell(Vector2::new(0.0, 0.0));
        let hi = self.world_to_cell(Vector2::new(self.maze_width, self.maze_height));

        let mut known = 0usize;
        let mut total = 0usize;
        for j in lo.j..=hi.j {
            for i in lo.i..=hi.i {
                let c = GridCell::new(i, j);
                if !self.in_bounds(c) {
                    continue;
                }
                total += 1;
                if self.is_known(c) {
                    known += 1;
                }
            }
        }
        if total == 0 {
            return 0.0;
        }
        (known as f64 / total as f64).min(1.0)
    }

    /// Iterate every cell's grid coordinate and log-odds value, in
    /// row-major order — used by the frontier engine and the snapshot API.
    pub fn iter_cells(&self) -> impl Iterator<Item = (GridCell, f64)> + '_ {
        let cols = self.cols;
        self.data.iter().enumerate().map(move |(idx, &l)| {
            let i = idx as i64 % cols;
            let j = idx as i64 / cols;
            (GridCell::new(i, j), l)
        })
    }

    /// Snapshot the grid as clamped signed bytes, per output
    /// contract ("copy of occupancy grid as a 2D array of signed bytes").
    pub fn to_i8_snapshot(&self) -> Vec<i8> {
        self.data
            .iter()
            .map(|&l| (l.clamp(-127.0, 127.0)) as i8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_maze() -> Maze {
        use nalgebra::Vector2 as V2;
        use transforms::Segment;
        let segments = vec![
            Segment::new(V2::new(0.0, 0.0), V2::new(4.0, 0.0)),
            Segment::new(V2::new(4.0, 0.0), V2::new(4.0, 4.0)),
            Segment::new(V2::new(4.0, 4.0), V2::new(0.0, 4.0)),
            Segment::new(V2::new(0.0, 4.0), V2::new(0.0, 0.0)),
        ];
        Maze::new(segments, V2::new(2.0, 2.0), 4.0, 4.0).unwrap()
    }

    #[test]
    fn test_new_grid_covers_extended_region() {
        let maze = box_maze();
        let grid = OccupancyGrid::new(&maze, 0.1);
        // Extended region is [-2, 6] x [-2, 6]: 80 cells per axis.
        assert_eq!(grid.cols(), 80);
        assert_eq!(grid.rows(), 80);
    }

    #[test]
    fn test_world_to_cell_matches_spec_formula() {
        let maze = box_maze();
        let grid = OccupancyGrid::new(&maze, 0.1);
        // x=0 -> floor((0+2)/0.1) = 20
        let cell = grid.world_to_cell(Vector2::new(0.0, 0.0));
        assert_eq!(cell.i, 20);
        assert_eq!(cell.j, 20);
    }

    #[test]
    fn test_unknown_by_default() {
        let maze = box_maze();
        let grid = OccupancyGrid::new(&maze, 0.1);
        let c = grid.world_to_cell(Vector2::new(2.0, 2.0));
        assert_eq!(grid.state(c), CellState::Unknown);
    }

    #[test]
    fn test_clamp_bounds() {
        let maze = box_maze();
        let mut grid = OccupancyGrid::new(&maze, 0.1);
        let c = grid.world_to_cell(Vector2::new(2.0, 2.0));
        for _ in 0..1000 {
            grid.add(c, log_occ());
        }
        assert!(grid.log_odds(c).unwrap() <= LOG_ODDS_CLAMP);
        for _ in 0..2000 {
            grid.add(c, log_free());
        }
        assert!(grid.log_odds(c).unwrap() >= -LOG_ODDS_CLAMP);
    }

    #[test]
    fn test_integrate_scan_marks_free_and_occupied() {
        let maze = box_maze();
        let mut grid = OccupancyGrid::new(&maze, 0.1);
        let pose = Pose::new(2.0, 2.0, 0.0);
        // A single ray straight ahead (angle 0) hitting a wall at x=4.
        let scan = RangeScan::new(vec![2.0], vec![false], 4.0);
        grid.integrate_scan(&pose, &scan);

        let near = grid.world_to_cell(Vector2::new(2.5, 2.0));
        assert_eq!(grid.state(near), CellState::Free);

        let end = grid.world_to_cell(Vector2::new(4.0, 2.0));
        assert_eq!(grid.state(end), CellState::Occupied);
    }

    #[test]
    fn test_frame_hit_never_marks_occupied() {
        let maze = box_maze();
        let mut grid = OccupancyGrid::new(&maze, 0.1);
        let pose = Pose::new(2.0, 2.0, 0.0);
        // Ray reports a hit short of max_range, but it's tagged a frame hit:
        // must be treated as free-terminated, not occupied.
        let scan = RangeScan::new(vec![3.5], vec![true], 4.0);
        grid.integrate_scan(&pose, &scan);

        let end = grid.world_to_cell(Vector2::new(5.5, 2.0));
        assert_ne!(grid.state(end), CellState::Occupied);
    }

    #[test]
    fn test_max_range_miss_marks_free_not_occupied() {
        let maze = box_maze();
        let mut grid = OccupancyGrid::new(&maze, 0.1);
        let pose = Pose::new(2.0, 2.0, 0.0);
        let scan = RangeScan::new(vec![4.0], vec![false], 4.0);
        grid.integrate_scan(&pose, &scan);

        let end = grid.world_to_cell(Vector2::new(6.0, 2.0));
        assert_ne!(grid.state(end), CellState::Occupied);
    }

    #[test]
    fn test_exploration_ratio_increases_with_known_cells() {
        let maze = box_maze();
        let mut grid = OccupancyGrid::new(&maze, 0.1);
        let before = grid.exploration_ratio();

        let pose = Pose::new(2.0, 2.0, 0.0);
        let n = 90;
        let ranges: Vec<f64> = (0..n).map(|_| 1.8).collect();
        let frame_hits = vec![false; n];
        let scan = RangeScan::new(ranges, frame_hits, 4.0);
        grid.integrate_scan(&pose, &scan);

        let after = grid.exploration_ratio();
        assert!(after > before);
        assert!(after <= 1.0);
    }

    #[test]
    fn test_exploration_ratio_capped_at_one() {
        let maze = box_maze();
        let mut grid = OccupancyGrid::new(&maze, 0.1);
        for (c, _) in grid.iter_cells().collect::<Vec<_>>() {
            grid.add(c, log_occ() * 2.0);
        }
        assert!((grid.exploration_ratio() - 1.0).abs() < 1e-9);
    }
}

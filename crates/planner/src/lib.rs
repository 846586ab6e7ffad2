//! Eight-connected A* path planner with corner-safety rules.
//!
//! Built in the idiom the rest of the workspace uses for grid work
//! (`transforms::GridCell` keys, `costmap::OccupancyGrid`'s cell indexing
//! conventions) rather than pulling in a pathfinding crate.

use costmap::OccupancyGrid;
use maze::Maze;
use nalgebra::Vector2;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use transforms::{point_segment_distance, GridCell};

/// Safety margin used by the cost map's distance-based penalty.
const D_SAFE: f64 = 0.5;
/// Flat cost assigned to an unmapped cell.
const UNKNOWN_COST: f64 = 50.0;
/// Occupancy threshold used for the cost map's occupied mask: a fraction of
/// `log_occ()`, distinct from (and more permissive than)
/// `costmap::KNOWN_THRESHOLD`.
const OCC_MASK_FRACTION: f64 = 0.8;
/// Minimum wall clearance a diagonal step or smoothed segment must keep.
const DIAGONAL_CLEARANCE: f64 = 0.4;
/// Sampling resolution (in cells) used when checking diagonal-step safety.
const SAMPLE_RESOLUTION_CELLS: f64 = 0.1;
/// Expansion cap applied to searches invoked during exploration.
const EXPANSION_CAP: usize = 1000;
/// Penalty added to cells on the outward side of a discovered exit's
/// half-plane while the controller is finishing exploration.
const EXIT_OUTWARD_PENALTY: f64 = 10_000.0;

const SQRT2: f64 = std::f64::consts::SQRT_2;

/// The half-plane boundary used by the "finish exploration" cost penalty:
/// a line through `origin` with outward unit normal `outward` (the exit
/// pose's position and heading direction). A cell is on the
/// outward side when `(cell - origin) . outward > 0`.
#[derive(Debug, Clone, Copy)]
pub struct ExitHalfPlane {
    pub origin: Vector2<f64>,
    pub outward: Vector2<f64>,
}

/// Per-cell traversal cost derived from an occupancy grid.
struct CostMap {
    cols: i64,
    rows: i64,
    resolution: f64,
    origin: Vector2<f64>,
    cost: Vec<f64>,
}

impl CostMap {
    fn build(grid: &OccupancyGrid, exit_penalty: Option<ExitHalfPlane>) -> Self {
        let cols = grid.cols();
        let rows = grid.rows();
        let n = (cols * rows) as usize;
        let occ_threshold = OCC_MASK_FRACTION * costmap::log_occ();

        let mut occ_mask = vec![false; n];
        let mut unknown = vec![false; n];
        let mut dist = vec![f64::INFINITY; n];

        for j in 0..rows {
            for i in 0..cols {
                let cell = GridCell::new(i, j);
                let idx = (j * cols + i) as usize;
                match grid.log_odds(cell) {
                    Some(l) if l > occ_threshold => {
                        occ_mask[idx] = true;
                        dist[idx] = 0.0;
                    }
                    Some(l) if l.abs() <= costmap::KNOWN_THRESHOLD => unknown[idx] = true,
                    None => unknown[idx] = true,
                    _ => {}
                }
            }
        }

        chamfer_distance_transform(&mut dist, cols, rows);

        let resolution = grid.resolution();
        let origin = grid.origin();
        let mut cost = vec![0.0; n];
        for j in 0..rows {
            for i in 0..cols {
                let idx = (j * cols + i) as usize;
                cost[idx] = if occ_mask[idx] {
                    f64::INFINITY
                } else if unknown[idx] {
                    UNKNOWN_COST
                } else {
                    // `dist` is in cell-step units (chamfer weights 1.0 / sqrt(2));
                    // convert to meters before comparing against `D_SAFE`.
                    let dist_m = dist[idx] * resolution;
                    let clipped = (D_SAFE - dist_m).clamp(0.0, D_SAFE);
                    clipped * clipped
                };

                if let Some(exit) = exit_penalty {
                    if cost[idx].is_finite() {
                        let world = Vector2::new(
                            origin.x + (i as f64 + 0.5) * resolution,
                            origin.y + (j as f64 + 0.5) * resolution,
                        );
                        if (world - exit.origin).dot(&exit.outward) > 0.0 {
                            cost[idx] += EXIT_OUTWARD_PENALTY;
                        }
                    }
                }
            }
        }

        Self {
            cols,
            rows,
            resolution: grid.resolution(),
            origin: grid.origin(),
            cost,
        }
    }

    fn in_bounds(&self, c: GridCell) -> bool {
        c.i >= 0 && c.i < self.cols && c.j >= 0 && c.j < self.rows
    }

    fn cost(&self, c: GridCell) -> f64 {
        if !self.in_bounds(c) {
            return f64::INFINITY;
        }
        self.cost[(c.j * self.cols + c.i) as usize]
    }

    fn is_occupied(&self, c: GridCell) -> bool {
        self.cost(c).is_infinite()
    }

    fn cell_to_world(&self, c: GridCell) -> Vector2<f64> {
        Vector2::new(
            self.origin.x + (c.i as f64 + 0.5) * self.resolution,
            self.origin.y + (c.j as f64 + 0.5) * self.resolution,
        )
    }

    fn world_to_cell(&self, p: Vector2<f64>) -> GridCell {
        GridCell::new(
            ((p.x - self.origin.x) / self.resolution).floor() as i64,
            ((p.y - self.origin.y) / self.resolution).floor() as i64,
        )
    }
}

/// Two-pass chamfer (1, sqrt(2)) distance transform, an approximation of
/// the Euclidean distance to the nearest seeded (zero) cell.
fn chamfer_distance_transform(dist: &mut [f64], cols: i64, rows: i64) {
    let idx = |i: i64, j: i64| (j * cols + i) as usize;

    for j in 0..rows {
        for i in 0..cols {
            let mut best = dist[idx(i, j)];
            let neighbors: &[(i64, i64, f64)] = &[
                (-1, 0, 1.0),
                (0, -1, 1.0),
                (-1, -1, SQRT2),
                (1, -1, SQRT2),
            ];
            for (di, dj, w) in neighbors {
                let ni = i + di;
                let nj = j + dj;
                if ni >= 0 && ni < cols && nj >= 0 && nj < rows {
                    best = best.min(dist[idx(ni, nj)] + w);
                }
            }
            dist[idx(i, j)] = best;
        }
    }

    for j in (0..rows).rev() {
        for i in (0..cols).rev() {
            let mut best = dist[idx(i, j)];
            let neighbors: &[(i64, i64, f64)] = &[
                (1, 0, 1.0),
                (0, 1, 1.0),
                (1, 1, SQRT2),
                (-1, 1, SQRT2),
            ];
            for (di, dj, w) in neighbors {
                let ni = i + di;
                let nj = j + dj;
                if ni >= 0 && ni < cols && nj >= 0 && nj < rows {
                    best = best.min(dist[idx(ni, nj)] + w);
                }
            }
            dist[idx(i, j)] = best;
        }
    }
}

/// A planned path: world-space waypoints (cell centers) in order from start
/// to goal, and its total traversal cost.
#[derive(Debug, Clone)]
pub struct Path {
    pub waypoints: Vec<Vector2<f64>>,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapNode {
    f: f64,
    g: f64,
    cell: GridCell,
}

impl Eq for HeapNode {}

impl Ord for HeapNode {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.f.partial_cmp(&self.f) {
            Some(Ordering::Equal) | None => {
                (self.cell.i, self.cell.j).cmp(&(other.cell.i, other.cell.j)).reverse()
            }
            Some(ord) => ord,
        }
    }
}

impl PartialOrd for HeapNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn octile_heuristic(a: GridCell, b: GridCell) -> f64 {
    let dx = (a.i - b.i).unsigned_abs() as f64;
    let dy = (a.j - b.j).unsigned_abs() as f64;
    dx.max(dy) - dx.min(dy) + SQRT2 * dx.min(dy)
}

const EIGHT_NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Plan an eight-connected path from `start` to `goal`. When
/// `capped` is true the search aborts (returning `None`) after 1000
/// expansions, matching the limit applied during live exploration;
/// optimal final-path queries should pass `capped = false`.
pub fn plan(grid: &OccupancyGrid, maze: &Maze, start: Vector2<f64>, goal: Vector2<f64>, capped: bool) -> Option<Path> {
    plan_inner(grid, maze, start, goal, capped, None)
}

/// Plan exactly as `plan`, but additionally penalize every cell on the
/// outward side of `exit`'s half-plane by a large constant, so the search
/// prefers staying inside the maze while still allowing the exit itself to
/// be reached.
pub fn plan_avoiding_exit(
    grid: &OccupancyGrid,
    maze: &Maze,
    start: Vector2<f64>,
    goal: Vector2<f64>,
    capped: bool,
    exit: ExitHalfPlane,
) -> Option<Path> {
    plan_inner(grid, maze, start, goal, capped, Some(exit))
}

fn plan_inner(
    grid: &OccupancyGrid,
    maze: &Maze,
    start: Vector2<f64>,
    goal: Vector2<f64>,
    capped: bool,
    exit_penalty: Option<ExitHalfPlane>,
) -> Option<Path> {
    let cost_map = CostMap::build(grid, exit_penalty);
    let start_cell = cost_map.world_to_cell(start);
    let goal_cell = cost_map.world_to_cell(goal);

    if cost_map.is_occupied(start_cell) || cost_map.is_occupied(goal_cell) {
        return None;
    }

    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<GridCell, f64> = HashMap::new();
    let mut came_from: HashMap<GridCell, GridCell> = HashMap::new();

    g_score.insert(start_cell, 0.0);
    open.push(HeapNode {
        f: octile_heuristic(start_cell, goal_cell),
        g: 0.0,
        cell: start_cell,
    });

    let mut expansions = 0usize;

    while let Some(HeapNode { g, cell, .. }) = open.pop() {
        if cell == goal_cell {
            return Some(reconstruct_path(&cost_map, &came_from, cell, g));
        }

        if let Some(&best) = g_score.get(&cell) {
            if g > best {
                continue;
            }
        }

        expansions += 1;
        if capped && expansions > EXPANSION_CAP {
            return None;
        }

        for (di, dj) in EIGHT_NEIGHBORS {
            let neighbor = GridCell::new(cell.i + di, cell.j + dj);
            if cost_map.is_occupied(neighbor) {
                continue;
            }

            let diagonal = di != 0 && dj != 0;
            let step_cost = if diagonal {
                if !diagonal_safe(&cost_map, maze, cell, di, dj) {
                    continue;
                }
                SQRT2
            } else {
                1.0
            };

            let tentative_g = g + step_cost + cost_map.cost(neighbor);
            let better = match g_score.get(&neighbor) {
                Some(&existing) => tentative_g < existing,
                None => true,
            };
            if better {
                g_score.insert(neighbor, tentative_g);
                came_from.insert(neighbor, cell);
                open.push(HeapNode {
                    f: tentative_g + octile_heuristic(neighbor, goal_cell),
                    g: tentative_g,
                    cell: neighbor,
                });
            }
        }
    }

    None
}

fn reconstruct_path(
    cost_map: &CostMap,
    came_from: &HashMap<GridCell, GridCell>,
    goal: GridCell,
    total_cost: f64,
) -> Path {
    let mut cells = vec![goal];
    let mut current = goal;
    while let Some(&prev) = came_from.get(&current) {
        cells.push(prev);
        current = prev;
    }
    cells.reverse();
    let waypoints = cells.into_iter().map(|c| cost_map.cell_to_world(c)).collect();
    Path {
        waypoints,
        cost: total_cost,
    }
}

/// No-corner-cut rule: a diagonal step is admissible only if
/// both axis-aligned intermediates are non-occupied and step-valid, and
/// every point sampled along the diagonal at 0.1-cell resolution keeps at
/// least 0.4 m clearance from every wall.
fn diagonal_safe(cost_map: &CostMap, maze: &Maze, from: GridCell, di: i64, dj: i64) -> bool {
    let ortho1 = GridCell::new(from.i + di, from.j);
    let ortho2 = GridCell::new(from.i, from.j + dj);
    if cost_map.is_occupied(ortho1) || cost_map.is_occupied(ortho2) {
        return false;
    }

    let from_world = cost_map.cell_to_world(from);
    let ortho1_world = cost_map.cell_to_world(ortho1);
    let ortho2_world = cost_map.cell_to_world(ortho2);
    if !maze.step_ok(from_world, ortho1_world) || !maze.step_ok(from_world, ortho2_world) {
        return false;
    }

    let target = GridCell::new(from.i + di, from.j + dj);
    let target_world = cost_map.cell_to_world(target);
    segment_clear(from_world, target_world, maze)
}

/// Samples `a..b` at `0.1`-cell resolution, requiring ≥0.4 m clearance from
/// every wall segment at each sample. Used both for single diagonal steps
/// (§4.6.2) and for path smoothing (§4.6.3).
fn segment_clear(a: Vector2<f64>, b: Vector2<f64>, maze: &Maze) -> bool {
    let steps = (1.0 / SAMPLE_RESOLUTION_CELLS).round() as usize;
    for k in 0..=steps {
        let t = k as f64 / steps as f64;
        let p = a + (b - a) * t;
        for seg in maze.segments() {
            if point_segment_distance(p, seg) < DIAGONAL_CLEARANCE {
                return false;
            }
        }
    }
    true
}

/// A straight segment between two arbitrary waypoints is smoothing-safe iff
/// it crosses no wall and maintains the 0.4 m clearance along its whole
/// length, sampled every 0.1 m (generalizing §4.6.2's single-cell check to
/// an arbitrary-length segment).
fn smoothing_safe(a: Vector2<f64>, b: Vector2<f64>, maze: &Maze) -> bool {
    if !maze.step_ok(a, b) {
        return false;
    }
    let len = (b - a).norm();
    let steps = (len / SAMPLE_RESOLUTION_CELLS).ceil().max(1.0) as usize;
    for k in 0..=steps {
        let t = k as f64 / steps as f64;
        let p = a + (b - a) * t;
        for seg in maze.segments() {
            if point_segment_distance(p, seg) < DIAGONAL_CLEARANCE {
                return false;
            }
        }
    }
    true
}

/// Greedy path smoothing: for the optimal path only, replace
/// runs of intermediate waypoints by a direct segment wherever that segment
/// is smoothing-safe.
pub fn smooth(waypoints: &[Vector2<f64>], maze: &Maze) -> Vec<Vector2<f64>> {
    if waypoints.len() <= 2 {
        return waypoints.to_vec();
    }

    let mut result = vec![waypoints[0]];
    let mut i = 0;
    while i < waypoints.len() - 1 {
        let mut j = waypoints.len() - 1;
        while j > i + 1 && !smoothing_safe(waypoints[i], waypoints[j], maze) {
            j -= 1;
        }
        result.push(waypoints[j]);
        i = j;
    }
    result
}

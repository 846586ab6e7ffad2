//! Frontier extraction, clustering, scoring and aging.
//!
//! Built in the idiom of `costmap::OccupancyGrid`'s grid-indexing
//! conventions (`world_to_cell`/`cell_to_world`, `GridCell` keys) and dense
//! `HashMap`-by-small-key storage rather than interior pointers, matching
//! the arena style the rest of this workspace uses for keyframes and edges.

use costmap::{CellState, OccupancyGrid};
use maze::Maze;
use nalgebra::Vector2;
use std::collections::{HashMap, HashSet};
use transforms::{point_segment_distance, GridCell, Segment};

/// Thin margin subtracted from the extended region bounds; a frontier
/// candidate exactly on the boundary of the extended region is discarded.
const OUTER_MARGIN: f64 = 0.1;
/// Minimum clearance a frontier candidate must keep from every wall.
const WALL_CLEARANCE: f64 = 0.3;
/// A frontier not re-validated for this many ticks, with no unknown
/// neighbours left, is removed.
const STALE_TICKS: u64 = 5;
/// A frontier older than this, with a low value, is removed regardless of
/// staleness.
const MAX_AGE_TICKS: u64 = 20;
const MAX_AGE_VALUE_THRESHOLD: f64 = 0.3;

/// A tracked frontier cell and its bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct Frontier {
    pub cell: GridCell,
    pub position: Vector2<f64>,
    pub birth_tick: u64,
    pub last_seen_tick: u64,
    pub discovery_count: u32,
    pub nearby_unknown_count: u32,
    pub value: f64,
}

impl Frontier {
    fn age(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.birth_tick)
    }

    fn staleness(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.last_seen_tick)
    }
}

/// Owns the current set of tracked frontiers, keyed by grid cell so
/// bookkeeping survives from one update to the next.
#[derive(Debug, Clone, Default)]
pub struct FrontierEngine {
    frontiers: HashMap<GridCell, Frontier>,
}

impl FrontierEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frontiers(&self) -> impl Iterator<Item = &Frontier> {
        self.frontiers.values()
    }

    pub fn len(&self) -> usize {
        self.frontiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frontiers.is_empty()
    }

    /// Recompute the frontier set against the current occupancy grid.
    pub fn update(&mut self, grid: &OccupancyGrid, maze: &Maze, tick: u64) {
        let candidates = generate_candidates(grid);

        let mut seen_this_tick: HashSet<GridCell> = HashSet::new();

        for (cell, free_parent) in &candidates {
            let position = grid.cell_to_world(*cell);
            let nearby_unknown = nearby_unknown_count(grid, *cell);

            if !validate_candidate(grid, maze, *cell, position, *free_parent, nearby_unknown) {
                continue;
            }

            seen_this_tick.insert(*cell);
            let entry = self.frontiers.entry(*cell).or_insert_with(|| Frontier {
                cell: *cell,
                position,
                birth_tick: tick,
                last_seen_tick: tick,
                discovery_count: 0,
                nearby_unknown_count: 0,
                value: 0.0,
            });
            entry.last_seen_tick = tick;
            entry.discovery_count += 1;
            entry.nearby_unknown_count = nearby_unknown;
            entry.value = score(maze, position, entry.nearby_unknown_count, entry.discovery_count, entry.age(tick));
        }

        // Cells that used to be frontiers but weren't revalidated this tick:
        // if their neighbourhood is already fully known, drop them
        // immediately: a frontier whose 5x5 neighbourhood becomes known
        // before age 20 is removed by the next update, not left to the
        // staleness timer.
        for (cell, frontier) in self.frontiers.iter_mut() {
            if seen_this_tick.contains(cell) {
                continue;
            }
            frontier.nearby_unknown_count = nearby_unknown_count(grid, *cell);
        }

        self.frontiers.retain(|_, f| {
            if f.staleness(tick) > STALE_TICKS && f.nearby_unknown_count == 0 {
                return false;
            }
            if f.age(tick) > MAX_AGE_TICKS && f.value < MAX_AGE_VALUE_THRESHOLD {
                return false;
            }
            true
        });
    }

    /// Select the best frontier to pursue: prefer
    /// frontiers in the accessible (nominal maze extent) region, falling
    /// back to extended-region frontiers only when none are accessible.
    /// `excluded` filters out frontiers at "recently visited" positions.
    pub fn select_target(
        &self,
        robot_pos: Vector2<f64>,
        maze: &Maze,
        excluded: &dyn Fn(Vector2<f64>) -> bool,
    ) -> Option<Vector2<f64>> {
        let d_max = {
            let w = maze.width() + 2.0 * maze::EXTENDED_MARGIN;
            let h = maze.height() + 2.0 * maze::EXTENDED_MARGIN;
            (w * w + h * h).sqrt()
        };

        let mut best_accessible: Option<(&Frontier, f64)> = None;
        let mut best_extended: Option<(&Frontier, f64)> = None;

        for frontier in self.frontiers.values() {
            if excluded(frontier.position) {
                continue;
            }
            let d = (frontier.position - robot_pos).norm();
            let selection_score = 0.6 * frontier.value + 0.4 * (1.0 - (d / d_max).min(1.0));
            let slot = if is_accessible(maze, frontier.position) {
                &mut best_accessible
            } else {
                &mut best_extended
            };
            let better = match slot {
                Some((incumbent, incumbent_score)) => {
                    selection_score > *incumbent_score
                        || (selection_score == *incumbent_score
                            && (frontier.cell.i, frontier.cell.j)
                                < (incumbent.cell.i, incumbent.cell.j))
                }
                None => true,
            };
            if better {
                *slot = Some((frontier, selection_score));
            }
        }

        best_accessible
            .or(best_extended)
            .map(|(frontier, _)| frontier.position)
    }
}

fn is_accessible(maze: &Maze, w: Vector2<f64>) -> bool {
    w.x >= 0.0 && w.x <= maze.width() && w.y >= 0.0 && w.y <= maze.height()
}

/// For every free cell, collect its unknown 8-neighbours as candidates,
/// remembering one free parent cell for the `step_ok` validation check.
fn generate_candidates(grid: &OccupancyGrid) -> HashMap<GridCell, GridCell> {
    let mut candidates = HashMap::new();
    for (cell, log_odds) in grid.iter_cells() {
        if log_odds >= -costmap::KNOWN_THRESHOLD {
            continue; // not a free cell
        }
        for (di, dj) in NEIGHBOR_OFFSETS {
            let neighbor = GridCell::new(cell.i + di, cell.j + dj);
            if grid.state(neighbor) == CellState::Unknown {
                candidates.entry(neighbor).or_insert(cell);
            }
        }
    }
    candidates
}

const NEIGHBOR_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

fn nearby_unknown_count(grid: &OccupancyGrid, cell: GridCell) -> u32 {
    let mut count = 0u32;
    for dj in -1..=1 {
        for di in -1..=1 {
            let c = GridCell::new(cell.i + di, cell.j + dj);
            if grid.state(c) == CellState::Unknown {
                count += 1;
            }
        }
    }
    count
}

#[allow(clippy::too_many_arguments)]
fn validate_candidate(
    grid: &OccupancyGrid,
    maze: &Maze,
    candidate: GridCell,
    position: Vector2<f64>,
    free_parent: GridCell,
    nearby_unknown: u32,
) -> bool {
    let (lo, hi) = maze.extended_bounds();
    if position.x < lo.x + OUTER_MARGIN
        || position.x > hi.x - OUTER_MARGIN
        || position.y < lo.y + OUTER_MARGIN
        || position.y > hi.y - OUTER_MARGIN
    {
        return false;
    }

    if nearby_unknown < 2 {
        return false;
    }

    for seg in maze.segments() {
        if point_segment_distance(position, seg) < WALL_CLEARANCE {
            return false;
        }
    }

    if is_accessible(maze, position) {
        let parent_world = grid.cell_to_world(free_parent);
        if !maze.step_ok(parent_world, position) {
            return false;
        }
    }

    true
}

fn score(maze: &Maze, position: Vector2<f64>, nearby_unknown: u32, discovery_count: u32, age: u64) -> f64 {
    let unknown_term = 0.4 * (nearby_unknown as f64 / 10.0).min(1.0);
    let discovery_term = 0.2 * (discovery_count as f64 / 5.0).min(1.0);
    let boundary_term = 0.3 * boundary_bonus(maze, position);
    let age_decay = (1.0 - age as f64 / MAX_AGE_TICKS as f64).clamp(0.0, 1.0);
    let age_term = 0.1 * age_decay;
    unknown_term + discovery_term + boundary_term + age_term
}

/// Distance-banded bonus for proximity to an interior maze boundary,
/// halved when the candidate itself sits in the extended (unreachable)
/// band.
fn boundary_bonus(maze: &Maze, position: Vector2<f64>) -> f64 {
    let nearest = nearest_wall_distance(maze.segments(), position);
    let base = if nearest <= 1.0 {
        0.8
    } else if nearest <= 2.0 {
        0.6
    } else {
        0.4
    };
    if is_accessible(maze, position) {
        base
    } else {
        base / 2.0
    }
}

fn nearest_wall_distance(segments: &[Segment], position: Vector2<f64>) -> f64 {
    segments
        .iter()
        .map(|seg| point_segment_distance(position, seg))
        .fold(f64::INFINITY, f64::min)
}

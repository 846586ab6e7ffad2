//! Maze model: wall segments, start point, and a dilated obstacle raster.
//!
//! The maze is built once at startup from an externally supplied list of
//! wall segments and never mutated afterward (see the engine's map-loading
//! layer for how malformed input is rejected before a `Maze` is built).

use nalgebra::Vector2;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;
use transforms::{segments_intersect, GridCell, Segment};

/// Resolution of the dilated obstacle raster, in meters.
pub const RASTER_RESOLUTION: f64 = 0.05;
/// Robot radius used to dilate raw wall rasterization, in meters.
pub const ROBOT_RADIUS: f64 = 0.15;
/// Margin added on each side of the nominal `[0, W] x [0, H]` extent to form
/// the extended region used by the mapper and exit detection.
pub const EXTENDED_MARGIN: f64 = 2.0;

#[derive(Error, Debug)]
pub enum MazeError {
    #[error("segment {index} has zero length")]
    ZeroLengthSegment { index: usize },
    #[error("start point ({x}, {y}) lies on an obstacle")]
    StartOnObstacle { x: f64, y: f64 },
    #[error("start point ({x}, {y}) lies outside the maze extent [0, {width}] x [0, {height}]")]
    StartOutOfBounds {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

/// Owns the wall segment list, the start point, and the dilated obstacle
/// raster. Answers "can the robot step from A to B?" via `step_ok`.
#[derive(Debug, Clone)]
pub struct Maze {
    segments: Vec<Segment>,
    start: Vector2<f64>,
    width: f64,
    height: f64,
    raster: HashSet<GridCell>,
}

impl Maze {
    /// Build a maze from wall segments, a start point, and the nominal
    /// extent `[0, W] x [0, H]`. Rejects zero-length segments and a start
    /// point that falls on an obstacle or outside the extent.
    pub fn new(
        mut segments: Vec<Segment>,
        start: Vector2<f64>,
        width: f64,
        height: f64,
    ) -> Result<Self, MazeError> {
        for (index, seg) in segments.iter().enumerate() {
            if seg.length() < 1e-9 {
                return Err(MazeError::ZeroLengthSegment { index });
            }
        }

        if start.x < 0.0 || start.x > width || start.y < 0.0 || start.y > height {
            return Err(MazeError::StartOutOfBounds {
                x: start.x,
                y: start.y,
                width,
                height,
            });
        }

        if let Some(stub) = virtual_entrance_wall(start, width, height) {
            debug!(x = start.x, y = start.y, "Inserting virtual entrance wall");
            segments.push(stub);
        }

        let raster = build_dilated_raster(&segments, width, height);

        if raster.contains(&world_to_raster_cell(start)) {
            return Err(MazeError::StartOnObstacle {
                x: start.x,
                y: start.y,
            });
        }

        Ok(Self {
            segments,
            start,
            width,
            height,
            raster,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn start(&self) -> Vector2<f64> {
        self.start
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// The extended region `[-2, W+2] x [-2, H+2]`.
    pub fn extended_bounds(&self) -> (Vector2<f64>, Vector2<f64>) {
        (
            Vector2::new(-EXTENDED_MARGIN, -EXTENDED_MARGIN),
            Vector2::new(self.width + EXTENDED_MARGIN, self.height + EXTENDED_MARGIN),
        )
    }

    pub fn in_extended_region(&self, p: Vector2<f64>) -> bool {
        let (lo, hi) = self.extended_bounds();
        p.x >= lo.x && p.x <= hi.x && p.y >= lo.y && p.y <= hi.y
    }

    /// The four outer straight lines bounding the extended region, used to
    /// classify rays that escape through a gap as exit-candidates.
    pub fn outer_frame(&self) -> [Segment; 4] {
        let (lo, hi) = self.extended_bounds();
        [
            Segment::new(Vector2::new(lo.x, lo.y), Vector2::new(hi.x, lo.y)), // south
            Segment::new(Vector2::new(hi.x, lo.y), Vector2::new(hi.x, hi.y)), // east
            Segment::new(Vector2::new(hi.x, hi.y), Vector2::new(lo.x, hi.y)), // north
            Segment::new(Vector2::new(lo.x, hi.y), Vector2::new(lo.x, lo.y)), // west
        ]
    }

    /// True iff the open segment `a`-`b` crosses no wall segment and `b`
    /// lies within the extended region.
    pub fn step_ok(&self, a: Vector2<f64>, b: Vector2<f64>) -> bool {
        if !self.in_extended_region(b) {
            return false;
        }
        let step = Segment::new(a, b);
        !self.segments.iter().any(|wall| segments_intersect(&step, wall))
    }

    /// True iff the raster cell containing `p` is a dilated obstacle cell.
    pub fn is_obstacle(&self, p: Vector2<f64>) -> bool {
        self.raster.contains(&world_to_raster_cell(p))
    }

    pub fn raster_cells(&self) -> impl Iterator<Item = &GridCell> {
        self.raster.iter()
    }
}

fn world_to_raster_cell(p: Vector2<f64>) -> GridCell {
    GridCell::new(
        (p.x / RASTER_RESOLUTION).floor() as i64,
        (p.y / RASTER_RESOLUTION).floor() as i64,
    )
}

#[cfg(test)]
fn raster_cell_to_world(c: GridCell) -> Vector2<f64> {
    Vector2::new(
        (c.i as f64 + 0.5) * RASTER_RESOLUTION,
        (c.j as f64 + 0.5) * RASTER_RESOLUTION,
    )
}

/// Rasterize every segment into occupied cells over `[0, W] x [0, H]`, then
/// dilate by `ROBOT_RADIUS` so step-validity checks need only consult a
/// single cell. Dilation is monotonic: the result is always a superset of
/// the raw rasterized cells.
fn build_dilated_raster(segments: &[Segment], width: f64, height: f64) -> HashSet<GridCell> {
    let cols = (width / RASTER_RESOLUTION).ceil() as i64;
    let rows = (height / RASTER_RESOLUTION).ceil() as i64;

    let mut raw = HashSet::new();
    for seg in segments {
        let start = world_to_raster_cell(seg.a);
        let end = world_to_raster_cell(seg.b);
        for cell in transforms::bresenham_line(start, end) {
            if cell.i >= 0 && cell.i < cols && cell.j >= 0 && cell.j < rows {
                raw.insert(cell);
            }
        }
    }

    let radius_cells = (ROBOT_RADIUS / RASTER_RESOLUTION).ceil() as i64;
    let mut dilated = raw.clone();
    for cell in &raw {
        for di in -radius_cells..=radius_cells {
            for dj in -radius_cells..=radius_cells {
                if (di * di + dj * dj) as f64 <= (radius_cells * radius_cells) as f64 {
                    let neighbor = GridCell::new(cell.i + di, cell.j + dj);
                    if neighbor.i >= 0 && neighbor.i < cols && neighbor.j >= 0 && neighbor.j < rows
                    {
                        dilated.insert(neighbor);
                    }
                }
            }
        }
    }

    dilated
}

/// If the start point lies exactly on one of the four boundary lines of the
/// nominal extent, insert a short wall stub that blocks the robot from
/// stepping directly out through its own entrance on tick zero, without
/// occupying the start cell itself. Returns `None` when the start point is
/// strictly interior.
fn virtual_entrance_wall(start: Vector2<f64>, width: f64, height: f64) -> Option<Segment> {
    const EPS: f64 = 1e-6;
    const STUB_LEN: f64 = 0.4;

    let on_south = start.y.abs() < EPS;
    let on_north = (start.y - height).abs() < EPS;
    let on_west = start.x.abs() < EPS;
    let on_east = (start.x - width).abs() < EPS;

    if on_south || on_north {
        let dir = if start.x + STUB_LEN <= width { 1.0 } else { -1.0 };
        let y = if on_south { 0.0 } else { height };
        return Some(Segment::new(
            Vector2::new(start.x, y),
            Vector2::new(start.x + dir * STUB_LEN, y),
        ));
    }
    if on_west || on_east {
        let dir = if start.y + STUB_LEN <= height { 1.0 } else { -1.0 };
        let x = if on_west { 0.0 } else { width };
        return Some(Segment::new(
            Vector2::new(x, start.y),
            Vector2::new(x, start.y + dir * STUB_LEN),
        ));
    }
    None
}

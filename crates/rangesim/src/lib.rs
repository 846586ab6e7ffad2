//! Simulated 360-degree range scanner.
//!
//! Casts `num_rays` equi-spaced rays from the robot's pose against a
//! `maze::Maze`: each ray keeps the closest of every interior wall segment
//! and the four outer-frame segments bounding the extended region, with
//! ties going to the interior hit. The outer frame is a simulation
//! boundary, not a real wall, so a ray whose closest hit is the outer frame
//! registers as a plain `max_range` reading (never the true, shorter
//! distance) and is tagged a "frame hit" so the occupancy mapper never
//! turns it into a phantom obstacle at the edge of the world.

use maze::Maze;
use transforms::{ray_segment_intersection, Ray, Segment};
use types::{Pose, RangeScan};

/// Configuration for the simulated scanner.
#[derive(Debug, Clone, Copy)]
pub struct RangeSimConfig {
    /// Rays per 360-degree scan.
    pub num_rays: usize,
    /// Scan truncation distance, in meters.
    pub max_range: f64,
}

impl Default for RangeSimConfig {
    fn default() -> Self {
        Self {
            num_rays: 90,
            max_range: 4.0,
        }
    }
}

/// Stateless simulated range scanner. Holds only configuration — every
/// scan is a pure function of the maze and the pose it's cast from.
#[derive(Debug, Clone)]
pub struct RangeSim {
    config: RangeSimConfig,
}

impl RangeSim {
    pub fn new(config: RangeSimConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RangeSimConfig {
        &self.config
    }

    /// Cast a full scan from `pose` against `maze`.
    pub fn scan(&self, maze: &Maze, pose: &Pose) -> RangeScan {
        let n = self.config.num_rays;
        let mut ranges = Vec::with_capacity(n);
        let mut frame_hits = Vec::with_capacity(n);

        for i in 0..n {
            let angle = pose.theta + i as f64 * (std::f64::consts::TAU / n as f64);
            let (d, is_frame_hit) = cast_ray(maze, pose.x, pose.y, angle, self.config.max_range);
            ranges.push(d);
            frame_hits.push(is_frame_hit);
        }

        RangeScan::new(ranges, frame_hits, self.config.max_range)
    }

    /// Number of rays in the last scan whose closest hit was the outer
    /// frame rather than an interior wall.
    pub fn boundary_hit_count(&self, scan: &RangeScan) -> usize {
        scan.frame_hits.iter().filter(|&&hit| hit).count()
    }
}

/// Cast one ray from `(x, y)` at absolute `angle` against every interior
/// wall segment and the four outer-frame segments, returning the distance
/// to the closest hit (clipped to `max_range`) and whether that hit lies
/// on the outer frame. A frame hit always reports `max_range`: the outer
/// frame bounds the simulation, not a physical obstacle, so the sensor
/// never sees it as anything closer than a miss.
fn cast_ray(maze: &Maze, x: f64, y: f64, angle: f64, max_range: f64) -> (f64, bool) {
    let origin = nalgebra::Vector2::new(x, y);
    let direction = nalgebra::Vector2::new(angle.cos(), angle.sin());
    let ray = Ray::new(origin, direction);

    let closest_interior = closest_hit(&ray, maze.segments().iter());
    let closest_frame = closest_hit(&ray, maze.outer_frame().iter());

    let candidate = match (closest_interior, closest_frame) {
        (Some(ti), Some(tf)) if tf < ti => Some((tf, true)),
        (Some(ti), Some(_)) => Some((ti, false)),
        (Some(ti), None) => Some((ti, false)),
        (None, Some(tf)) => Some((tf, true)),
        (None, None) => None,
    };

    match candidate {
        Some((t, true)) if t <= max_range => (max_range, true),
        Some((t, false)) if t <= max_range => (t, false),
        _ => (max_range, false),
    }
}

fn closest_hit<'a>(ray: &Ray, segments: impl Iterator<Item = &'a Segment>) -> Option<f64> {
    segments
        .filter_map(|seg| ray_segment_intersection(ray, seg))
        .fold(None, |acc, t| match acc {
            Some(best) if best <= t => Some(best),
            _ => Some(t),
        })
}

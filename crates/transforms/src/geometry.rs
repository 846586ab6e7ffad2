//! Stateless 2D geometry primitives: segments, rays, Bresenham rasterization,
//! and point-to-segment distance.
//!
//! These underpin the maze model (`maze`), the range simulator (`rangesim`),
//! and the occupancy mapper (`costmap`): all of them need the same handful
//! of primitives, so they live here rather than being duplicated per crate.

use nalgebra::Vector2;

/// An immutable line segment between two points, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub a: Vector2<f64>,
    pub b: Vector2<f64>,
}

impl Segment {
    pub fn new(a: Vector2<f64>, b: Vector2<f64>) -> Self {
        Self { a, b }
    }

    pub fn length(&self) -> f64 {
        (self.b - self.a).norm()
    }
}

/// A ray: origin plus direction. Direction need not be unit length for
/// `ray_segment_intersection`, but callers typically pass a unit vector.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vector2<f64>,
    pub direction: Vector2<f64>,
}

impl Ray {
    pub fn new(origin: Vector2<f64>, direction: Vector2<f64>) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, t: f64) -> Vector2<f64> {
        self.origin + self.direction * t
    }
}

/// An integer grid cell index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    pub i: i64,
    pub j: i64,
}

impl GridCell {
    pub fn new(i: i64, j: i64) -> Self {
        Self { i, j }
    }
}

/// Intersect a ray with a line segment, returning the ray parameter `t`
/// (the distance along the ray, since `direction` is expected unit-length)
/// at the intersection point, or `None` if they do not cross within the
/// segment's bounds and the ray's forward half-line (`t >= 0`).
///
/// Standard parametric line-line intersection: solve
/// `origin + t*direction == a + s*(b-a)` for `t, s`, then require
/// `t >= 0` and `0 <= s <= 1`.
pub fn ray_segment_intersection(ray: &Ray, segment: &Segment) -> Option<f64> {
    let v1 = ray.origin - segment.a;
    let v2 = segment.b - segment.a;
    let v3 = Vector2::new(-ray.direction.y, ray.direction.x);

    let denom = v2.dot(&v3);
    if denom.abs() < 1e-12 {
        return None; // parallel
    }

    let t = (v2.x * v1.y - v2.y * v1.x) / denom;
    let s = v1.dot(&v3) / denom;

    if t >= 0.0 && (0.0..=1.0).contains(&s) {
        Some(t)
    } else {
        None
    }
}

/// Shortest Euclidean distance from a point to a segment.
pub fn point_segment_distance(point: Vector2<f64>, segment: &Segment) -> f64 {
    let ab = segment.b - segment.a;
    let len_sq = ab.norm_squared();
    if len_sq < 1e-12 {
        return (point - segment.a).norm();
    }
    let t = ((point - segment.a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    let closest = segment.a + ab * t;
    (point - closest).norm()
}

/// True iff two open segments (endpoints excluded) cross each other.
///
/// Uses the standard orientation test: `p1` crosses `p2` iff the endpoints
/// of each segment lie on opposite sides of the other segment's line.
pub fn segments_intersect(s1: &Segment, s2: &Segment) -> bool {
    fn orient(a: Vector2<f64>, b: Vector2<f64>, c: Vector2<f64>) -> f64 {
        (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
    }

    let d1 = orient(s2.a, s2.b, s1.a);
    let d2 = orient(s2.a, s2.b, s1.b);
    let d3 = orient(s1.a, s1.b, s2.a);
    let d4 = orient(s1.a, s1.b, s2.b);

    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Bresenham's line algorithm between two grid cells, inclusive of both
/// endpoints, in traversal order from `start` to `end`.
pub fn bresenham_line(start: GridCell, end: GridCell) -> Vec<GridCell> {
    let mut cells = Vec::new();

    let dx = (end.i - start.i).abs();
    let dy = -(end.j - start.j).abs();
    let sx = if start.i < end.i { 1 } else { -1 };
    let sy = if start.j < end.j { 1 } else { -1 };
    let mut err = dx + dy;

    let (mut x, mut y) = (start.i, start.j);
    loop {
        cells.push(GridCell::new(x, y));
        if x == end.i && y == end.j {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }

    cells
}

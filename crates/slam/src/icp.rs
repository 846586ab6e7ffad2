//! Point-to-point ICP (iterative closest point), used for loop-closure
//! alignment between two keyframes' local point clouds.

use nalgebra::{linalg::SVD, Matrix2, Vector2};

const MAX_ITERATIONS: usize = 20;
const CONVERGENCE_THRESHOLD: f64 = 1e-3;
const MIN_POINTS: usize = 5;

/// Result of aligning a source cloud onto a target cloud.
#[derive(Debug, Clone, Copy)]
pub struct IcpResult {
    /// Rotation angle of the total source->target transform.
    pub rotation: f64,
    /// Translation of the total source->target transform.
    pub translation: Vector2<f64>,
    /// Mean squared per-point residual after the final association.
    /// `f64::INFINITY` when alignment could not be attempted.
    pub residual: f64,
}

impl IcpResult {
    fn identity_failure() -> Self {
        Self {
            rotation: 0.0,
            translation: Vector2::zeros(),
            residual: f64::INFINITY,
        }
    }
}

/// Align `source` onto `target`, starting from `initial_rotation`/
/// `initial_translation` (e.g. the odometry-predicted relative pose
/// between the two keyframes). Degenerate input (either cloud has fewer
/// than 5 points) returns the identity transform with infinite residual
/// rather than failing — loop closure for this pair is simply skipped by
/// the caller.
pub fn icp(
    source: &[Vector2<f64>],
    target: &[Vector2<f64>],
    initial_rotation: f64,
    initial_translation: Vector2<f64>,
) -> IcpResult {
    if source.len() < MIN_POINTS || target.len() < MIN_POINTS {
        return IcpResult::identity_failure();
    }

    let mut total_rotation = initial_rotation;
    let mut total_translation = initial_translation;
    let mut transformed: Vec<Vector2<f64>> = source
        .iter()
        .map(|p| apply(initial_rotation, initial_translation, *p))
        .collect();

    let mut prev_error = f64::INFINITY;

    for _ in 0..MAX_ITERATIONS {
        let (matches, mean_error) = associate(&transformed, target);

        let src_centroid = centroid(&transformed);
        let tgt_centroid = centroid(&matches);

        let mut h = Matrix2::zeros();
        for (s, t) in transformed.iter().zip(matches.iter()) {
            let ds = s - src_centroid;
            let dt = t - tgt_centroid;
            h += ds * dt.transpose();
        }

        let svd = SVD::new(h, true, true);
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => break, // SVD failed (degenerate covariance); stop refining.
        };
        let mut r = v_t.transpose() * u.transpose();
        if r.determinant() < 0.0 {
            let mut v = v_t.transpose();
            for row in 0..2 {
                v[(row, 1)] = -v[(row, 1)];
            }
            r = v * u.transpose();
        }
        let t = tgt_centroid - r * src_centroid;
        let dtheta = r[(1, 0)].atan2(r[(0, 0)]);

        transformed = transformed.iter().map(|p| r * p + t).collect();
        total_rotation = transforms::normalize_angle(total_rotation + dtheta);
        total_translation = r * total_translation + t;

        if (prev_error - mean_error).abs() < CONVERGENCE_THRESHOLD {
            prev_error = mean_error;
            break;
        }
        prev_error = mean_error;
    }

    IcpResult {
        rotation: total_rotation,
        translation: total_translation,
        residual: prev_error,
    }
}

fn apply(rotation: f64, translation: Vector2<f64>, p: Vector2<f64>) -> Vector2<f64> {
    let c = rotation.cos();
    let s = rotation.sin();
    Vector2::new(c * p.x - s * p.y, s * p.x + c * p.y) + translation
}

fn centroid(points: &[Vector2<f64>]) -> Vector2<f64> {
    let sum: Vector2<f64> = points.iter().fold(Vector2::zeros(), |acc, p| acc + p);
    sum / points.len() as f64
}

/// Nearest-neighbour association, deterministic (lower target index wins
/// exact ties). Returns the matched target points (same length/order as
/// `source`) and the mean squared distance.
fn associate(source: &[Vector2<f64>], target: &[Vector2<f64>]) -> (Vec<Vector2<f64>>, f64) {
    let mut matches = Vec::with_capacity(source.len());
    let mut total = 0.0;
    for s in source {
        let mut best_idx = 0usize;
        let mut best_dist = f64::INFINITY;
        for (idx, t) in target.iter().enumerate() {
            let dist = (s - t).norm_squared();
            if dist < best_dist {
                best_dist = dist;
                best_idx = idx;
            }
        }
        matches.push(target[best_idx]);
        total += best_dist;
    }
    (matches, total / source.len() as f64)
}

//! Pose-graph SLAM back-end.
//!
//! Nodes are dense, strictly-increasing keyframe ids holding a pose
//! estimate and a local point cloud. Edges constrain pairs of nodes —
//! consecutive odometry edges plus occasional loop-closure edges found by
//! ICP-aligning the current keyframe's cloud against an earlier one.
//! Optimization is Gauss-Newton over the stacked pose vector, anchoring
//! node 0 so the graph has a fixed gauge.

use nalgebra::{DMatrix, DVector, Matrix3, Vector2, Vector3};
use thiserror::Error;
use tracing::{debug, info, warn};
use transforms::{angle_diff, normalize_angle};
use types::Pose;

mod icp;
pub use icp::{icp as run_icp, IcpResult};

const MAX_OPTIMIZE_ITERATIONS: usize = 20;
const OPTIMIZE_CONVERGENCE: f64 = 1e-4;
/// Odometry edges get this uniform information (inverse covariance).
pub const ODOMETRY_INFORMATION: f64 = 100.0;
/// Loop closure edges are trusted several orders of magnitude more than
/// odometry.
pub const LOOP_CLOSURE_INFORMATION: f64 = 1.0e5;

#[derive(Error, Debug)]
pub enum SlamError {
    #[error("node index {0} out of range")]
    NodeOutOfRange(usize),
}

/// A keyframe: a pose estimate plus the local (robot-frame) point cloud
/// that produced it.
#[derive(Debug, Clone)]
pub struct Keyframe {
    pub id: usize,
    pub pose: Pose,
    pub cloud: Vec<Vector2<f64>>,
}

/// A pose-graph edge between two keyframe ids.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from_id: usize,
    pub to_id: usize,
    /// `(dx, dy, dtheta)` expressed in the `from` node's frame.
    pub measurement: (f64, f64, f64),
    pub information: Matrix3<f64>,
    pub is_loop_closure: bool,
}

/// Dense-array pose graph: nodes and edges keyed by small integer ids, no
/// interior pointers.
#[derive(Debug, Clone, Default)]
pub struct PoseGraph {
    keyframes: Vec<Keyframe>,
    edges: Vec<Edge>,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new node, O(1). Returns its id.
    pub fn add_node(&mut self, pose: Pose, cloud: Vec<Vector2<f64>>) -> usize {
        let id = self.keyframes.len();
        self.keyframes.push(Keyframe { id, pose, cloud });
        id
    }

    /// Append a new edge, O(1).
    pub fn add_edge(
        &mut self,
        from_id: usize,
        to_id: usize,
        measurement: (f64, f64, f64),
        information: Matrix3<f64>,
    ) -> Result<(), SlamError> {
        if from_id >= self.keyframes.len() {
            return Err(SlamError::NodeOutOfRange(from_id));
        }
        if to_id >= self.keyframes.len() {
            return Err(SlamError::NodeOutOfRange(to_id));
        }
        self.edges.push(Edge {
            from_id,
            to_id,
            measurement,
            information,
            is_loop_closure: from_id + 1 != to_id,
        });
        Ok(())
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.keyframes.len()
    }

    pub fn loop_closure_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_loop_closure).count()
    }

    /// Insert a consecutive odometry edge between the two most recently
    /// added nodes, with measurement derived from their current pose
    /// estimates.
    pub fn add_odometry_edge(&mut self, from_id: usize, to_id: usize) -> Result<(), SlamError> {
        let prev = self.pose_of(from_id)?;
        let curr = self.pose_of(to_id)?;
        let measurement = odometry_measurement(prev, curr);
        let information = Matrix3::identity() * ODOMETRY_INFORMATION;
        self.add_edge(from_id, to_id, measurement, information)
    }

    fn pose_of(&self, id: usize) -> Result<Pose, SlamError> {
        self.keyframes
            .get(id)
            .map(|k| k.pose)
            .ok_or(SlamError::NodeOutOfRange(id))
    }

    /// Try to close a loop between `new_id` and earlier keyframes at least
    /// 10 ids back, within `search_radius` of its pose. Runs ICP against
    /// at most `max_candidates` earlier keyframes (the per-tick soft
    /// budget) and adds an edge for the first candidate whose
    /// residual is below `icp_max_error`. Returns whether an edge was
    /// added.
    pub fn try_loop_closure(
        &mut self,
        new_id: usize,
        search_radius: f64,
        icp_max_error: f64,
        max_candidates: usize,
    ) -> bool {
        const MIN_GAP: usize = 10;
        if new_id < MIN_GAP {
            return false;
        }
        let new_pose = match self.pose_of(new_id) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let new_cloud = self.keyframes[new_id].cloud.clone();

        let mut examined = 0usize;
        for candidate_id in 0..(new_id - MIN_GAP) {
            if examined >= max_candidates {
                break;
            }
            let candidate_pose = self.keyframes[candidate_id].pose;
            let dist = ((candidate_pose.x - new_pose.x).powi(2)
                + (candidate_pose.y - new_pose.y).powi(2))
            .sqrt();
            if dist > search_radius {
                continue;
            }
            examined += 1;

            let (init_dx, init_dy, init_rot) = odometry_measurement(candidate_pose, new_pose);
            let init_trans = Vector2::new(init_dx, init_dy);
            let result = run_icp(
                &new_cloud,
                &self.keyframes[candidate_id].cloud,
                init_rot,
                init_trans,
            );
            if result.residual < icp_max_error {
                let measurement = (result.translation.x, result.translation.y, result.rotation);
                let information = Matrix3::identity() * LOOP_CLOSURE_INFORMATION;
                if self
                    .add_edge(candidate_id, new_id, measurement, information)
                    .is_ok()
                {
                    info!(
                        from = candidate_id,
                        to = new_id,
                        residual = result.residual,
                        "Loop closure edge added"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Gauss-Newton pose-graph optimization. Node 0 is
    /// anchored by adding the identity to its `H` block. A singular `H` in
    /// any iteration is logged and that iteration skipped — never fatal.
    pub fn optimize(&mut self) {
        if self.keyframes.len() < 2 || self.edges.is_empty() {
            return;
        }

        for iteration in 0..MAX_OPTIMIZE_ITERATIONS {
            let (h, b) = self.build_linear_system();

            let mut h_anchored = h;
            for i in 0..3 {
                h_anchored[(i, i)] += 1.0;
            }

            let neg_b = -b.clone();
            let dx = match h_anchored.clone().lu().solve(&neg_b) {
                Some(dx) => dx,
                None => {
                    warn!(iteration, "Pose graph H singular, skipping iteration");
                    match h_anchored.clone().pseudo_inverse(1e-9) {
                        Ok(pinv) => pinv * &neg_b,
                        Err(_) => continue,
                    }
                }
            };

            let delta_norm = dx.norm();
            self.apply_update(&dx);
            if delta_norm < OPTIMIZE_CONVERGENCE {
                debug!(iterations = iteration + 1, "Pose graph optimization converged");
                break;
            }
        }
    }

    fn build_linear_system(&self) -> (DMatrix<f64>, DVector<f64>) {
        let n = self.keyframes.len() * 3;
        let mut h = DMatrix::zeros(n, n);
        let mut b = DVector::zeros(n);

        for edge in &self.edges {
            let xi = self.keyframes[edge.from_id].pose;
            let xj = self.keyframes[edge.to_id].pose;
            let (tz_x, tz_y, theta_z) = edge.measurement;

            let ci = xi.theta.cos();
            let si = xi.theta.sin();
            let dx = xj.x - xi.x;
            let dy = xj.y - xi.y;

            let e_tx = ci * dx + si * dy - tz_x;
            let e_ty = -si * dx + ci * dy - tz_y;
            let e_theta = normalize_angle(xj.theta - xi.theta - theta_z);
            let e = Vector3::new(e_tx, e_ty, e_theta);

            let d_et_dtheta_i = Vector2::new(-si * dx + ci * dy, -ci * dx - si * dy);
            #[rustfmt::skip]
            let j_i = Matrix3::new(
                -ci, -si, d_et_dtheta_i.x,
                 si, -ci, d_et_dtheta_i.y,
                0.0, 0.0, -1.0,
            );
            #[rustfmt::skip]
            let j_j = Matrix3::new(
                ci,  si, 0.0,
                -si, ci, 0.0,
                0.0, 0.0, 1.0,
            );

            let omega = &edge.information;
            let i = edge.from_id * 3;
            let j = edge.to_id * 3;

            let h_ii = j_i.transpose() * omega * j_i;
            let h_ij = j_i.transpose() * omega * j_j;
            let h_jj = j_j.transpose() * omega * j_j;

            add_block(&mut h, i, i, &h_ii);
            add_block(&mut h, i, j, &h_ij);
            add_block(&mut h, j, i, &h_ij.transpose());
            add_block(&mut h, j, j, &h_jj);

            let b_i = j_i.transpose() * omega * e;
            let b_j = j_j.transpose() * omega * e;
            for r in 0..3 {
                b[i + r] += b_i[r];
                b[j + r] += b_j[r];
            }
        }

        (h, b)
    }

    fn apply_update(&mut self, dx: &DVector<f64>) {
        for (i, keyframe) in self.keyframes.iter_mut().enumerate() {
            let idx = i * 3;
            keyframe.pose.x += dx[idx];
            keyframe.pose.y += dx[idx + 1];
            keyframe.pose.theta = normalize_angle(keyframe.pose.theta + dx[idx + 2]);
        }
    }
}

fn add_block(h: &mut DMatrix<f64>, row: usize, col: usize, block: &Matrix3<f64>) {
    for r in 0..3 {
        for c in 0..3 {
            h[(row + r, col + c)] += block[(r, c)];
        }
    }
}

/// Odometry edge measurement between consecutive global poses:
/// `(dx, dy) = R(theta_prev)^T (t_curr - t_prev)`, `dtheta = wrap(theta_curr - theta_prev)`.
pub fn odometry_measurement(prev: Pose, curr: Pose) -> (f64, f64, f64) {
    let c = prev.theta.cos();
    let s = prev.theta.sin();
    let dx = curr.x - prev.x;
    let dy = curr.y - prev.y;
    let local_dx = c * dx + s * dy;
    let local_dy = -s * dx + c * dy;
    (local_dx, local_dy, angle_diff(prev.theta, curr.theta))
}

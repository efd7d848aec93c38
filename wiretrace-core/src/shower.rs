//! 2D shower clusters and 3D showers.

use crate::geometry::{PlaneCode, TpcId};
use crate::traj::{Point2, Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One charge deposit inside a 2D shower, in both the plane frame
/// and the shower frame.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShowerPoint {
    /// Position in wire-spacing-equivalent units.
    pub pos: Point2,
    /// Position rotated into the shower frame:
    /// `[along axis, transverse]`.
    pub rot_pos: Point2,
    /// Charge of the point.
    pub chg: f64,
    /// Local ID of the trajectory the point came from.
    pub traj_id: i32,
}

/// A 2D cluster of shower-like trajectories in one plane.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShowerCluster2D {
    /// Composite plane code.
    pub plane: PlaneCode,
    /// Member trajectory local IDs.
    pub traj_ids: Vec<i32>,
    /// Non-member trajectories within the separation cut.
    pub near_traj_ids: Vec<i32>,
    /// Point cloud with rotated coordinates.
    pub points: Vec<ShowerPoint>,
    /// Charge-weighted shower axis angle.
    pub angle: f64,
    /// Axis angle uncertainty.
    pub angle_err: f64,
    /// Charge-weighted transverse/longitudinal extent ratio.
    pub aspect_ratio: f64,
    /// Confidence that the along-axis ordering is correct.
    pub dir_fom: f64,
    /// Envelope polygon vertices enclosing the members.
    pub envelope: Vec<Point2>,
    /// Envelope area in wire-spacing-equivalent units squared.
    pub envelope_area: f64,
    /// Charge per unit envelope area.
    pub chg_density: f64,
    /// Energy estimate (MeV).
    pub energy: f64,
    /// Local ID of the chosen parent trajectory (0 = none).
    pub parent_id: i32,
    /// Figure of merit of the parent choice; large = poor.
    pub parent_fom: f64,
    /// Local ID of the matched 3D shower (0 = none).
    pub ss3_id: i32,
    /// Local ID within the slice; 0 = retired.
    pub id: i32,
    /// Globally unique ID.
    pub uid: i32,
    /// Set whenever members change; cleared by the recompute.
    pub needs_update: bool,
}

impl ShowerCluster2D {
    /// Total charge of the point cloud.
    #[must_use]
    pub fn total_charge(&self) -> f64 {
        self.points.iter().map(|p| p.chg).sum()
    }

    /// Point-in-polygon test against the envelope (ray casting).
    #[must_use]
    pub fn envelope_contains(&self, pos: &Point2) -> bool {
        let n = self.envelope.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = self.envelope[i];
            let pj = self.envelope[j];
            if (pi[1] > pos[1]) != (pj[1] > pos[1]) {
                let x_cross = (pj[0] - pi[0]) * (pos[1] - pi[1]) / (pj[1] - pi[1]) + pi[0];
                if pos[0] < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// A 3D shower assembled from matched 2D clusters.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Shower3D {
    /// Shower axis direction.
    pub dir: Vector3,
    /// Start position (cm).
    pub start: Point3,
    /// End position (cm).
    pub end: Point3,
    /// Center of charge (cm).
    pub chg_pos: Point3,
    /// Length along the axis (cm).
    pub len: f64,
    /// Opening angle (radians).
    pub open_angle: f64,
    /// Energy estimate per plane (MeV).
    pub energy: Vec<f64>,
    /// dE/dx near the start, per plane.
    pub dedx: Vec<f64>,
    /// Owning TPC.
    pub tpc: TpcId,
    /// Constituent 2D shower local IDs.
    pub cluster_ids: Vec<i32>,
    /// Plane with the best-measured constituent.
    pub best_plane: i32,
    /// Index of the matched PFP in the slice, if any.
    pub pfp_index: Option<usize>,
    /// 3D vertex local ID (0 = none).
    pub vx3_id: i32,
    /// Parent PFP UID (0 = none).
    pub parent_uid: i32,
    /// Local ID within the slice; 0 = retired.
    pub id: i32,
    /// Globally unique ID.
    pub uid: i32,
    /// Set whenever any constituent changed underneath.
    pub needs_update: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_contains() {
        let ss = ShowerCluster2D {
            envelope: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 4.0], [0.0, 4.0]],
            ..ShowerCluster2D::default()
        };
        assert!(ss.envelope_contains(&[5.0, 2.0]));
        assert!(!ss.envelope_contains(&[11.0, 2.0]));
        assert!(!ss.envelope_contains(&[5.0, 5.0]));
    }

    #[test]
    fn test_total_charge() {
        let point = |chg| ShowerPoint {
            pos: [0.0, 0.0],
            rot_pos: [0.0, 0.0],
            chg,
            traj_id: 1,
        };
        let ss = ShowerCluster2D {
            points: vec![point(10.0), point(30.0)],
            ..ShowerCluster2D::default()
        };
        assert!((ss.total_charge() - 40.0).abs() < 1e-12);
    }
}

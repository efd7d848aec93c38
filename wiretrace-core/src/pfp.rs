//! Cross-plane trajectory matching structures and particle-flow
//! objects.

use crate::geometry::{PlaneCode, TpcId};
use crate::traj::{Point3, ShapeCode, Vector2, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One trajectory point projected into the global drift-sorted list
/// used by the 3D matcher.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TjPoint2 {
    /// 2D direction at the point.
    pub dir: Vector2,
    /// Wire number.
    pub wire: u32,
    /// Drift-coordinate range (cm) spanned by the hits at the point.
    pub x_lo: f64,
    /// Upper edge of the drift range.
    pub x_hi: f64,
    /// Composite plane code.
    pub plane: PlaneCode,
    /// Local ID of the trajectory.
    pub traj_id: i32,
    /// Point index within the trajectory.
    pub ipt: usize,
    /// Point count of the trajectory, for length cuts.
    pub npts: usize,
}

/// A tentative cross-plane grouping of trajectories.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MatchCandidate {
    /// Local IDs of the matched trajectories, one per plane.
    pub traj_ids: Vec<i32>,
    /// Fraction of each trajectory's points that are 3D matched.
    pub completeness: Vec<f64>,
    /// Coincidence count de-weighted by view angle; 0 = failed.
    pub count: f64,
    /// Fitted 3D center (cm).
    pub pos: Point3,
    /// Fitted 3D direction.
    pub dir: Vector3,
}

/// A 3D trajectory point of a PFP, carrying its 2D provenance.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pfp3Point {
    /// Position (cm).
    pub pos: Point3,
    /// Direction.
    pub dir: Vector3,
    /// (trajectory local ID, point index) pairs that produced it.
    pub sources: Vec<(i32, usize)>,
    /// Charge parked here until dE/dx is computed.
    pub dedx: f64,
}

/// A cross-plane grouping of trajectories believed to be one 3D
/// particle.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pfp {
    /// Constituent trajectory local IDs (distinct planes, one TPC).
    pub traj_ids: Vec<i32>,
    /// Constituent trajectory global UIDs.
    pub traj_uids: Vec<i32>,
    /// Per-constituent completeness fractions.
    pub completeness: Vec<f64>,
    /// 3D trajectory points, ordered along the direction.
    pub points: Vec<Pfp3Point>,
    /// Position at each end (0 = start, 1 = end), cm.
    pub xyz: [Point3; 2],
    /// Direction at each end.
    pub dir: [Vector3; 2],
    /// Section dE/dx values near each end.
    pub dedx: [Vec<f64>; 2],
    /// 3D vertex local ID at each end (0 = none).
    pub vx3_id: [i32; 2],
    /// Plane with the most matched points; negative until set.
    pub best_plane: i32,
    /// Track/shower hypothesis.
    pub shape: ShapeCode,
    /// Daughter PFP UIDs.
    pub dtr_uids: Vec<i32>,
    /// Parent PFP UID (0 = none).
    pub parent_uid: i32,
    /// Owning TPC.
    pub tpc: TpcId,
    /// Efficiency x purity estimate; negative until evaluated.
    pub eff_pur: f64,
    /// Index into the slice match-candidate vector.
    pub match_index: Option<usize>,
    /// Local ID within the slice; 0 = retired.
    pub id: i32,
    /// Globally unique ID.
    pub uid: i32,
    /// Attached to a primary vertex.
    pub primary: bool,
    /// Set while the PFP needs (re-)definition.
    pub needs_update: bool,
}

impl Pfp {
    /// True if every constituent occupies a distinct plane.
    #[must_use]
    pub fn planes_distinct(&self, planes: &[PlaneCode]) -> bool {
        debug_assert_eq!(planes.len(), self.traj_ids.len());
        for (i, a) in planes.iter().enumerate() {
            if planes[i + 1..].contains(a) {
                return false;
            }
        }
        true
    }

    /// Straight-line length between the endpoints (cm).
    #[must_use]
    pub fn length(&self) -> f64 {
        let d: f64 = (0..3)
            .map(|i| (self.xyz[1][i] - self.xyz[0][i]).powi(2))
            .sum();
        d.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planes_distinct() {
        let pfp = Pfp {
            traj_ids: vec![1, 2, 3],
            ..Pfp::default()
        };
        let distinct = vec![
            PlaneCode::encode(0, 0, 0),
            PlaneCode::encode(0, 0, 1),
            PlaneCode::encode(0, 0, 2),
        ];
        assert!(pfp.planes_distinct(&distinct));
        let clash = vec![
            PlaneCode::encode(0, 0, 0),
            PlaneCode::encode(0, 0, 1),
            PlaneCode::encode(0, 0, 0),
        ];
        assert!(!pfp.planes_distinct(&clash));
    }

    #[test]
    fn test_pfp_length() {
        let pfp = Pfp {
            xyz: [[0.0, 0.0, 0.0], [3.0, 4.0, 0.0]],
            ..Pfp::default()
        };
        assert!((pfp.length() - 5.0).abs() < 1e-12);
    }
}

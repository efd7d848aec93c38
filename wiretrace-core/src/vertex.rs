//! 2D and 3D vertex types.

use crate::geometry::{PlaneCode, TpcId};
use crate::traj::Point2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Junction topology of a 2D vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VtxTopology {
    /// Start ends of both trajectories meet.
    #[default]
    StartStart,
    /// Start of one meets the end of the other.
    StartEnd,
    /// End ends of both meet.
    EndEnd,
    /// An endpoint lands on the middle of another trajectory.
    EndMiddle,
    /// Created by splitting a trajectory.
    Split,
}

/// Named status flags of a 2D vertex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VtxStatus {
    /// Position fixed externally; no fitting done.
    pub fixed: bool,
    /// The vertex sits on a dead wire.
    pub on_dead_wire: bool,
    /// Matched to a high-score 3D vertex.
    pub high_score_3d: bool,
    /// Produced by merging two vertices.
    pub merged: bool,
    /// Charge consistency check failed; kept for diagnostics.
    pub poor_charge: bool,
}

/// A localized junction of trajectory endpoints in one plane.
///
/// Valid only while `traj_count > 0`; detaching the last trajectory
/// retires the vertex.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex2D {
    /// Fitted position in wire-spacing-equivalent units.
    pub pos: Point2,
    /// Position uncertainty per coordinate.
    pub pos_err: Point2,
    /// Number of attached trajectories.
    pub traj_count: usize,
    /// Reconstruction pass that created it.
    pub pass: usize,
    /// Chi/DOF of the intersection fit.
    pub fit_chi: f64,
    /// Junction topology.
    pub topo: VtxTopology,
    /// Composite plane code.
    pub plane: PlaneCode,
    /// Local ID within the slice; 0 = retired.
    pub id: i32,
    /// Globally unique ID.
    pub uid: i32,
    /// Local ID of the matched 3D vertex (0 = none).
    pub vx3_id: i32,
    /// Quality score from proximity, support and charge.
    pub score: f64,
    /// Fraction of nearby charge carried by the attached
    /// trajectories.
    pub traj_chg_frac: f64,
    /// Status flags.
    pub status: VtxStatus,
}

impl Vertex2D {
    /// True while at least one trajectory is attached.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.id != 0 && self.traj_count > 0
    }
}

/// A 3D vertex assembled from cross-plane matched 2D vertices.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex3D {
    /// Position (cm).
    pub pos: [f64; 3],
    /// Per-axis uncertainty (cm).
    pub pos_err: [f64; 3],
    /// Combined score of the constituents.
    pub score: f64,
    /// Owning TPC.
    pub tpc: TpcId,
    /// Constituent 2D vertex local IDs, indexed by plane
    /// (0 = no vertex in that plane).
    pub vx2_ids: Vec<i32>,
    /// For a two-plane match: the wire in the missing plane that
    /// would complete it. Negative when complete.
    pub completion_wire: f64,
    /// Local ID within the slice; 0 = retired.
    pub id: i32,
    /// Globally unique ID.
    pub uid: i32,
    /// Tagged as a primary interaction vertex.
    pub primary: bool,
    /// Tagged as the neutrino interaction vertex.
    pub neutrino: bool,
}

impl Vertex3D {
    /// Number of planes contributing a 2D vertex.
    #[must_use]
    pub fn num_planes_matched(&self) -> usize {
        self.vx2_ids.iter().filter(|&&id| id > 0).count()
    }

    /// True if one plane is missing from the match.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.completion_wire >= 0.0
    }
}

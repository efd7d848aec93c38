//! Trajectory points and 2D trajectories.

use crate::geometry::PlaneCode;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 2D position in wire-spacing-equivalent units:
/// `[wire number, tick * units_per_tick]`.
pub type Point2 = [f64; 2];
/// 2D direction cosines.
pub type Vector2 = [f64; 2];
/// 3D position (cm).
pub type Point3 = [f64; 3];
/// 3D direction cosines.
pub type Vector3 = [f64; 3];

/// Angle regime of a trajectory segment relative to the wire
/// direction. The stepper fits and gathers hits differently in each
/// regime because a wire-based step behaves very differently for
/// tracks parallel vs. perpendicular to the wire planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AngleCode {
    /// Close to the wire-number axis.
    #[default]
    Small,
    /// Steep.
    Large,
    /// Nearly parallel to the wires.
    VeryLarge,
}

impl AngleCode {
    /// Classifies an angle against ascending range boundaries.
    #[must_use]
    pub fn classify(angle: f64, ranges: &[f64]) -> Self {
        let a = angle.abs();
        let reduced = if a > std::f64::consts::FRAC_PI_2 {
            std::f64::consts::PI - a
        } else {
            a
        };
        match ranges.iter().position(|&r| reduced < r) {
            Some(0) => Self::Small,
            Some(1) => Self::Large,
            _ => Self::VeryLarge,
        }
    }

    /// Numeric code used by per-pass `max_angle_code` cuts.
    #[inline]
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Small => 0,
            Self::Large => 1,
            Self::VeryLarge => 2,
        }
    }
}

/// Named environment flags of a trajectory point, queried
/// individually by downstream algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TpEnvironment {
    /// A dead wire is adjacent to this point.
    pub near_dead_wire: bool,
    /// Another trajectory passes close by.
    pub near_traj: bool,
    /// The point lies inside a 2D shower envelope.
    pub near_shower: bool,
    /// Hits here are shared or ambiguous with another trajectory.
    pub overlap: bool,
    /// Unclaimed hits remain close to this point.
    pub unused_hits: bool,
    /// Scratch flag used during 3D matching.
    pub flagged: bool,
}

/// One step of a trajectory.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrajPoint {
    /// Composite plane code.
    pub plane: PlaneCode,
    /// Fitted position.
    pub pos: Point2,
    /// Charge-weighted position of the used hits.
    pub hit_pos: Point2,
    /// Direction cosines along the stepping direction.
    pub dir: Vector2,
    /// Trajectory angle (-pi, pi).
    pub ang: f64,
    /// Angle uncertainty.
    pub ang_err: f64,
    /// Charge of the used hits.
    pub chg: f64,
    /// Running average charge of recent points; negative until known.
    pub ave_chg: f64,
    /// (chg - ave_chg) / chg_rms of the trajectory so far.
    pub chg_pull: f64,
    /// Deviation between the trajectory and the hit position.
    pub delta: f64,
    /// RMS of recent deltas.
    pub delta_rms: f64,
    /// Chi/DOF of the local fit that produced this point.
    pub fit_chi: f64,
    /// Number of points in that local fit.
    pub n_pts_fit: usize,
    /// Step number at which the point was created.
    pub step: usize,
    /// Angle regime.
    pub angle_code: AngleCode,
    /// Indices into the slice hit vector.
    pub hits: Vec<usize>,
    /// Parallel to `hits`: true if the hit is used in the fit.
    pub use_hit: Vec<bool>,
    /// Environment flags.
    pub env: TpEnvironment,
}

impl TrajPoint {
    /// True if at least one hit is used at this point.
    #[inline]
    #[must_use]
    pub fn has_charge(&self) -> bool {
        self.chg > 0.0
    }
}

/// Why stepping ended at one end of a trajectory.
///
/// Signal loss and an exhausted dead-wire budget are distinct
/// conditions: the first means live wires stopped producing matching
/// hits, the second means no signal was expected at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EndFlags {
    /// Clean stop: live wires with no matching signal.
    pub signal_loss: bool,
    /// Stopped after crossing more dead wires than allowed.
    pub dead_wire: bool,
    /// Stopped at a kink.
    pub kink: bool,
    /// End is attached to a 2D vertex.
    pub at_vertex: bool,
    /// Bragg-like rising-charge signature (stopping particle).
    pub bragg: bool,
    /// Ran into another trajectory.
    pub at_traj: bool,
    /// Left the fiducial volume.
    pub outside_volume: bool,
}

impl EndFlags {
    /// True if any stop reason is recorded.
    #[must_use]
    pub fn any(&self) -> bool {
        self.signal_loss
            || self.dead_wire
            || self.kink
            || self.at_vertex
            || self.bragg
            || self.at_traj
            || self.outside_volume
    }
}

/// Named record of which algorithms modified a trajectory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlgFlags {
    /// Produced by splitting another trajectory.
    pub split: bool,
    /// Absorbed another trajectory.
    pub merged: bool,
    /// Trailing points were masked off during cleanup.
    pub masked_hits: bool,
    /// The Bragg end check fired.
    pub bragg_checked: bool,
    /// Attached to a 2D vertex.
    pub vertex_attached: bool,
    /// Tagged shower-like.
    pub shower_like: bool,
    /// Retired; superseded or failed a later check.
    pub killed: bool,
}

/// Shape hypothesis carried by trajectories and PFPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShapeCode {
    /// Track-like.
    #[default]
    Track,
    /// Shower-like.
    Shower,
}

/// An ordered 2D path built by incremental stepping across wires in
/// one plane.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trajectory {
    /// Ordered trajectory points.
    pub pts: Vec<TrajPoint>,
    /// Composite plane code.
    pub plane: PlaneCode,
    /// Local ID within the owning slice; 0 = retired.
    pub id: i32,
    /// Globally unique ID, stable across the run.
    pub uid: i32,
    /// Local ID of a parent trajectory, or 0.
    pub parent_id: i32,
    /// Reconstruction pass that created it.
    pub pass: usize,
    /// Stepping direction in wire number (+1 or -1).
    pub step_dir: i8,
    /// Average charge over all points with charge.
    pub ave_chg: f64,
    /// Total charge including a dead-wire estimate.
    pub tot_chg: f64,
    /// Charge RMS normalized to the average.
    pub chg_rms: f64,
    /// Confidence that the point order matches the physical
    /// direction, from the charge pattern.
    pub dir_fom: f64,
    /// Crude multiple-scattering momentum surrogate used for
    /// track/shower discrimination (MeV/c scale).
    pub mcs_mom: f64,
    /// Efficiency x purity estimate; negative until evaluated.
    pub eff_pur: f64,
    /// dE/dx at each end once 3D matched.
    pub dedx: [f64; 2],
    /// 2D vertex local ID at each end (0 = none).
    pub vtx_id: [i32; 2],
    /// First and last point with charge.
    pub end_pts: [usize; 2],
    /// 2D shower local ID this trajectory belongs to (0 = none).
    pub shower_id: i32,
    /// Stop reason flags at each end.
    pub end_flags: [EndFlags; 2],
    /// Modification history.
    pub alg: AlgFlags,
    /// Shape hypothesis.
    pub shape: ShapeCode,
    /// Set when summary quantities are stale.
    pub needs_update: bool,
    /// Cleared if the trajectory fails quality cuts.
    pub is_good: bool,
}

impl Trajectory {
    /// Number of points with charge.
    #[must_use]
    pub fn num_pts_with_charge(&self) -> usize {
        self.pts.iter().filter(|tp| tp.has_charge()).count()
    }

    /// Recomputes `end_pts` to span the charged points. Returns
    /// `false` when no point has charge.
    pub fn update_end_points(&mut self) -> bool {
        let first = self.pts.iter().position(TrajPoint::has_charge);
        let last = self.pts.iter().rposition(TrajPoint::has_charge);
        match (first, last) {
            (Some(f), Some(l)) => {
                self.end_pts = [f, l];
                true
            }
            _ => false,
        }
    }

    /// Trajectory point at one end (0 = start, 1 = end).
    #[must_use]
    pub fn end_tp(&self, end: usize) -> &TrajPoint {
        &self.pts[self.end_pts[end.min(1)]]
    }

    /// Position of one end.
    #[must_use]
    pub fn end_pos(&self, end: usize) -> Point2 {
        self.end_tp(end).pos
    }

    /// Wire extent of the charged region.
    #[must_use]
    pub fn length_wires(&self) -> f64 {
        (self.end_tp(1).pos[0] - self.end_tp(0).pos[0]).abs()
    }

    /// True if the local ID has been tombstoned.
    #[inline]
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.id == 0
    }

    /// Checks the charged-span invariant:
    /// `0 <= end_pts[0] <= end_pts[1] < pts.len()` with charge at
    /// both indexed points.
    #[must_use]
    pub fn charge_span_valid(&self) -> bool {
        !self.pts.is_empty()
            && self.end_pts[0] <= self.end_pts[1]
            && self.end_pts[1] < self.pts.len()
            && self.pts[self.end_pts[0]].has_charge()
            && self.pts[self.end_pts[1]].has_charge()
    }
}

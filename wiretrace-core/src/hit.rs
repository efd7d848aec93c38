//! Hit types for wire-plane detector data.

use crate::geometry::PlaneCode;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One reconstructed signal cluster on a single wire.
///
/// Hits are immutable input; the engine references them by index and
/// never copies them into working structures.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hit {
    /// Composite (cryostat, TPC, plane) code.
    pub plane: PlaneCode,
    /// Wire number within the plane.
    pub wire: u32,
    /// First time tick of the pulse.
    pub tick_lo: f64,
    /// Last time tick of the pulse.
    pub tick_hi: f64,
    /// Pulse peak time (ticks).
    pub tick: f64,
    /// Integrated charge.
    pub charge: f64,
    /// RMS width of the pulse (ticks).
    pub rms: f64,
}

impl Hit {
    /// Creates a hit with a symmetric tick range around the peak.
    #[must_use]
    pub fn new(plane: PlaneCode, wire: u32, tick: f64, charge: f64, rms: f64) -> Self {
        Self {
            plane,
            wire,
            tick_lo: tick - rms,
            tick_hi: tick + rms,
            tick,
            charge,
            rms,
        }
    }
}

/// Hit usage tag values for [`SliceHit::in_traj`].
///
/// `0` = unused, `> 0` = local ID of the owning trajectory,
/// `< 0` = claimed by a trajectory under construction.
pub const HIT_UNUSED: i32 = 0;

/// A hit as seen by one slice: the immutable hit plus its usage tag.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SliceHit {
    /// The underlying hit.
    pub hit: Hit,
    /// Trajectory membership tag.
    pub in_traj: i32,
}

impl SliceHit {
    /// Wraps a hit with an unused tag.
    #[must_use]
    pub fn new(hit: Hit) -> Self {
        Self {
            hit,
            in_traj: HIT_UNUSED,
        }
    }

    /// True if no trajectory has claimed the hit.
    #[inline]
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.in_traj == HIT_UNUSED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_tick_range() {
        let hit = Hit::new(PlaneCode::encode(0, 0, 1), 120, 1500.0, 820.0, 3.5);
        assert!(hit.tick_lo < hit.tick && hit.tick < hit.tick_hi);
        assert!((hit.tick_hi - hit.tick_lo - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_slice_hit_starts_unused() {
        let hit = Hit::new(PlaneCode::encode(0, 0, 0), 5, 10.0, 100.0, 1.0);
        let sh = SliceHit::new(hit);
        assert!(sh.is_unused());
    }
}

//! Per-wire hit index for O(1) range lookup within a plane.

use std::collections::BTreeMap;

use crate::error::SliceError;
use crate::geometry::PlaneCode;
use crate::hit::SliceHit;

/// Occupancy of one wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireStatus {
    /// Dead or unresponsive wire; no signal is expected here.
    Dead,
    /// Live wire with no hits in this slice.
    NoHits,
    /// Hits `[lo, hi)` in the slice hit vector land on this wire.
    Range {
        /// First hit index.
        lo: usize,
        /// One past the last hit index.
        hi: usize,
    },
}

/// Hit ranges for one plane.
#[derive(Debug, Clone)]
pub struct PlaneRanges {
    /// First wire carrying signal.
    pub first_wire: u32,
    /// Last wire carrying signal.
    pub last_wire: u32,
    /// Status per wire, indexed by `wire - first_wire`.
    wires: Vec<WireStatus>,
}

impl PlaneRanges {
    /// Status of a wire; wires outside the instrumented range read as
    /// `NoHits`.
    #[must_use]
    pub fn status(&self, wire: u32) -> WireStatus {
        if wire < self.first_wire || wire > self.last_wire {
            return WireStatus::NoHits;
        }
        self.wires[(wire - self.first_wire) as usize]
    }

    /// True if `wire` lies in the instrumented range of the plane.
    #[must_use]
    pub fn in_range(&self, wire: u32) -> bool {
        wire >= self.first_wire && wire <= self.last_wire
    }
}

/// Hit index for one slice: contiguous per-wire hit ranges keyed by
/// plane code, with dead wires marked.
#[derive(Debug, Clone, Default)]
pub struct HitIndex {
    planes: BTreeMap<PlaneCode, PlaneRanges>,
}

impl HitIndex {
    /// Builds the index from the slice hits, which must be sorted by
    /// (plane, wire, tick). `dead_wires` lists (plane, wire) pairs
    /// known to be unresponsive.
    ///
    /// # Errors
    /// `SliceError::UnsortedHits` if the hit ordering is violated,
    /// `SliceError::NoHits` if the slice is empty.
    pub fn build(
        slice_id: i32,
        hits: &[SliceHit],
        dead_wires: &[(PlaneCode, u32)],
    ) -> Result<Self, SliceError> {
        if hits.is_empty() {
            return Err(SliceError::NoHits(slice_id));
        }
        for (i, pair) in hits.windows(2).enumerate() {
            let a = &pair[0].hit;
            let b = &pair[1].hit;
            let ordered = (a.plane, a.wire) < (b.plane, b.wire)
                || ((a.plane, a.wire) == (b.plane, b.wire) && a.tick <= b.tick);
            if !ordered {
                return Err(SliceError::UnsortedHits {
                    slice: slice_id,
                    index: i + 1,
                });
            }
        }

        let mut planes: BTreeMap<PlaneCode, PlaneRanges> = BTreeMap::new();
        let mut start = 0usize;
        while start < hits.len() {
            let plane = hits[start].hit.plane;
            let mut end = start;
            while end < hits.len() && hits[end].hit.plane == plane {
                end += 1;
            }
            planes.insert(plane, Self::build_plane(&hits[start..end], start));
            start = end;
        }

        for &(plane, wire) in dead_wires {
            if let Some(ranges) = planes.get_mut(&plane) {
                if ranges.in_range(wire) {
                    let slot = (wire - ranges.first_wire) as usize;
                    if matches!(ranges.wires[slot], WireStatus::NoHits) {
                        ranges.wires[slot] = WireStatus::Dead;
                    }
                }
            }
        }

        Ok(Self { planes })
    }

    fn build_plane(hits: &[SliceHit], offset: usize) -> PlaneRanges {
        let first_wire = hits[0].hit.wire;
        let last_wire = hits[hits.len() - 1].hit.wire;
        let mut wires = vec![WireStatus::NoHits; (last_wire - first_wire + 1) as usize];
        let mut i = 0usize;
        while i < hits.len() {
            let wire = hits[i].hit.wire;
            let mut j = i;
            while j < hits.len() && hits[j].hit.wire == wire {
                j += 1;
            }
            wires[(wire - first_wire) as usize] = WireStatus::Range {
                lo: offset + i,
                hi: offset + j,
            };
            i = j;
        }
        PlaneRanges {
            first_wire,
            last_wire,
            wires,
        }
    }

    /// Ranges for one plane, if the slice has hits there.
    #[must_use]
    pub fn plane(&self, plane: PlaneCode) -> Option<&PlaneRanges> {
        self.planes.get(&plane)
    }

    /// Plane codes present in the slice, in ascending order.
    pub fn plane_codes(&self) -> impl Iterator<Item = PlaneCode> + '_ {
        self.planes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::Hit;

    fn make_hits(plane: PlaneCode, wires: &[u32]) -> Vec<SliceHit> {
        wires
            .iter()
            .map(|&w| SliceHit::new(Hit::new(plane, w, 100.0, 50.0, 2.0)))
            .collect()
    }

    #[test]
    fn test_ranges_and_gaps() {
        let plane = PlaneCode::encode(0, 0, 0);
        let hits = make_hits(plane, &[10, 10, 11, 14]);
        let index = HitIndex::build(1, &hits, &[]).unwrap();
        let ranges = index.plane(plane).unwrap();
        assert_eq!(ranges.first_wire, 10);
        assert_eq!(ranges.last_wire, 14);
        assert_eq!(ranges.status(10), WireStatus::Range { lo: 0, hi: 2 });
        assert_eq!(ranges.status(11), WireStatus::Range { lo: 2, hi: 3 });
        assert_eq!(ranges.status(12), WireStatus::NoHits);
        assert_eq!(ranges.status(14), WireStatus::Range { lo: 3, hi: 4 });
        // outside the instrumented range
        assert_eq!(ranges.status(20), WireStatus::NoHits);
    }

    #[test]
    fn test_dead_wire_marking() {
        let plane = PlaneCode::encode(0, 0, 1);
        let hits = make_hits(plane, &[5, 8]);
        let index = HitIndex::build(1, &hits, &[(plane, 6), (plane, 7)]).unwrap();
        let ranges = index.plane(plane).unwrap();
        assert_eq!(ranges.status(6), WireStatus::Dead);
        assert_eq!(ranges.status(7), WireStatus::Dead);
        // a wire with hits is never downgraded to dead
        assert!(matches!(ranges.status(5), WireStatus::Range { .. }));
    }

    #[test]
    fn test_empty_slice_is_fatal() {
        let err = HitIndex::build(7, &[], &[]).unwrap_err();
        assert_eq!(err, SliceError::NoHits(7));
    }

    #[test]
    fn test_unsorted_hits_rejected() {
        let plane = PlaneCode::encode(0, 0, 0);
        let hits = make_hits(plane, &[4, 3]);
        let err = HitIndex::build(2, &hits, &[]).unwrap_err();
        assert!(matches!(err, SliceError::UnsortedHits { slice: 2, .. }));
    }
}

//! The per-slice working state: hit tags plus every reconstructed
//! collection, with tombstone retirement for index stability.

use crate::geometry::{PlaneCode, TpcId, VolumeBounds};
use crate::hit::{SliceHit, HIT_UNUSED};
use crate::index::HitIndex;
use crate::pfp::{MatchCandidate, Pfp};
use crate::shower::{Shower3D, ShowerCluster2D};
use crate::traj::Trajectory;
use crate::vertex::{Vertex2D, Vertex3D};

/// An independently reconstructed partition of one event's hits.
///
/// All collections grow during a pass and are never erased: a retired
/// object keeps its slot with local ID 0 so anything still holding
/// the old ID resolves to "gone" instead of to a different object.
#[derive(Debug, Default)]
pub struct RecoSlice {
    /// Slice ID from the partitioning stage.
    pub id: i32,
    /// Owning TPC.
    pub tpc: TpcId,
    /// Number of wire planes in the TPC.
    pub num_planes: usize,
    /// Fiducial bounds of the TPC.
    pub bounds: Option<VolumeBounds>,
    /// Hits with their trajectory tags.
    pub hits: Vec<SliceHit>,
    /// Per-wire hit ranges.
    pub wire_ranges: HitIndex,
    /// All trajectories, every plane.
    pub tjs: Vec<Trajectory>,
    /// 2D vertices.
    pub vtx2s: Vec<Vertex2D>,
    /// 3D vertices.
    pub vtx3s: Vec<Vertex3D>,
    /// 3D match candidates, best first.
    pub matches: Vec<MatchCandidate>,
    /// Particle-flow objects.
    pub pfps: Vec<Pfp>,
    /// 2D shower clusters.
    pub showers2: Vec<ShowerCluster2D>,
    /// 3D showers.
    pub showers3: Vec<Shower3D>,
    /// Cleared when the slice cannot be reconstructed.
    pub is_valid: bool,
}

impl RecoSlice {
    /// Creates an empty slice for a TPC.
    #[must_use]
    pub fn new(id: i32, tpc: TpcId, num_planes: usize) -> Self {
        Self {
            id,
            tpc,
            num_planes,
            is_valid: true,
            ..Self::default()
        }
    }

    /// Resolves a trajectory local ID, returning `None` for retired
    /// or out-of-range IDs.
    #[must_use]
    pub fn traj(&self, id: i32) -> Option<&Trajectory> {
        let slot = usize::try_from(id).ok()?.checked_sub(1)?;
        self.tjs.get(slot).filter(|tj| tj.id == id)
    }

    /// Mutable trajectory lookup with the same tombstone rules.
    pub fn traj_mut(&mut self, id: i32) -> Option<&mut Trajectory> {
        let slot = usize::try_from(id).ok()?.checked_sub(1)?;
        self.tjs.get_mut(slot).filter(|tj| tj.id == id)
    }

    /// Resolves a 2D vertex local ID.
    #[must_use]
    pub fn vtx2(&self, id: i32) -> Option<&Vertex2D> {
        let slot = usize::try_from(id).ok()?.checked_sub(1)?;
        self.vtx2s.get(slot).filter(|vx| vx.id == id)
    }

    /// Mutable 2D vertex lookup.
    pub fn vtx2_mut(&mut self, id: i32) -> Option<&mut Vertex2D> {
        let slot = usize::try_from(id).ok()?.checked_sub(1)?;
        self.vtx2s.get_mut(slot).filter(|vx| vx.id == id)
    }

    /// Resolves a 3D vertex local ID.
    #[must_use]
    pub fn vtx3(&self, id: i32) -> Option<&Vertex3D> {
        let slot = usize::try_from(id).ok()?.checked_sub(1)?;
        self.vtx3s.get(slot).filter(|vx| vx.id == id)
    }

    /// Resolves a 2D shower local ID.
    #[must_use]
    pub fn shower2(&self, id: i32) -> Option<&ShowerCluster2D> {
        let slot = usize::try_from(id).ok()?.checked_sub(1)?;
        self.showers2.get(slot).filter(|ss| ss.id == id)
    }

    /// Mutable 3D shower lookup.
    pub fn shower3_mut(&mut self, id: i32) -> Option<&mut Shower3D> {
        let slot = usize::try_from(id).ok()?.checked_sub(1)?;
        self.showers3.get_mut(slot).filter(|ss| ss.id == id)
    }

    /// Live trajectories in one plane.
    pub fn trajs_in_plane(&self, plane: PlaneCode) -> impl Iterator<Item = &Trajectory> {
        self.tjs
            .iter()
            .filter(move |tj| !tj.is_retired() && tj.plane == plane)
    }

    /// Stores a finished trajectory: assigns the next local ID and
    /// claims its hits. The caller supplies the UID.
    pub fn store_traj(&mut self, mut tj: Trajectory, uid: i32) -> i32 {
        let id = i32::try_from(self.tjs.len()).unwrap_or(i32::MAX - 1) + 1;
        tj.id = id;
        tj.uid = uid;
        for tp in &tj.pts {
            for (k, &ih) in tp.hits.iter().enumerate() {
                if tp.use_hit[k] {
                    self.hits[ih].in_traj = id;
                }
            }
        }
        self.tjs.push(tj);
        id
    }

    /// Retires a trajectory: releases its hits, detaches its
    /// vertices and tombstones the slot. The history stays in place
    /// for diagnostics.
    pub fn retire_traj(&mut self, id: i32) {
        let Some(tj) = self.traj(id) else { return };
        let vtx_ids = tj.vtx_id;
        let hit_indices: Vec<usize> = tj
            .pts
            .iter()
            .flat_map(|tp| {
                tp.hits
                    .iter()
                    .zip(&tp.use_hit)
                    .filter(|&(_, &used)| used)
                    .map(|(&ih, _)| ih)
            })
            .collect();
        for ih in hit_indices {
            if self.hits[ih].in_traj == id {
                self.hits[ih].in_traj = HIT_UNUSED;
            }
        }
        for vid in vtx_ids {
            if vid > 0 {
                if let Some(vx) = self.vtx2_mut(vid) {
                    vx.traj_count = vx.traj_count.saturating_sub(1);
                    if vx.traj_count == 0 {
                        vx.id = 0;
                    }
                }
            }
        }
        if let Some(tj) = self.traj_mut(id) {
            tj.alg.killed = true;
            tj.is_good = false;
            tj.id = 0;
        }
    }

    /// Releases the hits claimed by an in-progress trajectory that
    /// was abandoned before storage.
    pub fn release_work_hits(&mut self, tj: &Trajectory) {
        for tp in &tj.pts {
            for &ih in &tp.hits {
                if self.hits[ih].in_traj < 0 {
                    self.hits[ih].in_traj = HIT_UNUSED;
                }
            }
        }
    }

    /// Splits a stored trajectory at point `ipt`; the tail becomes a
    /// new trajectory parented to the original, and both are attached
    /// to 2D vertex `vx2_id` when it is positive. Returns the new
    /// local ID, or `None` if either side would be too short.
    pub fn split_traj(&mut self, id: i32, ipt: usize, vx2_id: i32, uid: i32) -> Option<i32> {
        let tj = self.traj(id)?;
        if ipt < 2 || ipt + 2 >= tj.pts.len() {
            return None;
        }
        // each side needs a charged point to carry its end points;
        // checked up front so nothing is mutated on failure
        let charged = |pts: &[crate::traj::TrajPoint]| pts.iter().any(|tp| tp.has_charge());
        if !charged(&tj.pts[..ipt]) || !charged(&tj.pts[ipt..]) {
            return None;
        }
        let mut tail = tj.clone();
        tail.pts = tail.pts.split_off(ipt);
        tail.parent_id = id;
        tail.alg.split = true;
        tail.uid = 0;
        tail.vtx_id = [vx2_id.max(0), tj.vtx_id[1]];
        tail.end_flags[0] = Default::default();
        tail.end_flags[0].at_vertex = vx2_id > 0;
        tail.update_end_points();

        let head = self.traj_mut(id)?;
        head.pts.truncate(ipt);
        head.alg.split = true;
        head.vtx_id[1] = vx2_id.max(0);
        head.end_flags[1] = Default::default();
        head.end_flags[1].at_vertex = vx2_id > 0;
        head.update_end_points();
        head.needs_update = true;

        let new_id = self.store_traj(tail, uid);
        if vx2_id > 0 {
            if let Some(vx) = self.vtx2_mut(vx2_id) {
                vx.traj_count += 2;
            }
        }
        Some(new_id)
    }

    /// Counts live (non-retired) trajectories.
    #[must_use]
    pub fn num_live_trajs(&self) -> usize {
        self.tjs.iter().filter(|tj| !tj.is_retired()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::Hit;
    use crate::traj::TrajPoint;

    fn slice_with_hits(n: usize) -> RecoSlice {
        let plane = PlaneCode::encode(0, 0, 0);
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);
        for w in 0..n {
            #[allow(clippy::cast_possible_truncation)]
            let hit = Hit::new(plane, w as u32, 100.0, 50.0, 2.0);
            slice.hits.push(SliceHit::new(hit));
        }
        slice
    }

    fn traj_using_hits(hits: &[usize]) -> Trajectory {
        let mut tj = Trajectory::default();
        for &ih in hits {
            let tp = TrajPoint {
                chg: 50.0,
                hits: vec![ih],
                use_hit: vec![true],
                ..TrajPoint::default()
            };
            tj.pts.push(tp);
        }
        tj.update_end_points();
        tj
    }

    #[test]
    fn test_store_assigns_local_ids_and_claims_hits() {
        let mut slice = slice_with_hits(4);
        let id = slice.store_traj(traj_using_hits(&[0, 1]), 10);
        assert_eq!(id, 1);
        assert_eq!(slice.hits[0].in_traj, 1);
        assert_eq!(slice.traj(1).unwrap().uid, 10);
        let id2 = slice.store_traj(traj_using_hits(&[2, 3]), 11);
        assert_eq!(id2, 2);
    }

    #[test]
    fn test_retire_tombstones_and_releases() {
        let mut slice = slice_with_hits(2);
        let id = slice.store_traj(traj_using_hits(&[0, 1]), 1);
        slice.retire_traj(id);
        assert!(slice.traj(id).is_none());
        assert!(slice.hits.iter().all(SliceHit::is_unused));
        // the slot itself is preserved
        assert_eq!(slice.tjs.len(), 1);
        assert!(slice.tjs[0].alg.killed);
    }

    #[test]
    fn test_lookup_rejects_bad_ids() {
        let slice = slice_with_hits(1);
        assert!(slice.traj(0).is_none());
        assert!(slice.traj(-3).is_none());
        assert!(slice.traj(99).is_none());
    }

    #[test]
    fn test_split_traj() {
        let mut slice = slice_with_hits(8);
        let id = slice.store_traj(traj_using_hits(&[0, 1, 2, 3, 4, 5, 6, 7]), 1);
        let new_id = slice.split_traj(id, 4, 0, 2).unwrap();
        let head = slice.traj(id).unwrap();
        let tail = slice.traj(new_id).unwrap();
        assert_eq!(head.pts.len(), 4);
        assert_eq!(tail.pts.len(), 4);
        assert_eq!(tail.parent_id, id);
        assert!(head.alg.split && tail.alg.split);
        // the tail's hits now belong to the new trajectory
        assert_eq!(slice.hits[5].in_traj, new_id);
        assert_eq!(slice.hits[2].in_traj, id);
    }

    #[test]
    fn test_split_rejects_short_sides() {
        let mut slice = slice_with_hits(4);
        let id = slice.store_traj(traj_using_hits(&[0, 1, 2, 3]), 1);
        assert!(slice.split_traj(id, 1, 0, 2).is_none());
    }

    #[test]
    fn test_refused_split_leaves_traj_intact() {
        let mut slice = slice_with_hits(8);
        let mut tj = traj_using_hits(&[0, 1, 2, 3, 4, 5, 6, 7]);
        // no charge on the would-be head side
        for tp in &mut tj.pts[..3] {
            tp.chg = 0.0;
            tp.use_hit[0] = false;
        }
        tj.update_end_points();
        let id = slice.store_traj(tj, 1);

        assert!(slice.split_traj(id, 3, 0, 2).is_none());
        let tj = slice.traj(id).unwrap();
        assert_eq!(tj.pts.len(), 8);
        assert!(!tj.alg.split);
        assert_eq!(slice.tjs.len(), 1);
        assert_eq!(slice.hits[5].in_traj, id);
    }
}

//! Cross-plane matching of 2D vertices into 3D vertices.
//!
//! Two 2D vertices in different planes of one TPC match when their
//! drift coordinates agree within the configured tolerance and their
//! wires intersect inside the detector. A third plane either
//! completes the match or the vertex is kept incomplete, remembering
//! the wire that would complete it.

use wiretrace_core::session::RecoSession;
use wiretrace_core::slice::RecoSlice;
use wiretrace_core::vertex::Vertex3D;
use wiretrace_core::PlaneCode;

/// Matches 2D vertices across planes.
pub struct Vertex3dMatcher<'a, 'g> {
    session: &'a RecoSession<'g>,
}

struct PairCandidate {
    dx: f64,
    vx_a: i32,
    plane_a: PlaneCode,
    vx_b: i32,
    plane_b: PlaneCode,
    x: f64,
    y: f64,
    z: f64,
}

impl<'a, 'g> Vertex3dMatcher<'a, 'g> {
    /// Creates a matcher bound to the run session.
    #[must_use]
    pub fn new(session: &'a RecoSession<'g>) -> Self {
        Self { session }
    }

    /// Finds all 3D vertices in the slice, best drift agreement
    /// first, then tags the best complete vertex as primary.
    pub fn run(&self, slice: &mut RecoSlice) {
        let mut candidates = self.collect_pairs(slice);
        candidates.sort_by(|a, b| a.dx.total_cmp(&b.dx));
        for cand in candidates {
            self.promote(slice, &cand);
        }
        self.tag_primary(slice);
    }

    /// Drift coordinate of a 2D vertex.
    fn vtx_x(&self, plane: PlaneCode, pos_wse: f64) -> f64 {
        let tick = pos_wse / self.session.config.units_per_tick;
        self.session.geometry.drift_coord(plane, tick)
    }

    fn collect_pairs(&self, slice: &RecoSlice) -> Vec<PairCandidate> {
        let max_dx = self.session.config.vtx3d.max_dx;
        let geom = self.session.geometry;
        let mut out = Vec::new();

        for (ia, va) in slice.vtx2s.iter().enumerate() {
            if !va.is_valid() || va.vx3_id != 0 {
                continue;
            }
            for vb in slice.vtx2s.iter().skip(ia + 1) {
                if !vb.is_valid() || vb.vx3_id != 0 {
                    continue;
                }
                if va.plane == vb.plane || va.plane.tpc_id() != vb.plane.tpc_id() {
                    continue;
                }
                let xa = self.vtx_x(va.plane, va.pos[1]);
                let xb = self.vtx_x(vb.plane, vb.pos[1]);
                let dx = (xa - xb).abs();
                if dx > max_dx {
                    continue;
                }
                let Some((y, z)) =
                    geom.wire_intersection(va.plane, va.pos[0], vb.plane, vb.pos[0])
                else {
                    continue;
                };
                out.push(PairCandidate {
                    dx,
                    vx_a: va.id,
                    plane_a: va.plane,
                    vx_b: vb.id,
                    plane_b: vb.plane,
                    x: 0.5 * (xa + xb),
                    y,
                    z,
                });
            }
        }
        out
    }

    /// Builds the 3D vertex from a pair, completing it with a third
    /// plane when one holds a consistent 2D vertex.
    fn promote(&self, slice: &mut RecoSlice, cand: &PairCandidate) {
        let free = |slice: &RecoSlice, id: i32| {
            slice.vtx2(id).is_some_and(|vx| vx.vx3_id == 0)
        };
        if !free(slice, cand.vx_a) || !free(slice, cand.vx_b) {
            return;
        }

        let cuts = &self.session.config.vtx3d;
        let geom = self.session.geometry;
        let tpc = cand.plane_a.tpc_id();
        let num_planes = slice.num_planes.max(2);
        let mut vx2_ids = vec![0i32; num_planes];
        vx2_ids[cand.plane_a.plane() as usize] = cand.vx_a;
        vx2_ids[cand.plane_b.plane() as usize] = cand.vx_b;

        // look for the completing vertex in the remaining plane
        let mut completion_wire = -1.0;
        if num_planes > 2 {
            let third_index = (0..num_planes)
                .find(|&p| vx2_ids[p] == 0)
                .unwrap_or(0);
            #[allow(clippy::cast_possible_truncation)]
            let third_plane =
                PlaneCode::encode(tpc.cryostat, tpc.tpc, third_index as u32);
            let expected_wire = geom.nearest_wire(third_plane, cand.y, cand.z);

            let third_match = slice
                .vtx2s
                .iter()
                .filter(|vc| {
                    vc.is_valid()
                        && vc.vx3_id == 0
                        && vc.plane == third_plane
                        && (vc.pos[0] - expected_wire).abs() <= cuts.max_wire_err
                        && (self.vtx_x(vc.plane, vc.pos[1]) - cand.x).abs()
                            <= cuts.max_dx
                })
                .map(|vc| vc.id)
                .next();
            match third_match {
                Some(id) => vx2_ids[third_index] = id,
                None => completion_wire = expected_wire,
            }
        }

        let constituent_score: f64 = vx2_ids
            .iter()
            .filter_map(|&id| slice.vtx2(id))
            .map(|vx| vx.score)
            .sum();
        let planes_matched = vx2_ids.iter().filter(|&&id| id > 0).count();
        let score = constituent_score + 2.0 * planes_matched as f64 - cand.dx;

        let id = i32::try_from(slice.vtx3s.len()).unwrap_or(i32::MAX - 1) + 1;
        let vx3 = Vertex3D {
            pos: [cand.x, cand.y, cand.z],
            pos_err: [
                (0.5 * cand.dx).max(0.1),
                self.session.geometry.wire_pitch(cand.plane_a),
                self.session.geometry.wire_pitch(cand.plane_b),
            ],
            score,
            tpc,
            vx2_ids: vx2_ids.clone(),
            completion_wire,
            id,
            uid: self.session.ids.next_vertex(),
            ..Vertex3D::default()
        };
        slice.vtx3s.push(vx3);

        let high = score > cuts.high_score;
        for vid in vx2_ids {
            if vid > 0 {
                if let Some(vx) = slice.vtx2_mut(vid) {
                    vx.vx3_id = id;
                    if high {
                        vx.status.high_score_3d = true;
                    }
                }
            }
        }
    }

    /// The best-scoring complete 3D vertex is the primary candidate.
    fn tag_primary(&self, slice: &mut RecoSlice) {
        let best = slice
            .vtx3s
            .iter()
            .filter(|vx| vx.id != 0 && !vx.is_incomplete())
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .map(|vx| vx.id);
        if let Some(id) = best {
            for vx in &mut slice.vtx3s {
                vx.primary = vx.id == id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use wiretrace_core::geometry::{LinearDedx, UniformGeometry};
    use wiretrace_core::session::EventId;
    use wiretrace_core::vertex::Vertex2D;
    use wiretrace_core::{RecoConfig, TpcId};

    fn push_vtx2(slice: &mut RecoSlice, plane: PlaneCode, wire: f64, tick: f64, upt: f64) -> i32 {
        let id = i32::try_from(slice.vtx2s.len()).unwrap() + 1;
        slice.vtx2s.push(Vertex2D {
            pos: [wire, tick * upt],
            traj_count: 2,
            plane,
            id,
            uid: id,
            score: 4.0,
            ..Vertex2D::default()
        });
        id
    }

    /// Wires 50 / 50 / 100 in the default three-plane geometry all
    /// cross at (y, z) = (0, 30).
    fn three_plane_slice(upt: f64, ticks: [f64; 3]) -> RecoSlice {
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);
        push_vtx2(&mut slice, PlaneCode::encode(0, 0, 0), 50.0, ticks[0], upt);
        push_vtx2(&mut slice, PlaneCode::encode(0, 0, 1), 50.0, ticks[1], upt);
        push_vtx2(&mut slice, PlaneCode::encode(0, 0, 2), 100.0, ticks[2], upt);
        slice
    }

    #[test]
    fn test_three_plane_match_is_complete() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let upt = session.config.units_per_tick;
        let mut slice = three_plane_slice(upt, [1000.0, 1000.0, 1000.0]);

        Vertex3dMatcher::new(&session).run(&mut slice);
        assert_eq!(slice.vtx3s.len(), 1);
        let vx3 = slice.vtx3(1).unwrap();
        assert_eq!(vx3.num_planes_matched(), 3);
        assert!(!vx3.is_incomplete());
        assert!(vx3.primary);
        assert_relative_eq!(vx3.pos[0], 80.2, epsilon = 1e-6);
        assert_relative_eq!(vx3.pos[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(vx3.pos[2], 30.0, epsilon = 1e-6);
        // every constituent points back at the 3D vertex
        assert!(slice.vtx2s.iter().all(|vx| vx.vx3_id == 1));
    }

    #[test]
    fn test_drift_mismatch_rejects_match() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let upt = session.config.units_per_tick;
        // 100 ticks is 8 cm of drift, far beyond the 1 cm tolerance
        let mut slice = three_plane_slice(upt, [1000.0, 1100.0, 1200.0]);

        Vertex3dMatcher::new(&session).run(&mut slice);
        assert!(slice.vtx3s.is_empty());
    }

    #[test]
    fn test_two_plane_match_is_incomplete() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let upt = session.config.units_per_tick;
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);
        push_vtx2(&mut slice, PlaneCode::encode(0, 0, 0), 50.0, 1000.0, upt);
        push_vtx2(&mut slice, PlaneCode::encode(0, 0, 2), 100.0, 1000.0, upt);

        Vertex3dMatcher::new(&session).run(&mut slice);
        assert_eq!(slice.vtx3s.len(), 1);
        let vx3 = slice.vtx3(1).unwrap();
        assert_eq!(vx3.num_planes_matched(), 2);
        assert!(vx3.is_incomplete());
        // the missing induction-plane wire that would complete it
        assert_relative_eq!(vx3.completion_wire, 50.0, epsilon = 1e-6);
        assert!(!vx3.primary);
    }
}

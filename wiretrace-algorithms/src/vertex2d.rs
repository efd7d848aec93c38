//! 2D vertex finding between trajectory ends within one plane.

use wiretrace_core::session::RecoSession;
use wiretrace_core::slice::RecoSlice;
use wiretrace_core::vertex::{Vertex2D, VtxTopology};
use wiretrace_core::{PlaneCode, Point2, Trajectory};

use crate::fit::{line_intersection, sep2};

/// Finds 2D vertices between unattached trajectory ends.
pub struct VertexFinder<'a, 'g> {
    session: &'a RecoSession<'g>,
}

struct Candidate {
    pos: Point2,
    pos_err: f64,
    fit_chi: f64,
    tj_a: i32,
    end_a: usize,
    tj_b: i32,
    end_b: usize,
    topo: VtxTopology,
}

impl<'a, 'g> VertexFinder<'a, 'g> {
    /// Creates a finder bound to the run session.
    #[must_use]
    pub fn new(session: &'a RecoSession<'g>) -> Self {
        Self { session }
    }

    /// Runs vertex finding in every plane of the slice for one pass.
    pub fn run_pass(&self, slice: &mut RecoSlice, pass: usize) {
        let planes: Vec<PlaneCode> = slice.wire_ranges.plane_codes().collect();
        for plane in planes {
            self.find_in_plane(slice, plane, pass);
        }
    }

    fn find_in_plane(&self, slice: &mut RecoSlice, plane: PlaneCode, pass: usize) {
        let mut candidates: Vec<Candidate> = Vec::new();
        let tj_ids: Vec<i32> = slice.trajs_in_plane(plane).map(|tj| tj.id).collect();

        for (ia, &id_a) in tj_ids.iter().enumerate() {
            for &id_b in &tj_ids[ia + 1..] {
                let (Some(tj_a), Some(tj_b)) = (slice.traj(id_a), slice.traj(id_b)) else {
                    continue;
                };
                for end_a in 0..2 {
                    for end_b in 0..2 {
                        if tj_a.vtx_id[end_a] > 0 || tj_b.vtx_id[end_b] > 0 {
                            continue;
                        }
                        if let Some(cand) = self.try_pair(tj_a, end_a, tj_b, end_b) {
                            candidates.push(cand);
                        }
                    }
                }
            }
        }

        // best fit first; an end attaches to at most one vertex
        candidates.sort_by(|a, b| a.fit_chi.total_cmp(&b.fit_chi));
        for cand in candidates {
            self.store_vertex(slice, plane, pass, &cand);
        }

        // ends still free may point at the middle of another
        // trajectory; those split the other one at the vertex
        for &id_a in &tj_ids {
            for end in 0..2 {
                let free = slice.traj(id_a).is_some_and(|tj| tj.vtx_id[end] == 0);
                if !free {
                    continue;
                }
                for &id_b in &tj_ids {
                    if id_b == id_a {
                        continue;
                    }
                    if attach_end_to_middle(self.session, slice, id_a, end, id_b).is_some() {
                        break;
                    }
                }
            }
        }
    }

    /// Evaluates one end pairing. The projected intersection must lie
    /// beyond both ends, close to both, and be well determined.
    fn try_pair(
        &self,
        tj_a: &Trajectory,
        end_a: usize,
        tj_b: &Trajectory,
        end_b: usize,
    ) -> Option<Candidate> {
        let cuts = &self.session.config.vtx2d;
        let pos_a = tj_a.end_pos(end_a);
        let pos_b = tj_b.end_pos(end_b);
        let sep_cut_a = Self::sep_cut(cuts, tj_a);
        let sep_cut_b = Self::sep_cut(cuts, tj_b);
        if sep2(pos_a, pos_b) > sep_cut_a.max(sep_cut_b) {
            return None;
        }

        let tp_a = tj_a.end_tp(end_a);
        let tp_b = tj_b.end_tp(end_b);
        let v = line_intersection(pos_a, tp_a.dir, pos_b, tp_b.dir)?;
        let d_a = sep2(pos_a, v);
        let d_b = sep2(pos_b, v);
        if d_a > sep_cut_a || d_b > sep_cut_b {
            return None;
        }
        if Self::inside_traj(v, pos_a, tp_a.dir, end_a) || Self::inside_traj(v, pos_b, tp_b.dir, end_b)
        {
            return None;
        }

        let ang_err = 0.5 * (tp_a.ang_err + tp_b.ang_err);
        let pos_err = (ang_err * 0.5 * (d_a + d_b)).max(0.1);
        if pos_err > cuts.max_pos_err {
            return None;
        }
        let fit_chi = d_a.max(d_b) / (pos_err + 1.0);
        if fit_chi > cuts.max_pos_pull || fit_chi > cuts.max_fit_chi {
            return None;
        }

        let topo = match (end_a, end_b) {
            (0, 0) => VtxTopology::StartStart,
            (1, 1) => VtxTopology::EndEnd,
            _ => VtxTopology::StartEnd,
        };
        Some(Candidate {
            pos: v,
            pos_err,
            fit_chi,
            tj_a: tj_a.id,
            end_a,
            tj_b: tj_b.id,
            end_b,
            topo,
        })
    }

    fn sep_cut(cuts: &wiretrace_core::Vtx2dCuts, tj: &Trajectory) -> f64 {
        if tj.length_wires() > cuts.long_traj_wires {
            cuts.max_sep_long
        } else {
            cuts.max_sep_short
        }
    }

    /// The vertex must sit beyond the chosen end, not between the two
    /// ends of the trajectory. Point directions follow increasing
    /// wire number, so end 0 looks backward and end 1 forward.
    fn inside_traj(v: Point2, end_pos: Point2, dir: [f64; 2], end: usize) -> bool {
        let dot = (v[0] - end_pos[0]) * dir[0] + (v[1] - end_pos[1]) * dir[1];
        if end == 0 {
            dot > 0.5
        } else {
            dot < -0.5
        }
    }

    /// Stores the vertex if both ends are still free, attaches the
    /// trajectories and scores the result.
    fn store_vertex(&self, slice: &mut RecoSlice, plane: PlaneCode, pass: usize, cand: &Candidate) {
        let still_free = |slice: &RecoSlice, id: i32, end: usize| {
            slice.traj(id).is_some_and(|tj| tj.vtx_id[end] == 0)
        };
        if !still_free(slice, cand.tj_a, cand.end_a) || !still_free(slice, cand.tj_b, cand.end_b) {
            return;
        }

        let id = i32::try_from(slice.vtx2s.len()).unwrap_or(i32::MAX - 1) + 1;
        let chg_frac = self.vertex_charge_frac(slice, cand);
        let mut vx = Vertex2D {
            pos: cand.pos,
            pos_err: [cand.pos_err, cand.pos_err],
            traj_count: 2,
            pass,
            fit_chi: cand.fit_chi,
            topo: cand.topo,
            plane,
            id,
            uid: self.session.ids.next_vertex(),
            traj_chg_frac: chg_frac,
            ..Vertex2D::default()
        };
        vx.score = 2.0 * vx.traj_count as f64 + chg_frac;
        vx.status.poor_charge = vx.score < self.session.config.vtx2d.min_score;
        slice.vtx2s.push(vx);

        for (tj_id, end) in [(cand.tj_a, cand.end_a), (cand.tj_b, cand.end_b)] {
            if let Some(tj) = slice.traj_mut(tj_id) {
                tj.vtx_id[end] = id;
                tj.end_flags[end].at_vertex = true;
                tj.alg.vertex_attached = true;
            }
        }
    }

    /// Fraction of the charge near the vertex that belongs to the
    /// attached trajectories. A low fraction marks a vertex placed in
    /// a busy region.
    fn vertex_charge_frac(&self, slice: &RecoSlice, cand: &Candidate) -> f64 {
        let upt = self.session.config.units_per_tick;
        let win = self.session.config.vtx2d.max_sep_short;
        let mut total = 0.0;
        let mut attached = 0.0;
        for sh in &slice.hits {
            let pos = [f64::from(sh.hit.wire), sh.hit.tick * upt];
            if sep2(pos, cand.pos) > win {
                continue;
            }
            total += sh.hit.charge;
            if sh.in_traj == cand.tj_a || sh.in_traj == cand.tj_b {
                attached += sh.hit.charge;
            }
        }
        if total > 0.0 {
            attached / total
        } else {
            1.0
        }
    }
}

/// Attaches a trajectory end that points at the middle of another
/// trajectory: the other trajectory is split at the closest point and
/// all three pieces share a new vertex. Returns the vertex local ID.
pub fn attach_end_to_middle(
    session: &RecoSession<'_>,
    slice: &mut RecoSlice,
    tj_id: i32,
    end: usize,
    other_id: i32,
) -> Option<i32> {
    let cuts = &session.config.vtx2d;
    let end_pos = slice.traj(tj_id)?.end_pos(end);
    let other = slice.traj(other_id)?;

    let (ipt, closest) = other
        .pts
        .iter()
        .enumerate()
        .filter(|(_, tp)| tp.has_charge())
        .map(|(i, tp)| (i, sep2(tp.pos, end_pos)))
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    if closest > cuts.max_sep_short {
        return None;
    }
    // near either end of the other trajectory this is an ordinary
    // end-end vertex, not a split
    if ipt < 2 || ipt + 2 >= other.pts.len() {
        return None;
    }
    // both split sides need a charged point; checked before the
    // vertex is stored so a refused split consumes no IDs
    if !other.pts[..ipt].iter().any(|tp| tp.has_charge())
        || !other.pts[ipt..].iter().any(|tp| tp.has_charge())
    {
        return None;
    }

    let pos = other.pts[ipt].pos;
    let id = i32::try_from(slice.vtx2s.len()).unwrap_or(i32::MAX - 1) + 1;
    let plane = other.plane;
    let vx = Vertex2D {
        pos,
        pos_err: [0.5, 0.5],
        traj_count: 0,
        topo: VtxTopology::EndMiddle,
        plane,
        id,
        uid: session.ids.next_vertex(),
        score: 2.0,
        traj_chg_frac: 1.0,
        ..Vertex2D::default()
    };
    slice.vtx2s.push(vx);

    slice.split_traj(other_id, ipt, id, session.ids.next_traj())?;
    if let Some(tj) = slice.traj_mut(tj_id) {
        tj.vtx_id[end] = id;
        tj.end_flags[end].at_vertex = true;
        tj.alg.vertex_attached = true;
    }
    if let Some(vx) = slice.vtx2_mut(id) {
        vx.traj_count += 1;
        vx.topo = VtxTopology::Split;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiretrace_core::geometry::{LinearDedx, UniformGeometry};
    use wiretrace_core::session::EventId;
    use wiretrace_core::traj::TrajPoint;
    use wiretrace_core::{RecoConfig, TpcId};

    fn session_fixture<'a>(
        geom: &'a UniformGeometry,
        dedx: &'a LinearDedx,
    ) -> RecoSession<'a> {
        RecoSession::new(EventId::default(), geom, dedx, RecoConfig::default()).unwrap()
    }

    /// Straight trajectory from `start` along `dir`, one point per
    /// wire, unit charge.
    fn stub_traj(plane: PlaneCode, start: Point2, dir: [f64; 2], n: usize) -> Trajectory {
        let mut tj = Trajectory {
            plane,
            step_dir: 1,
            is_good: true,
            ..Trajectory::default()
        };
        let norm = (dir[0] * dir[0] + dir[1] * dir[1]).sqrt();
        let d = [dir[0] / norm, dir[1] / norm];
        for i in 0..n {
            let t = i as f64 / d[0].abs().max(1e-6);
            tj.pts.push(TrajPoint {
                plane,
                pos: [start[0] + t * d[0], start[1] + t * d[1]],
                hit_pos: [start[0] + t * d[0], start[1] + t * d[1]],
                dir: d,
                ang: (d[1] / d[0]).atan(),
                ang_err: 0.05,
                chg: 100.0,
                ..TrajPoint::default()
            });
        }
        tj.update_end_points();
        tj
    }

    #[test]
    fn test_converging_ends_make_vertex() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session = session_fixture(&geom, &dedx);
        let plane = PlaneCode::encode(0, 0, 0);
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);

        // two tracks opening from a common point near [10, 100]
        let a = stub_traj(plane, [12.0, 102.0], [1.0, 1.0], 15);
        let b = stub_traj(plane, [12.0, 98.0], [1.0, -1.0], 15);
        let id_a = slice.store_traj(a, 1);
        let id_b = slice.store_traj(b, 2);

        VertexFinder::new(&session).run_pass(&mut slice, 0);
        assert_eq!(slice.vtx2s.len(), 1);
        let vx = slice.vtx2(1).unwrap();
        assert_eq!(vx.traj_count, 2);
        assert_eq!(vx.topo, VtxTopology::StartStart);
        assert!((vx.pos[0] - 10.0).abs() < 0.5);
        assert!((vx.pos[1] - 100.0).abs() < 0.5);
        assert!(slice.traj(id_a).unwrap().vtx_id[0] == 1);
        assert!(slice.traj(id_b).unwrap().end_flags[0].at_vertex);
        // two attached trajectories with all the charge score 5.0,
        // above the default cut
        assert!(!vx.status.poor_charge);
    }

    #[test]
    fn test_low_score_vertex_flagged_poor() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let mut config = RecoConfig::default();
        config.vtx2d.min_score = 6.0;
        let session = RecoSession::new(EventId::default(), &geom, &dedx, config).unwrap();
        let plane = PlaneCode::encode(0, 0, 0);
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);

        let a = stub_traj(plane, [12.0, 102.0], [1.0, 1.0], 15);
        let b = stub_traj(plane, [12.0, 98.0], [1.0, -1.0], 15);
        slice.store_traj(a, 1);
        slice.store_traj(b, 2);

        VertexFinder::new(&session).run_pass(&mut slice, 0);
        let vx = slice.vtx2(1).unwrap();
        assert!(vx.score < 6.0);
        assert!(vx.status.poor_charge, "score below the cut flags the vertex");
    }

    #[test]
    fn test_distant_ends_make_no_vertex() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session = session_fixture(&geom, &dedx);
        let plane = PlaneCode::encode(0, 0, 0);
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);

        let a = stub_traj(plane, [0.0, 0.0], [1.0, 0.2], 10);
        let b = stub_traj(plane, [50.0, 200.0], [1.0, -0.2], 10);
        slice.store_traj(a, 1);
        slice.store_traj(b, 2);

        VertexFinder::new(&session).run_pass(&mut slice, 0);
        assert!(slice.vtx2s.is_empty());
    }

    #[test]
    fn test_parallel_trajectories_make_no_vertex() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session = session_fixture(&geom, &dedx);
        let plane = PlaneCode::encode(0, 0, 0);
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);

        let a = stub_traj(plane, [0.0, 0.0], [1.0, 0.5], 10);
        let b = stub_traj(plane, [0.0, 2.0], [1.0, 0.5], 10);
        slice.store_traj(a, 1);
        slice.store_traj(b, 2);

        VertexFinder::new(&session).run_pass(&mut slice, 0);
        assert!(slice.vtx2s.is_empty());
    }

    #[test]
    fn test_end_to_middle_split() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session = session_fixture(&geom, &dedx);
        let plane = PlaneCode::encode(0, 0, 0);
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);

        // a long straight track and a short one ending at its middle
        let long = stub_traj(plane, [0.0, 100.0], [1.0, 0.0], 21);
        let short = stub_traj(plane, [10.0, 104.0], [0.1, 1.0], 4);
        let long_id = slice.store_traj(long, 1);
        let short_id = slice.store_traj(short, 2);

        let vx_id = attach_end_to_middle(&session, &mut slice, short_id, 0, long_id).unwrap();
        let vx = slice.vtx2(vx_id).unwrap();
        assert_eq!(vx.topo, VtxTopology::Split);
        assert_eq!(vx.traj_count, 3);
        // the long track was split; its tail is a new trajectory
        assert_eq!(slice.tjs.len(), 3);
        assert_eq!(slice.traj(3).unwrap().parent_id, long_id);
        assert_eq!(slice.traj(long_id).unwrap().vtx_id[1], vx_id);
    }

    #[test]
    fn test_refused_split_stores_no_vertex() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session = session_fixture(&geom, &dedx);
        let plane = PlaneCode::encode(0, 0, 0);
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);

        // the head side of the would-be split has no charged point,
        // so the split must be refused
        let mut long = stub_traj(plane, [0.0, 100.0], [1.0, 0.0], 21);
        for tp in &mut long.pts[..5] {
            tp.chg = 0.0;
        }
        long.update_end_points();
        let short = stub_traj(plane, [5.0, 104.0], [0.1, 1.0], 4);
        let long_id = slice.store_traj(long, 1);
        let short_id = slice.store_traj(short, 2);

        assert!(attach_end_to_middle(&session, &mut slice, short_id, 0, long_id).is_none());
        assert!(slice.vtx2s.is_empty());
        assert_eq!(slice.tjs.len(), 2);
        assert_eq!(slice.traj(long_id).unwrap().pts.len(), 21);
        assert_eq!(slice.traj(short_id).unwrap().vtx_id, [0, 0]);
    }
}

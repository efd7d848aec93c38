//! Cross-plane matching of 2D trajectories into particle-flow
//! objects.
//!
//! Trajectory points are projected into a drift-sorted list; points
//! from different planes whose drift ranges overlap vote for their
//! trajectory pair. Pairs sharing trajectories combine into
//! three-plane candidates, the candidates are ranked, and the
//! winners are promoted to PFPs with 3D points, endpoints and
//! per-plane dE/dx.

use std::collections::{BTreeMap, BTreeSet};

use wiretrace_core::pfp::{MatchCandidate, Pfp, Pfp3Point, TjPoint2};
use wiretrace_core::session::RecoSession;
use wiretrace_core::slice::RecoSlice;
use wiretrace_core::traj::{Point3, ShapeCode, Trajectory, Vector3};
use wiretrace_core::PlaneCode;

/// Matches trajectories across planes and builds PFPs.
pub struct Matcher3D<'a, 'g> {
    session: &'a RecoSession<'g>,
}

impl<'a, 'g> Matcher3D<'a, 'g> {
    /// Creates a matcher bound to the run session.
    #[must_use]
    pub fn new(session: &'a RecoSession<'g>) -> Self {
        Self { session }
    }

    /// Runs the full matching chain on one slice.
    pub fn run(&self, slice: &mut RecoSlice) {
        let pts = self.collect_points(slice);
        let pair_counts = Self::count_coincidences(&pts);
        let candidates = self.assemble_candidates(slice, &pair_counts);
        slice.matches = candidates;
        self.promote_candidates(slice);
        Self::link_hierarchy(slice);
    }

    /// Links parent/daughter PFPs through shared 3D vertices: the
    /// primary PFP at a vertex adopts the others, the longest one
    /// when none is primary.
    fn link_hierarchy(slice: &mut RecoSlice) {
        let mut by_vtx: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (ip, pfp) in slice.pfps.iter().enumerate() {
            if pfp.id == 0 {
                continue;
            }
            for &vid in &pfp.vx3_id {
                if vid > 0 {
                    let members = by_vtx.entry(vid).or_default();
                    if members.last() != Some(&ip) {
                        members.push(ip);
                    }
                }
            }
        }
        for members in by_vtx.values() {
            if members.len() < 2 {
                continue;
            }
            let Some(&parent) = members.iter().max_by(|&&a, &&b| {
                let pa = &slice.pfps[a];
                let pb = &slice.pfps[b];
                u8::from(pa.primary)
                    .cmp(&u8::from(pb.primary))
                    .then(pa.length().total_cmp(&pb.length()))
            }) else {
                continue;
            };
            let parent_uid = slice.pfps[parent].uid;
            let mut adopted = Vec::new();
            for &m in members {
                if m == parent || slice.pfps[m].primary || slice.pfps[m].parent_uid != 0 {
                    continue;
                }
                slice.pfps[m].parent_uid = parent_uid;
                adopted.push(slice.pfps[m].uid);
            }
            slice.pfps[parent].dtr_uids.extend(adopted);
        }
    }

    /// Projects every usable trajectory point into the drift-sorted
    /// match list.
    fn collect_points(&self, slice: &RecoSlice) -> Vec<TjPoint2> {
        let cfg = &self.session.config;
        let upt = cfg.units_per_tick;
        let geom = self.session.geometry;
        let mut pts: Vec<TjPoint2> = Vec::new();

        for tj in slice.tjs.iter().filter(|tj| !tj.is_retired()) {
            let npts = tj.num_pts_with_charge();
            if npts < cfg.match3d.min_traj_pts {
                continue;
            }
            for (ipt, tp) in tj.pts.iter().enumerate() {
                if !tp.has_charge() {
                    continue;
                }
                // drift span of the hits behind the point; fall back
                // to a nominal width when the point carries none
                let (tick_lo, tick_hi) = tp
                    .hits
                    .iter()
                    .zip(&tp.use_hit)
                    .filter(|&(_, &used)| used)
                    .map(|(&ih, _)| {
                        let h = slice.hits[ih].hit;
                        (h.tick_lo, h.tick_hi)
                    })
                    .fold(None, |acc: Option<(f64, f64)>, (lo, hi)| match acc {
                        Some((alo, ahi)) => Some((alo.min(lo), ahi.max(hi))),
                        None => Some((lo, hi)),
                    })
                    .unwrap_or((tp.pos[1] / upt - 2.5, tp.pos[1] / upt + 2.5));
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let wire = tp.pos[0].round().max(0.0) as u32;
                pts.push(TjPoint2 {
                    dir: tp.dir,
                    wire,
                    x_lo: geom.drift_coord(tp.plane, tick_lo),
                    x_hi: geom.drift_coord(tp.plane, tick_hi),
                    plane: tp.plane,
                    traj_id: tj.id,
                    ipt,
                    npts,
                });
            }
        }
        pts.sort_by(|a, b| a.x_lo.total_cmp(&b.x_lo));
        pts
    }

    /// Sweeps the sorted list and counts drift overlaps between
    /// points of different planes.
    fn count_coincidences(pts: &[TjPoint2]) -> BTreeMap<(i32, i32), usize> {
        let mut counts: BTreeMap<(i32, i32), usize> = BTreeMap::new();
        for (i, pa) in pts.iter().enumerate() {
            for pb in &pts[i + 1..] {
                if pb.x_lo > pa.x_hi {
                    break;
                }
                if pa.plane == pb.plane
                    || pa.traj_id == pb.traj_id
                    || pa.plane.tpc_id() != pb.plane.tpc_id()
                {
                    continue;
                }
                let key = (pa.traj_id.min(pb.traj_id), pa.traj_id.max(pb.traj_id));
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Combines pair votes into ranked two- and three-plane
    /// candidates.
    fn assemble_candidates(
        &self,
        slice: &RecoSlice,
        pair_counts: &BTreeMap<(i32, i32), usize>,
    ) -> Vec<MatchCandidate> {
        let cfg = &self.session.config.match3d;
        let mut triples: BTreeSet<[i32; 3]> = BTreeSet::new();
        for &(a, b) in pair_counts.keys() {
            for &(c, d) in pair_counts.keys() {
                let third = if c == a && d != b {
                    d
                } else if d == a && c != b {
                    c
                } else {
                    continue;
                };
                let other = (b.min(third), b.max(third));
                if pair_counts.contains_key(&other) {
                    let mut ids = [a, b, third];
                    ids.sort_unstable();
                    triples.insert(ids);
                }
            }
        }

        let mut out: Vec<MatchCandidate> = Vec::new();
        for ids in &triples {
            if let Some(cand) = self.build_candidate(slice, &ids[..], pair_counts) {
                out.push(cand);
            }
        }
        let in_triple = |id: i32| triples.iter().any(|t| t.contains(&id));
        for (&(a, b), _) in pair_counts {
            if in_triple(a) && in_triple(b) {
                continue;
            }
            if let Some(cand) = self.build_candidate(slice, &[a, b], pair_counts) {
                out.push(cand);
            }
        }

        out.retain(|c| c.count >= cfg.min_count);
        out.sort_by(|a, b| b.count.total_cmp(&a.count));
        out.truncate(cfg.max_candidates);
        out
    }

    fn build_candidate(
        &self,
        slice: &RecoSlice,
        ids: &[i32],
        pair_counts: &BTreeMap<(i32, i32), usize>,
    ) -> Option<MatchCandidate> {
        // distinct planes required
        let planes: Vec<PlaneCode> = ids
            .iter()
            .map(|&id| slice.traj(id).map(|tj| tj.plane))
            .collect::<Option<Vec<_>>>()?;
        for (i, p) in planes.iter().enumerate() {
            if planes[i + 1..].contains(p) {
                return None;
            }
        }

        let mut raw = 0usize;
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                raw += pair_counts
                    .get(&(a.min(b), a.max(b)))
                    .copied()
                    .unwrap_or(0);
            }
        }
        let (pos, dir) = self.endpoints_3d(slice, ids[0], ids[1])?;

        // de-weight views that see the track nearly end-on
        let weight: f64 = planes
            .iter()
            .map(|&p| {
                let theta = self.session.geometry.wire_angle(p);
                let wire_dir = [0.0, theta.cos(), theta.sin()];
                let dot = dir[1] * wire_dir[1] + dir[2] * wire_dir[2];
                (1.0 - dot.abs()).max(0.05)
            })
            .sum::<f64>()
            / planes.len() as f64;

        let completeness: Vec<f64> = ids
            .iter()
            .map(|&id| {
                let npts = slice
                    .traj(id)
                    .map_or(1, Trajectory::num_pts_with_charge)
                    .max(1);
                let matched: usize = ids
                    .iter()
                    .filter(|&&other| other != id)
                    .map(|&other| {
                        pair_counts
                            .get(&(id.min(other), id.max(other)))
                            .copied()
                            .unwrap_or(0)
                    })
                    .max()
                    .unwrap_or(0);
                (matched as f64 / npts as f64).min(1.0)
            })
            .collect();

        Some(MatchCandidate {
            traj_ids: ids.to_vec(),
            completeness,
            count: raw as f64 * weight,
            pos: pos[0],
            dir,
        })
    }

    /// 3D endpoints from the end wires and ticks of two trajectories
    /// in different planes.
    fn endpoints_3d(
        &self,
        slice: &RecoSlice,
        id_a: i32,
        id_b: i32,
    ) -> Option<([Point3; 2], Vector3)> {
        let upt = self.session.config.units_per_tick;
        let geom = self.session.geometry;
        let tj_a = slice.traj(id_a)?;
        let tj_b = slice.traj(id_b)?;

        let mut xyz = [[0.0f64; 3]; 2];
        for end in 0..2 {
            let tp_a = tj_a.end_tp(end);
            let tp_b = tj_b.end_tp(end);
            let (y, z) =
                geom.wire_intersection(tj_a.plane, tp_a.pos[0], tj_b.plane, tp_b.pos[0])?;
            let x = 0.5
                * (geom.drift_coord(tj_a.plane, tp_a.pos[1] / upt)
                    + geom.drift_coord(tj_b.plane, tp_b.pos[1] / upt));
            xyz[end] = [x, y, z];
        }
        let mut dir = [
            xyz[1][0] - xyz[0][0],
            xyz[1][1] - xyz[0][1],
            xyz[1][2] - xyz[0][2],
        ];
        let norm = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
        if norm < 1e-6 {
            return None;
        }
        for d in &mut dir {
            *d /= norm;
        }
        Some((xyz, dir))
    }

    /// Greedily promotes non-conflicting candidates to PFPs. A
    /// trajectory belongs to at most one PFP.
    fn promote_candidates(&self, slice: &mut RecoSlice) {
        let cfg = &self.session.config.match3d;
        let mut used: BTreeSet<i32> = BTreeSet::new();
        for index in 0..slice.matches.len() {
            let cand = slice.matches[index].clone();
            if cand.traj_ids.iter().any(|id| used.contains(id)) {
                continue;
            }
            let best_completeness = cand
                .completeness
                .iter()
                .fold(0.0f64, |acc, &c| acc.max(c));
            if best_completeness < cfg.min_completeness {
                continue;
            }
            if self.build_pfp(slice, &cand, index).is_some() {
                used.extend(cand.traj_ids.iter().copied());
            }
        }
    }

    fn build_pfp(&self, slice: &mut RecoSlice, cand: &MatchCandidate, index: usize) -> Option<()> {
        let (xyz, dir) = self.endpoints_3d(slice, cand.traj_ids[0], cand.traj_ids[1])?;
        let points = self.build_3d_points(slice, cand.traj_ids[0], cand.traj_ids[1]);

        let mut traj_uids = Vec::with_capacity(cand.traj_ids.len());
        let mut shower_votes = 0usize;
        let mut best_plane = -1i32;
        let mut best_npts = 0usize;
        let mut vx3_id = [0i32; 2];
        let mut dedx = [Vec::new(), Vec::new()];
        for &id in &cand.traj_ids {
            let tj = slice.traj(id)?;
            traj_uids.push(tj.uid);
            if tj.shape == ShapeCode::Shower {
                shower_votes += 1;
            }
            let npts = tj.num_pts_with_charge();
            if npts > best_npts {
                best_npts = npts;
                #[allow(clippy::cast_possible_wrap)]
                let plane = tj.plane.plane() as i32;
                best_plane = plane;
            }
            for end in 0..2 {
                dedx[end].push(self.end_dedx(tj, end));
                if vx3_id[end] == 0 {
                    let vx2 = tj.vtx_id[end];
                    if let Some(vx) = slice.vtx2(vx2) {
                        if vx.vx3_id > 0 {
                            vx3_id[end] = vx.vx3_id;
                        }
                    }
                }
            }
        }

        let primary = vx3_id
            .iter()
            .any(|&vid| slice.vtx3(vid).is_some_and(|vx| vx.primary));
        let tpc = slice.traj(cand.traj_ids[0])?.plane.tpc_id();
        let id = i32::try_from(slice.pfps.len()).unwrap_or(i32::MAX - 1) + 1;
        let shape = if 2 * shower_votes > cand.traj_ids.len() {
            ShapeCode::Shower
        } else {
            ShapeCode::Track
        };
        slice.pfps.push(Pfp {
            traj_ids: cand.traj_ids.clone(),
            traj_uids,
            completeness: cand.completeness.clone(),
            points,
            xyz,
            dir: [dir, dir],
            dedx,
            vx3_id,
            best_plane,
            shape,
            tpc,
            eff_pur: -1.0,
            match_index: Some(index),
            id,
            uid: self.session.ids.next_pfp(),
            primary,
            ..Pfp::default()
        });
        Some(())
    }

    /// Samples matched point pairs from the two reference planes into
    /// 3D trajectory points.
    fn build_3d_points(&self, slice: &RecoSlice, id_a: i32, id_b: i32) -> Vec<Pfp3Point> {
        let upt = self.session.config.units_per_tick;
        let geom = self.session.geometry;
        let (Some(tj_a), Some(tj_b)) = (slice.traj(id_a), slice.traj(id_b)) else {
            return Vec::new();
        };
        let span_a = tj_a.end_pts[1] - tj_a.end_pts[0];
        let span_b = tj_b.end_pts[1] - tj_b.end_pts[0];
        let n3 = span_a.min(span_b) + 1;
        let mut points = Vec::with_capacity(n3);
        for k in 0..n3 {
            let frac = if n3 > 1 {
                k as f64 / (n3 - 1) as f64
            } else {
                0.0
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ipt_a = tj_a.end_pts[0] + (frac * span_a as f64).round() as usize;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ipt_b = tj_b.end_pts[0] + (frac * span_b as f64).round() as usize;
            let tp_a = &tj_a.pts[ipt_a.min(tj_a.pts.len() - 1)];
            let tp_b = &tj_b.pts[ipt_b.min(tj_b.pts.len() - 1)];
            let Some((y, z)) =
                geom.wire_intersection(tj_a.plane, tp_a.pos[0], tj_b.plane, tp_b.pos[0])
            else {
                continue;
            };
            let x = geom.drift_coord(tj_a.plane, tp_a.pos[1] / upt);
            points.push(Pfp3Point {
                pos: [x, y, z],
                sources: vec![(id_a, ipt_a), (id_b, ipt_b)],
                dedx: tp_a.chg,
                ..Pfp3Point::default()
            });
        }
        points
    }

    /// Average dE/dx over the charged points nearest one end.
    fn end_dedx(&self, tj: &Trajectory, end: usize) -> f64 {
        let upt = self.session.config.units_per_tick;
        let pitch = self.session.geometry.wire_pitch(tj.plane);
        let charged: Vec<&wiretrace_core::TrajPoint> =
            tj.pts.iter().filter(|tp| tp.has_charge()).collect();
        let take = charged.len().min(3);
        if take == 0 {
            return 0.0;
        }
        let slice_of: Vec<&&wiretrace_core::TrajPoint> = if end == 0 {
            charged.iter().take(take).collect()
        } else {
            charged.iter().rev().take(take).collect()
        };
        let sum: f64 = slice_of
            .iter()
            .map(|tp| {
                self.session
                    .dedx
                    .dedx(tp.chg / pitch, tp.pos[1] / upt, tj.plane)
            })
            .sum();
        sum / take as f64
    }
}

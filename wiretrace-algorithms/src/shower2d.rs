//! 2D shower tagging and clustering within one plane.
//!
//! Trajectories with a low multiple-scattering momentum are tagged
//! shower-like, clustered by endpoint proximity, and each cluster is
//! characterized by a charge-weighted axis, an aspect ratio and an
//! envelope polygon. Overlapping clusters merge, and track-like
//! trajectories inside an envelope are recorded as nearby.

use wiretrace_core::session::RecoSession;
use wiretrace_core::shower::{ShowerCluster2D, ShowerPoint};
use wiretrace_core::slice::RecoSlice;
use wiretrace_core::traj::ShapeCode;
use wiretrace_core::{PlaneCode, Point2};

use crate::fit::sep2;
use crate::shower3d::update_shower3d;

/// Tags and clusters 2D showers.
pub struct ShowerFinder2D<'a, 'g> {
    session: &'a RecoSession<'g>,
}

/// Union-find over member slots.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

impl<'a, 'g> ShowerFinder2D<'a, 'g> {
    /// Creates a finder bound to the run session.
    #[must_use]
    pub fn new(session: &'a RecoSession<'g>) -> Self {
        Self { session }
    }

    /// Tags shower-like trajectories and builds clusters in every
    /// plane.
    pub fn run(&self, slice: &mut RecoSlice) {
        self.tag_shower_like(slice);
        let planes: Vec<PlaneCode> = slice.wire_ranges.plane_codes().collect();
        for plane in planes {
            self.cluster_plane(slice, plane);
        }
        self.merge_overlapping(slice);
        self.mark_nearby(slice);
        self.refresh_stale_3d(slice);
    }

    /// A rerun after 3D matching can merge clusters that already
    /// belong to a 3D shower; those showers are refreshed here.
    fn refresh_stale_3d(&self, slice: &mut RecoSlice) {
        let stale: Vec<i32> = slice
            .showers3
            .iter()
            .filter(|ss| ss.id != 0 && ss.needs_update)
            .map(|ss| ss.id)
            .collect();
        for id in stale {
            update_shower3d(self.session, slice, id);
        }
    }

    /// A trajectory scatters like a shower when its MCS momentum
    /// surrogate falls below the cut. Vertex-attached ends keep their
    /// track hypothesis.
    fn tag_shower_like(&self, slice: &mut RecoSlice) {
        let max_mom = self.session.config.shower.max_mcs_mom;
        for tj in &mut slice.tjs {
            if tj.is_retired() {
                continue;
            }
            if tj.mcs_mom < max_mom && !tj.end_flags.iter().any(|f| f.at_vertex) {
                tj.shape = ShapeCode::Shower;
                tj.alg.shower_like = true;
            }
        }
    }

    fn cluster_plane(&self, slice: &mut RecoSlice, plane: PlaneCode) {
        let cuts = &self.session.config.shower;
        let members: Vec<i32> = slice
            .trajs_in_plane(plane)
            .filter(|tj| tj.shape == ShapeCode::Shower && tj.shower_id == 0)
            .map(|tj| tj.id)
            .collect();
        if members.len() < cuts.min_members {
            return;
        }

        let ends: Vec<[Point2; 2]> = members
            .iter()
            .filter_map(|&id| slice.traj(id))
            .map(|tj| [tj.end_pos(0), tj.end_pos(1)])
            .collect();
        let mut sets = DisjointSet::new(members.len());
        for i in 0..members.len() {
            for j in i + 1..members.len() {
                let near = ends[i]
                    .iter()
                    .any(|a| ends[j].iter().any(|b| sep2(*a, *b) < cuts.max_sep));
                if near {
                    sets.union(i, j);
                }
            }
        }

        let mut groups: std::collections::BTreeMap<usize, Vec<i32>> =
            std::collections::BTreeMap::new();
        for (i, &id) in members.iter().enumerate() {
            groups.entry(sets.find(i)).or_default().push(id);
        }
        for group in groups.values() {
            if group.len() >= cuts.min_members {
                self.build_cluster(slice, plane, group);
            }
        }
    }

    /// Characterizes one cluster and stores it.
    fn build_cluster(&self, slice: &mut RecoSlice, plane: PlaneCode, member_ids: &[i32]) {
        let mut points: Vec<ShowerPoint> = Vec::new();
        for &id in member_ids {
            let Some(tj) = slice.traj(id) else { continue };
            for tp in tj.pts.iter().filter(|tp| tp.has_charge()) {
                points.push(ShowerPoint {
                    pos: tp.pos,
                    rot_pos: [0.0, 0.0],
                    chg: tp.chg,
                    traj_id: id,
                });
            }
        }
        if points.len() < 3 {
            return;
        }

        let mut ss = ShowerCluster2D {
            plane,
            traj_ids: member_ids.to_vec(),
            points,
            ..ShowerCluster2D::default()
        };
        self.characterize(&mut ss);
        // a group with no transverse spread is a broken track, not a
        // shower; refused before an ID is assigned
        if ss.aspect_ratio < self.session.config.shower.min_aspect_ratio {
            return;
        }

        let id = i32::try_from(slice.showers2.len()).unwrap_or(i32::MAX - 1) + 1;
        ss.id = id;
        ss.uid = self.session.ids.next_shower();
        self.pick_parent(slice, &mut ss);
        slice.showers2.push(ss);
        for &tid in member_ids {
            if let Some(tj) = slice.traj_mut(tid) {
                tj.shower_id = id;
            }
        }
    }

    /// Axis, rotated coordinates, aspect ratio, envelope, charge
    /// density and energy of a cluster. Idempotent; clears
    /// `needs_update`.
    pub fn characterize(&self, ss: &mut ShowerCluster2D) {
        let total: f64 = ss.points.iter().map(|p| p.chg).sum();
        if total <= 0.0 {
            return;
        }
        let cx: f64 = ss.points.iter().map(|p| p.chg * p.pos[0]).sum::<f64>() / total;
        let cy: f64 = ss.points.iter().map(|p| p.chg * p.pos[1]).sum::<f64>() / total;

        // charge-weighted principal axis
        let mut sxx = 0.0;
        let mut syy = 0.0;
        let mut sxy = 0.0;
        for p in &ss.points {
            let dx = p.pos[0] - cx;
            let dy = p.pos[1] - cy;
            sxx += p.chg * dx * dx;
            syy += p.chg * dy * dy;
            sxy += p.chg * dx * dy;
        }
        ss.angle = 0.5 * (2.0 * sxy).atan2(sxx - syy);
        ss.angle_err = 0.1;

        let (cos_a, sin_a) = (ss.angle.cos(), ss.angle.sin());
        let mut var_u = 0.0;
        let mut var_v = 0.0;
        for p in &mut ss.points {
            let dx = p.pos[0] - cx;
            let dy = p.pos[1] - cy;
            let u = dx * cos_a + dy * sin_a;
            let v = -dx * sin_a + dy * cos_a;
            p.rot_pos = [u, v];
            var_u += p.chg * u * u;
            var_v += p.chg * v * v;
        }
        ss.aspect_ratio = if var_u > 0.0 {
            (var_v / var_u).sqrt()
        } else {
            1.0
        };
        ss.points
            .sort_by(|a, b| a.rot_pos[0].total_cmp(&b.rot_pos[0]));

        let u_min = ss.points.first().map_or(0.0, |p| p.rot_pos[0]);
        let u_max = ss.points.last().map_or(0.0, |p| p.rot_pos[0]);
        let half_width = 2.0 * (var_v / total).sqrt().max(0.5);
        let to_plane = |u: f64, v: f64| -> Point2 {
            [cx + u * cos_a - v * sin_a, cy + u * sin_a + v * cos_a]
        };
        ss.envelope = vec![
            to_plane(u_min, -half_width),
            to_plane(u_max, -half_width),
            to_plane(u_max, half_width),
            to_plane(u_min, half_width),
        ];
        ss.envelope_area = (u_max - u_min).abs() * 2.0 * half_width;
        ss.chg_density = if ss.envelope_area > 0.0 {
            total / ss.envelope_area
        } else {
            0.0
        };
        ss.energy = total * self.session.config.shower.energy_scale;
        ss.needs_update = false;
    }

    /// The parent is the most track-like member starting nearest the
    /// low-charge end of the axis. A large figure of merit means no
    /// convincing parent.
    fn pick_parent(&self, slice: &RecoSlice, ss: &mut ShowerCluster2D) {
        // charge grows along a shower, so the start is the low-u end
        // when the charge centroid sits beyond the mid-point
        let u_mid = ss
            .points
            .first()
            .zip(ss.points.last())
            .map_or(0.0, |(a, b)| 0.5 * (a.rot_pos[0] + b.rot_pos[0]));
        let chg_u: f64 = {
            let total: f64 = ss.points.iter().map(|p| p.chg).sum();
            ss.points.iter().map(|p| p.chg * p.rot_pos[0]).sum::<f64>() / total.max(1e-6)
        };
        let start_u = if chg_u >= u_mid {
            ss.points.first().map_or(0.0, |p| p.rot_pos[0])
        } else {
            ss.points.last().map_or(0.0, |p| p.rot_pos[0])
        };
        ss.dir_fom = ((chg_u - u_mid).abs() / (ss.envelope_area.sqrt() + 1.0)).min(1.0);

        let start_pos = ss
            .points
            .iter()
            .min_by(|a, b| {
                (a.rot_pos[0] - start_u)
                    .abs()
                    .total_cmp(&(b.rot_pos[0] - start_u).abs())
            })
            .map_or([0.0, 0.0], |p| p.pos);

        let mut best: Option<(i32, f64)> = None;
        for &id in &ss.traj_ids {
            let Some(tj) = slice.traj(id) else { continue };
            let d = sep2(tj.end_pos(0), start_pos).min(sep2(tj.end_pos(1), start_pos));
            let fom = d / (1.0 + tj.mcs_mom / 100.0);
            if best.is_none_or(|(_, b)| fom < b) {
                best = Some((id, fom));
            }
        }
        if let Some((id, fom)) = best {
            ss.parent_id = id;
            ss.parent_fom = fom;
        }
    }

    /// Merges clusters in the same plane whose envelopes overlap.
    fn merge_overlapping(&self, slice: &mut RecoSlice) {
        let merge_fom = self.session.config.shower.merge_fom;
        loop {
            let mut merge_pair: Option<(usize, usize)> = None;
            'outer: for i in 0..slice.showers2.len() {
                for j in i + 1..slice.showers2.len() {
                    let (a, b) = (&slice.showers2[i], &slice.showers2[j]);
                    if a.id == 0 || b.id == 0 || a.plane != b.plane {
                        continue;
                    }
                    if Self::overlap_frac(a, b) > merge_fom {
                        merge_pair = Some((i, j));
                        break 'outer;
                    }
                }
            }
            let Some((i, j)) = merge_pair else { break };
            self.merge_into(slice, i, j);
        }
    }

    /// Fraction of the smaller cluster's points inside the other's
    /// envelope.
    fn overlap_frac(a: &ShowerCluster2D, b: &ShowerCluster2D) -> f64 {
        let (small, big) = if a.points.len() <= b.points.len() {
            (a, b)
        } else {
            (b, a)
        };
        let inside = small
            .points
            .iter()
            .filter(|p| big.envelope_contains(&p.pos))
            .count();
        inside as f64 / small.points.len().max(1) as f64
    }

    fn merge_into(&self, slice: &mut RecoSlice, i: usize, j: usize) {
        let absorbed = slice.showers2[j].clone();
        let winner_id = slice.showers2[i].id;
        {
            let ss = &mut slice.showers2[i];
            ss.traj_ids.extend(absorbed.traj_ids.iter().copied());
            ss.points.extend(absorbed.points.iter().copied());
            ss.needs_update = true;
        }
        for &tid in &absorbed.traj_ids {
            if let Some(tj) = slice.traj_mut(tid) {
                tj.shower_id = winner_id;
            }
        }
        slice.showers2[j].id = 0;
        // a constituent of a matched 3D shower changed; its 3D
        // summary is stale until refreshed
        for ss3_id in [slice.showers2[i].ss3_id, absorbed.ss3_id] {
            if ss3_id > 0 {
                if let Some(ss3) = slice.shower3_mut(ss3_id) {
                    ss3.needs_update = true;
                }
            }
        }
        let mut ss = std::mem::take(&mut slice.showers2[i]);
        self.characterize(&mut ss);
        self.pick_parent(slice, &mut ss);
        slice.showers2[i] = ss;
    }

    /// Records track-like trajectories whose points fall inside a
    /// shower envelope and flags those points.
    fn mark_nearby(&self, slice: &mut RecoSlice) {
        for si in 0..slice.showers2.len() {
            if slice.showers2[si].id == 0 {
                continue;
            }
            let mut near: Vec<i32> = Vec::new();
            for tj in slice.tjs.iter().filter(|tj| !tj.is_retired()) {
                if tj.plane != slice.showers2[si].plane
                    || slice.showers2[si].traj_ids.contains(&tj.id)
                {
                    continue;
                }
                let inside = tj
                    .pts
                    .iter()
                    .filter(|tp| tp.has_charge())
                    .any(|tp| slice.showers2[si].envelope_contains(&tp.pos));
                if inside {
                    near.push(tj.id);
                }
            }
            for &tid in &near {
                if let Some(tj) = slice.traj_mut(tid) {
                    for tp in &mut tj.pts {
                        tp.env.near_shower = true;
                    }
                }
            }
            slice.showers2[si].near_traj_ids = near;
        }
    }
}

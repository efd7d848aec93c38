//! Cross-plane matching of 2D shower clusters into 3D showers.

use wiretrace_core::session::RecoSession;
use wiretrace_core::shower::{Shower3D, ShowerCluster2D};
use wiretrace_core::slice::RecoSlice;
use wiretrace_core::traj::Point3;
use wiretrace_core::PlaneCode;

/// Matches 2D shower clusters across planes.
pub struct ShowerMatcher3D<'a, 'g> {
    session: &'a RecoSession<'g>,
}

struct ClusterView {
    id: i32,
    plane: PlaneCode,
    energy: f64,
    center_wire: f64,
    center_x: f64,
    start_wire: f64,
    start_x: f64,
    end_wire: f64,
    end_x: f64,
    aspect: f64,
}

impl<'a, 'g> ShowerMatcher3D<'a, 'g> {
    /// Creates a matcher bound to the run session.
    #[must_use]
    pub fn new(session: &'a RecoSession<'g>) -> Self {
        Self { session }
    }

    /// Matches clusters, best energy balance first.
    pub fn run(&self, slice: &mut RecoSlice) {
        let views: Vec<ClusterView> = slice
            .showers2
            .iter()
            .filter(|ss| ss.id != 0 && ss.ss3_id == 0)
            .map(|ss| self.view(ss))
            .collect();

        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for i in 0..views.len() {
            for j in i + 1..views.len() {
                if let Some(fom) = self.pair_fom(&views[i], &views[j]) {
                    pairs.push((fom, i, j));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        for (_, i, j) in pairs {
            self.promote(slice, &views, i, j);
        }
    }

    fn view(&self, ss: &ShowerCluster2D) -> ClusterView {
        let upt = self.session.config.units_per_tick;
        let geom = self.session.geometry;
        let total: f64 = ss.points.iter().map(|p| p.chg).sum::<f64>().max(1e-6);
        let cw: f64 = ss.points.iter().map(|p| p.chg * p.pos[0]).sum::<f64>() / total;
        let ct: f64 = ss.points.iter().map(|p| p.chg * p.pos[1]).sum::<f64>() / total;
        // points are kept sorted along the axis by the characterizer
        let start = ss.points.first().map_or([cw, ct], |p| p.pos);
        let end = ss.points.last().map_or([cw, ct], |p| p.pos);
        ClusterView {
            id: ss.id,
            plane: ss.plane,
            energy: ss.energy,
            center_wire: cw,
            center_x: geom.drift_coord(ss.plane, ct / upt),
            start_wire: start[0],
            start_x: geom.drift_coord(ss.plane, start[1] / upt),
            end_wire: end[0],
            end_x: geom.drift_coord(ss.plane, end[1] / upt),
            aspect: ss.aspect_ratio,
        }
    }

    /// Energy balance and drift agreement of a cluster pair; `None`
    /// when they cannot be the same shower.
    fn pair_fom(&self, a: &ClusterView, b: &ClusterView) -> Option<f64> {
        let cuts = &self.session.config.shower;
        if a.plane == b.plane || a.plane.tpc_id() != b.plane.tpc_id() {
            return None;
        }
        let esum = a.energy + b.energy;
        if esum <= 0.0 {
            return None;
        }
        let asym = (a.energy - b.energy).abs() / esum;
        if asym > cuts.max_energy_asym {
            return None;
        }
        let dx = (a.center_x - b.center_x).abs();
        if dx > cuts.max_dx {
            return None;
        }
        Some(asym + dx / cuts.max_dx)
    }

    fn promote(&self, slice: &mut RecoSlice, views: &[ClusterView], i: usize, j: usize) {
        let free = |slice: &RecoSlice, id: i32| {
            slice.shower2(id).is_some_and(|ss| ss.ss3_id == 0)
        };
        let (va, vb) = (&views[i], &views[j]);
        if !free(slice, va.id) || !free(slice, vb.id) {
            return;
        }
        let geom = self.session.geometry;
        let Some((cy, cz)) =
            geom.wire_intersection(va.plane, va.center_wire, vb.plane, vb.center_wire)
        else {
            return;
        };
        let chg_pos: Point3 = [0.5 * (va.center_x + vb.center_x), cy, cz];

        let (Some((sy, sz)), Some((ey, ez))) = (
            geom.wire_intersection(va.plane, va.start_wire, vb.plane, vb.start_wire),
            geom.wire_intersection(va.plane, va.end_wire, vb.plane, vb.end_wire),
        ) else {
            return;
        };
        let start: Point3 = [0.5 * (va.start_x + vb.start_x), sy, sz];
        let end: Point3 = [0.5 * (va.end_x + vb.end_x), ey, ez];
        let mut dir = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
        let len = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
        if len > 1e-6 {
            for d in &mut dir {
                *d /= len;
            }
        }

        let num_planes = slice.num_planes.max(2);
        let mut energy = vec![0.0; num_planes];
        let mut cluster_ids = vec![0i32; num_planes];
        for v in [va, vb] {
            let p = v.plane.plane() as usize;
            if p < num_planes {
                energy[p] = v.energy;
                cluster_ids[p] = v.id;
            }
        }

        // try to complete with the remaining plane
        for v in views {
            let p = v.plane.plane() as usize;
            if p >= num_planes || cluster_ids[p] != 0 || !free(slice, v.id) {
                continue;
            }
            if self.pair_fom(va, v).is_some() || self.pair_fom(vb, v).is_some() {
                energy[p] = v.energy;
                cluster_ids[p] = v.id;
                break;
            }
        }

        let best_plane = energy
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(-1, |(p, _)| {
                #[allow(clippy::cast_possible_wrap)]
                let p = p as i32;
                p
            });

        let open_angle = (2.0 * 0.5 * (va.aspect + vb.aspect)).atan();
        let (pfp_index, parent_uid, vx3_id) = self.link_pfp(slice, &cluster_ids);
        let dedx = self.start_dedx(slice, &cluster_ids, num_planes);

        let id = i32::try_from(slice.showers3.len()).unwrap_or(i32::MAX - 1) + 1;
        slice.showers3.push(Shower3D {
            dir,
            start,
            end,
            chg_pos,
            len,
            open_angle,
            energy,
            dedx,
            tpc: va.plane.tpc_id(),
            cluster_ids: cluster_ids.clone(),
            best_plane,
            pfp_index,
            vx3_id,
            parent_uid,
            id,
            uid: self.session.ids.next_shower(),
            needs_update: false,
        });
        for cid in cluster_ids {
            if cid > 0 {
                if let Some(ss) = slice.showers2.iter_mut().find(|ss| ss.id == cid) {
                    ss.ss3_id = id;
                }
            }
        }
    }

    /// Links the shower to a PFP through any member trajectory, and
    /// to a 3D vertex through that trajectory's 2D vertices.
    fn link_pfp(&self, slice: &RecoSlice, cluster_ids: &[i32]) -> (Option<usize>, i32, i32) {
        for &cid in cluster_ids {
            let Some(ss) = slice.shower2(cid) else { continue };
            for &tid in &ss.traj_ids {
                if let Some((idx, pfp)) = slice
                    .pfps
                    .iter()
                    .enumerate()
                    .find(|(_, pfp)| pfp.id != 0 && pfp.traj_ids.contains(&tid))
                {
                    let vx3 = if pfp.vx3_id[0] > 0 {
                        pfp.vx3_id[0]
                    } else {
                        pfp.vx3_id[1]
                    };
                    return (Some(idx), pfp.uid, vx3);
                }
            }
        }
        (None, 0, 0)
    }

    /// dE/dx near the shower start, per plane, from the parent
    /// trajectory of each constituent cluster.
    fn start_dedx(&self, slice: &RecoSlice, cluster_ids: &[i32], num_planes: usize) -> Vec<f64> {
        let upt = self.session.config.units_per_tick;
        let mut out = vec![0.0; num_planes];
        for &cid in cluster_ids {
            let Some(ss) = slice.shower2(cid) else { continue };
            let Some(parent) = slice.traj(ss.parent_id) else {
                continue;
            };
            let pitch = self.session.geometry.wire_pitch(parent.plane);
            let charged: Vec<_> = parent.pts.iter().filter(|tp| tp.has_charge()).take(3).collect();
            if charged.is_empty() {
                continue;
            }
            let sum: f64 = charged
                .iter()
                .map(|tp| {
                    self.session
                        .dedx
                        .dedx(tp.chg / pitch, tp.pos[1] / upt, parent.plane)
                })
                .sum();
            let p = ss.plane.plane() as usize;
            if p < num_planes {
                out[p] = sum / charged.len() as f64;
            }
        }
        out
    }
}

/// Refreshes a 3D shower whose constituents changed: energies, the
/// charge center and the stale flag.
pub fn update_shower3d(session: &RecoSession<'_>, slice: &mut RecoSlice, id: i32) {
    let Some(index) = slice
        .showers3
        .iter()
        .position(|ss| ss.id == id && ss.id != 0)
    else {
        return;
    };
    if !slice.showers3[index].needs_update {
        return;
    }
    let upt = session.config.units_per_tick;
    let geom = session.geometry;
    let cluster_ids = slice.showers3[index].cluster_ids.clone();

    let mut energy = vec![0.0; cluster_ids.len()];
    let mut centers: Vec<(PlaneCode, f64, f64)> = Vec::new();
    for (p, &cid) in cluster_ids.iter().enumerate() {
        let Some(ss) = slice.shower2(cid) else { continue };
        energy[p] = ss.energy;
        let total = ss.total_charge().max(1e-6);
        let cw: f64 = ss.points.iter().map(|pt| pt.chg * pt.pos[0]).sum::<f64>() / total;
        let ct: f64 = ss.points.iter().map(|pt| pt.chg * pt.pos[1]).sum::<f64>() / total;
        centers.push((ss.plane, cw, geom.drift_coord(ss.plane, ct / upt)));
    }
    if centers.len() >= 2 {
        if let Some((y, z)) =
            geom.wire_intersection(centers[0].0, centers[0].1, centers[1].0, centers[1].1)
        {
            let x = 0.5 * (centers[0].2 + centers[1].2);
            slice.showers3[index].chg_pos = [x, y, z];
        }
    }
    slice.showers3[index].energy = energy;
    slice.showers3[index].needs_update = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use wiretrace_core::geometry::{LinearDedx, UniformGeometry};
    use wiretrace_core::session::EventId;
    use wiretrace_core::shower::ShowerPoint;
    use wiretrace_core::{RecoConfig, TpcId};

    use crate::shower2d::ShowerFinder2D;

    /// Cluster along the wire axis centered on `center_wire` at
    /// `tick`, already characterized.
    fn push_cluster(
        session: &RecoSession<'_>,
        slice: &mut RecoSlice,
        plane: PlaneCode,
        center_wire: f64,
        wire_step: f64,
        tick: f64,
        chg: f64,
    ) -> i32 {
        let upt = session.config.units_per_tick;
        let mut points = Vec::new();
        for k in -5i32..=5 {
            let spread = if k % 2 == 0 { 0.4 } else { -0.4 };
            points.push(ShowerPoint {
                pos: [
                    center_wire + f64::from(k) * wire_step,
                    (tick + f64::from(k)) * upt + spread,
                ],
                rot_pos: [0.0, 0.0],
                chg,
                traj_id: 1,
            });
        }
        let id = i32::try_from(slice.showers2.len()).unwrap() + 1;
        let mut ss = ShowerCluster2D {
            plane,
            traj_ids: vec![1],
            points,
            id,
            uid: id,
            ..ShowerCluster2D::default()
        };
        ShowerFinder2D::new(session).characterize(&mut ss);
        slice.showers2.push(ss);
        id
    }

    #[test]
    fn test_balanced_clusters_match() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 0), 50.0, 1.0, 1000.0, 100.0);
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 2), 100.0, 2.0, 1000.0, 100.0);

        ShowerMatcher3D::new(&session).run(&mut slice);
        assert_eq!(slice.showers3.len(), 1);
        let ss3 = &slice.showers3[0];
        // wires 50 and 100 cross at (y, z) = (0, 30)
        assert_relative_eq!(ss3.chg_pos[1], 0.0, epsilon = 0.5);
        assert_relative_eq!(ss3.chg_pos[2], 30.0, epsilon = 0.5);
        assert!(ss3.len > 0.0);
        assert!(ss3.open_angle > 0.0);
        assert_eq!(slice.shower2(1).unwrap().ss3_id, 1);
        assert_eq!(slice.shower2(2).unwrap().ss3_id, 1);
    }

    #[test]
    fn test_merged_constituent_refreshes_shower() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 0), 50.0, 1.0, 1000.0, 100.0);
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 2), 100.0, 2.0, 1000.0, 100.0);
        ShowerMatcher3D::new(&session).run(&mut slice);
        assert_eq!(slice.showers3.len(), 1);
        let energy_before = slice.showers3[0].energy[0];
        assert!(energy_before > 0.0);

        // an overlapping duplicate merges into the matched cluster on
        // a clustering rerun, doubling its charge; the stale 3D
        // summary is refreshed at the end of the rerun
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 0), 50.0, 1.0, 1000.0, 100.0);
        ShowerFinder2D::new(&session).run(&mut slice);

        let ss3 = &slice.showers3[0];
        assert!(!ss3.needs_update);
        assert_relative_eq!(ss3.energy[0], 2.0 * energy_before, epsilon = 1e-9);
    }

    #[test]
    fn test_unbalanced_energies_do_not_match() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 0), 50.0, 1.0, 1000.0, 100.0);
        // factor 20 energy imbalance between the views
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 2), 100.0, 2.0, 1000.0, 2000.0);

        ShowerMatcher3D::new(&session).run(&mut slice);
        assert!(slice.showers3.is_empty());
    }

    #[test]
    fn test_drift_separated_clusters_do_not_match() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let mut slice = RecoSlice::new(1, TpcId::default(), 3);
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 0), 50.0, 1.0, 1000.0, 100.0);
        // 100 ticks is 8 cm of drift, beyond the 2 cm tolerance
        push_cluster(&session, &mut slice, PlaneCode::encode(0, 0, 2), 100.0, 2.0, 1100.0, 100.0);

        ShowerMatcher3D::new(&session).run(&mut slice);
        assert!(slice.showers3.is_empty());
    }
}

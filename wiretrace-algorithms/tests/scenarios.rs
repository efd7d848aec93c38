//! End-to-end reconstruction scenarios exercised through the public
//! API.

use wiretrace_algorithms::{reconstruct_event, SliceInput, Vertex3dMatcher};
use wiretrace_core::geometry::{LinearDedx, UniformGeometry};
use wiretrace_core::session::{EventId, RecoSession};
use wiretrace_core::vertex::Vertex2D;
use wiretrace_core::{Hit, PlaneCode, RecoConfig, RecoSlice, TpcId};

fn session<'a>(
    geom: &'a UniformGeometry,
    dedx: &'a LinearDedx,
    config: RecoConfig,
) -> RecoSession<'a> {
    RecoSession::new(EventId::default(), geom, dedx, config).unwrap()
}

/// Straight single-plane track: one hit per wire, constant charge.
fn line_hits(plane: PlaneCode, wires: impl Iterator<Item = u32>, slope: f64) -> Vec<Hit> {
    wires
        .map(|w| Hit::new(plane, w, 1000.0 + slope * f64::from(w), 100.0, 2.0))
        .collect()
}

#[test]
fn clean_track_ends_with_signal_loss_at_both_ends() {
    let geom = UniformGeometry::default();
    let dedx = LinearDedx::default();
    let session = session(&geom, &dedx, RecoConfig::default());
    let plane = PlaneCode::encode(0, 0, 0);
    let input = SliceInput {
        id: 1,
        hits: line_hits(plane, 0..30, 2.0),
        ..SliceInput::default()
    };

    let result = reconstruct_event(&session, vec![input]);
    assert_eq!(result.stats.trajectories, 1);
    let slice = &result.slices[0];
    let tj = slice.traj(1).unwrap();
    assert_eq!(tj.num_pts_with_charge(), 30);
    assert!(tj.end_flags[0].signal_loss && tj.end_flags[1].signal_loss);
    assert!(!tj.end_flags[0].dead_wire && !tj.end_flags[1].dead_wire);
    assert!(tj.charge_span_valid());
    assert!(slice.hits.iter().all(|sh| sh.in_traj == tj.id));
}

#[test]
fn dead_region_within_budget_keeps_one_trajectory() {
    let geom = UniformGeometry::default();
    let dedx = LinearDedx::default();
    let mut config = RecoConfig::default();
    config.max_wire_skip_no_signal = 6;
    let session = session(&geom, &dedx, config);
    let plane = PlaneCode::encode(0, 0, 0);
    let dead: Vec<u32> = vec![13, 14, 15, 16];
    let input = SliceInput {
        id: 1,
        hits: line_hits(plane, (0..30).filter(|w| !dead.contains(w)), 2.0),
        dead_wires: dead.iter().map(|&w| (plane, w)).collect(),
        ..SliceInput::default()
    };

    let result = reconstruct_event(&session, vec![input]);
    assert_eq!(result.stats.trajectories, 1);
    let tj = result.slices[0].traj(1).unwrap();
    assert_eq!(tj.num_pts_with_charge(), 26);
    assert!(tj.pts.iter().any(|tp| tp.env.near_dead_wire));
}

#[test]
fn dead_region_beyond_budget_splits_with_dead_wire_flags() {
    let geom = UniformGeometry::default();
    let dedx = LinearDedx::default();
    let mut config = RecoConfig::default();
    config.max_wire_skip_no_signal = 2;
    let session = session(&geom, &dedx, config);
    let plane = PlaneCode::encode(0, 0, 0);
    let dead: Vec<u32> = vec![13, 14, 15, 16];
    let input = SliceInput {
        id: 1,
        hits: line_hits(plane, (0..30).filter(|w| !dead.contains(w)), 2.0),
        dead_wires: dead.iter().map(|&w| (plane, w)).collect(),
        ..SliceInput::default()
    };

    let result = reconstruct_event(&session, vec![input]);
    assert_eq!(result.stats.trajectories, 2);
    let slice = &result.slices[0];
    let first = slice.traj(1).unwrap();
    let second = slice.traj(2).unwrap();
    assert!(first.end_flags[1].dead_wire);
    assert!(!first.end_flags[1].signal_loss);
    assert!(second.end_flags[0].dead_wire);
    // the two halves never share a hit
    for sh in &slice.hits {
        assert!(sh.in_traj == first.id || sh.in_traj == second.id);
    }
}

#[test]
fn vertex_match_requires_drift_agreement() {
    let geom = UniformGeometry::default();
    let dedx = LinearDedx::default();
    let session = session(&geom, &dedx, RecoConfig::default());
    let upt = session.config.units_per_tick;

    let push = |slice: &mut RecoSlice, plane: u32, wire: f64, tick: f64| {
        let id = i32::try_from(slice.vtx2s.len()).unwrap() + 1;
        slice.vtx2s.push(Vertex2D {
            pos: [wire, tick * upt],
            traj_count: 2,
            plane: PlaneCode::encode(0, 0, plane),
            id,
            uid: id,
            score: 4.0,
            ..Vertex2D::default()
        });
    };

    // agreeing ticks in two planes, intersecting wires
    let mut agree = RecoSlice::new(1, TpcId::default(), 3);
    push(&mut agree, 0, 50.0, 1000.0);
    push(&mut agree, 2, 100.0, 1004.0);
    Vertex3dMatcher::new(&session).run(&mut agree);
    assert_eq!(agree.vtx3s.len(), 1);
    assert!(agree.vtx2s.iter().all(|vx| vx.vx3_id == 1));

    // 100 ticks of disagreement is 8 cm of drift
    let mut disagree = RecoSlice::new(2, TpcId::default(), 3);
    push(&mut disagree, 0, 50.0, 1000.0);
    push(&mut disagree, 2, 100.0, 1100.0);
    Vertex3dMatcher::new(&session).run(&mut disagree);
    assert!(disagree.vtx3s.is_empty());
}

#[test]
fn rising_end_charge_is_tagged_bragg_not_clean_stop() {
    let geom = UniformGeometry::default();
    let dedx = LinearDedx::default();
    let session = session(&geom, &dedx, RecoConfig::default());
    let plane = PlaneCode::encode(0, 0, 0);
    let hits: Vec<Hit> = (0..30u32)
        .map(|w| {
            let charge = if w < 25 {
                100.0
            } else {
                100.0 + 10.0 * f64::from(w - 24)
            };
            Hit::new(plane, w, 1000.0 + 2.0 * f64::from(w), charge, 2.0)
        })
        .collect();
    let input = SliceInput {
        id: 1,
        hits,
        ..SliceInput::default()
    };

    let result = reconstruct_event(&session, vec![input]);
    assert_eq!(result.stats.trajectories, 1);
    let tj = result.slices[0].traj(1).unwrap();
    assert!(tj.end_flags[1].bragg);
    assert!(!tj.end_flags[1].signal_loss);
    assert!(tj.end_flags[0].signal_loss);
    assert!(tj.alg.bragg_checked);
}

#[test]
fn pfp_constituents_occupy_distinct_planes() {
    let geom = UniformGeometry::default();
    let dedx = LinearDedx::default();
    let session = session(&geom, &dedx, RecoConfig::default());
    // one 3D track along z at y = 0, projected into all three planes
    let mut hits = Vec::new();
    for k in 0..25u32 {
        let z = 30.0 + 0.6 * f64::from(k);
        let tick = 1000.0 + 2.0 * f64::from(k);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let w01 = (z / 0.6).round() as u32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let w2 = (z / 0.3).round() as u32;
        hits.push(Hit::new(PlaneCode::encode(0, 0, 0), w01, tick, 100.0, 2.0));
        hits.push(Hit::new(PlaneCode::encode(0, 0, 1), w01, tick, 100.0, 2.0));
        hits.push(Hit::new(PlaneCode::encode(0, 0, 2), w2, tick, 100.0, 2.0));
    }
    let input = SliceInput {
        id: 1,
        hits,
        ..SliceInput::default()
    };

    let result = reconstruct_event(&session, vec![input]);
    assert_eq!(result.stats.pfps, 1);
    let slice = &result.slices[0];
    let pfp = &slice.pfps[0];
    let planes: Vec<PlaneCode> = pfp
        .traj_ids
        .iter()
        .map(|&id| slice.traj(id).unwrap().plane)
        .collect();
    assert!(pfp.planes_distinct(&planes));
    assert!(pfp.completeness.iter().all(|&c| c > 0.9));
    assert!(pfp.length() > 10.0);
}

//! The reconstruction pipeline: slices in, reconstructed slices out.
//!
//! Slices are independent partitions of one event and are processed
//! in parallel. A failure inside one slice invalidates that slice
//! only; the rest of the event completes normally.

use rayon::prelude::*;

use wiretrace_core::error::SliceError;
use wiretrace_core::hit::{Hit, SliceHit};
use wiretrace_core::index::HitIndex;
use wiretrace_core::session::RecoSession;
use wiretrace_core::slice::RecoSlice;
use wiretrace_core::{PlaneCode, TpcId};

use crate::match3d::Matcher3D;
use crate::shower2d::ShowerFinder2D;
use crate::shower3d::ShowerMatcher3D;
use crate::stepper::TrajStepper;
use crate::vertex2d::VertexFinder;
use crate::vertex3d::Vertex3dMatcher;

/// Input for one slice: its hits and the known-dead wires.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SliceInput {
    /// Slice ID from the partitioning stage.
    pub id: i32,
    /// Owning TPC.
    #[cfg_attr(feature = "serde", serde(default))]
    pub tpc: TpcId,
    /// Hits of the slice, in any order.
    pub hits: Vec<Hit>,
    /// (plane, wire) pairs known to be unresponsive.
    #[cfg_attr(feature = "serde", serde(default))]
    pub dead_wires: Vec<(PlaneCode, u32)>,
}

/// Object counts over the reconstructed event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecoStatistics {
    /// Slices processed.
    pub slices: usize,
    /// Slices that completed.
    pub valid_slices: usize,
    /// Live trajectories.
    pub trajectories: usize,
    /// 2D vertices.
    pub vertices_2d: usize,
    /// 3D vertices.
    pub vertices_3d: usize,
    /// Particle-flow objects.
    pub pfps: usize,
    /// 2D shower clusters.
    pub showers_2d: usize,
    /// 3D showers.
    pub showers_3d: usize,
}

/// Everything produced for one event.
#[derive(Debug, Default)]
pub struct EventResult {
    /// Reconstructed slices, one per input, in input order.
    pub slices: Vec<RecoSlice>,
    /// Failures of invalidated slices.
    pub errors: Vec<SliceError>,
    /// Object counts.
    pub stats: RecoStatistics,
}

/// Reconstructs every slice of one event in parallel.
pub fn reconstruct_event(session: &RecoSession<'_>, inputs: Vec<SliceInput>) -> EventResult {
    let outcomes: Vec<(RecoSlice, Option<SliceError>)> = inputs
        .into_par_iter()
        .map(|input| reconstruct_slice(session, input))
        .collect();

    let mut result = EventResult::default();
    for (slice, err) in outcomes {
        if let Some(err) = err {
            result.errors.push(err);
        }
        result.slices.push(slice);
    }
    result.stats = collect_stats(&result.slices);
    result
}

/// Runs the full chain on one slice: stepping and 2D vertexing per
/// pass, then 3D vertexing, 2D shower clustering, 3D matching and
/// finally 3D shower matching. Clustering runs before matching so
/// the PFP shape votes see the shower tags.
pub fn reconstruct_slice(
    session: &RecoSession<'_>,
    input: SliceInput,
) -> (RecoSlice, Option<SliceError>) {
    let num_planes = session.geometry.num_planes(input.tpc);
    let mut slice = RecoSlice::new(input.id, input.tpc, num_planes);
    slice.bounds = Some(session.geometry.bounds(input.tpc));

    let mut hits = input.hits;
    hits.sort_by(|a, b| {
        (a.plane, a.wire)
            .cmp(&(b.plane, b.wire))
            .then(a.tick.total_cmp(&b.tick))
    });
    slice.hits = hits.into_iter().map(SliceHit::new).collect();

    slice.wire_ranges = match HitIndex::build(slice.id, &slice.hits, &input.dead_wires) {
        Ok(index) => index,
        Err(err) => {
            slice.is_valid = false;
            return (slice, Some(err));
        }
    };

    let stepper = TrajStepper::new(session);
    let vertex_finder = VertexFinder::new(session);
    for pass in 0..session.config.num_passes {
        stepper.run_pass(&mut slice, pass);
        vertex_finder.run_pass(&mut slice, pass);
    }
    Vertex3dMatcher::new(session).run(&mut slice);
    ShowerFinder2D::new(session).run(&mut slice);
    Matcher3D::new(session).run(&mut slice);
    ShowerMatcher3D::new(session).run(&mut slice);

    (slice, None)
}

fn collect_stats(slices: &[RecoSlice]) -> RecoStatistics {
    let mut stats = RecoStatistics {
        slices: slices.len(),
        ..RecoStatistics::default()
    };
    for slice in slices {
        if !slice.is_valid {
            continue;
        }
        stats.valid_slices += 1;
        stats.trajectories += slice.num_live_trajs();
        stats.vertices_2d += slice.vtx2s.iter().filter(|vx| vx.is_valid()).count();
        stats.vertices_3d += slice.vtx3s.iter().filter(|vx| vx.id != 0).count();
        stats.pfps += slice.pfps.iter().filter(|p| p.id != 0).count();
        stats.showers_2d += slice.showers2.iter().filter(|ss| ss.id != 0).count();
        stats.showers_3d += slice.showers3.iter().filter(|ss| ss.id != 0).count();
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiretrace_core::geometry::{LinearDedx, UniformGeometry};
    use wiretrace_core::session::EventId;
    use wiretrace_core::RecoConfig;

    /// Hits for one straight 3D track along z at y = 0, projected
    /// into all three default planes.
    fn track_hits(n: usize) -> Vec<Hit> {
        let mut hits = Vec::new();
        for k in 0..n {
            let z = 30.0 + 0.6 * k as f64;
            let tick = 1000.0 + 2.0 * k as f64;
            // plane 0 and 1 wires advance by 1, plane 2 by 2
            hits.push(Hit::new(
                PlaneCode::encode(0, 0, 0),
                (z / 0.6).round() as u32,
                tick,
                100.0,
                2.0,
            ));
            hits.push(Hit::new(
                PlaneCode::encode(0, 0, 1),
                (z / 0.6).round() as u32,
                tick,
                100.0,
                2.0,
            ));
            hits.push(Hit::new(
                PlaneCode::encode(0, 0, 2),
                (z / 0.3).round() as u32,
                tick,
                100.0,
                2.0,
            ));
        }
        hits
    }

    #[test]
    fn test_full_chain_on_one_track() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let input = SliceInput {
            id: 1,
            hits: track_hits(25),
            ..SliceInput::default()
        };
        let result = reconstruct_event(&session, vec![input]);
        assert_eq!(result.stats.slices, 1);
        assert_eq!(result.stats.valid_slices, 1);
        assert!(result.errors.is_empty());
        // one trajectory per plane, matched into one PFP
        assert_eq!(result.stats.trajectories, 3);
        assert_eq!(result.stats.pfps, 1);
        let slice = &result.slices[0];
        assert!(slice.hits.iter().all(|sh| sh.in_traj > 0));
    }

    #[test]
    fn test_empty_slice_is_invalidated_not_fatal() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let inputs = vec![
            SliceInput {
                id: 1,
                hits: Vec::new(),
                ..SliceInput::default()
            },
            SliceInput {
                id: 2,
                hits: track_hits(25),
                ..SliceInput::default()
            },
        ];
        let result = reconstruct_event(&session, inputs);
        assert_eq!(result.stats.slices, 2);
        assert_eq!(result.stats.valid_slices, 1);
        assert_eq!(result.errors, vec![SliceError::NoHits(1)]);
        assert!(!result.slices[0].is_valid);
        assert!(result.slices[1].is_valid);
    }

    #[test]
    fn test_unsorted_input_is_sorted_internally() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let mut hits = track_hits(25);
        hits.reverse();
        let input = SliceInput {
            id: 1,
            hits,
            ..SliceInput::default()
        };
        let result = reconstruct_event(&session, vec![input]);
        assert!(result.errors.is_empty());
        assert_eq!(result.stats.trajectories, 3);
    }

    #[test]
    fn test_uids_unique_across_slices() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session =
            RecoSession::new(EventId::default(), &geom, &dedx, RecoConfig::default()).unwrap();
        let inputs = (1..=4)
            .map(|id| SliceInput {
                id,
                hits: track_hits(25),
                ..SliceInput::default()
            })
            .collect();
        let result = reconstruct_event(&session, inputs);
        let mut uids: Vec<i32> = result
            .slices
            .iter()
            .flat_map(|s| s.tjs.iter().filter(|tj| !tj.is_retired()).map(|tj| tj.uid))
            .collect();
        uids.sort_unstable();
        let before = uids.len();
        uids.dedup();
        assert_eq!(before, uids.len(), "trajectory UIDs must be unique");
        assert_eq!(before, 12);
    }
}

//! Incremental wire-by-wire trajectory stepping.
//!
//! Each pass scans every plane for unused hit pairs on adjacent
//! wires, grows a work trajectory one wire at a time, decides hit
//! membership with a projection window and a charge pull, detects
//! kinks by comparing trailing fit segments, tolerates dead and
//! quiet wires up to configured budgets, and records a distinct stop
//! reason at each end. Passes run with progressively looser cuts; a
//! trajectory accepted on an earlier pass is never reconsidered.

use wiretrace_core::geometry::PlaneCode;
use wiretrace_core::session::RecoSession;
use wiretrace_core::slice::RecoSlice;
use wiretrace_core::traj::{AngleCode, EndFlags, ShapeCode, TrajPoint, Trajectory};
use wiretrace_core::WireStatus;

use crate::fit::{delta_angle, fit_charge_trend, fit_line};

/// Outcome of projecting the work trajectory onto the next wire.
enum StepOutcome {
    /// A point was appended.
    Added,
    /// Wire skipped (dead, quiet, or no matching hit); growth
    /// continues.
    Skipped,
    /// Growth ends with these flags at the leading end.
    Stop(EndFlags),
}

/// One merged hit multiplet on a wire.
struct Multiplet {
    hits: Vec<usize>,
    tick_wse: f64,
    chg: f64,
}

/// Grows 2D trajectories within the planes of one slice.
pub struct TrajStepper<'a, 'g> {
    session: &'a RecoSession<'g>,
}

impl<'a, 'g> TrajStepper<'a, 'g> {
    /// Creates a stepper bound to the run session.
    #[must_use]
    pub fn new(session: &'a RecoSession<'g>) -> Self {
        Self { session }
    }

    /// Runs one reconstruction pass over every plane of the slice.
    pub fn run_pass(&self, slice: &mut RecoSlice, pass: usize) {
        let planes: Vec<PlaneCode> = slice.wire_ranges.plane_codes().collect();
        for plane in planes {
            self.step_plane(slice, plane, pass);
        }
    }

    fn step_plane(&self, slice: &mut RecoSlice, plane: PlaneCode, pass: usize) {
        let Some(ranges) = slice.wire_ranges.plane(plane) else {
            return;
        };
        // snapshot the seedable spans so the slice can be mutated
        // while stepping; each seed hit is attempted at most once
        let spans: Vec<(u32, usize, usize)> = (ranges.first_wire..ranges.last_wire)
            .filter_map(|w| match ranges.status(w) {
                WireStatus::Range { lo, hi } => Some((w, lo, hi)),
                _ => None,
            })
            .collect();

        for (wire, lo, hi) in spans {
            for i0 in lo..hi {
                if !slice.hits[i0].is_unused() {
                    continue;
                }
                let Some(mut work) = self.find_seed(slice, plane, wire, i0) else {
                    continue;
                };
                // growth cuts (fit window, angle windows) are per pass
                work.pass = pass;
                let end_flags = self.grow(slice, &mut work);
                work.end_flags[1] = end_flags;
                self.trim_end(slice, &mut work);
                if self.finish(slice, &mut work, pass) {
                    let uid = self.session.ids.next_traj();
                    slice.store_traj(work, uid);
                } else {
                    slice.release_work_hits(&work);
                }
            }
        }
    }

    /// Pairs the unused hit `i0` on `wire` with the closest unused
    /// hit on the nearest signal wire above and builds a two-point
    /// work trajectory. The partner search honors the same skip
    /// budget as stepping, so sparse projections still seed.
    fn find_seed(
        &self,
        slice: &mut RecoSlice,
        plane: PlaneCode,
        wire: u32,
        i0: usize,
    ) -> Option<Trajectory> {
        let cfg = &self.session.config;
        let upt = cfg.units_per_tick;
        let ranges = slice.wire_ranges.plane(plane)?;
        let mut partner = None;
        #[allow(clippy::cast_possible_truncation)]
        let max_reach = cfg.max_wire_skip_no_signal as u32 + 1;
        for w in wire + 1..=wire + max_reach {
            if !ranges.in_range(w) {
                break;
            }
            if let WireStatus::Range { lo, hi } = ranges.status(w) {
                partner = Some((lo, hi));
                break;
            }
        }
        let (nlo, nhi) = partner?;

        let h0 = slice.hits[i0].hit;
        let window = (cfg.hit_err_fac * h0.rms * upt).max(2.0);
        let mut best: Option<(usize, f64)> = None;
        for i1 in nlo..nhi {
            if !slice.hits[i1].is_unused() {
                continue;
            }
            let dw = f64::from(slice.hits[i1].hit.wire - h0.wire).max(1.0);
            let dt = ((slice.hits[i1].hit.tick - h0.tick) * upt).abs() / dw;
            if dt < window && best.is_none_or(|(_, b)| dt < b) {
                best = Some((i1, dt));
            }
        }
        let (i1, _) = best?;
        let h1 = slice.hits[i1].hit;

        let mut work = Trajectory {
            plane,
            step_dir: 1,
            chg_rms: 0.5,
            eff_pur: -1.0,
            is_good: true,
            ..Trajectory::default()
        };
        let seed_dw = f64::from(h1.wire - h0.wire).max(1.0);
        for (ih, hit) in [(i0, h0), (i1, h1)] {
            let tick_wse = hit.tick * upt;
            let slope = (h1.tick - h0.tick) * upt / seed_dw;
            let norm = (1.0 + slope * slope).sqrt();
            let tp = TrajPoint {
                plane,
                pos: [f64::from(hit.wire), tick_wse],
                hit_pos: [f64::from(hit.wire), tick_wse],
                dir: [1.0 / norm, slope / norm],
                ang: slope.atan(),
                ang_err: 0.1,
                chg: hit.charge,
                ave_chg: -1.0,
                delta_rms: 0.1,
                n_pts_fit: 2,
                angle_code: AngleCode::classify(slope.atan(), &cfg.angle_ranges),
                hits: vec![ih],
                use_hit: vec![true],
                ..TrajPoint::default()
            };
            work.pts.push(tp);
            slice.hits[ih].in_traj = -1;
        }
        work.update_end_points();
        Some(work)
    }

    /// Steps the work trajectory toward increasing wire numbers until
    /// a stop condition, returning the leading-end flags.
    fn grow(&self, slice: &mut RecoSlice, work: &mut Trajectory) -> EndFlags {
        let cfg = &self.session.config;
        let mut skip_dead = 0usize;
        let mut skip_empty = 0usize;
        let mut skip_signal = 0usize;
        let mut step = work.pts.len();

        loop {
            let Some(last) = work.pts.last() else {
                return EndFlags::default();
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let next_wire = (last.pos[0] as i64 + 1) as u32;
            let Some(ranges) = slice.wire_ranges.plane(work.plane) else {
                let mut flags = EndFlags::default();
                flags.signal_loss = true;
                return flags;
            };
            if !ranges.in_range(next_wire) {
                // ran off the instrumented wires: a clean stop
                let mut flags = EndFlags::default();
                flags.signal_loss = true;
                return flags;
            }

            let outcome = match ranges.status(next_wire) {
                WireStatus::Dead => {
                    skip_dead += 1;
                    if skip_dead + skip_empty > cfg.max_wire_skip_no_signal {
                        let mut flags = EndFlags::default();
                        flags.dead_wire = true;
                        StepOutcome::Stop(flags)
                    } else {
                        StepOutcome::Skipped
                    }
                }
                WireStatus::NoHits => {
                    skip_empty += 1;
                    if skip_dead + skip_empty > cfg.max_wire_skip_no_signal {
                        let mut flags = EndFlags::default();
                        if skip_dead > 0 {
                            flags.dead_wire = true;
                        } else {
                            flags.signal_loss = true;
                        }
                        StepOutcome::Stop(flags)
                    } else {
                        StepOutcome::Skipped
                    }
                }
                WireStatus::Range { lo, hi } => {
                    self.try_add_point(slice, work, next_wire, lo, hi, &mut skip_signal, step)
                }
            };

            match outcome {
                StepOutcome::Added => {
                    if skip_dead > 0 {
                        if let Some(tp) = work.pts.last_mut() {
                            tp.env.near_dead_wire = true;
                        }
                    }
                    skip_dead = 0;
                    skip_empty = 0;
                    skip_signal = 0;
                    step += 1;
                    if let Some(flags) = self.check_kink(slice, work) {
                        return flags;
                    }
                }
                StepOutcome::Skipped => {}
                StepOutcome::Stop(flags) => return flags,
            }
        }
    }

    /// Gathers hits on `wire` near the projected position and appends
    /// a trajectory point when an acceptable multiplet is found.
    #[allow(clippy::too_many_arguments)]
    fn try_add_point(
        &self,
        slice: &mut RecoSlice,
        work: &mut Trajectory,
        wire: u32,
        lo: usize,
        hi: usize,
        skip_signal: &mut usize,
        step: usize,
    ) -> StepOutcome {
        let cfg = &self.session.config;
        let upt = cfg.units_per_tick;
        let Some(last) = work.pts.last() else {
            return StepOutcome::Stop(EndFlags::default());
        };

        // projected time on the next wire, with a slope cap so
        // very-large-angle segments stay finite
        let slope = if last.dir[0].abs() > 1e-3 {
            (last.dir[1] / last.dir[0]).clamp(-20.0, 20.0)
        } else {
            0.0
        };
        let dw = f64::from(wire) - last.pos[0];
        let proj_t = last.pos[1] + slope * dw;

        let widen = match last.angle_code {
            AngleCode::Small => 1.0,
            AngleCode::Large => 2.0,
            AngleCode::VeryLarge => 4.0,
        };

        let mut unused: Vec<usize> = Vec::new();
        let mut saw_used_in_window = false;
        for ih in lo..hi {
            let sh = slice.hits[ih];
            let window =
                widen * (cfg.hit_err_fac * sh.hit.rms * upt).max(1.0) + 3.0 * last.delta_rms;
            if ((sh.hit.tick * upt) - proj_t).abs() > window {
                continue;
            }
            if sh.is_unused() {
                unused.push(ih);
            } else if sh.in_traj > 0 {
                saw_used_in_window = true;
            }
        }

        if unused.is_empty() {
            if saw_used_in_window {
                // walked into a previously reconstructed trajectory
                if let Some(tp) = work.pts.last_mut() {
                    tp.env.near_traj = true;
                }
                let mut flags = EndFlags::default();
                flags.at_traj = true;
                return StepOutcome::Stop(flags);
            }
            *skip_signal += 1;
            if *skip_signal > cfg.max_wire_skip_with_signal {
                let mut flags = EndFlags::default();
                flags.signal_loss = true;
                return StepOutcome::Stop(flags);
            }
            return StepOutcome::Skipped;
        }

        let Some(multiplet) = Self::best_multiplet(slice, &unused, proj_t, upt, cfg.mult_hit_sep)
        else {
            *skip_signal += 1;
            if *skip_signal > cfg.max_wire_skip_with_signal {
                let mut flags = EndFlags::default();
                flags.signal_loss = true;
                return StepOutcome::Stop(flags);
            }
            return StepOutcome::Skipped;
        };

        // charge pull against the recent average
        if work.ave_chg > 0.0 && work.num_pts_with_charge() > 2 {
            let ratio = multiplet.chg / work.ave_chg;
            let pull = (ratio - 1.0) / work.chg_rms.max(0.1);
            if pull > cfg.charge.max_pull
                || ratio < cfg.charge.min_ratio
                || ratio > cfg.charge.max_ratio
            {
                *skip_signal += 1;
                if *skip_signal > cfg.max_wire_skip_with_signal {
                    let mut flags = EndFlags::default();
                    flags.signal_loss = true;
                    return StepOutcome::Stop(flags);
                }
                return StepOutcome::Skipped;
            }
        }

        for &ih in &multiplet.hits {
            slice.hits[ih].in_traj = -1;
        }
        let n_hits = multiplet.hits.len();
        let tp = TrajPoint {
            plane: work.plane,
            pos: [f64::from(wire), multiplet.tick_wse],
            hit_pos: [f64::from(wire), multiplet.tick_wse],
            dir: last.dir,
            ang: last.ang,
            ang_err: last.ang_err,
            chg: multiplet.chg,
            step,
            hits: multiplet.hits,
            use_hit: vec![true; n_hits],
            ..TrajPoint::default()
        };
        work.pts.push(tp);
        self.update_fit(work);
        self.update_charge(work);
        StepOutcome::Added
    }

    /// Groups the in-window hits into multiplets separated by more
    /// than `mult_hit_sep` and picks the one closest to the
    /// projection. Hits inside one multiplet are merged.
    fn best_multiplet(
        slice: &RecoSlice,
        unused: &[usize],
        proj_t: f64,
        upt: f64,
        mult_hit_sep: f64,
    ) -> Option<Multiplet> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for &ih in unused {
            let t = slice.hits[ih].hit.tick * upt;
            let joins = groups
                .last()
                .and_then(|g| g.last())
                .is_some_and(|&prev| (t - slice.hits[prev].hit.tick * upt).abs() < mult_hit_sep);
            if joins {
                if let Some(group) = groups.last_mut() {
                    group.push(ih);
                }
            } else {
                groups.push(vec![ih]);
            }
        }
        let best = groups.into_iter().min_by(|a, b| {
            let da = (Self::weighted_tick(slice, a, upt) - proj_t).abs();
            let db = (Self::weighted_tick(slice, b, upt) - proj_t).abs();
            da.total_cmp(&db)
        })?;
        Some(Multiplet {
            tick_wse: Self::weighted_tick(slice, &best, upt),
            chg: best.iter().map(|&ih| slice.hits[ih].hit.charge).sum(),
            hits: best,
        })
    }

    fn weighted_tick(slice: &RecoSlice, hits: &[usize], upt: f64) -> f64 {
        let mut sum_t = 0.0;
        let mut sum_w = 0.0;
        for &ih in hits {
            let h = slice.hits[ih].hit;
            sum_t += h.tick * upt * h.charge.max(1e-6);
            sum_w += h.charge.max(1e-6);
        }
        sum_t / sum_w
    }

    /// Refits position and direction over the trailing fit window and
    /// refreshes the new point's fit quantities.
    fn update_fit(&self, work: &mut Trajectory) {
        let cfg = &self.session.config;
        let nfit = cfg.min_pts_fit[work.pass.min(cfg.min_pts_fit.len() - 1)]
            .max(2)
            .min(work.pts.len());
        let start = work.pts.len() - nfit;
        let samples: Vec<(f64, f64, f64)> = work.pts[start..]
            .iter()
            .map(|tp| (tp.hit_pos[0], tp.hit_pos[1], tp.chg.max(1e-6)))
            .collect();
        let Some(mut fit) = fit_line(&samples) else {
            return;
        };
        // a bad fit usually means the window straddles a bend; retry
        // with half the points before accepting the residual
        let mut nfit = nfit;
        if fit.chi_dof > cfg.max_chi && nfit > 3 {
            let half = nfit / 2;
            if let Some(short) = fit_line(&samples[samples.len() - half..]) {
                fit = short;
                nfit = half;
            }
        }

        let ipt = work.pts.len() - 1;
        let wire_pos = work.pts[ipt].hit_pos[0];
        let fitted_t = fit.intercept + fit.slope * wire_pos;
        let delta = (work.pts[ipt].hit_pos[1] - fitted_t).abs();
        let norm = (1.0 + fit.slope * fit.slope).sqrt();

        let prev_rms = work.pts[ipt - 1].delta_rms;
        let tp = &mut work.pts[ipt];
        tp.pos = [wire_pos, fitted_t];
        tp.dir = [1.0 / norm, fit.slope / norm];
        tp.ang = fit.slope.atan();
        tp.ang_err = (fit.slope_err / (1.0 + fit.slope * fit.slope)).max(1e-3);
        tp.angle_code = AngleCode::classify(tp.ang, &cfg.angle_ranges);
        tp.fit_chi = fit.chi_dof;
        tp.n_pts_fit = nfit;
        tp.delta = delta;
        tp.delta_rms = (0.8 * prev_rms + 0.2 * delta).max(0.05);
    }

    /// Updates the running average charge, normalized RMS and the new
    /// point's charge pull.
    fn update_charge(&self, work: &mut Trajectory) {
        let n_ave = self.session.config.n_pts_ave.max(2);
        let charged: Vec<f64> = work
            .pts
            .iter()
            .rev()
            .filter(|tp| tp.has_charge())
            .take(n_ave)
            .map(|tp| tp.chg)
            .collect();
        if charged.len() < 2 {
            return;
        }
        let n = charged.len() as f64;
        let ave = charged.iter().sum::<f64>() / n;
        let var = charged.iter().map(|c| (c - ave).powi(2)).sum::<f64>() / (n - 1.0);
        let rms = (var.sqrt() / ave).clamp(0.1, 2.0);
        work.ave_chg = ave;
        work.chg_rms = rms;
        if let Some(tp) = work.pts.last_mut() {
            tp.ave_chg = ave;
            tp.chg_pull = (tp.chg / ave - 1.0) / rms;
        }
    }

    /// Drops trailing points whose fit residual blew up, returning
    /// their hits to the pool. The stop flags from growth carry over
    /// to the new leading point.
    fn trim_end(&self, slice: &mut RecoSlice, work: &mut Trajectory) {
        let max_chi = self.session.config.max_chi;
        while work.pts.len() > 3 {
            let bad = work
                .pts
                .last()
                .is_some_and(|tp| tp.fit_chi > max_chi || tp.delta > 5.0 * tp.delta_rms);
            if !bad {
                break;
            }
            if let Some(tp) = work.pts.pop() {
                for &ih in &tp.hits {
                    if slice.hits[ih].in_traj < 0 {
                        slice.hits[ih].in_traj = wiretrace_core::HIT_UNUSED;
                    }
                }
            }
        }
    }

    /// Compares the trailing fit segment against the one before it.
    /// On a kink with enough points on both sides, trims the trailing
    /// segment (its hits go back into the pool and seed the
    /// continuation) and returns kink end flags.
    fn check_kink(&self, slice: &mut RecoSlice, work: &mut Trajectory) -> Option<EndFlags> {
        let kink = &self.session.config.kink;
        let seg = kink.fit_len;
        if work.pts.len() < 2 * seg || work.pts.len() < seg + kink.min_pts_each_side {
            return None;
        }
        let fit_seg = |pts: &[TrajPoint]| {
            let samples: Vec<(f64, f64, f64)> = pts
                .iter()
                .map(|tp| (tp.hit_pos[0], tp.hit_pos[1], tp.chg.max(1e-6)))
                .collect();
            fit_line(&samples).map(|f| f.slope.atan())
        };
        let n = work.pts.len();
        let ang_trail = fit_seg(&work.pts[n - seg..])?;
        let ang_prev = fit_seg(&work.pts[n - 2 * seg..n - seg])?;
        if delta_angle(ang_trail, ang_prev) < kink.angle {
            return None;
        }
        if n - seg < kink.min_pts_each_side {
            return None;
        }
        // release the post-kink points
        for tp in work.pts.drain(n - seg..) {
            for &ih in &tp.hits {
                if slice.hits[ih].in_traj < 0 {
                    slice.hits[ih].in_traj = wiretrace_core::HIT_UNUSED;
                }
            }
        }
        let mut flags = EndFlags::default();
        flags.kink = true;
        Some(flags)
    }

    /// Final checks and summary for a grown work trajectory. Returns
    /// `false` if it fails the pass cuts and must be abandoned.
    fn finish(&self, slice: &RecoSlice, work: &mut Trajectory, pass: usize) -> bool {
        let cfg = &self.session.config;
        if !work.update_end_points() {
            return false;
        }
        if work.num_pts_with_charge() < cfg.min_pts[pass] {
            return false;
        }

        self.set_summary(work);
        self.flag_begin(slice, work);
        self.check_stop(work, 0);
        self.check_stop(work, 1);

        let end_code = work.end_tp(1).angle_code.code();
        if end_code > cfg.max_angle_code[pass] {
            return false;
        }
        if work.mcs_mom < cfg.min_mcs_mom[pass] {
            return false;
        }
        true
    }

    /// Fills the whole-trajectory summary quantities.
    fn set_summary(&self, work: &mut Trajectory) {
        let charges: Vec<f64> = work
            .pts
            .iter()
            .filter(|tp| tp.has_charge())
            .map(|tp| tp.chg)
            .collect();
        let n = charges.len() as f64;
        let ave = charges.iter().sum::<f64>() / n;
        work.ave_chg = ave;
        work.tot_chg = charges.iter().sum();
        if charges.len() > 1 {
            let var = charges.iter().map(|c| (c - ave).powi(2)).sum::<f64>() / (n - 1.0);
            work.chg_rms = (var.sqrt() / ave).clamp(0.1, 2.0);
        }

        // direction confidence from the charge trend: a stopping
        // particle deposits more charge near its end
        if let Some(trend) = fit_charge_trend(&charges) {
            let sig = trend.slope / (trend.slope.abs() + trend.slope_err + 1e-6);
            work.dir_fom = (0.5 + 0.5 * sig).clamp(0.0, 1.0);
        }

        // crude multiple-scattering momentum surrogate from the
        // scatter of local fit angles
        let angles: Vec<f64> = work
            .pts
            .iter()
            .filter(|tp| tp.has_charge() && tp.n_pts_fit >= 2)
            .map(|tp| tp.ang)
            .collect();
        if angles.len() > 2 {
            let mean = angles.iter().sum::<f64>() / angles.len() as f64;
            let var = angles
                .iter()
                .map(|a| delta_angle(*a, mean).powi(2))
                .sum::<f64>()
                / (angles.len() - 1) as f64;
            let theta_rms = var.sqrt();
            work.mcs_mom = if theta_rms < 1e-3 {
                1000.0
            } else {
                (13.8 * work.length_wires().sqrt() / theta_rms).clamp(0.0, 1000.0)
            };
        } else {
            work.mcs_mom = 0.0;
        }
    }

    /// Classifies the trailing-edge stop reason at the begin end by
    /// looking at the wires just below the first point.
    fn flag_begin(&self, slice: &RecoSlice, work: &mut Trajectory) {
        let cfg = &self.session.config;
        let Some(ranges) = slice.wire_ranges.plane(work.plane) else {
            return;
        };
        if work.end_flags[0].any() {
            return;
        }
        #[allow(clippy::cast_possible_truncation)]
        let first_wire = work.end_tp(0).pos[0] as i64;
        let mut dead = 0usize;
        for k in 1..=cfg.max_wire_skip_no_signal + 1 {
            let w = first_wire - k as i64;
            if w < i64::from(ranges.first_wire) {
                break;
            }
            #[allow(clippy::cast_sign_loss)]
            match ranges.status(w as u32) {
                WireStatus::Dead => dead += 1,
                _ => break,
            }
        }
        if dead > cfg.max_wire_skip_no_signal {
            work.end_flags[0].dead_wire = true;
        } else {
            work.end_flags[0].signal_loss = true;
        }
    }

    /// Bragg-like stopping check at one end: charge rising
    /// monotonically toward the end and well above the trajectory
    /// average replaces the clean-stop flag with the Bragg flag.
    fn check_stop(&self, work: &mut Trajectory, end: usize) {
        let stop = &self.session.config.stop;
        let charged: Vec<f64> = work
            .pts
            .iter()
            .filter(|tp| tp.has_charge())
            .map(|tp| tp.chg)
            .collect();
        if charged.len() < stop.num_pts + 2 || work.ave_chg <= 0.0 {
            return;
        }
        let tail: Vec<f64> = if end == 1 {
            charged[charged.len() - stop.num_pts..].to_vec()
        } else {
            let mut v = charged[..stop.num_pts].to_vec();
            v.reverse();
            v
        };
        let rising = tail.windows(2).all(|w| w[1] >= w[0]);
        let Some(&end_chg) = tail.last() else {
            return;
        };
        if !rising || end_chg / work.ave_chg < stop.min_chg_ratio {
            return;
        }
        // the rise must also look linear; fit the tail normalized to
        // the trajectory average so the residual is scale free
        let normed: Vec<f64> = tail.iter().map(|c| c / work.ave_chg).collect();
        if let Some(trend) = fit_charge_trend(&normed) {
            if trend.slope <= 0.0 || trend.chi_dof > stop.max_fit_chi {
                return;
            }
        }
        work.alg.bragg_checked = true;
        work.end_flags[end].bragg = true;
        work.end_flags[end].signal_loss = false;
        work.end_flags[end].dead_wire = false;
        // the track points away from a stopping end
        if end == 0 {
            work.shape = ShapeCode::Track;
        }
    }
}

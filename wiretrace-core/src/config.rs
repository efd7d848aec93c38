//! Reconstruction configuration: named cut groups plus per-pass
//! vectors, validated once per run before any slice is processed.

use crate::error::ConfigError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 2D vertex finding cuts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vtx2dCuts {
    /// Max endpoint separation for short trajectories (WSE).
    pub max_sep_short: f64,
    /// Max endpoint separation for long trajectories (WSE).
    pub max_sep_long: f64,
    /// Wire count above which a trajectory counts as long.
    pub long_traj_wires: f64,
    /// Max pull of an endpoint against the fitted position.
    pub max_pos_pull: f64,
    /// Max fitted position error (WSE).
    pub max_pos_err: f64,
    /// Max intersection-fit chi/DOF.
    pub max_fit_chi: f64,
    /// Score below which the vertex is flagged poor.
    pub min_score: f64,
}

impl Default for Vtx2dCuts {
    fn default() -> Self {
        Self {
            max_sep_short: 6.0,
            max_sep_long: 12.0,
            long_traj_wires: 20.0,
            max_pos_pull: 3.0,
            max_pos_err: 2.5,
            max_fit_chi: 10.0,
            min_score: 4.6,
        }
    }
}

/// 2D -> 3D vertex matching cuts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vtx3dCuts {
    /// Max drift-coordinate disagreement between planes (cm).
    pub max_dx: f64,
    /// Max wire error when completing with a third plane.
    pub max_wire_err: f64,
    /// Score above which the constituents are tagged high-score.
    pub high_score: f64,
}

impl Default for Vtx3dCuts {
    fn default() -> Self {
        Self {
            max_dx: 1.0,
            max_wire_err: 2.0,
            high_score: 8.0,
        }
    }
}

/// Kink detection cuts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KinkCuts {
    /// Min angle change to call a kink (radians).
    pub angle: f64,
    /// Points in each of the two fit segments.
    pub fit_len: usize,
    /// Min points required on both sides of the kink.
    pub min_pts_each_side: usize,
}

impl Default for KinkCuts {
    fn default() -> Self {
        Self {
            angle: 0.4,
            fit_len: 4,
            min_pts_each_side: 4,
        }
    }
}

/// 3D trajectory matching cuts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Match3dCuts {
    /// Min de-weighted coincidence count to keep a candidate.
    pub min_count: f64,
    /// Min point count of a trajectory entering the match.
    pub min_traj_pts: usize,
    /// Min completeness of the best constituent.
    pub min_completeness: f64,
    /// Max candidates retained per slice.
    pub max_candidates: usize,
}

impl Default for Match3dCuts {
    fn default() -> Self {
        Self {
            min_count: 3.0,
            min_traj_pts: 3,
            min_completeness: 0.1,
            max_candidates: 2000,
        }
    }
}

/// Shower tagging, clustering and 3D matching cuts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShowerCuts {
    /// MCS momentum below which a trajectory is shower-like.
    pub max_mcs_mom: f64,
    /// Max trajectory separation for clustering (WSE).
    pub max_sep: f64,
    /// Min member trajectories per cluster.
    pub min_members: usize,
    /// Min transverse/longitudinal aspect ratio of a real shower.
    pub min_aspect_ratio: f64,
    /// MeV per charge unit for the energy estimate.
    pub energy_scale: f64,
    /// Max |E1 - E2| / (E1 + E2) between matched planes.
    pub max_energy_asym: f64,
    /// Max drift disagreement of charge centers (cm).
    pub max_dx: f64,
    /// Overlap figure of merit above which clusters merge.
    pub merge_fom: f64,
}

impl Default for ShowerCuts {
    fn default() -> Self {
        Self {
            max_mcs_mom: 150.0,
            max_sep: 15.0,
            min_members: 2,
            min_aspect_ratio: 0.05,
            energy_scale: 0.0024,
            max_energy_asym: 0.5,
            max_dx: 2.0,
            merge_fom: 0.5,
        }
    }
}

/// Bragg-like end (stopping particle) detection cuts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StopCuts {
    /// Min end-charge / average-charge ratio.
    pub min_chg_ratio: f64,
    /// Points examined at the end.
    pub num_pts: usize,
    /// Max chi/DOF of the end-charge fit.
    pub max_fit_chi: f64,
}

impl Default for StopCuts {
    fn default() -> Self {
        Self {
            min_chg_ratio: 1.3,
            num_pts: 5,
            max_fit_chi: 4.0,
        }
    }
}

/// Hit pickup charge cuts.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChargeCuts {
    /// Max |charge pull| for accepting a hit.
    pub max_pull: f64,
    /// Min hit charge as a fraction of the running average.
    pub min_ratio: f64,
    /// Max hit charge as a multiple of the running average.
    pub max_ratio: f64,
}

impl Default for ChargeCuts {
    fn default() -> Self {
        Self {
            max_pull: 4.0,
            min_ratio: 0.3,
            max_ratio: 3.0,
        }
    }
}

/// Full reconstruction configuration. One row of each per-pass
/// vector applies to one reconstruction pass; passes run tight to
/// loose.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecoConfig {
    /// Number of reconstruction passes.
    pub num_passes: usize,
    /// Min points to keep a trajectory, per pass.
    pub min_pts: Vec<usize>,
    /// Local fit window, per pass.
    pub min_pts_fit: Vec<usize>,
    /// Max allowed angle code, per pass.
    pub max_angle_code: Vec<u8>,
    /// Min MCS momentum to keep a trajectory, per pass.
    pub min_mcs_mom: Vec<f64>,
    /// Ascending angle-code boundaries (radians).
    pub angle_ranges: Vec<f64>,
    /// 2D vertex cuts.
    pub vtx2d: Vtx2dCuts,
    /// 3D vertex cuts.
    pub vtx3d: Vtx3dCuts,
    /// Kink cuts.
    pub kink: KinkCuts,
    /// 3D matching cuts.
    pub match3d: Match3dCuts,
    /// Shower cuts.
    pub shower: ShowerCuts,
    /// Stopping-particle cuts.
    pub stop: StopCuts,
    /// Charge cuts.
    pub charge: ChargeCuts,
    /// Max consecutive wires without expected signal (dead or empty).
    pub max_wire_skip_no_signal: usize,
    /// Max consecutive wires with signal but no matching hit.
    pub max_wire_skip_with_signal: usize,
    /// Hits closer than this are merged into one multiplet (WSE).
    pub mult_hit_sep: f64,
    /// Max local fit chi/DOF before the fit window shrinks.
    pub max_chi: f64,
    /// Scale factor on hit RMS for the projection window.
    pub hit_err_fac: f64,
    /// Wire-spacing-equivalent units per tick.
    pub units_per_tick: f64,
    /// Points used for the running average charge.
    pub n_pts_ave: usize,
}

impl Default for RecoConfig {
    fn default() -> Self {
        Self {
            num_passes: 2,
            min_pts: vec![5, 3],
            min_pts_fit: vec![4, 3],
            max_angle_code: vec![1, 2],
            min_mcs_mom: vec![20.0, 0.0],
            angle_ranges: vec![0.7, 1.3, std::f64::consts::FRAC_PI_2],
            vtx2d: Vtx2dCuts::default(),
            vtx3d: Vtx3dCuts::default(),
            kink: KinkCuts::default(),
            match3d: Match3dCuts::default(),
            shower: ShowerCuts::default(),
            stop: StopCuts::default(),
            charge: ChargeCuts::default(),
            max_wire_skip_no_signal: 2,
            max_wire_skip_with_signal: 3,
            mult_hit_sep: 2.5,
            max_chi: 10.0,
            hit_err_fac: 4.0,
            units_per_tick: 0.2,
            n_pts_ave: 20,
        }
    }
}

impl RecoConfig {
    /// Validates the configuration. Must succeed before any slice is
    /// processed; a malformed table aborts the run.
    ///
    /// # Errors
    /// A [`ConfigError`] naming the offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_passes == 0 {
            return Err(ConfigError::NoPasses);
        }
        let pass_vecs: [(&'static str, usize); 4] = [
            ("min_pts", self.min_pts.len()),
            ("min_pts_fit", self.min_pts_fit.len()),
            ("max_angle_code", self.max_angle_code.len()),
            ("min_mcs_mom", self.min_mcs_mom.len()),
        ];
        for (name, got) in pass_vecs {
            if got != self.num_passes {
                return Err(ConfigError::PassLengthMismatch {
                    name,
                    got,
                    expected: self.num_passes,
                });
            }
        }
        let ascending = self
            .angle_ranges
            .windows(2)
            .all(|w| w[0] < w[1]);
        let bounded = self
            .angle_ranges
            .last()
            .is_some_and(|&last| (last - std::f64::consts::FRAC_PI_2).abs() < 1e-6);
        if self.angle_ranges.is_empty() || !ascending || !bounded {
            return Err(ConfigError::BadAngleRanges);
        }
        if self.units_per_tick <= 0.0 {
            return Err(ConfigError::BadOption {
                name: "units_per_tick",
                value: self.units_per_tick,
            });
        }
        if self.mult_hit_sep <= 0.0 {
            return Err(ConfigError::BadOption {
                name: "mult_hit_sep",
                value: self.mult_hit_sep,
            });
        }
        if self.vtx3d.max_dx <= 0.0 {
            return Err(ConfigError::BadOption {
                name: "vtx3d.max_dx",
                value: self.vtx3d.max_dx,
            });
        }
        if self.stop.num_pts < 2 {
            return Err(ConfigError::BadOption {
                name: "stop.num_pts",
                value: self.stop.num_pts as f64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RecoConfig::default().validate().is_ok());
    }

    #[test]
    fn test_pass_length_mismatch_is_fatal() {
        let mut config = RecoConfig::default();
        config.min_pts = vec![5];
        let err = config.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::PassLengthMismatch {
                name: "min_pts",
                got: 1,
                expected: 2,
            }
        );
    }

    #[test]
    fn test_zero_passes_rejected() {
        let mut config = RecoConfig::default();
        config.num_passes = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoPasses));
    }

    #[test]
    fn test_descending_angle_ranges_rejected() {
        let mut config = RecoConfig::default();
        config.angle_ranges = vec![1.3, 0.7, std::f64::consts::FRAC_PI_2];
        assert_eq!(config.validate(), Err(ConfigError::BadAngleRanges));
    }
}

//! Small weighted least-squares fits used by the stepping and
//! vertexing passes.

/// Result of a weighted straight-line fit `y = intercept + slope*x`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFit {
    /// Fitted slope.
    pub slope: f64,
    /// Slope uncertainty.
    pub slope_err: f64,
    /// Fitted intercept.
    pub intercept: f64,
    /// Chi/DOF of the fit; 0 for two points.
    pub chi_dof: f64,
    /// Points used.
    pub n_pts: usize,
}

/// Weighted linear fit of (x, y, weight) samples. Returns `None`
/// with fewer than two points or degenerate x values.
#[must_use]
pub fn fit_line(samples: &[(f64, f64, f64)]) -> Option<LineFit> {
    if samples.len() < 2 {
        return None;
    }
    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &(x, y, w) in samples {
        let w = w.max(1e-6);
        sw += w;
        sx += w * x;
        sy += w * y;
        sxx += w * x * x;
        sxy += w * x * y;
    }
    let det = sw * sxx - sx * sx;
    if det.abs() < 1e-12 {
        return None;
    }
    let slope = (sw * sxy - sx * sy) / det;
    let intercept = (sy * sxx - sx * sxy) / det;

    let mut chi = 0.0;
    for &(x, y, w) in samples {
        let r = y - (intercept + slope * x);
        chi += w.max(1e-6) * r * r;
    }
    let dof = samples.len().saturating_sub(2);
    let chi_dof = if dof > 0 { chi / dof as f64 } else { 0.0 };
    let slope_err = if det > 0.0 {
        (sw / det).sqrt() * chi_dof.max(1.0).sqrt()
    } else {
        0.0
    };
    Some(LineFit {
        slope,
        slope_err,
        intercept,
        chi_dof,
        n_pts: samples.len(),
    })
}

/// Charge-trend fit along a trajectory section: charge vs. point
/// position, equal weights. Used for Bragg-end detection and the
/// direction figure of merit.
#[must_use]
pub fn fit_charge_trend(charges: &[f64]) -> Option<LineFit> {
    let samples: Vec<(f64, f64, f64)> = charges
        .iter()
        .enumerate()
        .map(|(i, &c)| (i as f64, c, 1.0))
        .collect();
    fit_line(&samples)
}

/// Intersection of two 2D lines given as point + direction. Returns
/// `None` when nearly parallel.
#[must_use]
pub fn line_intersection(
    p1: [f64; 2],
    d1: [f64; 2],
    p2: [f64; 2],
    d2: [f64; 2],
) -> Option<[f64; 2]> {
    let det = d1[0] * d2[1] - d1[1] * d2[0];
    if det.abs() < 1e-6 {
        return None;
    }
    let s = ((p2[0] - p1[0]) * d2[1] - (p2[1] - p1[1]) * d2[0]) / det;
    Some([p1[0] + s * d1[0], p1[1] + s * d1[1]])
}

/// Euclidean separation of two 2D points.
#[inline]
#[must_use]
pub fn sep2(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Smallest absolute difference of two angles, accounting for wrap.
#[must_use]
pub fn delta_angle(a: f64, b: f64) -> f64 {
    let mut d = (a - b).abs() % std::f64::consts::TAU;
    if d > std::f64::consts::PI {
        d = std::f64::consts::TAU - d;
    }
    // directions are sign-ambiguous in a wire plane
    if d > std::f64::consts::FRAC_PI_2 {
        d = std::f64::consts::PI - d;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_line_exact() {
        let samples: Vec<(f64, f64, f64)> =
            (0..10).map(|i| (f64::from(i), 3.0 + 0.5 * f64::from(i), 1.0)).collect();
        let fit = fit_line(&samples).unwrap();
        assert_relative_eq!(fit.slope, 0.5, epsilon = 1e-9);
        assert_relative_eq!(fit.intercept, 3.0, epsilon = 1e-9);
        assert!(fit.chi_dof < 1e-12);
    }

    #[test]
    fn test_fit_line_weights_dominate() {
        // heavy weight on the two collinear points, outlier ignored
        let samples = vec![(0.0, 0.0, 100.0), (1.0, 1.0, 100.0), (0.5, 5.0, 0.001)];
        let fit = fit_line(&samples).unwrap();
        assert_relative_eq!(fit.slope, 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_fit_line_degenerate() {
        assert!(fit_line(&[(1.0, 2.0, 1.0)]).is_none());
        assert!(fit_line(&[(1.0, 2.0, 1.0), (1.0, 3.0, 1.0)]).is_none());
    }

    #[test]
    fn test_line_intersection() {
        let p = line_intersection([0.0, 0.0], [1.0, 1.0], [4.0, 0.0], [-1.0, 1.0]).unwrap();
        assert_relative_eq!(p[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(p[1], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_lines() {
        assert!(line_intersection([0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 0.0]).is_none());
    }

    #[test]
    fn test_delta_angle_wraps() {
        assert_relative_eq!(delta_angle(0.1, -0.1), 0.2, epsilon = 1e-9);
        // opposite directions along one wire-plane line are the same
        assert_relative_eq!(
            delta_angle(std::f64::consts::PI - 0.05, 0.0),
            0.05,
            epsilon = 1e-9
        );
    }
}

//! Statistics kernel used by the detectors.
//!
//! Everything here is CPU-bound and synchronous; callers keep it off any
//! single-threaded dispatch loop shared with I/O.

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation. `None` for fewer than two points.
pub fn stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Z-score of `value` against a trailing mean/stddev.
///
/// A zero or non-finite standard deviation disables the z-path: the caller
/// gets `None`, not a divide-by-zero artifact.
pub fn zscore(value: f64, mean: f64, stddev: f64) -> Option<f64> {
    if stddev <= 0.0 || !stddev.is_finite() {
        return None;
    }
    Some((value - mean) / stddev)
}

/// Percent change from `baseline` to `value`.
///
/// A zero baseline short-circuits to "not computable" rather than producing
/// an infinity.
pub fn pct_change(value: f64, baseline: f64) -> Option<f64> {
    if baseline == 0.0 || !baseline.is_finite() {
        return None;
    }
    Some((value - baseline) / baseline * 100.0)
}

/// Ordinary least-squares line fit over an evenly spaced series.
#[derive(Debug, Clone, Copy)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
    /// Two-sided p-value of the slope's t-statistic.
    pub p_value: f64,
}

/// Fit `y = slope * x + intercept` with x = 0..n.
///
/// Returns `None` for fewer than three points or a degenerate (constant-x)
/// series. A perfectly flat y-series fits with slope 0 and p-value 1.
pub fn linear_fit(values: &[f64]) -> Option<LineFit> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = mean(values)?;

    let mut ss_xx = 0.0;
    let mut ss_xy = 0.0;
    let mut ss_yy = 0.0;
    for i in 0..n {
        let dx = xs[i] - x_mean;
        let dy = values[i] - y_mean;
        ss_xx += dx * dx;
        ss_xy += dx * dy;
        ss_yy += dy * dy;
    }
    if ss_xx == 0.0 {
        return None;
    }

    let slope = ss_xy / ss_xx;
    let intercept = y_mean - slope * x_mean;

    if ss_yy == 0.0 {
        // constant series: the line is exact but carries no signal
        return Some(LineFit {
            slope: 0.0,
            intercept: y_mean,
            r_squared: 1.0,
            p_value: 1.0,
        });
    }

    let ss_res = ss_yy - slope * ss_xy;
    let r_squared = (1.0 - ss_res / ss_yy).clamp(0.0, 1.0);

    // t-statistic of the slope against H0: slope = 0
    let df = nf - 2.0;
    let residual_var = (ss_res / df).max(0.0);
    let se = (residual_var / ss_xx).sqrt();
    let p_value = if se == 0.0 {
        0.0
    } else {
        let t = (slope / se).abs();
        two_sided_p(t, df)
    };

    Some(LineFit {
        slope,
        intercept,
        r_squared,
        p_value,
    })
}

/// Two-sided p-value for a t-statistic, via the normal approximation with a
/// small-sample inflation. Accurate enough to gate a 0.05 threshold.
fn two_sided_p(t: f64, df: f64) -> f64 {
    // t distribution -> normal as df grows; inflate the tail for small df
    let z = t * (1.0 - 1.0 / (4.0 * df)).max(0.5);
    (2.0 * (1.0 - standard_normal_cdf(z))).clamp(0.0, 1.0)
}

/// Φ(z) via the Abramowitz–Stegun erf approximation.
fn standard_normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    // maximum absolute error 1.5e-7
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_stddev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), Some(5.0));
        let sd = stddev(&values).unwrap();
        assert!((sd - 2.138089935).abs() < 1e-6);

        assert_eq!(mean(&[]), None);
        assert_eq!(stddev(&[1.0]), None);
    }

    #[test]
    fn zscore_matches_reference_scenario() {
        // current=60, mean=100, stdev=15 -> z ~= -2.67
        let z = zscore(60.0, 100.0, 15.0).unwrap();
        assert!((z - (-2.6666667)).abs() < 1e-6);
    }

    #[test]
    fn zero_stddev_disables_zscore() {
        assert_eq!(zscore(60.0, 100.0, 0.0), None);
        assert_eq!(zscore(60.0, 100.0, f64::NAN), None);
    }

    #[test]
    fn zero_baseline_is_not_computable() {
        assert_eq!(pct_change(50.0, 0.0), None);
        let pct = pct_change(60.0, 100.0).unwrap();
        assert!((pct - (-40.0)).abs() < 1e-9);
    }

    #[test]
    fn linear_fit_recovers_a_clean_slope() {
        let values: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        let fit = linear_fit(&values).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 3.0).abs() < 1e-9);
        assert!(fit.r_squared > 0.999);
        assert!(fit.p_value < 0.001);
    }

    #[test]
    fn noisy_flat_series_is_rejected_by_fit_quality() {
        let values = [5.0, 9.0, 2.0, 8.0, 3.0, 9.0, 1.0, 7.0];
        let fit = linear_fit(&values).unwrap();
        assert!(fit.r_squared < 0.7);
    }

    #[test]
    fn constant_series_has_no_signal() {
        let fit = linear_fit(&[4.0; 8]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.p_value, 1.0);
    }

    #[test]
    fn short_series_not_fittable() {
        assert!(linear_fit(&[1.0, 2.0]).is_none());
    }
}

//! Least-squares fits of closed-form models to aggregated observables.

use log::{debug, info};
use sim_common::{AnalysisError, DiffusionFitParams, FitResult, ModelKind, ObservableSeries, Result};

use crate::observables::stats::linspace;

fn validate_pairs(x: &[f64], y: &[f64], model: &str) -> Result<()> {
    if x.len() != y.len() {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} fit given {} x values and {} y values",
            model,
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(AnalysisError::insufficient(format!("{} fit needs at least 2 points, got {}", model, x.len())));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(AnalysisError::insufficient(format!("{} fit input contains NaN or infinite values", model)));
    }
    Ok(())
}

fn sum_squared_residuals(x: &[f64], y: &[f64], model: impl Fn(f64) -> f64) -> f64 {
    x.iter().zip(y).map(|(&x, &y)| (y - model(x)).powi(2)).sum()
}

/// Ordinary least squares `y = slope * x + intercept`.
pub fn fit_linear(x: &[f64], y: &[f64]) -> Result<FitResult> {
    validate_pairs(x, y, "linear")?;
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - x_mean).powi(2)).sum();
    if sxx == 0.0 {
        return Err(AnalysisError::insufficient("linear fit needs at least two distinct x values"));
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - x_mean) * (b - y_mean)).sum();
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let residual = sum_squared_residuals(x, y, |v| slope * v + intercept);
    Ok(FitResult::new(ModelKind::Linear, residual)
        .with_parameter("slope", slope)
        .with_parameter("intercept", intercept))
}

/// `omega0 = C * sqrt(k)` with `C >= 0`. The model is linear in `C`, so the
/// least-squares optimum is closed-form: `C = sum(omega sqrt(k)) / sum(k)`.
pub fn fit_sqrt_scaling(k: &[f64], omega: &[f64]) -> Result<FitResult> {
    validate_pairs(k, omega, "sqrt scaling")?;
    if k.iter().any(|&v| v < 0.0) {
        return Err(AnalysisError::InvalidParameter("sqrt scaling fit given a negative stiffness".to_string()));
    }
    let sum_k: f64 = k.iter().sum();
    if sum_k == 0.0 {
        return Err(AnalysisError::insufficient("sqrt scaling fit needs a non-zero stiffness"));
    }
    let sum_cross: f64 = k.iter().zip(omega).map(|(k, w)| w * k.sqrt()).sum();
    let c = (sum_cross / sum_k).max(0.0);
    let residual = sum_squared_residuals(k, omega, |v| c * v.sqrt());
    info!("omega0 = C sqrt(k): C = {:.6}, residual = {:.3e}", c, residual);
    Ok(FitResult::new(ModelKind::SqrtScaling, residual).with_parameter("C", c))
}

/// Diffusion coefficient from a brute-force scan, plus the scanned error curve.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionFit {
    pub result: FitResult,
    /// `E(D) = sum (msd - 4 D t)^2` over the diffusive region, against `D`.
    pub error_curve: ObservableSeries,
}

impl DiffusionFit {
    pub fn coefficient(&self) -> f64 {
        self.result.parameter("D").unwrap_or(f64::NAN)
    }
}

/// Fits `msd = 4 D t` (no intercept) by scanning candidate `D` values and keeping
/// the one with the smallest squared error.
///
/// The leading `transient_fraction` of the elapsed time is left out. Without an
/// explicit `d_max`, the scan covers `[0, 1.5 D_ls]` where `D_ls` is the
/// closed-form through-origin estimate over the same region.
pub fn fit_diffusion(msd: &ObservableSeries, params: &DiffusionFitParams) -> Result<DiffusionFit> {
    validate_pairs(msd.time_bins(), msd.values(), "diffusion")?;
    if params.candidates < 2 {
        return Err(AnalysisError::InvalidParameter(format!(
            "diffusion scan needs at least 2 candidates, got {}",
            params.candidates
        )));
    }
    let t_max = msd.final_time().unwrap_or(0.0);
    let fit_start = params.transient_fraction * t_max;
    let (t, y): (Vec<f64>, Vec<f64>) = msd.iter().filter(|&(t, _)| t >= fit_start).unzip();
    if t.len() < 2 {
        return Err(AnalysisError::insufficient(format!(
            "only {} points after the transient cut at t = {}",
            t.len(),
            fit_start
        )));
    }

    let stt: f64 = t.iter().map(|v| v * v).sum();
    let sty: f64 = t.iter().zip(&y).map(|(a, b)| a * b).sum();
    if stt == 0.0 {
        return Err(AnalysisError::insufficient("diffusive region has no elapsed time"));
    }
    let d_ls = sty / (4.0 * stt);
    let d_max = params.d_max.unwrap_or(1.5 * d_ls);
    if !(d_max > 0.0) || !d_max.is_finite() {
        return Err(AnalysisError::insufficient(format!("no diffusive growth to scan (upper bound {})", d_max)));
    }
    debug!("Diffusion scan over [0, {:.4e}] with {} candidates, D_ls = {:.4e}", d_max, params.candidates, d_ls);

    let candidates = linspace(0.0, d_max, params.candidates);
    let errors: Vec<f64> = candidates
        .iter()
        .map(|&d| sum_squared_residuals(&t, &y, |time| 4.0 * d * time))
        .collect();
    let (best, best_error) = errors
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, e)| if e < acc.1 { (i, e) } else { acc });
    let d = candidates[best];

    info!("Diffusion fit: D = {:.5e} (E = {:.5e}), fit from t = {:.4}", d, best_error, fit_start);
    let result = FitResult::new(ModelKind::Diffusion, best_error)
        .with_parameter("D", d)
        .with_parameter("slope", 4.0 * d)
        .with_parameter("fit_start", fit_start);
    Ok(DiffusionFit { result, error_curve: ObservableSeries::new(candidates, errors)? })
}

/// Analytic damped harmonic oscillator, `x(t) = A exp(-gamma t / 2m) cos(omega0 t)`.
/// Used as a reference overlay with given parameters; never fitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampedOscillator {
    pub amplitude: f64,
    /// Spring constant.
    pub k: f64,
    /// Damping coefficient.
    pub gamma: f64,
    pub mass: f64,
}

impl DampedOscillator {
    /// `omega0 = sqrt(k/m - (gamma/2m)^2)`; fails for non-oscillating parameters.
    pub fn omega0(&self) -> Result<f64> {
        if !(self.mass > 0.0) || ![self.amplitude, self.k, self.gamma, self.mass].iter().all(|v| v.is_finite()) {
            return Err(AnalysisError::InvalidParameter(format!("invalid oscillator parameters {:?}", self)));
        }
        let damping = self.gamma / (2.0 * self.mass);
        let squared = self.k / self.mass - damping * damping;
        if squared <= 0.0 {
            return Err(AnalysisError::InvalidParameter(format!(
                "oscillator is not underdamped (k/m - (gamma/2m)^2 = {})",
                squared
            )));
        }
        Ok(squared.sqrt())
    }

    pub fn position(&self, t: f64) -> Result<f64> {
        let omega0 = self.omega0()?;
        Ok(self.amplitude * (-self.gamma * t / (2.0 * self.mass)).exp() * (omega0 * t).cos())
    }

    pub fn curve(&self, times: &[f64]) -> Result<ObservableSeries> {
        let omega0 = self.omega0()?;
        let values = times
            .iter()
            .map(|&t| self.amplitude * (-self.gamma * t / (2.0 * self.mass)).exp() * (omega0 * t).cos())
            .collect();
        ObservableSeries::new(times.to_vec(), values)
    }

    /// The given parameters packaged as a fit result with zero residual, for reports.
    pub fn reference_fit(&self) -> Result<FitResult> {
        Ok(FitResult::new(ModelKind::DampedOscillator, 0.0)
            .with_parameter("A", self.amplitude)
            .with_parameter("k", self.k)
            .with_parameter("gamma", self.gamma)
            .with_parameter("m", self.mass)
            .with_parameter("omega0", self.omega0()?))
    }
}

/// Driving frequency with the largest response amplitude in a sweep.
pub fn resonance_peak(omegas: &[f64], amplitudes: &[f64]) -> Result<(f64, f64)> {
    validate_pairs(omegas, amplitudes, "resonance")?;
    let (idx, amp) = amplitudes
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, a)| if a > acc.1 { (i, a) } else { acc });
    Ok((omegas[idx], amp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diffusive(d0: f64, points: usize) -> ObservableSeries {
        let t = linspace(0.0, 10.0, points);
        let msd = t.iter().map(|t| 4.0 * d0 * t).collect();
        ObservableSeries::new(t, msd).unwrap()
    }

    #[test]
    fn linear_fit_recovers_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let fit = fit_linear(&x, &y).unwrap();
        assert!((fit.parameter("slope").unwrap() - 2.0).abs() < 1e-12);
        assert!((fit.parameter("intercept").unwrap() - 1.0).abs() < 1e-12);
        assert!(fit.residual_error < 1e-20);
    }

    #[test]
    fn sqrt_scaling_recovers_constant() {
        let k: Vec<f64> = vec![100.0, 400.0, 900.0, 2500.0];
        let omega: Vec<f64> = k.iter().map(|k: &f64| 0.12 * k.sqrt()).collect();
        let fit = fit_sqrt_scaling(&k, &omega).unwrap();
        assert_eq!(fit.model_kind, ModelKind::SqrtScaling);
        assert!((fit.parameter("C").unwrap() - 0.12).abs() < 1e-12);
    }

    #[test]
    fn sqrt_scaling_is_clamped_non_negative() {
        let fit = fit_sqrt_scaling(&[1.0, 4.0], &[-1.0, -2.0]).unwrap();
        assert_eq!(fit.parameter("C"), Some(0.0));
    }

    #[test]
    fn fits_refuse_too_little_or_bad_data() {
        assert!(matches!(fit_linear(&[1.0], &[2.0]), Err(AnalysisError::InsufficientData { .. })));
        assert!(matches!(
            fit_sqrt_scaling(&[1.0, f64::NAN], &[1.0, 2.0]),
            Err(AnalysisError::InsufficientData { .. })
        ));
        let series = ObservableSeries::new(vec![0.0, 1.0], vec![0.0, f64::INFINITY]).unwrap();
        assert!(matches!(
            fit_diffusion(&series, &DiffusionFitParams::default()),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn diffusion_scan_recovers_known_coefficient() {
        let d0 = 2.5e-4;
        let fit = fit_diffusion(&diffusive(d0, 100), &DiffusionFitParams::default()).unwrap();
        // Default range is [0, 1.5 D_ls] in 199 steps; the answer is within one step.
        let step = 1.5 * d0 / 199.0;
        assert!((fit.coefficient() - d0).abs() <= step);
        assert_eq!(fit.error_curve.len(), 200);
    }

    #[test]
    fn diffusion_scan_on_exact_grid_point() {
        let d0 = 1.0e-3;
        let params = DiffusionFitParams { transient_fraction: 0.12, candidates: 201, d_max: Some(2.0 * d0) };
        let fit = fit_diffusion(&diffusive(d0, 50), &params).unwrap();
        assert!((fit.coefficient() - d0).abs() < 1e-12);
        assert!(fit.result.residual_error < 1e-20);
        // The error curve is a parabola in D with its minimum at the chosen value.
        let errors = fit.error_curve.values();
        let min_idx = errors.iter().enumerate().min_by(|a, b| a.1.total_cmp(b.1)).map(|(i, _)| i).unwrap();
        assert_eq!(min_idx, 100);
        assert!(errors[0] > errors[50] && errors[200] > errors[150]);
    }

    #[test]
    fn damped_oscillator_reference() {
        let osc = DampedOscillator { amplitude: 1.0, k: 1.0e4, gamma: 100.0, mass: 70.0 };
        let omega0 = osc.omega0().unwrap();
        let expected = (1.0e4 / 70.0 - (100.0f64 / 140.0).powi(2)).sqrt();
        assert!((omega0 - expected).abs() < 1e-12);
        assert_eq!(osc.position(0.0).unwrap(), 1.0);
        let t = std::f64::consts::PI / omega0;
        let x = osc.position(t).unwrap();
        assert!((x + (-100.0 * t / 140.0).exp()).abs() < 1e-12);
        assert_eq!(osc.curve(&[0.0, 0.1, 0.2]).unwrap().len(), 3);
        assert_eq!(osc.reference_fit().unwrap().parameter("omega0"), Some(omega0));

        let overdamped = DampedOscillator { amplitude: 1.0, k: 1.0, gamma: 100.0, mass: 1.0 };
        assert!(matches!(overdamped.omega0(), Err(AnalysisError::InvalidParameter(_))));
    }

    #[test]
    fn resonance_peak_picks_largest_amplitude() {
        let (omega, amp) = resonance_peak(&[1.0, 2.0, 3.0, 4.0], &[0.1, 0.9, 0.4, 0.2]).unwrap();
        assert_eq!((omega, amp), (2.0, 0.9));
    }
}

//! Cross-run statistics and small numeric helpers.

use log::warn;
use serde::{Deserialize, Serialize};
use sim_common::{AnalysisError, ObservableSeries, Result};

/// Summary of repeated runs at one nominal configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub mean: f64,
    /// Sample standard deviation (n - 1); 0 for a single sample.
    pub std_dev: f64,
    /// Standard error of the mean, `std_dev / sqrt(n)`. Use this when comparing configurations.
    pub std_error: f64,
    pub samples: usize,
    /// Runs left out: non-finite values, or unfinished runs without a censoring value.
    pub excluded: usize,
}

impl Estimate {
    /// Mean and spread of the finite values; non-finite ones are excluded and counted.
    pub fn from_samples(values: &[f64]) -> Result<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let excluded = values.len() - finite.len();
        if finite.is_empty() {
            return Err(AnalysisError::insufficient(format!(
                "no finite samples out of {} runs",
                values.len()
            )));
        }
        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let std_dev = if finite.len() > 1 {
            (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Ok(Estimate { mean, std_dev, std_error: std_dev / n.sqrt(), samples: finite.len(), excluded })
    }

    /// Same as [`Estimate::from_samples`], for runs that may not have finished.
    ///
    /// A `None` run is replaced by `censoring_value` when one is given (a deliberate
    /// penalty for "did not complete"); otherwise it is excluded and counted.
    pub fn from_runs(values: &[Option<f64>], censoring_value: Option<f64>) -> Result<Self> {
        let mut unfinished = 0;
        let samples: Vec<f64> = values
            .iter()
            .filter_map(|v| match (v, censoring_value) {
                (Some(v), _) => Some(*v),
                (None, Some(sentinel)) => Some(sentinel),
                (None, None) => {
                    unfinished += 1;
                    None
                }
            })
            .collect();
        if unfinished > 0 {
            warn!("{} unfinished runs excluded (no censoring value configured).", unfinished);
        }
        let mut estimate = Self::from_samples(&samples)?;
        estimate.excluded += unfinished;
        Ok(estimate)
    }
}

/// Population standard deviation (divides by n), used for within-ensemble spread.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Per-bin mean with standard error over several runs' series.
/// Runs are cut to the shortest non-empty one; empty runs are skipped.
pub fn combine_series(runs: &[ObservableSeries]) -> Result<ObservableSeries> {
    let usable: Vec<&ObservableSeries> = runs.iter().filter(|s| !s.is_empty()).collect();
    if usable.is_empty() {
        return Err(AnalysisError::insufficient("no non-empty series to combine"));
    }
    if usable.len() < runs.len() {
        warn!("Skipping {} empty series out of {}.", runs.len() - usable.len(), runs.len());
    }
    let len = usable.iter().map(|s| s.len()).min().unwrap_or(0);
    let time_bins = usable[0].time_bins()[..len].to_vec();
    let mut means = Vec::with_capacity(len);
    let mut errors = Vec::with_capacity(len);
    for i in 0..len {
        let column: Vec<f64> = usable.iter().map(|s| s.values()[i]).collect();
        let estimate = Estimate::from_samples(&column)?;
        means.push(estimate.mean);
        errors.push(estimate.std_error);
    }
    ObservableSeries::with_errors(time_bins, means, errors)
}

/// `n` evenly spaced points from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            let mut points: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            points[n - 1] = end;
            points
        }
    }
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`; `xp` must be increasing.
/// Outside the sampled range the nearest end value is returned.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    if xp.is_empty() {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    let last = xp.len() - 1;
    if x >= xp[last] {
        return fp[last];
    }
    // First index with xp[j] > x; x lies in [xp[j-1], xp[j]).
    let j = xp.partition_point(|&v| v <= x);
    let (x0, x1) = (xp[j - 1], xp[j]);
    let (y0, y1) = (fp[j - 1], fp[j]);
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

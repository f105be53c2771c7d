use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AnalysisError, Result};

/// An observable sampled on ordered time bins, optionally with a per-bin error.
///
/// Fields are private so a built series cannot be edited; derive new series
/// with the transforming helpers instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableSeries {
    time_bins: Vec<f64>,
    values: Vec<f64>,
    stderr: Option<Vec<f64>>,
}

impl ObservableSeries {
    pub fn new(time_bins: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if time_bins.len() != values.len() {
            return Err(AnalysisError::InvalidParameter(format!(
                "series has {} time bins but {} values",
                time_bins.len(),
                values.len()
            )));
        }
        Ok(ObservableSeries { time_bins, values, stderr: None })
    }

    pub fn with_errors(time_bins: Vec<f64>, values: Vec<f64>, stderr: Vec<f64>) -> Result<Self> {
        let mut series = Self::new(time_bins, values)?;
        if stderr.len() != series.values.len() {
            return Err(AnalysisError::InvalidParameter(format!(
                "series has {} values but {} error entries",
                series.values.len(),
                stderr.len()
            )));
        }
        series.stderr = Some(stderr);
        Ok(series)
    }

    pub fn empty() -> Self {
        ObservableSeries { time_bins: Vec::new(), values: Vec::new(), stderr: None }
    }

    pub fn time_bins(&self) -> &[f64] {
        &self.time_bins
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn stderr(&self) -> Option<&[f64]> {
        self.stderr.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Last time bin, if any.
    pub fn final_time(&self) -> Option<f64> {
        self.time_bins.last().copied()
    }

    /// `(time, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time_bins.iter().copied().zip(self.values.iter().copied())
    }

    /// Mean of the last `count` values, e.g. the equilibrium pressure over the final windows.
    pub fn tail_mean(&self, count: usize) -> Result<f64> {
        if count == 0 || self.values.len() < count {
            return Err(AnalysisError::insufficient(format!(
                "need {} values for a tail mean, series has {}",
                count,
                self.values.len()
            )));
        }
        let tail = &self.values[self.values.len() - count..];
        Ok(tail.iter().sum::<f64>() / count as f64)
    }

    /// Centred moving average with a box of `width` samples. The output keeps the
    /// input length; samples past either edge count as zero.
    ///
    /// Per-bin errors go through the same box as independent errors,
    /// `sqrt(sum e_j^2) / width`.
    pub fn moving_average(&self, width: usize) -> Self {
        if width <= 1 || self.values.is_empty() {
            return self.clone();
        }
        let values = box_sums(&self.values, width).into_iter().map(|s| s / width as f64).collect();
        let stderr = self.stderr.as_ref().map(|e| {
            let squared: Vec<f64> = e.iter().map(|x| x * x).collect();
            box_sums(&squared, width).into_iter().map(|s| s.sqrt() / width as f64).collect()
        });
        ObservableSeries { time_bins: self.time_bins.clone(), values, stderr }
    }
}

/// Sums over a centred box of `width` samples, zero past either edge.
fn box_sums(values: &[f64], width: usize) -> Vec<f64> {
    let n = values.len() as isize;
    let offset = ((width - 1) / 2) as isize;
    (0..n)
        .map(|i| {
            let hi = i + offset;
            let lo = hi - (width as isize - 1);
            (lo.max(0)..=hi.min(n - 1)).map(|j| values[j as usize]).sum::<f64>()
        })
        .collect()
}

/// Model families the fitters know about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `y = slope * x + intercept`
    Linear,
    /// `omega0 = C * sqrt(k)`
    SqrtScaling,
    /// `msd = 4 * D * t`
    Diffusion,
    /// `x(t) = A exp(-gamma t / 2m) cos(omega0 t)`, reference only.
    DampedOscillator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model_kind: ModelKind,
    pub parameters: BTreeMap<String, f64>,
    /// Sum of squared residuals over the fitted points.
    pub residual_error: f64,
}

impl FitResult {
    pub fn new(model_kind: ModelKind, residual_error: f64) -> Self {
        FitResult { model_kind, parameters: BTreeMap::new(), residual_error }
    }

    pub fn with_parameter(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }
}

/// One row of persisted derived data, e.g. best-fit resonance frequency per stiffness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    pub parameter_value: f64,
    pub derived_value: f64,
    pub error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSeries {
    pub label: String,
    pub series: ObservableSeries,
}

/// Everything one CLI run produces; written to disk and read back by the plotter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<NamedSeries>,
    pub fits: Vec<FitResult>,
    pub records: Vec<DerivedRecord>,
    /// Per-file or per-configuration failures, already formatted with their context.
    pub failures: Vec<String>,
}

impl AnalysisReport {
    pub fn new(title: &str, x_label: &str, y_label: &str) -> Self {
        AnalysisReport {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            series: Vec::new(),
            fits: Vec::new(),
            records: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn push_series(&mut self, label: impl Into<String>, series: ObservableSeries) {
        self.series.push(NamedSeries { label: label.into(), series });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> ObservableSeries {
        let t: Vec<f64> = (0..n).map(|i| i as f64).collect();
        ObservableSeries::new(t.clone(), t).unwrap()
    }

    #[test]
    fn rejects_mismatched_lengths() {
        assert!(ObservableSeries::new(vec![0.0, 1.0], vec![1.0]).is_err());
        assert!(ObservableSeries::with_errors(vec![0.0], vec![1.0], vec![]).is_err());
    }

    #[test]
    fn moving_average_matches_same_mode_convolution() {
        // np.convolve([0,1,2,3,4], ones(3)/3, mode='same') == [1/3, 1, 2, 3, 7/3]
        let smoothed = ramp(5).moving_average(3);
        let expected = [1.0 / 3.0, 1.0, 2.0, 3.0, 7.0 / 3.0];
        for (got, want) in smoothed.values().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
        assert_eq!(smoothed.time_bins(), ramp(5).time_bins());
    }

    #[test]
    fn moving_average_carries_errors() {
        let series = ObservableSeries::with_errors(vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0], vec![1.0; 3]).unwrap();
        let smoothed = series.moving_average(3);
        let errors = smoothed.stderr().unwrap();
        assert!((errors[1] - 3.0f64.sqrt() / 3.0).abs() < 1e-12);
        assert!((errors[0] - 2.0f64.sqrt() / 3.0).abs() < 1e-12);
        assert!(ramp(5).moving_average(3).stderr().is_none());
    }

    #[test]
    fn tail_mean_needs_enough_values() {
        let series = ramp(4);
        assert_eq!(series.tail_mean(2).unwrap(), 2.5);
        assert!(matches!(series.tail_mean(5), Err(AnalysisError::InsufficientData { .. })));
    }
}

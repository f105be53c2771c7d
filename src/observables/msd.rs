use log::{info, warn};
use sim_common::{AnalysisError, ObservableSeries, Result};

use super::stats::{interp, linspace, population_std};

/// Mean-squared displacement over an ensemble of runs.
#[derive(Debug, Clone, PartialEq)]
pub struct MsdEnsemble {
    /// Mean MSD per grid point, with the across-run standard deviation as error.
    pub series: ObservableSeries,
    pub runs_used: usize,
    /// Runs with fewer than two samples, left out of the average.
    pub runs_excluded: usize,
    /// End of the shared grid, the shortest run's final time.
    pub t_max: f64,
}

/// Resamples every run's squared-displacement curve onto a uniform grid over
/// `[0, min t_final]` and averages them point by point.
///
/// The grid stops at the shortest run so no run is ever extrapolated.
pub fn combine_msd(runs: &[ObservableSeries], samples: usize) -> Result<MsdEnsemble> {
    if samples < 2 {
        return Err(AnalysisError::InvalidParameter(format!("MSD grid needs at least 2 samples, got {}", samples)));
    }
    let usable: Vec<&ObservableSeries> = runs.iter().filter(|r| r.len() >= 2).collect();
    let runs_excluded = runs.len() - usable.len();
    if runs_excluded > 0 {
        warn!("Excluding {} runs with fewer than 2 displacement samples.", runs_excluded);
    }
    let t_max = usable
        .iter()
        .filter_map(|r| r.final_time())
        .fold(f64::INFINITY, f64::min);
    if usable.is_empty() || !(t_max > 0.0) || !t_max.is_finite() {
        return Err(AnalysisError::insufficient(format!(
            "MSD needs at least one run spanning a positive time, {} of {} runs usable",
            usable.len(),
            runs.len()
        )));
    }

    let grid = linspace(0.0, t_max, samples);
    let resampled: Vec<Vec<f64>> = usable
        .iter()
        .map(|run| grid.iter().map(|&t| interp(t, run.time_bins(), run.values())).collect())
        .collect();

    let mut means = Vec::with_capacity(samples);
    let mut spreads = Vec::with_capacity(samples);
    for i in 0..grid.len() {
        let column: Vec<f64> = resampled.iter().map(|r| r[i]).collect();
        means.push(column.iter().sum::<f64>() / column.len() as f64);
        spreads.push(population_std(&column));
    }

    info!("MSD over {} runs on [0, {:.4}] s with {} points", usable.len(), t_max, samples);
    Ok(MsdEnsemble {
        series: ObservableSeries::with_errors(grid, means, spreads)?,
        runs_used: usable.len(),
        runs_excluded,
        t_max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(t_final: f64, slope: f64, points: usize) -> ObservableSeries {
        let t = linspace(0.0, t_final, points);
        let v = t.iter().map(|t| slope * t).collect();
        ObservableSeries::new(t, v).unwrap()
    }

    #[test]
    fn grid_stops_at_shortest_run() {
        let ensemble = combine_msd(&[run(2.0, 1.0, 11), run(5.0, 3.0, 37)], 50).unwrap();
        assert_eq!(ensemble.t_max, 2.0);
        let grid = ensemble.series.time_bins();
        assert_eq!(grid.len(), 50);
        assert!(grid.iter().all(|&t| t <= 2.0));
        assert_eq!(ensemble.series.values()[0], 0.0);
        // Mean of slopes 1 and 3 is 2; spread is 1 per unit time.
        let last = ensemble.series.values()[49];
        assert!((last - 4.0).abs() < 1e-9);
        assert!((ensemble.series.stderr().unwrap()[49] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn short_runs_are_excluded_and_counted() {
        let single = ObservableSeries::new(vec![0.0], vec![0.0]).unwrap();
        let ensemble = combine_msd(&[run(1.0, 1.0, 5), single, ObservableSeries::empty()], 10).unwrap();
        assert_eq!(ensemble.runs_used, 1);
        assert_eq!(ensemble.runs_excluded, 2);
    }

    #[test]
    fn no_usable_run_is_insufficient() {
        assert!(matches!(
            combine_msd(&[ObservableSeries::empty()], 10),
            Err(AnalysisError::InsufficientData { .. })
        ));
        assert!(combine_msd(&[run(1.0, 1.0, 5)], 1).is_err());
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};
use regex::Regex;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use sim_analysis::batch::{self, RunGroup};
use sim_analysis::decoder;
use sim_analysis::events::{detect_collisions, squared_displacements};
use sim_analysis::fitting::{fit_diffusion, fit_linear, fit_sqrt_scaling, resonance_peak, DampedOscillator};
use sim_analysis::observables::stats::linspace;
use sim_analysis::observables::{combine_msd, combine_series, pressure_series, CollisionTally, Estimate};
use sim_analysis::report::{load_report, read_pairs_csv, save_report, write_records_csv, ReportFormat};
use sim_analysis::synth::{brownian_walk, BallisticGas, BrownianWalk};
use sim_common::{
    AnalysisConfig, AnalysisParams, AnalysisReport, CollisionTarget, DerivedRecord, EventKind, ObservableSeries,
};

/// Analysis of recorded `.sim` particle trajectories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML analysis configuration; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base filename for the report and CSV output
    #[arg(short, long, global = true)]
    output: Option<String>,

    /// Report format: json, bincode or messagepack
    #[arg(long, global = true)]
    format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print header and collision counts of each file
    Inspect { files: Vec<PathBuf> },

    /// Windowed wall (and obstacle) pressure, averaged over runs
    Pressure {
        files: Vec<PathBuf>,
        /// Window length in seconds
        #[arg(long)]
        window: Option<f64>,
    },

    /// Collision frequencies and first-passage times
    Collisions {
        files: Vec<PathBuf>,
        #[arg(long, value_parser = ["wall", "obstacle"])]
        target: Option<String>,
    },

    /// Mean squared displacement and diffusion coefficient
    Msd {
        files: Vec<PathBuf>,
        /// Tracked particle
        #[arg(long)]
        particle: Option<usize>,
        #[arg(long)]
        samples: Option<usize>,
        /// Drop samples from the first wall contact onwards
        #[arg(long)]
        truncate_at_wall: bool,
    },

    /// Fit omega0 = C sqrt(k) to a `k,omega` CSV
    FitSqrt { csv: PathBuf },

    /// Resonance frequency of each `omega,amplitude` sweep, then the sqrt(k) fit across sweeps
    Resonance {
        #[arg(required = true)]
        csv: Vec<PathBuf>,
    },

    /// Analytic damped oscillator reference curve
    Oscillator {
        #[arg(long, default_value_t = 1.0)]
        amplitude: f64,
        #[arg(long, default_value_t = 1.0e4)]
        k: f64,
        #[arg(long, default_value_t = 100.0)]
        gamma: f64,
        #[arg(long, default_value_t = 70.0)]
        mass: f64,
        #[arg(long, default_value_t = 5.0)]
        t_end: f64,
        #[arg(long, default_value_t = 1000)]
        points: usize,
    },

    /// Generate synthetic `.sim` runs
    Synth {
        #[arg(long, value_parser = ["gas", "brownian"], default_value = "gas")]
        kind: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        #[arg(long, default_value = "run")]
        prefix: String,
        #[arg(long, default_value_t = 1)]
        runs: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 100)]
        particles: usize,
        /// Surface hits simulated per gas run
        #[arg(long, default_value_t = 2000)]
        reflections: usize,
        #[arg(long, default_value_t = 1.0)]
        speed: f32,
        #[arg(long, default_value_t = 0.05)]
        radius: f32,
        #[arg(long)]
        obstacle: Option<f32>,
        /// Random-walk steps
        #[arg(long, default_value_t = 1000)]
        steps: usize,
        #[arg(long, default_value_t = 1e-3)]
        dt: f64,
        #[arg(long, default_value_t = 1e-4)]
        diffusion: f64,
    },
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting Simulation Analysis...");

    // --- Load Configuration ---
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(base) = &cli.output {
        config.output.base_filename = base.clone();
    }
    if let Some(format) = &cli.format {
        config.output.format = format.clone();
    }
    apply_overrides(&mut config, &cli.command);
    config.validate().context("Invalid analysis configuration")?;
    let params = config.get_params();
    debug!("Analysis Parameters: {:#?}", params);
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    let start_time = Instant::now();
    let report = match &cli.command {
        Command::Inspect { files } => {
            inspect(&resolve_groups(files, &config)?, &params);
            None
        }
        Command::Pressure { files, .. } => Some(analyse_pressure(&resolve_groups(files, &config)?, &params)?),
        Command::Collisions { files, .. } => Some(analyse_collisions(&resolve_groups(files, &config)?, &params)?),
        Command::Msd { files, .. } => Some(analyse_msd(&resolve_groups(files, &config)?, &params)?),
        Command::FitSqrt { csv } => Some(sqrt_fit_report(csv)?),
        Command::Resonance { csv } => Some(resonance_report(csv)?),
        Command::Oscillator { amplitude, k, gamma, mass, t_end, points } => {
            let oscillator = DampedOscillator { amplitude: *amplitude, k: *k, gamma: *gamma, mass: *mass };
            Some(oscillator_report(&oscillator, *t_end, *points)?)
        }
        Command::Synth { .. } => {
            synthesize(&cli.command)?;
            None
        }
    };

    if let Some(report) = report {
        save_outputs(&report, &config)?;
        summarize(&report);
    }
    info!("Analysis finished in {:.3} seconds.", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Subcommand flags take precedence over the configuration file.
fn apply_overrides(config: &mut AnalysisConfig, command: &Command) {
    match command {
        Command::Pressure { window: Some(window), .. } => config.pressure.window = *window,
        Command::Collisions { target: Some(target), .. } => {
            config.collisions.target =
                if target == "wall" { CollisionTarget::Wall } else { CollisionTarget::Obstacle };
        }
        Command::Msd { particle, samples, truncate_at_wall, .. } => {
            if let Some(particle) = particle {
                config.msd.particle_index = *particle;
            }
            if let Some(samples) = samples {
                config.msd.samples = *samples;
            }
            config.msd.truncate_at_wall |= *truncate_at_wall;
        }
        _ => {}
    }
}

fn resolve_groups(files: &[PathBuf], config: &AnalysisConfig) -> Result<Vec<RunGroup>> {
    let mut input = config.input.clone();
    if !files.is_empty() {
        input.files = files.to_vec();
    }
    let groups = batch::discover(&input)?;
    if groups.iter().all(|g| g.files.is_empty()) {
        bail!("No input files: pass them on the command line or set [input] in the config.");
    }
    Ok(groups)
}

fn group_label(name: &str, group: &str, groups: usize) -> String {
    if groups == 1 {
        name.to_string()
    } else {
        format!("{} ({})", name, group)
    }
}

/// Mean of the last `windows` values. A shorter run has not reached equilibrium
/// and yields NaN, which the estimates exclude and count.
fn equilibrium(series: &ObservableSeries, windows: usize) -> f64 {
    series.tail_mean(windows).unwrap_or(f64::NAN)
}

/// Lists runs an estimate left out in the report's failure summary.
fn note_excluded(report: &mut AnalysisReport, group: &str, what: &str, excluded: usize) {
    if excluded > 0 {
        report.failures.push(format!("group {}: {} runs excluded from {}", group, excluded, what));
    }
}

fn inspect(groups: &[RunGroup], params: &AnalysisParams) {
    let surfaces = params.pressure.collision_params();
    for path in groups.iter().flat_map(|g| &g.files) {
        match decoder::load(path) {
            Ok(trajectory) => {
                let (mut wall, mut obstacle) = (0usize, 0usize);
                for event in detect_collisions(&trajectory, &surfaces) {
                    match event.kind {
                        EventKind::BoundaryCollision => wall += 1,
                        EventKind::ObstacleCollision => obstacle += 1,
                        EventKind::FirstPassage => {}
                    }
                }
                println!(
                    "{}: R = {}, N = {}, {} snapshots, t = [{:.5}, {:.5}], {} wall and {} obstacle collisions",
                    path.display(),
                    trajectory.geometry.radius,
                    trajectory.particle_count(),
                    trajectory.snapshot_count(),
                    trajectory.first().map_or(0.0, |s| s.time),
                    trajectory.final_time(),
                    wall,
                    obstacle
                );
            }
            Err(e) => error!("Failed to read {}: {}", path.display(), e),
        }
    }
}

fn analyse_pressure(groups: &[RunGroup], params: &AnalysisParams) -> Result<AnalysisReport> {
    let mut report = AnalysisReport::new("Pressure", "t [s]", "P [N/m]");
    let outcomes = batch::run_groups(groups, |t| pressure_series(t, &params.pressure));

    for (i, outcome) in outcomes.iter().enumerate() {
        report.failures.extend(outcome.failure_messages());
        let walls: Vec<ObservableSeries> = outcome.values().map(|p| p.wall.clone()).collect();
        let obstacles: Vec<ObservableSeries> = outcome.values().filter_map(|p| p.obstacle.clone()).collect();
        if walls.is_empty() {
            warn!("Group '{}' has no usable runs.", outcome.group);
            continue;
        }

        match combine_series(&walls) {
            Ok(mean) => report.push_series(
                group_label("wall", &outcome.group, outcomes.len()),
                mean.moving_average(params.smoothing),
            ),
            Err(e) => report.failures.push(format!("group {}: wall pressure: {}", outcome.group, e)),
        }
        if !obstacles.is_empty() {
            match combine_series(&obstacles) {
                Ok(mean) => report.push_series(
                    group_label("obstacle", &outcome.group, outcomes.len()),
                    mean.moving_average(params.smoothing),
                ),
                Err(e) => report.failures.push(format!("group {}: obstacle pressure: {}", outcome.group, e)),
            }
        }

        let wall_eq: Vec<f64> = walls.iter().map(|s| equilibrium(s, params.tail_windows)).collect();
        match Estimate::from_samples(&wall_eq) {
            Ok(estimate) => {
                info!(
                    "Group '{}': equilibrium wall pressure {:.6} +/- {:.6} ({} runs)",
                    outcome.group, estimate.mean, estimate.std_error, estimate.samples
                );
                note_excluded(&mut report, &outcome.group, "equilibrium pressure", estimate.excluded);
                report.records.push(DerivedRecord {
                    parameter_value: params.group_parameter(outcome.parameter, i),
                    derived_value: estimate.mean,
                    error: Some(estimate.std_error),
                });
            }
            Err(e) => report.failures.push(format!("group {}: equilibrium pressure: {}", outcome.group, e)),
        }
        if !obstacles.is_empty() {
            let obstacle_eq: Vec<f64> = obstacles.iter().map(|s| equilibrium(s, params.tail_windows)).collect();
            if let Ok(estimate) = Estimate::from_samples(&obstacle_eq) {
                info!(
                    "Group '{}': equilibrium obstacle pressure {:.6} +/- {:.6}",
                    outcome.group, estimate.mean, estimate.std_error
                );
            }
        }
    }

    // Equilibrium pressure against the mapped group parameter (e.g. T = v0^2).
    if report.records.len() >= 2 {
        let x: Vec<f64> = report.records.iter().map(|r| r.parameter_value).collect();
        let y: Vec<f64> = report.records.iter().map(|r| r.derived_value).collect();
        match fit_linear(&x, &y) {
            Ok(fit) => report.fits.push(fit),
            Err(e) => warn!("Skipping linear fit of pressure against parameter: {}", e),
        }
    }
    Ok(report)
}

fn analyse_collisions(groups: &[RunGroup], params: &AnalysisParams) -> Result<AnalysisReport> {
    let mut report = AnalysisReport::new("Collisions", "t [s]", "cumulative collisions");
    let outcomes = batch::run_groups(groups, |t| Ok(CollisionTally::from_trajectory(t, &params.collisions)));

    let mut first_rates = (Vec::new(), Vec::new(), Vec::new());
    let mut cut_rates = (Vec::new(), Vec::new(), Vec::new());
    let mut passage_times = (Vec::new(), Vec::new(), Vec::new());
    for (i, outcome) in outcomes.iter().enumerate() {
        report.failures.extend(outcome.failure_messages());
        let tallies: Vec<&CollisionTally> = outcome.values().collect();
        if tallies.is_empty() {
            warn!("Group '{}' has no usable runs.", outcome.group);
            continue;
        }
        let parameter = params.group_parameter(outcome.parameter, i);
        // Common horizon so runs of different length compare over the same time.
        let t_common = tallies.iter().map(|t| t.t_final).filter(|&t| t > 0.0).fold(f64::INFINITY, f64::min);

        for (path, tally) in &outcome.results {
            let stem = path.file_stem().map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
            report.push_series(group_label(&stem, &outcome.group, outcomes.len()), tally.cumulative(false, Some(t_common)));
        }

        let all: Vec<f64> = tallies.iter().map(|t| t.frequency_all().unwrap_or(f64::NAN)).collect();
        let first: Vec<f64> = tallies.iter().map(|t| t.frequency_first().unwrap_or(f64::NAN)).collect();
        // Runs that end before the horizon have no cut frequency.
        let cut: Vec<f64> = tallies
            .iter()
            .map(|t| {
                if t.t_final >= t_common {
                    t.frequency_until(t_common).map_or(f64::NAN, |f| f.0)
                } else {
                    f64::NAN
                }
            })
            .collect();
        let passages: Vec<Option<f64>> = tallies.iter().map(|t| t.mean_first_passage_time().ok()).collect();

        match Estimate::from_samples(&all) {
            Ok(nu) => {
                info!(
                    "Group '{}': nu_all = {:.4} +/- {:.4} 1/s over {} runs",
                    outcome.group, nu.mean, nu.std_error, nu.samples
                );
                note_excluded(&mut report, &outcome.group, "nu_all", nu.excluded);
                report.records.push(DerivedRecord {
                    parameter_value: parameter,
                    derived_value: nu.mean,
                    error: Some(nu.std_error),
                });
            }
            Err(e) => report.failures.push(format!("group {}: collision frequency: {}", outcome.group, e)),
        }
        if let Ok(nu) = Estimate::from_samples(&cut) {
            info!("Group '{}': nu_all up to t = {:.4}: {:.4} +/- {:.4} 1/s", outcome.group, t_common, nu.mean, nu.std_error);
            note_excluded(&mut report, &outcome.group, "nu_all up to the common horizon", nu.excluded);
            cut_rates.0.push(parameter);
            cut_rates.1.push(nu.mean);
            cut_rates.2.push(nu.std_error);
        }
        if let Ok(nu) = Estimate::from_samples(&first) {
            note_excluded(&mut report, &outcome.group, "nu_first", nu.excluded);
            first_rates.0.push(parameter);
            first_rates.1.push(nu.mean);
            first_rates.2.push(nu.std_error);
        }
        match Estimate::from_runs(&passages, params.censoring_value) {
            Ok(tau) => {
                info!(
                    "Group '{}': mean first-passage time {:.5} +/- {:.5} s ({} excluded)",
                    outcome.group, tau.mean, tau.std_error, tau.excluded
                );
                note_excluded(&mut report, &outcome.group, "first-passage time", tau.excluded);
                passage_times.0.push(parameter);
                passage_times.1.push(tau.mean);
                passage_times.2.push(tau.std_error);
            }
            Err(e) => report.failures.push(format!("group {}: first-passage time: {}", outcome.group, e)),
        }
    }

    if !first_rates.0.is_empty() {
        report.push_series("nu_first vs parameter", ObservableSeries::with_errors(first_rates.0, first_rates.1, first_rates.2)?);
    }
    if !cut_rates.0.is_empty() {
        report.push_series(
            "nu_all up to common horizon vs parameter",
            ObservableSeries::with_errors(cut_rates.0, cut_rates.1, cut_rates.2)?,
        );
    }
    if !passage_times.0.is_empty() {
        report.push_series(
            "first-passage time vs parameter",
            ObservableSeries::with_errors(passage_times.0, passage_times.1, passage_times.2)?,
        );
    }
    Ok(report)
}

fn analyse_msd(groups: &[RunGroup], params: &AnalysisParams) -> Result<AnalysisReport> {
    let mut report = AnalysisReport::new("Mean squared displacement", "t [s]", "MSD [m^2]");
    let outcomes = batch::run_groups(groups, |t| squared_displacements(t, &params.displacement));

    for (i, outcome) in outcomes.iter().enumerate() {
        report.failures.extend(outcome.failure_messages());
        let runs: Vec<ObservableSeries> = outcome.values().cloned().collect();
        let ensemble = match combine_msd(&runs, params.msd_samples) {
            Ok(ensemble) => ensemble,
            Err(e) => {
                error!("Group '{}': {}", outcome.group, e);
                report.failures.push(format!("group {}: msd: {}", outcome.group, e));
                continue;
            }
        };
        if ensemble.runs_excluded > 0 {
            report
                .failures
                .push(format!("group {}: {} runs too short for the MSD", outcome.group, ensemble.runs_excluded));
        }
        report.push_series(group_label("msd", &outcome.group, outcomes.len()), ensemble.series.clone());

        match fit_diffusion(&ensemble.series, &params.diffusion_fit) {
            Ok(fit) => {
                report.records.push(DerivedRecord {
                    parameter_value: params.group_parameter(outcome.parameter, i),
                    derived_value: fit.coefficient(),
                    error: None,
                });
                report.push_series(group_label("fit error E(D)", &outcome.group, outcomes.len()), fit.error_curve);
                report.fits.push(fit.result);
            }
            Err(e) => report.failures.push(format!("group {}: diffusion fit: {}", outcome.group, e)),
        }

        // Straight line over the same diffusive region, for comparison with the scan.
        let fit_start = params.diffusion_fit.transient_fraction * ensemble.t_max;
        let (t, y): (Vec<f64>, Vec<f64>) = ensemble.series.iter().filter(|&(t, _)| t >= fit_start).unzip();
        match fit_linear(&t, &y) {
            Ok(line) => {
                debug!("Group '{}': linear MSD fit {:?}", outcome.group, line.parameters);
                report.fits.push(line);
            }
            Err(e) => warn!("Group '{}': linear MSD fit skipped: {}", outcome.group, e),
        }
    }
    Ok(report)
}

fn sqrt_fit_report(csv: &Path) -> Result<AnalysisReport> {
    let (k, omega) = read_pairs_csv(csv)?;
    let fit = fit_sqrt_scaling(&k, &omega).with_context(|| format!("Fitting {}", csv.display()))?;
    let c = fit.parameter("C").unwrap_or(0.0);

    let mut report = AnalysisReport::new("Natural frequency against stiffness", "k [N/m]", "omega0 [rad/s]");
    let k_max = k.iter().copied().fold(0.0, f64::max);
    let grid = linspace(0.0, k_max, 200);
    let curve = grid.iter().map(|k| c * k.sqrt()).collect();
    report.push_series("data", ObservableSeries::new(k.clone(), omega.clone())?);
    report.push_series("C sqrt(k)", ObservableSeries::new(grid, curve)?);
    report.records = k
        .iter()
        .zip(&omega)
        .map(|(&k, &w)| DerivedRecord { parameter_value: k, derived_value: w, error: None })
        .collect();
    report.fits.push(fit);
    Ok(report)
}

/// First number in the file stem, e.g. `100` for `sweep_k100.csv`.
fn stem_parameter(path: &Path, number: &Regex) -> Option<f64> {
    let stem = path.file_stem()?.to_str()?;
    number.find(stem)?.as_str().parse().ok()
}

fn resonance_report(files: &[PathBuf]) -> Result<AnalysisReport> {
    let number = Regex::new(r"\d+(?:\.\d+)?")?;
    let mut report = AnalysisReport::new("Amplitude against driving frequency", "omega [rad/s]", "amplitude [m]");

    for (i, path) in files.iter().enumerate() {
        let sweep = read_pairs_csv(path).and_then(|(omegas, amplitudes)| {
            let peak = resonance_peak(&omegas, &amplitudes)?;
            Ok((ObservableSeries::new(omegas, amplitudes)?, peak))
        });
        match sweep {
            Ok((series, (omega, amplitude))) => {
                let parameter = stem_parameter(path, &number).unwrap_or(i as f64);
                info!("{}: resonance at omega = {:.4} (amplitude {:.4e})", path.display(), omega, amplitude);
                report.push_series(path.display().to_string(), series);
                report.records.push(DerivedRecord { parameter_value: parameter, derived_value: omega, error: None });
            }
            Err(e) => {
                error!("Failed to analyse sweep {}: {:#}", path.display(), e);
                report.failures.push(format!("{}: {:#}", path.display(), e));
            }
        }
    }

    if report.records.len() >= 2 {
        let k: Vec<f64> = report.records.iter().map(|r| r.parameter_value).collect();
        let omega: Vec<f64> = report.records.iter().map(|r| r.derived_value).collect();
        match fit_sqrt_scaling(&k, &omega) {
            Ok(fit) => report.fits.push(fit),
            Err(e) => warn!("Skipping sqrt(k) fit of the resonance frequencies: {}", e),
        }
    }
    Ok(report)
}

fn oscillator_report(oscillator: &DampedOscillator, t_end: f64, points: usize) -> Result<AnalysisReport> {
    let mut report = AnalysisReport::new("Damped oscillator", "t [s]", "x [m]");
    report.push_series("analytic", oscillator.curve(&linspace(0.0, t_end, points))?);
    report.fits.push(oscillator.reference_fit()?);
    Ok(report)
}

fn synthesize(command: &Command) -> Result<()> {
    let Command::Synth {
        kind,
        out_dir,
        prefix,
        runs,
        seed,
        particles,
        reflections,
        speed,
        radius,
        obstacle,
        steps,
        dt,
        diffusion,
    } = command
    else {
        return Ok(());
    };
    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;

    for run in 0..*runs {
        let path = out_dir.join(format!("{}{}.sim", prefix, run + 1));
        let run_seed = seed.wrapping_add(run as u64);
        if kind == "gas" {
            let gas = BallisticGas {
                container_radius: *radius,
                obstacle_radius: *obstacle,
                particle_count: *particles,
                mass: 1.0,
                speed: *speed,
                seed: run_seed,
            };
            let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
            gas.write_to(BufWriter::new(file), *reflections)?;
        } else {
            let walk = BrownianWalk {
                diffusion: *diffusion,
                dt: *dt,
                steps: *steps,
                container_radius: *radius,
                seed: run_seed,
            };
            decoder::save(&path, &brownian_walk(&walk)?)?;
        }
        info!("Wrote {}", path.display());
    }
    Ok(())
}

fn save_outputs(report: &AnalysisReport, config: &AnalysisConfig) -> Result<()> {
    let format = ReportFormat::parse(&config.output.format)?;
    let path = save_report(report, &config.output.base_filename, format)?;
    // Read back once so a broken report fails here, not in the plotter.
    load_report(&path).with_context(|| format!("Report {} does not read back", path.display()))?;

    if config.output.save_csv && !report.records.is_empty() {
        let csv_path = PathBuf::from(format!("{}_records.csv", config.output.base_filename));
        write_records_csv(&report.records, &csv_path)?;
    } else {
        info!("Skipping CSV output (no derived records or save_csv is false).");
    }
    Ok(())
}

fn summarize(report: &AnalysisReport) {
    info!(
        "{}: {} series, {} fits, {} derived records",
        report.title,
        report.series.len(),
        report.fits.len(),
        report.records.len()
    );
    for fit in &report.fits {
        info!("  {:?}: {:?} (residual {:.4e})", fit.model_kind, fit.parameters, fit.residual_error);
    }
    if report.failures.is_empty() {
        info!("All inputs analysed successfully.");
    } else {
        warn!("{} failures:", report.failures.len());
        for failure in &report.failures {
            warn!("  {}", failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_common::{ContainerGeometry, ParticleProperties, ParticleState, Snapshot, Trajectory};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sim-analysis-cli-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// One particle away from every surface, sampled every `dt` seconds, never colliding.
    fn quiet_run(snapshots: usize, dt: f32) -> Trajectory {
        Trajectory {
            geometry: ContainerGeometry { radius: 1.0 },
            properties: vec![ParticleProperties { mass: 1.0, radius: 0.01 }],
            snapshots: (0..snapshots)
                .map(|s| Snapshot {
                    step: s as i32,
                    time: s as f32 * dt,
                    particles: vec![ParticleState::new(0.5, 0.0, 1.0, 0.0)],
                })
                .collect(),
        }
    }

    fn save_group(dir: &Path, label: &str, runs: &[Trajectory]) -> RunGroup {
        let files = runs
            .iter()
            .enumerate()
            .map(|(i, run)| {
                let path = dir.join(format!("vel{}_run{}.sim", label, i));
                decoder::save(&path, run).unwrap();
                path
            })
            .collect();
        RunGroup::new(label, files)
    }

    fn params(toml: &str) -> AnalysisParams {
        AnalysisConfig::from_toml_str(toml).unwrap().get_params()
    }

    #[test]
    fn pressure_maps_parameter_and_excludes_short_runs() {
        let dir = scratch_dir("pressure");
        let groups = vec![
            save_group(&dir, "2", &[quiet_run(200, 0.01), quiet_run(200, 0.01), quiet_run(30, 0.01)]),
            save_group(&dir, "3", &[quiet_run(200, 0.01), quiet_run(200, 0.01)]),
        ];
        let params = params("[pressure]\nwindow = 0.1\ntail_windows = 10\n[aggregation]\nparameter_power = 2.0");
        assert_eq!(params.smoothing, 5);

        let report = analyse_pressure(&groups, &params).unwrap();
        let parameters: Vec<f64> = report.records.iter().map(|r| r.parameter_value).collect();
        assert_eq!(parameters, vec![4.0, 9.0]);
        assert_eq!(report.failures, vec!["group 2: 1 runs excluded from equilibrium pressure".to_string()]);
        assert_eq!(report.fits.len(), 1);
        // Smoothed run averages keep their standard error.
        let wall = report.series.iter().find(|s| s.label == "wall (2)").unwrap();
        assert!(wall.series.stderr().is_some());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn collisions_report_excluded_runs_and_common_horizon_rate() {
        let dir = scratch_dir("collisions");
        // The last run has no elapsed time, so it has no frequency.
        let groups = vec![save_group(&dir, "1", &[quiet_run(100, 0.01), quiet_run(50, 0.01), quiet_run(2, 0.0)])];
        let report = analyse_collisions(&groups, &params("")).unwrap();

        for what in ["nu_all", "nu_first", "nu_all up to the common horizon"] {
            let expected = format!("group 1: 1 runs excluded from {}", what);
            assert!(report.failures.contains(&expected), "missing '{}' in {:?}", expected, report.failures);
        }
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].derived_value, 0.0);
        let cut = report.series.iter().find(|s| s.label == "nu_all up to common horizon vs parameter").unwrap();
        assert_eq!(cut.series.time_bins(), &[1.0]);
        assert!(cut.series.stderr().is_some());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn equilibrium_needs_the_full_tail() {
        let series = ObservableSeries::new(vec![0.5, 1.5, 2.5], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(equilibrium(&series, 2), 2.5);
        assert!(equilibrium(&series, 4).is_nan());
    }
}

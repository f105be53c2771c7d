use anyhow::{bail, Result};
use clap::Parser;
use env_logger::Builder;
use log::{info, warn, LevelFilter};
use plotters::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};

use sim_analysis::report::load_report;
use sim_common::{AnalysisReport, NamedSeries};

/// Renders a saved analysis report as PNG charts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Report file (.json, .bin or .msgpack)
    #[arg(short, long)]
    input: PathBuf,

    /// Output prefix; defaults to the report path without its extension
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Image width in pixels
    #[arg(long, default_value_t = 1200)]
    width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = 800)]
    height: u32,

    /// Draw the y axis on a log10 scale (non-positive values are dropped)
    #[arg(long)]
    log_y: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    // Initialize logger
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    info!("Starting Report Plotter...");
    info!("Input report: {}", args.input.display());

    let report = load_report(&args.input)?;
    let prefix = args.output.clone().unwrap_or_else(|| args.input.with_extension(""));
    let size = (args.width, args.height);

    let (curves, error_curves) = partition_series(&report.series);
    let mut written = Vec::new();
    if !curves.is_empty() {
        let path = output_path(&prefix, "series");
        draw_chart(&path, size, &report.title, &report.x_label, &report.y_label, &curves, args.log_y)?;
        written.push(path);
    }
    if !error_curves.is_empty() {
        let path = output_path(&prefix, "fit_error");
        draw_chart(&path, size, "Fit error", "D [m^2/s]", "E(D)", &error_curves, false)?;
        written.push(path);
    }
    if !report.records.is_empty() {
        let path = output_path(&prefix, "records");
        draw_records(&path, size, &report)?;
        written.push(path);
    }

    if written.is_empty() {
        warn!("Report '{}' has nothing to plot.", report.title);
    }
    for path in &written {
        info!("Wrote {}", path.display());
    }
    if !report.failures.is_empty() {
        warn!("Report lists {} failed inputs:", report.failures.len());
        for failure in &report.failures {
            warn!("  {}", failure);
        }
    }
    Ok(())
}

/// Splits the report's series into regular curves and diffusion error curves,
/// which live on a different axis.
fn partition_series(series: &[NamedSeries]) -> (Vec<&NamedSeries>, Vec<&NamedSeries>) {
    series.iter().partition(|s| !s.label.starts_with("fit error"))
}

fn output_path(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("_{}.png", suffix));
    PathBuf::from(name)
}

/// Padded axis ranges covering every finite point; degenerate spans are widened to 1.
fn bounds(points: impl IntoIterator<Item = (f64, f64)>) -> Option<(Range<f64>, Range<f64>)> {
    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (f64::INFINITY, f64::NEG_INFINITY);
    for (px, py) in points {
        if !px.is_finite() || !py.is_finite() {
            continue;
        }
        x = (x.0.min(px), x.1.max(px));
        y = (y.0.min(py), y.1.max(py));
    }
    if x.0 > x.1 {
        return None;
    }
    let pad = |(lo, hi): (f64, f64)| {
        let span = if hi > lo { hi - lo } else { 1.0 };
        (lo - 0.05 * span)..(hi + 0.05 * span)
    };
    Some((pad(x), pad(y)))
}

fn scale(value: f64, log_y: bool) -> f64 {
    if log_y {
        if value > 0.0 {
            value.log10()
        } else {
            f64::NAN
        }
    } else {
        value
    }
}

fn draw_chart(
    path: &Path,
    size: (u32, u32),
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[&NamedSeries],
    log_y: bool,
) -> Result<()> {
    let points: Vec<Vec<(f64, f64)>> = series
        .iter()
        .map(|s| {
            s.series
                .iter()
                .map(|(t, v)| (t, scale(v, log_y)))
                .filter(|(t, v)| t.is_finite() && v.is_finite())
                .collect()
        })
        .collect();
    let Some((x_range, y_range)) = bounds(points.iter().flatten().copied()) else {
        bail!("No finite points to draw in '{}'", title);
    };

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)?;
    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(if log_y { format!("log10 {}", y_label) } else { y_label.to_string() })
        .draw()?;

    for (i, (named, pts)) in series.iter().zip(points).enumerate() {
        let color = Palette99::pick(i).to_rgba();
        if let (Some(errors), false) = (named.series.stderr(), log_y) {
            chart.draw_series(named.series.iter().zip(errors).filter(|((_, v), e)| v.is_finite() && e.is_finite()).map(
                |((t, v), e)| ErrorBar::new_vertical(t, v - e, v, v + e, color.filled(), 4),
            ))?;
        }
        chart
            .draw_series(LineSeries::new(pts, color.stroke_width(2)))?
            .label(named.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Derived value against configuration parameter, with error bars and any linear fit overlaid.
fn draw_records(path: &Path, size: (u32, u32), report: &AnalysisReport) -> Result<()> {
    let points: Vec<(f64, f64)> = report.records.iter().map(|r| (r.parameter_value, r.derived_value)).collect();
    let Some((x_range, y_range)) = bounds(
        report
            .records
            .iter()
            .flat_map(|r| {
                let e = r.error.unwrap_or(0.0);
                [(r.parameter_value, r.derived_value - e), (r.parameter_value, r.derived_value + e)]
            }),
    ) else {
        bail!("No finite derived records in '{}'", report.title);
    };

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{}: derived values", report.title), ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range.clone(), y_range)?;
    chart.configure_mesh().x_desc("parameter").y_desc("derived value").draw()?;

    chart.draw_series(report.records.iter().map(|r| {
        let e = r.error.unwrap_or(0.0);
        ErrorBar::new_vertical(r.parameter_value, r.derived_value - e, r.derived_value, r.derived_value + e, BLUE.filled(), 6)
    }))?;
    chart.draw_series(points.iter().map(|&p| Circle::new(p, 4, BLUE.filled())))?;

    for fit in &report.fits {
        if let (Some(slope), Some(intercept)) = (fit.parameter("slope"), fit.parameter("intercept")) {
            let line = [x_range.start, x_range.end].map(|x| (x, slope * x + intercept));
            chart
                .draw_series(LineSeries::new(line, RED.stroke_width(2)))?
                .label(format!("y = {:.4} x + {:.4}", slope, intercept))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
        } else if let Some(c) = fit.parameter("C") {
            let lo = x_range.start.max(0.0);
            let curve: Vec<(f64, f64)> =
                (0..=100).map(|i| lo + (x_range.end - lo) * i as f64 / 100.0).map(|x| (x, c * x.sqrt())).collect();
            chart
                .draw_series(LineSeries::new(curve, RED.stroke_width(2)))?
                .label(format!("C sqrt(x), C = {:.4}", c))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
        }
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_common::ObservableSeries;

    fn named(label: &str) -> NamedSeries {
        NamedSeries { label: label.to_string(), series: ObservableSeries::new(vec![0.0, 1.0], vec![1.0, 2.0]).unwrap() }
    }

    #[test]
    fn error_curves_are_split_off() {
        let series = vec![named("msd"), named("fit error E(D)"), named("fit error E(D) (2)")];
        let (curves, errors) = partition_series(&series);
        assert_eq!(curves.len(), 1);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn bounds_pad_and_skip_non_finite() {
        let (x, y) = bounds(vec![(0.0, 1.0), (10.0, 3.0), (f64::NAN, 100.0)]).unwrap();
        assert!((x.start + 0.5).abs() < 1e-12 && (x.end - 10.5).abs() < 1e-12);
        assert!((y.start - 0.9).abs() < 1e-12 && (y.end - 3.1).abs() < 1e-12);
        let (x, _) = bounds(vec![(2.0, 2.0)]).unwrap();
        assert!(x.start < 2.0 && x.end > 2.0);
        assert!(bounds(Vec::new()).is_none());
    }

    #[test]
    fn output_names_follow_prefix() {
        assert_eq!(output_path(Path::new("out/run_report"), "series"), PathBuf::from("out/run_report_series.png"));
        assert!(scale(-1.0, true).is_nan());
        assert_eq!(scale(100.0, true), 2.0);
    }
}

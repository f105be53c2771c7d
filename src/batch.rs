//! Input discovery and the per-run reduction over many `.sim` files.

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use regex::Regex;
use sim_common::{AnalysisError, InputConfig, Result, Trajectory};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::decoder;

/// Files that are runs of the same configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunGroup {
    /// Captured configuration label, e.g. `"3"` for `vel3_run1.sim`.
    pub label: String,
    /// The label parsed as a number, when it is one.
    pub parameter: Option<f64>,
    pub files: Vec<PathBuf>,
}

impl RunGroup {
    pub fn new(label: impl Into<String>, files: Vec<PathBuf>) -> Self {
        let label = label.into();
        RunGroup { parameter: label.parse().ok(), label, files }
    }
}

/// Resolves the configured inputs into run groups.
///
/// An explicit file list becomes a single group labelled `"files"`; entries that
/// do not exist are kept so they surface as per-file failures. Otherwise the
/// directory is scanned and names matching `pattern` are grouped by its first
/// capture group (all in one group `"all"` when the pattern captures nothing).
/// Groups are ordered by numeric parameter, then label.
pub fn discover(input: &InputConfig) -> Result<Vec<RunGroup>> {
    if !input.files.is_empty() {
        return Ok(vec![RunGroup::new("files", input.files.clone())]);
    }
    let Some(directory) = &input.directory else {
        return Ok(Vec::new());
    };
    let pattern = input.pattern.as_deref().unwrap_or(r"\.sim$");
    let regex = Regex::new(pattern)
        .map_err(|e| AnalysisError::InvalidParameter(format!("invalid input pattern '{}': {}", pattern, e)))?;
    scan_directory(directory, &regex)
}

fn scan_directory(directory: &Path, regex: &Regex) -> Result<Vec<RunGroup>> {
    let entries = fs::read_dir(directory).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnalysisError::MissingInputFile { path: directory.to_path_buf() },
        _ => AnalysisError::Io(e),
    })?;

    let mut groups: Vec<RunGroup> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(captures) = regex.captures(name) else {
            continue;
        };
        let label = captures.get(1).map_or("all", |m| m.as_str()).to_string();
        match groups.iter_mut().find(|g| g.label == label) {
            Some(group) => group.files.push(path),
            None => groups.push(RunGroup::new(label, vec![path])),
        }
    }

    for group in &mut groups {
        group.files.sort();
    }
    groups.sort_by(|a, b| match (a.parameter, b.parameter) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => a.label.cmp(&b.label),
    });
    info!(
        "Found {} files in {} groups under {}",
        groups.iter().map(|g| g.files.len()).sum::<usize>(),
        groups.len(),
        directory.display()
    );
    Ok(groups)
}

/// A run that could not be analysed.
#[derive(Debug)]
pub struct BatchFailure {
    pub path: PathBuf,
    pub group: String,
    pub error: AnalysisError,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.path.display(), self.group, self.error)
    }
}

/// Per-run results in file order, plus the runs that failed.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub group: String,
    pub parameter: Option<f64>,
    pub results: Vec<(PathBuf, T)>,
    pub failures: Vec<BatchFailure>,
}

impl<T> BatchOutcome<T> {
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.results.iter().map(|(_, v)| v)
    }

    pub fn failure_messages(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.to_string()).collect()
    }
}

fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} runs {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar.set_message(label.to_string());
    bar
}

/// Loads every file of `group` and reduces it with `analyse`, in parallel.
///
/// A file that fails to load or analyse is logged and recorded in `failures`;
/// the others still run.
pub fn run_group<T, F>(group: &RunGroup, analyse: F) -> BatchOutcome<T>
where
    T: Send,
    F: Fn(&Trajectory) -> Result<T> + Sync,
{
    debug!("Analysing group '{}' with {} files", group.label, group.files.len());
    let bar = progress_bar(group.files.len(), &group.label);
    let outcomes: Vec<(PathBuf, Result<T>)> = group
        .files
        .par_iter()
        .map(|path| {
            let outcome = decoder::load(path).and_then(|trajectory| analyse(&trajectory));
            bar.inc(1);
            (path.clone(), outcome)
        })
        .collect();
    bar.finish_and_clear();

    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(value) => results.push((path, value)),
            Err(e) => {
                error!("Failed to analyse {} (group {}): {}", path.display(), group.label, e);
                failures.push(BatchFailure { path, group: group.label.clone(), error: e });
            }
        }
    }
    if !failures.is_empty() {
        warn!("Group '{}': {} of {} runs failed", group.label, failures.len(), group.files.len());
    }
    BatchOutcome { group: group.label.clone(), parameter: group.parameter, results, failures }
}

/// Runs [`run_group`] over every group in order.
pub fn run_groups<T, F>(groups: &[RunGroup], analyse: F) -> Vec<BatchOutcome<T>>
where
    T: Send,
    F: Fn(&Trajectory) -> Result<T> + Sync,
{
    groups.iter().map(|g| run_group(g, &analyse)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::save;
    use sim_common::{ContainerGeometry, ParticleProperties, ParticleState, Snapshot};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sim-analysis-batch-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn tiny_trajectory(snapshots: usize) -> Trajectory {
        Trajectory {
            geometry: ContainerGeometry { radius: 1.0 },
            properties: vec![ParticleProperties { mass: 1.0, radius: 0.0 }],
            snapshots: (0..snapshots)
                .map(|s| Snapshot {
                    step: s as i32,
                    time: s as f32,
                    particles: vec![ParticleState::new(0.0, 0.0, 0.0, 0.0)],
                })
                .collect(),
        }
    }

    #[test]
    fn directory_scan_groups_by_capture() {
        let dir = scratch_dir("groups");
        for name in ["vel10_run1.sim", "vel2_run1.sim", "vel2_run2.sim", "notes.txt", "vel3.dat"] {
            fs::write(dir.join(name), b"").unwrap();
        }
        let input = InputConfig {
            files: Vec::new(),
            directory: Some(dir.clone()),
            pattern: Some(r"^vel(\d+)_run\d+\.sim$".to_string()),
        };
        let groups = discover(&input).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "2");
        assert_eq!(groups[0].parameter, Some(2.0));
        assert_eq!(groups[0].files.len(), 2);
        assert_eq!(groups[1].label, "10");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn bad_pattern_and_missing_directory_fail() {
        let input = InputConfig {
            files: Vec::new(),
            directory: Some(std::env::temp_dir()),
            pattern: Some("(".to_string()),
        };
        assert!(matches!(discover(&input), Err(AnalysisError::InvalidParameter(_))));
        let input = InputConfig {
            files: Vec::new(),
            directory: Some(PathBuf::from("/definitely/not/here")),
            pattern: None,
        };
        assert!(matches!(discover(&input), Err(AnalysisError::MissingInputFile { .. })));
    }

    #[test]
    fn failing_runs_do_not_stop_the_batch() {
        let dir = scratch_dir("isolation");
        save(dir.join("a.sim"), &tiny_trajectory(3)).unwrap();
        save(dir.join("b.sim"), &tiny_trajectory(1)).unwrap();
        let group = RunGroup::new(
            "files",
            vec![dir.join("a.sim"), dir.join("missing.sim"), dir.join("b.sim")],
        );
        let outcome = run_group(&group, |t| {
            if t.snapshot_count() < 2 {
                Err(AnalysisError::insufficient("one snapshot"))
            } else {
                Ok(t.snapshot_count())
            }
        });
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].1, 3);
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome
            .failures
            .iter()
            .any(|f| matches!(f.error, AnalysisError::MissingInputFile { .. })));
        assert!(outcome.failure_messages()[0].contains("missing.sim"));
        fs::remove_dir_all(dir).unwrap();
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::params::{
    AnalysisParams, CollisionParams, DiffusionFitParams, DisplacementParams, ObstacleParams, PressureParams,
};

// Where the `.sim` files come from
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct InputConfig {
    /// Explicit file list. Missing entries are reported per file, the rest still run.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Directory scanned with `pattern` when `files` is empty.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Regex matched against file names. The first capture group, if any,
    /// names the configuration a run belongs to (e.g. `vel(\d+)`).
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionTarget {
    Wall,
    Obstacle,
}

// Collision gating against the wall and the obstacle
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CollisionConfig {
    #[serde(default = "default_target")]
    pub target: CollisionTarget,
    #[serde(default = "default_wall_tolerance")]
    pub wall_tolerance: f32,
    #[serde(default = "default_obstacle_radius")]
    pub obstacle_radius: f32,
    #[serde(default = "default_obstacle_tolerance")]
    pub obstacle_tolerance: f32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PressureConfig {
    #[serde(default = "default_window")]
    pub window: f64,
    #[serde(default = "default_true")]
    pub include_obstacle: bool,
    /// Number of final windows averaged into the equilibrium pressure.
    #[serde(default = "default_tail_windows")]
    pub tail_windows: usize,
    /// Moving-average width applied before plotting (1 = off).
    #[serde(default = "default_smoothing")]
    pub smoothing: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MsdConfig {
    #[serde(default)]
    pub particle_index: usize,
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default)]
    pub truncate_at_wall: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FitConfig {
    #[serde(default = "default_transient_fraction")]
    pub transient_fraction: f64,
    #[serde(default = "default_candidates")]
    pub candidates: usize,
    #[serde(default)]
    pub d_max: Option<f64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AggregationConfig {
    /// Value substituted for runs that never reached their terminal condition.
    /// Unset means such runs are excluded and counted instead.
    #[serde(default)]
    pub censoring_value: Option<f64>,
    /// Exponent applied to each group's captured parameter before it is
    /// recorded and fitted, e.g. 2 turns an initial speed `v0` into `T = v0^2`.
    #[serde(default = "default_parameter_power")]
    pub parameter_power: f64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    /// "json", "bincode" or "messagepack"
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub save_csv: bool,
}

// Main analysis configuration structure, loaded from a TOML file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub collisions: CollisionConfig,
    #[serde(default)]
    pub pressure: PressureConfig,
    #[serde(default)]
    pub msd: MsdConfig,
    #[serde(default)]
    pub fit: FitConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        CollisionConfig {
            target: default_target(),
            wall_tolerance: default_wall_tolerance(),
            obstacle_radius: default_obstacle_radius(),
            obstacle_tolerance: default_obstacle_tolerance(),
        }
    }
}

impl Default for PressureConfig {
    fn default() -> Self {
        PressureConfig {
            window: default_window(),
            include_obstacle: true,
            tail_windows: default_tail_windows(),
            smoothing: default_smoothing(),
        }
    }
}

impl Default for MsdConfig {
    fn default() -> Self {
        MsdConfig { particle_index: 0, samples: default_samples(), truncate_at_wall: false }
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            transient_fraction: default_transient_fraction(),
            candidates: default_candidates(),
            d_max: None,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig { censoring_value: None, parameter_power: default_parameter_power() }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { base_filename: default_base_filename(), format: default_format(), save_csv: true }
    }
}

impl AnalysisConfig {
    /// Loads the analysis configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pressure.window > 0.0) {
            anyhow::bail!("pressure.window must be positive.");
        }
        for (name, tol) in [
            ("collisions.wall_tolerance", self.collisions.wall_tolerance),
            ("collisions.obstacle_tolerance", self.collisions.obstacle_tolerance),
        ] {
            if !(tol > 0.0 && tol < 1.0) {
                anyhow::bail!("{} must lie in (0, 1), got {}.", name, tol);
            }
        }
        if !(self.collisions.obstacle_radius > 0.0) {
            anyhow::bail!("collisions.obstacle_radius must be positive.");
        }
        if !(0.0..1.0).contains(&self.fit.transient_fraction) {
            anyhow::bail!("fit.transient_fraction must lie in [0, 1).");
        }
        if self.pressure.tail_windows == 0 {
            anyhow::bail!("pressure.tail_windows must be at least 1.");
        }
        if self.msd.samples < 2 {
            anyhow::bail!("msd.samples must be at least 2.");
        }
        if !self.aggregation.parameter_power.is_finite() || self.aggregation.parameter_power == 0.0 {
            anyhow::bail!("aggregation.parameter_power must be finite and non-zero.");
        }
        if self.fit.candidates < 2 {
            anyhow::bail!("fit.candidates must be at least 2.");
        }
        match self.output.format.as_str() {
            "json" | "bincode" | "messagepack" => {}
            other => anyhow::bail!("Unknown output format '{}'.", other),
        }
        Ok(())
    }

    /// Converts the configuration into the parameters used by the analysis functions.
    pub fn get_params(&self) -> AnalysisParams {
        let c = &self.collisions;
        let collisions = match c.target {
            CollisionTarget::Wall => CollisionParams::wall(c.wall_tolerance),
            CollisionTarget::Obstacle => CollisionParams::obstacle(c.obstacle_radius, c.obstacle_tolerance),
        };
        let obstacle = if self.pressure.include_obstacle {
            Some(ObstacleParams { radius: c.obstacle_radius, tolerance: c.obstacle_tolerance })
        } else {
            None
        };

        AnalysisParams {
            collisions,
            pressure: PressureParams { window: self.pressure.window, wall_tolerance: c.wall_tolerance, obstacle },
            tail_windows: self.pressure.tail_windows,
            smoothing: self.pressure.smoothing.max(1),
            displacement: DisplacementParams {
                particle_index: self.msd.particle_index,
                truncate_at_wall: self.msd.truncate_at_wall,
            },
            msd_samples: self.msd.samples,
            diffusion_fit: DiffusionFitParams {
                transient_fraction: self.fit.transient_fraction,
                candidates: self.fit.candidates,
                d_max: self.fit.d_max,
            },
            censoring_value: self.aggregation.censoring_value,
            parameter_power: self.aggregation.parameter_power,
        }
    }
}

fn default_target() -> CollisionTarget {
    CollisionTarget::Obstacle
}

fn default_wall_tolerance() -> f32 {
    1e-3
}

fn default_obstacle_radius() -> f32 {
    0.005 // metres, the fixed obstacle of the reference setup
}

fn default_obstacle_tolerance() -> f32 {
    1e-5
}

fn default_window() -> f64 {
    0.005 // 5 ms
}

fn default_tail_windows() -> usize {
    100
}

fn default_smoothing() -> usize {
    5
}

fn default_samples() -> usize {
    100
}

fn default_transient_fraction() -> f64 {
    0.1
}

fn default_candidates() -> usize {
    200
}

fn default_parameter_power() -> f64 {
    1.0
}

fn default_base_filename() -> String {
    "analysis".to_string()
}

fn default_format() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::params::SurfaceRadius;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AnalysisConfig::from_toml_str("").unwrap();
        let params = config.get_params();
        assert_eq!(params.pressure.window, 0.005);
        assert_eq!(params.msd_samples, 100);
        assert_eq!(params.parameter_power, 1.0);
        assert_eq!(params.collisions.surfaces.len(), 1);
        assert_eq!(params.collisions.surfaces[0].kind, EventKind::ObstacleCollision);
        // Pressure always gates the wall first, obstacle second.
        let pressure_surfaces = params.pressure.collision_params().surfaces;
        assert_eq!(pressure_surfaces[0].radius, SurfaceRadius::Container);
        assert_eq!(pressure_surfaces[1].radius, SurfaceRadius::Fixed(0.005));
    }

    #[test]
    fn sections_override_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [input]
            directory = "outputs"
            pattern = 'output\d+-vel(\d+)\.sim'

            [collisions]
            target = "wall"
            wall_tolerance = 0.01

            [pressure]
            window = 0.01
            include_obstacle = false

            [aggregation]
            censoring_value = 120.0
            parameter_power = 2.0

            [output]
            format = "messagepack"
            "#,
        )
        .unwrap();
        let params = config.get_params();
        assert_eq!(params.collisions.surfaces[0].kind, EventKind::BoundaryCollision);
        assert_eq!(params.pressure.obstacle, None);
        assert_eq!(params.censoring_value, Some(120.0));
        assert_eq!(params.parameter_power, 2.0);
        assert_eq!(params.group_parameter(Some(3.0), 0), 9.0);
        assert_eq!(params.group_parameter(None, 4), 4.0);
        assert_eq!(config.input.pattern.as_deref(), Some(r"output\d+-vel(\d+)\.sim"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(AnalysisConfig::from_toml_str("[pressure]\nwindow = 0.0").is_err());
        assert!(AnalysisConfig::from_toml_str("[collisions]\nwall_tolerance = 2.0").is_err());
        assert!(AnalysisConfig::from_toml_str("[fit]\ntransient_fraction = 1.0").is_err());
        assert!(AnalysisConfig::from_toml_str("[output]\nformat = \"yaml\"").is_err());
        assert!(AnalysisConfig::from_toml_str("[aggregation]\nparameter_power = 0.0").is_err());
    }
}

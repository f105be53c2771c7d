// Resolved runtime parameters handed to the analysis functions. Built from an
// `AnalysisConfig` or directly in code; nothing here is process-wide state.
use serde::{Deserialize, Serialize};

use crate::event::EventKind;
use crate::trajectory::ContainerGeometry;

/// Radius a contact surface sits at.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurfaceRadius {
    /// The container wall, radius taken from the file header.
    Container,
    /// A fixed circle around the origin, e.g. the obstacle.
    Fixed(f32),
}

/// A circular surface centred on the origin that particles can collide with.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSurface {
    pub kind: EventKind,
    pub radius: SurfaceRadius,
    /// Accepted distance error as a fraction of the radius.
    pub tol_factor: f32,
}

impl ContactSurface {
    pub fn wall(tol_factor: f32) -> Self {
        ContactSurface { kind: EventKind::BoundaryCollision, radius: SurfaceRadius::Container, tol_factor }
    }

    pub fn obstacle(radius: f32, tol_factor: f32) -> Self {
        ContactSurface { kind: EventKind::ObstacleCollision, radius: SurfaceRadius::Fixed(radius), tol_factor }
    }

    pub fn resolve_radius(&self, geometry: &ContainerGeometry) -> f32 {
        match self.radius {
            SurfaceRadius::Container => geometry.radius,
            SurfaceRadius::Fixed(r) => r,
        }
    }
}

/// Surfaces tested by the collision detector, in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionParams {
    pub surfaces: Vec<ContactSurface>,
}

impl CollisionParams {
    pub fn wall(tol_factor: f32) -> Self {
        CollisionParams { surfaces: vec![ContactSurface::wall(tol_factor)] }
    }

    pub fn obstacle(radius: f32, tol_factor: f32) -> Self {
        CollisionParams { surfaces: vec![ContactSurface::obstacle(radius, tol_factor)] }
    }

    pub fn with_surface(mut self, surface: ContactSurface) -> Self {
        self.surfaces.push(surface);
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleParams {
    pub radius: f32,
    pub tolerance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureParams {
    /// Window length in seconds.
    pub window: f64,
    pub wall_tolerance: f32,
    /// When set, a second accumulator measures pressure on the obstacle.
    pub obstacle: Option<ObstacleParams>,
}

impl PressureParams {
    /// Detector configuration matching this pressure setup: wall first, then obstacle.
    pub fn collision_params(&self) -> CollisionParams {
        let params = CollisionParams::wall(self.wall_tolerance);
        match self.obstacle {
            Some(o) => params.with_surface(ContactSurface::obstacle(o.radius, o.tolerance)),
            None => params,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementParams {
    /// Tracked particle, 0 by convention (the large particle).
    pub particle_index: usize,
    /// Drop samples from the first wall contact onwards.
    pub truncate_at_wall: bool,
}

impl Default for DisplacementParams {
    fn default() -> Self {
        DisplacementParams { particle_index: 0, truncate_at_wall: false }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionFitParams {
    /// Leading fraction of the elapsed time treated as transient and left out of the fit.
    pub transient_fraction: f64,
    /// Number of candidate `D` values in the brute-force scan.
    pub candidates: usize,
    /// Upper end of the scanned range; derived from the data when `None`.
    pub d_max: Option<f64>,
}

impl Default for DiffusionFitParams {
    fn default() -> Self {
        DiffusionFitParams { transient_fraction: 0.1, candidates: 200, d_max: None }
    }
}

/// Everything an analysis run needs, derived once from the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub collisions: CollisionParams,
    pub pressure: PressureParams,
    pub tail_windows: usize,
    pub smoothing: usize,
    pub displacement: DisplacementParams,
    pub msd_samples: usize,
    pub diffusion_fit: DiffusionFitParams,
    pub censoring_value: Option<f64>,
    /// Exponent mapping a group's captured label to its recorded parameter.
    pub parameter_power: f64,
}

impl AnalysisParams {
    /// Recorded parameter of a group: its numeric label raised to
    /// `parameter_power`, or the group's position when the label is not a number.
    pub fn group_parameter(&self, label: Option<f64>, position: usize) -> f64 {
        label.map_or(position as f64, |p| p.powf(self.parameter_power))
    }
}

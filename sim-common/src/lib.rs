pub mod config;
pub mod error;
pub mod event;
pub mod params;
pub mod series;
pub mod snapshot;
pub mod trajectory;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{AnalysisConfig, CollisionTarget, InputConfig, OutputConfig};
pub use error::{AnalysisError, Result};
pub use event::{Event, EventKind};
pub use params::{
    AnalysisParams, CollisionParams, ContactSurface, DiffusionFitParams, DisplacementParams, ObstacleParams,
    PressureParams, SurfaceRadius,
};
pub use series::{AnalysisReport, DerivedRecord, FitResult, ModelKind, NamedSeries, ObservableSeries};
pub use snapshot::{ParticleState, Snapshot};
pub use trajectory::{ContainerGeometry, ParticleProperties, Trajectory, TrajectoryColumns};
pub use vecmath::{sign, Vec2};

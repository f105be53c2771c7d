//! Post-processing for recorded particle trajectories: decoding `.sim` files,
//! detecting collisions, aggregating observables and fitting models to them.

pub mod batch;
pub mod decoder;
pub mod events;
pub mod fitting;
pub mod observables;
pub mod report;
pub mod synth;

pub use sim_common::{AnalysisConfig, AnalysisError, AnalysisReport, Result, Trajectory};

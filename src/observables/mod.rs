//! Aggregation of events and displacements into physical observables.

pub mod collisions;
pub mod msd;
pub mod pressure;
pub mod stats;

pub use collisions::CollisionTally;
pub use msd::{combine_msd, MsdEnsemble};
pub use pressure::{pressure_series, PressureAccumulator, PressureSeries};
pub use stats::{combine_series, Estimate};

use serde::{Deserialize, Serialize};

use crate::vecmath::Vec2;

/// Kinematic state of one particle at one recorded instant (`x, y, vx, vy` on disk).
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleState {
    pub position: Vec2,
    pub velocity: Vec2,
}

impl ParticleState {
    pub fn new(x: f32, y: f32, vx: f32, vy: f32) -> Self {
        ParticleState { position: Vec2::new(x, y), velocity: Vec2::new(vx, vy) }
    }
}

/// One recorded simulation instant with the state of every particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Integration step number written by the simulator.
    pub step: i32,
    /// Simulation time in seconds. Strictly increasing across a file, not necessarily uniform.
    pub time: f32,
    /// Particle states, index-aligned with the trajectory's particle properties.
    pub particles: Vec<ParticleState>,
}

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;

/// Circular container the particles live in, centred on the origin.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerGeometry {
    pub radius: f32,
}

/// Per-particle constants from the file header.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleProperties {
    pub mass: f32,
    pub radius: f32,
}

/// A fully decoded `.sim` file.
///
/// Every snapshot carries exactly `properties.len()` particle records and the
/// snapshots are kept in file order, which is also time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub geometry: ContainerGeometry,
    pub properties: Vec<ParticleProperties>,
    pub snapshots: Vec<Snapshot>,
}

impl Trajectory {
    pub fn particle_count(&self) -> usize {
        self.properties.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn first(&self) -> Option<&Snapshot> {
        self.snapshots.first()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Time of the last recorded snapshot, 0 for an empty trajectory.
    pub fn final_time(&self) -> f64 {
        self.last().map_or(0.0, |s| s.time as f64)
    }

    /// Elapsed simulated time between the first and the last snapshot.
    pub fn duration(&self) -> f64 {
        match (self.first(), self.last()) {
            (Some(a), Some(b)) => b.time as f64 - a.time as f64,
            _ => 0.0,
        }
    }

    /// Consecutive `(prev, curr)` snapshot pairs in time order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Snapshot, &Snapshot)> + '_ {
        self.snapshots.windows(2).map(|w| (&w[0], &w[1]))
    }

    /// Structure-of-arrays copy of the snapshot data for vectorised math.
    pub fn columns(&self) -> TrajectoryColumns {
        let n = self.particle_count();
        let total = n * self.snapshots.len();
        let mut columns = TrajectoryColumns {
            particle_count: n,
            steps: Vec::with_capacity(self.snapshots.len()),
            times: Vec::with_capacity(self.snapshots.len()),
            x: Vec::with_capacity(total),
            y: Vec::with_capacity(total),
            vx: Vec::with_capacity(total),
            vy: Vec::with_capacity(total),
        };
        for snapshot in &self.snapshots {
            columns.steps.push(snapshot.step);
            columns.times.push(snapshot.time);
            for p in &snapshot.particles {
                columns.x.push(p.position.x);
                columns.y.push(p.position.y);
                columns.vx.push(p.velocity.x);
                columns.vy.push(p.velocity.y);
            }
        }
        columns
    }
}

/// Columnar view of a trajectory. Per-particle arrays are snapshot-major:
/// the value for particle `i` in snapshot `s` lives at `s * particle_count + i`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryColumns {
    pub particle_count: usize,
    pub steps: Vec<i32>,
    pub times: Vec<f32>,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub vx: Vec<f32>,
    pub vy: Vec<f32>,
}

impl TrajectoryColumns {
    #[inline(always)]
    pub fn index(&self, snapshot: usize, particle: usize) -> usize {
        snapshot * self.particle_count + particle
    }

    /// `(x, y)` history of a single particle, one entry per snapshot.
    pub fn particle_positions(&self, particle: usize) -> Vec<(f32, f32)> {
        (0..self.times.len())
            .map(|s| {
                let i = self.index(s, particle);
                (self.x[i], self.y[i])
            })
            .collect()
    }
}

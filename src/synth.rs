//! Synthetic `.sim` trajectories for exercising the analysis without an
//! external simulator.

use log::{debug, info};
use rand::distr::Uniform;
use rand::prelude::*;
use rand_distr::Normal;
use sim_common::{
    AnalysisError, ContainerGeometry, ParticleProperties, ParticleState, Result, Snapshot, Trajectory,
};
use std::f64::consts::PI;
use std::io::Write;

use crate::decoder::SimWriter;

/// Point particles moving ballistically inside a circular container, reflected
/// specularly by the wall and by an optional fixed obstacle at the centre.
///
/// Event driven: one snapshot is taken at `t = 0` and then one at every
/// reflection, after the reflected particle's velocity has been updated.
/// Particles do not interact with each other.
#[derive(Debug, Clone, PartialEq)]
pub struct BallisticGas {
    pub container_radius: f32,
    pub obstacle_radius: Option<f32>,
    pub particle_count: usize,
    pub mass: f32,
    pub speed: f32,
    pub seed: u64,
}

impl Default for BallisticGas {
    fn default() -> Self {
        BallisticGas {
            container_radius: 0.05,
            obstacle_radius: Some(0.005),
            particle_count: 100,
            mass: 1.0,
            speed: 1.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Body {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
}

impl Body {
    fn state(&self) -> ParticleState {
        ParticleState::new(self.x as f32, self.y as f32, self.vx as f32, self.vy as f32)
    }

    /// Earliest positive time at which `|r + v t| = radius`, approaching from
    /// outside when `outside` is set and from inside otherwise.
    fn time_to_circle(&self, radius: f64, outside: bool) -> Option<f64> {
        let a = self.vx * self.vx + self.vy * self.vy;
        let b = 2.0 * (self.x * self.vx + self.y * self.vy);
        let c = self.x * self.x + self.y * self.y - radius * radius;
        let disc = b * b - 4.0 * a * c;
        if a == 0.0 || disc < 0.0 {
            return None;
        }
        let t = if outside {
            if b >= 0.0 {
                return None;
            }
            (-b - disc.sqrt()) / (2.0 * a)
        } else {
            (-b + disc.sqrt()) / (2.0 * a)
        };
        (t > 0.0).then_some(t)
    }

    /// Places the body exactly on the circle and mirrors the radial velocity component.
    fn reflect_at(&mut self, radius: f64) {
        let r = (self.x * self.x + self.y * self.y).sqrt();
        let (nx, ny) = (self.x / r, self.y / r);
        self.x = nx * radius;
        self.y = ny * radius;
        let vn = self.vx * nx + self.vy * ny;
        self.vx -= 2.0 * vn * nx;
        self.vy -= 2.0 * vn * ny;
    }
}

impl BallisticGas {
    fn validate(&self) -> Result<()> {
        if !(self.container_radius > 0.0) || self.particle_count == 0 || !(self.speed > 0.0) || !(self.mass > 0.0) {
            return Err(AnalysisError::InvalidParameter(format!("invalid gas parameters {:?}", self)));
        }
        if let Some(obstacle) = self.obstacle_radius {
            if !(obstacle > 0.0) || obstacle >= self.container_radius {
                return Err(AnalysisError::InvalidParameter(format!(
                    "obstacle radius {} must lie inside the container radius {}",
                    obstacle, self.container_radius
                )));
            }
        }
        Ok(())
    }

    /// Container geometry and per-particle properties of the generated file.
    pub fn header(&self) -> (ContainerGeometry, Vec<ParticleProperties>) {
        (
            ContainerGeometry { radius: self.container_radius },
            vec![ParticleProperties { mass: self.mass, radius: 0.0 }; self.particle_count],
        )
    }

    fn initial_bodies(&self, rng: &mut StdRng) -> Result<Vec<Body>> {
        let outer = self.container_radius as f64;
        let inner = self.obstacle_radius.map_or(0.0, |r| r as f64);
        // Keep starting points off both surfaces so the first snapshot never reads as a contact.
        let margin = 0.01 * outer;
        let coord = Uniform::new(-outer, outer).map_err(|e| AnalysisError::InvalidParameter(e.to_string()))?;
        let angle = Uniform::new(0.0, 2.0 * PI).map_err(|e| AnalysisError::InvalidParameter(e.to_string()))?;
        let speed = self.speed as f64;

        let mut bodies = Vec::with_capacity(self.particle_count);
        while bodies.len() < self.particle_count {
            let (x, y) = (rng.sample(coord), rng.sample(coord));
            let r = (x * x + y * y).sqrt();
            if r <= inner + margin || r >= outer - margin {
                continue;
            }
            let theta = rng.sample(angle);
            bodies.push(Body { x, y, vx: speed * theta.cos(), vy: speed * theta.sin() });
        }
        Ok(bodies)
    }

    /// Runs the gas for `reflections` surface hits and streams every snapshot to `writer`.
    pub fn write_to<W: Write>(&self, writer: W, reflections: usize) -> Result<W> {
        self.validate()?;
        let (geometry, properties) = self.header();
        let mut writer = SimWriter::new(writer, geometry, &properties)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut bodies = self.initial_bodies(&mut rng)?;
        let outer = self.container_radius as f64;
        let inner = self.obstacle_radius.map(|r| r as f64);

        let mut time = 0.0f64;
        writer.write_snapshot(&snapshot(0, time, &bodies))?;
        for step in 1..=reflections {
            // Next surface hit over all particles: (dt, particle, surface radius).
            let mut next: Option<(f64, usize, f64)> = None;
            for (i, body) in bodies.iter().enumerate() {
                let hits = body
                    .time_to_circle(outer, false)
                    .map(|dt| (dt, outer))
                    .into_iter()
                    .chain(inner.and_then(|r| body.time_to_circle(r, true).map(|dt| (dt, r))));
                for (dt, radius) in hits {
                    if next.map_or(true, |(best, _, _)| dt < best) {
                        next = Some((dt, i, radius));
                    }
                }
            }
            let Some((dt, hit, radius)) = next else {
                return Err(AnalysisError::InvalidParameter("no particle can reach a surface".to_string()));
            };

            for body in bodies.iter_mut() {
                body.x += body.vx * dt;
                body.y += body.vy * dt;
            }
            bodies[hit].reflect_at(radius);
            time += dt;
            writer.write_snapshot(&snapshot(step as i32, time, &bodies))?;
        }
        info!(
            "Ballistic gas: {} particles, {} reflections over {:.4} s",
            self.particle_count, reflections, time
        );
        writer.into_inner()
    }

    /// Runs the gas in memory.
    pub fn trajectory(&self, reflections: usize) -> Result<Trajectory> {
        let bytes = self.write_to(Vec::new(), reflections)?;
        crate::decoder::decode(&bytes)
    }

    /// Mean wall pressure of an ideal 2D gas with these parameters, `N m v^2 / (2 pi R^2)`.
    pub fn ideal_wall_pressure(&self) -> f64 {
        let r = self.container_radius as f64;
        self.particle_count as f64 * self.mass as f64 * (self.speed as f64).powi(2) / (2.0 * PI * r * r)
    }
}

fn snapshot(step: i32, time: f64, bodies: &[Body]) -> Snapshot {
    Snapshot { step, time: time as f32, particles: bodies.iter().map(Body::state).collect() }
}

/// Parameters of a single-particle Gaussian random walk.
#[derive(Debug, Clone, PartialEq)]
pub struct BrownianWalk {
    pub diffusion: f64,
    pub dt: f64,
    pub steps: usize,
    pub container_radius: f32,
    pub seed: u64,
}

/// Random walk of one tracked particle starting at the origin with independent
/// Gaussian steps of variance `2 D dt` per axis, so that `<|r(t) - r(0)|^2> = 4 D t`.
/// The container is never enforced; choose a radius the walk will not reach.
pub fn brownian_walk(walk: &BrownianWalk) -> Result<Trajectory> {
    if !(walk.diffusion > 0.0) || !(walk.dt > 0.0) {
        return Err(AnalysisError::InvalidParameter(format!("invalid random walk {:?}", walk)));
    }
    let sigma = (2.0 * walk.diffusion * walk.dt).sqrt();
    let step = Normal::new(0.0, sigma).map_err(|e| AnalysisError::InvalidParameter(e.to_string()))?;
    let mut rng = StdRng::seed_from_u64(walk.seed);

    let (mut x, mut y) = (0.0f64, 0.0f64);
    let mut snapshots = Vec::with_capacity(walk.steps + 1);
    snapshots.push(Snapshot { step: 0, time: 0.0, particles: vec![ParticleState::new(0.0, 0.0, 0.0, 0.0)] });
    for s in 1..=walk.steps {
        let (dx, dy) = (rng.sample(step), rng.sample(step));
        x += dx;
        y += dy;
        let particle = ParticleState::new(x as f32, y as f32, (dx / walk.dt) as f32, (dy / walk.dt) as f32);
        snapshots.push(Snapshot { step: s as i32, time: (s as f64 * walk.dt) as f32, particles: vec![particle] });
    }
    debug!("Random walk seed {} ended at ({:.4}, {:.4})", walk.seed, x, y);
    Ok(Trajectory {
        geometry: ContainerGeometry { radius: walk.container_radius },
        properties: vec![ParticleProperties { mass: 1.0, radius: 0.0 }],
        snapshots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gas(obstacle: Option<f32>) -> BallisticGas {
        BallisticGas {
            container_radius: 1.0,
            obstacle_radius: obstacle,
            particle_count: 8,
            mass: 1.0,
            speed: 1.0,
            seed: 7,
        }
    }

    #[test]
    fn gas_stays_inside_container() {
        let traj = gas(Some(0.1)).trajectory(200).unwrap();
        assert_eq!(traj.snapshot_count(), 201);
        for snapshot in &traj.snapshots {
            for p in &snapshot.particles {
                let r = p.position.norm();
                assert!(r <= 1.0 + 1e-5, "particle escaped to r={}", r);
                assert!(r >= 0.1 - 1e-5, "particle inside obstacle at r={}", r);
                assert!((p.velocity.norm() - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn each_snapshot_lands_one_particle_on_a_surface() {
        let traj = gas(None).trajectory(50).unwrap();
        for snapshot in &traj.snapshots[1..] {
            let on_wall = snapshot.particles.iter().filter(|p| (p.position.norm() - 1.0).abs() < 1e-5).count();
            assert!(on_wall >= 1);
        }
        assert!(traj.snapshots.windows(2).all(|w| w[1].time >= w[0].time));
    }

    #[test]
    fn same_seed_same_file() {
        let a = gas(None).write_to(Vec::new(), 30).unwrap();
        let b = gas(None).write_to(Vec::new(), 30).unwrap();
        assert_eq!(a, b);
        let c = BallisticGas { seed: 8, ..gas(None) }.write_to(Vec::new(), 30).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn invalid_gas_is_rejected() {
        assert!(gas(Some(2.0)).trajectory(5).is_err());
        assert!(BallisticGas { particle_count: 0, ..gas(None) }.trajectory(5).is_err());
    }

    #[test]
    fn reflection_reverses_radial_velocity() {
        let mut body = Body { x: 1.0, y: 0.0, vx: 0.6, vy: 0.8 };
        body.reflect_at(1.0);
        assert!((body.vx + 0.6).abs() < 1e-12);
        assert!((body.vy - 0.8).abs() < 1e-12);
        let body = Body { x: 0.5, y: 0.0, vx: -1.0, vy: 0.0 };
        assert!((body.time_to_circle(0.1, true).unwrap() - 0.4).abs() < 1e-12);
        assert!((body.time_to_circle(1.0, false).unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn random_walk_shape() {
        let walk = BrownianWalk { diffusion: 1e-3, dt: 0.01, steps: 20, container_radius: 10.0, seed: 3 };
        let traj = brownian_walk(&walk).unwrap();
        assert_eq!(traj.snapshot_count(), 21);
        assert_eq!(traj.particle_count(), 1);
        assert_eq!(traj.snapshots[0].particles[0].position.norm(), 0.0);
        assert!((traj.final_time() - 0.2).abs() < 1e-6);
        assert!(brownian_walk(&BrownianWalk { diffusion: 0.0, ..walk }).is_err());
    }
}

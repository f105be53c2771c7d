//! Event detection over consecutive snapshot pairs.
//!
//! Collisions are inferred from discrete samples: a particle collided with a
//! surface when one of its velocity components changed sign between two
//! snapshots and it now sits within tolerance of that surface's radius. This
//! misses grazing contacts that do not flip a component and can flag a
//! coincidental reversal near a surface; both are accepted discretisation
//! error of the method.

use log::debug;
use sim_common::{
    AnalysisError, CollisionParams, DisplacementParams, Event, EventKind, ObservableSeries, ParticleState, Result,
    Trajectory, Vec2,
};
use std::collections::HashSet;

/// A contact surface with its radius and absolute tolerance resolved for one file.
#[derive(Debug, Copy, Clone)]
struct ResolvedSurface {
    kind: EventKind,
    radius: f64,
    tolerance: f64,
}

/// Lazy scan of a trajectory producing collision events in time order.
/// Single pass; build a new one to scan again.
pub struct CollisionEvents<'a> {
    trajectory: &'a Trajectory,
    surfaces: Vec<ResolvedSurface>,
    // Index of the later snapshot of the pair being scanned.
    current: usize,
    particle: usize,
}

impl<'a> CollisionEvents<'a> {
    pub fn new(trajectory: &'a Trajectory, params: &CollisionParams) -> Self {
        let surfaces: Vec<ResolvedSurface> = params
            .surfaces
            .iter()
            .map(|s| {
                let radius = s.resolve_radius(&trajectory.geometry) as f64;
                ResolvedSurface { kind: s.kind, radius, tolerance: s.tol_factor as f64 * radius }
            })
            .collect();
        debug!("Collision surfaces: {:?}", surfaces);
        CollisionEvents { trajectory, surfaces, current: 1, particle: 0 }
    }

    fn classify(&self, prev: &ParticleState, curr: &ParticleState) -> Option<EventKind> {
        if prev.velocity.signs() == curr.velocity.signs() {
            return None;
        }
        // The position gate is mandatory: a reversal away from every surface is not an event.
        let dist = curr.position.norm();
        self.surfaces.iter().find(|s| (dist - s.radius).abs() < s.tolerance).map(|s| s.kind)
    }
}

impl Iterator for CollisionEvents<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let snapshots = &self.trajectory.snapshots;
        let n = self.trajectory.particle_count();
        while self.current < snapshots.len() {
            if self.particle >= n {
                self.current += 1;
                self.particle = 0;
                continue;
            }
            let i = self.particle;
            self.particle += 1;

            let prev = &snapshots[self.current - 1].particles[i];
            let curr_snapshot = &snapshots[self.current];
            let curr = &curr_snapshot.particles[i];
            if let Some(kind) = self.classify(prev, curr) {
                return Some(Event {
                    particle_id: i,
                    snapshot: self.current,
                    time: curr_snapshot.time as f64,
                    kind,
                    velocity_normal_component: prev.velocity.radial_component(curr.position),
                });
            }
        }
        None
    }
}

/// Starts a collision scan over `trajectory`.
pub fn detect_collisions<'a>(trajectory: &'a Trajectory, params: &CollisionParams) -> CollisionEvents<'a> {
    CollisionEvents::new(trajectory, params)
}

/// Keeps only the first event of each particle, relabelled [`EventKind::FirstPassage`].
/// Relies on the input being in time order, which the detector guarantees.
pub struct FirstPassages<I> {
    inner: I,
    seen: HashSet<usize>,
}

impl<I: Iterator<Item = Event>> Iterator for FirstPassages<I> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        for event in self.inner.by_ref() {
            if self.seen.insert(event.particle_id) {
                return Some(Event { kind: EventKind::FirstPassage, ..event });
            }
        }
        None
    }
}

pub fn first_passages<I: Iterator<Item = Event>>(events: I) -> FirstPassages<I> {
    FirstPassages { inner: events, seen: HashSet::new() }
}

/// Squared displacement `|r(t) - r(t0)|^2` of the tracked particle against `t - t0`.
///
/// With `truncate_at_wall`, sampling stops before the first snapshot where the
/// particle touches the container (`|r| >= R - r_particle`); everything after
/// that contact is contaminated by the boundary.
pub fn squared_displacements(trajectory: &Trajectory, params: &DisplacementParams) -> Result<ObservableSeries> {
    let idx = params.particle_index;
    let properties = trajectory.properties.get(idx).ok_or_else(|| {
        AnalysisError::InvalidParameter(format!(
            "particle index {} out of range for {} particles",
            idx,
            trajectory.particle_count()
        ))
    })?;
    let columns = trajectory.columns();
    let path = columns.particle_positions(idx);
    let (Some(&t0), Some(&(x0, y0))) = (columns.times.first(), path.first()) else {
        return Ok(ObservableSeries::empty());
    };
    let r0 = Vec2::new(x0, y0);
    let contact = trajectory.geometry.radius as f64 - properties.radius as f64;

    let mut times = Vec::with_capacity(path.len());
    let mut values = Vec::with_capacity(path.len());
    for (&t, &(x, y)) in columns.times.iter().zip(&path) {
        let position = Vec2::new(x, y);
        if params.truncate_at_wall && position.norm() >= contact {
            debug!("Particle {} reached the wall at t={}; discarding the rest.", idx, t);
            break;
        }
        times.push(t as f64 - t0 as f64);
        values.push(position.distance_squared(r0));
    }
    ObservableSeries::new(times, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_common::{ContainerGeometry, ParticleProperties, Snapshot};

    fn trajectory(snapshots: Vec<Snapshot>) -> Trajectory {
        let n = snapshots[0].particles.len();
        Trajectory {
            geometry: ContainerGeometry { radius: 1.0 },
            properties: vec![ParticleProperties { mass: 1.0, radius: 0.01 }; n],
            snapshots,
        }
    }

    fn snap(step: i32, time: f32, particles: Vec<ParticleState>) -> Snapshot {
        Snapshot { step, time, particles }
    }

    #[test]
    fn three_particle_wall_collision() {
        let traj = trajectory(vec![
            snap(
                0,
                0.0,
                vec![
                    ParticleState::new(0.9, 0.0, 1.0, 0.0),
                    ParticleState::new(0.1, 0.0, 1.0, 0.0),
                    ParticleState::new(0.0, 0.2, 1.0, 0.0),
                ],
            ),
            snap(
                1,
                0.1,
                vec![
                    ParticleState::new(0.999, 0.0, -1.0, 0.0),
                    ParticleState::new(0.2, 0.0, 1.0, 0.0),
                    ParticleState::new(0.1, 0.2, 1.0, 0.0),
                ],
            ),
        ]);
        let events: Vec<Event> = detect_collisions(&traj, &CollisionParams::wall(0.01)).collect();
        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.particle_id, 0);
        assert_eq!(event.kind, EventKind::BoundaryCollision);
        assert_eq!(event.time, 0.1f32 as f64);
        assert_eq!(event.snapshot, 1);
        assert!((event.velocity_normal_component - 1.0).abs() < 1e-12);
    }

    #[test]
    fn reversal_far_from_any_surface_is_ignored() {
        let traj = trajectory(vec![
            snap(0, 0.0, vec![ParticleState::new(0.5, 0.0, 1.0, 0.0)]),
            snap(1, 0.1, vec![ParticleState::new(0.5, 0.0, -1.0, 0.0)]),
        ]);
        let params = CollisionParams::wall(1e-3).with_surface(sim_common::ContactSurface::obstacle(0.005, 1e-5));
        assert_eq!(detect_collisions(&traj, &params).count(), 0);
    }

    #[test]
    fn no_reversal_means_no_event_even_on_the_wall() {
        let traj = trajectory(vec![
            snap(0, 0.0, vec![ParticleState::new(1.0, 0.0, 1.0, 1.0)]),
            snap(1, 0.1, vec![ParticleState::new(1.0, 0.0, 2.0, 0.5)]),
        ]);
        assert_eq!(detect_collisions(&traj, &CollisionParams::wall(0.01)).count(), 0);
    }

    #[test]
    fn obstacle_hits_are_classified_separately() {
        let traj = trajectory(vec![
            snap(0, 0.0, vec![ParticleState::new(0.0, 0.01, 0.0, -1.0), ParticleState::new(0.999, 0.0, 1.0, 0.0)]),
            snap(1, 0.1, vec![ParticleState::new(0.0, 0.005, 0.0, 1.0), ParticleState::new(0.9995, 0.0, -1.0, 0.0)]),
        ]);
        let params = CollisionParams::wall(1e-3).with_surface(sim_common::ContactSurface::obstacle(0.005, 1e-3));
        let kinds: Vec<(usize, EventKind)> =
            detect_collisions(&traj, &params).map(|e| (e.particle_id, e.kind)).collect();
        assert_eq!(kinds, vec![(0, EventKind::ObstacleCollision), (1, EventKind::BoundaryCollision)]);
    }

    #[test]
    fn first_passages_keep_one_event_per_particle() {
        let states = |vx: f32| vec![ParticleState::new(1.0, 0.0, vx, 0.0), ParticleState::new(0.0, 1.0, vx, 0.0)];
        let traj = trajectory(vec![
            snap(0, 0.0, states(1.0)),
            snap(1, 0.1, states(-1.0)),
            snap(2, 0.2, states(1.0)),
            snap(3, 0.3, states(-1.0)),
        ]);
        let params = CollisionParams::wall(0.01);
        assert_eq!(detect_collisions(&traj, &params).count(), 6);
        let first: Vec<Event> = first_passages(detect_collisions(&traj, &params)).collect();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.kind == EventKind::FirstPassage && e.time == 0.1f32 as f64));
    }

    #[test]
    fn displacement_starts_at_zero_and_stops_at_wall() {
        let traj = trajectory(vec![
            snap(0, 2.0, vec![ParticleState::new(0.1, 0.0, 1.0, 0.0)]),
            snap(1, 2.5, vec![ParticleState::new(0.4, 0.0, 1.0, 0.0)]),
            snap(2, 3.0, vec![ParticleState::new(0.995, 0.0, 1.0, 0.0)]),
            snap(3, 3.5, vec![ParticleState::new(0.5, 0.0, -1.0, 0.0)]),
        ]);
        let full = squared_displacements(&traj, &DisplacementParams::default()).unwrap();
        assert_eq!(full.len(), 4);
        assert_eq!(full.values()[0], 0.0);
        assert_eq!(full.time_bins()[0], 0.0);

        let cut = squared_displacements(&traj, &DisplacementParams { particle_index: 0, truncate_at_wall: true })
            .unwrap();
        assert_eq!(cut.len(), 2);
        assert_eq!(cut.final_time(), Some(0.5));
    }

    #[test]
    fn displacement_rejects_unknown_particle() {
        let traj = trajectory(vec![snap(0, 0.0, vec![ParticleState::default()])]);
        let params = DisplacementParams { particle_index: 3, truncate_at_wall: false };
        assert!(matches!(squared_displacements(&traj, &params), Err(AnalysisError::InvalidParameter(_))));
    }
}

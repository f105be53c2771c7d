use serde::{Deserialize, Serialize};

/// What a detected event is attributed to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Velocity reversal at the container wall.
    BoundaryCollision,
    /// Velocity reversal at the central obstacle.
    ObstacleCollision,
    /// The first collision of a particle, relabelled by the first-passage filter.
    FirstPassage,
}

/// A physically meaningful event found between two consecutive snapshots.
/// Never stored in a `.sim` file; built during a forward scan and dropped after aggregation.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub particle_id: usize,
    /// Index of the later snapshot of the pair that produced the event.
    pub snapshot: usize,
    pub time: f64,
    pub kind: EventKind,
    /// Pre-event velocity projected on the outward radial unit vector.
    pub velocity_normal_component: f64,
}

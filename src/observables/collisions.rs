use log::debug;
use serde::{Deserialize, Serialize};
use sim_common::{AnalysisError, CollisionParams, Event, ObservableSeries, Result, Trajectory};

use crate::events::{detect_collisions, first_passages};

/// Collision times of one run, all events and first event per particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionTally {
    pub all: Vec<f64>,
    pub first: Vec<f64>,
    /// Time of the last snapshot; runs are assumed to start at t = 0.
    pub t_final: f64,
}

impl CollisionTally {
    /// Tallies time-ordered events of a run that ended at `t_final`.
    pub fn from_events<I: IntoIterator<Item = Event>>(events: I, t_final: f64) -> Self {
        let events: Vec<Event> = events.into_iter().collect();
        let first = first_passages(events.iter().copied()).map(|e| e.time).collect();
        let all = events.iter().map(|e| e.time).collect();
        CollisionTally { all, first, t_final }
    }

    pub fn from_trajectory(trajectory: &Trajectory, params: &CollisionParams) -> Self {
        let tally = Self::from_events(detect_collisions(trajectory, params), trajectory.final_time());
        debug!(
            "Collisions: {} total, {} particles hit at least once, t_final={}",
            tally.all.len(),
            tally.first.len(),
            tally.t_final
        );
        tally
    }

    fn require_time(t: f64) -> Result<()> {
        if t > 0.0 && t.is_finite() {
            Ok(())
        } else {
            Err(AnalysisError::insufficient(format!("collision frequency over a run of length {}", t)))
        }
    }

    /// All collisions per unit simulated time.
    pub fn frequency_all(&self) -> Result<f64> {
        Self::require_time(self.t_final)?;
        Ok(self.all.len() as f64 / self.t_final)
    }

    /// First collisions per unit simulated time.
    pub fn frequency_first(&self) -> Result<f64> {
        Self::require_time(self.t_final)?;
        Ok(self.first.len() as f64 / self.t_final)
    }

    /// `(all, first)` frequencies counting only events up to `t_max`, so runs of
    /// different length can be compared over a common horizon.
    pub fn frequency_until(&self, t_max: f64) -> Result<(f64, f64)> {
        Self::require_time(t_max)?;
        let count = |times: &[f64]| times.iter().filter(|&&t| t <= t_max).count() as f64;
        Ok((count(&self.all) / t_max, count(&self.first) / t_max))
    }

    /// Mean time of first collision over the particles that collided.
    pub fn mean_first_passage_time(&self) -> Result<f64> {
        if self.first.is_empty() {
            return Err(AnalysisError::insufficient("no particle collided during the run"));
        }
        Ok(self.first.iter().sum::<f64>() / self.first.len() as f64)
    }

    /// Cumulative number of collisions against time, optionally cut at `t_max`.
    pub fn cumulative(&self, first_only: bool, t_max: Option<f64>) -> ObservableSeries {
        let mut times = if first_only { self.first.clone() } else { self.all.clone() };
        times.sort_by(|a, b| a.total_cmp(b));
        if let Some(limit) = t_max {
            times.retain(|&t| t <= limit);
        }
        let counts = (1..=times.len()).map(|c| c as f64).collect();
        ObservableSeries::new(times, counts).unwrap_or_else(|_| ObservableSeries::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_common::EventKind;

    fn event(particle_id: usize, time: f64) -> Event {
        Event { particle_id, snapshot: 0, time, kind: EventKind::ObstacleCollision, velocity_normal_component: 0.0 }
    }

    fn tally() -> CollisionTally {
        CollisionTally::from_events(
            vec![event(0, 1.0), event(1, 2.0), event(0, 3.0), event(2, 6.0), event(1, 8.0)],
            10.0,
        )
    }

    #[test]
    fn frequencies_divide_by_run_length() {
        let t = tally();
        assert_eq!(t.frequency_all().unwrap(), 0.5);
        assert_eq!(t.frequency_first().unwrap(), 0.3);
        assert_eq!(t.frequency_until(4.0).unwrap(), (0.75, 0.5));
        assert_eq!(t.mean_first_passage_time().unwrap(), 3.0);
    }

    #[test]
    fn zero_length_run_has_no_frequency() {
        let t = CollisionTally::from_events(Vec::new(), 0.0);
        assert!(matches!(t.frequency_all(), Err(AnalysisError::InsufficientData { .. })));
        assert!(t.mean_first_passage_time().is_err());
    }

    #[test]
    fn cumulative_counts_step_up() {
        let curve = tally().cumulative(true, Some(5.0));
        assert_eq!(curve.time_bins(), &[1.0, 2.0]);
        assert_eq!(curve.values(), &[1.0, 2.0]);
        assert_eq!(tally().cumulative(false, None).len(), 5);
    }
}

use log::{debug, info};
use sim_common::{
    AnalysisError, ContainerGeometry, Event, EventKind, ObservableSeries, PressureParams, Result, Trajectory,
};
use std::f64::consts::PI;

use crate::events::detect_collisions;

/// Upper bound on the windows one run may produce.
const MAX_WINDOWS: f64 = 1e8;

/// Pressure on the wall and, when configured, on the obstacle, one value per window.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureSeries {
    pub wall: ObservableSeries,
    pub obstacle: Option<ObservableSeries>,
}

/// Windowed impulse accumulator.
///
/// Each wall or obstacle collision contributes `2 m |v_n|`. When the clock
/// passes a window boundary the window is closed with
/// `pressure = impulse / (window * 2 pi R)` and the sums reset; windows without
/// events close at zero.
pub struct PressureAccumulator {
    window: f64,
    origin: f64,
    closed: u64,
    wall_perimeter: f64,
    obstacle_perimeter: Option<f64>,
    wall_impulse: f64,
    obstacle_impulse: f64,
    // Events recorded since the last window closed.
    pending: usize,
    midpoints: Vec<f64>,
    wall: Vec<f64>,
    obstacle: Vec<f64>,
}

impl PressureAccumulator {
    /// Starts the window clock at `start_time`.
    pub fn new(params: &PressureParams, geometry: &ContainerGeometry, start_time: f64) -> Result<Self> {
        if !(params.window > 0.0) || !params.window.is_finite() {
            return Err(AnalysisError::InvalidParameter(format!(
                "pressure window must be positive, got {}",
                params.window
            )));
        }
        Ok(PressureAccumulator {
            window: params.window,
            origin: start_time,
            closed: 0,
            wall_perimeter: 2.0 * PI * geometry.radius as f64,
            obstacle_perimeter: params.obstacle.map(|o| 2.0 * PI * o.radius as f64),
            wall_impulse: 0.0,
            obstacle_impulse: 0.0,
            pending: 0,
            midpoints: Vec::new(),
            wall: Vec::new(),
            obstacle: Vec::new(),
        })
    }

    fn window_end(&self) -> f64 {
        self.origin + (self.closed + 1) as f64 * self.window
    }

    fn close_window(&mut self) {
        let start = self.origin + self.closed as f64 * self.window;
        self.midpoints.push(start + self.window / 2.0);
        self.wall.push(self.wall_impulse / (self.window * self.wall_perimeter));
        if let Some(perimeter) = self.obstacle_perimeter {
            self.obstacle.push(self.obstacle_impulse / (self.window * perimeter));
        }
        self.wall_impulse = 0.0;
        self.obstacle_impulse = 0.0;
        self.pending = 0;
        self.closed += 1;
    }

    /// Closes every whole window that ended at or before `time`, which must be finite.
    pub fn advance_to(&mut self, time: f64) {
        while time >= self.window_end() {
            self.close_window();
        }
    }

    /// Adds the impulse of one collision to the open window.
    pub fn record(&mut self, event: &Event, mass: f32) {
        let impulse = 2.0 * mass as f64 * event.velocity_normal_component.abs();
        match event.kind {
            EventKind::BoundaryCollision => self.wall_impulse += impulse,
            EventKind::ObstacleCollision if self.obstacle_perimeter.is_some() => self.obstacle_impulse += impulse,
            _ => return,
        }
        self.pending += 1;
    }

    /// Number of windows closed so far.
    pub fn windows_closed(&self) -> u64 {
        self.closed
    }

    /// Closes the trailing partial window if it holds any impulse (using the
    /// nominal window length, not a prorated one) and returns the series.
    pub fn finish(mut self) -> Result<PressureSeries> {
        if self.pending > 0 {
            self.close_window();
        }
        let obstacle = match self.obstacle_perimeter {
            Some(_) => Some(ObservableSeries::new(self.midpoints.clone(), self.obstacle)?),
            None => None,
        };
        Ok(PressureSeries { wall: ObservableSeries::new(self.midpoints, self.wall)?, obstacle })
    }
}

/// Snapshot times must be finite, non-negative and non-decreasing, and must not
/// span more than [`MAX_WINDOWS`] windows.
fn check_times(trajectory: &Trajectory, window: f64) -> Result<()> {
    let t0 = trajectory.first().map_or(0.0, |s| s.time);
    if !t0.is_finite() || t0 < 0.0 {
        return Err(AnalysisError::InvalidParameter(format!("first snapshot time {} is not a valid time", t0)));
    }
    for (prev, curr) in trajectory.pairs() {
        if !curr.time.is_finite() || curr.time < prev.time {
            return Err(AnalysisError::InvalidParameter(format!(
                "snapshot time {} at step {} follows {}",
                curr.time, curr.step, prev.time
            )));
        }
    }
    if trajectory.final_time() / window > MAX_WINDOWS {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} s of data in windows of {} s exceeds {} windows",
            trajectory.final_time(),
            window,
            MAX_WINDOWS
        )));
    }
    Ok(())
}

/// Runs the collision detector and the pressure accumulator over a whole trajectory.
/// The window clock starts at `t = 0` and advances with every snapshot time.
pub fn pressure_series(trajectory: &Trajectory, params: &PressureParams) -> Result<PressureSeries> {
    if trajectory.snapshot_count() < 2 {
        return Err(AnalysisError::insufficient(format!(
            "pressure needs at least 2 snapshots, trajectory has {}",
            trajectory.snapshot_count()
        )));
    }
    let mut accumulator = PressureAccumulator::new(params, &trajectory.geometry, 0.0)?;
    check_times(trajectory, params.window)?;
    let collision_params = params.collision_params();
    let mut events = detect_collisions(trajectory, &collision_params).peekable();
    let mut recorded = 0usize;

    for (idx, snapshot) in trajectory.snapshots.iter().enumerate().skip(1) {
        accumulator.advance_to(snapshot.time as f64);
        while let Some(event) = events.next_if(|e| e.snapshot == idx) {
            accumulator.record(&event, trajectory.properties[event.particle_id].mass);
            recorded += 1;
        }
    }

    debug!("Pressure: {} collisions over {} closed windows", recorded, accumulator.windows_closed());
    let series = accumulator.finish()?;
    info!("Pressure series with {} windows of {} s", series.wall.len(), params.window);
    Ok(series)
}

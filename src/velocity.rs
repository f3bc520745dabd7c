use std::time::Duration;

use crate::config::VelocitySettings;
use crate::hand::{self, Point};
use crate::logging::LogSink;

/// Frame-to-frame speed of a tracked point (px/s).
#[derive(Debug, Default)]
pub struct VelocityTracker {
    last_position: Option<Point>,
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// First sample, or a non-positive `dt`, latches the position and reads as
    /// zero.
    pub fn measure(&mut self, position: Point, dt: Duration) -> f64 {
        let secs = dt.as_secs_f64();
        let velocity = match self.last_position {
            Some(prev) if secs > 0.0 => hand::distance(position, prev) / secs,
            _ => 0.0,
        };
        self.last_position = Some(position);
        velocity
    }

    pub fn reset(&mut self) {
        self.last_position = None;
    }
}

/// Velocity-dependent cursor gain. The adjustment `velocity^gamma * gain` is
/// computed above `min_velocity` but not yet applied: the stage passes
/// positions through unchanged until directional gain is designed.
#[derive(Debug)]
pub struct VelocityGate {
    settings: VelocitySettings,
    log: LogSink,
}

impl VelocityGate {
    pub fn new(settings: VelocitySettings, log: LogSink) -> Self {
        Self { settings, log }
    }

    pub fn adjustment(&self, velocity: f64) -> Option<f64> {
        (velocity >= self.settings.min_velocity)
            .then(|| velocity.powf(self.settings.gamma) * self.settings.gain)
    }

    pub fn apply(&self, position: Point, velocity: f64) -> Point {
        if let Some(adj) = self.adjustment(velocity) {
            self.log
                .trace(format_args!("velocity={velocity:.1} gain adjustment={adj:.4} (inert)"));
        }
        position
    }
}

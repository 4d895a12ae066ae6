//! Print time estimation with acceleration.
//!
//! Moves are queued as `(speed, distance)` actions. When the queue is
//! evaluated every action becomes a trapezoidal velocity profile: a
//! backward pass limits each entry speed to what can still be braked
//! within the following moves, and a forward pass limits it to what can be
//! reached from the preceding ones. The queue starts and ends at rest.

use serde::{Deserialize, Serialize};

/// Machine motion limits used by the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionLimits {
    /// Acceleration (mm/s²).
    pub acceleration: f64,
    /// Maximum feedrate of any move (mm/s).
    pub max_feedrate: f64,
    /// Largest instantaneous speed change at a junction (mm/s).
    pub max_jerk: f64,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            acceleration: 3000.0,
            max_feedrate: 600.0,
            max_jerk: 20.0,
        }
    }
}

/// Accumulates moves and turns them into elapsed seconds.
pub trait TimeEstimator {
    /// Queue a move of `distance` millimeters at `speed` mm/s.
    fn add_action(&mut self, speed: f64, distance: f64);

    /// Seconds needed for every move queued since the previous call.
    /// The queue is drained, so successive results add up.
    fn calculate(&mut self) -> f64;

    /// Drop queued moves without evaluating them.
    fn reset(&mut self);

    /// Replace the motion limits used for subsequent moves.
    fn set_limits(&mut self, _limits: &MotionLimits) {}
}

#[derive(Debug, Clone, Copy)]
struct Block {
    distance: f64,
    nominal_speed: f64,
    max_entry_speed: f64,
    entry_speed: f64,
}

/// Trapezoidal-profile estimator.
#[derive(Debug, Clone, Default)]
pub struct TrapezoidTimeEstimator {
    limits: MotionLimits,
    blocks: Vec<Block>,
}

impl TrapezoidTimeEstimator {
    /// Create an estimator with the given limits.
    pub fn new(limits: MotionLimits) -> Self {
        Self {
            limits,
            blocks: Vec::new(),
        }
    }

    /// Number of queued moves.
    pub fn pending(&self) -> usize {
        self.blocks.len()
    }

    fn junction_speed(&self, prev: f64, next: f64) -> f64 {
        let slower = prev.min(next);
        if (prev - next).abs() <= self.limits.max_jerk {
            slower
        } else {
            slower.min(self.limits.max_jerk)
        }
    }

    fn plan(&mut self) {
        let accel = self.limits.acceleration;

        let mut exit_speed = 0.0_f64;
        for block in self.blocks.iter_mut().rev() {
            let reachable = (exit_speed * exit_speed + 2.0 * accel * block.distance).sqrt();
            block.entry_speed = block.max_entry_speed.min(reachable);
            exit_speed = block.entry_speed;
        }

        let mut prev: Option<(f64, f64)> = None;
        for block in self.blocks.iter_mut() {
            if let Some((prev_entry, prev_distance)) = prev {
                let reachable = (prev_entry * prev_entry + 2.0 * accel * prev_distance).sqrt();
                block.entry_speed = block.entry_speed.min(reachable);
            }
            prev = Some((block.entry_speed, block.distance));
        }
    }
}

impl TimeEstimator for TrapezoidTimeEstimator {
    fn add_action(&mut self, speed: f64, distance: f64) {
        if distance <= 0.0 || speed <= 0.0 {
            return;
        }
        let nominal_speed = speed.min(self.limits.max_feedrate);
        let max_entry_speed = match self.blocks.last() {
            Some(prev) => self.junction_speed(prev.nominal_speed, nominal_speed),
            None => 0.0,
        };
        self.blocks.push(Block {
            distance,
            nominal_speed,
            max_entry_speed,
            entry_speed: 0.0,
        });
    }

    fn calculate(&mut self) -> f64 {
        if self.blocks.is_empty() {
            return 0.0;
        }
        self.plan();

        let accel = self.limits.acceleration;
        let mut total = 0.0;
        for (idx, block) in self.blocks.iter().enumerate() {
            let v0 = block.entry_speed;
            let v1 = self.blocks.get(idx + 1).map_or(0.0, |next| next.entry_speed);
            total += trapezoid_time(block.distance, v0, block.nominal_speed, v1, accel);
        }
        self.blocks.clear();
        total
    }

    fn reset(&mut self) {
        self.blocks.clear();
    }

    fn set_limits(&mut self, limits: &MotionLimits) {
        self.limits = *limits;
    }
}

/// Seconds to cover `distance` starting at `v0`, cruising at most at
/// `nominal` and ending at `v1`.
fn trapezoid_time(distance: f64, v0: f64, nominal: f64, v1: f64, accel: f64) -> f64 {
    if accel <= 0.0 || !accel.is_finite() {
        return distance / nominal;
    }
    let accel_distance = (nominal * nominal - v0 * v0) / (2.0 * accel);
    let decel_distance = (nominal * nominal - v1 * v1) / (2.0 * accel);
    if accel_distance + decel_distance <= distance {
        let cruise = distance - accel_distance - decel_distance;
        (nominal - v0) / accel + (nominal - v1) / accel + cruise / nominal
    } else {
        let peak = ((2.0 * accel * distance + v0 * v0 + v1 * v1) / 2.0).sqrt();
        (peak - v0).max(0.0) / accel + (peak - v1).max(0.0) / accel
    }
}

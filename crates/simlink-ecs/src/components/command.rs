//! Command components consumed by the physics bridge.
//!
//! Per-DOF commands (`JointForceCmd`, `JointVelocityCmd`) persist and are
//! zeroed after every tick. Resets and world commands are one-shot and are
//! removed after the tick that observed them.

use std::ops::{Add, AddAssign, Neg};
use std::time::Duration;

use nalgebra::{Isometry3, Vector3};
use serde::{Deserialize, Serialize};

data_component!(
    /// Per-DOF joint effort (N or Nm) applied for one step.
    JointForceCmd(Vec<f64>)
);
data_component!(
    /// Per-DOF joint velocity target for one step.
    JointVelocityCmd(Vec<f64>)
);
data_component!(
    /// One-shot per-DOF joint position reset.
    JointPositionReset(Vec<f64>)
);
data_component!(
    /// One-shot per-DOF joint velocity reset.
    JointVelocityReset(Vec<f64>)
);
data_component!(
    /// External wrench in world coordinates applied to a link for one step.
    ExternalWorldWrenchCmd(Wrench)
);
data_component!(
    /// External wrenches in world coordinates, each active until its expiry.
    ExternalWorldWrenchCmdWithDuration(WrenchSchedule)
);
data_component!(
    /// One-shot world pose request for a model.
    WorldPoseCmd(Isometry3<f64>)
);
data_component!(
    /// One-shot world velocity request for a model's floating base.
    WorldVelocityCmd(Twist)
);

/// Force and torque pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wrench {
    /// Force (N).
    pub force: Vector3<f64>,
    /// Torque (Nm).
    pub torque: Vector3<f64>,
}

impl Default for Wrench {
    fn default() -> Self {
        Self::zero()
    }
}

impl Wrench {
    /// Wrench from force and torque.
    pub fn new(force: Vector3<f64>, torque: Vector3<f64>) -> Self {
        Self { force, torque }
    }

    /// Zero wrench.
    pub fn zero() -> Self {
        Self {
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }

    /// Whether both force and torque are exactly zero.
    pub fn is_zero(&self) -> bool {
        self.force == Vector3::zeros() && self.torque == Vector3::zeros()
    }

    /// Reset to zero.
    pub fn clear(&mut self) {
        *self = Self::zero();
    }
}

impl Add for Wrench {
    type Output = Wrench;

    fn add(self, rhs: Wrench) -> Wrench {
        Wrench::new(self.force + rhs.force, self.torque + rhs.torque)
    }
}

impl AddAssign for Wrench {
    fn add_assign(&mut self, rhs: Wrench) {
        self.force += rhs.force;
        self.torque += rhs.torque;
    }
}

impl Neg for Wrench {
    type Output = Wrench;

    fn neg(self) -> Wrench {
        Wrench::new(-self.force, -self.torque)
    }
}

/// A wrench contribution that stops applying once simulated time passes `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedWrench {
    /// Contribution.
    pub wrench: Wrench,
    /// Last simulated instant at which the contribution is active.
    pub expires_at: Duration,
}

/// Ordered list of time-bounded wrench contributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WrenchSchedule {
    entries: Vec<TimedWrench>,
}

impl WrenchSchedule {
    /// Empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contribution active from `now` for `duration`.
    pub fn push(&mut self, wrench: Wrench, now: Duration, duration: Duration) {
        self.entries.push(TimedWrench {
            wrench,
            expires_at: now + duration,
        });
    }

    /// Drop every contribution whose expiry instant precedes `now`.
    pub fn clean_expired(&mut self, now: Duration) {
        self.entries.retain(|entry| entry.expires_at >= now);
    }

    /// Sum of the contributions still in the schedule.
    pub fn total(&self) -> Wrench {
        self.entries
            .iter()
            .fold(Wrench::zero(), |acc, entry| acc + entry.wrench)
    }

    /// Contributions in insertion order.
    pub fn entries(&self) -> &[TimedWrench] {
        &self.entries
    }

    /// Number of contributions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schedule is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Linear and angular velocity pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    /// Linear velocity.
    pub linear: Vector3<f64>,
    /// Angular velocity.
    pub angular: Vector3<f64>,
}

impl Twist {
    /// Twist from linear and angular parts.
    pub fn new(linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        Self { linear, angular }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn force(x: f64) -> Wrench {
        Wrench::new(Vector3::new(x, 0.0, 0.0), Vector3::zeros())
    }

    #[test]
    fn test_schedule_drops_expired_only() {
        let mut schedule = WrenchSchedule::new();
        schedule.push(force(1.0), Duration::from_millis(0), Duration::from_millis(10));
        schedule.push(force(2.0), Duration::from_millis(0), Duration::from_millis(50));

        schedule.clean_expired(Duration::from_millis(10));
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.total().force.x, 3.0);

        schedule.clean_expired(Duration::from_millis(11));
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.total().force.x, 2.0);

        schedule.clean_expired(Duration::from_secs(1));
        assert!(schedule.is_empty());
        assert!(schedule.total().is_zero());
    }

    #[test]
    fn test_wrench_arithmetic() {
        let mut w = force(1.0);
        w += force(2.0);
        assert_eq!((-w).force.x, -3.0);
        w.clear();
        assert!(w.is_zero());
    }
}

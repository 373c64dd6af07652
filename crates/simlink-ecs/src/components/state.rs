//! State outputs populated by the physics bridge.
//!
//! Every component here is opt-in: the bridge only refreshes it on entities
//! where some other system already created it.

use std::collections::VecDeque;

use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

data_component!(
    /// Pose in world coordinates.
    WorldPose(Isometry3<f64>)
);
data_component!(
    /// Linear velocity in world coordinates.
    WorldLinearVelocity(Vector3<f64>)
);
data_component!(
    /// Angular velocity in world coordinates.
    WorldAngularVelocity(Vector3<f64>)
);
data_component!(
    /// Linear acceleration in world coordinates.
    WorldLinearAcceleration(Vector3<f64>)
);
data_component!(
    /// Angular acceleration in world coordinates.
    WorldAngularAcceleration(Vector3<f64>)
);
data_component!(
    /// Linear velocity in body-fixed coordinates.
    LinearVelocity(Vector3<f64>)
);
data_component!(
    /// Angular velocity in body-fixed coordinates.
    AngularVelocity(Vector3<f64>)
);
data_component!(
    /// Linear acceleration in body-fixed coordinates.
    LinearAcceleration(Vector3<f64>)
);
data_component!(
    /// Angular acceleration in body-fixed coordinates.
    AngularAcceleration(Vector3<f64>)
);
data_component!(
    /// Per-DOF joint position.
    JointPosition(Vec<f64>)
);
data_component!(
    /// Per-DOF joint velocity.
    JointVelocity(Vec<f64>)
);
data_component!(
    /// Per-DOF joint effort commanded during the last tick.
    JointForce(Vec<f64>)
);
data_component!(
    /// Bounded history of applied joint efforts.
    HistoryOfAppliedJointForces(ForceHistory)
);
data_component!(
    /// Contacts of a collision entity during the last step.
    ContactSensorData(Contacts)
);

/// First-in first-out buffer with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceHistory {
    capacity: usize,
    values: VecDeque<f64>,
}

impl ForceHistory {
    /// Empty history holding at most `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a value, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.values.iter()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of stored values.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Force and torque felt by both bodies of one contact point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactWrench {
    /// Name of the requesting collision.
    pub body_1_name: String,
    /// Name of the partner collision.
    pub body_2_name: String,
    /// Force on the requesting collision.
    pub body_1_force: Vector3<f64>,
    /// Force on the partner collision.
    pub body_2_force: Vector3<f64>,
    /// Torque on the requesting collision (always zero).
    pub body_1_torque: Vector3<f64>,
    /// Torque on the partner collision (always zero).
    pub body_2_torque: Vector3<f64>,
}

/// All contact points between one collision and one partner collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactReport {
    /// The collision that owns the report.
    pub collision1: Entity,
    /// The partner collision.
    pub collision2: Entity,
    /// One world position per contact point.
    pub positions: Vec<Point3<f64>>,
    /// Penetration depth per point, when the engine reports it.
    pub depths: Vec<f64>,
    /// Contact normal per point, oriented from `collision1` to `collision2`.
    pub normals: Vec<Vector3<f64>>,
    /// Wrench per point.
    pub wrenches: Vec<ContactWrench>,
}

impl ContactReport {
    /// Report with no points yet.
    pub fn new(collision1: Entity, collision2: Entity) -> Self {
        Self {
            collision1,
            collision2,
            positions: Vec::new(),
            depths: Vec::new(),
            normals: Vec::new(),
            wrenches: Vec::new(),
        }
    }
}

/// Contact reports of one collision, one per partner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contacts {
    /// Reports ordered by partner entity.
    pub contacts: Vec<ContactReport>,
}

impl Contacts {
    /// Report for `partner`, if any.
    pub fn with(&self, partner: Entity) -> Option<&ContactReport> {
        self.contacts.iter().find(|c| c.collision2 == partner)
    }

    /// Whether there are no contacts.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = ForceHistory::with_capacity(3);
        for v in 1..=5 {
            history.push(f64::from(v));
        }
        let values: Vec<f64> = history.iter().copied().collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
        assert_eq!(history.capacity(), 3);
    }

    #[test]
    fn test_zero_capacity_history_stays_empty() {
        let mut history = ForceHistory::with_capacity(0);
        history.push(1.0);
        assert!(history.is_empty());
    }
}

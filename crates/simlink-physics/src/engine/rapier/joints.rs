//! Joint conversion from scene joints to Rapier, and joint-space kinematics.
//!
//! Every supported joint is built with coincident frames: the child frame is
//! the declared joint pose with its X axis turned onto the joint axis, and the
//! parent frame is the same world frame expressed in the parent body. Joint
//! coordinates are then read straight off the relative pose of the two frames.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use rapier3d::dynamics::{
    GenericJoint, GenericJointBuilder, JointAxesMask, JointAxis, MotorModel, RigidBody,
};
use simlink_ecs::components::{AxisSpec, JointKind};

use crate::engine::JointDescription;
use crate::error::PhysicsError;

/// How the DOFs of a joint map onto Rapier's joint axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum JointLayout {
    /// No free axis.
    Fixed,
    /// Rotation about frame X.
    Revolute,
    /// Translation along frame X.
    Prismatic,
    /// Free rotation, one DOF per frame axis.
    Ball,
}

impl JointLayout {
    /// Number of DOFs.
    pub(super) fn dof(self) -> usize {
        match self {
            JointLayout::Fixed => 0,
            JointLayout::Revolute | JointLayout::Prismatic => 1,
            JointLayout::Ball => 3,
        }
    }

    /// Rapier axis driven by a DOF.
    pub(super) fn axis(self, dof: usize) -> Option<JointAxis> {
        match (self, dof) {
            (JointLayout::Revolute, 0) | (JointLayout::Ball, 0) => Some(JointAxis::AngX),
            (JointLayout::Prismatic, 0) => Some(JointAxis::LinX),
            (JointLayout::Ball, 1) => Some(JointAxis::AngY),
            (JointLayout::Ball, 2) => Some(JointAxis::AngZ),
            _ => None,
        }
    }

    fn is_angular(self) -> bool {
        matches!(self, JointLayout::Revolute | JointLayout::Ball)
    }
}

/// Create a Rapier joint from a joint description.
///
/// # Arguments
///
/// * `desc` - The joint description
/// * `parent_pose` - World pose of the parent body (identity for the ground)
/// * `child_pose` - World pose of the child body
/// * `motor_max_force` - Force limit of the velocity-command motors
pub(super) fn build_joint(
    desc: &JointDescription,
    parent_pose: &Isometry3<f32>,
    child_pose: &Isometry3<f32>,
    motor_max_force: f32,
) -> Result<(GenericJoint, JointLayout), PhysicsError> {
    let layout = match desc.kind {
        JointKind::Fixed => JointLayout::Fixed,
        JointKind::Revolute | JointKind::Continuous => JointLayout::Revolute,
        JointKind::Prismatic => JointLayout::Prismatic,
        JointKind::Ball => JointLayout::Ball,
        JointKind::Universal | JointKind::Screw | JointKind::Gearbox | JointKind::Revolute2 => {
            return Err(PhysicsError::UnsupportedJoint {
                name: desc.name.clone(),
                kind: format!("{:?}", desc.kind),
            })
        }
    };

    let axis = desc.axis.unwrap_or_default();
    let frame2 = desc.pose.cast::<f32>() * axis_frame(&axis.xyz.cast::<f32>());
    let frame1 = parent_pose.inverse() * child_pose * frame2;

    let locked = match layout {
        JointLayout::Fixed => JointAxesMask::LOCKED_FIXED_AXES,
        JointLayout::Revolute => JointAxesMask::LOCKED_REVOLUTE_AXES,
        JointLayout::Prismatic => JointAxesMask::LOCKED_PRISMATIC_AXES,
        JointLayout::Ball => JointAxesMask::LOCKED_SPHERICAL_AXES,
    };
    let mut builder = GenericJointBuilder::new(locked)
        .local_frame1(frame1)
        .local_frame2(frame2);

    if let Some(limits) = limits(desc.kind, &axis) {
        builder = builder.limits(JointAxis::AngX, limits);
    }
    if desc.kind == JointKind::Prismatic && axis.is_limited() {
        builder = builder.limits(JointAxis::LinX, [axis.lower as f32, axis.upper as f32]);
    }

    for dof in 0..layout.dof() {
        if let Some(rapier_axis) = layout.axis(dof) {
            builder = builder
                .motor_model(rapier_axis, MotorModel::AccelerationBased)
                .motor_max_force(rapier_axis, motor_max_force);
        }
    }

    Ok((builder.build(), layout))
}

fn limits(kind: JointKind, axis: &AxisSpec) -> Option<[f32; 2]> {
    (kind == JointKind::Revolute && axis.is_limited())
        .then(|| [axis.lower as f32, axis.upper as f32])
}

/// Rotation taking frame X onto `axis`.
fn axis_frame(axis: &Vector3<f32>) -> Isometry3<f32> {
    let rotation = UnitQuaternion::rotation_between(&Vector3::x(), axis).unwrap_or_else(|| {
        // Anti-parallel to X.
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f32::consts::PI)
    });
    Isometry3::from_parts(Translation3::identity(), rotation)
}

/// World poses of both joint frames.
pub(super) struct JointFrames {
    pub(super) frame1: Isometry3<f32>,
    pub(super) frame2: Isometry3<f32>,
}

impl JointFrames {
    pub(super) fn new(joint: &GenericJoint, body1: &RigidBody, body2: &RigidBody) -> Self {
        Self {
            frame1: body1.position() * joint.local_frame1,
            frame2: body2.position() * joint.local_frame2,
        }
    }

    fn relative(&self) -> Isometry3<f32> {
        self.frame1.inverse() * self.frame2
    }
}

/// Current joint coordinates, one per DOF.
pub(super) fn coordinates(layout: JointLayout, frames: &JointFrames) -> Vec<f64> {
    let relative = frames.relative();
    match layout {
        JointLayout::Fixed => Vec::new(),
        JointLayout::Revolute => vec![f64::from(relative.rotation.scaled_axis().x)],
        JointLayout::Prismatic => vec![f64::from(relative.translation.vector.x)],
        JointLayout::Ball => relative
            .rotation
            .scaled_axis()
            .iter()
            .map(|v| f64::from(*v))
            .collect(),
    }
}

/// Current joint velocities, one per DOF, in the parent joint frame.
pub(super) fn velocities(
    layout: JointLayout,
    frames: &JointFrames,
    body1: &RigidBody,
    body2: &RigidBody,
) -> Vec<f64> {
    let (linear, angular) = relative_velocity(frames, body1, body2);
    match layout {
        JointLayout::Fixed => Vec::new(),
        JointLayout::Revolute => vec![f64::from(angular.x)],
        JointLayout::Prismatic => vec![f64::from(linear.x)],
        JointLayout::Ball => angular.iter().map(|v| f64::from(*v)).collect(),
    }
}

fn relative_velocity(
    frames: &JointFrames,
    body1: &RigidBody,
    body2: &RigidBody,
) -> (Vector3<f32>, Vector3<f32>) {
    let anchor = frames.frame2.translation.vector.into();
    let linear = body2.velocity_at_point(&anchor) - body1.velocity_at_point(&anchor);
    let angular = body2.angvel() - body1.angvel();
    let to_frame1 = frames.frame1.rotation.inverse();
    (to_frame1 * linear, to_frame1 * angular)
}

/// World pose the child body must take for the joint to sit at `coordinates`.
pub(super) fn child_pose_for(
    layout: JointLayout,
    joint: &GenericJoint,
    frames: &JointFrames,
    coordinates: &[f64],
) -> Isometry3<f32> {
    let q = |i: usize| coordinates.get(i).copied().unwrap_or(0.0) as f32;
    let relative = match layout {
        JointLayout::Fixed => Isometry3::identity(),
        JointLayout::Revolute => Isometry3::rotation(Vector3::x() * q(0)),
        JointLayout::Prismatic => Isometry3::translation(q(0), 0.0, 0.0),
        JointLayout::Ball => Isometry3::rotation(Vector3::new(q(0), q(1), q(2))),
    };
    frames.frame1 * relative * joint.local_frame2.inverse()
}

/// Child body velocities (linear at the center of mass, angular) for the
/// joint to move at `velocities`.
pub(super) fn child_velocity_for(
    layout: JointLayout,
    frames: &JointFrames,
    body1: &RigidBody,
    body2: &RigidBody,
    velocities: &[f64],
) -> (Vector3<f32>, Vector3<f32>) {
    let qd = |i: usize| velocities.get(i).copied().unwrap_or(0.0) as f32;
    let local = match layout {
        JointLayout::Fixed => Vector3::zeros(),
        JointLayout::Revolute | JointLayout::Prismatic => Vector3::new(qd(0), 0.0, 0.0),
        JointLayout::Ball => Vector3::new(qd(0), qd(1), qd(2)),
    };
    let world = frames.frame1.rotation * local;
    let anchor = frames.frame2.translation.vector.into();

    let (anchor_velocity, angular) = if layout.is_angular() {
        (body1.velocity_at_point(&anchor), body1.angvel() + world)
    } else {
        (body1.velocity_at_point(&anchor) + world, *body1.angvel())
    };
    let lever = body2.center_of_mass() - anchor;
    (anchor_velocity + angular.cross(&lever), angular)
}

/// World force and torque a joint effort exerts on the child body.
pub(super) fn effort_wrench(
    layout: JointLayout,
    frames: &JointFrames,
    efforts: &[f64],
) -> (Vector3<f32>, Vector3<f32>) {
    let e = |i: usize| efforts.get(i).copied().unwrap_or(0.0) as f32;
    let rotation = frames.frame1.rotation;
    match layout {
        JointLayout::Fixed => (Vector3::zeros(), Vector3::zeros()),
        JointLayout::Revolute => (Vector3::zeros(), rotation * Vector3::new(e(0), 0.0, 0.0)),
        JointLayout::Prismatic => (rotation * Vector3::new(e(0), 0.0, 0.0), Vector3::zeros()),
        JointLayout::Ball => (Vector3::zeros(), rotation * Vector3::new(e(0), e(1), e(2))),
    }
}

//! Handle-based rigid-body engine contract.
//!
//! The bridge never touches engine objects directly: it builds them from
//! declarative descriptions and addresses them through the slot-map handles
//! returned here. [`RapierEngine`] is the production backend.

use std::time::Duration;

use nalgebra::{Isometry3, Point3, Vector3};
use simlink_ecs::components::{AxisSpec, GeometryKind, JointKind, MassProperties, Surface};

use crate::config::{EngineKind, PhysicsConfig};
use crate::error::PhysicsError;
use crate::mesh::TriangleMesh;

#[cfg(test)]
pub(crate) mod fake;
mod rapier;

pub use rapier::{ColliderStrategy, RapierEngine};

/// Instantiate the backend selected by `config`.
pub fn create_engine(config: &PhysicsConfig) -> Result<Box<dyn PhysicsEngine>, PhysicsError> {
    match config.engine {
        EngineKind::Rapier => Ok(Box::new(RapierEngine::new(config))),
    }
}

slotmap::new_key_type! {
    /// Handle of an engine world.
    pub struct WorldId;
    /// Handle of an engine model.
    pub struct ModelId;
    /// Handle of an engine link (one rigid body).
    pub struct LinkId;
    /// Handle of an engine collision shape.
    pub struct ShapeId;
    /// Handle of an engine joint.
    pub struct JointId;
}

/// World construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldDescription {
    /// World name.
    pub name: String,
    /// Gravity vector.
    pub gravity: Vector3<f64>,
}

/// Model construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescription {
    /// Model name.
    pub name: String,
    /// Model pose in the world.
    pub pose: Isometry3<f64>,
    /// Whether every link of the model is immovable.
    pub is_static: bool,
}

/// Link construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDescription {
    /// Link name.
    pub name: String,
    /// Link pose relative to its model.
    pub pose: Isometry3<f64>,
    /// Mass properties in the link frame.
    pub inertial: MassProperties,
    /// Whether this is the model's canonical link.
    pub canonical: bool,
}

/// Primitive collision construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionDescription {
    /// Collision name.
    pub name: String,
    /// Collision pose relative to its link.
    pub pose: Isometry3<f64>,
    /// Geometry. Mesh geometries go through [`PhysicsEngine::attach_mesh_shape`].
    pub geometry: GeometryKind,
    /// Contact material.
    pub surface: Surface,
}

/// Mesh collision construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshShapeDescription {
    /// Collision name.
    pub name: String,
    /// Collision pose relative to its link.
    pub pose: Isometry3<f64>,
    /// Loaded mesh, unscaled.
    pub mesh: TriangleMesh,
    /// Per-axis scale applied to every vertex.
    pub scale: Vector3<f64>,
    /// Contact material.
    pub surface: Surface,
}

/// Joint construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct JointDescription {
    /// Joint name.
    pub name: String,
    /// Joint type.
    pub kind: JointKind,
    /// Parent link, or `None` when the joint attaches to the world.
    pub parent: Option<LinkId>,
    /// Child link.
    pub child: LinkId,
    /// Joint frame relative to the child link.
    pub pose: Isometry3<f64>,
    /// First axis, in the joint frame.
    pub axis: Option<AxisSpec>,
    /// Second axis, in the joint frame.
    pub axis2: Option<AxisSpec>,
    /// Screw thread pitch.
    pub thread_pitch: f64,
}

/// Kinematic state of a frame relative to the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameData {
    /// Pose.
    pub pose: Isometry3<f64>,
    /// Linear velocity of the frame origin.
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity.
    pub angular_velocity: Vector3<f64>,
    /// Linear acceleration of the frame origin.
    pub linear_acceleration: Vector3<f64>,
    /// Angular acceleration.
    pub angular_acceleration: Vector3<f64>,
}

impl FrameData {
    /// Frame at rest at `pose`.
    pub fn at_rest(pose: Isometry3<f64>) -> Self {
        Self {
            pose,
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            linear_acceleration: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
        }
    }
}

/// Depth, force and normal of a contact point, when the engine computes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtraContactData {
    /// Penetration depth, non-negative.
    pub depth: f64,
    /// Force on the first shape, in world coordinates.
    pub force: Vector3<f64>,
    /// Unit normal pointing from the first shape towards the second.
    pub normal: Vector3<f64>,
}

/// One contact point between two shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// First shape.
    pub collision1: ShapeId,
    /// Second shape.
    pub collision2: ShapeId,
    /// Contact point in world coordinates.
    pub point: Point3<f64>,
    /// Optional extended data.
    pub extra: Option<ExtraContactData>,
}

/// The free-floating base of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeGroup {
    /// Owning model.
    pub model: ModelId,
    /// Link whose pose and velocity define the group's.
    pub root: LinkId,
}

/// Input of a single simulation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInput {
    /// Duration to integrate.
    pub dt: Duration,
}

/// A handle-based rigid-body engine.
///
/// Setters addressing an unknown handle fail with
/// [`PhysicsError::InvalidHandle`]; getters return `None`.
pub trait PhysicsEngine {
    /// Backend name, for diagnostics.
    fn name(&self) -> &str;

    /// Create a world.
    fn construct_world(&mut self, desc: &WorldDescription) -> Result<WorldId, PhysicsError>;

    /// Create a model inside `world`.
    fn construct_model(
        &mut self,
        world: WorldId,
        desc: &ModelDescription,
    ) -> Result<ModelId, PhysicsError>;

    /// Create a link inside `model`.
    fn construct_link(&mut self, model: ModelId, desc: &LinkDescription)
        -> Result<LinkId, PhysicsError>;

    /// Attach a primitive collision shape to `link`.
    fn construct_collision(
        &mut self,
        link: LinkId,
        desc: &CollisionDescription,
    ) -> Result<ShapeId, PhysicsError>;

    /// Attach a mesh collision shape to `link`.
    fn attach_mesh_shape(
        &mut self,
        link: LinkId,
        desc: &MeshShapeDescription,
    ) -> Result<ShapeId, PhysicsError>;

    /// Create a joint inside `model`.
    fn construct_joint(
        &mut self,
        model: ModelId,
        desc: &JointDescription,
    ) -> Result<JointId, PhysicsError>;

    /// Destroy a model with all of its links, shapes and joints.
    ///
    /// Returns `false` if the model was unknown.
    fn remove_model(&mut self, model: ModelId) -> bool;

    /// World name.
    fn world_name(&self, world: WorldId) -> Option<String>;

    /// Model name.
    fn model_name(&self, model: ModelId) -> Option<String>;

    /// Current model pose in the world.
    fn model_pose(&self, model: ModelId) -> Option<Isometry3<f64>>;

    /// Link name.
    fn link_name(&self, link: LinkId) -> Option<String>;

    /// Shape name.
    fn shape_name(&self, shape: ShapeId) -> Option<String>;

    /// Shape pose relative to its link.
    fn shape_pose(&self, shape: ShapeId) -> Option<Isometry3<f64>>;

    /// Joint name.
    fn joint_name(&self, joint: JointId) -> Option<String>;

    /// Current number of degrees of freedom of a joint.
    fn joint_dof(&self, joint: JointId) -> Option<usize>;

    /// Joint coordinate of one DOF.
    fn joint_position(&self, joint: JointId, dof: usize) -> Option<f64>;

    /// Move the joint so that one DOF takes `value`.
    fn set_joint_position(&mut self, joint: JointId, dof: usize, value: f64)
        -> Result<(), PhysicsError>;

    /// Joint velocity of one DOF.
    fn joint_velocity(&self, joint: JointId, dof: usize) -> Option<f64>;

    /// Instantly change the velocity of one DOF.
    fn set_joint_velocity(&mut self, joint: JointId, dof: usize, value: f64)
        -> Result<(), PhysicsError>;

    /// Effort applied on one DOF during the next step.
    fn set_joint_force(&mut self, joint: JointId, dof: usize, value: f64)
        -> Result<(), PhysicsError>;

    /// Velocity the joint tracks during the next step.
    fn set_joint_velocity_command(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError>;

    /// Force in world coordinates applied at the link origin during the next step.
    fn add_link_external_force(&mut self, link: LinkId, force: Vector3<f64>)
        -> Result<(), PhysicsError>;

    /// Torque in world coordinates applied to the link during the next step.
    fn add_link_external_torque(
        &mut self,
        link: LinkId,
        torque: Vector3<f64>,
    ) -> Result<(), PhysicsError>;

    /// Live state of the link frame relative to the world.
    fn link_frame_data(&self, link: LinkId) -> Option<FrameData>;

    /// The free-floating base of a model, if it has one.
    fn find_free_group(&self, model: ModelId) -> Option<FreeGroup>;

    /// Teleport the free group so that its root link lands at `pose`.
    fn set_free_group_world_pose(
        &mut self,
        group: &FreeGroup,
        pose: Isometry3<f64>,
    ) -> Result<(), PhysicsError>;

    /// Set the linear velocity of the free group's root link origin.
    fn set_free_group_world_linear_velocity(
        &mut self,
        group: &FreeGroup,
        velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError>;

    /// Set the angular velocity of the free group.
    fn set_free_group_world_angular_velocity(
        &mut self,
        group: &FreeGroup,
        velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError>;

    /// Advance a world.
    fn step(&mut self, world: WorldId, input: &StepInput) -> Result<(), PhysicsError>;

    /// Contacts found by the last step of `world`.
    fn contacts_from_last_step(&self, world: WorldId) -> Vec<Contact>;
}

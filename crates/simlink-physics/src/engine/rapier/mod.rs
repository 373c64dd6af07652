//! Rapier3d backend.
//!
//! Each world owns a full Rapier pipeline. A model is a group of rigid
//! bodies, one per link; collisions are zero-density colliders on the link
//! body so mass comes from the link's inertial alone; joints are impulse
//! joints between link bodies (or the world's fixed ground body).

mod colliders;
mod joints;
mod world;

use nalgebra::{Isometry3, Point3, Vector3};
use parry3d::mass_properties::MassProperties;
use rapier3d::dynamics::{ImpulseJointHandle, RigidBody, RigidBodyBuilder, RigidBodyHandle};
use rapier3d::geometry::{ColliderBuilder, ColliderHandle, SharedShape};
use slotmap::SlotMap;
use simlink_ecs::components::Surface;

pub use colliders::ColliderStrategy;

use self::colliders::{mesh_to_collider, primitive_shape};
use self::joints::{
    build_joint, child_pose_for, child_velocity_for, coordinates, effort_wrench, velocities,
    JointFrames, JointLayout,
};
use self::world::PhysicsWorld;
use crate::config::PhysicsConfig;
use crate::convert::{
    isometry_from_engine, isometry_to_engine, point_from_engine, vector_from_engine,
    vector_to_engine,
};
use crate::engine::{
    CollisionDescription, Contact, ExtraContactData, FrameData, FreeGroup, JointDescription,
    JointId, LinkDescription, LinkId, MeshShapeDescription, ModelDescription, ModelId,
    PhysicsEngine, ShapeId, StepInput, WorldDescription, WorldId,
};
use crate::error::PhysicsError;

struct ModelData {
    name: String,
    world: WorldId,
    /// Pose at construction, used until a canonical link exists.
    pose: Isometry3<f64>,
    is_static: bool,
    /// Set once a joint attaches one of the links to the ground.
    grounded: bool,
    canonical: Option<LinkId>,
    links: Vec<LinkId>,
    joints: Vec<JointId>,
}

struct LinkData {
    name: String,
    world: WorldId,
    body: RigidBodyHandle,
    pose_in_model: Isometry3<f64>,
    shapes: Vec<ShapeId>,
    linear_acceleration: Vector3<f64>,
    angular_acceleration: Vector3<f64>,
}

struct ShapeData {
    name: String,
    pose: Isometry3<f64>,
}

struct JointData {
    name: String,
    world: WorldId,
    layout: JointLayout,
    handle: ImpulseJointHandle,
    parent_body: RigidBodyHandle,
    child_body: RigidBodyHandle,
    /// Efforts applied during the next step.
    efforts: Vec<f64>,
    /// Velocity targets tracked during the next step.
    velocity_commands: Vec<Option<f64>>,
}

/// Physics engine backed by Rapier3d.
pub struct RapierEngine {
    strategy: ColliderStrategy,
    motor_max_force: f32,
    motor_damping: f32,
    contact_prediction: f32,

    worlds: SlotMap<WorldId, PhysicsWorld>,
    models: SlotMap<ModelId, ModelData>,
    links: SlotMap<LinkId, LinkData>,
    shapes: SlotMap<ShapeId, ShapeData>,
    joints: SlotMap<JointId, JointData>,
}

impl Default for RapierEngine {
    fn default() -> Self {
        Self::new(&PhysicsConfig::default())
    }
}

impl RapierEngine {
    /// Create an engine with no worlds.
    pub fn new(config: &PhysicsConfig) -> Self {
        Self {
            strategy: config.mesh_strategy,
            motor_max_force: config.motor_max_force as f32,
            motor_damping: config.motor_damping as f32,
            contact_prediction: config.contact_prediction as f32,
            worlds: SlotMap::with_key(),
            models: SlotMap::with_key(),
            links: SlotMap::with_key(),
            shapes: SlotMap::with_key(),
            joints: SlotMap::with_key(),
        }
    }

    fn link_body(&self, link: LinkId) -> Option<&RigidBody> {
        let data = self.links.get(link)?;
        self.worlds.get(data.world)?.bodies.get(data.body)
    }

    fn joint_parts(&self, joint: JointId) -> Option<(&JointData, &PhysicsWorld)> {
        let data = self.joints.get(joint)?;
        Some((data, self.worlds.get(data.world)?))
    }

    fn joint_state(&self, joint: JointId) -> Option<(Vec<f64>, Vec<f64>)> {
        let (data, world) = self.joint_parts(joint)?;
        let rapier_joint = world.impulse_joints.get(data.handle)?;
        let body1 = world.bodies.get(data.parent_body)?;
        let body2 = world.bodies.get(data.child_body)?;
        let frames = JointFrames::new(&rapier_joint.data, body1, body2);
        Some((
            coordinates(data.layout, &frames),
            velocities(data.layout, &frames, body1, body2),
        ))
    }

    fn insert_collider(
        &mut self,
        link: LinkId,
        name: &str,
        shape: SharedShape,
        pose: Isometry3<f64>,
        offset: Isometry3<f32>,
        surface: &Surface,
    ) -> Result<ShapeId, PhysicsError> {
        let link_data = self
            .links
            .get(link)
            .ok_or_else(|| PhysicsError::MissingParent {
                kind: "link",
                name: name.to_string(),
            })?;
        let (world_id, body) = (link_data.world, link_data.body);
        let world = self
            .worlds
            .get_mut(world_id)
            .ok_or(PhysicsError::InvalidHandle("world"))?;

        let collider = ColliderBuilder::new(shape)
            .position(isometry_to_engine(&pose) * offset)
            .density(0.0)
            .friction(surface.friction as f32)
            .restitution(surface.restitution as f32)
            .build();
        let handle = world
            .colliders
            .insert_with_parent(collider, body, &mut world.bodies);

        let shape_id = self.shapes.insert(ShapeData {
            name: name.to_string(),
            pose,
        });
        world.collider_to_shape.insert(handle, shape_id);
        if let Some(link_data) = self.links.get_mut(link) {
            link_data.shapes.push(shape_id);
        }
        Ok(shape_id)
    }

    fn free_group_bodies(&self, group: &FreeGroup) -> Option<(WorldId, Vec<RigidBodyHandle>)> {
        let model = self.models.get(group.model)?;
        let bodies = model
            .links
            .iter()
            .filter_map(|l| self.links.get(*l).map(|d| d.body))
            .collect();
        Some((model.world, bodies))
    }

    fn root_origin_velocity(
        &self,
        group: &FreeGroup,
    ) -> Option<(Point3<f32>, Vector3<f32>, Vector3<f32>)> {
        let body = self.link_body(group.root)?;
        let origin: Point3<f32> = body.position().translation.vector.into();
        Some((origin, body.velocity_at_point(&origin), *body.angvel()))
    }

    /// The joint's child body and every body reached from it through joints
    /// of the same world, never crossing back into the joint's parent.
    fn bodies_below(&self, joint: &JointData) -> Vec<RigidBodyHandle> {
        let mut found = vec![joint.child_body];
        let mut next = 0;
        while let Some(&body) = found.get(next) {
            next += 1;
            for other in self.joints.values() {
                if other.world == joint.world
                    && other.parent_body == body
                    && other.child_body != joint.parent_body
                    && !found.contains(&other.child_body)
                {
                    found.push(other.child_body);
                }
            }
        }
        found
    }

    /// Give every body of the group the rigid motion (`linear` at `origin`, `angular`).
    fn set_group_motion(
        &mut self,
        group: &FreeGroup,
        origin: Point3<f32>,
        linear: Vector3<f32>,
        angular: Vector3<f32>,
    ) -> Result<(), PhysicsError> {
        let (world_id, bodies) = self
            .free_group_bodies(group)
            .ok_or(PhysicsError::InvalidHandle("model"))?;
        let world = self
            .worlds
            .get_mut(world_id)
            .ok_or(PhysicsError::InvalidHandle("world"))?;
        for handle in bodies {
            if let Some(body) = world.bodies.get_mut(handle) {
                let lever = body.center_of_mass() - origin;
                body.set_linvel(linear + angular.cross(&lever), true);
                body.set_angvel(angular, true);
            }
        }
        Ok(())
    }

    fn apply_joint_commands(&mut self, world_id: WorldId) {
        let max_force = self.motor_max_force;
        let damping = self.motor_damping;
        let Some(world) = self.worlds.get_mut(world_id) else {
            return;
        };

        for data in self.joints.values().filter(|j| j.world == world_id) {
            let Some(rapier_joint) = world.impulse_joints.get(data.handle) else {
                continue;
            };
            let (Some(body1), Some(body2)) = (
                world.bodies.get(data.parent_body),
                world.bodies.get(data.child_body),
            ) else {
                continue;
            };
            let frames = JointFrames::new(&rapier_joint.data, body1, body2);

            let (force, torque) = effort_wrench(data.layout, &frames, &data.efforts);

            let commanded = data.velocity_commands.iter().any(Option::is_some);
            let target_velocity = commanded.then(|| {
                let mut qd = velocities(data.layout, &frames, body1, body2);
                for (current, command) in qd.iter_mut().zip(&data.velocity_commands) {
                    if let Some(v) = command {
                        *current = *v;
                    }
                }
                child_velocity_for(data.layout, &frames, body1, body2, &qd)
            });

            if let Some(body) = world.bodies.get_mut(data.child_body) {
                body.add_force(force, true);
                body.add_torque(torque, true);
                if let Some((linvel, angvel)) = target_velocity {
                    body.set_linvel(linvel, true);
                    body.set_angvel(angvel, true);
                }
            }
            if let Some(body) = world.bodies.get_mut(data.parent_body) {
                body.add_force(-force, true);
                body.add_torque(-torque, true);
            }

            if let Some(rapier_joint) = world.impulse_joints.get_mut(data.handle, true) {
                for (dof, command) in data.velocity_commands.iter().enumerate() {
                    if let (Some(v), Some(axis)) = (command, data.layout.axis(dof)) {
                        rapier_joint
                            .data
                            .set_motor_velocity(axis, *v as f32, damping)
                            .set_motor_max_force(axis, max_force);
                    }
                }
            }
        }
    }

    fn clear_joint_commands(&mut self, world_id: WorldId) {
        let Some(world) = self.worlds.get_mut(world_id) else {
            return;
        };
        for data in self.joints.values_mut().filter(|j| j.world == world_id) {
            if let Some(rapier_joint) = world.impulse_joints.get_mut(data.handle, false) {
                for (dof, command) in data.velocity_commands.iter().enumerate() {
                    if let (Some(_), Some(axis)) = (command, data.layout.axis(dof)) {
                        rapier_joint.data.set_motor_velocity(axis, 0.0, 0.0);
                    }
                }
            }
            data.efforts.iter_mut().for_each(|e| *e = 0.0);
            data.velocity_commands.iter_mut().for_each(|c| *c = None);
        }
    }

    fn origin_velocities(&self, world_id: WorldId) -> Vec<(LinkId, Vector3<f64>, Vector3<f64>)> {
        let Some(world) = self.worlds.get(world_id) else {
            return Vec::new();
        };
        self.links
            .iter()
            .filter(|(_, l)| l.world == world_id)
            .filter_map(|(id, l)| {
                let body = world.bodies.get(l.body)?;
                let (linear, angular) = origin_velocity(body);
                Some((id, linear, angular))
            })
            .collect()
    }
}

fn origin_velocity(body: &RigidBody) -> (Vector3<f64>, Vector3<f64>) {
    let origin: Point3<f32> = body.position().translation.vector.into();
    (
        vector_from_engine(&body.velocity_at_point(&origin)),
        vector_from_engine(body.angvel()),
    )
}

impl PhysicsEngine for RapierEngine {
    fn name(&self) -> &str {
        "rapier"
    }

    fn construct_world(&mut self, desc: &WorldDescription) -> Result<WorldId, PhysicsError> {
        let world = PhysicsWorld::new(desc.name.clone(), vector_to_engine(&desc.gravity));
        Ok(self.worlds.insert(world))
    }

    fn construct_model(
        &mut self,
        world: WorldId,
        desc: &ModelDescription,
    ) -> Result<ModelId, PhysicsError> {
        if !self.worlds.contains_key(world) {
            return Err(PhysicsError::MissingParent {
                kind: "world",
                name: desc.name.clone(),
            });
        }
        Ok(self.models.insert(ModelData {
            name: desc.name.clone(),
            world,
            pose: desc.pose,
            is_static: desc.is_static,
            grounded: false,
            canonical: None,
            links: Vec::new(),
            joints: Vec::new(),
        }))
    }

    fn construct_link(
        &mut self,
        model: ModelId,
        desc: &LinkDescription,
    ) -> Result<LinkId, PhysicsError> {
        let model_data = self
            .models
            .get(model)
            .ok_or_else(|| PhysicsError::MissingParent {
                kind: "model",
                name: desc.name.clone(),
            })?;
        let world_id = model_data.world;
        let is_static = model_data.is_static;
        let model_pose = self
            .model_pose(model)
            .ok_or(PhysicsError::InvalidHandle("model"))?;
        let world = self
            .worlds
            .get_mut(world_id)
            .ok_or(PhysicsError::InvalidHandle("world"))?;

        let position = isometry_to_engine(&(model_pose * desc.pose));
        let body = if is_static {
            RigidBodyBuilder::fixed().position(position).build()
        } else {
            let inertial = &desc.inertial;
            RigidBodyBuilder::dynamic()
                .position(position)
                .additional_mass_properties(MassProperties::new(
                    inertial.center_of_mass.cast::<f32>().into(),
                    inertial.mass as f32,
                    inertial.principal_moments.cast::<f32>(),
                ))
                .can_sleep(false)
                .build()
        };
        let body = world.bodies.insert(body);

        let link = self.links.insert(LinkData {
            name: desc.name.clone(),
            world: world_id,
            body,
            pose_in_model: desc.pose,
            shapes: Vec::new(),
            linear_acceleration: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
        });
        if let Some(model_data) = self.models.get_mut(model) {
            model_data.links.push(link);
            if desc.canonical || model_data.canonical.is_none() {
                model_data.canonical = Some(link);
            }
        }
        Ok(link)
    }

    fn construct_collision(
        &mut self,
        link: LinkId,
        desc: &CollisionDescription,
    ) -> Result<ShapeId, PhysicsError> {
        let (shape, offset) = primitive_shape(&desc.geometry, &desc.name)?;
        self.insert_collider(link, &desc.name, shape, desc.pose, offset, &desc.surface)
    }

    fn attach_mesh_shape(
        &mut self,
        link: LinkId,
        desc: &MeshShapeDescription,
    ) -> Result<ShapeId, PhysicsError> {
        let shape = mesh_to_collider(&desc.mesh, &desc.scale, self.strategy, &desc.name)?;
        self.insert_collider(
            link,
            &desc.name,
            shape,
            desc.pose,
            Isometry3::identity(),
            &desc.surface,
        )
    }

    fn construct_joint(
        &mut self,
        model: ModelId,
        desc: &JointDescription,
    ) -> Result<JointId, PhysicsError> {
        let world_id = self
            .models
            .get(model)
            .map(|m| m.world)
            .ok_or_else(|| PhysicsError::MissingParent {
                kind: "model",
                name: desc.name.clone(),
            })?;
        let child_body = self
            .links
            .get(desc.child)
            .map(|l| l.body)
            .ok_or_else(|| PhysicsError::MissingLink(format!("child of {}", desc.name)))?;
        let parent_body = match desc.parent {
            Some(parent) => Some(
                self.links
                    .get(parent)
                    .map(|l| l.body)
                    .ok_or_else(|| PhysicsError::MissingLink(format!("parent of {}", desc.name)))?,
            ),
            None => None,
        };

        let max_force = self.motor_max_force;
        let world = self
            .worlds
            .get_mut(world_id)
            .ok_or(PhysicsError::InvalidHandle("world"))?;
        let parent_body = match parent_body {
            Some(body) => body,
            None => world.ground(),
        };
        let parent_pose = *world
            .bodies
            .get(parent_body)
            .ok_or(PhysicsError::InvalidHandle("link"))?
            .position();
        let child_pose = *world
            .bodies
            .get(child_body)
            .ok_or(PhysicsError::InvalidHandle("link"))?
            .position();

        let (rapier_joint, layout) = build_joint(desc, &parent_pose, &child_pose, max_force)?;
        let handle = world
            .impulse_joints
            .insert(parent_body, child_body, rapier_joint, true);

        let dof = layout.dof();
        let joint = self.joints.insert(JointData {
            name: desc.name.clone(),
            world: world_id,
            layout,
            handle,
            parent_body,
            child_body,
            efforts: vec![0.0; dof],
            velocity_commands: vec![None; dof],
        });
        if let Some(model_data) = self.models.get_mut(model) {
            model_data.joints.push(joint);
            model_data.grounded |= desc.parent.is_none();
        }
        Ok(joint)
    }

    fn remove_model(&mut self, model: ModelId) -> bool {
        let Some(model_data) = self.models.remove(model) else {
            return false;
        };
        for joint in &model_data.joints {
            if let Some(data) = self.joints.remove(*joint) {
                if let Some(world) = self.worlds.get_mut(data.world) {
                    world.impulse_joints.remove(data.handle, true);
                }
            }
        }
        for link in &model_data.links {
            let Some(data) = self.links.remove(*link) else {
                continue;
            };
            for shape in &data.shapes {
                self.shapes.remove(*shape);
            }
            if let Some(world) = self.worlds.get_mut(data.world) {
                let colliders: Vec<ColliderHandle> = world
                    .bodies
                    .get(data.body)
                    .map(|b| b.colliders().to_vec())
                    .unwrap_or_default();
                for collider in colliders {
                    world.collider_to_shape.remove(&collider);
                }
                world.remove_body(data.body);
            }
        }
        true
    }

    fn world_name(&self, world: WorldId) -> Option<String> {
        self.worlds.get(world).map(|w| w.name.clone())
    }

    fn model_name(&self, model: ModelId) -> Option<String> {
        self.models.get(model).map(|m| m.name.clone())
    }

    fn model_pose(&self, model: ModelId) -> Option<Isometry3<f64>> {
        let data = self.models.get(model)?;
        let Some(canonical) = data.canonical else {
            return Some(data.pose);
        };
        // The model frame keeps its initial offset to the canonical link.
        let link = self.links.get(canonical)?;
        let body = self.link_body(canonical)?;
        Some(isometry_from_engine(body.position()) * link.pose_in_model.inverse())
    }

    fn link_name(&self, link: LinkId) -> Option<String> {
        self.links.get(link).map(|l| l.name.clone())
    }

    fn shape_name(&self, shape: ShapeId) -> Option<String> {
        self.shapes.get(shape).map(|s| s.name.clone())
    }

    fn shape_pose(&self, shape: ShapeId) -> Option<Isometry3<f64>> {
        self.shapes.get(shape).map(|s| s.pose)
    }

    fn joint_name(&self, joint: JointId) -> Option<String> {
        self.joints.get(joint).map(|j| j.name.clone())
    }

    fn joint_dof(&self, joint: JointId) -> Option<usize> {
        self.joints.get(joint).map(|j| j.layout.dof())
    }

    fn joint_position(&self, joint: JointId, dof: usize) -> Option<f64> {
        self.joint_state(joint)?.0.get(dof).copied()
    }

    fn set_joint_position(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        let (mut positions, _) = self
            .joint_state(joint)
            .ok_or(PhysicsError::InvalidHandle("joint"))?;
        let slot = positions
            .get_mut(dof)
            .ok_or(PhysicsError::InvalidHandle("joint DOF"))?;
        *slot = value;

        let (data, world) = self
            .joint_parts(joint)
            .ok_or(PhysicsError::InvalidHandle("joint"))?;
        let rapier_joint = world
            .impulse_joints
            .get(data.handle)
            .ok_or(PhysicsError::InvalidHandle("joint"))?;
        let (Some(body1), Some(body2)) = (
            world.bodies.get(data.parent_body),
            world.bodies.get(data.child_body),
        ) else {
            return Err(PhysicsError::InvalidHandle("link"));
        };
        let frames = JointFrames::new(&rapier_joint.data, body1, body2);
        let target = child_pose_for(data.layout, &rapier_joint.data, &frames, &positions);
        // Everything below the joint follows the child rigidly.
        let delta = target * body2.position().inverse();
        let (world_id, moved) = (data.world, self.bodies_below(data));

        let world = self
            .worlds
            .get_mut(world_id)
            .ok_or(PhysicsError::InvalidHandle("world"))?;
        for handle in moved {
            if let Some(body) = world.bodies.get_mut(handle) {
                let pose = delta * body.position();
                body.set_position(pose, true);
            }
        }
        Ok(())
    }

    fn joint_velocity(&self, joint: JointId, dof: usize) -> Option<f64> {
        self.joint_state(joint)?.1.get(dof).copied()
    }

    fn set_joint_velocity(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        let (_, mut qd) = self
            .joint_state(joint)
            .ok_or(PhysicsError::InvalidHandle("joint"))?;
        let slot = qd
            .get_mut(dof)
            .ok_or(PhysicsError::InvalidHandle("joint DOF"))?;
        *slot = value;

        let (data, world) = self
            .joint_parts(joint)
            .ok_or(PhysicsError::InvalidHandle("joint"))?;
        let rapier_joint = world
            .impulse_joints
            .get(data.handle)
            .ok_or(PhysicsError::InvalidHandle("joint"))?;
        let (Some(body1), Some(body2)) = (
            world.bodies.get(data.parent_body),
            world.bodies.get(data.child_body),
        ) else {
            return Err(PhysicsError::InvalidHandle("link"));
        };
        let frames = JointFrames::new(&rapier_joint.data, body1, body2);
        let (linvel, angvel) = child_velocity_for(data.layout, &frames, body1, body2, &qd);
        // The change of the child's twist, taken at its center of mass, is
        // added to every body below the joint.
        let origin = *body2.center_of_mass();
        let d_linear = linvel - body2.linvel();
        let d_angular = angvel - body2.angvel();
        let (world_id, moved) = (data.world, self.bodies_below(data));

        let world = self
            .worlds
            .get_mut(world_id)
            .ok_or(PhysicsError::InvalidHandle("world"))?;
        for handle in moved {
            if let Some(body) = world.bodies.get_mut(handle) {
                let lever = body.center_of_mass() - origin;
                let linear = body.linvel() + d_linear + d_angular.cross(&lever);
                let angular = body.angvel() + d_angular;
                body.set_linvel(linear, true);
                body.set_angvel(angular, true);
            }
        }
        Ok(())
    }

    fn set_joint_force(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        let slot = self
            .joints
            .get_mut(joint)
            .ok_or(PhysicsError::InvalidHandle("joint"))?
            .efforts
            .get_mut(dof)
            .ok_or(PhysicsError::InvalidHandle("joint DOF"))?;
        *slot = value;
        Ok(())
    }

    fn set_joint_velocity_command(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        let slot = self
            .joints
            .get_mut(joint)
            .ok_or(PhysicsError::InvalidHandle("joint"))?
            .velocity_commands
            .get_mut(dof)
            .ok_or(PhysicsError::InvalidHandle("joint DOF"))?;
        *slot = Some(value);
        Ok(())
    }

    fn add_link_external_force(
        &mut self,
        link: LinkId,
        force: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        let data = self
            .links
            .get(link)
            .ok_or(PhysicsError::InvalidHandle("link"))?;
        let body = self
            .worlds
            .get_mut(data.world)
            .and_then(|w| w.bodies.get_mut(data.body))
            .ok_or(PhysicsError::InvalidHandle("link"))?;
        let origin: Point3<f32> = body.position().translation.vector.into();
        body.add_force_at_point(vector_to_engine(&force), origin, true);
        Ok(())
    }

    fn add_link_external_torque(
        &mut self,
        link: LinkId,
        torque: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        let data = self
            .links
            .get(link)
            .ok_or(PhysicsError::InvalidHandle("link"))?;
        let body = self
            .worlds
            .get_mut(data.world)
            .and_then(|w| w.bodies.get_mut(data.body))
            .ok_or(PhysicsError::InvalidHandle("link"))?;
        body.add_torque(vector_to_engine(&torque), true);
        Ok(())
    }

    fn link_frame_data(&self, link: LinkId) -> Option<FrameData> {
        let data = self.links.get(link)?;
        let body = self.link_body(link)?;
        let (linear_velocity, angular_velocity) = origin_velocity(body);
        Some(FrameData {
            pose: isometry_from_engine(body.position()),
            linear_velocity,
            angular_velocity,
            linear_acceleration: data.linear_acceleration,
            angular_acceleration: data.angular_acceleration,
        })
    }

    fn find_free_group(&self, model: ModelId) -> Option<FreeGroup> {
        let data = self.models.get(model)?;
        if data.is_static || data.grounded {
            return None;
        }
        let root = data.canonical.or_else(|| data.links.first().copied())?;
        Some(FreeGroup { model, root })
    }

    fn set_free_group_world_pose(
        &mut self,
        group: &FreeGroup,
        pose: Isometry3<f64>,
    ) -> Result<(), PhysicsError> {
        let root_pose = *self
            .link_body(group.root)
            .ok_or(PhysicsError::InvalidHandle("link"))?
            .position();
        let delta = isometry_to_engine(&pose) * root_pose.inverse();

        let (world_id, bodies) = self
            .free_group_bodies(group)
            .ok_or(PhysicsError::InvalidHandle("model"))?;
        let world = self
            .worlds
            .get_mut(world_id)
            .ok_or(PhysicsError::InvalidHandle("world"))?;
        for handle in bodies {
            if let Some(body) = world.bodies.get_mut(handle) {
                let moved = delta * body.position();
                body.set_position(moved, true);
            }
        }
        Ok(())
    }

    fn set_free_group_world_linear_velocity(
        &mut self,
        group: &FreeGroup,
        velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        let (origin, _, angular) = self
            .root_origin_velocity(group)
            .ok_or(PhysicsError::InvalidHandle("link"))?;
        self.set_group_motion(group, origin, vector_to_engine(&velocity), angular)
    }

    fn set_free_group_world_angular_velocity(
        &mut self,
        group: &FreeGroup,
        velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        let (origin, linear, _) = self
            .root_origin_velocity(group)
            .ok_or(PhysicsError::InvalidHandle("link"))?;
        self.set_group_motion(group, origin, linear, vector_to_engine(&velocity))
    }

    fn step(&mut self, world: WorldId, input: &StepInput) -> Result<(), PhysicsError> {
        if !self.worlds.contains_key(world) {
            return Err(PhysicsError::InvalidHandle("world"));
        }
        let dt = input.dt.as_secs_f64();

        self.apply_joint_commands(world);
        let before = self.origin_velocities(world);

        if let Some(physics) = self.worlds.get_mut(world) {
            physics.step(dt as f32);
            for (_, body) in physics.bodies.iter_mut() {
                body.reset_forces(false);
                body.reset_torques(false);
            }
        }

        let after = self.origin_velocities(world);
        for ((link, v0, w0), (_, v1, w1)) in before.into_iter().zip(after) {
            if let Some(data) = self.links.get_mut(link) {
                if dt > 0.0 {
                    data.linear_acceleration = (v1 - v0) / dt;
                    data.angular_acceleration = (w1 - w0) / dt;
                }
            }
        }

        self.clear_joint_commands(world);
        Ok(())
    }

    fn contacts_from_last_step(&self, world: WorldId) -> Vec<Contact> {
        let Some(physics) = self.worlds.get(world) else {
            return Vec::new();
        };
        let dt = physics.last_dt;
        let mut contacts = Vec::new();

        for pair in physics.contact_pairs() {
            let (Some(&shape1), Some(&shape2)) = (
                physics.collider_to_shape.get(&pair.collider1),
                physics.collider_to_shape.get(&pair.collider2),
            ) else {
                continue;
            };
            let Some(collider1) = physics.colliders.get(pair.collider1) else {
                continue;
            };

            for manifold in &pair.manifolds {
                let frame1 = manifold
                    .subshape_pos1
                    .map_or(*collider1.position(), |sub| collider1.position() * sub);
                let normal = vector_from_engine(&manifold.data.normal);

                for point in &manifold.points {
                    if point.dist > self.contact_prediction {
                        continue;
                    }
                    let force = if dt > 0.0 {
                        -normal * f64::from(point.data.impulse / dt)
                    } else {
                        Vector3::zeros()
                    };
                    contacts.push(Contact {
                        collision1: shape1,
                        collision2: shape2,
                        point: point_from_engine(&(frame1 * point.local_p1)),
                        extra: Some(ExtraContactData {
                            depth: f64::from((-point.dist).max(0.0)),
                            force,
                            normal,
                        }),
                    });
                }
            }
        }
        contacts
    }
}

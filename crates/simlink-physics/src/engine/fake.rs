//! Recording in-memory engine for bridge tests.
//!
//! No dynamics: links stay where they are put unless a test moves them
//! through [`FakeState`]. Every mutating call is appended to
//! [`FakeState::calls`] so tests can assert on what the bridge asked for.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use nalgebra::{Isometry3, Vector3};
use slotmap::SlotMap;
use simlink_ecs::components::JointKind;

use super::{
    CollisionDescription, Contact, FrameData, FreeGroup, JointDescription, JointId,
    LinkDescription, LinkId, MeshShapeDescription, ModelDescription, ModelId, PhysicsEngine,
    ShapeId, StepInput, WorldDescription, WorldId,
};
use crate::error::PhysicsError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    JointForce(JointId, usize, f64),
    JointVelocityCommand(JointId, usize, f64),
    JointPosition(JointId, usize, f64),
    JointVelocity(JointId, usize, f64),
    LinkForce(LinkId, Vector3<f64>),
    LinkTorque(LinkId, Vector3<f64>),
    FreeGroupPose(ModelId, Isometry3<f64>),
    FreeGroupLinearVelocity(ModelId, Vector3<f64>),
    FreeGroupAngularVelocity(ModelId, Vector3<f64>),
    Step(WorldId, Duration),
    RemoveModel(ModelId),
}

pub(crate) struct FakeWorld {
    pub(crate) name: String,
}

pub(crate) struct FakeModel {
    pub(crate) name: String,
    pub(crate) pose: Isometry3<f64>,
    pub(crate) is_static: bool,
    pub(crate) grounded: bool,
    pub(crate) canonical: Option<LinkId>,
    pub(crate) links: Vec<LinkId>,
    pub(crate) joints: Vec<JointId>,
}

pub(crate) struct FakeLink {
    pub(crate) name: String,
    pub(crate) pose_in_model: Isometry3<f64>,
    pub(crate) frame: FrameData,
    pub(crate) shapes: Vec<ShapeId>,
}

pub(crate) struct FakeShape {
    pub(crate) name: String,
    pub(crate) pose: Isometry3<f64>,
    pub(crate) mesh: bool,
}

pub(crate) struct FakeJoint {
    pub(crate) name: String,
    pub(crate) positions: Vec<f64>,
    pub(crate) velocities: Vec<f64>,
    pub(crate) velocity_commands: Vec<Option<f64>>,
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub(crate) worlds: SlotMap<WorldId, FakeWorld>,
    pub(crate) models: SlotMap<ModelId, FakeModel>,
    pub(crate) links: SlotMap<LinkId, FakeLink>,
    pub(crate) shapes: SlotMap<ShapeId, FakeShape>,
    pub(crate) joints: SlotMap<JointId, FakeJoint>,
    pub(crate) calls: Vec<Call>,
    /// Returned by every `contacts_from_last_step` call.
    pub(crate) contacts: Vec<Contact>,
}

impl FakeState {
    pub(crate) fn steps(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Step(..)))
            .count()
    }

    pub(crate) fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub(crate) fn link_named(&self, name: &str) -> Option<LinkId> {
        self.links
            .iter()
            .find(|(_, l)| l.name == name)
            .map(|(id, _)| id)
    }

    pub(crate) fn shape_named(&self, name: &str) -> Option<ShapeId> {
        self.shapes
            .iter()
            .find(|(_, s)| s.name == name)
            .map(|(id, _)| id)
    }

    pub(crate) fn joint_named(&self, name: &str) -> Option<JointId> {
        self.joints
            .iter()
            .find(|(_, j)| j.name == name)
            .map(|(id, _)| id)
    }
}

/// Engine sharing its state with the test that created it.
pub(crate) struct FakeEngine {
    state: Rc<RefCell<FakeState>>,
}

impl FakeEngine {
    pub(crate) fn new() -> (Self, Rc<RefCell<FakeState>>) {
        let state = Rc::new(RefCell::new(FakeState::default()));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn with_joint<R>(
        &self,
        joint: JointId,
        dof: usize,
        f: impl FnOnce(&mut FakeJoint) -> R,
    ) -> Result<R, PhysicsError> {
        let mut state = self.state.borrow_mut();
        let data = state
            .joints
            .get_mut(joint)
            .ok_or(PhysicsError::InvalidHandle("joint"))?;
        if dof >= data.positions.len() {
            return Err(PhysicsError::InvalidHandle("joint DOF"));
        }
        Ok(f(data))
    }
}

impl PhysicsEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn construct_world(&mut self, desc: &WorldDescription) -> Result<WorldId, PhysicsError> {
        Ok(self.state.borrow_mut().worlds.insert(FakeWorld {
            name: desc.name.clone(),
        }))
    }

    fn construct_model(
        &mut self,
        world: WorldId,
        desc: &ModelDescription,
    ) -> Result<ModelId, PhysicsError> {
        let mut state = self.state.borrow_mut();
        if !state.worlds.contains_key(world) {
            return Err(PhysicsError::MissingParent {
                kind: "world",
                name: desc.name.clone(),
            });
        }
        Ok(state.models.insert(FakeModel {
            name: desc.name.clone(),
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
        let mut state = self.state.borrow_mut();
        let model_pose = state
            .models
            .get(model)
            .map(|m| m.pose)
            .ok_or_else(|| PhysicsError::MissingParent {
                kind: "model",
                name: desc.name.clone(),
            })?;
        let link = state.links.insert(FakeLink {
            name: desc.name.clone(),
            pose_in_model: desc.pose,
            frame: FrameData::at_rest(model_pose * desc.pose),
            shapes: Vec::new(),
        });
        if let Some(data) = state.models.get_mut(model) {
            data.links.push(link);
            if desc.canonical || data.canonical.is_none() {
                data.canonical = Some(link);
            }
        }
        Ok(link)
    }

    fn construct_collision(
        &mut self,
        link: LinkId,
        desc: &CollisionDescription,
    ) -> Result<ShapeId, PhysicsError> {
        let mut state = self.state.borrow_mut();
        if !state.links.contains_key(link) {
            return Err(PhysicsError::MissingParent {
                kind: "link",
                name: desc.name.clone(),
            });
        }
        let shape = state.shapes.insert(FakeShape {
            name: desc.name.clone(),
            pose: desc.pose,
            mesh: false,
        });
        if let Some(data) = state.links.get_mut(link) {
            data.shapes.push(shape);
        }
        Ok(shape)
    }

    fn attach_mesh_shape(
        &mut self,
        link: LinkId,
        desc: &MeshShapeDescription,
    ) -> Result<ShapeId, PhysicsError> {
        let mut state = self.state.borrow_mut();
        if !state.links.contains_key(link) {
            return Err(PhysicsError::MissingParent {
                kind: "link",
                name: desc.name.clone(),
            });
        }
        let shape = state.shapes.insert(FakeShape {
            name: desc.name.clone(),
            pose: desc.pose,
            mesh: true,
        });
        if let Some(data) = state.links.get_mut(link) {
            data.shapes.push(shape);
        }
        Ok(shape)
    }

    fn construct_joint(
        &mut self,
        model: ModelId,
        desc: &JointDescription,
    ) -> Result<JointId, PhysicsError> {
        if matches!(
            desc.kind,
            JointKind::Universal | JointKind::Screw | JointKind::Gearbox | JointKind::Revolute2
        ) {
            return Err(PhysicsError::UnsupportedJoint {
                name: desc.name.clone(),
                kind: format!("{:?}", desc.kind),
            });
        }
        let mut state = self.state.borrow_mut();
        if !state.models.contains_key(model) {
            return Err(PhysicsError::MissingParent {
                kind: "model",
                name: desc.name.clone(),
            });
        }
        let linked = |id: LinkId| state.links.contains_key(id);
        if !linked(desc.child) || desc.parent.is_some_and(|p| !linked(p)) {
            return Err(PhysicsError::MissingLink(desc.name.clone()));
        }

        let dof = desc.kind.dof();
        let joint = state.joints.insert(FakeJoint {
            name: desc.name.clone(),
            positions: vec![0.0; dof],
            velocities: vec![0.0; dof],
            velocity_commands: vec![None; dof],
        });
        if let Some(data) = state.models.get_mut(model) {
            data.joints.push(joint);
            data.grounded |= desc.parent.is_none();
        }
        Ok(joint)
    }

    fn remove_model(&mut self, model: ModelId) -> bool {
        self.record(Call::RemoveModel(model));
        let mut state = self.state.borrow_mut();
        let Some(data) = state.models.remove(model) else {
            return false;
        };
        for joint in data.joints {
            state.joints.remove(joint);
        }
        for link in data.links {
            if let Some(link) = state.links.remove(link) {
                for shape in link.shapes {
                    state.shapes.remove(shape);
                }
            }
        }
        true
    }

    fn world_name(&self, world: WorldId) -> Option<String> {
        self.state.borrow().worlds.get(world).map(|w| w.name.clone())
    }

    fn model_name(&self, model: ModelId) -> Option<String> {
        self.state.borrow().models.get(model).map(|m| m.name.clone())
    }

    fn model_pose(&self, model: ModelId) -> Option<Isometry3<f64>> {
        let state = self.state.borrow();
        let data = state.models.get(model)?;
        match data.canonical.and_then(|l| state.links.get(l)) {
            Some(link) => Some(link.frame.pose * link.pose_in_model.inverse()),
            None => Some(data.pose),
        }
    }

    fn link_name(&self, link: LinkId) -> Option<String> {
        self.state.borrow().links.get(link).map(|l| l.name.clone())
    }

    fn shape_name(&self, shape: ShapeId) -> Option<String> {
        self.state.borrow().shapes.get(shape).map(|s| s.name.clone())
    }

    fn shape_pose(&self, shape: ShapeId) -> Option<Isometry3<f64>> {
        self.state.borrow().shapes.get(shape).map(|s| s.pose)
    }

    fn joint_name(&self, joint: JointId) -> Option<String> {
        self.state.borrow().joints.get(joint).map(|j| j.name.clone())
    }

    fn joint_dof(&self, joint: JointId) -> Option<usize> {
        self.state
            .borrow()
            .joints
            .get(joint)
            .map(|j| j.positions.len())
    }

    fn joint_position(&self, joint: JointId, dof: usize) -> Option<f64> {
        self.state
            .borrow()
            .joints
            .get(joint)?
            .positions
            .get(dof)
            .copied()
    }

    fn set_joint_position(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        self.with_joint(joint, dof, |j| j.positions[dof] = value)?;
        self.record(Call::JointPosition(joint, dof, value));
        Ok(())
    }

    fn joint_velocity(&self, joint: JointId, dof: usize) -> Option<f64> {
        self.state
            .borrow()
            .joints
            .get(joint)?
            .velocities
            .get(dof)
            .copied()
    }

    fn set_joint_velocity(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        self.with_joint(joint, dof, |j| j.velocities[dof] = value)?;
        self.record(Call::JointVelocity(joint, dof, value));
        Ok(())
    }

    fn set_joint_force(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        self.with_joint(joint, dof, |_| ())?;
        self.record(Call::JointForce(joint, dof, value));
        Ok(())
    }

    fn set_joint_velocity_command(
        &mut self,
        joint: JointId,
        dof: usize,
        value: f64,
    ) -> Result<(), PhysicsError> {
        self.with_joint(joint, dof, |j| j.velocity_commands[dof] = Some(value))?;
        self.record(Call::JointVelocityCommand(joint, dof, value));
        Ok(())
    }

    fn add_link_external_force(
        &mut self,
        link: LinkId,
        force: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        if !self.state.borrow().links.contains_key(link) {
            return Err(PhysicsError::InvalidHandle("link"));
        }
        self.record(Call::LinkForce(link, force));
        Ok(())
    }

    fn add_link_external_torque(
        &mut self,
        link: LinkId,
        torque: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        if !self.state.borrow().links.contains_key(link) {
            return Err(PhysicsError::InvalidHandle("link"));
        }
        self.record(Call::LinkTorque(link, torque));
        Ok(())
    }

    fn link_frame_data(&self, link: LinkId) -> Option<FrameData> {
        self.state.borrow().links.get(link).map(|l| l.frame)
    }

    fn find_free_group(&self, model: ModelId) -> Option<FreeGroup> {
        let state = self.state.borrow();
        let data = state.models.get(model)?;
        if data.is_static || data.grounded {
            return None;
        }
        Some(FreeGroup {
            model,
            root: data.canonical?,
        })
    }

    fn set_free_group_world_pose(
        &mut self,
        group: &FreeGroup,
        pose: Isometry3<f64>,
    ) -> Result<(), PhysicsError> {
        {
            let mut state = self.state.borrow_mut();
            let root_pose = state
                .links
                .get(group.root)
                .map(|l| l.frame.pose)
                .ok_or(PhysicsError::InvalidHandle("link"))?;
            let delta = pose * root_pose.inverse();
            let links = state
                .models
                .get(group.model)
                .map(|m| m.links.clone())
                .ok_or(PhysicsError::InvalidHandle("model"))?;
            for link in links {
                if let Some(data) = state.links.get_mut(link) {
                    data.frame.pose = delta * data.frame.pose;
                }
            }
        }
        self.record(Call::FreeGroupPose(group.model, pose));
        Ok(())
    }

    fn set_free_group_world_linear_velocity(
        &mut self,
        group: &FreeGroup,
        velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        if let Some(link) = self.state.borrow_mut().links.get_mut(group.root) {
            link.frame.linear_velocity = velocity;
        }
        self.record(Call::FreeGroupLinearVelocity(group.model, velocity));
        Ok(())
    }

    fn set_free_group_world_angular_velocity(
        &mut self,
        group: &FreeGroup,
        velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        if let Some(link) = self.state.borrow_mut().links.get_mut(group.root) {
            link.frame.angular_velocity = velocity;
        }
        self.record(Call::FreeGroupAngularVelocity(group.model, velocity));
        Ok(())
    }

    fn step(&mut self, world: WorldId, input: &StepInput) -> Result<(), PhysicsError> {
        {
            let mut state = self.state.borrow_mut();
            if !state.worlds.contains_key(world) {
                return Err(PhysicsError::InvalidHandle("world"));
            }
            let dt = input.dt.as_secs_f64();
            // Commanded velocities are tracked exactly.
            for joint in state.joints.values_mut() {
                for dof in 0..joint.positions.len() {
                    if let Some(v) = joint.velocity_commands[dof].take() {
                        joint.velocities[dof] = v;
                    }
                    joint.positions[dof] += joint.velocities[dof] * dt;
                }
            }
        }
        self.record(Call::Step(world, input.dt));
        Ok(())
    }

    fn contacts_from_last_step(&self, _world: WorldId) -> Vec<Contact> {
        self.state.borrow().contacts.clone()
    }
}

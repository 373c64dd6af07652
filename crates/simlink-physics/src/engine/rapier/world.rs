//! One Rapier simulation: the object sets plus the machinery that advances them.

use std::collections::HashMap;

use nalgebra::Vector3;
use rapier3d::dynamics::{
    CCDSolver, ImpulseJointSet, IntegrationParameters, IslandManager, MultibodyJointSet,
    RigidBodyBuilder, RigidBodyHandle, RigidBodySet,
};
use rapier3d::geometry::{BroadPhaseMultiSap, ColliderHandle, ColliderSet, ContactPair, NarrowPhase};
use rapier3d::pipeline::{PhysicsPipeline, QueryPipeline};

use crate::engine::ShapeId;

/// Solver state that nothing outside a step needs to touch.
#[derive(Default)]
struct Stepper {
    pipeline: PhysicsPipeline,
    params: IntegrationParameters,
    broad_phase: BroadPhaseMultiSap,
    ccd: CCDSolver,
    queries: QueryPipeline,
}

/// Rapier state of a single world.
pub(super) struct PhysicsWorld {
    pub(super) name: String,
    gravity: Vector3<f32>,
    stepper: Stepper,
    islands: IslandManager,
    narrow_phase: NarrowPhase,

    pub(super) bodies: RigidBodySet,
    pub(super) colliders: ColliderSet,
    pub(super) impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,

    /// Fixed body anchoring joints whose parent is the world.
    ground: Option<RigidBodyHandle>,
    pub(super) collider_to_shape: HashMap<ColliderHandle, ShapeId>,
    /// Seconds covered by the last step; zero before the first one.
    pub(super) last_dt: f32,
}

impl PhysicsWorld {
    pub(super) fn new(name: String, gravity: Vector3<f32>) -> Self {
        Self {
            name,
            gravity,
            stepper: Stepper::default(),
            islands: IslandManager::default(),
            narrow_phase: NarrowPhase::default(),
            bodies: RigidBodySet::default(),
            colliders: ColliderSet::default(),
            impulse_joints: ImpulseJointSet::default(),
            multibody_joints: MultibodyJointSet::default(),
            ground: None,
            collider_to_shape: HashMap::new(),
            last_dt: 0.0,
        }
    }

    /// The world's fixed ground body, created on first use.
    pub(super) fn ground(&mut self) -> RigidBodyHandle {
        let bodies = &mut self.bodies;
        *self
            .ground
            .get_or_insert_with(|| bodies.insert(RigidBodyBuilder::fixed()))
    }

    /// Contact pairs found by the last step.
    pub(super) fn contact_pairs(&self) -> impl Iterator<Item = &ContactPair> {
        self.narrow_phase.contact_pairs()
    }

    /// Remove a body together with its colliders and joints.
    pub(super) fn remove_body(&mut self, handle: RigidBodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    /// Advance by `dt` seconds.
    pub(super) fn step(&mut self, dt: f32) {
        let Stepper {
            pipeline,
            params,
            broad_phase,
            ccd,
            queries,
        } = &mut self.stepper;
        params.dt = dt;
        self.last_dt = dt;

        pipeline.step(
            &self.gravity,
            params,
            &mut self.islands,
            broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            ccd,
            Some(queries),
            &(),
            &(),
        );
    }
}

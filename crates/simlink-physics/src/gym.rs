//! Episode-based control loop over a simulated scene.
//!
//! The environment owns a scene store and a [`Physics`] system. Actions are
//! written as command components and observations are read from the opt-in
//! state components, so the environment exercises the same path as any other
//! producer/consumer of the store.

use std::time::Duration;

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};
use simlink_ecs::components::{
    Joint, JointForceCmd, JointPosition, JointPositionReset, JointVelocity, JointVelocityCmd,
    Link, Name, WorldPose,
};
use simlink_ecs::{ComponentSet, Entity, SceneStore};

use crate::config::PhysicsConfig;
use crate::engine::create_engine;
use crate::error::PhysicsError;
use crate::physics::{Physics, UpdateInfo};

/// Populates an empty scene store with the robot and its surroundings.
pub type SceneFactory = Box<dyn Fn(&mut SceneStore)>;

/// Scores an observation.
pub type RewardFn = Box<dyn Fn(&Observation) -> f64>;

const DEFAULT_DT: f64 = 1.0 / 240.0;
const DEFAULT_SUBSTEPS: u32 = 4;
const DEFAULT_EPISODE_LIMIT: u32 = 1000;
/// Height under which an end effector ends the episode.
const FLOOR_Z: f64 = -1.0;

/// What the agent sees after each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// One scalar per controlled joint, in action order.
    pub joint_positions: Vec<f64>,
    /// Rates of `joint_positions`.
    pub joint_velocities: Vec<f64>,
    /// `[x, y, z, qw, qx, qy, qz]` per observed link.
    pub end_effector_poses: Vec<[f64; 7]>,
}

impl Observation {
    /// All-zero observation of the given shape.
    pub fn zeros(num_joints: usize, num_end_effectors: usize) -> Self {
        Self {
            joint_positions: vec![0.0; num_joints],
            joint_velocities: vec![0.0; num_joints],
            end_effector_poses: vec![[0.0; 7]; num_end_effectors],
        }
    }

    fn pose_entry(pose: &Isometry3<f64>) -> [f64; 7] {
        let t = pose.translation.vector;
        let q = pose.rotation.quaternion();
        [t.x, t.y, t.z, q.w, q.i, q.j, q.k]
    }
}

/// One value per controlled joint. Extra values are ignored and missing
/// ones leave their joint uncommanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    /// Efforts, held for the whole step.
    Torque(Vec<f64>),
    /// Positions the joints jump to at the start of the step.
    PositionTarget(Vec<f64>),
    /// Velocities tracked for the whole step.
    VelocityTarget(Vec<f64>),
}

/// A scene that can be stepped with actions and rebuilt on demand.
pub struct RobotEnv {
    factory: SceneFactory,
    config: PhysicsConfig,
    store: SceneStore,
    physics: Physics,
    joint_names: Vec<String>,
    end_effector_names: Vec<String>,
    joints: Vec<Entity>,
    end_effectors: Vec<Entity>,
    dt: Duration,
    /// Physics ticks per [`RobotEnv::step`].
    substeps: u32,
    episode_limit: u32,
    steps_taken: u32,
    sim_time: Duration,
    iterations: u64,
    reward: Option<RewardFn>,
}

impl RobotEnv {
    /// Build the scene with `factory` and resolve the named joints and links.
    ///
    /// `dt` defaults to 1/240 s and `substeps` to 4. Fails with
    /// [`PhysicsError::InvalidTimeStep`] for a negative or non-finite `dt`
    /// and [`PhysicsError::UnknownEntity`] if a name has no match in the scene.
    pub fn new(
        factory: SceneFactory,
        config: &PhysicsConfig,
        joint_names: Vec<String>,
        end_effector_names: Vec<String>,
        dt: Option<f64>,
        substeps: Option<u32>,
    ) -> Result<Self, PhysicsError> {
        let dt = dt.unwrap_or(DEFAULT_DT);
        let dt = Duration::try_from_secs_f64(dt).map_err(|_| PhysicsError::InvalidTimeStep(dt))?;
        let mut env = Self {
            factory,
            config: config.clone(),
            store: SceneStore::new(),
            physics: Physics::with_engine_and_config(create_engine(config)?, config),
            joint_names,
            end_effector_names,
            joints: Vec::new(),
            end_effectors: Vec::new(),
            dt,
            substeps: substeps.unwrap_or(DEFAULT_SUBSTEPS),
            episode_limit: DEFAULT_EPISODE_LIMIT,
            steps_taken: 0,
            sim_time: Duration::ZERO,
            iterations: 0,
            reward: None,
        };
        env.rebuild()?;
        Ok(env)
    }

    /// Throw away the engine and the scene and start a new episode.
    pub fn reset(&mut self) -> Result<Observation, PhysicsError> {
        self.physics = Physics::with_engine_and_config(create_engine(&self.config)?, &self.config);
        self.rebuild()?;
        Ok(self.observe())
    }

    /// Run `substeps` ticks under `action` and report
    /// `(observation, reward, done)`.
    pub fn step(&mut self, action: Action) -> (Observation, f64, bool) {
        for substep in 0..self.substeps {
            self.apply_action(&action, substep == 0);
            self.tick();
        }
        self.steps_taken += 1;

        let obs = self.observe();
        let reward = match &self.reward {
            Some(score) => score(&obs),
            None => 0.0,
        };
        let done = self.steps_taken >= self.episode_limit || fell_through_floor(&obs);
        (obs, reward, done)
    }

    /// Read the current state without stepping.
    pub fn observe(&self) -> Observation {
        let mut obs = Observation::zeros(self.joints.len(), self.end_effectors.len());
        for (i, &joint) in self.joints.iter().enumerate() {
            let scalar = |values: Option<Vec<f64>>| values.and_then(|v| v.first().copied());
            if let Some(p) = scalar(self.store.data::<JointPosition>(joint)) {
                obs.joint_positions[i] = p;
            }
            if let Some(v) = scalar(self.store.data::<JointVelocity>(joint)) {
                obs.joint_velocities[i] = v;
            }
        }
        for (slot, &link) in obs.end_effector_poses.iter_mut().zip(&self.end_effectors) {
            if let Some(pose) = self.store.data::<WorldPose>(link) {
                *slot = Observation::pose_entry(&pose);
            }
        }
        obs
    }

    /// Number of steps after which `done` is reported.
    pub fn set_max_steps(&mut self, max_steps: u32) {
        self.episode_limit = max_steps;
    }

    /// Score observations with `reward` instead of returning zero.
    pub fn set_reward(&mut self, reward: RewardFn) {
        self.reward = Some(reward);
    }

    /// Controlled joints.
    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    /// Length of a flattened [`Observation`].
    pub fn observation_dim(&self) -> usize {
        2 * self.joints.len() + 7 * self.end_effectors.len()
    }

    /// Values expected per [`Action`].
    pub fn action_dim(&self) -> usize {
        self.num_joints()
    }

    /// The scene being simulated.
    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    fn tick(&mut self) {
        self.sim_time += self.dt;
        self.iterations += 1;
        let info = UpdateInfo::running(self.sim_time, self.dt, self.iterations);
        self.physics.update(&info, &mut self.store);
        self.store.advance();
    }

    /// Fresh scene, opt-in state components, and a paused tick so the
    /// first observation is populated without advancing time.
    fn rebuild(&mut self) -> Result<(), PhysicsError> {
        let mut store = SceneStore::new();
        (self.factory)(&mut store);

        let joints = find_named::<(Joint, Name)>(&store, &self.joint_names, "joint")?;
        let end_effectors = find_named::<(Link, Name)>(&store, &self.end_effector_names, "link")?;
        for &joint in &joints {
            store.create_component(joint, JointPosition(Vec::new()));
            store.create_component(joint, JointVelocity(Vec::new()));
        }
        for &link in &end_effectors {
            if !store.has::<WorldPose>(link) {
                store.create_component(link, WorldPose(Isometry3::identity()));
            }
        }

        self.store = store;
        self.joints = joints;
        self.end_effectors = end_effectors;
        self.steps_taken = 0;
        self.sim_time = Duration::ZERO;
        self.iterations = 0;

        let paused = UpdateInfo {
            sim_time: Duration::ZERO,
            dt_seconds: 0.0,
            paused: true,
            iterations: 0,
        };
        self.physics.update(&paused, &mut self.store);
        self.store.advance();
        log::debug!(
            "Environment reset with {} joints and {} end effectors",
            self.joints.len(),
            self.end_effectors.len()
        );
        Ok(())
    }

    fn apply_action(&mut self, action: &Action, first_substep: bool) {
        let joints = self.joints.iter().copied();
        match action {
            Action::Torque(values) => {
                for (joint, &value) in joints.zip(values) {
                    self.store.create_component(joint, JointForceCmd(vec![value]));
                }
            }
            Action::PositionTarget(values) if first_substep => {
                for (joint, &value) in joints.zip(values) {
                    self.store.create_component(joint, JointPositionReset(vec![value]));
                }
            }
            Action::PositionTarget(_) => {}
            Action::VelocityTarget(values) => {
                for (joint, &value) in joints.zip(values) {
                    self.store.create_component(joint, JointVelocityCmd(vec![value]));
                }
            }
        }
    }
}

fn fell_through_floor(obs: &Observation) -> bool {
    obs.end_effector_poses.iter().any(|pose| pose[2] < FLOOR_Z)
}

fn find_named<Q: ComponentSet>(
    store: &SceneStore,
    names: &[String],
    kind: &'static str,
) -> Result<Vec<Entity>, PhysicsError> {
    let candidates = store.entities::<Q>();
    names
        .iter()
        .map(|name| {
            candidates
                .iter()
                .copied()
                .find(|&e| store.component::<Name>(e).is_some_and(|n| &n.0 == name))
                .ok_or_else(|| PhysicsError::UnknownEntity {
                    kind,
                    name: name.clone(),
                })
        })
        .collect()
}

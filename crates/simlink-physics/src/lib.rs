#![warn(missing_docs)]

//! Rigid-body physics for simlink scenes, using Rapier3d.
//!
//! The [`Physics`] system keeps a physics engine in sync with an entity/
//! component [`SceneStore`](simlink_ecs::SceneStore): it builds engine objects
//! for new worlds, models, links, collisions and joints, forwards command
//! components, steps the engine and writes the resulting state back into the
//! store.
//!
//! # Features
//!
//! - Incremental construction with retry of entities whose parent is not ready
//! - Joint force/velocity commands and position/velocity resets
//! - External wrenches, with optional expiry
//! - Teleporting and velocity commands on free-floating models
//! - Opt-in pose, velocity, acceleration and joint state outputs
//! - Per-collision contact reports
//! - Gym-style observation/action API for RL training
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use nalgebra::Isometry3;
//! use simlink_ecs::components::{Link, WorldPose};
//! use simlink_ecs::{SceneBuilder, SceneStore};
//! use simlink_physics::{Physics, PhysicsConfig, UpdateInfo};
//!
//! let mut store = SceneStore::new();
//! let mut builder = SceneBuilder::new(&mut store);
//! let world = builder.world("default");
//! let model = builder.model(world, "ball", Isometry3::translation(0.0, 0.0, 1.0));
//! let link = builder.link(model, "body", Isometry3::identity());
//! store.create_component(link, WorldPose(Isometry3::identity()));
//!
//! let mut physics = Physics::new(&PhysicsConfig::default());
//! let dt = Duration::from_millis(1);
//! for i in 1..=100 {
//!     physics.update(&UpdateInfo::running(dt * i, dt, u64::from(i)), &mut store);
//!     store.advance();
//! }
//!
//! // Free fall.
//! let pose = store.data::<WorldPose>(link).unwrap();
//! assert!(pose.translation.z < 1.0);
//! ```

mod commands;
mod config;
mod contacts;
mod convert;
pub mod engine;
mod error;
mod frames;
mod gym;
mod materialize;
mod mesh;
mod physics;
mod reaper;
mod registry;
mod state;

pub use config::{EngineKind, PhysicsConfig};
pub use engine::{create_engine, ColliderStrategy, PhysicsEngine, RapierEngine};
pub use error::PhysicsError;
pub use frames::{frame_at_offset, pose_eq, to_body, vector_eq, STATE_TOLERANCE};
pub use gym::{Action, Observation, RewardFn, RobotEnv, SceneFactory};
pub use mesh::{load_obj, ResourceLocator, TriangleMesh, RESOURCE_PATH_ENV};
pub use physics::{Physics, UpdateInfo};
pub use registry::{EntityMap, Registry};

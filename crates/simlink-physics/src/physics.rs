//! The per-tick physics system.
//!
//! [`Physics::update`] runs once per simulation tick and keeps the engine in
//! lock-step with the scene store:
//!
//! 1. refresh [`SimulatedTime`] on world entities,
//! 2. build engine objects for entities that appeared,
//! 3. forward command components,
//! 4. step every world (unless paused),
//! 5. write the new state back into opt-in components,
//! 6. rebuild contact reports,
//! 7. drop engine objects of removed models.

use std::time::Duration;

use simlink_ecs::components::{SimulatedTime, World};
use simlink_ecs::{ComponentState, SceneStore};

use crate::commands;
use crate::config::PhysicsConfig;
use crate::contacts::ContactResolver;
use crate::engine::{create_engine, PhysicsEngine, StepInput, WorldId};
use crate::error::PhysicsError;
use crate::materialize::Materializer;
use crate::mesh::ResourceLocator;
use crate::reaper;
use crate::registry::Registry;
use crate::state;

/// Timing of one tick, provided by the simulation loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateInfo {
    /// Simulated time after this tick's step.
    pub sim_time: Duration,
    /// Step size in seconds. Negative values are logged and not stepped.
    pub dt_seconds: f64,
    /// Whether the simulation is paused. Paused ticks still read state.
    pub paused: bool,
    /// Number of ticks run so far.
    pub iterations: u64,
}

impl UpdateInfo {
    /// A running tick of `dt` ending at `sim_time`.
    pub fn running(sim_time: Duration, dt: Duration, iterations: u64) -> Self {
        Self {
            sim_time,
            dt_seconds: dt.as_secs_f64(),
            paused: false,
            iterations,
        }
    }
}

/// Bridge between a [`SceneStore`] and a [`PhysicsEngine`].
pub struct Physics {
    engine: Option<Box<dyn PhysicsEngine>>,
    registry: Registry,
    materializer: Materializer,
    contacts: ContactResolver,
}

impl Physics {
    /// Physics system using the backend selected by `config`.
    ///
    /// If the backend can't be created, an error is logged and every tick
    /// only refreshes the simulated time.
    pub fn new(config: &PhysicsConfig) -> Self {
        Self::build(create_engine(config), config)
    }

    /// Physics system driving an already constructed engine.
    pub fn with_engine(engine: Box<dyn PhysicsEngine>) -> Self {
        Self::with_engine_and_config(engine, &PhysicsConfig::default())
    }

    /// Like [`with_engine`](Self::with_engine), with resource lookup taken
    /// from `config`.
    pub fn with_engine_and_config(engine: Box<dyn PhysicsEngine>, config: &PhysicsConfig) -> Self {
        Self::build(Ok(engine), config)
    }

    fn build(engine: Result<Box<dyn PhysicsEngine>, PhysicsError>, config: &PhysicsConfig) -> Self {
        let engine = match engine {
            Ok(engine) => {
                log::info!("Using physics engine [{}]", engine.name());
                Some(engine)
            }
            Err(err) => {
                log::error!("Failed to create the physics engine: {}", err);
                None
            }
        };
        Self {
            engine,
            registry: Registry::new(),
            materializer: Materializer::new(ResourceLocator::from_config_and_env(
                &config.resource_paths,
            )),
            contacts: ContactResolver::new(),
        }
    }

    /// Entity ↔ handle bookkeeping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The engine, if one could be created.
    pub fn engine(&self) -> Option<&dyn PhysicsEngine> {
        self.engine.as_deref()
    }

    /// Run one tick.
    pub fn update(&mut self, info: &UpdateInfo, store: &mut SceneStore) {
        if info.dt_seconds < 0.0 {
            log::warn!(
                "Detected jump back in time ({}s). The physics step is skipped for this tick.",
                info.dt_seconds
            );
        }

        update_sim_time(store, info.sim_time);

        let Some(engine) = self.engine.as_deref_mut() else {
            return;
        };

        self.materializer.run(store, engine, &mut self.registry);
        if !self.materializer.pending().is_empty() {
            log::trace!(
                "{} entities waiting for their parents",
                self.materializer.pending().len()
            );
        }

        commands::apply(store, engine, &mut self.registry, info);

        if !info.paused {
            step_worlds(engine, &self.registry, info.dt_seconds);
        }

        state::read_back(store, engine, &self.registry, info);
        self.contacts.resolve(store, engine, &self.registry);
        reaper::reap(store, engine, &mut self.registry);
    }
}

fn update_sim_time(store: &mut SceneStore, sim_time: Duration) {
    for world in store.entities::<(World, SimulatedTime)>() {
        let changed = store.set_data::<SimulatedTime, _>(world, sim_time, |a, b| a == b);
        if changed == Some(true) {
            store.set_changed::<SimulatedTime>(world, ComponentState::PeriodicChange);
        }
    }
}

fn step_worlds(engine: &mut dyn PhysicsEngine, registry: &Registry, dt_seconds: f64) {
    let Ok(dt) = Duration::try_from_secs_f64(dt_seconds) else {
        return;
    };
    let mut worlds: Vec<WorldId> = registry.worlds.iter().map(|(_, world)| world).collect();
    worlds.sort();

    let input = StepInput { dt };
    for world in worlds {
        if let Err(err) = engine.step(world, &input) {
            log::error!("Failed to step physics world: {}", err);
        }
    }
}

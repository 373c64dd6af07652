//! Construction of engine objects for scene entities.
//!
//! The first pass scans the whole store; later passes only look at entities
//! created since the previous tick, plus the ones an earlier pass had to
//! postpone because their parent was not registered yet.

use std::collections::BTreeSet;

use nalgebra::Isometry3;
use simlink_ecs::components::{
    BatterySoC, CanonicalLink, ChildLinkName, Collision, CollisionSurface, Geometry, GeometryKind,
    Gravity, Inertial, Joint, JointAxis, JointAxis2, JointType, Link, Model, Name, ParentEntity,
    ParentLinkName, Pose, Static, ThreadPitch, World,
};
use simlink_ecs::{ComponentSet, Entity, SceneStore};

use crate::engine::{
    CollisionDescription, JointDescription, LinkDescription, LinkId, MeshShapeDescription,
    ModelDescription, PhysicsEngine, WorldDescription,
};
use crate::error::PhysicsError;
use crate::mesh::ResourceLocator;
use crate::registry::Registry;

/// Parent link name that attaches a joint to the world.
const WORLD_LINK: &str = "world";

type WorldQuery = (World, Name, Gravity);
type ModelQuery = (Model, Name, Pose, ParentEntity);
type LinkQuery = (Link, Name, Pose, ParentEntity);
type CollisionQuery = (Collision, Name, Pose, Geometry, ParentEntity);
type JointQuery = (Joint, Name, JointType, ParentEntity, ParentLinkName, ChildLinkName);
type BatteryQuery = (BatterySoC, ParentEntity);

/// What happened to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Registered,
    /// A precondition is missing; try again next tick.
    Retry,
    /// Never try again.
    Skipped,
}

/// Builds engine objects from scene components and records their handles.
pub(crate) struct Materializer {
    initialized: bool,
    pending: BTreeSet<Entity>,
    locator: ResourceLocator,
}

impl Materializer {
    pub(crate) fn new(locator: ResourceLocator) -> Self {
        Self {
            initialized: false,
            pending: BTreeSet::new(),
            locator,
        }
    }

    /// Entities postponed to a later tick.
    pub(crate) fn pending(&self) -> &BTreeSet<Entity> {
        &self.pending
    }

    /// Materialize every entity that is not registered yet.
    pub(crate) fn run(
        &mut self,
        store: &SceneStore,
        engine: &mut dyn PhysicsEngine,
        registry: &mut Registry,
    ) {
        let retry = std::mem::take(&mut self.pending);
        let full_scan = !self.initialized;
        self.initialized = true;

        for entity in self.candidates::<WorldQuery>(store, &retry, full_scan) {
            let outcome = process_world(store, engine, registry, entity);
            self.record(entity, outcome);
        }
        for entity in self.candidates::<ModelQuery>(store, &retry, full_scan) {
            let outcome = process_model(store, engine, registry, entity);
            self.record(entity, outcome);
        }
        for entity in self.candidates::<LinkQuery>(store, &retry, full_scan) {
            let outcome = process_link(store, engine, registry, entity);
            self.record(entity, outcome);
        }
        for entity in self.candidates::<CollisionQuery>(store, &retry, full_scan) {
            let outcome = self.process_collision(store, engine, registry, entity);
            self.record(entity, outcome);
        }
        for entity in self.candidates::<JointQuery>(store, &retry, full_scan) {
            let outcome = process_joint(store, engine, registry, entity);
            self.record(entity, outcome);
        }
        // Only new entities are scanned, so a battery added to an existing
        // entity is never registered.
        for entity in self.candidates::<BatteryQuery>(store, &retry, full_scan) {
            let outcome = process_battery(store, registry, entity);
            self.record(entity, outcome);
        }
    }

    fn candidates<Q: ComponentSet>(
        &self,
        store: &SceneStore,
        retry: &BTreeSet<Entity>,
        full_scan: bool,
    ) -> Vec<Entity> {
        let mut found: BTreeSet<Entity> = if full_scan {
            store.entities::<Q>().into_iter().collect()
        } else {
            store.new_entities::<Q>().into_iter().collect()
        };
        found.extend(retry.iter().filter(|&&e| Q::matches(store, e)));
        found
            .into_iter()
            .filter(|&e| !store.is_pending_removal(e))
            .collect()
    }

    fn record(&mut self, entity: Entity, outcome: Outcome) {
        match outcome {
            Outcome::Retry => {
                self.pending.insert(entity);
            }
            Outcome::Registered => log::trace!("Registered entity [{}]", entity),
            Outcome::Skipped => {}
        }
    }

    fn process_collision(
        &self,
        store: &SceneStore,
        engine: &mut dyn PhysicsEngine,
        registry: &mut Registry,
        entity: Entity,
    ) -> Outcome {
        if registry.collisions.contains(entity) {
            log::warn!(
                "Collision entity [{}] marked as new, but it's already registered",
                entity
            );
            return Outcome::Skipped;
        }
        let (Some(name), Some(pose), Some(geometry), Some(parent)) = (
            store.data::<Name>(entity),
            store.data::<Pose>(entity),
            store.data::<Geometry>(entity),
            store.parent_of(entity),
        ) else {
            return Outcome::Skipped;
        };
        let Some(link) = registry.links.get_handle(parent) else {
            log::warn!(
                "Collision's parent entity [{}] is not a registered link",
                parent
            );
            return Outcome::Retry;
        };
        let surface = store.data::<CollisionSurface>(entity).unwrap_or_default();

        let result = match geometry {
            GeometryKind::Mesh(mesh) => match self.locator.load(&mesh) {
                Ok(loaded) => engine.attach_mesh_shape(
                    link,
                    &MeshShapeDescription {
                        name: name.clone(),
                        pose,
                        mesh: loaded,
                        scale: mesh.scale,
                        surface,
                    },
                ),
                Err(err) => Err(err),
            },
            geometry => engine.construct_collision(
                link,
                &CollisionDescription {
                    name: name.clone(),
                    pose,
                    geometry,
                    surface,
                },
            ),
        };

        match result {
            Ok(shape) => {
                registry.collisions.insert(entity, shape);
                Outcome::Registered
            }
            Err(PhysicsError::MeshNotFound(uri)) => {
                log::warn!(
                    "Mesh [{}] of collision [{}] not found, will retry",
                    uri,
                    name
                );
                Outcome::Retry
            }
            Err(err) => {
                log::warn!("Failed to create collision [{}]: {}", name, err);
                Outcome::Skipped
            }
        }
    }
}

fn process_world(
    store: &SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &mut Registry,
    entity: Entity,
) -> Outcome {
    if registry.worlds.contains(entity) {
        log::warn!(
            "World entity [{}] marked as new, but it's already registered",
            entity
        );
        return Outcome::Skipped;
    }
    let (Some(name), Some(gravity)) = (store.data::<Name>(entity), store.data::<Gravity>(entity))
    else {
        return Outcome::Skipped;
    };

    match engine.construct_world(&WorldDescription { name, gravity }) {
        Ok(world) => {
            registry.worlds.insert(entity, world);
            Outcome::Registered
        }
        Err(err) => {
            log::warn!("Failed to create world [{}]: {}", entity, err);
            Outcome::Skipped
        }
    }
}

fn process_model(
    store: &SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &mut Registry,
    entity: Entity,
) -> Outcome {
    if registry.models.contains(entity) {
        log::warn!(
            "Model entity [{}] marked as new, but it's already registered",
            entity
        );
        return Outcome::Skipped;
    }
    let (Some(name), Some(pose), Some(parent)) = (
        store.data::<Name>(entity),
        store.data::<Pose>(entity),
        store.parent_of(entity),
    ) else {
        return Outcome::Skipped;
    };

    if store.has::<Model>(parent) {
        log::warn!("Nested model [{}] is not supported", name);
        return Outcome::Skipped;
    }
    let Some(world) = registry.worlds.get_handle(parent) else {
        log::warn!("Model's parent entity [{}] is not a registered world", parent);
        return Outcome::Retry;
    };

    let desc = ModelDescription {
        name,
        pose,
        is_static: store.data::<Static>(entity).unwrap_or(false),
    };
    match engine.construct_model(world, &desc) {
        Ok(model) => {
            registry.models.insert(entity, model);
            Outcome::Registered
        }
        Err(err) => {
            log::warn!("Failed to create model [{}]: {}", desc.name, err);
            Outcome::Skipped
        }
    }
}

fn process_link(
    store: &SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &mut Registry,
    entity: Entity,
) -> Outcome {
    if registry.links.contains(entity) {
        log::warn!(
            "Link entity [{}] marked as new, but it's already registered",
            entity
        );
        return Outcome::Skipped;
    }
    let (Some(name), Some(pose), Some(parent)) = (
        store.data::<Name>(entity),
        store.data::<Pose>(entity),
        store.parent_of(entity),
    ) else {
        return Outcome::Skipped;
    };
    let Some(model) = registry.models.get_handle(parent) else {
        log::warn!("Link's parent entity [{}] is not a registered model", parent);
        return Outcome::Retry;
    };

    let desc = LinkDescription {
        name,
        pose,
        inertial: store.data::<Inertial>(entity).unwrap_or_default(),
        canonical: store.has::<CanonicalLink>(entity),
    };
    match engine.construct_link(model, &desc) {
        Ok(link) => {
            registry.links.insert(entity, link);
            Outcome::Registered
        }
        Err(err) => {
            log::warn!("Failed to create link [{}]: {}", desc.name, err);
            Outcome::Skipped
        }
    }
}

/// Resolve a link by name among the registered links of `model`.
///
/// `Some(None)` is the world; `None` means the link is not registered yet.
fn resolve_link(
    store: &SceneStore,
    registry: &Registry,
    model: Entity,
    name: &str,
) -> Option<Option<LinkId>> {
    if name == WORLD_LINK {
        return Some(None);
    }
    store
        .children::<(Link, Name)>(model)
        .into_iter()
        .find(|&link| store.component::<Name>(link).is_some_and(|n| n.0 == name))
        .and_then(|link| registry.links.get_handle(link))
        .map(Some)
}

fn process_joint(
    store: &SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &mut Registry,
    entity: Entity,
) -> Outcome {
    if registry.joints.contains(entity) {
        log::warn!(
            "Joint entity [{}] marked as new, but it's already registered",
            entity
        );
        return Outcome::Skipped;
    }
    let (Some(name), Some(kind), Some(parent), Some(parent_link), Some(child_link)) = (
        store.data::<Name>(entity),
        store.data::<JointType>(entity),
        store.parent_of(entity),
        store.data::<ParentLinkName>(entity),
        store.data::<ChildLinkName>(entity),
    ) else {
        return Outcome::Skipped;
    };
    let Some(model) = registry.models.get_handle(parent) else {
        log::warn!("Joint's parent entity [{}] is not a registered model", parent);
        return Outcome::Retry;
    };

    let (Some(parent_link), Some(Some(child))) = (
        resolve_link(store, registry, parent, &parent_link),
        resolve_link(store, registry, parent, &child_link),
    ) else {
        log::warn!("Links of joint [{}] are not registered yet", name);
        return Outcome::Retry;
    };

    let desc = JointDescription {
        name,
        kind,
        parent: parent_link,
        child,
        pose: store.data::<Pose>(entity).unwrap_or_else(Isometry3::identity),
        axis: store.data::<JointAxis>(entity),
        axis2: store.data::<JointAxis2>(entity),
        thread_pitch: store.data::<ThreadPitch>(entity).unwrap_or(0.0),
    };
    match engine.construct_joint(model, &desc) {
        Ok(joint) => {
            registry.joints.insert(entity, joint);
            Outcome::Registered
        }
        Err(PhysicsError::UnsupportedJoint { name, kind }) => {
            log::warn!("Joint [{}] of type {} is not supported", name, kind);
            Outcome::Skipped
        }
        Err(err) => {
            log::warn!("Failed to create joint [{}]: {}", desc.name, err);
            Outcome::Skipped
        }
    }
}

fn process_battery(store: &SceneStore, registry: &mut Registry, entity: Entity) -> Outcome {
    let Some(model) = store.parent_of(entity) else {
        return Outcome::Skipped;
    };
    registry.batteries.entry(model).or_insert(false);
    Outcome::Registered
}

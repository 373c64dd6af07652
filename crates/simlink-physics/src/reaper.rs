//! Removal of engine objects whose model entity is going away.

use simlink_ecs::components::{Collision, Joint, Link, Model};
use simlink_ecs::SceneStore;

use crate::engine::PhysicsEngine;
use crate::registry::Registry;

/// Drop the registry entries and engine objects of every removed model.
///
/// Runs last in the tick so no other pass sees a dangling handle.
pub(crate) fn reap(store: &SceneStore, engine: &mut dyn PhysicsEngine, registry: &mut Registry) {
    for model in store.removed_entities::<(Model,)>() {
        let Some(handle) = registry.models.get_handle(model) else {
            continue;
        };

        for link in store.children::<(Link,)>(model) {
            for collision in store.children::<(Collision,)>(link) {
                registry.collisions.remove_by_entity(collision);
            }
            registry.links.remove_by_entity(link);
        }
        for joint in store.children::<(Joint,)>(model) {
            registry.joints.remove_by_entity(joint);
        }

        if !engine.remove_model(handle) {
            log::warn!("Engine could not remove model of entity [{}]", model);
        }
        registry.models.remove_by_entity(model);
        registry.batteries.remove(&model);
        log::debug!("Removed model entity [{}]", model);
    }
}

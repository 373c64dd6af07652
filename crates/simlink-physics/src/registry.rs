//! Entity ↔ engine handle bookkeeping.

use std::collections::BTreeMap;

use simlink_ecs::Entity;

use crate::engine::{JointId, LinkId, ModelId, ShapeId, WorldId};

/// Bidirectional map between entities and engine handles.
///
/// Both directions are updated together so every handle has exactly one
/// owning entity.
#[derive(Debug, Clone)]
pub struct EntityMap<H: Copy + Ord> {
    entity_to_handle: BTreeMap<Entity, H>,
    handle_to_entity: BTreeMap<H, Entity>,
}

impl<H: Copy + Ord> Default for EntityMap<H> {
    fn default() -> Self {
        Self {
            entity_to_handle: BTreeMap::new(),
            handle_to_entity: BTreeMap::new(),
        }
    }
}

impl<H: Copy + Ord> EntityMap<H> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapping.
    ///
    /// Returns `false` and leaves the map untouched if either side is
    /// already registered.
    pub fn insert(&mut self, entity: Entity, handle: H) -> bool {
        if self.entity_to_handle.contains_key(&entity)
            || self.handle_to_entity.contains_key(&handle)
        {
            return false;
        }
        self.entity_to_handle.insert(entity, handle);
        self.handle_to_entity.insert(handle, entity);
        true
    }

    /// Handle owned by `entity`.
    #[must_use]
    pub fn get_handle(&self, entity: Entity) -> Option<H> {
        self.entity_to_handle.get(&entity).copied()
    }

    /// Entity owning `handle`.
    #[must_use]
    pub fn get_entity(&self, handle: H) -> Option<Entity> {
        self.handle_to_entity.get(&handle).copied()
    }

    /// Remove a mapping by entity.
    pub fn remove_by_entity(&mut self, entity: Entity) -> Option<H> {
        let handle = self.entity_to_handle.remove(&entity)?;
        self.handle_to_entity.remove(&handle);
        Some(handle)
    }

    /// Remove a mapping by handle.
    pub fn remove_by_handle(&mut self, handle: H) -> Option<Entity> {
        let entity = self.handle_to_entity.remove(&handle)?;
        self.entity_to_handle.remove(&entity);
        Some(entity)
    }

    /// Whether `entity` is registered.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.entity_to_handle.contains_key(&entity)
    }

    /// Number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entity_to_handle.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_to_handle.is_empty()
    }

    /// Mappings ordered by entity.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, H)> + '_ {
        self.entity_to_handle.iter().map(|(e, h)| (*e, *h))
    }
}

/// Every physics object the bridge created, keyed by owning entity.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    /// World entities.
    pub worlds: EntityMap<WorldId>,
    /// Model entities.
    pub models: EntityMap<ModelId>,
    /// Link entities.
    pub links: EntityMap<LinkId>,
    /// Collision entities.
    pub collisions: EntityMap<ShapeId>,
    /// Joint entities.
    pub joints: EntityMap<JointId>,
    /// Battery-powered models and whether they are switched off.
    pub batteries: BTreeMap<Entity, bool>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `entity` owns any physics object.
    #[must_use]
    pub fn is_registered(&self, entity: Entity) -> bool {
        self.worlds.contains(entity)
            || self.models.contains(entity)
            || self.links.contains(entity)
            || self.collisions.contains(entity)
            || self.joints.contains(entity)
    }

    /// Whether the model owning a battery is switched off.
    #[must_use]
    pub fn is_off(&self, model: Entity) -> bool {
        self.batteries.get(&model).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simlink_ecs::SceneStore;
    use slotmap::SlotMap;

    #[test]
    fn test_insert_is_bidirectional() {
        let mut store = SceneStore::new();
        let entity = store.create_entity();
        let mut handles: SlotMap<LinkId, ()> = SlotMap::with_key();
        let handle = handles.insert(());

        let mut map = EntityMap::new();
        assert!(map.insert(entity, handle));
        assert_eq!(map.get_handle(entity), Some(handle));
        assert_eq!(map.get_entity(handle), Some(entity));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove_by_handle(handle), Some(entity));
        assert!(!map.contains(entity));
        assert!(map.get_entity(handle).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let mut store = SceneStore::new();
        let first = store.create_entity();
        let second = store.create_entity();
        let mut handles: SlotMap<ShapeId, ()> = SlotMap::with_key();
        let a = handles.insert(());
        let b = handles.insert(());

        let mut map = EntityMap::new();
        assert!(map.insert(first, a));
        assert!(!map.insert(first, b));
        assert!(!map.insert(second, a));
        assert_eq!(map.get_handle(first), Some(a));
        assert!(map.get_entity(b).is_none());
        assert_eq!(map.remove_by_entity(first), Some(a));
        assert_eq!(map.remove_by_entity(first), None);
    }
}

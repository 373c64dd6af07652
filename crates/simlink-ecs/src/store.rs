//! Typed component tables indexed by entity.
//!
//! The store answers three kinds of questions over a component set `S`:
//! every entity carrying `S`, only those created since the last
//! [`SceneStore::advance`], and only those scheduled for removal. Results are
//! returned as owned, id-ordered lists so callers can freely mutate the store
//! while walking them.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::components::ParentEntity;
use crate::entity::Entity;

/// Marker trait for anything that can be attached to an entity.
pub trait Component: Any {}

/// Components that wrap a single payload value.
pub trait ComponentData: Component {
    /// Payload type.
    type Data;

    /// Shared access to the payload.
    fn data(&self) -> &Self::Data;

    /// Exclusive access to the payload.
    fn data_mut(&mut self) -> &mut Self::Data;
}

/// How a component changed during the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentState {
    /// Untouched.
    #[default]
    NoChange,
    /// Changed by a discrete event (e.g. a teleport) that consumers must not miss.
    OneTimeChange,
    /// Changed as part of continuous simulation.
    PeriodicChange,
}

trait Table: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn contains(&self, entity: Entity) -> bool;
    fn remove_entity(&mut self, entity: Entity);
    fn is_empty(&self) -> bool;
    fn reset_states(&mut self);
}

struct Column<C> {
    rows: BTreeMap<Entity, C>,
    states: BTreeMap<Entity, ComponentState>,
}

impl<C> Column<C> {
    fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }
}

impl<C: Component> Table for Column<C> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn contains(&self, entity: Entity) -> bool {
        self.rows.contains_key(&entity)
    }

    fn remove_entity(&mut self, entity: Entity) {
        self.rows.remove(&entity);
        self.states.remove(&entity);
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn reset_states(&mut self) {
        self.states.clear();
    }
}

/// A set of component types used as a query filter.
///
/// Implemented for tuples of one to six components, e.g. `(Link, Pose)`.
pub trait ComponentSet {
    /// Whether `entity` carries every component of the set.
    fn matches(store: &SceneStore, entity: Entity) -> bool;

    /// Entities carrying the first component of the set, in id order.
    fn candidates(store: &SceneStore) -> Vec<Entity>;
}

macro_rules! impl_component_set {
    ($first:ident $(, $rest:ident)*) => {
        impl<$first: Component $(, $rest: Component)*> ComponentSet for ($first, $($rest,)*) {
            fn matches(store: &SceneStore, entity: Entity) -> bool {
                store.has::<$first>(entity) $(&& store.has::<$rest>(entity))*
            }

            fn candidates(store: &SceneStore) -> Vec<Entity> {
                store
                    .column::<$first>()
                    .map(|column| column.rows.keys().copied().collect())
                    .unwrap_or_default()
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);

/// Entity/component store.
#[derive(Default)]
pub struct SceneStore {
    next_id: u64,
    entities: BTreeSet<Entity>,
    columns: HashMap<TypeId, Box<dyn Table>>,
    created: BTreeSet<Entity>,
    pending_removal: BTreeSet<Entity>,
}

impl SceneStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new entity. It is reported as "new" until the next [`advance`](Self::advance).
    pub fn create_entity(&mut self) -> Entity {
        let entity = Entity::new(self.next_id);
        self.next_id += 1;
        self.entities.insert(entity);
        self.created.insert(entity);
        entity
    }

    /// Whether the entity exists (scheduled removals still exist until `advance`).
    pub fn has_entity(&self, entity: Entity) -> bool {
        self.entities.contains(&entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Attach (or overwrite) a component. Returns `false` if the entity does not exist.
    pub fn create_component<C: Component>(&mut self, entity: Entity, component: C) -> bool {
        if !self.entities.contains(&entity) {
            return false;
        }
        let table = self
            .columns
            .entry(TypeId::of::<C>())
            .or_insert_with(|| Box::new(Column::<C>::new()));
        match table.as_any_mut().downcast_mut::<Column<C>>() {
            Some(column) => {
                column.rows.insert(entity, component);
                column.states.insert(entity, ComponentState::OneTimeChange);
                true
            }
            None => false,
        }
    }

    /// Shared access to a component.
    pub fn component<C: Component>(&self, entity: Entity) -> Option<&C> {
        self.column::<C>()?.rows.get(&entity)
    }

    /// Exclusive access to a component.
    pub fn component_mut<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        self.column_mut::<C>()?.rows.get_mut(&entity)
    }

    /// Payload of a data component, cloned.
    pub fn data<C>(&self, entity: Entity) -> Option<C::Data>
    where
        C: ComponentData,
        C::Data: Clone,
    {
        self.component::<C>(entity).map(|c| c.data().clone())
    }

    /// Overwrite the payload of an existing component if it differs according to `eq`.
    ///
    /// Returns `None` when the component is absent, otherwise whether the
    /// stored value changed. The changed-state marker is not touched.
    pub fn set_data<C, F>(&mut self, entity: Entity, data: C::Data, eq: F) -> Option<bool>
    where
        C: ComponentData,
        F: Fn(&C::Data, &C::Data) -> bool,
    {
        let component = self.component_mut::<C>(entity)?;
        if eq(component.data(), &data) {
            return Some(false);
        }
        *component.data_mut() = data;
        Some(true)
    }

    /// Detach a component.
    pub fn remove_component<C: Component>(&mut self, entity: Entity) -> Option<C> {
        let column = self.column_mut::<C>()?;
        column.states.remove(&entity);
        column.rows.remove(&entity)
    }

    /// Whether `entity` carries `C`.
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        self.columns
            .get(&TypeId::of::<C>())
            .is_some_and(|table| table.contains(entity))
    }

    /// Whether any entity carries `C`.
    pub fn has_component_type<C: Component>(&self) -> bool {
        self.columns
            .get(&TypeId::of::<C>())
            .is_some_and(|table| !table.is_empty())
    }

    /// All entities carrying the component set `Q`.
    pub fn entities<Q: ComponentSet>(&self) -> Vec<Entity> {
        Q::candidates(self)
            .into_iter()
            .filter(|&e| Q::matches(self, e))
            .collect()
    }

    /// Entities carrying `Q` that were created since the last `advance`.
    pub fn new_entities<Q: ComponentSet>(&self) -> Vec<Entity> {
        Q::candidates(self)
            .into_iter()
            .filter(|e| self.created.contains(e))
            .filter(|&e| Q::matches(self, e))
            .collect()
    }

    /// Entities carrying `Q` that are scheduled for removal.
    pub fn removed_entities<Q: ComponentSet>(&self) -> Vec<Entity> {
        Q::candidates(self)
            .into_iter()
            .filter(|e| self.pending_removal.contains(e))
            .filter(|&e| Q::matches(self, e))
            .collect()
    }

    /// Lowest-id entity carrying `Q`.
    pub fn first_entity<Q: ComponentSet>(&self) -> Option<Entity> {
        Q::candidates(self)
            .into_iter()
            .find(|&e| Q::matches(self, e))
    }

    /// Parent recorded through [`ParentEntity`].
    pub fn parent_of(&self, entity: Entity) -> Option<Entity> {
        self.component::<ParentEntity>(entity).map(|p| p.0)
    }

    /// Direct children of `parent` carrying `Q`.
    pub fn children<Q: ComponentSet>(&self, parent: Entity) -> Vec<Entity> {
        self.entities::<Q>()
            .into_iter()
            .filter(|&e| self.parent_of(e) == Some(parent))
            .collect()
    }

    /// Schedule `entity` and all of its descendants for removal.
    ///
    /// The entities stay readable until the next [`advance`](Self::advance).
    pub fn request_removal(&mut self, entity: Entity) {
        if !self.entities.contains(&entity) {
            return;
        }
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            if !self.pending_removal.insert(current) {
                continue;
            }
            stack.extend(self.direct_children(current));
        }
    }

    /// Whether `entity` is scheduled for removal.
    pub fn is_pending_removal(&self, entity: Entity) -> bool {
        self.pending_removal.contains(&entity)
    }

    /// Close the current tick: delete scheduled entities, forget the "new"
    /// set and reset every changed-state marker.
    pub fn advance(&mut self) {
        let removed = std::mem::take(&mut self.pending_removal);
        for entity in removed {
            for table in self.columns.values_mut() {
                table.remove_entity(entity);
            }
            self.entities.remove(&entity);
        }
        self.created.clear();
        for table in self.columns.values_mut() {
            table.reset_states();
        }
    }

    /// Mark how `C` changed on `entity` this tick.
    pub fn set_changed<C: Component>(&mut self, entity: Entity, state: ComponentState) {
        if let Some(column) = self.column_mut::<C>() {
            if column.rows.contains_key(&entity) {
                column.states.insert(entity, state);
            }
        }
    }

    /// Changed-state marker of `C` on `entity`.
    pub fn changed_state<C: Component>(&self, entity: Entity) -> ComponentState {
        self.column::<C>()
            .and_then(|column| column.states.get(&entity).copied())
            .unwrap_or_default()
    }

    fn direct_children(&self, parent: Entity) -> Vec<Entity> {
        self.column::<ParentEntity>()
            .map(|column| {
                column
                    .rows
                    .iter()
                    .filter(|(_, p)| p.0 == parent)
                    .map(|(&e, _)| e)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn column<C: Component>(&self) -> Option<&Column<C>> {
        self.columns
            .get(&TypeId::of::<C>())?
            .as_any()
            .downcast_ref::<Column<C>>()
    }

    fn column_mut<C: Component>(&mut self) -> Option<&mut Column<C>> {
        self.columns
            .get_mut(&TypeId::of::<C>())?
            .as_any_mut()
            .downcast_mut::<Column<C>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Link, Model, Name, Pose};

    fn named(store: &mut SceneStore, name: &str, parent: Option<Entity>) -> Entity {
        let e = store.create_entity();
        store.create_component(e, Name(name.to_string()));
        if let Some(parent) = parent {
            store.create_component(e, ParentEntity(parent));
        }
        e
    }

    #[test]
    fn test_query_by_component_set() {
        let mut store = SceneStore::new();
        let model = named(&mut store, "m", None);
        store.create_component(model, Model);
        let link = named(&mut store, "l", Some(model));
        store.create_component(link, Link);
        store.create_component(link, Pose(nalgebra::Isometry3::identity()));

        assert_eq!(store.entities::<(Model, Name)>(), vec![model]);
        assert_eq!(store.entities::<(Link, Pose, ParentEntity)>(), vec![link]);
        assert!(store.entities::<(Model, Pose)>().is_empty());
        assert_eq!(store.children::<(Link,)>(model), vec![link]);
    }

    #[test]
    fn test_new_entities_until_advance() {
        let mut store = SceneStore::new();
        let a = named(&mut store, "a", None);
        assert_eq!(store.new_entities::<(Name,)>(), vec![a]);

        store.advance();
        assert!(store.new_entities::<(Name,)>().is_empty());

        let b = named(&mut store, "b", None);
        assert_eq!(store.new_entities::<(Name,)>(), vec![b]);
        assert_eq!(store.entities::<(Name,)>(), vec![a, b]);
    }

    #[test]
    fn test_removal_is_recursive_and_deferred() {
        let mut store = SceneStore::new();
        let model = named(&mut store, "m", None);
        store.create_component(model, Model);
        let link = named(&mut store, "l", Some(model));
        let other = named(&mut store, "o", None);

        store.request_removal(model);
        assert!(store.is_pending_removal(link));
        assert!(!store.is_pending_removal(other));
        assert_eq!(store.removed_entities::<(Model,)>(), vec![model]);
        // Still readable during the tick.
        assert_eq!(store.component::<Name>(link).map(|n| n.0.as_str()), Some("l"));

        store.advance();
        assert!(!store.has_entity(model));
        assert!(!store.has_entity(link));
        assert!(store.component::<Name>(link).is_none());
        assert!(store.has_entity(other));
    }

    #[test]
    fn test_changed_state_markers() {
        let mut store = SceneStore::new();
        let e = named(&mut store, "e", None);
        assert_eq!(store.changed_state::<Name>(e), ComponentState::OneTimeChange);

        store.advance();
        assert_eq!(store.changed_state::<Name>(e), ComponentState::NoChange);

        store.set_changed::<Name>(e, ComponentState::PeriodicChange);
        assert_eq!(store.changed_state::<Name>(e), ComponentState::PeriodicChange);
    }

    #[test]
    fn test_set_data_reports_change() {
        let mut store = SceneStore::new();
        let e = named(&mut store, "e", None);

        let unchanged = store.set_data::<Name, _>(e, "e".to_string(), |a, b| a == b);
        assert_eq!(unchanged, Some(false));
        let changed = store.set_data::<Name, _>(e, "f".to_string(), |a, b| a == b);
        assert_eq!(changed, Some(true));

        let missing = store.create_entity();
        assert_eq!(store.set_data::<Name, _>(missing, "x".into(), |a, b| a == b), None);
    }

    #[test]
    fn test_component_on_unknown_entity_is_rejected() {
        let mut store = SceneStore::new();
        let e = store.create_entity();
        store.request_removal(e);
        store.advance();
        assert!(!store.create_component(e, Model));
        assert!(!store.has_component_type::<Model>());
    }
}

//! Contact reports for instrumented collision entities.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use simlink_ecs::components::{
    Collision, ContactReport, ContactSensorData, ContactWrench, Contacts, Name, World,
};
use simlink_ecs::{Entity, SceneStore};

use crate::engine::{Contact, PhysicsEngine};
use crate::registry::Registry;

/// Requesting collision → partner collision → raw contacts.
type ContactMap<'a> = BTreeMap<Entity, BTreeMap<Entity, Vec<&'a Contact>>>;

/// Turns the engine's contact list into per-collision reports.
#[derive(Debug, Default)]
pub(crate) struct ContactResolver {
    disabled: bool,
}

impl ContactResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Rebuild the [`ContactSensorData`] of every collision that carries one.
    pub(crate) fn resolve(
        &mut self,
        store: &mut SceneStore,
        engine: &dyn PhysicsEngine,
        registry: &Registry,
    ) {
        if self.disabled || !store.has_component_type::<ContactSensorData>() {
            return;
        }
        let Some(world_entity) = store.first_entity::<(World,)>() else {
            log::error!("Missing world entity, contact reporting is disabled");
            self.disabled = true;
            return;
        };
        let Some(world) = registry.worlds.get_handle(world_entity) else {
            return;
        };

        let contacts = engine.contacts_from_last_step(world);
        let mut map = ContactMap::new();
        for contact in &contacts {
            let (Some(first), Some(second)) = (
                registry.collisions.get_entity(contact.collision1),
                registry.collisions.get_entity(contact.collision2),
            ) else {
                continue;
            };
            map.entry(first)
                .or_default()
                .entry(second)
                .or_default()
                .push(contact);
            map.entry(second)
                .or_default()
                .entry(first)
                .or_default()
                .push(contact);
        }

        for requester in store.entities::<(Collision, ContactSensorData)>() {
            let report = match map.get(&requester) {
                Some(partners) => build_report(store, registry, requester, partners),
                None => Contacts::default(),
            };
            if let Some(data) = store.component_mut::<ContactSensorData>(requester) {
                data.0 = report;
            }
        }
    }
}

fn name_of(store: &SceneStore, entity: Entity) -> String {
    store.data::<Name>(entity).unwrap_or_default()
}

fn build_report(
    store: &SceneStore,
    registry: &Registry,
    requester: Entity,
    partners: &BTreeMap<Entity, Vec<&Contact>>,
) -> Contacts {
    let requester_name = name_of(store, requester);
    let mut contacts = Vec::with_capacity(partners.len());

    for (&partner, points) in partners {
        let partner_name = name_of(store, partner);
        let mut report = ContactReport::new(requester, partner);

        for contact in points {
            report.positions.push(contact.point);
            let Some(extra) = contact.extra else {
                continue;
            };
            report.depths.push(extra.depth);

            // Engine data is expressed for the first collision of the pair.
            let as_first = registry.collisions.get_entity(contact.collision1) == Some(requester);
            let (force, normal) = if as_first {
                (extra.force, extra.normal)
            } else {
                (-extra.force, -extra.normal)
            };
            report.normals.push(normal);
            report.wrenches.push(ContactWrench {
                body_1_name: requester_name.clone(),
                body_2_name: partner_name.clone(),
                body_1_force: force,
                body_2_force: -force,
                body_1_torque: Vector3::zeros(),
                body_2_torque: Vector3::zeros(),
            });
        }
        contacts.push(report);
    }

    Contacts { contacts }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nalgebra::{Isometry3, Point3};
    use simlink_ecs::components::GeometryKind;
    use simlink_ecs::SceneBuilder;

    use super::*;
    use crate::config::PhysicsConfig;
    use crate::engine::fake::FakeEngine;
    use crate::engine::{ExtraContactData, ShapeId};
    use crate::physics::{Physics, UpdateInfo};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn tick() -> UpdateInfo {
        UpdateInfo {
            sim_time: Duration::from_millis(1),
            dt_seconds: 0.001,
            paused: false,
            iterations: 1,
        }
    }

    fn unit_box() -> GeometryKind {
        GeometryKind::Box {
            size: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    /// Two boxes overlapping by 0.1 along Z: `lower` sits on `upper`'s bottom face.
    fn stacked_boxes(store: &mut SceneStore) -> (Entity, Entity) {
        let mut builder = SceneBuilder::new(store);
        let world = builder.world_with_gravity("default", Vector3::zeros());
        let ground = builder.static_model(world, "ground", Isometry3::identity());
        let ground_link = builder.link(ground, "ground_link", Isometry3::identity());
        let lower = builder.collision(ground_link, "lower", Isometry3::identity(), unit_box());
        let cube = builder.model(world, "cube", Isometry3::translation(0.0, 0.0, 0.9));
        let cube_link = builder.link(cube, "cube_link", Isometry3::identity());
        let upper = builder.collision(cube_link, "upper", Isometry3::identity(), unit_box());
        (lower, upper)
    }

    #[test]
    fn test_reports_are_antisymmetric() {
        init();
        let mut store = SceneStore::new();
        let (lower, upper) = stacked_boxes(&mut store);
        store.create_component(lower, ContactSensorData(Contacts::default()));
        store.create_component(upper, ContactSensorData(Contacts::default()));

        let (engine, state) = FakeEngine::new();
        let mut physics = Physics::with_engine(Box::new(engine));
        physics.update(&tick(), &mut store);
        assert!(store.data::<ContactSensorData>(lower).unwrap().is_empty());

        {
            let mut state = state.borrow_mut();
            let contact = Contact {
                collision1: state.shape_named("lower").unwrap(),
                collision2: state.shape_named("upper").unwrap(),
                point: Point3::new(0.0, 0.0, 0.45),
                extra: Some(ExtraContactData {
                    depth: 0.1,
                    force: Vector3::new(0.0, 0.0, -10.0),
                    normal: Vector3::new(0.0, 0.0, 1.0),
                }),
            };
            state.contacts = vec![contact];
        }
        store.advance();
        physics.update(&tick(), &mut store);

        let lower_report = store.data::<ContactSensorData>(lower).unwrap();
        let upper_report = store.data::<ContactSensorData>(upper).unwrap();
        let a = lower_report.with(upper).unwrap();
        let b = upper_report.with(lower).unwrap();

        assert_eq!(a.wrenches[0].body_1_force, Vector3::new(0.0, 0.0, -10.0));
        assert_eq!(b.wrenches[0].body_1_force, Vector3::new(0.0, 0.0, 10.0));
        assert_eq!(a.wrenches[0].body_2_force, b.wrenches[0].body_1_force);
        assert_eq!(a.normals[0], -b.normals[0]);
        assert_eq!(a.wrenches[0].body_1_name, "lower");
        assert_eq!(b.wrenches[0].body_1_name, "upper");
        assert_eq!(b.wrenches[0].body_2_name, "lower");
        assert_eq!(b.wrenches[0].body_1_torque, Vector3::zeros());

        // Reports are rebuilt every tick.
        state.borrow_mut().contacts.clear();
        store.advance();
        physics.update(&tick(), &mut store);
        assert!(store.data::<ContactSensorData>(upper).unwrap().is_empty());
    }

    #[test]
    fn test_contacts_with_unknown_shapes_are_ignored() {
        init();
        let mut store = SceneStore::new();
        let (lower, _) = stacked_boxes(&mut store);
        store.create_component(lower, ContactSensorData(Contacts::default()));

        let (engine, state) = FakeEngine::new();
        let mut physics = Physics::with_engine(Box::new(engine));
        physics.update(&tick(), &mut store);

        {
            let mut state = state.borrow_mut();
            let known = state.shape_named("lower").unwrap();
            state.contacts = vec![Contact {
                collision1: known,
                collision2: ShapeId::default(),
                point: Point3::origin(),
                extra: None,
            }];
        }
        store.advance();
        physics.update(&tick(), &mut store);
        assert!(store.data::<ContactSensorData>(lower).unwrap().is_empty());
    }

    #[test]
    fn test_missing_world_disables_reporting() {
        init();
        let mut store = SceneStore::new();
        let orphan = store.create_entity();
        store.create_component(orphan, Collision);
        store.create_component(orphan, ContactSensorData(Contacts::default()));

        let (engine, _state) = FakeEngine::new();
        let mut resolver = ContactResolver::new();
        let registry = Registry::new();
        resolver.resolve(&mut store, &engine, &registry);
        assert!(resolver.disabled);

        // Stays off even once a world shows up.
        let mut builder = SceneBuilder::new(&mut store);
        builder.world("late");
        resolver.resolve(&mut store, &engine, &registry);
        assert!(resolver.disabled);
    }

    #[test]
    fn test_interpenetrating_boxes_with_rapier() {
        init();
        let mut store = SceneStore::new();
        let (lower, upper) = stacked_boxes(&mut store);
        store.create_component(upper, ContactSensorData(Contacts::default()));

        let mut physics = Physics::new(&PhysicsConfig::default());
        physics.update(&tick(), &mut store);

        let report = store.data::<ContactSensorData>(upper).unwrap();
        assert_eq!(report.contacts.len(), 1);
        let entry = &report.contacts[0];
        assert_eq!(entry.collision1, upper);
        assert_eq!(entry.collision2, lower);
        assert!(!entry.positions.is_empty());
        assert!(entry.depths.iter().all(|d| *d >= 0.0));
        assert_eq!(entry.wrenches[0].body_2_name, "lower");
        // Nobody asked for the ground's contacts.
        assert!(!store.has::<ContactSensorData>(lower));
    }
}

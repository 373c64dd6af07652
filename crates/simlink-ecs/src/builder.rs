//! Programmatic construction of scene trees.
//!
//! Description-file loaders are out of scope; this builder attaches the same
//! component sets a loader would, which is what the physics bridge consumes.

use nalgebra::{Isometry3, Vector3};

use crate::components::{
    AxisSpec, BatterySoC, CanonicalLink, ChildLinkName, Collision, Geometry, GeometryKind, Gravity,
    Inertial, Joint, JointAxis, JointAxis2, JointKind, JointType, Link, MassProperties, Model,
    Name, ParentEntity, ParentLinkName, Pose, Sensor, SimulatedTime, Static, ThreadPitch, World,
};
use crate::entity::Entity;
use crate::store::SceneStore;

/// Standard gravity along -Z.
pub fn earth_gravity() -> Vector3<f64> {
    Vector3::new(0.0, 0.0, -9.80665)
}

/// Description of a joint to spawn.
#[derive(Debug, Clone)]
pub struct JointSpec {
    /// Joint name.
    pub name: String,
    /// Joint type.
    pub kind: JointKind,
    /// Parent link name, or `world`.
    pub parent: String,
    /// Child link name.
    pub child: String,
    /// Joint frame relative to the child link.
    pub pose: Isometry3<f64>,
    /// First axis.
    pub axis: Option<AxisSpec>,
    /// Second axis.
    pub axis2: Option<AxisSpec>,
    /// Thread pitch for screw joints.
    pub thread_pitch: f64,
}

impl JointSpec {
    /// Joint between two named links with the frame at the child link origin.
    pub fn new(
        name: impl Into<String>,
        kind: JointKind,
        parent: impl Into<String>,
        child: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: parent.into(),
            child: child.into(),
            pose: Isometry3::identity(),
            axis: None,
            axis2: None,
            thread_pitch: 0.0,
        }
    }

    /// Set the first axis.
    pub fn with_axis(mut self, axis: AxisSpec) -> Self {
        self.axis = Some(axis);
        self
    }

    /// Set the second axis.
    pub fn with_axis2(mut self, axis: AxisSpec) -> Self {
        self.axis2 = Some(axis);
        self
    }

    /// Set the joint frame relative to the child link.
    pub fn with_pose(mut self, pose: Isometry3<f64>) -> Self {
        self.pose = pose;
        self
    }
}

/// Spawns entities with the component sets of worlds, models, links,
/// collisions, joints, batteries and sensors.
pub struct SceneBuilder<'a> {
    store: &'a mut SceneStore,
}

impl<'a> SceneBuilder<'a> {
    /// Builder writing into `store`.
    pub fn new(store: &'a mut SceneStore) -> Self {
        Self { store }
    }

    /// World with standard gravity.
    pub fn world(&mut self, name: &str) -> Entity {
        self.world_with_gravity(name, earth_gravity())
    }

    /// World with the given gravity.
    pub fn world_with_gravity(&mut self, name: &str, gravity: Vector3<f64>) -> Entity {
        let world = self.named(name, None);
        self.store.create_component(world, World);
        self.store.create_component(world, Gravity(gravity));
        self.store
            .create_component(world, SimulatedTime(std::time::Duration::ZERO));
        world
    }

    /// Dynamic model placed at `pose` in the world.
    pub fn model(&mut self, world: Entity, name: &str, pose: Isometry3<f64>) -> Entity {
        let model = self.named(name, Some(world));
        self.store.create_component(model, Model);
        self.store.create_component(model, Pose(pose));
        self.store.create_component(model, Static(false));
        model
    }

    /// Immovable model placed at `pose` in the world.
    pub fn static_model(&mut self, world: Entity, name: &str, pose: Isometry3<f64>) -> Entity {
        let model = self.model(world, name, pose);
        self.store.create_component(model, Static(true));
        model
    }

    /// Link with default mass properties. The first link of a model becomes
    /// its canonical link.
    pub fn link(&mut self, model: Entity, name: &str, pose: Isometry3<f64>) -> Entity {
        self.link_with_inertial(model, name, pose, MassProperties::default())
    }

    /// Link with explicit mass properties.
    pub fn link_with_inertial(
        &mut self,
        model: Entity,
        name: &str,
        pose: Isometry3<f64>,
        inertial: MassProperties,
    ) -> Entity {
        let first = self.store.children::<(Link, CanonicalLink)>(model).is_empty();
        let link = self.named(name, Some(model));
        self.store.create_component(link, Link);
        self.store.create_component(link, Pose(pose));
        self.store.create_component(link, Inertial(inertial));
        if first {
            self.store.create_component(link, CanonicalLink);
        }
        link
    }

    /// Collision attached to `link` at `pose`.
    pub fn collision(
        &mut self,
        link: Entity,
        name: &str,
        pose: Isometry3<f64>,
        geometry: GeometryKind,
    ) -> Entity {
        let collision = self.named(name, Some(link));
        self.store.create_component(collision, Collision);
        self.store.create_component(collision, Pose(pose));
        self.store.create_component(collision, Geometry(geometry));
        collision
    }

    /// Joint belonging to `model`.
    pub fn joint(&mut self, model: Entity, spec: JointSpec) -> Entity {
        let joint = self.named(&spec.name, Some(model));
        self.store.create_component(joint, Joint);
        self.store.create_component(joint, JointType(spec.kind));
        self.store.create_component(joint, Pose(spec.pose));
        self.store
            .create_component(joint, ThreadPitch(spec.thread_pitch));
        self.store
            .create_component(joint, ParentLinkName(spec.parent));
        self.store.create_component(joint, ChildLinkName(spec.child));
        if let Some(axis) = spec.axis {
            self.store.create_component(joint, JointAxis(axis));
        }
        if let Some(axis) = spec.axis2 {
            self.store.create_component(joint, JointAxis2(axis));
        }
        joint
    }

    /// Battery powering `model`.
    pub fn battery(&mut self, model: Entity, name: &str, state_of_charge: f64) -> Entity {
        let battery = self.named(name, Some(model));
        self.store
            .create_component(battery, BatterySoC(state_of_charge));
        battery
    }

    /// Sensor rigidly attached to `link` at `pose`.
    pub fn sensor(&mut self, link: Entity, name: &str, pose: Isometry3<f64>) -> Entity {
        let sensor = self.named(name, Some(link));
        self.store.create_component(sensor, Sensor);
        self.store.create_component(sensor, Pose(pose));
        sensor
    }

    fn named(&mut self, name: &str, parent: Option<Entity>) -> Entity {
        let entity = self.store.create_entity();
        self.store.create_component(entity, Name(name.to_string()));
        if let Some(parent) = parent {
            self.store.create_component(entity, ParentEntity(parent));
        }
        entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_link_is_canonical() {
        let mut store = SceneStore::new();
        let mut builder = SceneBuilder::new(&mut store);
        let world = builder.world("default");
        let model = builder.model(world, "robot", Isometry3::identity());
        let base = builder.link(model, "base", Isometry3::identity());
        let arm = builder.link(model, "arm", Isometry3::translation(0.0, 0.0, 1.0));

        assert!(store.has::<CanonicalLink>(base));
        assert!(!store.has::<CanonicalLink>(arm));
        assert_eq!(store.children::<(Link,)>(model), vec![base, arm]);
    }

    #[test]
    fn test_joint_components() {
        let mut store = SceneStore::new();
        let mut builder = SceneBuilder::new(&mut store);
        let world = builder.world("default");
        let model = builder.model(world, "robot", Isometry3::identity());
        let joint = builder.joint(
            model,
            JointSpec::new("hinge", JointKind::Revolute, "base", "arm")
                .with_axis(AxisSpec::new(Vector3::y())),
        );

        assert_eq!(store.parent_of(joint), Some(model));
        assert_eq!(
            store.component::<ChildLinkName>(joint).map(|c| c.0.as_str()),
            Some("arm")
        );
        assert!(store.has::<JointAxis>(joint));
        assert!(!store.has::<JointAxis2>(joint));
    }
}

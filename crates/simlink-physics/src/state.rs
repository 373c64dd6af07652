//! Read-back of simulated state into scene components after a step.
//!
//! Model and link poses are always refreshed. Every other output component
//! is opt-in: it is only written on entities that already carry it.

use nalgebra::Vector3;
use simlink_ecs::components::{
    AngularAcceleration, AngularVelocity, CanonicalLink, ExternalWorldWrenchCmd,
    HistoryOfAppliedJointForces, Joint, JointForce, JointForceCmd, JointPosition,
    JointPositionReset, JointVelocity, JointVelocityCmd, JointVelocityReset, LinearAcceleration,
    LinearVelocity, Link, ParentEntity, Pose, Static, WorldAngularAcceleration,
    WorldAngularVelocity, WorldLinearAcceleration, WorldLinearVelocity, WorldPose,
};
use simlink_ecs::{ComponentData, ComponentState, Entity, SceneStore};

use crate::engine::{FrameData, PhysicsEngine};
use crate::frames::{frame_at_offset, pose_eq, to_body, vector_eq};
use crate::physics::UpdateInfo;
use crate::registry::Registry;

/// Refresh every output component from the engine and consume the tick's commands.
pub(crate) fn read_back(
    store: &mut SceneStore,
    engine: &dyn PhysicsEngine,
    registry: &Registry,
    info: &UpdateInfo,
) {
    update_links(store, engine, registry);
    update_attached_frames(store, engine, registry);
    mirror_joint_forces(store, engine, registry, info);
    clear_consumed_commands(store);
    update_joint_states(store, engine, registry);
}

/// Overwrite an existing component if it changed beyond tolerance and mark it.
fn write_tracked<C, F>(store: &mut SceneStore, entity: Entity, value: C::Data, eq: F)
where
    C: ComponentData,
    F: Fn(&C::Data, &C::Data) -> bool,
{
    if let Some(changed) = store.set_data::<C, F>(entity, value, eq) {
        let state = if changed {
            ComponentState::PeriodicChange
        } else {
            ComponentState::NoChange
        };
        store.set_changed::<C>(entity, state);
    }
}

fn write_vector<C>(store: &mut SceneStore, entity: Entity, value: Vector3<f64>)
where
    C: ComponentData<Data = Vector3<f64>>,
{
    write_tracked::<C, _>(store, entity, value, vector_eq);
}

/// Write the opt-in world and body frame outputs of `entity`.
fn write_frame(store: &mut SceneStore, entity: Entity, frame: &FrameData) {
    write_tracked::<WorldPose, _>(store, entity, frame.pose, pose_eq);
    write_vector::<WorldLinearVelocity>(store, entity, frame.linear_velocity);
    write_vector::<WorldAngularVelocity>(store, entity, frame.angular_velocity);
    write_vector::<WorldLinearAcceleration>(store, entity, frame.linear_acceleration);
    write_vector::<WorldAngularAcceleration>(store, entity, frame.angular_acceleration);

    let pose = &frame.pose;
    write_vector::<LinearVelocity>(store, entity, to_body(pose, &frame.linear_velocity));
    write_vector::<AngularVelocity>(store, entity, to_body(pose, &frame.angular_velocity));
    write_vector::<LinearAcceleration>(store, entity, to_body(pose, &frame.linear_acceleration));
    write_vector::<AngularAcceleration>(store, entity, to_body(pose, &frame.angular_acceleration));
}

fn has_frame_outputs(store: &SceneStore, entity: Entity) -> bool {
    store.has::<WorldPose>(entity)
        || store.has::<WorldLinearVelocity>(entity)
        || store.has::<WorldAngularVelocity>(entity)
        || store.has::<WorldLinearAcceleration>(entity)
        || store.has::<WorldAngularAcceleration>(entity)
        || store.has::<LinearVelocity>(entity)
        || store.has::<AngularVelocity>(entity)
        || store.has::<LinearAcceleration>(entity)
        || store.has::<AngularAcceleration>(entity)
}

fn update_links(store: &mut SceneStore, engine: &dyn PhysicsEngine, registry: &Registry) {
    // Canonical links first: the other links are expressed in the model
    // frame they define.
    let mut links = store.entities::<(Link, Pose, ParentEntity)>();
    links.sort_by_key(|&link| !store.has::<CanonicalLink>(link));

    for entity in links {
        let Some(model) = store.parent_of(entity) else {
            continue;
        };
        if store.data::<Static>(model).unwrap_or(false) {
            continue;
        }
        let Some(link) = registry.links.get_handle(entity) else {
            log::debug!("Link entity [{}] has no physics counterpart", entity);
            continue;
        };
        let Some(frame) = engine.link_frame_data(link) else {
            continue;
        };
        let (Some(local), Some(model_pose)) =
            (store.data::<Pose>(entity), store.data::<Pose>(model))
        else {
            log::error!("The pose of model [{}] could not be found", model);
            continue;
        };

        if store.has::<CanonicalLink>(entity) {
            // The canonical link never moves in its model: the model follows it.
            if let Some(pose) = store.component_mut::<Pose>(model) {
                pose.0 = frame.pose * local.inverse();
            }
            store.set_changed::<Pose>(model, ComponentState::PeriodicChange);
        } else {
            if let Some(pose) = store.component_mut::<Pose>(entity) {
                pose.0 = model_pose.inverse() * frame.pose;
            }
            store.set_changed::<Pose>(entity, ComponentState::PeriodicChange);
        }

        write_frame(store, entity, &frame);
    }
}

/// Sensors, collisions and other entities rigidly attached to a link.
fn update_attached_frames(store: &mut SceneStore, engine: &dyn PhysicsEngine, registry: &Registry) {
    for entity in store.entities::<(Pose, ParentEntity)>() {
        if store.has::<Link>(entity) || !has_frame_outputs(store, entity) {
            continue;
        }
        let (Some(parent), Some(offset)) = (store.parent_of(entity), store.data::<Pose>(entity))
        else {
            continue;
        };
        let Some(link) = registry.links.get_handle(parent) else {
            continue;
        };
        if let Some(link_frame) = engine.link_frame_data(link) {
            write_frame(store, entity, &frame_at_offset(&link_frame, &offset));
        }
    }
}

fn mirror_joint_forces(
    store: &mut SceneStore,
    engine: &dyn PhysicsEngine,
    registry: &Registry,
    info: &UpdateInfo,
) {
    for entity in store.entities::<(Joint, JointForce, JointForceCmd)>() {
        let Some(command) = store.data::<JointForceCmd>(entity) else {
            continue;
        };
        let off = store
            .parent_of(entity)
            .is_some_and(|model| registry.is_off(model));
        let applied = if off {
            let dof = registry
                .joints
                .get_handle(entity)
                .and_then(|joint| engine.joint_dof(joint))
                .unwrap_or(command.len());
            vec![0.0; dof]
        } else {
            command
        };

        let Some(force) = store.component_mut::<JointForce>(entity) else {
            continue;
        };
        if force.0.len() != applied.len() {
            log::warn!(
                "There is a mismatch in the degrees of freedom of joint [{}] between \
                 its force and its force command",
                entity
            );
        }
        force.0.clone_from(&applied);

        // The history only grows with the steps that actually ran.
        if info.paused {
            continue;
        }
        if let Some(history) = store.component_mut::<HistoryOfAppliedJointForces>(entity) {
            for value in &applied {
                history.0.push(*value);
            }
        }
    }
}

fn clear_consumed_commands(store: &mut SceneStore) {
    for entity in store.entities::<(JointPositionReset,)>() {
        store.remove_component::<JointPositionReset>(entity);
    }
    for entity in store.entities::<(JointVelocityReset,)>() {
        store.remove_component::<JointVelocityReset>(entity);
    }
    for entity in store.entities::<(JointForceCmd,)>() {
        if let Some(command) = store.component_mut::<JointForceCmd>(entity) {
            command.0.iter_mut().for_each(|f| *f = 0.0);
        }
    }
    for entity in store.entities::<(ExternalWorldWrenchCmd,)>() {
        if let Some(command) = store.component_mut::<ExternalWorldWrenchCmd>(entity) {
            command.0.clear();
        }
    }
    for entity in store.entities::<(JointVelocityCmd,)>() {
        if let Some(command) = store.component_mut::<JointVelocityCmd>(entity) {
            command.0.iter_mut().for_each(|v| *v = 0.0);
        }
    }
}

fn update_joint_states(store: &mut SceneStore, engine: &dyn PhysicsEngine, registry: &Registry) {
    for entity in store.entities::<(Joint, JointPosition)>() {
        let Some(joint) = registry.joints.get_handle(entity) else {
            continue;
        };
        let dof = engine.joint_dof(joint).unwrap_or(0);
        let values: Vec<f64> = (0..dof)
            .map(|i| engine.joint_position(joint, i).unwrap_or(0.0))
            .collect();
        if let Some(position) = store.component_mut::<JointPosition>(entity) {
            position.0 = values;
        }
    }

    for entity in store.entities::<(Joint, JointVelocity)>() {
        let Some(joint) = registry.joints.get_handle(entity) else {
            continue;
        };
        let dof = engine.joint_dof(joint).unwrap_or(0);
        let values: Vec<f64> = (0..dof)
            .map(|i| engine.joint_velocity(joint, i).unwrap_or(0.0))
            .collect();
        if let Some(velocity) = store.component_mut::<JointVelocity>(entity) {
            velocity.0 = values;
        }
    }
}

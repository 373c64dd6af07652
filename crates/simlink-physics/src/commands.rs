//! Forwarding of command components to the engine before a step.

use nalgebra::Isometry3;
use simlink_ecs::components::{
    BatterySoC, CanonicalLink, ExternalWorldWrenchCmd, ExternalWorldWrenchCmdWithDuration, Joint,
    JointForceCmd, JointPositionReset, JointVelocityCmd, JointVelocityReset, Link, Model,
    ParentEntity, Pose, Static, Wrench, WorldPoseCmd, WorldVelocityCmd,
};
use simlink_ecs::{ComponentState, Entity, SceneStore};

use crate::engine::{JointId, LinkId, PhysicsEngine};
use crate::error::PhysicsError;
use crate::frames::pose_eq;
use crate::physics::UpdateInfo;
use crate::registry::Registry;

/// Apply every pending command of the tick.
pub(crate) fn apply(
    store: &mut SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &mut Registry,
    info: &UpdateInfo,
) {
    update_batteries(store, registry);
    apply_joint_commands(store, engine, registry);
    apply_wrenches(store, engine, registry, info);
    apply_world_pose_commands(store, engine, registry);
    apply_world_velocity_commands(store, engine, registry);
    clear_world_commands(store);
}

fn update_batteries(store: &SceneStore, registry: &mut Registry) {
    for battery in store.entities::<(BatterySoC, ParentEntity)>() {
        let (Some(model), Some(charge)) =
            (store.parent_of(battery), store.data::<BatterySoC>(battery))
        else {
            continue;
        };
        if let Some(off) = registry.batteries.get_mut(&model) {
            if *off != (charge <= 0.0) {
                log::debug!("Model [{}] switched {}", model, if *off { "on" } else { "off" });
            }
            *off = charge <= 0.0;
        }
    }
}

/// Number of values to apply when a command of `len` values targets a
/// joint with `dof` degrees of freedom.
pub(crate) fn overlapping(len: usize, dof: usize, joint: Entity, command: &str) -> usize {
    if len != dof {
        log::warn!(
            "There is a mismatch in the degrees of freedom between joint [{}] ({} DOF) \
             and its {} ({} values). Only the first {} are used.",
            joint,
            dof,
            command,
            len,
            len.min(dof)
        );
    }
    len.min(dof)
}

fn report(result: Result<(), PhysicsError>, joint: Entity) {
    if let Err(err) = result {
        log::warn!("Failed to command joint [{}]: {}", joint, err);
    }
}

fn apply_joint_commands(
    store: &SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &Registry,
) {
    for entity in store.entities::<(Joint,)>() {
        let Some(joint) = registry.joints.get_handle(entity) else {
            continue;
        };
        let Some(dof) = engine.joint_dof(joint) else {
            continue;
        };

        let off = store
            .parent_of(entity)
            .is_some_and(|model| registry.is_off(model));
        if off {
            for i in 0..dof {
                report(engine.set_joint_force(joint, i, 0.0), entity);
                report(engine.set_joint_velocity_command(joint, i, 0.0), entity);
            }
            continue;
        }

        apply_joint(store, engine, entity, joint, dof);
    }
}

fn apply_joint(
    store: &SceneStore,
    engine: &mut dyn PhysicsEngine,
    entity: Entity,
    joint: JointId,
    dof: usize,
) {
    let velocity_reset = store.component::<JointVelocityReset>(entity);
    if let Some(reset) = velocity_reset {
        let n = overlapping(reset.0.len(), dof, entity, "velocity reset");
        for (i, v) in reset.0.iter().take(n).enumerate() {
            report(engine.set_joint_velocity(joint, i, *v), entity);
        }
    }

    if let Some(reset) = store.component::<JointPositionReset>(entity) {
        let n = overlapping(reset.0.len(), dof, entity, "position reset");
        for (i, q) in reset.0.iter().take(n).enumerate() {
            report(engine.set_joint_position(joint, i, *q), entity);
        }
    }

    if let Some(force) = store.component::<JointForceCmd>(entity) {
        let n = overlapping(force.0.len(), dof, entity, "force command");
        for (i, f) in force.0.iter().take(n).enumerate() {
            report(engine.set_joint_force(joint, i, *f), entity);
        }
    } else if let Some(velocity) = store.component::<JointVelocityCmd>(entity) {
        if velocity_reset.is_some() {
            log::warn!(
                "Found both a velocity reset and a velocity command on joint [{}]. \
                 The command is ignored.",
                entity
            );
            return;
        }
        let n = overlapping(velocity.0.len(), dof, entity, "velocity command");
        for (i, v) in velocity.0.iter().take(n).enumerate() {
            report(engine.set_joint_velocity_command(joint, i, *v), entity);
        }
    }
}

fn apply_wrench(engine: &mut dyn PhysicsEngine, link: LinkId, entity: Entity, wrench: &Wrench) {
    let result = engine
        .add_link_external_force(link, wrench.force)
        .and_then(|()| engine.add_link_external_torque(link, wrench.torque));
    if let Err(err) = result {
        log::warn!("Failed to apply wrench on link [{}]: {}", entity, err);
    }
}

fn apply_wrenches(
    store: &mut SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &Registry,
    info: &UpdateInfo,
) {
    // Rapier only drains its force accumulators when it steps.
    if info.paused {
        return;
    }
    for entity in store.entities::<(ExternalWorldWrenchCmd,)>() {
        let (Some(link), Some(wrench)) = (
            registry.links.get_handle(entity),
            store.data::<ExternalWorldWrenchCmd>(entity),
        ) else {
            continue;
        };
        apply_wrench(engine, link, entity, &wrench);
    }

    for entity in store.entities::<(ExternalWorldWrenchCmdWithDuration,)>() {
        let Some(schedule) = store.component_mut::<ExternalWorldWrenchCmdWithDuration>(entity)
        else {
            continue;
        };
        schedule.0.clean_expired(info.sim_time);
        let total = schedule.0.total();
        if let Some(link) = registry.links.get_handle(entity) {
            apply_wrench(engine, link, entity, &total);
        }
    }
}

fn canonical_pose(store: &SceneStore, model: Entity) -> Isometry3<f64> {
    store
        .children::<(Link, CanonicalLink, Pose)>(model)
        .first()
        .and_then(|&link| store.data::<Pose>(link))
        .unwrap_or_else(Isometry3::identity)
}

fn apply_world_pose_commands(
    store: &mut SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &Registry,
) {
    for entity in store.entities::<(Model, WorldPoseCmd)>() {
        let (Some(model), Some(target)) = (
            registry.models.get_handle(entity),
            store.data::<WorldPoseCmd>(entity),
        ) else {
            continue;
        };

        if store.data::<Static>(entity).unwrap_or(false) {
            let changed = store.set_data::<Pose, _>(entity, target, pose_eq);
            let state = if changed == Some(true) {
                ComponentState::OneTimeChange
            } else {
                ComponentState::NoChange
            };
            store.set_changed::<Pose>(entity, state);
            continue;
        }

        let Some(group) = engine.find_free_group(model) else {
            log::warn!(
                "Model [{}] has no free group, its world pose can't be set",
                entity
            );
            continue;
        };
        let pose = target * canonical_pose(store, entity);
        if let Err(err) = engine.set_free_group_world_pose(&group, pose) {
            log::warn!("Failed to set the world pose of model [{}]: {}", entity, err);
        }
    }
}

fn apply_world_velocity_commands(
    store: &SceneStore,
    engine: &mut dyn PhysicsEngine,
    registry: &Registry,
) {
    for entity in store.entities::<(Model, WorldVelocityCmd)>() {
        let (Some(model), Some(twist)) = (
            registry.models.get_handle(entity),
            store.data::<WorldVelocityCmd>(entity),
        ) else {
            continue;
        };
        let Some(group) = engine.find_free_group(model) else {
            log::warn!(
                "Failed to find the free group of model [{}]. \
                 Linear and angular velocities are not set.",
                entity
            );
            continue;
        };
        let result = engine
            .set_free_group_world_linear_velocity(&group, twist.linear)
            .and_then(|()| engine.set_free_group_world_angular_velocity(&group, twist.angular));
        if let Err(err) = result {
            log::warn!("Failed to set the velocity of model [{}]: {}", entity, err);
        }
    }
}

fn clear_world_commands(store: &mut SceneStore) {
    for entity in store.entities::<(WorldPoseCmd,)>() {
        store.remove_component::<WorldPoseCmd>(entity);
    }
    for entity in store.entities::<(WorldVelocityCmd,)>() {
        store.remove_component::<WorldVelocityCmd>(entity);
    }
}

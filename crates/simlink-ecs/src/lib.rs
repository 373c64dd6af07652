#![warn(missing_docs)]

//! Entity/component scene store for the simlink physics bridge.
//!
//! Entities are opaque ids; everything known about them lives in typed
//! component tables. The store supports the subscription style the bridge
//! relies on:
//!
//! - every entity carrying a component set (`store.entities::<(Link, Pose)>()`),
//! - only entities created since the last tick (`new_entities`),
//! - only entities scheduled for removal (`removed_entities`),
//!
//! plus a per-component changed-state marker.
//!
//! # Example
//!
//! ```
//! use nalgebra::Isometry3;
//! use simlink_ecs::{SceneBuilder, SceneStore};
//! use simlink_ecs::components::{Link, Pose};
//!
//! let mut store = SceneStore::new();
//! let mut builder = SceneBuilder::new(&mut store);
//! let world = builder.world("default");
//! let model = builder.model(world, "box", Isometry3::translation(0.0, 0.0, 1.0));
//! let link = builder.link(model, "body", Isometry3::identity());
//!
//! assert_eq!(store.entities::<(Link, Pose)>(), vec![link]);
//! ```

mod builder;
pub mod components;
mod entity;
mod store;

pub use builder::{earth_gravity, JointSpec, SceneBuilder};
pub use entity::Entity;
pub use store::{Component, ComponentData, ComponentSet, ComponentState, SceneStore};

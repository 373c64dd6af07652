//! The component catalogue shared by scene producers and the physics bridge.
//!
//! - [`scene`]: structural description (what exists and how it is attached).
//! - [`command`]: requests consumed by the bridge before stepping.
//! - [`state`]: opt-in outputs written by the bridge after stepping.

/// Declare a unit marker component.
macro_rules! marker_component {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        pub struct $name;

        impl $crate::store::Component for $name {}
    };
}

/// Declare a newtype component carrying a single payload.
macro_rules! data_component {
    ($(#[$meta:meta])* $name:ident($ty:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub $ty);

        impl $crate::store::Component for $name {}

        impl $crate::store::ComponentData for $name {
            type Data = $ty;

            fn data(&self) -> &$ty {
                &self.0
            }

            fn data_mut(&mut self) -> &mut $ty {
                &mut self.0
            }
        }
    };
}

pub mod command;
pub mod scene;
pub mod state;

pub use command::*;
pub use scene::*;
pub use state::*;

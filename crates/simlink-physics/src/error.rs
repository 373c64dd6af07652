//! Error types for the physics bridge.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or driving the physics engine.
#[derive(Error, Debug)]
pub enum PhysicsError {
    /// The parent object of a construction request is not known to the engine.
    #[error("Parent {kind} not found for {name}")]
    MissingParent {
        /// Kind of the missing parent (world, model, link).
        kind: &'static str,
        /// Name of the object being constructed.
        name: String,
    },

    /// The engine cannot represent this joint type.
    #[error("Joint {name} has unsupported type {kind}")]
    UnsupportedJoint {
        /// Joint name.
        name: String,
        /// Joint type, as declared.
        kind: String,
    },

    /// A joint references a link that does not exist.
    #[error("Link not found: {0}")]
    MissingLink(String),

    /// A collision geometry could not be turned into an engine shape.
    #[error("Cannot build collision shape {name}: {reason}")]
    CollisionShape {
        /// Collision name.
        name: String,
        /// What was wrong with the geometry.
        reason: String,
    },

    /// A handle does not refer to a live engine object.
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// A mesh resource could not be located.
    #[error("Mesh resource not found: {0}")]
    MeshNotFound(String),

    /// A mesh resource was found but could not be parsed.
    #[error("Failed to load mesh {path}: {reason}")]
    MeshLoad {
        /// Resolved file path.
        path: PathBuf,
        /// Loader message.
        reason: String,
    },

    /// Malformed configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O failure while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A named scene entity does not exist.
    #[error("No {kind} named {name} in the scene")]
    UnknownEntity {
        /// Kind of the entity (joint, link).
        kind: &'static str,
        /// Requested name.
        name: String,
    },

    /// A time step that is negative, not finite or too large.
    #[error("Invalid time step: {0} s")]
    InvalidTimeStep(f64),

    /// No physics engine is available.
    #[error("Physics engine unavailable: {0}")]
    EngineUnavailable(String),
}

//! Bridge configuration, loadable from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::ColliderStrategy;
use crate::error::PhysicsError;

/// Physics backend to instantiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Rapier3d.
    #[default]
    Rapier,
}

/// Configuration of the physics system.
///
/// Every field has a default, so an empty TOML document is valid:
///
/// ```toml
/// engine = "rapier"
/// mesh_strategy = "tri_mesh"
/// resource_paths = ["/opt/models"]
/// motor_max_force = 500.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Backend.
    pub engine: EngineKind,
    /// Collision shape generated for mesh geometries.
    pub mesh_strategy: ColliderStrategy,
    /// Extra directories searched for mesh resources.
    pub resource_paths: Vec<PathBuf>,
    /// Maximum force (or torque) a velocity-command motor may exert.
    pub motor_max_force: f64,
    /// Gain of the velocity-command motor.
    pub motor_damping: f64,
    /// Contacts farther apart than this distance are not reported.
    pub contact_prediction: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Rapier,
            mesh_strategy: ColliderStrategy::ConvexHull,
            resource_paths: Vec::new(),
            motor_max_force: 1000.0,
            motor_damping: 100.0,
            contact_prediction: 0.0,
        }
    }
}

impl PhysicsConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, PhysicsError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PhysicsError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PhysicsConfig::from_toml_str("").unwrap();
        assert_eq!(config, PhysicsConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = PhysicsConfig::from_toml_str(
            r#"
            mesh_strategy = "tri_mesh"
            resource_paths = ["/opt/models", "meshes"]
            motor_max_force = 25.0
            "#,
        )
        .unwrap();

        assert_eq!(config.engine, EngineKind::Rapier);
        assert_eq!(config.mesh_strategy, ColliderStrategy::TriMesh);
        assert_eq!(config.resource_paths.len(), 2);
        assert_eq!(config.motor_max_force, 25.0);
        assert_eq!(config.motor_damping, 100.0);
    }

    #[test]
    fn test_unknown_engine_is_rejected() {
        let err = PhysicsConfig::from_toml_str("engine = \"bullet\"").unwrap_err();
        assert!(matches!(err, PhysicsError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PhysicsConfig::from_file("/nonexistent/simlink.toml").unwrap_err();
        assert!(matches!(err, PhysicsError::Io(_)));
    }
}

//! Structural components describing worlds, models, links, collisions and joints.

use std::time::Duration;

use nalgebra::{Isometry3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

marker_component!(
    /// Marks a world entity.
    World
);
marker_component!(
    /// Marks a model entity. Its parent is a world.
    Model
);
marker_component!(
    /// Marks a link entity. Its parent is a model.
    Link
);
marker_component!(
    /// Marks a collision entity. Its parent is a link.
    Collision
);
marker_component!(
    /// Marks a joint entity. Its parent is a model.
    Joint
);
marker_component!(
    /// Marks a sensor entity. Its parent is a link.
    Sensor
);
marker_component!(
    /// Marks the link whose pose defines its model's pose.
    CanonicalLink
);

data_component!(
    /// Human-readable name, unique among siblings.
    Name(String)
);
data_component!(
    /// Pose relative to the parent entity (world-relative for models).
    Pose(Isometry3<f64>)
);
data_component!(
    /// Owning entity.
    ParentEntity(Entity)
);
data_component!(
    /// World gravity vector.
    Gravity(Vector3<f64>)
);
data_component!(
    /// Whether a model is immovable.
    Static(bool)
);
data_component!(
    /// Link mass properties.
    Inertial(MassProperties)
);
data_component!(
    /// Collision geometry.
    Geometry(GeometryKind)
);
data_component!(
    /// Contact material of a collision.
    CollisionSurface(Surface)
);
data_component!(
    /// Joint type.
    JointType(JointKind)
);
data_component!(
    /// First joint axis.
    JointAxis(AxisSpec)
);
data_component!(
    /// Second joint axis, for two-axis joints.
    JointAxis2(AxisSpec)
);
data_component!(
    /// Screw joint thread pitch.
    ThreadPitch(f64)
);
data_component!(
    /// Name of a joint's parent link, or `world`.
    ParentLinkName(String)
);
data_component!(
    /// Name of a joint's child link.
    ChildLinkName(String)
);
data_component!(
    /// Battery state of charge. The battery entity's parent is the powered model.
    BatterySoC(f64)
);
data_component!(
    /// Simulated time of a world after the current step.
    SimulatedTime(Duration)
);

/// Mass, center of mass and principal moments of a link, in the link frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    /// Mass in kg.
    pub mass: f64,
    /// Center of mass in the link frame.
    pub center_of_mass: Vector3<f64>,
    /// Principal moments of inertia (diagonal of the inertia tensor).
    pub principal_moments: Vector3<f64>,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            mass: 1.0,
            center_of_mass: Vector3::zeros(),
            principal_moments: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl MassProperties {
    /// Solid box of the given full size.
    pub fn solid_box(mass: f64, size: Vector3<f64>) -> Self {
        let k = mass / 12.0;
        Self {
            mass,
            center_of_mass: Vector3::zeros(),
            principal_moments: Vector3::new(
                k * (size.y * size.y + size.z * size.z),
                k * (size.x * size.x + size.z * size.z),
                k * (size.x * size.x + size.y * size.y),
            ),
        }
    }

    /// Solid sphere.
    pub fn solid_sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self {
            mass,
            center_of_mass: Vector3::zeros(),
            principal_moments: Vector3::new(i, i, i),
        }
    }
}

/// Collision geometry, expressed in the collision frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometryKind {
    /// Box centered at the origin.
    Box {
        /// Full size along each axis.
        size: Vector3<f64>,
    },
    /// Sphere centered at the origin.
    Sphere {
        /// Radius.
        radius: f64,
    },
    /// Cylinder along Z, centered at the origin.
    Cylinder {
        /// Radius.
        radius: f64,
        /// Full length.
        length: f64,
    },
    /// Capsule along Z, centered at the origin.
    Capsule {
        /// Radius.
        radius: f64,
        /// Length of the cylindrical section.
        length: f64,
    },
    /// Half-space bounded by a plane through the origin.
    Plane {
        /// Plane normal.
        normal: Vector3<f64>,
        /// Visual extent; ignored by collision.
        size: Vector2<f64>,
    },
    /// Triangle mesh loaded from a resource.
    Mesh(MeshShape),
}

/// Reference to a mesh resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshShape {
    /// Resource URI (`file://`, `model://`, absolute or relative path).
    pub uri: String,
    /// Path of the description file that declared the mesh, used to resolve
    /// relative URIs.
    pub file_path: Option<String>,
    /// Per-axis scale.
    pub scale: Vector3<f64>,
}

impl MeshShape {
    /// Unscaled mesh at `uri`.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            file_path: None,
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

/// Contact material parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    /// Coulomb friction coefficient.
    pub friction: f64,
    /// Coefficient of restitution.
    pub restitution: f64,
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            friction: 1.0,
            restitution: 0.0,
        }
    }
}

/// Kinds of joint a scene may declare. Not every engine supports all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    /// No relative motion.
    Fixed,
    /// Rotation about one axis, with limits.
    Revolute,
    /// Rotation about one axis, unlimited.
    Continuous,
    /// Translation along one axis.
    Prismatic,
    /// Free rotation about a point.
    Ball,
    /// Two orthogonal rotation axes.
    Universal,
    /// Coupled rotation and translation.
    Screw,
    /// Gear coupling between two joints.
    Gearbox,
    /// Two independent rotation axes.
    Revolute2,
}

impl JointKind {
    /// Nominal degrees of freedom of the joint kind.
    pub fn dof(self) -> usize {
        match self {
            JointKind::Fixed | JointKind::Gearbox => 0,
            JointKind::Revolute | JointKind::Continuous | JointKind::Prismatic | JointKind::Screw => 1,
            JointKind::Universal | JointKind::Revolute2 => 2,
            JointKind::Ball => 3,
        }
    }
}

/// Joint axis with limits, expressed in the joint frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    /// Axis direction.
    pub xyz: Vector3<f64>,
    /// Lower position limit.
    pub lower: f64,
    /// Upper position limit.
    pub upper: f64,
    /// Maximum effort; negative means unlimited.
    pub effort: f64,
}

impl Default for AxisSpec {
    fn default() -> Self {
        Self {
            xyz: Vector3::z(),
            lower: -1e16,
            upper: 1e16,
            effort: -1.0,
        }
    }
}

impl AxisSpec {
    /// Unlimited axis along `xyz`.
    pub fn new(xyz: Vector3<f64>) -> Self {
        Self {
            xyz,
            ..Self::default()
        }
    }

    /// Same axis with position limits.
    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Whether the limits are finite enough to be enforced.
    pub fn is_limited(&self) -> bool {
        self.lower > -1e15 || self.upper < 1e15
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_box_inertia() {
        let props = MassProperties::solid_box(12.0, Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(props.principal_moments.x, 13.0);
        assert_relative_eq!(props.principal_moments.y, 10.0);
        assert_relative_eq!(props.principal_moments.z, 5.0);
    }

    #[test]
    fn test_joint_dof() {
        assert_eq!(JointKind::Fixed.dof(), 0);
        assert_eq!(JointKind::Revolute.dof(), 1);
        assert_eq!(JointKind::Universal.dof(), 2);
        assert_eq!(JointKind::Ball.dof(), 3);
    }

    #[test]
    fn test_geometry_serde() {
        let geometry = GeometryKind::Box {
            size: Vector3::new(1.0, 1.0, 1.0),
        };
        let json = serde_json::to_string(&geometry).unwrap();
        assert!(json.contains("\"type\":\"box\""));
        let back: GeometryKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, geometry);
    }

    #[test]
    fn test_default_axis_is_unlimited() {
        assert!(!AxisSpec::default().is_limited());
        assert!(AxisSpec::new(Vector3::x()).with_limits(-1.0, 1.0).is_limited());
    }
}

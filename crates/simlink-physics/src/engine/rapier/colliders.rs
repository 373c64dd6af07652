//! Collision shape generation from scene geometry.

use std::f32::consts::FRAC_PI_2;

use nalgebra::{Isometry3, Point3, UnitQuaternion, UnitVector3, Vector3};
use parry3d::shape::{ConvexPolyhedron, SharedShape, TriMesh};
use serde::{Deserialize, Serialize};
use simlink_ecs::components::GeometryKind;

use crate::error::PhysicsError;
use crate::mesh::TriangleMesh;

/// How a mesh geometry is turned into a collider.
///
/// Configured once per engine through `mesh_strategy`; primitives ignore it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColliderStrategy {
    /// Hull around every vertex. Flat meshes fall back to a box.
    #[default]
    ConvexHull,
    /// The triangles themselves. Only meaningful on static or slow bodies.
    TriMesh,
    /// Box spanning the vertex bounds.
    Aabb,
}

fn shape_error(name: &str, reason: impl Into<String>) -> PhysicsError {
    PhysicsError::CollisionShape {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Build the shape of a primitive geometry.
///
/// Returns the shape and the offset to compose with the collision pose:
/// Parry cylinders run along Y while scene cylinders run along Z.
pub(super) fn primitive_shape(
    geometry: &GeometryKind,
    name: &str,
) -> Result<(SharedShape, Isometry3<f32>), PhysicsError> {
    let fail = |reason: &str| shape_error(name, reason);

    match geometry {
        GeometryKind::Box { size } => {
            if size.iter().any(|s| *s <= 0.0) {
                return Err(fail("box size must be positive"));
            }
            let half = size.cast::<f32>() / 2.0;
            Ok((SharedShape::cuboid(half.x, half.y, half.z), Isometry3::identity()))
        }
        GeometryKind::Sphere { radius } => {
            if *radius <= 0.0 {
                return Err(fail("sphere radius must be positive"));
            }
            Ok((SharedShape::ball(*radius as f32), Isometry3::identity()))
        }
        GeometryKind::Cylinder { radius, length } => {
            if *radius <= 0.0 || *length <= 0.0 {
                return Err(fail("cylinder dimensions must be positive"));
            }
            let y_to_z = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2);
            Ok((
                SharedShape::cylinder(*length as f32 / 2.0, *radius as f32),
                Isometry3::from_parts(Vector3::zeros().into(), y_to_z),
            ))
        }
        GeometryKind::Capsule { radius, length } => {
            if *radius <= 0.0 || *length < 0.0 {
                return Err(fail("capsule dimensions must be positive"));
            }
            Ok((
                SharedShape::capsule_z(*length as f32 / 2.0, *radius as f32),
                Isometry3::identity(),
            ))
        }
        GeometryKind::Plane { normal, .. } => {
            let normal = UnitVector3::try_new(normal.cast::<f32>(), 1.0e-6)
                .ok_or_else(|| fail("plane normal must be non-zero"))?;
            Ok((SharedShape::halfspace(normal), Isometry3::identity()))
        }
        GeometryKind::Mesh(_) => Err(fail("mesh geometry needs a loaded mesh")),
    }
}

/// Turn a loaded mesh into a collider shape, scaling each vertex per axis
/// first. `name` only appears in errors.
pub(super) fn mesh_to_collider(
    mesh: &TriangleMesh,
    scale: &Vector3<f64>,
    strategy: ColliderStrategy,
    name: &str,
) -> Result<SharedShape, PhysicsError> {
    let scale = scale.cast::<f32>();
    let points: Vec<Point3<f32>> = mesh
        .vertices
        .chunks_exact(3)
        .map(|v| Point3::from(Vector3::new(v[0], v[1], v[2]).component_mul(&scale)))
        .collect();
    if points.is_empty() || mesh.indices.len() < 3 {
        return Err(shape_error(name, "mesh has no triangles"));
    }

    match strategy {
        ColliderStrategy::Aabb => bounding_box(&points, name),
        ColliderStrategy::ConvexHull if points.len() < 4 => {
            Err(shape_error(name, "a hull needs four or more vertices"))
        }
        ColliderStrategy::ConvexHull => ConvexPolyhedron::from_convex_hull(&points)
            .map(|hull| Ok(SharedShape::new(hull)))
            // Coplanar points have no hull.
            .unwrap_or_else(|| bounding_box(&points, name)),
        ColliderStrategy::TriMesh => {
            let triangles = triangles(&mesh.indices, points.len(), name)?;
            TriMesh::new(points, triangles)
                .map(SharedShape::new)
                .map_err(|e| shape_error(name, format!("parry rejected the triangles: {e:?}")))
        }
    }
}

fn triangles(indices: &[u32], vertex_count: usize, name: &str) -> Result<Vec<[u32; 3]>, PhysicsError> {
    indices
        .chunks_exact(3)
        .map(|t| match t.iter().find(|&&i| i as usize >= vertex_count) {
            Some(bad) => Err(shape_error(
                name,
                format!("index {bad} past the {vertex_count} vertices"),
            )),
            None => Ok([t[0], t[1], t[2]]),
        })
        .collect()
}

fn bounding_box(points: &[Point3<f32>], name: &str) -> Result<SharedShape, PhysicsError> {
    let (lo, hi) = points.iter().fold(
        (Vector3::repeat(f32::INFINITY), Vector3::repeat(f32::NEG_INFINITY)),
        |(lo, hi), p| (lo.inf(&p.coords), hi.sup(&p.coords)),
    );
    let half = (hi - lo) * 0.5;
    if !half.iter().all(|h| h.is_finite()) {
        return Err(shape_error(name, "vertex bounds are not finite"));
    }
    Ok(SharedShape::cuboid(half.x, half.y, half.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Square pyramid: base on z = 0 spanning [-1, 1], apex at z = 2.
    fn pyramid() -> TriangleMesh {
        TriangleMesh {
            vertices: vec![
                -1.0, -1.0, 0.0, //
                1.0, -1.0, 0.0, //
                1.0, 1.0, 0.0, //
                -1.0, 1.0, 0.0, //
                0.0, 0.0, 2.0,
            ],
            indices: vec![0, 2, 1, 0, 3, 2, 0, 1, 4, 1, 2, 4, 2, 3, 4, 3, 0, 4],
        }
    }

    fn ones() -> Vector3<f64> {
        Vector3::repeat(1.0)
    }

    #[test]
    fn hull_strategy_builds_polyhedron() {
        let shape =
            mesh_to_collider(&pyramid(), &ones(), ColliderStrategy::ConvexHull, "pyramid").unwrap();
        assert_eq!(shape.as_convex_polyhedron().unwrap().points().len(), 5);
    }

    #[test]
    fn trimesh_strategy_keeps_triangles() {
        let shape =
            mesh_to_collider(&pyramid(), &ones(), ColliderStrategy::TriMesh, "pyramid").unwrap();
        assert_eq!(shape.as_trimesh().unwrap().indices().len(), 6);
    }

    #[test]
    fn trimesh_rejects_dangling_index() {
        let mut mesh = pyramid();
        mesh.indices[5] = 9;
        let err = mesh_to_collider(&mesh, &ones(), ColliderStrategy::TriMesh, "broken").unwrap_err();
        assert!(matches!(err, PhysicsError::CollisionShape { name, .. } if name == "broken"));
    }

    #[test]
    fn box_strategy_applies_scale() {
        let shape = mesh_to_collider(
            &pyramid(),
            &Vector3::new(0.5, 2.0, 1.0),
            ColliderStrategy::Aabb,
            "pyramid",
        )
        .unwrap();
        let half = shape.as_cuboid().unwrap().half_extents;
        assert!((half - Vector3::new(0.5, 2.0, 1.0)).norm() < 1e-6);
    }

    #[test]
    fn mesh_without_triangles_is_rejected() {
        for strategy in [ColliderStrategy::ConvexHull, ColliderStrategy::TriMesh, ColliderStrategy::Aabb] {
            let err = mesh_to_collider(&TriangleMesh::default(), &ones(), strategy, "empty").unwrap_err();
            assert!(matches!(err, PhysicsError::CollisionShape { .. }));
        }
    }

    #[test]
    fn cylinder_is_turned_onto_z() {
        let (cylinder, offset) = primitive_shape(
            &GeometryKind::Cylinder {
                radius: 0.5,
                length: 2.0,
            },
            "cyl",
        )
        .unwrap();
        let cylinder = cylinder.as_cylinder().unwrap();
        assert!((cylinder.half_height - 1.0).abs() < 1e-6);
        assert!((offset * Vector3::y() - Vector3::z()).norm() < 1e-6);
    }

    #[test]
    fn degenerate_primitives_are_rejected() {
        let err = primitive_shape(&GeometryKind::Sphere { radius: 0.0 }, "ball").unwrap_err();
        assert!(matches!(err, PhysicsError::CollisionShape { .. }));
        let err = primitive_shape(
            &GeometryKind::Plane {
                normal: Vector3::zeros(),
                size: nalgebra::Vector2::new(1.0, 1.0),
            },
            "floor",
        )
        .unwrap_err();
        assert!(matches!(err, PhysicsError::CollisionShape { .. }));
    }
}

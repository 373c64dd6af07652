//! Mesh resource resolution and loading.

use std::env;
use std::path::{Path, PathBuf};

use simlink_ecs::components::MeshShape;

use crate::error::PhysicsError;

/// Environment variable listing extra mesh search directories.
pub const RESOURCE_PATH_ENV: &str = "SIMLINK_RESOURCE_PATH";

/// Indexed triangle mesh with flat `f32` buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Vertex positions as `[x0, y0, z0, x1, ...]`.
    pub vertices: Vec<f32>,
    /// Triangle vertex indices as `[a0, b0, c0, a1, ...]`.
    pub indices: Vec<u32>,
}

impl TriangleMesh {
    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn append(&mut self, positions: &[f32], indices: &[u32]) {
        let offset = u32::try_from(self.vertex_count()).unwrap_or(u32::MAX);
        self.vertices.extend_from_slice(positions);
        self.indices.extend(indices.iter().map(|i| i + offset));
    }
}

/// Resolves mesh URIs against the declaring file and a list of search directories.
#[derive(Debug, Clone, Default)]
pub struct ResourceLocator {
    search_paths: Vec<PathBuf>,
}

impl ResourceLocator {
    /// Locator searching `search_paths` in order.
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Locator searching `configured` first, then every entry of
    /// [`RESOURCE_PATH_ENV`].
    pub fn from_config_and_env(configured: &[PathBuf]) -> Self {
        let mut search_paths = configured.to_vec();
        if let Some(value) = env::var_os(RESOURCE_PATH_ENV) {
            search_paths.extend(env::split_paths(&value));
        }
        Self::new(search_paths)
    }

    /// Search directories, in lookup order.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Resolve a mesh resource to an existing file.
    ///
    /// `file://` and `model://` prefixes are stripped. Absolute paths are
    /// taken as-is; relative ones are tried next to the declaring file, then
    /// under every search directory.
    pub fn resolve(&self, mesh: &MeshShape) -> Result<PathBuf, PhysicsError> {
        let stripped = strip_scheme(&mesh.uri);
        let path = Path::new(stripped);

        if path.is_absolute() {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(PhysicsError::MeshNotFound(mesh.uri.clone()))
            };
        }

        let declaring_dir = mesh
            .file_path
            .as_deref()
            .map(Path::new)
            .and_then(Path::parent);

        declaring_dir
            .into_iter()
            .chain(self.search_paths.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| PhysicsError::MeshNotFound(mesh.uri.clone()))
    }

    /// Resolve and load a mesh resource.
    pub fn load(&self, mesh: &MeshShape) -> Result<TriangleMesh, PhysicsError> {
        let path = self.resolve(mesh)?;
        load_obj(&path)
    }
}

fn strip_scheme(uri: &str) -> &str {
    uri.strip_prefix("file://")
        .or_else(|| uri.strip_prefix("model://"))
        .unwrap_or(uri)
}

/// Load every object of a Wavefront OBJ file into one triangulated mesh.
pub fn load_obj(path: &Path) -> Result<TriangleMesh, PhysicsError> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) =
        tobj::load_obj(path, &options).map_err(|e| PhysicsError::MeshLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut mesh = TriangleMesh::default();
    for model in &models {
        mesh.append(&model.mesh.positions, &model.mesh.indices);
    }

    if mesh.triangle_count() == 0 {
        return Err(PhysicsError::MeshLoad {
            path: path.to_path_buf(),
            reason: "no triangles".to_string(),
        });
    }

    log::debug!(
        "Loaded mesh {} ({} vertices, {} triangles)",
        path.display(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    pub(crate) const TETRAHEDRON_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
v 0 0 1
f 1 3 2
f 1 2 4
f 1 4 3
f 2 3 4
";

    pub(crate) fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("simlink-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("file:///tmp/a.obj"), "/tmp/a.obj");
        assert_eq!(strip_scheme("model://robot/meshes/a.obj"), "robot/meshes/a.obj");
        assert_eq!(strip_scheme("meshes/a.obj"), "meshes/a.obj");
    }

    #[test]
    fn test_resolve_relative_to_declaring_file() {
        let dir = scratch_dir("declaring");
        fs::create_dir_all(dir.join("meshes")).unwrap();
        fs::write(dir.join("meshes/tet.obj"), TETRAHEDRON_OBJ).unwrap();

        let mut shape = MeshShape::new("meshes/tet.obj");
        shape.file_path = Some(dir.join("model.sdf").to_string_lossy().into_owned());

        let locator = ResourceLocator::default();
        assert_eq!(locator.resolve(&shape).unwrap(), dir.join("meshes/tet.obj"));
    }

    #[test]
    fn test_resolve_through_search_paths() {
        let dir = scratch_dir("search");
        fs::write(dir.join("tet.obj"), TETRAHEDRON_OBJ).unwrap();

        let shape = MeshShape::new("model://tet.obj");
        let missing = ResourceLocator::new(vec![PathBuf::from("/nonexistent")]);
        assert!(matches!(
            missing.resolve(&shape),
            Err(PhysicsError::MeshNotFound(_))
        ));

        let locator = ResourceLocator::new(vec![PathBuf::from("/nonexistent"), dir.clone()]);
        assert_eq!(locator.resolve(&shape).unwrap(), dir.join("tet.obj"));
    }

    #[test]
    fn test_load_obj() {
        let dir = scratch_dir("load");
        let path = dir.join("tet.obj");
        fs::write(&path, TETRAHEDRON_OBJ).unwrap();

        let mesh = load_obj(&path).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 4);
    }

    #[test]
    fn test_load_garbage_fails() {
        let dir = scratch_dir("garbage");
        let path = dir.join("empty.obj");
        fs::write(&path, "# nothing here\n").unwrap();

        assert!(matches!(load_obj(&path), Err(PhysicsError::MeshLoad { .. })));
    }
}

//! Mesh-family payloads: trimesh, skin, dangly, saber, aabb
//!
//! All five sub-kinds share the [`Mesh`] base (vertex arrays, faces, material
//! and render state); the sub-kind specific data lives in [`MeshKind`].

use glam::{Quat, Vec2, Vec3};
use tracing::warn;

use super::serial_index_map;

/// Vertex count of the fixed lightsaber blade buffer.
pub const SABER_VERTEX_COUNT: usize = 176;

/// A mesh node payload: the shared base plus the sub-kind data.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshPayload {
    pub mesh: Mesh,
    pub kind: MeshKind,
}

/// The closed set of mesh sub-kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshKind {
    Trimesh,
    Skin(Skin),
    Dangly(Dangly),
    /// Lightsaber blade; vertex data is fixed-size and faces come from a
    /// hardcoded table, see [`saber_faces`].
    Saber,
    Aabb(AabbTree),
}

impl MeshKind {
    pub fn name(&self) -> &'static str {
        match self {
            MeshKind::Trimesh => "trimesh",
            MeshKind::Skin(_) => "skin",
            MeshKind::Dangly(_) => "danglymesh",
            MeshKind::Saber => "lightsaber",
            MeshKind::Aabb(_) => "aabb",
        }
    }
}

/// One triangle face.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Face {
    pub indices: [u16; 3],
    pub material: u32,
    /// Per-face geometric normal; stored on disk, recomputable via
    /// [`Mesh::recompute_face_geometry`].
    pub normal: Vec3,
    /// Plane coefficient `normal · v0`, stored alongside the normal.
    pub plane_distance: f32,
}

/// A per-vertex tangent-space frame (tangent + bitangent).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TangentFrame {
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

/// Per-mesh aggregates derived from face iteration.
///
/// These are stored in the mesh header but never trusted from the caller:
/// the writer recomputes them during its plan pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub average: Vec3,
    pub radius: f32,
    pub total_area: f32,
}

impl Default for MeshBounds {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
            average: Vec3::ZERO,
            radius: 0.0,
            total_area: 0.0,
        }
    }
}

/// Shared mesh base: vertex arrays, faces, textures and render state.
///
/// Optional vertex arrays are "present" when non-empty; present arrays must
/// be the same length as `positions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uv1: Vec<Vec2>,
    pub uv2: Vec<Vec2>,
    pub tangents: Vec<TangentFrame>,
    /// Per-vertex bone weights, up to four per vertex (skin meshes).
    pub bone_weights: Vec<[f32; 4]>,
    /// Per-vertex local bone slots paired with `bone_weights`.
    pub bone_indices: Vec<[u16; 4]>,
    pub faces: Vec<Face>,

    pub diffuse: Vec3,
    pub ambient: Vec3,
    pub transparency_hint: u32,
    pub texture1: String,
    pub texture2: String,

    pub render: bool,
    pub shadow: bool,
    pub beaming: bool,
    pub rotate_texture: bool,
    pub background_geometry: bool,
    pub has_lightmap: bool,

    // UV-scroll animation parameters.
    pub animate_uv: bool,
    pub uv_direction_x: f32,
    pub uv_direction_y: f32,
    pub uv_jitter: f32,
    pub uv_jitter_speed: f32,

    // Second-edition surface parameters; first-edition layouts do not store
    // them and the writer drops them there.
    pub dirt_enabled: bool,
    pub dirt_texture: u16,
    pub dirt_coord_space: u16,
    pub hide_in_holograms: bool,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            positions: Vec::new(),
            normals: Vec::new(),
            uv1: Vec::new(),
            uv2: Vec::new(),
            tangents: Vec::new(),
            bone_weights: Vec::new(),
            bone_indices: Vec::new(),
            faces: Vec::new(),
            diffuse: Vec3::splat(0.8),
            ambient: Vec3::splat(0.2),
            transparency_hint: 0,
            texture1: String::new(),
            texture2: String::new(),
            render: true,
            shadow: false,
            beaming: false,
            rotate_texture: false,
            background_geometry: false,
            has_lightmap: false,
            animate_uv: false,
            uv_direction_x: 0.0,
            uv_direction_y: 0.0,
            uv_jitter: 0.0,
            uv_jitter_speed: 0.0,
            dirt_enabled: false,
            dirt_texture: 0,
            dirt_coord_space: 0,
            hide_in_holograms: false,
        }
    }
}

impl Mesh {
    /// Recompute each face's geometric normal and plane coefficient from the
    /// current vertex positions. Degenerate faces keep a zero normal.
    pub fn recompute_face_geometry(&mut self) {
        for face in &mut self.faces {
            let [i0, i1, i2] = face.indices;
            let (Some(&v0), Some(&v1), Some(&v2)) = (
                self.positions.get(i0 as usize),
                self.positions.get(i1 as usize),
                self.positions.get(i2 as usize),
            ) else {
                continue;
            };
            let normal = (v1 - v0).cross(v2 - v0).normalize_or_zero();
            face.normal = normal;
            face.plane_distance = normal.dot(v0);
        }
    }

    /// Derive the per-mesh bounding box, vertex average, radius and total
    /// face area by iterating faces. Vertices not referenced by any face do
    /// not contribute.
    pub fn compute_bounds(&self) -> MeshBounds {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        let mut sum = Vec3::ZERO;
        let mut count = 0u32;
        let mut total_area = 0.0f32;

        for face in &self.faces {
            let mut corners = [Vec3::ZERO; 3];
            let mut complete = true;
            for (slot, &index) in face.indices.iter().enumerate() {
                match self.positions.get(index as usize) {
                    Some(&v) => {
                        corners[slot] = v;
                        min = min.min(v);
                        max = max.max(v);
                        sum += v;
                        count += 1;
                    }
                    None => complete = false,
                }
            }
            if complete {
                let [v0, v1, v2] = corners;
                total_area += 0.5 * (v1 - v0).cross(v2 - v0).length();
            }
        }

        if count == 0 {
            return MeshBounds::default();
        }
        let average = sum / count as f32;
        let mut radius = 0.0f32;
        for face in &self.faces {
            for &index in &face.indices {
                if let Some(&v) = self.positions.get(index as usize) {
                    radius = radius.max(v.distance(average));
                }
            }
        }
        MeshBounds {
            min,
            max,
            average,
            radius,
            total_area,
        }
    }
}

/// Skin payload: bone mapping and bind-pose data on top of the mesh base's
/// per-vertex weight/index quads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Skin {
    /// Local bone slot → global node id; negative entries are unused slots.
    pub bonemap: Vec<i32>,
    /// Per-bone bind-pose orientations (parallel to the used bonemap slots).
    pub bone_orientations: Vec<Quat>,
    /// Per-bone bind-pose translations.
    pub bone_translations: Vec<Vec3>,
    /// Derived: bone slot → serial position in depth-first node order.
    /// Rebuilt by the reader / [`Skin::rebuild_bone_tables`], never stored.
    pub bone_serial: Vec<u16>,
    /// Derived: bone slot → node id.
    pub bone_node_id: Vec<u16>,
}

impl Skin {
    /// Rebuild the derived bone lookup tables from the current bonemap and
    /// the model's depth-first node-id order.
    pub fn rebuild_bone_tables(&mut self, serial_node_ids: &[u16]) {
        let raw: Vec<f32> = self.bonemap.iter().map(|&v| v as f32).collect();
        let (serial, node_id) = remap_bones(serial_node_ids, &raw);
        self.bone_serial = serial;
        self.bone_node_id = node_id;
    }
}

/// Resolve a raw bonemap against the model's depth-first node order.
///
/// Input entries are float-encoded node ids as stored on disk; negative
/// values are unused-slot sentinels. Returns two parallel arrays indexed by
/// bone slot: serial position and node id, grown on demand and zero-filled
/// for slots never reached. Entries whose node id is unknown fall back to
/// the slot index itself as the serial position (legacy assets encode the
/// serial position directly).
pub fn remap_bones(serial_node_ids: &[u16], bonemap: &[f32]) -> (Vec<u16>, Vec<u16>) {
    let id_to_serial = serial_index_map(serial_node_ids);
    let mut bone_serial: Vec<u16> = Vec::new();
    let mut bone_node_id: Vec<u16> = Vec::new();

    for (slot, &raw) in bonemap.iter().enumerate() {
        let id = raw as i32;
        if id < 0 {
            continue;
        }
        if slot >= bone_serial.len() {
            bone_serial.resize(slot + 1, 0);
            bone_node_id.resize(slot + 1, 0);
        }
        let id = id as u16;
        match id_to_serial.get(&id) {
            Some(&serial) => bone_serial[slot] = serial,
            None => {
                warn!(slot, node_id = id, "bonemap entry does not resolve, using slot as serial");
                bone_serial[slot] = slot as u16;
            }
        }
        bone_node_id[slot] = id;
    }

    (bone_serial, bone_node_id)
}

/// Dangly-mesh payload: per-vertex constraints plus simulation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Dangly {
    /// Per-vertex constraint weight on a 0–255 scale.
    pub constraints: Vec<f32>,
    pub displacement: f32,
    pub tightness: f32,
    pub period: f32,
}

impl Default for Dangly {
    fn default() -> Self {
        Self {
            constraints: Vec::new(),
            displacement: 0.0,
            tightness: 1.0,
            period: 1.0,
        }
    }
}

/// Collision tree of an aabb mesh.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AabbTree {
    pub root: Option<Box<AabbNode>>,
}

impl AabbTree {
    pub fn leaf_count(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.leaf_count())
    }

    pub fn height(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.height())
    }
}

/// One node of an aabb collision tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AabbNode {
    pub min: Vec3,
    pub max: Vec3,
    pub kind: AabbNodeKind,
}

/// Leaf (face index) or branch (two owned children + split-axis hint).
#[derive(Debug, Clone, PartialEq)]
pub enum AabbNodeKind {
    Leaf {
        face: u32,
    },
    Branch {
        left: Box<AabbNode>,
        right: Box<AabbNode>,
        /// Split-axis hint consumed by the engine's walkmesh queries
        /// (1 = X, 2 = Y, 4 = Z).
        plane: u32,
    },
}

impl AabbNode {
    pub fn leaf_count(&self) -> usize {
        match &self.kind {
            AabbNodeKind::Leaf { .. } => 1,
            AabbNodeKind::Branch { left, right, .. } => left.leaf_count() + right.leaf_count(),
        }
    }

    pub fn height(&self) -> usize {
        match &self.kind {
            AabbNodeKind::Leaf { .. } => 1,
            AabbNodeKind::Branch { left, right, .. } => 1 + left.height().max(right.height()),
        }
    }
}

/// The hardcoded face-index table of a saber blade.
///
/// The blade buffer is four panels of 44 vertices laid out as 22 rail pairs;
/// faces are not stored in the file and are reconstructed from this table.
pub fn saber_faces() -> Vec<Face> {
    let mut faces = Vec::with_capacity(4 * 21 * 2);
    for panel in 0..4u16 {
        let base = panel * 44;
        for quad in 0..21u16 {
            let a = base + 2 * quad;
            let b = a + 1;
            let c = a + 3;
            let d = a + 2;
            faces.push(Face {
                indices: [a, b, c],
                ..Face::default()
            });
            faces.push(Face {
                indices: [a, c, d],
                ..Face::default()
            });
        }
    }
    faces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_bounds_unit_triangle() {
        let mesh = Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            faces: vec![Face {
                indices: [0, 1, 2],
                ..Face::default()
            }],
            ..Mesh::default()
        };
        let bounds = mesh.compute_bounds();
        assert_eq!(bounds.min, Vec3::ZERO);
        assert_eq!(bounds.max, Vec3::new(1.0, 1.0, 0.0));
        assert!((bounds.total_area - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_recompute_face_geometry() {
        let mut mesh = Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            faces: vec![Face {
                indices: [0, 1, 2],
                ..Face::default()
            }],
            ..Mesh::default()
        };
        mesh.recompute_face_geometry();
        assert_eq!(mesh.faces[0].normal, Vec3::Z);
        assert_eq!(mesh.faces[0].plane_distance, 0.0);
    }

    #[test]
    fn test_remap_bones() {
        // Serial order: ids 10, 11, 12.
        let serial_ids = [10u16, 11, 12];
        // Slot 0: sentinel. Slot 1: resolvable id 12. Slot 2: legacy entry 99.
        let bonemap = [-1.0f32, 12.0, 99.0];
        let (serial, node_id) = remap_bones(&serial_ids, &bonemap);
        assert_eq!(serial, [0, 2, 2]);
        assert_eq!(node_id, [0, 12, 99]);
    }

    #[test]
    fn test_saber_face_table() {
        let faces = saber_faces();
        assert_eq!(faces.len(), 168);
        let max = faces
            .iter()
            .flat_map(|f| f.indices)
            .max()
            .unwrap();
        assert!((max as usize) < SABER_VERTEX_COUNT);
    }
}

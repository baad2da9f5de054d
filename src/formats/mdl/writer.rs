//! MDL/MDX binary encoding
//!
//! Every cross-reference in the structure stream is an absolute byte offset,
//! so serialization runs in two passes over the same depth-first traversal:
//! a plan pass that accumulates a byte cursor and records every offset a
//! later back-reference needs, and an emit pass that replays the traversal
//! writing fields and substituting the planned offsets. Neither pass mutates
//! the model.

use std::collections::HashMap;
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use glam::{Quat, Vec3};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::geometry::build_aabb_tree;
use crate::model::{
    mesh::remap_bones, AabbNode, AabbNodeKind, Animation, AnimationNode, Controller, Interpolation,
    Light, Mesh, MeshBounds, MeshKind, MeshPayload, Model, Node, NodePayload, Skin,
    SABER_VERTEX_COUNT,
};

use super::controllers::{self, ControllerClass, ORIENTATION, POSITION};
use super::layout::{
    self, mdx_flags, node_type_flags, ABSENT_OFFSET, CONTROLLER_BEZIER_FLAG, GEOMETRY_HEADER_SIZE,
    MDL_SENTINEL, NODE_HEADER_SIZE,
};
use super::quaternion::compress_quaternion;
use super::variant::Variant;

/// Encoder options beyond the variant choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Pack linear orientation keyframes into the single-scalar form.
    pub compress_quaternions: bool,
}

/// Encode a model into its structure and vertex-data streams.
pub fn encode_model(
    model: &Model,
    variant: Variant,
    options: &WriteOptions,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let plan = Planner::new(model, variant, options).plan()?;
    debug!(
        mdl = plan.mdl_size,
        mdx = plan.mdx_size,
        nodes = plan.nodes.len(),
        "planned model layout"
    );
    Emit::new(model, variant, &plan).run()
}

/// Encode a model and write both streams to disk.
pub fn write_model<P: AsRef<Path>>(
    model: &Model,
    variant: Variant,
    options: &WriteOptions,
    mdl_path: P,
    mdx_path: P,
) -> Result<()> {
    let (mdl, mdx) = encode_model(model, variant, options)?;
    std::fs::write(mdl_path, mdl)?;
    std::fs::write(mdx_path, mdx)?;
    Ok(())
}

/// The opaque per-mesh sequence field: values count down within
/// power-of-two-sized blocks of the running mesh ordinal.
fn inverted_counter(ordinal: u32) -> u32 {
    let mut k = 0u32;
    while (1u32 << (k + 1)) - 2 < ordinal {
        k += 1;
    }
    let block_start = (1u32 << k) - 1;
    let block_top = (1u32 << (k + 1)) - 2;
    block_top - (ordinal - block_start)
}

fn pad4(len: u32) -> u32 {
    (len + 3) & !3
}

// =============================================================================
// PLAN PASS
// =============================================================================

#[derive(Debug, Default)]
struct ControllerBlock {
    keys: Vec<RawKey>,
    data: Vec<u32>,
}

#[derive(Debug)]
struct RawKey {
    controller_type: u32,
    row_count: u16,
    time_index: u16,
    data_index: u16,
    column_count: u8,
}

#[derive(Debug, Default)]
struct LightPlan {
    sizes_offset: u32,
    positions_offset: u32,
    color_shifts_offset: u32,
    tex_array_offset: u32,
    /// Per-flare offsets into the string block.
    tex_string_offsets: Vec<u32>,
    /// Unique texture names in first-seen order, with their offsets.
    /// Repeated flare textures share one stored string.
    tex_strings: IndexMap<String, u32>,
}

#[derive(Debug)]
struct AabbNodePlan {
    offset: u32,
    min: Vec3,
    max: Vec3,
    left: u32,
    right: u32,
    face: i32,
    plane: u32,
}

#[derive(Debug)]
enum MeshExtraPlan {
    Trimesh,
    Skin {
        bonemap_offset: u32,
        bonemap: Vec<f32>,
        qbones_offset: u32,
        tbones_offset: u32,
        bone_serial: Vec<u16>,
    },
    Dangly {
        constraints_offset: u32,
    },
    Saber {
        verts_offset: u32,
        uvs_offset: u32,
        normals_offset: u32,
    },
    Aabb {
        nodes: Vec<AabbNodePlan>,
    },
}

#[derive(Debug)]
struct MeshPlan {
    faces_offset: u32,
    indices_count_offset: u32,
    indices_offset_offset: u32,
    index_buffer_offset: u32,
    inverted_counter_offset: u32,
    inverted_counter: u32,
    vertex_coords_offset: u32,
    vertex_count: u32,
    bounds: MeshBounds,
    mdx_flags: u32,
    stride: u32,
    off_normal: u32,
    off_uv1: u32,
    off_uv2: u32,
    off_tangent: u32,
    off_weights: u32,
    off_bone_indices: u32,
    mdx_base: u32,
    extra: MeshExtraPlan,
}

#[derive(Debug, Default)]
struct NodePlan {
    offset: u32,
    parent_offset: u32,
    /// Offset of the owning geometry header (0 for the model tree).
    geometry_offset: u32,
    name_index: u16,
    children_array_offset: u32,
    children_offsets: Vec<u32>,
    keys_offset: u32,
    data_offset: u32,
    ctrl: ControllerBlock,
    light: Option<LightPlan>,
    mesh: Option<MeshPlan>,
}

#[derive(Debug)]
struct AnimPlan {
    offset: u32,
    events_offset: u32,
    root_offset: u32,
    node_count: u32,
    nodes: Vec<NodePlan>,
}

#[derive(Debug)]
struct Plan {
    node_count: u32,
    name_table_offset: u32,
    name_offsets: Vec<u32>,
    anim_array_offset: u32,
    root_offset: u32,
    nodes: Vec<NodePlan>,
    anims: Vec<AnimPlan>,
    model_min: Vec3,
    model_max: Vec3,
    model_radius: f32,
    mdl_size: u32,
    mdx_size: u32,
}

struct Planner<'a> {
    model: &'a Model,
    variant: Variant,
    compress: bool,
    cursor: u32,
    mdx_cursor: u32,
    mesh_ordinal: u32,
    node_count: u32,
    serial_ids: Vec<u16>,
    id_to_ordinal: HashMap<u16, u16>,
    id_to_class: HashMap<u16, ControllerClass>,
}

impl<'a> Planner<'a> {
    fn new(model: &'a Model, variant: Variant, options: &WriteOptions) -> Self {
        let serial_ids: Vec<u16> = model.iter_nodes().map(|n| n.id).collect();
        let mut id_to_ordinal = HashMap::new();
        let mut id_to_class = HashMap::new();
        for (ordinal, node) in model.iter_nodes().enumerate() {
            id_to_ordinal.entry(node.id).or_insert(ordinal as u16);
            id_to_class
                .entry(node.id)
                .or_insert_with(|| controllers::class_of(&node.payload));
        }
        Self {
            model,
            variant,
            compress: options.compress_quaternions,
            cursor: GEOMETRY_HEADER_SIZE + layout::MODEL_HEADER_SIZE,
            mdx_cursor: 0,
            mesh_ordinal: 0,
            node_count: serial_ids.len() as u32,
            serial_ids,
            id_to_ordinal,
            id_to_class,
        }
    }

    fn plan(mut self) -> Result<Plan> {
        let model = self.model;

        // Name table: one offset + string per node, in visitation order.
        let name_table_offset = self.cursor;
        self.cursor += 4 * self.node_count;
        let mut name_offsets = Vec::with_capacity(self.node_count as usize);
        for node in model.iter_nodes() {
            name_offsets.push(self.cursor);
            self.cursor += node.name.len() as u32 + 1;
        }

        let mut nodes = Vec::with_capacity(self.node_count as usize);
        self.plan_node(&model.root, 0, 0, &mut nodes)?;
        let root_offset = nodes[0].offset;

        let anim_array_offset = self.cursor;
        self.cursor += 4 * model.animations.len() as u32;
        let mut anims = Vec::with_capacity(model.animations.len());
        for anim in &model.animations {
            anims.push(self.plan_anim(anim)?);
        }

        // Model-level bounds aggregate every planned mesh.
        let mut model_min = Vec3::ZERO;
        let mut model_max = Vec3::ZERO;
        let mut any = false;
        for plan in &nodes {
            if let Some(mesh) = &plan.mesh {
                if mesh.vertex_count == 0 {
                    continue;
                }
                if any {
                    model_min = model_min.min(mesh.bounds.min);
                    model_max = model_max.max(mesh.bounds.max);
                } else {
                    model_min = mesh.bounds.min;
                    model_max = mesh.bounds.max;
                    any = true;
                }
            }
        }
        let model_radius = model_min.length().max(model_max.length());

        Ok(Plan {
            node_count: self.node_count,
            name_table_offset,
            name_offsets,
            anim_array_offset,
            root_offset,
            nodes,
            anims,
            model_min,
            model_max,
            model_radius,
            mdl_size: self.cursor,
            mdx_size: self.mdx_cursor,
        })
    }

    fn plan_node(
        &mut self,
        node: &Node,
        parent_offset: u32,
        geometry_offset: u32,
        plans: &mut Vec<NodePlan>,
    ) -> Result<u32> {
        let offset = self.cursor;
        self.cursor += NODE_HEADER_SIZE;
        let index = plans.len();
        let name_index = index as u16;
        plans.push(NodePlan::default());

        let mut light = None;
        let mut mesh = None;
        match &node.payload {
            NodePayload::None => {}
            NodePayload::Light(l) => {
                self.cursor += layout::LIGHT_SIZE;
                light = Some(self.plan_light(l));
            }
            NodePayload::Emitter(_) => self.cursor += layout::EMITTER_SIZE,
            NodePayload::Reference(_) => self.cursor += layout::REFERENCE_SIZE,
            NodePayload::Mesh(payload) => {
                self.cursor += self.variant.mesh_header_size() + fixed_extra_size(&payload.kind);
                mesh = Some(self.plan_mesh(payload)?);
            }
        }

        let class = controllers::class_of(&node.payload);
        let ctrl = build_controller_block(
            &node.controllers,
            Some((node.position, node.orientation)),
            class,
            self.compress,
            &node.name,
        )?;
        let keys_offset = self.cursor;
        self.cursor += layout::CONTROLLER_KEY_SIZE * ctrl.keys.len() as u32;
        let data_offset = self.cursor;
        self.cursor += 4 * ctrl.data.len() as u32;

        let children_array_offset = self.cursor;
        self.cursor += 4 * node.children.len() as u32;

        let mut children_offsets = Vec::with_capacity(node.children.len());
        for child in &node.children {
            children_offsets.push(self.plan_node(child, offset, geometry_offset, plans)?);
        }

        plans[index] = NodePlan {
            offset,
            parent_offset,
            geometry_offset,
            name_index,
            children_array_offset,
            children_offsets,
            keys_offset,
            data_offset,
            ctrl,
            light,
            mesh,
        };
        Ok(offset)
    }

    fn plan_light(&mut self, light: &Light) -> LightPlan {
        let sizes_offset = self.cursor;
        self.cursor += 4 * light.flare_sizes.len() as u32;
        let positions_offset = self.cursor;
        self.cursor += 4 * light.flare_positions.len() as u32;
        let color_shifts_offset = self.cursor;
        self.cursor += 12 * light.flare_color_shifts.len() as u32;
        let tex_array_offset = self.cursor;
        self.cursor += 4 * light.flare_textures.len() as u32;
        let mut tex_strings: IndexMap<String, u32> = IndexMap::new();
        let mut tex_string_offsets = Vec::with_capacity(light.flare_textures.len());
        for texture in &light.flare_textures {
            let offset = match tex_strings.get(texture) {
                Some(&offset) => offset,
                None => {
                    let offset = self.cursor;
                    self.cursor += texture.len() as u32 + 1;
                    tex_strings.insert(texture.clone(), offset);
                    offset
                }
            };
            tex_string_offsets.push(offset);
        }
        LightPlan {
            sizes_offset,
            positions_offset,
            color_shifts_offset,
            tex_array_offset,
            tex_string_offsets,
            tex_strings,
        }
    }

    fn plan_mesh(&mut self, payload: &MeshPayload) -> Result<MeshPlan> {
        let mesh = &payload.mesh;
        check_vertex_arrays(mesh, &payload.kind)?;

        let vertex_count = if matches!(payload.kind, MeshKind::Saber) {
            SABER_VERTEX_COUNT as u32
        } else {
            mesh.positions.len() as u32
        };

        let faces_offset = self.cursor;
        self.cursor += layout::FACE_SIZE * mesh.faces.len() as u32;
        let indices_count_offset = self.cursor;
        self.cursor += 4;
        let indices_offset_offset = self.cursor;
        self.cursor += 4;
        let index_buffer_offset = self.cursor;
        self.cursor += pad4(6 * mesh.faces.len() as u32);
        let inverted_counter_offset = self.cursor;
        self.cursor += 4;

        let vertex_coords_offset;
        let extra = match &payload.kind {
            MeshKind::Saber => {
                let verts_offset = self.cursor;
                self.cursor += 12 * vertex_count;
                let uvs_offset = self.cursor;
                self.cursor += 8 * vertex_count;
                let normals_offset = self.cursor;
                self.cursor += 12 * vertex_count;
                vertex_coords_offset = verts_offset;
                MeshExtraPlan::Saber {
                    verts_offset,
                    uvs_offset,
                    normals_offset,
                }
            }
            kind => {
                vertex_coords_offset = self.cursor;
                self.cursor += 12 * vertex_count;
                match kind {
                    MeshKind::Trimesh => MeshExtraPlan::Trimesh,
                    MeshKind::Skin(skin) => self.plan_skin(mesh, skin)?,
                    MeshKind::Dangly(dangly) => {
                        let constraints_offset = self.cursor;
                        self.cursor += 4 * dangly.constraints.len() as u32;
                        MeshExtraPlan::Dangly { constraints_offset }
                    }
                    MeshKind::Aabb(_) => {
                        // Always rebuilt from the faces, never taken as-is.
                        let tree = build_aabb_tree(&mesh.positions, &mesh.faces);
                        let mut nodes = Vec::new();
                        if let Some(root) = &tree.root {
                            flatten_aabb(root, self.cursor, &mut nodes);
                        }
                        self.cursor += layout::AABB_NODE_SIZE * nodes.len() as u32;
                        MeshExtraPlan::Aabb { nodes }
                    }
                    MeshKind::Saber => unreachable!(),
                }
            }
        };

        // Vertex-stream layout: per-attribute within-stride offsets.
        let is_saber = matches!(payload.kind, MeshKind::Saber);
        let is_skin = matches!(payload.kind, MeshKind::Skin(_));
        let mut flags = 0u32;
        let mut stride = 0u32;
        let mut off_normal = ABSENT_OFFSET;
        let mut off_uv1 = ABSENT_OFFSET;
        let mut off_uv2 = ABSENT_OFFSET;
        let mut off_tangent = ABSENT_OFFSET;
        let mut off_weights = ABSENT_OFFSET;
        let mut off_bone_indices = ABSENT_OFFSET;
        let mut mdx_base = 0u32;
        if !is_saber && vertex_count > 0 {
            flags |= mdx_flags::POSITION;
            stride += 12;
            if !mesh.normals.is_empty() {
                flags |= mdx_flags::NORMAL;
                off_normal = stride;
                stride += 12;
            }
            if !mesh.uv1.is_empty() {
                flags |= mdx_flags::UV1;
                off_uv1 = stride;
                stride += 8;
            }
            if !mesh.uv2.is_empty() {
                flags |= mdx_flags::UV2;
                off_uv2 = stride;
                stride += 8;
            }
            if !mesh.tangents.is_empty() {
                flags |= mdx_flags::TANGENT;
                off_tangent = stride;
                stride += 24;
            }
            if is_skin {
                off_weights = stride;
                stride += 16;
                off_bone_indices = stride;
                stride += 4 * self.variant.bone_index_width();
            }
            mdx_base = self.mdx_cursor;
            self.mdx_cursor += stride * vertex_count;
        }

        let plan = MeshPlan {
            faces_offset,
            indices_count_offset,
            indices_offset_offset,
            index_buffer_offset,
            inverted_counter_offset,
            inverted_counter: inverted_counter(self.mesh_ordinal),
            vertex_coords_offset,
            vertex_count,
            bounds: mesh.compute_bounds(),
            mdx_flags: flags,
            stride,
            off_normal,
            off_uv1,
            off_uv2,
            off_tangent,
            off_weights,
            off_bone_indices,
            mdx_base,
            extra,
        };
        self.mesh_ordinal += 1;
        Ok(plan)
    }

    fn plan_skin(&mut self, mesh: &Mesh, skin: &Skin) -> Result<MeshExtraPlan> {
        if skin.bone_orientations.len() != skin.bone_translations.len() {
            return Err(Error::ArrayCountMismatch {
                offset: 0,
                count: skin.bone_orientations.len() as u32,
                count2: skin.bone_translations.len() as u32,
            });
        }
        let bonemap = derive_bonemap(mesh, skin, self.node_count as usize);
        let (serials, _) = remap_bones(&self.serial_ids, &bonemap);
        let mut bone_serial = vec![0u16; layout::SKIN_BONE_SLOTS];
        for (slot, &serial) in serials.iter().take(layout::SKIN_BONE_SLOTS).enumerate() {
            bone_serial[slot] = serial;
        }

        let bonemap_offset = self.cursor;
        self.cursor += 4 * bonemap.len() as u32;
        let qbones_offset = self.cursor;
        self.cursor += 16 * skin.bone_orientations.len() as u32;
        let tbones_offset = self.cursor;
        self.cursor += 12 * skin.bone_translations.len() as u32;
        Ok(MeshExtraPlan::Skin {
            bonemap_offset,
            bonemap,
            qbones_offset,
            tbones_offset,
            bone_serial,
        })
    }

    fn plan_anim(&mut self, anim: &Animation) -> Result<AnimPlan> {
        let offset = self.cursor;
        self.cursor += GEOMETRY_HEADER_SIZE + layout::ANIMATION_HEADER_SIZE;
        let events_offset = self.cursor;
        self.cursor += layout::EVENT_SIZE * anim.events.len() as u32;

        let mut nodes = Vec::with_capacity(anim.root.node_count());
        let root_offset = self.plan_anim_node(&anim.root, 0, offset, &mut nodes)?;
        Ok(AnimPlan {
            offset,
            events_offset,
            root_offset,
            node_count: nodes.len() as u32,
            nodes,
        })
    }

    fn plan_anim_node(
        &mut self,
        node: &AnimationNode,
        parent_offset: u32,
        geometry_offset: u32,
        plans: &mut Vec<NodePlan>,
    ) -> Result<u32> {
        let offset = self.cursor;
        self.cursor += NODE_HEADER_SIZE;
        let index = plans.len();
        plans.push(NodePlan::default());

        // Shadow nodes index the model's name table by id correspondence.
        let name_index = match self.id_to_ordinal.get(&node.node_id) {
            Some(&ordinal) => ordinal,
            None => {
                warn!(node_id = node.node_id, "animation node has no model counterpart");
                0
            }
        };
        let class = self
            .id_to_class
            .get(&node.node_id)
            .copied()
            .unwrap_or(ControllerClass::Common);
        let ctrl =
            build_controller_block(&node.controllers, None, class, self.compress, &node.name)?;
        let keys_offset = self.cursor;
        self.cursor += layout::CONTROLLER_KEY_SIZE * ctrl.keys.len() as u32;
        let data_offset = self.cursor;
        self.cursor += 4 * ctrl.data.len() as u32;
        let children_array_offset = self.cursor;
        self.cursor += 4 * node.children.len() as u32;

        let mut children_offsets = Vec::with_capacity(node.children.len());
        for child in &node.children {
            children_offsets.push(self.plan_anim_node(child, offset, geometry_offset, plans)?);
        }

        plans[index] = NodePlan {
            offset,
            parent_offset,
            geometry_offset,
            name_index,
            children_array_offset,
            children_offsets,
            keys_offset,
            data_offset,
            ctrl,
            light: None,
            mesh: None,
        };
        Ok(offset)
    }
}

fn fixed_extra_size(kind: &MeshKind) -> u32 {
    match kind {
        MeshKind::Trimesh => 0,
        MeshKind::Skin(_) => layout::SKIN_SIZE,
        MeshKind::Dangly(_) => layout::DANGLY_SIZE,
        MeshKind::Saber => layout::SABER_SIZE,
        MeshKind::Aabb(_) => layout::AABB_SIZE,
    }
}

/// Reject vertex arrays whose lengths disagree; emitting them would index
/// out of range during the vertex-stream interleave.
fn check_vertex_arrays(mesh: &Mesh, kind: &MeshKind) -> Result<()> {
    let count = if matches!(kind, MeshKind::Saber) {
        SABER_VERTEX_COUNT
    } else {
        mesh.positions.len()
    };
    let mismatch = |len: usize| Error::ArrayCountMismatch {
        offset: 0,
        count: count as u32,
        count2: len as u32,
    };
    if matches!(kind, MeshKind::Saber) {
        if mesh.positions.len() != count || mesh.uv1.len() != count || mesh.normals.len() != count {
            return Err(mismatch(mesh.positions.len()));
        }
        return Ok(());
    }
    for len in [
        mesh.normals.len(),
        mesh.uv1.len(),
        mesh.uv2.len(),
        mesh.tangents.len(),
        mesh.bone_weights.len(),
        mesh.bone_indices.len(),
    ] {
        if len != 0 && len != count {
            return Err(mismatch(len));
        }
    }
    if matches!(kind, MeshKind::Skin(_))
        && (mesh.bone_weights.len() != count || mesh.bone_indices.len() != count)
    {
        return Err(mismatch(mesh.bone_weights.len()));
    }
    Ok(())
}

/// Bone slots that actually receive weight define the emitted bonemap; it is
/// sized to the total node count and sentinel-filled elsewhere.
fn derive_bonemap(mesh: &Mesh, skin: &Skin, node_count: usize) -> Vec<f32> {
    let mut used = vec![false; node_count];
    for (weights, indices) in mesh.bone_weights.iter().zip(&mesh.bone_indices) {
        for slot in 0..4 {
            if weights[slot] > 0.0 {
                let index = usize::from(indices[slot]);
                if index < used.len() {
                    used[index] = true;
                } else {
                    warn!(slot = index, "bone index beyond node count, dropped from bonemap");
                }
            }
        }
    }
    let mut out = vec![-1.0f32; node_count];
    for (slot, used) in used.iter().enumerate() {
        if *used {
            out[slot] = skin.bonemap.get(slot).copied().unwrap_or(-1) as f32;
        }
    }
    out
}

fn flatten_aabb(node: &AabbNode, base: u32, out: &mut Vec<AabbNodePlan>) -> u32 {
    let index = out.len();
    let offset = base + layout::AABB_NODE_SIZE * index as u32;
    out.push(AabbNodePlan {
        offset,
        min: node.min,
        max: node.max,
        left: 0,
        right: 0,
        face: -1,
        plane: 0,
    });
    match &node.kind {
        AabbNodeKind::Leaf { face } => out[index].face = *face as i32,
        AabbNodeKind::Branch { left, right, plane } => {
            let plane = *plane;
            let left_offset = flatten_aabb(left, base, out);
            let right_offset = flatten_aabb(right, base, out);
            let entry = &mut out[index];
            entry.left = left_offset;
            entry.right = right_offset;
            entry.plane = plane;
        }
    }
    offset
}

fn build_controller_block(
    ctrls: &[Controller],
    bind_pose: Option<(Vec3, Quat)>,
    class: ControllerClass,
    compress: bool,
    node_name: &str,
) -> Result<ControllerBlock> {
    let mut keys = Vec::new();
    let mut data: Vec<u32> = Vec::new();

    // The bind pose is mandatory: geometry nodes always carry a one-row
    // position and orientation track even without animation.
    let mut synthetic: Vec<Controller> = Vec::new();
    if let Some((position, orientation)) = bind_pose {
        if !ctrls.iter().any(|c| c.controller_type == POSITION) {
            synthetic.push(Controller::single(
                POSITION,
                vec![position.x, position.y, position.z],
            ));
        }
        if !ctrls.iter().any(|c| c.controller_type == ORIENTATION) {
            synthetic.push(Controller::single(
                ORIENTATION,
                vec![orientation.x, orientation.y, orientation.z, orientation.w],
            ));
        }
    }

    for controller in synthetic.iter().chain(ctrls.iter()) {
        let def = controllers::lookup(class, controller.controller_type).ok_or_else(|| {
            Error::InvalidControllerType {
                controller_type: controller.controller_type,
                columns: 0,
                node: node_name.to_string(),
            }
        })?;
        let columns = usize::from(def.columns);
        let bezier = controller.interpolation == Interpolation::Bezier;
        let compressed =
            compress && !bezier && controller.controller_type == ORIENTATION;
        let expected = if bezier { columns * 3 } else { columns };
        for row in &controller.rows {
            if row.values.len() != expected {
                return Err(Error::InvalidControllerType {
                    controller_type: controller.controller_type,
                    columns: row.values.len() as u8,
                    node: node_name.to_string(),
                });
            }
        }

        let time_index = data.len() as u16;
        for row in &controller.rows {
            data.push(row.time.to_bits());
        }
        let data_index = data.len() as u16;
        let column_count: u8;
        if compressed {
            column_count = 2;
            for row in &controller.rows {
                let q = Quat::from_xyzw(
                    row.values[0],
                    row.values[1],
                    row.values[2],
                    row.values[3],
                );
                data.push(compress_quaternion(q));
            }
        } else if bezier {
            column_count = def.columns | CONTROLLER_BEZIER_FLAG;
            for row in &controller.rows {
                for c in 0..columns {
                    data.push(row.values[c].to_bits());
                }
                // Tangents are stored as deltas relative to the key value.
                for c in 0..columns * 2 {
                    let delta = row.values[columns + c] - row.values[c % columns];
                    data.push(delta.to_bits());
                }
            }
        } else {
            column_count = def.columns;
            for row in &controller.rows {
                for &value in &row.values {
                    data.push(value.to_bits());
                }
            }
        }

        keys.push(RawKey {
            controller_type: controller.controller_type,
            row_count: controller.rows.len() as u16,
            time_index,
            data_index,
            column_count,
        });
    }

    Ok(ControllerBlock { keys, data })
}

// =============================================================================
// EMIT PASS
// =============================================================================

struct Emit<'a> {
    model: &'a Model,
    variant: Variant,
    plan: &'a Plan,
    out: Vec<u8>,
    mdx: Vec<u8>,
}

impl<'a> Emit<'a> {
    fn new(model: &'a Model, variant: Variant, plan: &'a Plan) -> Self {
        Self {
            model,
            variant,
            plan,
            out: Vec::with_capacity(layout::FILE_HEADER_SIZE as usize + plan.mdl_size as usize),
            mdx: Vec::with_capacity(plan.mdx_size as usize),
        }
    }

    /// Current position within the addressable data region.
    fn pos(&self) -> u32 {
        self.out.len() as u32 - layout::FILE_HEADER_SIZE
    }

    fn run(mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let model = self.model;
        let plan = self.plan;

        self.out.write_u32::<LittleEndian>(MDL_SENTINEL)?;
        self.out.write_u32::<LittleEndian>(plan.mdl_size)?;
        self.out.write_u32::<LittleEndian>(plan.mdx_size)?;

        self.write_geometry_header(
            self.variant.model_fn_ptrs(),
            &model.name,
            plan.root_offset,
            plan.node_count,
            layout::GEOMETRY_TYPE_MODEL,
        )?;
        self.write_model_header()?;

        // Name table.
        for &offset in &plan.name_offsets {
            self.out.write_u32::<LittleEndian>(offset)?;
        }
        for node in model.iter_nodes() {
            self.out.extend_from_slice(node.name.as_bytes());
            self.out.write_u8(0)?;
        }

        // Node tree.
        let mut counter = 0usize;
        self.emit_node(&model.root, &mut counter)?;

        // Animations.
        debug_assert_eq!(self.pos(), plan.anim_array_offset);
        for anim in &plan.anims {
            self.out.write_u32::<LittleEndian>(anim.offset)?;
        }
        for (anim, anim_plan) in model.animations.iter().zip(&plan.anims) {
            self.emit_animation(anim, anim_plan)?;
        }

        debug_assert_eq!(self.pos(), plan.mdl_size);
        debug_assert_eq!(self.mdx.len() as u32, plan.mdx_size);
        Ok((self.out, self.mdx))
    }

    fn write_fixed_string(&mut self, value: &str, len: usize) -> Result<()> {
        let bytes = value.as_bytes();
        let take = bytes.len().min(len - 1);
        self.out.extend_from_slice(&bytes[..take]);
        self.out.resize(self.out.len() + len - take, 0);
        Ok(())
    }

    fn write_array_desc(&mut self, offset: u32, count: u32) -> Result<()> {
        self.out.write_u32::<LittleEndian>(offset)?;
        self.out.write_u32::<LittleEndian>(count)?;
        self.out.write_u32::<LittleEndian>(count)?;
        Ok(())
    }

    fn write_vec3(&mut self, v: Vec3) -> Result<()> {
        self.out.write_f32::<LittleEndian>(v.x)?;
        self.out.write_f32::<LittleEndian>(v.y)?;
        self.out.write_f32::<LittleEndian>(v.z)?;
        Ok(())
    }

    fn write_geometry_header(
        &mut self,
        fn_ptrs: (u32, u32),
        name: &str,
        root_offset: u32,
        node_count: u32,
        geometry_type: u8,
    ) -> Result<()> {
        self.out.write_u32::<LittleEndian>(fn_ptrs.0)?;
        self.out.write_u32::<LittleEndian>(fn_ptrs.1)?;
        self.write_fixed_string(name, layout::NAME_LEN)?;
        self.out.write_u32::<LittleEndian>(root_offset)?;
        self.out.write_u32::<LittleEndian>(node_count)?;
        self.out.resize(self.out.len() + 24, 0); // runtime array scratch
        self.out.write_u32::<LittleEndian>(0)?; // reference count
        self.out.write_u8(geometry_type)?;
        self.out.resize(self.out.len() + 3, 0);
        Ok(())
    }

    fn write_model_header(&mut self) -> Result<()> {
        self.out.write_u8(self.model.classification as u8)?;
        self.out.write_u8(0)?; // subclassification
        self.out.write_u8(0)?;
        self.out.write_u8(u8::from(self.model.affected_by_fog))?;
        self.out.write_u32::<LittleEndian>(0)?; // child model count
        self.write_array_desc(
            self.plan.anim_array_offset,
            self.plan.anims.len() as u32,
        )?;
        self.out.write_u32::<LittleEndian>(0)?; // supermodel reference
        self.write_vec3(self.plan.model_min)?;
        self.write_vec3(self.plan.model_max)?;
        self.out.write_f32::<LittleEndian>(self.plan.model_radius)?;
        self.out
            .write_f32::<LittleEndian>(self.model.animation_scale)?;
        let supermodel = self.model.supermodel.clone().unwrap_or_else(|| "NULL".to_string());
        self.write_fixed_string(&supermodel, layout::NAME_LEN)?;
        self.out.write_u32::<LittleEndian>(self.plan.root_offset)?;
        self.out.write_u32::<LittleEndian>(0)?;
        self.out.write_u32::<LittleEndian>(self.plan.mdx_size)?;
        self.out.write_u32::<LittleEndian>(0)?; // runtime MDX pointer
        self.write_array_desc(self.plan.name_table_offset, self.plan.node_count)?;
        Ok(())
    }

    fn emit_node(&mut self, node: &Node, counter: &mut usize) -> Result<()> {
        let plan = &self.plan.nodes[*counter];
        *counter += 1;
        debug_assert_eq!(self.pos(), plan.offset);

        self.emit_node_header(
            node_type_flags(&node.payload),
            node.id,
            plan,
            node.position,
            node.orientation,
            node.children.len() as u32,
        )?;

        match &node.payload {
            NodePayload::None => {}
            NodePayload::Light(light) => self.emit_light(light, plan)?,
            NodePayload::Emitter(emitter) => self.emit_emitter(emitter)?,
            NodePayload::Reference(reference) => {
                self.write_fixed_string(&reference.model, layout::NAME_LEN)?;
                self.out
                    .write_u32::<LittleEndian>(u32::from(reference.reattachable))?;
            }
            NodePayload::Mesh(payload) => self.emit_mesh(payload, plan)?,
        }

        self.emit_controllers(plan)?;
        for &child_offset in &plan.children_offsets {
            self.out.write_u32::<LittleEndian>(child_offset)?;
        }

        for child in &node.children {
            self.emit_node(child, counter)?;
        }
        Ok(())
    }

    fn emit_node_header(
        &mut self,
        flags: u16,
        id: u16,
        plan: &NodePlan,
        position: Vec3,
        orientation: Quat,
        child_count: u32,
    ) -> Result<()> {
        self.out.write_u16::<LittleEndian>(flags)?;
        self.out.write_u16::<LittleEndian>(id)?;
        self.out.write_u16::<LittleEndian>(plan.name_index)?;
        self.out.write_u16::<LittleEndian>(0)?;
        self.out.write_u32::<LittleEndian>(plan.geometry_offset)?;
        self.out.write_u32::<LittleEndian>(plan.parent_offset)?;
        self.write_vec3(position)?;
        // Orientation is stored w-first.
        self.out.write_f32::<LittleEndian>(orientation.w)?;
        self.out.write_f32::<LittleEndian>(orientation.x)?;
        self.out.write_f32::<LittleEndian>(orientation.y)?;
        self.out.write_f32::<LittleEndian>(orientation.z)?;
        self.write_array_desc(plan.children_array_offset, child_count)?;
        self.write_array_desc(plan.keys_offset, plan.ctrl.keys.len() as u32)?;
        self.write_array_desc(plan.data_offset, plan.ctrl.data.len() as u32)?;
        Ok(())
    }

    fn emit_controllers(&mut self, plan: &NodePlan) -> Result<()> {
        debug_assert_eq!(self.pos(), plan.keys_offset);
        for key in &plan.ctrl.keys {
            self.out.write_u32::<LittleEndian>(key.controller_type)?;
            self.out.write_u16::<LittleEndian>(0xFFFF)?;
            self.out.write_u16::<LittleEndian>(key.row_count)?;
            self.out.write_u16::<LittleEndian>(key.time_index)?;
            self.out.write_u16::<LittleEndian>(key.data_index)?;
            self.out.write_u8(key.column_count)?;
            self.out.resize(self.out.len() + 3, 0);
        }
        debug_assert_eq!(self.pos(), plan.data_offset);
        for &word in &plan.ctrl.data {
            self.out.write_u32::<LittleEndian>(word)?;
        }
        Ok(())
    }

    fn emit_light(&mut self, light: &Light, plan: &NodePlan) -> Result<()> {
        let lp = plan.light.as_ref().expect("light plan");
        self.out.write_f32::<LittleEndian>(light.flare_radius)?;
        self.write_array_desc(0, 0)?; // runtime scratch
        self.write_array_desc(lp.sizes_offset, light.flare_sizes.len() as u32)?;
        self.write_array_desc(lp.positions_offset, light.flare_positions.len() as u32)?;
        self.write_array_desc(
            lp.color_shifts_offset,
            light.flare_color_shifts.len() as u32,
        )?;
        self.write_array_desc(lp.tex_array_offset, light.flare_textures.len() as u32)?;
        self.out.write_u32::<LittleEndian>(light.priority)?;
        self.out
            .write_u32::<LittleEndian>(u32::from(light.ambient_only))?;
        self.out.write_u32::<LittleEndian>(light.dynamic_type)?;
        self.out
            .write_u32::<LittleEndian>(u32::from(light.affect_dynamic))?;
        self.out.write_u32::<LittleEndian>(u32::from(light.shadow))?;
        self.out.write_u32::<LittleEndian>(u32::from(light.flare))?;
        self.out.write_u32::<LittleEndian>(u32::from(light.fading))?;

        for &size in &light.flare_sizes {
            self.out.write_f32::<LittleEndian>(size)?;
        }
        for &position in &light.flare_positions {
            self.out.write_f32::<LittleEndian>(position)?;
        }
        for &shift in &light.flare_color_shifts {
            self.write_vec3(shift)?;
        }
        for &offset in &lp.tex_string_offsets {
            self.out.write_u32::<LittleEndian>(offset)?;
        }
        for texture in lp.tex_strings.keys() {
            self.out.extend_from_slice(texture.as_bytes());
            self.out.write_u8(0)?;
        }
        Ok(())
    }

    fn emit_emitter(&mut self, emitter: &crate::model::Emitter) -> Result<()> {
        self.out.write_f32::<LittleEndian>(emitter.dead_space)?;
        self.out.write_f32::<LittleEndian>(emitter.blast_radius)?;
        self.out.write_f32::<LittleEndian>(emitter.blast_length)?;
        self.out.write_u32::<LittleEndian>(emitter.branch_count)?;
        self.out
            .write_f32::<LittleEndian>(emitter.ctrl_pt_smoothing)?;
        self.out.write_u32::<LittleEndian>(emitter.x_grid)?;
        self.out.write_u32::<LittleEndian>(emitter.y_grid)?;
        self.out.write_u32::<LittleEndian>(emitter.spawn_type)?;
        self.write_fixed_string(&emitter.update, 32)?;
        self.write_fixed_string(&emitter.render, 32)?;
        self.write_fixed_string(&emitter.blend, 32)?;
        self.write_fixed_string(&emitter.texture, 32)?;
        self.write_fixed_string(&emitter.chunk_name, 16)?;
        self.out
            .write_u32::<LittleEndian>(u32::from(emitter.twosided_texture))?;
        self.out
            .write_u32::<LittleEndian>(u32::from(emitter.looping))?;
        self.out.write_u16::<LittleEndian>(emitter.render_order)?;
        self.out.write_u8(u8::from(emitter.frame_blending))?;
        self.out.write_u8(0)?;
        self.write_fixed_string(&emitter.depth_texture, 32)?;
        self.out.write_u32::<LittleEndian>(emitter.flags)?;
        self.out.write_u32::<LittleEndian>(0)?;
        Ok(())
    }

    fn emit_mesh(&mut self, payload: &MeshPayload, plan: &NodePlan) -> Result<()> {
        let mesh = &payload.mesh;
        let mp = plan.mesh.as_ref().expect("mesh plan");

        // Fixed header.
        let fn_ptrs = self.variant.mesh_fn_ptrs();
        self.out.write_u32::<LittleEndian>(fn_ptrs.0)?;
        self.out.write_u32::<LittleEndian>(fn_ptrs.1)?;
        self.write_array_desc(mp.faces_offset, mesh.faces.len() as u32)?;
        self.write_vec3(mp.bounds.min)?;
        self.write_vec3(mp.bounds.max)?;
        self.out.write_f32::<LittleEndian>(mp.bounds.radius)?;
        self.write_vec3(mp.bounds.average)?;
        self.write_vec3(mesh.diffuse)?;
        self.write_vec3(mesh.ambient)?;
        self.out
            .write_u32::<LittleEndian>(mesh.transparency_hint)?;
        self.write_fixed_string(&mesh.texture1, 32)?;
        self.write_fixed_string(&mesh.texture2, 32)?;
        self.write_fixed_string("", 12)?;
        self.write_fixed_string("", 12)?;
        self.write_array_desc(mp.indices_count_offset, 1)?;
        self.write_array_desc(mp.indices_offset_offset, 1)?;
        self.write_array_desc(mp.inverted_counter_offset, 1)?;
        self.out.resize(self.out.len() + 12, 0); // unknown
        self.out
            .write_u32::<LittleEndian>(u32::from(mesh.animate_uv))?;
        self.out.write_f32::<LittleEndian>(mesh.uv_direction_x)?;
        self.out.write_f32::<LittleEndian>(mesh.uv_direction_y)?;
        self.out.write_f32::<LittleEndian>(mesh.uv_jitter)?;
        self.out.write_f32::<LittleEndian>(mesh.uv_jitter_speed)?;
        self.out.write_u32::<LittleEndian>(mp.stride)?;
        self.out.write_u32::<LittleEndian>(mp.mdx_flags)?;
        let off_pos = if mp.mdx_flags & mdx_flags::POSITION != 0 {
            0
        } else {
            ABSENT_OFFSET
        };
        self.out.write_u32::<LittleEndian>(off_pos)?;
        self.out.write_u32::<LittleEndian>(mp.off_normal)?;
        self.out.write_u32::<LittleEndian>(ABSENT_OFFSET)?; // colors
        self.out.write_u32::<LittleEndian>(mp.off_uv1)?;
        self.out.write_u32::<LittleEndian>(mp.off_uv2)?;
        self.out.write_u32::<LittleEndian>(ABSENT_OFFSET)?; // uv3
        self.out.write_u32::<LittleEndian>(ABSENT_OFFSET)?; // uv4
        self.out.write_u32::<LittleEndian>(mp.off_tangent)?;
        for _ in 0..3 {
            self.out.write_u32::<LittleEndian>(ABSENT_OFFSET)?;
        }
        self.out
            .write_u16::<LittleEndian>(mp.vertex_count as u16)?;
        let texture_count: u16 = if !mesh.uv2.is_empty() {
            2
        } else {
            u16::from(!mesh.uv1.is_empty())
        };
        self.out.write_u16::<LittleEndian>(texture_count)?;
        self.out.write_u8(u8::from(mesh.has_lightmap))?;
        self.out.write_u8(u8::from(mesh.rotate_texture))?;
        self.out
            .write_u8(u8::from(mesh.background_geometry))?;
        self.out.write_u8(u8::from(mesh.shadow))?;
        self.out.write_u8(u8::from(mesh.beaming))?;
        self.out.write_u8(u8::from(mesh.render))?;
        self.out.write_u16::<LittleEndian>(0)?;
        if self.variant.is_second_edition() {
            self.out.write_u8(u8::from(mesh.dirt_enabled))?;
            self.out.write_u8(0)?;
            self.out.write_u16::<LittleEndian>(mesh.dirt_texture)?;
            self.out
                .write_u16::<LittleEndian>(mesh.dirt_coord_space)?;
            self.out.write_u8(u8::from(mesh.hide_in_holograms))?;
            self.out.write_u8(0)?;
        }
        self.out
            .write_f32::<LittleEndian>(mp.bounds.total_area)?;
        self.out.write_u32::<LittleEndian>(0)?;
        self.out.write_u32::<LittleEndian>(mp.mdx_base)?;
        self.out
            .write_u32::<LittleEndian>(mp.vertex_coords_offset)?;

        // Fixed sub-kind block.
        match (&payload.kind, &mp.extra) {
            (MeshKind::Trimesh, MeshExtraPlan::Trimesh) => {}
            (
                MeshKind::Skin(skin),
                MeshExtraPlan::Skin {
                    bonemap_offset,
                    bonemap,
                    qbones_offset,
                    tbones_offset,
                    bone_serial,
                },
            ) => {
                self.write_array_desc(0, 0)?; // runtime scratch
                self.out.write_u32::<LittleEndian>(mp.off_weights)?;
                self.out
                    .write_u32::<LittleEndian>(mp.off_bone_indices)?;
                self.out.write_u32::<LittleEndian>(*bonemap_offset)?;
                self.out
                    .write_u32::<LittleEndian>(bonemap.len() as u32)?;
                self.write_array_desc(
                    *qbones_offset,
                    skin.bone_orientations.len() as u32,
                )?;
                self.write_array_desc(
                    *tbones_offset,
                    skin.bone_translations.len() as u32,
                )?;
                self.write_array_desc(0, 0)?; // runtime scratch
                for &serial in bone_serial {
                    self.out.write_u16::<LittleEndian>(serial)?;
                }
                self.out.write_u32::<LittleEndian>(0)?;
            }
            (MeshKind::Dangly(dangly), MeshExtraPlan::Dangly { constraints_offset }) => {
                self.write_array_desc(
                    *constraints_offset,
                    dangly.constraints.len() as u32,
                )?;
                self.out.write_f32::<LittleEndian>(dangly.displacement)?;
                self.out.write_f32::<LittleEndian>(dangly.tightness)?;
                self.out.write_f32::<LittleEndian>(dangly.period)?;
                self.out.write_u32::<LittleEndian>(*constraints_offset)?;
            }
            (
                MeshKind::Saber,
                MeshExtraPlan::Saber {
                    verts_offset,
                    uvs_offset,
                    normals_offset,
                },
            ) => {
                self.out.write_u32::<LittleEndian>(*verts_offset)?;
                self.out.write_u32::<LittleEndian>(*uvs_offset)?;
                self.out.write_u32::<LittleEndian>(*normals_offset)?;
                self.out.write_u32::<LittleEndian>(0)?;
                self.out.write_u32::<LittleEndian>(0)?;
            }
            (MeshKind::Aabb(_), MeshExtraPlan::Aabb { nodes }) => {
                let root = nodes.first().map_or(0, |n| n.offset);
                self.out.write_u32::<LittleEndian>(root)?;
            }
            _ => unreachable!("mesh plan does not match payload kind"),
        }

        // Variable data, in plan order.
        debug_assert_eq!(self.pos(), mp.faces_offset);
        for face in &mesh.faces {
            self.write_vec3(face.normal)?;
            self.out
                .write_f32::<LittleEndian>(face.plane_distance)?;
            self.out.write_u32::<LittleEndian>(face.material)?;
            for _ in 0..3 {
                self.out.write_u16::<LittleEndian>(0xFFFF)?; // adjacency
            }
            for &index in &face.indices {
                self.out.write_u16::<LittleEndian>(index)?;
            }
        }
        self.out
            .write_u32::<LittleEndian>(3 * mesh.faces.len() as u32)?;
        self.out
            .write_u32::<LittleEndian>(mp.index_buffer_offset)?;
        for face in &mesh.faces {
            for &index in &face.indices {
                self.out.write_u16::<LittleEndian>(index)?;
            }
        }
        let index_bytes = 6 * mesh.faces.len() as u32;
        self.out
            .resize(self.out.len() + (pad4(index_bytes) - index_bytes) as usize, 0);
        self.out
            .write_u32::<LittleEndian>(mp.inverted_counter)?;

        match (&payload.kind, &mp.extra) {
            (MeshKind::Saber, MeshExtraPlan::Saber { .. }) => {
                for &v in &mesh.positions {
                    self.write_vec3(v)?;
                }
                for &uv in &mesh.uv1 {
                    self.out.write_f32::<LittleEndian>(uv.x)?;
                    self.out.write_f32::<LittleEndian>(uv.y)?;
                }
                for &n in &mesh.normals {
                    self.write_vec3(n)?;
                }
            }
            (kind, extra) => {
                debug_assert_eq!(self.pos(), mp.vertex_coords_offset);
                for &v in &mesh.positions {
                    self.write_vec3(v)?;
                }
                match (kind, extra) {
                    (MeshKind::Trimesh, MeshExtraPlan::Trimesh) => {}
                    (MeshKind::Skin(skin), MeshExtraPlan::Skin { bonemap, .. }) => {
                        for &entry in bonemap {
                            self.out.write_f32::<LittleEndian>(entry)?;
                        }
                        for &q in &skin.bone_orientations {
                            self.out.write_f32::<LittleEndian>(q.w)?;
                            self.out.write_f32::<LittleEndian>(q.x)?;
                            self.out.write_f32::<LittleEndian>(q.y)?;
                            self.out.write_f32::<LittleEndian>(q.z)?;
                        }
                        for &t in &skin.bone_translations {
                            self.write_vec3(t)?;
                        }
                    }
                    (MeshKind::Dangly(dangly), MeshExtraPlan::Dangly { .. }) => {
                        for &c in &dangly.constraints {
                            self.out.write_f32::<LittleEndian>(c)?;
                        }
                    }
                    (MeshKind::Aabb(_), MeshExtraPlan::Aabb { nodes }) => {
                        for node in nodes {
                            self.write_vec3(node.min)?;
                            self.write_vec3(node.max)?;
                            self.out.write_u32::<LittleEndian>(node.left)?;
                            self.out.write_u32::<LittleEndian>(node.right)?;
                            self.out.write_i32::<LittleEndian>(node.face)?;
                            self.out.write_u32::<LittleEndian>(node.plane)?;
                        }
                    }
                    _ => unreachable!(),
                }
            }
        }

        self.emit_mdx(mesh, payload, mp)?;
        Ok(())
    }

    /// Interleave the vertex stream block for this mesh. Blocks are laid out
    /// sequentially in the same depth-first order as the plan pass.
    fn emit_mdx(&mut self, mesh: &Mesh, payload: &MeshPayload, mp: &MeshPlan) -> Result<()> {
        if mp.stride == 0 || mp.vertex_count == 0 {
            return Ok(());
        }
        debug_assert_eq!(self.mdx.len() as u32, mp.mdx_base);
        let is_skin = matches!(payload.kind, MeshKind::Skin(_));
        for v in 0..mp.vertex_count as usize {
            let p = mesh.positions[v];
            self.mdx.write_f32::<LittleEndian>(p.x)?;
            self.mdx.write_f32::<LittleEndian>(p.y)?;
            self.mdx.write_f32::<LittleEndian>(p.z)?;
            if mp.off_normal != ABSENT_OFFSET {
                let n = mesh.normals[v];
                self.mdx.write_f32::<LittleEndian>(n.x)?;
                self.mdx.write_f32::<LittleEndian>(n.y)?;
                self.mdx.write_f32::<LittleEndian>(n.z)?;
            }
            if mp.off_uv1 != ABSENT_OFFSET {
                let uv = mesh.uv1[v];
                self.mdx.write_f32::<LittleEndian>(uv.x)?;
                self.mdx.write_f32::<LittleEndian>(uv.y)?;
            }
            if mp.off_uv2 != ABSENT_OFFSET {
                let uv = mesh.uv2[v];
                self.mdx.write_f32::<LittleEndian>(uv.x)?;
                self.mdx.write_f32::<LittleEndian>(uv.y)?;
            }
            if mp.off_tangent != ABSENT_OFFSET {
                let frame = mesh.tangents[v];
                for value in [
                    frame.tangent.x,
                    frame.tangent.y,
                    frame.tangent.z,
                    frame.bitangent.x,
                    frame.bitangent.y,
                    frame.bitangent.z,
                ] {
                    self.mdx.write_f32::<LittleEndian>(value)?;
                }
            }
            if is_skin {
                for &w in &mesh.bone_weights[v] {
                    self.mdx.write_f32::<LittleEndian>(w)?;
                }
                for &slot in &mesh.bone_indices[v] {
                    if self.variant.is_xbox() {
                        self.mdx.write_i16::<LittleEndian>(slot as i16)?;
                    } else {
                        self.mdx.write_f32::<LittleEndian>(f32::from(slot))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_animation(&mut self, anim: &Animation, plan: &AnimPlan) -> Result<()> {
        debug_assert_eq!(self.pos(), plan.offset);
        self.write_geometry_header(
            self.variant.anim_fn_ptrs(),
            &anim.name,
            plan.root_offset,
            plan.node_count,
            layout::GEOMETRY_TYPE_ANIMATION,
        )?;
        self.out.write_f32::<LittleEndian>(anim.length)?;
        self.out
            .write_f32::<LittleEndian>(anim.transition_time)?;
        self.write_fixed_string(&anim.anim_root, layout::NAME_LEN)?;
        self.write_array_desc(plan.events_offset, anim.events.len() as u32)?;
        self.out.write_u32::<LittleEndian>(0)?;
        for event in &anim.events {
            self.out.write_f32::<LittleEndian>(event.time)?;
            self.write_fixed_string(&event.name, layout::NAME_LEN)?;
        }

        let mut counter = 0usize;
        self.emit_anim_node(&anim.root, plan, &mut counter)?;
        Ok(())
    }

    fn emit_anim_node(
        &mut self,
        node: &AnimationNode,
        anim_plan: &AnimPlan,
        counter: &mut usize,
    ) -> Result<()> {
        let plan = &anim_plan.nodes[*counter];
        *counter += 1;
        debug_assert_eq!(self.pos(), plan.offset);

        self.emit_node_header(
            layout::node_flags::HEADER,
            node.node_id,
            plan,
            Vec3::ZERO,
            Quat::IDENTITY,
            node.children.len() as u32,
        )?;
        self.emit_controllers(plan)?;
        for &child_offset in &plan.children_offsets {
            self.out.write_u32::<LittleEndian>(child_offset)?;
        }
        for child in &node.children {
            self.emit_anim_node(child, anim_plan, counter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_counter_blocks() {
        // Values count down within power-of-two-sized blocks.
        let expected = [0u32, 2, 1, 6, 5, 4, 3, 14, 13, 12, 11, 10, 9, 8, 7, 30];
        for (ordinal, &value) in expected.iter().enumerate() {
            assert_eq!(inverted_counter(ordinal as u32), value, "ordinal {ordinal}");
        }
    }

    #[test]
    fn test_pad4() {
        assert_eq!(pad4(0), 0);
        assert_eq!(pad4(5), 8);
        assert_eq!(pad4(6), 8);
        assert_eq!(pad4(8), 8);
    }

    #[test]
    fn test_bind_pose_is_synthesized() {
        let block = build_controller_block(
            &[],
            Some((Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY)),
            ControllerClass::Common,
            false,
            "node",
        )
        .unwrap();
        assert_eq!(block.keys.len(), 2);
        assert_eq!(block.keys[0].controller_type, POSITION);
        assert_eq!(block.keys[1].controller_type, ORIENTATION);
        assert_eq!(block.keys[0].row_count, 1);
        // time + 3 position floats + time + 4 orientation floats
        assert_eq!(block.data.len(), 9);
    }

    #[test]
    fn test_bezier_tangents_stored_as_deltas() {
        let controller = Controller {
            controller_type: POSITION,
            interpolation: Interpolation::Bezier,
            rows: vec![crate::model::ControllerRow {
                time: 0.5,
                values: vec![
                    1.0, 2.0, 3.0, // key value
                    1.5, 2.5, 3.5, // absolute in-tangents
                    0.5, 1.5, 2.5, // absolute out-tangents
                ],
            }],
        };
        let block = build_controller_block(
            std::slice::from_ref(&controller),
            None,
            ControllerClass::Common,
            false,
            "node",
        )
        .unwrap();
        let key = &block.keys[0];
        assert_eq!(key.column_count, 3 | CONTROLLER_BEZIER_FLAG);
        let data: Vec<f32> = block.data.iter().map(|&w| f32::from_bits(w)).collect();
        // time, values, in deltas, out deltas
        assert_eq!(data[1..4], [1.0, 2.0, 3.0]);
        assert_eq!(data[4..7], [0.5, 0.5, 0.5]);
        assert_eq!(data[7..10], [-0.5, -0.5, -0.5]);
    }
}

//! MDL/MDX binary reading and decoding
//!
//! The structure stream is offset-table based: every cross-reference is an
//! absolute byte offset into the region after the 12-byte file header. The
//! decoder validates the file header, fingerprints the variant, resolves the
//! name table, peeks the node tree for visitation order, then decodes nodes
//! depth-first. Any failure is fatal; no partial model is returned.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Quat, Vec2, Vec3};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{
    mesh::{remap_bones, saber_faces, TangentFrame},
    AabbNode, AabbNodeKind, AabbTree, Animation, AnimationEvent, AnimationNode, Classification,
    Controller, ControllerRow, Dangly, Emitter, Face, Interpolation, Light, Mesh, MeshKind,
    MeshPayload, Model, Node, NodePayload, Reference, Skin, SABER_VERTEX_COUNT,
};

use super::controllers::{self, ControllerClass};
use super::layout::{
    self, mdx_flags, NodeTypeKind, ABSENT_OFFSET, CONTROLLER_BEZIER_FLAG, FILE_HEADER_SIZE,
    GEOMETRY_HEADER_SIZE, MDL_SENTINEL, NODE_HEADER_SIZE,
};
use super::quaternion::decompress_quaternion;
use super::variant::Variant;

/// Read and decode a model from disk.
pub fn read_model<P: AsRef<Path>>(mdl_path: P, mdx_path: Option<P>) -> Result<Model> {
    let mdl = std::fs::read(mdl_path)?;
    let mdx = match mdx_path {
        Some(p) => Some(std::fs::read(p)?),
        None => None,
    };
    decode_model(&mdl, mdx.as_deref())
}

/// Fingerprint the platform/edition variant of a structure stream without
/// decoding it.
pub fn sniff_variant(mdl: &[u8]) -> Result<Variant> {
    let data = check_file_header(mdl, None)?;
    let mut cur = data.block(0, 8)?;
    let fn_ptr1 = cur.read_u32::<LittleEndian>()?;
    let fn_ptr2 = cur.read_u32::<LittleEndian>()?;
    Variant::from_fn_ptrs(fn_ptr1, fn_ptr2)
}

/// Decode a model from its structure stream and optional vertex stream.
pub fn decode_model(mdl: &[u8], mdx: Option<&[u8]>) -> Result<Model> {
    let data = check_file_header(mdl, mdx)?;
    let decoder = Decoder::new(data, mdx.map(|m| Stream::new(m, "MDX")))?;
    decoder.decode()
}

/// Validate the fixed file header and return the addressable data region.
fn check_file_header<'a>(mdl: &'a [u8], mdx: Option<&[u8]>) -> Result<Stream<'a>> {
    if mdl.len() < FILE_HEADER_SIZE as usize {
        return Err(Error::CorruptHeader {
            field: "file header",
            expected: u64::from(FILE_HEADER_SIZE),
            actual: mdl.len() as u64,
        });
    }
    let mut cur = Cursor::new(mdl);
    let sentinel = cur.read_u32::<LittleEndian>()?;
    if sentinel != MDL_SENTINEL {
        return Err(Error::CorruptHeader {
            field: "sentinel",
            expected: u64::from(MDL_SENTINEL),
            actual: u64::from(sentinel),
        });
    }
    let mdl_data_size = cur.read_u32::<LittleEndian>()?;
    let mdx_size = cur.read_u32::<LittleEndian>()?;

    let actual_data = mdl.len() as u64 - u64::from(FILE_HEADER_SIZE);
    if u64::from(mdl_data_size) != actual_data {
        return Err(Error::CorruptHeader {
            field: "MDL data size",
            expected: u64::from(mdl_data_size),
            actual: actual_data,
        });
    }
    if let Some(mdx) = mdx
        && mdx.len() as u64 != u64::from(mdx_size)
    {
        return Err(Error::CorruptHeader {
            field: "MDX size",
            expected: u64::from(mdx_size),
            actual: mdx.len() as u64,
        });
    }

    Ok(Stream::new(&mdl[FILE_HEADER_SIZE as usize..], "MDL"))
}

// =============================================================================
// BOUNDS-CHECKED STREAM ACCESS
// =============================================================================

/// A byte-addressable stream with bounds-checked block access.
#[derive(Clone, Copy)]
struct Stream<'a> {
    data: &'a [u8],
    label: &'static str,
}

impl<'a> Stream<'a> {
    fn new(data: &'a [u8], label: &'static str) -> Self {
        Self { data, label }
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn slice(&self, offset: u64, len: u64) -> Result<&'a [u8]> {
        let end = offset.checked_add(len).ok_or(Error::OutOfBounds {
            offset,
            len,
            stream: self.label,
            size: self.len(),
        })?;
        if end > self.len() {
            return Err(Error::OutOfBounds {
                offset,
                len,
                stream: self.label,
                size: self.len(),
            });
        }
        Ok(&self.data[offset as usize..end as usize])
    }

    /// A cursor over a bounds-checked block.
    fn block(&self, offset: u64, len: u64) -> Result<Cursor<&'a [u8]>> {
        Ok(Cursor::new(self.slice(offset, len)?))
    }

    /// Read a nul-terminated string at `offset`.
    fn c_string(&self, offset: u64) -> Result<String> {
        let rest = self.slice(offset, self.len().saturating_sub(offset))?;
        let nul = rest.iter().position(|&b| b == 0).ok_or(Error::OutOfBounds {
            offset,
            len: rest.len() as u64 + 1,
            stream: self.label,
            size: self.len(),
        })?;
        Ok(String::from_utf8(rest[..nul].to_vec())?)
    }
}

/// A (offset, count, count) array descriptor with its redundant count pair
/// already validated.
#[derive(Debug, Clone, Copy)]
struct ArrayDesc {
    offset: u32,
    count: u32,
}

/// Read an array descriptor; `desc_offset` is the descriptor's own position,
/// used for error context.
fn read_array_desc<R: Read>(cur: &mut R, desc_offset: u64) -> Result<ArrayDesc> {
    let offset = cur.read_u32::<LittleEndian>()?;
    let count = cur.read_u32::<LittleEndian>()?;
    let count2 = cur.read_u32::<LittleEndian>()?;
    if count != count2 {
        return Err(Error::ArrayCountMismatch {
            offset: desc_offset,
            count,
            count2,
        });
    }
    Ok(ArrayDesc { offset, count })
}

fn read_vec3<R: Read>(cur: &mut R) -> Result<Vec3> {
    Ok(Vec3::new(
        cur.read_f32::<LittleEndian>()?,
        cur.read_f32::<LittleEndian>()?,
        cur.read_f32::<LittleEndian>()?,
    ))
}

fn read_vec2<R: Read>(cur: &mut R) -> Result<Vec2> {
    Ok(Vec2::new(
        cur.read_f32::<LittleEndian>()?,
        cur.read_f32::<LittleEndian>()?,
    ))
}

/// Read a fixed-size inline name field, trimmed at the first nul.
fn read_fixed_string<R: Read>(cur: &mut R, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn skip<R: Read>(cur: &mut R, len: usize) -> Result<()> {
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    Ok(())
}

// =============================================================================
// DECODER
// =============================================================================

struct Decoder<'a> {
    mdl: Stream<'a>,
    mdx: Option<Stream<'a>>,
    variant: Variant,
    names: Vec<String>,
    /// Node ids in depth-first visitation order, from the peek pass.
    serial_ids: Vec<u16>,
}

/// Parsed geometry-header fields shared by models and animations.
struct GeometryHeader {
    fn_ptr1: u32,
    fn_ptr2: u32,
    name: String,
    root_offset: u32,
    node_count: u32,
    geometry_type: u8,
}

fn read_geometry_header(cur: &mut Cursor<&[u8]>) -> Result<GeometryHeader> {
    let fn_ptr1 = cur.read_u32::<LittleEndian>()?;
    let fn_ptr2 = cur.read_u32::<LittleEndian>()?;
    let name = read_fixed_string(cur, layout::NAME_LEN)?;
    let root_offset = cur.read_u32::<LittleEndian>()?;
    let node_count = cur.read_u32::<LittleEndian>()?;
    skip(cur, 24)?; // runtime array scratch
    let _ref_count = cur.read_u32::<LittleEndian>()?;
    let geometry_type = cur.read_u8()?;
    skip(cur, 3)?;
    Ok(GeometryHeader {
        fn_ptr1,
        fn_ptr2,
        name,
        root_offset,
        node_count,
        geometry_type,
    })
}

impl<'a> Decoder<'a> {
    fn new(mdl: Stream<'a>, mdx: Option<Stream<'a>>) -> Result<Self> {
        let mut cur = mdl.block(0, u64::from(GEOMETRY_HEADER_SIZE))?;
        let geometry = read_geometry_header(&mut cur)?;
        let variant = Variant::from_fn_ptrs(geometry.fn_ptr1, geometry.fn_ptr2)?;
        debug!(variant = variant.name(), "fingerprinted MDL variant");
        Ok(Self {
            mdl,
            mdx,
            variant,
            names: Vec::new(),
            serial_ids: Vec::new(),
        })
    }

    fn decode(mut self) -> Result<Model> {
        // Geometry header (again, on the fresh cursor) + model header.
        let header_len = u64::from(GEOMETRY_HEADER_SIZE + layout::MODEL_HEADER_SIZE);
        let mut cur = self.mdl.block(0, header_len)?;
        let geometry = read_geometry_header(&mut cur)?;
        if geometry.geometry_type != layout::GEOMETRY_TYPE_MODEL {
            return Err(Error::CorruptHeader {
                field: "geometry type",
                expected: u64::from(layout::GEOMETRY_TYPE_MODEL),
                actual: u64::from(geometry.geometry_type),
            });
        }

        let classification = Classification::from_u8(cur.read_u8()?);
        let _subclassification = cur.read_u8()?;
        let _unknown = cur.read_u8()?;
        let affected_by_fog = cur.read_u8()? != 0;
        let _child_model_count = cur.read_u32::<LittleEndian>()?;
        let anim_desc = read_array_desc(&mut cur, u64::from(GEOMETRY_HEADER_SIZE) + 8)?;
        let _supermodel_ref = cur.read_u32::<LittleEndian>()?;
        skip(&mut cur, 24)?; // bounding box, derived
        let _radius = cur.read_f32::<LittleEndian>()?;
        let animation_scale = cur.read_f32::<LittleEndian>()?;
        let supermodel_name = read_fixed_string(&mut cur, layout::NAME_LEN)?;
        let _anim_root_offset = cur.read_u32::<LittleEndian>()?;
        let _padding = cur.read_u32::<LittleEndian>()?;
        let _mdx_length = cur.read_u32::<LittleEndian>()?;
        let _mdx_offset = cur.read_u32::<LittleEndian>()?;
        let names_desc_offset = u64::from(GEOMETRY_HEADER_SIZE) + 104;
        let names_desc = read_array_desc(&mut cur, names_desc_offset)?;

        // Resolve the name table fully before any node decode.
        self.names = self.read_name_table(names_desc)?;
        debug!(count = self.names.len(), "resolved name table");

        // Peek pass: visitation order of ids and name indices, no nodes built.
        let mut peeked = Vec::new();
        self.peek_node(u64::from(geometry.root_offset), &mut peeked)?;
        if peeked.len() as u32 != geometry.node_count {
            warn!(
                peeked = peeked.len(),
                declared = geometry.node_count,
                "node count field disagrees with tree walk"
            );
        }
        for (visit, &(_, name_index)) in peeked.iter().enumerate() {
            if usize::from(name_index) != visit {
                warn!(visit, name_index, "name table order does not mirror tree order");
                break;
            }
        }
        self.serial_ids = peeked.iter().map(|&(id, _)| id).collect();

        // Depth-first node decode.
        let root = self.decode_node(u64::from(geometry.root_offset))?;

        // Animations, with node classes resolved by id correspondence.
        let mut classes: HashMap<u16, ControllerClass> = HashMap::new();
        collect_classes(&root, &mut classes);
        let mut animations = Vec::new();
        let mut anim_cur = self
            .mdl
            .block(u64::from(anim_desc.offset), u64::from(anim_desc.count) * 4)?;
        for _ in 0..anim_desc.count {
            let offset = anim_cur.read_u32::<LittleEndian>()?;
            animations.push(self.decode_animation(u64::from(offset), &classes)?);
        }

        let supermodel = match supermodel_name.as_str() {
            "" => None,
            s if s.eq_ignore_ascii_case("null") => None,
            s => Some(s.to_string()),
        };

        Ok(Model {
            name: geometry.name,
            classification,
            supermodel,
            animation_scale,
            affected_by_fog,
            root,
            animations,
        })
    }

    fn read_name_table(&self, desc: ArrayDesc) -> Result<Vec<String>> {
        let mut cur = self
            .mdl
            .block(u64::from(desc.offset), u64::from(desc.count) * 4)?;
        let mut names = Vec::with_capacity(desc.count as usize);
        for _ in 0..desc.count {
            let offset = cur.read_u32::<LittleEndian>()?;
            names.push(self.mdl.c_string(u64::from(offset))?);
        }
        Ok(names)
    }

    /// Walk the node tree reading only headers, recording `(id, name index)`
    /// in visitation order.
    fn peek_node(&self, offset: u64, out: &mut Vec<(u16, u16)>) -> Result<()> {
        if out.len() > self.mdl.len() as usize / NODE_HEADER_SIZE as usize {
            // More nodes than could possibly fit: offsets must be looping.
            return Err(Error::OutOfBounds {
                offset,
                len: u64::from(NODE_HEADER_SIZE),
                stream: self.mdl.label,
                size: self.mdl.len(),
            });
        }
        let mut cur = self.mdl.block(offset, u64::from(NODE_HEADER_SIZE))?;
        let _flags = cur.read_u16::<LittleEndian>()?;
        let id = cur.read_u16::<LittleEndian>()?;
        let name_index = cur.read_u16::<LittleEndian>()?;
        skip(&mut cur, 2 + 8 + 12 + 16)?;
        let children = read_array_desc(&mut cur, offset + 44)?;
        out.push((id, name_index));

        let mut child_cur = self
            .mdl
            .block(u64::from(children.offset), u64::from(children.count) * 4)?;
        for _ in 0..children.count {
            let child_offset = child_cur.read_u32::<LittleEndian>()?;
            self.peek_node(u64::from(child_offset), out)?;
        }
        Ok(())
    }

    fn node_name(&self, name_index: u16) -> Result<String> {
        self.names
            .get(usize::from(name_index))
            .cloned()
            .ok_or(Error::CorruptHeader {
                field: "name index",
                expected: self.names.len() as u64,
                actual: u64::from(name_index),
            })
    }

    fn decode_node(&self, offset: u64) -> Result<Node> {
        let mut cur = self.mdl.block(offset, u64::from(NODE_HEADER_SIZE))?;
        let flags = cur.read_u16::<LittleEndian>()?;
        let id = cur.read_u16::<LittleEndian>()?;
        let name_index = cur.read_u16::<LittleEndian>()?;
        let _pad = cur.read_u16::<LittleEndian>()?;
        let _root_offset = cur.read_u32::<LittleEndian>()?;
        let _parent_offset = cur.read_u32::<LittleEndian>()?;
        let position = read_vec3(&mut cur)?;
        // Orientation is stored w-first.
        let w = cur.read_f32::<LittleEndian>()?;
        let x = cur.read_f32::<LittleEndian>()?;
        let y = cur.read_f32::<LittleEndian>()?;
        let z = cur.read_f32::<LittleEndian>()?;
        let orientation = Quat::from_xyzw(x, y, z, w);
        let children_desc = read_array_desc(&mut cur, offset + 44)?;
        let keys_desc = read_array_desc(&mut cur, offset + 56)?;
        let data_desc = read_array_desc(&mut cur, offset + 68)?;

        let kind = NodeTypeKind::from_flags(flags, offset)?;
        let payload = self.decode_payload(kind, offset + u64::from(NODE_HEADER_SIZE))?;

        let name = self.node_name(name_index)?;
        let class = controllers::class_of(&payload);
        let controllers = self.decode_controllers(keys_desc, data_desc, class, &name)?;

        let mut children = Vec::with_capacity(children_desc.count as usize);
        let mut child_cur = self.mdl.block(
            u64::from(children_desc.offset),
            u64::from(children_desc.count) * 4,
        )?;
        for _ in 0..children_desc.count {
            let child_offset = child_cur.read_u32::<LittleEndian>()?;
            children.push(self.decode_node(u64::from(child_offset))?);
        }

        Ok(Node {
            id,
            name,
            position,
            orientation,
            controllers,
            payload,
            children,
        })
    }

    fn decode_payload(&self, kind: NodeTypeKind, offset: u64) -> Result<NodePayload> {
        match kind {
            NodeTypeKind::Dummy => Ok(NodePayload::None),
            NodeTypeKind::Light => Ok(NodePayload::Light(Box::new(self.decode_light(offset)?))),
            NodeTypeKind::Emitter => {
                Ok(NodePayload::Emitter(Box::new(self.decode_emitter(offset)?)))
            }
            NodeTypeKind::Reference => {
                Ok(NodePayload::Reference(self.decode_reference(offset)?))
            }
            NodeTypeKind::Trimesh
            | NodeTypeKind::Skin
            | NodeTypeKind::Dangly
            | NodeTypeKind::Saber
            | NodeTypeKind::Aabb => Ok(NodePayload::Mesh(Box::new(
                self.decode_mesh_family(kind, offset)?,
            ))),
        }
    }

    fn decode_light(&self, offset: u64) -> Result<Light> {
        let mut cur = self.mdl.block(offset, u64::from(layout::LIGHT_SIZE))?;
        let flare_radius = cur.read_f32::<LittleEndian>()?;
        let _unknown = read_array_desc(&mut cur, offset + 4)?;
        let sizes_desc = read_array_desc(&mut cur, offset + 16)?;
        let positions_desc = read_array_desc(&mut cur, offset + 28)?;
        let color_shifts_desc = read_array_desc(&mut cur, offset + 40)?;
        let textures_desc = read_array_desc(&mut cur, offset + 52)?;
        let priority = cur.read_u32::<LittleEndian>()?;
        let ambient_only = cur.read_u32::<LittleEndian>()? != 0;
        let dynamic_type = cur.read_u32::<LittleEndian>()?;
        let affect_dynamic = cur.read_u32::<LittleEndian>()? != 0;
        let shadow = cur.read_u32::<LittleEndian>()? != 0;
        let flare = cur.read_u32::<LittleEndian>()? != 0;
        let fading = cur.read_u32::<LittleEndian>()? != 0;

        let flare_sizes = self.read_f32_array(sizes_desc)?;
        let flare_positions = self.read_f32_array(positions_desc)?;
        let mut flare_color_shifts = Vec::with_capacity(color_shifts_desc.count as usize);
        let mut cs_cur = self.mdl.block(
            u64::from(color_shifts_desc.offset),
            u64::from(color_shifts_desc.count) * 12,
        )?;
        for _ in 0..color_shifts_desc.count {
            flare_color_shifts.push(read_vec3(&mut cs_cur)?);
        }
        let mut flare_textures = Vec::with_capacity(textures_desc.count as usize);
        let mut tex_cur = self.mdl.block(
            u64::from(textures_desc.offset),
            u64::from(textures_desc.count) * 4,
        )?;
        for _ in 0..textures_desc.count {
            let string_offset = tex_cur.read_u32::<LittleEndian>()?;
            flare_textures.push(self.mdl.c_string(u64::from(string_offset))?);
        }

        Ok(Light {
            flare_radius,
            flare_sizes,
            flare_positions,
            flare_color_shifts,
            flare_textures,
            priority,
            ambient_only,
            dynamic_type,
            affect_dynamic,
            shadow,
            flare,
            fading,
        })
    }

    fn decode_emitter(&self, offset: u64) -> Result<Emitter> {
        let mut cur = self.mdl.block(offset, u64::from(layout::EMITTER_SIZE))?;
        let dead_space = cur.read_f32::<LittleEndian>()?;
        let blast_radius = cur.read_f32::<LittleEndian>()?;
        let blast_length = cur.read_f32::<LittleEndian>()?;
        let branch_count = cur.read_u32::<LittleEndian>()?;
        let ctrl_pt_smoothing = cur.read_f32::<LittleEndian>()?;
        let x_grid = cur.read_u32::<LittleEndian>()?;
        let y_grid = cur.read_u32::<LittleEndian>()?;
        let spawn_type = cur.read_u32::<LittleEndian>()?;
        let update = read_fixed_string(&mut cur, 32)?;
        let render = read_fixed_string(&mut cur, 32)?;
        let blend = read_fixed_string(&mut cur, 32)?;
        let texture = read_fixed_string(&mut cur, 32)?;
        let chunk_name = read_fixed_string(&mut cur, 16)?;
        let twosided_texture = cur.read_u32::<LittleEndian>()? != 0;
        let looping = cur.read_u32::<LittleEndian>()? != 0;
        let render_order = cur.read_u16::<LittleEndian>()?;
        let frame_blending = cur.read_u8()? != 0;
        let _pad = cur.read_u8()?;
        let depth_texture = read_fixed_string(&mut cur, 32)?;
        let flags = cur.read_u32::<LittleEndian>()?;
        let _pad2 = cur.read_u32::<LittleEndian>()?;

        Ok(Emitter {
            dead_space,
            blast_radius,
            blast_length,
            branch_count,
            ctrl_pt_smoothing,
            x_grid,
            y_grid,
            spawn_type,
            update,
            render,
            blend,
            texture,
            chunk_name,
            twosided_texture,
            looping,
            render_order,
            frame_blending,
            depth_texture,
            flags,
        })
    }

    fn decode_reference(&self, offset: u64) -> Result<Reference> {
        let mut cur = self.mdl.block(offset, u64::from(layout::REFERENCE_SIZE))?;
        let model = read_fixed_string(&mut cur, 32)?;
        let reattachable = cur.read_u32::<LittleEndian>()? != 0;
        Ok(Reference {
            model,
            reattachable,
        })
    }

    fn read_f32_array(&self, desc: ArrayDesc) -> Result<Vec<f32>> {
        let mut cur = self
            .mdl
            .block(u64::from(desc.offset), u64::from(desc.count) * 4)?;
        let mut out = Vec::with_capacity(desc.count as usize);
        for _ in 0..desc.count {
            out.push(cur.read_f32::<LittleEndian>()?);
        }
        Ok(out)
    }

    fn decode_mesh_family(&self, kind: NodeTypeKind, offset: u64) -> Result<MeshPayload> {
        let header = self.decode_mesh_header(offset)?;
        let extra_offset = offset + u64::from(self.variant.mesh_header_size());

        let mut mesh = header.mesh.clone();
        let kind = match kind {
            NodeTypeKind::Trimesh => {
                self.read_mesh_vertex_data(&mut mesh, &header, None)?;
                MeshKind::Trimesh
            }
            NodeTypeKind::Skin => {
                let skin = self.decode_skin(extra_offset, &mut mesh, &header)?;
                MeshKind::Skin(skin)
            }
            NodeTypeKind::Dangly => {
                self.read_mesh_vertex_data(&mut mesh, &header, None)?;
                MeshKind::Dangly(self.decode_dangly(extra_offset)?)
            }
            NodeTypeKind::Saber => {
                self.decode_saber(extra_offset, &mut mesh)?;
                MeshKind::Saber
            }
            NodeTypeKind::Aabb => {
                self.read_mesh_vertex_data(&mut mesh, &header, None)?;
                MeshKind::Aabb(self.decode_aabb_tree(extra_offset)?)
            }
            _ => unreachable!("non-mesh kind routed to mesh decode"),
        };

        Ok(MeshPayload { mesh, kind })
    }

    fn decode_mesh_header(&self, offset: u64) -> Result<DecodedMeshHeader> {
        let mut cur = self
            .mdl
            .block(offset, u64::from(self.variant.mesh_header_size()))?;
        let _fn_ptr1 = cur.read_u32::<LittleEndian>()?;
        let _fn_ptr2 = cur.read_u32::<LittleEndian>()?;
        let faces_desc = read_array_desc(&mut cur, offset + 8)?;
        skip(&mut cur, 24)?; // bounding box, derived
        let _radius = cur.read_f32::<LittleEndian>()?;
        skip(&mut cur, 12)?; // average, derived
        let diffuse = read_vec3(&mut cur)?;
        let ambient = read_vec3(&mut cur)?;
        let transparency_hint = cur.read_u32::<LittleEndian>()?;
        let texture1 = read_fixed_string(&mut cur, 32)?;
        let texture2 = read_fixed_string(&mut cur, 32)?;
        skip(&mut cur, 12 + 12)?; // texture3/texture4, unused here
        let _indices_count_desc = read_array_desc(&mut cur, offset + 176)?;
        let _indices_offset_desc = read_array_desc(&mut cur, offset + 188)?;
        let _inverted_counter_desc = read_array_desc(&mut cur, offset + 200)?;
        skip(&mut cur, 12)?; // unknown
        let animate_uv = cur.read_u32::<LittleEndian>()? != 0;
        let uv_direction_x = cur.read_f32::<LittleEndian>()?;
        let uv_direction_y = cur.read_f32::<LittleEndian>()?;
        let uv_jitter = cur.read_f32::<LittleEndian>()?;
        let uv_jitter_speed = cur.read_f32::<LittleEndian>()?;
        let mdx_vertex_size = cur.read_u32::<LittleEndian>()?;
        let mdx_data_flags = cur.read_u32::<LittleEndian>()?;
        let _off_pos = cur.read_u32::<LittleEndian>()?;
        let off_normal = cur.read_u32::<LittleEndian>()?;
        let _off_color = cur.read_u32::<LittleEndian>()?;
        let off_uv1 = cur.read_u32::<LittleEndian>()?;
        let off_uv2 = cur.read_u32::<LittleEndian>()?;
        let _off_uv3 = cur.read_u32::<LittleEndian>()?;
        let _off_uv4 = cur.read_u32::<LittleEndian>()?;
        let off_tangent = cur.read_u32::<LittleEndian>()?;
        skip(&mut cur, 12)?; // unused attribute slots
        let vertex_count = cur.read_u16::<LittleEndian>()?;
        let _texture_count = cur.read_u16::<LittleEndian>()?;
        let has_lightmap = cur.read_u8()? != 0;
        let rotate_texture = cur.read_u8()? != 0;
        let background_geometry = cur.read_u8()? != 0;
        let shadow = cur.read_u8()? != 0;
        let beaming = cur.read_u8()? != 0;
        let render = cur.read_u8()? != 0;
        let _pad = cur.read_u16::<LittleEndian>()?;

        let mut dirt_enabled = false;
        let mut dirt_texture = 0u16;
        let mut dirt_coord_space = 0u16;
        let mut hide_in_holograms = false;
        if self.variant.is_second_edition() {
            dirt_enabled = cur.read_u8()? != 0;
            let _pad = cur.read_u8()?;
            dirt_texture = cur.read_u16::<LittleEndian>()?;
            dirt_coord_space = cur.read_u16::<LittleEndian>()?;
            hide_in_holograms = cur.read_u8()? != 0;
            let _pad = cur.read_u8()?;
        }

        let _total_area = cur.read_f32::<LittleEndian>()?;
        let _unknown = cur.read_u32::<LittleEndian>()?;
        let mdx_base_offset = cur.read_u32::<LittleEndian>()?;
        let vertex_coords_offset = cur.read_u32::<LittleEndian>()?;

        // Faces.
        let mut faces = Vec::with_capacity(faces_desc.count as usize);
        let mut face_cur = self.mdl.block(
            u64::from(faces_desc.offset),
            u64::from(faces_desc.count) * u64::from(layout::FACE_SIZE),
        )?;
        for _ in 0..faces_desc.count {
            let normal = read_vec3(&mut face_cur)?;
            let plane_distance = face_cur.read_f32::<LittleEndian>()?;
            let material = face_cur.read_u32::<LittleEndian>()?;
            skip(&mut face_cur, 6)?; // adjacency
            let indices = [
                face_cur.read_u16::<LittleEndian>()?,
                face_cur.read_u16::<LittleEndian>()?,
                face_cur.read_u16::<LittleEndian>()?,
            ];
            faces.push(Face {
                indices,
                material,
                normal,
                plane_distance,
            });
        }

        let mesh = Mesh {
            faces,
            diffuse,
            ambient,
            transparency_hint,
            texture1,
            texture2,
            render,
            shadow,
            beaming,
            rotate_texture,
            background_geometry,
            has_lightmap,
            animate_uv,
            uv_direction_x,
            uv_direction_y,
            uv_jitter,
            uv_jitter_speed,
            dirt_enabled,
            dirt_texture,
            dirt_coord_space,
            hide_in_holograms,
            ..Mesh::default()
        };

        Ok(DecodedMeshHeader {
            mesh,
            vertex_count: u32::from(vertex_count),
            vertex_coords_offset,
            mdx_base_offset,
            mdx_vertex_size,
            mdx_data_flags,
            off_normal,
            off_uv1,
            off_uv2,
            off_tangent,
        })
    }

    /// Gather vertex arrays: positions from the structure stream's vertex
    /// coordinate block, everything else from the vertex stream per the
    /// attribute bitmask. Absent attributes stay empty.
    fn read_mesh_vertex_data(
        &self,
        mesh: &mut Mesh,
        header: &DecodedMeshHeader,
        skin_offsets: Option<(u32, u32)>,
    ) -> Result<()> {
        let count = header.vertex_count as usize;
        if count == 0 {
            return Ok(());
        }

        let mut pos_cur = self.mdl.block(
            u64::from(header.vertex_coords_offset),
            header.vertex_count as u64 * 12,
        )?;
        mesh.positions = Vec::with_capacity(count);
        for _ in 0..count {
            mesh.positions.push(read_vec3(&mut pos_cur)?);
        }

        let flags = header.mdx_data_flags;
        let wants_normal = flags & mdx_flags::NORMAL != 0 && header.off_normal != ABSENT_OFFSET;
        let wants_uv1 = flags & mdx_flags::UV1 != 0 && header.off_uv1 != ABSENT_OFFSET;
        let wants_uv2 = flags & mdx_flags::UV2 != 0 && header.off_uv2 != ABSENT_OFFSET;
        let wants_tangent = flags & mdx_flags::TANGENT != 0 && header.off_tangent != ABSENT_OFFSET;
        let needs_mdx =
            wants_normal || wants_uv1 || wants_uv2 || wants_tangent || skin_offsets.is_some();
        if !needs_mdx {
            return Ok(());
        }
        let mdx = self.mdx.as_ref().ok_or(Error::MissingCompanionStream)?;
        let stride = u64::from(header.mdx_vertex_size);
        let base = u64::from(header.mdx_base_offset);

        for v in 0..header.vertex_count as u64 {
            let vertex_base = base + v * stride;
            if wants_normal {
                let mut cur = mdx.block(vertex_base + u64::from(header.off_normal), 12)?;
                mesh.normals.push(read_vec3(&mut cur)?);
            }
            if wants_uv1 {
                let mut cur = mdx.block(vertex_base + u64::from(header.off_uv1), 8)?;
                mesh.uv1.push(read_vec2(&mut cur)?);
            }
            if wants_uv2 {
                let mut cur = mdx.block(vertex_base + u64::from(header.off_uv2), 8)?;
                mesh.uv2.push(read_vec2(&mut cur)?);
            }
            if wants_tangent {
                let mut cur = mdx.block(vertex_base + u64::from(header.off_tangent), 24)?;
                mesh.tangents.push(TangentFrame {
                    tangent: read_vec3(&mut cur)?,
                    bitangent: read_vec3(&mut cur)?,
                });
            }
            if let Some((off_weights, off_indices)) = skin_offsets {
                let mut cur = mdx.block(vertex_base + u64::from(off_weights), 16)?;
                let mut weights = [0.0f32; 4];
                for w in &mut weights {
                    *w = cur.read_f32::<LittleEndian>()?;
                }
                mesh.bone_weights.push(weights);

                let width = u64::from(self.variant.bone_index_width());
                let mut cur = mdx.block(vertex_base + u64::from(off_indices), 4 * width)?;
                let mut indices = [0u16; 4];
                for slot in &mut indices {
                    *slot = if self.variant.is_xbox() {
                        cur.read_i16::<LittleEndian>()?.max(0) as u16
                    } else {
                        cur.read_f32::<LittleEndian>()?.max(0.0) as u16
                    };
                }
                mesh.bone_indices.push(indices);
            }
        }
        Ok(())
    }

    fn decode_skin(
        &self,
        offset: u64,
        mesh: &mut Mesh,
        header: &DecodedMeshHeader,
    ) -> Result<Skin> {
        let mut cur = self.mdl.block(offset, u64::from(layout::SKIN_SIZE))?;
        let _unknown = read_array_desc(&mut cur, offset)?;
        let mdx_weights_offset = cur.read_u32::<LittleEndian>()?;
        let mdx_bone_indices_offset = cur.read_u32::<LittleEndian>()?;
        let bonemap_offset = cur.read_u32::<LittleEndian>()?;
        let bonemap_count = cur.read_u32::<LittleEndian>()?;
        let qbones_desc = read_array_desc(&mut cur, offset + 28)?;
        let tbones_desc = read_array_desc(&mut cur, offset + 40)?;
        let _unknown2 = read_array_desc(&mut cur, offset + 52)?;
        skip(&mut cur, 2 * layout::SKIN_BONE_SLOTS + 4)?; // stored bone serials, derived

        self.read_mesh_vertex_data(
            mesh,
            header,
            Some((mdx_weights_offset, mdx_bone_indices_offset)),
        )?;

        let raw_bonemap = self.read_f32_array(ArrayDesc {
            offset: bonemap_offset,
            count: bonemap_count,
        })?;

        let mut qbones = Vec::with_capacity(qbones_desc.count as usize);
        let mut q_cur = self
            .mdl
            .block(u64::from(qbones_desc.offset), u64::from(qbones_desc.count) * 16)?;
        for _ in 0..qbones_desc.count {
            let w = q_cur.read_f32::<LittleEndian>()?;
            let x = q_cur.read_f32::<LittleEndian>()?;
            let y = q_cur.read_f32::<LittleEndian>()?;
            let z = q_cur.read_f32::<LittleEndian>()?;
            qbones.push(Quat::from_xyzw(x, y, z, w));
        }
        let mut tbones = Vec::with_capacity(tbones_desc.count as usize);
        let mut t_cur = self
            .mdl
            .block(u64::from(tbones_desc.offset), u64::from(tbones_desc.count) * 12)?;
        for _ in 0..tbones_desc.count {
            tbones.push(read_vec3(&mut t_cur)?);
        }

        // Runtime lookup tables come from the remapper, not the stream.
        let (bone_serial, bone_node_id) = remap_bones(&self.serial_ids, &raw_bonemap);

        Ok(Skin {
            bonemap: raw_bonemap.iter().map(|&v| v as i32).collect(),
            bone_orientations: qbones,
            bone_translations: tbones,
            bone_serial,
            bone_node_id,
        })
    }

    fn decode_dangly(&self, offset: u64) -> Result<Dangly> {
        let mut cur = self.mdl.block(offset, u64::from(layout::DANGLY_SIZE))?;
        let constraints_desc = read_array_desc(&mut cur, offset)?;
        let displacement = cur.read_f32::<LittleEndian>()?;
        let tightness = cur.read_f32::<LittleEndian>()?;
        let period = cur.read_f32::<LittleEndian>()?;
        let _data_offset = cur.read_u32::<LittleEndian>()?;
        let constraints = self.read_f32_array(constraints_desc)?;
        Ok(Dangly {
            constraints,
            displacement,
            tightness,
            period,
        })
    }

    fn decode_saber(&self, offset: u64, mesh: &mut Mesh) -> Result<()> {
        let mut cur = self.mdl.block(offset, u64::from(layout::SABER_SIZE))?;
        let verts_offset = cur.read_u32::<LittleEndian>()?;
        let uvs_offset = cur.read_u32::<LittleEndian>()?;
        let normals_offset = cur.read_u32::<LittleEndian>()?;
        let _inv_count1 = cur.read_u32::<LittleEndian>()?;
        let _inv_count2 = cur.read_u32::<LittleEndian>()?;

        let count = SABER_VERTEX_COUNT as u64;
        let mut v_cur = self.mdl.block(u64::from(verts_offset), count * 12)?;
        let mut uv_cur = self.mdl.block(u64::from(uvs_offset), count * 8)?;
        let mut n_cur = self.mdl.block(u64::from(normals_offset), count * 12)?;
        mesh.positions = Vec::with_capacity(SABER_VERTEX_COUNT);
        mesh.uv1 = Vec::with_capacity(SABER_VERTEX_COUNT);
        mesh.normals = Vec::with_capacity(SABER_VERTEX_COUNT);
        for _ in 0..SABER_VERTEX_COUNT {
            mesh.positions.push(read_vec3(&mut v_cur)?);
            mesh.uv1.push(read_vec2(&mut uv_cur)?);
            mesh.normals.push(read_vec3(&mut n_cur)?);
        }
        // The blade's topology is fixed; stored face data is ignored.
        mesh.faces = saber_faces();
        Ok(())
    }

    fn decode_aabb_tree(&self, offset: u64) -> Result<AabbTree> {
        let mut cur = self.mdl.block(offset, u64::from(layout::AABB_SIZE))?;
        let root_offset = cur.read_u32::<LittleEndian>()?;
        if root_offset == 0 {
            return Ok(AabbTree { root: None });
        }
        let root = self.decode_aabb_node(u64::from(root_offset), 0)?;
        Ok(AabbTree {
            root: Some(Box::new(root)),
        })
    }

    fn decode_aabb_node(&self, offset: u64, depth: u32) -> Result<AabbNode> {
        if depth > 64 {
            // Deeper than any tree over 2^32 faces could be: offsets loop.
            return Err(Error::OutOfBounds {
                offset,
                len: u64::from(layout::AABB_NODE_SIZE),
                stream: self.mdl.label,
                size: self.mdl.len(),
            });
        }
        let mut cur = self.mdl.block(offset, u64::from(layout::AABB_NODE_SIZE))?;
        let min = read_vec3(&mut cur)?;
        let max = read_vec3(&mut cur)?;
        let left = cur.read_u32::<LittleEndian>()?;
        let right = cur.read_u32::<LittleEndian>()?;
        let face = cur.read_i32::<LittleEndian>()?;
        let plane = cur.read_u32::<LittleEndian>()?;

        // A record is a leaf iff both child offsets are zero.
        let kind = if left == 0 && right == 0 {
            if face < 0 {
                return Err(Error::CorruptHeader {
                    field: "aabb leaf face index",
                    expected: 0,
                    actual: face as u64,
                });
            }
            AabbNodeKind::Leaf { face: face as u32 }
        } else {
            if left == 0 || right == 0 {
                return Err(Error::CorruptHeader {
                    field: "aabb branch child offset",
                    expected: u64::from(left.max(right)),
                    actual: 0,
                });
            }
            AabbNodeKind::Branch {
                left: Box::new(self.decode_aabb_node(u64::from(left), depth + 1)?),
                right: Box::new(self.decode_aabb_node(u64::from(right), depth + 1)?),
                plane,
            }
        };
        Ok(AabbNode { min, max, kind })
    }

    fn decode_controllers(
        &self,
        keys_desc: ArrayDesc,
        data_desc: ArrayDesc,
        class: ControllerClass,
        node_name: &str,
    ) -> Result<Vec<Controller>> {
        // The shared data array is raw 32-bit words; packed quaternions are
        // stored as bit patterns, everything else as float bits.
        let mut data = Vec::with_capacity(data_desc.count as usize);
        let mut data_cur = self
            .mdl
            .block(u64::from(data_desc.offset), u64::from(data_desc.count) * 4)?;
        for _ in 0..data_desc.count {
            data.push(data_cur.read_u32::<LittleEndian>()?);
        }

        let mut out = Vec::with_capacity(keys_desc.count as usize);
        let mut key_cur = self.mdl.block(
            u64::from(keys_desc.offset),
            u64::from(keys_desc.count) * u64::from(layout::CONTROLLER_KEY_SIZE),
        )?;
        for _ in 0..keys_desc.count {
            let controller_type = key_cur.read_u32::<LittleEndian>()?;
            let _unknown = key_cur.read_u16::<LittleEndian>()?;
            let row_count = key_cur.read_u16::<LittleEndian>()?;
            let time_index = key_cur.read_u16::<LittleEndian>()?;
            let data_index = key_cur.read_u16::<LittleEndian>()?;
            let column_count = key_cur.read_u8()?;
            skip(&mut key_cur, 3)?;

            let def = controllers::lookup(class, controller_type).ok_or_else(|| {
                Error::InvalidControllerType {
                    controller_type,
                    columns: column_count,
                    node: node_name.to_string(),
                }
            })?;
            let bezier = column_count & CONTROLLER_BEZIER_FLAG != 0;
            let base_columns = usize::from(column_count & 0x0F);
            let compressed = controller_type == controllers::ORIENTATION
                && !bezier
                && base_columns == 2;
            if !compressed && base_columns != usize::from(def.columns) {
                return Err(Error::InvalidControllerType {
                    controller_type,
                    columns: column_count,
                    node: node_name.to_string(),
                });
            }

            let word = |index: usize| -> Result<u32> {
                data.get(index).copied().ok_or(Error::OutOfBounds {
                    offset: u64::from(data_desc.offset) + index as u64 * 4,
                    len: 4,
                    stream: self.mdl.label,
                    size: self.mdl.len(),
                })
            };

            let mut rows = Vec::with_capacity(usize::from(row_count));
            for r in 0..usize::from(row_count) {
                let time = f32::from_bits(word(usize::from(time_index) + r)?);
                let values = if compressed {
                    let q = decompress_quaternion(word(usize::from(data_index) + r)?);
                    vec![q.x, q.y, q.z, q.w]
                } else if bezier {
                    // Triple columns: key values then in/out tangent deltas.
                    let stride = base_columns * 3;
                    let start = usize::from(data_index) + r * stride;
                    let mut values = Vec::with_capacity(stride);
                    for c in 0..base_columns {
                        values.push(f32::from_bits(word(start + c)?));
                    }
                    for c in 0..base_columns * 2 {
                        let delta = f32::from_bits(word(start + base_columns + c)?);
                        values.push(values[c % base_columns] + delta);
                    }
                    values
                } else {
                    let start = usize::from(data_index) + r * base_columns;
                    let mut values = Vec::with_capacity(base_columns);
                    for c in 0..base_columns {
                        values.push(f32::from_bits(word(start + c)?));
                    }
                    values
                };
                rows.push(ControllerRow { time, values });
            }

            out.push(Controller {
                controller_type,
                interpolation: if bezier {
                    Interpolation::Bezier
                } else {
                    Interpolation::Linear
                },
                rows,
            });
        }
        Ok(out)
    }

    fn decode_animation(
        &self,
        offset: u64,
        classes: &HashMap<u16, ControllerClass>,
    ) -> Result<Animation> {
        let header_len = u64::from(GEOMETRY_HEADER_SIZE + layout::ANIMATION_HEADER_SIZE);
        let mut cur = self.mdl.block(offset, header_len)?;
        let geometry = read_geometry_header(&mut cur)?;
        if geometry.geometry_type != layout::GEOMETRY_TYPE_ANIMATION {
            return Err(Error::CorruptHeader {
                field: "animation geometry type",
                expected: u64::from(layout::GEOMETRY_TYPE_ANIMATION),
                actual: u64::from(geometry.geometry_type),
            });
        }
        let length = cur.read_f32::<LittleEndian>()?;
        let transition_time = cur.read_f32::<LittleEndian>()?;
        let anim_root = read_fixed_string(&mut cur, layout::NAME_LEN)?;
        let events_desc = read_array_desc(
            &mut cur,
            offset + u64::from(GEOMETRY_HEADER_SIZE) + 40,
        )?;
        let _unknown = cur.read_u32::<LittleEndian>()?;

        let mut events = Vec::with_capacity(events_desc.count as usize);
        let mut event_cur = self.mdl.block(
            u64::from(events_desc.offset),
            u64::from(events_desc.count) * u64::from(layout::EVENT_SIZE),
        )?;
        for _ in 0..events_desc.count {
            let time = event_cur.read_f32::<LittleEndian>()?;
            let name = read_fixed_string(&mut event_cur, layout::NAME_LEN)?;
            events.push(AnimationEvent { time, name });
        }

        let root = self.decode_animation_node(u64::from(geometry.root_offset), classes)?;

        Ok(Animation {
            name: geometry.name,
            anim_root,
            length,
            transition_time,
            events,
            root,
        })
    }

    /// Shadow nodes reuse the node header but carry controllers only; their
    /// controller class is the mirrored model node's, resolved by id.
    fn decode_animation_node(
        &self,
        offset: u64,
        classes: &HashMap<u16, ControllerClass>,
    ) -> Result<AnimationNode> {
        let mut cur = self.mdl.block(offset, u64::from(NODE_HEADER_SIZE))?;
        let _flags = cur.read_u16::<LittleEndian>()?;
        let id = cur.read_u16::<LittleEndian>()?;
        let name_index = cur.read_u16::<LittleEndian>()?;
        skip(&mut cur, 2 + 8 + 12 + 16)?;
        let children_desc = read_array_desc(&mut cur, offset + 44)?;
        let keys_desc = read_array_desc(&mut cur, offset + 56)?;
        let data_desc = read_array_desc(&mut cur, offset + 68)?;

        let name = self.node_name(name_index)?;
        let class = classes
            .get(&id)
            .copied()
            .unwrap_or(ControllerClass::Common);
        let controllers = self.decode_controllers(keys_desc, data_desc, class, &name)?;

        let mut children = Vec::with_capacity(children_desc.count as usize);
        let mut child_cur = self.mdl.block(
            u64::from(children_desc.offset),
            u64::from(children_desc.count) * 4,
        )?;
        for _ in 0..children_desc.count {
            let child_offset = child_cur.read_u32::<LittleEndian>()?;
            children.push(self.decode_animation_node(u64::from(child_offset), classes)?);
        }

        Ok(AnimationNode {
            node_id: id,
            name,
            controllers,
            children,
        })
    }
}

/// Decoded fixed mesh-header fields the vertex gather needs.
struct DecodedMeshHeader {
    mesh: Mesh,
    vertex_count: u32,
    vertex_coords_offset: u32,
    mdx_base_offset: u32,
    mdx_vertex_size: u32,
    mdx_data_flags: u32,
    off_normal: u32,
    off_uv1: u32,
    off_uv2: u32,
    off_tangent: u32,
}

fn collect_classes(node: &Node, out: &mut HashMap<u16, ControllerClass>) {
    out.insert(node.id, controllers::class_of(&node.payload));
    for child in &node.children {
        collect_classes(child, out);
    }
}

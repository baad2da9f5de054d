//! Byte-layout constants of the MDL structure stream
//!
//! All offsets stored in the stream are relative to the end of the 12-byte
//! file header; the reader and writer address that region directly.

use crate::error::{Error, Result};
use crate::model::NodePayload;

/// Size of the fixed file header (sentinel + two stream lengths).
pub const FILE_HEADER_SIZE: u32 = 12;
/// First field of every model file.
pub const MDL_SENTINEL: u32 = 0;

/// Geometry header: function pointers, name, root offset, node count.
pub const GEOMETRY_HEADER_SIZE: u32 = 80;
/// Model header following the geometry header.
pub const MODEL_HEADER_SIZE: u32 = 116;
/// Animation header following an animation's geometry header.
pub const ANIMATION_HEADER_SIZE: u32 = 56;
/// Fixed node header preceding any payload block.
pub const NODE_HEADER_SIZE: u32 = 80;

/// Fixed payload block sizes. The mesh header size is per-variant, see
/// [`super::Variant::mesh_header_size`].
pub const LIGHT_SIZE: u32 = 92;
pub const EMITTER_SIZE: u32 = 228;
pub const REFERENCE_SIZE: u32 = 36;
pub const SKIN_SIZE: u32 = 100;
pub const DANGLY_SIZE: u32 = 28;
pub const AABB_SIZE: u32 = 4;
pub const SABER_SIZE: u32 = 20;

/// One record of an aabb collision tree.
pub const AABB_NODE_SIZE: u32 = 40;
/// One face record.
pub const FACE_SIZE: u32 = 32;
/// One controller key entry.
pub const CONTROLLER_KEY_SIZE: u32 = 16;
/// One animation event (time + name).
pub const EVENT_SIZE: u32 = 36;

/// Length of inline name fields (model/texture/supermodel names).
pub const NAME_LEN: usize = 32;

pub const GEOMETRY_TYPE_MODEL: u8 = 2;
pub const GEOMETRY_TYPE_ANIMATION: u8 = 5;

/// Number of bone-serial slots stored inline in a skin header.
pub const SKIN_BONE_SLOTS: usize = 16;

/// Sentinel for absent per-attribute offsets in the mesh header.
pub const ABSENT_OFFSET: u32 = 0xFFFF_FFFF;

/// Bezier bit in a controller key's column count.
pub const CONTROLLER_BEZIER_FLAG: u8 = 16;

/// Node-type bit flags of the node header.
pub mod node_flags {
    pub const HEADER: u16 = 0x0001;
    pub const LIGHT: u16 = 0x0002;
    pub const EMITTER: u16 = 0x0004;
    pub const CAMERA: u16 = 0x0008;
    pub const REFERENCE: u16 = 0x0010;
    pub const MESH: u16 = 0x0020;
    pub const SKIN: u16 = 0x0040;
    pub const ANIM: u16 = 0x0080;
    pub const DANGLY: u16 = 0x0100;
    pub const AABB: u16 = 0x0200;
    pub const SABER: u16 = 0x0800;
}

/// Per-attribute presence bits of the vertex-stream bitmask.
pub mod mdx_flags {
    pub const POSITION: u32 = 0x0001;
    pub const UV1: u32 = 0x0002;
    pub const UV2: u32 = 0x0004;
    pub const NORMAL: u32 = 0x0020;
    pub const COLOR: u32 = 0x0040;
    pub const TANGENT: u32 = 0x0100;
}

/// The node-type flag word the writer emits for a payload.
pub fn node_type_flags(payload: &NodePayload) -> u16 {
    use crate::model::MeshKind;
    match payload {
        NodePayload::None => node_flags::HEADER,
        NodePayload::Light(_) => node_flags::HEADER | node_flags::LIGHT,
        NodePayload::Emitter(_) => node_flags::HEADER | node_flags::EMITTER,
        NodePayload::Reference(_) => node_flags::HEADER | node_flags::REFERENCE,
        NodePayload::Mesh(m) => {
            let base = node_flags::HEADER | node_flags::MESH;
            match m.kind {
                MeshKind::Trimesh => base,
                MeshKind::Skin(_) => base | node_flags::SKIN,
                MeshKind::Dangly(_) => base | node_flags::DANGLY,
                MeshKind::Saber => base | node_flags::SABER,
                MeshKind::Aabb(_) => base | node_flags::AABB,
            }
        }
    }
}

/// Payload kind selected by a node-type flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTypeKind {
    Dummy,
    Light,
    Emitter,
    Reference,
    Trimesh,
    Skin,
    Dangly,
    Saber,
    Aabb,
}

impl NodeTypeKind {
    /// Decode a node-type flag word; unknown combinations are rejected.
    pub fn from_flags(flags: u16, offset: u64) -> Result<Self> {
        use node_flags as f;
        match flags {
            _ if flags == f::HEADER => Ok(NodeTypeKind::Dummy),
            _ if flags == f::HEADER | f::LIGHT => Ok(NodeTypeKind::Light),
            _ if flags == f::HEADER | f::EMITTER => Ok(NodeTypeKind::Emitter),
            _ if flags == f::HEADER | f::REFERENCE => Ok(NodeTypeKind::Reference),
            _ if flags == f::HEADER | f::MESH => Ok(NodeTypeKind::Trimesh),
            _ if flags == f::HEADER | f::MESH | f::SKIN => Ok(NodeTypeKind::Skin),
            _ if flags == f::HEADER | f::MESH | f::DANGLY => Ok(NodeTypeKind::Dangly),
            _ if flags == f::HEADER | f::MESH | f::SABER => Ok(NodeTypeKind::Saber),
            _ if flags == f::HEADER | f::MESH | f::AABB => Ok(NodeTypeKind::Aabb),
            _ => Err(Error::UnsupportedNodeType { flags, offset }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mesh, MeshKind, MeshPayload};

    #[test]
    fn test_flags_roundtrip() {
        let payloads = [
            NodePayload::None,
            NodePayload::Mesh(Box::new(MeshPayload {
                mesh: Mesh::default(),
                kind: MeshKind::Trimesh,
            })),
            NodePayload::Mesh(Box::new(MeshPayload {
                mesh: Mesh::default(),
                kind: MeshKind::Saber,
            })),
        ];
        for payload in &payloads {
            let flags = node_type_flags(payload);
            assert!(NodeTypeKind::from_flags(flags, 0).is_ok());
        }
    }

    #[test]
    fn test_unknown_flags_rejected() {
        let err = NodeTypeKind::from_flags(node_flags::HEADER | node_flags::CAMERA, 0x40)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedNodeType { flags: 0x0009, offset: 0x40 }));
    }
}

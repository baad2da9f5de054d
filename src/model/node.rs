//! Node tree entities

use glam::{Quat, Vec3};

use super::controller::Controller;
use super::emitter::Emitter;
use super::light::Light;
use super::mesh::MeshPayload;

/// One node of the model tree.
///
/// A node always has a transform and may carry at most one payload. Children
/// are owned; ordering is significant and preserved through encode/decode.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Numeric node id ("node number"), unique across the tree. Skin bonemaps
    /// and animation shadow trees reference nodes by this id.
    pub id: u16,
    /// Display name; indexes the model name table on disk.
    pub name: String,
    /// Local translation relative to the parent.
    pub position: Vec3,
    /// Local orientation relative to the parent (xyzw).
    pub orientation: Quat,
    /// Keyframe controller tracks attached to this node.
    pub controllers: Vec<Controller>,
    pub payload: NodePayload,
    pub children: Vec<Node>,
}

impl Node {
    /// Create a dummy node with an identity transform.
    pub fn new(id: u16, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            controllers: Vec::new(),
            payload: NodePayload::None,
            children: Vec::new(),
        }
    }

    /// Find a node by id in this subtree, mutably.
    pub(crate) fn find_mut(&mut self, id: u16) -> Option<&mut Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// The mesh payload, if this node carries one (any mesh sub-kind).
    pub fn mesh(&self) -> Option<&MeshPayload> {
        match &self.payload {
            NodePayload::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn mesh_mut(&mut self) -> Option<&mut MeshPayload> {
        match &mut self.payload {
            NodePayload::Mesh(m) => Some(m),
            _ => None,
        }
    }
}

/// The at-most-one payload a node can carry.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NodePayload {
    /// Plain dummy/pivot node.
    #[default]
    None,
    Light(Box<Light>),
    Emitter(Box<Emitter>),
    Reference(Reference),
    /// Any of the mesh family (trimesh, skin, dangly, saber, aabb).
    Mesh(Box<MeshPayload>),
}

impl NodePayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodePayload::None => "dummy",
            NodePayload::Light(_) => "light",
            NodePayload::Emitter(_) => "emitter",
            NodePayload::Reference(_) => "reference",
            NodePayload::Mesh(m) => m.kind.name(),
        }
    }
}

/// Placeholder payload referencing another model by resource name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reference {
    /// Resource name of the referenced model.
    pub model: String,
    /// Whether the engine may re-attach the reference at runtime.
    pub reattachable: bool,
}

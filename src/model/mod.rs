//! In-memory model for Odyssey engine MDL/MDX assets
//!
//! A [`Model`] is a tree of typed [`Node`]s plus a list of [`Animation`]s.
//! The tree owns its children exclusively; cross-references (skin bones,
//! supermodels) are by node id or name, never by pointer. The whole model is
//! built in memory by the reader and serialized without mutation by the
//! writer.

pub mod animation;
pub mod controller;
pub mod emitter;
pub mod light;
pub mod mesh;
pub mod node;

pub use animation::{Animation, AnimationEvent, AnimationNode};
pub use controller::{Controller, ControllerRow, Interpolation};
pub use emitter::Emitter;
pub use light::Light;
pub use mesh::{
    AabbNode, AabbNodeKind, AabbTree, Dangly, Face, Mesh, MeshBounds, MeshKind, MeshPayload, Skin,
    TangentFrame, SABER_VERTEX_COUNT,
};
pub use node::{Node, NodePayload, Reference};

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Engine classification of a model, stored in the model header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Classification {
    #[default]
    Other = 0x00,
    Effect = 0x01,
    Tile = 0x02,
    Character = 0x04,
    Door = 0x08,
    Lightsaber = 0x10,
    Placeable = 0x20,
    Flyer = 0x40,
}

impl Classification {
    /// Decode the classification byte. Unknown bits fall back to `Other`;
    /// the engine itself ignores unrecognized classifications.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Classification::Effect,
            0x02 => Classification::Tile,
            0x04 => Classification::Character,
            0x08 => Classification::Door,
            0x10 => Classification::Lightsaber,
            0x20 => Classification::Placeable,
            0x40 => Classification::Flyer,
            _ => Classification::Other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Classification::Other => "Other",
            Classification::Effect => "Effect",
            Classification::Tile => "Tile",
            Classification::Character => "Character",
            Classification::Door => "Door",
            Classification::Lightsaber => "Lightsaber",
            Classification::Placeable => "Placeable",
            Classification::Flyer => "Flyer",
        }
    }
}

/// A complete Odyssey model: one owned node tree plus animations.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// Model name, as stored in the geometry header.
    pub name: String,
    pub classification: Classification,
    /// Name of the model this one inherits animations from, if any.
    pub supermodel: Option<String>,
    pub animation_scale: f32,
    pub affected_by_fog: bool,
    /// Root of the owned node tree.
    pub root: Node,
    pub animations: Vec<Animation>,
}

impl Model {
    /// Create an empty model with a single root dummy node.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: Node::new(0, name.clone()),
            name,
            classification: Classification::Other,
            supermodel: None,
            animation_scale: 1.0,
            affected_by_fog: false,
            animations: Vec::new(),
        }
    }

    /// Depth-first (pre-order) iterator over the node tree.
    ///
    /// This is the canonical serialization order: the reader's peek pass, the
    /// name table, and both writer passes all follow it.
    pub fn iter_nodes(&self) -> NodeIter<'_> {
        NodeIter {
            stack: vec![&self.root],
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.iter_nodes().count()
    }

    /// Find a node by display name.
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.iter_nodes().find(|n| n.name == name)
    }

    /// Find a node by numeric id.
    pub fn node_by_id(&self, id: u16) -> Option<&Node> {
        self.iter_nodes().find(|n| n.id == id)
    }

    /// Node ids in depth-first order. This is the "serial order" that skin
    /// bonemaps resolve against.
    pub fn serial_node_ids(&self) -> Vec<u16> {
        self.iter_nodes().map(|n| n.id).collect()
    }

    /// Link a flat list of `(node, parent id)` pairs into an owned tree.
    ///
    /// This is the construction surface for callers that hold nodes with
    /// by-id parent references (authoring plugins, future text decoders).
    /// Exactly one entry must have no parent; every other node must reach it
    /// through its parent chain. Returns [`Error::CyclicGraph`] when parent
    /// links loop or a node's chain never reaches the root.
    pub fn assemble(
        name: impl Into<String>,
        nodes: Vec<(Node, Option<u16>)>,
    ) -> Result<Self> {
        let mut roots: Vec<Node> = Vec::new();
        let mut pending: Vec<(Node, u16)> = Vec::new();
        for (node, parent) in nodes {
            match parent {
                None => roots.push(node),
                Some(p) => pending.push((node, p)),
            }
        }
        let mut root = match (roots.pop(), roots.is_empty()) {
            (Some(root), true) => root,
            (first, _) => {
                let node = first
                    .or_else(|| pending.first().map(|(n, _)| n.clone()))
                    .map(|n| n.name)
                    .unwrap_or_default();
                return Err(Error::CyclicGraph { node });
            }
        };

        // Attach children breadth-first; anything never attached is either
        // parented to a missing node or part of a parent cycle.
        while !pending.is_empty() {
            let before = pending.len();
            let mut remaining = Vec::with_capacity(before);
            for (node, parent) in pending {
                match root.find_mut(parent) {
                    Some(target) => target.children.push(node),
                    None => remaining.push((node, parent)),
                }
            }
            if remaining.len() == before {
                return Err(Error::CyclicGraph {
                    node: remaining[0].0.name.clone(),
                });
            }
            pending = remaining;
        }

        Ok(Self {
            name: name.into(),
            classification: Classification::Other,
            supermodel: None,
            animation_scale: 1.0,
            affected_by_fog: false,
            root,
            animations: Vec::new(),
        })
    }
}

/// Depth-first pre-order node iterator, children in declaration order.
pub struct NodeIter<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// Build a node-id → serial-index lookup for a depth-first id list.
///
/// Later duplicates do not shadow earlier ids; the first occurrence wins,
/// matching how the engine resolves node numbers.
pub fn serial_index_map(serial_node_ids: &[u16]) -> HashMap<u16, u16> {
    let mut map = HashMap::with_capacity(serial_node_ids.len());
    for (serial, &id) in serial_node_ids.iter().enumerate() {
        map.entry(id).or_insert(serial as u16);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: u16, name: &str) -> Node {
        Node::new(id, name)
    }

    #[test]
    fn test_iter_order_is_preorder() {
        let mut root = leaf(0, "root");
        let mut a = leaf(1, "a");
        a.children.push(leaf(2, "a1"));
        root.children.push(a);
        root.children.push(leaf(3, "b"));
        let mut model = Model::new("m");
        model.root = root;

        let names: Vec<&str> = model.iter_nodes().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["root", "a", "a1", "b"]);
        assert_eq!(model.serial_node_ids(), [0, 1, 2, 3]);
    }

    #[test]
    fn test_assemble_links_parents() {
        let nodes = vec![
            (leaf(0, "root"), None),
            (leaf(2, "grandchild"), Some(1)),
            (leaf(1, "child"), Some(0)),
        ];
        let model = Model::assemble("m", nodes).unwrap();
        assert_eq!(model.node_count(), 3);
        assert_eq!(model.node_by_id(2).unwrap().name, "grandchild");
    }

    #[test]
    fn test_assemble_rejects_cycles() {
        let nodes = vec![
            (leaf(0, "root"), None),
            (leaf(1, "a"), Some(2)),
            (leaf(2, "b"), Some(1)),
        ];
        let err = Model::assemble("m", nodes).unwrap_err();
        assert!(matches!(err, Error::CyclicGraph { .. }));
    }

    #[test]
    fn test_classification_roundtrip() {
        for class in [
            Classification::Other,
            Classification::Effect,
            Classification::Tile,
            Classification::Character,
            Classification::Door,
            Classification::Lightsaber,
            Classification::Placeable,
            Classification::Flyer,
        ] {
            assert_eq!(Classification::from_u8(class as u8), class);
        }
        assert_eq!(Classification::from_u8(0xFF), Classification::Other);
    }
}

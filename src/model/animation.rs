//! Animations and their shadow node trees

use super::controller::Controller;

/// A named event fired at a point on the animation timeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimationEvent {
    pub time: f32,
    pub name: String,
}

/// One node of an animation's shadow tree.
///
/// Shadow nodes mirror the model tree by node-id correspondence and carry
/// controllers only; no transforms, no geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationNode {
    /// Id of the mirrored model node.
    pub node_id: u16,
    pub name: String,
    pub controllers: Vec<Controller>,
    pub children: Vec<AnimationNode>,
}

impl AnimationNode {
    pub fn new(node_id: u16, name: impl Into<String>) -> Self {
        Self {
            node_id,
            name: name.into(),
            controllers: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Depth-first pre-order iterator over this shadow subtree.
    pub fn iter(&self) -> AnimationNodeIter<'_> {
        AnimationNodeIter { stack: vec![self] }
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }
}

pub struct AnimationNodeIter<'a> {
    stack: Vec<&'a AnimationNode>,
}

impl<'a> Iterator for AnimationNodeIter<'a> {
    type Item = &'a AnimationNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// One animation: timing, events and a private shadow tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    pub name: String,
    /// Name of the node the animation applies from ("anim root").
    pub anim_root: String,
    /// Duration in seconds.
    pub length: f32,
    pub transition_time: f32,
    pub events: Vec<AnimationEvent>,
    pub root: AnimationNode,
}

impl Animation {
    pub fn new(name: impl Into<String>, anim_root: impl Into<String>) -> Self {
        let anim_root = anim_root.into();
        Self {
            name: name.into(),
            root: AnimationNode::new(0, anim_root.clone()),
            anim_root,
            length: 0.0,
            transition_time: 0.25,
            events: Vec::new(),
        }
    }
}

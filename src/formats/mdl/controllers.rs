//! Declarative controller-type table
//!
//! Controller type ids are reused across node classes (the same id keys
//! self-illumination on a mesh and drag on an emitter), so lookups are by
//! (class, id) or (class, keyword). The one table drives the binary decoder's
//! column-count rules, both encoders, and the textual keyword blocks.

use crate::model::{Interpolation, MeshKind, NodePayload};

/// Base position track; present on every serialized node.
pub const POSITION: u32 = 8;
/// Base orientation track; present on every serialized node. Supports the
/// packed single-scalar encoding, see [`super::quaternion`].
pub const ORIENTATION: u32 = 20;
pub const SCALE: u32 = 36;

/// Controller namespace a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerClass {
    /// Transform tracks shared by every node type.
    Common,
    Mesh,
    Light,
    Emitter,
}

/// The controller class a node's payload selects.
pub fn class_of(payload: &NodePayload) -> ControllerClass {
    match payload {
        NodePayload::Light(_) => ControllerClass::Light,
        NodePayload::Emitter(_) => ControllerClass::Emitter,
        NodePayload::Mesh(m) => match m.kind {
            // All mesh sub-kinds share the mesh controller namespace.
            MeshKind::Trimesh
            | MeshKind::Skin(_)
            | MeshKind::Dangly(_)
            | MeshKind::Saber
            | MeshKind::Aabb(_) => ControllerClass::Mesh,
        },
        NodePayload::None | NodePayload::Reference(_) => ControllerClass::Common,
    }
}

/// One controller type: id, textual keyword, column arity and defaults.
#[derive(Debug, Clone, Copy)]
pub struct ControllerDef {
    pub class: ControllerClass,
    pub id: u32,
    pub keyword: &'static str,
    pub columns: u8,
    pub interpolation: Interpolation,
}

const fn def(class: ControllerClass, id: u32, keyword: &'static str, columns: u8) -> ControllerDef {
    ControllerDef {
        class,
        id,
        keyword,
        columns,
        interpolation: Interpolation::Linear,
    }
}

use ControllerClass::{Common, Emitter, Light, Mesh};

/// The full controller-type table.
pub const CONTROLLER_TABLE: &[ControllerDef] = &[
    // Transform tracks, valid on every node class.
    def(Common, POSITION, "position", 3),
    def(Common, ORIENTATION, "orientation", 4),
    def(Common, SCALE, "scale", 1),
    // Mesh surface tracks.
    def(Mesh, 100, "selfillumcolor", 3),
    def(Mesh, 132, "alpha", 1),
    // Light tracks.
    def(Light, 76, "color", 3),
    def(Light, 88, "radius", 1),
    def(Light, 96, "shadowradius", 1),
    def(Light, 100, "verticaldisplacement", 1),
    def(Light, 140, "multiplier", 1),
    // Emitter tracks.
    def(Emitter, 80, "alphaend", 1),
    def(Emitter, 84, "alphastart", 1),
    def(Emitter, 88, "birthrate", 1),
    def(Emitter, 92, "bounce_co", 1),
    def(Emitter, 96, "combinetime", 1),
    def(Emitter, 100, "drag", 1),
    def(Emitter, 104, "fps", 1),
    def(Emitter, 108, "frameend", 1),
    def(Emitter, 112, "framestart", 1),
    def(Emitter, 116, "grav", 1),
    def(Emitter, 120, "lifeexp", 1),
    def(Emitter, 124, "mass", 1),
    def(Emitter, 128, "p2p_bezier2", 1),
    def(Emitter, 132, "p2p_bezier3", 1),
    def(Emitter, 136, "particlerot", 1),
    def(Emitter, 140, "randvel", 1),
    def(Emitter, 144, "sizestart", 1),
    def(Emitter, 148, "sizeend", 1),
    def(Emitter, 152, "sizestart_y", 1),
    def(Emitter, 156, "sizeend_y", 1),
    def(Emitter, 160, "spread", 1),
    def(Emitter, 164, "threshold", 1),
    def(Emitter, 168, "velocity", 1),
    def(Emitter, 172, "xsize", 1),
    def(Emitter, 176, "ysize", 1),
    def(Emitter, 180, "blurlength", 1),
    def(Emitter, 184, "lightningdelay", 1),
    def(Emitter, 188, "lightningradius", 1),
    def(Emitter, 192, "lightningscale", 1),
    def(Emitter, 196, "lightningsubdiv", 1),
    def(Emitter, 200, "lightningzigzag", 1),
    def(Emitter, 216, "alphamid", 1),
    def(Emitter, 220, "percentstart", 1),
    def(Emitter, 224, "percentmid", 1),
    def(Emitter, 228, "percentend", 1),
    def(Emitter, 232, "sizemid", 1),
    def(Emitter, 236, "sizemid_y", 1),
    def(Emitter, 240, "randombirthrate", 1),
    def(Emitter, 252, "targetsize", 1),
    def(Emitter, 256, "numcontrolpts", 1),
    def(Emitter, 260, "controlptradius", 1),
    def(Emitter, 264, "controlptdelay", 1),
    def(Emitter, 268, "tangentspread", 1),
    def(Emitter, 272, "tangentlength", 1),
    def(Emitter, 284, "colormid", 3),
    def(Emitter, 380, "colorend", 3),
    def(Emitter, 392, "colorstart", 3),
    def(Emitter, 502, "detonate", 1),
];

/// Look up a controller type by id within a node class. Common transform
/// tracks are visible to every class.
pub fn lookup(class: ControllerClass, id: u32) -> Option<&'static ControllerDef> {
    CONTROLLER_TABLE
        .iter()
        .find(|d| d.id == id && (d.class == class || d.class == Common))
}

/// Look up a controller type by textual keyword within a node class.
pub fn lookup_keyword(class: ControllerClass, keyword: &str) -> Option<&'static ControllerDef> {
    CONTROLLER_TABLE
        .iter()
        .find(|d| d.keyword == keyword && (d.class == class || d.class == Common))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_tracks_visible_everywhere() {
        for class in [Common, Mesh, Light, Emitter] {
            assert_eq!(lookup(class, POSITION).unwrap().keyword, "position");
            assert_eq!(lookup(class, ORIENTATION).unwrap().columns, 4);
        }
    }

    #[test]
    fn test_id_reuse_across_classes() {
        assert_eq!(lookup(Mesh, 100).unwrap().keyword, "selfillumcolor");
        assert_eq!(lookup(Light, 100).unwrap().keyword, "verticaldisplacement");
        assert_eq!(lookup(Emitter, 100).unwrap().keyword, "drag");
        assert!(lookup(Common, 100).is_none());
    }

    #[test]
    fn test_keyword_lookup() {
        let def = lookup_keyword(Emitter, "colorstart").unwrap();
        assert_eq!(def.id, 392);
        assert_eq!(def.columns, 3);
        assert!(lookup_keyword(Mesh, "drag").is_none());
    }

    #[test]
    fn test_no_duplicate_entries_per_class() {
        for (i, a) in CONTROLLER_TABLE.iter().enumerate() {
            for b in &CONTROLLER_TABLE[i + 1..] {
                assert!(
                    !(a.class == b.class && a.id == b.id),
                    "duplicate ({:?}, {})",
                    a.class,
                    a.id
                );
            }
        }
    }
}

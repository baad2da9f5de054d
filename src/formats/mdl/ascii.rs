//! ASCII interchange encoding
//!
//! The indented line-based form used by modding toolchains: per-node-type
//! property blocks plus controller keyword blocks. Keywords come from the
//! declarative controller table, so the textual and binary encoders cannot
//! drift apart. Decoding the textual form back into a model is not
//! implemented.

use std::collections::HashMap;
use std::fmt::Write;

use crate::model::{
    Animation, AnimationNode, Controller, Interpolation, Mesh, MeshKind, Model, Node, NodePayload,
};

use super::controllers::{self, ControllerClass, ORIENTATION, POSITION};

/// Render a model into the ASCII interchange form.
pub fn to_ascii(model: &Model) -> String {
    // Shadow nodes resolve controller keywords through their model
    // counterpart's class, by id correspondence.
    let mut classes: HashMap<u16, ControllerClass> = HashMap::new();
    for node in model.iter_nodes() {
        classes
            .entry(node.id)
            .or_insert_with(|| controllers::class_of(&node.payload));
    }

    let mut out = String::new();
    let _ = writeln!(out, "newmodel {}", model.name);
    let _ = writeln!(
        out,
        "setsupermodel {} {}",
        model.name,
        model.supermodel.as_deref().unwrap_or("NULL")
    );
    let _ = writeln!(out, "classification {}", model.classification.name());
    let _ = writeln!(out, "setanimationscale {}", fmt_f32(model.animation_scale));
    let _ = writeln!(out, "ignorefog {}", u8::from(!model.affected_by_fog));
    let _ = writeln!(out, "beginmodelgeom {}", model.name);
    write_node(&mut out, &model.root, None);
    let _ = writeln!(out, "endmodelgeom {}", model.name);
    for animation in &model.animations {
        write_animation(&mut out, animation, &model.name, &classes);
    }
    let _ = writeln!(out, "donemodel {}", model.name);
    out
}

/// Trim float text the way the classic exporters do: no trailing zeros, but
/// never scientific notation.
fn fmt_f32(value: f32) -> String {
    if value == value.trunc() && value.abs() < 1e7 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn write_node(out: &mut String, node: &Node, parent: Option<&str>) {
    let _ = writeln!(out, "node {} {}", node.payload.kind_name(), node.name);
    let _ = writeln!(out, "  parent {}", parent.unwrap_or("NULL"));
    let _ = writeln!(
        out,
        "  position {} {} {}",
        fmt_f32(node.position.x),
        fmt_f32(node.position.y),
        fmt_f32(node.position.z)
    );
    let _ = writeln!(
        out,
        "  orientation {} {} {} {}",
        fmt_f32(node.orientation.x),
        fmt_f32(node.orientation.y),
        fmt_f32(node.orientation.z),
        fmt_f32(node.orientation.w)
    );

    match &node.payload {
        NodePayload::None => {}
        NodePayload::Reference(reference) => {
            let _ = writeln!(out, "  refmodel {}", reference.model);
            let _ = writeln!(out, "  reattachable {}", u8::from(reference.reattachable));
        }
        NodePayload::Light(light) => {
            let _ = writeln!(out, "  flareradius {}", fmt_f32(light.flare_radius));
            let _ = writeln!(out, "  lightpriority {}", light.priority);
            let _ = writeln!(out, "  ambientonly {}", u8::from(light.ambient_only));
            let _ = writeln!(out, "  nDynamicType {}", light.dynamic_type);
            let _ = writeln!(out, "  affectdynamic {}", u8::from(light.affect_dynamic));
            let _ = writeln!(out, "  shadow {}", u8::from(light.shadow));
            let _ = writeln!(out, "  lensflares {}", u8::from(light.flare));
            let _ = writeln!(out, "  fadinglight {}", u8::from(light.fading));
        }
        NodePayload::Emitter(emitter) => {
            let _ = writeln!(out, "  update {}", emitter.update);
            let _ = writeln!(out, "  render {}", emitter.render);
            let _ = writeln!(out, "  blend {}", emitter.blend);
            let _ = writeln!(out, "  texture {}", emitter.texture);
            let _ = writeln!(out, "  spawntype {}", emitter.spawn_type);
            let _ = writeln!(out, "  xgrid {}", emitter.x_grid);
            let _ = writeln!(out, "  ygrid {}", emitter.y_grid);
            let _ = writeln!(out, "  loop {}", u8::from(emitter.looping));
            let _ = writeln!(out, "  renderorder {}", emitter.render_order);
            let _ = writeln!(out, "  twosidedtex {}", u8::from(emitter.twosided_texture));
            let _ = writeln!(out, "  deadspace {}", fmt_f32(emitter.dead_space));
        }
        NodePayload::Mesh(payload) => write_mesh(out, &payload.mesh, &payload.kind),
    }

    write_controllers(out, &node.controllers, controllers::class_of(&node.payload));
    let _ = writeln!(out, "endnode");

    for child in &node.children {
        write_node(out, child, Some(&node.name));
    }
}

fn write_mesh(out: &mut String, mesh: &Mesh, kind: &MeshKind) {
    let _ = writeln!(
        out,
        "  diffuse {} {} {}",
        fmt_f32(mesh.diffuse.x),
        fmt_f32(mesh.diffuse.y),
        fmt_f32(mesh.diffuse.z)
    );
    let _ = writeln!(
        out,
        "  ambient {} {} {}",
        fmt_f32(mesh.ambient.x),
        fmt_f32(mesh.ambient.y),
        fmt_f32(mesh.ambient.z)
    );
    let _ = writeln!(out, "  transparencyhint {}", mesh.transparency_hint);
    if !mesh.texture1.is_empty() {
        let _ = writeln!(out, "  bitmap {}", mesh.texture1);
    }
    if !mesh.texture2.is_empty() {
        let _ = writeln!(out, "  lightmap {}", mesh.texture2);
    }
    let _ = writeln!(out, "  render {}", u8::from(mesh.render));
    let _ = writeln!(out, "  shadow {}", u8::from(mesh.shadow));
    let _ = writeln!(out, "  beaming {}", u8::from(mesh.beaming));
    let _ = writeln!(out, "  rotatetexture {}", u8::from(mesh.rotate_texture));
    if mesh.animate_uv {
        let _ = writeln!(out, "  animateuv 1");
        let _ = writeln!(out, "  uvdirectionx {}", fmt_f32(mesh.uv_direction_x));
        let _ = writeln!(out, "  uvdirectiony {}", fmt_f32(mesh.uv_direction_y));
        let _ = writeln!(out, "  uvjitter {}", fmt_f32(mesh.uv_jitter));
        let _ = writeln!(out, "  uvjitterspeed {}", fmt_f32(mesh.uv_jitter_speed));
    }

    let _ = writeln!(out, "  verts {}", mesh.positions.len());
    for v in &mesh.positions {
        let _ = writeln!(out, "    {} {} {}", fmt_f32(v.x), fmt_f32(v.y), fmt_f32(v.z));
    }
    if !mesh.uv1.is_empty() {
        let _ = writeln!(out, "  tverts {}", mesh.uv1.len());
        for uv in &mesh.uv1 {
            let _ = writeln!(out, "    {} {}", fmt_f32(uv.x), fmt_f32(uv.y));
        }
    }
    let _ = writeln!(out, "  faces {}", mesh.faces.len());
    for face in &mesh.faces {
        let _ = writeln!(
            out,
            "    {} {} {} {}",
            face.indices[0], face.indices[1], face.indices[2], face.material
        );
    }

    match kind {
        MeshKind::Trimesh | MeshKind::Saber | MeshKind::Aabb(_) => {}
        MeshKind::Dangly(dangly) => {
            let _ = writeln!(out, "  displacement {}", fmt_f32(dangly.displacement));
            let _ = writeln!(out, "  tightness {}", fmt_f32(dangly.tightness));
            let _ = writeln!(out, "  period {}", fmt_f32(dangly.period));
            let _ = writeln!(out, "  constraints {}", dangly.constraints.len());
            for c in &dangly.constraints {
                let _ = writeln!(out, "    {}", fmt_f32(*c));
            }
        }
        MeshKind::Skin(_) => {
            let _ = writeln!(out, "  weights {}", mesh.bone_weights.len());
            for (weights, indices) in mesh.bone_weights.iter().zip(&mesh.bone_indices) {
                let mut line = String::from("   ");
                for slot in 0..4 {
                    if weights[slot] > 0.0 {
                        let _ = write!(line, " {} {}", indices[slot], fmt_f32(weights[slot]));
                    }
                }
                let _ = writeln!(out, "{line}");
            }
        }
    }
}

fn write_controllers(out: &mut String, tracks: &[Controller], class: ControllerClass) {
    for controller in tracks {
        let Some(def) = controllers::lookup(class, controller.controller_type) else {
            continue;
        };
        // A single row at time zero is a static property line; anything else
        // is a keyed block. Transform tracks always stay keyed so they do not
        // collide with the node's own position/orientation lines.
        let is_static = controller.rows.len() == 1
            && controller.rows[0].time == 0.0
            && controller.interpolation == Interpolation::Linear
            && controller.controller_type != POSITION
            && controller.controller_type != ORIENTATION;
        if is_static {
            let mut line = format!("  {}", def.keyword);
            for value in &controller.rows[0].values {
                let _ = write!(line, " {}", fmt_f32(*value));
            }
            let _ = writeln!(out, "{line}");
            continue;
        }
        let suffix = match controller.interpolation {
            Interpolation::Linear => "key",
            Interpolation::Bezier => "bezierkey",
        };
        let _ = writeln!(out, "  {}{} {}", def.keyword, suffix, controller.rows.len());
        for row in &controller.rows {
            let mut line = format!("    {}", fmt_f32(row.time));
            for value in &row.values {
                let _ = write!(line, " {}", fmt_f32(*value));
            }
            let _ = writeln!(out, "{line}");
        }
        let _ = writeln!(out, "  endlist");
    }
}

fn write_animation(
    out: &mut String,
    animation: &Animation,
    model_name: &str,
    classes: &HashMap<u16, ControllerClass>,
) {
    let _ = writeln!(out, "newanim {} {}", animation.name, model_name);
    let _ = writeln!(out, "  length {}", fmt_f32(animation.length));
    let _ = writeln!(out, "  transtime {}", fmt_f32(animation.transition_time));
    let _ = writeln!(out, "  animroot {}", animation.anim_root);
    for event in &animation.events {
        let _ = writeln!(out, "  event {} {}", fmt_f32(event.time), event.name);
    }
    write_animation_node(out, &animation.root, None, classes);
    let _ = writeln!(out, "doneanim {} {}", animation.name, model_name);
}

fn write_animation_node(
    out: &mut String,
    node: &AnimationNode,
    parent: Option<&str>,
    classes: &HashMap<u16, ControllerClass>,
) {
    let _ = writeln!(out, "node dummy {}", node.name);
    let _ = writeln!(out, "  parent {}", parent.unwrap_or("NULL"));
    let class = classes
        .get(&node.node_id)
        .copied()
        .unwrap_or(ControllerClass::Common);
    write_controllers(out, &node.controllers, class);
    let _ = writeln!(out, "endnode");
    for child in &node.children {
        write_animation_node(out, child, Some(&node.name), classes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControllerRow;
    use glam::Vec3;

    #[test]
    fn test_minimal_model_text() {
        let model = Model::new("box");
        let text = to_ascii(&model);
        assert!(text.starts_with("newmodel box\n"));
        assert!(text.contains("setsupermodel box NULL"));
        assert!(text.contains("node dummy box"));
        assert!(text.contains("  parent NULL"));
        assert!(text.ends_with("donemodel box\n"));
    }

    #[test]
    fn test_keyed_controller_block() {
        let mut model = Model::new("m");
        model.root.position = Vec3::ZERO;
        model.root.controllers.push(Controller {
            controller_type: POSITION,
            interpolation: Interpolation::Linear,
            rows: vec![
                ControllerRow {
                    time: 0.0,
                    values: vec![0.0, 0.0, 0.0],
                },
                ControllerRow {
                    time: 1.0,
                    values: vec![1.0, 0.0, 0.0],
                },
            ],
        });
        let text = to_ascii(&model);
        assert!(text.contains("positionkey 2"));
        assert!(text.contains("endlist"));
    }

    #[test]
    fn test_bezier_suffix() {
        let mut model = Model::new("m");
        model.root.controllers.push(Controller {
            controller_type: POSITION,
            interpolation: Interpolation::Bezier,
            rows: vec![ControllerRow {
                time: 0.0,
                values: vec![0.0; 9],
            }],
        });
        let text = to_ascii(&model);
        assert!(text.contains("positionbezierkey 1"));
    }
}

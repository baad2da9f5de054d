//! CLI command for model inspection

use std::path::Path;

use serde::Serialize;

use crate::formats::mdl::{decode_model, sniff_variant};
use crate::model::{Model, Node, NodePayload};

use super::companion_mdx;

#[derive(Serialize)]
struct ModelSummary {
    name: String,
    variant: String,
    classification: String,
    supermodel: Option<String>,
    animation_scale: f32,
    nodes: usize,
    meshes: usize,
    total_vertices: usize,
    total_faces: usize,
    animations: Vec<AnimationSummary>,
}

#[derive(Serialize)]
struct AnimationSummary {
    name: String,
    length: f32,
    events: usize,
}

pub fn execute(source: &Path, mdx: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let mdl_bytes = std::fs::read(source)?;
    let mdx_path = companion_mdx(source, mdx);
    let mdx_bytes = std::fs::read(&mdx_path).ok();

    let variant = sniff_variant(&mdl_bytes)?;
    let model = decode_model(&mdl_bytes, mdx_bytes.as_deref())?;
    let summary = summarize(&model, variant.name());

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "=".repeat(60));
    println!("Model: {}", summary.name);
    println!("{}", "=".repeat(60));
    println!("Variant: {}", summary.variant);
    println!("Classification: {}", summary.classification);
    println!(
        "Supermodel: {}",
        summary.supermodel.as_deref().unwrap_or("(none)")
    );
    println!("Animation scale: {}", summary.animation_scale);
    println!(
        "Nodes: {} ({} meshes, {} vertices, {} faces)",
        summary.nodes, summary.meshes, summary.total_vertices, summary.total_faces
    );
    println!("Animations: {}", summary.animations.len());
    for anim in &summary.animations {
        println!(
            "  {:<24} {:>6.2}s  {} events",
            anim.name, anim.length, anim.events
        );
    }
    Ok(())
}

fn summarize(model: &Model, variant: &str) -> ModelSummary {
    let mut meshes = 0usize;
    let mut total_vertices = 0usize;
    let mut total_faces = 0usize;
    let mut count = |node: &Node| {
        if let NodePayload::Mesh(payload) = &node.payload {
            meshes += 1;
            total_vertices += payload.mesh.positions.len();
            total_faces += payload.mesh.faces.len();
        }
    };
    for node in model.iter_nodes() {
        count(node);
    }

    ModelSummary {
        name: model.name.clone(),
        variant: variant.to_string(),
        classification: model.classification.name().to_string(),
        supermodel: model.supermodel.clone(),
        animation_scale: model.animation_scale,
        nodes: model.node_count(),
        meshes,
        total_vertices,
        total_faces,
        animations: model
            .animations
            .iter()
            .map(|a| AnimationSummary {
                name: a.name.clone(),
                length: a.length,
                events: a.events.len(),
            })
            .collect(),
    }
}

//! CLI command for decode/re-encode validation runs

use std::path::Path;

use crate::formats::mdl::{decode_model, encode_model, sniff_variant, Variant, WriteOptions};

use super::companion_mdx;

pub fn execute(
    source: &Path,
    mdx: Option<&Path>,
    destination: &Path,
    variant: Option<Variant>,
    compress_quaternions: bool,
) -> anyhow::Result<()> {
    let mdl_bytes = std::fs::read(source)?;
    let mdx_path = companion_mdx(source, mdx);
    let mdx_bytes = std::fs::read(&mdx_path).ok();

    let source_variant = sniff_variant(&mdl_bytes)?;
    let model = decode_model(&mdl_bytes, mdx_bytes.as_deref())?;
    let target = variant.unwrap_or(source_variant);
    let options = WriteOptions {
        compress_quaternions,
    };
    let (out_mdl, out_mdx) = encode_model(&model, target, &options)?;

    std::fs::create_dir_all(destination)?;
    let stem = source
        .file_stem()
        .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned());
    std::fs::write(destination.join(format!("{stem}.mdl")), &out_mdl)?;
    std::fs::write(destination.join(format!("{stem}.mdx")), &out_mdx)?;

    println!(
        "{}: {} -> {} ({} MDL bytes, {} MDX bytes)",
        stem,
        source_variant.name(),
        target.name(),
        out_mdl.len(),
        out_mdx.len()
    );
    Ok(())
}

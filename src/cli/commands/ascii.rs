//! CLI command for binary → ASCII conversion

use std::path::Path;

use crate::formats::mdl::{decode_model, to_ascii};

use super::companion_mdx;

pub fn execute(source: &Path, mdx: Option<&Path>, output: Option<&Path>) -> anyhow::Result<()> {
    let mdl_bytes = std::fs::read(source)?;
    let mdx_path = companion_mdx(source, mdx);
    let mdx_bytes = std::fs::read(&mdx_path).ok();

    let model = decode_model(&mdl_bytes, mdx_bytes.as_deref())?;
    let text = to_ascii(&model);

    match output {
        Some(path) => std::fs::write(path, text)?,
        None => print!("{text}"),
    }
    Ok(())
}

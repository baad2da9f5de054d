use std::path::PathBuf;
use std::str::FromStr;

use clap::Subcommand;

use crate::formats::mdl::Variant;

pub mod ascii;
pub mod info;
pub mod roundtrip;

/// Target variant specification for re-encoding
#[derive(Debug, Clone, Copy)]
pub struct VariantArg(pub Variant);

impl FromStr for VariantArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "k1" | "kotor" | "kotor-pc" => Ok(VariantArg(Variant::KotorPc)),
            "k1-xbox" | "kotor-xbox" => Ok(VariantArg(Variant::KotorXbox)),
            "k2" | "tsl" | "tsl-pc" => Ok(VariantArg(Variant::TslPc)),
            "k2-xbox" | "tsl-xbox" => Ok(VariantArg(Variant::TslXbox)),
            _ => Err(format!(
                "Invalid variant '{s}'. Valid values: k1, k1-xbox, k2, k2-xbox"
            )),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show model information
    Info {
        /// Source MDL file
        source: PathBuf,

        /// Companion MDX file (defaults to the MDL path with .mdx)
        #[arg(short, long)]
        mdx: Option<PathBuf>,

        /// Emit a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Convert a binary model to the ASCII interchange form
    Ascii {
        /// Source MDL file
        source: PathBuf,

        /// Companion MDX file (defaults to the MDL path with .mdx)
        #[arg(short, long)]
        mdx: Option<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode and re-encode a model pair (corpus validation)
    Roundtrip {
        /// Source MDL file
        source: PathBuf,

        /// Companion MDX file (defaults to the MDL path with .mdx)
        #[arg(short, long)]
        mdx: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        destination: PathBuf,

        /// Target variant (defaults to the source variant)
        #[arg(long)]
        variant: Option<VariantArg>,

        /// Pack orientation keyframes into the compressed form
        #[arg(long)]
        compress_quaternions: bool,
    },
}

impl Commands {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Commands::Info { source, mdx, json } => info::execute(source, mdx.as_deref(), *json),
            Commands::Ascii {
                source,
                mdx,
                output,
            } => ascii::execute(source, mdx.as_deref(), output.as_deref()),
            Commands::Roundtrip {
                source,
                mdx,
                destination,
                variant,
                compress_quaternions,
            } => roundtrip::execute(
                source,
                mdx.as_deref(),
                destination,
                variant.map(|v| v.0),
                *compress_quaternions,
            ),
        }
    }
}

/// Resolve the companion MDX path: explicit flag or `.mdx` next to the MDL.
pub(crate) fn companion_mdx(source: &std::path::Path, mdx: Option<&std::path::Path>) -> PathBuf {
    mdx.map_or_else(|| source.with_extension("mdx"), std::path::Path::to_path_buf)
}

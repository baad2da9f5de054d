//! # MacOdyssey
//!
//! A pure-Rust library for working with Odyssey engine model formats from
//! Star Wars: Knights of the Old Republic and The Sith Lords.
//!
//! ## Supported Formats
//!
//! - **MDL/MDX** - Binary model pairs (node graph + vertex data), all four
//!   game/platform variants
//! - **ASCII models** - The indented interchange form used by modding tools
//!   (encoding only)
//!
//! ## Quick Start
//!
//! ```no_run
//! use macodyssey::formats::mdl;
//!
//! // Decode a binary model pair
//! let model = mdl::read_model("n_jedi.mdl", Some("n_jedi.mdx"))?;
//! println!("{} nodes", model.node_count());
//!
//! // Re-encode it for the PC release of the first game
//! let options = mdl::WriteOptions::default();
//! mdl::write_model(&model, mdl::Variant::KotorPc, &options, "out.mdl", "out.mdx")?;
//! # Ok::<(), macodyssey::Error>(())
//! ```
//!
//! ### Using the Prelude
//!
//! ```
//! use macodyssey::prelude::*;
//!
//! // Now you have access to:
//! // - Model, Node, Mesh and the payload types
//! // - decode_model, encode_model, Variant, WriteOptions
//! // - Error, Result, and more
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` - Enables the `macodyssey` command-line binary

pub mod error;
pub mod formats;
pub mod geometry;
pub mod model;

// Re-exports for convenience
pub use error::{Error, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::formats::mdl::{
        decode_model, encode_model, read_model, sniff_variant, to_ascii, write_model, Variant,
        WriteOptions,
    };
    pub use crate::geometry::{build_aabb_tree, compute_tangent_space};
    pub use crate::model::{
        Animation, AnimationEvent, AnimationNode, Classification, Controller, ControllerRow,
        Dangly, Emitter, Face, Interpolation, Light, Mesh, MeshKind, MeshPayload, Model, Node,
        NodePayload, Reference, Skin,
    };
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI module (feature-gated)
#[cfg(feature = "cli")]
pub mod cli;

//! MDL/MDX model format support
//!
//! The structure stream (MDL) holds the node graph, controllers and
//! animations as offset-linked records; the companion vertex stream (MDX)
//! holds interleaved per-vertex arrays. Four game/platform variants differ in
//! a handful of magic constants and field widths, see [`Variant`].

pub mod ascii;
pub mod controllers;
pub mod layout;
pub mod quaternion;
pub mod reader;
pub mod variant;
pub mod writer;

// Public API exports
pub use ascii::to_ascii;
pub use quaternion::{compress_quaternion, decompress_quaternion};
pub use reader::{decode_model, read_model, sniff_variant};
pub use variant::Variant;
pub use writer::{encode_model, write_model, WriteOptions};

//! File format handlers for Odyssey engine formats

pub mod mdl;

// Re-export the main entry points for convenience
pub use mdl::{decode_model, encode_model, read_model, sniff_variant, write_model};
pub use mdl::{Variant, WriteOptions};

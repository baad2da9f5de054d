//! Error types for `MacOdyssey`

use thiserror::Error;

/// The error type for `MacOdyssey` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== MDL Header Errors ====================
    /// The fixed file header is invalid (bad sentinel or stream-length fields).
    #[error("corrupt MDL header: {field} expected {expected}, found {actual}")]
    CorruptHeader {
        /// The header field that failed validation.
        field: &'static str,
        /// The expected value.
        expected: u64,
        /// The value found in the stream.
        actual: u64,
    },

    /// The geometry-header function pointers match no known game/platform.
    #[error("unknown MDL variant: function pointers {fn_ptr1:#x}/{fn_ptr2:#x}")]
    UnknownVariant {
        /// The first fingerprint constant from the geometry header.
        fn_ptr1: u32,
        /// The second fingerprint constant from the geometry header.
        fn_ptr2: u32,
    },

    // ==================== MDL Structure Errors ====================
    /// The two redundant count fields of an array descriptor disagree.
    #[error("array count mismatch at offset {offset:#x}: {count} vs {count2}")]
    ArrayCountMismatch {
        /// Byte offset of the array descriptor within the structure stream.
        offset: u64,
        /// The first stored count.
        count: u32,
        /// The second (redundant) stored count.
        count2: u32,
    },

    /// An offset or range resolves outside the stream.
    #[error("offset {offset:#x} (+{len} bytes) out of bounds for {stream} stream of {size} bytes")]
    OutOfBounds {
        /// The offending byte offset.
        offset: u64,
        /// The length of the access that failed.
        len: u64,
        /// The stream the access targeted ("MDL" or "MDX").
        stream: &'static str,
        /// Total stream size in bytes.
        size: u64,
    },

    /// A mesh references vertex-stream data but no vertex stream was supplied.
    #[error("model requires a companion MDX vertex stream but none was supplied")]
    MissingCompanionStream,

    /// A node header carries a type-flag combination this library does not know.
    #[error("unsupported node type flags {flags:#06x} at offset {offset:#x}")]
    UnsupportedNodeType {
        /// The raw node type bit flags.
        flags: u16,
        /// Byte offset of the node header.
        offset: u64,
    },

    /// A controller key references a type id unknown for its node class.
    #[error("invalid controller type {controller_type} (columns {columns}) on node '{node}'")]
    InvalidControllerType {
        /// The raw controller type id.
        controller_type: u32,
        /// The stored column count.
        columns: u8,
        /// Name of the node the controller belongs to.
        node: String,
    },

    // ==================== Data Model Errors ====================
    /// A by-reference node graph could not be linked into a tree.
    #[error("cyclic or unrooted node graph at node '{node}'")]
    CyclicGraph {
        /// Name of a node on the offending parent chain.
        node: String,
    },

    // ==================== Parsing Errors ====================
    /// UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

/// A specialized Result type for `MacOdyssey` operations.
pub type Result<T> = std::result::Result<T, Error>;

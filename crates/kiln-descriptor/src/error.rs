//! Error types for descriptor loading and validation.

use thiserror::Error;

/// Errors raised while fetching, parsing, or validating a descriptor.
///
/// All of these are fatal to initialization: a runner holding a
/// partially loaded descriptor must be discarded and reconstructed.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Transport failure while fetching a resource.
    #[error("failed to fetch '{resource}': {reason}")]
    Fetch { resource: String, reason: String },

    /// The descriptor JSON was malformed.
    #[error("failed to parse descriptor: {0}")]
    Parse(#[from] serde_json::Error),

    /// A named sub-region exceeds its arena's total size.
    #[error(
        "allocation '{name}' out of bounds in {arena} arena: \
         offset {offset} + size {size} > total_size {total_size}"
    )]
    RegionOutOfBounds {
        arena: &'static str,
        name: String,
        offset: usize,
        size: usize,
        total_size: usize,
    },

    /// An `inputs`/`outputs` entry names a region that does not exist
    /// in the variable allocation map.
    #[error("graph {kind} '{name}' has no entry in variable_allocation")]
    UnknownVariable { kind: &'static str, name: String },
}

/// Specialized Result type for descriptor operations.
pub type Result<T> = std::result::Result<T, DescriptorError>;

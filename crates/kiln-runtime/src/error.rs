//! Error types for the runtime crate.

use crate::device::DeviceError;
use kiln_descriptor::DescriptorError;
use thiserror::Error;

/// Runner errors.
///
/// Load- and compile-time failures are fatal to the runner instance:
/// no partial state is usable and the caller must discard and
/// reconstruct. A `Device` error during a run aborts that run only;
/// the variable arena may hold partial results. No retry happens at
/// this layer.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Resource fetch, parse, or layout validation failed.
    #[error("descriptor load failed: {0}")]
    Descriptor(#[from] DescriptorError),

    /// The descriptor names a weight encoding this runner does not
    /// implement.
    #[error("unsupported weight encoding '{0}'")]
    UnsupportedEncoding(String),

    /// The weight payload was malformed or truncated.
    #[error("weight decode failed: {0}")]
    Decode(String),

    /// An operation was called out of lifecycle order.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// A view's window does not fit its arena.
    #[error("view '{name}' out of bounds: offset {offset} + len {len} > arena size {arena_len}")]
    ViewOutOfBounds {
        name: String,
        offset: usize,
        len: usize,
        arena_len: usize,
    },

    /// The device rejected a program registration, allocation, or
    /// buffer write during compile or weight loading.
    #[error("device failure during {stage}: {source}")]
    Device {
        stage: &'static str,
        source: DeviceError,
    },

    /// A kernel dispatch failed. The run transitions to `Failed` and
    /// the variable arena may hold partial writes.
    #[error("dispatch of step {step} ('{entry_point}') failed: {source}")]
    Dispatch {
        step: usize,
        entry_point: String,
        source: DeviceError,
    },
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

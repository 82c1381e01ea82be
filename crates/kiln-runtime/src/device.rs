//! Device handler abstraction.
//!
//! The runner drives a compute device through this seam: program
//! registration, flat arena allocation, and ordered kernel dispatch.
//! The wgpu implementation lives in [`crate::wgpu_handler`]; tests use
//! an in-memory handler.

use thiserror::Error;

/// A failure reported by the device backend.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeviceError(pub String);

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// A contiguous device-resident memory region.
///
/// Writes take `&self`: backends queue the copy (wgpu's
/// `queue.write_buffer`) or use interior mutability.
pub trait DeviceArena {
    /// Copy `bytes` into the arena starting at `offset` (in bytes).
    fn write(&self, offset: u64, bytes: &[u8]) -> DeviceResult<()>;

    /// Read `len` bytes starting at `offset`. Blocks until all
    /// previously submitted work touching this arena has retired.
    fn read(&self, offset: u64, len: u64) -> DeviceResult<Vec<u8>>;

    /// Arena capacity in bytes.
    fn byte_size(&self) -> u64;
}

/// A compute device accepting programs, arenas, and kernel dispatches.
///
/// # Ordering contract
///
/// Implementations MUST accept dispatches in FIFO order: the effects
/// of a later submission are never observable before the effects of an
/// earlier submission have completed. The runner relies on this — it
/// awaits completion only for the final step of a plan and submits
/// every other step fire-and-forget. A backend targeting a device
/// without a strict in-order queue must synchronize internally on
/// every dispatch, regardless of `await_completion`.
pub trait DeviceHandler {
    type Arena: DeviceArena;

    /// Register a kernel program under `namespace`. Entry points are
    /// later addressed as `namespace.entry`.
    fn register_program(&mut self, source: &str, namespace: &str) -> DeviceResult<()>;

    /// Allocate a zero-initialized arena of `byte_size` bytes.
    fn alloc_arena(&self, byte_size: u64) -> DeviceResult<Self::Arena>;

    /// Launch one kernel.
    ///
    /// `entry_id` is `namespace.entry` as registered. `arenas` are
    /// bound in order as the kernel's buffer arguments. When
    /// `await_completion` is true the call returns only after the
    /// dispatch's effects are visible; otherwise it may return as soon
    /// as the submission is queued.
    fn dispatch(
        &mut self,
        entry_id: &str,
        grid_dimensions: [u32; 3],
        block_dimensions: [u32; 3],
        arenas: &[&Self::Arena],
        await_completion: bool,
    ) -> DeviceResult<()>;
}

/// Split a `namespace.entry` id into its parts.
pub(crate) fn split_entry_id(entry_id: &str) -> DeviceResult<(&str, &str)> {
    entry_id
        .split_once('.')
        .ok_or_else(|| DeviceError(format!("malformed entry id '{entry_id}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_entry_ids() {
        assert_eq!(split_entry_id("descriptor.relu").unwrap(), ("descriptor", "relu"));
        assert!(split_entry_id("relu").is_err());
    }
}

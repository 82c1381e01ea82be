//! The variable arena: device memory plus a host mirror.
//!
//! Graph inputs, outputs, and intermediates all live in one flat
//! device arena. Callers touch it only through views over the host
//! mirror; the runner flushes input regions to the device at run start
//! and reads output regions back after the final completion signal, so
//! no caller-visible transfer step exists.

use crate::device::{DeviceArena, DeviceResult};
use kiln_descriptor::Allocation;
use std::cell::RefCell;
use std::rc::Rc;

/// Host-side f32 mirror shared between the runner and its views.
/// The runner is single-threaded; `Rc<RefCell<..>>` is the whole
/// synchronization story.
pub(crate) type HostMirror = Rc<RefCell<Box<[f32]>>>;

pub(crate) struct VariableArena<A: DeviceArena> {
    host: HostMirror,
    device: A,
}

impl<A: DeviceArena> VariableArena<A> {
    /// Wrap a freshly allocated device arena of `total_size` elements.
    pub fn new(device: A, total_size: usize) -> Self {
        Self {
            host: Rc::new(RefCell::new(vec![0.0f32; total_size].into_boxed_slice())),
            device,
        }
    }

    pub fn host(&self) -> &HostMirror {
        &self.host
    }

    pub fn device(&self) -> &A {
        &self.device
    }

    /// Copy one region host -> device.
    pub fn flush_region(&self, region: Allocation) -> DeviceResult<()> {
        let host = self.host.borrow();
        let slice = &host[region.offset..region.offset + region.size];
        if slice.is_empty() {
            return Ok(());
        }
        self.device
            .write((region.offset * 4) as u64, bytemuck::cast_slice(slice))
    }

    /// Copy one region device -> host.
    pub fn readback_region(&self, region: Allocation) -> DeviceResult<()> {
        if region.size == 0 {
            return Ok(());
        }
        let bytes = self
            .device
            .read((region.offset * 4) as u64, (region.size * 4) as u64)?;

        let mut host = self.host.borrow_mut();
        let slice = &mut host[region.offset..region.offset + region.size];
        for (slot, chunk) in slice.iter_mut().zip(bytes.chunks_exact(4)) {
            *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }
}

//! Descriptor data model.
//!
//! The descriptor is immutable after load; nothing here mutates it.
//! `exec_infos` order is the sole source of data-dependency ordering —
//! there is no explicit dependency graph.

use crate::error::{DescriptorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static description of a computation graph: kernel program, ordered
/// execution plan, and arena memory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDescriptor {
    /// Opaque device-specific program blob, registered as-is.
    pub kernel_source: String,
    /// Ordered execution plan. Index order is execution order.
    pub exec_infos: Vec<ExecutionStep>,
    /// Layout of the write-once weight arena.
    pub weight_allocation: AllocationMap,
    /// Layout of the shared mutable variable arena.
    pub variable_allocation: AllocationMap,
    /// Graph input names, referencing `variable_allocation` regions.
    pub inputs: Vec<String>,
    /// Graph output names, referencing `variable_allocation` regions.
    pub outputs: Vec<String>,
    /// Identifier of the weight compression/quantization scheme.
    pub weight_encoding: String,
}

/// One kernel dispatch: entry point, launch shape, and the immutable
/// per-step parameter payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// Kernel name within the registered program.
    pub entry_point: String,
    pub grid_dimensions: [u32; 3],
    pub block_dimensions: [u32; 3],
    /// Raw parameter bytes, copied once into a device-resident meta
    /// buffer at compile time.
    pub meta_payload: Vec<u8>,
}

/// A flat arena layout: total element count plus named sub-regions.
///
/// Regions may be disjoint or, by descriptor convention, aliased.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationMap {
    /// Arena size in elements.
    pub total_size: usize,
    /// Named sub-regions, element-granular.
    pub allocation: HashMap<String, Allocation>,
}

/// A named sub-region `[offset, offset + size)` within an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub offset: usize,
    pub size: usize,
}

impl AllocationMap {
    /// Check that every region fits within `total_size`.
    fn validate(&self, arena: &'static str) -> Result<()> {
        for (name, region) in &self.allocation {
            let end = region
                .offset
                .checked_add(region.size)
                .filter(|&end| end <= self.total_size);
            if end.is_none() {
                return Err(DescriptorError::RegionOutOfBounds {
                    arena,
                    name: name.clone(),
                    offset: region.offset,
                    size: region.size,
                    total_size: self.total_size,
                });
            }
        }
        Ok(())
    }

    /// Look up a named region.
    pub fn get(&self, name: &str) -> Option<Allocation> {
        self.allocation.get(name).copied()
    }
}

impl GraphDescriptor {
    /// Parse a descriptor from its JSON wire format and validate it.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let descriptor: Self = serde_json::from_slice(bytes)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Validate layout invariants:
    /// - every named region satisfies `offset + size <= total_size`;
    /// - every `inputs`/`outputs` name resolves in
    ///   `variable_allocation`.
    pub fn validate(&self) -> Result<()> {
        self.weight_allocation.validate("weight")?;
        self.variable_allocation.validate("variable")?;

        for (kind, names) in [("input", &self.inputs), ("output", &self.outputs)] {
            for name in names {
                if !self.variable_allocation.allocation.contains_key(name) {
                    return Err(DescriptorError::UnknownVariable {
                        kind,
                        name: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

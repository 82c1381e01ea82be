//! Graph descriptor model and loading for the kiln runner.
//!
//! A descriptor is the static output of an external graph compiler: the
//! kernel program source, an ordered execution plan, and the memory
//! layout of the weight and variable arenas. This crate owns the data
//! model, its JSON wire format, the layout validation pass, and the
//! loader that fetches descriptor/weight resources from a named
//! location.
//!
//! Execution of a loaded descriptor lives in `kiln-runtime`.

mod error;
mod loader;
mod model;

pub use error::{DescriptorError, Result};
pub use loader::{DescriptorLoader, Fetcher, FileFetcher, HttpFetcher};
pub use model::{Allocation, AllocationMap, ExecutionStep, GraphDescriptor};

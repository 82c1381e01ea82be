//! Execution engine for precompiled graph descriptors.
//!
//! A descriptor (see `kiln-descriptor`) carries a kernel program, the
//! layout of two flat memory arenas, and an ordered execution plan.
//! This crate allocates the arenas on a device, decodes and loads the
//! weight payload, hands the caller lazy views over the graph's
//! declared inputs and outputs, and dispatches the plan in order —
//! awaiting completion only for the final step and relying on the
//! device's FIFO submission contract for everything before it.
//!
//! The device itself sits behind the [`DeviceHandler`] trait;
//! [`WgpuHandler`] is the shipped GPU backend.
//!
//! # Example
//!
//! ```no_run
//! use kiln_descriptor::{DescriptorLoader, FileFetcher};
//! use kiln_runtime::{DescriptorRunner, RunnerOptions, WgpuHandler};
//!
//! #[pollster::main]
//! async fn main() -> anyhow::Result<()> {
//!     let handler = WgpuHandler::new().await?;
//!     let mut runner = DescriptorRunner::new(handler, RunnerOptions::default());
//!
//!     let loader = DescriptorLoader::new("models/mnist", "wgpu", FileFetcher);
//!     runner.load(&loader)?;
//!
//!     runner.input_views()?[0].copy_from(&[1.0, 2.0, 3.0, 4.0]);
//!     runner.output_views()?;
//!     runner.run()?;
//!
//!     let result = runner.output_views()?[0].to_vec();
//!     println!("{result:?}");
//!     Ok(())
//! }
//! ```

mod arena;
mod decoder;
mod device;
mod error;
mod profile;
mod runner;
mod view;
mod wgpu_handler;

pub use decoder::WeightEncoding;
pub use device::{DeviceArena, DeviceError, DeviceHandler, DeviceResult};
pub use error::{Result, RunnerError};
pub use profile::{KernelProfile, ProfileSummary, StepTiming};
pub use runner::{DescriptorRunner, RunState, RunnerOptions};
pub use view::{InputView, OutputView};
pub use wgpu_handler::{WgpuArena, WgpuHandler};

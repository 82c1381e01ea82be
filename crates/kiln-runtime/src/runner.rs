//! The descriptor runner: buffer allocation, weight loading, lazy
//! views, and the ordered kernel-dispatch engine.

use crate::arena::VariableArena;
use crate::decoder::WeightEncoding;
use crate::device::{DeviceArena, DeviceHandler};
use crate::error::{Result, RunnerError};
use crate::profile::{ProfileSummary, StepTiming};
use crate::view::{InputView, OutputView};
use kiln_descriptor::{Allocation, DescriptorLoader, Fetcher, GraphDescriptor};
use std::time::Instant;
use tracing::{debug, info};

/// Namespace the descriptor's kernel program is registered under.
const PROGRAM_NAMESPACE: &str = "descriptor";

/// Construction-time runner configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerOptions {
    /// Time each dispatch individually and aggregate a per-kernel
    /// summary. Strictly observational: dispatch order and outcomes
    /// are unchanged, but every step is awaited, so profiled runs are
    /// slower.
    pub profiling: bool,
}

/// Dispatch engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Dispatching(usize),
    Completed,
    /// A step failed; the variable arena may hold partial writes.
    Failed,
}

/// Executes a precompiled graph descriptor on a device.
///
/// Lifecycle: load (or `set_descriptor`) -> `compile` ->
/// `load_weights` -> `input_views`/`output_views` -> `run`. Arenas are
/// allocated exactly once per loaded descriptor and never resized;
/// views are created on first request and cached for the runner's
/// lifetime.
///
/// The runner owns its arenas exclusively and permits a single
/// in-flight run: `run` takes `&mut self`, so a second run cannot
/// start before the first returns.
pub struct DescriptorRunner<H: DeviceHandler> {
    handler: H,
    options: RunnerOptions,
    descriptor: Option<GraphDescriptor>,
    weight_arena: Option<H::Arena>,
    variable_arena: Option<VariableArena<H::Arena>>,
    meta_buffers: Vec<H::Arena>,
    input_views: Option<Vec<InputView>>,
    output_views: Option<Vec<OutputView>>,
    state: RunState,
    last_profile: Option<ProfileSummary>,
}

impl<H: DeviceHandler> DescriptorRunner<H> {
    pub fn new(handler: H, options: RunnerOptions) -> Self {
        Self {
            handler,
            options,
            descriptor: None,
            weight_arena: None,
            variable_arena: None,
            meta_buffers: Vec::new(),
            input_views: None,
            output_views: None,
            state: RunState::Idle,
            last_profile: None,
        }
    }

    /// Fetch descriptor and weights from `loader`, then compile and
    /// load them. Any failure is fatal to this runner instance.
    pub fn load<F: Fetcher>(&mut self, loader: &DescriptorLoader<F>) -> Result<()> {
        let descriptor = loader.fetch_descriptor()?;
        self.set_descriptor(descriptor);
        self.compile()?;

        let weights = loader.fetch_weights()?;
        self.load_weights(&weights)
    }

    /// Install a descriptor directly, discarding any compiled state.
    pub fn set_descriptor(&mut self, descriptor: GraphDescriptor) {
        self.descriptor = Some(descriptor);
        self.weight_arena = None;
        self.variable_arena = None;
        self.meta_buffers.clear();
        self.input_views = None;
        self.output_views = None;
        self.state = RunState::Idle;
        self.last_profile = None;
    }

    /// Allocate arenas, register the kernel program, and materialize
    /// one immutable meta buffer per execution step.
    pub fn compile(&mut self) -> Result<()> {
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or(RunnerError::Precondition("compile called before a descriptor was loaded"))?;
        descriptor.validate()?;

        debug!(
            steps = descriptor.exec_infos.len(),
            weight_elements = descriptor.weight_allocation.total_size,
            variable_elements = descriptor.variable_allocation.total_size,
            "compiling descriptor"
        );

        self.handler
            .register_program(&descriptor.kernel_source, PROGRAM_NAMESPACE)
            .map_err(|source| RunnerError::Device {
                stage: "program registration",
                source,
            })?;

        let weight_arena = self
            .handler
            .alloc_arena(arena_bytes(descriptor.weight_allocation.total_size))
            .map_err(|source| RunnerError::Device {
                stage: "weight arena allocation",
                source,
            })?;

        let variable_device = self
            .handler
            .alloc_arena(arena_bytes(descriptor.variable_allocation.total_size))
            .map_err(|source| RunnerError::Device {
                stage: "variable arena allocation",
                source,
            })?;

        // One device-resident meta buffer per step, written exactly
        // once. Payloads are padded to the 4-byte write granularity.
        let mut meta_buffers = Vec::with_capacity(descriptor.exec_infos.len());
        for step in &descriptor.exec_infos {
            let mut payload = step.meta_payload.clone();
            payload.resize(payload.len().next_multiple_of(4).max(4), 0);

            let buffer = self
                .handler
                .alloc_arena(payload.len() as u64)
                .map_err(|source| RunnerError::Device {
                    stage: "meta buffer allocation",
                    source,
                })?;
            buffer.write(0, &payload).map_err(|source| RunnerError::Device {
                stage: "meta buffer write",
                source,
            })?;
            meta_buffers.push(buffer);
        }

        let total = descriptor.variable_allocation.total_size;
        self.weight_arena = Some(weight_arena);
        self.variable_arena = Some(VariableArena::new(variable_device, total));
        self.meta_buffers = meta_buffers;
        self.input_views = None;
        self.output_views = None;
        self.state = RunState::Idle;
        Ok(())
    }

    /// Decode the weight payload and write it into the weight arena in
    /// one pass. An unknown encoding fails before anything is written.
    pub fn load_weights(&mut self, payload: &[u8]) -> Result<()> {
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or(RunnerError::Precondition("load_weights called before a descriptor was loaded"))?;
        let weight_arena = self
            .weight_arena
            .as_ref()
            .ok_or(RunnerError::Precondition("load_weights called before compile"))?;

        let encoding = WeightEncoding::from_id(&descriptor.weight_encoding)?;
        let decoded = encoding.decode(payload, &descriptor.weight_allocation)?;

        debug!(
            encoding = %descriptor.weight_encoding,
            elements = decoded.len(),
            "weights decoded"
        );

        if !decoded.is_empty() {
            weight_arena
                .write(0, bytemuck::cast_slice(&decoded))
                .map_err(|source| RunnerError::Device {
                    stage: "weight write",
                    source,
                })?;
        }
        Ok(())
    }

    /// Views over the declared graph inputs, in descriptor order.
    ///
    /// Built on first call, cached afterwards: repeated calls return
    /// the identical slice.
    pub fn input_views(&mut self) -> Result<&[InputView]> {
        if self.input_views.is_none() {
            let descriptor = self
                .descriptor
                .as_ref()
                .ok_or(RunnerError::Precondition("views requested before a descriptor was loaded"))?;
            let arena = self
                .variable_arena
                .as_ref()
                .ok_or(RunnerError::Precondition("views requested before compile"))?;

            let mut views = Vec::with_capacity(descriptor.inputs.len());
            for name in &descriptor.inputs {
                let region = named_region(descriptor, name)?;
                views.push(InputView::new(name, arena.host(), region.offset, region.size)?);
            }
            self.input_views = Some(views);
        }

        Ok(self.input_views.as_deref().unwrap_or(&[]))
    }

    /// Views over the declared graph outputs, in descriptor order.
    ///
    /// Built on first call, cached afterwards: repeated calls return
    /// the identical slice.
    pub fn output_views(&mut self) -> Result<&[OutputView]> {
        if self.output_views.is_none() {
            let descriptor = self
                .descriptor
                .as_ref()
                .ok_or(RunnerError::Precondition("views requested before a descriptor was loaded"))?;
            let arena = self
                .variable_arena
                .as_ref()
                .ok_or(RunnerError::Precondition("views requested before compile"))?;

            let mut views = Vec::with_capacity(descriptor.outputs.len());
            for name in &descriptor.outputs {
                let region = named_region(descriptor, name)?;
                views.push(OutputView::new(name, arena.host(), region.offset, region.size)?);
            }
            self.output_views = Some(views);
        }

        Ok(self.output_views.as_deref().unwrap_or(&[]))
    }

    /// Execute the plan: flush input regions, dispatch every step in
    /// `exec_infos` order, await the final step's completion, and read
    /// output regions back.
    ///
    /// Only the last dispatch is awaited; all earlier steps ride the
    /// device's FIFO submission contract (see
    /// [`DeviceHandler::dispatch`]). In profiling mode every step is
    /// awaited and timed instead.
    pub fn run(&mut self) -> Result<()> {
        if self.input_views.is_none() || self.output_views.is_none() {
            return Err(RunnerError::Precondition(
                "input_views and output_views must both be requested before run",
            ));
        }
        let descriptor = self
            .descriptor
            .as_ref()
            .ok_or(RunnerError::Precondition("run called before a descriptor was loaded"))?;
        let weight_arena = self
            .weight_arena
            .as_ref()
            .ok_or(RunnerError::Precondition("run called before compile"))?;
        let variable_arena = self
            .variable_arena
            .as_ref()
            .ok_or(RunnerError::Precondition("run called before compile"))?;

        self.state = RunState::Dispatching(0);

        // Make caller writes through input views visible to the device.
        for name in &descriptor.inputs {
            let region = named_region(descriptor, name)?;
            if let Err(source) = variable_arena.flush_region(region) {
                self.state = RunState::Failed;
                return Err(RunnerError::Device {
                    stage: "input flush",
                    source,
                });
            }
        }

        let dispatched = Self::dispatch_plan(
            &mut self.handler,
            &mut self.state,
            descriptor,
            weight_arena,
            variable_arena.device(),
            &self.meta_buffers,
            self.options.profiling,
        );
        let profile = match dispatched {
            Ok(profile) => profile,
            Err(e) => {
                self.state = RunState::Failed;
                return Err(e);
            }
        };

        // All steps have retired; surface results to output views.
        for name in &descriptor.outputs {
            let region = named_region(descriptor, name)?;
            if let Err(source) = variable_arena.readback_region(region) {
                self.state = RunState::Failed;
                return Err(RunnerError::Device {
                    stage: "output readback",
                    source,
                });
            }
        }

        if let Some(summary) = profile {
            info!("profiled run:\n{summary}");
            self.last_profile = Some(summary);
        }
        self.state = RunState::Completed;
        Ok(())
    }

    /// Issue every step in index order. Returns the profile summary
    /// when profiling is enabled.
    fn dispatch_plan(
        handler: &mut H,
        state: &mut RunState,
        descriptor: &GraphDescriptor,
        weight_arena: &H::Arena,
        variable_device: &H::Arena,
        meta_buffers: &[H::Arena],
        profiling: bool,
    ) -> Result<Option<ProfileSummary>> {
        let step_count = descriptor.exec_infos.len();
        let mut timings = profiling.then(|| Vec::with_capacity(step_count));

        for (index, step) in descriptor.exec_infos.iter().enumerate() {
            *state = RunState::Dispatching(index);

            let entry_id = format!("{PROGRAM_NAMESPACE}.{}", step.entry_point);
            let arenas = [weight_arena, variable_device, &meta_buffers[index]];
            // Await per step when timing; otherwise only the final
            // step carries the completion signal.
            let await_completion = profiling || index + 1 == step_count;

            let started = Instant::now();
            handler
                .dispatch(
                    &entry_id,
                    step.grid_dimensions,
                    step.block_dimensions,
                    &arenas,
                    await_completion,
                )
                .map_err(|source| RunnerError::Dispatch {
                    step: index,
                    entry_point: step.entry_point.clone(),
                    source,
                })?;

            if let Some(timings) = timings.as_mut() {
                timings.push(StepTiming {
                    entry_point: step.entry_point.clone(),
                    duration: started.elapsed(),
                });
            }
        }

        Ok(timings.map(|t| ProfileSummary::from_timings(&t)))
    }

    /// Current dispatch engine state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Summary of the most recent profiled run, if any.
    pub fn last_profile(&self) -> Option<&ProfileSummary> {
        self.last_profile.as_ref()
    }

    /// The loaded descriptor, if any.
    pub fn descriptor(&self) -> Option<&GraphDescriptor> {
        self.descriptor.as_ref()
    }
}

/// Look up a declared input/output region. Names were validated at
/// compile time; a miss here means the descriptor was swapped without
/// recompiling.
fn named_region(descriptor: &GraphDescriptor, name: &str) -> Result<Allocation> {
    descriptor
        .variable_allocation
        .get(name)
        .ok_or(RunnerError::Precondition("descriptor changed after compile"))
}

/// Arena byte size for an element count: f32 elements, minimum one
/// binding-sized slot.
fn arena_bytes(elements: usize) -> u64 {
    ((elements * 4) as u64).max(4)
}

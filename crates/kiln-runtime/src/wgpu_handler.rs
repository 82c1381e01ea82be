//! wgpu implementation of the device handler.
//!
//! Satisfies the FIFO contract of [`DeviceHandler`] by construction:
//! all work goes through a single `wgpu::Queue`, which executes
//! submissions in order.

use crate::device::{split_entry_id, DeviceArena, DeviceError, DeviceHandler, DeviceResult};
use std::collections::HashMap;
use std::sync::Arc;

/// GPU device handler backed by wgpu.
///
/// Kernel programs are WGSL modules; compute pipelines are built
/// lazily per `namespace.entry` pair and cached. Every descriptor
/// kernel must declare the three storage-buffer bindings it is
/// dispatched with (weights, variables, meta), since pipeline layouts
/// are derived from the shader.
pub struct WgpuHandler {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    modules: HashMap<String, wgpu::ShaderModule>,
    pipelines: HashMap<String, wgpu::ComputePipeline>,
}

impl WgpuHandler {
    /// Initialize with the default high-performance adapter.
    pub async fn new() -> DeviceResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| DeviceError(format!("failed to find suitable GPU adapter: {e}")))?;

        Self::with_adapter(&adapter).await
    }

    /// Initialize with a specific adapter (multi-GPU systems).
    pub async fn with_adapter(adapter: &wgpu::Adapter) -> DeviceResult<Self> {
        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await
            .map_err(|e| DeviceError(format!("failed to create device: {e}")))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            modules: HashMap::new(),
            pipelines: HashMap::new(),
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn ensure_pipeline(&mut self, entry_id: &str) -> DeviceResult<()> {
        if self.pipelines.contains_key(entry_id) {
            return Ok(());
        }

        let (namespace, entry) = split_entry_id(entry_id)?;
        let module = self
            .modules
            .get(namespace)
            .ok_or_else(|| DeviceError(format!("no program registered under '{namespace}'")))?;

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("Pipeline: {entry_id}")),
                layout: None,
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            });

        self.pipelines.insert(entry_id.to_string(), pipeline);
        Ok(())
    }

    fn wait(&self) -> DeviceResult<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| DeviceError(format!("GPU poll failed: {e:?}")))
    }
}

impl DeviceHandler for WgpuHandler {
    type Arena = WgpuArena;

    fn register_program(&mut self, source: &str, namespace: &str) -> DeviceResult<()> {
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(namespace),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        // Re-registering a namespace invalidates its cached pipelines.
        self.pipelines
            .retain(|id, _| id.split_once('.').is_none_or(|(ns, _)| ns != namespace));
        self.modules.insert(namespace.to_string(), module);
        Ok(())
    }

    fn alloc_arena(&self, byte_size: u64) -> DeviceResult<WgpuArena> {
        // wgpu zero-initializes buffers; sizes are 4-byte aligned.
        let size = byte_size.max(4).next_multiple_of(4);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Arena"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Ok(WgpuArena {
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
            buffer,
            size,
        })
    }

    fn dispatch(
        &mut self,
        entry_id: &str,
        grid_dimensions: [u32; 3],
        _block_dimensions: [u32; 3],
        arenas: &[&WgpuArena],
        await_completion: bool,
    ) -> DeviceResult<()> {
        // Block dimensions are carried by the descriptor but fixed in
        // the WGSL source via @workgroup_size; only the grid is a
        // dispatch argument.
        self.ensure_pipeline(entry_id)?;
        let pipeline = self
            .pipelines
            .get(entry_id)
            .ok_or_else(|| DeviceError(format!("pipeline '{entry_id}' missing")))?;

        let entries: Vec<wgpu::BindGroupEntry> = arenas
            .iter()
            .enumerate()
            .map(|(i, arena)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: arena.buffer.as_entire_binding(),
            })
            .collect();

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("Bind Group: {entry_id}")),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(entry_id),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(entry_id),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid_dimensions[0], grid_dimensions[1], grid_dimensions[2]);
        }
        self.queue.submit(Some(encoder.finish()));

        if await_completion {
            self.wait()?;
        }
        Ok(())
    }
}

/// A storage buffer exposed as a flat arena.
pub struct WgpuArena {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    buffer: wgpu::Buffer,
    size: u64,
}

impl DeviceArena for WgpuArena {
    fn write(&self, offset: u64, bytes: &[u8]) -> DeviceResult<()> {
        let end = offset
            .checked_add(bytes.len() as u64)
            .filter(|&end| end <= self.size);
        if end.is_none() {
            return Err(DeviceError(format!(
                "write of {} bytes at offset {offset} exceeds arena size {}",
                bytes.len(),
                self.size
            )));
        }
        self.queue.write_buffer(&self.buffer, offset, bytes);
        Ok(())
    }

    fn read(&self, offset: u64, len: u64) -> DeviceResult<Vec<u8>> {
        let end = offset.checked_add(len).filter(|&end| end <= self.size);
        if end.is_none() {
            return Err(DeviceError(format!(
                "read of {len} bytes at offset {offset} exceeds arena size {}",
                self.size
            )));
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Arena readback staging"),
            size: len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Arena readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, offset, &staging, 0, len);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| DeviceError(format!("GPU poll failed during readback: {e:?}")))?;

        pollster::block_on(rx)
            .map_err(|_| DeviceError("readback map result never arrived".to_string()))?
            .map_err(|e| DeviceError(format!("readback map failed: {e}")))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn byte_size(&self) -> u64 {
        self.size
    }
}

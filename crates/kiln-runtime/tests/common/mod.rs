//! Common test utilities for runner integration tests.
//!
//! Provides `CpuHandler`, an in-memory device handler that executes
//! registered Rust closures as kernels, synchronously and in FIFO
//! order, while logging every device interaction for assertions. Also
//! provides descriptor builders for small test graphs.

use kiln_descriptor::{Allocation, AllocationMap, ExecutionStep, GraphDescriptor};
use kiln_runtime::{DeviceArena, DeviceError, DeviceHandler, DeviceResult};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// One logged device interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Register { namespace: String },
    Alloc { arena: usize, byte_size: u64 },
    Write { arena: usize, offset: u64, len: usize },
    Dispatch { entry_id: String, awaited: bool },
}

type SharedLog = Rc<RefCell<Vec<Event>>>;
type SharedArenas = Rc<RefCell<Vec<Rc<RefCell<Vec<u8>>>>>>;

/// A kernel body: (weights, variables, meta, grid, block).
pub type Kernel = Box<
    dyn Fn(&CpuArena, &CpuArena, &CpuArena, [u32; 3], [u32; 3]) -> Result<(), String>,
>;

/// Synchronous in-memory device handler.
///
/// Dispatches execute immediately on the calling thread, which makes
/// the FIFO ordering contract hold trivially; the `awaited` flag is
/// recorded so tests can assert the runner's submission pattern.
pub struct CpuHandler {
    kernels: HashMap<String, Kernel>,
    namespaces: HashSet<String>,
    log: SharedLog,
    arenas: SharedArenas,
    next_arena: Cell<usize>,
}

/// Test-side handle onto a `CpuHandler` that has been moved into a
/// runner.
#[derive(Clone)]
pub struct CpuProbe {
    log: SharedLog,
    arenas: SharedArenas,
}

impl CpuHandler {
    pub fn new() -> (Self, CpuProbe) {
        let log: SharedLog = Rc::default();
        let arenas: SharedArenas = Rc::default();
        let probe = CpuProbe {
            log: Rc::clone(&log),
            arenas: Rc::clone(&arenas),
        };
        let handler = Self {
            kernels: HashMap::new(),
            namespaces: HashSet::new(),
            log,
            arenas,
            next_arena: Cell::new(0),
        };
        (handler, probe)
    }

    /// Register a kernel body under an entry-point name.
    pub fn define_kernel(
        &mut self,
        entry: &str,
        body: impl Fn(&CpuArena, &CpuArena, &CpuArena, [u32; 3], [u32; 3]) -> Result<(), String>
            + 'static,
    ) {
        self.kernels.insert(entry.to_string(), Box::new(body));
    }
}

impl DeviceHandler for CpuHandler {
    type Arena = CpuArena;

    fn register_program(&mut self, _source: &str, namespace: &str) -> DeviceResult<()> {
        self.namespaces.insert(namespace.to_string());
        self.log.borrow_mut().push(Event::Register {
            namespace: namespace.to_string(),
        });
        Ok(())
    }

    fn alloc_arena(&self, byte_size: u64) -> DeviceResult<CpuArena> {
        let id = self.next_arena.get();
        self.next_arena.set(id + 1);

        let data = Rc::new(RefCell::new(vec![0u8; byte_size as usize]));
        self.arenas.borrow_mut().push(Rc::clone(&data));
        self.log.borrow_mut().push(Event::Alloc {
            arena: id,
            byte_size,
        });

        Ok(CpuArena {
            id,
            data,
            log: Rc::clone(&self.log),
        })
    }

    fn dispatch(
        &mut self,
        entry_id: &str,
        grid_dimensions: [u32; 3],
        block_dimensions: [u32; 3],
        arenas: &[&CpuArena],
        await_completion: bool,
    ) -> DeviceResult<()> {
        self.log.borrow_mut().push(Event::Dispatch {
            entry_id: entry_id.to_string(),
            awaited: await_completion,
        });

        let (namespace, entry) = entry_id
            .split_once('.')
            .ok_or_else(|| DeviceError(format!("malformed entry id '{entry_id}'")))?;
        if !self.namespaces.contains(namespace) {
            return Err(DeviceError(format!("no program registered under '{namespace}'")));
        }
        let kernel = self
            .kernels
            .get(entry)
            .ok_or_else(|| DeviceError(format!("unknown entry point '{entry}'")))?;

        let [weights, variables, meta] = arenas else {
            return Err(DeviceError(format!(
                "expected 3 bound arenas, got {}",
                arenas.len()
            )));
        };

        kernel(weights, variables, meta, grid_dimensions, block_dimensions)
            .map_err(DeviceError)
    }
}

/// Host-memory arena with interior mutability, cloneable for probing.
#[derive(Clone)]
pub struct CpuArena {
    id: usize,
    data: Rc<RefCell<Vec<u8>>>,
    log: SharedLog,
}

impl CpuArena {
    pub fn f32_at(&self, element: usize) -> f32 {
        let data = self.data.borrow();
        let b = &data[element * 4..element * 4 + 4];
        f32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn set_f32(&self, element: usize, value: f32) {
        let mut data = self.data.borrow_mut();
        data[element * 4..element * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn u32_at(&self, index: usize) -> u32 {
        let data = self.data.borrow();
        let b = &data[index * 4..index * 4 + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

impl DeviceArena for CpuArena {
    fn write(&self, offset: u64, bytes: &[u8]) -> DeviceResult<()> {
        let mut data = self.data.borrow_mut();
        let offset = offset as usize;
        if offset + bytes.len() > data.len() {
            return Err(DeviceError(format!(
                "write of {} bytes at {offset} exceeds arena size {}",
                bytes.len(),
                data.len()
            )));
        }
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.log.borrow_mut().push(Event::Write {
            arena: self.id,
            offset: offset as u64,
            len: bytes.len(),
        });
        Ok(())
    }

    fn read(&self, offset: u64, len: u64) -> DeviceResult<Vec<u8>> {
        let data = self.data.borrow();
        let (offset, len) = (offset as usize, len as usize);
        if offset + len > data.len() {
            return Err(DeviceError(format!(
                "read of {len} bytes at {offset} exceeds arena size {}",
                data.len()
            )));
        }
        Ok(data[offset..offset + len].to_vec())
    }

    fn byte_size(&self) -> u64 {
        self.data.borrow().len() as u64
    }
}

impl CpuProbe {
    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    /// Dispatch events in submission order.
    pub fn dispatches(&self) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Dispatch { entry_id, awaited } => Some((entry_id, awaited)),
                _ => None,
            })
            .collect()
    }

    /// Raw contents of the n-th allocated arena.
    pub fn arena_bytes(&self, index: usize) -> Vec<u8> {
        self.arenas.borrow()[index].borrow().clone()
    }

    /// Whether any write ever targeted the n-th allocated arena.
    pub fn arena_written(&self, index: usize) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, Event::Write { arena, .. } if *arena == index))
    }
}

/// Standard arithmetic kernels used across tests. Meta layout for all
/// of them: `[src_offset, dst_offset, count]` as little-endian u32.
pub fn define_arithmetic_kernels(handler: &mut CpuHandler) {
    handler.define_kernel("double", |_w, vars, meta, _grid, _block| {
        elementwise(vars, meta, |x| x * 2.0)
    });
    handler.define_kernel("add_one", |_w, vars, meta, _grid, _block| {
        elementwise(vars, meta, |x| x + 1.0)
    });
    handler.define_kernel("scale_by_weight", |weights, vars, meta, _grid, _block| {
        let w0 = weights.f32_at(0);
        elementwise(vars, meta, move |x| x * w0)
    });
}

fn elementwise(
    vars: &CpuArena,
    meta: &CpuArena,
    f: impl Fn(f32) -> f32,
) -> Result<(), String> {
    let src = meta.u32_at(0) as usize;
    let dst = meta.u32_at(1) as usize;
    let count = meta.u32_at(2) as usize;
    for i in 0..count {
        vars.set_f32(dst + i, f(vars.f32_at(src + i)));
    }
    Ok(())
}

/// Meta payload bytes for the arithmetic kernels.
pub fn meta_u32(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A step for an arithmetic kernel over `[src, src+count) -> dst`.
pub fn step(entry: &str, src: u32, dst: u32, count: u32) -> ExecutionStep {
    ExecutionStep {
        entry_point: entry.to_string(),
        grid_dimensions: [count.div_ceil(64).max(1), 1, 1],
        block_dimensions: [64, 1, 1],
        meta_payload: meta_u32(&[src, dst, count]),
    }
}

/// Build a descriptor over a single variable arena.
pub fn descriptor(
    weight_total: usize,
    weight_regions: &[(&str, usize, usize)],
    variable_total: usize,
    variable_regions: &[(&str, usize, usize)],
    inputs: &[&str],
    outputs: &[&str],
    exec_infos: Vec<ExecutionStep>,
    weight_encoding: &str,
) -> GraphDescriptor {
    GraphDescriptor {
        kernel_source: "opaque test program".to_string(),
        exec_infos,
        weight_allocation: allocation_map(weight_total, weight_regions),
        variable_allocation: allocation_map(variable_total, variable_regions),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        weight_encoding: weight_encoding.to_string(),
    }
}

pub fn allocation_map(total_size: usize, regions: &[(&str, usize, usize)]) -> AllocationMap {
    AllocationMap {
        total_size,
        allocation: regions
            .iter()
            .map(|&(name, offset, size)| (name.to_string(), Allocation { offset, size }))
            .collect::<HashMap<_, _>>(),
    }
}

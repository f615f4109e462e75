//! Simulated driver backend.
//!
//! Implements [`Driver`] on top of host memory so the whole library can be
//! exercised without GPU hardware. Device allocations are byte vectors at
//! simulated addresses, arrays are linear `pitch × height` buffers, and kernels
//! are optional host closures registered per module.
//!
//! Stream-tagged work is queued and only runs when something synchronizes:
//! the stream itself, an event recorded on it, the context, or any
//! synchronous call (which drains every stream first, like the legacy default
//! stream). Every executed operation advances a simulated clock that events
//! sample for timing.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::api::Driver;
use crate::types::*;

/// Row alignment of pitched allocations; also the fast-path 2D copy constraint.
pub const SIM_PITCH_ALIGNMENT: usize = 512;

/// Alignment texture fetches assume for linear bindings.
pub const SIM_TEXTURE_ALIGNMENT: u64 = 256;

/// Simulated device memory when no capacity is given.
pub const SIM_DEFAULT_CAPACITY: usize = devrt_common::DEFAULT_SIM_CAPACITY;

const SIM_BASE_ADDRESS: u64 = 0x1_0000_0000;
const SIM_OP_COST_MS: f64 = 0.01;
const SIM_MAX_THREADS_PER_BLOCK: u64 = 1024;
const CU_EVENT_DISABLE_TIMING: u32 = 0x2;

/// Host-side body of a simulated kernel.
pub type KernelFn = Arc<dyn Fn(&mut SimDevice, &LaunchRecord) -> CUresult + Send + Sync>;

/// One kernel launch as the simulated device saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub function: String,
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub shared_mem_bytes: u32,
    pub params: Vec<u8>,
    /// Texture references made visible to this launch, by name.
    pub textures: Vec<String>,
}

impl LaunchRecord {
    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        self.params.get(offset..offset.checked_add(N)?)?.try_into().ok()
    }

    pub fn read_i32(&self, offset: usize) -> Option<i32> {
        self.read(offset).map(i32::from_ne_bytes)
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.read(offset).map(u32::from_ne_bytes)
    }

    pub fn read_f32(&self, offset: usize) -> Option<f32> {
        self.read(offset).map(f32::from_ne_bytes)
    }

    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        self.read(offset).map(u64::from_ne_bytes)
    }
}

/// Contents of a simulated module: named functions, textures and globals.
#[derive(Clone, Default)]
pub struct SimModule {
    functions: HashMap<String, Option<KernelFn>>,
    textures: Vec<String>,
    globals: Vec<(String, usize)>,
}

impl SimModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function whose launches are recorded but do nothing.
    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.functions.insert(name.into(), None);
        self
    }

    /// Declare a function backed by a host closure.
    pub fn with_kernel<F>(mut self, name: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(&mut SimDevice, &LaunchRecord) -> CUresult + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Some(Arc::new(kernel)));
        self
    }

    pub fn with_texture(mut self, name: impl Into<String>) -> Self {
        self.textures.push(name.into());
        self
    }

    /// Declare a zero-initialized global of `size` bytes.
    pub fn with_global(mut self, name: impl Into<String>, size: usize) -> Self {
        self.globals.push((name.into(), size));
        self
    }
}

/// Resource counts of a [`SimDriver`], for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub allocations: usize,
    pub allocated_bytes: usize,
    pub arrays: usize,
    pub host_buffers: usize,
    pub contexts: usize,
    pub streams: usize,
    pub events: usize,
    pub modules: usize,
}

struct SimArray {
    pitch: usize,
    data: Vec<u8>,
}

/// Simulated device memory: linear allocations plus arrays.
pub struct SimDevice {
    allocations: BTreeMap<u64, Vec<u8>>,
    arrays: HashMap<usize, SimArray>,
    next_address: u64,
    capacity: usize,
    used: usize,
}

#[derive(Clone, Copy)]
enum Region {
    Host(*mut u8),
    Device(u64),
    Array(usize),
}

impl SimDevice {
    fn new(capacity: usize) -> Self {
        Self {
            allocations: BTreeMap::new(),
            arrays: HashMap::new(),
            next_address: SIM_BASE_ADDRESS,
            capacity,
            used: 0,
        }
    }

    fn reserve(&mut self, size: usize) -> Result<(), CUresult> {
        if size == 0 {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        match self.used.checked_add(size) {
            Some(total) if total <= self.capacity => {
                self.used = total;
                Ok(())
            }
            _ => Err(CUDA_ERROR_OUT_OF_MEMORY),
        }
    }

    fn allocate(&mut self, size: usize) -> Result<u64, CUresult> {
        self.reserve(size)?;
        let addr = self.next_address;
        self.next_address += size.next_multiple_of(SIM_PITCH_ALIGNMENT) as u64;
        self.allocations.insert(addr, vec![0u8; size]);
        Ok(addr)
    }

    fn release(&mut self, addr: u64) -> CUresult {
        match self.allocations.remove(&addr) {
            Some(buf) => {
                self.used -= buf.len();
                CUDA_SUCCESS
            }
            None => CUDA_ERROR_INVALID_VALUE,
        }
    }

    /// Find the allocation holding `[addr, addr + len)`.
    fn locate(&self, addr: u64, len: usize) -> Result<(u64, usize), CUresult> {
        let (&base, buf) = self
            .allocations
            .range(..=addr)
            .next_back()
            .ok_or(CUDA_ERROR_INVALID_VALUE)?;
        let offset = (addr - base) as usize;
        if offset.checked_add(len).map_or(true, |end| end > buf.len()) {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        Ok((base, offset))
    }

    /// Borrow `len` bytes of device memory at `addr`.
    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], CUresult> {
        let (base, offset) = self.locate(addr, len)?;
        Ok(&self.allocations[&base][offset..offset + len])
    }

    /// Mutably borrow `len` bytes of device memory at `addr`.
    pub fn slice_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], CUresult> {
        let (base, offset) = self.locate(addr, len)?;
        match self.allocations.get_mut(&base) {
            Some(buf) => Ok(&mut buf[offset..offset + len]),
            None => Err(CUDA_ERROR_INVALID_VALUE),
        }
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), CUresult> {
        self.slice_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn array(&self, id: usize) -> Result<&SimArray, CUresult> {
        self.arrays.get(&id).ok_or(CUDA_ERROR_INVALID_HANDLE)
    }

    fn array_slice(&mut self, id: usize, at: usize, len: usize) -> Result<&mut [u8], CUresult> {
        let array = self.arrays.get_mut(&id).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        let end = at.checked_add(len).ok_or(CUDA_ERROR_INVALID_VALUE)?;
        array.data.get_mut(at..end).ok_or(CUDA_ERROR_INVALID_VALUE)
    }

    /// # Safety
    /// Host regions must be readable for `at + len` bytes.
    unsafe fn read_region(&mut self, region: Region, at: usize, len: usize) -> Result<Vec<u8>, CUresult> {
        match region {
            Region::Host(ptr) => {
                if ptr.is_null() {
                    return Err(CUDA_ERROR_INVALID_VALUE);
                }
                Ok(unsafe { std::slice::from_raw_parts(ptr.add(at), len) }.to_vec())
            }
            Region::Device(addr) => Ok(self.read(device_offset(addr, at)?, len)?.to_vec()),
            Region::Array(id) => Ok(self.array_slice(id, at, len)?.to_vec()),
        }
    }

    /// # Safety
    /// Host regions must be writable for `at + data.len()` bytes.
    unsafe fn write_region(&mut self, region: Region, at: usize, data: &[u8]) -> Result<(), CUresult> {
        match region {
            Region::Host(ptr) => {
                if ptr.is_null() {
                    return Err(CUDA_ERROR_INVALID_VALUE);
                }
                unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(at), data.len()) };
                Ok(())
            }
            Region::Device(addr) => self.write(device_offset(addr, at)?, data),
            Region::Array(id) => {
                self.array_slice(id, at, data.len())?.copy_from_slice(data);
                Ok(())
            }
        }
    }

    /// # Safety
    /// See [`SimDevice::read_region`] and [`SimDevice::write_region`].
    unsafe fn copy_linear(&mut self, dst: (Region, usize), src: (Region, usize), len: usize) -> CUresult {
        let data = match unsafe { self.read_region(src.0, src.1, len) } {
            Ok(data) => data,
            Err(res) => return res,
        };
        match unsafe { self.write_region(dst.0, dst.1, &data) } {
            Ok(()) => CUDA_SUCCESS,
            Err(res) => res,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn endpoint(
        &self,
        memory_type: u32,
        host: *mut u8,
        device: CUdeviceptr,
        array: CUarray,
        pitch: usize,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<(Region, usize), CUresult> {
        let (region, pitch) = match memory_type {
            CU_MEMORYTYPE_HOST => (Region::Host(host), pitch),
            CU_MEMORYTYPE_DEVICE => (Region::Device(device), pitch),
            CU_MEMORYTYPE_ARRAY => {
                let id = array as usize;
                let arr = self.array(id)?;
                if y.checked_add(height).map_or(true, |end| end > arr.data.len() / arr.pitch) {
                    return Err(CUDA_ERROR_INVALID_VALUE);
                }
                (Region::Array(id), arr.pitch)
            }
            _ => return Err(CUDA_ERROR_INVALID_VALUE),
        };
        let row_end = x.checked_add(width).ok_or(CUDA_ERROR_INVALID_VALUE)?;
        if (height > 1 || memory_type == CU_MEMORYTYPE_ARRAY) && row_end > pitch {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        Ok((region, pitch))
    }

    /// # Safety
    /// Host members of `c` must describe memory valid for the whole region.
    unsafe fn copy_2d(&mut self, c: &CudaMemcpy2D, aligned: bool) -> CUresult {
        if aligned
            && c.height > 1
            && c.src_memory_type == CU_MEMORYTYPE_DEVICE
            && c.dst_memory_type == CU_MEMORYTYPE_DEVICE
            && (c.src_pitch % SIM_PITCH_ALIGNMENT != 0 || c.dst_pitch % SIM_PITCH_ALIGNMENT != 0)
        {
            return CUDA_ERROR_INVALID_VALUE;
        }
        let src = self.endpoint(
            c.src_memory_type,
            c.src_host as *mut u8,
            c.src_device,
            c.src_array,
            c.src_pitch,
            c.src_x_in_bytes,
            c.src_y,
            c.width_in_bytes,
            c.height,
        );
        let dst = self.endpoint(
            c.dst_memory_type,
            c.dst_host as *mut u8,
            c.dst_device,
            c.dst_array,
            c.dst_pitch,
            c.dst_x_in_bytes,
            c.dst_y,
            c.width_in_bytes,
            c.height,
        );
        let ((src, src_pitch), (dst, dst_pitch)) = match (src, dst) {
            (Ok(src), Ok(dst)) => (src, dst),
            (Err(res), _) | (_, Err(res)) => return res,
        };

        let row_start = |y: usize, row: usize, pitch: usize, x: usize| {
            y.checked_add(row)?.checked_mul(pitch)?.checked_add(x)
        };
        let mut rows = Vec::with_capacity(c.height);
        for row in 0..c.height {
            let Some(at) = row_start(c.src_y, row, src_pitch, c.src_x_in_bytes) else {
                return CUDA_ERROR_INVALID_VALUE;
            };
            match unsafe { self.read_region(src, at, c.width_in_bytes) } {
                Ok(data) => rows.push(data),
                Err(res) => return res,
            }
        }
        for (row, data) in rows.iter().enumerate() {
            let Some(at) = row_start(c.dst_y, row, dst_pitch, c.dst_x_in_bytes) else {
                return CUDA_ERROR_INVALID_VALUE;
            };
            if let Err(res) = unsafe { self.write_region(dst, at, data) } {
                return res;
            }
        }
        CUDA_SUCCESS
    }
}

/// Device work waiting in a stream queue.
enum Pending {
    Copy {
        dst: (Region, usize),
        src: (Region, usize),
        len: usize,
    },
    Copy2D(CudaMemcpy2D),
    Record(usize),
    Launch(usize, LaunchRecord),
}

// SAFETY: host pointers inside queued copies are kept valid by the caller until
// the stream drains; that is the contract of the async `Driver` methods.
unsafe impl Send for Pending {}

#[derive(Clone, Copy, PartialEq)]
enum EventState {
    Idle,
    Pending(usize),
    Complete(f64),
}

struct SimEvent {
    flags: u32,
    state: EventState,
}

struct SimFunction {
    name: String,
    module: usize,
    kernel: Option<KernelFn>,
    /// Textures bound for the next launch only.
    textures: Vec<String>,
}

struct SimTexRef {
    name: String,
    module: usize,
}

struct LoadedModule {
    def: SimModule,
    functions: HashMap<String, usize>,
    textures: HashMap<String, usize>,
    globals: HashMap<String, (u64, usize)>,
}

struct SimState {
    initialized: bool,
    device: SimDevice,
    host_buffers: HashMap<usize, usize>,
    contexts: HashSet<usize>,
    streams: BTreeMap<usize, VecDeque<Pending>>,
    events: HashMap<usize, SimEvent>,
    modules: HashMap<usize, LoadedModule>,
    functions: HashMap<usize, SimFunction>,
    texrefs: HashMap<usize, SimTexRef>,
    launches: Vec<LaunchRecord>,
    clock_ms: f64,
    next_handle: usize,
}

impl SimState {
    fn handle(&mut self) -> usize {
        // Start from 1 to avoid confusion with NULL/0 handles
        self.next_handle += 1;
        self.next_handle
    }

    fn execute(&mut self, op: Pending) -> CUresult {
        self.clock_ms += SIM_OP_COST_MS;
        match op {
            Pending::Copy { dst, src, len } => unsafe { self.device.copy_linear(dst, src, len) },
            Pending::Copy2D(copy) => unsafe { self.device.copy_2d(&copy, true) },
            Pending::Record(event) => {
                if let Some(ev) = self.events.get_mut(&event) {
                    ev.state = EventState::Complete(self.clock_ms);
                }
                CUDA_SUCCESS
            }
            Pending::Launch(func, record) => {
                let kernel = self.functions.get(&func).and_then(|f| f.kernel.clone());
                let res = match kernel {
                    Some(kernel) => kernel(&mut self.device, &record),
                    None => CUDA_SUCCESS,
                };
                trace!(function = %record.function, "simulated launch executed");
                self.launches.push(record);
                res
            }
        }
    }

    /// Run every queued operation of `stream`; reports the first failure.
    fn drain(&mut self, stream: usize) -> CUresult {
        let mut first = CUDA_SUCCESS;
        while let Some(op) = self.streams.get_mut(&stream).and_then(|q| q.pop_front()) {
            let res = self.execute(op);
            if first == CUDA_SUCCESS {
                first = res;
            }
        }
        first
    }

    fn drain_all(&mut self) -> CUresult {
        let ids: Vec<usize> = self.streams.keys().copied().collect();
        let mut first = CUDA_SUCCESS;
        for id in ids {
            let res = self.drain(id);
            if first == CUDA_SUCCESS {
                first = res;
            }
        }
        first
    }

    /// Run an operation the way a synchronous call on the default stream does.
    fn run_now(&mut self, op: Pending) -> CUresult {
        let res = self.drain_all();
        if res != CUDA_SUCCESS {
            return res;
        }
        self.execute(op)
    }

    fn submit(&mut self, stream: CUstream, op: Pending) -> CUresult {
        if stream.is_null() {
            return self.run_now(op);
        }
        match self.streams.get_mut(&(stream as usize)) {
            Some(queue) => {
                queue.push_back(op);
                CUDA_SUCCESS
            }
            None => CUDA_ERROR_INVALID_HANDLE,
        }
    }

    fn memset(&mut self, dst: CUdeviceptr, width: usize, count: usize, fill: impl Fn(&mut [u8])) -> CUresult {
        if dst % width as u64 != 0 {
            return CUDA_ERROR_INVALID_VALUE;
        }
        let res = self.drain_all();
        if res != CUDA_SUCCESS {
            return res;
        }
        self.clock_ms += SIM_OP_COST_MS;
        match self.device.slice_mut(dst, count * width) {
            Ok(slice) => {
                slice.chunks_exact_mut(width).for_each(fill);
                CUDA_SUCCESS
            }
            Err(res) => res,
        }
    }

    fn instantiate(&mut self, def: SimModule) -> Result<usize, CUresult> {
        let mut globals = HashMap::new();
        for (name, size) in &def.globals {
            match self.device.allocate(*size) {
                Ok(addr) => {
                    globals.insert(name.clone(), (addr, *size));
                }
                Err(res) => {
                    for (addr, _) in globals.values() {
                        self.device.release(*addr);
                    }
                    return Err(res);
                }
            }
        }
        let id = self.handle();
        self.modules.insert(
            id,
            LoadedModule {
                def,
                functions: HashMap::new(),
                textures: HashMap::new(),
                globals,
            },
        );
        Ok(id)
    }
}

impl Drop for SimState {
    fn drop(&mut self) {
        for (addr, len) in self.host_buffers.drain() {
            // SAFETY: every entry was produced by `Box::into_raw` in `mem_alloc_host`.
            drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(addr as *mut u8, len)) });
        }
    }
}

/// Host-memory implementation of [`Driver`].
pub struct SimDriver {
    state: Mutex<SimState>,
    module_files: DashMap<PathBuf, SimModule>,
    module_images: DashMap<Vec<u8>, SimModule>,
}

impl SimDriver {
    /// Create a simulated device with [`SIM_DEFAULT_CAPACITY`] bytes of memory.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(SIM_DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        debug!(capacity, "creating simulated driver");
        Arc::new(Self {
            state: Mutex::new(SimState {
                initialized: false,
                device: SimDevice::new(capacity),
                host_buffers: HashMap::new(),
                contexts: HashSet::new(),
                streams: BTreeMap::new(),
                events: HashMap::new(),
                modules: HashMap::new(),
                functions: HashMap::new(),
                texrefs: HashMap::new(),
                launches: Vec::new(),
                clock_ms: 0.0,
                next_handle: 0,
            }),
            module_files: DashMap::new(),
            module_images: DashMap::new(),
        })
    }

    /// Make `module` loadable from `path`.
    pub fn install_module(&self, path: impl Into<PathBuf>, module: SimModule) {
        self.module_files.insert(path.into(), module);
    }

    /// Make `module` loadable from the in-memory `image`.
    pub fn install_image(&self, image: impl Into<Vec<u8>>, module: SimModule) {
        self.module_images.insert(image.into(), module);
    }

    /// Launches executed so far, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    pub fn stats(&self) -> SimStats {
        let state = self.state.lock();
        SimStats {
            allocations: state.device.allocations.len(),
            allocated_bytes: state.device.used,
            arrays: state.device.arrays.len(),
            host_buffers: state.host_buffers.len(),
            contexts: state.contexts.len(),
            streams: state.streams.len(),
            events: state.events.len(),
            modules: state.modules.len(),
        }
    }

    /// Operations still queued on `stream`.
    pub fn pending(&self, stream: CUstream) -> usize {
        self.state
            .lock()
            .streams
            .get(&(stream as usize))
            .map_or(0, VecDeque::len)
    }
}

fn as_handle(id: usize) -> *mut c_void {
    id as *mut c_void
}

fn device_offset(addr: CUdeviceptr, at: usize) -> Result<CUdeviceptr, CUresult> {
    addr.checked_add(at as u64).ok_or(CUDA_ERROR_INVALID_VALUE)
}

fn status(result: Result<(), CUresult>) -> CUresult {
    match result {
        Ok(()) => CUDA_SUCCESS,
        Err(res) => res,
    }
}

fn array_element_size(format: u32) -> Option<usize> {
    match format {
        CU_AD_FORMAT_UNSIGNED_INT8 | CU_AD_FORMAT_SIGNED_INT8 => Some(1),
        CU_AD_FORMAT_UNSIGNED_INT16 | CU_AD_FORMAT_SIGNED_INT16 | CU_AD_FORMAT_HALF => Some(2),
        CU_AD_FORMAT_UNSIGNED_INT32 | CU_AD_FORMAT_SIGNED_INT32 | CU_AD_FORMAT_FLOAT => Some(4),
        _ => None,
    }
}

impl Driver for SimDriver {
    fn backend_name(&self) -> &'static str {
        "sim"
    }

    // ── Initialization ────────────────────────────────────────────

    fn init(&self, _flags: u32) -> CUresult {
        self.state.lock().initialized = true;
        CUDA_SUCCESS
    }

    fn driver_get_version(&self) -> Result<i32, CUresult> {
        Ok(12000)
    }

    // ── Device Management ─────────────────────────────────────────

    fn device_get_count(&self) -> Result<i32, CUresult> {
        if self.state.lock().initialized { Ok(1) } else { Err(CUDA_ERROR_NOT_INITIALIZED) }
    }

    fn device_get(&self, ordinal: i32) -> Result<CUdevice, CUresult> {
        if !self.state.lock().initialized {
            return Err(CUDA_ERROR_NOT_INITIALIZED);
        }
        if ordinal == 0 { Ok(0) } else { Err(CUDA_ERROR_INVALID_DEVICE) }
    }

    fn device_get_name(&self, device: CUdevice) -> Result<String, CUresult> {
        if device == 0 { Ok("devrt simulated device".to_string()) } else { Err(CUDA_ERROR_INVALID_DEVICE) }
    }

    fn device_total_mem(&self, device: CUdevice) -> Result<usize, CUresult> {
        if device == 0 { Ok(self.state.lock().device.capacity) } else { Err(CUDA_ERROR_INVALID_DEVICE) }
    }

    // ── Context Management ────────────────────────────────────────

    fn ctx_create(&self, _flags: u32, device: CUdevice) -> Result<CUcontext, CUresult> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(CUDA_ERROR_NOT_INITIALIZED);
        }
        if device != 0 {
            return Err(CUDA_ERROR_INVALID_DEVICE);
        }
        let id = state.handle();
        state.contexts.insert(id);
        Ok(as_handle(id))
    }

    fn ctx_destroy(&self, ctx: CUcontext) -> CUresult {
        let mut state = self.state.lock();
        state.drain_all();
        if state.contexts.remove(&(ctx as usize)) { CUDA_SUCCESS } else { CUDA_ERROR_INVALID_CONTEXT }
    }

    fn ctx_set_current(&self, ctx: CUcontext) -> CUresult {
        let state = self.state.lock();
        if ctx.is_null() || state.contexts.contains(&(ctx as usize)) {
            CUDA_SUCCESS
        } else {
            CUDA_ERROR_INVALID_CONTEXT
        }
    }

    fn ctx_synchronize(&self) -> CUresult {
        self.state.lock().drain_all()
    }

    // ── Module Management ─────────────────────────────────────────

    fn module_load(&self, fname: &str) -> Result<CUmodule, CUresult> {
        let def = self
            .module_files
            .get(Path::new(fname))
            .map(|m| m.value().clone())
            .ok_or(CUDA_ERROR_FILE_NOT_FOUND)?;
        let id = self.state.lock().instantiate(def)?;
        debug!(module = id, "simulated module loaded from {}", fname);
        Ok(as_handle(id))
    }

    fn module_load_data(&self, image: &[u8]) -> Result<CUmodule, CUresult> {
        let def = self
            .module_images
            .get(image)
            .map(|m| m.value().clone())
            .ok_or(CUDA_ERROR_INVALID_IMAGE)?;
        let id = self.state.lock().instantiate(def)?;
        Ok(as_handle(id))
    }

    fn module_unload(&self, module: CUmodule) -> CUresult {
        let mut state = self.state.lock();
        let id = module as usize;
        let Some(loaded) = state.modules.remove(&id) else {
            return CUDA_ERROR_INVALID_HANDLE;
        };
        for (addr, _) in loaded.globals.values() {
            state.device.release(*addr);
        }
        state.functions.retain(|_, f| f.module != id);
        state.texrefs.retain(|_, t| t.module != id);
        CUDA_SUCCESS
    }

    fn module_get_function(&self, module: CUmodule, name: &str) -> Result<CUfunction, CUresult> {
        let mut state = self.state.lock();
        let mod_id = module as usize;
        let loaded = state.modules.get(&mod_id).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        if let Some(&id) = loaded.functions.get(name) {
            return Ok(as_handle(id));
        }
        let kernel = loaded.def.functions.get(name).ok_or(CUDA_ERROR_NOT_FOUND)?.clone();
        let id = state.handle();
        state.functions.insert(
            id,
            SimFunction {
                name: name.to_string(),
                module: mod_id,
                kernel,
                textures: Vec::new(),
            },
        );
        if let Some(loaded) = state.modules.get_mut(&mod_id) {
            loaded.functions.insert(name.to_string(), id);
        }
        Ok(as_handle(id))
    }

    fn module_get_global(&self, module: CUmodule, name: &str) -> Result<(CUdeviceptr, usize), CUresult> {
        let state = self.state.lock();
        let loaded = state.modules.get(&(module as usize)).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        loaded.globals.get(name).copied().ok_or(CUDA_ERROR_NOT_FOUND)
    }

    fn module_get_tex_ref(&self, module: CUmodule, name: &str) -> Result<CUtexref, CUresult> {
        let mut state = self.state.lock();
        let mod_id = module as usize;
        let loaded = state.modules.get(&mod_id).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        if let Some(&id) = loaded.textures.get(name) {
            return Ok(as_handle(id));
        }
        if !loaded.def.textures.iter().any(|t| t == name) {
            return Err(CUDA_ERROR_NOT_FOUND);
        }
        let id = state.handle();
        state.texrefs.insert(
            id,
            SimTexRef {
                name: name.to_string(),
                module: mod_id,
            },
        );
        if let Some(loaded) = state.modules.get_mut(&mod_id) {
            loaded.textures.insert(name.to_string(), id);
        }
        Ok(as_handle(id))
    }

    // ── Memory Management ─────────────────────────────────────────

    fn mem_alloc(&self, byte_size: usize) -> Result<CUdeviceptr, CUresult> {
        self.state.lock().device.allocate(byte_size)
    }

    fn mem_alloc_pitch(&self, width: usize, height: usize, element_size: u32) -> Result<(CUdeviceptr, usize), CUresult> {
        if !matches!(element_size, 4 | 8 | 16) || width == 0 || height == 0 {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let pitch = width.next_multiple_of(SIM_PITCH_ALIGNMENT);
        let size = pitch.checked_mul(height).ok_or(CUDA_ERROR_INVALID_VALUE)?;
        let dptr = self.state.lock().device.allocate(size)?;
        Ok((dptr, pitch))
    }

    fn mem_free(&self, dptr: CUdeviceptr) -> CUresult {
        let mut state = self.state.lock();
        state.drain_all();
        state.device.release(dptr)
    }

    fn mem_alloc_host(&self, byte_size: usize) -> Result<*mut c_void, CUresult> {
        if byte_size == 0 {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let buf = vec![0u8; byte_size].into_boxed_slice();
        let ptr = Box::into_raw(buf) as *mut u8;
        self.state.lock().host_buffers.insert(ptr as usize, byte_size);
        Ok(ptr as *mut c_void)
    }

    fn mem_free_host(&self, ptr: *mut c_void) -> CUresult {
        let mut state = self.state.lock();
        state.drain_all();
        match state.host_buffers.remove(&(ptr as usize)) {
            Some(len) => {
                // SAFETY: the entry was produced by `Box::into_raw` in `mem_alloc_host`.
                drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr as *mut u8, len)) });
                CUDA_SUCCESS
            }
            None => CUDA_ERROR_INVALID_VALUE,
        }
    }

    fn memset_d8(&self, dst: CUdeviceptr, value: u8, count: usize) -> CUresult {
        self.state.lock().memset(dst, 1, count, |c| c[0] = value)
    }

    fn memset_d16(&self, dst: CUdeviceptr, value: u16, count: usize) -> CUresult {
        let bytes = value.to_ne_bytes();
        self.state.lock().memset(dst, 2, count, |c| c.copy_from_slice(&bytes))
    }

    fn memset_d32(&self, dst: CUdeviceptr, value: u32, count: usize) -> CUresult {
        let bytes = value.to_ne_bytes();
        self.state.lock().memset(dst, 4, count, |c| c.copy_from_slice(&bytes))
    }

    // ── Linear Copies ─────────────────────────────────────────────

    fn memcpy_htod(&self, dst: CUdeviceptr, src: &[u8]) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Device(dst), 0),
            src: (Region::Host(src.as_ptr() as *mut u8), 0),
            len: src.len(),
        })
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: CUdeviceptr) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Host(dst.as_mut_ptr()), 0),
            src: (Region::Device(src), 0),
            len: dst.len(),
        })
    }

    fn memcpy_dtod(&self, dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Device(dst), 0),
            src: (Region::Device(src), 0),
            len: byte_count,
        })
    }

    unsafe fn memcpy_htod_async(&self, dst: CUdeviceptr, src: *const u8, byte_count: usize, stream: CUstream) -> CUresult {
        let op = Pending::Copy {
            dst: (Region::Device(dst), 0),
            src: (Region::Host(src as *mut u8), 0),
            len: byte_count,
        };
        self.state.lock().submit(stream, op)
    }

    unsafe fn memcpy_dtoh_async(&self, dst: *mut u8, src: CUdeviceptr, byte_count: usize, stream: CUstream) -> CUresult {
        let op = Pending::Copy {
            dst: (Region::Host(dst), 0),
            src: (Region::Device(src), 0),
            len: byte_count,
        };
        self.state.lock().submit(stream, op)
    }

    fn memcpy_dtod_async(&self, dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize, stream: CUstream) -> CUresult {
        let op = Pending::Copy {
            dst: (Region::Device(dst), 0),
            src: (Region::Device(src), 0),
            len: byte_count,
        };
        self.state.lock().submit(stream, op)
    }

    // ── Arrays ────────────────────────────────────────────────────

    fn array_create(&self, desc: &CudaArrayDescriptor) -> Result<CUarray, CUresult> {
        let element_size = array_element_size(desc.format).ok_or(CUDA_ERROR_INVALID_VALUE)?;
        if !matches!(desc.num_channels, 1 | 2 | 4) || desc.width == 0 {
            return Err(CUDA_ERROR_INVALID_VALUE);
        }
        let pitch = desc.width * desc.num_channels as usize * element_size;
        let size = pitch * desc.height.max(1);
        let mut state = self.state.lock();
        state.device.reserve(size)?;
        let id = state.handle();
        state.device.arrays.insert(
            id,
            SimArray {
                pitch,
                data: vec![0u8; size],
            },
        );
        Ok(as_handle(id))
    }

    fn array_destroy(&self, array: CUarray) -> CUresult {
        let mut state = self.state.lock();
        state.drain_all();
        match state.device.arrays.remove(&(array as usize)) {
            Some(arr) => {
                state.device.used -= arr.data.len();
                CUDA_SUCCESS
            }
            None => CUDA_ERROR_INVALID_HANDLE,
        }
    }

    fn memcpy_htoa(&self, dst: CUarray, dst_offset: usize, src: &[u8]) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Array(dst as usize), dst_offset),
            src: (Region::Host(src.as_ptr() as *mut u8), 0),
            len: src.len(),
        })
    }

    fn memcpy_atoh(&self, dst: &mut [u8], src: CUarray, src_offset: usize) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Host(dst.as_mut_ptr()), 0),
            src: (Region::Array(src as usize), src_offset),
            len: dst.len(),
        })
    }

    fn memcpy_atoa(&self, dst: CUarray, dst_offset: usize, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Array(dst as usize), dst_offset),
            src: (Region::Array(src as usize), src_offset),
            len: byte_count,
        })
    }

    fn memcpy_dtoa(&self, dst: CUarray, dst_offset: usize, src: CUdeviceptr, byte_count: usize) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Array(dst as usize), dst_offset),
            src: (Region::Device(src), 0),
            len: byte_count,
        })
    }

    fn memcpy_atod(&self, dst: CUdeviceptr, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult {
        self.state.lock().run_now(Pending::Copy {
            dst: (Region::Device(dst), 0),
            src: (Region::Array(src as usize), src_offset),
            len: byte_count,
        })
    }

    unsafe fn memcpy_htoa_async(&self, dst: CUarray, dst_offset: usize, src: *const u8, byte_count: usize, stream: CUstream) -> CUresult {
        let op = Pending::Copy {
            dst: (Region::Array(dst as usize), dst_offset),
            src: (Region::Host(src as *mut u8), 0),
            len: byte_count,
        };
        self.state.lock().submit(stream, op)
    }

    unsafe fn memcpy_atoh_async(&self, dst: *mut u8, src: CUarray, src_offset: usize, byte_count: usize, stream: CUstream) -> CUresult {
        let op = Pending::Copy {
            dst: (Region::Host(dst), 0),
            src: (Region::Array(src as usize), src_offset),
            len: byte_count,
        };
        self.state.lock().submit(stream, op)
    }

    // ── 2D Copies ─────────────────────────────────────────────────

    unsafe fn memcpy_2d(&self, copy: &CudaMemcpy2D) -> CUresult {
        self.state.lock().run_now(Pending::Copy2D(*copy))
    }

    unsafe fn memcpy_2d_unaligned(&self, copy: &CudaMemcpy2D) -> CUresult {
        let mut state = self.state.lock();
        let res = state.drain_all();
        if res != CUDA_SUCCESS {
            return res;
        }
        state.clock_ms += SIM_OP_COST_MS;
        unsafe { state.device.copy_2d(copy, false) }
    }

    unsafe fn memcpy_2d_async(&self, copy: &CudaMemcpy2D, stream: CUstream) -> CUresult {
        self.state.lock().submit(stream, Pending::Copy2D(*copy))
    }

    // ── Stream Management ─────────────────────────────────────────

    fn stream_create(&self, _flags: u32) -> Result<CUstream, CUresult> {
        let mut state = self.state.lock();
        let id = state.handle();
        state.streams.insert(id, VecDeque::new());
        Ok(as_handle(id))
    }

    fn stream_destroy(&self, stream: CUstream) -> CUresult {
        let mut state = self.state.lock();
        let id = stream as usize;
        if !state.streams.contains_key(&id) {
            return CUDA_ERROR_INVALID_HANDLE;
        }
        // Work already queued still completes.
        state.drain(id);
        state.streams.remove(&id);
        CUDA_SUCCESS
    }

    fn stream_synchronize(&self, stream: CUstream) -> CUresult {
        let mut state = self.state.lock();
        if stream.is_null() {
            return state.drain_all();
        }
        let id = stream as usize;
        if !state.streams.contains_key(&id) {
            return CUDA_ERROR_INVALID_HANDLE;
        }
        state.drain(id)
    }

    fn stream_query(&self, stream: CUstream) -> CUresult {
        let state = self.state.lock();
        let busy = if stream.is_null() {
            state.streams.values().any(|q| !q.is_empty())
        } else {
            match state.streams.get(&(stream as usize)) {
                Some(queue) => !queue.is_empty(),
                None => return CUDA_ERROR_INVALID_HANDLE,
            }
        };
        if busy { CUDA_ERROR_NOT_READY } else { CUDA_SUCCESS }
    }

    // ── Event Management ──────────────────────────────────────────

    fn event_create(&self, flags: u32) -> Result<CUevent, CUresult> {
        let mut state = self.state.lock();
        let id = state.handle();
        state.events.insert(
            id,
            SimEvent {
                flags,
                state: EventState::Idle,
            },
        );
        Ok(as_handle(id))
    }

    fn event_destroy(&self, event: CUevent) -> CUresult {
        if self.state.lock().events.remove(&(event as usize)).is_some() {
            CUDA_SUCCESS
        } else {
            CUDA_ERROR_INVALID_HANDLE
        }
    }

    fn event_record(&self, event: CUevent, stream: CUstream) -> CUresult {
        let mut state = self.state.lock();
        let id = event as usize;
        if !state.events.contains_key(&id) {
            return CUDA_ERROR_INVALID_HANDLE;
        }
        if !stream.is_null() {
            if !state.streams.contains_key(&(stream as usize)) {
                return CUDA_ERROR_INVALID_HANDLE;
            }
            if let Some(ev) = state.events.get_mut(&id) {
                ev.state = EventState::Pending(stream as usize);
            }
        }
        state.submit(stream, Pending::Record(id))
    }

    fn event_synchronize(&self, event: CUevent) -> CUresult {
        let mut state = self.state.lock();
        match state.events.get(&(event as usize)).map(|e| e.state) {
            Some(EventState::Pending(stream)) => state.drain(stream),
            Some(_) => CUDA_SUCCESS,
            None => CUDA_ERROR_INVALID_HANDLE,
        }
    }

    fn event_query(&self, event: CUevent) -> CUresult {
        match self.state.lock().events.get(&(event as usize)).map(|e| e.state) {
            Some(EventState::Pending(_)) => CUDA_ERROR_NOT_READY,
            Some(_) => CUDA_SUCCESS,
            None => CUDA_ERROR_INVALID_HANDLE,
        }
    }

    fn event_elapsed_time(&self, start: CUevent, end: CUevent) -> Result<f32, CUresult> {
        let state = self.state.lock();
        let start = state.events.get(&(start as usize)).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        let end = state.events.get(&(end as usize)).ok_or(CUDA_ERROR_INVALID_HANDLE)?;
        if (start.flags | end.flags) & CU_EVENT_DISABLE_TIMING != 0 {
            return Err(CUDA_ERROR_INVALID_HANDLE);
        }
        match (start.state, end.state) {
            (EventState::Complete(t0), EventState::Complete(t1)) => Ok((t1 - t0) as f32),
            (EventState::Pending(_), _) | (_, EventState::Pending(_)) => Err(CUDA_ERROR_NOT_READY),
            _ => Err(CUDA_ERROR_INVALID_HANDLE),
        }
    }

    // ── Execution ─────────────────────────────────────────────────

    unsafe fn launch_kernel(
        &self,
        func: CUfunction,
        grid_dim: [u32; 3],
        block_dim: [u32; 3],
        shared_mem_bytes: u32,
        stream: CUstream,
        params: &[u8],
    ) -> CUresult {
        if grid_dim.contains(&0) || block_dim.contains(&0) {
            return CUDA_ERROR_INVALID_VALUE;
        }
        let threads: u64 = block_dim.iter().map(|&d| d as u64).product();
        if threads > SIM_MAX_THREADS_PER_BLOCK {
            return CUDA_ERROR_INVALID_VALUE;
        }
        let mut state = self.state.lock();
        let id = func as usize;
        let Some(function) = state.functions.get_mut(&id) else {
            return CUDA_ERROR_INVALID_HANDLE;
        };
        let record = LaunchRecord {
            function: function.name.clone(),
            grid: grid_dim,
            block: block_dim,
            shared_mem_bytes,
            params: params.to_vec(),
            textures: std::mem::take(&mut function.textures),
        };
        debug!(function = %record.function, grid = ?grid_dim, block = ?block_dim, "simulated launch queued");
        state.submit(stream, Pending::Launch(id, record))
    }

    fn param_set_tex_ref(&self, func: CUfunction, texref: CUtexref) -> CUresult {
        let mut state = self.state.lock();
        let Some(name) = state.texrefs.get(&(texref as usize)).map(|t| t.name.clone()) else {
            return CUDA_ERROR_INVALID_HANDLE;
        };
        match state.functions.get_mut(&(func as usize)) {
            Some(function) => {
                if !function.textures.contains(&name) {
                    function.textures.push(name);
                }
                CUDA_SUCCESS
            }
            None => CUDA_ERROR_INVALID_HANDLE,
        }
    }

    // ── Texture References ────────────────────────────────────────

    fn tex_ref_set_address(&self, texref: CUtexref, dptr: CUdeviceptr, bytes: usize) -> Result<usize, CUresult> {
        let state = self.state.lock();
        if !state.texrefs.contains_key(&(texref as usize)) {
            return Err(CUDA_ERROR_INVALID_HANDLE);
        }
        state.device.locate(dptr, bytes)?;
        Ok((dptr % SIM_TEXTURE_ALIGNMENT) as usize)
    }

    fn tex_ref_set_array(&self, texref: CUtexref, array: CUarray, _flags: u32) -> CUresult {
        let state = self.state.lock();
        if !state.texrefs.contains_key(&(texref as usize)) {
            return CUDA_ERROR_INVALID_HANDLE;
        }
        status(state.device.array(array as usize).map(|_| ()))
    }
}

//! Dynamic loading of the real CUDA driver library.
//!
//! Uses `libloading` to load `nvcuda.dll` (Windows) or `libcuda.so.1` (Linux)
//! and implements [`Driver`] over the raw driver API functions.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::{debug, info};

use crate::api::Driver;
use crate::types::*;

/// Function pointer type definitions for the CUDA driver API.
type FnCuInit = unsafe extern "C" fn(flags: c_uint) -> CUresult;
type FnCuDriverGetVersion = unsafe extern "C" fn(version: *mut c_int) -> CUresult;
type FnCuDeviceGetCount = unsafe extern "C" fn(count: *mut c_int) -> CUresult;
type FnCuDeviceGet = unsafe extern "C" fn(device: *mut CUdevice, ordinal: c_int) -> CUresult;
type FnCuDeviceGetName =
    unsafe extern "C" fn(name: *mut c_char, len: c_int, dev: CUdevice) -> CUresult;
type FnCuDeviceTotalMem = unsafe extern "C" fn(bytes: *mut usize, dev: CUdevice) -> CUresult;

// Context management
type FnCuCtxCreate =
    unsafe extern "C" fn(pctx: *mut CUcontext, flags: c_uint, dev: CUdevice) -> CUresult;
type FnCuCtxDestroy = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type FnCuCtxSetCurrent = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type FnCuCtxSynchronize = unsafe extern "C" fn() -> CUresult;

// Module management
type FnCuModuleLoad = unsafe extern "C" fn(module: *mut CUmodule, fname: *const c_char) -> CUresult;
type FnCuModuleLoadData =
    unsafe extern "C" fn(module: *mut CUmodule, image: *const c_void) -> CUresult;
type FnCuModuleUnload = unsafe extern "C" fn(hmod: CUmodule) -> CUresult;
type FnCuModuleGetFunction = unsafe extern "C" fn(
    hfunc: *mut CUfunction,
    hmod: CUmodule,
    name: *const c_char,
) -> CUresult;
type FnCuModuleGetGlobal = unsafe extern "C" fn(
    dptr: *mut CUdeviceptr,
    bytes: *mut usize,
    hmod: CUmodule,
    name: *const c_char,
) -> CUresult;
type FnCuModuleGetTexRef =
    unsafe extern "C" fn(texref: *mut CUtexref, hmod: CUmodule, name: *const c_char) -> CUresult;

// Memory management
type FnCuMemAlloc = unsafe extern "C" fn(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;
type FnCuMemAllocPitch = unsafe extern "C" fn(
    dptr: *mut CUdeviceptr,
    ppitch: *mut usize,
    width: usize,
    height: usize,
    element_size: c_uint,
) -> CUresult;
type FnCuMemFree = unsafe extern "C" fn(dptr: CUdeviceptr) -> CUresult;
type FnCuMemAllocHost = unsafe extern "C" fn(pp: *mut *mut c_void, bytesize: usize) -> CUresult;
type FnCuMemFreeHost = unsafe extern "C" fn(p: *mut c_void) -> CUresult;
type FnCuMemsetD8 = unsafe extern "C" fn(dst: CUdeviceptr, value: u8, count: usize) -> CUresult;
type FnCuMemsetD16 = unsafe extern "C" fn(dst: CUdeviceptr, value: u16, count: usize) -> CUresult;
type FnCuMemsetD32 = unsafe extern "C" fn(dst: CUdeviceptr, value: u32, count: usize) -> CUresult;

// Linear copies
type FnCuMemcpyHtoD =
    unsafe extern "C" fn(dst: CUdeviceptr, src: *const c_void, byte_count: usize) -> CUresult;
type FnCuMemcpyDtoH =
    unsafe extern "C" fn(dst: *mut c_void, src: CUdeviceptr, byte_count: usize) -> CUresult;
type FnCuMemcpyDtoD =
    unsafe extern "C" fn(dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize) -> CUresult;
type FnCuMemcpyHtoDAsync = unsafe extern "C" fn(dst: CUdeviceptr, src: *const c_void, byte_count: usize, hstream: CUstream) -> CUresult;
type FnCuMemcpyDtoHAsync = unsafe extern "C" fn(dst: *mut c_void, src: CUdeviceptr, byte_count: usize, hstream: CUstream) -> CUresult;
type FnCuMemcpyDtoDAsync = unsafe extern "C" fn(dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize, hstream: CUstream) -> CUresult;

// Arrays
type FnCuArrayCreate =
    unsafe extern "C" fn(handle: *mut CUarray, desc: *const CudaArrayDescriptor) -> CUresult;
type FnCuArrayDestroy = unsafe extern "C" fn(handle: CUarray) -> CUresult;
type FnCuMemcpyHtoA = unsafe extern "C" fn(dst: CUarray, dst_offset: usize, src: *const c_void, byte_count: usize) -> CUresult;
type FnCuMemcpyAtoH = unsafe extern "C" fn(dst: *mut c_void, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult;
type FnCuMemcpyAtoA = unsafe extern "C" fn(dst: CUarray, dst_offset: usize, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult;
type FnCuMemcpyDtoA = unsafe extern "C" fn(dst: CUarray, dst_offset: usize, src: CUdeviceptr, byte_count: usize) -> CUresult;
type FnCuMemcpyAtoD = unsafe extern "C" fn(dst: CUdeviceptr, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult;
type FnCuMemcpyHtoAAsync = unsafe extern "C" fn(dst: CUarray, dst_offset: usize, src: *const c_void, byte_count: usize, hstream: CUstream) -> CUresult;
type FnCuMemcpyAtoHAsync = unsafe extern "C" fn(dst: *mut c_void, src: CUarray, src_offset: usize, byte_count: usize, hstream: CUstream) -> CUresult;

// 2D copies
type FnCuMemcpy2D = unsafe extern "C" fn(copy: *const CudaMemcpy2D) -> CUresult;
type FnCuMemcpy2DAsync = unsafe extern "C" fn(copy: *const CudaMemcpy2D, hstream: CUstream) -> CUresult;

// Execution
type FnCuLaunchKernel = unsafe extern "C" fn(
    f: CUfunction,
    grid_dim_x: c_uint,
    grid_dim_y: c_uint,
    grid_dim_z: c_uint,
    block_dim_x: c_uint,
    block_dim_y: c_uint,
    block_dim_z: c_uint,
    shared_mem_bytes: c_uint,
    hstream: CUstream,
    kernel_params: *mut *mut c_void,
    extra: *mut *mut c_void,
) -> CUresult;
type FnCuParamSetTexRef =
    unsafe extern "C" fn(hfunc: CUfunction, texunit: c_int, texref: CUtexref) -> CUresult;

// Texture references
type FnCuTexRefSetAddress = unsafe extern "C" fn(
    byte_offset: *mut usize,
    texref: CUtexref,
    dptr: CUdeviceptr,
    bytes: usize,
) -> CUresult;
type FnCuTexRefSetArray =
    unsafe extern "C" fn(texref: CUtexref, array: CUarray, flags: c_uint) -> CUresult;

// Stream management
type FnCuStreamCreate = unsafe extern "C" fn(phstream: *mut CUstream, flags: c_uint) -> CUresult;
type FnCuStreamDestroy = unsafe extern "C" fn(hstream: CUstream) -> CUresult;
type FnCuStreamSynchronize = unsafe extern "C" fn(hstream: CUstream) -> CUresult;
type FnCuStreamQuery = unsafe extern "C" fn(hstream: CUstream) -> CUresult;

// Event management
type FnCuEventCreate = unsafe extern "C" fn(phevent: *mut CUevent, flags: c_uint) -> CUresult;
type FnCuEventDestroy = unsafe extern "C" fn(hevent: CUevent) -> CUresult;
type FnCuEventRecord = unsafe extern "C" fn(hevent: CUevent, hstream: CUstream) -> CUresult;
type FnCuEventSynchronize = unsafe extern "C" fn(hevent: CUevent) -> CUresult;
type FnCuEventQuery = unsafe extern "C" fn(hevent: CUevent) -> CUresult;
type FnCuEventElapsedTime =
    unsafe extern "C" fn(ms: *mut f32, start: CUevent, end: CUevent) -> CUresult;

/// Dynamically loaded CUDA driver library with function pointers.
pub struct CudaDriver {
    _lib: Library,
    // Initialization
    cu_init: FnCuInit,
    cu_driver_get_version: FnCuDriverGetVersion,
    // Device management
    cu_device_get_count: FnCuDeviceGetCount,
    cu_device_get: FnCuDeviceGet,
    cu_device_get_name: FnCuDeviceGetName,
    cu_device_total_mem: FnCuDeviceTotalMem,
    // Context management
    cu_ctx_create: FnCuCtxCreate,
    cu_ctx_destroy: FnCuCtxDestroy,
    cu_ctx_set_current: FnCuCtxSetCurrent,
    cu_ctx_synchronize: FnCuCtxSynchronize,
    // Module management
    cu_module_load: FnCuModuleLoad,
    cu_module_load_data: FnCuModuleLoadData,
    cu_module_unload: FnCuModuleUnload,
    cu_module_get_function: FnCuModuleGetFunction,
    cu_module_get_global: FnCuModuleGetGlobal,
    cu_module_get_tex_ref: Option<FnCuModuleGetTexRef>,
    // Memory management
    cu_mem_alloc: FnCuMemAlloc,
    cu_mem_alloc_pitch: FnCuMemAllocPitch,
    cu_mem_free: FnCuMemFree,
    cu_mem_alloc_host: FnCuMemAllocHost,
    cu_mem_free_host: FnCuMemFreeHost,
    cu_memset_d8: FnCuMemsetD8,
    cu_memset_d16: FnCuMemsetD16,
    cu_memset_d32: FnCuMemsetD32,
    // Linear copies
    cu_memcpy_htod: FnCuMemcpyHtoD,
    cu_memcpy_dtoh: FnCuMemcpyDtoH,
    cu_memcpy_dtod: FnCuMemcpyDtoD,
    cu_memcpy_htod_async: FnCuMemcpyHtoDAsync,
    cu_memcpy_dtoh_async: FnCuMemcpyDtoHAsync,
    cu_memcpy_dtod_async: Option<FnCuMemcpyDtoDAsync>,
    // Arrays
    cu_array_create: FnCuArrayCreate,
    cu_array_destroy: FnCuArrayDestroy,
    cu_memcpy_htoa: FnCuMemcpyHtoA,
    cu_memcpy_atoh: FnCuMemcpyAtoH,
    cu_memcpy_atoa: FnCuMemcpyAtoA,
    cu_memcpy_dtoa: FnCuMemcpyDtoA,
    cu_memcpy_atod: FnCuMemcpyAtoD,
    cu_memcpy_htoa_async: FnCuMemcpyHtoAAsync,
    cu_memcpy_atoh_async: FnCuMemcpyAtoHAsync,
    // 2D copies
    cu_memcpy_2d: FnCuMemcpy2D,
    cu_memcpy_2d_unaligned: FnCuMemcpy2D,
    cu_memcpy_2d_async: FnCuMemcpy2DAsync,
    // Execution
    cu_launch_kernel: FnCuLaunchKernel,
    cu_param_set_tex_ref: Option<FnCuParamSetTexRef>,
    // Texture references
    cu_tex_ref_set_address: Option<FnCuTexRefSetAddress>,
    cu_tex_ref_set_array: Option<FnCuTexRefSetArray>,
    // Stream management
    cu_stream_create: FnCuStreamCreate,
    cu_stream_destroy: FnCuStreamDestroy,
    cu_stream_synchronize: FnCuStreamSynchronize,
    cu_stream_query: FnCuStreamQuery,
    // Event management
    cu_event_create: FnCuEventCreate,
    cu_event_destroy: FnCuEventDestroy,
    cu_event_record: FnCuEventRecord,
    cu_event_synchronize: FnCuEventSynchronize,
    cu_event_query: FnCuEventQuery,
    cu_event_elapsed_time: FnCuEventElapsedTime,
}

// SAFETY: The CUDA driver library handles are valid from any thread.
// The CUDA driver API itself handles thread safety via context management.
unsafe impl Send for CudaDriver {}
unsafe impl Sync for CudaDriver {}

impl CudaDriver {
    /// Load the CUDA driver library from the platform's default locations.
    pub fn load() -> Result<Arc<Self>, String> {
        Self::load_from(None)
    }

    /// Load the CUDA driver library, preferring `path` when given.
    pub fn load_from(path: Option<&str>) -> Result<Arc<Self>, String> {
        let lib = match path {
            Some(path) => unsafe { Library::new(path) }
                .map_err(|e| format!("failed to load CUDA driver library {}: {}", path, e))?,
            None => Self::load_library()?,
        };

        unsafe {
            let driver = Self {
                cu_init: Self::load_fn(&lib, "cuInit")?,
                cu_driver_get_version: Self::load_fn(&lib, "cuDriverGetVersion")?,
                cu_device_get_count: Self::load_fn(&lib, "cuDeviceGetCount")?,
                cu_device_get: Self::load_fn(&lib, "cuDeviceGet")?,
                cu_device_get_name: Self::load_fn(&lib, "cuDeviceGetName")?,
                cu_device_total_mem: Self::load_fn(&lib, "cuDeviceTotalMem_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuDeviceTotalMem"))?,
                // Context
                cu_ctx_create: Self::load_fn(&lib, "cuCtxCreate_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuCtxCreate"))?,
                cu_ctx_destroy: Self::load_fn(&lib, "cuCtxDestroy_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuCtxDestroy"))?,
                cu_ctx_set_current: Self::load_fn(&lib, "cuCtxSetCurrent")?,
                cu_ctx_synchronize: Self::load_fn(&lib, "cuCtxSynchronize")?,
                // Module
                cu_module_load: Self::load_fn(&lib, "cuModuleLoad")?,
                cu_module_load_data: Self::load_fn(&lib, "cuModuleLoadData")?,
                cu_module_unload: Self::load_fn(&lib, "cuModuleUnload")?,
                cu_module_get_function: Self::load_fn(&lib, "cuModuleGetFunction")?,
                cu_module_get_global: Self::load_fn(&lib, "cuModuleGetGlobal_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuModuleGetGlobal"))?,
                cu_module_get_tex_ref: Self::load_fn_opt(&lib, "cuModuleGetTexRef"),
                // Memory
                cu_mem_alloc: Self::load_fn(&lib, "cuMemAlloc_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemAlloc"))?,
                cu_mem_alloc_pitch: Self::load_fn(&lib, "cuMemAllocPitch_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemAllocPitch"))?,
                cu_mem_free: Self::load_fn(&lib, "cuMemFree_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemFree"))?,
                cu_mem_alloc_host: Self::load_fn(&lib, "cuMemAllocHost_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemAllocHost"))?,
                cu_mem_free_host: Self::load_fn(&lib, "cuMemFreeHost")?,
                cu_memset_d8: Self::load_fn(&lib, "cuMemsetD8_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemsetD8"))?,
                cu_memset_d16: Self::load_fn(&lib, "cuMemsetD16_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemsetD16"))?,
                cu_memset_d32: Self::load_fn(&lib, "cuMemsetD32_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemsetD32"))?,
                // Linear copies
                cu_memcpy_htod: Self::load_fn(&lib, "cuMemcpyHtoD_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyHtoD"))?,
                cu_memcpy_dtoh: Self::load_fn(&lib, "cuMemcpyDtoH_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyDtoH"))?,
                cu_memcpy_dtod: Self::load_fn(&lib, "cuMemcpyDtoD_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyDtoD"))?,
                cu_memcpy_htod_async: Self::load_fn(&lib, "cuMemcpyHtoDAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyHtoDAsync"))?,
                cu_memcpy_dtoh_async: Self::load_fn(&lib, "cuMemcpyDtoHAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyDtoHAsync"))?,
                cu_memcpy_dtod_async: Self::load_fn_opt::<FnCuMemcpyDtoDAsync>(&lib, "cuMemcpyDtoDAsync_v2")
                    .or(Self::load_fn_opt(&lib, "cuMemcpyDtoDAsync")),
                // Arrays
                cu_array_create: Self::load_fn(&lib, "cuArrayCreate_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuArrayCreate"))?,
                cu_array_destroy: Self::load_fn(&lib, "cuArrayDestroy")?,
                cu_memcpy_htoa: Self::load_fn(&lib, "cuMemcpyHtoA_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyHtoA"))?,
                cu_memcpy_atoh: Self::load_fn(&lib, "cuMemcpyAtoH_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyAtoH"))?,
                cu_memcpy_atoa: Self::load_fn(&lib, "cuMemcpyAtoA_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyAtoA"))?,
                cu_memcpy_dtoa: Self::load_fn(&lib, "cuMemcpyDtoA_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyDtoA"))?,
                cu_memcpy_atod: Self::load_fn(&lib, "cuMemcpyAtoD_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyAtoD"))?,
                cu_memcpy_htoa_async: Self::load_fn(&lib, "cuMemcpyHtoAAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyHtoAAsync"))?,
                cu_memcpy_atoh_async: Self::load_fn(&lib, "cuMemcpyAtoHAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpyAtoHAsync"))?,
                // 2D copies
                cu_memcpy_2d: Self::load_fn(&lib, "cuMemcpy2D_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpy2D"))?,
                cu_memcpy_2d_unaligned: Self::load_fn(&lib, "cuMemcpy2DUnaligned_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpy2DUnaligned"))?,
                cu_memcpy_2d_async: Self::load_fn(&lib, "cuMemcpy2DAsync_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuMemcpy2DAsync"))?,
                // Execution
                cu_launch_kernel: Self::load_fn(&lib, "cuLaunchKernel")?,
                cu_param_set_tex_ref: Self::load_fn_opt(&lib, "cuParamSetTexRef"),
                // Texture references
                cu_tex_ref_set_address: Self::load_fn_opt::<FnCuTexRefSetAddress>(&lib, "cuTexRefSetAddress_v2")
                    .or(Self::load_fn_opt(&lib, "cuTexRefSetAddress")),
                cu_tex_ref_set_array: Self::load_fn_opt(&lib, "cuTexRefSetArray"),
                // Stream
                cu_stream_create: Self::load_fn(&lib, "cuStreamCreate")?,
                cu_stream_destroy: Self::load_fn(&lib, "cuStreamDestroy_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuStreamDestroy"))?,
                cu_stream_synchronize: Self::load_fn(&lib, "cuStreamSynchronize")?,
                cu_stream_query: Self::load_fn(&lib, "cuStreamQuery")?,
                // Event
                cu_event_create: Self::load_fn(&lib, "cuEventCreate")?,
                cu_event_destroy: Self::load_fn(&lib, "cuEventDestroy_v2")
                    .or_else(|_| Self::load_fn(&lib, "cuEventDestroy"))?,
                cu_event_record: Self::load_fn(&lib, "cuEventRecord")?,
                cu_event_synchronize: Self::load_fn(&lib, "cuEventSynchronize")?,
                cu_event_query: Self::load_fn(&lib, "cuEventQuery")?,
                cu_event_elapsed_time: Self::load_fn(&lib, "cuEventElapsedTime")?,
                _lib: lib,
            };

            info!("CUDA driver loaded successfully");
            Ok(Arc::new(driver))
        }
    }

    fn load_library() -> Result<Library, String> {
        let lib_names = devrt_common::platform::driver_library_names();
        if lib_names.is_empty() {
            return Err(format!(
                "no CUDA driver library is known for platform {}",
                devrt_common::platform::platform_name()
            ));
        }

        let mut last_err = String::new();
        for name in lib_names {
            match unsafe { Library::new(name) } {
                Ok(lib) => {
                    info!("loaded CUDA driver from: {}", name);
                    return Ok(lib);
                }
                Err(e) => {
                    last_err = format!("{}: {}", name, e);
                    debug!("failed to load {}: {}", name, e);
                }
            }
        }

        Err(format!("failed to load CUDA driver library: {}", last_err))
    }

    unsafe fn load_fn<F: Copy>(lib: &Library, name: &str) -> Result<F, String> {
        let sym: Symbol<F> = unsafe { lib.get(name.as_bytes()) }
            .map_err(|e| format!("failed to load {}: {}", name, e))?;
        Ok(*sym)
    }

    unsafe fn load_fn_opt<F: Copy>(lib: &Library, name: &str) -> Option<F> {
        unsafe { lib.get(name.as_bytes()) }.ok().map(|s: Symbol<F>| *s)
    }
}

fn c_string(s: &str) -> Result<CString, CUresult> {
    CString::new(s).map_err(|_| CUDA_ERROR_INVALID_VALUE)
}

impl Driver for CudaDriver {
    fn backend_name(&self) -> &'static str {
        "cuda"
    }

    // ── Initialization ────────────────────────────────────────────

    fn init(&self, flags: u32) -> CUresult {
        unsafe { (self.cu_init)(flags as c_uint) }
    }

    fn driver_get_version(&self) -> Result<i32, CUresult> {
        let mut version: c_int = 0;
        let res = unsafe { (self.cu_driver_get_version)(&mut version) };
        if res == CUDA_SUCCESS { Ok(version) } else { Err(res) }
    }

    // ── Device Management ─────────────────────────────────────────

    fn device_get_count(&self) -> Result<i32, CUresult> {
        let mut count: c_int = 0;
        let res = unsafe { (self.cu_device_get_count)(&mut count) };
        if res == CUDA_SUCCESS { Ok(count) } else { Err(res) }
    }

    fn device_get(&self, ordinal: i32) -> Result<CUdevice, CUresult> {
        let mut device: CUdevice = 0;
        let res = unsafe { (self.cu_device_get)(&mut device, ordinal) };
        if res == CUDA_SUCCESS { Ok(device) } else { Err(res) }
    }

    fn device_get_name(&self, device: CUdevice) -> Result<String, CUresult> {
        let mut buf = [0u8; 256];
        let res = unsafe {
            (self.cu_device_get_name)(buf.as_mut_ptr() as *mut c_char, 256, device)
        };
        if res == CUDA_SUCCESS {
            let name = unsafe { CStr::from_ptr(buf.as_ptr() as *const c_char) };
            Ok(name.to_string_lossy().into_owned())
        } else {
            Err(res)
        }
    }

    fn device_total_mem(&self, device: CUdevice) -> Result<usize, CUresult> {
        let mut bytes: usize = 0;
        let res = unsafe { (self.cu_device_total_mem)(&mut bytes, device) };
        if res == CUDA_SUCCESS { Ok(bytes) } else { Err(res) }
    }

    // ── Context Management ────────────────────────────────────────

    fn ctx_create(&self, flags: u32, device: CUdevice) -> Result<CUcontext, CUresult> {
        let mut ctx: CUcontext = std::ptr::null_mut();
        let res = unsafe { (self.cu_ctx_create)(&mut ctx, flags as c_uint, device) };
        if res == CUDA_SUCCESS { Ok(ctx) } else { Err(res) }
    }

    fn ctx_destroy(&self, ctx: CUcontext) -> CUresult {
        unsafe { (self.cu_ctx_destroy)(ctx) }
    }

    fn ctx_set_current(&self, ctx: CUcontext) -> CUresult {
        unsafe { (self.cu_ctx_set_current)(ctx) }
    }

    fn ctx_synchronize(&self) -> CUresult {
        unsafe { (self.cu_ctx_synchronize)() }
    }

    // ── Module Management ─────────────────────────────────────────

    fn module_load(&self, fname: &str) -> Result<CUmodule, CUresult> {
        let c_name = c_string(fname)?;
        let mut module: CUmodule = std::ptr::null_mut();
        let res = unsafe { (self.cu_module_load)(&mut module, c_name.as_ptr()) };
        if res == CUDA_SUCCESS { Ok(module) } else { Err(res) }
    }

    fn module_load_data(&self, image: &[u8]) -> Result<CUmodule, CUresult> {
        let mut module: CUmodule = std::ptr::null_mut();
        let res = unsafe {
            (self.cu_module_load_data)(&mut module, image.as_ptr() as *const c_void)
        };
        if res == CUDA_SUCCESS { Ok(module) } else { Err(res) }
    }

    fn module_unload(&self, module: CUmodule) -> CUresult {
        unsafe { (self.cu_module_unload)(module) }
    }

    fn module_get_function(&self, module: CUmodule, name: &str) -> Result<CUfunction, CUresult> {
        let c_name = c_string(name)?;
        let mut func: CUfunction = std::ptr::null_mut();
        let res = unsafe { (self.cu_module_get_function)(&mut func, module, c_name.as_ptr()) };
        if res == CUDA_SUCCESS { Ok(func) } else { Err(res) }
    }

    fn module_get_global(&self, module: CUmodule, name: &str) -> Result<(CUdeviceptr, usize), CUresult> {
        let c_name = c_string(name)?;
        let mut dptr: CUdeviceptr = 0;
        let mut size: usize = 0;
        let res = unsafe { (self.cu_module_get_global)(&mut dptr, &mut size, module, c_name.as_ptr()) };
        if res == CUDA_SUCCESS { Ok((dptr, size)) } else { Err(res) }
    }

    fn module_get_tex_ref(&self, module: CUmodule, name: &str) -> Result<CUtexref, CUresult> {
        if let Some(func) = self.cu_module_get_tex_ref {
            let c_name = c_string(name)?;
            let mut texref: CUtexref = std::ptr::null_mut();
            let res = unsafe { func(&mut texref, module, c_name.as_ptr()) };
            if res == CUDA_SUCCESS { Ok(texref) } else { Err(res) }
        } else {
            Err(CUDA_ERROR_NOT_SUPPORTED)
        }
    }

    // ── Memory Management ─────────────────────────────────────────

    fn mem_alloc(&self, byte_size: usize) -> Result<CUdeviceptr, CUresult> {
        let mut dptr: CUdeviceptr = 0;
        let res = unsafe { (self.cu_mem_alloc)(&mut dptr, byte_size) };
        if res == CUDA_SUCCESS { Ok(dptr) } else { Err(res) }
    }

    fn mem_alloc_pitch(&self, width: usize, height: usize, element_size: u32) -> Result<(CUdeviceptr, usize), CUresult> {
        let mut dptr: CUdeviceptr = 0;
        let mut pitch: usize = 0;
        let res = unsafe {
            (self.cu_mem_alloc_pitch)(&mut dptr, &mut pitch, width, height, element_size as c_uint)
        };
        if res == CUDA_SUCCESS { Ok((dptr, pitch)) } else { Err(res) }
    }

    fn mem_free(&self, dptr: CUdeviceptr) -> CUresult {
        unsafe { (self.cu_mem_free)(dptr) }
    }

    fn mem_alloc_host(&self, byte_size: usize) -> Result<*mut c_void, CUresult> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        let res = unsafe { (self.cu_mem_alloc_host)(&mut ptr, byte_size) };
        if res == CUDA_SUCCESS { Ok(ptr) } else { Err(res) }
    }

    fn mem_free_host(&self, ptr: *mut c_void) -> CUresult {
        unsafe { (self.cu_mem_free_host)(ptr) }
    }

    fn memset_d8(&self, dst: CUdeviceptr, value: u8, count: usize) -> CUresult {
        unsafe { (self.cu_memset_d8)(dst, value, count) }
    }

    fn memset_d16(&self, dst: CUdeviceptr, value: u16, count: usize) -> CUresult {
        unsafe { (self.cu_memset_d16)(dst, value, count) }
    }

    fn memset_d32(&self, dst: CUdeviceptr, value: u32, count: usize) -> CUresult {
        unsafe { (self.cu_memset_d32)(dst, value, count) }
    }

    // ── Linear Copies ─────────────────────────────────────────────

    fn memcpy_htod(&self, dst: CUdeviceptr, src: &[u8]) -> CUresult {
        unsafe { (self.cu_memcpy_htod)(dst, src.as_ptr() as *const c_void, src.len()) }
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: CUdeviceptr) -> CUresult {
        unsafe { (self.cu_memcpy_dtoh)(dst.as_mut_ptr() as *mut c_void, src, dst.len()) }
    }

    fn memcpy_dtod(&self, dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize) -> CUresult {
        unsafe { (self.cu_memcpy_dtod)(dst, src, byte_count) }
    }

    unsafe fn memcpy_htod_async(&self, dst: CUdeviceptr, src: *const u8, byte_count: usize, stream: CUstream) -> CUresult {
        unsafe { (self.cu_memcpy_htod_async)(dst, src as *const c_void, byte_count, stream) }
    }

    unsafe fn memcpy_dtoh_async(&self, dst: *mut u8, src: CUdeviceptr, byte_count: usize, stream: CUstream) -> CUresult {
        unsafe { (self.cu_memcpy_dtoh_async)(dst as *mut c_void, src, byte_count, stream) }
    }

    fn memcpy_dtod_async(&self, dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize, stream: CUstream) -> CUresult {
        if let Some(func) = self.cu_memcpy_dtod_async {
            unsafe { func(dst, src, byte_count, stream) }
        } else {
            self.memcpy_dtod(dst, src, byte_count)
        }
    }

    // ── Arrays ────────────────────────────────────────────────────

    fn array_create(&self, desc: &CudaArrayDescriptor) -> Result<CUarray, CUresult> {
        let mut array: CUarray = std::ptr::null_mut();
        let res = unsafe { (self.cu_array_create)(&mut array, desc) };
        if res == CUDA_SUCCESS { Ok(array) } else { Err(res) }
    }

    fn array_destroy(&self, array: CUarray) -> CUresult {
        unsafe { (self.cu_array_destroy)(array) }
    }

    fn memcpy_htoa(&self, dst: CUarray, dst_offset: usize, src: &[u8]) -> CUresult {
        unsafe { (self.cu_memcpy_htoa)(dst, dst_offset, src.as_ptr() as *const c_void, src.len()) }
    }

    fn memcpy_atoh(&self, dst: &mut [u8], src: CUarray, src_offset: usize) -> CUresult {
        unsafe { (self.cu_memcpy_atoh)(dst.as_mut_ptr() as *mut c_void, src, src_offset, dst.len()) }
    }

    fn memcpy_atoa(&self, dst: CUarray, dst_offset: usize, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult {
        unsafe { (self.cu_memcpy_atoa)(dst, dst_offset, src, src_offset, byte_count) }
    }

    fn memcpy_dtoa(&self, dst: CUarray, dst_offset: usize, src: CUdeviceptr, byte_count: usize) -> CUresult {
        unsafe { (self.cu_memcpy_dtoa)(dst, dst_offset, src, byte_count) }
    }

    fn memcpy_atod(&self, dst: CUdeviceptr, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult {
        unsafe { (self.cu_memcpy_atod)(dst, src, src_offset, byte_count) }
    }

    unsafe fn memcpy_htoa_async(&self, dst: CUarray, dst_offset: usize, src: *const u8, byte_count: usize, stream: CUstream) -> CUresult {
        unsafe { (self.cu_memcpy_htoa_async)(dst, dst_offset, src as *const c_void, byte_count, stream) }
    }

    unsafe fn memcpy_atoh_async(&self, dst: *mut u8, src: CUarray, src_offset: usize, byte_count: usize, stream: CUstream) -> CUresult {
        unsafe { (self.cu_memcpy_atoh_async)(dst as *mut c_void, src, src_offset, byte_count, stream) }
    }

    // ── 2D Copies ─────────────────────────────────────────────────

    unsafe fn memcpy_2d(&self, copy: &CudaMemcpy2D) -> CUresult {
        unsafe { (self.cu_memcpy_2d)(copy) }
    }

    unsafe fn memcpy_2d_unaligned(&self, copy: &CudaMemcpy2D) -> CUresult {
        unsafe { (self.cu_memcpy_2d_unaligned)(copy) }
    }

    unsafe fn memcpy_2d_async(&self, copy: &CudaMemcpy2D, stream: CUstream) -> CUresult {
        unsafe { (self.cu_memcpy_2d_async)(copy, stream) }
    }

    // ── Stream Management ─────────────────────────────────────────

    fn stream_create(&self, flags: u32) -> Result<CUstream, CUresult> {
        let mut stream: CUstream = std::ptr::null_mut();
        let res = unsafe { (self.cu_stream_create)(&mut stream, flags as c_uint) };
        if res == CUDA_SUCCESS { Ok(stream) } else { Err(res) }
    }

    fn stream_destroy(&self, stream: CUstream) -> CUresult {
        unsafe { (self.cu_stream_destroy)(stream) }
    }

    fn stream_synchronize(&self, stream: CUstream) -> CUresult {
        unsafe { (self.cu_stream_synchronize)(stream) }
    }

    fn stream_query(&self, stream: CUstream) -> CUresult {
        unsafe { (self.cu_stream_query)(stream) }
    }

    // ── Event Management ──────────────────────────────────────────

    fn event_create(&self, flags: u32) -> Result<CUevent, CUresult> {
        let mut event: CUevent = std::ptr::null_mut();
        let res = unsafe { (self.cu_event_create)(&mut event, flags as c_uint) };
        if res == CUDA_SUCCESS { Ok(event) } else { Err(res) }
    }

    fn event_destroy(&self, event: CUevent) -> CUresult {
        unsafe { (self.cu_event_destroy)(event) }
    }

    fn event_record(&self, event: CUevent, stream: CUstream) -> CUresult {
        unsafe { (self.cu_event_record)(event, stream) }
    }

    fn event_synchronize(&self, event: CUevent) -> CUresult {
        unsafe { (self.cu_event_synchronize)(event) }
    }

    fn event_query(&self, event: CUevent) -> CUresult {
        unsafe { (self.cu_event_query)(event) }
    }

    fn event_elapsed_time(&self, start: CUevent, end: CUevent) -> Result<f32, CUresult> {
        let mut ms: f32 = 0.0;
        let res = unsafe { (self.cu_event_elapsed_time)(&mut ms, start, end) };
        if res == CUDA_SUCCESS { Ok(ms) } else { Err(res) }
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
        // The driver reads the buffer and its size through the `extra` array,
        // both only for the duration of the call.
        let mut size = params.len();
        let mut extra: [*mut c_void; 5] = [
            CU_LAUNCH_PARAM_BUFFER_POINTER,
            params.as_ptr() as *mut c_void,
            CU_LAUNCH_PARAM_BUFFER_SIZE,
            &mut size as *mut usize as *mut c_void,
            CU_LAUNCH_PARAM_END,
        ];
        unsafe {
            (self.cu_launch_kernel)(
                func,
                grid_dim[0] as c_uint, grid_dim[1] as c_uint, grid_dim[2] as c_uint,
                block_dim[0] as c_uint, block_dim[1] as c_uint, block_dim[2] as c_uint,
                shared_mem_bytes as c_uint,
                stream,
                std::ptr::null_mut(),
                extra.as_mut_ptr(),
            )
        }
    }

    fn param_set_tex_ref(&self, func: CUfunction, texref: CUtexref) -> CUresult {
        if let Some(f) = self.cu_param_set_tex_ref {
            unsafe { f(func, CU_PARAM_TR_DEFAULT, texref) }
        } else {
            // Newer drivers expose module texture references to every kernel
            // of the module launched through cuLaunchKernel.
            CUDA_SUCCESS
        }
    }

    // ── Texture References ────────────────────────────────────────

    fn tex_ref_set_address(&self, texref: CUtexref, dptr: CUdeviceptr, bytes: usize) -> Result<usize, CUresult> {
        if let Some(func) = self.cu_tex_ref_set_address {
            let mut offset: usize = 0;
            let res = unsafe { func(&mut offset, texref, dptr, bytes) };
            if res == CUDA_SUCCESS { Ok(offset) } else { Err(res) }
        } else {
            Err(CUDA_ERROR_NOT_SUPPORTED)
        }
    }

    fn tex_ref_set_array(&self, texref: CUtexref, array: CUarray, flags: u32) -> CUresult {
        if let Some(func) = self.cu_tex_ref_set_array {
            unsafe { func(texref, array, flags as c_uint) }
        } else {
            CUDA_ERROR_NOT_SUPPORTED
        }
    }
}

//! The driver contract shared by the real and the emulated backend.
//!
//! Methods that produce a handle return `Result<T, CUresult>`; methods that
//! only report a status return the raw `CUresult`. Translating codes into
//! errors is left to the caller.

use std::ffi::c_void;

use crate::types::*;

pub trait Driver: Send + Sync {
    /// Short backend name used in log lines ("cuda", "sim").
    fn backend_name(&self) -> &'static str;

    // ── Initialization ────────────────────────────────────────────

    fn init(&self, flags: u32) -> CUresult;
    fn driver_get_version(&self) -> Result<i32, CUresult>;

    // ── Device Management ─────────────────────────────────────────

    fn device_get_count(&self) -> Result<i32, CUresult>;
    fn device_get(&self, ordinal: i32) -> Result<CUdevice, CUresult>;
    fn device_get_name(&self, device: CUdevice) -> Result<String, CUresult>;
    fn device_total_mem(&self, device: CUdevice) -> Result<usize, CUresult>;

    // ── Context Management ────────────────────────────────────────

    fn ctx_create(&self, flags: u32, device: CUdevice) -> Result<CUcontext, CUresult>;
    fn ctx_destroy(&self, ctx: CUcontext) -> CUresult;
    fn ctx_set_current(&self, ctx: CUcontext) -> CUresult;
    fn ctx_synchronize(&self) -> CUresult;

    // ── Module Management ─────────────────────────────────────────

    fn module_load(&self, fname: &str) -> Result<CUmodule, CUresult>;
    fn module_load_data(&self, image: &[u8]) -> Result<CUmodule, CUresult>;
    fn module_unload(&self, module: CUmodule) -> CUresult;
    fn module_get_function(&self, module: CUmodule, name: &str) -> Result<CUfunction, CUresult>;
    fn module_get_global(&self, module: CUmodule, name: &str) -> Result<(CUdeviceptr, usize), CUresult>;
    fn module_get_tex_ref(&self, module: CUmodule, name: &str) -> Result<CUtexref, CUresult>;

    // ── Memory Management ─────────────────────────────────────────

    fn mem_alloc(&self, byte_size: usize) -> Result<CUdeviceptr, CUresult>;
    fn mem_alloc_pitch(
        &self,
        width: usize,
        height: usize,
        element_size: u32,
    ) -> Result<(CUdeviceptr, usize), CUresult>;
    fn mem_free(&self, dptr: CUdeviceptr) -> CUresult;

    /// Page-locked host allocation.
    fn mem_alloc_host(&self, byte_size: usize) -> Result<*mut c_void, CUresult>;
    fn mem_free_host(&self, ptr: *mut c_void) -> CUresult;

    fn memset_d8(&self, dst: CUdeviceptr, value: u8, count: usize) -> CUresult;
    fn memset_d16(&self, dst: CUdeviceptr, value: u16, count: usize) -> CUresult;
    fn memset_d32(&self, dst: CUdeviceptr, value: u32, count: usize) -> CUresult;

    // ── Linear Copies ─────────────────────────────────────────────

    fn memcpy_htod(&self, dst: CUdeviceptr, src: &[u8]) -> CUresult;
    fn memcpy_dtoh(&self, dst: &mut [u8], src: CUdeviceptr) -> CUresult;
    fn memcpy_dtod(&self, dst: CUdeviceptr, src: CUdeviceptr, byte_count: usize) -> CUresult;

    /// # Safety
    /// `src..src+byte_count` must stay readable until the stream reaches the copy.
    unsafe fn memcpy_htod_async(
        &self,
        dst: CUdeviceptr,
        src: *const u8,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;

    /// # Safety
    /// `dst..dst+byte_count` must stay writable until the stream reaches the copy.
    unsafe fn memcpy_dtoh_async(
        &self,
        dst: *mut u8,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;

    fn memcpy_dtod_async(
        &self,
        dst: CUdeviceptr,
        src: CUdeviceptr,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;

    // ── Arrays ────────────────────────────────────────────────────

    fn array_create(&self, desc: &CudaArrayDescriptor) -> Result<CUarray, CUresult>;
    fn array_destroy(&self, array: CUarray) -> CUresult;

    fn memcpy_htoa(&self, dst: CUarray, dst_offset: usize, src: &[u8]) -> CUresult;
    fn memcpy_atoh(&self, dst: &mut [u8], src: CUarray, src_offset: usize) -> CUresult;
    fn memcpy_atoa(
        &self,
        dst: CUarray,
        dst_offset: usize,
        src: CUarray,
        src_offset: usize,
        byte_count: usize,
    ) -> CUresult;
    fn memcpy_dtoa(&self, dst: CUarray, dst_offset: usize, src: CUdeviceptr, byte_count: usize) -> CUresult;
    fn memcpy_atod(&self, dst: CUdeviceptr, src: CUarray, src_offset: usize, byte_count: usize) -> CUresult;

    /// # Safety
    /// Same contract as [`Driver::memcpy_htod_async`].
    unsafe fn memcpy_htoa_async(
        &self,
        dst: CUarray,
        dst_offset: usize,
        src: *const u8,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;

    /// # Safety
    /// Same contract as [`Driver::memcpy_dtoh_async`].
    unsafe fn memcpy_atoh_async(
        &self,
        dst: *mut u8,
        src: CUarray,
        src_offset: usize,
        byte_count: usize,
        stream: CUstream,
    ) -> CUresult;

    // ── 2D Copies ─────────────────────────────────────────────────

    /// # Safety
    /// Host members of `copy` must describe memory valid for the whole region.
    unsafe fn memcpy_2d(&self, copy: &CudaMemcpy2D) -> CUresult;

    /// # Safety
    /// Same contract as [`Driver::memcpy_2d`].
    unsafe fn memcpy_2d_unaligned(&self, copy: &CudaMemcpy2D) -> CUresult;

    /// # Safety
    /// Same contract as [`Driver::memcpy_2d`], held until the stream reaches the copy.
    unsafe fn memcpy_2d_async(&self, copy: &CudaMemcpy2D, stream: CUstream) -> CUresult;

    // ── Stream Management ─────────────────────────────────────────

    fn stream_create(&self, flags: u32) -> Result<CUstream, CUresult>;
    fn stream_destroy(&self, stream: CUstream) -> CUresult;
    fn stream_synchronize(&self, stream: CUstream) -> CUresult;
    fn stream_query(&self, stream: CUstream) -> CUresult;

    // ── Event Management ──────────────────────────────────────────

    fn event_create(&self, flags: u32) -> Result<CUevent, CUresult>;
    fn event_destroy(&self, event: CUevent) -> CUresult;
    fn event_record(&self, event: CUevent, stream: CUstream) -> CUresult;
    fn event_synchronize(&self, event: CUevent) -> CUresult;
    fn event_query(&self, event: CUevent) -> CUresult;
    fn event_elapsed_time(&self, start: CUevent, end: CUevent) -> Result<f32, CUresult>;

    // ── Execution ─────────────────────────────────────────────────

    /// Launch `func` with a packed parameter buffer.
    ///
    /// # Safety
    /// `params` must match the kernel's declared signature byte for byte.
    unsafe fn launch_kernel(
        &self,
        func: CUfunction,
        grid_dim: [u32; 3],
        block_dim: [u32; 3],
        shared_mem_bytes: u32,
        stream: CUstream,
        params: &[u8],
    ) -> CUresult;

    /// Make `texref` visible to the next launch of `func`.
    fn param_set_tex_ref(&self, func: CUfunction, texref: CUtexref) -> CUresult;

    // ── Texture References ────────────────────────────────────────

    /// Bind linear memory; returns the byte offset the kernel must apply.
    fn tex_ref_set_address(&self, texref: CUtexref, dptr: CUdeviceptr, bytes: usize) -> Result<usize, CUresult>;
    fn tex_ref_set_array(&self, texref: CUtexref, array: CUarray, flags: u32) -> CUresult;
}

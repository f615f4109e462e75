//! Owning wrappers over linear and pitched device memory.

use tracing::debug;

use crate::context::Context;
use crate::error::{ensure_len, Result};
use crate::memcpy2d::Memcpy2D;
use crate::pointer::DevicePtr;
use crate::stream::Stream;

/// A linear allocation freed on drop.
pub struct DeviceMemory<'c> {
    ctx: &'c Context,
    ptr: DevicePtr,
    size: usize,
}

impl<'c> DeviceMemory<'c> {
    pub fn new(ctx: &'c Context, size: usize) -> Result<Self> {
        let ptr = ctx.allocate(size)?;
        Ok(Self { ctx, ptr, size })
    }

    /// Non-owning address of the allocation.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Fill every byte with `value`.
    pub fn set8(&self, value: u8) -> Result<()> {
        self.ctx.memset_d8(self.ptr, value, self.size)
    }

    /// Fill every 16-bit word with `value`.
    pub fn set16(&self, value: u16) -> Result<()> {
        self.ctx.memset_d16(self.ptr, value, self.size / 2)
    }

    /// Fill every 32-bit word with `value`.
    pub fn set32(&self, value: u32) -> Result<()> {
        self.ctx.memset_d32(self.ptr, value, self.size / 4)
    }

    /// Copy `size()` bytes from the front of `src`.
    pub fn upload(&self, src: &[u8]) -> Result<()> {
        ensure_len(self.size, src.len())?;
        self.ctx.copy_htod(self.ptr, &src[..self.size])
    }

    /// Copy the whole allocation into the front of `dst`.
    pub fn download(&self, dst: &mut [u8]) -> Result<()> {
        ensure_len(self.size, dst.len())?;
        self.ctx.copy_dtoh(&mut dst[..self.size], self.ptr)
    }

    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn upload_async(&self, src: &[u8], stream: &Stream<'_>) -> Result<()> {
        ensure_len(self.size, src.len())?;
        unsafe { self.ctx.copy_htod_async(self.ptr, &src[..self.size], stream) }
    }

    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn download_async(&self, dst: &mut [u8], stream: &Stream<'_>) -> Result<()> {
        ensure_len(self.size, dst.len())?;
        unsafe { self.ctx.copy_dtoh_async(&mut dst[..self.size], self.ptr, stream) }
    }
}

impl Drop for DeviceMemory<'_> {
    fn drop(&mut self) {
        self.ctx.free(self.ptr);
    }
}

/// A pitched 2D allocation freed on drop.
pub struct DeviceMemory2D<'c> {
    ctx: &'c Context,
    ptr: DevicePtr,
    width: usize,
    height: usize,
    element_size: u32,
    pitch: usize,
}

impl<'c> DeviceMemory2D<'c> {
    /// `height` rows of `width_bytes`; `element_size` is 4, 8 or 16.
    pub fn new(ctx: &'c Context, width_bytes: usize, height: usize, element_size: u32) -> Result<Self> {
        let (ptr, pitch) = ctx.allocate_pitched(width_bytes, height, element_size)?;
        Ok(Self {
            ctx,
            ptr,
            width: width_bytes,
            height,
            element_size,
            pitch,
        })
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Row width in bytes, as requested.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    /// Row stride chosen by the driver; at least `width()`.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    fn copy_in<'a>(&'a self, src: &'a [u8], host_pitch: Option<usize>) -> Memcpy2D<'a> {
        let mut copy = Memcpy2D::new(self.ctx, self.width, self.height);
        copy.source_host(src, host_pitch.unwrap_or(self.width))
            .destination_device(self.ptr, self.pitch);
        copy
    }

    fn copy_out<'a>(&'a self, dst: &'a mut [u8], host_pitch: Option<usize>) -> Memcpy2D<'a> {
        let mut copy = Memcpy2D::new(self.ctx, self.width, self.height);
        copy.source_device(self.ptr, self.pitch)
            .destination_host(dst, host_pitch.unwrap_or(self.width));
        copy
    }

    /// Upload `height` rows of `width` bytes, `host_pitch` apart (default: `width`).
    pub fn upload_2d(&self, src: &[u8], host_pitch: Option<usize>) -> Result<()> {
        self.copy_in(src, host_pitch).copy()
    }

    pub fn download_2d(&self, dst: &mut [u8], host_pitch: Option<usize>) -> Result<()> {
        self.copy_out(dst, host_pitch).copy()
    }

    /// # Safety
    /// See [`Memcpy2D::copy_async`].
    pub unsafe fn upload_2d_async(&self, src: &[u8], host_pitch: Option<usize>, stream: &Stream<'_>) -> Result<()> {
        unsafe { self.copy_in(src, host_pitch).copy_async(stream) }
    }

    /// # Safety
    /// See [`Memcpy2D::copy_async`].
    pub unsafe fn download_2d_async(
        &self,
        dst: &mut [u8],
        host_pitch: Option<usize>,
        stream: &Stream<'_>,
    ) -> Result<()> {
        unsafe { self.copy_out(dst, host_pitch).copy_async(stream) }
    }
}

impl Drop for DeviceMemory2D<'_> {
    fn drop(&mut self) {
        debug!(width = self.width, height = self.height, pitch = self.pitch, "releasing pitched memory");
        self.ctx.free(self.ptr);
    }
}

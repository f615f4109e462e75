use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use tracing::debug;

use crate::context::Context;
use crate::error::{warn, Error, Failure, Result};

/// Page-locked host memory, usable as the host side of async copies.
///
/// Contents start zeroed on the simulated backend and undefined on real
/// hardware; write before reading.
pub struct HostBuffer<'c> {
    ctx: &'c Context,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'c> HostBuffer<'c> {
    pub fn new(ctx: &'c Context, len: usize) -> Result<Self> {
        const CONTEXT: &str = "Can't allocate page-locked memory";
        let raw = ctx
            .driver()
            .mem_alloc_host(len)
            .map_err(|code| Error::Allocation(Failure::new(CONTEXT, code)))?;
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or(Error::Allocation(Failure::new(
            CONTEXT,
            devrt_driver::CUDA_ERROR_OUT_OF_MEMORY,
        )))?;
        debug!(len, "allocated page-locked host memory");
        Ok(Self { ctx, ptr, len })
    }

    /// A buffer holding a copy of `data`.
    pub fn from_slice(ctx: &'c Context, data: &[u8]) -> Result<Self> {
        let mut buf = Self::new(ctx, data.len())?;
        buf.copy_from_slice(data);
        Ok(buf)
    }
}

impl Deref for HostBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr` came from the driver's host allocator for `len` bytes
        // and stays valid until drop.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for HostBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `deref`; `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostBuffer<'_> {
    fn drop(&mut self) {
        warn(
            self.ctx.driver().mem_free_host(self.ptr.as_ptr().cast()),
            "Can't free page-locked memory",
        );
    }
}

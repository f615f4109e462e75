//! Reusable 2D copy descriptor.
//!
//! A [`Memcpy2D`] names a source and a destination, each one of host memory,
//! linear device memory or an array, plus a start position on either side and
//! the region size. Setters overwrite freely, so one descriptor can run many
//! copies:
//!
//! ```ignore
//! let mut copy = Memcpy2D::new(&ctx, 64, 4);
//! copy.source_host(&rows, 64).destination_device(ptr, pitch);
//! copy.copy()?;
//! copy.destination_pos(0, 4);
//! copy.copy()?;
//! ```

use std::marker::PhantomData;

use devrt_driver::{
    CUarray, CUdeviceptr, CUresult, CudaMemcpy2D, CU_MEMORYTYPE_ARRAY, CU_MEMORYTYPE_DEVICE, CU_MEMORYTYPE_HOST,
};
use tracing::debug;

use crate::array::Array;
use crate::context::Context;
use crate::error::{check, ensure_len, Error, Result};
use crate::pointer::DevicePtr;
use crate::stream::Stream;
use crate::transfer::EndpointKind;

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Host { ptr: *mut u8, len: usize, pitch: usize },
    Device { ptr: CUdeviceptr, pitch: usize },
    Array { handle: CUarray },
}

impl Endpoint {
    fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Host { .. } => EndpointKind::Host,
            Endpoint::Device { .. } => EndpointKind::Device,
            Endpoint::Array { .. } => EndpointKind::Array,
        }
    }
}

#[derive(Clone)]
pub struct Memcpy2D<'a> {
    ctx: &'a Context,
    src: Option<Endpoint>,
    dst: Option<Endpoint>,
    src_pos: (usize, usize),
    dst_pos: (usize, usize),
    width_bytes: usize,
    height: usize,
    // Host endpoints are borrowed for 'a.
    _borrows: PhantomData<&'a mut [u8]>,
}

const COPY: &str = "Can't copy memory";

impl<'a> Memcpy2D<'a> {
    /// A descriptor for a `width_bytes × height` region at position (0, 0).
    pub fn new(ctx: &'a Context, width_bytes: usize, height: usize) -> Self {
        Self {
            ctx,
            src: None,
            dst: None,
            src_pos: (0, 0),
            dst_pos: (0, 0),
            width_bytes,
            height,
            _borrows: PhantomData,
        }
    }

    pub fn source_host(&mut self, src: &'a [u8], pitch: usize) -> &mut Self {
        self.src = Some(Endpoint::Host {
            ptr: src.as_ptr() as *mut u8,
            len: src.len(),
            pitch,
        });
        self
    }

    pub fn source_device(&mut self, src: DevicePtr, pitch: usize) -> &mut Self {
        self.src = Some(Endpoint::Device {
            ptr: src.as_raw(),
            pitch,
        });
        self
    }

    pub fn source_array(&mut self, src: &'a Array<'_>) -> &mut Self {
        self.src = Some(Endpoint::Array { handle: src.handle() });
        self
    }

    pub fn destination_host(&mut self, dst: &'a mut [u8], pitch: usize) -> &mut Self {
        self.dst = Some(Endpoint::Host {
            ptr: dst.as_mut_ptr(),
            len: dst.len(),
            pitch,
        });
        self
    }

    pub fn destination_device(&mut self, dst: DevicePtr, pitch: usize) -> &mut Self {
        self.dst = Some(Endpoint::Device {
            ptr: dst.as_raw(),
            pitch,
        });
        self
    }

    pub fn destination_array(&mut self, dst: &'a Array<'_>) -> &mut Self {
        self.dst = Some(Endpoint::Array { handle: dst.handle() });
        self
    }

    /// Start of the source region: byte offset within a row, and row.
    pub fn source_pos(&mut self, x_bytes: usize, y: usize) -> &mut Self {
        self.src_pos = (x_bytes, y);
        self
    }

    pub fn destination_pos(&mut self, x_bytes: usize, y: usize) -> &mut Self {
        self.dst_pos = (x_bytes, y);
        self
    }

    pub fn size(&mut self, width_bytes: usize, height: usize) -> &mut Self {
        self.width_bytes = width_bytes;
        self.height = height;
        self
    }

    /// Copy synchronously. An empty region succeeds without touching the driver.
    pub fn copy(&self) -> Result<()> {
        let (desc, kinds) = self.descriptor()?;
        if self.is_empty() {
            return Ok(());
        }
        debug!(src = %kinds.0, dst = %kinds.1, width = self.width_bytes, height = self.height, "2d copy");
        // SAFETY: host endpoints are live borrows for 'a and fit the region.
        let code = unsafe { self.ctx.driver().memcpy_2d(&desc) };
        self.finish(code, kinds)
    }

    /// Copy without the fast path's pitch requirements.
    ///
    /// Needed for device-to-device copies whose pitches did not come from
    /// [`Context::allocate_pitched`].
    pub fn copy_unaligned(&self) -> Result<()> {
        let (desc, kinds) = self.descriptor()?;
        if self.is_empty() {
            return Ok(());
        }
        debug!(src = %kinds.0, dst = %kinds.1, "unaligned 2d copy");
        // SAFETY: as in `copy`.
        let code = unsafe { self.ctx.driver().memcpy_2d_unaligned(&desc) };
        self.finish(code, kinds)
    }

    /// Queue the copy on `stream`.
    ///
    /// # Safety
    /// Host endpoints must be page-locked and must outlive the copy, i.e.
    /// stay untouched until `stream` is synchronized.
    ///
    /// A clone keeps the same host destination. Two descriptors sharing a
    /// destination must not have copies in flight at the same time.
    pub unsafe fn copy_async(&self, stream: &Stream<'_>) -> Result<()> {
        let (desc, kinds) = self.descriptor()?;
        if self.is_empty() {
            return Ok(());
        }
        debug!(src = %kinds.0, dst = %kinds.1, "2d copy queued");
        let code = unsafe { self.ctx.driver().memcpy_2d_async(&desc, stream.handle()) };
        self.finish(code, kinds)
    }

    fn finish(&self, code: CUresult, kinds: (EndpointKind, EndpointKind)) -> Result<()> {
        check(code, COPY).map_err(|failure| Error::Transfer {
            src: kinds.0,
            dst: kinds.1,
            failure,
        })
    }

    fn is_empty(&self) -> bool {
        self.width_bytes == 0 || self.height == 0
    }

    /// Bytes a host endpoint must span for the configured region, or `None`
    /// if that exceeds the address space.
    fn host_extent(&self, pos: (usize, usize), pitch: usize) -> Option<usize> {
        if self.is_empty() {
            return Some(0);
        }
        pos.1
            .checked_add(self.height - 1)?
            .checked_mul(pitch)?
            .checked_add(pos.0)?
            .checked_add(self.width_bytes)
    }

    fn check_host(&self, pos: (usize, usize), pitch: usize, len: usize) -> Result<()> {
        let needed = self.host_extent(pos, pitch).unwrap_or(usize::MAX);
        ensure_len(needed, len)
    }

    fn descriptor(&self) -> Result<(CudaMemcpy2D, (EndpointKind, EndpointKind))> {
        let (Some(src), Some(dst)) = (self.src, self.dst) else {
            return Err(Error::IncompleteCopy(COPY));
        };
        let mut desc = CudaMemcpy2D {
            src_x_in_bytes: self.src_pos.0,
            src_y: self.src_pos.1,
            dst_x_in_bytes: self.dst_pos.0,
            dst_y: self.dst_pos.1,
            width_in_bytes: self.width_bytes,
            height: self.height,
            ..Default::default()
        };

        match src {
            Endpoint::Host { ptr, len, pitch } => {
                self.check_host(self.src_pos, pitch, len)?;
                desc.src_memory_type = CU_MEMORYTYPE_HOST;
                desc.src_host = ptr as *const _;
                desc.src_pitch = pitch;
            }
            Endpoint::Device { ptr, pitch } => {
                desc.src_memory_type = CU_MEMORYTYPE_DEVICE;
                desc.src_device = ptr;
                desc.src_pitch = pitch;
            }
            Endpoint::Array { handle } => {
                desc.src_memory_type = CU_MEMORYTYPE_ARRAY;
                desc.src_array = handle;
            }
        }
        match dst {
            Endpoint::Host { ptr, len, pitch } => {
                self.check_host(self.dst_pos, pitch, len)?;
                desc.dst_memory_type = CU_MEMORYTYPE_HOST;
                desc.dst_host = ptr as *mut _;
                desc.dst_pitch = pitch;
            }
            Endpoint::Device { ptr, pitch } => {
                desc.dst_memory_type = CU_MEMORYTYPE_DEVICE;
                desc.dst_device = ptr;
                desc.dst_pitch = pitch;
            }
            Endpoint::Array { handle } => {
                desc.dst_memory_type = CU_MEMORYTYPE_ARRAY;
                desc.dst_array = handle;
            }
        }
        Ok((desc, (src.kind(), dst.kind())))
    }
}

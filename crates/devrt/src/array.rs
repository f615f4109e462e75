//! Device arrays: opaque, formatted 2D storage distinct from linear memory.

use devrt_driver::{
    CUarray, CudaArrayDescriptor, CUDA_ERROR_INVALID_VALUE, CU_AD_FORMAT_FLOAT, CU_AD_FORMAT_HALF, CU_AD_FORMAT_SIGNED_INT16,
    CU_AD_FORMAT_SIGNED_INT32, CU_AD_FORMAT_SIGNED_INT8, CU_AD_FORMAT_UNSIGNED_INT16,
    CU_AD_FORMAT_UNSIGNED_INT32, CU_AD_FORMAT_UNSIGNED_INT8,
};
use tracing::debug;

use crate::context::Context;
use crate::error::{ensure_len, warn, Error, Failure, Result};
use crate::memcpy2d::Memcpy2D;
use crate::stream::Stream;
use crate::transfer::EndpointKind;

/// Element format of an [`Array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ArrayFormat {
    UnsignedInt8 = CU_AD_FORMAT_UNSIGNED_INT8,
    UnsignedInt16 = CU_AD_FORMAT_UNSIGNED_INT16,
    UnsignedInt32 = CU_AD_FORMAT_UNSIGNED_INT32,
    SignedInt8 = CU_AD_FORMAT_SIGNED_INT8,
    SignedInt16 = CU_AD_FORMAT_SIGNED_INT16,
    SignedInt32 = CU_AD_FORMAT_SIGNED_INT32,
    Half = CU_AD_FORMAT_HALF,
    Float = CU_AD_FORMAT_FLOAT,
}

impl ArrayFormat {
    pub const ALL: [ArrayFormat; 8] = [
        ArrayFormat::UnsignedInt8,
        ArrayFormat::UnsignedInt16,
        ArrayFormat::UnsignedInt32,
        ArrayFormat::SignedInt8,
        ArrayFormat::SignedInt16,
        ArrayFormat::SignedInt32,
        ArrayFormat::Half,
        ArrayFormat::Float,
    ];

    /// Bytes per channel.
    pub fn element_size(self) -> usize {
        match self {
            ArrayFormat::UnsignedInt8 | ArrayFormat::SignedInt8 => 1,
            ArrayFormat::UnsignedInt16 | ArrayFormat::SignedInt16 | ArrayFormat::Half => 2,
            ArrayFormat::UnsignedInt32 | ArrayFormat::SignedInt32 | ArrayFormat::Float => 4,
        }
    }
}

impl TryFrom<u32> for ArrayFormat {
    type Error = Error;

    fn try_from(raw: u32) -> Result<Self> {
        ArrayFormat::ALL
            .into_iter()
            .find(|f| *f as u32 == raw)
            .ok_or(Error::UnknownFormat(raw))
    }
}

pub struct Array<'c> {
    ctx: &'c Context,
    handle: CUarray,
    width: usize,
    height: usize,
    channels: u32,
    format: ArrayFormat,
}

impl<'c> Array<'c> {
    pub fn new(
        ctx: &'c Context,
        width: usize,
        height: usize,
        format: ArrayFormat,
        channels: u32,
    ) -> Result<Self> {
        let desc = CudaArrayDescriptor {
            width,
            height,
            format: format as u32,
            num_channels: channels,
        };
        let handle = ctx
            .driver()
            .array_create(&desc)
            .map_err(|code| Error::Allocation(Failure::new("Can't create array", code)))?;
        debug!(width, height, ?format, channels, "created array");
        Ok(Self {
            ctx,
            handle,
            width,
            height,
            channels,
            format,
        })
    }

    /// Like [`Array::new`], for a raw driver format code.
    pub fn with_raw_format(
        ctx: &'c Context,
        width: usize,
        height: usize,
        format: u32,
        channels: u32,
    ) -> Result<Self> {
        Self::new(ctx, width, height, ArrayFormat::try_from(format)?, channels)
    }

    pub(crate) fn handle(&self) -> CUarray {
        self.handle
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn format(&self) -> ArrayFormat {
        self.format
    }

    pub fn element_size(&self) -> usize {
        self.format.element_size()
    }

    /// Bytes per row: width × channels × element size.
    pub fn pitch(&self) -> usize {
        self.width * self.channels as usize * self.element_size()
    }

    pub fn size(&self) -> usize {
        self.pitch() * self.height
    }

    /// Byte offset of texel `index`, or a transfer error if it overflows.
    fn texel_offset(&self, index: usize, src: EndpointKind, dst: EndpointKind) -> Result<usize> {
        index
            .checked_mul(self.channels as usize * self.element_size())
            .ok_or(Error::Transfer {
                src,
                dst,
                failure: Failure::new("Can't copy memory", CUDA_ERROR_INVALID_VALUE),
            })
    }

    /// Write one row's worth of bytes starting at texel `dest_index`.
    pub fn upload(&self, src: &[u8], dest_index: usize) -> Result<()> {
        let pitch = self.pitch();
        ensure_len(pitch, src.len())?;
        let offset = self.texel_offset(dest_index, EndpointKind::Host, EndpointKind::Array)?;
        self.ctx.copy_htoa(self, offset, &src[..pitch])
    }

    /// Read one row's worth of bytes starting at texel `src_index`.
    pub fn download(&self, dst: &mut [u8], src_index: usize) -> Result<()> {
        let pitch = self.pitch();
        ensure_len(pitch, dst.len())?;
        let offset = self.texel_offset(src_index, EndpointKind::Array, EndpointKind::Host)?;
        self.ctx.copy_atoh(&mut dst[..pitch], self, offset)
    }

    /// Stream-ordered [`Array::upload`].
    ///
    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn upload_async(&self, src: &[u8], dest_index: usize, stream: &Stream<'_>) -> Result<()> {
        let pitch = self.pitch();
        ensure_len(pitch, src.len())?;
        let offset = self.texel_offset(dest_index, EndpointKind::Host, EndpointKind::Array)?;
        unsafe { self.ctx.copy_htoa_async(self, offset, &src[..pitch], stream) }
    }

    /// Stream-ordered [`Array::download`].
    ///
    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn download_async(&self, dst: &mut [u8], src_index: usize, stream: &Stream<'_>) -> Result<()> {
        let pitch = self.pitch();
        ensure_len(pitch, dst.len())?;
        let offset = self.texel_offset(src_index, EndpointKind::Array, EndpointKind::Host)?;
        unsafe { self.ctx.copy_atoh_async(&mut dst[..pitch], self, offset, stream) }
    }

    fn copy_in<'a>(&'a self, src: &'a [u8], host_pitch: Option<usize>) -> Memcpy2D<'a> {
        let mut copy = Memcpy2D::new(self.ctx, self.pitch(), self.height.max(1));
        copy.source_host(src, host_pitch.unwrap_or(self.pitch()))
            .destination_array(self);
        copy
    }

    fn copy_out<'a>(&'a self, dst: &'a mut [u8], host_pitch: Option<usize>) -> Memcpy2D<'a> {
        let mut copy = Memcpy2D::new(self.ctx, self.pitch(), self.height.max(1));
        copy.source_array(self)
            .destination_host(dst, host_pitch.unwrap_or(self.pitch()));
        copy
    }

    /// Write the whole array from host rows `host_pitch` bytes apart
    /// (default: tightly packed).
    pub fn upload_2d(&self, src: &[u8], host_pitch: Option<usize>) -> Result<()> {
        self.copy_in(src, host_pitch).copy()
    }

    /// Read the whole array into host rows `host_pitch` bytes apart.
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

impl Drop for Array<'_> {
    fn drop(&mut self) {
        warn(self.ctx.driver().array_destroy(self.handle), "Can't destroy array");
    }
}

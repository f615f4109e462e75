//! Kernel handles, parameter packing and launch.
//!
//! A [`Function`] carries its launch configuration between calls: block
//! shape, dynamic shared memory and a flat parameter buffer. Arguments are
//! packed in call order, each one placed at the next offset aligned to its
//! natural alignment:
//!
//! | argument          | size | align |
//! |-------------------|------|-------|
//! | `Ptr`             | 8    | 8     |
//! | `Int` / `Float`   | 4    | 4     |
//! | `Bytes`           | len  | given |
//!
//! so `(Ptr, Int, Int, Int)` lands at offsets `[0, 8, 12, 16]` with a total
//! size of 20 bytes. The layout must match the kernel's signature exactly;
//! nothing on the device side detects a mismatch. Alignments that are not a
//! power of two are rejected with [`Error::InvalidParameter`].

use std::mem::{align_of, size_of};

use devrt_driver::{CUdeviceptr, CUfunction, CUstream};
use tracing::debug;

use crate::context::Context;
use crate::error::{check, Error, Result};
use crate::pointer::DevicePtr;
use crate::stream::Stream;
use crate::texture::TextureReference;

/// One kernel argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    Int(i32),
    Float(f32),
    /// Raw bytes placed at the given alignment, which must be a power of two.
    Bytes { data: &'a [u8], align: usize },
    /// A device address, passed as its 64-bit raw value.
    Ptr(DevicePtr),
}

impl<'a> KernelArg<'a> {
    /// Pack any plain-old-data value at its natural alignment.
    pub fn pod<T: bytemuck::Pod>(value: &'a T) -> Self {
        KernelArg::Bytes {
            data: bytemuck::bytes_of(value),
            align: align_of::<T>(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            KernelArg::Int(_) => size_of::<i32>(),
            KernelArg::Float(_) => size_of::<f32>(),
            KernelArg::Bytes { data, .. } => data.len(),
            KernelArg::Ptr(_) => size_of::<CUdeviceptr>(),
        }
    }

    pub fn align(&self) -> usize {
        match self {
            KernelArg::Int(_) => align_of::<i32>(),
            KernelArg::Float(_) => align_of::<f32>(),
            KernelArg::Bytes { align, .. } => *align,
            KernelArg::Ptr(_) => align_of::<CUdeviceptr>(),
        }
    }
}

impl From<i32> for KernelArg<'_> {
    fn from(value: i32) -> Self {
        KernelArg::Int(value)
    }
}

impl From<f32> for KernelArg<'_> {
    fn from(value: f32) -> Self {
        KernelArg::Float(value)
    }
}

impl From<DevicePtr> for KernelArg<'_> {
    fn from(ptr: DevicePtr) -> Self {
        KernelArg::Ptr(ptr)
    }
}

/// Round `offset` up to a multiple of `align`.
///
/// `None` if `align` is not a power of two or the result overflows.
pub fn align_up(offset: usize, align: usize) -> Option<usize> {
    if !align.is_power_of_two() {
        return None;
    }
    Some(offset.checked_add(align - 1)? & !(align - 1))
}

/// Offsets `args` would be packed at, and the total size.
fn layout(args: &[KernelArg<'_>]) -> Result<(Vec<usize>, usize)> {
    let overflow = |offset| Error::InvalidParameter {
        offset,
        reason: "parameter buffer overflows",
    };
    let mut offsets = Vec::with_capacity(args.len());
    let mut offset = 0usize;
    for arg in args {
        let align = arg.align();
        if !align.is_power_of_two() {
            return Err(Error::InvalidParameter {
                offset,
                reason: "alignment is not a power of two",
            });
        }
        let start = align_up(offset, align).ok_or_else(|| overflow(offset))?;
        offsets.push(start);
        offset = start.checked_add(arg.size()).ok_or_else(|| overflow(start))?;
    }
    Ok((offsets, offset))
}

/// A kernel entry point resolved from a [`Module`](crate::Module).
pub struct Function<'m> {
    ctx: &'m Context,
    handle: CUfunction,
    name: String,
    block: [u32; 3],
    shared_bytes: u32,
    params: Vec<u8>,
    param_size: usize,
}

impl<'m> Function<'m> {
    pub(crate) fn new(ctx: &'m Context, handle: CUfunction, name: &str) -> Self {
        Self {
            ctx,
            handle,
            name: name.to_string(),
            block: [1, 1, 1],
            shared_bytes: 0,
            params: Vec::new(),
            param_size: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_block_shape(&mut self, x: u32, y: u32, z: u32) {
        self.block = [x, y, z];
    }

    pub fn block_shape(&self) -> [u32; 3] {
        self.block
    }

    /// Dynamic shared memory per block, in bytes.
    pub fn set_shared_size(&mut self, bytes: u32) {
        self.shared_bytes = bytes;
    }

    pub fn shared_size(&self) -> u32 {
        self.shared_bytes
    }

    /// Declare how many bytes of the parameter buffer the kernel receives.
    pub fn set_parameter_size(&mut self, bytes: usize) {
        if self.params.len() < bytes {
            self.params.resize(bytes, 0);
        }
        self.param_size = bytes;
    }

    pub fn parameter_size(&self) -> usize {
        self.param_size
    }

    /// The bytes the next launch will pass.
    pub fn parameters(&self) -> &[u8] {
        &self.params[..self.param_size]
    }

    pub fn set_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len()).ok_or(Error::InvalidParameter {
            offset,
            reason: "parameter buffer overflows",
        })?;
        if self.params.len() < end {
            self.params.resize(end, 0);
        }
        self.params[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn set_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        self.set_bytes(offset, &value.to_ne_bytes())
    }

    pub fn set_f32(&mut self, offset: usize, value: f32) -> Result<()> {
        self.set_bytes(offset, &value.to_ne_bytes())
    }

    pub fn set_ptr(&mut self, offset: usize, ptr: DevicePtr) -> Result<()> {
        self.set_bytes(offset, &ptr.as_raw().to_ne_bytes())
    }

    /// Pack `args` from offset 0 and declare the resulting size.
    ///
    /// Returns the offset each argument was written at. The layout is
    /// validated before anything is written, so on error the previous
    /// parameters are left as they were.
    pub fn set_params(&mut self, args: &[KernelArg<'_>]) -> Result<Vec<usize>> {
        let (offsets, size) = layout(args)?;
        for (arg, &offset) in args.iter().zip(&offsets) {
            match *arg {
                KernelArg::Int(v) => self.set_i32(offset, v)?,
                KernelArg::Float(v) => self.set_f32(offset, v)?,
                KernelArg::Bytes { data, .. } => self.set_bytes(offset, data)?,
                KernelArg::Ptr(p) => self.set_ptr(offset, p)?,
            }
        }
        self.set_parameter_size(size);
        Ok(offsets)
    }

    /// Make `texture` readable by the next launch.
    pub fn use_texture(&mut self, texture: &TextureReference<'_>) -> Result<()> {
        check(
            self.ctx.driver().param_set_tex_ref(self.handle, texture.handle()),
            "Can't use texture",
        )?;
        Ok(())
    }

    /// Run one block.
    ///
    /// # Safety
    /// The parameter buffer must match the kernel's signature, and every
    /// device address in it must be valid for the accesses the kernel makes.
    pub unsafe fn launch(&mut self) -> Result<()> {
        unsafe { self.launch_on(1, 1, std::ptr::null_mut()) }
    }

    /// Run a `width × height` grid of blocks and wait for it.
    ///
    /// # Safety
    /// See [`Function::launch`].
    pub unsafe fn launch_grid(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe { self.launch_on(width, height, std::ptr::null_mut()) }
    }

    /// Queue a `width × height` grid on `stream`.
    ///
    /// # Safety
    /// See [`Function::launch`]; buffers the kernel uses must also outlive
    /// the stream's progress past this launch.
    pub unsafe fn launch_grid_async(&mut self, width: u32, height: u32, stream: &Stream<'_>) -> Result<()> {
        unsafe { self.launch_on(width, height, stream.handle()) }
    }

    unsafe fn launch_on(&mut self, width: u32, height: u32, stream: CUstream) -> Result<()> {
        if self.params.len() < self.param_size {
            self.params.resize(self.param_size, 0);
        }
        debug!(
            function = %self.name,
            grid = ?[width, height],
            block = ?self.block,
            params = self.param_size,
            "launching kernel"
        );
        let code = unsafe {
            self.ctx.driver().launch_kernel(
                self.handle,
                [width, height, 1],
                self.block,
                self.shared_bytes,
                stream,
                &self.params[..self.param_size],
            )
        };
        check(code, "Can't launch kernel").map_err(Error::Launch)?;
        if stream.is_null() {
            // Synchronous launches report execution errors here.
            check(self.ctx.driver().ctx_synchronize(), "Can't launch kernel").map_err(Error::Launch)?;
        }
        Ok(())
    }
}


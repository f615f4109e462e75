//! Whole-region copies between host memory, device memory and arrays.
//!
//! Every combination goes through [`Context::copy`] (or
//! [`Context::copy_async`]), which dispatches on the endpoint kinds. The
//! `copy_htod`-style functions are shorthands for the common pairs.

use std::fmt;

use devrt_driver::{CUDA_ERROR_NOT_SUPPORTED, CUresult};
use tracing::debug;

use crate::array::Array;
use crate::context::Context;
use crate::error::{check, ensure_len, Error, Result};
use crate::pointer::DevicePtr;
use crate::stream::Stream;

/// The three kinds of copy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Host,
    Device,
    Array,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndpointKind::Host => "host",
            EndpointKind::Device => "device",
            EndpointKind::Array => "array",
        })
    }
}

/// Where a copy reads from. Array endpoints carry a byte offset.
#[derive(Clone, Copy)]
pub enum Source<'a> {
    Host(&'a [u8]),
    Device(DevicePtr),
    Array(&'a Array<'a>, usize),
}

/// Where a copy writes to. Array endpoints carry a byte offset.
pub enum Destination<'a> {
    Host(&'a mut [u8]),
    Device(DevicePtr),
    Array(&'a Array<'a>, usize),
}

impl Source<'_> {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Source::Host(_) => EndpointKind::Host,
            Source::Device(_) => EndpointKind::Device,
            Source::Array(..) => EndpointKind::Array,
        }
    }
}

impl Destination<'_> {
    pub fn kind(&self) -> EndpointKind {
        match self {
            Destination::Host(_) => EndpointKind::Host,
            Destination::Device(_) => EndpointKind::Device,
            Destination::Array(..) => EndpointKind::Array,
        }
    }
}

const COPY: &str = "Can't copy memory";
const COPY_ASYNC: &str = "Can't copy memory asynchronously";

/// (source, destination) pairs the driver can queue on a stream.
const ASYNC_PAIRS: [(EndpointKind, EndpointKind); 5] = [
    (EndpointKind::Host, EndpointKind::Device),
    (EndpointKind::Device, EndpointKind::Host),
    (EndpointKind::Device, EndpointKind::Device),
    (EndpointKind::Host, EndpointKind::Array),
    (EndpointKind::Array, EndpointKind::Host),
];

fn skip_empty(kinds: (EndpointKind, EndpointKind), len: usize) -> bool {
    len == 0 && kinds != (EndpointKind::Host, EndpointKind::Host)
}

fn host_lengths(dst: &Destination<'_>, src: &Source<'_>, len: usize) -> Result<()> {
    if let Source::Host(src) = src {
        ensure_len(len, src.len())?;
    }
    if let Destination::Host(dst) = dst {
        ensure_len(len, dst.len())?;
    }
    Ok(())
}

impl Context {
    /// Copy `len` bytes from `src` to `dst`, blocking until done.
    ///
    /// A zero-length copy between supported endpoints succeeds without
    /// calling the driver.
    pub fn copy(&self, dst: Destination<'_>, src: Source<'_>, len: usize) -> Result<()> {
        let kinds = (src.kind(), dst.kind());
        host_lengths(&dst, &src, len)?;
        if skip_empty(kinds, len) {
            return Ok(());
        }
        debug!(src = %kinds.0, dst = %kinds.1, len, "copy");

        let driver = self.driver();
        let code: CUresult = match (dst, src) {
            (Destination::Device(d), Source::Host(s)) => driver.memcpy_htod(d.as_raw(), &s[..len]),
            (Destination::Host(d), Source::Device(s)) => driver.memcpy_dtoh(&mut d[..len], s.as_raw()),
            (Destination::Device(d), Source::Device(s)) => {
                driver.memcpy_dtod(d.as_raw(), s.as_raw(), len)
            }
            (Destination::Array(d, off), Source::Host(s)) => {
                driver.memcpy_htoa(d.handle(), off, &s[..len])
            }
            (Destination::Host(d), Source::Array(s, off)) => {
                driver.memcpy_atoh(&mut d[..len], s.handle(), off)
            }
            (Destination::Array(d, doff), Source::Array(s, soff)) => {
                driver.memcpy_atoa(d.handle(), doff, s.handle(), soff, len)
            }
            (Destination::Array(d, off), Source::Device(s)) => {
                driver.memcpy_dtoa(d.handle(), off, s.as_raw(), len)
            }
            (Destination::Device(d), Source::Array(s, off)) => {
                driver.memcpy_atod(d.as_raw(), s.handle(), off, len)
            }
            (Destination::Host(_), Source::Host(_)) => CUDA_ERROR_NOT_SUPPORTED,
        };
        check(code, COPY).map_err(|failure| Error::Transfer {
            src: kinds.0,
            dst: kinds.1,
            failure,
        })
    }

    /// Queue a copy of `len` bytes on `stream` and return immediately.
    ///
    /// Supported pairs are host to device, device to host, device to device,
    /// host to array and array to host. Anything else fails with a transfer
    /// error carrying `CUDA_ERROR_NOT_SUPPORTED`. Zero-length copies of a
    /// supported pair are not queued.
    ///
    /// # Safety
    /// Host memory must be page-locked (see [`HostBuffer`](crate::HostBuffer)),
    /// must stay alive, and must not be touched by the host until `stream`
    /// has been synchronized.
    pub unsafe fn copy_async(
        &self,
        dst: Destination<'_>,
        src: Source<'_>,
        len: usize,
        stream: &Stream<'_>,
    ) -> Result<()> {
        let kinds = (src.kind(), dst.kind());
        host_lengths(&dst, &src, len)?;
        if ASYNC_PAIRS.contains(&kinds) && skip_empty(kinds, len) {
            return Ok(());
        }
        debug!(src = %kinds.0, dst = %kinds.1, len, "copy queued");

        let driver = self.driver();
        let raw = stream.handle();
        let code = match (dst, src) {
            (Destination::Device(d), Source::Host(s)) => unsafe {
                driver.memcpy_htod_async(d.as_raw(), s.as_ptr(), len, raw)
            },
            (Destination::Host(d), Source::Device(s)) => unsafe {
                driver.memcpy_dtoh_async(d.as_mut_ptr(), s.as_raw(), len, raw)
            },
            (Destination::Device(d), Source::Device(s)) => {
                driver.memcpy_dtod_async(d.as_raw(), s.as_raw(), len, raw)
            }
            (Destination::Array(d, off), Source::Host(s)) => unsafe {
                driver.memcpy_htoa_async(d.handle(), off, s.as_ptr(), len, raw)
            },
            (Destination::Host(d), Source::Array(s, off)) => unsafe {
                driver.memcpy_atoh_async(d.as_mut_ptr(), s.handle(), off, len, raw)
            },
            _ => CUDA_ERROR_NOT_SUPPORTED,
        };
        check(code, COPY_ASYNC).map_err(|failure| Error::Transfer {
            src: kinds.0,
            dst: kinds.1,
            failure,
        })
    }

    pub fn copy_htod(&self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        self.copy(Destination::Device(dst), Source::Host(src), src.len())
    }

    pub fn copy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> Result<()> {
        let len = dst.len();
        self.copy(Destination::Host(dst), Source::Device(src), len)
    }

    pub fn copy_dtod(&self, dst: DevicePtr, src: DevicePtr, len: usize) -> Result<()> {
        self.copy(Destination::Device(dst), Source::Device(src), len)
    }

    pub fn copy_htoa(&self, dst: &Array<'_>, dst_offset: usize, src: &[u8]) -> Result<()> {
        self.copy(Destination::Array(dst, dst_offset), Source::Host(src), src.len())
    }

    pub fn copy_atoh(&self, dst: &mut [u8], src: &Array<'_>, src_offset: usize) -> Result<()> {
        let len = dst.len();
        self.copy(Destination::Host(dst), Source::Array(src, src_offset), len)
    }

    pub fn copy_atoa(
        &self,
        dst: &Array<'_>,
        dst_offset: usize,
        src: &Array<'_>,
        src_offset: usize,
        len: usize,
    ) -> Result<()> {
        self.copy(
            Destination::Array(dst, dst_offset),
            Source::Array(src, src_offset),
            len,
        )
    }

    pub fn copy_dtoa(&self, dst: &Array<'_>, dst_offset: usize, src: DevicePtr, len: usize) -> Result<()> {
        self.copy(Destination::Array(dst, dst_offset), Source::Device(src), len)
    }

    pub fn copy_atod(&self, dst: DevicePtr, src: &Array<'_>, src_offset: usize, len: usize) -> Result<()> {
        self.copy(Destination::Device(dst), Source::Array(src, src_offset), len)
    }

    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn copy_htod_async(&self, dst: DevicePtr, src: &[u8], stream: &Stream<'_>) -> Result<()> {
        unsafe { self.copy_async(Destination::Device(dst), Source::Host(src), src.len(), stream) }
    }

    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn copy_dtoh_async(&self, dst: &mut [u8], src: DevicePtr, stream: &Stream<'_>) -> Result<()> {
        let len = dst.len();
        unsafe { self.copy_async(Destination::Host(dst), Source::Device(src), len, stream) }
    }

    pub fn copy_dtod_async(&self, dst: DevicePtr, src: DevicePtr, len: usize, stream: &Stream<'_>) -> Result<()> {
        // SAFETY: no host memory is involved.
        unsafe { self.copy_async(Destination::Device(dst), Source::Device(src), len, stream) }
    }

    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn copy_htoa_async(
        &self,
        dst: &Array<'_>,
        dst_offset: usize,
        src: &[u8],
        stream: &Stream<'_>,
    ) -> Result<()> {
        unsafe {
            self.copy_async(
                Destination::Array(dst, dst_offset),
                Source::Host(src),
                src.len(),
                stream,
            )
        }
    }

    /// # Safety
    /// See [`Context::copy_async`].
    pub unsafe fn copy_atoh_async(
        &self,
        dst: &mut [u8],
        src: &Array<'_>,
        src_offset: usize,
        stream: &Stream<'_>,
    ) -> Result<()> {
        let len = dst.len();
        unsafe { self.copy_async(Destination::Host(dst), Source::Array(src, src_offset), len, stream) }
    }
}

//! Streams: in-order queues of device work.
//!
//! Work queued on one stream runs in submission order; work on different
//! streams may overlap. [`Stream::query`] polls, [`Stream::synchronize`] waits.

use bitflags::bitflags;
use devrt_driver::{CUstream, CUDA_ERROR_NOT_READY, CUDA_SUCCESS};

use crate::context::Context;
use crate::error::{check, fail, warn, Failure, Result};

bitflags! {
    /// Stream creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamFlags: u32 {
        /// Do not synchronize with the default stream.
        const NON_BLOCKING = 0x1;
    }
}

/// An in-order queue of device work.
pub struct Stream<'c> {
    ctx: &'c Context,
    handle: CUstream,
}

impl<'c> Stream<'c> {
    pub fn new(ctx: &'c Context) -> Result<Self> {
        Self::with_flags(ctx, StreamFlags::empty())
    }

    pub fn with_flags(ctx: &'c Context, flags: StreamFlags) -> Result<Self> {
        let handle = ctx
            .driver()
            .stream_create(flags.bits())
            .map_err(fail("Can't create stream"))?;
        Ok(Self { ctx, handle })
    }

    pub(crate) fn handle(&self) -> CUstream {
        self.handle
    }

    /// Block until everything queued so far has run.
    pub fn synchronize(&self) -> Result<()> {
        check(self.ctx.driver().stream_synchronize(self.handle), "Can't synchronize stream")?;
        Ok(())
    }

    /// `true` once all queued work has completed. Never blocks.
    pub fn query(&self) -> Result<bool> {
        match self.ctx.driver().stream_query(self.handle) {
            CUDA_SUCCESS => Ok(true),
            CUDA_ERROR_NOT_READY => Ok(false),
            code => Err(Failure::new("Can't query stream", code).into()),
        }
    }
}

impl Drop for Stream<'_> {
    fn drop(&mut self) {
        warn(self.ctx.driver().stream_destroy(self.handle), "Can't destroy stream");
    }
}

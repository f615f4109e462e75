//! Events: markers in a stream's completion order.
//!
//! Whether an event has been recorded is tracked on the host, so waiting on,
//! polling or timing an event that was never recorded fails with
//! [`Error::NotRecorded`] before the driver is involved.

use bitflags::bitflags;
use devrt_driver::{CUevent, CUDA_ERROR_NOT_READY, CUDA_SUCCESS};

use crate::context::Context;
use crate::error::{check, fail, warn, Error, Failure, Result};
use crate::stream::Stream;

bitflags! {
    /// Event creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        /// Block the waiting thread instead of spinning.
        const BLOCKING_SYNC = 0x1;
        /// Skip timestamps; such events cannot be timed.
        const DISABLE_TIMING = 0x2;
    }
}

pub struct Event<'c> {
    ctx: &'c Context,
    handle: CUevent,
    recorded: bool,
}

impl<'c> Event<'c> {
    pub fn new(ctx: &'c Context) -> Result<Self> {
        Self::with_flags(ctx, EventFlags::empty())
    }

    pub fn with_flags(ctx: &'c Context, flags: EventFlags) -> Result<Self> {
        let handle = ctx
            .driver()
            .event_create(flags.bits())
            .map_err(fail("Can't create event"))?;
        Ok(Self {
            ctx,
            handle,
            recorded: false,
        })
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded
    }

    /// Mark the current tail of the default stream.
    pub fn record(&mut self) -> Result<()> {
        self.record_raw(std::ptr::null_mut())
    }

    /// Mark the current tail of `stream`.
    pub fn record_on(&mut self, stream: &Stream<'_>) -> Result<()> {
        self.record_raw(stream.handle())
    }

    fn record_raw(&mut self, stream: devrt_driver::CUstream) -> Result<()> {
        check(self.ctx.driver().event_record(self.handle, stream), "Can't record event")?;
        self.recorded = true;
        Ok(())
    }

    fn ensure_recorded(&self, context: &'static str) -> Result<()> {
        if self.recorded {
            Ok(())
        } else {
            Err(Error::NotRecorded(context))
        }
    }

    /// Block until the marked point has been reached.
    pub fn synchronize(&self) -> Result<()> {
        const CONTEXT: &str = "Can't synchronize event";
        self.ensure_recorded(CONTEXT)?;
        check(self.ctx.driver().event_synchronize(self.handle), CONTEXT)?;
        Ok(())
    }

    /// `true` once the marked point has been reached. Never blocks.
    pub fn query(&self) -> Result<bool> {
        const CONTEXT: &str = "Can't query event";
        self.ensure_recorded(CONTEXT)?;
        match self.ctx.driver().event_query(self.handle) {
            CUDA_SUCCESS => Ok(true),
            CUDA_ERROR_NOT_READY => Ok(false),
            code => Err(Failure::new(CONTEXT, code).into()),
        }
    }

    /// Milliseconds of device time between `start` and `end`.
    pub fn elapsed(end: &Event<'_>, start: &Event<'_>) -> Result<f32> {
        const CONTEXT: &str = "Can't get elapsed time";
        start.ensure_recorded(CONTEXT)?;
        end.ensure_recorded(CONTEXT)?;
        Ok(end
            .ctx
            .driver()
            .event_elapsed_time(start.handle, end.handle)
            .map_err(fail(CONTEXT))?)
    }

    /// Milliseconds from `start` to this event.
    pub fn elapsed_since(&self, start: &Event<'_>) -> Result<f32> {
        Event::elapsed(self, start)
    }
}

impl Drop for Event<'_> {
    fn drop(&mut self) {
        warn(self.ctx.driver().event_destroy(self.handle), "Can't destroy event");
    }
}

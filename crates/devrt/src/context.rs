//! The driver context every resource hangs off.
//!
//! A [`Context`] owns one driver context on one device. Resources borrow it,
//! so the borrow checker guarantees they are released before the context is
//! destroyed.

use std::sync::Arc;

use devrt_core::{Backend, DevrtConfig};
use devrt_driver::{CUcontext, CUdevice, CudaDriver, Driver, CUDA_ERROR_INVALID_VALUE};
use tracing::{debug, info};

use crate::error::{check, fail, warn, Error, Failure, Result};
use crate::pointer::DevicePtr;

/// Element sizes a pitched allocation may be laid out for.
pub const PITCH_ELEMENT_SIZES: [u32; 3] = [4, 8, 16];

pub struct Context {
    driver: Arc<dyn Driver>,
    handle: CUcontext,
    device: CUdevice,
}

impl Context {
    /// Initialize `driver` and create a context on device `ordinal`.
    pub fn new(driver: Arc<dyn Driver>, ordinal: i32) -> Result<Self> {
        Self::with_flags(driver, ordinal, 0)
    }

    pub fn with_flags(driver: Arc<dyn Driver>, ordinal: i32, flags: u32) -> Result<Self> {
        check(driver.init(0), "Can't initialize driver")?;
        let device = driver.device_get(ordinal).map_err(fail("Can't get device"))?;
        let handle = driver
            .ctx_create(flags, device)
            .map_err(fail("Can't create context"))?;

        info!(backend = driver.backend_name(), ordinal, "context created");
        Ok(Self { driver, handle, device })
    }

    /// Build a context from a loaded devrt.toml.
    pub fn from_config(config: &DevrtConfig) -> Result<Self> {
        let driver: Arc<dyn Driver> = match config.driver.backend {
            Backend::Cuda => {
                let driver = CudaDriver::load_from(config.driver.library.as_deref())
                    .map_err(Error::DriverUnavailable)?;
                info!("driver library loaded");
                driver
            }
            #[cfg(feature = "sim")]
            Backend::Sim => devrt_driver::SimDriver::with_capacity(config.sim.capacity),
            #[cfg(not(feature = "sim"))]
            Backend::Sim => {
                return Err(Error::DriverUnavailable(
                    "the sim backend needs devrt built with the `sim` feature".to_string(),
                ))
            }
        };
        Self::with_flags(driver, config.driver.device, config.driver.context_flags)
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        &*self.driver
    }

    pub fn backend_name(&self) -> &'static str {
        self.driver.backend_name()
    }

    /// Bind this context to the calling thread.
    pub fn make_current(&self) -> Result<()> {
        check(self.driver.ctx_set_current(self.handle), "Can't make context current")?;
        Ok(())
    }

    /// Block until all work queued in the context has finished.
    pub fn synchronize(&self) -> Result<()> {
        check(self.driver.ctx_synchronize(), "Can't synchronize context")?;
        Ok(())
    }

    pub fn device_name(&self) -> Result<String> {
        Ok(self
            .driver
            .device_get_name(self.device)
            .map_err(fail("Can't query device name"))?)
    }

    pub fn total_memory(&self) -> Result<usize> {
        Ok(self
            .driver
            .device_total_mem(self.device)
            .map_err(fail("Can't query device memory"))?)
    }

    pub fn driver_version(&self) -> Result<i32> {
        Ok(self
            .driver
            .driver_get_version()
            .map_err(fail("Can't query driver version"))?)
    }

    // ── Linear memory ─────────────────────────────────────────────

    /// Allocate `size` bytes of linear device memory.
    ///
    /// A zero-byte request fails with [`Error::Allocation`] carrying
    /// `CUDA_ERROR_INVALID_VALUE` on every backend.
    pub fn allocate(&self, size: usize) -> Result<DevicePtr> {
        const CONTEXT: &str = "Can't allocate memory";
        if size == 0 {
            return Err(Error::Allocation(Failure::new(CONTEXT, CUDA_ERROR_INVALID_VALUE)));
        }
        let raw = self
            .driver
            .mem_alloc(size)
            .map_err(|code| Error::Allocation(Failure::new(CONTEXT, code)))?;
        let ptr = DevicePtr::from_raw(raw);
        debug!(size, ptr = %ptr, "allocated device memory");
        Ok(ptr)
    }

    /// Allocate `height` rows of `width_bytes`, padded to the device's row alignment.
    ///
    /// Returns the pointer and the pitch actually used. `element_size` must be
    /// 4, 8 or 16, and both extents must be non-zero; anything else fails like
    /// a zero-byte [`Context::allocate`].
    pub fn allocate_pitched(
        &self,
        width_bytes: usize,
        height: usize,
        element_size: u32,
    ) -> Result<(DevicePtr, usize)> {
        const CONTEXT: &str = "Can't allocate pitched memory";
        if !PITCH_ELEMENT_SIZES.contains(&element_size) || width_bytes == 0 || height == 0 {
            return Err(Error::Allocation(Failure::new(CONTEXT, CUDA_ERROR_INVALID_VALUE)));
        }
        let (raw, pitch) = self
            .driver
            .mem_alloc_pitch(width_bytes, height, element_size)
            .map_err(|code| Error::Allocation(Failure::new(CONTEXT, code)))?;
        debug!(width_bytes, height, pitch, "allocated pitched device memory");
        Ok((DevicePtr::from_raw(raw), pitch))
    }

    /// Release memory from [`Context::allocate`] or [`Context::allocate_pitched`].
    ///
    /// Failures are logged, never returned.
    pub fn free(&self, ptr: DevicePtr) {
        debug!(ptr = %ptr, "freeing device memory");
        warn(self.driver.mem_free(ptr.as_raw()), "Can't free memory");
    }

    pub fn memset_d8(&self, ptr: DevicePtr, value: u8, count: usize) -> Result<()> {
        check(self.driver.memset_d8(ptr.as_raw(), value, count), "Can't set memory")?;
        Ok(())
    }

    pub fn memset_d16(&self, ptr: DevicePtr, value: u16, count: usize) -> Result<()> {
        check(self.driver.memset_d16(ptr.as_raw(), value, count), "Can't set memory")?;
        Ok(())
    }

    pub fn memset_d32(&self, ptr: DevicePtr, value: u32, count: usize) -> Result<()> {
        check(self.driver.memset_d32(ptr.as_raw(), value, count), "Can't set memory")?;
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        debug!("destroying context");
        warn(self.driver.ctx_destroy(self.handle), "Can't destroy context");
    }
}

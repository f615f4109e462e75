use std::fmt;
use std::ops::Add;

use devrt_driver::CUdeviceptr;

/// Address of linear device memory.
///
/// A `DevicePtr` is a ticket, not an owner: copying it duplicates the address,
/// and dropping it frees nothing. Memory obtained from
/// [`Context::allocate`](crate::Context::allocate) is released with
/// [`Context::free`](crate::Context::free); use
/// [`DeviceMemory`](crate::DeviceMemory) for scope-bound ownership.
///
/// Only allocation functions hand these out, so there is no `Default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevicePtr(CUdeviceptr);

impl DevicePtr {
    pub(crate) fn from_raw(raw: CUdeviceptr) -> Self {
        Self(raw)
    }

    /// The raw device address, as kernels receive it.
    pub fn as_raw(self) -> CUdeviceptr {
        self.0
    }

    /// Pointer arithmetic in bytes; the allocation is not consulted.
    pub fn offset(self, bytes: isize) -> Self {
        Self(self.0.wrapping_add_signed(bytes as i64))
    }
}

impl Add<usize> for DevicePtr {
    type Output = DevicePtr;

    fn add(self, bytes: usize) -> DevicePtr {
        DevicePtr(self.0.wrapping_add(bytes as u64))
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

//! The driver boundary.
//!
//! Everything below the public `devrt` library talks to the GPU through the
//! [`Driver`] trait. [`CudaDriver`] resolves the vendor driver library at
//! runtime; with the `sim` feature, `SimDriver` emulates the same contract in
//! host memory.

pub mod api;
pub mod cuda_driver;
pub mod result;
pub mod types;

#[cfg(feature = "sim")]
pub mod sim;

pub use api::Driver;
pub use cuda_driver::CudaDriver;
pub use result::{error_name, error_string};
pub use types::*;

#[cfg(feature = "sim")]
pub use sim::{KernelFn, LaunchRecord, SimDevice, SimDriver, SimModule, SimStats};

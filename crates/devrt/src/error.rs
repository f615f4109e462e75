//! Driver result translation.
//!
//! Two policies cover every driver call. [`check`] turns a failing code into
//! a [`Failure`] the caller propagates; [`warn`] logs and moves on, and is
//! reserved for teardown paths (drop, free, unload) that must never abort.

use std::fmt;

use devrt_core::CoreError;
use devrt_driver::{error_name, error_string, CUresult, CUDA_SUCCESS};
use thiserror::Error;

use crate::transfer::EndpointKind;

/// A failed driver call: what was attempted and the code the driver returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure {
    pub context: &'static str,
    pub code: CUresult,
}

impl Failure {
    pub fn new(context: &'static str, code: CUresult) -> Self {
        Self { context, code }
    }

    /// Symbolic name of the code, e.g. `CUDA_ERROR_OUT_OF_MEMORY`.
    pub fn name(&self) -> &'static str {
        error_name(self.code)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, error_string(self.code))
    }
}

impl std::error::Error for Failure {}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Allocation(Failure),

    #[error("{failure} ({src} to {dst})")]
    Transfer {
        src: EndpointKind,
        dst: EndpointKind,
        failure: Failure,
    },

    #[error("unknown array format {0:#x}")]
    UnknownFormat(u32),

    #[error("{0}: event was never recorded")]
    NotRecorded(&'static str),

    #[error("{failure} ({path})")]
    ModuleLoad { path: String, failure: Failure },

    #[error("{failure} ({name})")]
    SymbolNotFound { name: String, failure: Failure },

    #[error("{0}")]
    Launch(Failure),

    #[error("invalid kernel parameter at offset {offset}: {reason}")]
    InvalidParameter { offset: usize, reason: &'static str },

    #[error("{0}")]
    Driver(#[from] Failure),

    #[error("{0}: source and destination must both be set")]
    IncompleteCopy(&'static str),

    #[error("host buffer too small: transfer needs {needed} bytes, buffer has {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error(transparent)]
    Config(#[from] CoreError),
}

impl Error {
    /// The driver code behind this error, if it came from the driver.
    pub fn code(&self) -> Option<CUresult> {
        match self {
            Error::Allocation(f) | Error::Launch(f) | Error::Driver(f) => Some(f.code),
            Error::Transfer { failure, .. }
            | Error::ModuleLoad { failure, .. }
            | Error::SymbolNotFound { failure, .. } => Some(failure.code),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// No-op on success, otherwise a [`Failure`] tagged with `context`.
pub fn check(code: CUresult, context: &'static str) -> Result<(), Failure> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(Failure::new(context, code))
    }
}

/// Adapter for handle-producing driver calls: `.map_err(fail("..."))`.
pub(crate) fn fail(context: &'static str) -> impl Fn(CUresult) -> Failure {
    move |code| Failure::new(context, code)
}

/// Log a failing teardown call and continue.
pub fn warn(code: CUresult, context: &'static str) {
    if code != CUDA_SUCCESS {
        tracing::warn!(code, name = error_name(code), "{}: {}", context, error_string(code));
    }
}

/// Reject host slices shorter than a transfer.
pub(crate) fn ensure_len(needed: usize, available: usize) -> Result<()> {
    if needed > available {
        return Err(Error::BufferTooSmall { needed, available });
    }
    Ok(())
}

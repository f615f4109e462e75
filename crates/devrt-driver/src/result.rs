//! Result-code tables.

use crate::types::CUresult;

/// Symbolic name of a result code, e.g. `CUDA_ERROR_OUT_OF_MEMORY`.
pub fn error_name(result: CUresult) -> &'static str {
    match result {
        0 => "CUDA_SUCCESS",
        1 => "CUDA_ERROR_INVALID_VALUE",
        2 => "CUDA_ERROR_OUT_OF_MEMORY",
        3 => "CUDA_ERROR_NOT_INITIALIZED",
        4 => "CUDA_ERROR_DEINITIALIZED",
        34 => "CUDA_ERROR_STUB_LIBRARY",
        46 => "CUDA_ERROR_DEVICE_UNAVAILABLE",
        100 => "CUDA_ERROR_NO_DEVICE",
        101 => "CUDA_ERROR_INVALID_DEVICE",
        200 => "CUDA_ERROR_INVALID_IMAGE",
        201 => "CUDA_ERROR_INVALID_CONTEXT",
        202 => "CUDA_ERROR_CONTEXT_ALREADY_CURRENT",
        205 => "CUDA_ERROR_MAP_FAILED",
        206 => "CUDA_ERROR_UNMAP_FAILED",
        207 => "CUDA_ERROR_ARRAY_IS_MAPPED",
        208 => "CUDA_ERROR_ALREADY_MAPPED",
        209 => "CUDA_ERROR_NO_BINARY_FOR_GPU",
        210 => "CUDA_ERROR_ALREADY_ACQUIRED",
        211 => "CUDA_ERROR_NOT_MAPPED",
        212 => "CUDA_ERROR_NOT_MAPPED_AS_ARRAY",
        213 => "CUDA_ERROR_NOT_MAPPED_AS_POINTER",
        218 => "CUDA_ERROR_INVALID_PTX",
        300 => "CUDA_ERROR_INVALID_SOURCE",
        301 => "CUDA_ERROR_FILE_NOT_FOUND",
        302 => "CUDA_ERROR_SHARED_OBJECT_SYMBOL_NOT_FOUND",
        303 => "CUDA_ERROR_SHARED_OBJECT_INIT_FAILED",
        304 => "CUDA_ERROR_OPERATING_SYSTEM",
        400 => "CUDA_ERROR_INVALID_HANDLE",
        401 => "CUDA_ERROR_ILLEGAL_STATE",
        500 => "CUDA_ERROR_NOT_FOUND",
        600 => "CUDA_ERROR_NOT_READY",
        700 => "CUDA_ERROR_ILLEGAL_ADDRESS",
        701 => "CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES",
        702 => "CUDA_ERROR_LAUNCH_TIMEOUT",
        703 => "CUDA_ERROR_LAUNCH_INCOMPATIBLE_TEXTURING",
        709 => "CUDA_ERROR_CONTEXT_IS_DESTROYED",
        716 => "CUDA_ERROR_MISALIGNED_ADDRESS",
        719 => "CUDA_ERROR_LAUNCH_FAILED",
        800 => "CUDA_ERROR_NOT_PERMITTED",
        801 => "CUDA_ERROR_NOT_SUPPORTED",
        _ => "CUDA_ERROR_UNKNOWN",
    }
}

/// Human-readable description of a result code. Unknown codes map to
/// `"unknown error"`.
pub fn error_string(result: CUresult) -> &'static str {
    match result {
        0 => "no error",
        1 => "invalid argument",
        2 => "out of memory",
        3 => "driver not initialized",
        4 => "driver deinitialized",
        34 => "stub driver library loaded",
        46 => "device unavailable",
        100 => "no CUDA-capable device is detected",
        101 => "invalid device ordinal",
        200 => "device kernel image is invalid",
        201 => "invalid context",
        202 => "context already current",
        205 => "mapping of buffer object failed",
        206 => "unmapping of buffer object failed",
        207 => "array is mapped",
        208 => "resource already mapped",
        209 => "no kernel image is available for execution on the device",
        210 => "resource already acquired",
        211 => "resource not mapped",
        212 => "resource not mapped as array",
        213 => "resource not mapped as pointer",
        218 => "a PTX JIT compilation failed",
        300 => "invalid source",
        301 => "file not found",
        302 => "shared object symbol not found",
        303 => "shared object initialization failed",
        304 => "OS call failed",
        400 => "invalid resource handle",
        401 => "an illegal state was encountered",
        500 => "named symbol not found",
        600 => "not ready",
        700 => "an illegal memory access was encountered",
        701 => "too many resources requested for launch",
        702 => "the launch timed out and was terminated",
        703 => "launch uses incompatible texturing mode",
        709 => "context is destroyed",
        716 => "misaligned address",
        719 => "unspecified launch failure",
        800 => "operation not permitted",
        801 => "operation not supported",
        _ => "unknown error",
    }
}

//! Integration test: SimDriver
//!
//! Drives the emulated backend through the raw `Driver` contract: result
//! codes, deferred stream execution, event timing, 2D copies and kernels.
//!
//! Run with: cargo test --test sim_driver_test -- --nocapture

use std::sync::Arc;

use devrt_driver::*;

fn initialized(capacity: usize) -> Arc<SimDriver> {
    let driver = SimDriver::with_capacity(capacity);
    assert_eq!(driver.init(0), CUDA_SUCCESS);
    driver
}

#[test]
fn test_result_tables() {
    assert_eq!(error_string(CUDA_ERROR_OUT_OF_MEMORY), "out of memory");
    assert_eq!(error_name(CUDA_ERROR_OUT_OF_MEMORY), "CUDA_ERROR_OUT_OF_MEMORY");
    assert_eq!(error_string(CUDA_ERROR_INVALID_VALUE), "invalid argument");
    assert_eq!(error_string(123_456), "unknown error");
}

#[test]
fn test_calls_before_init_fail() {
    let driver = SimDriver::new();
    match driver.device_get(0) {
        Err(CUDA_ERROR_NOT_INITIALIZED) => {}
        other => panic!("expected NOT_INITIALIZED, got {:?}", other),
    }
    assert_eq!(driver.init(0), CUDA_SUCCESS);
    assert_eq!(driver.device_get_count(), Ok(1));
    assert_eq!(driver.device_get(1), Err(CUDA_ERROR_INVALID_DEVICE));
    println!("device: {:?}", driver.device_get_name(0));
}

#[test]
fn test_capacity_is_enforced() {
    let driver = initialized(4096);
    let a = driver.mem_alloc(3000).expect("first allocation fits");
    assert_eq!(driver.mem_alloc(2000), Err(CUDA_ERROR_OUT_OF_MEMORY));
    assert_eq!(driver.mem_alloc(0), Err(CUDA_ERROR_INVALID_VALUE));
    assert_eq!(driver.mem_free(a), CUDA_SUCCESS);
    assert!(driver.mem_alloc(2000).is_ok());
}

#[test]
fn test_pitch_rounds_to_alignment() {
    let driver = initialized(1 << 20);
    let (_, pitch) = driver.mem_alloc_pitch(100, 4, 4).expect("pitched allocation");
    assert_eq!(pitch, 512);
    let (_, pitch) = driver.mem_alloc_pitch(513, 2, 8).expect("pitched allocation");
    assert_eq!(pitch, 1024);
    assert_eq!(driver.mem_alloc_pitch(64, 4, 3), Err(CUDA_ERROR_INVALID_VALUE));
}

#[test]
fn test_async_copy_waits_for_stream_sync() {
    let driver = initialized(1 << 20);
    let dptr = driver.mem_alloc(16).expect("alloc");
    let stream = driver.stream_create(0).expect("stream");

    let src = [7u8; 16];
    let res = unsafe { driver.memcpy_htod_async(dptr, src.as_ptr(), src.len(), stream) };
    assert_eq!(res, CUDA_SUCCESS);
    assert_eq!(driver.stream_query(stream), CUDA_ERROR_NOT_READY);
    assert_eq!(driver.pending(stream), 1);

    assert_eq!(driver.stream_synchronize(stream), CUDA_SUCCESS);
    assert_eq!(driver.stream_query(stream), CUDA_SUCCESS);

    let mut out = [0u8; 16];
    assert_eq!(driver.memcpy_dtoh(&mut out, dptr), CUDA_SUCCESS);
    assert_eq!(out, src);
    assert_eq!(driver.stream_destroy(stream), CUDA_SUCCESS);
}

#[test]
fn test_event_states_and_timing() {
    let driver = initialized(1 << 20);
    let stream = driver.stream_create(0).expect("stream");
    let start = driver.event_create(0).expect("start");
    let end = driver.event_create(0).expect("end");

    // Never recorded.
    assert_eq!(driver.event_elapsed_time(start, end), Err(CUDA_ERROR_INVALID_HANDLE));

    assert_eq!(driver.event_record(start, stream), CUDA_SUCCESS);
    assert_eq!(driver.event_query(start), CUDA_ERROR_NOT_READY);
    assert_eq!(driver.event_record(end, stream), CUDA_SUCCESS);
    assert_eq!(driver.event_elapsed_time(start, end), Err(CUDA_ERROR_NOT_READY));

    assert_eq!(driver.event_synchronize(end), CUDA_SUCCESS);
    assert_eq!(driver.event_query(start), CUDA_SUCCESS);
    let ms = driver.event_elapsed_time(start, end).expect("elapsed");
    println!("elapsed: {} ms", ms);
    assert!(ms >= 0.0);

    let untimed = driver.event_create(0x2).expect("untimed");
    assert_eq!(driver.event_record(untimed, std::ptr::null_mut()), CUDA_SUCCESS);
    assert_eq!(driver.event_elapsed_time(start, untimed), Err(CUDA_ERROR_INVALID_HANDLE));
}

#[test]
fn test_aligned_2d_copy_rejects_odd_device_pitch() {
    let driver = initialized(1 << 20);
    let a = driver.mem_alloc(4096).expect("alloc");
    let b = driver.mem_alloc(4096).expect("alloc");

    let copy = CudaMemcpy2D {
        src_memory_type: CU_MEMORYTYPE_DEVICE,
        src_device: a,
        src_pitch: 100,
        dst_memory_type: CU_MEMORYTYPE_DEVICE,
        dst_device: b,
        dst_pitch: 512,
        width_in_bytes: 64,
        height: 4,
        ..Default::default()
    };
    assert_eq!(unsafe { driver.memcpy_2d(&copy) }, CUDA_ERROR_INVALID_VALUE);
    assert_eq!(unsafe { driver.memcpy_2d_unaligned(&copy) }, CUDA_SUCCESS);
}

#[test]
fn test_2d_copy_with_overflowing_geometry_is_invalid() {
    let driver = initialized(1 << 20);
    let a = driver.mem_alloc(4096).expect("alloc");
    let b = driver.mem_alloc(4096).expect("alloc");

    let huge_pitch = CudaMemcpy2D {
        src_memory_type: CU_MEMORYTYPE_DEVICE,
        src_device: a,
        src_pitch: usize::MAX / 2 + 1,
        dst_memory_type: CU_MEMORYTYPE_DEVICE,
        dst_device: b,
        dst_pitch: 512,
        width_in_bytes: 64,
        height: 4,
        ..Default::default()
    };
    assert_eq!(unsafe { driver.memcpy_2d_unaligned(&huge_pitch) }, CUDA_ERROR_INVALID_VALUE);

    let huge_x = CudaMemcpy2D {
        src_pitch: 512,
        src_x_in_bytes: usize::MAX - 8,
        ..huge_pitch
    };
    assert_eq!(unsafe { driver.memcpy_2d_unaligned(&huge_x) }, CUDA_ERROR_INVALID_VALUE);
}

#[test]
fn test_kernel_closure_runs_on_launch() {
    let driver = initialized(1 << 20);
    driver.install_module(
        "fill.cubin",
        SimModule::new().with_kernel("fill", |dev: &mut SimDevice, launch: &LaunchRecord| {
            let (Some(ptr), Some(value)) = (launch.read_u64(0), launch.read_u32(8)) else {
                return CUDA_ERROR_INVALID_VALUE;
            };
            match dev.write(ptr, &value.to_ne_bytes()) {
                Ok(()) => CUDA_SUCCESS,
                Err(res) => res,
            }
        }),
    );

    let module = driver.module_load("fill.cubin").expect("module");
    let func = driver.module_get_function(module, "fill").expect("function");
    assert_eq!(driver.module_get_function(module, "missing"), Err(CUDA_ERROR_NOT_FOUND));

    let dptr = driver.mem_alloc(4).expect("alloc");
    let mut params = dptr.to_ne_bytes().to_vec();
    params.extend_from_slice(&0xdead_beefu32.to_ne_bytes());
    let res = unsafe { driver.launch_kernel(func, [1, 1, 1], [1, 1, 1], 0, std::ptr::null_mut(), &params) };
    assert_eq!(res, CUDA_SUCCESS);

    let mut out = [0u8; 4];
    assert_eq!(driver.memcpy_dtoh(&mut out, dptr), CUDA_SUCCESS);
    assert_eq!(u32::from_ne_bytes(out), 0xdead_beef);
    assert_eq!(driver.launches().len(), 1);

    let res = unsafe { driver.launch_kernel(func, [0, 1, 1], [1, 1, 1], 0, std::ptr::null_mut(), &params) };
    assert_eq!(res, CUDA_ERROR_INVALID_VALUE);
    assert_eq!(driver.module_unload(module), CUDA_SUCCESS);
    assert_eq!(driver.module_load("other.cubin"), Err(CUDA_ERROR_FILE_NOT_FOUND));
}

#[test]
fn test_host_buffers_are_tracked() {
    let driver = initialized(1 << 20);
    let ptr = driver.mem_alloc_host(64).expect("host alloc");
    assert_eq!(driver.stats().host_buffers, 1);
    assert_eq!(driver.mem_free_host(ptr), CUDA_SUCCESS);
    assert_eq!(driver.stats().host_buffers, 0);
    assert_eq!(driver.mem_free_host(ptr), CUDA_ERROR_INVALID_VALUE);
}

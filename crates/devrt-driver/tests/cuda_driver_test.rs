//! Integration test: CudaDriver
//!
//! Loads the vendor driver library when the machine has one. Skipped (not
//! failed) on machines without a GPU driver.
//!
//! Run with: cargo test --test cuda_driver_test -- --nocapture

use devrt_driver::{CudaDriver, Driver, CUDA_SUCCESS};

#[test]
fn test_load_and_query_device() {
    let driver = match CudaDriver::load() {
        Ok(driver) => driver,
        Err(e) => {
            println!("skipping: {}", e);
            return;
        }
    };
    assert_eq!(driver.backend_name(), "cuda");
    if driver.init(0) != CUDA_SUCCESS {
        println!("skipping: cuInit failed");
        return;
    }
    let count = driver.device_get_count().unwrap_or(0);
    println!("devices: {}", count);
    if count > 0 {
        let device = driver.device_get(0).expect("device 0");
        println!("device 0: {:?}", driver.device_get_name(device));
    }
}

#[test]
fn test_missing_library_is_reported() {
    match CudaDriver::load_from(Some("/nonexistent/libdevrt-missing.so")) {
        Err(e) => println!("load error: {}", e),
        Ok(_) => panic!("expected an error for a missing library"),
    }
}

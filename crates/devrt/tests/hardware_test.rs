//! Integration test: real driver smoke test
//!
//! Runs the basic resource and transfer path against the vendor driver.
//! Skipped (not failed) when no driver library or device is available.
//!
//! Run with: cargo test --test hardware_test -- --nocapture

use devrt::{Context, DeviceMemory, DeviceMemory2D, Event, Stream};
use devrt_driver::CudaDriver;

fn hardware_context() -> Option<Context> {
    devrt_common::logging::try_init_logging();
    let driver = match CudaDriver::load() {
        Ok(driver) => driver,
        Err(e) => {
            println!("skipping: {}", e);
            return None;
        }
    };
    match Context::new(driver, 0) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            println!("skipping: {}", e);
            None
        }
    }
}

#[test]
fn test_round_trip_on_device() {
    let Some(ctx) = hardware_context() else { return };
    println!("device: {:?}", ctx.device_name());

    let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
    let mem = DeviceMemory::new(&ctx, data.len()).expect("alloc");
    mem.upload(&data).expect("upload");
    let mut back = vec![0u8; data.len()];
    mem.download(&mut back).expect("download");
    assert_eq!(back, data);

    let pitched = DeviceMemory2D::new(&ctx, 100, 8, 4).expect("pitched alloc");
    assert!(pitched.pitch() >= 100);
    let rows = &data[..800];
    pitched.upload_2d(rows, None).expect("upload 2d");
    let mut back = vec![0u8; 800];
    pitched.download_2d(&mut back, None).expect("download 2d");
    assert_eq!(&back[..], rows);
}

#[test]
fn test_event_timing_on_device() {
    let Some(ctx) = hardware_context() else { return };
    let stream = Stream::new(&ctx).expect("stream");
    let a = DeviceMemory::new(&ctx, 1 << 20).expect("alloc");
    let b = DeviceMemory::new(&ctx, 1 << 20).expect("alloc");
    let mut start = Event::new(&ctx).expect("event");
    let mut end = Event::new(&ctx).expect("event");

    start.record_on(&stream).expect("record");
    ctx.copy_dtod_async(b.ptr(), a.ptr(), 1 << 20, &stream).expect("copy");
    end.record_on(&stream).expect("record");
    end.synchronize().expect("synchronize");

    let ms = Event::elapsed(&end, &start).expect("elapsed");
    println!("1 MiB device copy: {:.3} ms", ms);
    assert!(ms >= 0.0);
}

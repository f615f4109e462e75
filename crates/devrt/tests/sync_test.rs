//! Integration test: streams and events
//!
//! Idle and busy queries, unrecorded-event errors, timing between events,
//! flags, and stream-ordered direct copies.
//!
//! Run with: cargo test --test sync_test -- --nocapture

use std::sync::Arc;

use devrt::{
    Context, DeviceMemory, Error, Event, EventFlags, HostBuffer, Stream, StreamFlags,
};
use devrt_driver::{SimDriver, CUDA_ERROR_INVALID_HANDLE};

fn sim_context() -> (Arc<SimDriver>, Context) {
    devrt_common::logging::try_init_logging();
    let sim = SimDriver::new();
    let ctx = Context::new(sim.clone(), 0).expect("context on simulated device");
    (sim, ctx)
}

#[test]
fn test_new_stream_is_idle() {
    let (_sim, ctx) = sim_context();
    let stream = Stream::new(&ctx).expect("stream");
    assert!(stream.query().expect("query"));
    stream.synchronize().expect("synchronize idle stream");

    let non_blocking = Stream::with_flags(&ctx, StreamFlags::NON_BLOCKING).expect("stream");
    assert!(non_blocking.query().expect("query"));
}

#[test]
fn test_unrecorded_event_is_an_error() {
    let (_sim, ctx) = sim_context();
    let start = Event::new(&ctx).expect("event");
    let mut end = Event::new(&ctx).expect("event");
    assert!(!start.is_recorded());

    match start.query() {
        Err(Error::NotRecorded(_)) => {}
        other => panic!("expected NotRecorded, got {:?}", other),
    }
    match start.synchronize() {
        Err(Error::NotRecorded(_)) => {}
        other => panic!("expected NotRecorded, got {:?}", other),
    }

    end.record().expect("record end");
    match Event::elapsed(&end, &start) {
        Err(Error::NotRecorded(context)) => println!("{}", Error::NotRecorded(context)),
        other => panic!("expected NotRecorded, got {:?}", other),
    }
}

#[test]
fn test_record_on_default_stream_completes() {
    let (_sim, ctx) = sim_context();
    let mut event = Event::new(&ctx).expect("event");
    event.record().expect("record");
    assert!(event.is_recorded());
    assert!(event.query().expect("query"));
    event.synchronize().expect("synchronize");
}

#[test]
fn test_elapsed_is_non_negative() {
    let (_sim, ctx) = sim_context();
    let stream = Stream::new(&ctx).expect("stream");
    let a = DeviceMemory::new(&ctx, 4096).expect("alloc");
    let b = DeviceMemory::new(&ctx, 4096).expect("alloc");
    let mut start = Event::new(&ctx).expect("event");
    let mut end = Event::new(&ctx).expect("event");

    start.record_on(&stream).expect("record start");
    for _ in 0..4 {
        ctx.copy_dtod_async(b.ptr(), a.ptr(), 4096, &stream).expect("queue copy");
    }
    end.record_on(&stream).expect("record end");

    // Nothing has run yet.
    assert!(!end.query().expect("query"));
    assert!(!stream.query().expect("query"));

    end.synchronize().expect("synchronize");
    assert!(start.query().expect("query"));
    assert!(end.query().expect("query"));

    let ms = Event::elapsed(&end, &start).expect("elapsed");
    println!("elapsed: {:.3} ms", ms);
    assert!(ms >= 0.0);
    assert_eq!(end.elapsed_since(&start).expect("elapsed"), ms);
}

#[test]
fn test_timing_disabled_events() {
    let (_sim, ctx) = sim_context();
    let mut start = Event::with_flags(&ctx, EventFlags::DISABLE_TIMING).expect("event");
    let mut end = Event::with_flags(&ctx, EventFlags::DISABLE_TIMING | EventFlags::BLOCKING_SYNC)
        .expect("event");
    start.record().expect("record");
    end.record().expect("record");
    match Event::elapsed(&end, &start) {
        Err(Error::Driver(failure)) => assert_eq!(failure.code, CUDA_ERROR_INVALID_HANDLE),
        other => panic!("expected Driver, got {:?}", other),
    }
}

#[test]
fn test_stream_ordered_direct_copies() {
    let (_sim, ctx) = sim_context();
    let stream = Stream::new(&ctx).expect("stream");
    let mem = DeviceMemory::new(&ctx, 256).expect("alloc");
    let upload = HostBuffer::from_slice(&ctx, &[0x5a; 256]).expect("host buffer");
    let mut download = HostBuffer::new(&ctx, 256).expect("host buffer");
    download.fill(0);

    // SAFETY: both buffers are page-locked and live past the synchronize.
    unsafe {
        mem.upload_async(&upload, &stream).expect("queue upload");
        mem.download_async(&mut download, &stream).expect("queue download");
    }
    assert!(!stream.query().expect("query"));

    stream.synchronize().expect("synchronize");
    assert!(download.iter().all(|&b| b == 0x5a));
}

#[test]
fn test_dropping_stream_finishes_its_work() {
    let (sim, ctx) = sim_context();
    let mem = DeviceMemory::new(&ctx, 64).expect("alloc");
    let src = HostBuffer::from_slice(&ctx, &[7u8; 64]).expect("host buffer");
    {
        let stream = Stream::new(&ctx).expect("stream");
        // SAFETY: `src` outlives the stream.
        unsafe { ctx.copy_htod_async(mem.ptr(), &src, &stream) }.expect("queue");
    }
    assert_eq!(sim.stats().streams, 0);

    let mut out = [0u8; 64];
    mem.download(&mut out).expect("download");
    assert_eq!(out, [7u8; 64]);
}

#[test]
fn test_sync_primitives_released_on_drop() {
    let (sim, ctx) = sim_context();
    {
        let _s = Stream::new(&ctx).expect("stream");
        let _e = Event::new(&ctx).expect("event");
        let _h = HostBuffer::new(&ctx, 16).expect("host buffer");
        let stats = sim.stats();
        assert_eq!((stats.streams, stats.events, stats.host_buffers), (1, 1, 1));
    }
    let stats = sim.stats();
    assert_eq!((stats.streams, stats.events, stats.host_buffers), (0, 0, 0));
}

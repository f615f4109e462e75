//! Integration test: device arrays
//!
//! Derived geometry for every format, format validation, row and 2D round
//! trips (direct and stream-ordered), and array copies to and from linear
//! memory.
//!
//! Run with: cargo test --test array_test -- --nocapture

use std::sync::Arc;

use devrt::{Array, ArrayFormat, Context, DeviceMemory, EndpointKind, Error, HostBuffer, Stream};
use devrt_driver::{SimDriver, CUDA_ERROR_INVALID_VALUE};

fn sim_context() -> (Arc<SimDriver>, Context) {
    devrt_common::logging::try_init_logging();
    let sim = SimDriver::new();
    let ctx = Context::new(sim.clone(), 0).expect("context on simulated device");
    (sim, ctx)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[test]
fn test_geometry_for_all_formats() {
    let (_sim, ctx) = sim_context();
    for format in ArrayFormat::ALL {
        for channels in [1u32, 2, 4] {
            let array = Array::new(&ctx, 16, 4, format, channels).expect("array");
            assert_eq!(array.format(), format);
            assert_eq!(array.channels(), channels);
            assert_eq!(
                array.pitch(),
                array.width() * array.channels() as usize * array.element_size()
            );
            assert_eq!(array.size(), array.pitch() * array.height());
        }
    }
    assert_eq!(ArrayFormat::Half.element_size(), 2);
    assert_eq!(ArrayFormat::SignedInt8.element_size(), 1);
    assert_eq!(ArrayFormat::Float.element_size(), 4);
}

#[test]
fn test_unknown_format_is_rejected() {
    let (sim, ctx) = sim_context();
    match Array::with_raw_format(&ctx, 8, 8, 0x7f, 1) {
        Err(Error::UnknownFormat(0x7f)) => {}
        other => panic!("expected UnknownFormat, got {:?}", other.map(|a| a.size())),
    }
    assert_eq!(sim.stats().arrays, 0);

    match ArrayFormat::try_from(0x20) {
        Ok(ArrayFormat::Float) => {}
        other => panic!("expected Float, got {:?}", other),
    }
}

#[test]
fn test_invalid_channel_count() {
    let (_sim, ctx) = sim_context();
    match Array::new(&ctx, 8, 8, ArrayFormat::UnsignedInt8, 3) {
        Err(Error::Allocation(failure)) => assert_eq!(failure.code, CUDA_ERROR_INVALID_VALUE),
        other => panic!("expected Allocation, got {:?}", other.map(|a| a.size())),
    };
}

#[test]
fn test_row_upload_and_download() {
    let (_sim, ctx) = sim_context();
    // 8 texels × 4 channels × 1 byte = 32-byte rows.
    let array = Array::new(&ctx, 8, 2, ArrayFormat::UnsignedInt8, 4).expect("array");
    assert_eq!(array.pitch(), 32);

    let first = pattern(32);
    let second: Vec<u8> = first.iter().map(|b| b ^ 0xff).collect();
    array.upload(&first, 0).expect("upload row 0");
    // Texel 8 starts the second row.
    array.upload(&second, 8).expect("upload row 1");

    let mut out = vec![0u8; 32];
    array.download(&mut out, 0).expect("download row 0");
    assert_eq!(out, first);
    array.download(&mut out, 8).expect("download row 1");
    assert_eq!(out, second);

    let mut whole = vec![0u8; array.size()];
    array.download_2d(&mut whole, None).expect("download all");
    assert_eq!(&whole[..32], &first[..]);
    assert_eq!(&whole[32..], &second[..]);
}

#[test]
fn test_row_past_end_is_a_transfer_error() {
    let (_sim, ctx) = sim_context();
    let array = Array::new(&ctx, 8, 2, ArrayFormat::UnsignedInt8, 4).expect("array");
    match array.upload(&pattern(32), 9) {
        Err(Error::Transfer { src, dst, failure }) => {
            assert_eq!(src, EndpointKind::Host);
            assert_eq!(dst, EndpointKind::Array);
            println!("{}", failure);
        }
        other => panic!("expected Transfer, got {:?}", other),
    }
}

#[test]
fn test_2d_round_trip() {
    let (_sim, ctx) = sim_context();
    let array = Array::new(&ctx, 5, 3, ArrayFormat::Float, 2).expect("array");
    assert_eq!(array.pitch(), 40);
    assert_eq!(array.size(), 120);

    let data = pattern(array.size());
    array.upload_2d(&data, None).expect("upload");
    let mut back = vec![0u8; array.size()];
    array.download_2d(&mut back, None).expect("download");
    assert_eq!(back, data);
}

#[test]
fn test_texel_index_overflow_is_a_transfer_error() {
    let (_sim, ctx) = sim_context();
    let array = Array::new(&ctx, 8, 2, ArrayFormat::Float, 4).expect("array");
    match array.upload(&pattern(array.pitch()), usize::MAX) {
        Err(Error::Transfer { src, dst, failure }) => {
            assert_eq!((src, dst), (EndpointKind::Host, EndpointKind::Array));
            assert_eq!(failure.code, CUDA_ERROR_INVALID_VALUE);
        }
        other => panic!("expected Transfer, got {:?}", other),
    }
    let mut out = vec![0u8; array.pitch()];
    match array.download(&mut out, usize::MAX / 2) {
        Err(Error::Transfer { src, dst, .. }) => {
            assert_eq!((src, dst), (EndpointKind::Array, EndpointKind::Host));
        }
        other => panic!("expected Transfer, got {:?}", other),
    }
}

#[test]
fn test_2d_with_host_pitch() {
    let (_sim, ctx) = sim_context();
    let array = Array::new(&ctx, 5, 3, ArrayFormat::Float, 2).expect("array");
    let pitch = array.pitch();

    // Host rows 64 bytes apart, 40 of them used.
    let mut wide = vec![0u8; 2 * 64 + pitch];
    for row in 0..3 {
        wide[row * 64..row * 64 + pitch].copy_from_slice(&pattern(pitch));
        wide[row * 64] = row as u8;
    }
    array.upload_2d(&wide, Some(64)).expect("upload pitched host");

    let mut packed = vec![0u8; array.size()];
    array.download_2d(&mut packed, None).expect("download packed");
    for row in 0..3 {
        assert_eq!(&packed[row * pitch..(row + 1) * pitch], &wide[row * 64..row * 64 + pitch]);
    }

    let mut back = vec![0xeeu8; 2 * 64 + pitch];
    array.download_2d(&mut back, Some(64)).expect("download pitched host");
    assert!(back[pitch..64].iter().all(|&b| b == 0xee));
    assert_eq!(&back[128..128 + pitch], &wide[128..128 + pitch]);

    match array.upload_2d(&wide[..100], Some(64)) {
        Err(Error::BufferTooSmall { needed, available }) => {
            assert_eq!(needed, 2 * 64 + pitch);
            assert_eq!(available, 100);
        }
        other => panic!("expected BufferTooSmall, got {:?}", other),
    }
}

#[test]
fn test_stream_ordered_array_transfers() {
    let (_sim, ctx) = sim_context();
    let stream = Stream::new(&ctx).expect("stream");
    let array = Array::new(&ctx, 8, 2, ArrayFormat::UnsignedInt16, 2).expect("array");
    let pitch = array.pitch();
    assert_eq!(pitch, 32);

    let image = HostBuffer::from_slice(&ctx, &pattern(array.size())).expect("host buffer");
    let row = HostBuffer::from_slice(&ctx, &[0x42u8; 32]).expect("host buffer");
    let mut whole = HostBuffer::new(&ctx, array.size()).expect("host buffer");
    let mut second = HostBuffer::new(&ctx, pitch).expect("host buffer");
    whole.fill(0);
    second.fill(0);

    // SAFETY: every buffer is page-locked and outlives the synchronize below.
    unsafe {
        array.upload_2d_async(&image, None, &stream).expect("queue 2d upload");
        array.upload_async(&row, 8, &stream).expect("queue row upload");
        array.download_async(&mut second, 8, &stream).expect("queue row download");
        array.download_2d_async(&mut whole, None, &stream).expect("queue 2d download");
    }
    assert!(!stream.query().expect("query"));
    stream.synchronize().expect("synchronize");

    assert!(second.iter().all(|&b| b == 0x42));
    assert_eq!(&whole[..pitch], &image[..pitch]);
    assert!(whole[pitch..].iter().all(|&b| b == 0x42));
}

#[test]
fn test_array_and_linear_memory_copies() {
    let (_sim, ctx) = sim_context();
    let a = Array::new(&ctx, 16, 1, ArrayFormat::SignedInt32, 1).expect("array");
    let b = Array::new(&ctx, 16, 1, ArrayFormat::SignedInt32, 1).expect("array");
    let src = DeviceMemory::new(&ctx, 64).expect("alloc");
    let dst = DeviceMemory::new(&ctx, 64).expect("alloc");

    let data = pattern(64);
    src.upload(&data).expect("upload");
    ctx.copy_dtoa(&a, 0, src.ptr(), 64).expect("device to array");
    ctx.copy_atoa(&b, 0, &a, 0, 64).expect("array to array");
    ctx.copy_atod(dst.ptr(), &b, 0, 64).expect("array to device");

    let mut back = vec![0u8; 64];
    dst.download(&mut back).expect("download");
    assert_eq!(back, data);

    let mut head = [0u8; 16];
    ctx.copy_atoh(&mut head, &b, 16).expect("array to host at offset");
    assert_eq!(&head[..], &data[16..32]);
}

#[test]
fn test_arrays_destroyed_on_drop() {
    let (sim, ctx) = sim_context();
    {
        let _a = Array::new(&ctx, 32, 32, ArrayFormat::Half, 4).expect("array");
        let _b = Array::new(&ctx, 64, 0, ArrayFormat::UnsignedInt16, 1).expect("1d array");
        assert_eq!(sim.stats().arrays, 2);
    }
    assert_eq!(sim.stats().arrays, 0);
    assert_eq!(sim.stats().allocated_bytes, 0);
}

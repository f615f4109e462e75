//! Integration test: modules, parameter packing and kernel launch
//!
//! Packs argument lists and checks offsets against hand-computed layouts,
//! resolves symbols, binds textures and runs host-side kernels on the
//! simulated device.
//!
//! Run with: cargo test --test kernel_test -- --nocapture

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use devrt::{
    align_up, Array, ArrayFormat, Context, DeviceMemory, Error, KernelArg, Module, Stream,
};
use devrt_driver::{
    LaunchRecord, SimDevice, SimDriver, SimModule, CUDA_ERROR_FILE_NOT_FOUND, CUDA_ERROR_INVALID_IMAGE,
    CUDA_ERROR_INVALID_VALUE, CUDA_ERROR_NOT_FOUND, CUDA_SUCCESS,
};
use rand::Rng;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vec3 {
    x: f32,
    y: f32,
    z: f32,
}

/// `add(u32* data, int n, int delta)`: data[i] += delta for i < n.
fn add_kernel(dev: &mut SimDevice, launch: &LaunchRecord) -> i32 {
    let (Some(ptr), Some(n), Some(delta)) = (launch.read_u64(0), launch.read_i32(8), launch.read_i32(12))
    else {
        return CUDA_ERROR_INVALID_VALUE;
    };
    let len = n as usize * 4;
    let mut words = match dev.read(ptr, len) {
        Ok(bytes) => bytes.to_vec(),
        Err(code) => return code,
    };
    for chunk in words.chunks_mut(4) {
        let v = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&v.wrapping_add(delta as u32).to_ne_bytes());
    }
    match dev.write(ptr, &words) {
        Ok(()) => CUDA_SUCCESS,
        Err(code) => code,
    }
}

fn sim_context() -> (Arc<SimDriver>, Context) {
    devrt_common::logging::try_init_logging();
    let sim = SimDriver::new();
    sim.install_module(
        "kernels.cubin",
        SimModule::new()
            .with_kernel("add", add_kernel)
            .with_function("noop")
            .with_texture("tex")
            .with_global("counter", 4),
    );
    sim.install_image(b"image-v1".to_vec(), SimModule::new().with_function("noop"));
    let ctx = Context::new(sim.clone(), 0).expect("context on simulated device");
    (sim, ctx)
}

#[test]
fn test_pointer_then_ints_layout() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut func = module.function("noop").expect("function");
    let mem = DeviceMemory::new(&ctx, 16).expect("alloc");

    let offsets = func.set_params(&[
        KernelArg::Ptr(mem.ptr()),
        KernelArg::Int(1),
        KernelArg::Int(2),
        KernelArg::Int(3),
    ])
    .expect("pack");
    assert_eq!(offsets, vec![0, 8, 12, 16]);
    assert_eq!(func.parameter_size(), 20);

    let params = func.parameters();
    assert_eq!(&params[0..8], &mem.ptr().as_raw().to_ne_bytes());
    assert_eq!(&params[8..12], &1i32.to_ne_bytes());
    assert_eq!(&params[16..20], &3i32.to_ne_bytes());
}

#[test]
fn test_alignment_padding() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut func = module.function("noop").expect("function");
    let mem = DeviceMemory::new(&ctx, 16).expect("alloc");

    // int then pointer: 4 bytes of padding.
    let offsets = func
        .set_params(&[KernelArg::Int(7), KernelArg::Ptr(mem.ptr())])
        .expect("pack");
    assert_eq!(offsets, vec![0, 8]);
    assert_eq!(func.parameter_size(), 16);

    let bytes = [1u8, 2, 3];
    let offsets = func.set_params(&[
        KernelArg::Int(1),
        KernelArg::Bytes { data: &bytes, align: 1 },
        KernelArg::Float(0.5),
    ])
    .expect("pack");
    assert_eq!(offsets, vec![0, 4, 8]);
    assert_eq!(func.parameter_size(), 12);

    let v = Vec3 { x: 1.0, y: 2.0, z: 3.0 };
    let offsets = func
        .set_params(&[KernelArg::Int(1), KernelArg::pod(&v), KernelArg::from(mem.ptr())])
        .expect("pack");
    assert_eq!(offsets, vec![0, 4, 16]);
    assert_eq!(func.parameter_size(), 24);
    assert_eq!(&func.parameters()[4..16], bytemuck::bytes_of(&v));
}

#[test]
fn test_random_argument_lists_match_manual_layout() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut func = module.function("noop").expect("function");
    let mem = DeviceMemory::new(&ctx, 16).expect("alloc");
    let blob = [0xa5u8; 16];
    let mut rng = rand::thread_rng();

    for _ in 0..100 {
        let count = rng.gen_range(1..=10);
        let args: Vec<KernelArg<'_>> = (0..count)
            .map(|_| match rng.gen_range(0..4) {
                0 => KernelArg::Int(rng.gen()),
                1 => KernelArg::Float(rng.gen()),
                2 => KernelArg::Ptr(mem.ptr()),
                _ => KernelArg::Bytes {
                    data: &blob[..rng.gen_range(1..=16)],
                    align: [1, 2, 4, 8, 16][rng.gen_range(0..5)],
                },
            })
            .collect();

        let mut expected = Vec::new();
        let mut offset = 0usize;
        for arg in &args {
            let (size, align) = match arg {
                KernelArg::Int(_) | KernelArg::Float(_) => (4, 4),
                KernelArg::Ptr(_) => (8, 8),
                KernelArg::Bytes { data, align } => (data.len(), *align),
            };
            offset = (offset + align - 1) / align * align;
            expected.push(offset);
            offset += size;
        }

        assert_eq!(func.set_params(&args).expect("pack"), expected);
        assert_eq!(func.parameter_size(), offset);
    }
    assert_eq!(align_up(13, 8), Some(16));
    assert_eq!(align_up(16, 8), Some(16));
}

#[test]
fn test_alignment_must_be_power_of_two() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut func = module.function("noop").expect("function");
    func.set_params(&[KernelArg::Int(9)]).expect("pack");

    let bytes = [1u8, 2, 3];
    for align in [0, 3, 6, 12] {
        match func.set_params(&[KernelArg::Int(1), KernelArg::Bytes { data: &bytes, align }]) {
            Err(Error::InvalidParameter { offset, reason }) => {
                assert_eq!(offset, 4);
                println!("align {}: {}", align, reason);
            }
            other => panic!("expected InvalidParameter, got {:?}", other),
        }
    }
    // A rejected list leaves the previous parameters in place.
    assert_eq!(func.parameter_size(), 4);
    assert_eq!(func.parameters(), &9i32.to_ne_bytes());

    assert_eq!(align_up(4, 3), None);
    assert_eq!(align_up(4, 0), None);
    assert_eq!(align_up(usize::MAX - 2, 8), None);
}

#[test]
fn test_parameter_offset_overflow() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut func = module.function("noop").expect("function");
    match func.set_i32(usize::MAX - 1, 7) {
        Err(Error::InvalidParameter { offset, .. }) => assert_eq!(offset, usize::MAX - 1),
        other => panic!("expected InvalidParameter, got {:?}", other),
    }
    func.set_i32(4, 7).expect("in range");
    func.set_parameter_size(8);
    assert_eq!(&func.parameters()[4..8], &7i32.to_ne_bytes());
}

#[test]
fn test_module_load_errors() {
    let (_sim, ctx) = sim_context();
    match Module::load(&ctx, "missing.cubin") {
        Err(Error::ModuleLoad { path, failure }) => {
            assert_eq!(path, "missing.cubin");
            assert_eq!(failure.code, CUDA_ERROR_FILE_NOT_FOUND);
            let message = Error::ModuleLoad { path, failure }.to_string();
            assert_eq!(message, "Can't load module: file not found (missing.cubin)");
        }
        Err(other) => panic!("expected ModuleLoad, got {:?}", other),
        Ok(_) => panic!("expected ModuleLoad, got a module"),
    }
    match Module::load_data(&ctx, b"garbage") {
        Err(Error::ModuleLoad { failure, .. }) => assert_eq!(failure.code, CUDA_ERROR_INVALID_IMAGE),
        Err(other) => panic!("expected ModuleLoad, got {:?}", other),
        Ok(_) => panic!("expected ModuleLoad, got a module"),
    }
    let module = Module::load_data(&ctx, b"image-v1").expect("in-memory module");
    assert!(module.function("noop").is_ok());
}

#[test]
fn test_symbol_not_found() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    assert_eq!(module.path(), "kernels.cubin");

    for result in [
        module.function("nope").map(|_| ()),
        module.texture("nope").map(|_| ()),
        module.global("nope").map(|_| ()),
    ] {
        match result {
            Err(Error::SymbolNotFound { name, failure }) => {
                assert_eq!(name, "nope");
                assert_eq!(failure.code, CUDA_ERROR_NOT_FOUND);
            }
            other => panic!("expected SymbolNotFound, got {:?}", other),
        }
    }
}

#[test]
fn test_launch_runs_kernel() {
    let (sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut add = module.function("add").expect("function");
    let mem = DeviceMemory::new(&ctx, 64).expect("alloc");
    mem.set32(10).expect("fill");

    add.set_block_shape(16, 1, 1);
    add.set_shared_size(128);
    add.set_params(&[KernelArg::Ptr(mem.ptr()), KernelArg::Int(16), KernelArg::Int(5)])
        .expect("pack");
    // SAFETY: the layout matches `add_kernel` and `mem` holds 16 words.
    unsafe { add.launch_grid(2, 1) }.expect("launch");

    let mut out = [0u8; 64];
    mem.download(&mut out).expect("download");
    assert!(out.chunks(4).all(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]) == 15));

    let launches = sim.launches();
    let last = launches.last().expect("recorded launch");
    assert_eq!(last.function, "add");
    assert_eq!(last.grid, [2, 1, 1]);
    assert_eq!(last.block, [16, 1, 1]);
    assert_eq!(last.shared_mem_bytes, 128);
    assert_eq!(last.params.len(), 16);

    // Handle-scoped state carries over to the next launch.
    unsafe { add.launch() }.expect("launch");
    let launches = sim.launches();
    let last = launches.last().expect("recorded launch");
    assert_eq!(last.grid, [1, 1, 1]);
    assert_eq!(last.block, [16, 1, 1]);
}

#[test]
fn test_async_launch_waits_for_stream() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut add = module.function("add").expect("function");
    let stream = Stream::new(&ctx).expect("stream");
    let mem = DeviceMemory::new(&ctx, 16).expect("alloc");
    mem.set32(1).expect("fill");

    add.set_params(&[KernelArg::Ptr(mem.ptr()), KernelArg::Int(4), KernelArg::Int(1)])
        .expect("pack");
    unsafe { add.launch_grid_async(1, 1, &stream) }.expect("queue launch");
    assert!(!stream.query().expect("query"));
    stream.synchronize().expect("synchronize");

    let mut out = [0u8; 16];
    mem.download(&mut out).expect("download");
    assert!(out.chunks(4).all(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]) == 2));
}

#[test]
fn test_launch_rejects_oversized_block() {
    let (_sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let mut noop = module.function("noop").expect("function");
    noop.set_block_shape(2048, 1, 1);
    match unsafe { noop.launch() } {
        Err(Error::Launch(failure)) => {
            assert_eq!(failure.code, CUDA_ERROR_INVALID_VALUE);
            assert_eq!(failure.to_string(), "Can't launch kernel: invalid argument");
        }
        other => panic!("expected Launch, got {:?}", other),
    }
}

#[test]
fn test_textures_are_per_launch() {
    let (sim, ctx) = sim_context();
    let module = Module::load(&ctx, "kernels.cubin").expect("module");
    let tex = module.texture("tex").expect("texture");
    assert_eq!(tex.name(), "tex");
    let mut noop = module.function("noop").expect("function");
    let mem = DeviceMemory::new(&ctx, 1024).expect("alloc");
    let array = Array::new(&ctx, 16, 16, ArrayFormat::Float, 1).expect("array");

    assert_eq!(tex.bind_memory(mem.ptr(), 1024).expect("bind"), 0);
    assert_eq!(tex.bind_memory(mem.ptr() + 4, 64).expect("bind"), 4);
    tex.bind_array(&array).expect("bind array");

    noop.use_texture(&tex).expect("use texture");
    unsafe { noop.launch() }.expect("launch");
    unsafe { noop.launch() }.expect("launch");

    let launches = sim.launches();
    assert_eq!(launches[launches.len() - 2].textures, vec!["tex".to_string()]);
    assert!(launches[launches.len() - 1].textures.is_empty());
}

#[test]
fn test_globals_and_unload() {
    let (sim, ctx) = sim_context();
    let baseline = sim.stats().allocations;
    {
        let module = Module::load(&ctx, "kernels.cubin").expect("module");
        let (counter, size) = module.global("counter").expect("global");
        assert_eq!(size, 4);
        ctx.copy_htod(counter, &42u32.to_ne_bytes()).expect("write global");
        let mut out = [0u8; 4];
        ctx.copy_dtoh(&mut out, counter).expect("read global");
        assert_eq!(u32::from_ne_bytes(out), 42);
        assert_eq!(sim.stats().modules, 1);
    }
    assert_eq!(sim.stats().modules, 0);
    assert_eq!(sim.stats().allocations, baseline);
}

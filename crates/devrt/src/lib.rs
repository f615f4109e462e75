//! Host-side GPU runtime: device memory, arrays, copies, streams, events and
//! kernel launch.
//!
//! Everything starts from a [`Context`]. Resources borrow it and release
//! their driver objects on drop; release failures are logged, never raised.
//!
//! ```ignore
//! let ctx = Context::from_config(&DevrtConfig::load_or_default(default_config_path()))?;
//! let mem = DeviceMemory::new(&ctx, 1024)?;
//! mem.upload(&[0u8; 1024])?;
//!
//! let module = Module::load(&ctx, "kernels.cubin")?;
//! let mut scale = module.function("scale")?;
//! scale.set_params(&[KernelArg::Ptr(mem.ptr()), KernelArg::Float(2.0)])?;
//! scale.set_block_shape(256, 1, 1);
//! unsafe { scale.launch_grid(4, 1)? };
//! ```

pub mod array;
pub mod context;
pub mod error;
pub mod event;
pub mod function;
pub mod host;
pub mod memcpy2d;
pub mod memory;
pub mod module;
pub mod pointer;
pub mod stream;
pub mod texture;
pub mod transfer;

pub use array::{Array, ArrayFormat};
pub use context::{Context, PITCH_ELEMENT_SIZES};
pub use error::{check, warn, Error, Failure, Result};
pub use event::{Event, EventFlags};
pub use function::{align_up, Function, KernelArg};
pub use host::HostBuffer;
pub use memcpy2d::Memcpy2D;
pub use memory::{DeviceMemory, DeviceMemory2D};
pub use module::Module;
pub use pointer::DevicePtr;
pub use stream::{Stream, StreamFlags};
pub use texture::TextureReference;
pub use transfer::{Destination, EndpointKind, Source};

pub use devrt_common::init_logging;
pub use devrt_core::{default_config_path, Backend, DevrtConfig};
pub use devrt_driver::Driver;

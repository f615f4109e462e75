//! Loaded kernel images and symbol lookup.

use std::path::Path;

use devrt_driver::{CUmodule, CUresult};
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{warn, Error, Failure, Result};
use crate::function::Function;
use crate::pointer::DevicePtr;
use crate::texture::TextureReference;

const IN_MEMORY: &str = "<in-memory image>";

pub struct Module<'c> {
    ctx: &'c Context,
    handle: CUmodule,
    path: String,
}

impl<'c> Module<'c> {
    /// Load a compiled kernel image from disk.
    pub fn load(ctx: &'c Context, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let handle = ctx.driver().module_load(&path).map_err(|code| Error::ModuleLoad {
            path: path.clone(),
            failure: Failure::new("Can't load module", code),
        })?;
        info!(path = %path, "module loaded");
        Ok(Self { ctx, handle, path })
    }

    /// Load a kernel image already in memory.
    pub fn load_data(ctx: &'c Context, image: &[u8]) -> Result<Self> {
        let handle = ctx
            .driver()
            .module_load_data(image)
            .map_err(|code| Error::ModuleLoad {
                path: IN_MEMORY.to_string(),
                failure: Failure::new("Can't load module", code),
            })?;
        debug!(bytes = image.len(), "module loaded from memory");
        Ok(Self {
            ctx,
            handle,
            path: IN_MEMORY.to_string(),
        })
    }

    /// Where the module came from.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn symbol_error(name: &str, context: &'static str) -> impl FnOnce(CUresult) -> Error {
        let name = name.to_string();
        move |code| Error::SymbolNotFound {
            name,
            failure: Failure::new(context, code),
        }
    }

    pub fn function(&self, name: &str) -> Result<Function<'_>> {
        let handle = self
            .ctx
            .driver()
            .module_get_function(self.handle, name)
            .map_err(Self::symbol_error(name, "Can't get function"))?;
        Ok(Function::new(self.ctx, handle, name))
    }

    pub fn texture(&self, name: &str) -> Result<TextureReference<'_>> {
        let handle = self
            .ctx
            .driver()
            .module_get_tex_ref(self.handle, name)
            .map_err(Self::symbol_error(name, "Can't get texture reference"))?;
        Ok(TextureReference::new(self.ctx, handle, name))
    }

    /// Address and size of a module-scope global.
    pub fn global(&self, name: &str) -> Result<(DevicePtr, usize)> {
        let (ptr, size) = self
            .ctx
            .driver()
            .module_get_global(self.handle, name)
            .map_err(Self::symbol_error(name, "Can't get global"))?;
        Ok((DevicePtr::from_raw(ptr), size))
    }
}

impl Drop for Module<'_> {
    fn drop(&mut self) {
        warn(self.ctx.driver().module_unload(self.handle), "Can't unload module");
    }
}

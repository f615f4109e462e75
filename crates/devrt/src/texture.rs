use devrt_driver::{CUtexref, CU_TRSA_OVERRIDE_FORMAT};

use crate::array::Array;
use crate::context::Context;
use crate::error::{check, fail, Result};
use crate::pointer::DevicePtr;

/// A texture slot of a loaded module.
///
/// The module owns the underlying reference, so dropping this handle issues
/// no driver call.
pub struct TextureReference<'m> {
    ctx: &'m Context,
    handle: CUtexref,
    name: String,
}

impl<'m> TextureReference<'m> {
    pub(crate) fn new(ctx: &'m Context, handle: CUtexref, name: &str) -> Self {
        Self {
            ctx,
            handle,
            name: name.to_string(),
        }
    }

    pub(crate) fn handle(&self) -> CUtexref {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind `size` bytes of linear memory at `ptr`.
    ///
    /// Returns the byte offset kernels must add to their fetch index when
    /// `ptr` is not aligned to the texture alignment.
    pub fn bind_memory(&self, ptr: DevicePtr, size: usize) -> Result<usize> {
        Ok(self
            .ctx
            .driver()
            .tex_ref_set_address(self.handle, ptr.as_raw(), size)
            .map_err(fail("Can't bind texture to memory"))?)
    }

    /// Bind an array, taking its format over the reference's declared one.
    pub fn bind_array(&self, array: &Array<'_>) -> Result<()> {
        check(
            self.ctx
                .driver()
                .tex_ref_set_array(self.handle, array.handle(), CU_TRSA_OVERRIDE_FORMAT),
            "Can't bind texture to array",
        )?;
        Ok(())
    }
}

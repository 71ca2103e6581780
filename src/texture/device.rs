//! The device seam of the texture backend.
//!
//! A [`Device`] owns texture memory and compiled programs. Everything above
//! it (program cache, handler, operators) talks in [`TextureId`] and
//! [`ProgramId`] handles and never sees device objects.
//!
//! Dispatch may complete asynchronously; [`Device::read`] is the completion
//! barrier and always observes every dispatch issued before it.

use crate::error::Result;
use crate::layout::TextureLayout;
use crate::shader::ShaderModule;

use super::arena::Handle;

/// Handle of a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) Handle);

/// Handle of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub(crate) Handle);

impl TextureId {
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0.index()
    }
}

impl ProgramId {
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0.index()
    }
}

/// Uniform values in the order the program declares them.
pub type Uniforms = [f32];

/// Texture memory plus program execution.
pub trait Device {
    /// Short device name for logs.
    fn name(&self) -> &str;

    /// Largest texture width or height the device accepts.
    fn max_texture_size(&self) -> usize;

    /// Allocates a zeroed texture for `layout`.
    ///
    /// # Errors
    /// [`crate::Error::TextureTooLarge`] or [`crate::Error::Device`].
    fn create_texture(&mut self, layout: &TextureLayout) -> Result<TextureId>;

    /// Replaces the texture contents with `texels` (texel-channel order).
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`] or a length mismatch.
    fn upload(&mut self, texture: TextureId, texels: &[f32]) -> Result<()>;

    /// Reads the texture back in texel-channel order, waiting for pending
    /// dispatches.
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`] or [`crate::Error::Device`].
    fn read(&mut self, texture: TextureId) -> Result<Vec<f32>>;

    /// Frees a texture. Releasing twice is a stale-handle error.
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`].
    fn release_texture(&mut self, texture: TextureId) -> Result<()>;

    /// Compiles a program from its IR and rendered source.
    ///
    /// # Errors
    /// [`crate::Error::ShaderValidation`] when the device rejects the source.
    fn compile(&mut self, module: &ShaderModule, source: &str) -> Result<ProgramId>;

    /// Runs `program` over every texel of `output`.
    ///
    /// # Errors
    /// Stale handles or layouts that differ from the program's bindings.
    fn dispatch(
        &mut self,
        program: ProgramId,
        inputs: &[TextureId],
        output: TextureId,
        uniforms: &Uniforms,
    ) -> Result<()>;

    /// Frees a compiled program.
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`].
    fn release_program(&mut self, program: ProgramId) -> Result<()>;

    /// Number of live textures.
    fn live_textures(&self) -> usize;
}

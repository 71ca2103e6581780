//! Host-memory texture device.
//!
//! Textures are `Vec<f32>` buffers in texel-channel order and programs are
//! validated [`ShaderModule`]s run by the evaluator. Behaviour matches a GPU
//! device bit-for-bit on everything the generated programs do, which makes
//! this the device the test suite runs on.

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::layout::{Packing, TextureLayout};
use crate::shader::{ShaderModule, eval};

use super::arena::Arena;
use super::device::{Device, ProgramId, TextureId, Uniforms};

struct HostTexture {
    layout: TextureLayout,
    texels: Vec<f32>,
}

/// CPU emulation of a texture device.
pub struct HostDevice {
    max_texture_size: usize,
    textures: Arena<HostTexture>,
    programs: Arena<ShaderModule>,
}

impl HostDevice {
    #[must_use]
    pub const fn new(max_texture_size: usize) -> Self {
        Self {
            max_texture_size,
            textures: Arena::new(),
            programs: Arena::new(),
        }
    }

    fn texture(&self, id: TextureId) -> Result<&HostTexture> {
        self.textures.get(id.0).ok_or(Error::StaleHandle {
            kind: "texture",
            index: id.index(),
        })
    }
}

impl Device for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn max_texture_size(&self) -> usize {
        self.max_texture_size
    }

    fn create_texture(&mut self, layout: &TextureLayout) -> Result<TextureId> {
        layout.check_fits(self.max_texture_size)?;
        let len = layout.texels() * layout.packing().channels();
        let id = TextureId(self.textures.insert(HostTexture {
            layout: layout.clone(),
            texels: vec![0.0; len],
        }));
        debug!(
            "host texture {} allocated: {}x{} {:?}",
            id.index(),
            layout.width(),
            layout.height(),
            layout.packing()
        );
        Ok(id)
    }

    fn upload(&mut self, texture: TextureId, texels: &[f32]) -> Result<()> {
        let slot = self.textures.get_mut(texture.0).ok_or(Error::StaleHandle {
            kind: "texture",
            index: texture.index(),
        })?;
        if slot.texels.len() != texels.len() {
            return Err(Error::Device(format!(
                "upload of {} values into a texture of {}",
                texels.len(),
                slot.texels.len()
            )));
        }
        slot.texels.copy_from_slice(texels);
        Ok(())
    }

    fn read(&mut self, texture: TextureId) -> Result<Vec<f32>> {
        Ok(self.texture(texture)?.texels.clone())
    }

    fn release_texture(&mut self, texture: TextureId) -> Result<()> {
        self.textures.remove(texture.0).ok_or(Error::StaleHandle {
            kind: "texture",
            index: texture.index(),
        })?;
        debug!("host texture {} released", texture.index());
        Ok(())
    }

    fn compile(&mut self, module: &ShaderModule, _source: &str) -> Result<ProgramId> {
        module.validate()?;
        Ok(ProgramId(self.programs.insert(module.clone())))
    }

    fn dispatch(
        &mut self,
        program: ProgramId,
        inputs: &[TextureId],
        output: TextureId,
        uniforms: &Uniforms,
    ) -> Result<()> {
        let module = self.programs.get(program.0).ok_or(Error::StaleHandle {
            kind: "program",
            index: program.index(),
        })?;
        if inputs.len() != module.inputs.len() {
            return Err(Error::Device(format!(
                "`{}` binds {} inputs, dispatch supplied {}",
                module.label,
                module.inputs.len(),
                inputs.len()
            )));
        }
        let mut buffers = Vec::with_capacity(inputs.len());
        for (binding, &id) in module.inputs.iter().zip(inputs) {
            let texture = self.texture(id)?;
            if texture.layout != binding.layout {
                return Err(Error::Device(format!(
                    "texture {} does not match binding {} of `{}`",
                    id.index(),
                    binding.name,
                    module.label
                )));
            }
            buffers.push(texture.texels.as_slice());
        }
        let target = self.texture(output)?;
        if target.layout != module.output || target.layout.packing() != Packing::Unpacked {
            return Err(Error::Device(format!(
                "texture {} cannot receive the output of `{}`",
                output.index(),
                module.label
            )));
        }
        trace!(
            "host dispatch `{}` over {} texels",
            module.label,
            module.output.texels()
        );
        let texels = eval::evaluate(module, &buffers, uniforms)?;
        if let Some(slot) = self.textures.get_mut(output.0) {
            slot.texels = texels;
        }
        Ok(())
    }

    fn release_program(&mut self, program: ProgramId) -> Result<()> {
        self.programs.remove(program.0).ok_or(Error::StaleHandle {
            kind: "program",
            index: program.index(),
        })?;
        Ok(())
    }

    fn live_textures(&self) -> usize {
        self.textures.len()
    }
}

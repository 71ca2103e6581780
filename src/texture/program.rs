//! Program info, run data and the program manager.
//!
//! [`ProgramInfo`] is the device-free description of one unit of work: the
//! generated module, its rendered source and the layouts it binds.
//! [`RunData`] is the concrete set of textures and uniform values for one
//! dispatch. The [`ProgramManager`] turns the former into compiled programs,
//! caches them by source, and executes them against the latter.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::layout::TextureLayout;
use crate::shader::ShaderModule;
use crate::tensors::DataType;

use super::device::{Device, ProgramId, TextureId};

/// Everything needed to compile and bind one generated program.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramInfo {
    pub label: String,
    /// The program supplies its own texel-level entry instead of `process`.
    pub has_main: bool,
    pub input_layouts: Vec<TextureLayout>,
    pub output_layout: TextureLayout,
    pub shader_source: String,
    pub module: ShaderModule,
}

impl ProgramInfo {
    /// Validates `module` and renders its source.
    ///
    /// # Errors
    /// [`Error::ShaderValidation`] for malformed generated IR.
    pub fn new(module: ShaderModule) -> Result<Self> {
        module.validate()?;
        Ok(Self {
            label: module.label.clone(),
            has_main: module.has_main(),
            input_layouts: module.input_layouts(),
            output_layout: module.output.clone(),
            shader_source: module.to_wgsl(),
            module,
        })
    }
}

/// A device texture together with the layout and element type it encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub layout: TextureLayout,
    pub texture: TextureId,
    pub data_type: DataType,
}

/// Resources of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RunData {
    pub inputs: Vec<TextureData>,
    /// Freshly allocated; owned by the caller after the dispatch.
    pub output: TextureData,
    pub uniforms: Vec<(String, f32)>,
}

struct CachedProgram {
    source: String,
    program: ProgramId,
    last_used: u64,
}

/// Compile/hit counters of a [`ProgramManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramStats {
    pub compiled: u64,
    pub hits: u64,
    pub evicted: u64,
    pub cached: usize,
}

/// Compiles, caches and runs programs on a device.
///
/// The cache is keyed by a 64-bit hash of the source; the stored source is
/// compared on lookup so a collision recompiles instead of running the wrong
/// program. When full, the least recently used program is released.
pub struct ProgramManager {
    capacity: usize,
    tick: u64,
    cache: HashMap<u64, CachedProgram>,
    stats: ProgramStats,
}

fn source_key(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

impl ProgramManager {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            cache: HashMap::new(),
            stats: ProgramStats::default(),
        }
    }

    /// Returns the compiled program for `info`, compiling on a miss.
    ///
    /// # Errors
    /// [`Error::ShaderValidation`] when the device rejects the source.
    pub fn program(&mut self, device: &mut dyn Device, info: &ProgramInfo) -> Result<ProgramId> {
        self.tick += 1;
        let key = source_key(&info.shader_source);
        if let Some(cached) = self.cache.get_mut(&key) {
            if cached.source == info.shader_source {
                cached.last_used = self.tick;
                self.stats.hits += 1;
                trace!("program cache hit for `{}` ({key:016x})", info.label);
                return Ok(cached.program);
            }
            debug!("program cache collision on {key:016x}, recompiling `{}`", info.label);
            if let Some(stale) = self.cache.remove(&key) {
                device.release_program(stale.program)?;
            }
        }
        if self.cache.len() >= self.capacity {
            self.evict_lru(device)?;
        }
        debug!(
            "compiling `{}` ({key:016x}) for output {}x{}",
            info.label,
            info.output_layout.width(),
            info.output_layout.height()
        );
        let program = device.compile(&info.module, &info.shader_source)?;
        self.stats.compiled += 1;
        self.cache.insert(
            key,
            CachedProgram {
                source: info.shader_source.clone(),
                program,
                last_used: self.tick,
            },
        );
        Ok(program)
    }

    fn evict_lru(&mut self, device: &mut dyn Device) -> Result<()> {
        let oldest = self
            .cache
            .iter()
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(&key, _)| key);
        if let Some(cached) = oldest.and_then(|key| self.cache.remove(&key)) {
            self.stats.evicted += 1;
            debug!("evicting program {}", cached.program.index());
            device.release_program(cached.program)?;
        }
        Ok(())
    }

    /// Compiles (or reuses) the program for `info` and dispatches it.
    ///
    /// Uniforms are bound in the order the module declares them.
    ///
    /// # Errors
    /// Compilation errors, missing uniforms and device dispatch failures.
    pub fn run(&mut self, device: &mut dyn Device, info: &ProgramInfo, run: &RunData) -> Result<()> {
        let program = self.program(device, info)?;
        let uniforms = info
            .module
            .uniforms
            .iter()
            .map(|name| {
                run.uniforms
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|&(_, v)| v)
                    .ok_or_else(|| Error::Internal(format!("`{}` is missing uniform `{name}`", info.label)))
            })
            .collect::<Result<Vec<f32>>>()?;
        let inputs: Vec<TextureId> = run.inputs.iter().map(|t| t.texture).collect();
        device.dispatch(program, &inputs, run.output.texture, &uniforms)
    }

    /// Releases every cached program.
    ///
    /// # Errors
    /// [`Error::StaleHandle`] if the device lost track of a program.
    pub fn clear(&mut self, device: &mut dyn Device) -> Result<()> {
        for (_, cached) in self.cache.drain() {
            device.release_program(cached.program)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> ProgramStats {
        ProgramStats {
            cached: self.cache.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Packing;
    use crate::shader::ir::{Stmt, index, sample, uniform};
    use crate::texture::host::HostDevice;

    fn layout(shape: &[usize]) -> TextureLayout {
        TextureLayout::new(shape, Packing::Unpacked, 64).unwrap()
    }

    fn scale(n: usize) -> ProgramInfo {
        let module = ShaderModule::indexed(
            "scale",
            vec![layout(&[n])],
            layout(&[n]),
            vec![Stmt::Return(sample(0, index(0)) * uniform("factor"))],
        )
        .with_uniform("factor");
        ProgramInfo::new(module).unwrap()
    }

    #[test]
    fn identical_source_hits_the_cache() {
        let mut device = HostDevice::new(64);
        let mut manager = ProgramManager::new(4);
        let a = manager.program(&mut device, &scale(3)).unwrap();
        let b = manager.program(&mut device, &scale(3)).unwrap();
        assert_eq!(a, b);
        let stats = manager.stats();
        assert_eq!((stats.compiled, stats.hits, stats.cached), (1, 1, 1));
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut device = HostDevice::new(64);
        let mut manager = ProgramManager::new(2);
        let first = manager.program(&mut device, &scale(1)).unwrap();
        manager.program(&mut device, &scale(2)).unwrap();
        manager.program(&mut device, &scale(1)).unwrap();
        manager.program(&mut device, &scale(3)).unwrap();
        assert_eq!(manager.stats().evicted, 1);
        // scale(1) was touched last, so scale(2) went
        assert_eq!(manager.program(&mut device, &scale(1)).unwrap(), first);
        assert_eq!(manager.stats().compiled, 3);
    }

    #[test]
    fn run_binds_uniforms_by_name() {
        let mut device = HostDevice::new(64);
        let mut manager = ProgramManager::new(4);
        let info = scale(2);
        let input = device.create_texture(&layout(&[2])).unwrap();
        let output = device.create_texture(&layout(&[2])).unwrap();
        device.upload(input, &[1.5, -2.0]).unwrap();
        let data = |texture| TextureData {
            layout: layout(&[2]),
            texture,
            data_type: DataType::Float32,
        };
        let mut run = RunData {
            inputs: vec![data(input)],
            output: data(output),
            uniforms: vec![],
        };
        assert!(matches!(manager.run(&mut device, &info, &run), Err(Error::Internal(_))));
        run.uniforms.push(("factor".into(), 2.0));
        manager.run(&mut device, &info, &run).unwrap();
        assert_eq!(device.read(output).unwrap(), vec![3.0, -4.0]);
    }
}

//! # Texture Backend
//!
//! Executes operators as generated shader programs over tensors stored in 2D
//! textures.
//!
//! ## Layers
//!
//! - [`arena`]: generational handles for device resources
//! - [`device`]: the [`Device`] trait
//! - [`host`]: [`HostDevice`], textures in host memory, programs run by the
//!   shader evaluator
//! - `wgpu` (feature `wgpu`): `WgpuDevice`, a real GPU
//! - [`program`]: [`ProgramInfo`], [`RunData`] and the caching
//!   [`ProgramManager`]
//! - [`handler`]: the [`InferenceHandler`] owning device, caches and
//!   readback
//! - [`operators`]: the three-phase [`TextureOperator`] contract and the
//!   kind→implementation table
//!
//! ## Example
//!
//! ```rust
//! use briny_texel::backend::Backend;
//! use briny_texel::config::GpuOptions;
//! use briny_texel::ops::{Operator, Pad};
//! use briny_texel::tensors::Tensor;
//! use briny_texel::texture::TextureBackend;
//!
//! let options = GpuOptions { prefer_gpu_device: false, ..GpuOptions::default() };
//! let mut backend = TextureBackend::new(&options, false).unwrap();
//! let pad = Operator::Pad(Pad::new("reflect", vec![2, 2], 0.0).unwrap());
//! let out = backend.run(&pad, &[Tensor::new(vec![3], vec![1.0, 2.0, 3.0])]).unwrap();
//! assert_eq!(out[0].as_f32().unwrap(), &[3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
//! ```

pub mod arena;
pub mod device;
pub mod handler;
pub mod host;
pub mod operators;
pub mod program;
#[cfg(feature = "wgpu")]
pub mod wgpu;

use log::{info, trace};

use crate::backend::{Backend, BackendKind};
use crate::config::GpuOptions;
use crate::error::{Error, Result};
use crate::ops::{OpKind, Operator};
use crate::tensors::Tensor;

pub use self::device::{Device, ProgramId, TextureId};
pub use self::handler::InferenceHandler;
pub use self::host::HostDevice;
pub use self::operators::TextureOperator;
pub use self::program::{ProgramInfo, ProgramManager, ProgramStats, RunData, TextureData};

/// The texture backend (`webgl` hint).
#[derive(Debug)]
pub struct TextureBackend {
    handler: InferenceHandler,
}

impl TextureBackend {
    /// Opens a GPU device when one is compiled in, preferred and present,
    /// and a [`HostDevice`] otherwise.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] for unusable options.
    pub fn new(options: &GpuOptions, debug: bool) -> Result<Self> {
        if options.max_texture_size == 0 || options.program_cache_capacity == 0 {
            return Err(Error::InvalidConfig(
                "texture backend needs a positive texture size and program cache".into(),
            ));
        }
        #[cfg(feature = "wgpu")]
        if options.prefer_gpu_device {
            match self::wgpu::WgpuDevice::new() {
                Ok(device) => return Ok(Self::with_device(Box::new(device), options, debug)),
                Err(e) => log::warn!("texture backend falls back to the host device: {e}"),
            }
        }
        Ok(Self::with_device(
            Box::new(HostDevice::new(options.max_texture_size)),
            options,
            debug,
        ))
    }

    /// Builds the backend over an explicit device.
    #[must_use]
    pub fn with_device(device: Box<dyn Device>, options: &GpuOptions, debug: bool) -> Self {
        info!("texture backend on device `{}`", device.name());
        Self {
            handler: InferenceHandler::new(device, *options, debug),
        }
    }

    #[must_use]
    pub const fn handler(&self) -> &InferenceHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut InferenceHandler {
        &mut self.handler
    }
}

impl Backend for TextureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Texture
    }

    fn supports(&self, kind: OpKind) -> bool {
        operators::supports(kind)
    }

    fn run(&mut self, op: &Operator, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let imp = operators::texture_operator(op).ok_or_else(|| Error::UnsupportedOperator {
            op: op.name().to_owned(),
            backend: BackendKind::Texture.name().to_owned(),
        })?;
        trace!("texture backend runs {}", op.name());
        imp.run(&mut self.handler, inputs)
    }

    fn end_run(&mut self) -> Result<()> {
        self.handler.end_run()
    }
}

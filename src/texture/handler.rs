//! The inference handler.
//!
//! One handler per execution context. It owns the device, the program
//! manager and the texture cache, and is the only place where tensors turn
//! into textures and back. Operators borrow it for the three phases of a
//! call; nothing else holds device handles.
//!
//! Cached texture data is keyed by `(TensorId, LayoutKey)`: the same tensor
//! may be resident under several layouts (packed input, unpacked output) at
//! once. Output textures are registered under the id of the tensor they were
//! materialized into, so feeding that tensor to the next operator reuses the
//! texture instead of uploading it again.

use std::collections::HashMap;

use log::{debug, info, trace};

use crate::config::{CacheScope, GpuOptions};
use crate::error::Result;
use crate::layout::{LayoutKey, Packing, TextureLayout};
use crate::tensors::{DataType, Tensor, TensorData, TensorId};

use super::device::Device;
use super::program::{ProgramInfo, ProgramManager, ProgramStats, RunData, TextureData};

/// Per-context façade between operators, the program manager and the device.
pub struct InferenceHandler {
    device: Box<dyn Device>,
    programs: ProgramManager,
    options: GpuOptions,
    debug: bool,
    textures: HashMap<(TensorId, LayoutKey), TextureData>,
    layouts: HashMap<TensorId, TextureLayout>,
}

impl InferenceHandler {
    #[must_use]
    pub fn new(device: Box<dyn Device>, options: GpuOptions, debug: bool) -> Self {
        Self {
            device,
            programs: ProgramManager::new(options.program_cache_capacity),
            options,
            debug,
            textures: HashMap::new(),
            layouts: HashMap::new(),
        }
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// The effective texture extent limit: the smaller of the device limit
    /// and the configured one.
    #[must_use]
    pub fn max_texture_size(&self) -> usize {
        self.device.max_texture_size().min(self.options.max_texture_size)
    }

    /// Layout used to bind `tensor` as an input: the layout it is already
    /// resident under, or a fresh one with the configured packing.
    ///
    /// # Errors
    /// Configuration errors for invalid dims.
    pub fn get_or_create_texture_layout(&self, tensor: &Tensor) -> Result<TextureLayout> {
        if let Some(layout) = self.layouts.get(&tensor.id()) {
            return Ok(layout.clone());
        }
        TextureLayout::new(tensor.dims(), self.options.packing, self.max_texture_size())
    }

    /// Unpacked layout for `dims`, the layout of every program output.
    ///
    /// # Errors
    /// Configuration errors for invalid dims.
    pub fn create_basic_texture_layout(&self, dims: &[usize]) -> Result<TextureLayout> {
        TextureLayout::new(dims, Packing::Unpacked, self.max_texture_size())
    }

    /// Texture data of `tensor` under `layout`, uploading on first use.
    ///
    /// # Errors
    /// Resource errors from allocation or upload.
    pub fn get_or_create_texture_data(&mut self, tensor: &Tensor, layout: &TextureLayout) -> Result<TextureData> {
        let key = (tensor.id(), layout.key());
        if let Some(data) = self.textures.get(&key) {
            trace!("texture cache hit for tensor {}", tensor.id().get());
            return Ok(data.clone());
        }
        let texels = layout.encode(&tensor.to_f32_vec())?;
        let texture = self.device.create_texture(layout)?;
        if let Err(e) = self.device.upload(texture, &texels) {
            self.device.release_texture(texture)?;
            return Err(e);
        }
        let data = TextureData {
            layout: layout.clone(),
            texture,
            data_type: tensor.data_type(),
        };
        debug!(
            "uploaded tensor {} {:?} into texture {}",
            tensor.id().get(),
            tensor.dims(),
            texture.index()
        );
        self.textures.insert(key, data.clone());
        self.layouts.entry(tensor.id()).or_insert_with(|| layout.clone());
        Ok(data)
    }

    /// Allocates an uncached texture for a program output.
    ///
    /// # Errors
    /// [`crate::Error::TextureTooLarge`] with the requested extent, or a device error.
    pub fn create_texture_data_from_layout(&mut self, layout: &TextureLayout, data_type: DataType) -> Result<TextureData> {
        let texture = self.device.create_texture(layout)?;
        Ok(TextureData {
            layout: layout.clone(),
            texture,
            data_type,
        })
    }

    /// Dispatches a program through the program manager.
    ///
    /// # Errors
    /// Compilation and dispatch errors.
    pub fn run_program(&mut self, info: &ProgramInfo, run: &RunData) -> Result<()> {
        if self.debug {
            info!("program `{}`:\n{}", info.label, info.shader_source);
        }
        self.programs.run(self.device.as_mut(), info, run)
    }

    /// Reads texture data back as row-major element values.
    ///
    /// # Errors
    /// Device read errors.
    pub fn read_texture_data(&mut self, data: &TextureData) -> Result<Vec<f32>> {
        let texels = self.device.read(data.texture)?;
        data.layout.decode(&texels)
    }

    /// Reads `data` back into a new tensor and keeps the texture cached
    /// under that tensor's id.
    ///
    /// # Errors
    /// Device read errors.
    pub fn materialize(&mut self, data: TextureData) -> Result<Tensor> {
        let values = self.read_texture_data(&data)?;
        let tensor = Tensor::from_data(
            data.layout.shape(),
            TensorData::from_f32(data.data_type, values),
        )?;
        self.register(&tensor, data);
        Ok(tensor)
    }

    /// Caches `data` as the device copy of `tensor`. The entry lives until
    /// [`Self::release`] or, under [`CacheScope::Run`], the next
    /// [`Self::end_run`]; under [`CacheScope::Process`] the cache is unbounded.
    pub fn register(&mut self, tensor: &Tensor, data: TextureData) {
        self.layouts.entry(tensor.id()).or_insert_with(|| data.layout.clone());
        self.textures.insert((tensor.id(), data.layout.key()), data);
    }

    /// Frees an uncached texture, e.g. the output of a failed dispatch.
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`].
    pub fn release_texture_data(&mut self, data: &TextureData) -> Result<()> {
        self.device.release_texture(data.texture)
    }

    /// Drops every device copy of tensor `id`.
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`] if a cached texture was already freed.
    pub fn release(&mut self, id: TensorId) -> Result<()> {
        self.layouts.remove(&id);
        let keys: Vec<_> = self.textures.keys().filter(|(t, _)| *t == id).cloned().collect();
        for key in keys {
            if let Some(data) = self.textures.remove(&key) {
                self.device.release_texture(data.texture)?;
            }
        }
        Ok(())
    }

    /// Run boundary: with [`CacheScope::Run`] every cached texture is freed.
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`] if a cached texture was already freed.
    pub fn end_run(&mut self) -> Result<()> {
        if self.options.texture_cache != CacheScope::Run {
            return Ok(());
        }
        debug!("end of run, releasing {} textures", self.textures.len());
        self.layouts.clear();
        let mut failure = None;
        for (_, data) in self.textures.drain() {
            if let Err(e) = self.device.release_texture(data.texture) {
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Releases every cached texture and program regardless of scope.
    ///
    /// # Errors
    /// [`crate::Error::StaleHandle`] if a resource was already freed.
    pub fn clear(&mut self) -> Result<()> {
        self.layouts.clear();
        for (_, data) in self.textures.drain() {
            self.device.release_texture(data.texture)?;
        }
        self.programs.clear(self.device.as_mut())
    }

    /// Number of cached `(tensor, layout)` texture entries.
    #[must_use]
    pub fn cached_textures(&self) -> usize {
        self.textures.len()
    }

    /// Number of textures alive on the device.
    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.device.live_textures()
    }

    #[must_use]
    pub fn program_stats(&self) -> ProgramStats {
        self.programs.stats()
    }

    /// Whether `tensor` is resident under `layout`.
    #[must_use]
    pub fn is_resident(&self, tensor: &Tensor, layout: &TextureLayout) -> bool {
        self.textures.contains_key(&(tensor.id(), layout.key()))
    }
}

impl core::fmt::Debug for InferenceHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InferenceHandler")
            .field("device", &self.device.name())
            .field("cached_textures", &self.textures.len())
            .field("programs", &self.programs.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::texture::host::HostDevice;

    fn handler(options: GpuOptions) -> InferenceHandler {
        InferenceHandler::new(Box::new(HostDevice::new(options.max_texture_size)), options, false)
    }

    #[test]
    fn uploads_once_per_tensor_and_layout() {
        let mut h = handler(GpuOptions::default());
        let t = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let layout = h.get_or_create_texture_layout(&t).unwrap();
        let a = h.get_or_create_texture_data(&t, &layout).unwrap();
        let b = h.get_or_create_texture_data(&t, &layout).unwrap();
        assert_eq!(a, b);
        assert_eq!(h.live_textures(), 1);
        let packed = TextureLayout::new(t.dims(), Packing::Rgba, 8192).unwrap();
        h.get_or_create_texture_data(&t, &packed).unwrap();
        assert_eq!(h.cached_textures(), 2);
        h.release(t.id()).unwrap();
        assert_eq!(h.live_textures(), 0);
    }

    #[test]
    fn run_scope_evicts_at_boundary() {
        let mut h = handler(GpuOptions::default());
        let t = Tensor::new(vec![3], vec![1.0, 2.0, 3.0]);
        let layout = h.get_or_create_texture_layout(&t).unwrap();
        h.get_or_create_texture_data(&t, &layout).unwrap();
        h.end_run().unwrap();
        assert_eq!((h.cached_textures(), h.live_textures()), (0, 0));

        let mut h = handler(GpuOptions {
            texture_cache: CacheScope::Process,
            ..GpuOptions::default()
        });
        h.get_or_create_texture_data(&t, &layout).unwrap();
        h.end_run().unwrap();
        assert_eq!(h.cached_textures(), 1);
    }

    #[test]
    fn output_allocation_reports_requested_extent() {
        let mut h = handler(GpuOptions {
            max_texture_size: 4,
            ..GpuOptions::default()
        });
        let layout = h.create_basic_texture_layout(&[5, 5]).unwrap();
        let err = h.create_texture_data_from_layout(&layout, DataType::Float32).unwrap_err();
        assert!(matches!(err, Error::TextureTooLarge { width: 4, height: 7, limit: 4 }));
    }

    #[test]
    fn materialized_outputs_stay_resident() {
        let mut h = handler(GpuOptions::default());
        let layout = h.create_basic_texture_layout(&[2]).unwrap();
        let data = h.create_texture_data_from_layout(&layout, DataType::Int32).unwrap();
        let tensor = h.materialize(data).unwrap();
        assert_eq!(tensor.data(), &TensorData::Int32(vec![0, 0]));
        assert!(h.is_resident(&tensor, &layout));
        assert_eq!(h.get_or_create_texture_layout(&tensor).unwrap(), layout);
    }
}

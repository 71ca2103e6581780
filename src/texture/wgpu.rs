//! GPU texture device using WGPU.
//!
//! Tensors live in `R32Float` (unpacked) or `Rgba32Float` (packed) 2D
//! textures. Each generated program becomes one compute pipeline with an
//! explicit bind group layout: the sampled inputs, the storage output, then
//! the uniform block. Dispatch covers the output texture in
//! [`WORKGROUP_SIZE`]² tiles.
//!
//! The adapter and device are requested once per process through
//! `lazy_static`. When no adapter is available the context is `None` and
//! [`WgpuDevice::new`] reports [`Error::Device`], so the caller can fall back
//! to another device.
//!
//! Readback copies into a staging buffer whose rows are padded to
//! `wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`, then blocks on the map. That wait is
//! the completion barrier for every dispatch submitted before it.

use log::{debug, info, trace, warn};
use wgpu::util::DeviceExt;

use crate::error::{Error, Result};
use crate::layout::{Packing, TextureLayout};
use crate::shader::ShaderModule;
use crate::shader::wgsl::WORKGROUP_SIZE;

use super::arena::Arena;
use super::device::{Device, ProgramId, TextureId, Uniforms};

/// Holds the WGPU device and queue shared by all [`WgpuDevice`]s.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Adapter name for logs.
    pub adapter: String,
}

impl GpuContext {
    /// Selects the default adapter and creates a device and queue.
    ///
    /// # Errors
    /// [`Error::Device`] when no adapter or device can be acquired.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
            .map_err(|e| Error::Device(format!("adapter request failed: {e}")))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("briny_texel"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|e| Error::Device(format!("device request failed: {e}")))?;
        Ok(Self {
            device,
            queue,
            adapter: adapter.get_info().name,
        })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: Option<GpuContext> = match GpuContext::new() {
        Ok(ctx) => {
            info!("wgpu adapter `{}` ready", ctx.adapter);
            Some(ctx)
        }
        Err(e) => {
            warn!("no wgpu device: {e}");
            None
        }
    };
}

struct GpuTexture {
    texture: wgpu::Texture,
    layout: TextureLayout,
}

struct GpuProgram {
    label: String,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    inputs: Vec<TextureLayout>,
    output: TextureLayout,
    uniforms: usize,
}

const fn format_of(packing: Packing) -> wgpu::TextureFormat {
    match packing {
        Packing::Unpacked => wgpu::TextureFormat::R32Float,
        Packing::Rgba => wgpu::TextureFormat::Rgba32Float,
    }
}

fn extent(layout: &TextureLayout) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: layout.width() as u32,
        height: layout.height() as u32,
        depth_or_array_layers: 1,
    }
}

fn copy_info(texture: &wgpu::Texture) -> wgpu::TexelCopyTextureInfo<'_> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: 0,
        origin: wgpu::Origin3d::ZERO,
        aspect: wgpu::TextureAspect::All,
    }
}

/// Texture device on the process-wide [`GpuContext`].
pub struct WgpuDevice {
    ctx: &'static GpuContext,
    max_texture_size: usize,
    textures: Arena<GpuTexture>,
    programs: Arena<GpuProgram>,
}

impl WgpuDevice {
    /// Opens the shared GPU context.
    ///
    /// # Errors
    /// [`Error::Device`] when no adapter is available.
    pub fn new() -> Result<Self> {
        let ctx = GPU_CONTEXT
            .as_ref()
            .ok_or_else(|| Error::Device("no wgpu adapter available".into()))?;
        let max_texture_size = ctx.device.limits().max_texture_dimension_2d as usize;
        Ok(Self {
            ctx,
            max_texture_size,
            textures: Arena::new(),
            programs: Arena::new(),
        })
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture> {
        self.textures.get(id.0).ok_or(Error::StaleHandle {
            kind: "texture",
            index: id.index(),
        })
    }

    fn bind_group_layout(&self, module: &ShaderModule) -> wgpu::BindGroupLayout {
        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..module.inputs.len())
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        let output = module.inputs.len() as u32;
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: output,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::R32Float,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        });
        if !module.uniforms.is_empty() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: output + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        self.ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&module.label),
                entries: &entries,
            })
    }
}

impl Device for WgpuDevice {
    fn name(&self) -> &str {
        &self.ctx.adapter
    }

    fn max_texture_size(&self) -> usize {
        self.max_texture_size
    }

    fn create_texture(&mut self, layout: &TextureLayout) -> Result<TextureId> {
        layout.check_fits(self.max_texture_size)?;
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if layout.packing() == Packing::Unpacked {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        let texture = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: None,
            size: extent(layout),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format_of(layout.packing()),
            usage,
            view_formats: &[],
        });
        let id = TextureId(self.textures.insert(GpuTexture {
            texture,
            layout: layout.clone(),
        }));
        debug!(
            "gpu texture {} allocated: {}x{} {:?}",
            id.index(),
            layout.width(),
            layout.height(),
            layout.packing()
        );
        Ok(id)
    }

    fn upload(&mut self, texture: TextureId, texels: &[f32]) -> Result<()> {
        let slot = self.texture(texture)?;
        let layout = &slot.layout;
        let channels = layout.packing().channels();
        if texels.len() != layout.texels() * channels {
            return Err(Error::Device(format!(
                "upload of {} values into a texture of {}",
                texels.len(),
                layout.texels() * channels
            )));
        }
        self.ctx.queue.write_texture(
            copy_info(&slot.texture),
            bytemuck::cast_slice(texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some((layout.width() * channels * 4) as u32),
                rows_per_image: Some(layout.height() as u32),
            },
            extent(layout),
        );
        Ok(())
    }

    fn read(&mut self, texture: TextureId) -> Result<Vec<f32>> {
        let slot = self.texture(texture)?;
        let layout = &slot.layout;
        let row_bytes = layout.width() * layout.packing().channels() * 4;
        let padded = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
        let device = &self.ctx.device;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: (padded * layout.height()) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_texture_to_buffer(
            copy_info(&slot.texture),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(layout.height() as u32),
                },
            },
            extent(layout),
        );
        self.ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| Error::Device(format!("poll failed: {e}")))?;
        rx.recv()
            .map_err(|e| Error::Device(format!("readback channel closed: {e}")))?
            .map_err(|e| Error::Device(format!("readback map failed: {e}")))?;

        let mut texels = Vec::with_capacity(layout.texels() * layout.packing().channels());
        {
            let bytes = slice.get_mapped_range();
            for row in bytes.chunks(padded) {
                texels.extend(bytemuck::pod_collect_to_vec::<u8, f32>(&row[..row_bytes]));
            }
        }
        staging.unmap();
        trace!("gpu texture {} read back", texture.index());
        Ok(texels)
    }

    fn release_texture(&mut self, texture: TextureId) -> Result<()> {
        let slot = self.textures.remove(texture.0).ok_or(Error::StaleHandle {
            kind: "texture",
            index: texture.index(),
        })?;
        slot.texture.destroy();
        debug!("gpu texture {} released", texture.index());
        Ok(())
    }

    fn compile(&mut self, module: &ShaderModule, source: &str) -> Result<ProgramId> {
        let device = &self.ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&module.label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let bind_group_layout = self.bind_group_layout(module);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&module.label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&module.label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::ShaderValidation {
                program: module.label.clone(),
                reason: error.to_string(),
            });
        }
        Ok(ProgramId(self.programs.insert(GpuProgram {
            label: module.label.clone(),
            pipeline,
            bind_group_layout,
            inputs: module.input_layouts(),
            output: module.output.clone(),
            uniforms: module.uniforms.len(),
        })))
    }

    fn dispatch(
        &mut self,
        program: ProgramId,
        inputs: &[TextureId],
        output: TextureId,
        uniforms: &Uniforms,
    ) -> Result<()> {
        let prog = self.programs.get(program.0).ok_or(Error::StaleHandle {
            kind: "program",
            index: program.index(),
        })?;
        if inputs.len() != prog.inputs.len() || uniforms.len() != prog.uniforms {
            return Err(Error::Device(format!(
                "`{}` binds {} inputs and {} uniforms, dispatch supplied {} and {}",
                prog.label,
                prog.inputs.len(),
                prog.uniforms,
                inputs.len(),
                uniforms.len()
            )));
        }
        let mut views = Vec::with_capacity(inputs.len() + 1);
        for (expected, &id) in prog.inputs.iter().zip(inputs) {
            let slot = self.texture(id)?;
            if &slot.layout != expected {
                return Err(Error::Device(format!(
                    "texture {} does not match an input of `{}`",
                    id.index(),
                    prog.label
                )));
            }
            views.push(slot.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        }
        let target = self.texture(output)?;
        if target.layout != prog.output || target.layout.packing() != Packing::Unpacked {
            return Err(Error::Device(format!(
                "texture {} cannot receive the output of `{}`",
                output.index(),
                prog.label
            )));
        }
        views.push(target.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let device = &self.ctx.device;
        let uniform_buffer = (!uniforms.is_empty()).then(|| {
            let mut values = uniforms.to_vec();
            values.resize(uniforms.len().next_multiple_of(4), 0.0);
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniforms"),
                contents: bytemuck::cast_slice(&values),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        });
        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        if let Some(buffer) = &uniform_buffer {
            entries.push(wgpu::BindGroupEntry {
                binding: views.len() as u32,
                resource: buffer.as_entire_binding(),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&prog.label),
            layout: &prog.bind_group_layout,
            entries: &entries,
        });

        let (x, y) = (
            (prog.output.width() as u32).div_ceil(WORKGROUP_SIZE),
            (prog.output.height() as u32).div_ceil(WORKGROUP_SIZE),
        );
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&prog.label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&prog.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&prog.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        self.ctx.queue.submit(Some(encoder.finish()));
        trace!("gpu dispatch `{}` over {x}x{y} workgroups", prog.label);
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

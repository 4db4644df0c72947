// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`Device`] on top of a `wgpu` device and queue.
//!
//! Every operation encodes and submits its own command buffer, so queue
//! writes and recorded passes land in call order. Fills, blits, and
//! composites share one quad shader; the viewport selects the destination
//! rectangle. Multisampled sources are resolved into a scratch texture
//! before they are sampled or read back.

use core::fmt;
use std::iter;
use std::sync::mpsc;

use handoff_core::device::{
    BufferId, CompletionCallback, Device, DeviceCaps, DeviceError, PipelineId, TextureDesc,
    TextureId, TextureUsage,
};
use handoff_core::format::{Color, PixelFormat, PixelLayout};
use handoff_core::geometry::{PhysicalSize, PixelRect};
use handoff_core::resource::pipeline::{CompositeMode, PipelineKey};
use hashbrown::HashMap;
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::shader::{QUAD_WGSL, QuadParams};

/// Errors raised while acquiring a `wgpu` device.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No adapter matched the request.
    #[error("no suitable wgpu adapter found")]
    NoAdapter,
    /// The adapter refused to open a device.
    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

/// The `wgpu` format backing a [`PixelFormat`].
///
/// YUV formats have no single-plane `wgpu` equivalent and are rejected.
pub fn texture_format(format: PixelFormat) -> Result<wgpu::TextureFormat, DeviceError> {
    Ok(match format {
        PixelFormat::RgbaPre => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::BgraPre => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Gray => wgpu::TextureFormat::R8Unorm,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        PixelFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        PixelFormat::Yuv420Planar | PixelFormat::Yuv422Interleaved => {
            return Err(DeviceError::Unsupported("YUV textures"));
        }
    })
}

/// The [`PixelFormat`] whose bytes match a surface format, if any.
#[must_use]
pub fn pixel_format(format: wgpu::TextureFormat) -> Option<PixelFormat> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
            Some(PixelFormat::RgbaPre)
        }
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
            Some(PixelFormat::BgraPre)
        }
        wgpu::TextureFormat::Rgba32Float => Some(PixelFormat::Rgba32Float),
        _ => None,
    }
}

fn caps_for(limits: &wgpu::Limits) -> DeviceCaps {
    DeviceCaps {
        uniform_offset_alignment: u64::from(limits.min_uniform_buffer_offset_alignment),
        copy_offset_alignment: wgpu::COPY_BUFFER_ALIGNMENT,
        max_texture_dimension: limits.max_texture_dimension_2d,
        max_buffer_size: limits.max_buffer_size,
        // WebGPU guarantees 1 and 4.
        max_samples: 4,
    }
}

fn extent(size: PhysicalSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

fn normalized(rect: PixelRect, size: PhysicalSize) -> [f32; 4] {
    let w = size.width as f32;
    let h = size.height as f32;
    [
        rect.x as f32 / w,
        rect.y as f32 / h,
        rect.right() as f32 / w,
        rect.bottom() as f32 / h,
    ]
}

/// `color` as the shader should write it into a `format` target.
fn shader_color(color: Color, format: PixelFormat) -> [f32; 4] {
    let a = color.a.clamp(0.0, 1.0);
    let (r, g, b) = if format.is_premultiplied() {
        (color.r * a, color.g * a, color.b * a)
    } else {
        (color.r, color.g, color.b)
    };
    match format {
        PixelFormat::Gray => {
            let l = 0.2126 * r + 0.7152 * g + 0.0722 * b;
            [l, l, l, a]
        }
        _ => [r, g, b, a],
    }
}

fn blend_state(mode: CompositeMode) -> Option<wgpu::BlendState> {
    let component = |src_factor, dst_factor| wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    let both = |c: wgpu::BlendComponent| wgpu::BlendState { color: c, alpha: c };
    match mode {
        CompositeMode::Src => None,
        CompositeMode::Clear => Some(both(component(
            wgpu::BlendFactor::Zero,
            wgpu::BlendFactor::Zero,
        ))),
        CompositeMode::SrcOver => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        CompositeMode::DstOut => Some(both(component(
            wgpu::BlendFactor::Zero,
            wgpu::BlendFactor::OneMinusSrcAlpha,
        ))),
        CompositeMode::Add => Some(both(component(
            wgpu::BlendFactor::One,
            wgpu::BlendFactor::One,
        ))),
    }
}

// ---------------------------------------------------------------------------
// Resource tables
// ---------------------------------------------------------------------------

enum Backing {
    Owned(wgpu::Texture),
    Surface(wgpu::SurfaceTexture),
}

impl Backing {
    fn raw(&self) -> &wgpu::Texture {
        match self {
            Self::Owned(texture) => texture,
            Self::Surface(frame) => &frame.texture,
        }
    }
}

struct GpuTexture {
    desc: TextureDesc,
    format: wgpu::TextureFormat,
    usages: wgpu::TextureUsages,
    backing: Backing,
}

impl GpuTexture {
    fn bounds(&self) -> PixelRect {
        self.desc.size.bounds()
    }

    fn view(&self) -> wgpu::TextureView {
        self.backing
            .raw()
            .create_view(&wgpu::TextureViewDescriptor::default())
    }
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    len: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum QuadKind {
    Sample,
    Fill,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct QuadKey {
    kind: QuadKind,
    format: wgpu::TextureFormat,
    samples: u32,
    mode: CompositeMode,
}

#[derive(Default)]
struct State {
    next_id: u64,
    textures: HashMap<u64, GpuTexture>,
    buffers: HashMap<u64, GpuBuffer>,
    pipelines: HashMap<u64, (PipelineKey, wgpu::RenderPipeline)>,
    quads: HashMap<QuadKey, wgpu::RenderPipeline>,
    submissions: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, DeviceError> {
        self.textures
            .get(&id.raw())
            .ok_or(DeviceError::UnknownTexture(id))
    }
}

/// Shader module, layouts, and sampler shared by every quad pipeline.
struct QuadResources {
    module: wgpu::ShaderModule,
    sample_layout: wgpu::BindGroupLayout,
    fill_layout: wgpu::BindGroupLayout,
    sample_pipeline_layout: wgpu::PipelineLayout,
    fill_pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
}

impl QuadResources {
    fn new(device: &wgpu::Device) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("handoff quad shader"),
            source: wgpu::ShaderSource::Wgsl(QUAD_WGSL.into()),
        });
        let params = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(size_of::<QuadParams>() as u64),
            },
            count: None,
        };
        let sample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("handoff sample layout"),
            entries: &[
                params,
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        // Float targets are not filterable without an extra feature.
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });
        let fill_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("handoff fill layout"),
            entries: &[params],
        });
        let sample_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("handoff sample pipeline layout"),
                bind_group_layouts: &[&sample_layout],
                push_constant_ranges: &[],
            });
        let fill_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("handoff fill pipeline layout"),
            bind_group_layouts: &[&fill_layout],
            push_constant_ranges: &[],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("handoff nearest sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..wgpu::SamplerDescriptor::default()
        });
        Self {
            module,
            sample_layout,
            fill_layout,
            sample_pipeline_layout,
            fill_pipeline_layout,
            sampler,
        }
    }
}

// ---------------------------------------------------------------------------
// WgpuDevice
// ---------------------------------------------------------------------------

/// A [`Device`] that renders with `wgpu`.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,
    quad: QuadResources,
    state: Mutex<State>,
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WgpuDevice")
            .field("caps", &self.caps)
            .field("textures", &state.textures.len())
            .field("buffers", &state.buffers.len())
            .field("pipelines", &state.pipelines.len())
            .field("submissions", &state.submissions)
            .finish_non_exhaustive()
    }
}

impl WgpuDevice {
    /// Wraps an open device and its queue.
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let caps = caps_for(&device.limits());
        let quad = QuadResources::new(&device);
        Self {
            device,
            queue,
            caps,
            quad,
            state: Mutex::new(State::default()),
        }
    }

    /// Opens a headless device on the first adapter that answers, blocking
    /// the calling thread.
    pub fn request() -> Result<Self, BackendError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..wgpu::InstanceDescriptor::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or(BackendError::NoAdapter)?;
            Self::from_adapter(&adapter).await
        })
    }

    /// Opens a device on `adapter`.
    pub async fn from_adapter(adapter: &wgpu::Adapter) -> Result<Self, BackendError> {
        let info = adapter.get_info();
        tracing::debug!(name = %info.name, backend = ?info.backend, "opening wgpu device");
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("handoff"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await?;
        Ok(Self::new(device, queue))
    }

    /// The underlying `wgpu` device.
    #[must_use]
    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The underlying queue.
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Drives completion callbacks. With `wait`, blocks until all submitted
    /// work has finished.
    pub fn poll(&self, wait: bool) {
        let maintain = if wait {
            wgpu::Maintain::Wait
        } else {
            wgpu::Maintain::Poll
        };
        let _ = self.device.poll(maintain);
    }

    /// Number of [`Device::submit`] calls so far.
    #[must_use]
    pub fn submissions(&self) -> u64 {
        self.state.lock().submissions
    }

    /// Runs `f` with the `wgpu` texture behind `id`.
    pub fn with_texture<R>(&self, id: TextureId, f: impl FnOnce(&wgpu::Texture) -> R) -> Option<R> {
        let state = self.state.lock();
        state.textures.get(&id.raw()).map(|t| f(t.backing.raw()))
    }

    /// Registers an acquired swapchain frame as a texture.
    pub(crate) fn import_surface(
        &self,
        frame: wgpu::SurfaceTexture,
        format: PixelFormat,
    ) -> (TextureId, PhysicalSize) {
        let size = PhysicalSize::new(frame.texture.width(), frame.texture.height());
        let texture = GpuTexture {
            desc: TextureDesc::color(size, format),
            format: frame.texture.format(),
            usages: frame.texture.usage(),
            backing: Backing::Surface(frame),
        };
        let mut state = self.state.lock();
        let id = state.next_id();
        state.textures.insert(id, texture);
        (TextureId::from_raw(id), size)
    }

    /// Unregisters an imported swapchain frame and hands it back.
    pub(crate) fn take_surface(&self, id: TextureId) -> Option<wgpu::SurfaceTexture> {
        let mut state = self.state.lock();
        let imported = matches!(
            state.textures.get(&id.raw()).map(|t| &t.backing),
            Some(Backing::Surface(_))
        );
        if !imported {
            return None;
        }
        match state.textures.remove(&id.raw()).map(|t| t.backing) {
            Some(Backing::Surface(frame)) => Some(frame),
            _ => None,
        }
    }

    fn encoder(&self, label: &'static str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn finish(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(iter::once(encoder.finish()));
    }

    fn ensure_quad(
        &self,
        quads: &mut HashMap<QuadKey, wgpu::RenderPipeline>,
        key: QuadKey,
    ) -> Result<(), DeviceError> {
        if !quads.contains_key(&key) {
            let pipeline = self.build_quad(key)?;
            tracing::debug!(?key, "built quad pipeline");
            quads.insert(key, pipeline);
        }
        Ok(())
    }

    fn build_quad(&self, key: QuadKey) -> Result<wgpu::RenderPipeline, DeviceError> {
        let blend = blend_state(key.mode);
        if blend.is_some() && key.format == wgpu::TextureFormat::Rgba32Float {
            return Err(DeviceError::Unsupported("blending into float targets"));
        }
        if key.samples > self.caps.max_samples {
            return Err(DeviceError::Unsupported("sample count above device limit"));
        }
        let (layout, entry_point) = match key.kind {
            QuadKind::Sample => (&self.quad.sample_pipeline_layout, "fs_sample"),
            QuadKind::Fill => (&self.quad.fill_pipeline_layout, "fs_fill"),
        };
        Ok(self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("handoff quad pipeline"),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &self.quad.module,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.quad.module,
                    entry_point,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..wgpu::PrimitiveState::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: key.samples,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            }))
    }

    fn quad_bind_group(
        &self,
        params: QuadParams,
        source: Option<&wgpu::TextureView>,
    ) -> wgpu::BindGroup {
        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("handoff quad params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        match source {
            Some(view) => self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("handoff sample bind group"),
                layout: &self.quad.sample_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.quad.sampler),
                    },
                ],
            }),
            None => self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("handoff fill bind group"),
                layout: &self.quad.fill_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                }],
            }),
        }
    }

    fn draw_quad(
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        rect: PixelRect,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("handoff quad pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_viewport(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..4, 0..1);
    }

    /// Resolves a multisampled texture into a fresh single-sample one.
    fn resolve(&self, encoder: &mut wgpu::CommandEncoder, texture: &GpuTexture) -> wgpu::Texture {
        let resolved = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("handoff resolve"),
            size: extent(texture.desc.size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let source = texture.view();
        let target = resolved.create_view(&wgpu::TextureViewDescriptor::default());
        // An empty pass still resolves on store.
        drop(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("handoff resolve pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &source,
                resolve_target: Some(&target),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        }));
        resolved
    }

    /// Copies `rect` of a texture aside so it can be sampled while the
    /// source is also the render target.
    fn stage_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &GpuTexture,
        rect: PixelRect,
    ) -> wgpu::Texture {
        let staged = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("handoff staged copy"),
            size: extent(rect.size()),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: texture.backing.raw(),
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &staged,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent(rect.size()),
        );
        staged
    }

    /// Runs `create` inside an out-of-memory error scope.
    ///
    /// The caller holds the state lock, which keeps scopes from interleaving
    /// across threads.
    fn allocate<T>(&self, requested: u64, create: impl FnOnce() -> T) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let created = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => {
                tracing::warn!(%error, requested, "wgpu allocation failed");
                Err(DeviceError::OutOfMemory { requested })
            }
            None => Ok(created),
        }
    }
}

impl Device for WgpuDevice {
    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId, DeviceError> {
        let max = self.caps.max_texture_dimension;
        if desc.size.is_empty() || desc.size.width > max || desc.size.height > max {
            return Err(DeviceError::InvalidSize {
                size: desc.size,
                max,
            });
        }
        let format = texture_format(desc.format)?;
        let is_depth = desc.format == PixelFormat::Depth32Float;
        let usages = match desc.usage {
            TextureUsage::Color if !is_depth => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST
            }
            TextureUsage::Depth if is_depth => wgpu::TextureUsages::RENDER_ATTACHMENT,
            TextureUsage::MsaaColor { samples } if !is_depth && samples <= self.caps.max_samples => {
                wgpu::TextureUsages::RENDER_ATTACHMENT
            }
            _ => return Err(DeviceError::Unsupported("format does not fit texture usage")),
        };
        let mip_level_count = if desc.mipmapped {
            u32::BITS - desc.size.width.max(desc.size.height).leading_zeros()
        } else {
            1
        };

        let mut state = self.state.lock();
        let texture = self.allocate(desc.byte_size(), || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("handoff texture"),
                size: extent(desc.size),
                mip_level_count,
                sample_count: desc.samples(),
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: usages,
                view_formats: &[],
            })
        })?;
        let id = state.next_id();
        state.textures.insert(
            id,
            GpuTexture {
                desc: *desc,
                format,
                usages,
                backing: Backing::Owned(texture),
            },
        );
        Ok(TextureId::from_raw(id))
    }

    fn release_texture(&self, id: TextureId) {
        self.state.lock().textures.remove(&id.raw());
    }

    fn write_texture(
        &self,
        id: TextureId,
        dst: PixelRect,
        data: &[u8],
        layout: PixelLayout,
    ) -> Result<(), DeviceError> {
        let state = self.state.lock();
        let texture = state.texture(id)?;
        if !texture.bounds().contains_rect(dst) {
            return Err(DeviceError::OutOfBounds);
        }
        if dst.is_empty() {
            return Ok(());
        }
        if !texture.usages.contains(wgpu::TextureUsages::COPY_DST) {
            return Err(DeviceError::Unsupported("upload into an attachment-only texture"));
        }
        let format = texture.desc.format;
        let row = dst.width as usize * format.bytes_per_pixel();
        let needed = layout.offset_of(format, 0, dst.height - 1) + row;
        if data.len() < needed {
            return Err(DeviceError::SourceTooShort {
                needed,
                got: data.len(),
            });
        }
        let bytes_per_row = u32::try_from(layout.stride).map_err(|_| DeviceError::OutOfBounds)?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: texture.backing.raw(),
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: dst.x,
                    y: dst.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: layout.offset_of(format, 0, 0) as u64,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: None,
            },
            extent(dst.size()),
        );
        Ok(())
    }

    fn clear(&self, id: TextureId, color: Color) -> Result<(), DeviceError> {
        let state = self.state.lock();
        let texture = state.texture(id)?;
        if !texture.usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            return Err(DeviceError::Unsupported("clear of a non-renderable texture"));
        }
        let view = texture.view();
        let mut encoder = self.encoder("handoff clear");
        if texture.desc.format == PixelFormat::Depth32Float {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("handoff depth clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color.r),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        } else {
            let [r, g, b, a] = shader_color(color, texture.desc.format);
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("handoff clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(r),
                            g: f64::from(g),
                            b: f64::from(b),
                            a: f64::from(a),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.finish(encoder);
        Ok(())
    }

    fn fill_rect(&self, id: TextureId, rect: PixelRect, color: Color) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let (desc, format) = {
            let texture = state.texture(id)?;
            if !texture.bounds().contains_rect(rect) {
                return Err(DeviceError::OutOfBounds);
            }
            (texture.desc, texture.format)
        };
        if rect.is_empty() {
            return Ok(());
        }
        if desc.usage == TextureUsage::Depth {
            return Err(DeviceError::Unsupported("fill of a depth texture"));
        }
        let key = QuadKey {
            kind: QuadKind::Fill,
            format,
            samples: desc.samples(),
            mode: CompositeMode::Src,
        };
        self.ensure_quad(&mut state.quads, key)?;

        let state = &*state;
        let texture = state.texture(id)?;
        let bind_group =
            self.quad_bind_group(QuadParams::fill(shader_color(color, desc.format)), None);
        let mut encoder = self.encoder("handoff fill");
        Self::draw_quad(
            &mut encoder,
            &texture.view(),
            &state.quads[&key],
            &bind_group,
            rect,
        );
        self.finish(encoder);
        Ok(())
    }

    fn blit(
        &self,
        src: TextureId,
        src_rect: PixelRect,
        dst: TextureId,
        dst_rect: PixelRect,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let src_desc = {
            let source = state.texture(src)?;
            if !source.bounds().contains_rect(src_rect) {
                return Err(DeviceError::OutOfBounds);
            }
            source.desc
        };
        let (dst_desc, dst_format, dst_usages) = {
            let target = state.texture(dst)?;
            if !target.bounds().contains_rect(dst_rect) {
                return Err(DeviceError::OutOfBounds);
            }
            (target.desc, target.format, target.usages)
        };
        if src_rect.is_empty() || dst_rect.is_empty() {
            return Ok(());
        }
        if src_desc.usage == TextureUsage::Depth || dst_desc.usage == TextureUsage::Depth {
            return Err(DeviceError::Unsupported("blit of a depth texture"));
        }
        if !dst_usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            return Err(DeviceError::Unsupported("blit into a non-renderable texture"));
        }
        let key = QuadKey {
            kind: QuadKind::Sample,
            format: dst_format,
            samples: dst_desc.samples(),
            mode: CompositeMode::Src,
        };
        self.ensure_quad(&mut state.quads, key)?;

        let state = &*state;
        let source = state.texture(src)?;
        let target = state.texture(dst)?;
        let mut encoder = self.encoder("handoff blit");
        let (scratch, uv) = if src_desc.samples() > 1 {
            (
                Some(self.resolve(&mut encoder, source)),
                normalized(src_rect, src_desc.size),
            )
        } else if src == dst {
            (
                Some(self.stage_copy(&mut encoder, source, src_rect)),
                [0.0, 0.0, 1.0, 1.0],
            )
        } else {
            (None, normalized(src_rect, src_desc.size))
        };
        let view = scratch
            .as_ref()
            .unwrap_or_else(|| source.backing.raw())
            .create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.quad_bind_group(QuadParams::sample(uv), Some(&view));
        Self::draw_quad(
            &mut encoder,
            &target.view(),
            &state.quads[&key],
            &bind_group,
            dst_rect,
        );
        self.finish(encoder);
        Ok(())
    }

    fn read_pixels(&self, id: TextureId, rect: PixelRect) -> Result<Vec<u8>, DeviceError> {
        let state = self.state.lock();
        let texture = state.texture(id)?;
        if !texture.bounds().contains_rect(rect) {
            return Err(DeviceError::OutOfBounds);
        }
        if rect.is_empty() {
            return Ok(Vec::new());
        }
        let multisampled = texture.desc.samples() > 1;
        if !multisampled && !texture.usages.contains(wgpu::TextureUsages::COPY_SRC) {
            return Err(DeviceError::Unsupported("read back of a texture without copy access"));
        }
        let row_len = rect.width as usize * texture.desc.format.bytes_per_pixel();
        let row_bytes = u32::try_from(row_len).map_err(|_| DeviceError::OutOfBounds)?;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = row_bytes.div_ceil(align) * align;

        let mut encoder = self.encoder("handoff readback");
        let resolved = multisampled.then(|| self.resolve(&mut encoder, texture));
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("handoff readback"),
            size: u64::from(padded) * u64::from(rect.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: resolved.as_ref().unwrap_or_else(|| texture.backing.raw()),
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: None,
                },
            },
            extent(rect.size()),
        );
        self.finish(encoder);
        drop(state);

        let slice = readback.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.poll(true);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(%error, "readback mapping failed");
                return Err(DeviceError::Lost);
            }
            Err(_) => return Err(DeviceError::Lost),
        }

        let mapped = slice.get_mapped_range();
        let mut out = Vec::with_capacity(row_len * rect.height as usize);
        for row in mapped.chunks(padded as usize) {
            out.extend_from_slice(&row[..row_len]);
        }
        drop(mapped);
        readback.unmap();
        Ok(out)
    }

    fn create_buffer(&self, size: u64) -> Result<BufferId, DeviceError> {
        if size == 0 || size > self.caps.max_buffer_size {
            return Err(DeviceError::OutOfMemory { requested: size });
        }
        let mut state = self.state.lock();
        let buffer = self.allocate(size, || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("handoff buffer"),
                size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
                usage: wgpu::BufferUsages::UNIFORM
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::INDEX
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        let id = state.next_id();
        state.buffers.insert(id, GpuBuffer { buffer, len: size });
        Ok(BufferId::from_raw(id))
    }

    fn write_buffer(&self, id: BufferId, offset: u64, bytes: &[u8]) -> Result<(), DeviceError> {
        let state = self.state.lock();
        let buffer = state
            .buffers
            .get(&id.raw())
            .ok_or(DeviceError::UnknownBuffer(id))?;
        let end = offset
            .checked_add(bytes.len() as u64)
            .filter(|&end| end <= buffer.len)
            .ok_or(DeviceError::OutOfBounds)?;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(DeviceError::Unsupported("unaligned buffer offset"));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        // The allocation is padded, so a short tail fits.
        if (end - offset) % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            let mut padded = bytes.to_vec();
            let len = (bytes.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
            padded.resize(usize::try_from(len).map_err(|_| DeviceError::OutOfBounds)?, 0);
            self.queue.write_buffer(&buffer.buffer, offset, &padded);
        } else {
            self.queue.write_buffer(&buffer.buffer, offset, bytes);
        }
        Ok(())
    }

    fn release_buffer(&self, id: BufferId) {
        self.state.lock().buffers.remove(&id.raw());
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Result<PipelineId, DeviceError> {
        if !key.format.is_renderable() {
            return Err(DeviceError::Unsupported("pipeline for a non-renderable format"));
        }
        let quad = QuadKey {
            kind: QuadKind::Sample,
            format: texture_format(key.format)?,
            samples: key.samples,
            mode: key.mode,
        };
        let pipeline = self.build_quad(quad)?;
        let mut state = self.state.lock();
        let id = state.next_id();
        state.pipelines.insert(id, (*key, pipeline));
        Ok(PipelineId::from_raw(id))
    }

    fn release_pipeline(&self, id: PipelineId) {
        self.state.lock().pipelines.remove(&id.raw());
    }

    fn submit(&self, on_complete: CompletionCallback) {
        self.state.lock().submissions += 1;
        self.queue.on_submitted_work_done(on_complete);
        self.poll(false);
    }
}

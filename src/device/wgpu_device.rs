//! The wgpu backend.
//!
//! Commands are recorded as they are issued and replayed in [`RenderDevice::end_frame`]
//! in two passes. The first pass simulates the state machine the commands describe:
//! it snapshots each draw's uniforms into one dynamic-offset buffer, collects
//! instance and line data, builds texture bind groups, creates any pipeline a
//! state combination needs for the first time, and cuts the stream into render
//! pass segments wherever the target changes or a clear follows a draw. The
//! second pass encodes those segments and submits them.

use super::{
    ClearRequest, ColorFormat, DepthFormat, FrameBufferDesc, FrameBufferError, FrameBufferId,
    MeshId, RenderCommand, RenderDevice, RenderTarget, ShaderDescriptor, ShaderError, ShaderId,
    Size, TextureBinding, TextureData, TextureDecl, TextureId, TextureKind,
};
use crate::geometry::ExtractedGeometry;
use crate::gpu::GpuContext;
use crate::state::{
    Blend, Compare, CullFace, MAX_TEXTURES_SUPPORTED, RenderMode, StateChange, StencilAction,
    StencilFunc, StencilOp,
};
use crate::uniform::UniformBlock;
use std::collections::{HashMap, HashSet};
use wgpu::util::DeviceExt;

const INSTANCE_STRIDE: u64 = 64;

struct ShaderEntry {
    name: String,
    module: wgpu::ShaderModule,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    vertex_stride: u64,
    vertex_attributes: Vec<wgpu::VertexAttribute>,
    instance_attributes: Vec<wgpu::VertexAttribute>,
    uniform_size: u32,
    textures: Vec<TextureDecl>,
    block: UniformBlock,
    /// Where the current block contents were placed in this frame's uniform buffer.
    frame_offset: Option<u32>,
}

struct MeshBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct TextureEntry {
    view: wgpu::TextureView,
    kind: TextureKind,
}

struct Attachment {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

struct FrameBufferTextures {
    desc: FrameBufferDesc,
    samples: u32,
    color: Option<Attachment>,
    depth: Option<Attachment>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct TargetFormat {
    color: Option<wgpu::TextureFormat>,
    write_alpha: bool,
    depth: Option<wgpu::TextureFormat>,
    samples: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum DrawShape {
    Mesh,
    Instanced,
    Lines,
    Fullscreen,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct StencilKey {
    compare: Compare,
    read_mask: u32,
    write_mask: u32,
    op: StencilOp,
}

/// The part of the graphics state that is baked into a wgpu pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct FixedState {
    cull: Option<CullFace>,
    blend: Option<(Blend, Blend)>,
    depth_write: bool,
    depth_compare: Compare,
    stencil: Option<StencilKey>,
    mode: RenderMode,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: ShaderId,
    state: FixedState,
    target: TargetFormat,
    shape: DrawShape,
}

/// State as the command stream sets it, starting from OpenGL-like defaults.
#[derive(Copy, Clone, Debug)]
struct TrackedState {
    cull_face: bool,
    cull_face_mode: CullFace,
    blending: bool,
    blend: (Blend, Blend),
    depth_test: bool,
    depth_mask: bool,
    depth_func: Compare,
    stencil_test: bool,
    stencil_mask: u32,
    stencil_func: StencilFunc,
    stencil_op: StencilOp,
    mode: RenderMode,
}

impl Default for TrackedState {
    fn default() -> Self {
        Self {
            cull_face: false,
            cull_face_mode: CullFace::Back,
            blending: false,
            blend: (Blend::One, Blend::Zero),
            depth_test: false,
            depth_mask: true,
            depth_func: Compare::Less,
            stencil_test: false,
            stencil_mask: 0xFF,
            stencil_func: StencilFunc {
                compare: Compare::Always,
                reference: 0,
                mask: 0xFF,
            },
            stencil_op: StencilOp {
                stencil_fail: StencilAction::Keep,
                depth_fail: StencilAction::Keep,
                pass: StencilAction::Keep,
            },
            mode: RenderMode::Fill,
        }
    }
}

impl TrackedState {
    fn apply(&mut self, change: StateChange) {
        match change {
            StateChange::CullFace(enabled) => self.cull_face = enabled,
            StateChange::CullFaceMode(mode) => self.cull_face_mode = mode,
            StateChange::Blending(enabled) => self.blending = enabled,
            StateChange::BlendMode(src, dst) => self.blend = (src, dst),
            StateChange::DepthTest(enabled) => self.depth_test = enabled,
            StateChange::DepthMask(enabled) => self.depth_mask = enabled,
            StateChange::DepthFunc(func) => self.depth_func = func,
            StateChange::StencilTest(enabled) => self.stencil_test = enabled,
            StateChange::StencilMask(mask) => self.stencil_mask = mask,
            StateChange::StencilFunc(func) => self.stencil_func = func,
            StateChange::StencilOp(op) => self.stencil_op = op,
            StateChange::RenderMode(mode) => self.mode = mode,
        }
    }

    /// With the depth test off nothing is compared and nothing is written,
    /// whatever the depth mask says.
    fn fixed(&self) -> FixedState {
        FixedState {
            cull: self.cull_face.then_some(self.cull_face_mode),
            blend: self.blending.then_some(self.blend),
            depth_write: self.depth_test && self.depth_mask,
            depth_compare: if self.depth_test {
                self.depth_func
            } else {
                Compare::Always
            },
            stencil: self.stencil_test.then_some(StencilKey {
                compare: self.stencil_func.compare,
                read_mask: self.stencil_func.mask,
                write_mask: self.stencil_mask,
                op: self.stencil_op,
            }),
            mode: self.mode,
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum DrawKind {
    Mesh(MeshId),
    Instanced { mesh: MeshId, offset: u64, count: u32 },
    Lines { offset: u64, count: u32 },
    Fullscreen,
}

#[derive(Copy, Clone, Debug)]
struct DrawOp {
    pipeline: PipelineKey,
    shader: ShaderId,
    uniform_offset: u32,
    textures: Option<usize>,
    stencil_reference: u32,
    kind: DrawKind,
}

#[derive(Copy, Clone, Debug)]
enum PassOp {
    Viewport(Size),
    Draw(DrawOp),
}

#[derive(Debug)]
enum Segment {
    Pass {
        target: RenderTarget,
        clear: Option<ClearRequest>,
        ops: Vec<PassOp>,
    },
    Resolve {
        from: FrameBufferId,
        to: FrameBufferId,
    },
}

/// Cuts a command stream into render passes.
struct SegmentBuilder {
    segments: Vec<Segment>,
    target: RenderTarget,
    clear: Option<ClearRequest>,
    ops: Vec<PassOp>,
    viewport: Option<Size>,
}

impl SegmentBuilder {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            target: RenderTarget::Screen,
            clear: None,
            ops: Vec::new(),
            viewport: None,
        }
    }

    fn has_draws(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, PassOp::Draw(_)))
    }

    fn flush(&mut self) {
        if self.clear.is_some() || self.has_draws() {
            self.segments.push(Segment::Pass {
                target: self.target,
                clear: self.clear.take(),
                ops: std::mem::take(&mut self.ops),
            });
        } else {
            self.ops.clear();
        }
        if let Some(viewport) = self.viewport {
            self.ops.push(PassOp::Viewport(viewport));
        }
    }

    fn bind(&mut self, target: RenderTarget) {
        self.flush();
        self.target = target;
    }

    fn clear(&mut self, request: ClearRequest) {
        if self.has_draws() {
            self.flush();
        }
        let previous = self.clear.unwrap_or_default();
        self.clear = Some(ClearRequest {
            color: request.color.or(previous.color),
            depth: request.depth.or(previous.depth),
            stencil: request.stencil.or(previous.stencil),
        });
    }

    fn viewport(&mut self, size: Size) {
        self.viewport = Some(size);
        self.ops.push(PassOp::Viewport(size));
    }

    fn draw(&mut self, op: DrawOp) {
        self.ops.push(PassOp::Draw(op));
    }

    fn resolve(&mut self, from: FrameBufferId, to: FrameBufferId) {
        self.flush();
        self.segments.push(Segment::Resolve { from, to });
    }

    fn finish(mut self) -> Vec<Segment> {
        self.flush();
        self.segments
    }
}

/// Everything the first replay pass produces.
#[derive(Default)]
struct PreparedFrame {
    segments: Vec<Segment>,
    uniforms: Vec<u8>,
    instances: Vec<u8>,
    lines: Vec<u8>,
    texture_groups: Vec<wgpu::BindGroup>,
    shaders_used: HashSet<ShaderId>,
}

struct Fallbacks {
    white: wgpu::TextureView,
    cube: wgpu::TextureView,
    depth: wgpu::TextureView,
}

/// A [`RenderDevice`] drawing with wgpu.
pub struct WgpuDevice {
    gpu: GpuContext,
    shaders: Vec<ShaderEntry>,
    meshes: Vec<MeshBuffers>,
    textures: Vec<TextureEntry>,
    framebuffers: HashMap<FrameBufferId, FrameBufferTextures>,
    next_framebuffer: u32,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    linear_sampler: wgpu::Sampler,
    shadow_sampler: wgpu::Sampler,
    fallbacks: Fallbacks,
    uniform_buffer: Option<wgpu::Buffer>,
    commands: Vec<RenderCommand>,
}

impl WgpuDevice {
    pub fn new(gpu: GpuContext) -> Self {
        let linear_sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let shadow_sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        let fallbacks = create_fallbacks(&gpu);

        Self {
            gpu,
            shaders: Vec::new(),
            meshes: Vec::new(),
            textures: Vec::new(),
            framebuffers: HashMap::new(),
            next_framebuffer: 0,
            pipelines: HashMap::new(),
            linear_sampler,
            shadow_sampler,
            fallbacks,
            uniform_buffer: None,
            commands: Vec::new(),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Resizes the screen target.
    pub fn resize(&mut self, size: Size) {
        self.gpu.resize(size.width, size.height);
    }

    fn line_mode_supported(&self) -> bool {
        self.gpu
            .device
            .features()
            .contains(wgpu::Features::POLYGON_MODE_LINE)
    }

    fn target_format(&self, target: RenderTarget) -> Option<TargetFormat> {
        match target {
            RenderTarget::Screen => Some(TargetFormat {
                color: Some(self.gpu.config.format),
                write_alpha: true,
                depth: None,
                samples: 1,
            }),
            RenderTarget::FrameBuffer(id) => {
                let fb = self.framebuffers.get(&id)?;
                Some(TargetFormat {
                    color: fb.color.as_ref().map(|a| a.format),
                    write_alpha: fb.desc.color != Some(ColorFormat::Rgb),
                    depth: fb.depth.as_ref().map(|a| a.format),
                    samples: fb.samples,
                })
            }
        }
    }

    fn texture_view(&self, binding: Option<TextureBinding>, kind: TextureKind) -> &wgpu::TextureView {
        let view = match binding {
            Some(TextureBinding::Texture(id)) => self
                .textures
                .get(id.0 as usize)
                .filter(|t| t.kind == kind)
                .map(|t| &t.view),
            Some(TextureBinding::FrameBufferColor(id)) => self
                .framebuffers
                .get(&id)
                .filter(|fb| fb.samples == 1 && kind == TextureKind::D2)
                .and_then(|fb| fb.color.as_ref())
                .map(|a| &a.view),
            Some(TextureBinding::FrameBufferDepth(id)) => self
                .framebuffers
                .get(&id)
                .filter(|fb| fb.desc.depth == Some(DepthFormat::SampledDepth))
                .filter(|_| kind == TextureKind::Depth)
                .and_then(|fb| fb.depth.as_ref())
                .map(|a| &a.view),
            None => None,
        };
        view.unwrap_or_else(|| {
            if binding.is_some() {
                log::debug!("{binding:?} can't be sampled as {kind:?}, using a fallback");
            }
            match kind {
                TextureKind::D2 => &self.fallbacks.white,
                TextureKind::Cube => &self.fallbacks.cube,
                TextureKind::Depth => &self.fallbacks.depth,
            }
        })
    }

    fn create_texture_group(
        &self,
        shader: &ShaderEntry,
        bound: &[Option<TextureBinding>; MAX_TEXTURES_SUPPORTED],
    ) -> Option<wgpu::BindGroup> {
        let layout = shader.texture_layout.as_ref()?;
        let mut entries = Vec::with_capacity(shader.textures.len() * 2);
        for (i, decl) in shader.textures.iter().enumerate() {
            let sampler = match decl.kind {
                TextureKind::Depth => &self.shadow_sampler,
                _ => &self.linear_sampler,
            };
            entries.push(wgpu::BindGroupEntry {
                binding: 2 * i as u32,
                resource: wgpu::BindingResource::TextureView(self.texture_view(bound[i], decl.kind)),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 2 * i as u32 + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        Some(self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} textures", shader.name)),
            layout,
            entries: &entries,
        }))
    }

    /// First replay pass.
    fn prepare(&mut self, commands: &[RenderCommand]) -> PreparedFrame {
        let alignment = self.gpu.device.limits().min_uniform_buffer_offset_alignment.max(1);
        let line_mode = self.line_mode_supported();
        for shader in &mut self.shaders {
            shader.frame_offset = None;
        }

        let mut frame = PreparedFrame::default();
        let mut builder = SegmentBuilder::new();
        let mut state = TrackedState::default();
        let mut shader: Option<ShaderId> = None;
        let mut bound: [Option<TextureBinding>; MAX_TEXTURES_SUPPORTED] = Default::default();
        let mut groups: HashMap<(ShaderId, Vec<Option<TextureBinding>>), usize> = HashMap::new();

        for command in commands {
            let (kind, shape) = match command {
                RenderCommand::BindTarget(target) => {
                    builder.bind(*target);
                    continue;
                }
                RenderCommand::Viewport(size) => {
                    builder.viewport(*size);
                    continue;
                }
                RenderCommand::Clear(request) => {
                    builder.clear(*request);
                    continue;
                }
                RenderCommand::State(change) => {
                    state.apply(*change);
                    continue;
                }
                RenderCommand::UseShader(id) => {
                    shader = Some(*id);
                    continue;
                }
                RenderCommand::SetUniform {
                    shader,
                    prop,
                    index,
                    value,
                } => {
                    if let Some(entry) = self.shaders.get_mut(shader.0 as usize) {
                        entry.block.write(*prop, *index, value);
                        entry.frame_offset = None;
                    }
                    continue;
                }
                RenderCommand::BindTexture { slot, texture } => {
                    if let Some(entry) = bound.get_mut(*slot as usize) {
                        *entry = Some(*texture);
                    }
                    continue;
                }
                RenderCommand::Resolve { from, to } => {
                    builder.resolve(*from, *to);
                    continue;
                }
                RenderCommand::DrawMesh(mesh) => (DrawKind::Mesh(*mesh), DrawShape::Mesh),
                RenderCommand::DrawInstanced { mesh, transforms } => {
                    if transforms.is_empty() {
                        continue;
                    }
                    let offset = frame.instances.len() as u64;
                    for transform in transforms {
                        frame
                            .instances
                            .extend_from_slice(bytemuck::cast_slice(&transform.to_cols_array()));
                    }
                    let kind = DrawKind::Instanced {
                        mesh: *mesh,
                        offset,
                        count: transforms.len() as u32,
                    };
                    (kind, DrawShape::Instanced)
                }
                RenderCommand::DrawLines(vertices) => {
                    if vertices.is_empty() {
                        continue;
                    }
                    let offset = frame.lines.len() as u64;
                    frame
                        .lines
                        .extend_from_slice(bytemuck::cast_slice(vertices.as_slice()));
                    let kind = DrawKind::Lines {
                        offset,
                        count: vertices.len() as u32,
                    };
                    (kind, DrawShape::Lines)
                }
                RenderCommand::DrawFullscreen => (DrawKind::Fullscreen, DrawShape::Fullscreen),
            };

            let Some(shader_id) = shader else {
                log::warn!("draw issued with no shader bound, skipping");
                continue;
            };
            let Some(target) = self.target_format(builder.target) else {
                log::warn!("draw into missing target {:?}, skipping", builder.target);
                continue;
            };
            let Some(entry) = self.shaders.get_mut(shader_id.0 as usize) else {
                continue;
            };

            let uniform_offset = match entry.frame_offset {
                Some(offset) => offset,
                None => {
                    let padding = frame.uniforms.len().next_multiple_of(alignment as usize);
                    frame.uniforms.resize(padding, 0);
                    let offset = frame.uniforms.len() as u32;
                    frame.uniforms.extend_from_slice(entry.block.bytes());
                    entry.frame_offset = Some(offset);
                    offset
                }
            };
            frame.shaders_used.insert(shader_id);

            let textures = if self.shaders[shader_id.0 as usize].textures.is_empty() {
                None
            } else {
                let used = self.shaders[shader_id.0 as usize].textures.len();
                let key = (shader_id, bound[..used].to_vec());
                match groups.get(&key) {
                    Some(index) => Some(*index),
                    None => {
                        let group =
                            self.create_texture_group(&self.shaders[shader_id.0 as usize], &bound);
                        group.map(|group| {
                            frame.texture_groups.push(group);
                            let index = frame.texture_groups.len() - 1;
                            groups.insert(key, index);
                            index
                        })
                    }
                }
            };

            let pipeline = PipelineKey {
                shader: shader_id,
                state: state.fixed(),
                target,
                shape,
            };
            if !self.pipelines.contains_key(&pipeline) {
                let created = create_pipeline(
                    &self.gpu.device,
                    &self.shaders[shader_id.0 as usize],
                    &pipeline,
                    line_mode,
                );
                self.pipelines.insert(pipeline, created);
            }

            builder.draw(DrawOp {
                pipeline,
                shader: shader_id,
                uniform_offset,
                textures,
                stencil_reference: state.stencil_func.reference,
                kind,
            });
        }

        frame.segments = builder.finish();
        frame
    }

    /// Copies the frame's uniform snapshots to the GPU, growing the buffer if needed.
    fn upload_uniforms(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let needed = data.len() as u64;
        if self.uniform_buffer.as_ref().is_none_or(|b| b.size() < needed) {
            self.uniform_buffer = Some(self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("frame uniforms"),
                size: needed.next_power_of_two().max(4096),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(buffer) = &self.uniform_buffer {
            self.gpu.queue.write_buffer(buffer, 0, data);
        }
    }

    fn color_attachment<'v>(
        &'v self,
        target: RenderTarget,
        screen: Option<&'v wgpu::TextureView>,
    ) -> Option<&'v wgpu::TextureView> {
        match target {
            RenderTarget::Screen => screen,
            RenderTarget::FrameBuffer(id) => self
                .framebuffers
                .get(&id)
                .and_then(|fb| fb.color.as_ref())
                .map(|a| &a.view),
        }
    }

    /// Second replay pass.
    fn encode(
        &self,
        frame: &PreparedFrame,
        uniform_groups: &HashMap<ShaderId, wgpu::BindGroup>,
        screen: Option<&wgpu::TextureView>,
        encoder: &mut wgpu::CommandEncoder,
    ) {
        let instance_buffer = (!frame.instances.is_empty()).then(|| {
            self.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("frame instances"),
                    contents: &frame.instances,
                    usage: wgpu::BufferUsages::VERTEX,
                })
        });
        let line_buffer = (!frame.lines.is_empty()).then(|| {
            self.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("frame lines"),
                    contents: &frame.lines,
                    usage: wgpu::BufferUsages::VERTEX,
                })
        });

        for segment in &frame.segments {
            match segment {
                Segment::Pass { target, clear, ops } => {
                    if *target == RenderTarget::Screen && screen.is_none() {
                        continue;
                    }
                    let Some(format) = self.target_format(*target) else {
                        log::warn!("skipping pass into missing target {target:?}");
                        continue;
                    };
                    let clear = clear.unwrap_or_default();
                    let depth_view = match target {
                        RenderTarget::Screen => None,
                        RenderTarget::FrameBuffer(id) => self
                            .framebuffers
                            .get(id)
                            .and_then(|fb| fb.depth.as_ref())
                            .map(|a| &a.view),
                    };
                    let color_attachment = self.color_attachment(*target, screen).map(|view| {
                        wgpu::RenderPassColorAttachment {
                            view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: match clear.color {
                                    Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                                        r: c.x as f64,
                                        g: c.y as f64,
                                        b: c.z as f64,
                                        a: c.w as f64,
                                    }),
                                    None => wgpu::LoadOp::Load,
                                },
                                store: wgpu::StoreOp::Store,
                            },
                            depth_slice: None,
                        }
                    });
                    let has_stencil = format.depth.is_some_and(|f| f.has_stencil_aspect());
                    let depth_attachment =
                        depth_view.map(|view| wgpu::RenderPassDepthStencilAttachment {
                            view,
                            depth_ops: Some(wgpu::Operations {
                                load: match clear.depth {
                                    Some(d) => wgpu::LoadOp::Clear(d),
                                    None => wgpu::LoadOp::Load,
                                },
                                store: wgpu::StoreOp::Store,
                            }),
                            stencil_ops: has_stencil.then_some(wgpu::Operations {
                                load: match clear.stencil {
                                    Some(s) => wgpu::LoadOp::Clear(s),
                                    None => wgpu::LoadOp::Load,
                                },
                                store: wgpu::StoreOp::Store,
                            }),
                        });

                    let target_size = match target {
                        RenderTarget::Screen => self.gpu.size(),
                        RenderTarget::FrameBuffer(id) => self
                            .framebuffers
                            .get(id)
                            .map(|fb| fb.desc.size)
                            .unwrap_or_default(),
                    };

                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("tessera pass"),
                        color_attachments: &[color_attachment],
                        depth_stencil_attachment: depth_attachment,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });

                    let mut current_pipeline: Option<PipelineKey> = None;
                    let mut current_reference: Option<u32> = None;
                    for op in ops {
                        match op {
                            PassOp::Viewport(size) => {
                                let width = size.width.min(target_size.width).max(1);
                                let height = size.height.min(target_size.height).max(1);
                                pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
                            }
                            PassOp::Draw(draw) => {
                                let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
                                    continue;
                                };
                                let Some(uniforms) = uniform_groups.get(&draw.shader) else {
                                    continue;
                                };
                                if current_pipeline != Some(draw.pipeline) {
                                    pass.set_pipeline(pipeline);
                                    current_pipeline = Some(draw.pipeline);
                                }
                                if has_stencil && current_reference != Some(draw.stencil_reference) {
                                    pass.set_stencil_reference(draw.stencil_reference);
                                    current_reference = Some(draw.stencil_reference);
                                }
                                pass.set_bind_group(0, uniforms, &[draw.uniform_offset]);
                                if let Some(index) = draw.textures {
                                    pass.set_bind_group(1, &frame.texture_groups[index], &[]);
                                }
                                self.draw(&mut pass, draw, instance_buffer.as_ref(), line_buffer.as_ref());
                            }
                        }
                    }
                }
                Segment::Resolve { from, to } => self.resolve(encoder, *from, *to),
            }
        }
    }

    fn draw(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        draw: &DrawOp,
        instances: Option<&wgpu::Buffer>,
        lines: Option<&wgpu::Buffer>,
    ) {
        match draw.kind {
            DrawKind::Mesh(id) => {
                let Some(mesh) = self.meshes.get(id.0 as usize) else {
                    return;
                };
                if mesh.index_count == 0 {
                    return;
                }
                pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
            DrawKind::Instanced { mesh, offset, count } => {
                let (Some(mesh), Some(instances)) = (self.meshes.get(mesh.0 as usize), instances)
                else {
                    return;
                };
                if mesh.index_count == 0 {
                    return;
                }
                let end = offset + count as u64 * INSTANCE_STRIDE;
                pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                pass.set_vertex_buffer(1, instances.slice(offset..end));
                pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..count);
            }
            DrawKind::Lines { offset, count } => {
                let Some(lines) = lines else {
                    return;
                };
                let end = offset + count as u64 * size_of::<super::LineVertex>() as u64;
                pass.set_vertex_buffer(0, lines.slice(offset..end));
                pass.draw(0..count, 0..1);
            }
            DrawKind::Fullscreen => pass.draw(0..3, 0..1),
        }
    }

    fn resolve(&self, encoder: &mut wgpu::CommandEncoder, from: FrameBufferId, to: FrameBufferId) {
        let source = self.framebuffers.get(&from).and_then(|fb| Some((fb, fb.color.as_ref()?)));
        let destination = self.framebuffers.get(&to).and_then(|fb| Some((fb, fb.color.as_ref()?)));
        let (Some((source_fb, source)), Some((dest_fb, dest))) = (source, destination) else {
            log::warn!("can't resolve {from:?} into {to:?}: missing color attachment");
            return;
        };
        if source_fb.desc.size != dest_fb.desc.size || dest_fb.samples != 1 {
            log::warn!("can't resolve {from:?} into {to:?}: incompatible framebuffers");
            return;
        }

        if source_fb.samples > 1 {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("resolve"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &source.view,
                    resolve_target: Some(&dest.view),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        } else {
            encoder.copy_texture_to_texture(
                source.texture.as_image_copy(),
                dest.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: source_fb.desc.size.width,
                    height: source_fb.desc.size.height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }
}

impl RenderDevice for WgpuDevice {
    fn compile_shader(&mut self, desc: &ShaderDescriptor<'_>) -> Result<ShaderId, ShaderError> {
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.name),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} uniform layout", desc.name)),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(desc.uniform_size as u64),
                },
                count: None,
            }],
        });

        let texture_entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .textures
            .iter()
            .enumerate()
            .flat_map(|(i, decl)| {
                let (sample_type, view_dimension, sampler) = match decl.kind {
                    TextureKind::D2 => (
                        wgpu::TextureSampleType::Float { filterable: true },
                        wgpu::TextureViewDimension::D2,
                        wgpu::SamplerBindingType::Filtering,
                    ),
                    TextureKind::Cube => (
                        wgpu::TextureSampleType::Float { filterable: true },
                        wgpu::TextureViewDimension::Cube,
                        wgpu::SamplerBindingType::Filtering,
                    ),
                    TextureKind::Depth => (
                        wgpu::TextureSampleType::Depth,
                        wgpu::TextureViewDimension::D2,
                        wgpu::SamplerBindingType::Comparison,
                    ),
                };
                [
                    wgpu::BindGroupLayoutEntry {
                        binding: 2 * i as u32,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type,
                            view_dimension,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2 * i as u32 + 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(sampler),
                        count: None,
                    },
                ]
            })
            .collect();
        let texture_layout = (!texture_entries.is_empty()).then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{} texture layout", desc.name)),
                entries: &texture_entries,
            })
        });

        let mut layouts = vec![&uniform_layout];
        layouts.extend(texture_layout.as_ref());
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} pipeline layout", desc.name)),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ShaderError::Compile {
                name: desc.name.to_string(),
                message: error.to_string(),
            });
        }

        log::debug!("compiled shader {}", desc.name);
        self.shaders.push(ShaderEntry {
            name: desc.name.to_string(),
            module,
            uniform_layout,
            texture_layout,
            pipeline_layout,
            vertex_stride: desc.vertex_stride,
            vertex_attributes: desc.vertex_attributes.clone(),
            instance_attributes: desc.instance_attributes.clone(),
            uniform_size: desc.uniform_size,
            textures: desc.textures.to_vec(),
            block: UniformBlock::with_size(desc.uniform_size),
            frame_offset: None,
        });
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn create_mesh(&mut self, geometry: &ExtractedGeometry) -> MeshId {
        let vertices = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh vertices"),
                contents: &geometry.data,
                usage: wgpu::BufferUsages::VERTEX,
            });
        let indices = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh indices"),
                contents: bytemuck::cast_slice(geometry.indices.as_slice()),
                usage: wgpu::BufferUsages::INDEX,
            });
        self.meshes.push(MeshBuffers {
            vertices,
            indices,
            index_count: geometry.indices.len() as u32,
        });
        MeshId(self.meshes.len() as u32 - 1)
    }

    fn create_texture(&mut self, label: &str, data: &TextureData<'_>) -> TextureId {
        let (width, height, layers, kind) = match data {
            TextureData::Rgba { width, height, .. } => (*width, *height, 1, TextureKind::D2),
            TextureData::Cube { size, .. } => (*size, *size, 6, TextureKind::Cube),
        };
        let layer_len = (width * height * 4) as usize;
        let mut pixels = match data {
            TextureData::Rgba { pixels, .. } => pixels.to_vec(),
            TextureData::Cube { faces, .. } => faces.concat(),
        };
        if pixels.len() != layer_len * layers as usize {
            log::error!(
                "texture {label}: expected {} bytes, got {}; filling with white",
                layer_len * layers as usize,
                pixels.len()
            );
            pixels = vec![255; layer_len * layers as usize];
        }

        let texture = self.gpu.device.create_texture_with_data(
            &self.gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: width.max(1),
                    height: height.max(1),
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &pixels,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(match kind {
                TextureKind::Cube => wgpu::TextureViewDimension::Cube,
                _ => wgpu::TextureViewDimension::D2,
            }),
            ..Default::default()
        });
        self.textures.push(TextureEntry { view, kind });
        TextureId(self.textures.len() as u32 - 1)
    }

    fn create_framebuffer(
        &mut self,
        label: &str,
        desc: &FrameBufferDesc,
    ) -> Result<FrameBufferId, FrameBufferError> {
        super::validate_framebuffer(desc)?;
        let samples = desc.msaa.max(1);
        if samples != 1 && samples != 4 {
            return Err(FrameBufferError::Incomplete(format!(
                "{samples} samples per pixel aren't supported"
            )));
        }
        let limit = self.gpu.device.limits().max_texture_dimension_2d;
        if desc.size.width > limit || desc.size.height > limit {
            return Err(FrameBufferError::Incomplete(format!(
                "{:?} exceeds the {limit} pixel limit",
                desc.size
            )));
        }

        let extent = wgpu::Extent3d {
            width: desc.size.width,
            height: desc.size.height,
            depth_or_array_layers: 1,
        };
        let attachment = |format: wgpu::TextureFormat, usage: wgpu::TextureUsages, name: &str| {
            let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&format!("{label} {name}")),
                size: extent,
                mip_level_count: 1,
                sample_count: samples,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            Attachment {
                texture,
                view,
                format,
            }
        };

        let color = desc.color.map(|format| {
            let format = match format {
                ColorFormat::Rgb | ColorFormat::Rgba => wgpu::TextureFormat::Rgba8Unorm,
                ColorFormat::Hdr => wgpu::TextureFormat::Rgba16Float,
            };
            let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
            if samples == 1 {
                usage |= wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST;
            }
            attachment(format, usage, "color")
        });
        let depth = desc.depth.map(|format| match format {
            DepthFormat::DepthStencil => attachment(
                wgpu::TextureFormat::Depth24PlusStencil8,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
                "depth",
            ),
            DepthFormat::SampledDepth => attachment(
                wgpu::TextureFormat::Depth32Float,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                "depth",
            ),
        });

        let id = FrameBufferId(self.next_framebuffer);
        self.next_framebuffer += 1;
        self.framebuffers.insert(
            id,
            FrameBufferTextures {
                desc: *desc,
                samples,
                color,
                depth,
            },
        );
        log::debug!("created framebuffer {label} {:?}", desc.size);
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, id: FrameBufferId) {
        if let Some(fb) = self.framebuffers.remove(&id) {
            for attachment in fb.color.iter().chain(fb.depth.iter()) {
                attachment.texture.destroy();
            }
        }
    }

    fn screen_size(&self) -> Size {
        self.gpu.size()
    }

    fn execute(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    fn end_frame(&mut self) {
        let commands = std::mem::take(&mut self.commands);
        let frame = self.prepare(&commands);

        let mut uniform_groups = HashMap::new();
        self.upload_uniforms(&frame.uniforms);
        if let Some(buffer) = self.uniform_buffer.as_ref().filter(|_| !frame.uniforms.is_empty()) {
            for id in &frame.shaders_used {
                let shader = &self.shaders[id.0 as usize];
                let group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("{} uniforms", shader.name)),
                    layout: &shader.uniform_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: 0,
                            size: wgpu::BufferSize::new(shader.uniform_size as u64),
                        }),
                    }],
                });
                uniform_groups.insert(*id, group);
            }
        }

        let wants_screen = frame.segments.iter().any(|s| {
            matches!(
                s,
                Segment::Pass {
                    target: RenderTarget::Screen,
                    ..
                }
            )
        });
        let output = if wants_screen {
            match self.gpu.surface.get_current_texture() {
                Ok(output) => Some(output),
                Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                    log::debug!("surface out of date, reconfiguring");
                    self.gpu.reconfigure();
                    None
                }
                Err(e) => {
                    log::warn!("dropping screen output this frame: {e}");
                    None
                }
            }
        } else {
            None
        };
        let screen = output
            .as_ref()
            .map(|o| o.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tessera frame"),
            });
        self.encode(&frame, &uniform_groups, screen.as_ref(), &mut encoder);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        if let Some(output) = output {
            output.present();
        }
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    shader: &ShaderEntry,
    key: &PipelineKey,
    line_mode: bool,
) -> wgpu::RenderPipeline {
    let mut buffers = Vec::new();
    if key.shape != DrawShape::Fullscreen && !shader.vertex_attributes.is_empty() {
        buffers.push(wgpu::VertexBufferLayout {
            array_stride: shader.vertex_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &shader.vertex_attributes,
        });
    }
    if key.shape == DrawShape::Instanced {
        buffers.push(wgpu::VertexBufferLayout {
            array_stride: INSTANCE_STRIDE,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &shader.instance_attributes,
        });
    }

    let blend = key.state.blend.map(|(src, dst)| {
        let component = wgpu::BlendComponent {
            src_factor: src.to_wgpu(),
            dst_factor: dst.to_wgpu(),
            operation: wgpu::BlendOperation::Add,
        };
        wgpu::BlendState {
            color: component,
            alpha: component,
        }
    });
    let targets = [key.target.color.map(|format| wgpu::ColorTargetState {
        format,
        blend,
        write_mask: if key.target.write_alpha {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::COLOR
        },
    })];

    let depth_stencil = key.target.depth.map(|format| wgpu::DepthStencilState {
        format,
        depth_write_enabled: key.state.depth_write,
        depth_compare: key.state.depth_compare.to_wgpu(),
        stencil: match key.state.stencil {
            Some(stencil) if format.has_stencil_aspect() => {
                let face = wgpu::StencilFaceState {
                    compare: stencil.compare.to_wgpu(),
                    fail_op: stencil.op.stencil_fail.to_wgpu(),
                    depth_fail_op: stencil.op.depth_fail.to_wgpu(),
                    pass_op: stencil.op.pass.to_wgpu(),
                };
                wgpu::StencilState {
                    front: face,
                    back: face,
                    read_mask: stencil.read_mask,
                    write_mask: stencil.write_mask,
                }
            }
            _ => wgpu::StencilState::default(),
        },
        bias: wgpu::DepthBiasState::default(),
    });

    let polygon_mode = match key.state.mode {
        RenderMode::Line if line_mode => wgpu::PolygonMode::Line,
        _ => wgpu::PolygonMode::Fill,
    };

    log::trace!("creating pipeline for {} {:?}", shader.name, key.shape);
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&shader.name),
        layout: Some(&shader.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader.module,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: key.target.color.map(|_| wgpu::FragmentState {
            module: &shader.module,
            entry_point: Some("fs_main"),
            targets: &targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: if key.shape == DrawShape::Lines {
                wgpu::PrimitiveTopology::LineList
            } else {
                wgpu::PrimitiveTopology::TriangleList
            },
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: key.state.cull.map(CullFace::to_wgpu),
            polygon_mode,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: key.target.samples,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

/// One-pixel textures bound to slots nothing valid was bound to.
fn create_fallbacks(gpu: &GpuContext) -> Fallbacks {
    let color = |layers: u32, label: &str| {
        gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &vec![255u8; 4 * layers as usize],
        )
    };
    let white = color(1, "fallback white").create_view(&wgpu::TextureViewDescriptor::default());
    let cube = color(6, "fallback cube").create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::Cube),
        ..Default::default()
    });

    let depth_texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("fallback depth"),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let depth = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

    // Nothing in the fallback shadow map occludes anything.
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fallback init"),
        });
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("clear fallback depth"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &depth,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    gpu.queue.submit(std::iter::once(encoder.finish()));

    Fallbacks { white, cube, depth }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn draw() -> DrawOp {
        DrawOp {
            pipeline: PipelineKey {
                shader: ShaderId(0),
                state: TrackedState::default().fixed(),
                target: TargetFormat {
                    color: None,
                    write_alpha: true,
                    depth: None,
                    samples: 1,
                },
                shape: DrawShape::Fullscreen,
            },
            shader: ShaderId(0),
            uniform_offset: 0,
            textures: None,
            stencil_reference: 0,
            kind: DrawKind::Fullscreen,
        }
    }

    #[test]
    fn disabled_depth_test_neither_compares_nor_writes() {
        let mut state = TrackedState::default();
        state.apply(StateChange::DepthFunc(Compare::LessEqual));
        let fixed = state.fixed();
        assert!(!fixed.depth_write);
        assert_eq!(fixed.depth_compare, Compare::Always);

        state.apply(StateChange::DepthTest(true));
        state.apply(StateChange::DepthMask(false));
        let fixed = state.fixed();
        assert!(!fixed.depth_write);
        assert_eq!(fixed.depth_compare, Compare::LessEqual);
    }

    #[test]
    fn stencil_reference_is_not_part_of_the_pipeline() {
        let mut a = TrackedState::default();
        a.apply(StateChange::StencilTest(true));
        let mut b = a;
        b.apply(StateChange::StencilFunc(StencilFunc {
            compare: Compare::Always,
            reference: 1,
            mask: 0xFF,
        }));
        assert_eq!(a.fixed(), b.fixed());
    }

    #[test]
    fn clear_after_draw_starts_a_new_pass() {
        let fb = RenderTarget::FrameBuffer(FrameBufferId(0));
        let mut builder = SegmentBuilder::new();
        builder.bind(fb);
        builder.clear(ClearRequest::color(Vec4::ONE));
        builder.clear(ClearRequest::depth());
        builder.draw(draw());
        builder.clear(ClearRequest::depth());
        builder.draw(draw());
        let segments = builder.finish();

        assert_eq!(segments.len(), 2);
        match &segments[0] {
            Segment::Pass { clear, .. } => {
                let clear = clear.unwrap_or_default();
                assert_eq!(clear.color, Some(Vec4::ONE));
                assert_eq!(clear.depth, Some(1.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_binds_produce_no_passes() {
        let mut builder = SegmentBuilder::new();
        builder.bind(RenderTarget::FrameBuffer(FrameBufferId(1)));
        builder.viewport(Size::new(4, 4));
        builder.bind(RenderTarget::Screen);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn viewport_carries_into_following_passes() {
        let mut builder = SegmentBuilder::new();
        builder.viewport(Size::new(64, 32));
        builder.draw(draw());
        builder.resolve(FrameBufferId(0), FrameBufferId(1));
        builder.draw(draw());
        let segments = builder.finish();

        assert_eq!(segments.len(), 3);
        assert!(matches!(segments[1], Segment::Resolve { .. }));
        match &segments[2] {
            Segment::Pass { ops, .. } => {
                assert!(matches!(ops[0], PassOp::Viewport(s) if s == Size::new(64, 32)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

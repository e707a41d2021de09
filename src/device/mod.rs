//! The seam between the renderer and a graphics API.
//!
//! Everything above this module talks to a [`RenderDevice`]: it creates resources
//! through a handful of methods and then issues an ordered stream of
//! [`RenderCommand`]s. Two implementations ship with the crate:
//!
//! - [`HeadlessDevice`] records every command and hands out sequential handles.
//!   It is what the tests inspect to check draw order and state filtering.
//! - [`WgpuDevice`] replays each frame's commands into wgpu render passes.

mod headless;
mod wgpu_device;

pub use headless::HeadlessDevice;
pub use wgpu_device::WgpuDevice;

use crate::geometry::ExtractedGeometry;
use crate::state::StateChange;
use crate::uniform::{CompiledUniformProp, UniformValue};
use glam::{Mat4, Vec3, Vec4};
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameBufferId(pub u32);

/// Width and height in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    Screen,
    FrameBuffer(FrameBufferId),
}

/// What a shader texture slot samples from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureBinding {
    Texture(TextureId),
    /// The (resolved) color attachment of a framebuffer.
    FrameBufferColor(FrameBufferId),
    /// The depth attachment of a depth-only framebuffer.
    FrameBufferDepth(FrameBufferId),
}

/// Attachments to clear on the currently bound target.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ClearRequest {
    pub color: Option<Vec4>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

impl ClearRequest {
    pub fn color(color: Vec4) -> Self {
        Self {
            color: Some(color),
            ..Default::default()
        }
    }

    /// Color, depth to 1.0 and stencil to 0.
    pub fn all(color: Vec4) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
            stencil: Some(0),
        }
    }

    pub fn depth() -> Self {
        Self {
            depth: Some(1.0),
            ..Default::default()
        }
    }
}

/// One vertex of a debug line.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl LineVertex {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
        }
    }
}

/// A single device operation, in submission order.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderCommand {
    BindTarget(RenderTarget),
    Viewport(Size),
    Clear(ClearRequest),
    State(StateChange),
    UseShader(ShaderId),
    SetUniform {
        shader: ShaderId,
        prop: CompiledUniformProp,
        index: u32,
        value: UniformValue,
    },
    BindTexture {
        slot: u32,
        texture: TextureBinding,
    },
    DrawMesh(MeshId),
    DrawInstanced {
        mesh: MeshId,
        transforms: Vec<Mat4>,
    },
    DrawLines(Vec<LineVertex>),
    /// A single triangle covering the viewport; the shader generates positions.
    DrawFullscreen,
    /// Resolves a multisampled framebuffer into a single-sampled one.
    Resolve {
        from: FrameBufferId,
        to: FrameBufferId,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    Cube,
    /// A depth texture sampled with a comparison sampler.
    Depth,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDecl {
    pub name: String,
    pub kind: TextureKind,
}

/// Everything a device needs to build one shader program.
#[derive(Clone, Debug)]
pub struct ShaderDescriptor<'a> {
    pub name: &'a str,
    /// Complete WGSL module, prelude included.
    pub source: &'a str,
    /// Stride of the per-vertex buffer; zero for shaders without vertex input.
    pub vertex_stride: u64,
    pub vertex_attributes: Vec<wgpu::VertexAttribute>,
    /// Per-instance attributes, stride 64 (one matrix).
    pub instance_attributes: Vec<wgpu::VertexAttribute>,
    pub uniform_size: u32,
    pub textures: &'a [TextureDecl],
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShaderError {
    #[error("shader {name} failed to compile: {message}")]
    Compile { name: String, message: String },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    /// No alpha channel is written.
    Rgb,
    Rgba,
    /// 16-bit float RGBA for HDR rendering.
    Hdr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    /// Combined depth and stencil, not sampleable.
    DepthStencil,
    /// Depth only, sampleable as a shadow map.
    SampledDepth,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameBufferDesc {
    pub size: Size,
    pub color: Option<ColorFormat>,
    pub depth: Option<DepthFormat>,
    /// Sample count; 1 or less means no multisampling.
    pub msaa: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameBufferError {
    #[error("framebuffer has a zero dimension ({0:?})")]
    ZeroSized(Size),
    #[error("framebuffer has no attachments")]
    NoAttachments,
    #[error("framebuffer incomplete: {0}")]
    Incomplete(String),
}

/// Pixel data for a texture.
#[derive(Clone, Debug)]
pub enum TextureData<'a> {
    /// RGBA8 pixels, row-major.
    Rgba {
        width: u32,
        height: u32,
        pixels: &'a [u8],
    },
    /// Six RGBA8 faces in +X, -X, +Y, -Y, +Z, -Z order.
    Cube {
        size: u32,
        faces: [&'a [u8]; 6],
    },
}

/// A graphics backend.
pub trait RenderDevice {
    fn compile_shader(&mut self, desc: &ShaderDescriptor<'_>) -> Result<ShaderId, ShaderError>;
    fn create_mesh(&mut self, geometry: &ExtractedGeometry) -> MeshId;
    fn create_texture(&mut self, label: &str, data: &TextureData<'_>) -> TextureId;
    fn create_framebuffer(
        &mut self,
        label: &str,
        desc: &FrameBufferDesc,
    ) -> Result<FrameBufferId, FrameBufferError>;
    fn destroy_framebuffer(&mut self, id: FrameBufferId);

    /// Current size of the screen target.
    fn screen_size(&self) -> Size;

    fn execute(&mut self, command: RenderCommand);

    /// Submits everything issued since the last call and presents.
    fn end_frame(&mut self);
}

/// Checks a framebuffer description before any backend sees it.
pub(crate) fn validate_framebuffer(desc: &FrameBufferDesc) -> Result<(), FrameBufferError> {
    if desc.size.is_empty() {
        return Err(FrameBufferError::ZeroSized(desc.size));
    }
    if desc.color.is_none() && desc.depth.is_none() {
        return Err(FrameBufferError::NoAttachments);
    }
    if desc.msaa > 1 && desc.depth == Some(DepthFormat::SampledDepth) {
        return Err(FrameBufferError::Incomplete(
            "a sampled depth attachment can't be multisampled".into(),
        ));
    }
    Ok(())
}

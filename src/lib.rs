//! # Tessera
//!
//! **A real-time 3D renderer core with a lazily rebuilt post-processing chain.**
//!
//! Meshes, lights, materials and a camera go in; an ordered stream of draw calls
//! comes out. On top of the scene sits a configurable chain of fullscreen effects:
//! blur, color grading, vignette, tone mapping.
//!
//! ## Quick Start
//!
//! ```
//! use tessera::*;
//!
//! // HeadlessDevice records commands; use WgpuDevice to put pixels on screen.
//! let mut renderer = Renderer::new(HeadlessDevice::new(), RenderSettings::default());
//! let cube = renderer.make_mesh(&Geometry::cube(1.0));
//! let blur = renderer.add_effect(|shaders| BlurEffect::new(shaders).with_factor(1.0));
//!
//! let mut world = World::new();
//! world.add_mesh(
//!     MeshInstance::new(cube, Material::lit(Vec3::new(1.0, 0.3, 0.2)))
//!         .with_transform(Transform::from_position(Vec3::new(0.0, 0.0, -5.0)))
//!         .with_outline(Vec3::ONE),
//! );
//! world
//!     .lights
//!     .directional
//!     .push(DirectionalLight::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::ONE).with_shadow());
//!
//! renderer.update(1.0 / 60.0);
//! renderer.render(&world, &Camera::new());
//!
//! // switching an effect off rebuilds the chain on the next render
//! renderer.effects_mut().effect_mut(blur).unwrap().factor.factor = 0.0;
//! renderer.render(&world, &Camera::new());
//! assert_eq!(renderer.effects().task_count(), 0);
//! ```
//!
//! ## Design
//!
//! - **One vertex buffer, many shaders.** Attribute slots are assigned once across
//!   every built-in shader ([`compile_registry`]), so lit, unlit, instanced and
//!   depth-only programs all read the same uploaded geometry.
//! - **One seam to the GPU.** Everything talks to a [`RenderDevice`]. Tests run on
//!   [`HeadlessDevice`] and inspect the recorded [`RenderCommand`]s.
//! - **Redundant state never reaches the device.** The [`StateChanger`] compares
//!   each request against a cache first.
//! - **Effects are open.** Implement [`Effect`] for anything the built-ins don't cover.

mod camera;
mod device;
mod framebuffer;
mod geometry;
mod gpu;
mod line_drawer;
mod material;
pub mod postproc;
mod renderer;
mod settings;
mod shader;
pub mod shader_library;
mod shadow;
mod state;
mod uniform;
mod vertex_layout;
mod world;

pub use camera::{Camera, CompiledCamera, OrthoCamera, direction_from_yaw_pitch, yaw_pitch_from_direction};
pub use device::{
    ClearRequest, ColorFormat, DepthFormat, FrameBufferDesc, FrameBufferError, FrameBufferId,
    HeadlessDevice, LineVertex, MeshId, RenderCommand, RenderDevice, RenderTarget, ShaderDescriptor,
    ShaderError, ShaderId, Size, TextureBinding, TextureData, TextureDecl, TextureId, TextureKind,
    WgpuDevice,
};
pub use framebuffer::FrameBuffer;
pub use geometry::{ExtractedGeometry, Face, Geometry, Vertex, extract};
pub use gpu::{GpuContext, GpuError};
pub use line_drawer::{LineDrawer, MAX_LINES_PER_BATCH};
pub use material::{ALPHA_TRANSPARENCY_LIMIT, DefaultMaterial, Material, UnlitMaterial};
pub use postproc::{
    ALMOST_ZERO, BlurEffect, DebugUi, Effect, EffectGuard, EffectHandle, EffectProperty, EffectStack,
    FactorEffect, GraphBuilder, PassContext, PropertyWidget, RenderSource, SimpleEffect, TaskIndex,
    TaskStep,
};
pub use renderer::{OUTLINE_SCALE, Renderer};
pub use settings::{RenderSettings, SettingsError};
pub use shader::{ShaderProgram, ShaderSource, TextureSlot};
pub use shader_library::{MAX_FRUSTUM_LIGHTS, PostProcKind, ShaderLibrary};
pub use shadow::{ShadowCamera, ShadowFit, shadow_camera_follow, shadow_camera_tight_fit};
pub use state::{
    Blend, Compare, CullFace, GraphicsState, MAX_TEXTURES_SUPPORTED, RenderContext, RenderMode,
    StateCache, StateChange, StateChanger, StencilAction, StencilFunc, StencilOp,
};
pub use uniform::{
    CompiledUniformBuffer, CompiledUniformProp, Uniform, UniformBlock, UniformBufferDescription,
    UniformType, UniformValue, compile_uniform_buffer,
};
pub use vertex_layout::{
    AttributeKind, AttributeRegistry, AttributeRequest, AttributeRequestSet, CompiledAttribute,
    CompiledGeometryLayout, CompiledShaderLayout, GeometryElement, InstanceAttribute,
    compile_geometry_layout, compile_registry, compile_shader_layout,
};
pub use world::{
    Billboarding, DebugLine, DirectionalLight, FrustumLight, InstancedMesh, LineStyle, Lights,
    MeshInstance, PointLight, Skybox, Transform, World,
};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

//! Shader sources and loaded shader programs.
//!
//! A [`ShaderSource`] is the text contract between Rust and WGSL: a name, the vertex
//! attributes the shader reads, its uniform members, its textures, and a WGSL body
//! defining `vs_main` and `fs_main`. Everything the body refers to besides its own
//! functions is generated as a prelude:
//!
//! - `struct Uniforms` bound as `u` at `@group(0) @binding(0)`;
//! - for texture `i` named `n`: `t_n` at `@group(1) @binding(2i)` and its sampler
//!   `s_n` at `@binding(2i + 1)`;
//! - `struct VertexInput` with one `@location` per attribute.
//!
//! [`ShaderProgram::load`] compiles the module on a device. A program that failed
//! to compile stays around, reports `is_loaded() == false`, and ignores every call.

use crate::device::{
    RenderDevice, ShaderDescriptor, ShaderId, TextureBinding, TextureDecl, TextureKind,
};
use crate::state::{MAX_TEXTURES_SUPPORTED, RenderContext};
use crate::uniform::{
    CompiledUniformBuffer, Uniform, UniformBufferDescription, UniformType, UniformValue,
    compile_uniform_buffer,
};
use crate::vertex_layout::{AttributeRequestSet, CompiledGeometryLayout, CompiledShaderLayout};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::collections::HashSet;
use std::fmt::Write;

/// Name of the member added to shaders that declare no uniforms; WGSL has no empty structs.
const PLACEHOLDER_UNIFORM: &str = "_unused";

#[derive(Clone, Debug)]
pub struct ShaderSource {
    pub name: String,
    pub attributes: AttributeRequestSet,
    pub uniforms: UniformBufferDescription,
    pub textures: Vec<TextureDecl>,
    pub body: String,
}

impl ShaderSource {
    pub fn new(name: impl Into<String>, attributes: AttributeRequestSet, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes,
            uniforms: UniformBufferDescription::new(),
            textures: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_uniforms(mut self, uniforms: UniformBufferDescription) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn with_texture(mut self, name: impl Into<String>, kind: TextureKind) -> Self {
        assert!(
            self.textures.len() < MAX_TEXTURES_SUPPORTED,
            "{} declares more than {MAX_TEXTURES_SUPPORTED} textures",
            self.name
        );
        self.textures.push(TextureDecl {
            name: name.into(),
            kind,
        });
        self
    }

    fn effective_uniforms(&self) -> UniformBufferDescription {
        if self.uniforms.is_empty() {
            UniformBufferDescription::new().with(UniformType::Vec4, PLACEHOLDER_UNIFORM)
        } else {
            self.uniforms.clone()
        }
    }

    /// The generated declarations every body is appended to.
    pub fn prelude(&self, layout: &CompiledShaderLayout) -> String {
        let mut src = self.effective_uniforms().to_wgsl("Uniforms");
        src.push_str("@group(0) @binding(0) var<uniform> u: Uniforms;\n");

        for (i, texture) in self.textures.iter().enumerate() {
            let (ty, sampler) = match texture.kind {
                TextureKind::D2 => ("texture_2d<f32>", "sampler"),
                TextureKind::Cube => ("texture_cube<f32>", "sampler"),
                TextureKind::Depth => ("texture_depth_2d", "sampler_comparison"),
            };
            let _ = writeln!(
                src,
                "@group(1) @binding({}) var t_{}: {ty};\n@group(1) @binding({}) var s_{}: {sampler};",
                2 * i,
                texture.name,
                2 * i + 1,
                texture.name
            );
        }

        if layout.all().next().is_some() {
            src.push_str(&layout.wgsl_vertex_input());
        }
        src
    }

    /// Prelude followed by the body: the complete WGSL module.
    pub fn full_source(&self, layout: &CompiledShaderLayout) -> String {
        let mut src = self.prelude(layout);
        src.push('\n');
        src.push_str(&self.body);
        src
    }
}

/// Prefixes every line with its number, for compile error reports.
fn numbered(source: &str) -> String {
    let mut out = String::new();
    for (index, line) in source.lines().enumerate() {
        let _ = writeln!(out, "{:4}: {line}", index + 1);
    }
    out
}

/// A texture slot resolved by name; invalid slots ignore binds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TextureSlot(Option<u32>);

impl TextureSlot {
    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn index(&self) -> Option<u32> {
        self.0
    }
}

/// A compiled shader, or the memory of one that failed to compile.
#[derive(Debug)]
pub struct ShaderProgram {
    name: String,
    id: Option<ShaderId>,
    uniforms: CompiledUniformBuffer,
    textures: Vec<TextureDecl>,
    reported_missing: HashSet<String>,
}

impl ShaderProgram {
    /// Compiles `source` for the attribute slots in `layout`, reading vertices laid out
    /// as `geometry`.
    ///
    /// Failures are logged with the numbered source and yield an unloaded program.
    pub fn load(
        device: &mut dyn RenderDevice,
        source: &ShaderSource,
        layout: &CompiledShaderLayout,
        geometry: &CompiledGeometryLayout,
    ) -> Self {
        let uniforms = compile_uniform_buffer(&source.effective_uniforms());
        let text = source.full_source(layout);
        let has_vertex_input = !layout.attributes().is_empty();

        let descriptor = ShaderDescriptor {
            name: &source.name,
            source: &text,
            vertex_stride: if has_vertex_input { geometry.stride() } else { 0 },
            vertex_attributes: geometry.vertex_attributes_for(layout),
            instance_attributes: layout.instance_attributes(),
            uniform_size: uniforms.buffer_size(),
            textures: &source.textures,
        };

        let id = match device.compile_shader(&descriptor) {
            Ok(id) => Some(id),
            Err(err) => {
                log::error!("{err}\n{}", numbered(&text));
                None
            }
        };

        Self {
            name: source.name.clone(),
            id,
            uniforms,
            textures: source.textures.clone(),
            reported_missing: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<ShaderId> {
        self.id
    }

    pub fn is_loaded(&self) -> bool {
        self.id.is_some()
    }

    fn report_missing(&mut self, what: &str, name: &str) {
        if self.reported_missing.insert(name.to_string()) {
            log::warn!("{what} {name} not found in {}", self.name);
        }
    }

    /// Looks up a uniform member. A missing name is reported once and yields an
    /// invalid handle that later writes silently skip.
    pub fn uniform(&mut self, name: &str) -> Uniform {
        match self.uniforms.find(name) {
            Some(prop) => Uniform::new(name, Some(prop)),
            None => {
                self.report_missing("Uniform", name);
                Uniform::invalid(name)
            }
        }
    }

    /// Like [`ShaderProgram::uniform`] but for a declared texture.
    pub fn texture(&mut self, name: &str) -> TextureSlot {
        match self.textures.iter().position(|t| t.name == name) {
            Some(index) => TextureSlot(Some(index as u32)),
            None => {
                self.report_missing("Texture", name);
                TextureSlot(None)
            }
        }
    }

    /// Makes this the shader for following draws.
    pub fn use_program(&self, ctx: &mut RenderContext<'_>) {
        match self.id {
            Some(id) => ctx.use_shader(id),
            None => log::warn!("using shader {} which failed to load", self.name),
        }
    }

    /// Writes element `index` of `uniform`; no-op for invalid handles or unloaded programs.
    pub fn set_at(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, index: u32, value: UniformValue) {
        let (Some(shader), Some(prop)) = (self.id, uniform.prop()) else {
            return;
        };
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            ctx.bound_shader(),
            Some(shader),
            "setting {} on {} which isn't bound",
            uniform.name(),
            self.name
        );
        if index >= prop.array_count {
            log::warn!("{}[{index}] is out of range in {}", uniform.name(), self.name);
            return;
        }
        ctx.execute(crate::device::RenderCommand::SetUniform {
            shader,
            prop,
            index,
            value,
        });
    }

    pub fn set_bool(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, value: bool) {
        self.set_at(ctx, uniform, 0, UniformValue::Bool(value));
    }

    pub fn set_int(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, value: i32) {
        self.set_at(ctx, uniform, 0, UniformValue::Int(value));
    }

    pub fn set_float(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, value: f32) {
        self.set_at(ctx, uniform, 0, UniformValue::Float(value));
    }

    pub fn set_vec2(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, value: Vec2) {
        self.set_at(ctx, uniform, 0, UniformValue::Vec2(value));
    }

    pub fn set_vec3(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, value: Vec3) {
        self.set_at(ctx, uniform, 0, UniformValue::Vec3(value));
    }

    pub fn set_vec4(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, value: Vec4) {
        self.set_at(ctx, uniform, 0, UniformValue::Vec4(value));
    }

    pub fn set_mat4(&self, ctx: &mut RenderContext<'_>, uniform: &Uniform, value: Mat4) {
        self.set_at(ctx, uniform, 0, UniformValue::Mat4(value));
    }

    /// Binds `binding` to `slot`; invalid slots are skipped.
    pub fn bind_texture(&self, ctx: &mut RenderContext<'_>, slot: TextureSlot, binding: TextureBinding) {
        if let Some(index) = slot.0 {
            ctx.states().bind_texture(index, binding);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, RenderCommand};
    use crate::state::GraphicsState;
    use crate::vertex_layout::{AttributeKind, compile_geometry_layout, compile_registry, compile_shader_layout};

    fn source() -> ShaderSource {
        ShaderSource::new(
            "test",
            AttributeRequestSet::from([(AttributeKind::Position3, "position")]),
            "@vertex fn vs_main(v: VertexInput) -> @builtin(position) vec4<f32> { return vec4<f32>(v.position, 1.0); }",
        )
        .with_uniforms(
            UniformBufferDescription::new()
                .with(UniformType::Mat4, "u_world_from_local")
                .with(UniformType::Vec4, "u_tint"),
        )
        .with_texture("diffuse", TextureKind::D2)
    }

    fn load(device: &mut HeadlessDevice, source: &ShaderSource) -> ShaderProgram {
        let registry = compile_registry(&[], [&source.attributes]);
        let layout = compile_shader_layout(&registry, &source.attributes, None);
        ShaderProgram::load(device, source, &layout, &compile_geometry_layout(&registry))
    }

    #[test]
    fn prelude_declares_bindings() {
        let source = source();
        let registry = compile_registry(&[], [&source.attributes]);
        let layout = compile_shader_layout(&registry, &source.attributes, None);
        let prelude = source.prelude(&layout);

        assert!(prelude.contains("var<uniform> u: Uniforms;"));
        assert!(prelude.contains("@group(1) @binding(0) var t_diffuse: texture_2d<f32>;"));
        assert!(prelude.contains("@group(1) @binding(1) var s_diffuse: sampler;"));
        assert!(prelude.contains("@location(0) position: vec3<f32>,"));
    }

    #[test]
    fn shader_without_uniforms_still_gets_a_struct() {
        let source = ShaderSource::new("bare", AttributeRequestSet::new(), "");
        let registry = compile_registry(&[], [&source.attributes]);
        let layout = compile_shader_layout(&registry, &source.attributes, None);
        let prelude = source.prelude(&layout);

        assert!(prelude.contains(PLACEHOLDER_UNIFORM));
        assert!(!prelude.contains("VertexInput"));
    }

    #[test]
    fn missing_uniform_is_a_silent_no_op() {
        let mut device = HeadlessDevice::new();
        let mut program = load(&mut device, &source());
        let missing = program.uniform("u_does_not_exist");
        let tint = program.uniform("u_tint");
        assert!(!missing.is_valid());
        assert!(tint.is_valid());

        let mut state = GraphicsState::new();
        let mut ctx = RenderContext::new(&mut device, &mut state);
        program.use_program(&mut ctx);
        program.set_float(&mut ctx, &missing, 1.0);
        program.set_vec4(&mut ctx, &tint, Vec4::ONE);

        let writes = device
            .commands()
            .iter()
            .filter(|c| matches!(c, RenderCommand::SetUniform { .. }))
            .count();
        assert_eq!(writes, 1);
    }

    #[test]
    fn failed_compile_leaves_program_unloaded() {
        let mut device = HeadlessDevice::new();
        device.fail_shader("test");
        let program = load(&mut device, &source());
        assert!(!program.is_loaded());

        let mut state = GraphicsState::new();
        let mut ctx = RenderContext::new(&mut device, &mut state);
        program.use_program(&mut ctx);
        assert!(device.commands().is_empty());
    }

    #[test]
    fn texture_slots_follow_declaration_order() {
        let mut device = HeadlessDevice::new();
        let source = source().with_texture("shadow_map", TextureKind::Depth);
        let mut program = load(&mut device, &source);

        assert_eq!(program.texture("diffuse").index(), Some(0));
        assert_eq!(program.texture("shadow_map").index(), Some(1));
        assert!(!program.texture("emissive").is_valid());
    }

    #[test]
    fn numbered_source_counts_from_one() {
        assert_eq!(numbered("a\nb"), "   1: a\n   2: b\n");
    }
}

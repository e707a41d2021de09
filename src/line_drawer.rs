//! Batched debug lines.

use crate::camera::CompiledCamera;
use crate::device::{LineVertex, RenderCommand, RenderDevice};
use crate::shader::{ShaderProgram, ShaderSource};
use crate::state::RenderContext;
use crate::uniform::{Uniform, UniformBufferDescription, UniformType};
use crate::vertex_layout::{
    AttributeKind, AttributeRequestSet, compile_geometry_layout, compile_registry,
    compile_shader_layout,
};
use glam::{Vec2, Vec3};

/// Lines submitted per draw call.
pub const MAX_LINES_PER_BATCH: usize = 100;

/// Draws lines in batches. Lines are buffered by [`LineDrawer::line`] and sent
/// when the batch fills up, when the dash mode changes, or on [`LineDrawer::flush`].
#[derive(Debug)]
pub struct LineDrawer {
    program: ShaderProgram,
    clip_from_view: Uniform,
    view_from_world: Uniform,
    resolution: Uniform,
    dash_size: Uniform,
    gap_size: Uniform,
    vertices: Vec<LineVertex>,
}

impl LineDrawer {
    pub fn load(device: &mut dyn RenderDevice) -> Self {
        let attributes = AttributeRequestSet::new()
            .with(AttributeKind::Position3, "position")
            .with(AttributeKind::Color3, "color");
        let registry = compile_registry(&[], [&attributes]);
        let layout = compile_shader_layout(&registry, &attributes, None);
        let source = ShaderSource::new("lines", attributes, include_str!("shaders/lines.wgsl"))
            .with_uniforms(
                UniformBufferDescription::new()
                    .with(UniformType::Mat4, "u_clip_from_view")
                    .with(UniformType::Mat4, "u_view_from_world")
                    .with(UniformType::Vec2, "u_resolution")
                    .with(UniformType::Float, "u_dash_size")
                    .with(UniformType::Float, "u_gap_size"),
            );
        let mut program = ShaderProgram::load(device, &source, &layout, &compile_geometry_layout(&registry));

        Self {
            clip_from_view: program.uniform("u_clip_from_view"),
            view_from_world: program.uniform("u_view_from_world"),
            resolution: program.uniform("u_resolution"),
            dash_size: program.uniform("u_dash_size"),
            gap_size: program.uniform("u_gap_size"),
            program,
            vertices: Vec::with_capacity(MAX_LINES_PER_BATCH * 2),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.program.is_loaded()
    }

    /// Binds the line shader for `camera` with solid lines.
    pub fn begin(&mut self, ctx: &mut RenderContext<'_>, camera: &CompiledCamera) {
        self.flush(ctx);
        self.program.use_program(ctx);
        self.program.set_mat4(ctx, &self.clip_from_view, camera.clip_from_view);
        self.program.set_mat4(ctx, &self.view_from_world, camera.view_from_world);
        self.set_line_to_solid(ctx);
    }

    /// Dashes following lines: `dash` pixels drawn, `gap` skipped, at a window of `resolution` pixels.
    pub fn set_line_to_dash(&mut self, ctx: &mut RenderContext<'_>, resolution: Vec2, dash: f32, gap: f32) {
        self.flush(ctx);
        self.program.set_vec2(ctx, &self.resolution, resolution);
        self.program.set_float(ctx, &self.dash_size, dash);
        self.program.set_float(ctx, &self.gap_size, gap);
    }

    pub fn set_line_to_solid(&mut self, ctx: &mut RenderContext<'_>) {
        self.flush(ctx);
        self.program.set_vec2(ctx, &self.resolution, Vec2::splat(-1.0));
    }

    pub fn line(&mut self, ctx: &mut RenderContext<'_>, from: Vec3, to: Vec3, color: Vec3) {
        self.vertices.push(LineVertex::new(from, color));
        self.vertices.push(LineVertex::new(to, color));
        if self.vertices.len() >= MAX_LINES_PER_BATCH * 2 {
            self.flush(ctx);
        }
    }

    /// Submits buffered lines.
    pub fn flush(&mut self, ctx: &mut RenderContext<'_>) {
        if self.vertices.is_empty() {
            return;
        }
        let vertices = std::mem::replace(&mut self.vertices, Vec::with_capacity(MAX_LINES_PER_BATCH * 2));
        if self.program.is_loaded() {
            ctx.execute(RenderCommand::DrawLines(vertices));
        }
    }
}

//! The built-in effects.

use super::{DebugUi, Effect, FactorEffect, GraphBuilder, PassContext, TaskStep};
use crate::device::TextureBinding;
use crate::shader_library::{PostProcKind, PostProcShader, ShaderLibrary};
use crate::uniform::Uniform;
use glam::Vec2;

/// How a property is edited in the debug ui.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PropertyWidget {
    Slider { min: f32, max: f32 },
    Drag { speed: f32 },
}

/// A float uniform exposed by an effect.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectProperty {
    pub name: String,
    pub value: f32,
    pub widget: PropertyWidget,
    uniform: Uniform,
}

fn probe(shaders: &mut ShaderLibrary, kind: PostProcKind, name: &str) -> Uniform {
    match shaders.postproc_mut(kind) {
        Some(shader) => shader.program.uniform(name),
        None => Uniform::invalid(name),
    }
}

/// Binds a built-in effect shader and sets the uniforms every effect shares.
fn use_postproc<'s>(
    shaders: &'s ShaderLibrary,
    kind: PostProcKind,
    factor: f32,
    time: f32,
    input: TextureBinding,
    pass: &mut PassContext<'_>,
) -> Option<&'s PostProcShader> {
    let shader = shaders.postproc(kind)?;
    let size = pass.window_size;
    shader.program.use_program(&mut pass.ctx);
    shader.program.set_float(&mut pass.ctx, &shader.factor, factor);
    shader.program.set_vec2(
        &mut pass.ctx,
        &shader.resolution,
        Vec2::new(size.width as f32, size.height as f32),
    );
    shader.program.set_float(&mut pass.ctx, &shader.time, time);
    shader.program.bind_texture(&mut pass.ctx, shader.input, input);
    Some(shader)
}

/// One fullscreen pass through a built-in shader, blended in by `factor`.
#[derive(Debug)]
pub struct SimpleEffect {
    name: String,
    kind: PostProcKind,
    pub factor: FactorEffect,
    time: f32,
    properties: Vec<EffectProperty>,
}

impl SimpleEffect {
    pub fn new(name: impl Into<String>, kind: PostProcKind) -> Self {
        Self {
            name: name.into(),
            kind,
            factor: FactorEffect::default(),
            time: 0.0,
            properties: Vec::new(),
        }
    }

    fn push_property(mut self, shaders: &mut ShaderLibrary, name: &str, value: f32, widget: PropertyWidget) -> Self {
        self.properties.push(EffectProperty {
            name: name.to_string(),
            value,
            widget,
            uniform: probe(shaders, self.kind, name),
        });
        self
    }

    /// Exposes a float uniform of the effect's shader, edited with a slider.
    pub fn with_property(self, shaders: &mut ShaderLibrary, name: &str, value: f32, min: f32, max: f32) -> Self {
        self.push_property(shaders, name, value, PropertyWidget::Slider { min, max })
    }

    /// Exposes an unbounded float uniform, edited by dragging.
    pub fn with_drag_property(self, shaders: &mut ShaderLibrary, name: &str, value: f32, speed: f32) -> Self {
        self.push_property(shaders, name, value, PropertyWidget::Drag { speed })
    }

    pub fn invert() -> Self {
        Self::new("Invert", PostProcKind::Invert)
    }

    pub fn grayscale() -> Self {
        Self::new("Grayscale", PostProcKind::Grayscale)
    }

    /// A red vignette with animated noise, for when the player gets hurt.
    pub fn damage(shaders: &mut ShaderLibrary) -> Self {
        Self::new("Damage", PostProcKind::Damage)
            .with_drag_property(shaders, "u_vignette_radius", 0.13, 0.01)
            .with_property(shaders, "u_vignette_smoothness", 1.0, 0.001, 1.0)
            .with_property(shaders, "u_vignette_darkening", 1.0, 0.0, 1.0)
            .with_drag_property(shaders, "u_noise_scale", 25.0, 1.0)
    }

    pub fn color_grade(shaders: &mut ShaderLibrary) -> Self {
        Self::new("Color grade", PostProcKind::ColorGrade)
            .with_property(shaders, "u_brightness", 0.0, -1.0, 1.0)
            .with_property(shaders, "u_contrast", 1.0, 0.0, 3.0)
            .with_property(shaders, "u_saturation", 1.0, 0.0, 3.0)
    }

    pub fn tonemap(shaders: &mut ShaderLibrary) -> Self {
        Self::new("Tonemap", PostProcKind::Tonemap).with_property(shaders, "u_exposure", 1.0, 0.0, 10.0)
    }

    pub fn with_factor(mut self, factor: f32) -> Self {
        self.factor.factor = factor;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seconds since the chain was last built.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn property(&self, name: &str) -> Option<f32> {
        self.properties.iter().find(|p| p.name == name).map(|p| p.value)
    }

    /// Returns false if the effect has no such property.
    pub fn set_property(&mut self, name: &str, value: f32) -> bool {
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(property) => {
                property.value = value;
                true
            }
            None => false,
        }
    }
}

impl Effect for SimpleEffect {
    fn enabled(&self) -> bool {
        self.factor.enabled()
    }

    fn build(&mut self, builder: &mut GraphBuilder<'_, '_>) {
        self.time = 0.0;
        builder.push_task(&self.name, TaskStep::Simple);
    }

    fn update(&mut self, dt: f32) {
        self.time += dt;
    }

    fn gui(&mut self, ui: &mut dyn DebugUi) {
        if !ui.header(&self.name) {
            return;
        }
        ui.slider("factor", &mut self.factor.factor, 0.0, 1.0);
        for property in &mut self.properties {
            match property.widget {
                PropertyWidget::Slider { min, max } => {
                    ui.slider(&property.name, &mut property.value, min, max);
                }
                PropertyWidget::Drag { speed } => {
                    ui.drag(&property.name, &mut property.value, speed);
                }
            }
        }
    }

    fn use_shader(&mut self, _step: TaskStep, input: TextureBinding, pass: &mut PassContext<'_>) {
        let shaders = pass.shaders;
        let Some(shader) = use_postproc(shaders, self.kind, self.factor.factor, self.time, input, pass) else {
            return;
        };
        for property in &self.properties {
            shader.program.set_float(&mut pass.ctx, &property.uniform, property.value);
        }
    }
}

#[derive(Debug)]
struct BlurUniforms {
    blur_size: Uniform,
    std_dev: Uniform,
}

impl BlurUniforms {
    fn probe(shaders: &mut ShaderLibrary, kind: PostProcKind) -> Self {
        Self {
            blur_size: probe(shaders, kind, "u_blur_size"),
            std_dev: probe(shaders, kind, "u_std_dev"),
        }
    }
}

/// A separable gaussian blur: a vertical pass, then a horizontal one.
#[derive(Debug)]
pub struct BlurEffect {
    pub factor: FactorEffect,
    /// Kernel width in uv units.
    pub blur_size: f32,
    pub std_dev: f32,
    vertical: BlurUniforms,
    horizontal: BlurUniforms,
}

impl BlurEffect {
    pub fn new(shaders: &mut ShaderLibrary) -> Self {
        Self {
            factor: FactorEffect::default(),
            blur_size: 0.02,
            std_dev: 0.02,
            vertical: BlurUniforms::probe(shaders, PostProcKind::BlurVertical),
            horizontal: BlurUniforms::probe(shaders, PostProcKind::BlurHorizontal),
        }
    }

    pub fn with_factor(mut self, factor: f32) -> Self {
        self.factor.factor = factor;
        self
    }
}

impl Effect for BlurEffect {
    fn enabled(&self) -> bool {
        self.factor.enabled()
    }

    fn build(&mut self, builder: &mut GraphBuilder<'_, '_>) {
        builder.push_task("blur vertical", TaskStep::BlurVertical);
        builder.push_task("blur horizontal", TaskStep::BlurHorizontal);
    }

    fn gui(&mut self, ui: &mut dyn DebugUi) {
        if !ui.header("Blur") {
            return;
        }
        ui.slider("factor", &mut self.factor.factor, 0.0, 1.0);
        ui.drag("blur size", &mut self.blur_size, 0.001);
        ui.drag("std dev", &mut self.std_dev, 0.001);
    }

    fn use_shader(&mut self, step: TaskStep, input: TextureBinding, pass: &mut PassContext<'_>) {
        let (kind, uniforms) = match step {
            TaskStep::BlurHorizontal => (PostProcKind::BlurHorizontal, &self.horizontal),
            _ => (PostProcKind::BlurVertical, &self.vertical),
        };
        let shaders = pass.shaders;
        let Some(shader) = use_postproc(shaders, kind, self.factor.factor, 0.0, input, pass) else {
            return;
        };
        shader.program.set_float(&mut pass.ctx, &uniforms.blur_size, self.blur_size);
        shader.program.set_float(&mut pass.ctx, &uniforms.std_dev, self.std_dev);
    }
}

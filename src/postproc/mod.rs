//! Fullscreen post-processing.
//!
//! An [`EffectStack`] holds an ordered list of effects and compiles the enabled
//! ones into a linear chain of render tasks. Every task owns one framebuffer and
//! reads from exactly one upstream [`RenderSource`]; the first source is always
//! the world pass, which renders the scene into its own (possibly multisampled)
//! framebuffer.
//!
//! ```text
//! world ──> task "blur vertical" ──> task "blur horizontal" ──> screen
//! ```
//!
//! A task's framebuffer holds the *input* of its effect: updating a task draws its
//! source into it, and rendering the task draws that framebuffer through the
//! effect's shader into whatever comes next. The last source is rendered to the
//! screen.
//!
//! The chain is rebuilt lazily. Anything that changes its shape or its
//! framebuffers marks the stack dirty: an effect turning on or off, a window size
//! change, an msaa or hdr change, or the very first render. Nothing is rebuilt
//! until the next [`EffectStack::render`].
//!
//! # Writing effects
//!
//! ```ignore
//! struct Sepia {
//!     program: ShaderProgram,
//!     input: TextureSlot,
//!     factor: FactorEffect,
//! }
//!
//! impl Effect for Sepia {
//!     fn enabled(&self) -> bool {
//!         self.factor.enabled()
//!     }
//!     fn build(&mut self, builder: &mut GraphBuilder<'_, '_>) {
//!         builder.push_task("sepia", TaskStep::Custom(0));
//!     }
//!     fn use_shader(&mut self, _step: TaskStep, input: TextureBinding, pass: &mut PassContext<'_>) {
//!         self.program.use_program(&mut pass.ctx);
//!         self.program.bind_texture(&mut pass.ctx, self.input, input);
//!     }
//! }
//! ```

mod effects;
mod graph;
mod stack;

pub use effects::{BlurEffect, EffectProperty, PropertyWidget, SimpleEffect};
pub use graph::{CompiledGraph, GraphBuilder, RenderSource, RenderTask, TaskIndex, TaskStep};
pub use stack::{EffectGuard, EffectHandle, EffectStack};

use crate::device::{Size, TextureBinding};
use crate::settings::RenderSettings;
use crate::shader_library::ShaderLibrary;
use crate::state::RenderContext;
use std::any::Any;

/// Factors at or below this disable a [`FactorEffect`].
pub const ALMOST_ZERO: f32 = 0.01;

/// Widgets an effect may use to expose its parameters. Implemented by whatever
/// GUI the application runs.
pub trait DebugUi {
    /// A collapsible section; returns whether its contents should be shown.
    fn header(&mut self, label: &str) -> bool;
    /// Returns true when the value changed.
    fn slider(&mut self, label: &str, value: &mut f32, min: f32, max: f32) -> bool;
    /// Returns true when the value changed.
    fn drag(&mut self, label: &str, value: &mut f32, speed: f32) -> bool;
}

/// What an effect or the world pass needs to issue draws.
pub struct PassContext<'a> {
    pub ctx: RenderContext<'a>,
    pub shaders: &'a ShaderLibrary,
    pub settings: &'a RenderSettings,
    pub window_size: Size,
}

#[doc(hidden)]
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A post-processing effect.
///
/// Effects are owned by an [`EffectStack`]. When the stack rebuilds, every
/// enabled effect gets [`Effect::build`] in order and appends its tasks; each
/// frame, every task of the effect calls [`Effect::use_shader`] right before its
/// fullscreen draw.
pub trait Effect: AsAny {
    /// Whether the effect takes part in the chain. A change here must be seen by
    /// the stack: go through [`EffectStack::effect_mut`] or [`EffectStack::gui`].
    fn enabled(&self) -> bool;

    /// Appends this effect's tasks.
    fn build(&mut self, builder: &mut GraphBuilder<'_, '_>);

    /// Advances time; called only while enabled.
    fn update(&mut self, _dt: f32) {}

    /// Shows the effect's parameters.
    fn gui(&mut self, _ui: &mut dyn DebugUi) {}

    /// Binds the shader for `step`, sets its uniforms and binds `input` as the
    /// texture to process.
    fn use_shader(&mut self, step: TaskStep, input: TextureBinding, pass: &mut PassContext<'_>);
}

/// A strength in `0..=1` that turns the effect off near zero.
///
/// Starts at zero, so a new effect stays out of the chain until its factor is raised.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FactorEffect {
    pub factor: f32,
}

impl FactorEffect {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }

    pub fn enabled(&self) -> bool {
        self.factor > ALMOST_ZERO
    }
}

impl Default for FactorEffect {
    fn default() -> Self {
        Self::new(0.0)
    }
}

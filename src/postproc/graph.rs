//! The compiled chain of render tasks.

use super::{Effect, PassContext};
use crate::device::{
    ClearRequest, ColorFormat, DepthFormat, FrameBufferDesc, RenderCommand, RenderDevice, Size,
};
use crate::framebuffer::FrameBuffer;
use crate::settings::RenderSettings;
use glam::Vec4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskIndex(pub usize);

/// Where a task reads from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RenderSource {
    World,
    Task(TaskIndex),
}

/// Which shader step of its effect a task runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskStep {
    Simple,
    BlurVertical,
    BlurHorizontal,
    /// Steps of effects defined outside the crate.
    Custom(u32),
}

#[derive(Debug)]
pub struct RenderTask {
    pub name: String,
    pub source: RenderSource,
    /// Index of the owning effect in its stack.
    pub effect: usize,
    pub step: TaskStep,
    framebuffer: FrameBuffer,
}

impl RenderTask {
    pub fn framebuffer(&self) -> &FrameBuffer {
        &self.framebuffer
    }
}

/// Format of every color buffer in the chain.
pub(crate) fn chain_color_format(settings: &RenderSettings) -> ColorFormat {
    if settings.hdr { ColorFormat::Hdr } else { ColorFormat::Rgb }
}

/// The scene rendered offscreen: into `msaa` when multisampling, then resolved
/// into `realized`.
#[derive(Debug)]
pub(crate) struct WorldPass {
    msaa: Option<FrameBuffer>,
    realized: Option<FrameBuffer>,
}

impl WorldPass {
    fn create(device: &mut dyn RenderDevice, settings: &RenderSettings, size: Size) -> Self {
        let format = chain_color_format(settings);
        if settings.msaa > 1 {
            let failed = Self {
                msaa: None,
                realized: None,
            };
            let Some(msaa) = FrameBuffer::create(
                device,
                "world msaa",
                FrameBufferDesc::color(size, format)
                    .with_depth(DepthFormat::DepthStencil)
                    .with_msaa(settings.msaa),
            ) else {
                return failed;
            };
            let Some(realized) =
                FrameBuffer::create(device, "world realized", FrameBufferDesc::color(size, format))
            else {
                msaa.destroy(device);
                return failed;
            };
            Self {
                msaa: Some(msaa),
                realized: Some(realized),
            }
        } else {
            let realized = FrameBuffer::create(
                device,
                "world",
                FrameBufferDesc::color(size, format).with_depth(DepthFormat::DepthStencil),
            );
            Self {
                msaa: None,
                realized,
            }
        }
    }

    fn destroy(self, device: &mut dyn RenderDevice) {
        for fb in [self.msaa, self.realized].into_iter().flatten() {
            fb.destroy(device);
        }
    }

    fn update(&self, pass: &mut PassContext<'_>, draw_world: &mut dyn FnMut(&mut PassContext<'_>)) {
        let Some(realized) = &self.realized else {
            return;
        };
        let target = self.msaa.as_ref().unwrap_or(realized);
        pass.ctx.execute(RenderCommand::BindTarget(target.target()));
        pass.ctx.execute(RenderCommand::Viewport(target.size()));
        draw_world(pass);
        if let Some(msaa) = &self.msaa {
            pass.ctx.execute(RenderCommand::Resolve {
                from: msaa.id(),
                to: realized.id(),
            });
        }
    }

    /// Draws the realized scene with gamma applied. Without framebuffers the
    /// scene is drawn straight into the current target.
    fn render(&self, pass: &mut PassContext<'_>, draw_world: &mut dyn FnMut(&mut PassContext<'_>)) {
        let Some(realized) = &self.realized else {
            draw_world(pass);
            return;
        };
        let realize = &pass.shaders.realize;
        realize.program.use_program(&mut pass.ctx);
        realize.program.set_float(&mut pass.ctx, &realize.gamma, pass.settings.gamma);
        realize
            .program
            .bind_texture(&mut pass.ctx, realize.input, realized.color_binding());
        pass.ctx.execute(RenderCommand::DrawFullscreen);
    }
}

/// The ordered tasks of one build, plus the world pass they start from.
#[derive(Debug)]
pub struct CompiledGraph {
    world: WorldPass,
    last_source: RenderSource,
    tasks: Vec<RenderTask>,
}

impl CompiledGraph {
    pub(crate) fn new(device: &mut dyn RenderDevice, settings: &RenderSettings, size: Size) -> Self {
        Self {
            world: WorldPass::create(device, settings, size),
            last_source: RenderSource::World,
            tasks: Vec::new(),
        }
    }

    /// The source drawn to the screen.
    pub fn last_source(&self) -> RenderSource {
        self.last_source
    }

    pub fn tasks(&self) -> &[RenderTask] {
        &self.tasks
    }

    pub(crate) fn destroy(self, device: &mut dyn RenderDevice) {
        self.world.destroy(device);
        for task in self.tasks {
            task.framebuffer.destroy(device);
        }
    }

    pub(crate) fn update_world(
        &self,
        pass: &mut PassContext<'_>,
        draw_world: &mut dyn FnMut(&mut PassContext<'_>),
    ) {
        self.world.update(pass, draw_world);
    }

    /// Draws the task's source into its framebuffer.
    pub(crate) fn update_task(
        &self,
        index: TaskIndex,
        effects: &mut [Box<dyn Effect>],
        pass: &mut PassContext<'_>,
        draw_world: &mut dyn FnMut(&mut PassContext<'_>),
    ) {
        let Some(task) = self.tasks.get(index.0) else {
            return;
        };
        pass.ctx.execute(RenderCommand::BindTarget(task.framebuffer.target()));
        pass.ctx.execute(RenderCommand::Viewport(task.framebuffer.size()));
        self.render_source(task.source, effects, pass, draw_world);
    }

    /// Draws `source` into the current target.
    pub(crate) fn render_source(
        &self,
        source: RenderSource,
        effects: &mut [Box<dyn Effect>],
        pass: &mut PassContext<'_>,
        draw_world: &mut dyn FnMut(&mut PassContext<'_>),
    ) {
        pass.ctx
            .states()
            .cull_face(false)
            .stencil_test(false)
            .depth_test(false)
            .depth_mask(false)
            .blending(false);

        match source {
            RenderSource::World => {
                // without framebuffers the world draw clears for itself
                if self.world.realized.is_some() {
                    pass.ctx.execute(RenderCommand::Clear(ClearRequest::color(Vec4::W)));
                }
                self.world.render(pass, draw_world);
            }
            RenderSource::Task(index) => {
                let Some(task) = self.tasks.get(index.0) else {
                    return;
                };
                pass.ctx.execute(RenderCommand::Clear(ClearRequest::color(Vec4::W)));
                if let Some(effect) = effects.get_mut(task.effect) {
                    effect.use_shader(task.step, task.framebuffer.color_binding(), pass);
                    pass.ctx.execute(RenderCommand::DrawFullscreen);
                }
            }
        }
    }
}

/// Handed to [`Effect::build`] to append tasks to the chain being built.
pub struct GraphBuilder<'a, 'p> {
    pass: &'a mut PassContext<'p>,
    graph: &'a mut CompiledGraph,
    effect: usize,
}

impl<'a, 'p> GraphBuilder<'a, 'p> {
    pub(crate) fn new(pass: &'a mut PassContext<'p>, graph: &'a mut CompiledGraph, effect: usize) -> Self {
        Self {
            pass,
            graph,
            effect,
        }
    }

    pub fn window_size(&self) -> Size {
        self.pass.window_size
    }

    /// The tail of the chain so far; the next task reads from it.
    pub fn last_source(&self) -> RenderSource {
        self.graph.last_source
    }

    /// Appends a task reading from the current tail and makes it the new tail.
    ///
    /// Returns `None` when its framebuffer couldn't be created. The failure is
    /// logged and the chain continues from the previous tail, so the step is
    /// simply skipped.
    pub fn push_task(&mut self, name: &str, step: TaskStep) -> Option<TaskIndex> {
        let desc = FrameBufferDesc::color(self.pass.window_size, chain_color_format(self.pass.settings));
        let framebuffer = FrameBuffer::create(&mut *self.pass.ctx.device, name, desc)?;
        let index = TaskIndex(self.graph.tasks.len());
        self.graph.tasks.push(RenderTask {
            name: name.to_string(),
            source: self.graph.last_source,
            effect: self.effect,
            step,
            framebuffer,
        });
        self.graph.last_source = RenderSource::Task(index);
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn multisampled_world_has_two_buffers() {
        let mut device = HeadlessDevice::new();
        let settings = RenderSettings::default().with_msaa(4);
        let world = WorldPass::create(&mut device, &settings, Size::new(320, 200));

        let msaa = world.msaa.as_ref().unwrap();
        assert_eq!(msaa.desc().msaa, 4);
        assert_eq!(msaa.desc().depth, Some(DepthFormat::DepthStencil));
        assert_eq!(world.realized.as_ref().unwrap().desc().depth, None);
        assert_eq!(device.live_framebuffers(), 2);

        world.destroy(&mut device);
        assert_eq!(device.live_framebuffers(), 0);
    }

    #[test]
    fn single_sampled_world_draws_into_one_buffer() {
        let mut device = HeadlessDevice::new();
        let settings = RenderSettings::default().with_msaa(1).with_hdr(true);
        let world = WorldPass::create(&mut device, &settings, Size::new(320, 200));

        assert!(world.msaa.is_none());
        let realized = world.realized.as_ref().unwrap();
        assert_eq!(realized.desc().color, Some(ColorFormat::Hdr));
        assert_eq!(realized.desc().depth, Some(DepthFormat::DepthStencil));
    }
}

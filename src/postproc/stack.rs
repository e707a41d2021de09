use super::{CompiledGraph, DebugUi, Effect, GraphBuilder, PassContext, TaskIndex};
use crate::device::{RenderCommand, RenderDevice, RenderTarget, Size};
use log::info;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Typed index of an effect added to an [`EffectStack`].
pub struct EffectHandle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EffectHandle<T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for EffectHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EffectHandle<T> {}

impl<T> std::fmt::Debug for EffectHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EffectHandle").field(&self.index).finish()
    }
}

/// Mutable access to one effect. Dropping the guard marks the stack dirty if the
/// effect was switched on or off meanwhile.
pub struct EffectGuard<'a, T: Effect> {
    effect: &'a mut T,
    dirty: &'a mut bool,
    was_enabled: bool,
}

impl<T: Effect> Deref for EffectGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.effect
    }
}

impl<T: Effect> DerefMut for EffectGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.effect
    }
}

impl<T: Effect> Drop for EffectGuard<'_, T> {
    fn drop(&mut self) {
        if self.effect.enabled() != self.was_enabled {
            *self.dirty = true;
        }
    }
}

/// Ordered effects plus the chain compiled from the enabled ones.
pub struct EffectStack {
    effects: Vec<Box<dyn Effect>>,
    dirty: bool,
    window_size: Size,
    /// msaa and hdr of the current build.
    built_with: Option<(u32, bool)>,
    graph: Option<CompiledGraph>,
}

impl Default for EffectStack {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectStack {
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
            dirty: true,
            window_size: Size::default(),
            built_with: None,
            graph: None,
        }
    }

    /// Appends an effect at the end of the chain.
    pub fn add_effect<T: Effect>(&mut self, effect: T) -> EffectHandle<T> {
        self.effects.push(Box::new(effect));
        self.dirty = true;
        EffectHandle {
            index: self.effects.len() - 1,
            _marker: PhantomData,
        }
    }

    pub fn effect<T: Effect>(&self, handle: EffectHandle<T>) -> Option<&T> {
        let boxed = self.effects.get(handle.index)?;
        (**boxed).as_any().downcast_ref::<T>()
    }

    pub fn effect_mut<T: Effect>(&mut self, handle: EffectHandle<T>) -> Option<EffectGuard<'_, T>> {
        let boxed = self.effects.get_mut(handle.index)?;
        let effect = (**boxed).as_any_mut().downcast_mut::<T>()?;
        let was_enabled = effect.enabled();
        Some(EffectGuard {
            effect,
            dirty: &mut self.dirty,
            was_enabled,
        })
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Advances every enabled effect.
    pub fn update(&mut self, dt: f32) {
        for effect in self.effects.iter_mut().filter(|e| e.enabled()) {
            effect.update(dt);
        }
    }

    /// Shows every effect's parameters.
    pub fn gui(&mut self, ui: &mut dyn DebugUi) {
        for effect in &mut self.effects {
            let was_enabled = effect.enabled();
            effect.gui(ui);
            if effect.enabled() != was_enabled {
                self.dirty = true;
            }
        }
    }

    /// Forces a rebuild on the next render.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The chain of the last build.
    pub fn graph(&self) -> Option<&CompiledGraph> {
        self.graph.as_ref()
    }

    pub fn task_count(&self) -> usize {
        self.graph.as_ref().map_or(0, |g| g.tasks().len())
    }

    fn rebuild(&mut self, pass: &mut PassContext<'_>) {
        if let Some(graph) = self.graph.take() {
            graph.destroy(&mut *pass.ctx.device);
        }
        let window = pass.window_size;
        let mut graph = CompiledGraph::new(&mut *pass.ctx.device, pass.settings, window);
        for (index, effect) in self.effects.iter_mut().enumerate() {
            if effect.enabled() {
                effect.build(&mut GraphBuilder::new(pass, &mut graph, index));
            }
        }
        info!(
            "built effect chain: {} tasks at {}x{}",
            graph.tasks().len(),
            window.width,
            window.height
        );
        self.graph = Some(graph);
        self.dirty = false;
        self.window_size = window;
        self.built_with = Some((pass.settings.msaa, pass.settings.hdr));
    }

    /// Renders the world through the chain to the screen, rebuilding it first if
    /// needed. Does nothing while the window is minimized.
    pub fn render(&mut self, pass: &mut PassContext<'_>, draw_world: &mut dyn FnMut(&mut PassContext<'_>)) {
        let window = pass.window_size;
        if window.is_empty() {
            return;
        }
        if window != self.window_size || self.built_with != Some((pass.settings.msaa, pass.settings.hdr)) {
            self.dirty = true;
        }
        if self.dirty {
            self.rebuild(pass);
        }
        let Some(graph) = &self.graph else {
            return;
        };

        graph.update_world(pass, draw_world);
        for index in 0..graph.tasks().len() {
            graph.update_task(TaskIndex(index), &mut self.effects, pass, draw_world);
        }

        pass.ctx.execute(RenderCommand::BindTarget(RenderTarget::Screen));
        pass.ctx.execute(RenderCommand::Viewport(window));
        graph.render_source(graph.last_source(), &mut self.effects, pass, draw_world);
    }

    /// Releases every framebuffer of the chain.
    pub fn destroy(&mut self, device: &mut dyn RenderDevice) {
        if let Some(graph) = self.graph.take() {
            graph.destroy(device);
        }
        self.dirty = true;
    }
}

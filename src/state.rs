//! Graphics state tracking.
//!
//! [`StateCache`] remembers the last value sent to the device for every piece of
//! fixed-function state. [`StateChanger`] compares each request against the cache
//! and only forwards a [`StateChange`] when the value is unknown or different, so
//! code can set full state per draw without flooding the device with redundant
//! commands.

use crate::device::{RenderCommand, RenderDevice, ShaderId, TextureBinding};

/// Most texture slots a shader can bind.
pub const MAX_TEXTURES_SUPPORTED: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Compare {
    Always,
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
}

impl Compare {
    pub fn to_wgpu(self) -> wgpu::CompareFunction {
        match self {
            Compare::Always => wgpu::CompareFunction::Always,
            Compare::Never => wgpu::CompareFunction::Never,
            Compare::Less => wgpu::CompareFunction::Less,
            Compare::Equal => wgpu::CompareFunction::Equal,
            Compare::LessEqual => wgpu::CompareFunction::LessEqual,
            Compare::Greater => wgpu::CompareFunction::Greater,
            Compare::NotEqual => wgpu::CompareFunction::NotEqual,
            Compare::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StencilAction {
    /// Keep the stored value.
    Keep,
    Zero,
    /// Replace with the reference value of the stencil func.
    Replace,
    /// Increment, clamping at the maximum.
    Increase,
    IncreaseWrap,
    /// Decrement, clamping at zero.
    Decrease,
    DecreaseWrap,
    Invert,
}

impl StencilAction {
    pub fn to_wgpu(self) -> wgpu::StencilOperation {
        match self {
            StencilAction::Keep => wgpu::StencilOperation::Keep,
            StencilAction::Zero => wgpu::StencilOperation::Zero,
            StencilAction::Replace => wgpu::StencilOperation::Replace,
            StencilAction::Increase => wgpu::StencilOperation::IncrementClamp,
            StencilAction::IncreaseWrap => wgpu::StencilOperation::IncrementWrap,
            StencilAction::Decrease => wgpu::StencilOperation::DecrementClamp,
            StencilAction::DecreaseWrap => wgpu::StencilOperation::DecrementWrap,
            StencilAction::Invert => wgpu::StencilOperation::Invert,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
}

impl CullFace {
    pub fn to_wgpu(self) -> wgpu::Face {
        match self {
            CullFace::Front => wgpu::Face::Front,
            CullFace::Back => wgpu::Face::Back,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Blend {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    SrcAlphaSaturate,
}

impl Blend {
    pub fn to_wgpu(self) -> wgpu::BlendFactor {
        match self {
            Blend::Zero => wgpu::BlendFactor::Zero,
            Blend::One => wgpu::BlendFactor::One,
            Blend::SrcColor => wgpu::BlendFactor::Src,
            Blend::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
            Blend::DstColor => wgpu::BlendFactor::Dst,
            Blend::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
            Blend::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            Blend::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            Blend::DstAlpha => wgpu::BlendFactor::DstAlpha,
            Blend::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
            Blend::ConstantColor => wgpu::BlendFactor::Constant,
            Blend::OneMinusConstantColor => wgpu::BlendFactor::OneMinusConstant,
            Blend::SrcAlphaSaturate => wgpu::BlendFactor::SrcAlphaSaturated,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Fill,
    /// Wireframe. Needs `POLYGON_MODE_LINE`; devices without it draw filled.
    Line,
}

/// Compare function, reference value and read mask.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StencilFunc {
    pub compare: Compare,
    pub reference: u32,
    pub mask: u32,
}

/// Actions for stencil fail, depth fail and pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StencilOp {
    pub stencil_fail: StencilAction,
    pub depth_fail: StencilAction,
    pub pass: StencilAction,
}

/// One fixed-function state update sent to the device.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StateChange {
    CullFace(bool),
    CullFaceMode(CullFace),
    Blending(bool),
    BlendMode(Blend, Blend),
    DepthTest(bool),
    DepthMask(bool),
    DepthFunc(Compare),
    StencilTest(bool),
    /// Bits that may be written to the stencil buffer.
    StencilMask(u32),
    StencilFunc(StencilFunc),
    StencilOp(StencilOp),
    RenderMode(RenderMode),
}

/// Last known value of every tracked state; `None` means unknown.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateCache {
    pub cull_face: Option<bool>,
    pub cull_face_mode: Option<CullFace>,
    pub blending: Option<bool>,
    pub blend_mode: Option<(Blend, Blend)>,
    pub depth_test: Option<bool>,
    pub depth_mask: Option<bool>,
    pub depth_func: Option<Compare>,
    pub stencil_test: Option<bool>,
    pub stencil_mask: Option<u32>,
    pub stencil_func: Option<StencilFunc>,
    pub stencil_op: Option<StencilOp>,
    pub render_mode: Option<RenderMode>,
    pub texture_bound: [Option<TextureBinding>; MAX_TEXTURES_SUPPORTED],
}

impl StateCache {
    /// Forgets everything, forcing the next request of each state through.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }
}

fn should_change<T: PartialEq + Copy>(current: &mut Option<T>, new_state: T) -> bool {
    if *current == Some(new_state) {
        return false;
    }
    *current = Some(new_state);
    true
}

/// Renderer-owned graphics state: the cache plus debug bookkeeping.
#[derive(Debug, Default)]
pub struct GraphicsState {
    pub cache: StateCache,
    /// The shader last bound, used to catch uniform writes to an unbound shader.
    #[cfg(debug_assertions)]
    pub(crate) bound_shader: Option<ShaderId>,
}

impl GraphicsState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Mutable access to the device plus the state it is in.
///
/// Everything that issues commands goes through a `RenderContext`, so the state
/// cache always matches what the device has seen.
pub struct RenderContext<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub state: &'a mut GraphicsState,
}

impl<'a> RenderContext<'a> {
    pub fn new(device: &'a mut dyn RenderDevice, state: &'a mut GraphicsState) -> Self {
        Self { device, state }
    }

    /// Issues a command without touching the cache.
    pub fn execute(&mut self, command: RenderCommand) {
        self.device.execute(command);
    }

    pub fn states(&mut self) -> StateChanger<'_> {
        StateChanger {
            cache: &mut self.state.cache,
            device: &mut *self.device,
        }
    }

    pub(crate) fn use_shader(&mut self, shader: ShaderId) {
        #[cfg(debug_assertions)]
        {
            self.state.bound_shader = Some(shader);
        }
        self.device.execute(RenderCommand::UseShader(shader));
    }

    #[cfg(debug_assertions)]
    pub(crate) fn bound_shader(&self) -> Option<ShaderId> {
        self.state.bound_shader
    }

    /// Reborrows with a shorter lifetime.
    pub fn reborrow(&mut self) -> RenderContext<'_> {
        RenderContext {
            device: &mut *self.device,
            state: &mut *self.state,
        }
    }
}

/// Applies state requests, skipping those the cache says are already set.
pub struct StateChanger<'a> {
    cache: &'a mut StateCache,
    device: &'a mut dyn RenderDevice,
}

impl StateChanger<'_> {
    fn apply(&mut self, changed: bool, change: StateChange) -> &mut Self {
        if changed {
            self.device.execute(RenderCommand::State(change));
        }
        self
    }

    pub fn cull_face(&mut self, enabled: bool) -> &mut Self {
        let changed = should_change(&mut self.cache.cull_face, enabled);
        self.apply(changed, StateChange::CullFace(enabled))
    }

    pub fn cull_face_mode(&mut self, mode: CullFace) -> &mut Self {
        let changed = should_change(&mut self.cache.cull_face_mode, mode);
        self.apply(changed, StateChange::CullFaceMode(mode))
    }

    pub fn blending(&mut self, enabled: bool) -> &mut Self {
        let changed = should_change(&mut self.cache.blending, enabled);
        self.apply(changed, StateChange::Blending(enabled))
    }

    pub fn blend_mode(&mut self, src: Blend, dst: Blend) -> &mut Self {
        let changed = should_change(&mut self.cache.blend_mode, (src, dst));
        self.apply(changed, StateChange::BlendMode(src, dst))
    }

    pub fn depth_test(&mut self, enabled: bool) -> &mut Self {
        let changed = should_change(&mut self.cache.depth_test, enabled);
        self.apply(changed, StateChange::DepthTest(enabled))
    }

    pub fn depth_mask(&mut self, enabled: bool) -> &mut Self {
        let changed = should_change(&mut self.cache.depth_mask, enabled);
        self.apply(changed, StateChange::DepthMask(enabled))
    }

    pub fn depth_func(&mut self, func: Compare) -> &mut Self {
        let changed = should_change(&mut self.cache.depth_func, func);
        self.apply(changed, StateChange::DepthFunc(func))
    }

    pub fn stencil_test(&mut self, enabled: bool) -> &mut Self {
        let changed = should_change(&mut self.cache.stencil_test, enabled);
        self.apply(changed, StateChange::StencilTest(enabled))
    }

    /// Sets the bitmask ANDed with stencil values before they are written.
    pub fn stencil_mask(&mut self, mask: u32) -> &mut Self {
        let changed = should_change(&mut self.cache.stencil_mask, mask);
        self.apply(changed, StateChange::StencilMask(mask))
    }

    /// Sets the stencil test: `compare(reference & mask, stored & mask)`.
    pub fn stencil_func(&mut self, compare: Compare, reference: u32, mask: u32) -> &mut Self {
        let func = StencilFunc {
            compare,
            reference,
            mask,
        };
        let changed = should_change(&mut self.cache.stencil_func, func);
        self.apply(changed, StateChange::StencilFunc(func))
    }

    pub fn stencil_op(
        &mut self,
        stencil_fail: StencilAction,
        depth_fail: StencilAction,
        pass: StencilAction,
    ) -> &mut Self {
        let op = StencilOp {
            stencil_fail,
            depth_fail,
            pass,
        };
        let changed = should_change(&mut self.cache.stencil_op, op);
        self.apply(changed, StateChange::StencilOp(op))
    }

    pub fn render_mode(&mut self, mode: RenderMode) -> &mut Self {
        let changed = should_change(&mut self.cache.render_mode, mode);
        self.apply(changed, StateChange::RenderMode(mode))
    }

    pub fn bind_texture(&mut self, slot: u32, texture: TextureBinding) -> &mut Self {
        let index = slot as usize;
        assert!(
            index < MAX_TEXTURES_SUPPORTED,
            "texture slot {slot} exceeds the {MAX_TEXTURES_SUPPORTED} supported slots"
        );
        if should_change(&mut self.cache.texture_bound[index], texture) {
            self.device
                .execute(RenderCommand::BindTexture { slot, texture });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, TextureId};

    #[test]
    fn repeated_state_is_filtered() {
        let mut device = HeadlessDevice::new();
        let mut state = GraphicsState::new();
        let mut ctx = RenderContext::new(&mut device, &mut state);

        ctx.states().depth_test(true).depth_test(true).cull_face(true);
        ctx.states().depth_test(true).cull_face(true);

        assert_eq!(
            device.state_changes(),
            vec![StateChange::DepthTest(true), StateChange::CullFace(true)]
        );
    }

    #[test]
    fn differing_value_goes_through() {
        let mut device = HeadlessDevice::new();
        let mut state = GraphicsState::new();
        let mut ctx = RenderContext::new(&mut device, &mut state);

        ctx.states()
            .stencil_func(Compare::Always, 1, 0xFF)
            .stencil_func(Compare::Always, 1, 0xFF)
            .stencil_func(Compare::NotEqual, 1, 0xFF);

        assert_eq!(device.state_changes().len(), 2);
    }

    #[test]
    fn texture_slots_are_tracked_separately() {
        let mut device = HeadlessDevice::new();
        let mut state = GraphicsState::new();
        let mut ctx = RenderContext::new(&mut device, &mut state);
        let texture = TextureBinding::Texture(TextureId(3));

        ctx.states()
            .bind_texture(0, texture)
            .bind_texture(1, texture)
            .bind_texture(0, texture);

        let binds = device
            .commands()
            .iter()
            .filter(|c| matches!(c, RenderCommand::BindTexture { .. }))
            .count();
        assert_eq!(binds, 2);
    }

    #[test]
    fn invalidate_forces_resend() {
        let mut device = HeadlessDevice::new();
        let mut state = GraphicsState::new();
        {
            let mut ctx = RenderContext::new(&mut device, &mut state);
            ctx.states().blending(false);
        }
        state.cache.invalidate();
        let mut ctx = RenderContext::new(&mut device, &mut state);
        ctx.states().blending(false);

        assert_eq!(device.state_changes().len(), 2);
    }

    #[test]
    #[should_panic(expected = "texture slot 16")]
    fn slot_out_of_range_is_fatal() {
        let mut device = HeadlessDevice::new();
        let mut state = GraphicsState::new();
        let mut ctx = RenderContext::new(&mut device, &mut state);
        ctx.states()
            .bind_texture(16, TextureBinding::Texture(TextureId(0)));
    }
}

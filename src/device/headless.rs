use super::{
    FrameBufferDesc, FrameBufferError, FrameBufferId, MeshId, RenderCommand, RenderDevice,
    ShaderDescriptor, ShaderError, ShaderId, Size, TextureData, TextureId,
};
use crate::geometry::ExtractedGeometry;
use crate::state::StateChange;
use std::collections::{HashMap, HashSet};

/// A device that draws nothing and remembers everything.
///
/// Handles are handed out sequentially. Shaders always compile unless their name
/// was registered with [`HeadlessDevice::fail_shader`]; framebuffers likewise with
/// [`HeadlessDevice::fail_framebuffer`].
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    commands: Vec<RenderCommand>,
    /// Name and full source of every compiled shader, indexed by id.
    shaders: Vec<(String, String)>,
    failing_shaders: HashSet<String>,
    failing_framebuffers: HashSet<String>,
    meshes: u32,
    textures: u32,
    next_framebuffer: u32,
    framebuffers: HashMap<FrameBufferId, FrameBufferDesc>,
    screen: Size,
    frames: u32,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_screen(Size::new(800, 600))
    }

    pub fn with_screen(screen: Size) -> Self {
        Self {
            screen,
            ..Default::default()
        }
    }

    /// Makes every later compile of `name` fail.
    pub fn fail_shader(&mut self, name: impl Into<String>) {
        self.failing_shaders.insert(name.into());
    }

    /// Makes every later framebuffer labelled `label` fail to create.
    pub fn fail_framebuffer(&mut self, label: impl Into<String>) {
        self.failing_framebuffers.insert(label.into());
    }

    pub fn set_screen_size(&mut self, size: Size) {
        self.screen = size;
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Only the fixed-function state updates, in order.
    pub fn state_changes(&self) -> Vec<StateChange> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::State(change) => Some(*change),
                _ => None,
            })
            .collect()
    }

    pub fn shader_name(&self, id: ShaderId) -> Option<&str> {
        self.shaders.get(id.0 as usize).map(|(name, _)| name.as_str())
    }

    /// Name and WGSL of every shader compiled so far.
    pub fn shader_sources(&self) -> impl Iterator<Item = (&str, &str)> {
        self.shaders
            .iter()
            .map(|(name, source)| (name.as_str(), source.as_str()))
    }

    pub fn framebuffer(&self, id: FrameBufferId) -> Option<&FrameBufferDesc> {
        self.framebuffers.get(&id)
    }

    /// Framebuffers created and not yet destroyed.
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Framebuffers created over the device's lifetime.
    pub fn created_framebuffers(&self) -> u32 {
        self.next_framebuffer
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }
}

impl RenderDevice for HeadlessDevice {
    fn compile_shader(&mut self, desc: &ShaderDescriptor<'_>) -> Result<ShaderId, ShaderError> {
        if self.failing_shaders.contains(desc.name) {
            return Err(ShaderError::Compile {
                name: desc.name.to_string(),
                message: "rejected by headless device".to_string(),
            });
        }
        self.shaders
            .push((desc.name.to_string(), desc.source.to_string()));
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn create_mesh(&mut self, _geometry: &ExtractedGeometry) -> MeshId {
        self.meshes += 1;
        MeshId(self.meshes - 1)
    }

    fn create_texture(&mut self, _label: &str, _data: &TextureData<'_>) -> TextureId {
        self.textures += 1;
        TextureId(self.textures - 1)
    }

    fn create_framebuffer(
        &mut self,
        label: &str,
        desc: &FrameBufferDesc,
    ) -> Result<FrameBufferId, FrameBufferError> {
        super::validate_framebuffer(desc)?;
        if self.failing_framebuffers.contains(label) {
            return Err(FrameBufferError::Incomplete(format!(
                "{label} rejected by headless device"
            )));
        }
        let id = FrameBufferId(self.next_framebuffer);
        self.next_framebuffer += 1;
        self.framebuffers.insert(id, *desc);
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, id: FrameBufferId) {
        self.framebuffers.remove(&id);
    }

    fn screen_size(&self) -> Size {
        self.screen
    }

    fn execute(&mut self, command: RenderCommand) {
        log::trace!("{command:?}");
        self.commands.push(command);
    }

    fn end_frame(&mut self) {
        self.frames += 1;
    }
}

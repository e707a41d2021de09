//! Offscreen render targets.

use crate::device::{
    ColorFormat, DepthFormat, FrameBufferDesc, FrameBufferId, RenderDevice, RenderTarget, Size,
    TextureBinding,
};

impl FrameBufferDesc {
    /// A single-sampled color target without depth.
    pub fn color(size: Size, format: ColorFormat) -> Self {
        Self {
            size,
            color: Some(format),
            depth: None,
            msaa: 1,
        }
    }

    /// A depth-only target whose depth can be sampled with a comparison sampler.
    pub fn shadow_map(resolution: u32) -> Self {
        Self {
            size: Size::new(resolution, resolution),
            color: None,
            depth: Some(DepthFormat::SampledDepth),
            msaa: 1,
        }
    }

    pub fn with_depth(mut self, depth: DepthFormat) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_msaa(mut self, samples: u32) -> Self {
        self.msaa = samples.max(1);
        self
    }

    pub fn is_multisampled(&self) -> bool {
        self.msaa > 1
    }
}

/// A framebuffer living on a device.
///
/// Destroying needs the device, so it is explicit: call [`FrameBuffer::destroy`]
/// when the owner discards it.
#[derive(Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    id: FrameBufferId,
    desc: FrameBufferDesc,
}

impl FrameBuffer {
    /// Creates a framebuffer, logging and returning `None` when the device refuses it.
    pub fn create(device: &mut dyn RenderDevice, label: &str, desc: FrameBufferDesc) -> Option<Self> {
        match device.create_framebuffer(label, &desc) {
            Ok(id) => Some(Self { id, desc }),
            Err(err) => {
                log::error!("failed to create framebuffer {label}: {err}");
                None
            }
        }
    }

    pub fn id(&self) -> FrameBufferId {
        self.id
    }

    pub fn desc(&self) -> &FrameBufferDesc {
        &self.desc
    }

    pub fn size(&self) -> Size {
        self.desc.size
    }

    pub fn target(&self) -> RenderTarget {
        RenderTarget::FrameBuffer(self.id)
    }

    /// The color attachment as a texture; multisampled buffers must be resolved first.
    pub fn color_binding(&self) -> TextureBinding {
        TextureBinding::FrameBufferColor(self.id)
    }

    pub fn depth_binding(&self) -> TextureBinding {
        TextureBinding::FrameBufferDepth(self.id)
    }

    pub fn destroy(self, device: &mut dyn RenderDevice) {
        device.destroy_framebuffer(self.id);
    }
}

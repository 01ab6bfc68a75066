pub mod channels;
pub mod descriptor_set_layout_builder;
pub mod descriptors;

use color_eyre::Result;
use crate::renderer::config::{ResourcePaths, BUFFERING_DEPTH};
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::resource_ctx::channels::ChannelSlots;
use crate::renderer::contexts::resource_ctx::descriptors::DescriptorBindings;
use crate::renderer::image_loader::{DecodedImage, ImageDecoder};
use crate::renderer::resources::uniform_ring::UniformRing;
use crate::renderer::shader_data::ToyUniforms;

/// Responsibilities:
/// - Own the uniform ring and the four channel images
/// - Allocate and populate the uniform and channel descriptor sets
/// - Replace channel images and rebuild the channel set on reload
pub struct RenderResourceContext {
    pub descriptors: DescriptorBindings,
    pub channels: ChannelSlots,
    pub uniforms: UniformRing,
}

impl RenderResourceContext {
    pub fn new(
        dev_ctx: &RenderDeviceContext,
        decoder: &dyn ImageDecoder,
        paths: &ResourcePaths,
    ) -> Result<Self> {
        let device = &dev_ctx.device;

        let uniforms = UniformRing::new(
            device,
            size_of::<ToyUniforms>() as u64,
            BUFFERING_DEPTH,
        )?;
        let channels = ChannelSlots::new(device, decoder, paths)?;

        let mut descriptors = DescriptorBindings::new(device.logical.clone())?;
        descriptors.write_uniform_set(uniforms.buffer.buffer, uniforms.slice_size())?;
        descriptors.rebuild_image_set(&channels.descriptor_infos())?;

        Ok(Self {
            descriptors,
            channels,
            uniforms,
        })
    }

    /// Replaces one channel's image; the channel set must be rebuilt afterwards.
    pub fn replace_channel(
        &mut self,
        dev_ctx: &RenderDeviceContext,
        channel: usize,
        decoded: &DecodedImage,
    ) -> Result<()> {
        self.channels.replace(channel, &dev_ctx.device, decoded)
    }

    pub fn rebuild_image_set(&mut self) -> Result<()> {
        self.descriptors.rebuild_image_set(&self.channels.descriptor_infos())
    }
}

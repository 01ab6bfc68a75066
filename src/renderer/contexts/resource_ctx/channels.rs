use ash::vk;
use color_eyre::Result;
use crate::renderer::config::{ResourcePaths, CHANNEL_COUNT};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::error::AssetError;
use crate::renderer::image_loader::{DecodedImage, ImageDecoder};
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::image::{SampledImage, SampledImageCreateInfo, UploadBarriers};

/// One input channel: the sampled image and the staging copy of its pixels, kept until
/// the copy into the image has been recorded.
pub struct ChannelSlot {
    pub image: SampledImage,
    staging: Option<Buffer>,
}

impl ChannelSlot {
    fn new(dev: &RenderDevice, channel: usize, decoded: &DecodedImage) -> Result<Self> {
        let image = SampledImage::new(
            dev,
            &SampledImageCreateInfo::channel(
                decoded.width,
                decoded.height,
                format!("Channel {channel}"),
            ),
        )?;
        let staging = Buffer::new_staging(
            dev,
            &decoded.pixels,
            &format!("Channel {channel} staging"),
        )?;

        Ok(Self {
            image,
            staging: Some(staging),
        })
    }
}

/// Extent and pending-upload flag of every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStates {
    extents: [vk::Extent3D; CHANNEL_COUNT],
    pending: [bool; CHANNEL_COUNT],
}

impl Default for ChannelStates {
    fn default() -> Self {
        Self {
            extents: [vk::Extent3D::default(); CHANNEL_COUNT],
            pending: [false; CHANNEL_COUNT],
        }
    }
}

impl ChannelStates {
    /// Records a new image for `channel`; its pixels wait for the next upload pass.
    pub fn replace(&mut self, channel: usize, extent: vk::Extent3D) {
        self.extents[channel] = extent;
        self.pending[channel] = true;
    }

    pub fn is_dirty(&self, channel: usize) -> bool {
        self.pending[channel]
    }

    pub fn extent(&self, channel: usize) -> vk::Extent3D {
        self.extents[channel]
    }

    /// Dirty channels in ascending order.
    pub fn pending_channels(&self) -> Vec<usize> {
        (0..CHANNEL_COUNT).filter(|&c| self.pending[c]).collect()
    }

    /// Dirty channels in ascending order; all flags are cleared.
    pub fn take_pending(&mut self) -> Vec<usize> {
        let channels = self.pending_channels();
        self.pending = [false; CHANNEL_COUNT];
        channels
    }

    /// Width, height, depth, 0 per channel.
    pub fn resolutions(&self) -> [[f32; 4]; CHANNEL_COUNT] {
        self.extents
            .map(|e| [e.width as f32, e.height as f32, e.depth as f32, 0.0])
    }
}

/// The four image channels sampled by the toy shader
pub struct ChannelSlots {
    slots: Vec<ChannelSlot>,
    states: ChannelStates,
}

impl ChannelSlots {
    /// Loads every channel image, falling back to a placeholder texel for missing or
    /// undecodable files so that all four bindings stay valid.
    pub fn new(
        dev: &RenderDevice,
        decoder: &dyn ImageDecoder,
        paths: &ResourcePaths,
    ) -> Result<Self> {
        let slots = (0..CHANNEL_COUNT)
            .map(|channel| {
                let path = paths.channel_image(channel);
                let decoded = match decoder.load(&path) {
                    Ok(decoded) => {
                        log::info!(
                            "Channel {channel}: {} ({}x{})",
                            path.display(),
                            decoded.width,
                            decoded.height,
                        );
                        decoded
                    }
                    Err(AssetError::ImageNotFound(_)) => {
                        log::warn!("Channel {channel}: {} not found, using placeholder", path.display());
                        DecodedImage::placeholder()
                    }
                    Err(err) => {
                        log::warn!("Channel {channel}: {err}, using placeholder");
                        DecodedImage::placeholder()
                    }
                };
                ChannelSlot::new(dev, channel, &decoded)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut states = ChannelStates::default();
        for (channel, slot) in slots.iter().enumerate() {
            states.replace(channel, slot.image.extent);
        }

        Ok(Self { slots, states })
    }

    /// Swaps in a new image and staging buffer for `channel` and marks it dirty.
    ///
    /// The old image is destroyed here, so the device must be idle.
    pub fn replace(
        &mut self,
        channel: usize,
        dev: &RenderDevice,
        decoded: &DecodedImage,
    ) -> Result<()> {
        let slot = ChannelSlot::new(dev, channel, decoded)?;
        self.states.replace(channel, slot.image.extent);
        self.slots[channel] = slot;
        Ok(())
    }

    pub fn resolutions(&self) -> [[f32; 4]; CHANNEL_COUNT] {
        self.states.resolutions()
    }

    pub fn descriptor_infos(&self) -> [vk::DescriptorImageInfo; CHANNEL_COUNT] {
        let mut infos = [vk::DescriptorImageInfo::default(); CHANNEL_COUNT];
        for (info, slot) in infos.iter_mut().zip(&self.slots) {
            *info = slot.image.descriptor_info();
        }
        infos
    }

    pub fn dirty_images(&self) -> Vec<vk::Image> {
        self.states
            .pending_channels()
            .into_iter()
            .map(|channel| self.slots[channel].image.image)
            .collect()
    }

    /// Records the copy pass for every dirty channel into `cmd`.
    ///
    /// All transitions are batched into one barrier before and one after the copies. Dirty
    /// flags are cleared once recorded and the consumed staging buffers are handed back; they
    /// must outlive the submission of `cmd`.
    pub fn record_uploads(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
    ) -> Vec<Buffer> {
        let barriers = UploadBarriers::for_images(&self.dirty_images());
        if barriers.is_empty() {
            return Vec::new();
        }

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers.pre_copy,
            );
        }

        let mut consumed = Vec::with_capacity(barriers.pre_copy.len());
        for channel in self.states.take_pending() {
            let slot = &mut self.slots[channel];
            if let Some(staging) = slot.staging.take() {
                slot.image.record_copy_from(cmd, staging.buffer);
                consumed.push(staging);
            }
        }

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers.post_copy,
            );
        }

        log::debug!("Recorded uploads for {} channel(s)", consumed.len());
        consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn extent(width: u32, height: u32) -> vk::Extent3D {
        vk::Extent3D { width, height, depth: 1 }
    }

    fn uploaded_states() -> ChannelStates {
        let mut states = ChannelStates::default();
        for channel in 0..CHANNEL_COUNT {
            states.replace(channel, extent(1, 1));
        }
        states.take_pending();
        states
    }

    #[test]
    fn startup_uploads_every_channel_once() {
        let mut states = ChannelStates::default();
        for channel in 0..CHANNEL_COUNT {
            states.replace(channel, extent(1, 1));
        }

        assert_eq!(states.take_pending(), vec![0, 1, 2, 3]);
        assert!(states.pending_channels().is_empty());
    }

    #[test]
    fn replacing_one_channel_uploads_only_that_image() {
        let mut states = uploaded_states();
        states.replace(0, extent(640, 480));

        let images: Vec<vk::Image> = states
            .pending_channels()
            .into_iter()
            .map(|channel| vk::Image::from_raw(channel as u64 + 1))
            .collect();
        let barriers = UploadBarriers::for_images(&images);
        assert_eq!(barriers.pre_copy.len(), 1);
        assert_eq!(barriers.post_copy.len(), 1);
        assert_eq!(barriers.pre_copy[0].image, vk::Image::from_raw(1));

        assert!(states.is_dirty(0));
        assert!((1..CHANNEL_COUNT).all(|c| !states.is_dirty(c)));

        assert_eq!(states.take_pending(), vec![0]);
        assert!(!states.is_dirty(0));
        assert!(UploadBarriers::for_images(&[]).is_empty());
    }

    #[test]
    fn replaced_extent_is_reported() {
        let mut states = uploaded_states();

        states.replace(2, extent(512, 256));
        assert_eq!(states.extent(2), extent(512, 256));
        assert_eq!(states.resolutions()[2], [512.0, 256.0, 1.0, 0.0]);

        states.replace(2, extent(1920, 1080));
        assert_eq!(states.extent(2), extent(1920, 1080));
        assert_eq!(states.resolutions()[2], [1920.0, 1080.0, 1.0, 0.0]);
        assert_eq!(states.resolutions()[1], [1.0, 1.0, 1.0, 0.0]);
    }
}

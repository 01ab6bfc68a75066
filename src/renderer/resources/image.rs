use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::error::RenderError;

pub struct SampledImageCreateInfo {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub initial_layout: vk::ImageLayout,
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub name: String,
}

impl SampledImageCreateInfo {
    /// sRGB color image that is filled by a buffer copy and then sampled.
    pub fn channel(width: u32, height: u32, name: impl Into<String>) -> Self {
        Self {
            width,
            height,
            format: vk::Format::R8G8B8A8_SRGB,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            initial_layout: vk::ImageLayout::UNDEFINED,
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            name: name.into(),
        }
    }
}

/// Device-local 2D image with its view and sampler
///
/// Single mip level, no anisotropy. The image content is undefined until an upload
/// has been recorded and executed.
pub struct SampledImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub format: vk::Format,
    pub extent: vk::Extent3D,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl SampledImage {
    pub fn new(
        dev: &RenderDevice,
        create_info: &SampledImageCreateInfo,
    ) -> Result<Self> {
        let device = dev.logical.clone();
        let extent = vk::Extent3D {
            width: create_info.width,
            height: create_info.height,
            depth: 1,
        };

        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(create_info.format)
                .usage(create_info.usage)
                .extent(extent)
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(create_info.initial_layout);
            unsafe {
                device
                    .create_image(&info, None)
                    .map_err(RenderError::creation("image"))?
            }
        };

        let reqs = unsafe { device.get_image_memory_requirements(image) };
        let allocation = match dev.allocate(
            &create_info.name,
            reqs,
            MemoryLocation::GpuOnly,
            false,
            AllocationScheme::DedicatedImage(image),
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };

        // Remaining handles start null so Drop can release a partial build
        let mut sampled = Self {
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            format: create_info.format,
            extent,

            allocation: Some(allocation),
            memory_allocator: dev.memory_allocator(),
            device,
        };

        if let Some(allocation) = sampled.allocation.as_ref() {
            unsafe {
                sampled.device
                    .bind_image_memory(image, allocation.memory(), allocation.offset())
                    .map_err(RenderError::creation("image memory binding"))?;
            }
        }

        sampled.view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(image)
                .format(create_info.format)
                .subresource_range(color_subresource_range());
            unsafe {
                sampled.device
                    .create_image_view(&info, None)
                    .map_err(RenderError::creation("image view"))?
            }
        };

        sampled.sampler = {
            let info = vk::SamplerCreateInfo::default()
                .mag_filter(create_info.filter)
                .min_filter(create_info.filter)
                .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
                .address_mode_u(create_info.address_mode)
                .address_mode_v(create_info.address_mode)
                .address_mode_w(create_info.address_mode)
                .mip_lod_bias(0.0)
                .anisotropy_enable(false)
                .max_anisotropy(1.0)
                .compare_enable(false)
                .compare_op(vk::CompareOp::NEVER)
                .min_lod(0.0)
                .max_lod(0.0)
                .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
                .unnormalized_coordinates(false);
            unsafe {
                sampled.device
                    .create_sampler(&info, None)
                    .map_err(RenderError::creation("sampler"))?
            }
        };

        Ok(sampled)
    }

    /// Records a copy of tightly packed texels from `src` into the whole image.
    /// The image must already be in `TRANSFER_DST_OPTIMAL`.
    pub fn record_copy_from(&self, cmd: vk::CommandBuffer, src: vk::Buffer) {
        let copy_region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: self.extent.width,
            buffer_image_height: self.extent.height,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: self.extent,
        };

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy_region],
            );
        }
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for SampledImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free image memory: {err}");
                    }
                }
                Err(err) => log::error!("Memory allocator lock poisoned: {err}"),
            }
        }
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Layout transitions around a batch of buffer-to-image uploads.
pub struct UploadBarriers {
    /// Any layout to `TRANSFER_DST_OPTIMAL`, recorded between TOP_OF_PIPE and TRANSFER.
    pub pre_copy: Vec<vk::ImageMemoryBarrier<'static>>,
    /// `TRANSFER_DST_OPTIMAL` to `SHADER_READ_ONLY_OPTIMAL`, between TRANSFER and FRAGMENT_SHADER.
    pub post_copy: Vec<vk::ImageMemoryBarrier<'static>>,
}

impl UploadBarriers {
    pub fn for_images(images: &[vk::Image]) -> Self {
        let pre_copy = images
            .iter()
            .map(|image| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(*image)
                    .subresource_range(color_subresource_range())
            })
            .collect();

        let post_copy = images
            .iter()
            .map(|image| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(*image)
                    .subresource_range(color_subresource_range())
            })
            .collect();

        Self { pre_copy, post_copy }
    }

    pub fn is_empty(&self) -> bool {
        self.pre_copy.is_empty()
    }
}

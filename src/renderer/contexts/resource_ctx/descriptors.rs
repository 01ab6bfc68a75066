use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_descriptor::{
    CreatePoolError, DescriptorAllocator, DescriptorDevice, DescriptorPoolCreateFlags,
    DescriptorSet, DescriptorSetLayoutCreateFlags, DescriptorTotalCount, DeviceAllocationError,
};
use smallvec::SmallVec;
use crate::renderer::config::CHANNEL_COUNT;
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;

/// Set index of the dynamic uniform block in the pipeline layout.
pub const UNIFORM_SET: u32 = 0;
/// Set index of the channel samplers in the pipeline layout.
pub const CHANNEL_SET: u32 = 1;

/// Cap on update-after-bind descriptors across every pool the allocator creates.
const MAX_UPDATE_AFTER_BIND_DESCRIPTORS: u32 = 1024;

/// The two descriptor sets bound by the toy pipeline
///
/// Set 0 holds one dynamic uniform buffer whose offset selects the ring slice each frame.
/// Set 1 holds one combined image sampler per channel at bindings 0..3.
pub struct DescriptorBindings {
    pub uniform_layout: vk::DescriptorSetLayout,
    pub image_layout: vk::DescriptorSetLayout,

    uniform_set: Option<DescriptorSet<vk::DescriptorSet>>,
    image_set: Option<DescriptorSet<vk::DescriptorSet>>,
    allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>,
    device: DescriptorAshDevice,
}

impl DescriptorBindings {
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        let uniform_builder = DescriptorSetLayoutBuilder::new().add_binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            1,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        );
        let image_builder = DescriptorSetLayoutBuilder::new().add_bindings(
            0,
            CHANNEL_COUNT as u32,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        );

        let uniform_counts = total_count(
            uniform_builder.descriptor_count(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC),
            0,
        );
        let image_counts = total_count(
            0,
            image_builder.descriptor_count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        );

        let uniform_layout = uniform_builder
            .build(vk::DescriptorSetLayoutCreateFlags::empty(), &device)?;
        let image_layout = match image_builder
            .build(vk::DescriptorSetLayoutCreateFlags::empty(), &device)
        {
            Ok(layout) => layout,
            Err(err) => {
                unsafe { device.destroy_descriptor_set_layout(uniform_layout, None) };
                return Err(err);
            }
        };

        let mut bindings = Self {
            uniform_layout,
            image_layout,

            uniform_set: None,
            image_set: None,
            allocator: DescriptorAllocator::new(MAX_UPDATE_AFTER_BIND_DESCRIPTORS),
            device: DescriptorAshDevice::from(device),
        };

        bindings.uniform_set = Some(bindings.allocate(uniform_layout, &uniform_counts)?);
        bindings.image_set = Some(bindings.allocate(image_layout, &image_counts)?);

        Ok(bindings)
    }

    fn allocate(
        &mut self,
        layout: vk::DescriptorSetLayout,
        counts: &DescriptorTotalCount,
    ) -> Result<DescriptorSet<vk::DescriptorSet>> {
        let allocated = unsafe {
            self.allocator
                .allocate(
                    &self.device,
                    &layout,
                    DescriptorSetLayoutCreateFlags::empty(),
                    counts,
                    1,
                )?
                .drain(..)
                .next()
                .ok_or_eyre("Failed to allocate descriptor set")?
        };
        Ok(allocated)
    }

    pub fn layouts(&self) -> [vk::DescriptorSetLayout; 2] {
        in_set_order(self.uniform_layout, self.image_layout)
    }

    /// Raw sets in binding order, or `None` while a rebuild is in progress.
    pub fn sets(&self) -> Option<[vk::DescriptorSet; 2]> {
        match (&self.uniform_set, &self.image_set) {
            (Some(uniform), Some(image)) => Some(in_set_order(*uniform.raw(), *image.raw())),
            _ => None,
        }
    }

    /// Points set 0 at the start of the uniform ring; the per-frame slice is chosen by
    /// the dynamic offset at bind time.
    pub fn write_uniform_set(&self, buffer: vk::Buffer, slice_size: u64) -> Result<()> {
        let set = self
            .uniform_set
            .as_ref()
            .ok_or_eyre("Uniform descriptor set is not allocated")?;

        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(slice_size)];
        let write = [vk::WriteDescriptorSet::default()
            .dst_set(*set.raw())
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&buffer_info)];

        unsafe {
            self.device.0.update_descriptor_sets(&write, &[]);
        }
        Ok(())
    }

    /// Frees the channel set and writes a fresh one pointing at `channels`.
    ///
    /// The previous set may still be referenced by in-flight work, so the device must be idle.
    pub fn rebuild_image_set(
        &mut self,
        channels: &[vk::DescriptorImageInfo; CHANNEL_COUNT],
    ) -> Result<()> {
        if let Some(old) = self.image_set.take() {
            unsafe {
                self.allocator.free(&self.device, [old]);
            }
        }

        let counts = total_count(0, CHANNEL_COUNT as u32);
        let set = self.allocate(self.image_layout, &counts)?;

        // Bindings 0..3 are consecutive single descriptors, so one write with a count of
        // four rolls over into the following bindings.
        let write = [vk::WriteDescriptorSet::default()
            .dst_set(*set.raw())
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(channels)];

        unsafe {
            self.device.0.update_descriptor_sets(&write, &[]);
        }
        self.image_set = Some(set);
        Ok(())
    }
}

impl Drop for DescriptorBindings {
    fn drop(&mut self) {
        let sets = self.uniform_set.take().into_iter().chain(self.image_set.take());
        unsafe {
            self.allocator.free(&self.device, sets);
            self.allocator.cleanup(&self.device);
            self.device.0.destroy_descriptor_set_layout(self.image_layout, None);
            self.device.0.destroy_descriptor_set_layout(self.uniform_layout, None);
        }
    }
}

/// Places the uniform and channel items at [`UNIFORM_SET`] and [`CHANNEL_SET`].
pub fn in_set_order<T: Copy + Default>(uniform: T, channel: T) -> [T; 2] {
    let mut ordered = [T::default(); 2];
    ordered[UNIFORM_SET as usize] = uniform;
    ordered[CHANNEL_SET as usize] = channel;
    ordered
}

fn total_count(uniform_buffer_dynamic: u32, combined_image_sampler: u32) -> DescriptorTotalCount {
    DescriptorTotalCount {
        sampler: 0,
        combined_image_sampler,
        sampled_image: 0,
        storage_image: 0,
        uniform_texel_buffer: 0,
        storage_texel_buffer: 0,
        uniform_buffer: 0,
        storage_buffer: 0,
        uniform_buffer_dynamic,
        storage_buffer_dynamic: 0,
        input_attachment: 0,
        acceleration_structure: 0,
        inline_uniform_block_bytes: 0,
        inline_uniform_block_bindings: 0,
    }
}

/// Translates gpu-descriptor totals into Vulkan pool sizes, skipping empty types.
pub fn pool_sizes(count: &DescriptorTotalCount) -> SmallVec<[vk::DescriptorPoolSize; 12]> {
    [
        (vk::DescriptorType::SAMPLER, count.sampler),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, count.combined_image_sampler),
        (vk::DescriptorType::SAMPLED_IMAGE, count.sampled_image),
        (vk::DescriptorType::STORAGE_IMAGE, count.storage_image),
        (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, count.uniform_texel_buffer),
        (vk::DescriptorType::STORAGE_TEXEL_BUFFER, count.storage_texel_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER, count.uniform_buffer),
        (vk::DescriptorType::STORAGE_BUFFER, count.storage_buffer),
        (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, count.uniform_buffer_dynamic),
        (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, count.storage_buffer_dynamic),
        (vk::DescriptorType::INPUT_ATTACHMENT, count.input_attachment),
        (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, count.acceleration_structure),
    ]
    .into_iter()
    .filter(|(_, n)| *n != 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
    .collect()
}

pub struct DescriptorAshDevice(pub Arc<ash::Device>);

impl From<Arc<ash::Device>> for DescriptorAshDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        if descriptor_count.inline_uniform_block_bytes != 0
            || descriptor_count.inline_uniform_block_bindings != 0
        {
            log::warn!("Inline uniform blocks requested from the descriptor pool are ignored");
        }

        let sizes = pool_sizes(descriptor_count);

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }
        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                log::error!("Unexpected descriptor pool creation result: {err}");
                Err(CreatePoolError::OutOfHostMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: SmallVec<[_; 16]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };

        match result {
            Ok(allocated) => {
                sets.extend(allocated);
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => {
                Err(DeviceAllocationError::OutOfDeviceMemory)
            }
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
            Err(err) => {
                log::error!("Unexpected descriptor set allocation result: {err}");
                Err(DeviceAllocationError::OutOfHostMemory)
            }
        }
    }

    unsafe fn dealloc_descriptor_sets(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: SmallVec<[_; 16]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("Failed to free descriptor sets: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_skip_unused_types() {
        let sizes = pool_sizes(&total_count(1, CHANNEL_COUNT as u32));

        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[0].descriptor_count, 4);
        assert_eq!(sizes[1].ty, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        assert_eq!(sizes[1].descriptor_count, 1);
    }

    #[test]
    fn empty_totals_need_no_pool_sizes() {
        assert!(pool_sizes(&total_count(0, 0)).is_empty());
    }

    #[test]
    fn sets_follow_their_indices() {
        assert_eq!(UNIFORM_SET, 0);
        let ordered = in_set_order("uniform", "channels");
        assert_eq!(ordered[UNIFORM_SET as usize], "uniform");
        assert_eq!(ordered[CHANNEL_SET as usize], "channels");
    }
}

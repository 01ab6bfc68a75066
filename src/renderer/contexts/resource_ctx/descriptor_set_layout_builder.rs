use color_eyre::Result;
use ash::vk;
use crate::renderer::error::RenderError;

pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl DescriptorSetLayoutBuilder<'_> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(descriptor_count)
            .stage_flags(stages);

        self.bindings.push(binding);
        self
    }

    /// Adds `count` consecutive single-descriptor bindings starting at `first`.
    pub fn add_bindings(
        self,
        first: u32,
        count: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        (first..first + count).fold(self, |builder, binding| {
            builder.add_binding(binding, descriptor_type, 1, stages)
        })
    }

    /// Number of descriptors of `ty` a set of this layout consumes.
    pub fn descriptor_count(&self, ty: vk::DescriptorType) -> u32 {
        self.bindings
            .iter()
            .filter(|b| b.descriptor_type == ty)
            .map(|b| b.descriptor_count)
            .sum()
    }

    pub fn build(
        self,
        flags: vk::DescriptorSetLayoutCreateFlags,
        device: &ash::Device,
    ) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .flags(flags);

        Ok(unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(RenderError::creation("descriptor set layout"))?
        })
    }
}

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::contexts::resource_ctx::descriptors::UNIFORM_SET;
use crate::renderer::error::RenderError;
use crate::renderer::resources::shader::GraphicsShader;

/// A graphics pipeline and the layout it was built against, always created and
/// destroyed together
pub struct ToyPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<ash::Device>,
}

impl ToyPipeline {
    pub fn bind_pipeline(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                UNIFORM_SET,
                descriptor_sets,
                dynamic_offsets,
            );
        }
    }
}

impl Drop for ToyPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Fixed-function state for drawing one procedurally generated full-screen triangle
pub struct ToyPipelineBuilder<'a> {
    device: Arc<ash::Device>,

    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'a>,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'a>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    multisample: vk::PipelineMultisampleStateCreateInfo<'a>,
    shader: Option<&'a GraphicsShader>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
}

impl<'a> ToyPipelineBuilder<'a> {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,

            input_assembly: Self::default_input_assembly_info(),
            rasterization: Self::default_rasterization_info(),
            color_blend_attachment: Self::default_color_blend_state(),
            multisample: Self::default_multisample_info(),
            shader: None,
            set_layouts: Vec::new(),
            render_pass: vk::RenderPass::null(),
            extent: vk::Extent2D::default(),
        }
    }

    pub fn with_shader(mut self, shader: &'a GraphicsShader) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn with_set_layouts(mut self, layouts: &[vk::DescriptorSetLayout]) -> Self {
        self.set_layouts = layouts.to_vec();
        self
    }

    pub fn with_render_pass(mut self, render_pass: vk::RenderPass) -> Self {
        self.render_pass = render_pass;
        self
    }

    /// Viewport and scissor are baked into the pipeline at this size.
    pub fn with_extent(mut self, extent: vk::Extent2D) -> Self {
        self.extent = extent;
        self
    }

    pub fn build(self) -> Result<ToyPipeline> {
        let device = self.device;

        let shader = self
            .shader
            .ok_or_eyre("No shader provided for ToyPipelineBuilder")?;
        if self.render_pass == vk::RenderPass::null() {
            return Err(eyre!("No render pass provided for ToyPipelineBuilder"));
        }

        let layout = {
            let info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&self.set_layouts);
            unsafe {
                device
                    .create_pipeline_layout(&info, None)
                    .map_err(RenderError::creation("pipeline layout"))?
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shader.vert_mod)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shader.frag_mod)
                .name(c"main"),
        ];

        // Vertices come from gl_VertexIndex
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let (viewport, scissor) = viewport_and_scissor(self.extent);
        let viewports = [viewport];
        let scissors = [scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let color_blend_attachments = [self.color_blend_attachment];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .layout(layout)
            .render_pass(self.render_pass)
            .subpass(0)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .color_blend_state(&color_blend_info);

        let pipeline = unsafe {
            match device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ) {
                Ok(pipelines) => pipelines[0],
                Err((_, err)) => {
                    device.destroy_pipeline_layout(layout, None);
                    return Err(RenderError::ResourceCreationFailed {
                        kind: "graphics pipeline",
                        reason: err.to_string(),
                    }
                    .into());
                }
            }
        };

        Ok(ToyPipeline {
            pipeline,
            layout,
            device,
        })
    }

    fn default_input_assembly_info() -> vk::PipelineInputAssemblyStateCreateInfo<'a> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }

    fn default_rasterization_info() -> vk::PipelineRasterizationStateCreateInfo<'a> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn default_color_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
    }

    fn default_multisample_info() -> vk::PipelineMultisampleStateCreateInfo<'a> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            // 1 sample per pixel means no multisampling
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
    }
}

pub fn viewport_and_scissor(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_whole_window() {
        let extent = vk::Extent2D { width: 1920, height: 1080 };
        let (viewport, scissor) = viewport_and_scissor(extent);

        assert_eq!((viewport.width, viewport.height), (1920.0, 1080.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(scissor.extent, extent);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
    }

    #[test]
    fn fixed_function_defaults() {
        let raster = ToyPipelineBuilder::default_rasterization_info();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);

        let blend = ToyPipelineBuilder::default_color_blend_state();
        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);

        let ms = ToyPipelineBuilder::default_multisample_info();
        assert_eq!(ms.rasterization_samples, vk::SampleCountFlags::TYPE_1);

        let ia = ToyPipelineBuilder::default_input_assembly_info();
        assert_eq!(ia.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
    }
}

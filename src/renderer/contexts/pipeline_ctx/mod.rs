pub mod pipeline;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::swapchain::Swapchain;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::pipeline_ctx::pipeline::{ToyPipeline, ToyPipelineBuilder};
use crate::renderer::error::RenderError;
use crate::renderer::resources::shader::{GraphicsShader, ShaderBytecode};

/// Responsibilities:
/// - Own the render pass and one framebuffer per swapchain image
/// - Own the shader modules and the pipeline built from them
/// - Rebuild the pipeline on shader reload without losing the working one on failure
/// - Rebuild framebuffers and the pipeline viewport on resize
pub struct RenderPipelineContext {
    pipeline: ToyPipeline,
    shader: GraphicsShader,
    set_layouts: [vk::DescriptorSetLayout; 2],

    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    extent: vk::Extent2D,

    device: Arc<ash::Device>,
}

impl RenderPipelineContext {
    pub fn new(
        dev_ctx: &RenderDeviceContext,
        bytecode: &ShaderBytecode,
        set_layouts: [vk::DescriptorSetLayout; 2],
    ) -> Result<Self> {
        let device = dev_ctx.device.logical.clone();
        let swapchain = &dev_ctx.target.swapchain;

        let shader = GraphicsShader::new(bytecode, device.clone())?;
        let render_pass = create_render_pass(&device, swapchain.format)?;
        let framebuffers = match create_framebuffers(&device, render_pass, swapchain) {
            Ok(framebuffers) => framebuffers,
            Err(err) => {
                unsafe { device.destroy_render_pass(render_pass, None) };
                return Err(err);
            }
        };

        let pipeline = ToyPipelineBuilder::new(device.clone())
            .with_shader(&shader)
            .with_set_layouts(&set_layouts)
            .with_render_pass(render_pass)
            .with_extent(swapchain.extent)
            .build();
        let pipeline = match pipeline {
            Ok(pipeline) => pipeline,
            Err(err) => {
                destroy_framebuffers(&device, &framebuffers);
                unsafe { device.destroy_render_pass(render_pass, None) };
                return Err(err);
            }
        };

        Ok(Self {
            pipeline,
            shader,
            set_layouts,

            framebuffers,
            render_pass,
            color_format: swapchain.format,
            extent: swapchain.extent,

            device,
        })
    }

    /// Builds shader modules and a pipeline from `bytecode` and swaps them in only once
    /// both exist. On error the running pipeline is left untouched.
    ///
    /// The old pipeline is destroyed here, so the device must be idle.
    pub fn rebuild(&mut self, bytecode: &ShaderBytecode) -> Result<()> {
        let shader = GraphicsShader::new(bytecode, self.device.clone())?;
        let pipeline = self.build_pipeline(&shader)?;

        self.pipeline = pipeline;
        self.shader = shader;
        log::info!("Pipeline rebuilt");
        Ok(())
    }

    /// Follows a swapchain rebuild: framebuffers, and the pipeline whose viewport is
    /// baked to the old size. The device must be idle.
    pub fn resize(&mut self, dev_ctx: &RenderDeviceContext) -> Result<()> {
        let swapchain = &dev_ctx.target.swapchain;

        destroy_framebuffers(&self.device, &self.framebuffers);
        self.framebuffers.clear();

        if swapchain.format != self.color_format {
            let render_pass = create_render_pass(&self.device, swapchain.format)?;
            unsafe { self.device.destroy_render_pass(self.render_pass, None) };
            self.render_pass = render_pass;
            self.color_format = swapchain.format;
        }

        self.framebuffers = create_framebuffers(&self.device, self.render_pass, swapchain)?;
        self.extent = swapchain.extent;
        self.pipeline = self.build_pipeline(&self.shader)?;

        log::debug!(
            "Framebuffers and pipeline rebuilt at {}x{}",
            self.extent.width,
            self.extent.height,
        );
        Ok(())
    }

    fn build_pipeline(&self, shader: &GraphicsShader) -> Result<ToyPipeline> {
        ToyPipelineBuilder::new(self.device.clone())
            .with_shader(shader)
            .with_set_layouts(&self.set_layouts)
            .with_render_pass(self.render_pass)
            .with_extent(self.extent)
            .build()
    }

    /// Records the full-screen draw into the framebuffer of `image_index`.
    pub fn record_draw(
        &self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offset: u32,
    ) -> Result<()> {
        let framebuffer = self
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| eyre!("No framebuffer for swapchain image {image_index}"))?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        self.pipeline.bind_pipeline(cmd);
        self.pipeline.bind_descriptor_sets(cmd, descriptor_sets, &[dynamic_offset]);
        unsafe {
            self.device.cmd_draw(cmd, 3, 1, 0, 0);
            self.device.cmd_end_render_pass(cmd);
        }
        Ok(())
    }
}

impl Drop for RenderPipelineContext {
    fn drop(&mut self) {
        destroy_framebuffers(&self.device, &self.framebuffers);
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];

    // The swapchain image only becomes available once the acquire semaphore, waited at
    // COLOR_ATTACHMENT_OUTPUT, has signaled.
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    Ok(unsafe {
        device
            .create_render_pass(&info, None)
            .map_err(RenderError::creation("render pass"))?
    })
}

fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(swapchain.image_views.len());
    for view in &swapchain.image_views {
        let attachments = [*view];
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(swapchain.extent.width)
            .height(swapchain.extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(err) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(RenderError::creation("framebuffer")(err).into());
            }
        }
    }
    Ok(framebuffers)
}

fn destroy_framebuffers(device: &ash::Device, framebuffers: &[vk::Framebuffer]) {
    for framebuffer in framebuffers {
        unsafe { device.destroy_framebuffer(*framebuffer, None) };
    }
}

pub mod config;
pub mod error;
pub mod hot_reload;
pub mod image_loader;
pub mod shader_compiler;
pub mod shader_data;
pub mod util;

mod contexts;
mod resources;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::{RenderConfig, ResourcePaths, BUFFERING_DEPTH};
use crate::renderer::contexts::device_ctx::swapchain::Acquired;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::contexts::pipeline_ctx::RenderPipelineContext;
use crate::renderer::contexts::resource_ctx::RenderResourceContext;
use crate::renderer::error::RenderError;
use crate::renderer::hot_reload::{HotReloadCoordinator, ReloadBackend};
use crate::renderer::image_loader::DecodedImage;
use crate::renderer::resources::shader::{ShaderBytecode, ShaderStage};
use crate::renderer::shader_data::{FrameInput, ToyUniforms};

/// Draws the toy shader into the window and owns every GPU object it needs
pub struct Renderer {
    // Field order is teardown order; the device context goes last
    pip: RenderPipelineContext,
    res: RenderResourceContext,
    frm: RenderFrameContext,
    dev: RenderDeviceContext,

    resize_requested: bool,
}

impl Renderer {
    pub fn new(
        window: Arc<Window>,
        config: &RenderConfig,
        reloader: &HotReloadCoordinator,
    ) -> Result<Self> {
        let dev = RenderDeviceContext::new(window, config)?;
        let res = RenderResourceContext::new(&dev, reloader.decoder(), reloader.paths())?;
        let frm = RenderFrameContext::new(&dev, BUFFERING_DEPTH, config.fence_timeout())?;

        let bytecode = startup_shaders(reloader)?;
        let pip = RenderPipelineContext::new(&dev, &bytecode, res.descriptors.layouts())?;

        Ok(Self {
            pip,
            res,
            frm,
            dev,

            resize_requested: false,
        })
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    /// Rebuilds the swapchain, framebuffers and pipeline at the current window size.
    pub fn resize(&mut self) -> Result<()> {
        self.resize_requested = false;

        let size = self.dev.target.window.inner_size();
        if size.width == 0 || size.height == 0 {
            // Minimized; keep the request until the window has an area again
            self.resize_requested = true;
            return Ok(());
        }

        self.dev.resize()?;
        self.pip.resize(&self.dev)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.dev.target.extent()
    }

    /// Records and submits one frame, then presents it.
    ///
    /// Returns without drawing when no swapchain image is ready yet or the swapchain
    /// has to be rebuilt first.
    pub fn render(&mut self, input: &FrameInput) -> Result<()> {
        if let Some(message) = self.dev.instance.take_validation_error() {
            return Err(RenderError::ValidationFailed(message).into());
        }

        if self.resize_requested {
            self.resize()?;
            if self.resize_requested {
                return Ok(());
            }
        }

        // The unit's fence guards its acquire semaphore as well as its command buffer
        let device = self.dev.device.logical.clone();
        let unit = self.frm.next_unit()?;

        let image_index = match self.dev.target.swapchain.acquire_next(0, unit.acquire_semaphore)? {
            Acquired::Image { index, suboptimal } => {
                self.resize_requested |= suboptimal;
                index
            }
            Acquired::NotReady => return Ok(()),
            Acquired::OutOfDate => {
                self.resize_requested = true;
                return Ok(());
            }
        };

        unit.begin_recording()?;
        let cmd = unit.command_buffer;

        let consumed = self.res.channels.record_uploads(&device, cmd);
        unit.retire(consumed);

        let extent = self.dev.target.extent();
        let uniforms = ToyUniforms::populate(
            input,
            extent.width,
            extent.height,
            self.res.channels.resolutions(),
        );
        let offset = self.res.uniforms.write_next(&uniforms)?;
        let uniform_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::HOST_WRITE)
            .dst_access_mask(vk::AccessFlags::UNIFORM_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.res.uniforms.buffer.buffer)
            .offset(offset as u64)
            .size(self.res.uniforms.slice_size());
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[uniform_barrier],
                &[],
            );
        }

        let sets = self
            .res
            .descriptors
            .sets()
            .ok_or_eyre("Descriptor sets are not allocated")?;
        self.pip.record_draw(cmd, image_index, &sets, offset)?;
        unit.end_recording()?;

        self.frm.submit(&self.dev.device.graphics_queue)?;

        let render_semaphore = self.frm.current_unit().render_semaphore;
        let needs_resize = self.dev.target.swapchain.present(
            self.dev.device.graphics_queue.handle,
            image_index,
            render_semaphore,
        )?;
        self.resize_requested |= needs_resize;

        Ok(())
    }
}

impl ReloadBackend for Renderer {
    fn wait_idle(&mut self) -> Result<()> {
        self.dev.device.wait_idle()
    }

    fn replace_channel(&mut self, channel: usize, image: &DecodedImage) -> Result<()> {
        self.res.replace_channel(&self.dev, channel, image)
    }

    fn rebuild_image_set(&mut self) -> Result<()> {
        self.res.rebuild_image_set()
    }

    fn rebuild_pipeline(&mut self, bytecode: &ShaderBytecode) -> Result<()> {
        self.pip.rebuild(bytecode)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.dev.device.wait_idle() {
            log::error!("Failed to wait for device idle on shutdown: {err}");
        }
    }
}

/// Precompiled SPIR-V when both stages exist on disk, otherwise the GLSL sources.
fn startup_shaders(reloader: &HotReloadCoordinator) -> Result<ShaderBytecode> {
    let paths: &ResourcePaths = reloader.paths();
    let vertex = paths.shader_spirv(ShaderStage::Vertex);
    let fragment = paths.shader_spirv(ShaderStage::Fragment);

    if vertex.is_file() && fragment.is_file() {
        log::info!("Loading SPIR-V from {}", paths.shader_dir.display());
        return Ok(ShaderBytecode::load(&vertex, &fragment)?);
    }

    log::info!("Compiling GLSL from {}", paths.shader_dir.display());
    Ok(reloader.compile_sources()?)
}

pub mod frame;

use std::sync::Arc;
use std::time::Duration;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::frame_ctx::frame::SubmissionUnit;
use crate::renderer::error::RenderError;
use crate::renderer::util::RingCursor;

/// Responsibilities:
/// - Manage per-frame command buffers
/// - Manage synchronization between frames
/// - Keep upload staging buffers alive until the frame that read them retires
pub struct RenderFrameContext {
    units: Vec<SubmissionUnit>,
    cursor: RingCursor,
    fence_timeout: Duration,

    command_pool: vk::CommandPool,
    device: Arc<ash::Device>,
}

impl RenderFrameContext {
    pub fn new(
        dev_ctx: &RenderDeviceContext,
        unit_count: usize,
        fence_timeout: Duration,
    ) -> Result<Self> {
        let device = dev_ctx.device.logical.clone();

        let command_pool = {
            let info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(dev_ctx.device.graphics_queue.family.index)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            unsafe {
                device
                    .create_command_pool(&info, None)
                    .map_err(RenderError::creation("command pool"))?
            }
        };

        // From here on Drop owns the pool, including on early return
        let mut frm = Self {
            units: Vec::with_capacity(unit_count),
            cursor: RingCursor::new(unit_count),
            fence_timeout,

            command_pool,
            device,
        };

        let command_buffers = {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(unit_count as u32);
            unsafe {
                frm.device
                    .allocate_command_buffers(&info)
                    .map_err(RenderError::creation("command buffers"))?
            }
        };

        for command_buffer in command_buffers {
            let unit = SubmissionUnit::new(command_buffer, frm.device.clone())?;
            frm.units.push(unit);
        }

        Ok(frm)
    }

    /// Moves to the next submission unit in the ring and blocks, up to the fence timeout,
    /// until its previous submission has finished.
    pub fn next_unit(&mut self) -> Result<&mut SubmissionUnit> {
        let index = self.cursor.advance();
        let unit = &mut self.units[index];
        unit.wait(self.fence_timeout)?;
        Ok(unit)
    }

    pub fn current_unit(&mut self) -> &mut SubmissionUnit {
        &mut self.units[self.cursor.current()]
    }

    /// Submits the current unit: waits on its acquire semaphore before color output, then
    /// signals its render semaphore and fence.
    pub fn submit(&mut self, queue: &Queue) -> Result<()> {
        let unit = &self.units[self.cursor.current()];

        let wait_semaphores = [unit.acquire_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [unit.command_buffer];
        let signal_semaphores = [unit.render_semaphore];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.reset_fences(&[unit.render_fence])?;
            self.device.queue_submit(queue.handle, &[submit_info], unit.render_fence)?;
        }
        Ok(())
    }
}

impl Drop for RenderFrameContext {
    fn drop(&mut self) {
        // Units only hold command buffers from this pool; destroying it frees them
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

use std::sync::Arc;
use std::time::Duration;
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::error::RenderError;
use crate::renderer::resources::buffer::Buffer;

/// One command buffer with the primitives that track its execution
pub struct SubmissionUnit {
    pub command_buffer: vk::CommandBuffer,

    // Signaled by the swapchain once the image acquired for this unit is usable.
    pub acquire_semaphore: vk::Semaphore,

    // Signals when all rendering commands have finished execution.
    pub render_fence: vk::Fence,

    // Signals when rendering is done and the image may be presented.
    pub render_semaphore: vk::Semaphore,

    // Staging buffers read by the last recording, released once the fence is seen signaled.
    retired: Vec<Buffer>,

    is_recording: bool,
    device: Arc<ash::Device>,
}

impl SubmissionUnit {
    pub fn new(command_buffer: vk::CommandBuffer, device: Arc<ash::Device>) -> Result<Self> {
        let acquire_semaphore = unsafe {
            device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(RenderError::creation("semaphore"))?
        };
        let render_semaphore = unsafe {
            match device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) {
                Ok(semaphore) => semaphore,
                Err(err) => {
                    device.destroy_semaphore(acquire_semaphore, None);
                    return Err(RenderError::creation("semaphore")(err).into());
                }
            }
        };
        // Created signaled so the first wait on a fresh unit returns immediately
        let render_fence = unsafe {
            match device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            ) {
                Ok(fence) => fence,
                Err(err) => {
                    device.destroy_semaphore(acquire_semaphore, None);
                    device.destroy_semaphore(render_semaphore, None);
                    return Err(RenderError::creation("fence")(err).into());
                }
            }
        };

        Ok(Self {
            command_buffer,
            acquire_semaphore,
            render_fence,
            render_semaphore,
            retired: Vec::new(),
            is_recording: false,
            device,
        })
    }

    /// Blocks until the unit's last submission finished, then releases what it kept alive.
    pub fn wait(&mut self, timeout: Duration) -> Result<()> {
        let result = unsafe {
            self.device.wait_for_fences(
                &[self.render_fence],
                true,
                timeout.as_nanos().min(u64::MAX as u128) as u64,
            )
        };
        fence_wait_outcome(result, timeout)?;
        self.retired.clear();
        Ok(())
    }

    pub fn retire(&mut self, buffers: Vec<Buffer>) {
        self.retired.extend(buffers);
    }

    pub fn begin_recording(&mut self) -> Result<()> {
        if self.is_recording {
            return Err(eyre!("Command buffer is already recording"));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.reset_command_buffer(
                self.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
            self.device.begin_command_buffer(self.command_buffer, &begin_info)?;
        }

        self.is_recording = true;

        Ok(())
    }

    pub fn end_recording(&mut self) -> Result<()> {
        if !self.is_recording {
            return Err(eyre!("Command buffer is not recording"));
        }

        unsafe {
            self.device.end_command_buffer(self.command_buffer)?
        }

        self.is_recording = false;

        Ok(())
    }
}

impl Drop for SubmissionUnit {
    fn drop(&mut self) {
        if self.is_recording {
            log::warn!("Dropping SubmissionUnit while still recording");
        }

        unsafe {
            self.device.destroy_semaphore(self.acquire_semaphore, None);
            self.device.destroy_semaphore(self.render_semaphore, None);
            self.device.destroy_fence(self.render_fence, None);
        }
    }
}

/// A fence that stays unsignaled past the timeout means the GPU is hung.
pub fn fence_wait_outcome(result: VkResult<()>, timeout: Duration) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RenderError::FenceTimeout { timeout }.into()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_fence_timeout_error() {
        let err = fence_wait_outcome(Err(vk::Result::TIMEOUT), Duration::from_millis(1000))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::FenceTimeout { timeout }) if *timeout == Duration::from_secs(1)
        ));
    }

    #[test]
    fn signaled_fence_is_ok() {
        assert!(fence_wait_outcome(Ok(()), Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn device_loss_is_passed_through() {
        let err = fence_wait_outcome(Err(vk::Result::ERROR_DEVICE_LOST), Duration::from_millis(1))
            .unwrap_err();
        assert!(err.downcast_ref::<RenderError>().is_none());
        assert_eq!(err.downcast_ref::<vk::Result>(), Some(&vk::Result::ERROR_DEVICE_LOST));
    }
}

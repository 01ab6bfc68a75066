pub mod instance;
pub mod device;
pub mod queue;
pub mod swapchain;
pub mod target;

use std::sync::Arc;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::target::{RenderSurface, RenderTarget};

/// Responsibilities:
/// - Manage the Vulkan instance, physical and logical device, and the graphics queue
/// - Answer memory type and alignment queries
/// - Own the window surface and swapchain
pub struct RenderDeviceContext {
    // Field order is teardown order
    pub target: RenderTarget,
    pub device: RenderDevice,
    pub instance: RenderInstance,
}

impl RenderDeviceContext {
    pub fn new(
        window: Arc<Window>,
        config: &RenderConfig,
    ) -> Result<Self> {
        let instance = RenderInstance::new(&window, config)?;
        let surface = RenderSurface::new(&instance, &window)?;
        let device = RenderDevice::new(&instance, &surface)?;
        let target = RenderTarget::new(window, surface, &instance, &device)?;

        Ok(Self {
            target,
            device,
            instance,
        })
    }

    /// Rebuilds the swapchain after waiting for the device to go idle.
    pub fn resize(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.target.resize(&self.instance, &self.device)
    }
}

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::BUFFERING_DEPTH;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::swapchain::Swapchain;

/// Window surface handle together with the loader that destroys it
pub struct RenderSurface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

impl RenderSurface {
    pub fn new(instance: &RenderInstance, window: &Window) -> Result<Self> {
        let (handle, loader) = instance.create_surface(window)?;
        Ok(Self { handle, loader })
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

/// Presentation target of the renderer, encapsulating the window, surface, and swapchain
pub struct RenderTarget {
    // Destroyed before the surface it was created from
    pub swapchain: Swapchain,
    pub surface: RenderSurface,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,

    pub window: Arc<Window>,
}

impl RenderTarget {
    pub fn new(
        window: Arc<Window>,
        surface: RenderSurface,
        ins: &RenderInstance,
        dev: &RenderDevice,
    ) -> Result<Self> {
        let surface_formats = unsafe {
            surface.loader
                .get_physical_device_surface_formats(dev.physical, surface.handle)?
        };

        let surface_present_modes = unsafe {
            surface.loader
                .get_physical_device_surface_present_modes(dev.physical, surface.handle)?
        };

        let surface_format = pick_surface_format(&surface_formats)
            .ok_or_eyre("No surface format available")?;
        let present_mode = pick_present_mode(&surface_present_modes);
        log::info!(
            "Surface format {:?} ({:?}), present mode {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
        );

        let swapchain = Swapchain::new(
            &surface,
            surface_format,
            present_mode,
            window_extent(&window),
            BUFFERING_DEPTH as u32,
            ins,
            dev,
        )?;

        Ok(Self {
            swapchain,
            surface,
            surface_format,
            present_mode,
            window,
        })
    }

    /// Destroys the swapchain and builds a new one at the current window size.
    /// The device must be idle.
    pub fn resize(
        &mut self,
        ins: &RenderInstance,
        dev: &RenderDevice,
    ) -> Result<()> {
        self.swapchain.recreate(
            &self.surface,
            self.surface_format,
            self.present_mode,
            window_extent(&self.window),
            BUFFERING_DEPTH as u32,
            ins,
            dev,
        )?;
        log::debug!(
            "Swapchain recreated at {}x{} with {} images",
            self.swapchain.extent.width,
            self.swapchain.extent.height,
            self.swapchain.image_count(),
        );
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// Prefers 8-bit sRGB formats, otherwise takes the first one offered.
pub fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

    PREFERRED
        .iter()
        .find_map(|preferred| formats.iter().find(|f| f.format == *preferred))
        .or_else(|| formats.first())
        .copied()
}

/// First supported mode in FIFO, FIFO_RELAXED, MAILBOX order; FIFO is always available.
pub fn pick_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    const PREFERRED: [vk::PresentModeKHR; 3] = [
        vk::PresentModeKHR::FIFO,
        vk::PresentModeKHR::FIFO_RELAXED,
        vk::PresentModeKHR::MAILBOX,
    ];

    PREFERRED
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn prefers_srgb_formats() {
        let formats = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32),
            format(vk::Format::R8G8B8A8_SRGB),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(pick_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);

        let formats = [
            format(vk::Format::B8G8R8A8_UNORM),
            format(vk::Format::R8G8B8A8_SRGB),
        ];
        assert_eq!(pick_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            pick_surface_format(&formats).unwrap().format,
            vk::Format::R16G16B16A16_SFLOAT
        );
        assert!(pick_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_preference() {
        use vk::PresentModeKHR as M;
        assert_eq!(pick_present_mode(&[M::MAILBOX, M::FIFO_RELAXED, M::FIFO]), M::FIFO);
        assert_eq!(pick_present_mode(&[M::MAILBOX, M::FIFO_RELAXED]), M::FIFO_RELAXED);
        assert_eq!(pick_present_mode(&[M::IMMEDIATE, M::MAILBOX]), M::MAILBOX);
        assert_eq!(pick_present_mode(&[M::IMMEDIATE]), M::FIFO);
    }
}

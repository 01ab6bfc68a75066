use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::target::RenderSurface;

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// No image was ready within the timeout; the acquire semaphore stays unsignaled.
    NotReady,
    /// The surface changed and the swapchain must be recreated.
    OutOfDate,
}

/// Ring of presentable images and their views
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,

    device: Arc<ash::Device>,
}

impl Swapchain {
    pub fn new(
        surface: &RenderSurface,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        window_extent: vk::Extent2D,
        desired_image_count: u32,
        ins: &RenderInstance,
        dev: &RenderDevice,
    ) -> Result<Self> {
        let surface_capabilities = unsafe {
            surface.loader
                .get_physical_device_surface_capabilities(dev.physical, surface.handle)?
        };

        let image_extent = swapchain_extent(&surface_capabilities, window_extent);
        let min_image_count = swapchain_image_count(&surface_capabilities, desired_image_count);
        let pre_transform = if surface_capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            surface_capabilities.current_transform
        };

        let loader = ash::khr::swapchain::Device::new(
            &ins.instance,
            &dev.logical,
        );
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1);

        let handle = unsafe {
            loader.create_swapchain(&swapchain_info, None)?
        };

        // From here on, partially built state is released by Drop
        let mut swapchain = Self {
            handle,
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            extent: image_extent,
            format: surface_format.format,
            device: dev.logical.clone(),
        };

        swapchain.images = unsafe {
            swapchain.loader.get_swapchain_images(handle)?
        };
        swapchain.image_views = create_image_views(&swapchain.images, swapchain.format, &dev.logical)?;

        Ok(swapchain)
    }

    /// Tears down every owned handle, then builds a fresh swapchain.
    pub fn recreate(
        &mut self,
        surface: &RenderSurface,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        window_extent: vk::Extent2D,
        desired_image_count: u32,
        ins: &RenderInstance,
        dev: &RenderDevice,
    ) -> Result<()> {
        self.destroy();
        *self = Self::new(
            surface,
            surface_format,
            present_mode,
            window_extent,
            desired_image_count,
            ins,
            dev,
        )?;
        Ok(())
    }

    /// Requests the next image, signaling `semaphore` once it is usable.
    /// The semaphore must have no pending wait.
    pub fn acquire_next(&self, timeout_ns: u64, semaphore: vk::Semaphore) -> Result<Acquired> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::NOT_READY) | Err(vk::Result::TIMEOUT) => Ok(Acquired::NotReady),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    /// Queues `index` for presentation once `wait_semaphore` is signaled.
    /// Returns true when the swapchain no longer matches the surface.
    pub fn present(
        &self,
        queue: vk::Queue,
        index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handle];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn destroy(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            self.images.clear();
            self.loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// The surface dictates the extent unless it reports the special value `u32::MAX`.
pub fn swapchain_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Clamps the requested image count to the surface limits; a max of 0 means unbounded.
pub fn swapchain_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let count = desired.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

fn create_image_views(
    images: &[vk::Image],
    format: vk::Format,
    device: &ash::Device,
) -> Result<Vec<vk::ImageView>> {
    let views = create_all(
        images,
        |image| {
            let view_info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image(*image);
            unsafe {
                device.create_image_view(&view_info, None)
            }
        },
        |view| unsafe { device.destroy_image_view(view, None) },
    )?;

    Ok(views)
}

/// Creates one handle per item. On the first failure the handles created so far are
/// destroyed before the error is returned.
fn create_all<T, H: Copy>(
    items: &[T],
    mut create: impl FnMut(&T) -> VkResult<H>,
    mut destroy: impl FnMut(H),
) -> VkResult<Vec<H>> {
    let mut created = Vec::with_capacity(items.len());
    for item in items {
        match create(item) {
            Ok(handle) => created.push(handle),
            Err(err) => {
                created.into_iter().for_each(&mut destroy);
                return Err(err);
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_view_creation_destroys_earlier_views() {
        let mut destroyed = Vec::new();
        let result = create_all(
            &[1u64, 2, 3, 4],
            |&i| if i == 3 { Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) } else { Ok(i * 10) },
            |view| destroyed.push(view),
        );

        assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(destroyed, vec![10, 20]);
    }

    #[test]
    fn successful_view_creation_destroys_nothing() {
        let mut destroyed = Vec::new();
        let views = create_all(&[1u64, 2], |&i| Ok(i), |view| destroyed.push(view)).unwrap();

        assert_eq!(views, vec![1, 2]);
        assert!(destroyed.is_empty());
    }

    fn capabilities(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn extent_follows_surface_when_defined() {
        let caps = capabilities((1920, 1080), 2, 8);
        let extent = swapchain_extent(&caps, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn extent_follows_window_when_surface_is_undefined() {
        let caps = capabilities((u32::MAX, u32::MAX), 2, 8);
        let extent = swapchain_extent(&caps, vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!((extent.width, extent.height), (1920, 1080));

        let extent = swapchain_extent(&caps, vk::Extent2D { width: 0, height: 9000 });
        assert_eq!((extent.width, extent.height), (1, 4096));
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(swapchain_image_count(&capabilities((1, 1), 2, 8), 3), 3);
        assert_eq!(swapchain_image_count(&capabilities((1, 1), 4, 8), 3), 4);
        assert_eq!(swapchain_image_count(&capabilities((1, 1), 1, 2), 3), 2);
        assert_eq!(swapchain_image_count(&capabilities((1, 1), 2, 0), 3), 3);
    }

    #[test]
    fn repeated_resize_with_same_size_is_stable() {
        let caps = capabilities((u32::MAX, u32::MAX), 2, 8);
        let window = vk::Extent2D { width: 1920, height: 1080 };
        let first = (swapchain_extent(&caps, window), swapchain_image_count(&caps, 3));
        let second = (swapchain_extent(&caps, window), swapchain_image_count(&caps, 3));
        assert_eq!(first, second);
    }
}

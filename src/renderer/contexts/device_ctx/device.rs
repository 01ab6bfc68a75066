use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationError, MemoryLocation};
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueFamily};
use crate::renderer::contexts::device_ctx::target::RenderSurface;
use crate::renderer::error::RenderError;

/// Logical device, its single graphics queue and the GPU memory allocator
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    // Required to support presentation to the window surface
    pub graphics_queue: Queue,

    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
}

impl RenderDevice {
    pub fn new(
        instance: &RenderInstance,
        surface: &RenderSurface,
    ) -> Result<Self> {
        let (
            physical_device,
            graphics_queue_family,
        ) = Self::select_physical_device(
            &instance.instance,
            surface,
        )?;

        let (properties, memory_properties) = unsafe {
            (
                instance.instance.get_physical_device_properties(physical_device),
                instance.instance.get_physical_device_memory_properties(physical_device),
            )
        };
        if let Ok(name) = properties.device_name_as_c_str() {
            log::info!("Using physical device {:?}, queue family {}", name, graphics_queue_family.index);
        }

        let (
            logical_device,
            graphics_queue,
        ) = Self::create_logical_device(
            &instance.instance,
            &physical_device,
            graphics_queue_family,
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            logical: Arc::new(logical_device),
            physical: physical_device,
            properties,
            memory_properties,

            graphics_queue,

            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
        })
    }

    /// Blocks until every queue of the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    pub fn memory_allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.memory_allocator)
    }

    pub fn memory_type_index(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32, RenderError> {
        find_memory_type(&self.memory_properties, type_bits, flags)
    }

    /// Alignment for slices of a dynamically offset, host mapped uniform buffer.
    pub fn uniform_slice_alignment(&self) -> Result<u64, RenderError> {
        let limits = &self.properties.limits;
        uniform_slice_alignment(
            limits.min_uniform_buffer_offset_alignment,
            limits.min_memory_map_alignment as u64,
        )
    }

    pub fn memory_map_alignment(&self) -> u64 {
        (self.properties.limits.min_memory_map_alignment as u64).max(1)
    }

    /// Allocates memory for a resource, reporting a missing memory type as
    /// [`RenderError::NoCompatibleMemory`].
    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
        allocation_scheme: AllocationScheme,
    ) -> Result<Allocation> {
        self.memory_type_index(requirements.memory_type_bits, required_memory_flags(location))?;

        let allocation = self.memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme,
            })
            .map_err(|err| match err {
                AllocationError::NoCompatibleMemoryTypeFound => RenderError::NoCompatibleMemory {
                    type_bits: requirements.memory_type_bits,
                    flags: required_memory_flags(location),
                },
                other => RenderError::ResourceCreationFailed {
                    kind: "memory allocation",
                    reason: format!("{name}: {other}"),
                },
            })?;

        Ok(allocation)
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: &RenderSurface,
    ) -> Result<(vk::PhysicalDevice, QueueFamily)> {
        let physical_device = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .next()
            .ok_or(RenderError::NoPhysicalDevice)?;

        let queue_families = unsafe {
            instance.get_physical_device_queue_family_properties(physical_device)
        };
        let graphics_family = QueueFamily::first_graphics(&queue_families)
            .ok_or(RenderError::NoGraphicsQueue)?;

        let supports_present = unsafe {
            surface.loader.get_physical_device_surface_support(
                physical_device,
                graphics_family.index,
                surface.handle,
            )?
        };
        if !supports_present {
            return Err(RenderError::PresentationUnsupported {
                family: graphics_family.index,
            }.into());
        }

        Ok((physical_device, graphics_family))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: &vk::PhysicalDevice,
        graphics_queue_family: QueueFamily,
    ) -> Result<(ash::Device, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_queue_family.index)
                .queue_priorities(&queue_priorities),
        ];

        let device = {
            let enabled_extension_names = Self::get_required_device_extensions()
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();
            let enabled_features = vk::PhysicalDeviceFeatures::default();

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .enabled_features(&enabled_features);

            unsafe {
                instance.create_device(*physical_device, &device_create_info, None)?
            }
        };

        let graphics_queue = unsafe {
            let queue = device.get_device_queue(graphics_queue_family.index, 0);
            Queue::new(graphics_queue_family, queue)
        };

        Ok((device, graphics_queue))
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {err}");
            }
            // Allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_device(None);
        }
    }
}

/// Index of the first memory type allowed by `type_bits` that has all of `flags`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(index, _)| index as u32)
        .ok_or(RenderError::NoCompatibleMemory { type_bits, flags })
}

/// The stricter of the two alignment limits; both must be powers of two.
pub fn uniform_slice_alignment(
    min_uniform_offset_alignment: u64,
    min_memory_map_alignment: u64,
) -> Result<u64, RenderError> {
    for limit in [min_uniform_offset_alignment, min_memory_map_alignment] {
        if limit != 0 && !limit.is_power_of_two() {
            return Err(RenderError::ResourceCreationFailed {
                kind: "uniform ring buffer",
                reason: format!("device alignment limit {limit} is not a power of two"),
            });
        }
    }
    Ok(min_uniform_offset_alignment.max(min_memory_map_alignment).max(1))
}

pub fn required_memory_flags(location: MemoryLocation) -> vk::MemoryPropertyFlags {
    match location {
        MemoryLocation::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryLocation::CpuToGpu => {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        }
        MemoryLocation::GpuToCpu => vk::MemoryPropertyFlags::HOST_VISIBLE,
        _ => vk::MemoryPropertyFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn finds_first_matching_memory_type() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        let coherent = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b1111, coherent).unwrap(), 2);
        assert_eq!(find_memory_type(&props, 0b1000, coherent).unwrap(), 3);
        assert_eq!(
            find_memory_type(&props, 0b0011, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn missing_memory_type_is_distinguishable() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(
            err,
            RenderError::NoCompatibleMemory { type_bits: 0b1, .. }
        ));

        // Type bits exclude the only type that would match
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        assert!(find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn ignores_types_past_count() {
        let mut props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn uniform_alignment_takes_stricter_limit() {
        assert_eq!(uniform_slice_alignment(256, 64).unwrap(), 256);
        assert_eq!(uniform_slice_alignment(16, 4096).unwrap(), 4096);
        assert_eq!(uniform_slice_alignment(0, 0).unwrap(), 1);
        assert!(matches!(
            uniform_slice_alignment(96, 64),
            Err(RenderError::ResourceCreationFailed { .. })
        ));
    }

    #[test]
    fn host_visible_locations_require_mappable_memory() {
        assert!(required_memory_flags(MemoryLocation::CpuToGpu)
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        assert_eq!(
            required_memory_flags(MemoryLocation::GpuOnly),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
    }
}

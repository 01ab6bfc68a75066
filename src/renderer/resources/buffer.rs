use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::error::RenderError;
use crate::renderer::util::align_up;

/// Device buffer with a dedicated gpu-allocator allocation
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        dev: &RenderDevice,
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_loc: MemoryLocation,
    ) -> Result<Self> {
        let device = dev.logical.clone();
        let buffer = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe {
                device
                    .create_buffer(&buffer_info, None)
                    .map_err(RenderError::creation("buffer"))?
            }
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = match dev.allocate(
            name,
            requirements,
            mem_loc,
            true,
            AllocationScheme::DedicatedBuffer(buffer),
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        // Dropping `this` on a failed bind releases both the buffer and its memory
        let this = Self {
            buffer,
            size,

            allocation: Some(allocation),
            memory_allocator: dev.memory_allocator(),
            device,
        };

        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                    .map_err(RenderError::creation("buffer memory binding"))?;
            }
        }

        Ok(this)
    }

    /// Host-visible, coherent transfer source seeded with `data`.
    ///
    /// The buffer is sized to `data` rounded up to the device's memory map alignment.
    pub fn new_staging(
        dev: &RenderDevice,
        data: &[u8],
        name: &str,
    ) -> Result<Self> {
        let size = align_up(data.len().max(1) as u64, dev.memory_map_alignment())?;
        let mut buffer = Self::new(
            dev,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            name,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(data, 0)?;
        buffer.flush()?;
        Ok(buffer)
    }

    pub fn write<T>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> Result<presser::CopyRecord>
    where
        T: Copy,
    {
        let mut slab = self.mapped_slab()?;
        Ok(presser::copy_from_slice_to_offset(
            data,
            &mut slab,
            start_offset,
        )?)
    }

    /// Persistently mapped bytes of the buffer's memory.
    pub fn mapped_slab(&mut self) -> Result<MappedSlab<'_>> {
        let bytes = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_eyre("Buffer memory is not host mapped")?;
        Ok(MappedSlab(bytes))
    }

    /// Makes host writes visible to the device. No-op on coherent memory.
    pub fn flush(&self) -> Result<()> {
        let allocation = self
            .allocation
            .as_ref()
            .ok_or_eyre("Buffer has no memory to flush")?;
        if !needs_flush(allocation.memory_properties()) {
            return Ok(());
        }
        let range = vk::MappedMemoryRange::default()
            .memory(unsafe { allocation.memory() })
            .offset(allocation.offset())
            .size(vk::WHOLE_SIZE);
        unsafe {
            self.device.flush_mapped_memory_ranges(&[range])?;
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free buffer memory: {err}");
                    }
                }
                Err(err) => log::error!("Memory allocator lock poisoned: {err}"),
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Host writes to mapped memory only need an explicit flush without `HOST_COHERENT`.
pub fn needs_flush(flags: vk::MemoryPropertyFlags) -> bool {
    flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        && !flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
}

/// A mutable byte region that presser can copy typed data into.
pub struct MappedSlab<'a>(pub &'a mut [u8]);

unsafe impl presser::Slab for MappedSlab<'_> {
    fn base_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    fn base_ptr_mut(&mut self) -> *mut u8 {
        self.0.as_mut_ptr()
    }

    fn size(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_non_coherent_host_memory_is_flushed() {
        let visible = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let coherent = vk::MemoryPropertyFlags::HOST_COHERENT;

        assert!(needs_flush(visible));
        assert!(needs_flush(visible | vk::MemoryPropertyFlags::HOST_CACHED));
        assert!(!needs_flush(visible | coherent));
        assert!(!needs_flush(visible | coherent | vk::MemoryPropertyFlags::DEVICE_LOCAL));
        assert!(!needs_flush(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    }
}

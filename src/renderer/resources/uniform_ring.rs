use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use gpu_allocator::MemoryLocation;
use presser::Slab;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::error::RenderError;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::util::{align_up, RingCursor};

/// The ring is only ever written through the mapping and read by shaders.
pub const RING_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::UNIFORM_BUFFER;

/// One host-visible allocation split into equal, aligned slices used round-robin.
///
/// Nothing here fences the GPU. A slice is only safe to overwrite once the submission
/// that last read it has retired, which the frame loop guarantees by waiting on the
/// frame's fence before writing.
pub struct UniformRing {
    pub buffer: Buffer,
    slices: SliceRing,
}

impl UniformRing {
    pub fn new(
        dev: &RenderDevice,
        payload_size: u64,
        depth: usize,
    ) -> Result<Self> {
        let slice_size = align_up(payload_size, dev.uniform_slice_alignment()?)?;
        let buffer = Buffer::new(
            dev,
            slice_size * depth as u64,
            RING_USAGE,
            "Uniform ring",
            MemoryLocation::CpuToGpu,
        )?;
        log::debug!("Uniform ring: {depth} slices of {slice_size} bytes");

        Ok(Self {
            buffer,
            slices: SliceRing::new(slice_size as usize, depth),
        })
    }

    /// Copies `value` into the next slice and returns its byte offset for a dynamic bind.
    pub fn write_next<T: Pod>(&mut self, value: &T) -> Result<u32> {
        let mut slab = self.buffer.mapped_slab()?;
        let offset = self.slices.write_next(&mut slab, bytemuck::bytes_of(value))?;
        self.buffer.flush()?;
        Ok(offset as u32)
    }

    pub fn slice_size(&self) -> u64 {
        self.slices.slice_size as u64
    }
}

/// Cursor and bounds checks for a ring of equal slices inside any byte slab.
#[derive(Debug, Clone)]
pub struct SliceRing {
    slice_size: usize,
    cursor: RingCursor,
}

impl SliceRing {
    pub fn new(slice_size: usize, depth: usize) -> Self {
        Self {
            slice_size,
            cursor: RingCursor::new(depth),
        }
    }

    /// Advances to the next slice, copies `bytes` to its start and returns the slice's offset.
    ///
    /// An oversized payload is rejected before the cursor moves.
    pub fn write_next<S: Slab>(&mut self, slab: &mut S, bytes: &[u8]) -> Result<usize> {
        if bytes.len() > self.slice_size {
            return Err(RenderError::UniformPayloadTooLarge {
                len: bytes.len(),
                capacity: self.slice_size,
            }.into());
        }

        let offset = self.cursor.advance() * self.slice_size;
        presser::copy_from_slice_to_offset(bytes, slab, offset)?;
        Ok(offset)
    }

    pub fn current_offset(&self) -> usize {
        self.cursor.current() * self.slice_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resources::buffer::MappedSlab;

    const SLICE: usize = 16;
    const DEPTH: usize = 3;

    fn slice(memory: &[u8], index: usize) -> &[u8] {
        &memory[index * SLICE..(index + 1) * SLICE]
    }

    #[test]
    fn ring_is_a_plain_uniform_buffer() {
        assert!(RING_USAGE.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(!RING_USAGE.contains(vk::BufferUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn writes_advance_through_slices() {
        let mut memory = vec![0u8; SLICE * DEPTH];
        let mut ring = SliceRing::new(SLICE, DEPTH);

        let offsets: Vec<usize> = (1..=4u8)
            .map(|i| ring.write_next(&mut MappedSlab(&mut memory), &[i; SLICE]).unwrap())
            .collect();

        assert_eq!(offsets, vec![0, 16, 32, 0]);
        assert_eq!(ring.current_offset(), 0);
    }

    #[test]
    fn each_slice_holds_latest_write_for_its_position() {
        let mut memory = vec![0u8; SLICE * DEPTH];
        let mut ring = SliceRing::new(SLICE, DEPTH);

        // Seven writes: positions 0,1,2,0,1,2,0
        for i in 1..=7u8 {
            ring.write_next(&mut MappedSlab(&mut memory), &[i; SLICE]).unwrap();
        }

        assert_eq!(slice(&memory, 0), &[7; SLICE]);
        assert_eq!(slice(&memory, 1), &[5; SLICE]);
        assert_eq!(slice(&memory, 2), &[6; SLICE]);
    }

    #[test]
    fn short_payload_leaves_slice_tail_untouched() {
        let mut memory = vec![0xAAu8; SLICE * DEPTH];
        let mut ring = SliceRing::new(SLICE, DEPTH);

        ring.write_next(&mut MappedSlab(&mut memory), &[1, 2, 3, 4]).unwrap();

        assert_eq!(&memory[..4], &[1, 2, 3, 4]);
        assert!(memory[4..SLICE].iter().all(|b| *b == 0xAA));
    }

    #[test]
    fn oversized_payload_is_rejected_without_advancing() {
        let mut memory = vec![0u8; SLICE * DEPTH];
        let mut ring = SliceRing::new(SLICE, DEPTH);
        ring.write_next(&mut MappedSlab(&mut memory), &[1; SLICE]).unwrap();

        let err = ring
            .write_next(&mut MappedSlab(&mut memory), &[9; SLICE + 1])
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::UniformPayloadTooLarge { len: 17, capacity: 16 })
        ));
        assert_eq!(ring.current_offset(), 0);
        assert_eq!(slice(&memory, 1), &[0; SLICE]);
    }
}

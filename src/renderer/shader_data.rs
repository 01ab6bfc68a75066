use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use crate::renderer::config::CHANNEL_COUNT;

pub const SAMPLE_RATE: f32 = 44100.0;

/// Uniform block read by the toy shader, laid out for std140
///
/// Matches the `ToyUniforms` block at set 0, binding 0 of `shaders/toy.frag`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct ToyUniforms {
    /// Width, height, depth of each channel image
    pub channel_resolution: [Vec4; CHANNEL_COUNT],
    /// Pointer x, y while dragging, then click state twice
    pub mouse: Vec4,
    /// Year, month (from 0), day of month, seconds of the minute
    pub date: Vec4,
    /// Width, height, aspect ratio of the window
    pub resolution: Vec4,
    pub channel_time: Vec4,
    pub global_delta: f32,
    pub global_frame: f32,
    pub global_time: f32,
    pub sample_rate: f32,
}

/// Per-frame values gathered by the application before rendering.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameInput {
    pub time: f32,
    pub delta: f32,
    pub frame_index: u64,
    pub mouse: Vec4,
    pub date: Vec4,
}

impl ToyUniforms {
    pub fn populate(
        input: &FrameInput,
        width: u32,
        height: u32,
        channel_resolution: [[f32; 4]; CHANNEL_COUNT],
    ) -> Self {
        let (w, h) = (width as f32, height as f32);
        let aspect = if h > 0.0 { w / h } else { 0.0 };

        Self {
            channel_resolution: channel_resolution.map(Vec4::from_array),
            mouse: input.mouse,
            date: input.date,
            resolution: Vec4::new(w, h, aspect, 0.0),
            channel_time: Vec4::splat(input.time),
            global_delta: input.delta,
            global_frame: input.frame_index as f32,
            global_time: input.time,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn std140_offsets() {
        assert_eq!(offset_of!(ToyUniforms, channel_resolution), 0);
        assert_eq!(offset_of!(ToyUniforms, mouse), 64);
        assert_eq!(offset_of!(ToyUniforms, date), 80);
        assert_eq!(offset_of!(ToyUniforms, resolution), 96);
        assert_eq!(offset_of!(ToyUniforms, channel_time), 112);
        assert_eq!(offset_of!(ToyUniforms, global_delta), 128);
        assert_eq!(offset_of!(ToyUniforms, sample_rate), 140);
        assert_eq!(size_of::<ToyUniforms>(), 144);
    }

    #[test]
    fn populate_from_frame_input() {
        let input = FrameInput {
            time: 2.5,
            delta: 0.016,
            frame_index: 150,
            mouse: Vec4::new(10.0, 20.0, 1.0, 1.0),
            date: Vec4::new(2024.0, 0.0, 15.0, 42.0),
        };
        let mut channels = [[1.0, 1.0, 1.0, 0.0]; CHANNEL_COUNT];
        channels[2] = [512.0, 256.0, 1.0, 0.0];

        let uniforms = ToyUniforms::populate(&input, 1280, 720, channels);

        assert_eq!(uniforms.resolution, Vec4::new(1280.0, 720.0, 1280.0 / 720.0, 0.0));
        assert_eq!(uniforms.channel_resolution[2], Vec4::new(512.0, 256.0, 1.0, 0.0));
        assert_eq!(uniforms.channel_time, Vec4::splat(2.5));
        assert_eq!(uniforms.global_frame, 150.0);
        assert_eq!(uniforms.mouse, input.mouse);
        assert_eq!(uniforms.sample_rate, 44100.0);
    }

    #[test]
    fn zero_height_has_no_aspect() {
        let uniforms = ToyUniforms::populate(&FrameInput::default(), 0, 0, [[0.0; 4]; CHANNEL_COUNT]);
        assert_eq!(uniforms.resolution.z, 0.0);
    }
}

// Per-frame data handed to render systems

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use super::{Camera, GameObject};

/// Uniform block bound at set 0, binding 0 (std140 layout)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    pub projection_view: Mat4,
    /// rgb + intensity
    pub ambient_light_color: Vec4,
    pub light_position: Vec4,
    /// rgb + intensity
    pub light_color: Vec4,
}

impl Default for GlobalUbo {
    fn default() -> Self {
        Self {
            projection_view: Mat4::IDENTITY,
            ambient_light_color: Vec4::new(1.0, 1.0, 1.0, 0.02),
            light_position: Vec4::new(-1.0, -1.0, -1.0, 1.0),
            light_color: Vec4::ONE,
        }
    }
}

/// Everything a render system needs to record one frame
pub struct FrameInfo<'a> {
    pub frame_index: usize,
    /// Seconds since the previous frame
    pub frame_time: f32,
    pub command_buffer: vk::CommandBuffer,
    pub camera: &'a Camera,
    /// `None` for push-constant-only pipelines
    pub global_descriptor_set: Option<vk::DescriptorSet>,
    pub game_objects: &'a [GameObject],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_ubo_matches_std140_block() {
        assert_eq!(std::mem::size_of::<GlobalUbo>(), 64 + 3 * 16);
        assert_eq!(std::mem::offset_of!(GlobalUbo, ambient_light_color), 64);
        assert_eq!(std::mem::offset_of!(GlobalUbo, light_position), 80);
        assert_eq!(std::mem::offset_of!(GlobalUbo, light_color), 96);
    }

    #[test]
    fn global_ubo_bytes_start_with_projection_view() {
        let ubo = GlobalUbo {
            projection_view: Mat4::from_scale(glam::Vec3::splat(2.0)),
            ..Default::default()
        };
        let bytes = bytemuck::bytes_of(&ubo);
        let first: f32 = bytemuck::pod_read_unaligned(&bytes[0..4]);
        assert_eq!(first, 2.0);
    }
}

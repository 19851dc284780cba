// Simple render system
//
// Owns one graphics pipeline and its layout, and records a linear draw loop
// over the frame's game objects: bind pipeline, bind the global descriptor
// set (when the layout has one), then push constants + draw per object.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::sync::Arc;
use crate::backend::{AshRecorder, CommandRecorder, Pipeline, PipelineConfig, ShaderPaths, VulkanDevice};
use crate::scene::{FrameInfo, GameObject, Transform, Vertex};

fn push_constant_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
}

/// Per-object data pushed before each draw (std430 layout, 128 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SimplePushConstantData {
    pub model_matrix: Mat4,
    /// Mat3 padded to Mat4 for alignment
    pub normal_matrix: Mat4,
}

impl From<&Transform> for SimplePushConstantData {
    fn from(transform: &Transform) -> Self {
        Self {
            model_matrix: transform.mat4(),
            normal_matrix: Mat4::from_mat3(transform.normal_matrix()),
        }
    }
}

/// Counts from one recorded frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub drawn: usize,
    /// Objects without a model
    pub skipped: usize,
}

/// Handles needed to record the draw loop, independent of who owns them
#[derive(Debug, Clone, Copy)]
pub struct DrawPass {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub uses_global_set: bool,
}

impl DrawPass {
    pub fn record(
        &self,
        recorder: &mut dyn CommandRecorder,
        global_descriptor_set: Option<vk::DescriptorSet>,
        game_objects: &[GameObject],
    ) -> Result<DrawStats> {
        let global_set = match (self.uses_global_set, global_descriptor_set) {
            (true, Some(set)) => Some(set),
            (true, None) => {
                anyhow::bail!("Pipeline layout expects a global descriptor set but the frame has none")
            }
            (false, Some(_)) => {
                log::warn!("Frame carries a global descriptor set the pipeline layout does not use; ignoring it");
                None
            }
            (false, None) => None,
        };

        recorder.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.pipeline);

        if let Some(set) = global_set {
            recorder.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, self.layout, 0, &[set]);
        }

        let mut stats = DrawStats::default();
        for object in game_objects {
            let Some(model) = &object.model else {
                stats.skipped += 1;
                continue;
            };

            let push = SimplePushConstantData::from(&object.transform);
            recorder.push_constants(self.layout, push_constant_stages(), 0, bytemuck::bytes_of(&push));
            model.bind(recorder);
            model.draw(recorder);
            stats.drawn += 1;
        }

        log::trace!("Recorded {} draws ({} skipped)", stats.drawn, stats.skipped);
        Ok(stats)
    }
}

/// Owns the pipeline + layout used to draw game objects
pub struct SimpleRenderSystem {
    pipeline: Pipeline,
    pipeline_layout: vk::PipelineLayout,
    uses_global_set: bool,
    device: Arc<VulkanDevice>,
}

impl SimpleRenderSystem {
    /// Build the layout and pipeline for `render_pass`
    ///
    /// `global_set_layout` is bound at set 0 every frame; pass `None` for a
    /// pipeline that only uses push constants.
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        global_set_layout: Option<vk::DescriptorSetLayout>,
        shaders: &ShaderPaths,
        polygon_mode: vk::PolygonMode,
    ) -> Result<Self> {
        let pipeline_layout = Self::create_pipeline_layout(&device, global_set_layout)?;

        let pipeline = match Self::create_pipeline(
            device.clone(),
            render_pass,
            pipeline_layout,
            shaders,
            polygon_mode,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(e);
            }
        };

        log::info!(
            "Simple render system ready ({})",
            if global_set_layout.is_some() { "global descriptor set" } else { "push constants only" }
        );

        Ok(Self {
            pipeline,
            pipeline_layout,
            uses_global_set: global_set_layout.is_some(),
            device,
        })
    }

    fn create_pipeline_layout(
        device: &VulkanDevice,
        global_set_layout: Option<vk::DescriptorSetLayout>,
    ) -> Result<vk::PipelineLayout> {
        let push_constant_ranges = [vk::PushConstantRange::builder()
            .stage_flags(push_constant_stages())
            .offset(0)
            .size(std::mem::size_of::<SimplePushConstantData>() as u32)
            .build()];

        let set_layouts: Vec<vk::DescriptorSetLayout> = global_set_layout.into_iter().collect();

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        unsafe {
            device
                .device
                .create_pipeline_layout(&layout_info, None)
                .context("Failed to create pipeline layout")
        }
    }

    fn create_pipeline(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        pipeline_layout: vk::PipelineLayout,
        shaders: &ShaderPaths,
        polygon_mode: vk::PolygonMode,
    ) -> Result<Pipeline> {
        let config = PipelineConfig {
            binding_descriptions: Vertex::binding_descriptions(),
            attribute_descriptions: Vertex::attribute_descriptions(),
            polygon_mode,
            pipeline_layout,
            render_pass,
            ..Default::default()
        };

        Pipeline::new(device, shaders, &config)
    }

    pub fn draw_pass(&self) -> DrawPass {
        DrawPass {
            pipeline: self.pipeline.handle(),
            layout: self.pipeline_layout,
            uses_global_set: self.uses_global_set,
        }
    }

    /// Record draws for the frame's objects, binding its global descriptor set
    pub fn render_game_objects(&self, frame_info: &FrameInfo) -> Result<DrawStats> {
        log::trace!(
            "Frame {} ({:.2} ms) from {:?}",
            frame_info.frame_index,
            frame_info.frame_time * 1000.0,
            frame_info.camera.position()
        );
        let mut recorder = AshRecorder::new(&self.device.device, frame_info.command_buffer);
        self.draw_pass().record(
            &mut recorder,
            frame_info.global_descriptor_set,
            frame_info.game_objects,
        )
    }

    /// Record draws with push constants only, no descriptor set
    pub fn render_game_objects_in(
        &self,
        command_buffer: vk::CommandBuffer,
        game_objects: &[GameObject],
    ) -> Result<DrawStats> {
        let mut recorder = AshRecorder::new(&self.device.device, command_buffer);
        self.draw_pass().record(&mut recorder, None, game_objects)
    }
}

impl Drop for SimpleRenderSystem {
    fn drop(&mut self) {
        // Pipeline itself is destroyed by its own Drop
        unsafe {
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recorder::mock::{Command, MockRecorder};
    use crate::scene::model::MeshBinding;
    use ash::vk::Handle;
    use glam::Vec3;

    fn mesh_object(id: u64, vertex_count: u32) -> GameObject {
        GameObject::with_model(Arc::new(MeshBinding {
            vertex_buffer: vk::Buffer::from_raw(id),
            vertex_count,
            index: None,
        }))
    }

    fn indexed_object(id: u64, index_count: u32) -> GameObject {
        GameObject::with_model(Arc::new(MeshBinding {
            vertex_buffer: vk::Buffer::from_raw(id),
            vertex_count: 24,
            index: Some((vk::Buffer::from_raw(id + 100), index_count)),
        }))
    }

    fn lit_pass() -> DrawPass {
        DrawPass {
            pipeline: vk::Pipeline::from_raw(10),
            layout: vk::PipelineLayout::from_raw(20),
            uses_global_set: true,
        }
    }

    fn flat_pass() -> DrawPass {
        DrawPass {
            uses_global_set: false,
            ..lit_pass()
        }
    }

    fn is_push(command: &Command) -> bool {
        matches!(command, Command::PushConstants { .. })
    }

    #[test]
    fn push_constants_fill_the_guaranteed_minimum() {
        assert_eq!(std::mem::size_of::<SimplePushConstantData>(), 128);
    }

    #[test]
    fn binds_pipeline_then_global_set_then_draws_each_object() {
        let set = vk::DescriptorSet::from_raw(30);
        let objects = vec![mesh_object(1, 36), mesh_object(2, 3)];
        let mut recorder = MockRecorder::default();

        let stats = lit_pass().record(&mut recorder, Some(set), &objects).unwrap();

        assert_eq!(stats, DrawStats { drawn: 2, skipped: 0 });
        let commands = &recorder.commands;
        assert_eq!(commands.len(), 2 + 2 * 3);
        assert_eq!(commands[0], Command::BindPipeline(vk::Pipeline::from_raw(10)));
        assert_eq!(
            commands[1],
            Command::BindDescriptorSets {
                first_set: 0,
                sets: vec![set]
            }
        );
        assert!(is_push(&commands[2]));
        assert_eq!(commands[3], Command::BindVertexBuffers(vec![vk::Buffer::from_raw(1)]));
        assert_eq!(commands[4], Command::Draw { vertex_count: 36 });
        assert!(is_push(&commands[5]));
        assert_eq!(commands[6], Command::BindVertexBuffers(vec![vk::Buffer::from_raw(2)]));
        assert_eq!(commands[7], Command::Draw { vertex_count: 3 });
    }

    #[test]
    fn indexed_objects_bind_index_buffer_after_push() {
        let set = vk::DescriptorSet::from_raw(30);
        let objects = vec![indexed_object(1, 36)];
        let mut recorder = MockRecorder::default();

        let stats = lit_pass().record(&mut recorder, Some(set), &objects).unwrap();

        assert_eq!(stats, DrawStats { drawn: 1, skipped: 0 });
        let commands = &recorder.commands;
        assert_eq!(commands.len(), 2 + 4);
        assert!(is_push(&commands[2]));
        assert_eq!(commands[3], Command::BindVertexBuffers(vec![vk::Buffer::from_raw(1)]));
        assert_eq!(commands[4], Command::BindIndexBuffer(vk::Buffer::from_raw(101)));
        assert_eq!(commands[5], Command::DrawIndexed { index_count: 36 });
    }

    #[test]
    fn pushed_bytes_carry_model_and_normal_matrices() {
        let mut object = mesh_object(1, 3);
        object.transform = Transform {
            translation: Vec3::new(0.0, 0.0, 2.5),
            scale: Vec3::splat(0.5),
            rotation: Vec3::new(0.1, 0.2, 0.3),
        };
        let expected = SimplePushConstantData::from(&object.transform);
        let mut recorder = MockRecorder::default();

        flat_pass().record(&mut recorder, None, &[object]).unwrap();

        let push = recorder
            .commands
            .iter()
            .find(|c| is_push(c))
            .cloned()
            .unwrap();
        match push {
            Command::PushConstants { stages, offset, data } => {
                assert_eq!(stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
                assert_eq!(offset, 0);
                assert_eq!(data.as_slice(), bytemuck::bytes_of(&expected));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn objects_without_a_model_are_skipped() {
        let objects = vec![GameObject::create(), mesh_object(5, 6), GameObject::create()];
        let mut recorder = MockRecorder::default();

        let stats = flat_pass().record(&mut recorder, None, &objects).unwrap();

        assert_eq!(stats, DrawStats { drawn: 1, skipped: 2 });
        assert_eq!(recorder.commands.iter().filter(|c| is_push(c)).count(), 1);
    }

    #[test]
    fn missing_global_set_is_an_error_and_records_nothing() {
        let objects = vec![mesh_object(1, 3)];
        let mut recorder = MockRecorder::default();

        assert!(lit_pass().record(&mut recorder, None, &objects).is_err());
        assert!(recorder.commands.is_empty());
    }

    #[test]
    fn push_constant_only_pass_ignores_a_global_set() {
        let objects = vec![mesh_object(1, 3)];
        let mut recorder = MockRecorder::default();

        flat_pass()
            .record(&mut recorder, Some(vk::DescriptorSet::from_raw(30)), &objects)
            .unwrap();

        assert!(!recorder
            .commands
            .iter()
            .any(|c| matches!(c, Command::BindDescriptorSets { .. })));
        assert_eq!(recorder.commands[0], Command::BindPipeline(vk::Pipeline::from_raw(10)));
    }

    #[test]
    fn empty_scene_only_binds_state() {
        let mut recorder = MockRecorder::default();
        let stats = lit_pass()
            .record(&mut recorder, Some(vk::DescriptorSet::from_raw(30)), &[])
            .unwrap();

        assert_eq!(stats, DrawStats::default());
        assert_eq!(recorder.commands.len(), 2);
    }
}

// Command recording seam
//
// Draw code records through `CommandRecorder` instead of calling ash
// directly, so the per-object loop can be driven by a recording mock in tests.

use ash::vk;

/// The subset of command-buffer commands the render systems emit
pub trait CommandRecorder {
    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);

    fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]);

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
}

/// Records straight into a Vulkan command buffer
pub struct AshRecorder<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> AshRecorder<'a> {
    pub fn new(device: &'a ash::Device, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            command_buffer,
        }
    }
}

impl CommandRecorder for AshRecorder<'_> {
    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, bind_point, pipeline);
        }
    }

    fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                bind_point,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, stages, offset, data);
        }
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, offsets);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type);
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.cmd_draw(
                self.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }
}

#[cfg(test)]
pub mod mock {
    // Recorder that stores every command for assertions

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Command {
        BindPipeline(vk::Pipeline),
        BindDescriptorSets {
            first_set: u32,
            sets: Vec<vk::DescriptorSet>,
        },
        PushConstants {
            stages: vk::ShaderStageFlags,
            offset: u32,
            data: Vec<u8>,
        },
        BindVertexBuffers(Vec<vk::Buffer>),
        BindIndexBuffer(vk::Buffer),
        Draw { vertex_count: u32 },
        DrawIndexed { index_count: u32 },
    }

    #[derive(Default)]
    pub struct MockRecorder {
        pub commands: Vec<Command>,
    }

    impl CommandRecorder for MockRecorder {
        fn bind_pipeline(&mut self, _bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
            self.commands.push(Command::BindPipeline(pipeline));
        }

        fn bind_descriptor_sets(
            &mut self,
            _bind_point: vk::PipelineBindPoint,
            _layout: vk::PipelineLayout,
            first_set: u32,
            sets: &[vk::DescriptorSet],
        ) {
            self.commands.push(Command::BindDescriptorSets {
                first_set,
                sets: sets.to_vec(),
            });
        }

        fn push_constants(
            &mut self,
            _layout: vk::PipelineLayout,
            stages: vk::ShaderStageFlags,
            offset: u32,
            data: &[u8],
        ) {
            self.commands.push(Command::PushConstants {
                stages,
                offset,
                data: data.to_vec(),
            });
        }

        fn bind_vertex_buffers(&mut self, _first_binding: u32, buffers: &[vk::Buffer], _offsets: &[vk::DeviceSize]) {
            self.commands.push(Command::BindVertexBuffers(buffers.to_vec()));
        }

        fn bind_index_buffer(&mut self, buffer: vk::Buffer, _offset: vk::DeviceSize, _index_type: vk::IndexType) {
            self.commands.push(Command::BindIndexBuffer(buffer));
        }

        fn draw(&mut self, vertex_count: u32, _instance_count: u32, _first_vertex: u32, _first_instance: u32) {
            self.commands.push(Command::Draw { vertex_count });
        }

        fn draw_indexed(
            &mut self,
            index_count: u32,
            _instance_count: u32,
            _first_index: u32,
            _vertex_offset: i32,
            _first_instance: u32,
        ) {
            self.commands.push(Command::DrawIndexed { index_count });
        }
    }
}

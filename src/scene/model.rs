// Vertex data and GPU meshes

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::io::BufRead;
use std::mem::offset_of;
use std::path::Path;
use std::sync::Arc;
use crate::backend::{Buffer, CommandRecorder, VulkanDevice};

/// Anything that can bind its geometry and issue its own draw
pub trait Drawable {
    fn bind(&self, recorder: &mut dyn CommandRecorder);
    fn draw(&self, recorder: &mut dyn CommandRecorder);
}

/// Interleaved vertex: position, color, normal, uv
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position,
            color,
            normal: Vec3::ZERO,
            uv: Vec2::ZERO,
        }
    }

    pub fn binding_descriptions() -> Vec<vk::VertexInputBindingDescription> {
        vec![vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()]
    }

    pub fn attribute_descriptions() -> Vec<vk::VertexInputAttributeDescription> {
        let attribute = |location: u32, format: vk::Format, offset: usize| {
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(location)
                .format(format)
                .offset(offset as u32)
                .build()
        };

        vec![
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
            attribute(2, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
            attribute(3, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        ]
    }
}

/// CPU-side mesh data, uploaded by [`Model::new`]
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl ModelBuilder {
    /// Unit cube centered on `offset`, one color per face
    pub fn cube(offset: Vec3) -> Self {
        const WHITE: Vec3 = Vec3::new(0.9, 0.9, 0.9);
        const YELLOW: Vec3 = Vec3::new(0.8, 0.8, 0.1);
        const ORANGE: Vec3 = Vec3::new(0.9, 0.6, 0.1);
        const RED: Vec3 = Vec3::new(0.8, 0.1, 0.1);
        const BLUE: Vec3 = Vec3::new(0.1, 0.1, 0.8);
        const GREEN: Vec3 = Vec3::new(0.1, 0.8, 0.1);

        // (normal, color, four corners) for each face
        let faces: [(Vec3, Vec3, [Vec3; 4]); 6] = [
            (Vec3::NEG_X, WHITE, [
                Vec3::new(-0.5, -0.5, -0.5),
                Vec3::new(-0.5, 0.5, 0.5),
                Vec3::new(-0.5, -0.5, 0.5),
                Vec3::new(-0.5, 0.5, -0.5),
            ]),
            (Vec3::X, YELLOW, [
                Vec3::new(0.5, -0.5, -0.5),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(0.5, -0.5, 0.5),
                Vec3::new(0.5, 0.5, -0.5),
            ]),
            (Vec3::NEG_Y, ORANGE, [
                Vec3::new(-0.5, -0.5, -0.5),
                Vec3::new(0.5, -0.5, 0.5),
                Vec3::new(-0.5, -0.5, 0.5),
                Vec3::new(0.5, -0.5, -0.5),
            ]),
            (Vec3::Y, RED, [
                Vec3::new(-0.5, 0.5, -0.5),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(-0.5, 0.5, 0.5),
                Vec3::new(0.5, 0.5, -0.5),
            ]),
            (Vec3::Z, BLUE, [
                Vec3::new(-0.5, -0.5, 0.5),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(-0.5, 0.5, 0.5),
                Vec3::new(0.5, -0.5, 0.5),
            ]),
            (Vec3::NEG_Z, GREEN, [
                Vec3::new(-0.5, -0.5, -0.5),
                Vec3::new(0.5, 0.5, -0.5),
                Vec3::new(-0.5, 0.5, -0.5),
                Vec3::new(0.5, -0.5, -0.5),
            ]),
        ];

        let mut builder = Self::default();
        for (normal, color, corners) in faces {
            let base = builder.vertices.len() as u32;
            for corner in corners {
                builder.vertices.push(Vertex {
                    position: corner + offset,
                    color,
                    normal,
                    uv: Vec2::ZERO,
                });
            }
            builder
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 3, base + 1]);
        }
        builder
    }

    /// Load every mesh of an OBJ file into one indexed vertex list
    pub fn load_obj(path: &Path) -> Result<Self> {
        let (models, _materials) = tobj::load_obj(path, &Self::obj_load_options())
            .with_context(|| format!("Failed to load OBJ file: {:?}", path))?;
        let builder = Self::from_obj_models(&models);
        log::info!(
            "Loaded {:?}: {} vertices, {} indices",
            path,
            builder.vertices.len(),
            builder.indices.len()
        );
        Ok(builder)
    }

    /// Parse OBJ text from a reader; material libraries are ignored
    pub fn from_obj_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (models, _materials) =
            tobj::load_obj_buf(reader, &Self::obj_load_options(), |_| Ok(Default::default()))
                .context("Failed to parse OBJ data")?;
        Ok(Self::from_obj_models(&models))
    }

    fn obj_load_options() -> tobj::LoadOptions {
        tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        }
    }

    fn from_obj_models(models: &[tobj::Model]) -> Self {
        let mut builder = Self::default();

        for model in models {
            let mesh = &model.mesh;
            let base = builder.vertices.len() as u32;
            let vertex_count = mesh.positions.len() / 3;

            for i in 0..vertex_count {
                let position = Vec3::from_slice(&mesh.positions[3 * i..3 * i + 3]);
                let color = mesh
                    .vertex_color
                    .get(3 * i..3 * i + 3)
                    .map_or(Vec3::ONE, Vec3::from_slice);
                let normal = mesh
                    .normals
                    .get(3 * i..3 * i + 3)
                    .map_or(Vec3::ZERO, Vec3::from_slice);
                let uv = mesh
                    .texcoords
                    .get(2 * i..2 * i + 2)
                    .map_or(Vec2::ZERO, Vec2::from_slice);

                builder.vertices.push(Vertex {
                    position,
                    color,
                    normal,
                    uv,
                });
            }

            builder
                .indices
                .extend(mesh.indices.iter().map(|&index| base + index));
        }

        builder
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.len() < 3 {
            anyhow::bail!("A model needs at least 3 vertices, got {}", self.vertices.len());
        }
        let vertex_count = self.vertices.len() as u32;
        if let Some(&bad) = self.indices.iter().find(|&&index| index >= vertex_count) {
            anyhow::bail!("Index {} out of range for {} vertices", bad, vertex_count);
        }
        Ok(())
    }
}

/// Handles and counts needed to record a mesh draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBinding {
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    /// UINT32 index buffer and its index count
    pub index: Option<(vk::Buffer, u32)>,
}

impl Drawable for MeshBinding {
    fn bind(&self, recorder: &mut dyn CommandRecorder) {
        recorder.bind_vertex_buffers(0, &[self.vertex_buffer], &[0]);
        if let Some((index_buffer, _)) = self.index {
            recorder.bind_index_buffer(index_buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn draw(&self, recorder: &mut dyn CommandRecorder) {
        match self.index {
            Some((_, index_count)) => recorder.draw_indexed(index_count, 1, 0, 0, 0),
            None => recorder.draw(self.vertex_count, 1, 0, 0),
        }
    }
}

/// Vertex buffer plus optional index buffer on the GPU
pub struct Model {
    binding: MeshBinding,
    _vertex_buffer: Buffer,
    _index_buffer: Option<Buffer>,
}

impl Model {
    pub fn new(device: Arc<VulkanDevice>, builder: &ModelBuilder) -> Result<Self> {
        builder.validate()?;

        let vertex_buffer = Buffer::with_data(
            device.clone(),
            "model vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &builder.vertices,
        )?;

        let index_buffer = if builder.indices.is_empty() {
            None
        } else {
            Some(Buffer::with_data(
                device,
                "model indices",
                vk::BufferUsageFlags::INDEX_BUFFER,
                &builder.indices,
            )?)
        };

        let binding = MeshBinding {
            vertex_buffer: vertex_buffer.handle(),
            vertex_count: builder.vertices.len() as u32,
            index: index_buffer
                .as_ref()
                .map(|buffer| (buffer.handle(), builder.indices.len() as u32)),
        };

        Ok(Self {
            binding,
            _vertex_buffer: vertex_buffer,
            _index_buffer: index_buffer,
        })
    }

    pub fn load_obj(device: Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        Self::new(device, &ModelBuilder::load_obj(path)?)
    }
}

impl Drawable for Model {
    fn bind(&self, recorder: &mut dyn CommandRecorder) {
        self.binding.bind(recorder);
    }

    fn draw(&self, recorder: &mut dyn CommandRecorder) {
        self.binding.draw(recorder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recorder::mock::{Command, MockRecorder};
    use ash::vk::Handle;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 11 * 4);
        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24, 36]);
        assert_eq!(Vertex::binding_descriptions()[0].stride, 44);
    }

    #[test]
    fn cube_has_six_indexed_faces() {
        let cube = ModelBuilder::cube(Vec3::ZERO);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube.validate().is_ok());
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.abs().max_element() <= 0.5));
    }

    #[test]
    fn cube_offset_moves_every_vertex() {
        let offset = Vec3::new(0.0, 0.0, 2.0);
        let cube = ModelBuilder::cube(offset);
        assert!(cube.vertices.iter().all(|v| (v.position.z - 2.0).abs() <= 0.5));
    }

    #[test]
    fn validation_rejects_tiny_or_broken_meshes() {
        let two = ModelBuilder {
            vertices: vec![Vertex::new(Vec3::ZERO, Vec3::ONE); 2],
            indices: vec![],
        };
        assert!(two.validate().is_err());

        let bad_index = ModelBuilder {
            vertices: vec![Vertex::new(Vec3::ZERO, Vec3::ONE); 3],
            indices: vec![0, 1, 3],
        };
        assert!(bad_index.validate().is_err());
    }

    #[test]
    fn parses_obj_quad_into_two_triangles() {
        let obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
f 1//1 2//1 3//1 4//1
";
        let builder = ModelBuilder::from_obj_reader(&mut std::io::Cursor::new(obj)).unwrap();
        assert_eq!(builder.vertices.len(), 4);
        assert_eq!(builder.indices.len(), 6);
        assert!(builder.validate().is_ok());
        assert!(builder.vertices.iter().all(|v| v.normal == Vec3::Z));
        assert!(builder.vertices.iter().all(|v| v.color == Vec3::ONE));
    }

    #[test]
    fn indexed_mesh_binds_index_buffer_and_draws_indexed() {
        let cube = ModelBuilder::cube(Vec3::ZERO);
        let mesh = MeshBinding {
            vertex_buffer: vk::Buffer::from_raw(1),
            vertex_count: cube.vertices.len() as u32,
            index: Some((vk::Buffer::from_raw(2), cube.indices.len() as u32)),
        };
        let mut recorder = MockRecorder::default();

        mesh.bind(&mut recorder);
        mesh.draw(&mut recorder);

        assert_eq!(
            recorder.commands,
            vec![
                Command::BindVertexBuffers(vec![vk::Buffer::from_raw(1)]),
                Command::BindIndexBuffer(vk::Buffer::from_raw(2)),
                Command::DrawIndexed { index_count: 36 },
            ]
        );
    }

    #[test]
    fn unindexed_mesh_draws_vertices() {
        let mesh = MeshBinding {
            vertex_buffer: vk::Buffer::from_raw(7),
            vertex_count: 3,
            index: None,
        };
        let mut recorder = MockRecorder::default();

        mesh.bind(&mut recorder);
        mesh.draw(&mut recorder);

        assert_eq!(
            recorder.commands,
            vec![
                Command::BindVertexBuffers(vec![vk::Buffer::from_raw(7)]),
                Command::Draw { vertex_count: 3 },
            ]
        );
    }

    #[test]
    fn malformed_obj_is_an_error() {
        let obj = "v 0 0 0\nf a b c\n";
        assert!(ModelBuilder::from_obj_reader(&mut std::io::Cursor::new(obj)).is_err());
    }
}

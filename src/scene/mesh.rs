//! Meshes and drawable primitives

use crate::backend::{InputElement, PrimitiveTopology, VertexFormat};
use crate::pipeline::{CompileError, PipelineId};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::ops::Range;

/// Vertex format shared by every primitive in the merged vertex buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 4],
    pub uv0: [f32; 2],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, tangent: Vec4, uv0: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tangent: tangent.to_array(),
            uv0: uv0.to_array(),
        }
    }

    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    /// POSITION, NORMAL, TANGENT and TEXCOORD_0 in slot 0, append-aligned
    pub fn default_input_layout() -> Vec<InputElement> {
        vec![
            InputElement::per_vertex("POSITION", VertexFormat::Float32x3),
            InputElement::per_vertex("NORMAL", VertexFormat::Float32x3),
            InputElement::per_vertex("TANGENT", VertexFormat::Float32x4),
            InputElement::per_vertex("TEXCOORD", VertexFormat::Float32x2),
        ]
    }

    /// Positions only, for depth-only passes
    pub fn position_input_layout() -> Vec<InputElement> {
        vec![InputElement::per_vertex("POSITION", VertexFormat::Float32x3)]
    }
}

/// Pipeline assignment of a primitive for one pass
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PipelineSlot {
    /// No pipeline has been requested yet
    #[default]
    Pending,
    Ready(PipelineId),
    /// The primitive can't be drawn in this pass
    Rejected(CompileError),
}

impl PipelineSlot {
    pub fn id(&self) -> Option<PipelineId> {
        match self {
            PipelineSlot::Ready(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineSlot::Ready(_))
    }
}

/// The smallest unit of submitted geometry
#[derive(Debug, Clone)]
pub struct Primitive {
    pub name: String,
    pub topology: PrimitiveTopology,
    pub vertices: Vec<Vertex>,
    /// Empty for non-indexed draws
    pub indices: Vec<u32>,
    /// Index into the owning model's materials
    pub material: Option<usize>,
    pub opaque: bool,
    pub pipeline: PipelineSlot,
    pub shadow_pipeline: PipelineSlot,
    /// Vertices of all primitives before this one in the merged buffer
    pub(crate) vertices_before: u32,
    /// Indices of all primitives before this one in the merged buffer
    pub(crate) indices_before: u32,
}

impl Primitive {
    pub fn new(name: &str, vertices: Vec<Vertex>, indices: Vec<u32>, material: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            topology: PrimitiveTopology::TriangleList,
            vertices,
            indices,
            material,
            opaque: true,
            pipeline: PipelineSlot::Pending,
            shadow_pipeline: PipelineSlot::Pending,
            vertices_before: 0,
            indices_before: 0,
        }
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    pub fn vertices_before(&self) -> u32 {
        self.vertices_before
    }

    pub fn indices_before(&self) -> u32 {
        self.indices_before
    }

    /// Range of this primitive's vertices in the merged vertex buffer
    pub fn vertex_range(&self) -> Range<u32> {
        self.vertices_before..self.vertices_before + self.vertex_count()
    }

    /// Range of this primitive's indices in the merged index buffer, if indexed
    pub fn index_range(&self) -> Option<Range<u32>> {
        self.is_indexed()
            .then(|| self.indices_before..self.indices_before + self.index_count())
    }

    /// Unit cube centered at the origin, 24 vertices and 36 indices
    pub fn cube(name: &str, material: Option<usize>) -> Self {
        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, right) in faces {
            let up = normal.cross(right);
            let base = vertices.len() as u32;
            let corners = [
                (-right - up, Vec2::new(0.0, 1.0)),
                (right - up, Vec2::new(1.0, 1.0)),
                (right + up, Vec2::new(1.0, 0.0)),
                (-right + up, Vec2::new(0.0, 0.0)),
            ];
            for (offset, uv) in corners {
                vertices.push(Vertex::new(
                    (normal + offset) * 0.5,
                    normal,
                    right.extend(1.0),
                    uv,
                ));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(name, vertices, indices, material)
    }

    /// Plane on the XZ axis facing up
    pub fn plane(name: &str, width: f32, depth: f32, material: Option<usize>) -> Self {
        let (hw, hd) = (width / 2.0, depth / 2.0);
        let vertices = [
            (Vec3::new(-hw, 0.0, hd), Vec2::new(0.0, 1.0)),
            (Vec3::new(hw, 0.0, hd), Vec2::new(1.0, 1.0)),
            (Vec3::new(hw, 0.0, -hd), Vec2::new(1.0, 0.0)),
            (Vec3::new(-hw, 0.0, -hd), Vec2::new(0.0, 0.0)),
        ]
        .into_iter()
        .map(|(position, uv)| Vertex::new(position, Vec3::Y, Vec4::new(1.0, 0.0, 0.0, 1.0), uv))
        .collect();

        Self::new(name, vertices, vec![0, 1, 2, 0, 2, 3], material)
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub transform: Mat4,
    pub primitives: Vec<Primitive>,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            transform: Mat4::IDENTITY,
            primitives: Vec::new(),
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitives.push(primitive);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::resolve_input_offsets;

    #[test]
    fn test_vertex_matches_input_layout() {
        assert_eq!(Vertex::STRIDE, 48);
        assert_eq!(
            resolve_input_offsets(&Vertex::default_input_layout()),
            vec![0, 12, 24, 40]
        );
    }

    #[test]
    fn test_cube_faces_point_outwards() {
        let cube = Primitive::cube("cube", Some(0));
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);

        for vertex in &cube.vertices {
            let position = Vec3::from_array(vertex.position);
            let normal = Vec3::from_array(vertex.normal);
            assert!((position.dot(normal) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_non_indexed_primitive_has_no_index_range() {
        let mut primitive = Primitive::new("points", vec![Vertex::zeroed(); 3], Vec::new(), None)
            .with_topology(PrimitiveTopology::PointList);
        primitive.vertices_before = 10;

        assert_eq!(primitive.index_range(), None);
        assert_eq!(primitive.vertex_range(), 10..13);
    }
}

//! Chunk identifiers, geometry types and CPU-side geometry payloads

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

use crate::core::types::{Vec2, Vec4};
use crate::math::Aabb;

/// Identifier of a chunk reservation inside the buffer pool.
///
/// Assigned from a monotonically increasing counter starting at 1 and never
/// reused within a process run. GPU records encode "no chunk" as 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChunkId(pub u32);

impl ChunkId {
    /// Value written into GPU records for "no chunk assigned"
    pub const GPU_NONE: u32 = 0;

    /// Decode a GPU record value
    pub fn from_gpu(raw: u32) -> Option<Self> {
        (raw != Self::GPU_NONE).then_some(Self(raw))
    }

    /// Encode an optional chunk for a GPU record
    pub fn to_gpu(id: Option<ChunkId>) -> u32 {
        id.map_or(Self::GPU_NONE, |id| id.0)
    }
}

/// Kind of geometry stored in a segment. Segments never mix types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum GeometryType {
    Points = 0,
    Lines = 1,
    Polygons = 2,
}

impl GeometryType {
    pub const ALL: [GeometryType; 3] = [Self::Points, Self::Lines, Self::Polygons];

    /// Numeric tag shared with GPU records
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Parse a tag; unknown tags yield `None`
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Points),
            1 => Some(Self::Lines),
            2 => Some(Self::Polygons),
            _ => None,
        }
    }

    /// Primitive topology used when drawing this type
    pub fn topology(self) -> wgpu::PrimitiveTopology {
        match self {
            Self::Points => wgpu::PrimitiveTopology::PointList,
            Self::Lines => wgpu::PrimitiveTopology::LineList,
            Self::Polygons => wgpu::PrimitiveTopology::TriangleList,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Lines => "lines",
            Self::Polygons => "polygons",
        }
    }
}

/// Vertex stored in segment vertex buffers (28 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn new(position: Vec2, color: Vec4) -> Self {
        Self {
            position: [position.x, position.y, 0.0],
            color: color.to_array(),
        }
    }

    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x4];

    /// Vertex buffer layout for render pipelines drawing pool segments
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// CPU-side geometry waiting to be uploaded into the pool.
///
/// Indices are local to this builder; the pool rebases them through the
/// draw command's base vertex.
#[derive(Clone, Debug)]
pub struct GeometryBuilder {
    pub geometry_type: GeometryType,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub bounds: Aabb,
}

impl GeometryBuilder {
    pub fn new(geometry_type: GeometryType) -> Self {
        Self {
            geometry_type,
            vertices: Vec::new(),
            indices: Vec::new(),
            bounds: Aabb::EMPTY,
        }
    }

    /// Push a vertex and return its local index
    pub fn push_vertex(&mut self, position: Vec2, color: Vec4) -> u32 {
        let index = self.vertices.len() as u32;
        self.vertices.push(Vertex::new(position, color));
        self.bounds.expand(position);
        index
    }

    pub fn add_point(&mut self, position: Vec2, color: Vec4) {
        let i = self.push_vertex(position, color);
        self.indices.push(i);
    }

    pub fn add_line(&mut self, a: Vec2, b: Vec2, color: Vec4) {
        let ia = self.push_vertex(a, color);
        let ib = self.push_vertex(b, color);
        self.indices.extend_from_slice(&[ia, ib]);
    }

    /// Connected line strip emitted as a line list
    pub fn add_polyline(&mut self, points: &[Vec2], color: Vec4) {
        if points.len() < 2 {
            return;
        }
        let first = self.vertices.len() as u32;
        for &p in points {
            self.push_vertex(p, color);
        }
        for i in 0..points.len() as u32 - 1 {
            self.indices.extend_from_slice(&[first + i, first + i + 1]);
        }
    }

    /// Convex ring triangulated as a fan around its first vertex
    pub fn add_polygon(&mut self, ring: &[Vec2], color: Vec4) {
        if ring.len() < 3 {
            return;
        }
        let first = self.vertices.len() as u32;
        for &p in ring {
            self.push_vertex(p, color);
        }
        for i in 1..ring.len() as u32 - 1 {
            self.indices.extend_from_slice(&[first, first + i, first + i + 1]);
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// A fixed-size reservation inside exactly one segment
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Chunk {
    pub geometry_type: GeometryType,
    pub segment_index: usize,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub bounds: Aabb,
    /// Set once the staging copy has been submitted
    pub is_loaded: bool,
}

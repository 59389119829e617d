//! Device-free chunk and segment bookkeeping
//!
//! The ledger decides where each chunk lands and keeps every lookup the
//! buffer pool answers. The pool wraps it with the actual device buffers:
//! it asks for a [`Placement`], creates a segment when the placement says so,
//! copies the data and only then commits the placement. A failed device
//! step therefore never leaves a half-registered chunk behind.

use std::collections::HashMap;

use serde::Serialize;

use super::chunk::{Chunk, ChunkId, GeometryBuilder, GeometryType};
use crate::math::Aabb;

/// Fill level of one segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SegmentUsage {
    pub used_vertices: u32,
    pub vertex_capacity: u32,
    pub used_indices: u32,
    pub index_capacity: u32,
}

impl SegmentUsage {
    fn fits(&self, vertices: u32, indices: u32) -> bool {
        self.vertex_capacity - self.used_vertices >= vertices
            && self.index_capacity - self.used_indices >= indices
    }
}

#[derive(Debug)]
struct SegmentRecord {
    usage: SegmentUsage,
    chunks: Vec<ChunkId>,
}

/// Where a new chunk goes
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub geometry_type: GeometryType,
    pub segment_index: usize,
    /// `Some((vertex_capacity, index_capacity))` when a segment must be created first
    pub new_segment: Option<(u32, u32)>,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    pub bounds: Aabb,
}

/// Chunk and segment records for every geometry type
#[derive(Debug)]
pub struct ChunkLedger {
    vertex_capacity: u32,
    index_capacity: u32,
    segments: HashMap<GeometryType, Vec<SegmentRecord>>,
    chunks: HashMap<ChunkId, Chunk>,
    next_id: u32,
}

impl ChunkLedger {
    /// Create an empty ledger. New segments get at least these capacities.
    pub fn new(vertex_capacity: u32, index_capacity: u32) -> Self {
        Self {
            vertex_capacity,
            index_capacity,
            segments: HashMap::new(),
            chunks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Decide where `builder` would be stored. `None` for empty geometry.
    ///
    /// Only the type's last segment is considered; once it cannot hold the
    /// geometry a new one is requested, sized to fit oversized payloads.
    pub fn plan(&self, builder: &GeometryBuilder) -> Option<Placement> {
        if builder.is_empty() {
            return None;
        }
        let ty = builder.geometry_type;
        let vertex_count = builder.vertex_count();
        let index_count = builder.index_count();

        let segments = self.segments.get(&ty).map(Vec::as_slice).unwrap_or(&[]);
        let active = segments
            .last()
            .map(|s| s.usage)
            .filter(|usage| usage.fits(vertex_count, index_count));

        let placement = match active {
            Some(usage) => Placement {
                geometry_type: ty,
                segment_index: segments.len() - 1,
                new_segment: None,
                vertex_offset: usage.used_vertices,
                vertex_count,
                index_offset: usage.used_indices,
                index_count,
                bounds: builder.bounds,
            },
            None => Placement {
                geometry_type: ty,
                segment_index: segments.len(),
                new_segment: Some((
                    self.vertex_capacity.max(vertex_count),
                    self.index_capacity.max(index_count),
                )),
                vertex_offset: 0,
                vertex_count,
                index_offset: 0,
                index_count,
                bounds: builder.bounds,
            },
        };
        Some(placement)
    }

    /// Register a freshly created segment and return its index
    pub fn push_segment(&mut self, ty: GeometryType, vertex_capacity: u32, index_capacity: u32) -> usize {
        let segments = self.segments.entry(ty).or_default();
        segments.push(SegmentRecord {
            usage: SegmentUsage {
                used_vertices: 0,
                vertex_capacity,
                used_indices: 0,
                index_capacity,
            },
            chunks: Vec::new(),
        });
        segments.len() - 1
    }

    /// Record a placed chunk, advance its segment's counters and hand out the id.
    ///
    /// The placement's segment must exist (pushed via [`Self::push_segment`]).
    pub fn commit(&mut self, placement: &Placement) -> Option<ChunkId> {
        let record = self
            .segments
            .get_mut(&placement.geometry_type)?
            .get_mut(placement.segment_index)?;
        let usage = &mut record.usage;
        if usage.used_vertices != placement.vertex_offset
            || usage.used_indices != placement.index_offset
            || !usage.fits(placement.vertex_count, placement.index_count)
        {
            return None;
        }
        usage.used_vertices += placement.vertex_count;
        usage.used_indices += placement.index_count;

        let id = ChunkId(self.next_id);
        self.next_id += 1;
        record.chunks.push(id);

        self.chunks.insert(
            id,
            Chunk {
                geometry_type: placement.geometry_type,
                segment_index: placement.segment_index,
                vertex_offset: placement.vertex_offset,
                vertex_count: placement.vertex_count,
                index_offset: placement.index_offset,
                index_count: placement.index_count,
                bounds: placement.bounds,
                is_loaded: true,
            },
        );
        Some(id)
    }

    pub fn get_chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    pub fn chunk_type(&self, id: ChunkId) -> Option<GeometryType> {
        self.chunks.get(&id).map(|c| c.geometry_type)
    }

    pub fn chunk_segment_index(&self, id: ChunkId) -> Option<usize> {
        self.chunks.get(&id).map(|c| c.segment_index)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn segment_count(&self, ty: GeometryType) -> usize {
        self.segments.get(&ty).map_or(0, Vec::len)
    }

    pub fn segment_usage(&self, ty: GeometryType) -> Vec<SegmentUsage> {
        self.segments
            .get(&ty)
            .map(|segments| segments.iter().map(|s| s.usage).collect())
            .unwrap_or_default()
    }

    /// Chunks of one type in allocation order
    pub fn chunk_ids_for_type(&self, ty: GeometryType) -> Vec<ChunkId> {
        self.segments
            .get(&ty)
            .map(|segments| segments.iter().flat_map(|s| s.chunks.iter().copied()).collect())
            .unwrap_or_default()
    }

    /// Chunks of `ty` whose bounds overlap the camera's ground rectangle
    pub fn visible_chunks(&self, view: &Aabb, ty: GeometryType) -> Vec<ChunkId> {
        let Some(segments) = self.segments.get(&ty) else {
            return Vec::new();
        };
        segments
            .iter()
            .flat_map(|s| s.chunks.iter())
            .filter(|id| {
                self.chunks
                    .get(id)
                    .is_some_and(|chunk| chunk.bounds.overlaps(view))
            })
            .copied()
            .collect()
    }
}

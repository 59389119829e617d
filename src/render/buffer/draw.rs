//! Indirect draw records and per-segment draw batches

use std::collections::{BTreeMap, HashSet};

use bytemuck::{Pod, Zeroable};

use super::chunk::{Chunk, ChunkId, GeometryType};
use super::ledger::ChunkLedger;

/// Indexed indirect draw arguments, laid out as the device reads them (20 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedIndirect {
    /// One instance of a whole chunk
    pub fn for_chunk(chunk: &Chunk) -> Self {
        Self {
            index_count: chunk.index_count,
            instance_count: 1,
            first_index: chunk.index_offset,
            base_vertex: chunk.vertex_offset as i32,
            first_instance: 0,
        }
    }
}

/// Visible chunks resolved into `(type, segment) -> commands`
#[derive(Clone, Debug, Default)]
pub struct DrawBatch {
    commands: BTreeMap<(GeometryType, usize), Vec<DrawIndexedIndirect>>,
}

impl DrawBatch {
    /// Resolve chunk ids against the ledger.
    ///
    /// Unknown ids are skipped and duplicates are drawn once; commands keep
    /// the order in which their ids first appear.
    pub fn resolve(ledger: &ChunkLedger, ids: &[ChunkId]) -> Self {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut commands: BTreeMap<(GeometryType, usize), Vec<DrawIndexedIndirect>> = BTreeMap::new();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            let Some(chunk) = ledger.get_chunk(id) else {
                continue;
            };
            commands
                .entry((chunk.geometry_type, chunk.segment_index))
                .or_default()
                .push(DrawIndexedIndirect::for_chunk(chunk));
        }

        Self { commands }
    }

    /// Resolve `(chunk, instance slot)` pairs against the ledger.
    ///
    /// Every pair becomes its own command with `first_instance` set to the
    /// slot, so one chunk shared by several objects is drawn once per object.
    /// Unknown ids are skipped.
    pub fn resolve_instances(ledger: &ChunkLedger, draws: &[(ChunkId, u32)]) -> Self {
        let mut commands: BTreeMap<(GeometryType, usize), Vec<DrawIndexedIndirect>> = BTreeMap::new();

        for &(id, slot) in draws {
            let Some(chunk) = ledger.get_chunk(id) else {
                continue;
            };
            commands
                .entry((chunk.geometry_type, chunk.segment_index))
                .or_default()
                .push(DrawIndexedIndirect {
                    first_instance: slot,
                    ..DrawIndexedIndirect::for_chunk(chunk)
                });
        }

        Self { commands }
    }

    pub fn commands(&self, ty: GeometryType, segment: usize) -> &[DrawIndexedIndirect] {
        self.commands
            .get(&(ty, segment))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = ((GeometryType, usize), &[DrawIndexedIndirect])> {
        self.commands.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Total number of draw commands
    pub fn len(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

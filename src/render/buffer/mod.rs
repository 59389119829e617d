//! Chunked geometry storage on the device

pub mod chunk;
pub mod ledger;
pub mod segment;
pub mod pool;
pub mod draw;

pub use chunk::{Chunk, ChunkId, GeometryBuilder, GeometryType, Vertex};
pub use ledger::{ChunkLedger, Placement, SegmentUsage};
pub use segment::{DrawMode, Segment};
pub use pool::{BufferPool, PoolStatistics, SegmentEvent};
pub use draw::{DrawBatch, DrawIndexedIndirect};

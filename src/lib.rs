//! Strata - chunked geometry store, spatial index and GPU frustum culling
//! for large 2-D datasets

pub mod core;
pub mod math;
pub mod scene;
pub mod spatial;
pub mod render;
pub mod streaming;

pub use crate::core::{Camera, CameraView, Error, Result, StoreConfig};
pub use crate::math::Aabb;
pub use crate::render::buffer::{BufferPool, ChunkId, GeometryBuilder, GeometryType};
pub use crate::render::culling::GpuFrustumCuller;
pub use crate::render::RenderManager;
pub use crate::scene::{ObjectCollection, ObjectId};
pub use crate::spatial::SpatialIndex;

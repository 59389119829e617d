//! Device-side geometry storage, culling and drawing

pub mod context;
pub mod buffer;
pub mod culling;
pub mod pipeline;
pub mod manager;

pub use manager::{FrameStatistics, RenderManager};

//! Render pipelines

pub mod geometry;

pub use geometry::{GeometryPipeline, InstanceData, ViewUniform};

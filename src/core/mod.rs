//! Core types: errors, logging, camera, configuration

pub mod types;
pub mod error;
pub mod logging;
pub mod camera;
pub mod config;

pub use types::*;
pub use error::Error;
pub use camera::{Camera, CameraView, Projection};
pub use config::{StoreConfig, BufferPoolConfig, SpatialIndexConfig, CullerConfig};

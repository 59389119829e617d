//! Error types for the geometry store

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("Culler not initialized: missing {0}")]
    NotInitialized(&'static str),

    #[error("Buffer map failed: {0}")]
    BufferMap(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

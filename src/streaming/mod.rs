//! Background ingestion of geometry into the buffer pool

pub mod uploader;

pub use uploader::{GeometryUploader, UploadRequest, UploadResult};

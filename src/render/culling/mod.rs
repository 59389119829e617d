//! GPU frustum culling

pub mod gpu_data;
pub mod culler;

pub use gpu_data::{near_far_from_projection, CameraGpuData, CullParams, ObjectGpuData};
pub use culler::{GpuFrustumCuller, VisibleObject};

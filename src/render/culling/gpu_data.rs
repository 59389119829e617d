//! Device-mirror records read by the culling shader
//!
//! Layouts must match the structs in `frustum_cull.wgsl` byte for byte.

use bytemuck::{Pod, Zeroable};

use crate::core::types::Mat4;
use crate::core::CameraView;
use crate::math::Aabb;
use crate::render::buffer::{ChunkId, GeometryType};
use crate::scene::Object;

/// Per-object culling input (96 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ObjectGpuData {
    /// Model to world transform (64 bytes, offset 0)
    pub transform: [[f32; 4]; 4],
    /// World-space bounds min (8 bytes, offset 64)
    pub bounds_min: [f32; 2],
    /// World-space bounds max (8 bytes, offset 72)
    pub bounds_max: [f32; 2],
    /// Chunk id, 0 when unassigned (offset 80)
    pub chunk_id: u32,
    /// `GeometryType` tag (offset 84)
    pub model_type: u32,
    /// Pad to the struct's 16-byte alignment (offset 88)
    pub _pad: [u32; 2],
}

impl ObjectGpuData {
    pub fn new(transform: Mat4, bounds: Aabb, chunk: Option<ChunkId>, model_type: GeometryType) -> Self {
        Self {
            transform: transform.to_cols_array_2d(),
            bounds_min: bounds.min.to_array(),
            bounds_max: bounds.max.to_array(),
            chunk_id: ChunkId::to_gpu(chunk),
            model_type: model_type.tag(),
            _pad: [0; 2],
        }
    }

    pub fn from_object(object: &Object) -> Self {
        Self::new(
            object.transform(),
            object.world_bounds(),
            object.chunk(),
            object.model().geometry_type(),
        )
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.bounds_min.into(), self.bounds_max.into())
    }
}

/// Camera uniform for the culling pass (256 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CameraGpuData {
    /// View matrix (64 bytes, offset 0)
    pub view: [[f32; 4]; 4],
    /// Projection matrix (64 bytes, offset 64)
    pub projection: [[f32; 4]; 4],
    /// Normalized frustum planes, xyz normal + w distance (96 bytes, offset 128)
    pub planes: [[f32; 4]; 6],
    /// Camera world position, w unused (16 bytes, offset 224)
    pub position: [f32; 4],
    /// Near clip distance (offset 240)
    pub near: f32,
    /// Far clip distance (offset 244)
    pub far: f32,
    /// Pad to 256 bytes (offset 248)
    pub _pad: [f32; 2],
}

impl CameraGpuData {
    /// Build from a camera view.
    ///
    /// Planes come from the combined view-projection, the position from the
    /// inverse view matrix, near/far from the projection matrix itself.
    pub fn from_view(camera: &impl CameraView) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        let position = view.inverse().w_axis;
        let (near, far) = near_far_from_projection(&projection);

        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            planes: camera.frustum().to_gpu_planes(),
            position: [position.x, position.y, position.z, 1.0],
            near,
            far,
            _pad: [0.0; 2],
        }
    }
}

/// Recover near/far clip distances from a right-handed, 0..1 depth projection.
///
/// Perspective matrices carry -1 in row 3 of the z column; orthographic
/// matrices carry 0 there.
pub fn near_far_from_projection(projection: &Mat4) -> (f32, f32) {
    let a = projection.z_axis.z;
    let b = projection.w_axis.z;
    if projection.z_axis.w != 0.0 {
        (b / a, b / (a + 1.0))
    } else {
        (b / a, (b - 1.0) / a)
    }
}

/// Uniform parameters of one dispatch (16 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CullParams {
    pub object_count: u32,
    pub _pad: [u32; 3],
}

impl CullParams {
    pub fn new(object_count: u32) -> Self {
        Self {
            object_count,
            _pad: [0; 3],
        }
    }
}

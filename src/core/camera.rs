//! Camera and the read-only view the geometry store consumes

use crate::core::types::{Mat4, Quat, Vec2, Vec3, Vec4};
use crate::math::{Aabb, Frustum};

/// Projection model of a camera
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Vertical field of view in radians and aspect ratio (width / height)
    Perspective { fov_y: f32, aspect: f32 },
    /// Half extents of the view volume in view-space units
    Orthographic { half_width: f32, half_height: f32 },
}

/// Read-only camera state consumed by the spatial index, buffer pool and culler.
///
/// Implemented by [`Camera`]; callers with their own camera controller can
/// implement it directly.
pub trait CameraView {
    /// Projection matrix (view to clip space, wgpu depth range)
    fn projection_matrix(&self) -> Mat4;

    /// View matrix (world to view space)
    fn view_matrix(&self) -> Mat4;

    /// Far clip distance
    fn far_plane(&self) -> f32;

    /// Camera position in world space
    fn position(&self) -> Vec3;

    /// Combined view-projection matrix
    fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// 6-plane view frustum
    fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }

    /// Rectangle where the view volume meets the z = 0 ground plane.
    ///
    /// Each corner ray is unprojected from the near to the far plane and
    /// intersected with z = 0; rays that never cross the plane contribute
    /// their far-plane point instead.
    fn frustum_2d(&self) -> Aabb {
        let inv = self.view_projection().inverse();
        let unproject = |x: f32, y: f32, z: f32| {
            let p = inv * Vec4::new(x, y, z, 1.0);
            p.truncate() / p.w
        };

        let mut rect = Aabb::EMPTY;
        for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
            let near = unproject(x, y, 0.0);
            let far = unproject(x, y, 1.0);
            let crosses = (near.z >= 0.0) != (far.z >= 0.0) || near.z == 0.0;
            let hit = if crosses && near.z != far.z {
                let t = near.z / (near.z - far.z);
                near + (far - near) * t
            } else {
                far
            };
            rect.expand(hit.truncate());
        }
        rect
    }
}

/// Camera with position, rotation, and projection parameters
#[derive(Clone, Debug)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Projection model
    pub projection: Projection,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create a new perspective camera looking down -Z
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            projection: Projection::Perspective {
                fov_y: fov_y_degrees.to_radians(),
                aspect,
            },
            near: 0.1,
            far: 1000.0,
        }
    }

    /// Orthographic map camera hovering at `height` above `center`,
    /// seeing exactly `center ± half_extent` on the ground plane.
    pub fn top_down(center: Vec2, half_extent: Vec2, height: f32, far: f32) -> Self {
        Self {
            position: center.extend(height),
            rotation: Quat::IDENTITY,
            projection: Projection::Orthographic {
                half_width: half_extent.x,
                half_height: half_extent.y,
            },
            near: 0.1,
            far,
        }
    }

    /// Create perspective camera looking at a target
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let forward = (target - position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);

        let rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));

        Self {
            position,
            rotation,
            projection: Projection::Perspective {
                fov_y: 60.0_f32.to_radians(),
                aspect: 16.0 / 9.0,
            },
            near: 0.1,
            far: 1000.0,
        }
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Update aspect ratio (call on window resize)
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        match &mut self.projection {
            Projection::Perspective { aspect, .. } => *aspect = width / height,
            Projection::Orthographic { half_width, half_height } => {
                *half_width = *half_height * width / height;
            }
        }
    }
}

impl CameraView for Camera {
    fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y, aspect } => {
                Mat4::perspective_rh(fov_y, aspect, self.near, self.far)
            }
            Projection::Orthographic { half_width, half_height } => Mat4::orthographic_rh(
                -half_width,
                half_width,
                -half_height,
                half_height,
                self.near,
                self.far,
            ),
        }
    }

    fn view_matrix(&self) -> Mat4 {
        let rotation_matrix = Mat4::from_quat(self.rotation.conjugate());
        let translation_matrix = Mat4::from_translation(-self.position);
        rotation_matrix * translation_matrix
    }

    fn far_plane(&self) -> f32 {
        self.far
    }

    fn position(&self) -> Vec3 {
        self.position
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

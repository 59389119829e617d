//! View frustum for culling

use crate::core::types::{Mat4, Vec3, Vec4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Packed as `xyz = normal, w = distance` for GPU upload
    pub fn to_array(&self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.distance]
    }
}

/// View frustum with 6 planes (Left, Right, Bottom, Top, Near, Far)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract frustum planes from view-projection matrix (Gribb/Hartmann).
    ///
    /// Clip space is wgpu's: `-w <= x, y <= w` and `0 <= z <= w`, so the
    /// near plane is row 2 on its own.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let raw = [
            rows[3] + rows[0], // left
            rows[3] - rows[0], // right
            rows[3] + rows[1], // bottom
            rows[3] - rows[1], // top
            rows[2],           // near
            rows[3] - rows[2], // far
        ];

        let mut planes = [Plane::new(Vec3::ZERO, 0.0); 6];
        for (plane, r) in planes.iter_mut().zip(raw.iter()) {
            *plane = Self::normalize_plane(*r);
        }

        Self { planes }
    }

    fn normalize_plane(plane: Vec4) -> Plane {
        let normal = plane.truncate();
        let len = normal.length();
        if len > 0.0 {
            Plane {
                normal: normal / len,
                distance: plane.w / len,
            }
        } else {
            Plane { normal, distance: plane.w }
        }
    }

    /// Planes packed for the culling shader
    pub fn to_gpu_planes(&self) -> [[f32; 4]; 6] {
        self.planes.map(|p| p.to_array())
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Check if a 3-D box intersects the frustum (conservative test)
    pub fn intersects_box(&self, min: Vec3, max: Vec3) -> bool {
        for plane in &self.planes {
            // Find the corner most aligned with plane normal (p-vertex)
            let p = Vec3::new(
                if plane.normal.x >= 0.0 { max.x } else { min.x },
                if plane.normal.y >= 0.0 { max.y } else { min.y },
                if plane.normal.z >= 0.0 { max.z } else { min.z },
            );

            // If p-vertex is outside, the box is completely outside
            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }

    /// Check if a 2-D box lying on the z = 0 ground plane intersects the frustum.
    ///
    /// Same test the culling shader runs per object.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.intersects_box(aabb.min.extend(0.0), aabb.max.extend(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top_down(center: Vec3, half: f32) -> Frustum {
        let proj = Mat4::orthographic_rh(-half, half, -half, half, 0.1, 100.0);
        let view = Mat4::look_at_rh(center, Vec3::new(center.x, center.y, 0.0), Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_plane_distance() {
        let plane = Plane::new(Vec3::Y, 0.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, 5.0, 0.0)), 5.0);
        assert_eq!(plane.distance_to_point(Vec3::new(0.0, -3.0, 0.0)), -3.0);
    }

    #[test]
    fn test_planes_are_normalized() {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&proj);
        for plane in &frustum.planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_perspective_near_and_far() {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&proj);

        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, 5.0)), "behind camera");
        assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -150.0)), "beyond far plane");
        assert!(!frustum.contains_point(Vec3::new(-1000.0, 0.0, -10.0)), "far left");
    }

    #[test]
    fn test_top_down_ground_rectangles() {
        let frustum = top_down(Vec3::new(0.0, 0.0, 10.0), 5.0);

        assert!(frustum.intersects_aabb(&Aabb::from_coords(-1.0, -1.0, 1.0, 1.0)));
        assert!(frustum.intersects_aabb(&Aabb::from_coords(4.0, 4.0, 8.0, 8.0)), "partially inside");
        assert!(!frustum.intersects_aabb(&Aabb::from_coords(6.0, 6.0, 8.0, 8.0)));
        assert!(!frustum.intersects_aabb(&Aabb::from_coords(-20.0, -1.0, -10.0, 1.0)));
    }

    #[test]
    fn test_gpu_planes_layout() {
        let frustum = top_down(Vec3::new(0.0, 0.0, 10.0), 5.0);
        let packed = frustum.to_gpu_planes();
        for (plane, array) in frustum.planes.iter().zip(packed.iter()) {
            assert_eq!(plane.normal.x, array[0]);
            assert_eq!(plane.distance, array[3]);
        }
    }
}

//! Distance-based level of detail
//!
//! Distance from the camera to an object's ground-plane centre, divided by
//! the far plane, picks one of four tiers. Precision only ever drops as the
//! normalized distance grows.

use serde::Serialize;

use crate::core::CameraView;
use crate::math::Aabb;

/// Default normalized distance thresholds for High / Medium / Low
pub const LOD_THRESHOLDS: [f32; 3] = [0.3, 0.6, 0.9];

/// Detail tier. Ordered by precision: `High > Medium > Low > Culled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LodLevel {
    Culled,
    Low,
    Medium,
    High,
}

impl LodLevel {
    /// 0 for High up to 3 for Culled
    pub fn index(self) -> u32 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
            Self::Culled => 3,
        }
    }
}

/// Tier for a normalized distance (`distance / far`)
pub fn lod_from_normalized_distance(normalized: f32, thresholds: &[f32; 3]) -> LodLevel {
    if normalized < thresholds[0] {
        LodLevel::High
    } else if normalized < thresholds[1] {
        LodLevel::Medium
    } else if normalized < thresholds[2] {
        LodLevel::Low
    } else {
        LodLevel::Culled
    }
}

/// Distance from the camera to the centre of `bounds` on the z = 0 plane
pub fn distance_to_bounds(camera: &impl CameraView, bounds: &Aabb) -> f32 {
    camera.position().distance(bounds.center().extend(0.0))
}

/// LOD tier of `bounds` as seen from `camera`
pub fn calculate_lod(camera: &impl CameraView, bounds: &Aabb, thresholds: &[f32; 3]) -> LodLevel {
    let far = camera.far_plane();
    if far <= 0.0 {
        return LodLevel::Culled;
    }
    lod_from_normalized_distance(distance_to_bounds(camera, bounds) / far, thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Vec2, Vec3};
    use crate::core::Camera;

    #[test]
    fn test_thresholds() {
        assert_eq!(lod_from_normalized_distance(0.0, &LOD_THRESHOLDS), LodLevel::High);
        assert_eq!(lod_from_normalized_distance(0.3, &LOD_THRESHOLDS), LodLevel::Medium);
        assert_eq!(lod_from_normalized_distance(0.75, &LOD_THRESHOLDS), LodLevel::Low);
        assert_eq!(lod_from_normalized_distance(0.9, &LOD_THRESHOLDS), LodLevel::Culled);
        assert_eq!(lod_from_normalized_distance(5.0, &LOD_THRESHOLDS), LodLevel::Culled);
    }

    #[test]
    fn test_monotonic_in_distance() {
        let mut previous = LodLevel::High;
        for step in 0..=200 {
            let lod = lod_from_normalized_distance(step as f32 * 0.01, &LOD_THRESHOLDS);
            assert!(lod <= previous, "precision increased at step {}", step);
            previous = lod;
        }
    }

    #[test]
    fn test_precision_order() {
        assert!(LodLevel::High > LodLevel::Medium);
        assert!(LodLevel::Medium > LodLevel::Low);
        assert!(LodLevel::Low > LodLevel::Culled);
        assert_eq!(LodLevel::High.index(), 0);
        assert_eq!(LodLevel::Culled.index(), 3);
    }

    #[test]
    fn test_camera_distance() {
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 30.0), 60.0, 1.0);
        camera.far = 100.0;

        let near_box = Aabb::from_center_half_extent(Vec2::ZERO, Vec2::splat(1.0));
        let far_box = Aabb::from_center_half_extent(Vec2::new(95.0, 0.0), Vec2::splat(1.0));

        assert_eq!(distance_to_bounds(&camera, &near_box), 30.0);
        assert_eq!(calculate_lod(&camera, &near_box, &LOD_THRESHOLDS), LodLevel::Medium);
        assert_eq!(calculate_lod(&camera, &far_box, &LOD_THRESHOLDS), LodLevel::Culled);
    }
}

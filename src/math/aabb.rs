//! Axis-aligned bounding rectangle

use serde::{Deserialize, Serialize};

use crate::core::types::{Mat4, Vec2, Vec3};

/// 2-D axis-aligned bounding box defined by min and max corners
///
/// Used for object bounds, chunk bounds, quad-tree node bounds and grid
/// cells. `overlaps` is inclusive: boxes that share an edge overlap.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// Inverted box; expanding it by any point yields that point.
    pub const EMPTY: Aabb = Aabb {
        min: Vec2::splat(f32::INFINITY),
        max: Vec2::splat(f32::NEG_INFINITY),
    };

    /// Create AABB from min and max corners
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Create AABB from raw coordinates
    pub fn from_coords(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min: Vec2::new(min_x, min_y),
            max: Vec2::new(max_x, max_y),
        }
    }

    /// Create AABB from center and half-extents
    pub fn from_center_half_extent(center: Vec2, half_extent: Vec2) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    /// Smallest box containing all points, `EMPTY` for no points
    pub fn from_points<I: IntoIterator<Item = Vec2>>(points: I) -> Self {
        let mut aabb = Self::EMPTY;
        for p in points {
            aabb.expand(p);
        }
        aabb
    }

    /// True once `min <= max` on both axes
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Get center point
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    /// Area of the box, zero for invalid boxes
    pub fn area(&self) -> f32 {
        if self.is_valid() {
            let s = self.size();
            s.x * s.y
        } else {
            0.0
        }
    }

    /// Check if point is inside AABB (inclusive)
    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y
    }

    /// Check if `other` lies entirely inside this box (inclusive)
    pub fn contains(&self, other: &Aabb) -> bool {
        other.min.x >= self.min.x && other.max.x <= self.max.x &&
        other.min.y >= self.min.y && other.max.y <= self.max.y
    }

    /// Check if two AABBs overlap (inclusive)
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec2) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return merged AABB containing both
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Get child quadrant for quad-tree subdivision, split at the midpoint.
    /// index: bit 0 = +x half, bit 1 = +y half
    pub fn quadrant(&self, index: usize) -> Aabb {
        let center = self.center();
        let min = Vec2::new(
            if index & 1 != 0 { center.x } else { self.min.x },
            if index & 2 != 0 { center.y } else { self.min.y },
        );
        let max = Vec2::new(
            if index & 1 != 0 { self.max.x } else { center.x },
            if index & 2 != 0 { self.max.y } else { center.y },
        );
        Aabb { min, max }
    }

    /// Bounds of this box after transforming its corners (at z = 0) by `m`
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        if !self.is_valid() {
            return *self;
        }
        let corners = [
            Vec2::new(self.min.x, self.min.y),
            Vec2::new(self.max.x, self.min.y),
            Vec2::new(self.min.x, self.max.y),
            Vec2::new(self.max.x, self.max.y),
        ];
        Aabb::from_points(
            corners
                .iter()
                .map(|c| m.transform_point3(Vec3::new(c.x, c.y, 0.0)).truncate()),
        )
    }

    /// Bit pattern of the four coordinates, usable as an exact hash key
    pub fn to_bits(&self) -> [u32; 4] {
        [
            self.min.x.to_bits(),
            self.min.y.to_bits(),
            self.max.x.to_bits(),
            self.max.y.to_bits(),
        ]
    }
}

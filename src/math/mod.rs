//! Mathematical utilities: bounding rectangles and view frusta

pub mod aabb;
pub mod frustum;

pub use aabb::Aabb;
pub use frustum::{Plane, Frustum};

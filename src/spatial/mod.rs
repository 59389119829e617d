//! Spatial index: quad-tree, uniform grid and LOD classification

pub mod lod;
pub mod quadtree;
pub mod grid;
pub mod index;

pub use lod::{calculate_lod, LodLevel, LOD_THRESHOLDS};
pub use quadtree::{QuadTreeNode, TreeParams, TreeShape};
pub use grid::{CellCoord, SpatialCell, UniformGrid};
pub use index::{IndexStatistics, SpatialGroup, SpatialIndex};

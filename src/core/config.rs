//! Store configuration.
//!
//! Segment capacities, split/merge thresholds, cache sizes and the culling
//! work-group size live here instead of as literals, so callers can tune
//! them per dataset. Defaults reproduce the tuned values of the renderer.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::Vec2;
use crate::math::Aabb;
use crate::spatial::lod::LOD_THRESHOLDS;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Full configuration of the geometry store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub buffer_pool: BufferPoolConfig,
    pub spatial_index: SpatialIndexConfig,
    pub culler: CullerConfig,
}

impl StoreConfig {
    /// Save to file as pretty JSON (sync)
    pub fn save_sync(&self, path: &Path) -> Result<(), io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)
    }

    /// Load from a JSON file (sync). Missing fields take their defaults.
    pub fn load_sync(path: &Path) -> crate::core::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| crate::core::Error::Config(format!("{}: {}", path.display(), e)))
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Buffer pool segment sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Vertices per segment vertex buffer
    pub vertex_capacity: u32,
    /// Indices per segment index buffer
    pub index_capacity: u32,
    /// Draw commands a fresh segment can hold before growing
    pub initial_draw_commands: u32,
    /// Growth factor applied when the draw-command buffer is too small
    pub draw_command_growth: f32,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            vertex_capacity: 4 * 1024 * 1024,
            index_capacity: 12 * 1024 * 1024,
            initial_draw_commands: 1024,
            draw_command_growth: 1.5,
        }
    }
}

/// Quad-tree, uniform grid, query cache and LOD tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialIndexConfig {
    /// Bounds of the root node and the uniform grid
    pub world_bounds: Aabb,
    /// A leaf splits once it holds more objects than this
    pub max_objects_per_node: usize,
    /// Leaves never split below this count; children merge below it
    pub min_objects_for_split: usize,
    /// Node levels are always below this
    pub max_depth: u32,
    /// Frames a cached query result stays reusable
    pub query_cache_frames: u64,
    /// Whole-query results kept at the root (FIFO)
    pub root_cache_capacity: usize,
    /// Edge length of a uniform grid cell
    pub grid_cell_size: f32,
    /// Distance band width used when grouping objects for batching
    pub group_distance_bucket: f32,
    /// Normalized distance thresholds for High / Medium / Low detail
    pub lod_thresholds: [f32; 3],
}

impl Default for SpatialIndexConfig {
    fn default() -> Self {
        Self {
            world_bounds: Aabb::new(Vec2::splat(-65536.0), Vec2::splat(65536.0)),
            max_objects_per_node: 200,
            min_objects_for_split: 50,
            max_depth: 10,
            query_cache_frames: 3,
            root_cache_capacity: 16,
            grid_cell_size: 1024.0,
            group_distance_bucket: 100.0,
            lod_thresholds: LOD_THRESHOLDS,
        }
    }
}

/// GPU frustum culler sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CullerConfig {
    /// Object capacity allocated by `initialize`
    pub initial_max_objects: u32,
    /// Threads per work-group; must match `frustum_cull.wgsl`
    pub workgroup_size: u32,
}

impl Default for CullerConfig {
    fn default() -> Self {
        Self {
            initial_max_objects: 65536,
            workgroup_size: 64,
        }
    }
}

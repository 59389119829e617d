//! SpatialIndex - quad-tree plus uniform grid over object bounds
//!
//! Answers region, radius, LOD and grouped queries for the CPU side. Caches
//! results at two levels: every tree node remembers its last query, and the
//! index keeps a small FIFO of whole-query results. Both are keyed by the
//! exact bit pattern of the query bounds and expire after a few frames.
//! The root cache is also dropped by any mutation.
//!
//! Single-threaded: meant to be owned by the render thread.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use glam::Vec2;
use serde::Serialize;

use crate::core::{CameraView, SpatialIndexConfig};
use crate::math::Aabb;
use crate::scene::{ObjectChange, ObjectId, UpdateFlags};

use super::grid::{SpatialCell, UniformGrid};
use super::lod::{calculate_lod, distance_to_bounds, LodLevel};
use super::quadtree::{NodeEntry, QuadTreeNode, TreeParams};

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    bounds: Aabb,
    is_static: bool,
}

#[derive(Clone, Debug)]
struct RootCacheEntry {
    key: [u32; 4],
    frame: u64,
    generation: u64,
    result: Vec<ObjectId>,
}

#[derive(Clone, Copy, Debug, Default)]
struct QueryCounters {
    queries: u64,
    total_time: Duration,
    root_hits: u64,
    node_hits: u64,
}

/// Objects sharing an LOD tier and distance band
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpatialGroup {
    pub lod: LodLevel,
    /// `distance / group_distance_bucket`, truncated
    pub distance_bucket: u32,
    pub objects: Vec<ObjectId>,
    /// Union of the member bounds
    pub bounds: Aabb,
    /// `objects.len() * (4 - lod.index())`
    pub priority: u32,
}

/// Snapshot of tree shape and accumulated query counters
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexStatistics {
    pub object_count: usize,
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: u32,
    pub average_objects_per_leaf: f32,
    pub query_count: u64,
    pub average_query_time_us: f64,
    pub root_cache_hits: u64,
    pub node_cache_hits: u64,
    /// Fraction of queries answered by the root cache
    pub cache_hit_rate: f64,
}

/// Hierarchical spatial index
pub struct SpatialIndex {
    config: SpatialIndexConfig,
    params: TreeParams,
    root: QuadTreeNode,
    grid: UniformGrid,
    entries: HashMap<ObjectId, IndexEntry>,
    root_cache: VecDeque<RootCacheEntry>,
    frame: u64,
    /// Bumped by every mutation
    generation: u64,
    counters: QueryCounters,
}

impl SpatialIndex {
    pub fn new(config: SpatialIndexConfig) -> Self {
        let params = TreeParams::from(&config);
        let root = QuadTreeNode::new(config.world_bounds, 0);
        let grid = UniformGrid::new(config.world_bounds, config.grid_cell_size);
        log::info!(
            "SpatialIndex: bounds {:?}..{:?}, max depth {}, {} grid cells",
            config.world_bounds.min,
            config.world_bounds.max,
            params.max_depth,
            grid.cell_count()
        );
        Self {
            config,
            params,
            root,
            grid,
            entries: HashMap::new(),
            root_cache: VecDeque::new(),
            frame: 0,
            generation: 0,
            counters: QueryCounters::default(),
        }
    }

    pub fn config(&self) -> &SpatialIndexConfig {
        &self.config
    }

    pub fn root(&self) -> &QuadTreeNode {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Bounds an object was indexed with
    pub fn bounds_of(&self, id: ObjectId) -> Option<Aabb> {
        self.entries.get(&id).map(|e| e.bounds)
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Advance the cache clock; call once per rendered frame
    pub fn begin_frame(&mut self) {
        self.frame += 1;
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.root_cache.clear();
    }

    /// Index an object. Rejects duplicate ids and invalid bounds.
    pub fn insert(&mut self, id: ObjectId, bounds: Aabb, is_static: bool) -> bool {
        if !bounds.is_valid() {
            log::warn!("SpatialIndex: rejecting {:?} with invalid bounds", id);
            return false;
        }
        if self.entries.contains_key(&id) {
            return false;
        }

        self.root.insert(NodeEntry { id, bounds }, &self.params);
        self.grid.insert(id, &bounds, is_static);
        self.entries.insert(id, IndexEntry { bounds, is_static });
        self.touch();
        true
    }

    pub fn remove(&mut self, id: ObjectId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        let removed = self.root.remove(id, &entry.bounds);
        debug_assert!(removed, "tree and entry map disagree on {:?}", id);
        self.grid.remove(id, &entry.bounds, entry.is_static);
        self.touch();
        true
    }

    /// Move an object to new bounds (remove then reinsert)
    pub fn update(&mut self, id: ObjectId, bounds: Aabb) -> bool {
        let Some(is_static) = self.entries.get(&id).map(|e| e.is_static) else {
            return false;
        };
        self.reinsert(id, bounds, is_static)
    }

    fn reinsert(&mut self, id: ObjectId, bounds: Aabb, is_static: bool) -> bool {
        if !bounds.is_valid() {
            log::warn!("SpatialIndex: ignoring update of {:?} to invalid bounds", id);
            return false;
        }
        self.remove(id);
        self.insert(id, bounds, is_static)
    }

    /// Apply change records drained from an object collection.
    ///
    /// Removed objects leave the index, new ones join it, spatial changes
    /// reinsert. Colour and visibility changes alone are ignored.
    pub fn apply_changes(&mut self, changes: &[ObjectChange]) {
        for change in changes {
            match change.bounds {
                None => {
                    self.remove(change.id);
                }
                Some(bounds) => match self.entries.get(&change.id).copied() {
                    None => {
                        self.insert(change.id, bounds, change.is_static);
                    }
                    Some(entry) => {
                        let moved = change.flags.intersects(UpdateFlags::SPATIAL) && entry.bounds != bounds;
                        if moved || entry.is_static != change.is_static {
                            self.reinsert(change.id, bounds, change.is_static);
                        }
                    }
                },
            }
        }
    }

    /// Collapse sparse subtrees. Returns the number of merged nodes.
    pub fn merge(&mut self) -> usize {
        let merged = self.root.merge(&self.params);
        if merged > 0 {
            log::debug!("SpatialIndex: merged {} nodes", merged);
            self.touch();
        }
        merged
    }

    /// Drop every object; statistics are kept
    pub fn clear(&mut self) {
        self.root = QuadTreeNode::new(self.config.world_bounds, 0);
        self.grid.clear();
        self.entries.clear();
        self.touch();
    }

    /// All objects whose bounds overlap `bounds`
    pub fn query(&mut self, bounds: &Aabb) -> Vec<ObjectId> {
        let start = Instant::now();
        let key = bounds.to_bits();
        let (frame, generation, max_age) = (self.frame, self.generation, self.params.cache_frames);

        let cached = self
            .root_cache
            .iter()
            .find(|c| c.key == key && c.generation == generation && frame.saturating_sub(c.frame) < max_age)
            .map(|c| c.result.clone());

        let result = match cached {
            Some(result) => {
                log::trace!("SpatialIndex: root cache hit for {:?}", bounds);
                self.counters.root_hits += 1;
                result
            }
            None => {
                let mut out = Vec::new();
                self.root
                    .query(bounds, frame, &self.params, &mut out, &mut self.counters.node_hits);
                if max_age > 0 && self.config.root_cache_capacity > 0 {
                    while self.root_cache.len() >= self.config.root_cache_capacity {
                        self.root_cache.pop_front();
                    }
                    self.root_cache.push_back(RootCacheEntry {
                        key,
                        frame,
                        generation,
                        result: out.clone(),
                    });
                }
                out
            }
        };

        self.counters.queries += 1;
        self.counters.total_time += start.elapsed();
        result
    }

    /// Objects within `radius` of `center` (closest point of their bounds)
    pub fn query_radius(&mut self, center: Vec2, radius: f32) -> Vec<ObjectId> {
        if radius < 0.0 {
            return Vec::new();
        }
        let area = Aabb::from_center_half_extent(center, Vec2::splat(radius));
        let candidates = self.query(&area);
        candidates
            .into_iter()
            .filter(|id| {
                self.entries
                    .get(id)
                    .is_some_and(|e| center.clamp(e.bounds.min, e.bounds.max).distance(center) <= radius)
            })
            .collect()
    }

    /// Query `bounds`, dropping objects too far away to draw
    pub fn query_with_lod(&mut self, camera: &impl CameraView, bounds: &Aabb) -> Vec<(ObjectId, LodLevel)> {
        let thresholds = self.config.lod_thresholds;
        let ids = self.query(bounds);
        ids.into_iter()
            .filter_map(|id| {
                let entry = self.entries.get(&id)?;
                let lod = calculate_lod(camera, &entry.bounds, &thresholds);
                (lod != LodLevel::Culled).then_some((id, lod))
            })
            .collect()
    }

    /// Group visible objects around the camera into render batches.
    ///
    /// Objects within the far plane are bucketed by LOD tier and distance
    /// band. Groups come back highest priority first; ties break on tier,
    /// then band.
    pub fn query_spatial_groups(&mut self, camera: &impl CameraView) -> Vec<SpatialGroup> {
        let far = camera.far_plane();
        if far <= 0.0 {
            return Vec::new();
        }
        let area = Aabb::from_center_half_extent(camera.position().truncate(), Vec2::splat(far));
        let thresholds = self.config.lod_thresholds;
        let band = self.config.group_distance_bucket.max(f32::EPSILON);

        let mut groups: HashMap<(LodLevel, u32), SpatialGroup> = HashMap::new();
        for id in self.query(&area) {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let lod = calculate_lod(camera, &entry.bounds, &thresholds);
            if lod == LodLevel::Culled {
                continue;
            }
            let distance_bucket = (distance_to_bounds(camera, &entry.bounds) / band) as u32;
            let group = groups.entry((lod, distance_bucket)).or_insert_with(|| SpatialGroup {
                lod,
                distance_bucket,
                objects: Vec::new(),
                bounds: Aabb::EMPTY,
                priority: 0,
            });
            group.objects.push(id);
            group.bounds = group.bounds.union(&entry.bounds);
        }

        let mut groups: Vec<SpatialGroup> = groups
            .into_values()
            .map(|mut g| {
                g.priority = g.objects.len() as u32 * (4 - g.lod.index());
                g
            })
            .collect();
        groups.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.lod.index().cmp(&b.lod.index()))
                .then(a.distance_bucket.cmp(&b.distance_bucket))
        });
        groups
    }

    /// Grid-only query, exact against the indexed bounds. Sorted by id.
    pub fn query_grid(&self, bounds: &Aabb) -> Vec<ObjectId> {
        self.grid
            .query(bounds)
            .into_iter()
            .filter(|id| self.entries.get(id).is_some_and(|e| e.bounds.overlaps(bounds)))
            .collect()
    }

    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    /// Grid cell containing `point`
    pub fn grid_cell_at(&self, point: Vec2) -> Option<usize> {
        self.grid.cell_at(point)
    }

    pub fn grid_cell(&self, index: usize) -> Option<&SpatialCell> {
        self.grid.cell(index)
    }

    pub fn grid_neighbors(&self, index: usize) -> &[usize] {
        self.grid.neighbors(index)
    }

    pub fn statistics(&self) -> IndexStatistics {
        let shape = self.root.shape();
        let queries = self.counters.queries;
        IndexStatistics {
            object_count: self.entries.len(),
            node_count: shape.node_count,
            leaf_count: shape.leaf_count,
            max_depth: shape.max_depth,
            average_objects_per_leaf: if shape.leaf_count > 0 {
                shape.objects_in_leaves as f32 / shape.leaf_count as f32
            } else {
                0.0
            },
            query_count: queries,
            average_query_time_us: if queries > 0 {
                self.counters.total_time.as_secs_f64() * 1e6 / queries as f64
            } else {
                0.0
            },
            root_cache_hits: self.counters.root_hits,
            node_cache_hits: self.counters.node_hits,
            cache_hit_rate: if queries > 0 {
                self.counters.root_hits as f64 / queries as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset_statistics(&mut self) {
        self.counters = QueryCounters::default();
    }
}

//! Quad-tree over object bounds
//!
//! An object lives at the deepest node whose bounds contain it inside a
//! single child quadrant. Objects touching or crossing a split line stay at
//! the parent and are never duplicated. Objects outside the root bounds stay
//! at the root.

use crate::core::SpatialIndexConfig;
use crate::math::Aabb;
use crate::scene::ObjectId;

/// Split/merge and cache parameters shared by every node
#[derive(Clone, Copy, Debug)]
pub struct TreeParams {
    pub max_objects: usize,
    pub min_objects: usize,
    pub max_depth: u32,
    /// Frames a node's cached result stays valid; 0 disables node caches
    pub cache_frames: u64,
}

impl From<&SpatialIndexConfig> for TreeParams {
    fn from(config: &SpatialIndexConfig) -> Self {
        Self {
            max_objects: config.max_objects_per_node,
            min_objects: config.min_objects_for_split,
            max_depth: config.max_depth.max(1),
            cache_frames: config.query_cache_frames,
        }
    }
}

/// An object reference stored in a node
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeEntry {
    pub id: ObjectId,
    pub bounds: Aabb,
}

#[derive(Clone, Debug)]
struct NodeQueryCache {
    key: [u32; 4],
    frame: u64,
    result: Vec<ObjectId>,
}

/// Shape of a (sub)tree
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TreeShape {
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: u32,
    pub objects_in_leaves: usize,
}

/// One quad-tree node; a leaf iff it has no children
#[derive(Clone, Debug)]
pub struct QuadTreeNode {
    bounds: Aabb,
    level: u32,
    objects: Vec<NodeEntry>,
    children: Option<Box<[QuadTreeNode; 4]>>,
    object_count: usize,
    cache: Option<NodeQueryCache>,
}

impl QuadTreeNode {
    pub fn new(bounds: Aabb, level: u32) -> Self {
        Self {
            bounds,
            level,
            objects: Vec::new(),
            children: None,
            object_count: 0,
            cache: None,
        }
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Objects stored at this node itself
    pub fn objects(&self) -> &[NodeEntry] {
        &self.objects
    }

    pub fn children(&self) -> Option<&[QuadTreeNode; 4]> {
        self.children.as_deref()
    }

    /// Objects in this node and all descendants
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Objects per unit area
    pub fn density(&self) -> f32 {
        let area = self.bounds.area();
        if area > 0.0 {
            self.object_count as f32 / area
        } else {
            0.0
        }
    }

    /// Quadrant that fully holds `bounds`, or `None` for straddling objects
    fn child_index(&self, bounds: &Aabb) -> Option<usize> {
        if !self.bounds.contains(bounds) {
            return None;
        }
        let mut found = None;
        for q in 0..4 {
            if self.bounds.quadrant(q).overlaps(bounds) {
                if found.is_some() {
                    return None;
                }
                found = Some(q);
            }
        }
        found
    }

    fn should_split(&self, params: &TreeParams) -> bool {
        self.is_leaf()
            && self.objects.len() > params.max_objects
            && self.objects.len() >= params.min_objects
            && self.level + 1 < params.max_depth
    }

    pub fn insert(&mut self, entry: NodeEntry, params: &TreeParams) {
        self.object_count += 1;
        self.cache = None;

        let index = self.child_index(&entry.bounds);
        if let (Some(children), Some(q)) = (self.children.as_mut(), index) {
            children[q].insert(entry, params);
            return;
        }

        self.objects.push(entry);
        if self.should_split(params) {
            self.split(params);
        }
    }

    /// Turn a leaf into an internal node, pushing every object that fits a
    /// single quadrant down into it.
    pub fn split(&mut self, params: &TreeParams) {
        if !self.is_leaf() {
            return;
        }

        let level = self.level + 1;
        let mut children = Box::new([0, 1, 2, 3].map(|q| QuadTreeNode::new(self.bounds.quadrant(q), level)));

        let entries = std::mem::take(&mut self.objects);
        for entry in entries {
            match self.child_index(&entry.bounds) {
                Some(q) => children[q].insert(entry, params),
                None => self.objects.push(entry),
            }
        }

        self.children = Some(children);
        self.cache = None;
    }

    /// Remove `id`, following the same path insertion took for `bounds`
    pub fn remove(&mut self, id: ObjectId, bounds: &Aabb) -> bool {
        let index = self.child_index(bounds);
        let removed = match (self.children.as_mut(), index) {
            (Some(children), Some(q)) => children[q].remove(id, bounds),
            _ => match self.objects.iter().position(|e| e.id == id) {
                Some(i) => {
                    self.objects.swap_remove(i);
                    true
                }
                None => false,
            },
        };

        if removed {
            self.object_count -= 1;
            self.cache = None;
        }
        removed
    }

    /// Collapse internal nodes bottom-up.
    ///
    /// A node collapses when all four children are leaves holding fewer than
    /// `min_objects` together. Returns the number of collapsed nodes.
    pub fn merge(&mut self, params: &TreeParams) -> usize {
        let Some(children) = self.children.as_mut() else {
            return 0;
        };

        let mut merged: usize = children.iter_mut().map(|c| c.merge(params)).sum();

        let all_leaves = children.iter().all(QuadTreeNode::is_leaf);
        let combined: usize = children.iter().map(|c| c.object_count).sum();
        if all_leaves && combined < params.min_objects {
            if let Some(children) = self.children.take() {
                for child in *children {
                    self.objects.extend(child.objects);
                }
            }
            self.cache = None;
            merged += 1;
        }
        merged
    }

    /// Append ids of objects overlapping `area`.
    ///
    /// Reuses this node's cached result when `area` is bit-identical and the
    /// cache is younger than `cache_frames`. `cache_hits` counts reuses.
    pub fn query(
        &mut self,
        area: &Aabb,
        frame: u64,
        params: &TreeParams,
        out: &mut Vec<ObjectId>,
        cache_hits: &mut u64,
    ) {
        let key = area.to_bits();
        if let Some(cache) = &self.cache
            && cache.key == key
            && frame.saturating_sub(cache.frame) < params.cache_frames
        {
            out.extend_from_slice(&cache.result);
            *cache_hits += 1;
            return;
        }

        let start = out.len();
        out.extend(
            self.objects
                .iter()
                .filter(|e| e.bounds.overlaps(area))
                .map(|e| e.id),
        );

        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.object_count > 0 && child.bounds.overlaps(area) {
                    child.query(area, frame, params, out, cache_hits);
                }
            }
        }

        if params.cache_frames > 0 {
            self.cache = Some(NodeQueryCache {
                key,
                frame,
                result: out[start..].to_vec(),
            });
        }
    }

    /// Drop cached results in this subtree
    pub fn clear_caches(&mut self) {
        self.cache = None;
        if let Some(children) = self.children.as_mut() {
            children.iter_mut().for_each(QuadTreeNode::clear_caches);
        }
    }

    /// Ids of every object in this subtree
    pub fn collect_ids(&self, out: &mut Vec<ObjectId>) {
        out.extend(self.objects.iter().map(|e| e.id));
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.collect_ids(out);
            }
        }
    }

    pub fn shape(&self) -> TreeShape {
        let mut shape = TreeShape::default();
        self.accumulate_shape(&mut shape);
        shape
    }

    fn accumulate_shape(&self, shape: &mut TreeShape) {
        shape.node_count += 1;
        shape.max_depth = shape.max_depth.max(self.level);
        match self.children.as_ref() {
            None => {
                shape.leaf_count += 1;
                shape.objects_in_leaves += self.objects.len();
            }
            Some(children) => children.iter().for_each(|c| c.accumulate_shape(shape)),
        }
    }
}

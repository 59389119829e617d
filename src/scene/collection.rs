//! Object ownership and change tracking
//!
//! Mutations go through the collection, which records what changed in a
//! dirty set. Consumers such as the spatial index poll it with
//! [`ObjectCollection::drain_changes`] instead of registering callbacks on
//! the objects themselves.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::{Quat, Vec3, Vec4};

use super::object::{Model, Object, ObjectBuilder, ObjectId, UpdateFlags};
use crate::math::Aabb;
use crate::render::buffer::ChunkId;

/// One object's accumulated changes since the previous drain
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectChange {
    pub id: ObjectId,
    pub flags: UpdateFlags,
    /// Current world bounds, `None` once the object has been removed
    pub bounds: Option<Aabb>,
    pub is_static: bool,
}

/// Owns every live object of a scene
#[derive(Debug, Default)]
pub struct ObjectCollection {
    objects: HashMap<ObjectId, Object>,
    next_id: u64,
    /// Dirty set; `false` marks removed ids. Ordered so drains are deterministic.
    dirty: BTreeMap<ObjectId, bool>,
}

impl ObjectCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object and return its new id
    pub fn insert(&mut self, builder: ObjectBuilder) -> ObjectId {
        self.next_id += 1;
        let id = ObjectId(self.next_id);
        self.objects.insert(id, builder.build(id));
        self.dirty.insert(id, true);
        id
    }

    /// Remove an object; its handle becomes invalid
    pub fn remove(&mut self, id: ObjectId) -> Option<Object> {
        let object = self.objects.remove(&id)?;
        self.dirty.insert(id, false);
        Some(object)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects in id order
    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        let mut objects: Vec<&Object> = self.objects.values().collect();
        objects.sort_by_key(|o| o.id);
        objects.into_iter()
    }

    fn modify(&mut self, id: ObjectId, flag: UpdateFlags, apply: impl FnOnce(&mut Object)) -> bool {
        let Some(object) = self.objects.get_mut(&id) else {
            return false;
        };
        apply(object);
        object.flags |= flag;
        self.dirty.insert(id, true);
        true
    }

    pub fn set_translation(&mut self, id: ObjectId, translation: Vec3) -> bool {
        self.modify(id, UpdateFlags::TRANSLATION, |o| o.translation = translation)
    }

    pub fn set_scale(&mut self, id: ObjectId, scale: Vec3) -> bool {
        self.modify(id, UpdateFlags::SCALE, |o| o.scale = scale)
    }

    pub fn set_rotation(&mut self, id: ObjectId, rotation: Quat) -> bool {
        self.modify(id, UpdateFlags::ROTATION, |o| o.rotation = rotation)
    }

    pub fn set_color(&mut self, id: ObjectId, color: Vec4) -> bool {
        self.modify(id, UpdateFlags::COLOR, |o| o.color = color)
    }

    pub fn set_visible(&mut self, id: ObjectId, visible: bool) -> bool {
        self.modify(id, UpdateFlags::VISIBILITY, |o| o.visible = visible)
    }

    /// Swap the model; the chunk assignment is cleared with it
    pub fn set_model(&mut self, id: ObjectId, model: Arc<Model>) -> bool {
        self.modify(id, UpdateFlags::MODEL, |o| {
            o.model = model;
            o.chunk = None;
        })
    }

    /// Record where the object's geometry was uploaded. Not a tracked change.
    pub fn set_chunk(&mut self, id: ObjectId, chunk: Option<ChunkId>) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) => {
                object.chunk = chunk;
                true
            }
            None => false,
        }
    }

    /// Take every pending change and clear the objects' flags
    pub fn drain_changes(&mut self) -> Vec<ObjectChange> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .map(|(id, alive)| match self.objects.get_mut(&id).filter(|_| alive) {
                Some(object) => {
                    let flags = std::mem::take(&mut object.flags);
                    ObjectChange {
                        id,
                        flags,
                        bounds: Some(object.world_bounds()),
                        is_static: object.is_static,
                    }
                }
                None => ObjectChange {
                    id,
                    flags: UpdateFlags::ALL,
                    bounds: None,
                    is_static: false,
                },
            })
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::buffer::{GeometryBuilder, GeometryType};
    use glam::Vec2;

    fn model() -> Arc<Model> {
        let mut geometry = GeometryBuilder::new(GeometryType::Points);
        geometry.add_point(Vec2::ZERO, Vec4::ONE);
        geometry.add_point(Vec2::ONE, Vec4::ONE);
        Model::new(geometry)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut objects = ObjectCollection::new();
        let a = objects.insert(ObjectBuilder::new(model()));
        let b = objects.insert(ObjectBuilder::new(model()));
        objects.remove(a);
        let c = objects.insert(ObjectBuilder::new(model()));
        assert!(a < b && b < c);
        assert!(!objects.contains(a));
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_insert_reports_full_change() {
        let mut objects = ObjectCollection::new();
        let id = objects.insert(ObjectBuilder::new(model()).translation(Vec3::new(3.0, 4.0, 0.0)));

        let changes = objects.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, id);
        assert_eq!(changes[0].flags, UpdateFlags::ALL);
        assert_eq!(changes[0].bounds, Some(Aabb::from_coords(3.0, 4.0, 4.0, 5.0)));
        assert!(!objects.has_changes());
        assert!(objects.get(id).unwrap().flags().is_empty());
    }

    #[test]
    fn test_mutations_accumulate() {
        let mut objects = ObjectCollection::new();
        let id = objects.insert(ObjectBuilder::new(model()));
        objects.drain_changes();

        assert!(objects.set_color(id, Vec4::ZERO));
        assert!(objects.set_translation(id, Vec3::X));
        assert!(objects.set_chunk(id, Some(ChunkId(4))));

        let changes = objects.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].flags, UpdateFlags::COLOR | UpdateFlags::TRANSLATION);
        assert_eq!(objects.get(id).unwrap().chunk(), Some(ChunkId(4)));
    }

    #[test]
    fn test_chunk_assignment_is_silent() {
        let mut objects = ObjectCollection::new();
        let id = objects.insert(ObjectBuilder::new(model()));
        objects.drain_changes();

        objects.set_chunk(id, Some(ChunkId(1)));
        assert!(!objects.has_changes());
    }

    #[test]
    fn test_removal_reported_without_bounds() {
        let mut objects = ObjectCollection::new();
        let id = objects.insert(ObjectBuilder::new(model()));
        objects.set_scale(id, Vec3::splat(2.0));
        objects.remove(id);

        let changes = objects.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].bounds, None);
        assert!(!objects.set_color(id, Vec4::ONE));
    }
}

//! Scene objects: identity, transform, colour, model and chunk assignment

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::math::Aabb;
use crate::render::buffer::{ChunkId, GeometryBuilder, GeometryType};

/// Unique identifier for an object, never reused within a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ObjectId(pub u64);

/// Which parts of an object changed since the last drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UpdateFlags(u8);

impl UpdateFlags {
    pub const NONE: Self = Self(0);
    pub const TRANSLATION: Self = Self(1 << 0);
    pub const SCALE: Self = Self(1 << 1);
    pub const ROTATION: Self = Self(1 << 2);
    pub const COLOR: Self = Self(1 << 3);
    pub const MODEL: Self = Self(1 << 4);
    pub const VISIBILITY: Self = Self(1 << 5);

    /// Any change that moves the object's bounds
    pub const SPATIAL: Self = Self(Self::TRANSLATION.0 | Self::SCALE.0 | Self::ROTATION.0 | Self::MODEL.0);
    pub const ALL: Self = Self(0b11_1111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for UpdateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for UpdateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Vertex/index payload shared by objects, immutable once built.
#[derive(Debug)]
pub struct Model {
    geometry: GeometryBuilder,
}

impl Model {
    pub fn new(geometry: GeometryBuilder) -> Arc<Self> {
        Arc::new(Self { geometry })
    }

    pub fn geometry(&self) -> &GeometryBuilder {
        &self.geometry
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry.geometry_type
    }

    /// Model-space bounds
    pub fn bounds(&self) -> Aabb {
        self.geometry.bounds
    }
}

/// A placed instance of a model
#[derive(Clone, Debug)]
pub struct Object {
    pub(crate) id: ObjectId,
    pub(crate) translation: Vec3,
    pub(crate) scale: Vec3,
    pub(crate) rotation: Quat,
    pub(crate) color: Vec4,
    pub(crate) model: Arc<Model>,
    pub(crate) chunk: Option<ChunkId>,
    pub(crate) visible: bool,
    pub(crate) is_static: bool,
    pub(crate) flags: UpdateFlags,
}

impl Object {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Chunk holding this object's geometry, `None` until uploaded
    pub fn chunk(&self) -> Option<ChunkId> {
        self.chunk
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Static objects never move; the grid keeps them in a separate list
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Flags accumulated since the last drain
    pub fn flags(&self) -> UpdateFlags {
        self.flags
    }

    /// Model to world transform
    pub fn transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// World-space bounds on the ground plane
    pub fn world_bounds(&self) -> Aabb {
        self.model.bounds().transformed(&self.transform())
    }
}

/// Builder for [`Object`]; ids are assigned by the owning collection.
#[derive(Clone, Debug)]
pub struct ObjectBuilder {
    translation: Vec3,
    scale: Vec3,
    rotation: Quat,
    color: Vec4,
    model: Arc<Model>,
    chunk: Option<ChunkId>,
    visible: bool,
    is_static: bool,
}

impl ObjectBuilder {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            color: Vec4::ONE,
            model,
            chunk: None,
            visible: true,
            is_static: true,
        }
    }

    pub fn translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn chunk(mut self, chunk: ChunkId) -> Self {
        self.chunk = Some(chunk);
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Mark the object as moving; it goes into the grid's dynamic lists
    pub fn dynamic(mut self) -> Self {
        self.is_static = false;
        self
    }

    pub(crate) fn build(self, id: ObjectId) -> Object {
        Object {
            id,
            translation: self.translation,
            scale: self.scale,
            rotation: self.rotation,
            color: self.color,
            model: self.model,
            chunk: self.chunk,
            visible: self.visible,
            is_static: self.is_static,
            flags: UpdateFlags::ALL,
        }
    }
}

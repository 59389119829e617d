//! Scene objects and their change tracking

pub mod object;
pub mod collection;

pub use object::{Model, Object, ObjectBuilder, ObjectId, UpdateFlags};
pub use collection::{ObjectChange, ObjectCollection};

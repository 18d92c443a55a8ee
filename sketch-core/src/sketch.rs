//! The sketch: an ordered map from [`ShapeId`] to [`Shape`].
//!
//! Ascending id order is both replay order and z-order: a shape with a
//! higher id is drawn on top of, and wins hit tests against, a lower one.
//!
//! There is no locking here. The server owns exactly one `Sketch` and only
//! touches it inside its critical section; clients own a private replica.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shape::Shape;

/// Positive shape identifier, assigned by the server and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(NonZeroU32);

impl ShapeId {
    /// Returns `None` for zero.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(ShapeId)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid shape id: {0:?}")]
pub struct InvalidShapeId(pub String);

impl FromStr for ShapeId {
    type Err = InvalidShapeId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<NonZeroU32>()
            .map(ShapeId)
            .map_err(|_| InvalidShapeId(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SketchError {
    #[error("shape id space exhausted")]
    IdSpaceExhausted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sketch {
    /// Last id handed out by [`Sketch::create_with_new_id`]; 0 before the first.
    counter: u32,
    shapes: BTreeMap<ShapeId, Shape>,
}

impl Sketch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `shape` under the next id. Only the server calls this.
    pub fn create_with_new_id(&mut self, shape: Shape) -> Result<ShapeId, SketchError> {
        let next = self
            .counter
            .checked_add(1)
            .ok_or(SketchError::IdSpaceExhausted)?;
        let id = ShapeId::new(next).ok_or(SketchError::IdSpaceExhausted)?;
        self.counter = next;
        self.shapes.insert(id, shape);
        log::trace!("sketch: created shape {id}");
        Ok(id)
    }

    /// Store `shape` under an id chosen elsewhere, replacing any shape
    /// already there. The id counter is left alone.
    pub fn insert_with_id(&mut self, id: ShapeId, shape: Shape) {
        self.shapes.insert(id, shape);
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    pub fn get_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        self.shapes.get_mut(&id)
    }

    /// Remove the shape if present. Deleting a missing id is a no-op.
    pub fn delete(&mut self, id: ShapeId) -> Option<Shape> {
        let removed = self.shapes.remove(&id);
        if removed.is_some() {
            log::trace!("sketch: deleted shape {id}");
        }
        removed
    }

    /// All shapes, lowest id first.
    pub fn list_ordered_ascending(&self) -> impl Iterator<Item = (ShapeId, &Shape)> + '_ {
        self.shapes.iter().map(|(id, shape)| (*id, shape))
    }

    /// The topmost shape hit by `(x, y)`, if any.
    pub fn topmost_at(&self, x: i32, y: i32) -> Option<ShapeId> {
        self.shapes
            .iter()
            .rev()
            .find(|(_, shape)| shape.contains(x, y))
            .map(|(id, _)| *id)
    }

    /// The most recently assigned id, even if that shape was since deleted.
    pub fn last_assigned_id(&self) -> Option<ShapeId> {
        ShapeId::new(self.counter)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Shape content equality, ignoring the id counter. Replicas never see
    /// the server's counter, so this is how convergence is checked.
    pub fn same_shapes(&self, other: &Sketch) -> bool {
        self.shapes == other.shapes
    }
}

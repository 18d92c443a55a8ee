//! # sketch-core: Shape model and document store for collaborative sketches
//!
//! ## Modules
//!
//! - [`shape`]: The four shape variants and their canonical text codec
//! - [`sketch`]: Ordered `ShapeId → Shape` store with monotonic id assignment
//!
//! The store has no locking. Exactly one owner mutates it (the
//! server's coordinator, or a client's private replica).

pub mod shape;
pub mod sketch;

pub use shape::{Bounds, Color, DecodeError, Ellipse, Point, Polyline, Rectangle, Segment, Shape, ShapeKind};
pub use sketch::{InvalidShapeId, ShapeId, Sketch, SketchError};

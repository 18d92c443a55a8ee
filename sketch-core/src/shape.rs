//! Shape variants and their canonical text codec.
//!
//! Canonical form:
//! ```text
//! <kind> |<field> <field> ... <field>|
//!
//! ellipse   |x1 y1 x2 y2 color|
//! rectangle |x1 y1 x2 y2 color|
//! segment   |x1 y1 x2 y2 color|
//! polyline  |x0 y0 x1 y1 ... xn yn color|
//! ```
//!
//! Ellipse and rectangle corners are normalized on construction so that
//! `x1 <= x2` and `y1 <= y2`; containment relies on it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hit tolerance for a segment, in pixels.
const SEGMENT_TOLERANCE: f64 = 3.0;
/// Hit tolerance for each leg of a polyline, in pixels.
const POLYLINE_TOLERANCE: f64 = 10.0;

/// Errors produced while decoding a shape from its canonical text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown shape kind: {0:?}")]
    UnknownKind(String),
    #[error("shape payload is missing its '|' delimiters")]
    MissingDelimiter,
    #[error("unexpected input after shape payload: {0:?}")]
    TrailingInput(String),
    #[error("{kind} cannot be built from {count} fields")]
    FieldCount { kind: ShapeKind, count: usize },
    #[error("invalid integer field: {0:?}")]
    InvalidInteger(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Translate in place. Wraps on overflow so every replica agrees.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        self.x = self.x.wrapping_add(dx);
        self.y = self.y.wrapping_add(dy);
    }
}

/// Packed 32-bit color. Opaque to the document model: it is stored and
/// printed back exactly as received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub i32);

impl Color {
    /// Opaque black (`0xFF000000`).
    pub const BLACK: Color = Color(0xFF00_0000_u32 as i32);

    pub fn packed(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Color {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_int(s).map(Color)
    }
}

/// The four shape kinds, spelled the way they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Ellipse,
    Rectangle,
    Segment,
    Polyline,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 4] = [
        ShapeKind::Ellipse,
        ShapeKind::Rectangle,
        ShapeKind::Segment,
        ShapeKind::Polyline,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShapeKind::Ellipse => "ellipse",
            ShapeKind::Rectangle => "rectangle",
            ShapeKind::Segment => "segment",
            ShapeKind::Polyline => "polyline",
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShapeKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShapeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownKind(s.to_string()))
    }
}

/// Axis-aligned box with normalized corners (`min <= max` on both axes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bounds {
    min: Point,
    max: Point,
}

impl Bounds {
    /// Build from any two opposite corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn min(&self) -> Point {
        self.min
    }

    pub fn max(&self) -> Point {
        self.max
    }

    fn translate(&mut self, dx: i32, dy: i32) {
        let mut min = self.min;
        let mut max = self.max;
        min.translate(dx, dy);
        max.translate(dx, dy);
        // Wrapping can swap the order; re-normalize.
        *self = Bounds::from_corners(min, max);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ellipse {
    bounds: Bounds,
    color: Color,
}

impl Ellipse {
    pub fn new(a: Point, b: Point, color: Color) -> Self {
        Self {
            bounds: Bounds::from_corners(a, b),
            color,
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Redefine the ellipse from two opposite corners.
    pub fn set_corners(&mut self, a: Point, b: Point) {
        self.bounds = Bounds::from_corners(a, b);
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        let (min, max) = (self.bounds.min, self.bounds.max);
        let a = (f64::from(max.x) - f64::from(min.x)) / 2.0;
        let b = (f64::from(max.y) - f64::from(min.y)) / 2.0;
        if a == 0.0 || b == 0.0 {
            return false;
        }
        let dx = f64::from(x) - (f64::from(min.x) + a);
        let dy = f64::from(y) - (f64::from(min.y) + b);
        (dx / a).powi(2) + (dy / b).powi(2) <= 1.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rectangle {
    bounds: Bounds,
    color: Color,
}

impl Rectangle {
    pub fn new(a: Point, b: Point, color: Color) -> Self {
        Self {
            bounds: Bounds::from_corners(a, b),
            color,
        }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn set_corners(&mut self, a: Point, b: Point) {
        self.bounds = Bounds::from_corners(a, b);
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        let (min, max) = (self.bounds.min, self.bounds.max);
        (min.x..=max.x).contains(&x) && (min.y..=max.y).contains(&y)
    }
}

/// A straight segment. Endpoints keep the order they were given in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
    color: Color,
}

impl Segment {
    pub fn new(start: Point, end: Point, color: Color) -> Self {
        Self { start, end, color }
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        point_to_segment_distance(Point::new(x, y), self.start, self.end) <= SEGMENT_TOLERANCE
    }
}

/// Connected sequence of segments through at least one point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polyline {
    points: Vec<Point>,
    color: Color,
}

impl Polyline {
    pub fn new(start: Point, color: Color) -> Self {
        Self {
            points: vec![start],
            color,
        }
    }

    /// Returns `None` for an empty point list.
    pub fn from_points(points: Vec<Point>, color: Color) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(Self { points, color })
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        let p = Point::new(x, y);
        if let [only] = self.points.as_slice() {
            return point_to_segment_distance(p, *only, *only) <= POLYLINE_TOLERANCE;
        }
        self.points
            .windows(2)
            .any(|leg| point_to_segment_distance(p, leg[0], leg[1]) <= POLYLINE_TOLERANCE)
    }
}

/// A shape in the sketch.
///
/// Serializes through its canonical text form so that deserialized values
/// keep the corner normalization invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Shape {
    Ellipse(Ellipse),
    Rectangle(Rectangle),
    Segment(Segment),
    Polyline(Polyline),
}

impl Shape {
    pub fn ellipse(a: Point, b: Point, color: Color) -> Self {
        Shape::Ellipse(Ellipse::new(a, b, color))
    }

    pub fn rectangle(a: Point, b: Point, color: Color) -> Self {
        Shape::Rectangle(Rectangle::new(a, b, color))
    }

    pub fn segment(start: Point, end: Point, color: Color) -> Self {
        Shape::Segment(Segment::new(start, end, color))
    }

    pub fn polyline(points: Vec<Point>, color: Color) -> Option<Self> {
        Polyline::from_points(points, color).map(Shape::Polyline)
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Ellipse(_) => ShapeKind::Ellipse,
            Shape::Rectangle(_) => ShapeKind::Rectangle,
            Shape::Segment(_) => ShapeKind::Segment,
            Shape::Polyline(_) => ShapeKind::Polyline,
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Shape::Ellipse(s) => s.color,
            Shape::Rectangle(s) => s.color,
            Shape::Segment(s) => s.color,
            Shape::Polyline(s) => s.color,
        }
    }

    pub fn set_color(&mut self, color: Color) {
        match self {
            Shape::Ellipse(s) => s.color = color,
            Shape::Rectangle(s) => s.color = color,
            Shape::Segment(s) => s.color = color,
            Shape::Polyline(s) => s.color = color,
        }
    }

    /// Move every coordinate by `(dx, dy)`.
    pub fn translate(&mut self, dx: i32, dy: i32) {
        match self {
            Shape::Ellipse(s) => s.bounds.translate(dx, dy),
            Shape::Rectangle(s) => s.bounds.translate(dx, dy),
            Shape::Segment(s) => {
                s.start.translate(dx, dy);
                s.end.translate(dx, dy);
            }
            Shape::Polyline(s) => s.points.iter_mut().for_each(|p| p.translate(dx, dy)),
        }
    }

    /// Whether `(x, y)` hits this shape.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        match self {
            Shape::Ellipse(s) => s.contains(x, y),
            Shape::Rectangle(s) => s.contains(x, y),
            Shape::Segment(s) => s.contains(x, y),
            Shape::Polyline(s) => s.contains(x, y),
        }
    }

    /// Integer fields in canonical order, color last.
    pub fn fields(&self) -> Vec<i32> {
        let mut fields = match self {
            Shape::Ellipse(Ellipse { bounds, .. }) | Shape::Rectangle(Rectangle { bounds, .. }) => {
                vec![bounds.min.x, bounds.min.y, bounds.max.x, bounds.max.y]
            }
            Shape::Segment(s) => vec![s.start.x, s.start.y, s.end.x, s.end.y],
            Shape::Polyline(s) => s.points.iter().flat_map(|p| [p.x, p.y]).collect(),
        };
        fields.push(self.color().packed());
        fields
    }

    /// Build a shape of `kind` from the space-separated payload found
    /// between the `|` delimiters.
    pub fn parse(kind: ShapeKind, fields: &str) -> Result<Self, DecodeError> {
        let values = fields
            .split_ascii_whitespace()
            .map(parse_int)
            .collect::<Result<Vec<i32>, _>>()?;
        let count = values.len();
        let bad_count = || DecodeError::FieldCount { kind, count };

        match kind {
            ShapeKind::Ellipse | ShapeKind::Rectangle | ShapeKind::Segment => {
                let [x1, y1, x2, y2, color] = values[..] else {
                    return Err(bad_count());
                };
                let (a, b, color) = (Point::new(x1, y1), Point::new(x2, y2), Color(color));
                Ok(match kind {
                    ShapeKind::Ellipse => Shape::ellipse(a, b, color),
                    ShapeKind::Rectangle => Shape::rectangle(a, b, color),
                    _ => Shape::segment(a, b, color),
                })
            }
            ShapeKind::Polyline => {
                let Some((&color, coords)) = values.split_last() else {
                    return Err(bad_count());
                };
                if coords.is_empty() || coords.len() % 2 != 0 {
                    return Err(bad_count());
                }
                let points = coords
                    .chunks_exact(2)
                    .map(|xy| Point::new(xy[0], xy[1]))
                    .collect();
                Shape::polyline(points, Color(color)).ok_or_else(bad_count)
            }
        }
    }

    /// Decode the full `<kind> |<fields>|` form.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let (kind, payload) = text.split_once(' ').ok_or(DecodeError::MissingDelimiter)?;
        let kind: ShapeKind = kind.parse()?;
        let inner = payload
            .strip_prefix('|')
            .ok_or(DecodeError::MissingDelimiter)?;
        let (fields, rest) = inner.split_once('|').ok_or(DecodeError::MissingDelimiter)?;
        if !rest.is_empty() {
            return Err(DecodeError::TrailingInput(rest.to_string()));
        }
        Shape::parse(kind, fields)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} |", self.kind())?;
        for (i, field) in self.fields().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str("|")
    }
}

impl FromStr for Shape {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Shape::decode(s)
    }
}

impl From<Shape> for String {
    fn from(shape: Shape) -> Self {
        shape.to_string()
    }
}

impl TryFrom<String> for Shape {
    type Error = DecodeError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Shape::decode(&text)
    }
}

fn parse_int(token: &str) -> Result<i32, DecodeError> {
    token
        .parse()
        .map_err(|_| DecodeError::InvalidInteger(token.to_string()))
}

/// Euclidean distance from `p` to the segment `a`-`b`.
fn point_to_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (px, py) = (f64::from(p.x), f64::from(p.y));
    let (ax, ay) = (f64::from(a.x), f64::from(a.y));
    let (bx, by) = (f64::from(b.x), f64::from(b.y));
    let len2 = (bx - ax).powi(2) + (by - ay).powi(2);
    if len2 == 0.0 {
        return ((px - ax).powi(2) + (py - ay).powi(2)).sqrt();
    }
    // Project onto the line through a and b, clamped to the segment.
    let t = (((px - ax) * (bx - ax) + (py - ay) * (by - ay)) / len2).clamp(0.0, 1.0);
    let (cx, cy) = (ax + t * (bx - ax), ay + t * (by - ay));
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

//! Line-oriented text protocol for sketch edits.
//!
//! Wire format (one message per `\n`-terminated line):
//! ```text
//! client → server   CREATE <kind> |<fields>|
//! server → client   ADD <id> <kind> |<fields>|
//! both directions   DELETE <id>
//! both directions   MOVE <id> <dx> <dy>
//! both directions   RECOLOR <id> <color>
//! ```
//!
//! Verbs are case-sensitive and tokens are separated by a single space.
//! A snapshot is a run of `ADD` lines in ascending id order.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use sketch_core::{Color, DecodeError, InvalidShapeId, Shape, ShapeId, Sketch};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Create,
    Add,
    Delete,
    Move,
    Recolor,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Create => "CREATE",
            Verb::Add => "ADD",
            Verb::Delete => "DELETE",
            Verb::Move => "MOVE",
            Verb::Recolor => "RECOLOR",
        }
    }

    fn parse(token: &str) -> Result<Self, ProtocolError> {
        match token {
            "CREATE" => Ok(Verb::Create),
            "ADD" => Ok(Verb::Add),
            "DELETE" => Ok(Verb::Delete),
            "MOVE" => Ok(Verb::Move),
            "RECOLOR" => Ok(Verb::Recolor),
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer identity for a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub addr: SocketAddr,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            peer_id: Uuid::new_v4(),
            addr,
        }
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, addr: SocketAddr) -> Self {
        Self { peer_id, addr }
    }
}

/// An edit a client asks the server to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditRequest {
    Create(Shape),
    Delete(ShapeId),
    Move { id: ShapeId, dx: i32, dy: i32 },
    Recolor { id: ShapeId, color: Color },
}

impl EditRequest {
    pub fn verb(&self) -> Verb {
        match self {
            EditRequest::Create(_) => Verb::Create,
            EditRequest::Delete(_) => Verb::Delete,
            EditRequest::Move { .. } => Verb::Move,
            EditRequest::Recolor { .. } => Verb::Recolor,
        }
    }

    /// Decode one request line (without its terminator).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (verb, rest) = split_verb(line)?;
        match verb {
            Verb::Create => Ok(EditRequest::Create(Shape::decode(rest)?)),
            Verb::Delete => parse_delete(rest).map(EditRequest::Delete),
            Verb::Move => parse_move(rest).map(|(id, dx, dy)| EditRequest::Move { id, dx, dy }),
            Verb::Recolor => parse_recolor(rest).map(|(id, color)| EditRequest::Recolor { id, color }),
            Verb::Add => Err(ProtocolError::WrongDirection(Verb::Add)),
        }
    }
}

impl fmt::Display for EditRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditRequest::Create(shape) => write!(f, "{} {shape}", Verb::Create),
            EditRequest::Delete(id) => write!(f, "{} {id}", Verb::Delete),
            EditRequest::Move { id, dx, dy } => write!(f, "{} {id} {dx} {dy}", Verb::Move),
            EditRequest::Recolor { id, color } => write!(f, "{} {id} {color}", Verb::Recolor),
        }
    }
}

/// A canonical line emitted by the server. Replicas apply these in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Add { id: ShapeId, shape: Shape },
    Delete(ShapeId),
    Move { id: ShapeId, dx: i32, dy: i32 },
    Recolor { id: ShapeId, color: Color },
}

impl ServerMessage {
    pub fn verb(&self) -> Verb {
        match self {
            ServerMessage::Add { .. } => Verb::Add,
            ServerMessage::Delete(_) => Verb::Delete,
            ServerMessage::Move { .. } => Verb::Move,
            ServerMessage::Recolor { .. } => Verb::Recolor,
        }
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (verb, rest) = split_verb(line)?;
        match verb {
            Verb::Add => {
                let (id, shape) = rest
                    .split_once(' ')
                    .ok_or(ProtocolError::MissingField { verb, field: "shape" })?;
                Ok(ServerMessage::Add {
                    id: id.parse()?,
                    shape: Shape::decode(shape)?,
                })
            }
            Verb::Delete => parse_delete(rest).map(ServerMessage::Delete),
            Verb::Move => parse_move(rest).map(|(id, dx, dy)| ServerMessage::Move { id, dx, dy }),
            Verb::Recolor => parse_recolor(rest).map(|(id, color)| ServerMessage::Recolor { id, color }),
            Verb::Create => Err(ProtocolError::WrongDirection(Verb::Create)),
        }
    }

    /// Apply to a local replica. Returns whether the replica changed.
    ///
    /// Moves and recolors of unknown ids are ignored, the same way the
    /// server drops them.
    pub fn apply_to(&self, sketch: &mut Sketch) -> bool {
        match self {
            ServerMessage::Add { id, shape } => {
                sketch.insert_with_id(*id, shape.clone());
                true
            }
            ServerMessage::Delete(id) => sketch.delete(*id).is_some(),
            ServerMessage::Move { id, dx, dy } => match sketch.get_mut(*id) {
                Some(shape) => {
                    shape.translate(*dx, *dy);
                    true
                }
                None => false,
            },
            ServerMessage::Recolor { id, color } => match sketch.get_mut(*id) {
                Some(shape) => {
                    shape.set_color(*color);
                    true
                }
                None => false,
            },
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Add { id, shape } => write!(f, "{} {id} {shape}", Verb::Add),
            ServerMessage::Delete(id) => write!(f, "{} {id}", Verb::Delete),
            ServerMessage::Move { id, dx, dy } => write!(f, "{} {id} {dx} {dy}", Verb::Move),
            ServerMessage::Recolor { id, color } => write!(f, "{} {id} {color}", Verb::Recolor),
        }
    }
}

/// Full sketch state at one instant, as `ADD` lines in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    lines: Vec<String>,
}

impl Snapshot {
    pub fn of(sketch: &Sketch) -> Self {
        let lines = sketch
            .list_ordered_ascending()
            .map(|(id, shape)| {
                ServerMessage::Add {
                    id,
                    shape: shape.clone(),
                }
                .to_string()
            })
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The message body: every line newline-terminated, empty when the
    /// sketch is empty.
    pub fn to_wire(&self) -> String {
        let mut body = String::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            body.push_str(line);
            body.push('\n');
        }
        body
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("unknown verb: {0:?}")]
    UnknownVerb(String),
    #[error("{0} is not accepted in this direction")]
    WrongDirection(Verb),
    #[error("{verb} is missing its {field}")]
    MissingField { verb: Verb, field: &'static str },
    #[error("{verb} has unexpected trailing input: {rest:?}")]
    TrailingInput { verb: Verb, rest: String },
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),
    #[error(transparent)]
    InvalidId(#[from] InvalidShapeId),
    #[error(transparent)]
    Shape(#[from] DecodeError),
}

fn split_verb(line: &str) -> Result<(Verb, &str), ProtocolError> {
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    Ok((Verb::parse(verb)?, rest))
}

/// Split `rest` into exactly `N` single-space separated tokens.
fn tokens<'a, const N: usize>(
    verb: Verb,
    rest: &'a str,
    names: [&'static str; N],
) -> Result<[&'a str; N], ProtocolError> {
    let mut parts = rest.splitn(N + 1, ' ');
    let mut out = [""; N];
    for (slot, field) in out.iter_mut().zip(names) {
        *slot = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or(ProtocolError::MissingField { verb, field })?;
    }
    if let Some(extra) = parts.next() {
        return Err(ProtocolError::TrailingInput {
            verb,
            rest: extra.to_string(),
        });
    }
    Ok(out)
}

fn int(token: &str) -> Result<i32, ProtocolError> {
    token
        .parse()
        .map_err(|_| ProtocolError::InvalidInteger(token.to_string()))
}

fn parse_delete(rest: &str) -> Result<ShapeId, ProtocolError> {
    let [id] = tokens(Verb::Delete, rest, ["id"])?;
    Ok(id.parse()?)
}

fn parse_move(rest: &str) -> Result<(ShapeId, i32, i32), ProtocolError> {
    let [id, dx, dy] = tokens(Verb::Move, rest, ["id", "dx", "dy"])?;
    Ok((id.parse()?, int(dx)?, int(dy)?))
}

fn parse_recolor(rest: &str) -> Result<(ShapeId, Color), ProtocolError> {
    let [id, color] = tokens(Verb::Recolor, rest, ["id", "color"])?;
    Ok((id.parse()?, Color(int(color)?)))
}

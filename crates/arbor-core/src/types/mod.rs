//! # Core Type Definitions
//!
//! This module contains the value types shared by every part of the forest:
//! - Identifiers (`TreeId`, `NodeId`, `SynapseId`) and entity addressing
//! - Geometry (`Coordinate`, `FloatCoordinate`) and tree `Color`
//! - Property values (`PropertyValue`, `Properties`)
//! - The opaque per-tree `MeshHandle`
//! - Error types (`ArborError`)
//!
//! ## Ordering Guarantees
//!
//! All identifiers implement `Ord` so that indexes built on `BTreeMap`/`BTreeSet`
//! iterate in ascending ID order. Traversal seeding relies on that order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Forest-wide unique identifier of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TreeId(pub u64);

/// Forest-wide unique identifier of a node, independent of its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Identifier of a synapse relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SynapseId(pub u64);

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SynapseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of entity an error or notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Tree,
    Node,
    Segment,
    Synapse,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tree => "tree",
            Self::Node => "node",
            Self::Segment => "segment",
            Self::Synapse => "synapse",
        };
        f.write_str(name)
    }
}

/// Addresses an entity that carries a property map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Tree(TreeId),
    Node(NodeId),
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Integer voxel position inside the dataset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise offset, saturating at the `i32` range.
    #[must_use]
    pub const fn offset(self, delta: i32) -> Self {
        Self {
            x: self.x.saturating_add(delta),
            y: self.y.saturating_add(delta),
            z: self.z.saturating_add(delta),
        }
    }

    /// Euclidean distance in physical units, each axis multiplied by `scale`.
    #[must_use]
    pub fn scaled_distance(self, other: Self, scale: FloatCoordinate) -> f32 {
        let dx = (other.x as f32 - self.x as f32) * scale.x;
        let dy = (other.y as f32 - self.y as f32) * scale.y;
        let dz = (other.z as f32 - self.z as f32) * scale.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Clamp every axis into `[0, boundary)`.
    #[must_use]
    pub fn clamped_to(self, boundary: Self) -> Self {
        let clamp = |v: i32, max: i32| v.clamp(0, max.saturating_sub(1).max(0));
        Self {
            x: clamp(self.x, boundary.x),
            y: clamp(self.y, boundary.y),
            z: clamp(self.z, boundary.z),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Per-axis physical scale (e.g. nanometers per voxel).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatCoordinate {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl FloatCoordinate {
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Default for FloatCoordinate {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

// =============================================================================
// COLOR
// =============================================================================

/// RGBA tree color, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Color from 8-bit channels, fully opaque.
    #[must_use]
    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            1.0,
        )
    }
}

// =============================================================================
// VIEWPORT
// =============================================================================

/// The viewport a node was placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Viewport {
    #[default]
    Xy,
    Xz,
    Zy,
    Skeleton,
    Arbitrary,
    /// Code written by a newer tool that this store does not interpret.
    Other(i32),
}

impl Viewport {
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Xy,
            1 => Self::Xz,
            2 => Self::Zy,
            3 => Self::Skeleton,
            4 => Self::Arbitrary,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Xy => 0,
            Self::Xz => 1,
            Self::Zy => 2,
            Self::Skeleton => 3,
            Self::Arbitrary => 4,
            Self::Other(code) => code,
        }
    }
}

// =============================================================================
// PROPERTIES
// =============================================================================

/// A single property value. Names are cataloged forest-wide as numeric or textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Text(String),
    Number(f64),
}

impl PropertyValue {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    /// Numeric interpretation: the number itself, or a text value that parses.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Property bag of a tree or node, ordered by name.
pub type Properties = BTreeMap<String, PropertyValue>;

// =============================================================================
// MESH HANDLE
// =============================================================================

/// Opaque mesh payload owned by a tree.
///
/// The forest never inspects the parts; it only moves them on merge and drops
/// them with the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshHandle {
    parts: Vec<Vec<u8>>,
}

impl MeshHandle {
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            parts: vec![payload],
        }
    }

    /// Append all parts of `other` to this handle.
    pub fn absorb(&mut self, other: Self) {
        self.parts.extend(other.parts);
    }

    #[must_use]
    pub fn parts(&self) -> &[Vec<u8>] {
        &self.parts
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Arbor forest.
///
/// Expected conditions (unknown or duplicate IDs, locked positions) are
/// returned as values; nothing in the core panics.
#[derive(Debug, Error)]
pub enum ArborError {
    /// A caller-supplied ID is already taken.
    #[error("Duplicate {kind} ID: {id}")]
    DuplicateId { kind: EntityKind, id: u64 },

    /// An operation referenced an entity that does not exist.
    #[error("Invalid reference: {kind} {id} does not exist")]
    InvalidReference { kind: EntityKind, id: u64 },

    /// The operation would break a structural invariant.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A node placement fell outside the locked radius.
    #[error("Position {position} is outside the locking radius {radius} around {anchor}")]
    PositionLocked {
        position: Coordinate,
        anchor: Coordinate,
        radius: f32,
    },

    /// The interchange document failed structural validation.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// A traversal was advanced after its last node.
    #[error("Traversal already exhausted")]
    IteratorExhausted,

    /// A property could not be converted to a number.
    #[error("Property '{name}' cannot be converted: {reason}")]
    PropertyConversion { name: String, reason: String },

    /// Writing a document failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration could not be read or is inconsistent.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ArborError {
    pub(crate) const fn missing_tree(id: TreeId) -> Self {
        Self::InvalidReference {
            kind: EntityKind::Tree,
            id: id.0,
        }
    }

    pub(crate) const fn missing_node(id: NodeId) -> Self {
        Self::InvalidReference {
            kind: EntityKind::Node,
            id: id.0,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

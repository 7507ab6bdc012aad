//! # arbor-core
//!
//! The in-memory skeleton annotation store for Arbor.
//!
//! A [`Forest`] holds trees of 3D-positioned nodes joined by undirected edges
//! (stored as sister segment records on both endpoints), the selection and
//! activity state of an annotation session, synapses between nodes, and a
//! forest-wide property catalog. It is read from and written to NML
//! documents through the [`formats`] module.
//!
//! ## Architectural Constraints
//!
//! - Single owner: every mutation goes through `&mut Forest`, no locking
//! - Deterministic: all indexes are `BTreeMap`/`BTreeSet` keyed by ID
//! - Atomic loads: documents are applied to a staging copy and swapped in
//! - Observable: subscribers receive change events, batched per operation
//! - Has NO async, NO I/O: file access lives in the app crate

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod events;
pub mod formats;
pub mod forest;
pub mod integrity;
pub mod mutation;
pub mod primitives;
pub mod properties;
pub mod selection;
pub mod splitter;
pub mod synapse;
pub mod traversal;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ArborError, Color, Coordinate, EntityKind, EntityRef, FloatCoordinate, MeshHandle, NodeId,
    Properties, PropertyValue, SynapseId, TreeId, Viewport,
};

// =============================================================================
// RE-EXPORTS: Forest
// =============================================================================

pub use config::{DatasetBounds, ForestConfig};
pub use events::{EventFilter, EventKind, ForestEvent, Notifier};
pub use forest::{
    Forest, ForestParameters, MovementArea, Node, NodeSpec, Segment, SegmentKey, Tree,
};
pub use properties::PropertyCatalog;
pub use selection::Selection;
pub use synapse::Synapse;
pub use traversal::{Direction, NodeGenerator, TreeTraverser};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{LoadReport, SaveOptions, XmlElement, load_nml, save_nml};

//! # Primitives
//!
//! Hardcoded constants for the Arbor forest: reserved property names, the
//! default tree palette, NML vocabulary and traversal bounds.
//!
//! These are compiled in and immutable at runtime. Anything a user may want
//! to change lives in [`crate::config::ForestConfig`] instead.

use crate::Color;

// =============================================================================
// RESERVED PROPERTY NAMES
// =============================================================================

/// The distinguished free-text annotation of a tree or node.
pub const COMMENT_PROPERTY: &str = "comment";

/// Node property naming the cleft tree of a synapse the node is pre-synaptic to.
pub const PRE_SYNAPSE_PROPERTY: &str = "preSynapse";

/// Node property naming the cleft tree of a synapse the node is post-synaptic to.
pub const POST_SYNAPSE_PROPERTY: &str = "postSynapse";

/// Tree property marking a synaptic cleft.
pub const SYNAPTIC_CLEFT_PROPERTY: &str = "synapticCleft";

/// Returns `true` for property names the forest manages itself.
///
/// Reserved names never enter the numeric/textual catalog.
#[must_use]
pub fn is_reserved_property(name: &str) -> bool {
    matches!(
        name,
        COMMENT_PROPERTY | PRE_SYNAPSE_PROPERTY | POST_SYNAPSE_PROPERTY | SYNAPTIC_CLEFT_PROPERTY
    )
}

// =============================================================================
// IDS
// =============================================================================

/// First ID handed out by the allocators. Zero is never assigned.
pub const FIRST_ID: u64 = 1;

// =============================================================================
// TREE PALETTE
// =============================================================================

/// Fixed palette for trees without a manual color, indexed by tree ID.
pub const TREE_PALETTE: [(u8, u8, u8); 12] = [
    (204, 51, 51),
    (51, 153, 51),
    (51, 102, 204),
    (230, 159, 0),
    (153, 51, 204),
    (0, 158, 115),
    (240, 228, 66),
    (213, 94, 0),
    (86, 180, 233),
    (204, 121, 167),
    (120, 120, 120),
    (0, 114, 178),
];

/// Default color for a tree with the given ID.
#[must_use]
pub fn palette_color(tree_id: u64) -> Color {
    let index = (tree_id % TREE_PALETTE.len() as u64) as usize;
    let (r, g, b) = TREE_PALETTE[index];
    Color::from_rgb8(r, g, b)
}

// =============================================================================
// TRAVERSAL BOUNDS
// =============================================================================

/// Maximum depth accepted by bounded traversals.
///
/// Larger requested depths are clamped; an unbounded walk uses no limit at all.
pub const MAX_TRAVERSAL_DEPTH: usize = 1_000_000;

// =============================================================================
// NML VOCABULARY
// =============================================================================

/// Root element of an NML document.
pub const NML_ROOT: &str = "things";

/// Name of the application written into `createdin`/`lastsavedin`.
pub const PRODUCER: &str = "arbor";

/// Sentinel written to all four color channels of a tree without manual color.
pub const DERIVED_COLOR_SENTINEL: f32 = -1.0;

/// Parameter elements kept verbatim so that view state survives a round trip.
pub const PASSTHROUGH_PARAMETERS: [&str; 3] =
    ["skeletonVPState", "vpSettingsZoom", "viewportState"];

/// Maximum accepted document size for the codec (256 MB).
///
/// Checked before parsing so that oversized input is rejected cheaply.
pub const MAX_DOCUMENT_SIZE: usize = 256 * 1024 * 1024;

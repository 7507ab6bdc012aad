//! # Entity Store
//!
//! The [`Forest`] owns every tree, node, segment and synapse of an annotation.
//!
//! Entities live in ID-keyed `BTreeMap`s; cross references are IDs resolved
//! through the forest, never pointers:
//! - a tree lists the IDs of the nodes it owns, in insertion order
//! - a node names its tree (`TreeId`) and its synapse (`SynapseId`) as weak handles
//! - a segment names its sister through a [`SegmentKey`]
//!
//! Collaborators only ever get shared references. All mutation goes through
//! `Forest` methods defined here and in the `mutation`, `selection`,
//! `properties`, `synapse` and `splitter` modules.

use crate::config::ForestConfig;
use crate::events::{EventFilter, ForestEvent, Notifier};
use crate::formats::xml::XmlElement;
use crate::primitives::{COMMENT_PROPERTY, FIRST_ID, palette_color};
use crate::properties::PropertyCatalog;
use crate::selection::Selection;
use crate::synapse::Synapse;
use crate::{
    ArborError, Color, Coordinate, EntityKind, FloatCoordinate, MeshHandle, NodeId, Properties,
    PropertyValue, SynapseId, TreeId, Viewport,
};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

// =============================================================================
// TREE
// =============================================================================

/// An owning collection of nodes sharing one identity, color and property map.
#[derive(Debug, Clone)]
pub struct Tree {
    pub(crate) id: TreeId,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) color: Option<Color>,
    pub(crate) render: bool,
    pub(crate) properties: Properties,
    pub(crate) mesh: Option<MeshHandle>,
    pub(crate) is_synaptic_cleft: bool,
    pub(crate) synapse: Option<SynapseId>,
    pub(crate) selected: bool,
}

impl Tree {
    fn new(id: TreeId, color: Option<Color>, properties: Properties) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            color,
            render: true,
            properties,
            mesh: None,
            is_synaptic_cleft: false,
            synapse: None,
            selected: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> TreeId {
        self.id
    }

    /// IDs of the owned nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The manual color, or the palette color derived from the ID.
    #[must_use]
    pub fn color(&self) -> Color {
        self.color.unwrap_or_else(|| palette_color(self.id.0))
    }

    /// The manual color, if one was set.
    #[must_use]
    pub fn manual_color(&self) -> Option<Color> {
        self.color
    }

    #[must_use]
    pub fn is_rendered(&self) -> bool {
        self.render
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The comment of this tree, empty if none.
    #[must_use]
    pub fn comment(&self) -> &str {
        comment_of(&self.properties)
    }

    #[must_use]
    pub fn mesh(&self) -> Option<&MeshHandle> {
        self.mesh.as_ref()
    }

    #[must_use]
    pub fn is_synaptic_cleft(&self) -> bool {
        self.is_synaptic_cleft
    }

    #[must_use]
    pub fn synapse(&self) -> Option<SynapseId> {
        self.synapse
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected
    }
}

// =============================================================================
// SEGMENT
// =============================================================================

/// Handle of one segment record.
///
/// A forward record lives in the source node's list, a backward record in the
/// target node's list. Flipping `forward` yields the sister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentKey {
    pub source: NodeId,
    pub target: NodeId,
    pub forward: bool,
}

impl SegmentKey {
    /// Key of the forward record of the edge `source -> target`.
    #[must_use]
    pub const fn forward(source: NodeId, target: NodeId) -> Self {
        Self {
            source,
            target,
            forward: true,
        }
    }

    /// Node whose segment list holds this record.
    #[must_use]
    pub const fn owner(self) -> NodeId {
        if self.forward { self.source } else { self.target }
    }

    #[must_use]
    pub const fn sister(self) -> Self {
        Self {
            source: self.source,
            target: self.target,
            forward: !self.forward,
        }
    }
}

/// One half of an undirected edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub(crate) source: NodeId,
    pub(crate) target: NodeId,
    pub(crate) length: f32,
    pub(crate) forward: bool,
}

impl Segment {
    #[must_use]
    pub fn source(&self) -> NodeId {
        self.source
    }

    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Euclidean length in physical units.
    #[must_use]
    pub fn length(&self) -> f32 {
        self.length
    }

    #[must_use]
    pub fn is_forward(&self) -> bool {
        self.forward
    }

    #[must_use]
    pub fn key(&self) -> SegmentKey {
        SegmentKey {
            source: self.source,
            target: self.target,
            forward: self.forward,
        }
    }

    /// Key of the mirrored record in the other endpoint's list.
    #[must_use]
    pub fn sister(&self) -> SegmentKey {
        self.key().sister()
    }

    /// The endpoint that does not own this record.
    #[must_use]
    pub fn neighbor(&self) -> NodeId {
        if self.forward { self.target } else { self.source }
    }
}

// =============================================================================
// NODE
// =============================================================================

/// A point annotation in 3D space, owned by exactly one tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) position: Coordinate,
    pub(crate) radius: f32,
    pub(crate) viewport: Viewport,
    pub(crate) magnification: u32,
    pub(crate) time: u64,
    pub(crate) properties: Properties,
    pub(crate) selected: bool,
    pub(crate) is_branch_node: bool,
    pub(crate) is_synaptic_node: bool,
    pub(crate) circ_radius: f32,
    pub(crate) tree: TreeId,
    pub(crate) synapse: Option<SynapseId>,
    pub(crate) segments: Vec<Segment>,
}

impl Node {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn position(&self) -> Coordinate {
        self.position
    }

    #[must_use]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[must_use]
    pub fn magnification(&self) -> u32 {
        self.magnification
    }

    /// Annotation time at creation, in milliseconds.
    #[must_use]
    pub fn time(&self) -> u64 {
        self.time
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn comment(&self) -> &str {
        comment_of(&self.properties)
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    #[must_use]
    pub fn is_branch_node(&self) -> bool {
        self.is_branch_node
    }

    #[must_use]
    pub fn is_synaptic_node(&self) -> bool {
        self.is_synaptic_node
    }

    /// Culling radius: the maximum of the own radius and incident segment lengths.
    #[must_use]
    pub fn circ_radius(&self) -> f32 {
        self.circ_radius
    }

    /// The owning tree.
    #[must_use]
    pub fn tree(&self) -> TreeId {
        self.tree
    }

    #[must_use]
    pub fn synapse(&self) -> Option<SynapseId> {
        self.synapse
    }

    /// Every segment record held by this node, forward and backward.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Nodes adjacent through any segment, in segment order.
    pub fn neighbors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.segments.iter().map(Segment::neighbor)
    }

    pub(crate) fn recompute_circ_radius(&mut self) {
        self.circ_radius = self
            .segments
            .iter()
            .map(|segment| segment.length)
            .fold(self.radius, f32::max);
    }
}

fn comment_of(properties: &Properties) -> &str {
    properties
        .get(COMMENT_PROPERTY)
        .and_then(PropertyValue::as_str)
        .unwrap_or("")
}

// =============================================================================
// NODE BUILDER
// =============================================================================

/// Everything needed to create a node. Built with [`NodeSpec::new`] and the
/// `with_*` methods; unset fields take the forest defaults.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: Option<NodeId>,
    pub tree: TreeId,
    pub position: Coordinate,
    pub radius: Option<f32>,
    pub viewport: Viewport,
    pub magnification: u32,
    pub time: Option<u64>,
    pub respect_locks: bool,
    pub properties: Properties,
}

impl NodeSpec {
    #[must_use]
    pub fn new(tree: TreeId, position: Coordinate) -> Self {
        Self {
            id: None,
            tree,
            position,
            radius: None,
            viewport: Viewport::default(),
            magnification: 1,
            time: None,
            respect_locks: false,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }

    #[must_use]
    pub fn in_viewport(mut self, viewport: Viewport, magnification: u32) -> Self {
        self.viewport = viewport;
        self.magnification = magnification;
        self
    }

    #[must_use]
    pub fn at_time(mut self, time: u64) -> Self {
        self.time = Some(time);
        self
    }

    #[must_use]
    pub fn respecting_locks(mut self) -> Self {
        self.respect_locks = true;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

// =============================================================================
// DOCUMENT PARAMETERS
// =============================================================================

/// Region of the dataset the annotator may move in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementArea {
    pub min: Coordinate,
    pub size: Coordinate,
}

/// Annotation metadata carried through the interchange format.
///
/// The forest stores these values but attaches no invariants to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForestParameters {
    pub experiment_name: String,
    pub created_in: String,
    pub last_saved_in: String,
    pub movement_area: Option<MovementArea>,
    /// Elapsed annotation time in milliseconds; new nodes default to it.
    pub annotation_time_ms: u64,
    pub background_segmentation_id: u64,
    pub edit_position: Coordinate,
    pub task: BTreeMap<String, String>,
    /// Camera and viewport state, kept verbatim.
    pub view_state: Vec<XmlElement>,
}

// =============================================================================
// FOREST
// =============================================================================

/// The forest of skeleton trees: entity store, indexes and annotation state.
#[derive(Debug, Clone)]
pub struct Forest {
    pub(crate) config: ForestConfig,
    pub(crate) params: ForestParameters,
    pub(crate) trees: BTreeMap<TreeId, Tree>,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) synapses: BTreeMap<SynapseId, Synapse>,
    pub(crate) catalog: PropertyCatalog,
    pub(crate) selection: Selection,
    pub(crate) branch_stack: Vec<NodeId>,
    pub(crate) locked_at: Option<Coordinate>,
    next_tree_id: u64,
    next_node_id: u64,
    next_synapse_id: u64,
    pub(crate) notifier: Notifier,
}

impl Default for Forest {
    fn default() -> Self {
        Self::new()
    }
}

impl Forest {
    /// Create an empty forest with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ForestConfig::default())
    }

    /// Create an empty forest with the given configuration.
    #[must_use]
    pub fn with_config(config: ForestConfig) -> Self {
        let params = ForestParameters {
            experiment_name: config.experiment_name.clone(),
            ..ForestParameters::default()
        };
        Self {
            config,
            params,
            trees: BTreeMap::new(),
            nodes: BTreeMap::new(),
            synapses: BTreeMap::new(),
            catalog: PropertyCatalog::default(),
            selection: Selection::default(),
            branch_stack: Vec::new(),
            locked_at: None,
            next_tree_id: FIRST_ID,
            next_node_id: FIRST_ID,
            next_synapse_id: FIRST_ID,
            notifier: Notifier::default(),
        }
    }

    /// Remove every entity and reset annotation state.
    ///
    /// Configuration and subscriptions survive; subscribers get one `Reset`.
    pub fn clear_skeleton(&mut self) {
        let config = self.config.clone();
        let notifier = std::mem::take(&mut self.notifier);
        *self = Self::with_config(config);
        self.notifier = notifier;
        self.notifier.publish(ForestEvent::Reset);
    }

    // =========================================================================
    // CONFIGURATION & NOTIFICATIONS
    // =========================================================================

    #[must_use]
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    #[must_use]
    pub fn scale(&self) -> FloatCoordinate {
        self.config.scale
    }

    #[must_use]
    pub fn parameters(&self) -> &ForestParameters {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut ForestParameters {
        &mut self.params
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&mut self, filter: EventFilter) -> Receiver<ForestEvent> {
        self.notifier.subscribe(filter)
    }

    /// Run `operation` with notifications suspended; one aggregate event is
    /// published when it returns.
    pub fn batched<T>(&mut self, operation: impl FnOnce(&mut Self) -> T) -> T {
        self.notifier.suspend();
        let result = operation(self);
        self.notifier.resume();
        result
    }

    // =========================================================================
    // ID ALLOCATION
    // =========================================================================

    /// Next free tree ID. Skips over IDs taken by explicit insertion.
    fn allocate_tree_id(&mut self) -> TreeId {
        while self.trees.contains_key(&TreeId(self.next_tree_id)) {
            self.next_tree_id = self.next_tree_id.saturating_add(1);
        }
        let id = TreeId(self.next_tree_id);
        self.next_tree_id = self.next_tree_id.saturating_add(1);
        id
    }

    fn allocate_node_id(&mut self) -> NodeId {
        while self.nodes.contains_key(&NodeId(self.next_node_id)) {
            self.next_node_id = self.next_node_id.saturating_add(1);
        }
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        id
    }

    pub(crate) fn allocate_synapse_id(&mut self) -> SynapseId {
        while self.synapses.contains_key(&SynapseId(self.next_synapse_id)) {
            self.next_synapse_id = self.next_synapse_id.saturating_add(1);
        }
        let id = SynapseId(self.next_synapse_id);
        self.next_synapse_id = self.next_synapse_id.saturating_add(1);
        id
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Add an empty tree.
    ///
    /// Without an `id` the next free tree ID is allocated. The first tree of
    /// a forest without an active tree becomes active.
    pub fn add_tree(
        &mut self,
        id: Option<TreeId>,
        color: Option<Color>,
        properties: Properties,
    ) -> Result<TreeId, ArborError> {
        let id = match id {
            Some(id) if self.trees.contains_key(&id) => {
                return Err(ArborError::DuplicateId {
                    kind: EntityKind::Tree,
                    id: id.0,
                });
            }
            Some(id) => id,
            None => self.allocate_tree_id(),
        };

        let properties = self.catalog.admit(properties);
        self.trees.insert(id, Tree::new(id, color, properties));
        self.notifier.publish(ForestEvent::TreeAdded(id));

        if self.selection.active_tree.is_none() {
            self.set_active_tree(id)?;
        }
        Ok(id)
    }

    /// Add a node to an existing tree.
    ///
    /// The position is clamped to the dataset boundary and the magnification
    /// capped at the highest available one. With `respect_locks`, placements
    /// outside the locking radius are rejected. The first node added while no
    /// node is active becomes active.
    pub fn add_node(&mut self, spec: NodeSpec) -> Result<NodeId, ArborError> {
        if !self.trees.contains_key(&spec.tree) {
            return Err(ArborError::missing_tree(spec.tree));
        }
        if let Some(id) = spec.id {
            if self.nodes.contains_key(&id) {
                return Err(ArborError::DuplicateId {
                    kind: EntityKind::Node,
                    id: id.0,
                });
            }
        }
        let radius = spec.radius.unwrap_or(self.config.default_node_radius);
        if !is_valid_radius(radius) {
            return Err(ArborError::InvariantViolation(format!(
                "node radius must be positive and finite, got {}",
                radius
            )));
        }

        let (position, magnification) = match self.config.dataset {
            Some(dataset) => (
                spec.position.clamped_to(dataset.boundary),
                spec.magnification.min(dataset.highest_magnification),
            ),
            None => (spec.position, spec.magnification),
        };

        if spec.respect_locks {
            self.check_lock(position)?;
        }

        let id = match spec.id {
            Some(id) => id,
            None => self.allocate_node_id(),
        };
        let node = Node {
            id,
            position,
            radius,
            viewport: spec.viewport,
            magnification: magnification.max(1),
            time: spec.time.unwrap_or(self.params.annotation_time_ms),
            properties: self.catalog.admit(spec.properties),
            selected: false,
            is_branch_node: false,
            is_synaptic_node: false,
            circ_radius: radius,
            tree: spec.tree,
            synapse: None,
            segments: Vec::new(),
        };
        self.nodes.insert(id, node);
        if let Some(tree) = self.trees.get_mut(&spec.tree) {
            tree.nodes.push(id);
        }
        self.notifier.publish(ForestEvent::NodeAdded(id));

        if self.selection.active_node.is_none() {
            self.set_active_node(Some(id))?;
        }
        Ok(id)
    }

    /// Reject `position` if a lock is active and it lies outside the radius.
    fn check_lock(&self, position: Coordinate) -> Result<(), ArborError> {
        let Some(anchor) = self.locked_at else {
            return Ok(());
        };
        let radius = self.config.lock_radius;
        if anchor.scaled_distance(position, self.config.scale) > radius {
            tracing::debug!(%position, %anchor, radius, "node placement rejected by position lock");
            return Err(ArborError::PositionLocked {
                position,
                anchor,
                radius,
            });
        }
        Ok(())
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    #[must_use]
    pub fn find_tree_by_id(&self, id: TreeId) -> Option<&Tree> {
        self.trees.get(&id)
    }

    #[must_use]
    pub fn find_node_by_id(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Resolve a segment handle.
    #[must_use]
    pub fn segment(&self, key: SegmentKey) -> Option<&Segment> {
        self.nodes
            .get(&key.owner())?
            .segments
            .iter()
            .find(|segment| segment.key() == key)
    }

    /// Nodes of `tree` whose comment contains `needle`, ignoring case.
    ///
    /// Nodes without a comment never match.
    pub fn find_nodes_in_tree(
        &self,
        tree: TreeId,
        needle: &str,
    ) -> Result<Vec<NodeId>, ArborError> {
        let tree = self.trees.get(&tree).ok_or(ArborError::missing_tree(tree))?;
        let needle = needle.to_lowercase();
        Ok(tree
            .nodes
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| comment_matches(node.comment(), &needle))
            .map(|node| node.id)
            .collect())
    }

    /// Trees whose own comment contains `needle`, ignoring case.
    #[must_use]
    pub fn find_trees_containing_comment(&self, needle: &str) -> Vec<TreeId> {
        let needle = needle.to_lowercase();
        self.trees
            .values()
            .filter(|tree| comment_matches(tree.comment(), &needle))
            .map(|tree| tree.id)
            .collect()
    }

    /// All trees in ascending ID order.
    pub fn trees(&self) -> impl Iterator<Item = &Tree> {
        self.trees.values()
    }

    /// All nodes in ascending ID order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All synapses in ascending ID order.
    pub fn synapses(&self) -> impl Iterator<Item = &Synapse> {
        self.synapses.values()
    }

    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes
            .values()
            .flat_map(|node| node.segments.iter())
            .filter(|segment| segment.forward)
            .count()
    }

    /// Number of segment records, two per edge.
    #[must_use]
    pub fn segment_record_count(&self) -> usize {
        self.nodes.values().map(|node| node.segments.len()).sum()
    }

    /// The branch stack, bottom first.
    #[must_use]
    pub fn branch_stack(&self) -> &[NodeId] {
        &self.branch_stack
    }

    /// The current lock anchor, if positions are locked.
    #[must_use]
    pub fn locked_position(&self) -> Option<Coordinate> {
        self.locked_at
    }

    // =========================================================================
    // INTERNAL ACCESS
    // =========================================================================

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ArborError> {
        self.nodes.get_mut(&id).ok_or(ArborError::missing_node(id))
    }

    pub(crate) fn tree_mut(&mut self, id: TreeId) -> Result<&mut Tree, ArborError> {
        self.trees.get_mut(&id).ok_or(ArborError::missing_tree(id))
    }
}

/// Radii must be positive and finite.
pub(crate) fn is_valid_radius(radius: f32) -> bool {
    radius.is_finite() && radius > 0.0
}

fn comment_matches(comment: &str, lowercase_needle: &str) -> bool {
    !comment.is_empty() && comment.to_lowercase().contains(lowercase_needle)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityRef;
    use crate::config::DatasetBounds;

    fn forest_with_tree() -> (Forest, TreeId) {
        let mut forest = Forest::new();
        let tree = forest
            .add_tree(None, None, Properties::new())
            .expect("add tree");
        (forest, tree)
    }

    #[test]
    fn tree_ids_are_allocated_past_explicit_ones() {
        let mut forest = Forest::new();
        forest
            .add_tree(Some(TreeId(1)), None, Properties::new())
            .expect("explicit");
        forest
            .add_tree(Some(TreeId(2)), None, Properties::new())
            .expect("explicit");
        let allocated = forest.add_tree(None, None, Properties::new()).expect("auto");
        assert_eq!(allocated, TreeId(3));
    }

    #[test]
    fn duplicate_tree_id_rejected() {
        let (mut forest, tree) = forest_with_tree();
        let result = forest.add_tree(Some(tree), None, Properties::new());
        assert!(matches!(
            result,
            Err(ArborError::DuplicateId {
                kind: EntityKind::Tree,
                ..
            })
        ));
    }

    #[test]
    fn first_tree_and_node_become_active() {
        let (mut forest, tree) = forest_with_tree();
        assert_eq!(forest.active_tree(), Some(tree));

        let first = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(1, 1, 1)))
            .expect("node");
        let second = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(2, 2, 2)))
            .expect("node");
        assert_eq!(forest.active_node(), Some(first));
        assert_ne!(forest.active_node(), Some(second));
    }

    #[test]
    fn add_node_to_unknown_tree_fails() {
        let mut forest = Forest::new();
        let result = forest.add_node(NodeSpec::new(TreeId(9), Coordinate::default()));
        assert!(matches!(
            result,
            Err(ArborError::InvalidReference {
                kind: EntityKind::Tree,
                id: 9
            })
        ));
    }

    #[test]
    fn duplicate_node_id_rejected() {
        let (mut forest, tree) = forest_with_tree();
        forest
            .add_node(NodeSpec::new(tree, Coordinate::default()).with_id(NodeId(5)))
            .expect("node");
        let result = forest.add_node(NodeSpec::new(tree, Coordinate::default()).with_id(NodeId(5)));
        assert!(matches!(result, Err(ArborError::DuplicateId { id: 5, .. })));
    }

    #[test]
    fn non_positive_radius_rejected() {
        let (mut forest, tree) = forest_with_tree();
        let result = forest.add_node(NodeSpec::new(tree, Coordinate::default()).with_radius(0.0));
        assert!(matches!(result, Err(ArborError::InvariantViolation(_))));
        assert_eq!(forest.node_count(), 0);
    }

    #[test]
    fn dataset_bounds_clamp_position_and_magnification() {
        let config = ForestConfig {
            dataset: Some(DatasetBounds {
                boundary: Coordinate::new(100, 100, 100),
                highest_magnification: 8,
            }),
            ..ForestConfig::default()
        };
        let mut forest = Forest::with_config(config);
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let id = forest
            .add_node(
                NodeSpec::new(tree, Coordinate::new(150, -3, 50)).in_viewport(Viewport::Xz, 32),
            )
            .expect("node");
        let node = forest.find_node_by_id(id).expect("node");
        assert_eq!(node.position(), Coordinate::new(99, 0, 50));
        assert_eq!(node.magnification(), 8);
    }

    #[test]
    fn locked_position_rejects_far_nodes() {
        let (mut forest, tree) = forest_with_tree();
        forest.lock_position(Coordinate::new(0, 0, 0));

        let near =
            forest.add_node(NodeSpec::new(tree, Coordinate::new(10, 0, 0)).respecting_locks());
        assert!(near.is_ok());

        let far =
            forest.add_node(NodeSpec::new(tree, Coordinate::new(500, 0, 0)).respecting_locks());
        assert!(matches!(far, Err(ArborError::PositionLocked { .. })));

        // Without respect_locks the lock is not consulted
        let ignored = forest.add_node(NodeSpec::new(tree, Coordinate::new(500, 0, 0)));
        assert!(ignored.is_ok());
    }

    #[test]
    fn comment_searches_ignore_case() {
        let (mut forest, tree) = forest_with_tree();
        let a = forest
            .add_node(NodeSpec::new(tree, Coordinate::default()))
            .expect("node");
        let b = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(1, 0, 0)))
            .expect("node");
        forest
            .set_comment(EntityRef::Node(a), "Soma start")
            .expect("comment");
        forest
            .set_comment(EntityRef::Tree(tree), "Axon of cell 4")
            .expect("comment");

        assert_eq!(forest.find_nodes_in_tree(tree, "SOMA").expect("search"), vec![a]);
        assert!(!forest.find_nodes_in_tree(tree, "soma").expect("search").contains(&b));
        assert_eq!(forest.find_trees_containing_comment("axon"), vec![tree]);
        assert!(forest.find_trees_containing_comment("dendrite").is_empty());
    }

    #[test]
    fn clear_skeleton_keeps_subscribers() {
        let (mut forest, tree) = forest_with_tree();
        forest
            .add_node(NodeSpec::new(tree, Coordinate::default()))
            .expect("node");
        let rx = forest.subscribe(EventFilter::all());

        forest.clear_skeleton();

        assert_eq!(forest.tree_count(), 0);
        assert_eq!(forest.node_count(), 0);
        assert_eq!(forest.active_tree(), None);
        assert_eq!(rx.try_recv().expect("event"), ForestEvent::Reset);
        let again = forest.add_tree(None, None, Properties::new()).expect("tree");
        assert_eq!(again, TreeId(1));
    }

    #[test]
    fn derived_color_follows_palette() {
        let (forest, tree) = forest_with_tree();
        let tree = forest.find_tree_by_id(tree).expect("tree");
        assert_eq!(tree.manual_color(), None);
        assert_eq!(tree.color(), palette_color(tree.id().0));
    }

    #[test]
    fn manual_color_overrides_palette() {
        let (mut forest, tree) = forest_with_tree();
        let red = Color::new(1.0, 0.0, 0.0, 1.0);

        forest.set_tree_color(tree, Some(red)).expect("color");
        assert_eq!(forest.find_tree_by_id(tree).expect("tree").color(), red);

        forest.set_tree_color(tree, None).expect("reset");
        let reset = forest.find_tree_by_id(tree).expect("tree");
        assert_eq!(reset.color(), palette_color(tree.0));
        assert!(forest.set_tree_color(TreeId(99), Some(red)).is_err());
    }

    #[test]
    fn parameters_are_editable() {
        let mut forest = Forest::new();
        forest.parameters_mut().experiment_name = "cortex".to_string();
        forest.parameters_mut().annotation_time_ms = 42;
        assert_eq!(forest.parameters().experiment_name, "cortex");
        assert_eq!(forest.parameters().annotation_time_ms, 42);
    }
}

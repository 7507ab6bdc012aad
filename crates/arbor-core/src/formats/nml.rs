//! # NML Codec
//!
//! Reads and writes the NML interchange format: a `things` root holding a
//! `parameters` block, one `thing` per tree with nested `nodes` and `edges`,
//! and top-level `comments` and `branchpoints` blocks.
//!
//! ## Loading
//!
//! Loading is two-pass and atomic:
//! 1. The document is parsed and structurally validated into plain records.
//! 2. Trees and nodes are created on a staging copy of the forest while
//!    edges, comments, branch points and synapse cross-references are
//!    buffered; the buffered references are then resolved through the
//!    old-to-new ID maps.
//!
//! Only if both passes succeed does the staging forest replace the target.
//! A fresh load keeps document IDs; a merge load assigns new ones.
//!
//! ## Coordinates
//!
//! Documents either declare `zeroBasedCoords` or use the legacy 1-based
//! convention. Positions are shifted by the origin symmetrically on save and
//! load.

use super::checksum::{time_checksum, verify_time_checksum};
use super::xml::{XmlElement, parse_document, write_document};
use crate::events::ForestEvent;
use crate::forest::{Forest, ForestParameters, MovementArea, Node, NodeSpec, Tree, is_valid_radius};
use crate::primitives::{
    COMMENT_PROPERTY, DERIVED_COLOR_SENTINEL, MAX_DOCUMENT_SIZE, NML_ROOT, PASSTHROUGH_PARAMETERS,
    POST_SYNAPSE_PROPERTY, PRE_SYNAPSE_PROPERTY, PRODUCER, SYNAPTIC_CLEFT_PROPERTY,
};
use crate::{
    ArborError, Color, Coordinate, EntityRef, FloatCoordinate, NodeId, Properties, PropertyValue,
    TreeId, Viewport,
};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Attributes of `thing` that are not folded into the property map.
const THING_ATTRIBUTES: [&str; 6] = ["id", "visible", "color.r", "color.g", "color.b", "color.a"];

/// Attributes of `node` that are not folded into the property map.
const NODE_ATTRIBUTES: [&str; 8] = ["id", "radius", "x", "y", "z", "inVp", "inMag", "time"];

// =============================================================================
// OPTIONS & REPORT
// =============================================================================

/// What to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Write only selected trees (and the edges among their nodes).
    pub only_selected: bool,
    /// Write the annotation time and per-node timestamps.
    pub save_time: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            only_selected: false,
            save_time: true,
        }
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Document tree ID to forest tree ID.
    pub tree_ids: BTreeMap<u64, TreeId>,
    /// Document node ID to forest node ID.
    pub node_ids: BTreeMap<u64, NodeId>,
    /// Number of edges created.
    pub edges: usize,
    /// Element paths the codec does not know, e.g. `parameters/foo`.
    pub unknown_elements: Vec<String>,
    /// Attributes the codec does not know, e.g. `edge@weight`.
    pub unknown_attributes: Vec<String>,
    /// Non-fatal problems: dangling references, rejected edges, bad checksums.
    pub warnings: Vec<String>,
}

impl LoadReport {
    #[must_use]
    pub fn trees_loaded(&self) -> usize {
        self.tree_ids.len()
    }

    #[must_use]
    pub fn nodes_loaded(&self) -> usize {
        self.node_ids.len()
    }

    /// Nothing was unknown and nothing was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unknown_elements.is_empty()
            && self.unknown_attributes.is_empty()
            && self.warnings.is_empty()
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

// =============================================================================
// SAVE
// =============================================================================

/// Serialize the forest as an NML document.
pub fn save_nml(forest: &Forest, options: SaveOptions) -> Result<String, ArborError> {
    let origin = forest.config().document_origin();
    let trees: Vec<&Tree> = forest
        .trees()
        .filter(|tree| !options.only_selected || tree.is_selected())
        .collect();
    let saved: BTreeSet<NodeId> = trees
        .iter()
        .flat_map(|tree| tree.nodes().iter().copied())
        .collect();

    let mut root =
        XmlElement::new(NML_ROOT).with_child(parameters_element(forest, options, &saved));
    for tree in &trees {
        root.children
            .push(thing_element(forest, tree, origin, options, &saved));
    }

    let mut comments = XmlElement::new("comments");
    for node in forest.nodes().filter(|node| saved.contains(&node.id())) {
        if !node.comment().is_empty() {
            comments.children.push(
                XmlElement::new("comment")
                    .with_attr("node", node.id())
                    .with_attr("content", node.comment()),
            );
        }
    }
    root.children.push(comments);

    let mut branchpoints = XmlElement::new("branchpoints");
    for id in forest.branch_stack().iter().filter(|id| saved.contains(id)) {
        branchpoints
            .children
            .push(XmlElement::new("branchpoint").with_attr("id", id));
    }
    root.children.push(branchpoints);

    tracing::debug!(trees = trees.len(), nodes = saved.len(), "forest serialized");
    write_document(&root)
}

fn producer_version() -> String {
    format!("{} {}", PRODUCER, env!("CARGO_PKG_VERSION"))
}

fn parameters_element(
    forest: &Forest,
    options: SaveOptions,
    saved: &BTreeSet<NodeId>,
) -> XmlElement {
    let params = forest.parameters();
    let config = forest.config();
    let origin = config.document_origin();
    let created_in = if params.created_in.is_empty() {
        producer_version()
    } else {
        params.created_in.clone()
    };

    let mut element = XmlElement::new("parameters")
        .with_child(XmlElement::new("experiment").with_attr("name", &params.experiment_name))
        .with_child(XmlElement::new("createdin").with_attr("version", created_in))
        .with_child(XmlElement::new("lastsavedin").with_attr("version", producer_version()))
        .with_child(
            XmlElement::new("zeroBasedCoords").with_attr("value", config.zero_based_coordinates),
        );

    if let Some(area) = params.movement_area {
        let min = area.min.offset(origin);
        element.children.push(
            XmlElement::new("MovementArea")
                .with_attr("min.x", min.x)
                .with_attr("min.y", min.y)
                .with_attr("min.z", min.z)
                .with_attr("size.x", area.size.x)
                .with_attr("size.y", area.size.y)
                .with_attr("size.z", area.size.z),
        );
    }
    element.children.push(
        XmlElement::new("scale")
            .with_attr("x", config.scale.x)
            .with_attr("y", config.scale.y)
            .with_attr("z", config.scale.z),
    );
    element.children.push(
        XmlElement::new("RadiusLocking")
            .with_attr("enableCommentLocking", config.enable_comment_locking)
            .with_attr("lockingRadius", config.lock_radius)
            .with_attr("lockToNodesWithComment", &config.locking_comment),
    );
    if options.save_time {
        let ms = params.annotation_time_ms;
        element.children.push(
            XmlElement::new("time")
                .with_attr("ms", ms)
                .with_attr("checksum", time_checksum(ms)),
        );
    }
    if let Some(active) = forest.active_node().filter(|id| saved.contains(id)) {
        element
            .children
            .push(XmlElement::new("activeNode").with_attr("id", active));
    }
    element.children.push(
        XmlElement::new("segmentation")
            .with_attr("backgroundId", params.background_segmentation_id),
    );
    let edit = params.edit_position.offset(origin);
    element.children.push(
        XmlElement::new("editPosition")
            .with_attr("x", edit.x)
            .with_attr("y", edit.y)
            .with_attr("z", edit.z),
    );
    element.children.extend(params.view_state.iter().cloned());
    if !params.task.is_empty() {
        let mut task = XmlElement::new("task");
        task.attributes
            .extend(params.task.iter().map(|(k, v)| (k.clone(), v.clone())));
        element.children.push(task);
    }

    let catalog = forest.property_catalog();
    if !catalog.is_empty() {
        let mut properties = XmlElement::new("properties");
        for name in catalog.numeric() {
            properties.children.push(
                XmlElement::new("property")
                    .with_attr("name", name)
                    .with_attr("type", "number"),
            );
        }
        for name in catalog.textual() {
            properties.children.push(
                XmlElement::new("property")
                    .with_attr("name", name)
                    .with_attr("type", "text"),
            );
        }
        element.children.push(properties);
    }
    element
}

fn thing_element(
    forest: &Forest,
    tree: &Tree,
    origin: i32,
    options: SaveOptions,
    saved: &BTreeSet<NodeId>,
) -> XmlElement {
    let sentinel = DERIVED_COLOR_SENTINEL;
    let color = tree
        .manual_color()
        .unwrap_or(Color::new(sentinel, sentinel, sentinel, sentinel));
    let mut thing = XmlElement::new("thing")
        .with_attr("id", tree.id())
        .with_attr("visible", u8::from(tree.is_rendered()))
        .with_attr("color.r", color.r)
        .with_attr("color.g", color.g)
        .with_attr("color.b", color.b)
        .with_attr("color.a", color.a);
    append_properties(&mut thing, tree.properties(), &THING_ATTRIBUTES, false);

    let mut nodes = XmlElement::new("nodes");
    let mut edges = XmlElement::new("edges");
    for node in tree.nodes().iter().filter_map(|id| forest.find_node_by_id(*id)) {
        nodes.children.push(node_element(node, origin, options));
        for segment in node.segments().iter().filter(|s| s.is_forward()) {
            if saved.contains(&segment.target()) {
                edges.children.push(
                    XmlElement::new("edge")
                        .with_attr("source", segment.source())
                        .with_attr("target", segment.target()),
                );
            }
        }
    }
    thing.with_child(nodes).with_child(edges)
}

fn node_element(node: &Node, origin: i32, options: SaveOptions) -> XmlElement {
    let position = node.position().offset(origin);
    let mut element = XmlElement::new("node")
        .with_attr("id", node.id())
        .with_attr("radius", node.radius())
        .with_attr("x", position.x)
        .with_attr("y", position.y)
        .with_attr("z", position.z)
        .with_attr("inVp", node.viewport().code())
        .with_attr("inMag", node.magnification());
    if options.save_time {
        element = element.with_attr("time", node.time());
    }
    // Node comments go to the top-level comments block.
    append_properties(&mut element, node.properties(), &NODE_ATTRIBUTES, true);
    element
}

fn append_properties(
    element: &mut XmlElement,
    properties: &Properties,
    taken: &[&str],
    skip_comment: bool,
) {
    for (name, value) in properties {
        if skip_comment && name == COMMENT_PROPERTY {
            continue;
        }
        if taken.contains(&name.as_str()) {
            tracing::warn!(
                property = %name,
                element = %element.name,
                "property shadows a format attribute and is not written"
            );
            continue;
        }
        element.attributes.push((name.clone(), value.to_string()));
    }
}

// =============================================================================
// LOAD
// =============================================================================

/// Load an NML document into `forest`.
///
/// Without `merge` the forest is replaced by the document and document IDs
/// are kept. With `merge` the document is added to the existing forest under
/// new IDs. On error the forest is left untouched.
pub fn load_nml(
    forest: &mut Forest,
    document: &str,
    merge: bool,
) -> Result<LoadReport, ArborError> {
    if document.len() > MAX_DOCUMENT_SIZE {
        return Err(ArborError::MalformedDocument(format!(
            "document of {} bytes exceeds the {} byte limit",
            document.len(),
            MAX_DOCUMENT_SIZE
        )));
    }
    let root = parse_document(document)?;
    if root.name != NML_ROOT {
        return Err(ArborError::MalformedDocument(format!(
            "root element is '{}', expected '{}'",
            root.name, NML_ROOT
        )));
    }

    let mut report = LoadReport::default();
    let parsed = ParsedDocument::read(&root, &mut report)?;

    let mut staging = if merge {
        forest.clone()
    } else {
        Forest::with_config(forest.config().clone())
    };
    apply(&mut staging, parsed, merge, &mut report)?;

    let notifier = std::mem::take(&mut forest.notifier);
    *forest = staging;
    forest.notifier = notifier;
    forest.notifier.publish(ForestEvent::Reset);

    if !report.unknown_elements.is_empty() || !report.unknown_attributes.is_empty() {
        tracing::info!(
            elements = ?report.unknown_elements,
            attributes = ?report.unknown_attributes,
            "unknown document content ignored"
        );
    }
    tracing::info!(
        trees = report.trees_loaded(),
        nodes = report.nodes_loaded(),
        edges = report.edges,
        merge,
        "document loaded"
    );
    Ok(report)
}

// =============================================================================
// PASS 1: DOCUMENT RECORDS
// =============================================================================

#[derive(Debug, Default)]
struct ParsedDocument {
    parameters: ParsedParameters,
    trees: Vec<ParsedTree>,
    comments: Vec<(u64, String)>,
    branchpoints: Vec<u64>,
}

#[derive(Debug, Default)]
struct ParsedParameters {
    experiment: Option<String>,
    created_in: Option<String>,
    last_saved_in: Option<String>,
    zero_based: bool,
    movement_area: Option<MovementArea>,
    scale: Option<FloatCoordinate>,
    locking: Option<ParsedLocking>,
    time: Option<(u64, Option<String>)>,
    active_node: Option<u64>,
    background_id: Option<u64>,
    edit_position: Option<Coordinate>,
    view_state: Vec<XmlElement>,
    task: BTreeMap<String, String>,
    properties: Vec<(String, bool)>,
}

#[derive(Debug)]
struct ParsedLocking {
    enabled: Option<bool>,
    radius: Option<f32>,
    comment: Option<String>,
}

#[derive(Debug)]
struct ParsedTree {
    id: u64,
    visible: bool,
    color: Option<Color>,
    properties: Properties,
    nodes: Vec<ParsedNode>,
    edges: Vec<(u64, u64)>,
}

#[derive(Debug)]
struct ParsedNode {
    id: u64,
    radius: Option<f32>,
    position: Coordinate,
    viewport: Viewport,
    magnification: u32,
    time: u64,
    properties: Properties,
}

impl ParsedDocument {
    fn read(root: &XmlElement, report: &mut LoadReport) -> Result<Self, ArborError> {
        let mut document = Self::default();
        for child in &root.children {
            match child.name.as_str() {
                "parameters" => document.parameters = read_parameters(child, report)?,
                "thing" => document.trees.push(read_thing(child, report)?),
                "comments" => {
                    for comment in element_children(child, "comment", report) {
                        note_unknown_attributes(comment, &["node", "content"], report);
                        let node = required(comment, "node")?;
                        let content = comment.attr("content").unwrap_or("").to_string();
                        document.comments.push((node, content));
                    }
                }
                "branchpoints" => {
                    for point in element_children(child, "branchpoint", report) {
                        note_unknown_attributes(point, &["id"], report);
                        document.branchpoints.push(required(point, "id")?);
                    }
                }
                other => report.unknown_elements.push(other.to_string()),
            }
        }
        Ok(document)
    }
}

fn read_parameters(
    element: &XmlElement,
    report: &mut LoadReport,
) -> Result<ParsedParameters, ArborError> {
    let mut params = ParsedParameters::default();
    for child in &element.children {
        let known: &[&str] = match child.name.as_str() {
            "experiment" => {
                params.experiment = child.attr("name").map(str::to_string);
                &["name"]
            }
            "createdin" => {
                params.created_in = child.attr("version").map(str::to_string);
                &["version"]
            }
            "lastsavedin" => {
                params.last_saved_in = child.attr("version").map(str::to_string);
                &["version"]
            }
            "zeroBasedCoords" => {
                params.zero_based = child.attr("value").and_then(parse_bool).unwrap_or(false);
                &["value"]
            }
            "MovementArea" => {
                params.movement_area = read_movement_area(child, report)?;
                &[
                    "min.x", "min.y", "min.z", "size.x", "size.y", "size.z", "max.x", "max.y",
                    "max.z",
                ]
            }
            "scale" => {
                params.scale = Some(FloatCoordinate::new(
                    required(child, "x")?,
                    required(child, "y")?,
                    required(child, "z")?,
                ));
                &["x", "y", "z"]
            }
            "RadiusLocking" => {
                params.locking = Some(ParsedLocking {
                    enabled: child.attr("enableCommentLocking").and_then(parse_bool),
                    radius: optional(child, "lockingRadius", report),
                    comment: child.attr("lockToNodesWithComment").map(str::to_string),
                });
                &["enableCommentLocking", "lockingRadius", "lockToNodesWithComment"]
            }
            "time" => {
                let checksum = child.attr("checksum").map(str::to_string);
                params.time = Some((required(child, "ms")?, checksum));
                &["ms", "checksum"]
            }
            "activeNode" => {
                params.active_node = optional(child, "id", report);
                &["id"]
            }
            "segmentation" => {
                params.background_id = optional(child, "backgroundId", report);
                &["backgroundId"]
            }
            "editPosition" => {
                params.edit_position = Some(Coordinate::new(
                    required(child, "x")?,
                    required(child, "y")?,
                    required(child, "z")?,
                ));
                &["x", "y", "z"]
            }
            "task" => {
                params.task = child.attributes.iter().cloned().collect();
                continue;
            }
            "properties" => {
                for property in element_children(child, "property", report) {
                    note_unknown_attributes(property, &["name", "type"], report);
                    let name = property.attr("name").ok_or_else(|| {
                        ArborError::MalformedDocument("<property> is missing 'name'".to_string())
                    })?;
                    let numeric = property.attr("type") == Some("number");
                    params.properties.push((name.to_string(), numeric));
                }
                continue;
            }
            name if PASSTHROUGH_PARAMETERS.contains(&name) => {
                params.view_state.push(child.clone());
                continue;
            }
            other => {
                report.unknown_elements.push(format!("parameters/{}", other));
                continue;
            }
        };
        note_unknown_attributes(child, known, report);
    }
    Ok(params)
}

fn read_movement_area(
    element: &XmlElement,
    report: &mut LoadReport,
) -> Result<Option<MovementArea>, ArborError> {
    let Some(min) = coordinate(element, ["min.x", "min.y", "min.z"])? else {
        report.warn("MovementArea without min corner ignored".to_string());
        return Ok(None);
    };
    if let Some(size) = coordinate(element, ["size.x", "size.y", "size.z"])? {
        return Ok(Some(MovementArea { min, size }));
    }
    // legacy documents carry an inclusive max corner instead of a size
    if let Some(max) = coordinate(element, ["max.x", "max.y", "max.z"])? {
        let size = Coordinate::new(max.x - min.x + 1, max.y - min.y + 1, max.z - min.z + 1);
        return Ok(Some(MovementArea { min, size }));
    }
    report.warn("MovementArea without size or max corner ignored".to_string());
    Ok(None)
}

fn read_thing(element: &XmlElement, report: &mut LoadReport) -> Result<ParsedTree, ArborError> {
    let id = required(element, "id")?;
    let visible = match element.attr("visible") {
        None => true,
        Some(raw) => parse_bool(raw).unwrap_or_else(|| {
            report.warn(format!("tree {}: invalid visible=\"{}\", assuming visible", id, raw));
            true
        }),
    };
    let channel = |key: &str| element.attr(key).and_then(|v| v.trim().parse::<f32>().ok());
    let color = match (channel("color.r"), channel("color.g"), channel("color.b")) {
        (Some(r), Some(g), Some(b)) if r >= 0.0 && g >= 0.0 && b >= 0.0 => {
            let a = channel("color.a").filter(|a| *a >= 0.0).unwrap_or(1.0);
            Some(Color::new(r, g, b, a))
        }
        _ => None,
    };

    let mut tree = ParsedTree {
        id,
        visible,
        color,
        properties: extra_properties(element, &THING_ATTRIBUTES),
        nodes: Vec::new(),
        edges: Vec::new(),
    };
    for child in &element.children {
        match child.name.as_str() {
            "nodes" => {
                for node in element_children(child, "node", report) {
                    tree.nodes.push(read_node(node, report)?);
                }
            }
            "edges" => {
                for edge in element_children(child, "edge", report) {
                    note_unknown_attributes(edge, &["source", "target"], report);
                    tree.edges
                        .push((required(edge, "source")?, required(edge, "target")?));
                }
            }
            other => report.unknown_elements.push(format!("thing/{}", other)),
        }
    }
    Ok(tree)
}

fn read_node(element: &XmlElement, report: &mut LoadReport) -> Result<ParsedNode, ArborError> {
    let id = required(element, "id")?;
    let radius = match element.attr("radius") {
        None => None,
        Some(raw) => match raw.trim().parse::<f32>() {
            Ok(radius) if is_valid_radius(radius) => Some(radius),
            _ => {
                report.warn(format!("node {}: invalid radius \"{}\", using the default", id, raw));
                None
            }
        },
    };
    Ok(ParsedNode {
        id,
        radius,
        position: Coordinate::new(
            required(element, "x")?,
            required(element, "y")?,
            required(element, "z")?,
        ),
        viewport: Viewport::from_code(optional(element, "inVp", report).unwrap_or(0)),
        magnification: optional(element, "inMag", report).unwrap_or(1),
        time: optional(element, "time", report).unwrap_or(0),
        properties: extra_properties(element, &NODE_ATTRIBUTES),
    })
}

// =============================================================================
// PASS 2: APPLY
// =============================================================================

/// Participants of one cleft tree, by document IDs.
#[derive(Debug, Default)]
struct SynapseRefs {
    pre: Option<u64>,
    post: Option<u64>,
}

fn apply(
    staging: &mut Forest,
    document: ParsedDocument,
    merge: bool,
    report: &mut LoadReport,
) -> Result<(), ArborError> {
    let ParsedDocument {
        parameters,
        trees,
        comments,
        branchpoints,
    } = document;
    let origin = if parameters.zero_based { 0 } else { 1 };
    let previously_active = staging.active_node();

    apply_parameters(staging, &parameters, origin, merge, report);
    for (name, numeric) in &parameters.properties {
        staging.register_property(name, *numeric);
    }

    // First pass: trees and nodes. Everything that references other
    // entities is buffered.
    let default_radius = staging.config().default_node_radius;
    let mut edges: Vec<(u64, u64)> = Vec::new();
    let mut clefts: BTreeMap<u64, SynapseRefs> = BTreeMap::new();
    let mut synaptic: Vec<(u64, &'static str, u64)> = Vec::new();

    for mut tree in trees {
        let is_cleft = tree.properties.remove(SYNAPTIC_CLEFT_PROPERTY).is_some();
        let requested = (!merge).then_some(TreeId(tree.id));
        let id = staging.add_tree(requested, tree.color, tree.properties)?;
        if !tree.visible {
            staging.set_tree_render(id, false)?;
        }
        if report.tree_ids.insert(tree.id, id).is_some() {
            report.warn(format!("tree ID {} appears more than once", tree.id));
        }
        if is_cleft {
            clefts.insert(tree.id, SynapseRefs::default());
        }

        for mut node in tree.nodes {
            for role in [PRE_SYNAPSE_PROPERTY, POST_SYNAPSE_PROPERTY] {
                if let Some(cleft) = node.properties.remove(role) {
                    match cleft.as_number() {
                        Some(cleft) if cleft >= 0.0 => synaptic.push((node.id, role, cleft as u64)),
                        _ => report.warn(format!(
                            "node {}: invalid {} \"{}\"",
                            node.id, role, cleft
                        )),
                    }
                }
            }
            let mut spec = NodeSpec::new(id, node.position.offset(-origin))
                .with_radius(node.radius.unwrap_or(default_radius))
                .in_viewport(node.viewport, node.magnification)
                .at_time(node.time)
                .with_properties(node.properties);
            if !merge {
                spec = spec.with_id(NodeId(node.id));
            }
            let created = staging.add_node(spec)?;
            if report.node_ids.insert(node.id, created).is_some() {
                report.warn(format!("node ID {} appears more than once", node.id));
            }
        }
        edges.extend(tree.edges);
    }

    // Second pass: resolve buffered references through the ID maps.
    for (source, target) in edges {
        let resolved = (report.node_ids.get(&source), report.node_ids.get(&target));
        match resolved {
            (Some(s), Some(t)) => match staging.add_segment(*s, *t) {
                Ok(_) => report.edges += 1,
                Err(e) => report.warn(format!("edge {} -> {} skipped: {}", source, target, e)),
            },
            _ => report.warn(format!("edge {} -> {} references a missing node", source, target)),
        }
    }
    for (node, content) in comments {
        match report.node_ids.get(&node).copied() {
            Some(id) => staging.set_comment(EntityRef::Node(id), &content)?,
            None => report.warn(format!("comment for missing node {}", node)),
        }
    }
    for node in branchpoints {
        match report.node_ids.get(&node).copied() {
            Some(id) => {
                staging.push_branch_node(id)?;
            }
            None => report.warn(format!("branch point for missing node {}", node)),
        }
    }
    link_synapses(staging, clefts, synaptic, report);

    let document_active = parameters
        .active_node
        .and_then(|id| report.node_ids.get(&id).copied());
    if let Some(active) = document_active {
        if !merge || previously_active.is_none() {
            staging.set_active_node(Some(active))?;
        }
    }
    if merge {
        tracing::debug!(
            trees = report.trees_loaded(),
            nodes = report.nodes_loaded(),
            "merged document entities received new IDs"
        );
    }
    Ok(())
}

fn apply_parameters(
    staging: &mut Forest,
    parameters: &ParsedParameters,
    origin: i32,
    merge: bool,
    report: &mut LoadReport,
) {
    if let Some((ms, Some(checksum))) = &parameters.time {
        if !verify_time_checksum(*ms, checksum) {
            report.warn(format!("annotation time {} ms does not match its checksum", ms));
        }
    }

    if merge {
        let current = &staging.parameters().experiment_name;
        if let Some(incoming) = parameters.experiment.as_ref() {
            if !current.is_empty() && current != incoming {
                report.warn(format!(
                    "merging annotation of experiment '{}' into '{}'",
                    incoming, current
                ));
            }
        }
        return;
    }

    if let Some(scale) = parameters.scale {
        staging.config.scale = scale;
    }
    if let Some(locking) = &parameters.locking {
        if let Some(enabled) = locking.enabled {
            staging.config.enable_comment_locking = enabled;
        }
        if let Some(radius) = locking.radius {
            staging.config.lock_radius = radius;
        }
        if let Some(comment) = &locking.comment {
            staging.config.locking_comment = comment.clone();
        }
    }
    staging.params = ForestParameters {
        experiment_name: parameters
            .experiment
            .clone()
            .unwrap_or_else(|| staging.config.experiment_name.clone()),
        created_in: parameters.created_in.clone().unwrap_or_default(),
        last_saved_in: parameters.last_saved_in.clone().unwrap_or_default(),
        movement_area: parameters.movement_area.map(|area| MovementArea {
            min: area.min.offset(-origin),
            size: area.size,
        }),
        annotation_time_ms: parameters.time.as_ref().map_or(0, |(ms, _)| *ms),
        background_segmentation_id: parameters.background_id.unwrap_or(0),
        edit_position: parameters
            .edit_position
            .map(|p| p.offset(-origin))
            .unwrap_or_default(),
        task: parameters.task.clone(),
        view_state: parameters.view_state.clone(),
    };
}

/// Rebuild synapses from cleft markers and participant properties.
fn link_synapses(
    staging: &mut Forest,
    mut clefts: BTreeMap<u64, SynapseRefs>,
    synaptic: Vec<(u64, &'static str, u64)>,
    report: &mut LoadReport,
) {
    for (node, role, cleft) in synaptic {
        let Some(refs) = clefts.get_mut(&cleft) else {
            report.warn(format!("node {} names {} which is not a synaptic cleft", node, cleft));
            continue;
        };
        let slot = if role == PRE_SYNAPSE_PROPERTY {
            &mut refs.pre
        } else {
            &mut refs.post
        };
        if slot.replace(node).is_some() {
            report.warn(format!("cleft {} has more than one {} node", cleft, role));
        }
    }
    for (cleft, refs) in clefts {
        let tree = report.tree_ids.get(&cleft).copied();
        let pre = refs.pre.and_then(|id| report.node_ids.get(&id).copied());
        let post = refs.post.and_then(|id| report.node_ids.get(&id).copied());
        if let Err(e) = staging.link_synapse(pre, post, tree) {
            report.warn(format!("synapse of cleft {} dropped: {}", cleft, e));
        }
    }
}

// =============================================================================
// ATTRIBUTE HELPERS
// =============================================================================

fn required<T: FromStr>(element: &XmlElement, key: &str) -> Result<T, ArborError> {
    let raw = element.attr(key).ok_or_else(|| {
        ArborError::MalformedDocument(format!("<{}> is missing '{}'", element.name, key))
    })?;
    raw.trim().parse().map_err(|_| {
        ArborError::MalformedDocument(format!("<{}> has invalid {}=\"{}\"", element.name, key, raw))
    })
}

fn optional<T: FromStr>(element: &XmlElement, key: &str, report: &mut LoadReport) -> Option<T> {
    let raw = element.attr(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            report.warn(format!("<{}> has invalid {}=\"{}\", ignored", element.name, key, raw));
            None
        }
    }
}

/// All three keys or none; anything in between is malformed.
fn coordinate(element: &XmlElement, keys: [&str; 3]) -> Result<Option<Coordinate>, ArborError> {
    if keys.iter().all(|key| element.attr(key).is_none()) {
        return Ok(None);
    }
    Ok(Some(Coordinate::new(
        required(element, keys[0])?,
        required(element, keys[1])?,
        required(element, keys[2])?,
    )))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn extra_properties(element: &XmlElement, known: &[&str]) -> Properties {
    element
        .attributes
        .iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), PropertyValue::text(value.as_str())))
        .collect()
}

/// Children named `name`; everything else is reported as unknown.
fn element_children<'a>(
    element: &'a XmlElement,
    name: &str,
    report: &mut LoadReport,
) -> Vec<&'a XmlElement> {
    let (matching, others): (Vec<&XmlElement>, Vec<&XmlElement>) =
        element.children.iter().partition(|c| c.name == name);
    for other in others {
        report
            .unknown_elements
            .push(format!("{}/{}", element.name, other.name));
    }
    matching
}

fn note_unknown_attributes(element: &XmlElement, known: &[&str], report: &mut LoadReport) {
    for (key, _) in &element.attributes {
        if !known.contains(&key.as_str()) {
            report
                .unknown_attributes
                .push(format!("{}@{}", element.name, key));
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestConfig;

    fn sample() -> (Forest, Vec<NodeId>) {
        let mut forest = Forest::new();
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let nodes: Vec<NodeId> = [(10, 10, 10), (20, 10, 10), (20, 30, 10)]
            .into_iter()
            .map(|(x, y, z)| {
                forest
                    .add_node(NodeSpec::new(tree, Coordinate::new(x, y, z)).at_time(7))
                    .expect("node")
            })
            .collect();
        forest.add_segment(nodes[0], nodes[1]).expect("segment");
        forest.add_segment(nodes[1], nodes[2]).expect("segment");
        forest
            .set_comment(EntityRef::Node(nodes[2]), "ending & \"quoted\"")
            .expect("comment");
        forest.push_branch_node(nodes[1]).expect("push");
        forest.set_active_node(Some(nodes[2])).expect("activate");
        (forest, nodes)
    }

    #[test]
    fn round_trip_preserves_structure() {
        let (forest, nodes) = sample();
        let text = save_nml(&forest, SaveOptions::default()).expect("save");

        let mut loaded = Forest::new();
        let report = load_nml(&mut loaded, &text, false).expect("load");

        assert!(report.is_clean(), "unexpected report: {:?}", report);
        assert_eq!(loaded.node_count(), 3);
        assert_eq!(loaded.edge_count(), 2);
        assert_eq!(loaded.active_node(), Some(nodes[2]));
        assert_eq!(loaded.branch_stack(), &[nodes[1]]);
        let node = loaded.find_node_by_id(nodes[2]).expect("node");
        assert_eq!(node.position(), Coordinate::new(20, 30, 10));
        assert_eq!(node.comment(), "ending & \"quoted\"");
        assert_eq!(node.time(), 7);
        assert!(loaded.verify_integrity().is_ok());
    }

    #[test]
    fn legacy_documents_are_one_based() {
        let doc = r#"<things>
              <thing id="4">
                <nodes><node id="9" radius="2" x="1" y="1" z="1"/></nodes>
              </thing>
            </things>"#;
        let mut forest = Forest::new();
        load_nml(&mut forest, doc, false).expect("load");
        let node = forest.find_node_by_id(NodeId(9)).expect("node");
        assert_eq!(node.position(), Coordinate::new(0, 0, 0));
        assert_eq!(node.tree(), TreeId(4));
    }

    #[test]
    fn zero_based_output_is_not_shifted() {
        let config = ForestConfig {
            zero_based_coordinates: true,
            ..ForestConfig::default()
        };
        let mut forest = Forest::with_config(config);
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        forest
            .add_node(NodeSpec::new(tree, Coordinate::new(5, 6, 7)))
            .expect("node");

        let text = save_nml(&forest, SaveOptions::default()).expect("save");
        assert!(text.contains(r#"x="5" y="6" z="7""#));
        assert!(text.contains(r#"<zeroBasedCoords value="true"/>"#));

        let mut loaded = Forest::new();
        load_nml(&mut loaded, &text, false).expect("load");
        let node = loaded.nodes().next().expect("node");
        assert_eq!(node.position(), Coordinate::new(5, 6, 7));
    }

    #[test]
    fn merge_reassigns_ids() {
        let (forest, _) = sample();
        let text = save_nml(&forest, SaveOptions::default()).expect("save");

        let mut target = forest.clone();
        let report = load_nml(&mut target, &text, true).expect("merge");

        assert_eq!(target.node_count(), 6);
        assert_eq!(target.tree_count(), 2);
        assert_eq!(report.nodes_loaded(), 3);
        for (old, new) in &report.node_ids {
            assert_ne!(NodeId(*old), *new);
        }
        // the existing active node is kept on merge
        assert_eq!(target.active_node(), forest.active_node());
        assert!(target.verify_integrity().is_ok());
    }

    #[test]
    fn malformed_document_leaves_forest_untouched() {
        let (mut forest, _) = sample();
        let before = forest.node_count();
        let doc = concat!(
            r#"<things><thing id="1"><nodes>"#,
            r#"<node id="1" x="oops" y="0" z="0"/>"#,
            r#"</nodes></thing></things>"#
        );

        let result = load_nml(&mut forest, doc, false);

        assert!(matches!(result, Err(ArborError::MalformedDocument(_))));
        assert_eq!(forest.node_count(), before);
    }

    #[test]
    fn wrong_root_is_rejected() {
        let mut forest = Forest::new();
        assert!(matches!(
            load_nml(&mut forest, "<skeleton/>", false),
            Err(ArborError::MalformedDocument(_))
        ));
    }

    #[test]
    fn unknown_content_is_reported() {
        let doc = r#"<things>
              <parameters><mystery a="1"/><scale x="1" y="1" z="1" w="2"/></parameters>
              <thing id="1">
                <nodes><node id="1" x="1" y="1" z="1" celltype="granule"/></nodes>
                <edges><edge source="1" target="77" weight="3"/></edges>
              </thing>
              <extras/>
            </things>"#;
        let mut forest = Forest::new();
        let report = load_nml(&mut forest, doc, false).expect("load");

        assert!(report.unknown_elements.contains(&"parameters/mystery".to_string()));
        assert!(report.unknown_elements.contains(&"extras".to_string()));
        assert!(report.unknown_attributes.contains(&"scale@w".to_string()));
        assert!(report.unknown_attributes.contains(&"edge@weight".to_string()));
        assert_eq!(report.warnings.len(), 1, "dangling edge: {:?}", report.warnings);
        let node = forest.find_node_by_id(NodeId(1)).expect("node");
        assert_eq!(
            node.properties().get("celltype"),
            Some(&PropertyValue::text("granule"))
        );
    }

    #[test]
    fn legacy_movement_area_uses_inclusive_max() {
        let doc = r#"<things><parameters>
              <MovementArea min.x="1" min.y="1" min.z="1" max.x="100" max.y="50" max.z="10"/>
            </parameters></things>"#;
        let mut forest = Forest::new();
        load_nml(&mut forest, doc, false).expect("load");
        let area = forest.parameters().movement_area.expect("area");
        assert_eq!(area.min, Coordinate::new(0, 0, 0));
        assert_eq!(area.size, Coordinate::new(100, 50, 10));
    }

    #[test]
    fn time_checksum_mismatch_is_a_warning() {
        let doc = r#"<things><parameters><time ms="1000" checksum="abc"/></parameters></things>"#;
        let mut forest = Forest::new();
        let report = load_nml(&mut forest, doc, false).expect("load");
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(forest.parameters().annotation_time_ms, 1000);
    }

    #[test]
    fn invalid_radius_falls_back_to_default() {
        let doc = r#"<things><thing id="1"><nodes>
              <node id="1" radius="-3" x="1" y="1" z="1"/>
            </nodes></thing></things>"#;
        let mut forest = Forest::new();
        let report = load_nml(&mut forest, doc, false).expect("load");
        let node = forest.find_node_by_id(NodeId(1)).expect("node");
        assert_eq!(node.radius(), forest.config().default_node_radius);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn only_selected_trees_are_saved() {
        let (mut forest, nodes) = sample();
        let other = forest.add_tree(None, None, Properties::new()).expect("tree");
        let stray = forest
            .add_node(NodeSpec::new(other, Coordinate::new(1, 1, 1)))
            .expect("node");
        forest.add_segment(nodes[0], stray).expect("cross edge");

        let options = SaveOptions {
            only_selected: true,
            save_time: false,
        };
        let text = save_nml(&forest, options).expect("save");

        let mut loaded = Forest::new();
        let report = load_nml(&mut loaded, &text, false).expect("load");
        assert_eq!(loaded.tree_count(), 1);
        assert!(loaded.find_node_by_id(stray).is_none());
        assert!(report.warnings.is_empty());
        assert!(!text.contains("<time "));
    }

    #[test]
    fn synapses_survive_round_trip() {
        let (mut forest, nodes) = sample();
        forest.add_synapse(nodes[0], nodes[2], None).expect("synapse");
        let text = save_nml(&forest, SaveOptions::default()).expect("save");

        let mut loaded = Forest::new();
        let report = load_nml(&mut loaded, &text, true).expect("load");

        let synapse = loaded.synapses().next().expect("synapse");
        assert_eq!(synapse.pre(), report.node_ids.get(&nodes[0].0).copied());
        assert_eq!(synapse.post(), report.node_ids.get(&nodes[2].0).copied());
        let cleft = loaded.find_tree_by_id(synapse.cleft()).expect("cleft");
        assert!(cleft.is_synaptic_cleft());
        assert!(loaded.verify_integrity().is_ok());
    }
}

//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands. Every
//! command reads NML files into an in-memory [`Forest`], works on it and, for
//! editing commands, writes the result back.

use arbor_core::primitives::MAX_DOCUMENT_SIZE;
use arbor_core::{
    ArborError, Coordinate, Forest, ForestConfig, LoadReport, NodeId, SaveOptions, TreeId,
    load_nml, save_nml,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE HANDLING
// =============================================================================

/// Validate file path and size before reading.
///
/// Canonicalizes the path, requires a regular file and rejects files larger
/// than the codec accepts.
fn validate_input_file(path: &Path) -> Result<PathBuf, ArborError> {
    let canonical = path.canonicalize().map_err(|e| {
        ArborError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(ArborError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| ArborError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > MAX_DOCUMENT_SIZE as u64 {
        return Err(ArborError::MalformedDocument(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_DOCUMENT_SIZE
        )));
    }
    Ok(canonical)
}

/// Validate output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, ArborError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        ArborError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    if !canonical_parent.is_dir() {
        return Err(ArborError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| ArborError::IoError("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

/// Read forest settings from a TOML file, or the defaults.
pub fn load_config(path: Option<&Path>) -> Result<ForestConfig, ArborError> {
    let Some(path) = path else {
        return Ok(ForestConfig::default());
    };
    let path = validate_input_file(path)?;
    let content = std::fs::read_to_string(&path)
        .map_err(|e| ArborError::IoError(format!("Read config: {}", e)))?;
    let config: ForestConfig = toml::from_str(&content)
        .map_err(|e| ArborError::ConfigError(format!("{}: {}", path.display(), e)))?;
    config.validate()?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Load an NML file into a fresh forest.
pub fn read_forest(path: &Path, config: &ForestConfig) -> Result<(Forest, LoadReport), ArborError> {
    let mut forest = Forest::with_config(config.clone());
    let report = merge_file(&mut forest, path, false)?;
    Ok((forest, report))
}

fn merge_file(forest: &mut Forest, path: &Path, merge: bool) -> Result<LoadReport, ArborError> {
    let path = validate_input_file(path)?;
    let document = std::fs::read_to_string(&path)
        .map_err(|e| ArborError::IoError(format!("Read '{}': {}", path.display(), e)))?;
    let report = load_nml(forest, &document, merge)?;
    for warning in &report.warnings {
        tracing::warn!(file = %path.display(), "{}", warning);
    }
    Ok(report)
}

/// Save the whole forest as an NML file.
pub fn write_forest(forest: &Forest, path: &Path) -> Result<(), ArborError> {
    let path = validate_output_path(path)?;
    let document = save_nml(forest, SaveOptions::default())?;
    std::fs::write(&path, document)
        .map_err(|e| ArborError::IoError(format!("Write '{}': {}", path.display(), e)))?;
    tracing::info!(path = %path.display(), "forest written");
    Ok(())
}

fn print_json(output: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(output).unwrap_or_default()
    );
}

// =============================================================================
// STATS COMMAND
// =============================================================================

/// Summary of a forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForestStats {
    pub experiment: String,
    pub trees: usize,
    pub nodes: usize,
    pub edges: usize,
    pub components: usize,
    pub comments: usize,
    pub branch_points: usize,
    pub synapses: usize,
    pub active_node: Option<u64>,
    pub active_tree: Option<u64>,
}

impl ForestStats {
    #[must_use]
    pub fn of(forest: &Forest) -> Self {
        Self {
            experiment: forest.parameters().experiment_name.clone(),
            trees: forest.tree_count(),
            nodes: forest.node_count(),
            edges: forest.edge_count(),
            components: forest.component_count(),
            comments: forest.nodes().filter(|n| !n.comment().is_empty()).count(),
            branch_points: forest.branch_stack().len(),
            synapses: forest.synapses().count(),
            active_node: forest.active_node().map(|id| id.0),
            active_tree: forest.active_tree().map(|id| id.0),
        }
    }
}

/// Summarize an NML file.
pub fn cmd_stats(file: &Path, config: &ForestConfig, json_mode: bool) -> Result<(), ArborError> {
    let (forest, _) = read_forest(file, config)?;
    let stats = ForestStats::of(&forest);

    if json_mode {
        print_json(&serde_json::json!({
            "file": file.to_string_lossy(),
            "stats": stats,
        }));
        return Ok(());
    }

    println!("Arbor Forest Statistics");
    println!("=======================");
    println!("File:          {}", file.display());
    println!("Experiment:    {}", stats.experiment);
    println!();
    println!("Trees:         {}", stats.trees);
    println!("Nodes:         {}", stats.nodes);
    println!("Edges:         {}", stats.edges);
    println!("Components:    {}", stats.components);
    println!("Comments:      {}", stats.comments);
    println!("Branch points: {}", stats.branch_points);
    println!("Synapses:      {}", stats.synapses);
    if let Some(active) = stats.active_node {
        println!("Active node:   {}", active);
    }
    Ok(())
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

/// Load an NML file and audit it.
///
/// Fails on invariant violations; with `strict` also on anything the loader
/// had to skip or did not understand.
pub fn cmd_validate(
    file: &Path,
    config: &ForestConfig,
    json_mode: bool,
    strict: bool,
) -> Result<(), ArborError> {
    let (forest, report) = read_forest(file, config)?;
    let violations = forest.integrity_violations();

    if json_mode {
        print_json(&serde_json::json!({
            "file": file.to_string_lossy(),
            "valid": violations.is_empty() && (!strict || report.is_clean()),
            "violations": violations,
            "warnings": report.warnings,
            "unknown_elements": report.unknown_elements,
            "unknown_attributes": report.unknown_attributes,
        }));
    } else {
        println!("Validating {}", file.display());
        for warning in &report.warnings {
            println!("  warning: {}", warning);
        }
        for element in &report.unknown_elements {
            println!("  unknown element: {}", element);
        }
        for attribute in &report.unknown_attributes {
            println!("  unknown attribute: {}", attribute);
        }
        for violation in &violations {
            println!("  violation: {}", violation);
        }
    }

    if let Some(first) = violations.into_iter().next() {
        return Err(ArborError::InvariantViolation(first));
    }
    if strict && !report.is_clean() {
        return Err(ArborError::MalformedDocument(format!(
            "{} warnings, {} unknown elements, {} unknown attributes",
            report.warnings.len(),
            report.unknown_elements.len(),
            report.unknown_attributes.len()
        )));
    }
    if !json_mode {
        println!("OK: {} trees, {} nodes", forest.tree_count(), forest.node_count());
    }
    Ok(())
}

// =============================================================================
// MERGE COMMAND
// =============================================================================

/// Combine NML files. The first file keeps its IDs; later files are
/// renumbered.
pub fn cmd_merge(
    inputs: &[PathBuf],
    output: &Path,
    config: &ForestConfig,
    json_mode: bool,
) -> Result<(), ArborError> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| ArborError::IoError("No input files given".to_string()))?;
    let (mut forest, _) = read_forest(first, config)?;
    for input in rest {
        let report = merge_file(&mut forest, input, true)?;
        tracing::info!(
            file = %input.display(),
            trees = report.trees_loaded(),
            nodes = report.nodes_loaded(),
            "file merged"
        );
    }
    write_forest(&forest, output)?;

    if json_mode {
        print_json(&serde_json::json!({
            "output": output.to_string_lossy(),
            "inputs": inputs.len(),
            "trees": forest.tree_count(),
            "nodes": forest.node_count(),
        }));
    } else {
        println!(
            "Merged {} files into {} ({} trees, {} nodes)",
            inputs.len(),
            output.display(),
            forest.tree_count(),
            forest.node_count()
        );
    }
    Ok(())
}

// =============================================================================
// SPLIT COMMAND
// =============================================================================

/// Move the component of `node` into its own tree and save the result.
///
/// Returns the new tree, or `None` if the component already was a whole tree
/// (nothing is written then).
pub fn cmd_split(
    file: &Path,
    node: u64,
    output: &Path,
    config: &ForestConfig,
    json_mode: bool,
) -> Result<Option<TreeId>, ArborError> {
    let (mut forest, _) = read_forest(file, config)?;
    let extracted = forest.extract_connected_component(NodeId(node))?;
    if extracted.is_some() {
        write_forest(&forest, output)?;
    }

    if json_mode {
        print_json(&serde_json::json!({
            "node": node,
            "extracted_tree": extracted.map(|id| id.0),
        }));
    } else {
        match extracted {
            Some(tree) => println!("Component of node {} moved to tree {}", node, tree),
            None => println!("Component of node {} already is a whole tree", node),
        }
    }
    Ok(extracted)
}

// =============================================================================
// QUERY COMMANDS
// =============================================================================

/// Print the shortest path between two nodes.
pub fn cmd_path(
    file: &Path,
    from: u64,
    to: u64,
    config: &ForestConfig,
    json_mode: bool,
) -> Result<Vec<NodeId>, ArborError> {
    let (forest, _) = read_forest(file, config)?;
    let path = forest.shortest_path(NodeId(from), NodeId(to))?;

    if json_mode {
        let ids: Vec<u64> = path.iter().map(|id| id.0).collect();
        print_json(&serde_json::json!({
            "from": from,
            "to": to,
            "path": ids,
            "hops": path.len().saturating_sub(1),
        }));
    } else if path.is_empty() {
        println!("Nodes {} and {} are not connected", from, to);
    } else {
        let rendered: Vec<String> = path.iter().map(ToString::to_string).collect();
        println!("{} ({} hops)", rendered.join(" -> "), path.len() - 1);
    }
    Ok(path)
}

/// Print the node closest to a position.
pub fn cmd_nearest(
    file: &Path,
    position: [i32; 3],
    tree: Option<u64>,
    config: &ForestConfig,
    json_mode: bool,
) -> Result<Option<NodeId>, ArborError> {
    let (forest, _) = read_forest(file, config)?;
    let position = Coordinate::new(position[0], position[1], position[2]);
    let nearest = forest.find_nearby_node(tree.map(TreeId), position);
    let record = nearest.and_then(|id| forest.find_node_by_id(id));

    if json_mode {
        print_json(&serde_json::json!({
            "position": [position.x, position.y, position.z],
            "node": nearest.map(|id| id.0),
            "tree": record.map(|n| n.tree().0),
            "distance": record.map(|n| n.position().scaled_distance(position, forest.scale())),
        }));
    } else {
        match record {
            Some(node) => println!(
                "Node {} in tree {} at {} (distance {:.2})",
                node.id(),
                node.tree(),
                node.position(),
                node.position().scaled_distance(position, forest.scale())
            ),
            None => println!("The forest has no nodes"),
        }
    }
    Ok(nearest)
}

// =============================================================================
// INIT-CONFIG COMMAND
// =============================================================================

/// Write the default configuration as TOML.
pub fn cmd_init_config(output: &Path, force: bool) -> Result<(), ArborError> {
    if output.exists() && !force {
        return Err(ArborError::ConfigError(format!(
            "'{}' already exists (use --force to overwrite)",
            output.display()
        )));
    }
    let path = validate_output_path(output)?;
    let content = toml::to_string(&ForestConfig::default())
        .map_err(|e| ArborError::SerializationError(format!("Config to TOML: {}", e)))?;
    std::fs::write(&path, content)
        .map_err(|e| ArborError::IoError(format!("Write '{}': {}", path.display(), e)))?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

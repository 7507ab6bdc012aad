//! # Mutation Engine
//!
//! Structural edits of the forest: segments, node and tree deletion, merging,
//! moving nodes between trees, node geometry, tree attributes and the branch
//! stack.
//!
//! Every operation either succeeds completely or leaves the forest unchanged:
//! inputs are validated before the first write. Deletions that remove the
//! active node pick a successor so that annotation can continue in place.

use crate::events::ForestEvent;
use crate::forest::{Forest, Segment, SegmentKey, is_valid_radius};
use crate::{ArborError, Color, Coordinate, EntityKind, MeshHandle, NodeId, TreeId};
use std::collections::BTreeSet;

impl Forest {
    // =========================================================================
    // SEGMENTS
    // =========================================================================

    /// Connect two nodes with an undirected edge.
    ///
    /// Creates the forward record in `source` and its backward sister in
    /// `target`. Self loops and a second edge between the same pair (in
    /// either direction) are rejected.
    pub fn add_segment(
        &mut self,
        source: NodeId,
        target: NodeId,
    ) -> Result<SegmentKey, ArborError> {
        if source == target {
            return Err(ArborError::InvariantViolation(format!(
                "node {} cannot be connected to itself",
                source
            )));
        }
        let from = self
            .find_node_by_id(source)
            .ok_or(ArborError::missing_node(source))?;
        let to = self
            .find_node_by_id(target)
            .ok_or(ArborError::missing_node(target))?;
        if from.neighbors().any(|n| n == target) {
            return Err(ArborError::InvariantViolation(format!(
                "nodes {} and {} are already connected",
                source, target
            )));
        }
        let length = from.position().scaled_distance(to.position(), self.config.scale);

        let key = SegmentKey::forward(source, target);
        for record in [key, key.sister()] {
            let node = self.node_mut(record.owner())?;
            node.segments.push(Segment {
                source,
                target,
                length,
                forward: record.forward,
            });
            node.recompute_circ_radius();
        }
        self.notifier
            .publish(ForestEvent::SegmentAdded { source, target });
        Ok(key)
    }

    /// Remove an edge given either of its two records.
    pub fn del_segment(&mut self, key: SegmentKey) -> Result<(), ArborError> {
        let forward = SegmentKey::forward(key.source, key.target);
        if self.segment(forward).is_none() || self.segment(forward.sister()).is_none() {
            return Err(ArborError::InvalidReference {
                kind: EntityKind::Segment,
                id: key.source.0,
            });
        }
        self.detach_segment_pair(forward);
        Ok(())
    }

    /// Remove both records of an edge. Missing records are skipped.
    fn detach_segment_pair(&mut self, forward: SegmentKey) {
        for record in [forward, forward.sister()] {
            if let Some(node) = self.nodes.get_mut(&record.owner()) {
                node.segments.retain(|segment| segment.key() != record);
                node.recompute_circ_radius();
            }
        }
        self.notifier.publish(ForestEvent::SegmentRemoved {
            source: forward.source,
            target: forward.target,
        });
    }

    // =========================================================================
    // NODE DELETION
    // =========================================================================

    /// Delete a node with all its segments, comment and synapse link.
    ///
    /// If the node was active, the node it was traced from becomes active,
    /// else one it leads to, else the nearest node of its tree, else the
    /// nearest node anywhere.
    pub fn del_node(&mut self, id: NodeId) -> Result<(), ArborError> {
        self.delete_nodes(&[id])
    }

    /// Delete every selected node as one batch. Returns the number deleted.
    pub fn delete_selected_nodes(&mut self) -> Result<usize, ArborError> {
        let doomed: Vec<NodeId> = self.selected_nodes().iter().copied().collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        self.batched(|forest| forest.delete_nodes(&doomed))?;
        tracing::info!(count = doomed.len(), "deleted selected nodes");
        Ok(doomed.len())
    }

    fn delete_nodes(&mut self, ids: &[NodeId]) -> Result<(), ArborError> {
        self.remove_nodes(ids)?;
        self.reseed_selection();
        Ok(())
    }

    /// Node deletion without the selection re-seed, for callers that re-seed
    /// once after further removals.
    fn remove_nodes(&mut self, ids: &[NodeId]) -> Result<(), ArborError> {
        if let Some(missing) = ids.iter().find(|id| !self.nodes.contains_key(id)) {
            return Err(ArborError::missing_node(*missing));
        }
        let doomed: BTreeSet<NodeId> = ids.iter().copied().collect();
        let replaced_active = self.active_node().filter(|active| doomed.contains(active));
        let successor = replaced_active.and_then(|active| self.successor_of(active, &doomed));

        let touched: BTreeSet<TreeId> = ids
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|node| node.tree)
            .collect();

        for id in ids {
            self.remove_node_record(*id);
        }
        for tree in touched {
            if let Some(tree) = self.trees.get_mut(&tree) {
                tree.nodes.retain(|n| !doomed.contains(n));
            }
        }
        self.branch_stack.retain(|n| !doomed.contains(n));
        if replaced_active.is_some() {
            self.set_active_node(successor)?;
        }
        Ok(())
    }

    fn successor_of(&self, id: NodeId, excluded: &BTreeSet<NodeId>) -> Option<NodeId> {
        let node = self.find_node_by_id(id)?;
        let traced_from = node
            .segments()
            .iter()
            .filter(|segment| !segment.is_forward())
            .map(|segment| segment.source())
            .find(|n| !excluded.contains(n));
        let leads_to = node
            .segments()
            .iter()
            .filter(|segment| segment.is_forward())
            .map(|segment| segment.target())
            .find(|n| !excluded.contains(n));
        traced_from
            .or(leads_to)
            .or_else(|| self.nearest_in_tree(node.tree(), node.position(), excluded))
            .or_else(|| self.nearest_node(node.position(), excluded))
    }

    /// Drop a node with its segments and synapse link. The owning tree's
    /// node list, the branch stack and the active node are left to the caller.
    fn remove_node_record(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let edges: Vec<SegmentKey> = node
            .segments
            .iter()
            .map(|segment| SegmentKey::forward(segment.source, segment.target))
            .collect();
        let synapse = node.synapse;
        for edge in edges {
            self.detach_segment_pair(edge);
        }
        if let Some(synapse) = synapse {
            self.unlink_synaptic_node(synapse, id);
        }
        self.nodes.remove(&id);
        self.selection.nodes.remove(&id);
        self.notifier.publish(ForestEvent::NodeRemoved(id));
    }

    // =========================================================================
    // TREE DELETION & MERGING
    // =========================================================================

    /// Delete a tree and all its nodes as one batch.
    ///
    /// If it was the active tree, the tree of the successor node becomes
    /// active; failing that the next tree by ID, or the last one.
    pub fn del_tree(&mut self, id: TreeId) -> Result<(), ArborError> {
        self.batched(|forest| forest.delete_trees(&[id]))
    }

    /// Delete every selected tree as one batch. Returns the number deleted.
    pub fn delete_selected_trees(&mut self) -> Result<usize, ArborError> {
        let doomed: Vec<TreeId> = self.selected_trees().iter().copied().collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        self.batched(|forest| forest.delete_trees(&doomed))?;
        tracing::info!(count = doomed.len(), "deleted selected trees");
        Ok(doomed.len())
    }

    fn delete_trees(&mut self, ids: &[TreeId]) -> Result<(), ArborError> {
        if let Some(missing) = ids.iter().find(|id| !self.trees.contains_key(id)) {
            return Err(ArborError::missing_tree(*missing));
        }
        let nodes: Vec<NodeId> = ids
            .iter()
            .filter_map(|id| self.trees.get(id))
            .flat_map(|tree| tree.nodes.iter().copied())
            .collect();
        self.remove_nodes(&nodes)?;

        let doomed_active = self.active_tree().filter(|active| ids.contains(active));
        for id in ids {
            self.remove_tree_record(*id);
        }
        if let Some(previous) = doomed_active {
            let replacement = self
                .trees
                .range(previous..)
                .next()
                .or_else(|| self.trees.iter().next_back())
                .map(|(id, _)| *id);
            match replacement {
                Some(tree) => self.set_active_tree(tree)?,
                None => self.deactivate_tree(),
            }
        }
        self.reseed_selection();
        Ok(())
    }

    /// Drop an (emptied) tree record and its synapse role.
    pub(crate) fn remove_tree_record(&mut self, id: TreeId) {
        let Some(tree) = self.trees.remove(&id) else {
            return;
        };
        if let Some(synapse) = tree.synapse {
            self.detach_synapse(synapse);
        }
        self.selection.trees.remove(&id);
        self.notifier.publish(ForestEvent::TreeRemoved(id));
    }

    /// Move every node of `absorbed` into `survivor` and delete `absorbed`.
    ///
    /// Meshes are combined. The survivor becomes the active tree.
    pub fn merge_trees(&mut self, survivor: TreeId, absorbed: TreeId) -> Result<(), ArborError> {
        if survivor == absorbed {
            return Err(ArborError::InvariantViolation(format!(
                "tree {} cannot be merged with itself",
                survivor
            )));
        }
        if !self.trees.contains_key(&survivor) {
            return Err(ArborError::missing_tree(survivor));
        }
        let source = self.tree_mut(absorbed)?;
        let moved = std::mem::take(&mut source.nodes);
        let mesh = source.mesh.take();

        for id in &moved {
            if let Some(node) = self.nodes.get_mut(id) {
                node.tree = survivor;
            }
        }
        let target = self.tree_mut(survivor)?;
        let count = moved.len();
        target.nodes.extend(moved);
        if let Some(mesh) = mesh {
            match target.mesh.as_mut() {
                Some(existing) => existing.absorb(mesh),
                None => target.mesh = Some(mesh),
            }
        }

        self.remove_tree_record(absorbed);
        self.set_active_tree(survivor)?;
        self.notifier
            .publish(ForestEvent::TreesMerged { survivor, absorbed });
        tracing::debug!(%survivor, %absorbed, moved = count, "trees merged");
        Ok(())
    }

    /// Move the selected nodes into tree `id`.
    ///
    /// Does nothing if the tree does not exist. If the active node moves,
    /// `id` becomes the active tree. Returns the number of nodes moved.
    pub fn move_selected_nodes_to_tree(&mut self, id: TreeId) -> usize {
        if !self.trees.contains_key(&id) {
            tracing::debug!(tree = %id, "move to unknown tree ignored");
            return 0;
        }
        let moving: Vec<(NodeId, TreeId)> = self
            .selected_nodes()
            .iter()
            .filter_map(|n| self.nodes.get(n))
            .filter(|node| node.tree != id)
            .map(|node| (node.id, node.tree))
            .collect();

        for (node, from) in &moving {
            if let Some(tree) = self.trees.get_mut(from) {
                tree.nodes.retain(|n| n != node);
            }
            if let Some(tree) = self.trees.get_mut(&id) {
                tree.nodes.push(*node);
            }
            if let Some(record) = self.nodes.get_mut(node) {
                record.tree = id;
            }
            self.notifier.publish(ForestEvent::NodeChanged(*node));
        }

        let active_moved = self
            .active_node()
            .is_some_and(|active| moving.iter().any(|(n, _)| *n == active));
        if active_moved {
            self.activate_tree_only(id);
        }
        moving.len()
    }

    // =========================================================================
    // NODE & TREE ATTRIBUTES
    // =========================================================================

    /// Move and/or resize a node. Incident segment lengths follow.
    pub fn edit_node(
        &mut self,
        id: NodeId,
        position: Option<Coordinate>,
        radius: Option<f32>,
    ) -> Result<(), ArborError> {
        if let Some(radius) = radius {
            if !is_valid_radius(radius) {
                return Err(ArborError::InvariantViolation(format!(
                    "node radius must be positive and finite, got {}",
                    radius
                )));
            }
        }
        let position = match (position, self.config.dataset) {
            (Some(p), Some(dataset)) => Some(p.clamped_to(dataset.boundary)),
            (p, _) => p,
        };

        let node = self.node_mut(id)?;
        if let Some(position) = position {
            node.position = position;
        }
        if let Some(radius) = radius {
            node.radius = radius;
        }
        self.refresh_segment_lengths(id);
        self.notifier.publish(ForestEvent::NodeChanged(id));
        Ok(())
    }

    fn refresh_segment_lengths(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let position = node.position;
        let scale = self.config.scale;
        let lengths: Vec<(NodeId, f32)> = node
            .neighbors()
            .filter_map(|n| self.nodes.get(&n))
            .map(|other| (other.id, position.scaled_distance(other.position, scale)))
            .collect();

        for (neighbor, length) in &lengths {
            if let Some(other) = self.nodes.get_mut(neighbor) {
                for segment in other.segments.iter_mut().filter(|s| s.neighbor() == id) {
                    segment.length = *length;
                }
                other.recompute_circ_radius();
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            for segment in &mut node.segments {
                if let Some((_, length)) = lengths.iter().find(|(n, _)| *n == segment.neighbor()) {
                    segment.length = *length;
                }
            }
            node.recompute_circ_radius();
        }
    }

    /// Set a manual color, or return to the palette color with `None`.
    pub fn set_tree_color(&mut self, id: TreeId, color: Option<Color>) -> Result<(), ArborError> {
        self.tree_mut(id)?.color = color;
        self.notifier.publish(ForestEvent::TreeChanged(id));
        Ok(())
    }

    pub fn set_tree_render(&mut self, id: TreeId, render: bool) -> Result<(), ArborError> {
        self.tree_mut(id)?.render = render;
        self.notifier.publish(ForestEvent::TreeChanged(id));
        Ok(())
    }

    /// Attach or detach the tree's mesh. Returns the previous one.
    pub fn set_tree_mesh(
        &mut self,
        id: TreeId,
        mesh: Option<MeshHandle>,
    ) -> Result<Option<MeshHandle>, ArborError> {
        let previous = std::mem::replace(&mut self.tree_mut(id)?.mesh, mesh);
        self.notifier.publish(ForestEvent::TreeChanged(id));
        Ok(previous)
    }

    // =========================================================================
    // BRANCH STACK
    // =========================================================================

    /// Mark a node as a branch point and push it.
    ///
    /// Returns `false` if it already was one.
    pub fn push_branch_node(&mut self, id: NodeId) -> Result<bool, ArborError> {
        let node = self.node_mut(id)?;
        if node.is_branch_node {
            tracing::info!(node = %id, "node is already a branch point");
            return Ok(false);
        }
        node.is_branch_node = true;
        self.branch_stack.push(id);
        self.notifier.publish(ForestEvent::BranchPushed(id));
        Ok(true)
    }

    /// Pop the most recent branch point and make it active.
    pub fn pop_branch_node(&mut self) -> Result<Option<NodeId>, ArborError> {
        while let Some(id) = self.branch_stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            node.is_branch_node = false;
            self.notifier.publish(ForestEvent::BranchPopped(id));
            self.set_active_node(Some(id))?;
            return Ok(Some(id));
        }
        tracing::info!("no branch points remain");
        Ok(None)
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! # Selection & Active State
//!
//! Tracks the active node, the active tree, the node and tree selections and
//! the position lock.
//!
//! ## Rules
//!
//! - If a node is active, its tree is the active tree.
//! - Activating a node selects exactly that node.
//! - A selection that shrinks to one element makes it active; a selection
//!   emptied while something is active falls back to the active element.
//! - Every entity's `selected` flag mirrors membership in the selection.

use crate::events::ForestEvent;
use crate::forest::Forest;
use crate::{ArborError, Coordinate, NodeId, TreeId};
use std::collections::BTreeSet;

/// Selection and activation state of a forest.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub(crate) active_node: Option<NodeId>,
    pub(crate) active_tree: Option<TreeId>,
    pub(crate) nodes: BTreeSet<NodeId>,
    pub(crate) trees: BTreeSet<TreeId>,
}

impl Forest {
    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn active_node(&self) -> Option<NodeId> {
        self.selection.active_node
    }

    #[must_use]
    pub fn active_tree(&self) -> Option<TreeId> {
        self.selection.active_tree
    }

    #[must_use]
    pub fn selected_nodes(&self) -> &BTreeSet<NodeId> {
        &self.selection.nodes
    }

    #[must_use]
    pub fn selected_trees(&self) -> &BTreeSet<TreeId> {
        &self.selection.trees
    }

    // =========================================================================
    // ACTIVATION
    // =========================================================================

    /// Make `id` the active node, or clear the active node with `None`.
    ///
    /// Activating a node selects only that node and activates its tree.
    /// With comment locking enabled the position lock follows the node's
    /// comment.
    pub fn set_active_node(&mut self, id: Option<NodeId>) -> Result<(), ArborError> {
        let Some(id) = id else {
            if self.selection.active_node.take().is_some() {
                self.notifier.publish(ForestEvent::ActiveNodeChanged(None));
            }
            self.replace_node_selection(BTreeSet::new());
            return Ok(());
        };

        let tree = self
            .find_node_by_id(id)
            .map(|node| node.tree())
            .ok_or(ArborError::missing_node(id))?;

        if self.selection.active_node != Some(id) {
            self.selection.active_node = Some(id);
            self.notifier.publish(ForestEvent::ActiveNodeChanged(Some(id)));
        }
        self.replace_node_selection(BTreeSet::from([id]));
        self.activate_tree_only(tree);
        self.apply_comment_lock(id);
        Ok(())
    }

    /// Make `id` the active tree.
    ///
    /// An active node in another tree is replaced by the node of this tree
    /// nearest to it, or cleared if the tree is empty. Without an active
    /// node, the first node of the tree becomes active.
    pub fn set_active_tree(&mut self, id: TreeId) -> Result<(), ArborError> {
        let first = self
            .find_tree_by_id(id)
            .map(|tree| tree.nodes().first().copied())
            .ok_or(ArborError::missing_tree(id))?;

        self.activate_tree_only(id);

        let current = self
            .selection
            .active_node
            .and_then(|node| self.find_node_by_id(node))
            .map(|node| (node.tree(), node.position()));
        match current {
            Some((tree, _)) if tree == id => Ok(()),
            Some((_, position)) => {
                let nearest = self.nearest_in_tree(id, position, &BTreeSet::new());
                self.set_active_node(nearest)
            }
            None => match first {
                Some(node) => self.set_active_node(Some(node)),
                None => Ok(()),
            },
        }
    }

    /// Set the active tree and tree selection without touching the active node.
    pub(crate) fn activate_tree_only(&mut self, id: TreeId) {
        if self.selection.active_tree != Some(id) {
            self.selection.active_tree = Some(id);
            self.notifier.publish(ForestEvent::ActiveTreeChanged(Some(id)));
        }
        self.replace_tree_selection(BTreeSet::from([id]));
    }

    /// Clear the active tree. Only valid once no node is active.
    pub(crate) fn deactivate_tree(&mut self) {
        if self.selection.active_tree.take().is_some() {
            self.notifier.publish(ForestEvent::ActiveTreeChanged(None));
        }
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    /// Replace the node selection.
    ///
    /// Unknown IDs are rejected before anything changes.
    pub fn select_nodes(
        &mut self,
        ids: impl IntoIterator<Item = NodeId>,
    ) -> Result<(), ArborError> {
        let wanted = self.known_nodes(ids)?;
        self.replace_node_selection(wanted);
        self.settle_node_selection()
    }

    /// Toggle each node's membership in the selection.
    pub fn toggle_node_selection(
        &mut self,
        ids: impl IntoIterator<Item = NodeId>,
    ) -> Result<(), ArborError> {
        let toggled = self.known_nodes(ids)?;
        let next = self
            .selection
            .nodes
            .symmetric_difference(&toggled)
            .copied()
            .collect();
        self.replace_node_selection(next);
        self.settle_node_selection()
    }

    /// Replace the tree selection.
    pub fn select_trees(
        &mut self,
        ids: impl IntoIterator<Item = TreeId>,
    ) -> Result<(), ArborError> {
        let wanted = self.known_trees(ids)?;
        self.replace_tree_selection(wanted);
        self.settle_tree_selection()
    }

    /// Toggle each tree's membership in the selection.
    pub fn toggle_tree_selection(
        &mut self,
        ids: impl IntoIterator<Item = TreeId>,
    ) -> Result<(), ArborError> {
        let toggled = self.known_trees(ids)?;
        let next = self
            .selection
            .trees
            .symmetric_difference(&toggled)
            .copied()
            .collect();
        self.replace_tree_selection(next);
        self.settle_tree_selection()
    }

    fn known_nodes(
        &self,
        ids: impl IntoIterator<Item = NodeId>,
    ) -> Result<BTreeSet<NodeId>, ArborError> {
        ids.into_iter()
            .map(|id| {
                if self.nodes.contains_key(&id) {
                    Ok(id)
                } else {
                    Err(ArborError::missing_node(id))
                }
            })
            .collect()
    }

    fn known_trees(
        &self,
        ids: impl IntoIterator<Item = TreeId>,
    ) -> Result<BTreeSet<TreeId>, ArborError> {
        ids.into_iter()
            .map(|id| {
                if self.trees.contains_key(&id) {
                    Ok(id)
                } else {
                    Err(ArborError::missing_tree(id))
                }
            })
            .collect()
    }

    fn settle_node_selection(&mut self) -> Result<(), ArborError> {
        let mut selected = self.selection.nodes.iter().copied();
        match (selected.next(), selected.next()) {
            (Some(only), None) if self.selection.active_node != Some(only) => {
                self.set_active_node(Some(only))
            }
            (None, _) => {
                if let Some(active) = self.selection.active_node {
                    self.replace_node_selection(BTreeSet::from([active]));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn settle_tree_selection(&mut self) -> Result<(), ArborError> {
        let mut selected = self.selection.trees.iter().copied();
        match (selected.next(), selected.next()) {
            (Some(only), None) if self.selection.active_tree != Some(only) => {
                self.set_active_tree(only)
            }
            (None, _) => {
                if let Some(active) = self.selection.active_tree {
                    self.replace_tree_selection(BTreeSet::from([active]));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Re-apply the fallback rule after entities were deleted.
    pub(crate) fn reseed_selection(&mut self) {
        if self.selection.nodes.is_empty() {
            if let Some(active) = self.selection.active_node {
                self.replace_node_selection(BTreeSet::from([active]));
            }
        }
        if self.selection.trees.is_empty() {
            if let Some(active) = self.selection.active_tree {
                self.replace_tree_selection(BTreeSet::from([active]));
            }
        }
    }

    pub(crate) fn replace_node_selection(&mut self, next: BTreeSet<NodeId>) {
        if self.selection.nodes == next {
            return;
        }
        let previous = std::mem::replace(&mut self.selection.nodes, next);
        for id in previous.difference(&self.selection.nodes) {
            if let Some(node) = self.nodes.get_mut(id) {
                node.selected = false;
            }
        }
        for id in &self.selection.nodes {
            if let Some(node) = self.nodes.get_mut(id) {
                node.selected = true;
            }
        }
        self.notifier.publish(ForestEvent::NodeSelectionChanged);
    }

    pub(crate) fn replace_tree_selection(&mut self, next: BTreeSet<TreeId>) {
        if self.selection.trees == next {
            return;
        }
        let previous = std::mem::replace(&mut self.selection.trees, next);
        for id in previous.difference(&self.selection.trees) {
            if let Some(tree) = self.trees.get_mut(id) {
                tree.selected = false;
            }
        }
        for id in &self.selection.trees {
            if let Some(tree) = self.trees.get_mut(id) {
                tree.selected = true;
            }
        }
        self.notifier.publish(ForestEvent::TreeSelectionChanged);
    }

    // =========================================================================
    // POSITION LOCK
    // =========================================================================

    /// Lock node placement to the configured radius around `anchor`.
    pub fn lock_position(&mut self, anchor: Coordinate) {
        if self.locked_at == Some(anchor) {
            return;
        }
        self.locked_at = Some(anchor);
        tracing::debug!(%anchor, radius = self.config.lock_radius, "position locked");
        self.notifier
            .publish(ForestEvent::PositionLockChanged(Some(anchor)));
    }

    pub fn unlock_position(&mut self) {
        if self.locked_at.take().is_some() {
            tracing::debug!("position unlocked");
            self.notifier.publish(ForestEvent::PositionLockChanged(None));
        }
    }

    /// Lock to the node if its comment contains the locking comment,
    /// otherwise release any lock. No-op unless comment locking is enabled.
    pub(crate) fn apply_comment_lock(&mut self, id: NodeId) {
        if !self.config.enable_comment_locking || self.config.locking_comment.is_empty() {
            return;
        }
        let Some(node) = self.find_node_by_id(id) else {
            return;
        };
        let needle = self.config.locking_comment.to_lowercase();
        if node.comment().to_lowercase().contains(&needle) {
            let anchor = node.position();
            self.lock_position(anchor);
        } else {
            self.unlock_position();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

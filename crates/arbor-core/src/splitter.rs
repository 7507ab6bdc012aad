//! # Component Splitter
//!
//! Moves a connected component into a tree of its own. Splits a tree whose
//! nodes fell apart and gathers a component spread over several trees, in
//! one operation.

use crate::events::ForestEvent;
use crate::forest::Forest;
use crate::{ArborError, NodeId, Properties, TreeId};
use std::collections::BTreeSet;

impl Forest {
    /// Move the component containing `id` into a new tree.
    ///
    /// Returns `None` without changes if the component already is exactly
    /// one whole tree. Trees left empty are deleted and the new tree becomes
    /// active.
    pub fn extract_connected_component(
        &mut self,
        id: NodeId,
    ) -> Result<Option<TreeId>, ArborError> {
        let component = self.connected_component(id)?;
        let touched: BTreeSet<TreeId> = component
            .iter()
            .filter_map(|n| self.find_node_by_id(*n))
            .map(|node| node.tree())
            .collect();
        let touched_size: usize = touched
            .iter()
            .filter_map(|t| self.find_tree_by_id(*t))
            .map(|tree| tree.len())
            .sum();

        if touched.len() == 1 && component.len() == touched_size {
            tracing::debug!(node = %id, "component already forms a whole tree");
            return Ok(None);
        }
        let extracted = self.batched(|forest| forest.split_off(&component, &touched))?;
        tracing::debug!(
            node = %id,
            tree = %extracted,
            nodes = component.len(),
            sources = touched.len(),
            "component extracted"
        );
        Ok(Some(extracted))
    }

    fn split_off(
        &mut self,
        component: &[NodeId],
        touched: &BTreeSet<TreeId>,
    ) -> Result<TreeId, ArborError> {
        let members: BTreeSet<NodeId> = component.iter().copied().collect();
        let extracted = self.add_tree(None, None, Properties::new())?;

        // Keep the relative order the nodes had in their old trees.
        let ordered: Vec<NodeId> = touched
            .iter()
            .filter_map(|t| self.trees.get(t))
            .flat_map(|tree| tree.nodes.iter().copied())
            .filter(|n| members.contains(n))
            .collect();

        for tree in touched {
            if let Some(tree) = self.trees.get_mut(tree) {
                tree.nodes.retain(|n| !members.contains(n));
            }
        }
        for id in &ordered {
            if let Some(node) = self.nodes.get_mut(id) {
                node.tree = extracted;
            }
            self.notifier.publish(ForestEvent::NodeChanged(*id));
        }
        self.tree_mut(extracted)?.nodes = ordered;

        let emptied: Vec<TreeId> = touched
            .iter()
            .filter(|t| self.trees.get(t).is_some_and(|tree| tree.is_empty()))
            .copied()
            .collect();
        for tree in emptied {
            self.remove_tree_record(tree);
        }
        self.set_active_tree(extracted)?;
        self.reseed_selection();
        Ok(extracted)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinate;
    use crate::forest::NodeSpec;

    fn tree_with(forest: &mut Forest, xs: &[i32]) -> (TreeId, Vec<NodeId>) {
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let nodes = xs
            .iter()
            .map(|x| {
                forest
                    .add_node(NodeSpec::new(tree, Coordinate::new(*x, 0, 0)))
                    .expect("node")
            })
            .collect();
        (tree, nodes)
    }

    #[test]
    fn whole_tree_is_not_extracted() {
        let mut forest = Forest::new();
        let (tree, nodes) = tree_with(&mut forest, &[0, 1]);
        forest.add_segment(nodes[0], nodes[1]).expect("segment");

        assert_eq!(forest.extract_connected_component(nodes[0]).expect("extract"), None);
        assert_eq!(forest.tree_count(), 1);
        assert_eq!(forest.find_tree_by_id(tree).expect("tree").len(), 2);
    }

    #[test]
    fn disconnected_part_is_split_off() {
        let mut forest = Forest::new();
        let (tree, nodes) = tree_with(&mut forest, &[0, 1, 5, 6]);
        forest.add_segment(nodes[0], nodes[1]).expect("segment");
        forest.add_segment(nodes[2], nodes[3]).expect("segment");

        let extracted = forest
            .extract_connected_component(nodes[3])
            .expect("extract")
            .expect("new tree");

        assert_eq!(
            forest.find_tree_by_id(extracted).expect("tree").nodes(),
            &[nodes[2], nodes[3]]
        );
        assert_eq!(forest.find_tree_by_id(tree).expect("tree").nodes(), &[nodes[0], nodes[1]]);
        assert_eq!(forest.active_tree(), Some(extracted));
        assert!(
            forest
                .active_node()
                .is_some_and(|n| n == nodes[2] || n == nodes[3])
        );
    }

    #[test]
    fn component_across_trees_is_consolidated() {
        let mut forest = Forest::new();
        let (t1, a) = tree_with(&mut forest, &[0, 1]);
        let (t2, b) = tree_with(&mut forest, &[2]);
        forest.add_segment(a[0], a[1]).expect("segment");
        forest.add_segment(a[1], b[0]).expect("segment");

        let t3 = forest
            .extract_connected_component(a[0])
            .expect("extract")
            .expect("new tree");

        assert!(forest.find_tree_by_id(t1).is_none());
        assert!(forest.find_tree_by_id(t2).is_none());
        let merged = forest.find_tree_by_id(t3).expect("tree");
        assert_eq!(merged.nodes(), &[a[0], a[1], b[0]]);
        assert_eq!(forest.find_node_by_id(b[0]).expect("node").tree(), t3);
    }
}

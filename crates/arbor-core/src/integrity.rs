//! # Integrity Checks
//!
//! Full consistency audit of a forest: ownership, sister pairs, selection
//! state, synapse links and derived values. Every mutation is expected to
//! keep an audit clean; tests and the `validate` command run it.

use crate::ArborError;
use crate::forest::Forest;
use std::collections::BTreeSet;

impl Forest {
    /// Fail with the first violated invariant, if any.
    pub fn verify_integrity(&self) -> Result<(), ArborError> {
        match self.integrity_violations().into_iter().next() {
            Some(violation) => Err(ArborError::InvariantViolation(violation)),
            None => Ok(()),
        }
    }

    /// Describe every violated invariant. Empty for a consistent forest.
    #[must_use]
    pub fn integrity_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        self.check_ownership(&mut violations);
        self.check_segments(&mut violations);
        self.check_selection(&mut violations);
        self.check_synapses(&mut violations);
        violations
    }

    fn check_ownership(&self, violations: &mut Vec<String>) {
        let mut owned: BTreeSet<_> = BTreeSet::new();
        for (id, tree) in &self.trees {
            if tree.id != *id {
                violations.push(format!("tree indexed as {} reports ID {}", id, tree.id));
            }
            for node in &tree.nodes {
                if !owned.insert(*node) {
                    violations.push(format!("node {} is listed by more than one tree", node));
                }
                match self.nodes.get(node) {
                    None => violations.push(format!("tree {} lists missing node {}", id, node)),
                    Some(record) if record.tree != *id => violations.push(format!(
                        "node {} is listed by tree {} but reports tree {}",
                        node, id, record.tree
                    )),
                    Some(_) => {}
                }
            }
        }
        for (id, node) in &self.nodes {
            if node.id != *id {
                violations.push(format!("node indexed as {} reports ID {}", id, node.id));
            }
            if !owned.contains(id) {
                violations.push(format!("node {} is not listed by any tree", id));
            }
        }
    }

    fn check_segments(&self, violations: &mut Vec<String>) {
        for (id, node) in &self.nodes {
            let mut neighbors = BTreeSet::new();
            for segment in &node.segments {
                let key = segment.key();
                if key.owner() != *id {
                    violations.push(format!("node {} holds a record owned by {}", id, key.owner()));
                }
                if !neighbors.insert(segment.neighbor()) {
                    violations.push(format!(
                        "nodes {} and {} are connected more than once",
                        id,
                        segment.neighbor()
                    ));
                }
                let sister = self.segment(segment.sister());
                match sister {
                    None => violations.push(format!(
                        "segment {} -> {} has no sister record",
                        key.source, key.target
                    )),
                    Some(sister) if sister.length != segment.length => violations.push(format!(
                        "segment {} -> {} disagrees with its sister on length",
                        key.source, key.target
                    )),
                    Some(_) => {}
                }
            }
            let widest = node.segments.iter().map(|s| s.length).fold(node.radius, f32::max);
            if node.circ_radius < widest {
                violations.push(format!("node {} has a stale culling radius", id));
            }
        }
    }

    fn check_selection(&self, violations: &mut Vec<String>) {
        if let Some(active) = self.selection.active_node {
            match self.nodes.get(&active) {
                None => violations.push(format!("active node {} does not exist", active)),
                Some(node) if Some(node.tree) != self.selection.active_tree => {
                    violations.push(format!(
                        "active node {} belongs to tree {}, not the active tree",
                        active, node.tree
                    ));
                }
                Some(_) => {}
            }
            if self.selection.nodes.is_empty() {
                violations.push("node selection is empty while a node is active".to_string());
            }
        }
        if let Some(active) = self.selection.active_tree {
            if !self.trees.contains_key(&active) {
                violations.push(format!("active tree {} does not exist", active));
            }
            if self.selection.trees.is_empty() {
                violations.push("tree selection is empty while a tree is active".to_string());
            }
        }
        for (id, node) in &self.nodes {
            if node.selected != self.selection.nodes.contains(id) {
                violations.push(format!("selection flag of node {} is out of sync", id));
            }
        }
        for (id, tree) in &self.trees {
            if tree.selected != self.selection.trees.contains(id) {
                violations.push(format!("selection flag of tree {} is out of sync", id));
            }
        }
        for id in &self.selection.nodes {
            if !self.nodes.contains_key(id) {
                violations.push(format!("selected node {} does not exist", id));
            }
        }
        for id in &self.selection.trees {
            if !self.trees.contains_key(id) {
                violations.push(format!("selected tree {} does not exist", id));
            }
        }
        for id in &self.branch_stack {
            if !self.nodes.get(id).is_some_and(|node| node.is_branch_node) {
                violations.push(format!("branch stack holds {} which is not a branch node", id));
            }
        }
    }

    fn check_synapses(&self, violations: &mut Vec<String>) {
        for (id, synapse) in &self.synapses {
            if !self
                .trees
                .get(&synapse.cleft)
                .is_some_and(|tree| tree.synapse == Some(*id))
            {
                violations.push(format!("synapse {} has no matching cleft tree", id));
            }
            for node in synapse.pre.iter().chain(synapse.post.iter()) {
                if !self.nodes.get(node).is_some_and(|n| n.synapse == Some(*id)) {
                    violations.push(format!(
                        "synapse {} names node {} which does not link back",
                        id, node
                    ));
                }
            }
        }
        for (id, node) in &self.nodes {
            if let Some(synapse) = node.synapse {
                if !self.synapses.contains_key(&synapse) {
                    violations.push(format!("node {} links missing synapse {}", id, synapse));
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::NodeSpec;
    use crate::{Coordinate, Properties};

    #[test]
    fn fresh_and_edited_forests_are_consistent() {
        let mut forest = Forest::new();
        assert!(forest.verify_integrity().is_ok());

        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let a = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(0, 0, 0)))
            .expect("node");
        let b = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(3, 4, 0)))
            .expect("node");
        forest.add_segment(a, b).expect("segment");
        forest.push_branch_node(b).expect("push");
        forest.add_synapse(a, b, None).expect("synapse");

        assert_eq!(forest.integrity_violations(), Vec::<String>::new());
    }

    #[test]
    fn broken_sister_is_reported() {
        let mut forest = Forest::new();
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let a = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(0, 0, 0)))
            .expect("node");
        let b = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(1, 0, 0)))
            .expect("node");
        forest.add_segment(a, b).expect("segment");

        forest.node_mut(b).expect("node").segments.clear();

        let result = forest.verify_integrity();
        assert!(matches!(
            result,
            Err(ArborError::InvariantViolation(ref m)) if m.contains("sister")
        ));
    }

    #[test]
    fn orphaned_node_is_reported() {
        let mut forest = Forest::new();
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let id = forest
            .add_node(NodeSpec::new(tree, Coordinate::default()))
            .expect("node");
        forest.tree_mut(tree).expect("tree").nodes.clear();

        let violations = forest.integrity_violations();
        assert!(violations.iter().any(|v| v.contains(&id.to_string())));
    }
}

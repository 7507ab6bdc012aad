//! # Traversal & Pathfinding
//!
//! Lazy graph walks over the segment graph:
//! - [`NodeGenerator`]: breadth-first walk from one node, optionally following
//!   only forward or only backward segment records
//! - [`TreeTraverser`]: every node of the forest exactly once, one connected
//!   component after the other
//!
//! plus shortest paths and nearest-node queries on [`Forest`].
//!
//! ## Ordering
//!
//! Neighbors are expanded in segment-list order. The traverser seeds each new
//! component from the lowest node ID not yet visited.

use crate::forest::{Forest, Node, Segment};
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::{ArborError, Coordinate, NodeId, TreeId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};
use std::iter::FusedIterator;
use std::ops::Bound::{Excluded, Unbounded};

/// Which segment records a walk may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Source to target only.
    Forward,
    /// Target to source only.
    Backward,
    /// Both ways.
    #[default]
    Any,
}

impl Direction {
    fn follows(self, segment: &Segment) -> bool {
        match self {
            Self::Forward => segment.is_forward(),
            Self::Backward => !segment.is_forward(),
            Self::Any => true,
        }
    }
}

// =============================================================================
// NODE GENERATOR
// =============================================================================

/// Breadth-first walk from a start node.
///
/// Yields the start node first, then every reachable node once. The walk
/// cannot be restarted; advancing it after the end fails.
#[derive(Debug, Clone)]
pub struct NodeGenerator<'a> {
    forest: &'a Forest,
    direction: Direction,
    frontier: VecDeque<(NodeId, usize)>,
    visited: BTreeSet<NodeId>,
    max_depth: Option<usize>,
    exhausted: bool,
}

impl<'a> NodeGenerator<'a> {
    pub fn new(
        forest: &'a Forest,
        start: NodeId,
        direction: Direction,
    ) -> Result<Self, ArborError> {
        if forest.find_node_by_id(start).is_none() {
            return Err(ArborError::missing_node(start));
        }
        Ok(Self::seeded(forest, start, direction, BTreeSet::new()))
    }

    fn seeded(
        forest: &'a Forest,
        start: NodeId,
        direction: Direction,
        mut visited: BTreeSet<NodeId>,
    ) -> Self {
        visited.insert(start);
        Self {
            forest,
            direction,
            frontier: VecDeque::from([(start, 0)]),
            visited,
            max_depth: None,
            exhausted: false,
        }
    }

    /// Stop expanding nodes `depth` hops away from the start.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth.min(MAX_TRAVERSAL_DEPTH));
        self
    }

    /// Yield the next node, or `IteratorExhausted` once the frontier is empty.
    pub fn advance(&mut self) -> Result<NodeId, ArborError> {
        let Some((id, depth)) = self.frontier.pop_front() else {
            self.exhausted = true;
            return Err(ArborError::IteratorExhausted);
        };
        let expand = self.max_depth.is_none_or(|max| depth < max);
        if let Some(node) = self.forest.find_node_by_id(id).filter(|_| expand) {
            for segment in node.segments() {
                if !self.direction.follows(segment) {
                    continue;
                }
                let next = segment.neighbor();
                if self.visited.insert(next) {
                    self.frontier.push_back((next, depth + 1));
                }
            }
        }
        Ok(id)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn into_visited(self) -> BTreeSet<NodeId> {
        self.visited
    }
}

impl Iterator for NodeGenerator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().ok()
    }
}

impl FusedIterator for NodeGenerator<'_> {}

// =============================================================================
// TREE TRAVERSER
// =============================================================================

/// Visits every node of the forest exactly once.
///
/// Runs an undirected [`NodeGenerator`] per connected component; when one is
/// exhausted the next component is seeded from the lowest unvisited node ID.
#[derive(Debug, Clone)]
pub struct TreeTraverser<'a> {
    forest: &'a Forest,
    current: Option<NodeGenerator<'a>>,
    visited: BTreeSet<NodeId>,
    /// Every ID at or below the last seed is already visited.
    last_seed: Option<NodeId>,
}

impl<'a> TreeTraverser<'a> {
    #[must_use]
    pub fn new(forest: &'a Forest) -> Self {
        Self {
            forest,
            current: None,
            visited: BTreeSet::new(),
            last_seed: None,
        }
    }

    /// Start with the component of `start`, then continue in ID order.
    pub fn starting_at(forest: &'a Forest, start: NodeId) -> Result<Self, ArborError> {
        let generator = NodeGenerator::new(forest, start, Direction::Any)?;
        Ok(Self {
            forest,
            current: Some(generator),
            visited: BTreeSet::new(),
            last_seed: None,
        })
    }

    fn next_seed(&mut self) -> Option<NodeId> {
        let lower = self.last_seed.map_or(Unbounded, Excluded);
        let seed = self
            .forest
            .nodes
            .range((lower, Unbounded))
            .map(|(id, _)| *id)
            .find(|id| !self.visited.contains(id))?;
        self.last_seed = Some(seed);
        Some(seed)
    }
}

impl Iterator for TreeTraverser<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(generator) = self.current.as_mut() {
                if let Ok(id) = generator.advance() {
                    return Some(id);
                }
                if let Some(done) = self.current.take() {
                    self.visited = done.into_visited();
                }
            }
            let seed = self.next_seed()?;
            let visited = std::mem::take(&mut self.visited);
            self.current = Some(NodeGenerator::seeded(
                self.forest,
                seed,
                Direction::Any,
                visited,
            ));
        }
    }
}

impl FusedIterator for TreeTraverser<'_> {}

// =============================================================================
// FOREST QUERIES
// =============================================================================

impl Forest {
    /// Nodes on a shortest path from `from` to `to`, in walking order.
    ///
    /// Every edge costs one. Returns `[from]` if both are the same node and
    /// an empty path if they are not connected.
    pub fn shortest_path(&self, from: NodeId, to: NodeId) -> Result<Vec<NodeId>, ArborError> {
        for id in [from, to] {
            if self.find_node_by_id(id).is_none() {
                return Err(ArborError::missing_node(id));
            }
        }

        let mut parents: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut settled: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue = BinaryHeap::from([Reverse((0_usize, from))]);

        while let Some(Reverse((cost, id))) = queue.pop() {
            if !settled.insert(id) {
                continue;
            }
            if id == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(parent) = parents.get(&cursor) {
                    path.push(*parent);
                    cursor = *parent;
                }
                path.reverse();
                return Ok(path);
            }
            let Some(node) = self.find_node_by_id(id) else {
                continue;
            };
            for next in node.neighbors() {
                if settled.contains(&next) {
                    continue;
                }
                parents.entry(next).or_insert(id);
                queue.push(Reverse((cost + 1, next)));
            }
        }
        Ok(Vec::new())
    }

    /// The node closest to `position`, searching `preferred` first.
    ///
    /// Falls back to the whole forest only if the preferred tree has no
    /// nodes (or does not exist).
    #[must_use]
    pub fn find_nearby_node(
        &self,
        preferred: Option<TreeId>,
        position: Coordinate,
    ) -> Option<NodeId> {
        let none = BTreeSet::new();
        preferred
            .and_then(|tree| self.nearest_in_tree(tree, position, &none))
            .or_else(|| self.nearest_node(position, &none))
    }

    pub(crate) fn nearest_in_tree(
        &self,
        tree: TreeId,
        position: Coordinate,
        excluded: &BTreeSet<NodeId>,
    ) -> Option<NodeId> {
        let tree = self.find_tree_by_id(tree)?;
        self.closest(
            tree.nodes().iter().filter_map(|id| self.find_node_by_id(*id)),
            position,
            excluded,
        )
    }

    pub(crate) fn nearest_node(
        &self,
        position: Coordinate,
        excluded: &BTreeSet<NodeId>,
    ) -> Option<NodeId> {
        self.closest(self.nodes(), position, excluded)
    }

    fn closest<'n>(
        &self,
        candidates: impl Iterator<Item = &'n Node>,
        position: Coordinate,
        excluded: &BTreeSet<NodeId>,
    ) -> Option<NodeId> {
        let scale = self.scale();
        candidates
            .filter(|node| !excluded.contains(&node.id()))
            .map(|node| (node.position().scaled_distance(position, scale), node.id()))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, id)| id)
    }

    /// All nodes connected to `id`, ignoring direction, in BFS order.
    pub fn connected_component(&self, id: NodeId) -> Result<Vec<NodeId>, ArborError> {
        Ok(NodeGenerator::new(self, id, Direction::Any)?.collect())
    }

    /// Number of connected components across the forest.
    #[must_use]
    pub fn component_count(&self) -> usize {
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let mut count = 0;
        for id in self.nodes.keys() {
            if visited.contains(id) {
                continue;
            }
            let mut generator = NodeGenerator::seeded(self, *id, Direction::Any, visited);
            while generator.advance().is_ok() {}
            visited = generator.into_visited();
            count += 1;
        }
        count
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::NodeSpec;
    use crate::{FloatCoordinate, Properties};

    /// Tree with a fork: 1-2-3 and 2-4, plus a second tree with 5-6.
    fn fork() -> (Forest, Vec<NodeId>) {
        let mut forest = Forest::new();
        let a = forest.add_tree(None, None, Properties::new()).expect("tree");
        let b = forest.add_tree(None, None, Properties::new()).expect("tree");
        let mut nodes = Vec::new();
        for (tree, x) in [(a, 0), (a, 1), (a, 2), (a, 3), (b, 10), (b, 11)] {
            nodes.push(
                forest
                    .add_node(NodeSpec::new(tree, Coordinate::new(x, 0, 0)))
                    .expect("node"),
            );
        }
        for (s, t) in [(0, 1), (1, 2), (1, 3), (4, 5)] {
            forest.add_segment(nodes[s], nodes[t]).expect("segment");
        }
        (forest, nodes)
    }

    #[test]
    fn generator_is_breadth_first_and_deduplicated() {
        let (forest, n) = fork();
        let order: Vec<NodeId> = NodeGenerator::new(&forest, n[0], Direction::Any)
            .expect("gen")
            .collect();
        assert_eq!(order, vec![n[0], n[1], n[2], n[3]]);
    }

    #[test]
    fn generator_respects_direction() {
        let (forest, n) = fork();
        let forward: Vec<NodeId> = NodeGenerator::new(&forest, n[1], Direction::Forward)
            .expect("gen")
            .collect();
        assert_eq!(forward, vec![n[1], n[2], n[3]]);

        let backward: Vec<NodeId> = NodeGenerator::new(&forest, n[2], Direction::Backward)
            .expect("gen")
            .collect();
        assert_eq!(backward, vec![n[2], n[1], n[0]]);
    }

    #[test]
    fn generator_fails_after_exhaustion() {
        let (forest, n) = fork();
        let mut generator = NodeGenerator::new(&forest, n[4], Direction::Any).expect("gen");
        assert_eq!(generator.advance().expect("first"), n[4]);
        assert_eq!(generator.advance().expect("second"), n[5]);
        assert!(matches!(generator.advance(), Err(ArborError::IteratorExhausted)));
        assert!(generator.is_exhausted());
        assert_eq!(generator.next(), None);
    }

    #[test]
    fn generator_depth_limit() {
        let (forest, n) = fork();
        let near: Vec<NodeId> = NodeGenerator::new(&forest, n[0], Direction::Any)
            .expect("gen")
            .with_max_depth(1)
            .collect();
        assert_eq!(near, vec![n[0], n[1]]);
    }

    #[test]
    fn traverser_covers_forest_in_id_order() {
        let (forest, n) = fork();
        let order: Vec<NodeId> = TreeTraverser::new(&forest).collect();
        assert_eq!(order, vec![n[0], n[1], n[2], n[3], n[4], n[5]]);
    }

    #[test]
    fn traverser_covers_many_singleton_components() {
        let mut forest = Forest::new();
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let nodes: Vec<NodeId> = (0..20_000)
            .map(|x| {
                forest
                    .add_node(NodeSpec::new(tree, Coordinate::new(x, 0, 0)))
                    .expect("node")
            })
            .collect();

        let order: Vec<NodeId> = TreeTraverser::new(&forest).collect();

        assert_eq!(order, nodes);
        assert_eq!(forest.component_count(), nodes.len());
    }

    #[test]
    fn traverser_can_start_anywhere() {
        let (forest, n) = fork();
        let order: Vec<NodeId> = TreeTraverser::starting_at(&forest, n[5])
            .expect("traverser")
            .collect();
        assert_eq!(order.len(), 6);
        assert_eq!(&order[..2], &[n[5], n[4]]);
        assert_eq!(order[2], n[0]);
    }

    #[test]
    fn shortest_path_through_fork() {
        let (forest, n) = fork();
        let path = forest.shortest_path(n[2], n[3]).expect("path");
        assert_eq!(path, vec![n[2], n[1], n[3]]);
        assert_eq!(forest.shortest_path(n[0], n[0]).expect("path"), vec![n[0]]);
        assert!(forest.shortest_path(n[0], n[4]).expect("path").is_empty());
        assert!(forest.shortest_path(n[0], NodeId(999)).is_err());
    }

    #[test]
    fn nearby_node_prefers_given_tree() {
        let (forest, n) = fork();
        let first = forest.find_node_by_id(n[0]).expect("node").tree();
        let second = forest.find_node_by_id(n[4]).expect("node").tree();
        let target = Coordinate::new(9, 0, 0);
        assert_eq!(forest.find_nearby_node(Some(first), target), Some(n[3]));
        assert_eq!(forest.find_nearby_node(Some(second), target), Some(n[4]));
        assert_eq!(forest.find_nearby_node(None, target), Some(n[4]));
    }

    #[test]
    fn nearby_node_uses_scaled_distance() {
        let mut forest = Forest::with_config(crate::config::ForestConfig {
            scale: FloatCoordinate::new(1.0, 100.0, 1.0),
            ..Default::default()
        });
        let tree = forest.add_tree(None, None, Properties::new()).expect("tree");
        let along_x = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(50, 0, 0)))
            .expect("node");
        forest
            .add_node(NodeSpec::new(tree, Coordinate::new(0, 1, 0)))
            .expect("node");
        assert_eq!(forest.find_nearby_node(None, Coordinate::default()), Some(along_x));
    }

    #[test]
    fn component_count_matches_traversal() {
        let (forest, n) = fork();
        assert_eq!(forest.component_count(), 2);
        assert_eq!(forest.connected_component(n[5]).expect("component").len(), 2);
    }
}

//! # Property-Based Tests
//!
//! Randomized checks of the forest invariants using proptest.
//!
//! Every generated forest is built only through public mutation operations,
//! so a clean integrity audit afterwards means the operations kept it
//! consistent.

use arbor_core::{
    Coordinate, Forest, NodeId, NodeSpec, Properties, SaveOptions, TreeId, TreeTraverser,
    load_nml, save_nml,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Build a forest with `trees` trees, one node per position (assigned
/// round-robin to the trees) and an edge for every index pair that is not
/// rejected.
fn build(
    trees: usize,
    positions: &[(i32, i32, i32)],
    edges: &[(usize, usize)],
) -> (Forest, Vec<NodeId>) {
    let mut forest = Forest::new();
    let tree_ids: Vec<TreeId> = (0..trees)
        .map(|_| forest.add_tree(None, None, Properties::new()).expect("tree"))
        .collect();
    let nodes: Vec<NodeId> = positions
        .iter()
        .enumerate()
        .map(|(i, (x, y, z))| {
            let tree = tree_ids[i % tree_ids.len()];
            forest
                .add_node(NodeSpec::new(tree, Coordinate::new(*x, *y, *z)))
                .expect("node")
        })
        .collect();
    for (a, b) in edges {
        let (a, b) = (nodes[a % nodes.len()], nodes[b % nodes.len()]);
        // self loops and repeated edges are expected to be refused
        let _ = forest.add_segment(a, b);
    }
    (forest, nodes)
}

/// Hop count from `from` to `to` by a plain breadth-first search over
/// neighbor lists, `None` if unreachable.
fn hop_distance(forest: &Forest, from: NodeId, to: NodeId) -> Option<usize> {
    let mut distance = BTreeMap::from([(from, 0usize)]);
    let mut queue = VecDeque::from([from]);
    while let Some(id) = queue.pop_front() {
        let hops = distance[&id];
        if id == to {
            return Some(hops);
        }
        for next in forest.find_node_by_id(id)?.neighbors() {
            if !distance.contains_key(&next) {
                distance.insert(next, hops + 1);
                queue.push_back(next);
            }
        }
    }
    None
}

fn position() -> impl Strategy<Value = (i32, i32, i32)> {
    (0i32..500, 0i32..500, 0i32..100)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Any sequence of insertions keeps the forest consistent.
    #[test]
    fn construction_keeps_integrity(
        trees in 1usize..4,
        positions in vec(position(), 1..30),
        edges in vec((0usize..30, 0usize..30), 0..40),
    ) {
        let (forest, nodes) = build(trees, &positions, &edges);

        prop_assert_eq!(forest.node_count(), nodes.len());
        prop_assert_eq!(forest.segment_record_count(), 2 * forest.edge_count());
        prop_assert!(forest.integrity_violations().is_empty());
    }

    /// Deleting arbitrary nodes keeps the forest consistent and the
    /// selection non-empty while anything is active.
    #[test]
    fn deletion_keeps_integrity(
        positions in vec(position(), 2..25),
        edges in vec((0usize..25, 0usize..25), 0..30),
        victims in vec(0usize..25, 1..10),
    ) {
        let (mut forest, nodes) = build(2, &positions, &edges);

        for victim in victims {
            let id = nodes[victim % nodes.len()];
            if forest.find_node_by_id(id).is_some() {
                forest.del_node(id).expect("delete");
            }
            prop_assert!(forest.integrity_violations().is_empty());
            if forest.node_count() > 0 {
                prop_assert!(forest.active_node().is_some());
            }
        }
    }

    /// A path exists exactly when both nodes share a component, runs
    /// between the endpoints over real edges and is as short as a plain
    /// breadth-first search says.
    #[test]
    fn paths_match_components(
        positions in vec(position(), 2..20),
        edges in vec((0usize..20, 0usize..20), 0..25),
        from in 0usize..20,
        to in 0usize..20,
    ) {
        let (forest, nodes) = build(1, &positions, &edges);
        let (from, to) = (nodes[from % nodes.len()], nodes[to % nodes.len()]);

        let path = forest.shortest_path(from, to).expect("path");
        let component = forest.connected_component(from).expect("component");

        prop_assert_eq!(!path.is_empty(), component.contains(&to));
        if let (Some(first), Some(last)) = (path.first(), path.last()) {
            prop_assert_eq!(*first, from);
            prop_assert_eq!(*last, to);
            for pair in path.windows(2) {
                let node = forest.find_node_by_id(pair[0]).expect("node");
                prop_assert!(node.neighbors().any(|n| n == pair[1]));
            }
        }
        let hops = path.len().checked_sub(1);
        prop_assert_eq!(hops, hop_distance(&forest, from, to));
    }

    /// The traverser yields every node exactly once.
    #[test]
    fn traverser_visits_each_node_once(
        trees in 1usize..4,
        positions in vec(position(), 1..30),
        edges in vec((0usize..30, 0usize..30), 0..30),
    ) {
        let (forest, _) = build(trees, &positions, &edges);

        let visited: Vec<NodeId> = TreeTraverser::new(&forest).collect();
        let unique: BTreeSet<NodeId> = visited.iter().copied().collect();

        prop_assert_eq!(visited.len(), forest.node_count());
        prop_assert_eq!(unique.len(), visited.len());
    }

    /// Saving and loading preserves positions, membership and edges.
    #[test]
    fn nml_round_trip_preserves_graph(
        trees in 1usize..3,
        positions in vec(position(), 1..20),
        edges in vec((0usize..20, 0usize..20), 0..20),
    ) {
        let (forest, _) = build(trees, &positions, &edges);

        let text = save_nml(&forest, SaveOptions::default()).expect("save");
        let mut loaded = Forest::new();
        load_nml(&mut loaded, &text, false).expect("load");

        prop_assert_eq!(loaded.node_count(), forest.node_count());
        prop_assert_eq!(loaded.edge_count(), forest.edge_count());
        for node in forest.nodes() {
            let copy = loaded.find_node_by_id(node.id()).expect("node");
            prop_assert_eq!(copy.position(), node.position());
            prop_assert_eq!(copy.tree(), node.tree());
            let a: BTreeSet<NodeId> = copy.neighbors().collect();
            let b: BTreeSet<NodeId> = node.neighbors().collect();
            prop_assert_eq!(a, b);
        }
        prop_assert!(loaded.integrity_violations().is_empty());
    }

    /// Extracting a component leaves it as exactly one whole tree.
    #[test]
    fn extraction_yields_whole_tree(
        positions in vec(position(), 2..20),
        edges in vec((0usize..20, 0usize..20), 0..20),
        pick in 0usize..20,
    ) {
        let (mut forest, nodes) = build(2, &positions, &edges);
        let start = nodes[pick % nodes.len()];
        let component: BTreeSet<NodeId> =
            forest.connected_component(start).expect("component").into_iter().collect();

        forest.extract_connected_component(start).expect("extract");

        let tree = forest.find_node_by_id(start).expect("node").tree();
        let members: BTreeSet<NodeId> =
            forest.find_tree_by_id(tree).expect("tree").nodes().iter().copied().collect();
        prop_assert_eq!(members, component);
        prop_assert!(forest.integrity_violations().is_empty());
    }
}

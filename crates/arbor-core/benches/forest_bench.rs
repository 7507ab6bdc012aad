//! # Forest Benchmarks
//!
//! Performance benchmarks for arbor-core forest operations.
//!
//! Run with: `cargo bench -p arbor-core`

use arbor_core::{
    Coordinate, Direction, Forest, NodeGenerator, NodeId, NodeSpec, Properties, SaveOptions,
    load_nml, save_nml,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// A single tree whose nodes form one long chain.
fn create_chain(size: usize) -> (Forest, Vec<NodeId>) {
    let mut forest = Forest::new();
    let tree = forest
        .add_tree(None, None, Properties::new())
        .expect("tree");
    let mut nodes = Vec::with_capacity(size);
    for i in 0..size {
        let node = forest
            .add_node(NodeSpec::new(tree, Coordinate::new(i as i32, 0, 0)))
            .expect("node");
        if let Some(prev) = nodes.last() {
            forest.add_segment(*prev, node).expect("segment");
        }
        nodes.push(node);
    }
    (forest, nodes)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_chain_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_construction");

    for size in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(create_chain(size)));
        });
    }

    group.finish();
}

fn bench_shortest_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("shortest_path");

    for size in [100, 1000, 10000].iter() {
        let (forest, nodes) = create_chain(*size);
        let (first, last) = (nodes[0], nodes[nodes.len() - 1]);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(forest.shortest_path(first, last)));
        });
    }

    group.finish();
}

fn bench_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("breadth_first_walk");

    for size in [1000, 10000].iter() {
        let (forest, nodes) = create_chain(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let walk = NodeGenerator::new(&forest, nodes[0], Direction::Any).expect("walk");
                black_box(walk.count())
            });
        });
    }

    group.finish();
}

fn bench_bulk_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete_tree");

    for size in [1000, 10000].iter() {
        let (forest, _) = create_chain(*size);
        let tree = forest.trees().map(|t| t.id()).next().expect("tree");
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut copy = forest.clone();
                copy.del_tree(tree).expect("delete");
                black_box(copy)
            });
        });
    }

    group.finish();
}

fn bench_nml(c: &mut Criterion) {
    let mut group = c.benchmark_group("nml");
    let (forest, _) = create_chain(5000);
    let text = save_nml(&forest, SaveOptions::default()).expect("save");

    group.bench_function("save_5000", |b| {
        b.iter(|| black_box(save_nml(&forest, SaveOptions::default())));
    });
    group.bench_function("load_5000", |b| {
        b.iter(|| {
            let mut target = Forest::new();
            black_box(load_nml(&mut target, &text, false))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_chain_construction,
    bench_shortest_path,
    bench_walk,
    bench_bulk_delete,
    bench_nml
);
criterion_main!(benches);

//! Benchmarks for snap resolution, flow layout and drop commits.
//!
//! Run with: cargo bench -p blockcanvas-graph

use std::collections::BTreeSet;
use std::hint::black_box;

use blockcanvas_core::geometry::{Delta, Point};
use blockcanvas_graph::{
    BlockId, BlockLayout, BlockStore, BlockTemplate, BlockTree, BlockType, CanvasConfig,
    DragController, DropTarget, LayoutMetrics, SnapProbe, SnapTuning, find_snap_target,
};
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

/// `n` loose blocks on a grid, every fourth one chained to the block above.
fn make_canvas(n: usize) -> BlockTree {
    let mut store = BlockStore::new();
    let template = BlockTemplate::for_type(BlockType::SetVariable);
    let mut previous: Option<BlockId> = None;
    for i in 0..n {
        let x = (i % 20) as f64 * 180.0;
        let y = (i / 20) as f64 * 50.0;
        let id = store
            .create_block(&template, Point::new(x, y))
            .expect("create");
        if i % 4 != 0
            && let Some(parent) = previous
        {
            let _ = store.reparent_sequential(id, Some(parent));
        }
        previous = Some(id);
    }
    BlockTree::clone(store.tree())
}

/// Containers nested `depth` deep, each holding `width` leaves.
fn make_nested(depth: usize, width: usize) -> BlockTree {
    let mut store = BlockStore::new();
    let container = BlockTemplate::for_type(BlockType::ForLoop);
    let leaf = BlockTemplate::for_type(BlockType::Add);
    let mut outer: Option<BlockId> = None;
    for _ in 0..depth {
        let id = store
            .create_block(&container, Point::ORIGIN)
            .expect("create");
        if let Some(parent) = outer {
            store.set_container(id, Some(parent), None).expect("nest");
        }
        for _ in 0..width {
            let child = store.create_block(&leaf, Point::ORIGIN).expect("create");
            store.set_container(child, Some(id), None).expect("nest");
        }
        outer = Some(id);
    }
    BlockTree::clone(store.tree())
}

fn bench_find_snap_target(c: &mut Criterion) {
    let mut group = c.benchmark_group("snap/find_target");
    let tuning = SnapTuning::default();
    let exclude = BTreeSet::new();

    for n in [10, 100, 500, 2000] {
        let tree = make_canvas(n);
        let probe = SnapProbe::detached(Point::new(362.0, 148.0));
        group.bench_with_input(BenchmarkId::new("blocks", n), &tree, |b, tree| {
            b.iter(|| black_box(find_snap_target(tree, probe, &exclude, tuning)))
        });
    }

    group.finish();
}

fn bench_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout/compute");
    let metrics = LayoutMetrics::default();

    for n in [100, 1000] {
        let tree = make_canvas(n);
        group.bench_with_input(BenchmarkId::new("flat", n), &tree, |b, tree| {
            b.iter(|| black_box(BlockLayout::compute(tree, &metrics)))
        });
    }
    for depth in [4, 16, 48] {
        let tree = make_nested(depth, 4);
        group.bench_with_input(BenchmarkId::new("nested", depth), &tree, |b, tree| {
            b.iter(|| black_box(BlockLayout::compute(tree, &metrics)))
        });
    }

    group.finish();
}

fn bench_drop_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("drag/drop_commit");

    for n in [100, 1000] {
        let tree = make_canvas(n);
        group.bench_with_input(BenchmarkId::new("move_chain_head", n), &tree, |b, tree| {
            b.iter_batched(
                || {
                    DragController::with_store(
                        BlockStore::from_tree(tree.clone()),
                        CanvasConfig::default(),
                    )
                    .expect("controller")
                },
                |mut ctl| {
                    let block = BlockId::MIN;
                    let grab = Point::new(5.0, 5.0);
                    let _ = ctl.on_drag_start_block(block, grab, 0);
                    let release = grab + Delta::new(40.0, 300.0);
                    ctl.on_drag_move(release, 16);
                    black_box(ctl.on_drag_end(release, 32, DropTarget::Canvas))
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_find_snap_target, bench_layout, bench_drop_commit);

criterion_main!(benches);

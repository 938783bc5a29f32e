//! Property/fuzz-style invariants for block tree operations.
//!
//! Random operation streams (valid and invalid) run against the public
//! `BlockTree` and `DragController` APIs. After every step the tree must be
//! structurally valid, rejected operations must leave it untouched, and
//! replaying the accepted operations must reproduce the same state.

use blockcanvas_core::geometry::{Delta, Point};
use blockcanvas_graph::{
    BlockId, BlockLayout, BlockOperation, BlockStore, BlockTemplate, BlockTree, BlockType,
    CanvasConfig, DragController, DropTarget, LayoutError, LayoutMetrics, RemovalPolicy,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn choose_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        (self.next_u64() % len as u64) as usize
    }

    fn choose_bool(&mut self) -> bool {
        (self.next_u64() & 1) == 0
    }

    fn coordinate(&mut self) -> f64 {
        (self.next_u64() % 801) as f64 - 100.0
    }
}

fn block_ids(tree: &BlockTree) -> Vec<BlockId> {
    tree.blocks().map(|block| block.id).collect()
}

/// An existing id most of the time, occasionally one that was never issued.
fn pick_block(tree: &BlockTree, rng: &mut Lcg) -> BlockId {
    let ids = block_ids(tree);
    if ids.is_empty() || rng.next_u64() % 16 == 0 {
        return BlockId::new(tree.next_id().get() + 7).expect("non-zero");
    }
    ids[rng.choose_index(ids.len())]
}

fn random_operation(tree: &BlockTree, rng: &mut Lcg) -> BlockOperation {
    let op_kind = if tree.len() < 3 {
        0
    } else {
        rng.choose_index(8)
    };
    match op_kind {
        1 => BlockOperation::RemoveBlock {
            id: pick_block(tree, rng),
            policy: if rng.choose_bool() {
                RemovalPolicy::Cascade
            } else {
                RemovalPolicy::Orphan
            },
        },
        2 => BlockOperation::MoveBlockGroup {
            id: pick_block(tree, rng),
            delta: Delta::new(rng.coordinate() / 4.0, rng.coordinate() / 4.0),
        },
        3 => BlockOperation::SetPosition {
            id: pick_block(tree, rng),
            position: Point::new(rng.coordinate(), rng.coordinate()),
        },
        4 | 5 => BlockOperation::ReparentSequential {
            child: pick_block(tree, rng),
            parent: if rng.next_u64() % 4 == 0 {
                None
            } else {
                Some(pick_block(tree, rng))
            },
        },
        6 => BlockOperation::SetContainer {
            block: pick_block(tree, rng),
            container: if rng.next_u64() % 4 == 0 {
                None
            } else {
                Some(pick_block(tree, rng))
            },
            index: if rng.choose_bool() {
                Some(rng.choose_index(4))
            } else {
                None
            },
        },
        7 => {
            let id = pick_block(tree, rng);
            let key = tree
                .block(id)
                .and_then(|block| block.block_type.field_keys().first().copied())
                .unwrap_or("bogus");
            BlockOperation::SetField {
                id,
                key: key.to_string(),
                value: format!("v{}", rng.next_u64() % 100),
            }
        }
        _ => {
            let block_type = BlockType::ALL[rng.choose_index(BlockType::ALL.len())];
            BlockOperation::CreateBlock {
                id: tree.next_id(),
                template: BlockTemplate::for_type(block_type),
                position: Point::new(rng.coordinate(), rng.coordinate()),
            }
        }
    }
}

fn assert_tree_invariants(tree: &BlockTree) {
    tree.validate()
        .expect("tree should remain structurally valid");
    for block in tree.blocks() {
        if block.container_id.is_some() {
            assert!(block.parent_id.is_none() && block.child_id.is_none());
        }
        if let Some(child) = block.child_id {
            assert_eq!(tree.block(child).and_then(|c| c.parent_id), Some(block.id));
        }
    }
    match BlockLayout::compute(tree, &LayoutMetrics::default()) {
        Ok(layout) => assert_eq!(layout.len(), tree.len()),
        Err(LayoutError::DepthExceeded { .. }) => {}
        Err(err) => panic!("layout failed on a valid tree: {err}"),
    }
}

fn run_sequence(seed: u64, steps: usize) -> (BlockTree, Vec<BlockOperation>) {
    let mut tree = BlockTree::new();
    let mut rng = Lcg::new(seed);
    let mut accepted = Vec::with_capacity(steps);

    for step in 0..steps {
        let operation = random_operation(&tree, &mut rng);
        let before = tree.state_hash();
        match tree.apply_operation(step as u64, operation.clone()) {
            Ok(outcome) => {
                assert_eq!(outcome.before_hash, before);
                assert_eq!(outcome.after_hash, tree.state_hash());
                accepted.push(operation);
            }
            Err(err) => assert_eq!(
                tree.state_hash(),
                before,
                "rejected operation mutated the tree at step {step}, seed={seed}, err={err}"
            ),
        }
        assert_tree_invariants(&tree);
    }

    (tree, accepted)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn random_operation_sequences_preserve_invariants(
        seed in any::<u64>(),
        steps in 20usize..150,
    ) {
        let (tree, _) = run_sequence(seed, steps);
        assert_tree_invariants(&tree);
    }

    #[test]
    fn accepted_operations_replay_deterministically(
        seed in any::<u64>(),
        steps in 20usize..100,
    ) {
        let (final_tree, operations) = run_sequence(seed, steps);
        let mut replay = BlockTree::new();
        replay
            .apply_batch(1, operations)
            .expect("replaying accepted operations should succeed");
        prop_assert_eq!(replay.state_hash(), final_tree.state_hash());
        prop_assert_eq!(replay.to_snapshot(), final_tree.to_snapshot());
    }

    #[test]
    fn random_drags_keep_the_tree_valid(seed in any::<u64>(), drags in 5usize..40) {
        let mut rng = Lcg::new(seed);
        let mut store = BlockStore::new();
        for _ in 0..8 {
            let block_type = BlockType::ALL[rng.choose_index(BlockType::ALL.len())];
            store
                .create_block(
                    &BlockTemplate::for_type(block_type),
                    Point::new(rng.coordinate(), rng.coordinate()),
                )
                .expect("create");
        }
        let mut ctl = DragController::with_store(store, CanvasConfig::default())
            .expect("controller");

        for step in 0..drags {
            let tree = ctl.snapshot();
            let grab = Point::new(rng.coordinate(), rng.coordinate());
            let release = Point::new(rng.coordinate(), rng.coordinate());
            let ids = block_ids(&tree);
            if ids.is_empty() || rng.next_u64() % 3 == 0 {
                let block_type = BlockType::ALL[rng.choose_index(BlockType::ALL.len())];
                ctl.on_drag_start_template(BlockTemplate::for_type(block_type), grab, grab, 0);
            } else {
                let id = ids[rng.choose_index(ids.len())];
                ctl.on_drag_start_block(id, grab, 0).expect("start");
            }
            ctl.on_drag_move(release, 10);
            let target = match rng.choose_index(4) {
                0 => DropTarget::None,
                1 if !ids.is_empty() => DropTarget::Container(ids[rng.choose_index(ids.len())]),
                _ => DropTarget::Canvas,
            };
            let report = ctl.on_drag_end(release, 20, target);
            prop_assert!(report.is_ok(), "drop failed at step {step}: {report:?}");
            assert_tree_invariants(ctl.tree());
        }
    }
}

#[test]
fn fuzz_seed_corpus_preserves_invariants() {
    let seeds = [
        0_u64,
        1,
        2,
        3,
        5,
        8,
        13,
        21,
        34,
        55,
        89,
        144,
        u32::MAX as u64,
        (u32::MAX as u64) + 1,
        u64::MAX - 1,
        u64::MAX,
    ];

    for seed in seeds {
        let (tree, _) = run_sequence(seed, 200);
        assert_tree_invariants(&tree);
    }
}

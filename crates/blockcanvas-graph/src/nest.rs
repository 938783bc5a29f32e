#![forbid(unsafe_code)]

//! Containment validator.
//!
//! Decides whether a dragged block may be nested inside a container and, if
//! so, plans the operations that move it there. Checks run in a fixed order
//! (unknown container, unknown block, self-nesting, cycle, capability) so a
//! rejected request always reports the same reason.

use std::fmt;

use blockcanvas_core::geometry::Point;

use crate::block::BlockId;
use crate::catalog::BlockTemplate;
use crate::tree::{BlockOperation, BlockTree};

/// The block being dropped into a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraggedBlock<'a> {
    /// A block already in the tree.
    Placed(BlockId),
    /// A palette template, instantiated with the pre-allocated `id`.
    Template {
        id: BlockId,
        template: &'a BlockTemplate,
    },
}

impl DraggedBlock<'_> {
    #[must_use]
    pub const fn id(&self) -> BlockId {
        match self {
            Self::Placed(id) | Self::Template { id, .. } => *id,
        }
    }
}

/// Why a nest request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestRejection {
    MissingContainer { container: BlockId },
    MissingBlock { block: BlockId },
    SelfNesting { block: BlockId },
    /// The container sits inside the dragged block.
    Cycle { container: BlockId, dragged: BlockId },
    NotNestable { container: BlockId },
}

impl fmt::Display for NestRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingContainer { container } => {
                write!(f, "container {container} not found")
            }
            Self::MissingBlock { block } => write!(f, "block {block} not found"),
            Self::SelfNesting { block } => {
                write!(f, "cannot nest block {block} inside itself")
            }
            Self::Cycle { container, dragged } => write!(
                f,
                "cannot nest block {dragged} inside {container}, which it contains"
            ),
            Self::NotNestable { container } => {
                write!(f, "block {container} does not accept nested blocks")
            }
        }
    }
}

impl std::error::Error for NestRejection {}

/// Accepted nest request.
#[derive(Debug, Clone, PartialEq)]
pub struct NestPlan {
    pub container: BlockId,
    pub block: BlockId,
    /// Insertion index in the container's nested sequence.
    pub index: usize,
    /// Drop position in container-relative coordinates.
    pub relative_position: Point,
    pub operations: Vec<BlockOperation>,
}

/// Validator verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum NestResult {
    Accepted(NestPlan),
    Rejected(NestRejection),
}

impl NestResult {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Run the nesting checks for `dragged` into `container`.
pub fn check_nest(
    tree: &BlockTree,
    container: BlockId,
    dragged: DraggedBlock<'_>,
) -> Result<(), NestRejection> {
    let Some(target) = tree.block(container) else {
        return Err(NestRejection::MissingContainer { container });
    };
    if let DraggedBlock::Placed(block) = dragged {
        if !tree.contains(block) {
            return Err(NestRejection::MissingBlock { block });
        }
        if block == container {
            return Err(NestRejection::SelfNesting { block });
        }
        if tree.is_nested_within(container, block) {
            return Err(NestRejection::Cycle {
                container,
                dragged: block,
            });
        }
    }
    if !target.can_nest {
        return Err(NestRejection::NotNestable { container });
    }
    Ok(())
}

/// Whether the placed block `dragged` may be nested inside `container`.
#[must_use]
pub fn can_nest(tree: &BlockTree, container: BlockId, dragged: BlockId) -> bool {
    check_nest(tree, container, DraggedBlock::Placed(dragged)).is_ok()
}

/// Validate and plan a drop of `dragged` into `container`.
///
/// `drop_position` is in canvas coordinates; the plan stores it relative to
/// the container. `index` defaults to appending.
#[must_use]
pub fn resolve_container_drop(
    tree: &BlockTree,
    container: BlockId,
    dragged: DraggedBlock<'_>,
    drop_position: Point,
    index: Option<usize>,
) -> NestResult {
    if let Err(rejection) = check_nest(tree, container, dragged) {
        tracing::debug!(
            target: "blockcanvas.nest",
            container = %container,
            dragged = %dragged.id(),
            reason = %rejection,
            "nest rejected"
        );
        return NestResult::Rejected(rejection);
    }

    let block = dragged.id();
    let origin = tree
        .stored_absolute_position(container)
        .unwrap_or(Point::ORIGIN);
    let relative_position = Point::ORIGIN + origin.delta_to(drop_position);

    let nested = tree
        .block(container)
        .map(|c| c.nested_blocks.as_slice())
        .unwrap_or_default();
    let already_inside = nested.contains(&block);
    let len = if already_inside {
        nested.len() - 1
    } else {
        nested.len()
    };
    let index = index.map_or(len, |index| index.min(len));

    let mut operations = Vec::with_capacity(3);
    if let DraggedBlock::Template { template, .. } = dragged {
        operations.push(BlockOperation::CreateBlock {
            id: block,
            template: template.clone(),
            position: relative_position,
        });
    }
    operations.push(BlockOperation::SetContainer {
        block,
        container: Some(container),
        index: Some(index),
    });
    operations.push(BlockOperation::SetPosition {
        id: block,
        position: relative_position,
    });

    NestResult::Accepted(NestPlan {
        container,
        block,
        index,
        relative_position,
        operations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BlockType;
    use crate::tree::BlockStore;
    use proptest::prelude::*;

    fn create(store: &mut BlockStore, ty: BlockType, x: f64, y: f64) -> BlockId {
        store
            .create_block(&BlockTemplate::for_type(ty), Point::new(x, y))
            .expect("create")
    }

    #[test]
    fn container_cannot_nest_itself() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::If, 0.0, 0.0);
        let before = store.tree().state_hash();
        assert!(!can_nest(store.tree(), c, c));
        assert_eq!(
            check_nest(store.tree(), c, DraggedBlock::Placed(c)),
            Err(NestRejection::SelfNesting { block: c })
        );
        assert_eq!(store.tree().state_hash(), before);
    }

    #[test]
    fn container_cannot_nest_inside_its_descendant() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::If, 0.0, 0.0);
        let d = create(&mut store, BlockType::ForLoop, 0.0, 0.0);
        store.set_container(d, Some(c), None).expect("nest");
        assert!(!can_nest(store.tree(), d, c));
        assert_eq!(
            check_nest(store.tree(), d, DraggedBlock::Placed(c)),
            Err(NestRejection::Cycle {
                container: d,
                dragged: c
            })
        );
        // The other direction is fine.
        assert!(can_nest(store.tree(), c, d));
    }

    #[test]
    fn non_containers_reject() {
        let mut store = BlockStore::new();
        let leaf = create(&mut store, BlockType::Add, 0.0, 0.0);
        let other = create(&mut store, BlockType::End, 0.0, 0.0);
        assert_eq!(
            check_nest(store.tree(), leaf, DraggedBlock::Placed(other)),
            Err(NestRejection::NotNestable { container: leaf })
        );
        let template = BlockTemplate::for_type(BlockType::Start);
        assert_eq!(
            check_nest(
                store.tree(),
                leaf,
                DraggedBlock::Template {
                    id: store.tree().next_id(),
                    template: &template
                }
            ),
            Err(NestRejection::NotNestable { container: leaf })
        );
    }

    #[test]
    fn unknown_ids_reject() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::If, 0.0, 0.0);
        let ghost = BlockId::new(99).expect("id");
        assert_eq!(
            check_nest(store.tree(), ghost, DraggedBlock::Placed(c)),
            Err(NestRejection::MissingContainer { container: ghost })
        );
        assert_eq!(
            check_nest(store.tree(), c, DraggedBlock::Placed(ghost)),
            Err(NestRejection::MissingBlock { block: ghost })
        );
    }

    #[test]
    fn template_drop_plans_create_nest_and_position() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::ForLoop, 100.0, 100.0);
        let template = BlockTemplate::for_type(BlockType::SetVariable);
        let id = store.tree().next_id();
        let NestResult::Accepted(plan) = resolve_container_drop(
            store.tree(),
            c,
            DraggedBlock::Template {
                id,
                template: &template,
            },
            Point::new(130.0, 170.0),
            None,
        ) else {
            panic!("expected acceptance");
        };
        assert_eq!(plan.relative_position, Point::new(30.0, 70.0));
        assert_eq!(plan.index, 0);
        assert_eq!(plan.operations.len(), 3);

        store.commit(plan.operations).expect("commit plan");
        let tree = store.tree();
        assert_eq!(tree.block(c).map(|b| b.nested_blocks.clone()), Some(vec![id]));
        assert_eq!(
            tree.block(id).map(|b| (b.container_id, b.position)),
            Some((Some(c), Point::new(30.0, 70.0)))
        );
    }

    #[test]
    fn placed_drop_splices_chain_and_appends() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::If, 400.0, 0.0);
        let first = create(&mut store, BlockType::Add, 400.0, 0.0);
        store.set_container(first, Some(c), None).expect("nest");
        let a = create(&mut store, BlockType::Start, 0.0, 0.0);
        let b = create(&mut store, BlockType::SetVariable, 0.0, 50.0);
        let end = create(&mut store, BlockType::End, 0.0, 100.0);
        store.reparent_sequential(b, Some(a)).expect("link");
        store.reparent_sequential(end, Some(b)).expect("link");

        let NestResult::Accepted(plan) = resolve_container_drop(
            store.tree(),
            c,
            DraggedBlock::Placed(b),
            Point::new(420.0, 90.0),
            None,
        ) else {
            panic!("expected acceptance");
        };
        assert_eq!(plan.index, 1);
        store.commit(plan.operations).expect("commit plan");
        let tree = store.tree();
        assert_eq!(
            tree.block(c).map(|b| b.nested_blocks.clone()),
            Some(vec![first, b])
        );
        assert_eq!(tree.block(a).and_then(|x| x.child_id), Some(end));
        assert_eq!(tree.block(end).and_then(|x| x.parent_id), Some(a));
    }

    #[test]
    fn reordering_within_same_container_clamps_to_length() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::If, 0.0, 0.0);
        let x = create(&mut store, BlockType::Add, 0.0, 0.0);
        let y = create(&mut store, BlockType::Subtract, 0.0, 0.0);
        store.set_container(x, Some(c), None).expect("nest");
        store.set_container(y, Some(c), None).expect("nest");
        let NestResult::Accepted(plan) = resolve_container_drop(
            store.tree(),
            c,
            DraggedBlock::Placed(x),
            Point::ORIGIN,
            Some(10),
        ) else {
            panic!("expected acceptance");
        };
        assert_eq!(plan.index, 1);
        store.commit(plan.operations).expect("commit");
        assert_eq!(
            store.tree().block(c).map(|b| b.nested_blocks.clone()),
            Some(vec![y, x])
        );
    }

    proptest! {
        #[test]
        fn rejection_is_idempotent(depth in 1usize..6, pick in 0usize..6) {
            let mut store = BlockStore::new();
            let mut ids = Vec::new();
            for i in 0..depth {
                let id = create(&mut store, BlockType::WhileLoop, 0.0, 0.0);
                if i > 0 {
                    store.set_container(id, Some(ids[i - 1]), None).expect("nest");
                }
                ids.push(id);
            }
            let root = ids[0];
            let container = ids[pick % depth];
            let first = resolve_container_drop(
                store.tree(), container, DraggedBlock::Placed(root), Point::ORIGIN, None,
            );
            let second = resolve_container_drop(
                store.tree(), container, DraggedBlock::Placed(root), Point::ORIGIN, None,
            );
            prop_assert!(!first.is_accepted());
            prop_assert_eq!(first, second);
        }
    }
}

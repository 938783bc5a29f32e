#![forbid(unsafe_code)]

//! Drag controller: the drag machine wired to the block store.
//!
//! The controller owns the [`BlockStore`], the [`DragMachine`] and the
//! [`CanvasConfig`]. Pointer callbacks feed the machine; when a transition
//! ends a drag (`Committed`, or `Cancelled` after activation) the drop is
//! planned with [`plan_drop`] against the current snapshot and committed as
//! one atomic batch.
//!
//! Drop resolution:
//!
//! | Source    | Target         | Result |
//! |-----------|----------------|--------|
//! | toolkit   | canvas         | create, snapped into a chain when close |
//! | toolkit   | container      | create nested, or reject |
//! | toolkit   | none           | discard |
//! | workspace | canvas         | detach, move with downstream chain, snap |
//! | workspace | container      | nest, or reject with no mutation |
//! | workspace | none           | remove (or restore, per policy) |
//!
//! A canvas drop whose proposed position falls outside the configured
//! [`CanvasBounds`](crate::config::CanvasBounds) counts as `none`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use blockcanvas_core::geometry::Point;

use crate::block::BlockId;
use crate::catalog::BlockTemplate;
use crate::config::{CanvasConfig, OutOfBoundsPolicy};
use crate::drag::{
    ActiveDrag, DragCancelReason, DragEffect, DragInput, DragMachine, DragPhase, DragSource,
    DragTransition, DropTarget,
};
use crate::layout::{BlockLayout, LayoutError};
use crate::nest::{DraggedBlock, NestRejection, NestResult, resolve_container_drop};
use crate::snap::{SnapProbe, SnapResolution, find_snap_target};
use crate::tree::{BlockOperation, BlockOperationError, BlockStore, BlockTree, RemovalPolicy};

/// What a finished drag did to the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// A template was instantiated.
    Created {
        block: BlockId,
        container: Option<BlockId>,
        snap: Option<SnapResolution>,
    },
    /// A placed block now sits on the canvas at `position`.
    Moved {
        block: BlockId,
        position: Point,
        snap: Option<SnapResolution>,
        /// Container the block was dragged out of.
        left_container: Option<BlockId>,
    },
    Nested {
        block: BlockId,
        container: BlockId,
        index: usize,
    },
    /// Container drop refused; nothing changed.
    Rejected {
        block: Option<BlockId>,
        reason: NestRejection,
    },
    /// Dropped outside every target and deleted, nested contents included
    /// under the cascade policy.
    Removed {
        block: BlockId,
        removed: Vec<BlockId>,
    },
    /// Dropped outside every target and left in place.
    Restored { block: BlockId },
    /// A template dropped outside every target.
    Discarded,
}

impl DropOutcome {
    /// Whether the drop changed the tree.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Created { .. } | Self::Moved { .. } | Self::Nested { .. } | Self::Removed { .. }
        )
    }
}

/// Operations for one drop plus the outcome they produce.
#[derive(Debug, Clone, PartialEq)]
pub struct DropPlan {
    pub operations: Vec<BlockOperation>,
    pub outcome: DropOutcome,
}

/// Result of one controller callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DragReport {
    pub transition: DragTransition,
    /// Present when the transition ended a drag.
    pub outcome: Option<DropOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerError {
    InvalidConfig(Vec<String>),
    UnknownBlock { block: BlockId },
    Layout(LayoutError),
    Commit(BlockOperationError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(errors) => {
                write!(f, "invalid canvas config: {}", errors.join("; "))
            }
            Self::UnknownBlock { block } => write!(f, "block {block} not found"),
            Self::Layout(err) => write!(f, "layout failed: {err}"),
            Self::Commit(err) => write!(f, "drop commit failed: {err}"),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Layout(err) => Some(err),
            Self::Commit(err) => Some(err),
            Self::InvalidConfig(_) | Self::UnknownBlock { .. } => None,
        }
    }
}

impl From<LayoutError> for ControllerError {
    fn from(err: LayoutError) -> Self {
        Self::Layout(err)
    }
}

impl From<BlockOperationError> for ControllerError {
    fn from(err: BlockOperationError) -> Self {
        Self::Commit(err)
    }
}

/// The target a drop actually resolves against: canvas drops outside the
/// configured bounds count as no target.
#[must_use]
pub fn effective_target(
    drag: &ActiveDrag,
    target: DropTarget,
    config: &CanvasConfig,
) -> DropTarget {
    match target {
        DropTarget::Canvas if !config.canvas.contains(drag.proposed_position()) => {
            DropTarget::None
        }
        other => other,
    }
}

/// Plan the tree operations for dropping `drag` on `target`.
///
/// Pure: `tree` is only read.
pub fn plan_drop(
    tree: &BlockTree,
    drag: &ActiveDrag,
    target: DropTarget,
    config: &CanvasConfig,
) -> Result<DropPlan, ControllerError> {
    let target = effective_target(drag, target, config);
    let proposed = drag.proposed_position();
    match (&drag.source, target) {
        (DragSource::Toolkit { template }, DropTarget::Canvas) => {
            Ok(plan_template_on_canvas(tree, template, proposed, config))
        }
        (DragSource::Toolkit { template }, DropTarget::Container(container)) => {
            let id = tree.next_id();
            let dragged = DraggedBlock::Template { id, template };
            Ok(match resolve_container_drop(tree, container, dragged, proposed, None) {
                NestResult::Accepted(plan) => DropPlan {
                    operations: plan.operations,
                    outcome: DropOutcome::Created {
                        block: id,
                        container: Some(container),
                        snap: None,
                    },
                },
                NestResult::Rejected(reason) => DropPlan {
                    operations: Vec::new(),
                    outcome: DropOutcome::Rejected {
                        block: None,
                        reason,
                    },
                },
            })
        }
        (DragSource::Toolkit { .. }, DropTarget::None) => Ok(DropPlan {
            operations: Vec::new(),
            outcome: DropOutcome::Discarded,
        }),
        (DragSource::Workspace { block }, DropTarget::Canvas) => {
            plan_block_on_canvas(tree, *block, proposed, config)
        }
        (DragSource::Workspace { block }, DropTarget::Container(container)) => {
            let block = *block;
            if !tree.contains(block) {
                return Err(ControllerError::UnknownBlock { block });
            }
            let dragged = DraggedBlock::Placed(block);
            Ok(match resolve_container_drop(tree, container, dragged, proposed, None) {
                NestResult::Accepted(plan) => DropPlan {
                    outcome: DropOutcome::Nested {
                        block,
                        container,
                        index: plan.index,
                    },
                    operations: plan.operations,
                },
                NestResult::Rejected(reason) => DropPlan {
                    operations: Vec::new(),
                    outcome: DropOutcome::Rejected {
                        block: Some(block),
                        reason,
                    },
                },
            })
        }
        (DragSource::Workspace { block }, DropTarget::None) => {
            plan_block_off_canvas(tree, *block, config)
        }
    }
}

fn plan_template_on_canvas(
    tree: &BlockTree,
    template: &BlockTemplate,
    proposed: Point,
    config: &CanvasConfig,
) -> DropPlan {
    let id = tree.next_id();
    let snap = find_snap_target(
        tree,
        SnapProbe::detached(proposed),
        &BTreeSet::new(),
        config.snap,
    );
    let mut operations = vec![BlockOperation::CreateBlock {
        id,
        template: template.clone(),
        position: snap.map_or(proposed, |hit| hit.position),
    }];
    if let Some(hit) = &snap {
        let (parent, child) = hit.link(id);
        operations.push(BlockOperation::ReparentSequential {
            child,
            parent: Some(parent),
        });
    }
    DropPlan {
        operations,
        outcome: DropOutcome::Created {
            block: id,
            container: None,
            snap,
        },
    }
}

fn plan_block_on_canvas(
    tree: &BlockTree,
    id: BlockId,
    proposed: Point,
    config: &CanvasConfig,
) -> Result<DropPlan, ControllerError> {
    let block = tree
        .block(id)
        .ok_or(ControllerError::UnknownBlock { block: id })?;
    let left_container = block.container_id;

    let mut operations = Vec::new();
    if left_container.is_some() {
        operations.push(BlockOperation::SetContainer {
            block: id,
            container: None,
            index: None,
        });
        operations.push(BlockOperation::SetPosition {
            id,
            position: proposed,
        });
    } else {
        if block.parent_id.is_some() {
            operations.push(BlockOperation::ReparentSequential {
                child: id,
                parent: None,
            });
        }
        let delta = block.position.delta_to(proposed);
        if !delta.is_zero() {
            operations.push(BlockOperation::MoveBlockGroup { id, delta });
        }
    }

    // Snap against the tree as it looks once the block has been detached.
    let mut scratch = tree.clone();
    scratch.apply_batch(0, operations.clone())?;
    let exclude: BTreeSet<BlockId> = scratch.chain_members(id).into_iter().collect();
    let snap = find_snap_target(
        &scratch,
        SnapProbe::for_block(&scratch, id, proposed),
        &exclude,
        config.snap,
    );
    if let Some(hit) = &snap {
        operations.extend(hit.operations(id, proposed));
    }

    Ok(DropPlan {
        operations,
        outcome: DropOutcome::Moved {
            block: id,
            position: snap.map_or(proposed, |hit| hit.position),
            snap,
            left_container,
        },
    })
}

fn plan_block_off_canvas(
    tree: &BlockTree,
    id: BlockId,
    config: &CanvasConfig,
) -> Result<DropPlan, ControllerError> {
    if !tree.contains(id) {
        return Err(ControllerError::UnknownBlock { block: id });
    }
    Ok(match config.policy.out_of_bounds {
        OutOfBoundsPolicy::Restore => DropPlan {
            operations: Vec::new(),
            outcome: DropOutcome::Restored { block: id },
        },
        OutOfBoundsPolicy::Delete => {
            let policy = config.policy.removal;
            let mut removed = vec![id];
            if policy == RemovalPolicy::Cascade {
                removed.extend(tree.nested_closure(id));
            }
            DropPlan {
                operations: vec![BlockOperation::RemoveBlock { id, policy }],
                outcome: DropOutcome::Removed { block: id, removed },
            }
        }
    })
}

/// Single-drag controller over a block store.
#[derive(Debug, Clone)]
pub struct DragController {
    store: BlockStore,
    machine: DragMachine,
    config: CanvasConfig,
}

impl DragController {
    /// Controller over an empty tree.
    pub fn new(config: CanvasConfig) -> Result<Self, ControllerError> {
        Self::with_store(BlockStore::new(), config)
    }

    /// Controller over an existing store. Rejects invalid configs.
    pub fn with_store(store: BlockStore, config: CanvasConfig) -> Result<Self, ControllerError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ControllerError::InvalidConfig(errors));
        }
        let machine = config
            .drag_machine()
            .map_err(|err| ControllerError::InvalidConfig(vec![err.to_string()]))?;
        Ok(Self {
            store,
            machine,
            config,
        })
    }

    #[must_use]
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Direct store access for edits outside a drag, such as field input.
    pub fn store_mut(&mut self) -> &mut BlockStore {
        &mut self.store
    }

    #[must_use]
    pub fn tree(&self) -> &BlockTree {
        self.store.tree()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<BlockTree> {
        self.store.snapshot()
    }

    #[must_use]
    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    #[must_use]
    pub fn machine(&self) -> &DragMachine {
        &self.machine
    }

    #[must_use]
    pub fn phase(&self) -> DragPhase {
        self.machine.phase()
    }

    #[must_use]
    pub fn active_drag(&self) -> Option<&ActiveDrag> {
        self.machine.active_drag()
    }

    /// Flow layout of the current tree.
    pub fn layout(&self) -> Result<BlockLayout, LayoutError> {
        BlockLayout::compute(self.store.tree(), &self.config.layout)
    }

    /// Drop target under `pointer`. Nesting zones of the dragged block and
    /// its contents are skipped.
    pub fn hit_test(&self, pointer: Point) -> Result<DropTarget, ControllerError> {
        let layout = self.layout()?;
        let mut excluded = BTreeSet::new();
        if let Some(block) = self.machine.active_drag().and_then(ActiveDrag::block_id) {
            excluded.insert(block);
            excluded.extend(self.store.tree().nested_closure(block));
        }
        Ok(layout.hit_test(pointer, &self.config.canvas, &excluded))
    }

    /// Press on a placed block.
    pub fn on_drag_start_block(
        &mut self,
        block: BlockId,
        pointer: Point,
        timestamp_ms: u64,
    ) -> Result<DragReport, ControllerError> {
        let tree = self.store.tree();
        let record = tree
            .block(block)
            .ok_or(ControllerError::UnknownBlock { block })?;
        let origin = self
            .layout()
            .ok()
            .and_then(|layout| layout.absolute_position(block))
            .or_else(|| tree.stored_absolute_position(block))
            .unwrap_or(record.position);
        let drag = ActiveDrag::workspace(record, origin, pointer);
        let transition = self.machine.apply(DragInput::PointerDown { drag, timestamp_ms });
        self.finish(transition)
    }

    /// Press on a palette entry displayed at `palette_origin`.
    pub fn on_drag_start_template(
        &mut self,
        template: BlockTemplate,
        palette_origin: Point,
        pointer: Point,
        timestamp_ms: u64,
    ) -> DragReport {
        let drag = ActiveDrag::toolkit(template, palette_origin, pointer);
        let transition = self.machine.apply(DragInput::PointerDown { drag, timestamp_ms });
        DragReport {
            transition,
            outcome: None,
        }
    }

    pub fn on_drag_move(&mut self, pointer: Point, timestamp_ms: u64) -> DragReport {
        let transition = self.machine.apply(DragInput::PointerMove {
            pointer,
            timestamp_ms,
        });
        DragReport {
            transition,
            outcome: None,
        }
    }

    /// Release over `target`.
    pub fn on_drag_end(
        &mut self,
        pointer: Point,
        timestamp_ms: u64,
        target: DropTarget,
    ) -> Result<DragReport, ControllerError> {
        let transition = self.machine.apply(DragInput::PointerUp {
            pointer,
            timestamp_ms,
            target,
        });
        self.finish(transition)
    }

    /// Release, resolving the target with [`hit_test`](Self::hit_test).
    pub fn on_drag_end_at(
        &mut self,
        pointer: Point,
        timestamp_ms: u64,
    ) -> Result<DragReport, ControllerError> {
        let target = self.hit_test(pointer)?;
        self.on_drag_end(pointer, timestamp_ms, target)
    }

    pub fn on_drag_cancel(
        &mut self,
        reason: DragCancelReason,
    ) -> Result<DragReport, ControllerError> {
        let transition = self.machine.apply(DragInput::Cancel { reason });
        self.finish(transition)
    }

    pub fn on_blur(&mut self) -> Result<DragReport, ControllerError> {
        let transition = self.machine.apply(DragInput::Blur);
        self.finish(transition)
    }

    fn finish(&mut self, transition: DragTransition) -> Result<DragReport, ControllerError> {
        let (drag, target) = match &transition.effect {
            DragEffect::Committed { drag, target } => (drag, *target),
            // A cancelled drag drops nowhere; a cancelled press never moved.
            DragEffect::Cancelled {
                drag,
                activated: true,
                ..
            } => (drag, DropTarget::None),
            _ => {
                return Ok(DragReport {
                    transition,
                    outcome: None,
                });
            }
        };
        let outcome = self.commit_drop(drag, target)?;
        Ok(DragReport {
            transition,
            outcome: Some(outcome),
        })
    }

    fn commit_drop(
        &mut self,
        drag: &ActiveDrag,
        target: DropTarget,
    ) -> Result<DropOutcome, ControllerError> {
        let span = tracing::debug_span!(
            "drag.commit",
            origin = ?drag.origin_kind(),
            drop_target = %target,
            block_type = %drag.block_type,
        );
        let _guard = span.enter();

        let plan = plan_drop(self.store.tree(), drag, target, &self.config)?;
        if !plan.operations.is_empty() {
            self.store.commit(plan.operations)?;
        }

        match &plan.outcome {
            DropOutcome::Removed { block, removed } => tracing::info!(
                target: "blockcanvas.drag",
                block = %block,
                removed = removed.len(),
                "block dropped outside the canvas was removed"
            ),
            DropOutcome::Rejected { block, reason } => tracing::debug!(
                target: "blockcanvas.drag",
                block = ?block.map(BlockId::get),
                reason = %reason,
                "drop rejected"
            ),
            outcome => tracing::debug!(
                target: "blockcanvas.drag",
                outcome = ?outcome,
                "drop committed"
            ),
        }
        Ok(plan.outcome)
    }
}

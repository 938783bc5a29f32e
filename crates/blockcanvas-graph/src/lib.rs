#![forbid(unsafe_code)]

//! Block canvas graph
//!
//! The model and interaction engine behind a visual block-programming
//! canvas: a tree of typed blocks linked into sequential chains and nested
//! inside container blocks, edited by dragging.
//!
//! # Key Components
//!
//! - [`BlockStore`] - Owner of the immutable [`BlockTree`] snapshot; every
//!   edit is a [`BlockOperation`] committed atomically
//! - [`find_snap_target`] - Proximity snapping of a moved block onto a chain
//! - [`resolve_container_drop`] - Containment validation and nesting plans
//! - [`DragMachine`] - Pointer lifecycle (`Idle`, `Armed`, `Dragging`)
//! - [`DragController`] - The machine wired to the store; turns drops into
//!   commits
//! - [`BlockLayout`] - Flow layout of nested blocks and drop-target hit tests
//! - [`Catalog`] - Palette templates per [`BlockType`]
//! - [`CanvasConfig`] - Tunables loaded from TOML, JSON and the environment
//!
//! # Role in the block canvas
//! `blockcanvas-graph` sits on top of `blockcanvas-core` geometry and gesture
//! activation. Renderers read snapshots and layouts; hosts feed pointer
//! events to the controller.
//!
//! # Logging
//! Events are emitted with `tracing` under the `blockcanvas.store`,
//! `blockcanvas.snap`, `blockcanvas.nest`, `blockcanvas.drag` and
//! `blockcanvas.config` targets. Installing a subscriber is up to the host.

pub mod block;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod drag;
pub mod layout;
pub mod nest;
pub mod snap;
pub mod tree;

pub use block::{Block, BlockId, BlockOrigin};
pub use catalog::{BlockCategory, BlockTemplate, BlockType, Catalog, CatalogError};
pub use config::{
    CanvasBounds, CanvasConfig, CanvasConfigError, DragConfig, DropPolicy, OutOfBoundsPolicy,
};
pub use controller::{
    ControllerError, DragController, DragReport, DropOutcome, DropPlan, plan_drop,
};
pub use drag::{
    ActiveDrag, DragCancelReason, DragEffect, DragInput, DragMachine, DragMachineError,
    DragNoopReason, DragPhase, DragSource, DragState, DragTransition, DropTarget,
    DropTargetParseError,
};
pub use layout::{BlockLayout, BlockLayoutEntry, LayoutError, LayoutMetrics, MAX_NEST_DEPTH};
pub use nest::{
    DraggedBlock, NestPlan, NestRejection, NestResult, can_nest, check_nest,
    resolve_container_drop,
};
pub use snap::{
    SnapDirection, SnapProbe, SnapResolution, SnapTuning, SnapTuningError, find_snap_target,
};
pub use tree::{
    BlockIdAllocator, BlockModelError, BlockOperation, BlockOperationError,
    BlockOperationFailure, BlockOperationKind, BlockOperationOutcome, BlockStore, BlockTree,
    BlockTreeSnapshot, RemovalPolicy,
};

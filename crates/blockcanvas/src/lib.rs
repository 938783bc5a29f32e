#![forbid(unsafe_code)]

//! Block canvas public facade crate.
//!
//! This crate provides the stable surface area for hosts. It re-exports the
//! common types from the internal crates, a unified [`Error`], a prelude,
//! and helpers that load configuration and open a canvas in one call.
//!
//! ```rust,ignore
//! use blockcanvas::prelude::*;
//!
//! let config = blockcanvas::load_config("blockcanvas.toml")?;
//! let mut canvas = blockcanvas::open_canvas(config, None)?;
//! canvas.on_drag_start_template(template, palette_origin, pointer, now_ms);
//! ```

use std::path::Path;

pub mod error;

pub use error::{Error, Result};

// --- Core re-exports -------------------------------------------------------

pub use blockcanvas_core::geometry::{Delta, Point, Rect};
pub use blockcanvas_core::gesture::{ActivationConstraint, ActivationDecision};

// --- Graph re-exports ------------------------------------------------------

pub use blockcanvas_graph::{
    ActiveDrag, Block, BlockCategory, BlockId, BlockLayout, BlockOperation, BlockStore,
    BlockTemplate, BlockTree, BlockTreeSnapshot, BlockType, CanvasBounds, CanvasConfig, Catalog,
    DragCancelReason, DragController, DragEffect, DragPhase, DragReport, DropOutcome, DropTarget,
    LayoutMetrics, OutOfBoundsPolicy, RemovalPolicy, SnapDirection, SnapResolution,
};

/// Load a config file (`.json` as JSON, anything else as TOML), validate it
/// and apply `BLOCKCANVAS_*` environment overrides.
pub fn load_config(path: impl AsRef<Path>) -> Result<CanvasConfig> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        CanvasConfig::load_json_file(path)?
    } else {
        CanvasConfig::load_toml_file(path)?
    };
    let config = config.with_env_overrides().validated()?;
    tracing::debug!(
        target: "blockcanvas.config",
        path = %path.display(),
        "canvas config loaded"
    );
    Ok(config)
}

/// Open a drag controller over `snapshot` (or an empty tree).
pub fn open_canvas(
    config: CanvasConfig,
    snapshot: Option<BlockTreeSnapshot>,
) -> Result<DragController> {
    let store = match snapshot {
        Some(snapshot) => BlockStore::from_snapshot(snapshot)?,
        None => BlockStore::new(),
    };
    Ok(DragController::with_store(store, config)?)
}

pub mod prelude {
    pub use crate::{
        Block, BlockId, BlockTemplate, BlockTree, BlockType, CanvasConfig, Catalog,
        DragController, DropOutcome, DropTarget, Error, Point, Result,
    };

    pub use crate::{core, graph};
}

pub use blockcanvas_core as core;
pub use blockcanvas_graph as graph;

#![forbid(unsafe_code)]

//! Core: canvas geometry and pointer gesture activation.
//!
//! # Role in the block canvas
//! `blockcanvas-core` is the input layer. It owns the coordinate types every
//! other crate speaks in and decides when a pointer press becomes a drag.
//!
//! # Primary responsibilities
//! - **Geometry**: [`geometry::Point`], [`geometry::Delta`] and
//!   [`geometry::Rect`] in canvas units.
//! - **Gesture activation**: [`gesture::ActivationTracker`] separates clicks
//!   (in-place edits of block fields) from drags.
//!
//! # How it fits in the system
//! `blockcanvas-graph` consumes these types for its block tree, snap
//! resolver and drag lifecycle. Nothing here knows about blocks.

pub mod geometry;
pub mod gesture;

pub use geometry::{Delta, Point, Rect};
pub use gesture::{ActivationConstraint, ActivationDecision, ActivationError, ActivationTracker};

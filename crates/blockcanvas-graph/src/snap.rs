#![forbid(unsafe_code)]

//! Proximity snap resolver.
//!
//! Given where a block would land, find the top-level block it should chain
//! to. A moved block either goes **below** a candidate (the candidate becomes
//! its predecessor) or **above** it (the moved block becomes the candidate's
//! predecessor). Candidates are scanned in id order; the smallest vertical
//! distance wins and ties keep the first candidate.
//!
//! The resolver is pure: it returns a [`SnapResolution`] whose
//! [`operations`](SnapResolution::operations) the caller commits.

use std::collections::BTreeSet;
use std::fmt;

use blockcanvas_core::geometry::{Delta, Point};
use serde::{Deserialize, Serialize};

use crate::block::BlockId;
use crate::tree::{BlockOperation, BlockTree};

pub const DEFAULT_BLOCK_HEIGHT: f64 = 50.0;
pub const DEFAULT_SNAP_DISTANCE: f64 = 40.0;
pub const DEFAULT_SNAP_X_DISTANCE: f64 = 40.0;

/// Snap geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapTuning {
    /// Vertical pitch between chained blocks.
    pub block_height: f64,
    /// Maximum vertical distance from the snapped slot.
    pub snap_distance: f64,
    /// Maximum horizontal misalignment.
    pub snap_x_distance: f64,
}

impl Default for SnapTuning {
    fn default() -> Self {
        Self {
            block_height: DEFAULT_BLOCK_HEIGHT,
            snap_distance: DEFAULT_SNAP_DISTANCE,
            snap_x_distance: DEFAULT_SNAP_X_DISTANCE,
        }
    }
}

impl SnapTuning {
    pub fn validate(self) -> Result<(), SnapTuningError> {
        if !self.block_height.is_finite() || self.block_height <= 0.0 {
            return Err(SnapTuningError::InvalidBlockHeight {
                value: self.block_height,
            });
        }
        if !self.snap_distance.is_finite() || self.snap_distance < 0.0 {
            return Err(SnapTuningError::InvalidSnapDistance {
                value: self.snap_distance,
            });
        }
        if !self.snap_x_distance.is_finite() || self.snap_x_distance < 0.0 {
            return Err(SnapTuningError::InvalidSnapXDistance {
                value: self.snap_x_distance,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapTuningError {
    InvalidBlockHeight { value: f64 },
    InvalidSnapDistance { value: f64 },
    InvalidSnapXDistance { value: f64 },
}

impl fmt::Display for SnapTuningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBlockHeight { value } => {
                write!(f, "block_height must be finite and > 0 (got {value})")
            }
            Self::InvalidSnapDistance { value } => {
                write!(f, "snap_distance must be finite and >= 0 (got {value})")
            }
            Self::InvalidSnapXDistance { value } => {
                write!(f, "snap_x_distance must be finite and >= 0 (got {value})")
            }
        }
    }
}

impl std::error::Error for SnapTuningError {}

/// Which side of the candidate the moved block lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapDirection {
    /// Moved block follows the candidate.
    Below,
    /// Moved block precedes the candidate.
    Above,
}

/// The moved block as the resolver sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapProbe {
    pub position: Point,
    /// The moved block may take a predecessor.
    pub can_follow: bool,
    /// The moved block may take a successor (it has none).
    pub can_precede: bool,
}

impl SnapProbe {
    /// A block with no chain links, such as a fresh template instance.
    #[must_use]
    pub const fn detached(position: Point) -> Self {
        Self {
            position,
            can_follow: true,
            can_precede: true,
        }
    }

    /// Probe for a placed block, using its current links.
    #[must_use]
    pub fn for_block(tree: &BlockTree, id: BlockId, position: Point) -> Self {
        let block = tree.block(id);
        Self {
            position,
            can_follow: block.is_none_or(|b| b.parent_id.is_none()),
            can_precede: block.is_none_or(|b| b.child_id.is_none()),
        }
    }
}

/// A resolved snap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapResolution {
    pub target: BlockId,
    pub direction: SnapDirection,
    /// Where the moved block should land.
    pub position: Point,
    /// Vertical distance from the probe to `position`.
    pub distance: f64,
}

impl SnapResolution {
    /// `(predecessor, successor)` once `moved` is linked.
    #[must_use]
    pub const fn link(&self, moved: BlockId) -> (BlockId, BlockId) {
        match self.direction {
            SnapDirection::Below => (self.target, moved),
            SnapDirection::Above => (moved, self.target),
        }
    }

    /// Correction from the probed position to the snapped one.
    #[must_use]
    pub fn correction(&self, probed: Point) -> Delta {
        probed.delta_to(self.position)
    }

    /// Operations that move `moved` (with its chain group) onto the snapped
    /// position and link it.
    #[must_use]
    pub fn operations(&self, moved: BlockId, probed: Point) -> Vec<BlockOperation> {
        let (parent, child) = self.link(moved);
        let mut ops = Vec::with_capacity(2);
        let correction = self.correction(probed);
        if !correction.is_zero() {
            ops.push(BlockOperation::MoveBlockGroup {
                id: moved,
                delta: correction,
            });
        }
        ops.push(BlockOperation::ReparentSequential {
            child,
            parent: Some(parent),
        });
        ops
    }
}

/// Find the nearest eligible chain slot for `probe`.
///
/// `exclude` holds the moved block's own chain group.
#[must_use]
pub fn find_snap_target(
    tree: &BlockTree,
    probe: SnapProbe,
    exclude: &BTreeSet<BlockId>,
    tuning: SnapTuning,
) -> Option<SnapResolution> {
    let mut best: Option<SnapResolution> = None;

    for candidate in tree.top_level() {
        if exclude.contains(&candidate.id) {
            continue;
        }
        if (probe.position.x - candidate.position.x).abs() > tuning.snap_x_distance {
            continue;
        }

        let mut consider = |direction: SnapDirection, slot_y: f64| {
            let distance = (probe.position.y - slot_y).abs();
            if distance > tuning.snap_distance {
                return;
            }
            if best.is_none_or(|current| distance < current.distance) {
                best = Some(SnapResolution {
                    target: candidate.id,
                    direction,
                    position: Point::new(candidate.position.x, slot_y),
                    distance,
                });
            }
        };

        if probe.can_follow && candidate.child_id.is_none() {
            consider(
                SnapDirection::Below,
                candidate.position.y + tuning.block_height,
            );
        }
        if probe.can_precede && candidate.parent_id.is_none() {
            consider(
                SnapDirection::Above,
                candidate.position.y - tuning.block_height,
            );
        }
    }

    if let Some(resolution) = &best {
        tracing::debug!(
            target: "blockcanvas.snap",
            target_block = %resolution.target,
            direction = ?resolution.direction,
            distance = resolution.distance,
            "snap target found"
        );
    }
    best
}

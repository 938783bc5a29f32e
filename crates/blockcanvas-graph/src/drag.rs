#![forbid(unsafe_code)]

//! Drag lifecycle state machine.
//!
//! ```text
//!   Idle --PointerDown--> Armed --activation--> Dragging
//!    ^                      |                      |
//!    +------ Clicked -------+                      |
//!    +------ Cancelled -----+----------------------+
//!    +------ Committed ----------------------------+
//! ```
//!
//! `Armed` is a press that has not met its [`ActivationConstraint`] yet; a
//! release there is a click on the block's inputs, not a drop. The machine
//! never touches the block tree. It reports what happened as a
//! [`DragEffect`], and [`DragController`](crate::controller::DragController)
//! turns `Committed` and `Cancelled` effects into tree operations.
//!
//! Every call returns a [`DragTransition`]; ignored inputs produce explicit
//! `Noop` effects with a reason rather than errors.

use std::fmt;
use std::str::FromStr;

use blockcanvas_core::geometry::{Delta, Point};
use blockcanvas_core::gesture::{
    ActivationConstraint, ActivationDecision, ActivationError, ActivationTracker,
    crossed_threshold,
};
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockId, BlockOrigin};
use crate::catalog::{BlockTemplate, BlockType};

/// Minimum pointer travel between two reported drag updates.
pub const DEFAULT_UPDATE_HYSTERESIS: f64 = 1.0;

const CANVAS_DROP_ID: &str = "droppable-area";
const NESTING_DROP_PREFIX: &str = "nesting-";

/// What is being dragged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DragSource {
    Workspace { block: BlockId },
    Toolkit { template: BlockTemplate },
}

/// Descriptor captured at pickup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDrag {
    pub source: DragSource,
    pub block_type: BlockType,
    pub label: String,
    /// Block position at pickup (palette position for templates).
    pub origin: Point,
    /// Pointer position at pickup.
    pub pointer_origin: Point,
    /// Latest accepted pointer position.
    pub pointer: Point,
}

impl ActiveDrag {
    /// Pick up a placed block whose visual position is `origin`.
    #[must_use]
    pub fn workspace(block: &Block, origin: Point, pointer: Point) -> Self {
        Self {
            source: DragSource::Workspace { block: block.id },
            block_type: block.block_type,
            label: block.label.clone(),
            origin,
            pointer_origin: pointer,
            pointer,
        }
    }

    /// Pick up a palette template displayed at `origin`.
    #[must_use]
    pub fn toolkit(template: BlockTemplate, origin: Point, pointer: Point) -> Self {
        Self {
            block_type: template.block_type,
            label: template.label.clone(),
            source: DragSource::Toolkit { template },
            origin,
            pointer_origin: pointer,
            pointer,
        }
    }

    #[must_use]
    pub const fn origin_kind(&self) -> BlockOrigin {
        match self.source {
            DragSource::Workspace { .. } => BlockOrigin::Workspace,
            DragSource::Toolkit { .. } => BlockOrigin::Toolkit,
        }
    }

    #[must_use]
    pub const fn block_id(&self) -> Option<BlockId> {
        match self.source {
            DragSource::Workspace { block } => Some(block),
            DragSource::Toolkit { .. } => None,
        }
    }

    /// Where the pointer grabbed the block, relative to its origin.
    #[must_use]
    pub fn pointer_offset(&self) -> Delta {
        self.origin.delta_to(self.pointer_origin)
    }

    /// Visual translation of the dragged block.
    #[must_use]
    pub fn current_delta(&self) -> Delta {
        self.pointer_origin.delta_to(self.pointer)
    }

    /// Where the block lands if dropped now.
    #[must_use]
    pub fn proposed_position(&self) -> Point {
        self.origin + self.current_delta()
    }
}

/// Typed drop target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropTarget {
    /// The open canvas.
    Canvas,
    /// A container's nesting zone.
    Container(BlockId),
    /// Outside every valid target.
    None,
}

impl fmt::Display for DropTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canvas => f.write_str(CANVAS_DROP_ID),
            Self::Container(id) => write!(f, "{NESTING_DROP_PREFIX}{id}"),
            Self::None => f.write_str("none"),
        }
    }
}

/// Parses the droppable ids used by web hosts: `droppable-area`,
/// `nesting-<id>`, and `none` or the empty string for no target.
impl FromStr for DropTarget {
    type Err = DropTargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CANVAS_DROP_ID => Ok(Self::Canvas),
            "" | "none" => Ok(Self::None),
            _ => {
                let raw = s
                    .strip_prefix(NESTING_DROP_PREFIX)
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .ok_or_else(|| DropTargetParseError {
                        input: s.to_string(),
                    })?;
                BlockId::new(raw)
                    .map(Self::Container)
                    .map_err(|_| DropTargetParseError {
                        input: s.to_string(),
                    })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTargetParseError {
    pub input: String,
}

impl fmt::Display for DropTargetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized drop target {:?}", self.input)
    }
}

impl std::error::Error for DropTargetParseError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragCancelReason {
    EscapeKey,
    Blur,
    Programmatic,
}

/// Pointer input fed to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum DragInput {
    PointerDown {
        drag: ActiveDrag,
        timestamp_ms: u64,
    },
    /// Also used to poll a held press under a delay constraint.
    PointerMove {
        pointer: Point,
        timestamp_ms: u64,
    },
    PointerUp {
        pointer: Point,
        timestamp_ms: u64,
        target: DropTarget,
    },
    Cancel {
        reason: DragCancelReason,
    },
    Blur,
}

/// Lifecycle state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Armed {
        drag: ActiveDrag,
        tracker: ActivationTracker,
    },
    Dragging {
        drag: ActiveDrag,
    },
}

impl DragState {
    #[must_use]
    pub const fn phase(&self) -> DragPhase {
        match self {
            Self::Idle => DragPhase::Idle,
            Self::Armed { .. } => DragPhase::Armed,
            Self::Dragging { .. } => DragPhase::Dragging,
        }
    }

    #[must_use]
    pub const fn active_drag(&self) -> Option<&ActiveDrag> {
        match self {
            Self::Idle => None,
            Self::Armed { drag, .. } | Self::Dragging { drag } => Some(drag),
        }
    }
}

/// State discriminator reported in transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragPhase {
    Idle,
    Armed,
    Dragging,
}

/// Why an input was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragNoopReason {
    IdleWithoutActiveDrag,
    DragAlreadyInProgress,
    ActivationPending,
    ActivationAborted,
    BelowHysteresis,
}

/// Effect of one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum DragEffect {
    Armed { block: Option<BlockId> },
    DragStarted { delta: Delta },
    DragUpdated { delta: Delta },
    /// Released before activation: a click, never a mutation.
    Clicked { drag: ActiveDrag },
    /// Released while dragging.
    Committed { drag: ActiveDrag, target: DropTarget },
    /// `activated` is false when the press never became a drag.
    Cancelled {
        drag: ActiveDrag,
        reason: DragCancelReason,
        activated: bool,
    },
    Noop { reason: DragNoopReason },
}

/// One state-machine step.
#[derive(Debug, Clone, PartialEq)]
pub struct DragTransition {
    pub transition_id: u64,
    pub from: DragPhase,
    pub to: DragPhase,
    pub effect: DragEffect,
}

/// Single-drag lifecycle machine.
#[derive(Debug, Clone, PartialEq)]
pub struct DragMachine {
    state: DragState,
    activation: ActivationConstraint,
    update_hysteresis: f64,
    transition_counter: u64,
}

impl Default for DragMachine {
    fn default() -> Self {
        Self {
            state: DragState::Idle,
            activation: ActivationConstraint::default(),
            update_hysteresis: DEFAULT_UPDATE_HYSTERESIS,
            transition_counter: 0,
        }
    }
}

impl DragMachine {
    pub fn new(
        activation: ActivationConstraint,
        update_hysteresis: f64,
    ) -> Result<Self, DragMachineError> {
        activation
            .validate()
            .map_err(DragMachineError::InvalidActivation)?;
        if !update_hysteresis.is_finite() || update_hysteresis <= 0.0 {
            return Err(DragMachineError::InvalidUpdateHysteresis {
                value: update_hysteresis,
            });
        }
        Ok(Self {
            activation,
            update_hysteresis,
            ..Self::default()
        })
    }

    #[must_use]
    pub const fn state(&self) -> &DragState {
        &self.state
    }

    #[must_use]
    pub const fn phase(&self) -> DragPhase {
        self.state.phase()
    }

    #[must_use]
    pub const fn active_drag(&self) -> Option<&ActiveDrag> {
        self.state.active_drag()
    }

    #[must_use]
    pub const fn activation(&self) -> ActivationConstraint {
        self.activation
    }

    #[must_use]
    pub const fn update_hysteresis(&self) -> f64 {
        self.update_hysteresis
    }

    /// Whether a press or drag is in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self.state, DragState::Idle)
    }

    /// Reset to `Idle`, reporting a programmatic cancel if a press or drag
    /// was in flight.
    pub fn force_cancel(&mut self) -> Option<DragTransition> {
        if !self.is_active() {
            return None;
        }
        Some(self.apply(DragInput::Cancel {
            reason: DragCancelReason::Programmatic,
        }))
    }

    /// Feed one input.
    pub fn apply(&mut self, input: DragInput) -> DragTransition {
        let state = std::mem::take(&mut self.state);
        let from = state.phase();

        let (next, effect) = match (state, input) {
            (DragState::Idle, DragInput::PointerDown { drag, timestamp_ms }) => {
                let tracker =
                    ActivationTracker::new(self.activation, drag.pointer_origin, timestamp_ms);
                let effect = DragEffect::Armed {
                    block: drag.block_id(),
                };
                (DragState::Armed { drag, tracker }, effect)
            }
            (DragState::Idle, _) => (
                DragState::Idle,
                DragEffect::Noop {
                    reason: DragNoopReason::IdleWithoutActiveDrag,
                },
            ),
            (
                state @ (DragState::Armed { .. } | DragState::Dragging { .. }),
                DragInput::PointerDown { .. },
            ) => (
                state,
                DragEffect::Noop {
                    reason: DragNoopReason::DragAlreadyInProgress,
                },
            ),
            (
                DragState::Armed {
                    mut drag,
                    mut tracker,
                },
                DragInput::PointerMove {
                    pointer,
                    timestamp_ms,
                },
            ) => match tracker.update(pointer, timestamp_ms) {
                ActivationDecision::Activated => {
                    drag.pointer = pointer;
                    let effect = DragEffect::DragStarted {
                        delta: drag.current_delta(),
                    };
                    (DragState::Dragging { drag }, effect)
                }
                ActivationDecision::Pending => (
                    DragState::Armed { drag, tracker },
                    DragEffect::Noop {
                        reason: DragNoopReason::ActivationPending,
                    },
                ),
                ActivationDecision::Aborted => (
                    DragState::Armed { drag, tracker },
                    DragEffect::Noop {
                        reason: DragNoopReason::ActivationAborted,
                    },
                ),
            },
            (
                DragState::Armed {
                    mut drag,
                    mut tracker,
                },
                DragInput::PointerUp {
                    pointer,
                    timestamp_ms,
                    target,
                },
            ) => {
                let activated =
                    tracker.update(pointer, timestamp_ms) == ActivationDecision::Activated;
                if activated {
                    drag.pointer = pointer;
                    (DragState::Idle, DragEffect::Committed { drag, target })
                } else {
                    (DragState::Idle, DragEffect::Clicked { drag })
                }
            }
            (DragState::Armed { drag, .. }, DragInput::Cancel { reason }) => (
                DragState::Idle,
                DragEffect::Cancelled {
                    drag,
                    reason,
                    activated: false,
                },
            ),
            (DragState::Armed { drag, .. }, DragInput::Blur) => (
                DragState::Idle,
                DragEffect::Cancelled {
                    drag,
                    reason: DragCancelReason::Blur,
                    activated: false,
                },
            ),
            (DragState::Dragging { mut drag }, DragInput::PointerMove { pointer, .. }) => {
                if crossed_threshold(drag.pointer, pointer, self.update_hysteresis) {
                    drag.pointer = pointer;
                    let effect = DragEffect::DragUpdated {
                        delta: drag.current_delta(),
                    };
                    (DragState::Dragging { drag }, effect)
                } else {
                    (
                        DragState::Dragging { drag },
                        DragEffect::Noop {
                            reason: DragNoopReason::BelowHysteresis,
                        },
                    )
                }
            }
            (DragState::Dragging { mut drag }, DragInput::PointerUp { pointer, target, .. }) => {
                drag.pointer = pointer;
                (DragState::Idle, DragEffect::Committed { drag, target })
            }
            (DragState::Dragging { drag }, DragInput::Cancel { reason }) => (
                DragState::Idle,
                DragEffect::Cancelled {
                    drag,
                    reason,
                    activated: true,
                },
            ),
            (DragState::Dragging { drag }, DragInput::Blur) => (
                DragState::Idle,
                DragEffect::Cancelled {
                    drag,
                    reason: DragCancelReason::Blur,
                    activated: true,
                },
            ),
        };

        self.state = next;
        self.transition_counter = self.transition_counter.saturating_add(1);
        let transition = DragTransition {
            transition_id: self.transition_counter,
            from,
            to: self.state.phase(),
            effect,
        };
        if from != transition.to {
            tracing::debug!(
                target: "blockcanvas.drag",
                transition_id = transition.transition_id,
                from = ?from,
                to = ?transition.to,
                "drag state changed"
            );
        }
        transition
    }
}

/// Machine configuration errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragMachineError {
    InvalidActivation(ActivationError),
    InvalidUpdateHysteresis { value: f64 },
}

impl fmt::Display for DragMachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidActivation(err) => write!(f, "invalid activation constraint: {err}"),
            Self::InvalidUpdateHysteresis { value } => {
                write!(f, "update hysteresis must be finite and > 0 (got {value})")
            }
        }
    }
}

impl std::error::Error for DragMachineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::InvalidActivation(err) = self {
            return Some(err);
        }
        None
    }
}

#![forbid(unsafe_code)]

//! Gesture activation: decides when a pointer press becomes a drag.
//!
//! Blocks contain text inputs (variable names, conditions, iteration counts).
//! A press on one of those must stay a click, so a drag only activates after
//! the pointer has travelled far enough, or has been held long enough without
//! wandering.
//!
//! # Invariants
//!
//! 1. A tracker reports `Activated` at most once; later updates keep
//!    returning `Activated`.
//! 2. A `Delay` tracker that exceeds its tolerance before the delay elapses
//!    reports `Aborted` and stays aborted.
//! 3. Timestamps are host-supplied milliseconds; a timestamp earlier than the
//!    press is treated as zero elapsed time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Default minimum pointer travel before a drag activates.
pub const DEFAULT_ACTIVATION_DISTANCE: f64 = 5.0;

/// Rule that turns a press into a drag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivationConstraint {
    /// Activate once the pointer has travelled `distance` units from the press.
    Distance { distance: f64 },
    /// Activate once the press has been held for `delay_ms` without the
    /// pointer travelling more than `tolerance` units.
    Delay { delay_ms: u64, tolerance: f64 },
}

impl ActivationConstraint {
    /// Validate the constraint parameters.
    pub fn validate(self) -> Result<(), ActivationError> {
        match self {
            Self::Distance { distance } => {
                if !distance.is_finite() || distance <= 0.0 {
                    return Err(ActivationError::InvalidDistance { value: distance });
                }
            }
            Self::Delay {
                delay_ms,
                tolerance,
            } => {
                if delay_ms == 0 {
                    return Err(ActivationError::InvalidDelay { delay_ms });
                }
                if !tolerance.is_finite() || tolerance < 0.0 {
                    return Err(ActivationError::InvalidTolerance { value: tolerance });
                }
            }
        }
        Ok(())
    }
}

impl Default for ActivationConstraint {
    fn default() -> Self {
        Self::Distance {
            distance: DEFAULT_ACTIVATION_DISTANCE,
        }
    }
}

/// Result of feeding one pointer sample to an [`ActivationTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationDecision {
    /// Still a potential click.
    Pending,
    /// The gesture is now a drag.
    Activated,
    /// The gesture can no longer become a drag.
    Aborted,
}

/// Tracks one press until it activates or aborts.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationTracker {
    constraint: ActivationConstraint,
    origin: Point,
    pressed_at_ms: u64,
    decision: ActivationDecision,
}

impl ActivationTracker {
    /// Start tracking a press at `origin`.
    #[must_use]
    pub const fn new(constraint: ActivationConstraint, origin: Point, pressed_at_ms: u64) -> Self {
        Self {
            constraint,
            origin,
            pressed_at_ms,
            decision: ActivationDecision::Pending,
        }
    }

    #[must_use]
    pub const fn origin(&self) -> Point {
        self.origin
    }

    #[must_use]
    pub const fn decision(&self) -> ActivationDecision {
        self.decision
    }

    /// Feed one pointer sample.
    pub fn update(&mut self, pointer: Point, now_ms: u64) -> ActivationDecision {
        if self.decision != ActivationDecision::Pending {
            return self.decision;
        }
        let travelled = self.origin.distance(pointer);
        self.decision = match self.constraint {
            ActivationConstraint::Distance { distance } => {
                if travelled >= distance {
                    ActivationDecision::Activated
                } else {
                    ActivationDecision::Pending
                }
            }
            ActivationConstraint::Delay {
                delay_ms,
                tolerance,
            } => {
                if travelled > tolerance {
                    ActivationDecision::Aborted
                } else if now_ms.saturating_sub(self.pressed_at_ms) >= delay_ms {
                    ActivationDecision::Activated
                } else {
                    ActivationDecision::Pending
                }
            }
        };
        self.decision
    }
}

/// Whether `current` is at least `threshold` units away from `origin`.
#[must_use]
pub fn crossed_threshold(origin: Point, current: Point, threshold: f64) -> bool {
    let delta = origin.delta_to(current);
    delta.dx * delta.dx + delta.dy * delta.dy >= threshold * threshold
}

/// Invalid activation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationError {
    InvalidDistance { value: f64 },
    InvalidDelay { delay_ms: u64 },
    InvalidTolerance { value: f64 },
}

impl fmt::Display for ActivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDistance { value } => {
                write!(f, "activation distance must be finite and > 0 (got {value})")
            }
            Self::InvalidDelay { delay_ms } => {
                write!(f, "activation delay must be > 0 ms (got {delay_ms})")
            }
            Self::InvalidTolerance { value } => {
                write!(f, "activation tolerance must be finite and >= 0 (got {value})")
            }
        }
    }
}

impl std::error::Error for ActivationError {}

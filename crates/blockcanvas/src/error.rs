#![forbid(unsafe_code)]

//! Unified error type for the block canvas.
//!
//! Every subsystem keeps its own typed error; [`Error`] wraps them so hosts
//! can propagate with `?` and still match on what matters. Drag-path
//! rejections are outcomes, not errors, so only misuse and bad input end up
//! here.

use std::fmt;

use blockcanvas_core::gesture::ActivationError;
use blockcanvas_graph::{
    BlockModelError, BlockOperationError, CanvasConfigError, CatalogError, ControllerError,
    DragMachineError, DropTargetParseError, LayoutError, NestRejection, SnapTuningError,
};

/// Top-level error type for block canvas hosts.
#[derive(Debug)]
pub enum Error {
    /// A snapshot or tree failed structural validation.
    Model(BlockModelError),
    /// A block operation was rejected.
    Operation(BlockOperationError),
    /// A nest request was refused.
    Nest(NestRejection),
    /// The controller could not run a drag callback.
    Controller(ControllerError),
    /// Invalid drag thresholds.
    Drag(DragMachineError),
    Activation(ActivationError),
    Snap(SnapTuningError),
    Layout(LayoutError),
    /// Configuration could not be loaded.
    Config(CanvasConfigError),
    Catalog(CatalogError),
    /// A host-supplied drop target id did not parse.
    DropTarget(DropTargetParseError),
}

/// Standard result type for block canvas APIs.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Error type label for logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::Operation(_) => "operation",
            Self::Nest(_) => "nest",
            Self::Controller(_) => "controller",
            Self::Drag(_) => "drag",
            Self::Activation(_) => "activation",
            Self::Snap(_) => "snap",
            Self::Layout(_) => "layout",
            Self::Config(_) => "config",
            Self::Catalog(_) => "catalog",
            Self::DropTarget(_) => "drop_target",
        }
    }

    /// Whether the canvas state is intact and the host can keep going.
    ///
    /// Only load-time failures (config, catalog, snapshot) leave the host
    /// without a usable canvas.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Model(_) | Self::Config(_) | Self::Catalog(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(err) => write!(f, "{err}"),
            Self::Operation(err) => write!(f, "{err}"),
            Self::Nest(err) => write!(f, "{err}"),
            Self::Controller(err) => write!(f, "{err}"),
            Self::Drag(err) => write!(f, "{err}"),
            Self::Activation(err) => write!(f, "{err}"),
            Self::Snap(err) => write!(f, "{err}"),
            Self::Layout(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "config: {err}"),
            Self::Catalog(err) => write!(f, "catalog: {err}"),
            Self::DropTarget(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Model(err) => Some(err),
            Self::Operation(err) => Some(err),
            Self::Nest(err) => Some(err),
            Self::Controller(err) => Some(err),
            Self::Drag(err) => Some(err),
            Self::Activation(err) => Some(err),
            Self::Snap(err) => Some(err),
            Self::Layout(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Catalog(err) => Some(err),
            Self::DropTarget(err) => Some(err),
        }
    }
}

// ── From conversions ────────────────────────────────────────────────────

impl From<BlockModelError> for Error {
    fn from(err: BlockModelError) -> Self {
        Self::Model(err)
    }
}

impl From<BlockOperationError> for Error {
    fn from(err: BlockOperationError) -> Self {
        Self::Operation(err)
    }
}

impl From<NestRejection> for Error {
    fn from(err: NestRejection) -> Self {
        Self::Nest(err)
    }
}

impl From<ControllerError> for Error {
    fn from(err: ControllerError) -> Self {
        Self::Controller(err)
    }
}

impl From<DragMachineError> for Error {
    fn from(err: DragMachineError) -> Self {
        Self::Drag(err)
    }
}

impl From<ActivationError> for Error {
    fn from(err: ActivationError) -> Self {
        Self::Activation(err)
    }
}

impl From<SnapTuningError> for Error {
    fn from(err: SnapTuningError) -> Self {
        Self::Snap(err)
    }
}

impl From<LayoutError> for Error {
    fn from(err: LayoutError) -> Self {
        Self::Layout(err)
    }
}

impl From<CanvasConfigError> for Error {
    fn from(err: CanvasConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<CatalogError> for Error {
    fn from(err: CatalogError) -> Self {
        Self::Catalog(err)
    }
}

impl From<DropTargetParseError> for Error {
    fn from(err: DropTargetParseError) -> Self {
        Self::DropTarget(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;
    use blockcanvas_graph::{BlockId, DropTarget};

    #[test]
    fn drop_target_parse_error_converts() {
        fn parse(raw: &str) -> Result<DropTarget> {
            Ok(raw.parse::<DropTarget>()?)
        }
        assert_eq!(parse("nesting-4").ok(), BlockId::new(4).ok().map(DropTarget::Container));
        let err = parse("trash-can").expect_err("unknown id");
        assert_eq!(err.error_type(), "drop_target");
        assert!(format!("{err}").contains("trash-can"));
        assert!(err.is_recoverable());
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn config_errors_are_not_recoverable() {
        let err = Error::from(CanvasConfigError::Validation(vec!["snap: bad".into()]));
        assert_eq!(err.error_type(), "config");
        assert!(!err.is_recoverable());
        assert_eq!(format!("{err}"), "config: validation errors: snap: bad");
    }

    #[test]
    fn nest_rejection_keeps_its_message() {
        let block = BlockId::new(2).expect("id");
        let err = Error::from(NestRejection::SelfNesting { block });
        assert_eq!(format!("{err}"), "cannot nest block 2 inside itself");
        assert!(err.is_recoverable());
    }

    #[test]
    fn model_error_is_fatal() {
        let err = Error::from(BlockModelError::ZeroBlockId);
        assert_eq!(err.error_type(), "model");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn activation_error_chains_source() {
        let err = Error::from(ActivationError::InvalidDistance { value: -1.0 });
        assert_eq!(err.error_type(), "activation");
        assert!(StdError::source(&err).is_some());
    }
}

#![forbid(unsafe_code)]

//! Canvas configuration.
//!
//! Every tunable of the engine lives in one [`CanvasConfig`] that can be
//! loaded from TOML or JSON and adjusted from the environment. All fields
//! have defaults, so a partial file only overrides what it names.
//!
//! ```toml
//! # blockcanvas.toml
//! [snap]
//! snap_distance = 30.0
//!
//! [drag.activation]
//! kind = "delay"
//! delay_ms = 150
//! tolerance = 4.0
//!
//! [canvas]
//! width = 1200.0
//! height = 800.0
//!
//! [policy]
//! removal = "orphan"
//! out_of_bounds = "restore"
//! ```
//!
//! ```rust,ignore
//! let config = CanvasConfig::load_toml_file("blockcanvas.toml")?.with_env_overrides();
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |---|---|
//! | `BLOCKCANVAS_SNAP_DISTANCE` | `snap.snap_distance` |
//! | `BLOCKCANVAS_SNAP_X_DISTANCE` | `snap.snap_x_distance` |
//! | `BLOCKCANVAS_BLOCK_HEIGHT` | `snap.block_height` and `layout.block_height` |
//! | `BLOCKCANVAS_DRAG_DISTANCE` | `drag.activation` (distance constraint) |
//! | `BLOCKCANVAS_REMOVAL_POLICY` | `policy.removal` (`cascade`/`orphan`) |
//! | `BLOCKCANVAS_OUT_OF_BOUNDS` | `policy.out_of_bounds` (`delete`/`restore`) |
//!
//! Values that do not parse are ignored with a warning.

use std::fmt;
use std::path::Path;

use blockcanvas_core::geometry::Point;
use blockcanvas_core::gesture::ActivationConstraint;
use serde::{Deserialize, Serialize};

use crate::drag::{DEFAULT_UPDATE_HYSTERESIS, DragMachine, DragMachineError};
use crate::layout::LayoutMetrics;
use crate::snap::SnapTuning;
use crate::tree::RemovalPolicy;

pub const ENV_SNAP_DISTANCE: &str = "BLOCKCANVAS_SNAP_DISTANCE";
pub const ENV_SNAP_X_DISTANCE: &str = "BLOCKCANVAS_SNAP_X_DISTANCE";
pub const ENV_BLOCK_HEIGHT: &str = "BLOCKCANVAS_BLOCK_HEIGHT";
pub const ENV_DRAG_DISTANCE: &str = "BLOCKCANVAS_DRAG_DISTANCE";
pub const ENV_REMOVAL_POLICY: &str = "BLOCKCANVAS_REMOVAL_POLICY";
pub const ENV_OUT_OF_BOUNDS: &str = "BLOCKCANVAS_OUT_OF_BOUNDS";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub snap: SnapTuning,
    pub drag: DragConfig,
    pub layout: LayoutMetrics,
    pub canvas: CanvasBounds,
    pub policy: DropPolicy,
}

/// Pointer gesture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DragConfig {
    pub activation: ActivationConstraint,
    pub update_hysteresis: f64,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            activation: ActivationConstraint::default(),
            update_hysteresis: DEFAULT_UPDATE_HYSTERESIS,
        }
    }
}

/// Optional canvas extent; an unset axis is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasBounds {
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl CanvasBounds {
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            width: None,
            height: None,
        }
    }

    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }

    /// Whether `point` lies on the canvas, `[0, width) x [0, height)` on the
    /// bounded axes.
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        let within = |value: f64, limit: Option<f64>| {
            limit.is_none_or(|limit| value >= 0.0 && value < limit)
        };
        within(point.x, self.width) && within(point.y, self.height)
    }
}

/// What happens to a placed block dropped outside every valid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfBoundsPolicy {
    /// Remove the block (and its contents, per the removal policy).
    #[default]
    Delete,
    /// Leave the block where it was.
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DropPolicy {
    pub removal: RemovalPolicy,
    pub out_of_bounds: OutOfBoundsPolicy,
}

impl CanvasConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, CanvasConfigError> {
        toml::from_str(s).map_err(CanvasConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CanvasConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CanvasConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, CanvasConfigError> {
        serde_json::from_str(s).map_err(CanvasConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CanvasConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(CanvasConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Like [`from_toml_str`](Self::from_toml_str), rejecting invalid values.
    pub fn load_toml_str(s: &str) -> Result<Self, CanvasConfigError> {
        Self::from_toml_str(s)?.validated()
    }

    pub fn load_toml_file(path: impl AsRef<Path>) -> Result<Self, CanvasConfigError> {
        Self::from_toml_file(path)?.validated()
    }

    pub fn load_json_str(s: &str) -> Result<Self, CanvasConfigError> {
        Self::from_json_str(s)?.validated()
    }

    pub fn load_json_file(path: impl AsRef<Path>) -> Result<Self, CanvasConfigError> {
        Self::from_json_file(path)?.validated()
    }

    /// Return `self` if [`validate`](Self::validate) finds nothing.
    pub fn validated(self) -> Result<Self, CanvasConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(CanvasConfigError::Validation(errors))
        }
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(err) = self.snap.validate() {
            errors.push(format!("snap: {err}"));
        }
        if let Err(err) = self.drag.activation.validate() {
            errors.push(format!("drag.activation: {err}"));
        }
        if !self.drag.update_hysteresis.is_finite() || self.drag.update_hysteresis <= 0.0 {
            errors.push(format!(
                "drag.update_hysteresis must be finite and > 0, got {}",
                self.drag.update_hysteresis
            ));
        }
        errors.extend(self.layout.problems());
        for (name, value) in [("width", self.canvas.width), ("height", self.canvas.height)] {
            if let Some(value) = value
                && (!value.is_finite() || value <= 0.0)
            {
                errors.push(format!("canvas.{name} must be finite and > 0, got {value}"));
            }
        }

        errors
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using a custom lookup.
    #[must_use]
    pub fn with_env_overrides_from<F>(mut self, get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse_env(&get_env, ENV_SNAP_DISTANCE, parse_non_negative) {
            self.snap.snap_distance = value;
        }
        if let Some(value) = parse_env(&get_env, ENV_SNAP_X_DISTANCE, parse_non_negative) {
            self.snap.snap_x_distance = value;
        }
        if let Some(value) = parse_env(&get_env, ENV_BLOCK_HEIGHT, parse_positive) {
            self.snap.block_height = value;
            self.layout.block_height = value;
        }
        if let Some(distance) = parse_env(&get_env, ENV_DRAG_DISTANCE, parse_positive) {
            self.drag.activation = ActivationConstraint::Distance { distance };
        }
        if let Some(policy) = parse_env(&get_env, ENV_REMOVAL_POLICY, |raw| {
            match raw.to_ascii_lowercase().as_str() {
                "cascade" => Some(RemovalPolicy::Cascade),
                "orphan" => Some(RemovalPolicy::Orphan),
                _ => None,
            }
        }) {
            self.policy.removal = policy;
        }
        if let Some(policy) = parse_env(&get_env, ENV_OUT_OF_BOUNDS, |raw| {
            match raw.to_ascii_lowercase().as_str() {
                "delete" => Some(OutOfBoundsPolicy::Delete),
                "restore" => Some(OutOfBoundsPolicy::Restore),
                _ => None,
            }
        }) {
            self.policy.out_of_bounds = policy;
        }
        self
    }

    /// Build a drag machine from the `drag` section.
    pub fn drag_machine(&self) -> Result<DragMachine, DragMachineError> {
        DragMachine::new(self.drag.activation, self.drag.update_hysteresis)
    }
}

fn parse_env<T, G, P>(get_env: &G, key: &str, parse: P) -> Option<T>
where
    G: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let raw = get_env(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        tracing::warn!(
            target: "blockcanvas.config",
            key,
            value = %raw,
            "ignoring unparseable environment override"
        );
    }
    parsed
}

fn parse_positive(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

fn parse_non_negative(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}

/// Errors from loading a configuration.
#[derive(Debug)]
pub enum CanvasConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    Toml(toml::de::Error),
    /// JSON parse error.
    Json(serde_json::Error),
    /// Validation errors.
    Validation(Vec<String>),
}

impl fmt::Display for CanvasConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => {
                write!(f, "validation errors: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for CanvasConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Toml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_engine_constants() {
        let config = CanvasConfig::default();
        assert_eq!(config.snap.block_height, 50.0);
        assert_eq!(config.snap.snap_distance, 40.0);
        assert_eq!(config.snap.snap_x_distance, 40.0);
        assert_eq!(
            config.drag.activation,
            ActivationConstraint::Distance { distance: 5.0 }
        );
        assert_eq!(config.policy.removal, RemovalPolicy::Cascade);
        assert_eq!(config.policy.out_of_bounds, OutOfBoundsPolicy::Delete);
        assert_eq!(config.canvas, CanvasBounds::unbounded());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CanvasConfig::from_toml_str(
            r#"
            [snap]
            snap_distance = 25.0

            [drag.activation]
            kind = "delay"
            delay_ms = 150
            tolerance = 4.0

            [canvas]
            width = 800.0

            [policy]
            removal = "orphan"
            "#,
        )
        .expect("parse toml");
        assert_eq!(config.snap.snap_distance, 25.0);
        assert_eq!(config.snap.block_height, 50.0);
        assert_eq!(
            config.drag.activation,
            ActivationConstraint::Delay {
                delay_ms: 150,
                tolerance: 4.0
            }
        );
        assert_eq!(config.canvas.width, Some(800.0));
        assert_eq!(config.canvas.height, None);
        assert_eq!(config.policy.removal, RemovalPolicy::Orphan);
        assert_eq!(config.policy.out_of_bounds, OutOfBoundsPolicy::Delete);
    }

    #[test]
    fn json_round_trip() {
        let mut config = CanvasConfig::default();
        config.canvas = CanvasBounds::new(640.0, 480.0);
        config.policy.out_of_bounds = OutOfBoundsPolicy::Restore;
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed = CanvasConfig::from_json_str(&json).expect("parse json");
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_rejects_invalid_values() {
        let err = CanvasConfig::load_toml_str(
            r#"
            [snap]
            block_height = 0.0

            [canvas]
            height = -5.0
            "#,
        )
        .expect_err("invalid");
        let CanvasConfigError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("block_height"));
        assert!(errors[1].contains("canvas.height"));
    }

    #[test]
    fn parse_errors_are_typed() {
        assert!(matches!(
            CanvasConfig::from_toml_str("snap = 3"),
            Err(CanvasConfigError::Toml(_))
        ));
        assert!(matches!(
            CanvasConfig::from_json_str("{"),
            Err(CanvasConfigError::Json(_))
        ));
        let err = CanvasConfig::from_toml_file("/nonexistent/blockcanvas.toml")
            .expect_err("missing file");
        assert!(matches!(err, CanvasConfigError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn loads_from_files() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[policy]\nout_of_bounds = \"restore\"").expect("write");
        let config = CanvasConfig::load_toml_file(file.path()).expect("load");
        assert_eq!(config.policy.out_of_bounds, OutOfBoundsPolicy::Restore);

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"snap": {{"snap_x_distance": 12.5}}}}"#).expect("write");
        let config = CanvasConfig::load_json_file(file.path()).expect("load");
        assert_eq!(config.snap.snap_x_distance, 12.5);
    }

    #[test]
    fn env_overrides_apply() {
        let config = CanvasConfig::default().with_env_overrides_from(env(&[
            (ENV_SNAP_DISTANCE, "30"),
            (ENV_SNAP_X_DISTANCE, "15.5"),
            (ENV_BLOCK_HEIGHT, "60"),
            (ENV_DRAG_DISTANCE, "8"),
            (ENV_REMOVAL_POLICY, "Orphan"),
            (ENV_OUT_OF_BOUNDS, "restore"),
        ]));
        assert_eq!(config.snap.snap_distance, 30.0);
        assert_eq!(config.snap.snap_x_distance, 15.5);
        assert_eq!(config.snap.block_height, 60.0);
        assert_eq!(config.layout.block_height, 60.0);
        assert_eq!(
            config.drag.activation,
            ActivationConstraint::Distance { distance: 8.0 }
        );
        assert_eq!(config.policy.removal, RemovalPolicy::Orphan);
        assert_eq!(config.policy.out_of_bounds, OutOfBoundsPolicy::Restore);
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let config = CanvasConfig::default().with_env_overrides_from(env(&[
            (ENV_SNAP_DISTANCE, "far"),
            (ENV_BLOCK_HEIGHT, "-10"),
            (ENV_REMOVAL_POLICY, "shred"),
        ]));
        assert_eq!(config, CanvasConfig::default());
    }

    #[test]
    fn canvas_bounds_contain_half_open_extent() {
        let bounds = CanvasBounds::new(400.0, 300.0);
        assert!(bounds.contains(Point::new(0.0, 0.0)));
        assert!(bounds.contains(Point::new(399.0, 299.0)));
        assert!(!bounds.contains(Point::new(400.0, 10.0)));
        assert!(!bounds.contains(Point::new(10.0, -1.0)));
        let open = CanvasBounds {
            width: Some(100.0),
            height: None,
        };
        assert!(open.contains(Point::new(50.0, 10_000.0)));
        assert!(open.contains(Point::new(50.0, -10_000.0)));
        assert!(CanvasBounds::unbounded().contains(Point::new(-1e9, 1e9)));
    }

    #[test]
    fn drag_machine_uses_drag_section() {
        let mut config = CanvasConfig::default();
        config.drag.update_hysteresis = 2.5;
        let machine = config.drag_machine().expect("machine");
        assert_eq!(machine.update_hysteresis(), 2.5);
        config.drag.update_hysteresis = 0.0;
        assert!(config.drag_machine().is_err());
    }
}

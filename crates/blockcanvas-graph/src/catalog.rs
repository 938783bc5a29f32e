#![forbid(unsafe_code)]

//! Block template catalog.
//!
//! The toolkit palette is a fixed, enumerable set of templates. The core only
//! reads it: a template is copied into a fresh [`Block`](crate::block::Block)
//! when it is dropped onto the canvas or into a container.
//!
//! Catalog entries arrive as camelCase JSON (`{type, label, category, color,
//! canNest}`). Missing metadata is filled from the block type; a missing
//! `canNest` is `false`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of block kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockType {
    Start,
    End,
    SetVariable,
    ChangeVariable,
    UseVariable,
    Add,
    Subtract,
    Multiply,
    Divide,
    If,
    Elif,
    Else,
    ForLoop,
    WhileLoop,
    #[serde(alias = "createFunc")]
    CreateFunction,
    #[serde(alias = "callFunc")]
    CallFunction,
}

impl BlockType {
    /// Every block type in palette order.
    pub const ALL: [Self; 16] = [
        Self::Start,
        Self::End,
        Self::SetVariable,
        Self::ChangeVariable,
        Self::UseVariable,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::If,
        Self::Elif,
        Self::Else,
        Self::ForLoop,
        Self::WhileLoop,
        Self::CreateFunction,
        Self::CallFunction,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::SetVariable => "setVariable",
            Self::ChangeVariable => "changeVariable",
            Self::UseVariable => "useVariable",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::If => "if",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::ForLoop => "forLoop",
            Self::WhileLoop => "whileLoop",
            Self::CreateFunction => "createFunction",
            Self::CallFunction => "callFunction",
        }
    }

    #[must_use]
    pub const fn category(self) -> BlockCategory {
        match self {
            Self::SetVariable | Self::ChangeVariable | Self::UseVariable => {
                BlockCategory::Variables
            }
            Self::Start | Self::End | Self::ForLoop | Self::WhileLoop => BlockCategory::Flow,
            Self::If | Self::Elif | Self::Else => BlockCategory::Conditionals,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide => BlockCategory::Maths,
            Self::CreateFunction | Self::CallFunction => BlockCategory::Functions,
        }
    }

    /// Whether instances of this type accept nested blocks.
    #[must_use]
    pub const fn can_nest(self) -> bool {
        matches!(
            self,
            Self::If
                | Self::Elif
                | Self::Else
                | Self::ForLoop
                | Self::WhileLoop
                | Self::CreateFunction
        )
    }

    #[must_use]
    pub const fn default_label(self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::End => "End",
            Self::SetVariable => "Set Variable",
            Self::ChangeVariable => "Change Variable",
            Self::UseVariable => "Use Variable",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Divide => "Divide",
            Self::If => "If",
            Self::Elif => "Else If",
            Self::Else => "Else",
            Self::ForLoop => "For Loop",
            Self::WhileLoop => "While Loop",
            Self::CreateFunction => "Create Function",
            Self::CallFunction => "Call Function",
        }
    }

    /// Keys of the in-place editable inputs a block of this type exposes.
    #[must_use]
    pub const fn field_keys(self) -> &'static [&'static str] {
        match self {
            Self::Start | Self::End | Self::Else => &[],
            Self::SetVariable | Self::ChangeVariable => &["name", "value"],
            Self::UseVariable | Self::CreateFunction | Self::CallFunction => &["name"],
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide => &["left", "right"],
            Self::If | Self::Elif | Self::WhileLoop => &["condition"],
            Self::ForLoop => &["iterations"],
        }
    }

    #[must_use]
    pub fn has_field(self, key: &str) -> bool {
        self.field_keys().contains(&key)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createFunc" => return Ok(Self::CreateFunction),
            "callFunc" => return Ok(Self::CallFunction),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| CatalogError::UnknownType {
                name: s.to_string(),
            })
    }
}

/// Palette grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCategory {
    Variables,
    Flow,
    #[serde(alias = "conditional")]
    Conditionals,
    Maths,
    Functions,
}

impl BlockCategory {
    pub const ALL: [Self; 5] = [
        Self::Variables,
        Self::Flow,
        Self::Conditionals,
        Self::Maths,
        Self::Functions,
    ];

    /// Palette heading.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Variables => "Variables",
            Self::Flow => "Flow",
            Self::Conditionals => "Conditionals",
            Self::Maths => "Maths",
            Self::Functions => "Functions",
        }
    }

    /// Default block color for the category.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Variables => "#27AE60",
            Self::Flow => "#3498DB",
            Self::Conditionals => "#E74C3C",
            Self::Maths => "#F1C40F",
            Self::Functions => "#9B59B6",
        }
    }
}

/// A palette entry, copied into a block on instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawBlockTemplate")]
pub struct BlockTemplate {
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub label: String,
    pub category: BlockCategory,
    pub color: String,
    pub can_nest: bool,
}

impl BlockTemplate {
    /// Built-in template for a block type.
    #[must_use]
    pub fn for_type(block_type: BlockType) -> Self {
        let category = block_type.category();
        Self {
            block_type,
            label: block_type.default_label().to_string(),
            category,
            color: category.color().to_string(),
            can_nest: block_type.can_nest(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlockTemplate {
    #[serde(rename = "type")]
    block_type: BlockType,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    category: Option<BlockCategory>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    can_nest: bool,
}

impl From<RawBlockTemplate> for BlockTemplate {
    fn from(raw: RawBlockTemplate) -> Self {
        let category = raw.category.unwrap_or_else(|| raw.block_type.category());
        Self {
            block_type: raw.block_type,
            label: raw
                .label
                .unwrap_or_else(|| raw.block_type.default_label().to_string()),
            category,
            color: raw.color.unwrap_or_else(|| category.color().to_string()),
            can_nest: raw.can_nest,
        }
    }
}

/// Read-only, ordered set of templates with at most one entry per type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    templates: Vec<BlockTemplate>,
}

impl Catalog {
    /// The built-in palette: one template per [`BlockType`].
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            templates: BlockType::ALL
                .into_iter()
                .map(BlockTemplate::for_type)
                .collect(),
        }
    }

    pub fn from_templates(templates: Vec<BlockTemplate>) -> Result<Self, CatalogError> {
        for (index, template) in templates.iter().enumerate() {
            if templates[..index]
                .iter()
                .any(|earlier| earlier.block_type == template.block_type)
            {
                return Err(CatalogError::DuplicateType {
                    block_type: template.block_type,
                });
            }
        }
        Ok(Self { templates })
    }

    /// Parse a JSON array of catalog entries.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let templates: Vec<BlockTemplate> =
            serde_json::from_str(json).map_err(CatalogError::Json)?;
        Self::from_templates(templates)
    }

    #[must_use]
    pub fn get(&self, block_type: BlockType) -> Option<&BlockTemplate> {
        self.templates
            .iter()
            .find(|template| template.block_type == block_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockTemplate> {
        self.templates.iter()
    }

    /// Templates of one category, in catalog order.
    pub fn by_category(&self, category: BlockCategory) -> impl Iterator<Item = &BlockTemplate> {
        self.templates
            .iter()
            .filter(move |template| template.category == category)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Catalog loading errors.
#[derive(Debug)]
pub enum CatalogError {
    Json(serde_json::Error),
    DuplicateType { block_type: BlockType },
    UnknownType { name: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::DuplicateType { block_type } => {
                write!(f, "catalog lists block type {block_type} more than once")
            }
            Self::UnknownType { name } => write!(f, "unknown block type {name:?}"),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::DuplicateType { .. } | Self::UnknownType { .. } => None,
        }
    }
}

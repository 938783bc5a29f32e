#![forbid(unsafe_code)]

//! Block identity and records.

use std::collections::BTreeMap;
use std::fmt;

use blockcanvas_core::geometry::Point;
use serde::{Deserialize, Serialize};

use crate::catalog::{BlockTemplate, BlockType};
use crate::tree::BlockModelError;

/// Stable identifier for blocks.
///
/// `0` is reserved/invalid so IDs are always non-zero. IDs are allocated in
/// increasing order, so id order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(u64);

impl BlockId {
    /// Lowest valid block ID.
    pub const MIN: Self = Self(1);

    /// Create a new block ID, rejecting 0.
    pub fn new(raw: u64) -> Result<Self, BlockModelError> {
        if raw == 0 {
            return Err(BlockModelError::ZeroBlockId);
        }
        Ok(Self(raw))
    }

    /// Get the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Return the next ID, or an error on overflow.
    pub fn checked_next(self) -> Result<Self, BlockModelError> {
        let Some(next) = self.0.checked_add(1) else {
            return Err(BlockModelError::BlockIdOverflow { current: self });
        };
        Self::new(next)
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a dragged block comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOrigin {
    /// A palette template that has not been placed yet.
    Toolkit,
    /// A block already in the tree.
    Workspace,
}

/// One block in the tree.
///
/// Chain links (`parent_id`/`child_id`) and containment
/// (`container_id`/`nested_blocks`) are mutually exclusive: a nested block
/// never carries chain links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub label: String,
    pub color: String,
    /// Canvas position when top-level, container-relative when nested.
    pub position: Point,
    pub can_nest: bool,
    #[serde(default)]
    pub nested_blocks: Vec<BlockId>,
    #[serde(default)]
    pub container_id: Option<BlockId>,
    #[serde(default)]
    pub parent_id: Option<BlockId>,
    #[serde(default)]
    pub child_id: Option<BlockId>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Block {
    /// Instantiate a template as a detached, top-level block.
    #[must_use]
    pub fn from_template(id: BlockId, template: &BlockTemplate, position: Point) -> Self {
        Self {
            id,
            block_type: template.block_type,
            label: template.label.clone(),
            color: template.color.clone(),
            position,
            can_nest: template.can_nest,
            nested_blocks: Vec::new(),
            container_id: None,
            parent_id: None,
            child_id: None,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn is_top_level(&self) -> bool {
        self.container_id.is_none()
    }

    /// Placed blocks are always workspace blocks.
    #[must_use]
    pub const fn origin(&self) -> BlockOrigin {
        BlockOrigin::Workspace
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_id_is_rejected() {
        assert_eq!(BlockId::new(0), Err(BlockModelError::ZeroBlockId));
        assert_eq!(BlockId::new(7).map(BlockId::get), Ok(7));
    }

    #[test]
    fn checked_next_detects_overflow() {
        let max = BlockId::new(u64::MAX).expect("max id");
        assert_eq!(
            max.checked_next(),
            Err(BlockModelError::BlockIdOverflow { current: max })
        );
        assert_eq!(BlockId::MIN.checked_next().map(BlockId::get), Ok(2));
    }

    #[test]
    fn template_instance_is_detached() {
        let template = BlockTemplate::for_type(BlockType::If);
        let block = Block::from_template(BlockId::MIN, &template, Point::new(4.0, 8.0));
        assert!(block.is_top_level());
        assert!(block.can_nest);
        assert!(block.nested_blocks.is_empty());
        assert_eq!(block.parent_id, None);
        assert_eq!(block.child_id, None);
        assert_eq!(block.origin(), BlockOrigin::Workspace);
        assert_eq!(block.label, "If");
    }

    #[test]
    fn block_serializes_with_camel_case_links() {
        let template = BlockTemplate::for_type(BlockType::Start);
        let block = Block::from_template(BlockId::MIN, &template, Point::ORIGIN);
        let value = serde_json::to_value(&block).expect("serialize");
        assert_eq!(value["type"], "start");
        assert_eq!(value["canNest"], false);
        assert!(value.get("parentId").is_some());
        assert!(value.get("nestedBlocks").is_some());
    }
}

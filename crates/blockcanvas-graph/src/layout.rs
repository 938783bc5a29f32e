#![forbid(unsafe_code)]

//! Flow layout and hit testing.
//!
//! Top-level blocks sit at their stored positions. Nested blocks ignore
//! their stored position and stack in order inside the container's nesting
//! zone, so a container grows with its contents:
//!
//! ```text
//! +--------------------------+  <- container origin
//! | header                   |
//! |  +--------------------+  |  <- nesting zone (nest_inset_x from edges)
//! |  | nested 1           |  |
//! |  | nested 2           |  |
//! |  +--------------------+  |
//! | footer                   |
//! +--------------------------+
//! ```
//!
//! Recursion is bounded by [`MAX_NEST_DEPTH`].

use std::collections::BTreeSet;
use std::fmt;

use blockcanvas_core::geometry::{Point, Rect};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::block::BlockId;
use crate::config::CanvasBounds;
use crate::drag::DropTarget;
use crate::tree::BlockTree;

/// Deepest containment the layout will walk.
pub const MAX_NEST_DEPTH: usize = 64;

/// Block and container dimensions in canvas units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutMetrics {
    pub block_width: f64,
    pub block_height: f64,
    pub container_width: f64,
    /// Space above a container's nesting zone.
    pub header_height: f64,
    /// Space below a container's nesting zone.
    pub footer_height: f64,
    /// Horizontal margin between container edge and nesting zone.
    pub nest_inset_x: f64,
    /// Padding inside the nesting zone.
    pub nest_padding: f64,
    /// Vertical gap between nested blocks.
    pub nest_gap: f64,
    /// Nesting zone height when the container is empty.
    pub empty_nest_height: f64,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        Self {
            block_width: 150.0,
            block_height: 50.0,
            container_width: 220.0,
            header_height: 56.0,
            footer_height: 20.0,
            nest_inset_x: 12.0,
            nest_padding: 8.0,
            nest_gap: 4.0,
            empty_nest_height: 50.0,
        }
    }
}

impl LayoutMetrics {
    /// Human-readable problems, empty when the metrics are usable.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let positive = [
            ("block_width", self.block_width),
            ("block_height", self.block_height),
            ("container_width", self.container_width),
            ("empty_nest_height", self.empty_nest_height),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                errors.push(format!("layout.{name} must be finite and > 0, got {value}"));
            }
        }
        let non_negative = [
            ("header_height", self.header_height),
            ("footer_height", self.footer_height),
            ("nest_inset_x", self.nest_inset_x),
            ("nest_padding", self.nest_padding),
            ("nest_gap", self.nest_gap),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("layout.{name} must be finite and >= 0, got {value}"));
            }
        }
        if self.nest_inset_x * 2.0 >= self.container_width {
            errors.push(format!(
                "layout.nest_inset_x ({}) leaves no room inside container_width ({})",
                self.nest_inset_x, self.container_width
            ));
        }
        errors
    }
}

/// Layout of one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockLayoutEntry {
    /// Absolute bounds on the canvas.
    pub rect: Rect,
    /// Number of enclosing containers.
    pub depth: usize,
    /// Drop zone for nested blocks, present on containers.
    pub nesting_zone: Option<Rect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    MissingBlock { block: BlockId },
    DepthExceeded { block: BlockId, depth: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBlock { block } => write!(f, "layout references missing block {block}"),
            Self::DepthExceeded { block, depth } => write!(
                f,
                "block {block} is nested {depth} levels deep (max {MAX_NEST_DEPTH})"
            ),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Computed layout for a whole tree.
#[derive(Debug, Clone, Default)]
pub struct BlockLayout {
    entries: FxHashMap<BlockId, BlockLayoutEntry>,
    order: Vec<BlockId>,
}

impl BlockLayout {
    /// Lay out every block of `tree`.
    pub fn compute(tree: &BlockTree, metrics: &LayoutMetrics) -> Result<Self, LayoutError> {
        let mut layout = Self::default();
        for block in tree.top_level() {
            layout.place(tree, metrics, block.id, block.position, 0)?;
        }
        Ok(layout)
    }

    fn place(
        &mut self,
        tree: &BlockTree,
        metrics: &LayoutMetrics,
        id: BlockId,
        origin: Point,
        depth: usize,
    ) -> Result<f64, LayoutError> {
        if depth > MAX_NEST_DEPTH {
            return Err(LayoutError::DepthExceeded { block: id, depth });
        }
        let block = tree
            .block(id)
            .ok_or(LayoutError::MissingBlock { block: id })?;
        self.order.push(id);

        if !block.can_nest {
            self.entries.insert(
                id,
                BlockLayoutEntry {
                    rect: Rect::at(origin, metrics.block_width, metrics.block_height),
                    depth,
                    nesting_zone: None,
                },
            );
            return Ok(metrics.block_height);
        }

        let zone_x = origin.x + metrics.nest_inset_x;
        let zone_y = origin.y + metrics.header_height;
        let zone_width = metrics.container_width - 2.0 * metrics.nest_inset_x;
        let zone_height = if block.nested_blocks.is_empty() {
            metrics.empty_nest_height
        } else {
            let mut cursor = zone_y + metrics.nest_padding;
            for (index, nested) in block.nested_blocks.iter().enumerate() {
                if index > 0 {
                    cursor += metrics.nest_gap;
                }
                let child_origin = Point::new(zone_x + metrics.nest_padding, cursor);
                cursor += self.place(tree, metrics, *nested, child_origin, depth + 1)?;
            }
            cursor + metrics.nest_padding - zone_y
        };

        let height = metrics.header_height + zone_height + metrics.footer_height;
        self.entries.insert(
            id,
            BlockLayoutEntry {
                rect: Rect::at(origin, metrics.container_width, height),
                depth,
                nesting_zone: Some(Rect::new(zone_x, zone_y, zone_width, zone_height)),
            },
        );
        Ok(height)
    }

    #[must_use]
    pub fn entry(&self, id: BlockId) -> Option<&BlockLayoutEntry> {
        self.entries.get(&id)
    }

    #[must_use]
    pub fn rect(&self, id: BlockId) -> Option<Rect> {
        self.entries.get(&id).map(|entry| entry.rect)
    }

    /// Visual canvas position of a block, nested or not.
    #[must_use]
    pub fn absolute_position(&self, id: BlockId) -> Option<Point> {
        self.rect(id).map(|rect| rect.origin())
    }

    #[must_use]
    pub fn nesting_zone(&self, id: BlockId) -> Option<Rect> {
        self.entries.get(&id).and_then(|entry| entry.nesting_zone)
    }

    /// Blocks in paint order: each top-level block followed by its nested
    /// contents, depth first.
    pub fn render_order(&self) -> impl Iterator<Item = (BlockId, &BlockLayoutEntry)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|entry| (*id, entry)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Resolve a pointer to a drop target.
    ///
    /// The deepest nesting zone under `point` wins (the last painted on ties);
    /// zones of `excluded` blocks are ignored. Otherwise the point is on the
    /// canvas when `canvas` contains it.
    #[must_use]
    pub fn hit_test(
        &self,
        point: Point,
        canvas: &CanvasBounds,
        excluded: &BTreeSet<BlockId>,
    ) -> DropTarget {
        let mut best: Option<(BlockId, usize)> = None;
        for (id, entry) in self.render_order() {
            if excluded.contains(&id) {
                continue;
            }
            let Some(zone) = entry.nesting_zone else {
                continue;
            };
            if zone.contains(point) && best.is_none_or(|(_, depth)| entry.depth >= depth) {
                best = Some((id, entry.depth));
            }
        }
        if let Some((id, _)) = best {
            return DropTarget::Container(id);
        }
        if canvas.contains(point) {
            DropTarget::Canvas
        } else {
            DropTarget::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BlockTemplate, BlockType};
    use crate::tree::{BlockStore, BlockTree, BlockTreeSnapshot};

    fn create(store: &mut BlockStore, ty: BlockType, x: f64, y: f64) -> BlockId {
        store
            .create_block(&BlockTemplate::for_type(ty), Point::new(x, y))
            .expect("create")
    }

    fn none() -> BTreeSet<BlockId> {
        BTreeSet::new()
    }

    #[test]
    fn leaf_blocks_use_stored_position() {
        let mut store = BlockStore::new();
        let a = create(&mut store, BlockType::Start, 10.0, 20.0);
        let layout = BlockLayout::compute(store.tree(), &LayoutMetrics::default()).expect("layout");
        assert_eq!(layout.rect(a), Some(Rect::new(10.0, 20.0, 150.0, 50.0)));
        assert_eq!(layout.nesting_zone(a), None);
    }

    #[test]
    fn empty_container_has_default_zone() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::If, 0.0, 0.0);
        let layout = BlockLayout::compute(store.tree(), &LayoutMetrics::default()).expect("layout");
        assert_eq!(layout.rect(c), Some(Rect::new(0.0, 0.0, 220.0, 126.0)));
        assert_eq!(layout.nesting_zone(c), Some(Rect::new(12.0, 56.0, 196.0, 50.0)));
    }

    #[test]
    fn nested_blocks_stack_in_order() {
        let mut store = BlockStore::new();
        let c = create(&mut store, BlockType::ForLoop, 100.0, 100.0);
        let a = create(&mut store, BlockType::Add, 0.0, 0.0);
        let b = create(&mut store, BlockType::Subtract, 999.0, 999.0);
        store.set_container(a, Some(c), None).expect("nest");
        store.set_container(b, Some(c), None).expect("nest");
        let layout = BlockLayout::compute(store.tree(), &LayoutMetrics::default()).expect("layout");

        // zone at (112, 156); children start after 8 padding.
        assert_eq!(layout.absolute_position(a), Some(Point::new(120.0, 164.0)));
        assert_eq!(layout.absolute_position(b), Some(Point::new(120.0, 218.0)));
        // 8 + 50 + 4 + 50 + 8
        assert_eq!(
            layout.nesting_zone(c).map(|z| z.height),
            Some(120.0)
        );
        assert_eq!(layout.rect(c).map(|r| r.height), Some(196.0));
        assert_eq!(layout.entry(b).map(|e| e.depth), Some(1));
    }

    #[test]
    fn render_order_is_parent_first() {
        let mut store = BlockStore::new();
        let outer = create(&mut store, BlockType::If, 0.0, 0.0);
        let inner = create(&mut store, BlockType::Else, 0.0, 0.0);
        let leaf = create(&mut store, BlockType::Add, 0.0, 0.0);
        let loose = create(&mut store, BlockType::End, 500.0, 0.0);
        store.set_container(inner, Some(outer), None).expect("nest");
        store.set_container(leaf, Some(inner), None).expect("nest");
        let layout = BlockLayout::compute(store.tree(), &LayoutMetrics::default()).expect("layout");
        let order: Vec<_> = layout.render_order().map(|(id, e)| (id, e.depth)).collect();
        assert_eq!(order, vec![(outer, 0), (inner, 1), (leaf, 2), (loose, 0)]);
    }

    #[test]
    fn hit_test_prefers_deepest_zone() {
        let mut store = BlockStore::new();
        let outer = create(&mut store, BlockType::If, 0.0, 0.0);
        let inner = create(&mut store, BlockType::WhileLoop, 0.0, 0.0);
        store.set_container(inner, Some(outer), None).expect("nest");
        let layout = BlockLayout::compute(store.tree(), &LayoutMetrics::default()).expect("layout");
        let inner_zone = layout.nesting_zone(inner).expect("inner zone");
        let probe = Point::new(inner_zone.x + 1.0, inner_zone.y + 1.0);
        assert_eq!(layout.hit_test(probe, &CanvasBounds::unbounded(), &none()), DropTarget::Container(inner));
        // Excluding the inner container falls back to the outer zone.
        assert_eq!(
            layout.hit_test(probe, &CanvasBounds::unbounded(), &BTreeSet::from([inner])),
            DropTarget::Container(outer)
        );
    }

    #[test]
    fn hit_test_respects_canvas_bounds() {
        let layout = BlockLayout::default();
        let bounds = CanvasBounds::new(400.0, 400.0);
        assert_eq!(
            layout.hit_test(Point::new(10.0, 10.0), &bounds, &none()),
            DropTarget::Canvas
        );
        assert_eq!(
            layout.hit_test(Point::new(500.0, 10.0), &bounds, &none()),
            DropTarget::None
        );
        assert_eq!(
            layout.hit_test(Point::new(-5.0, 10.0), &CanvasBounds::unbounded(), &none()),
            DropTarget::Canvas
        );
    }

    #[test]
    fn depth_limit_is_enforced() {
        let template = BlockTemplate::for_type(BlockType::If);
        let count = MAX_NEST_DEPTH as u64 + 2;
        let blocks = (1..=count)
            .map(|raw| {
                let id = BlockId::new(raw).expect("id");
                let mut block = crate::block::Block::from_template(id, &template, Point::ORIGIN);
                if raw > 1 {
                    block.container_id = Some(BlockId::new(raw - 1).expect("id"));
                }
                if raw < count {
                    block.nested_blocks = vec![BlockId::new(raw + 1).expect("id")];
                }
                block
            })
            .collect();
        let tree = BlockTree::from_snapshot(BlockTreeSnapshot {
            schema_version: crate::tree::BLOCK_TREE_SCHEMA_VERSION,
            next_id: BlockId::new(count + 1).expect("id"),
            blocks,
        })
        .expect("deep but valid tree");
        assert!(matches!(
            BlockLayout::compute(&tree, &LayoutMetrics::default()),
            Err(LayoutError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn default_metrics_are_valid() {
        assert!(LayoutMetrics::default().problems().is_empty());
        let bad = LayoutMetrics {
            nest_inset_x: 200.0,
            block_height: -1.0,
            ..LayoutMetrics::default()
        };
        assert_eq!(bad.problems().len(), 2);
    }
}

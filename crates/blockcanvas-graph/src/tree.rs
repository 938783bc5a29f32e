#![forbid(unsafe_code)]

//! Block tree store.
//!
//! A [`BlockTree`] is an arena of [`Block`]s keyed by [`BlockId`] with two
//! relationship channels:
//!
//! - **sequential chaining**: `parent_id`/`child_id`, at most one predecessor
//!   and one successor per block, forming linear acyclic chains;
//! - **containment**: `container_id` on the child plus the ordered
//!   `nested_blocks` on the container, acyclic.
//!
//! The channels are mutually exclusive. A nested block never carries chain
//! links, and nesting a chained block splices its neighbours together.
//!
//! Every mutation is a [`BlockOperation`]. [`BlockTree::apply_operation`]
//! runs it on a cloned working tree, validates the whole working tree, and
//! only then swaps it in, so a rejected operation leaves the tree untouched.
//! [`BlockStore`] layers copy-on-write snapshots (`Arc<BlockTree>`) and atomic
//! batches on top.
//!
//! # Invariants
//!
//! 1. `a.child_id == Some(b)` iff `b.parent_id == Some(a)`.
//! 2. `b.container_id == Some(c)` iff `c.nested_blocks` lists `b`, exactly once.
//! 3. Only `can_nest` blocks have nested blocks.
//! 4. Nested blocks have no chain links.
//! 5. Neither channel has cycles.
//! 6. `next_id` is greater than every allocated id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use blockcanvas_core::geometry::{Delta, Point};
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockId};
use crate::catalog::BlockTemplate;

/// Current block tree snapshot schema version.
pub const BLOCK_TREE_SCHEMA_VERSION: u16 = 1;

/// What happens to a removed container's nested blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Delete the nested contents transitively.
    #[default]
    Cascade,
    /// Promote direct nested blocks to top-level at their absolute positions.
    Orphan,
}

/// Serializable block tree snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTreeSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub next_id: BlockId,
    pub blocks: Vec<Block>,
}

fn default_schema_version() -> u16 {
    BLOCK_TREE_SCHEMA_VERSION
}

impl BlockTreeSnapshot {
    /// Sort blocks by id so equivalent trees serialize identically.
    pub fn canonicalize(&mut self) {
        self.blocks.sort_by_key(|block| block.id);
    }
}

/// One structural mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BlockOperation {
    /// Instantiate `template` as a new top-level block with a pre-allocated id.
    CreateBlock {
        id: BlockId,
        template: BlockTemplate,
        position: Point,
    },
    /// Detach and delete a block.
    RemoveBlock {
        id: BlockId,
        #[serde(default)]
        policy: RemovalPolicy,
    },
    /// Translate a block and every block chained to it.
    MoveBlockGroup { id: BlockId, delta: Delta },
    SetPosition { id: BlockId, position: Point },
    /// Link `child` after `parent`, or detach it from its predecessor.
    ReparentSequential {
        child: BlockId,
        parent: Option<BlockId>,
    },
    /// Move `block` into `container` at `index` (append when `None`), or
    /// back to top level.
    SetContainer {
        block: BlockId,
        container: Option<BlockId>,
        #[serde(default)]
        index: Option<usize>,
    },
    SetField {
        id: BlockId,
        key: String,
        value: String,
    },
}

impl BlockOperation {
    #[must_use]
    pub const fn kind(&self) -> BlockOperationKind {
        match self {
            Self::CreateBlock { .. } => BlockOperationKind::CreateBlock,
            Self::RemoveBlock { .. } => BlockOperationKind::RemoveBlock,
            Self::MoveBlockGroup { .. } => BlockOperationKind::MoveBlockGroup,
            Self::SetPosition { .. } => BlockOperationKind::SetPosition,
            Self::ReparentSequential { .. } => BlockOperationKind::ReparentSequential,
            Self::SetContainer { .. } => BlockOperationKind::SetContainer,
            Self::SetField { .. } => BlockOperationKind::SetField,
        }
    }

    /// Block ids named by the operation.
    #[must_use]
    pub fn referenced_blocks(&self) -> Vec<BlockId> {
        match self {
            Self::CreateBlock { id, .. }
            | Self::RemoveBlock { id, .. }
            | Self::MoveBlockGroup { id, .. }
            | Self::SetPosition { id, .. }
            | Self::SetField { id, .. } => vec![*id],
            Self::ReparentSequential { child, parent } => {
                let mut ids = vec![*child];
                ids.extend(*parent);
                ids
            }
            Self::SetContainer {
                block, container, ..
            } => {
                let mut ids = vec![*block];
                ids.extend(*container);
                ids
            }
        }
    }
}

/// Stable operation discriminator for logs and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOperationKind {
    CreateBlock,
    RemoveBlock,
    MoveBlockGroup,
    SetPosition,
    ReparentSequential,
    SetContainer,
    SetField,
}

/// Successful operation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOperationOutcome {
    pub operation_id: u64,
    pub kind: BlockOperationKind,
    pub touched_blocks: Vec<BlockId>,
    pub before_hash: u64,
    pub after_hash: u64,
}

/// Rejected operation with its structured reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOperationError {
    pub operation_id: u64,
    pub kind: BlockOperationKind,
    pub touched_blocks: Vec<BlockId>,
    pub before_hash: u64,
    pub after_hash: u64,
    pub reason: BlockOperationFailure,
}

impl fmt::Display for BlockOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block operation {} ({:?}) failed: {}",
            self.operation_id, self.kind, self.reason
        )
    }
}

impl std::error::Error for BlockOperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// Structured reasons for operation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOperationFailure {
    MissingBlock {
        block: BlockId,
    },
    DuplicateBlock {
        block: BlockId,
    },
    StaleBlockId {
        block: BlockId,
        next_id: BlockId,
    },
    BlockIdOverflow {
        current: BlockId,
    },
    NonFinitePosition {
        block: BlockId,
    },
    NonFiniteDelta {
        block: BlockId,
    },
    SelfLink {
        block: BlockId,
    },
    ChainCycle {
        parent: BlockId,
        child: BlockId,
    },
    NestedBlockCannotChain {
        block: BlockId,
    },
    SelfNesting {
        block: BlockId,
    },
    ContainmentCycle {
        ancestor: BlockId,
        descendant: BlockId,
    },
    NotNestable {
        container: BlockId,
    },
    UnknownField {
        block: BlockId,
        key: String,
    },
    Validation(BlockModelError),
}

impl fmt::Display for BlockOperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBlock { block } => write!(f, "block {block} not found"),
            Self::DuplicateBlock { block } => write!(f, "block {block} already exists"),
            Self::StaleBlockId { block, next_id } => write!(
                f,
                "block id {block} was already allocated (next id is {next_id})"
            ),
            Self::BlockIdOverflow { current } => {
                write!(f, "block id overflow after {current}")
            }
            Self::NonFinitePosition { block } => {
                write!(f, "block {block} position is not finite")
            }
            Self::NonFiniteDelta { block } => {
                write!(f, "move delta for block {block} is not finite")
            }
            Self::SelfLink { block } => write!(f, "block {block} cannot follow itself"),
            Self::ChainCycle { parent, child } => write!(
                f,
                "linking {child} after {parent} would close a chain cycle"
            ),
            Self::NestedBlockCannotChain { block } => {
                write!(f, "nested block {block} cannot join a chain")
            }
            Self::SelfNesting { block } => {
                write!(f, "block {block} cannot be nested inside itself")
            }
            Self::ContainmentCycle {
                ancestor,
                descendant,
            } => write!(
                f,
                "block {ancestor} cannot be nested inside its own descendant {descendant}"
            ),
            Self::NotNestable { container } => {
                write!(f, "block {container} does not accept nested blocks")
            }
            Self::UnknownField { block, key } => {
                write!(f, "block {block} has no field {key:?}")
            }
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BlockOperationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

/// Structural invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockModelError {
    ZeroBlockId,
    BlockIdOverflow {
        current: BlockId,
    },
    UnsupportedSchemaVersion {
        version: u16,
    },
    DuplicateBlockId {
        block: BlockId,
    },
    NonFinitePosition {
        block: BlockId,
    },
    MissingChainTarget {
        block: BlockId,
        target: BlockId,
    },
    AsymmetricChain {
        block: BlockId,
        target: BlockId,
    },
    ChainCycle {
        block: BlockId,
    },
    MissingContainer {
        block: BlockId,
        container: BlockId,
    },
    MissingNestedBlock {
        container: BlockId,
        nested: BlockId,
    },
    ContainerMembershipMismatch {
        block: BlockId,
        container: BlockId,
    },
    DuplicateNestedEntry {
        container: BlockId,
        block: BlockId,
    },
    NestedInNonContainer {
        container: BlockId,
    },
    NestedBlockChained {
        block: BlockId,
    },
    ContainmentCycle {
        block: BlockId,
    },
    NextIdNotGreaterThanExisting {
        next_id: BlockId,
        max_existing: BlockId,
    },
}

impl fmt::Display for BlockModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroBlockId => write!(f, "block id 0 is invalid"),
            Self::BlockIdOverflow { current } => write!(f, "block id overflow after {current}"),
            Self::UnsupportedSchemaVersion { version } => write!(
                f,
                "unsupported block tree schema version {version} (expected {BLOCK_TREE_SCHEMA_VERSION})"
            ),
            Self::DuplicateBlockId { block } => write!(f, "duplicate block id {block}"),
            Self::NonFinitePosition { block } => {
                write!(f, "block {block} position is not finite")
            }
            Self::MissingChainTarget { block, target } => {
                write!(f, "block {block} links to missing block {target}")
            }
            Self::AsymmetricChain { block, target } => write!(
                f,
                "chain link between {block} and {target} is not mirrored"
            ),
            Self::ChainCycle { block } => write!(f, "block {block} is on a chain cycle"),
            Self::MissingContainer { block, container } => {
                write!(f, "block {block} references missing container {container}")
            }
            Self::MissingNestedBlock { container, nested } => write!(
                f,
                "container {container} lists missing nested block {nested}"
            ),
            Self::ContainerMembershipMismatch { block, container } => write!(
                f,
                "block {block} and container {container} disagree about membership"
            ),
            Self::DuplicateNestedEntry { container, block } => write!(
                f,
                "container {container} lists nested block {block} more than once"
            ),
            Self::NestedInNonContainer { container } => write!(
                f,
                "block {container} has nested blocks but cannot nest"
            ),
            Self::NestedBlockChained { block } => {
                write!(f, "nested block {block} carries chain links")
            }
            Self::ContainmentCycle { block } => {
                write!(f, "block {block} is on a containment cycle")
            }
            Self::NextIdNotGreaterThanExisting {
                next_id,
                max_existing,
            } => write!(
                f,
                "next id {next_id} must be greater than max existing id {max_existing}"
            ),
        }
    }
}

impl std::error::Error for BlockModelError {}

/// Validated block arena.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTree {
    next_id: BlockId,
    blocks: BTreeMap<BlockId, Block>,
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTree {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: BlockId::MIN,
            blocks: BTreeMap::new(),
        }
    }

    /// Construct and validate a tree from a snapshot.
    pub fn from_snapshot(snapshot: BlockTreeSnapshot) -> Result<Self, BlockModelError> {
        if snapshot.schema_version != BLOCK_TREE_SCHEMA_VERSION {
            return Err(BlockModelError::UnsupportedSchemaVersion {
                version: snapshot.schema_version,
            });
        }
        let mut blocks = BTreeMap::new();
        for block in snapshot.blocks {
            let id = block.id;
            if blocks.insert(id, block).is_some() {
                return Err(BlockModelError::DuplicateBlockId { block: id });
            }
        }
        validate_blocks(snapshot.next_id, &blocks)?;
        Ok(Self {
            next_id: snapshot.next_id,
            blocks,
        })
    }

    /// Export a canonical snapshot.
    #[must_use]
    pub fn to_snapshot(&self) -> BlockTreeSnapshot {
        let mut snapshot = BlockTreeSnapshot {
            schema_version: BLOCK_TREE_SCHEMA_VERSION,
            next_id: self.next_id,
            blocks: self.blocks.values().cloned().collect(),
        };
        snapshot.canonicalize();
        snapshot
    }

    /// Next id a created block will receive.
    #[must_use]
    pub const fn next_id(&self) -> BlockId {
        self.next_id
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// All blocks in id (creation) order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Blocks that are not nested, in id order.
    pub fn top_level(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().filter(|block| block.is_top_level())
    }

    /// First block of the chain containing `id`.
    #[must_use]
    pub fn chain_head(&self, id: BlockId) -> Option<BlockId> {
        let mut current = self.blocks.get(&id)?;
        for _ in 0..self.blocks.len() {
            let Some(parent) = current.parent_id.and_then(|p| self.blocks.get(&p)) else {
                break;
            };
            current = parent;
        }
        Some(current.id)
    }

    /// `id` followed by its successors.
    #[must_use]
    pub fn downstream(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut cursor = self.blocks.get(&id);
        while let Some(block) = cursor {
            if out.contains(&block.id) {
                break;
            }
            out.push(block.id);
            cursor = block.child_id.and_then(|child| self.blocks.get(&child));
        }
        out
    }

    /// Every block chained to `id` in either direction, head first.
    #[must_use]
    pub fn chain_members(&self, id: BlockId) -> Vec<BlockId> {
        self.chain_head(id)
            .map(|head| self.downstream(head))
            .unwrap_or_default()
    }

    /// Transitive nested contents of `id` (excluding `id`), pre-order.
    #[must_use]
    pub fn nested_closure(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut visited = BTreeSet::from([id]);
        let mut stack: Vec<BlockId> = self
            .blocks
            .get(&id)
            .map(|block| block.nested_blocks.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            out.push(next);
            if let Some(block) = self.blocks.get(&next) {
                stack.extend(block.nested_blocks.iter().rev().copied());
            }
        }
        out
    }

    /// Whether `candidate` is nested (transitively) inside `root`.
    #[must_use]
    pub fn is_nested_within(&self, candidate: BlockId, root: BlockId) -> bool {
        let mut cursor = self.blocks.get(&candidate).and_then(|b| b.container_id);
        for _ in 0..self.blocks.len() {
            let Some(container) = cursor else {
                return false;
            };
            if container == root {
                return true;
            }
            cursor = self.blocks.get(&container).and_then(|b| b.container_id);
        }
        false
    }

    /// Number of containers enclosing `id`.
    #[must_use]
    pub fn nesting_depth(&self, id: BlockId) -> usize {
        let mut depth = 0;
        let mut cursor = self.blocks.get(&id).and_then(|b| b.container_id);
        while let Some(container) = cursor {
            depth += 1;
            if depth > self.blocks.len() {
                break;
            }
            cursor = self.blocks.get(&container).and_then(|b| b.container_id);
        }
        depth
    }

    /// Canvas position from stored positions: nested positions are offsets
    /// from their container's position.
    #[must_use]
    pub fn stored_absolute_position(&self, id: BlockId) -> Option<Point> {
        let mut block = self.blocks.get(&id)?;
        let mut position = block.position;
        for _ in 0..self.blocks.len() {
            let Some(container) = block.container_id.and_then(|c| self.blocks.get(&c)) else {
                break;
            };
            position = container.position + Delta::new(position.x, position.y);
            block = container;
        }
        Some(position)
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> Result<(), BlockModelError> {
        validate_blocks(self.next_id, &self.blocks)
    }

    /// Deterministic structural hash (FNV-1a over every block record).
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0001_0000_01b3;

        fn mix(hash: &mut u64, byte: u8) {
            *hash ^= u64::from(byte);
            *hash = hash.wrapping_mul(PRIME);
        }

        fn mix_bytes(hash: &mut u64, bytes: &[u8]) {
            for byte in bytes {
                mix(hash, *byte);
            }
        }

        fn mix_u64(hash: &mut u64, value: u64) {
            mix_bytes(hash, &value.to_le_bytes());
        }

        fn mix_f64(hash: &mut u64, value: f64) {
            mix_u64(hash, value.to_bits());
        }

        fn mix_str(hash: &mut u64, value: &str) {
            mix_u64(hash, value.len() as u64);
            mix_bytes(hash, value.as_bytes());
        }

        fn mix_optional_id(hash: &mut u64, id: Option<BlockId>) {
            match id {
                Some(id) => {
                    mix(hash, 1);
                    mix_u64(hash, id.get());
                }
                None => mix(hash, 0),
            }
        }

        let mut hash = OFFSET_BASIS;
        mix_u64(&mut hash, self.next_id.get());
        mix_u64(&mut hash, self.blocks.len() as u64);
        for block in self.blocks.values() {
            mix_u64(&mut hash, block.id.get());
            mix_str(&mut hash, block.block_type.as_str());
            mix_str(&mut hash, &block.label);
            mix_str(&mut hash, &block.color);
            mix_f64(&mut hash, block.position.x);
            mix_f64(&mut hash, block.position.y);
            mix(&mut hash, u8::from(block.can_nest));
            mix_optional_id(&mut hash, block.container_id);
            mix_optional_id(&mut hash, block.parent_id);
            mix_optional_id(&mut hash, block.child_id);
            mix_u64(&mut hash, block.nested_blocks.len() as u64);
            for nested in &block.nested_blocks {
                mix_u64(&mut hash, nested.get());
            }
            mix_u64(&mut hash, block.fields.len() as u64);
            for (key, value) in &block.fields {
                mix_str(&mut hash, key);
                mix_str(&mut hash, value);
            }
        }
        hash
    }

    /// Apply one operation atomically.
    ///
    /// The tree is unchanged when the operation is rejected or the resulting
    /// tree fails validation.
    pub fn apply_operation(
        &mut self,
        operation_id: u64,
        operation: BlockOperation,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        let kind = operation.kind();
        let before_hash = self.state_hash();
        let mut working = self.clone();
        let mut touched = operation
            .referenced_blocks()
            .into_iter()
            .collect::<BTreeSet<_>>();

        if let Err(reason) = working.apply_operation_inner(operation, &mut touched) {
            return Err(BlockOperationError {
                operation_id,
                kind,
                touched_blocks: touched.into_iter().collect(),
                before_hash,
                after_hash: working.state_hash(),
                reason,
            });
        }

        if let Err(err) = working.validate() {
            return Err(BlockOperationError {
                operation_id,
                kind,
                touched_blocks: touched.into_iter().collect(),
                before_hash,
                after_hash: working.state_hash(),
                reason: BlockOperationFailure::Validation(err),
            });
        }

        let after_hash = working.state_hash();
        *self = working;

        Ok(BlockOperationOutcome {
            operation_id,
            kind,
            touched_blocks: touched.into_iter().collect(),
            before_hash,
            after_hash,
        })
    }

    /// Apply a batch atomically: either every operation lands or none does.
    ///
    /// Operation ids are assigned sequentially from `first_operation_id`.
    pub fn apply_batch<I>(
        &mut self,
        first_operation_id: u64,
        operations: I,
    ) -> Result<Vec<BlockOperationOutcome>, BlockOperationError>
    where
        I: IntoIterator<Item = BlockOperation>,
    {
        let mut working = self.clone();
        let mut outcomes = Vec::new();
        for (offset, operation) in operations.into_iter().enumerate() {
            let operation_id = first_operation_id.wrapping_add(offset as u64);
            outcomes.push(working.apply_operation(operation_id, operation)?);
        }
        *self = working;
        Ok(outcomes)
    }

    fn apply_operation_inner(
        &mut self,
        operation: BlockOperation,
        touched: &mut BTreeSet<BlockId>,
    ) -> Result<(), BlockOperationFailure> {
        match operation {
            BlockOperation::CreateBlock {
                id,
                template,
                position,
            } => self.create_block(id, &template, position),
            BlockOperation::RemoveBlock { id, policy } => self.remove_block(id, policy, touched),
            BlockOperation::MoveBlockGroup { id, delta } => {
                self.move_block_group(id, delta, touched)
            }
            BlockOperation::SetPosition { id, position } => {
                if !position.is_finite() {
                    return Err(BlockOperationFailure::NonFinitePosition { block: id });
                }
                self.block_mut(id)?.position = position;
                Ok(())
            }
            BlockOperation::ReparentSequential { child, parent } => {
                self.reparent_sequential(child, parent, touched)
            }
            BlockOperation::SetContainer {
                block,
                container,
                index,
            } => self.set_container(block, container, index, touched),
            BlockOperation::SetField { id, key, value } => {
                let block = self.block_mut(id)?;
                if !block.block_type.has_field(&key) {
                    return Err(BlockOperationFailure::UnknownField { block: id, key });
                }
                block.fields.insert(key, value);
                Ok(())
            }
        }
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut Block, BlockOperationFailure> {
        self.blocks
            .get_mut(&id)
            .ok_or(BlockOperationFailure::MissingBlock { block: id })
    }

    fn require(&self, id: BlockId) -> Result<&Block, BlockOperationFailure> {
        self.blocks
            .get(&id)
            .ok_or(BlockOperationFailure::MissingBlock { block: id })
    }

    fn create_block(
        &mut self,
        id: BlockId,
        template: &BlockTemplate,
        position: Point,
    ) -> Result<(), BlockOperationFailure> {
        if self.blocks.contains_key(&id) {
            return Err(BlockOperationFailure::DuplicateBlock { block: id });
        }
        if id < self.next_id {
            return Err(BlockOperationFailure::StaleBlockId {
                block: id,
                next_id: self.next_id,
            });
        }
        if !position.is_finite() {
            return Err(BlockOperationFailure::NonFinitePosition { block: id });
        }
        self.next_id = id
            .checked_next()
            .map_err(|_| BlockOperationFailure::BlockIdOverflow { current: id })?;
        self.blocks
            .insert(id, Block::from_template(id, template, position));
        Ok(())
    }

    fn remove_block(
        &mut self,
        id: BlockId,
        policy: RemovalPolicy,
        touched: &mut BTreeSet<BlockId>,
    ) -> Result<(), BlockOperationFailure> {
        self.require(id)?;
        let base = self.stored_absolute_position(id).unwrap_or(Point::ORIGIN);
        self.detach_from_chain(id, false, touched);
        self.detach_from_container(id, touched);

        match policy {
            RemovalPolicy::Cascade => {
                for descendant in self.nested_closure(id) {
                    self.blocks.remove(&descendant);
                    touched.insert(descendant);
                }
            }
            RemovalPolicy::Orphan => {
                let nested = self.require(id)?.nested_blocks.clone();
                for child in nested {
                    if let Some(block) = self.blocks.get_mut(&child) {
                        block.container_id = None;
                        block.position = base + Delta::new(block.position.x, block.position.y);
                        touched.insert(child);
                    }
                }
            }
        }

        self.blocks.remove(&id);
        Ok(())
    }

    fn move_block_group(
        &mut self,
        id: BlockId,
        delta: Delta,
        touched: &mut BTreeSet<BlockId>,
    ) -> Result<(), BlockOperationFailure> {
        self.require(id)?;
        if !delta.is_finite() {
            return Err(BlockOperationFailure::NonFiniteDelta { block: id });
        }
        for member in self.chain_members(id) {
            let block = self.block_mut(member)?;
            block.position = block.position + delta;
            touched.insert(member);
        }
        Ok(())
    }

    fn reparent_sequential(
        &mut self,
        child: BlockId,
        parent: Option<BlockId>,
        touched: &mut BTreeSet<BlockId>,
    ) -> Result<(), BlockOperationFailure> {
        let child_block = self.require(child)?;
        if !child_block.is_top_level() {
            return Err(BlockOperationFailure::NestedBlockCannotChain { block: child });
        }
        let old_parent = child_block.parent_id;

        let Some(parent) = parent else {
            if let Some(old) = old_parent {
                self.block_mut(old)?.child_id = None;
                self.block_mut(child)?.parent_id = None;
                touched.insert(old);
            }
            return Ok(());
        };

        if parent == child {
            return Err(BlockOperationFailure::SelfLink { block: child });
        }
        let parent_block = self.require(parent)?;
        if !parent_block.is_top_level() {
            return Err(BlockOperationFailure::NestedBlockCannotChain { block: parent });
        }
        if parent_block.child_id == Some(child) {
            return Ok(());
        }
        if self.downstream(child).contains(&parent) {
            return Err(BlockOperationFailure::ChainCycle { parent, child });
        }
        let displaced = parent_block.child_id;

        if let Some(old) = old_parent {
            self.block_mut(old)?.child_id = None;
            touched.insert(old);
        }
        if let Some(old) = displaced {
            self.block_mut(old)?.parent_id = None;
            touched.insert(old);
        }
        self.block_mut(parent)?.child_id = Some(child);
        self.block_mut(child)?.parent_id = Some(parent);
        Ok(())
    }

    fn set_container(
        &mut self,
        block: BlockId,
        container: Option<BlockId>,
        index: Option<usize>,
        touched: &mut BTreeSet<BlockId>,
    ) -> Result<(), BlockOperationFailure> {
        self.require(block)?;
        let Some(container) = container else {
            self.detach_from_container(block, touched);
            return Ok(());
        };

        if container == block {
            return Err(BlockOperationFailure::SelfNesting { block });
        }
        let target = self.require(container)?;
        if self.is_nested_within(container, block) {
            return Err(BlockOperationFailure::ContainmentCycle {
                ancestor: block,
                descendant: container,
            });
        }
        if !target.can_nest {
            return Err(BlockOperationFailure::NotNestable { container });
        }

        self.detach_from_container(block, touched);
        self.detach_from_chain(block, true, touched);

        let nested = &mut self.block_mut(container)?.nested_blocks;
        let index = index.map_or(nested.len(), |index| index.min(nested.len()));
        nested.insert(index, block);
        self.block_mut(block)?.container_id = Some(container);
        Ok(())
    }

    /// Clear both chain links of `id`. With `splice`, its former neighbours
    /// are linked to each other.
    fn detach_from_chain(&mut self, id: BlockId, splice: bool, touched: &mut BTreeSet<BlockId>) {
        let Some(block) = self.blocks.get_mut(&id) else {
            return;
        };
        let parent = block.parent_id.take();
        let child = block.child_id.take();
        if let Some(parent) = parent
            && let Some(block) = self.blocks.get_mut(&parent)
        {
            block.child_id = if splice { child } else { None };
            touched.insert(parent);
        }
        if let Some(child) = child
            && let Some(block) = self.blocks.get_mut(&child)
        {
            block.parent_id = if splice { parent } else { None };
            touched.insert(child);
        }
    }

    fn detach_from_container(&mut self, id: BlockId, touched: &mut BTreeSet<BlockId>) {
        let Some(container) = self
            .blocks
            .get_mut(&id)
            .and_then(|block| block.container_id.take())
        else {
            return;
        };
        if let Some(block) = self.blocks.get_mut(&container) {
            block.nested_blocks.retain(|nested| *nested != id);
            touched.insert(container);
        }
    }
}

fn validate_blocks(
    next_id: BlockId,
    blocks: &BTreeMap<BlockId, Block>,
) -> Result<(), BlockModelError> {
    if let Some(max_existing) = blocks.keys().next_back().copied()
        && next_id <= max_existing
    {
        return Err(BlockModelError::NextIdNotGreaterThanExisting {
            next_id,
            max_existing,
        });
    }

    for (id, block) in blocks {
        let id = *id;
        if block.id != id {
            return Err(BlockModelError::DuplicateBlockId { block: block.id });
        }
        if !block.position.is_finite() {
            return Err(BlockModelError::NonFinitePosition { block: id });
        }

        if let Some(parent) = block.parent_id {
            let Some(parent_block) = blocks.get(&parent) else {
                return Err(BlockModelError::MissingChainTarget {
                    block: id,
                    target: parent,
                });
            };
            if parent_block.child_id != Some(id) {
                return Err(BlockModelError::AsymmetricChain {
                    block: id,
                    target: parent,
                });
            }
        }
        if let Some(child) = block.child_id {
            let Some(child_block) = blocks.get(&child) else {
                return Err(BlockModelError::MissingChainTarget {
                    block: id,
                    target: child,
                });
            };
            if child_block.parent_id != Some(id) {
                return Err(BlockModelError::AsymmetricChain {
                    block: id,
                    target: child,
                });
            }
        }

        if let Some(container) = block.container_id {
            let Some(container_block) = blocks.get(&container) else {
                return Err(BlockModelError::MissingContainer {
                    block: id,
                    container,
                });
            };
            if !container_block.nested_blocks.contains(&id) {
                return Err(BlockModelError::ContainerMembershipMismatch {
                    block: id,
                    container,
                });
            }
            if block.parent_id.is_some() || block.child_id.is_some() {
                return Err(BlockModelError::NestedBlockChained { block: id });
            }
        }

        if !block.nested_blocks.is_empty() && !block.can_nest {
            return Err(BlockModelError::NestedInNonContainer { container: id });
        }
        let mut seen = BTreeSet::new();
        for nested in &block.nested_blocks {
            if !seen.insert(*nested) {
                return Err(BlockModelError::DuplicateNestedEntry {
                    container: id,
                    block: *nested,
                });
            }
            let Some(nested_block) = blocks.get(nested) else {
                return Err(BlockModelError::MissingNestedBlock {
                    container: id,
                    nested: *nested,
                });
            };
            if nested_block.container_id != Some(id) {
                return Err(BlockModelError::ContainerMembershipMismatch {
                    block: *nested,
                    container: id,
                });
            }
        }
    }

    // With mirrored links every chain block has one predecessor, so a cycle
    // is exactly a set of blocks unreachable from any chain head.
    let mut reached = BTreeSet::new();
    for head in blocks.values().filter(|block| block.parent_id.is_none()) {
        let mut cursor = Some(head.id);
        while let Some(id) = cursor {
            if !reached.insert(id) {
                break;
            }
            cursor = blocks.get(&id).and_then(|block| block.child_id);
        }
    }
    if let Some(block) = blocks.keys().find(|id| !reached.contains(id)) {
        return Err(BlockModelError::ChainCycle { block: *block });
    }

    let mut reached = BTreeSet::new();
    let mut stack: Vec<BlockId> = blocks
        .values()
        .filter(|block| block.is_top_level())
        .map(|block| block.id)
        .collect();
    while let Some(id) = stack.pop() {
        if !reached.insert(id) {
            continue;
        }
        if let Some(block) = blocks.get(&id) {
            stack.extend(block.nested_blocks.iter().copied());
        }
    }
    if let Some(block) = blocks.keys().find(|id| !reached.contains(id)) {
        return Err(BlockModelError::ContainmentCycle { block: *block });
    }

    Ok(())
}

/// Deterministic allocator for block IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdAllocator {
    next: BlockId,
}

impl BlockIdAllocator {
    /// Start allocating from a known ID.
    #[must_use]
    pub const fn with_next(next: BlockId) -> Self {
        Self { next }
    }

    /// Create allocator from the next ID in a validated tree.
    #[must_use]
    pub fn from_tree(tree: &BlockTree) -> Self {
        Self {
            next: tree.next_id,
        }
    }

    /// Peek at the next ID without consuming.
    #[must_use]
    pub const fn peek(&self) -> BlockId {
        self.next
    }

    /// Allocate the next ID.
    pub fn allocate(&mut self) -> Result<BlockId, BlockModelError> {
        let current = self.next;
        self.next = current.checked_next()?;
        Ok(current)
    }
}

impl Default for BlockIdAllocator {
    fn default() -> Self {
        Self::with_next(BlockId::MIN)
    }
}

/// Owner of the current tree snapshot.
///
/// Readers take `Arc<BlockTree>` snapshots that are never mutated; writers go
/// through `&mut self` and replace the snapshot on success.
#[derive(Debug, Clone, Default)]
pub struct BlockStore {
    current: Arc<BlockTree>,
    next_operation_id: u64,
}

impl BlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_tree(tree: BlockTree) -> Self {
        Self {
            current: Arc::new(tree),
            next_operation_id: 0,
        }
    }

    pub fn from_snapshot(snapshot: BlockTreeSnapshot) -> Result<Self, BlockModelError> {
        BlockTree::from_snapshot(snapshot).map(Self::from_tree)
    }

    /// The current immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<BlockTree> {
        Arc::clone(&self.current)
    }

    #[must_use]
    pub fn tree(&self) -> &BlockTree {
        &self.current
    }

    /// Apply a single operation.
    pub fn apply(
        &mut self,
        operation: BlockOperation,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        let mut outcomes = self.commit(vec![operation])?;
        Ok(outcomes.remove(0))
    }

    /// Apply a batch atomically and publish the result as a new snapshot.
    pub fn commit(
        &mut self,
        operations: Vec<BlockOperation>,
    ) -> Result<Vec<BlockOperationOutcome>, BlockOperationError> {
        let first_operation_id = self.next_operation_id;
        self.next_operation_id = self
            .next_operation_id
            .wrapping_add(operations.len() as u64);
        let count = operations.len();

        let mut working = BlockTree::clone(&self.current);
        match working.apply_batch(first_operation_id, operations) {
            Ok(outcomes) => {
                tracing::debug!(
                    target: "blockcanvas.store",
                    operations = count,
                    first_operation_id,
                    before_hash = self.current.state_hash(),
                    after_hash = working.state_hash(),
                    "commit applied"
                );
                self.current = Arc::new(working);
                Ok(outcomes)
            }
            Err(err) => {
                tracing::debug!(
                    target: "blockcanvas.store",
                    operation_id = err.operation_id,
                    kind = ?err.kind,
                    reason = %err.reason,
                    "commit rejected"
                );
                Err(err)
            }
        }
    }

    /// Instantiate `template` at `position` and return the new id.
    pub fn create_block(
        &mut self,
        template: &BlockTemplate,
        position: Point,
    ) -> Result<BlockId, BlockOperationError> {
        let id = self.current.next_id();
        self.apply(BlockOperation::CreateBlock {
            id,
            template: template.clone(),
            position,
        })?;
        Ok(id)
    }

    pub fn remove_block(
        &mut self,
        id: BlockId,
        policy: RemovalPolicy,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        self.apply(BlockOperation::RemoveBlock { id, policy })
    }

    pub fn move_block_group(
        &mut self,
        id: BlockId,
        delta: Delta,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        self.apply(BlockOperation::MoveBlockGroup { id, delta })
    }

    pub fn set_position(
        &mut self,
        id: BlockId,
        position: Point,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        self.apply(BlockOperation::SetPosition { id, position })
    }

    pub fn reparent_sequential(
        &mut self,
        child: BlockId,
        parent: Option<BlockId>,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        self.apply(BlockOperation::ReparentSequential { child, parent })
    }

    pub fn set_container(
        &mut self,
        block: BlockId,
        container: Option<BlockId>,
        index: Option<usize>,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        self.apply(BlockOperation::SetContainer {
            block,
            container,
            index,
        })
    }

    pub fn set_field(
        &mut self,
        id: BlockId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<BlockOperationOutcome, BlockOperationError> {
        self.apply(BlockOperation::SetField {
            id,
            key: key.into(),
            value: value.into(),
        })
    }
}

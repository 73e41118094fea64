//! L2: the parent/child tree overlay.
//!
//! The tree layer wraps every L1 payload with a fixed-width header
//! (parent hash + layer tag) and interprets `parent` links between chain
//! roots as tree edges. Child enumeration is accelerated by the
//! `child_blocks` cache slot; like every cache slot it is a recomputable
//! hint, written only after a full authoritative scan.

use tracing::debug;

use crate::cache::{CacheSlot, CacheValue};
use crate::chain::{Blockchain, ValidationFailure, ValidationReport, WriteOptions};
use crate::error::{BlocktreeError, InvalidBlockReason, Result};
use crate::providers::{BlockStorage, CryptoProvider, SlotCache, TimeSource};
use crate::types::block::{Block, NewBlock};
use crate::types::tree::{decode_tree_data, encode_tree_data, NewTreeBlock, TreeBlock};
use crate::types::{BlockHash, Layer};

const L: Layer = Layer::Blocktree;

/// The L2 tree store, layered over [`Blockchain`].
pub struct Blocktree<S, C, T, R> {
    chain: Blockchain<S, C, T, R>,
}

impl<S, C, T, R> Blocktree<S, C, T, R>
where
    S: BlockStorage,
    C: SlotCache,
    T: TimeSource,
    R: CryptoProvider,
{
    /// Creates a tree store over the given collaborators.
    pub fn new(storage: S, cache: C, clock: T, crypto: R) -> Self {
        Self {
            chain: Blockchain::new(storage, cache, clock, crypto),
        }
    }

    /// Returns a reference to the underlying chain layer.
    pub fn chain(&self) -> &Blockchain<S, C, T, R> {
        &self.chain
    }

    /// Appends a tree block and returns its content hash.
    ///
    /// When validating and `parent` is set, the parent must resolve
    /// (`invalid_parent_block`). On success the new block is pushed into
    /// the parent's `child_blocks` cache list, but only when it starts
    /// a new chain, since only chain roots are tree edges.
    pub async fn write_block(
        &self,
        new_block: &NewTreeBlock,
        opts: &WriteOptions,
    ) -> Result<BlockHash> {
        if opts.validate {
            if let Some(parent) = &new_block.parent {
                if self.chain.read_block(parent).await?.is_none() {
                    return Err(BlocktreeError::invalid_block(
                        L,
                        InvalidBlockReason::InvalidParentBlock,
                        Some(*parent),
                    ));
                }
            }
        }

        let data = encode_tree_data(new_block.parent.as_ref(), new_block.layer, &new_block.data);
        let hash = self
            .chain
            .write_block(
                &NewBlock {
                    prev: new_block.prev,
                    data,
                },
                opts,
            )
            .await?;

        if new_block.prev.is_none() {
            if let Some(parent) = &new_block.parent {
                self.chain
                    .cache()
                    .push_cache(parent, CacheSlot::ChildBlocks, hash)
                    .await;
            }
        }
        Ok(hash)
    }

    /// Reads a block and parses its tree header. An all-zero parent
    /// field normalizes to `None`.
    pub async fn read_block(&self, hash: &BlockHash) -> Result<Option<TreeBlock>> {
        match self.chain.read_block(hash).await? {
            Some(block) => Ok(Some(TreeBlock::from_block(block)?)),
            None => Ok(None),
        }
    }

    /// Decodes a tree block from raw L1 bytes.
    pub fn read_block_bytes(&self, bytes: &[u8]) -> Result<TreeBlock> {
        TreeBlock::from_block(Block::decode(bytes)?)
    }

    /// Returns the `parent` link of `hash`.
    ///
    /// Fails with `is_null` when `hash` does not resolve.
    pub async fn get_parent_block(&self, hash: &BlockHash) -> Result<Option<BlockHash>> {
        match self.read_block(hash).await? {
            Some(block) => Ok(block.parent),
            None => Err(BlocktreeError::invalid_block(
                L,
                InvalidBlockReason::IsNull,
                Some(*hash),
            )),
        }
    }

    /// Walks `parent` links starting at `hash`, collecting each visited
    /// block in order.
    ///
    /// Parent edges are defined on chain roots; when invoked elsewhere
    /// the stored `parent` values are followed as-is. The walk stops at
    /// the first unresolvable link.
    pub async fn perform_parent_scan(&self, hash: &BlockHash) -> Result<Vec<TreeBlock>> {
        let mut out = Vec::new();
        let mut cursor = *hash;
        loop {
            let block = match self.read_block(&cursor).await? {
                Some(b) => b,
                None => break,
            };
            let parent = block.parent;
            out.push(block);
            match parent {
                Some(p) => cursor = p,
                None => break,
            }
        }
        Ok(out)
    }

    /// Returns all chain roots whose `parent` is `hash`, ordered by
    /// timestamp (write order under a monotonic clock).
    ///
    /// Consults the `child_blocks` cache slot first; on a miss the store
    /// is scanned in full and the resulting list is written back.
    pub async fn perform_child_scan(&self, hash: &BlockHash) -> Result<Vec<TreeBlock>> {
        if let Some(value) = self
            .chain
            .cache()
            .read_cache(hash, CacheSlot::ChildBlocks)
            .await
        {
            if let Some(list) = value.as_list() {
                debug!(block = %hash, children = list.len(), "child scan served from cache");
                let mut out = Vec::with_capacity(list.len());
                for child in list {
                    if let Some(block) = self.read_block(child).await? {
                        out.push(block);
                    }
                }
                return Ok(out);
            }
        }

        let target = *hash;
        let raw_children = self
            .chain
            .storage()
            .map_in_storage(&move |bytes| {
                let block = Block::decode(bytes).ok()?;
                if block.prev.is_some() {
                    return None;
                }
                let (parent, _, _) = decode_tree_data(&block.data).ok()?;
                (parent == Some(target)).then(|| bytes.to_vec())
            })
            .await?;

        let mut children = Vec::with_capacity(raw_children.len());
        for bytes in raw_children {
            children.push(self.read_block_bytes(&bytes)?);
        }
        children.sort_by_key(|child| child.block.timestamp);

        let hashes: Vec<BlockHash> = children.iter().map(TreeBlock::hash).collect();
        debug!(block = %hash, children = hashes.len(), "child scan rebuilt cache");
        self.chain
            .cache()
            .write_cache(hash, CacheSlot::ChildBlocks, CacheValue::HashList(hashes))
            .await;
        Ok(children)
    }

    /// Validates the chain containing `start`, then every ancestor chain
    /// reachable through `parent` edges, accumulating the block count.
    ///
    /// Total like the L1 walk: L1 failure reasons propagate in the
    /// report, and a dangling parent edge is reported as
    /// `missing_parent_block`.
    pub async fn validate_blocktree(&self, start: &BlockHash) -> Result<ValidationReport> {
        let mut total = 0u64;
        let mut cursor = *start;

        loop {
            let report = self.chain.validate_blockchain(&cursor).await?;
            total += report.block_count;
            if !report.is_valid {
                return Ok(ValidationReport {
                    is_valid: false,
                    block_count: total,
                    reason: report.reason,
                    block: report.block,
                });
            }

            let root = match self.chain.get_root_block(&cursor).await? {
                Some(root) => root,
                // Unreachable after a valid walk, but stay total.
                None => return Ok(ValidationReport::valid(total)),
            };
            let root_block = match self.read_block(&root).await? {
                Some(b) => b,
                None => return Ok(ValidationReport::valid(total)),
            };

            match root_block.parent {
                None => return Ok(ValidationReport::valid(total)),
                Some(parent) => {
                    if self.chain.read_block(&parent).await?.is_none() {
                        return Ok(ValidationReport::invalid(
                            total,
                            ValidationFailure::MissingParentBlock,
                            parent,
                        ));
                    }
                    cursor = parent;
                }
            }
        }
    }
}

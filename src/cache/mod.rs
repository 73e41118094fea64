//! Hint cache keyed by `(block, slot)`.
//!
//! Every cache entry is a pure function of the immutable byte store, so a
//! miss is never an error and a stale entry is always correctable by
//! recomputation. Layers only populate the cache after the authoritative
//! answer has been computed.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::providers::SlotCache;
use crate::types::BlockHash;

/// Cache slots a block can carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CacheSlot {
    /// The unique successor of a block (`b.prev == block`).
    Next,
    /// The root of the block's chain.
    RootBlock,
    /// The tip of the chain rooted at this block.
    HeadBlock,
    /// Chain roots whose `parent` is this block.
    ChildBlocks,
}

/// Values a cache slot can hold.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheValue {
    /// A single block reference.
    Hash(BlockHash),
    /// An ordered list of block references.
    HashList(Vec<BlockHash>),
}

impl CacheValue {
    /// The single hash, when this value holds one.
    pub fn as_hash(&self) -> Option<BlockHash> {
        match self {
            CacheValue::Hash(h) => Some(*h),
            CacheValue::HashList(_) => None,
        }
    }

    /// The hash list, when this value holds one.
    pub fn as_list(&self) -> Option<&[BlockHash]> {
        match self {
            CacheValue::HashList(list) => Some(list),
            CacheValue::Hash(_) => None,
        }
    }
}

/// Process-local [`SlotCache`] backed by a `HashMap`.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<(BlockHash, CacheSlot), CacheValue>>,
}

impl InMemoryCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of populated slots, for tests and introspection.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no slot is populated.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SlotCache for InMemoryCache {
    async fn read_cache(&self, block: &BlockHash, slot: CacheSlot) -> Option<CacheValue> {
        self.entries.read().get(&(*block, slot)).cloned()
    }

    async fn write_cache(&self, block: &BlockHash, slot: CacheSlot, value: CacheValue) {
        self.entries.write().insert((*block, slot), value);
    }

    async fn push_cache(&self, block: &BlockHash, slot: CacheSlot, value: BlockHash) {
        let mut entries = self.entries.write();
        match entries.get_mut(&(*block, slot)) {
            Some(CacheValue::HashList(list)) => list.push(value),
            Some(CacheValue::Hash(_)) => {
                debug!(block = %block, ?slot, "push into scalar cache slot ignored");
            }
            // An absent list stays absent: appending to a list that was
            // never built would hand later readers an incomplete answer.
            None => {}
        }
    }
}

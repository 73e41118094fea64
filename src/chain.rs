//! L1: the content-addressed append-only chain store.
//!
//! The blockchain layer wires together:
//!
//! - a [`BlockStorage`] for the authoritative byte store,
//! - a [`SlotCache`] for recomputable hints,
//! - a [`TimeSource`] for block timestamps, and
//! - a [`CryptoProvider`] for nonces.
//!
//! It owns the L1 invariants: content addressing, prev-link integrity,
//! head uniqueness per chain tip, and monotonic timestamps within a
//! chain. Within one write the sequence is read prev, validate, write
//! bytes, update caches; a failure before the byte write leaves the
//! store unchanged.

use serde::Serialize;
use tracing::debug;

use crate::cache::{CacheSlot, CacheValue};
use crate::error::{BlocktreeError, InvalidBlockReason, Result};
use crate::providers::{BlockStorage, CryptoProvider, SlotCache, TimeSource};
use crate::types::block::{Block, NewBlock};
use crate::types::{BlockHash, Layer};

const L: Layer = Layer::Blockchain;

/// Per-write options.
#[derive(Clone, Copy, Debug)]
pub struct WriteOptions {
    /// Whether to run prev/timestamp/head-uniqueness validation.
    pub validate: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

/// Why a validation walk stopped.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    /// A `prev` link referenced a block that is not stored.
    MissingBlock,
    /// A block's timestamp is older than its predecessor's.
    InvalidTimestamp,
    /// A `parent` edge referenced a block that is not stored.
    MissingParentBlock,
}

/// Outcome of a validation walk. Validation is total: chain defects are
/// reported here, never raised.
#[derive(Clone, Debug, Serialize)]
pub struct ValidationReport {
    /// Whether every link checked out.
    pub is_valid: bool,
    /// Number of blocks visited.
    pub block_count: u64,
    /// Why the walk stopped, when invalid.
    pub reason: Option<ValidationFailure>,
    /// The block the failure is attributed to, when one can be named.
    pub block: Option<BlockHash>,
}

impl ValidationReport {
    /// A clean report over `block_count` blocks.
    pub fn valid(block_count: u64) -> Self {
        Self {
            is_valid: true,
            block_count,
            reason: None,
            block: None,
        }
    }

    /// A failure report attributed to `block`.
    pub fn invalid(block_count: u64, reason: ValidationFailure, block: BlockHash) -> Self {
        Self {
            is_valid: false,
            block_count,
            reason: Some(reason),
            block: Some(block),
        }
    }
}

/// The L1 chain store, generic over its collaborators.
pub struct Blockchain<S, C, T, R> {
    storage: S,
    cache: C,
    clock: T,
    crypto: R,
}

impl<S, C, T, R> Blockchain<S, C, T, R>
where
    S: BlockStorage,
    C: SlotCache,
    T: TimeSource,
    R: CryptoProvider,
{
    /// Creates a new chain store over the given collaborators.
    pub fn new(storage: S, cache: C, clock: T, crypto: R) -> Self {
        Self {
            storage,
            cache,
            clock,
            crypto,
        }
    }

    /// Returns a reference to the byte store.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns a reference to the hint cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Returns a reference to the time source.
    pub fn clock(&self) -> &T {
        &self.clock
    }

    /// Returns a reference to the crypto provider.
    pub fn crypto(&self) -> &R {
        &self.crypto
    }

    /// Appends a block and returns its content hash.
    ///
    /// The nonce and timestamp are generated here; callers supply only
    /// the `prev` link and the payload. With validation on (the
    /// default), the write fails if `prev` does not resolve
    /// (`is_null`), if the fresh timestamp is older than the
    /// predecessor's (`invalid_timestamp`), or if the predecessor
    /// already has a successor (`next_block_exists`).
    pub async fn write_block(&self, new_block: &NewBlock, opts: &WriteOptions) -> Result<BlockHash> {
        let timestamp = self.clock.now().await;

        if opts.validate {
            if let Some(prev) = &new_block.prev {
                let prev_block = self.read_block(prev).await?.ok_or_else(|| {
                    BlocktreeError::invalid_block(L, InvalidBlockReason::IsNull, Some(*prev))
                })?;
                if timestamp < prev_block.timestamp {
                    return Err(BlocktreeError::invalid_block(
                        L,
                        InvalidBlockReason::InvalidTimestamp,
                        Some(*prev),
                    ));
                }
                if self.get_next_block(prev).await?.is_some() {
                    return Err(BlocktreeError::invalid_block(
                        L,
                        InvalidBlockReason::NextBlockExists,
                        Some(*prev),
                    ));
                }
            }
        }

        let nonce_bytes = self.crypto.random_bytes(8).await;
        let nonce = u64::from_be_bytes(nonce_bytes.try_into().map_err(|_| {
            BlocktreeError::Storage("crypto provider returned a short nonce".into())
        })?);

        let bytes = Block::encode_parts(new_block.prev.as_ref(), nonce, timestamp, &new_block.data)?;
        let hash = self.storage.write_bytes(&bytes).await?;
        debug!(block = %hash, prev = ?new_block.prev, "wrote block");
        Ok(hash)
    }

    /// Reads and decodes a block. Null hashes resolve to `None`.
    pub async fn read_block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        if hash.is_null() {
            return Ok(None);
        }
        match self.storage.read_bytes(hash).await? {
            Some(bytes) => Ok(Some(Block::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Reads a block's raw serialized bytes.
    pub async fn read_raw_block(&self, hash: &BlockHash) -> Result<Option<Vec<u8>>> {
        if hash.is_null() {
            return Ok(None);
        }
        self.storage.read_bytes(hash).await
    }

    /// Decodes a block from raw bytes, deriving its hash.
    pub fn read_block_bytes(&self, bytes: &[u8]) -> Result<Block> {
        Block::decode(bytes)
    }

    /// Lists stored hashes, optionally restricted by a byte prefix.
    /// Order is unspecified.
    pub async fn list_blocks(&self, prefix: Option<&[u8]>) -> Result<Vec<BlockHash>> {
        self.storage.list_keys(prefix).await
    }

    /// Number of blocks in the store.
    pub async fn count_blocks(&self) -> Result<u64> {
        self.storage.count().await
    }

    /// Finds the unique successor of `hash`, if one exists.
    ///
    /// Consults the `next` cache slot first; a miss falls back to a full
    /// scan, and the slot is populated only once the scan has found the
    /// authoritative answer. Successors never change in an append-only
    /// store, so a populated slot is always right.
    pub async fn get_next_block(&self, hash: &BlockHash) -> Result<Option<BlockHash>> {
        if let Some(value) = self.cache.read_cache(hash, CacheSlot::Next).await {
            if let Some(next) = value.as_hash() {
                return Ok(Some(next));
            }
        }

        let target = *hash;
        let found = self
            .storage
            .find_in_storage(&move |bytes| {
                Block::decode(bytes)
                    .map(|b| b.prev == Some(target))
                    .unwrap_or(false)
            })
            .await?;

        match found {
            Some(bytes) => {
                let next = BlockHash::compute(&bytes);
                self.cache
                    .write_cache(hash, CacheSlot::Next, CacheValue::Hash(next))
                    .await;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    /// Walks `prev` links back to the chain root.
    ///
    /// Returns `None` when `hash` or any link along the way does not
    /// resolve.
    pub async fn get_root_block(&self, hash: &BlockHash) -> Result<Option<BlockHash>> {
        if let Some(value) = self.cache.read_cache(hash, CacheSlot::RootBlock).await {
            if let Some(root) = value.as_hash() {
                return Ok(Some(root));
            }
        }

        let mut cursor = *hash;
        loop {
            let block = match self.read_block(&cursor).await? {
                Some(b) => b,
                None => return Ok(None),
            };
            match block.prev {
                Some(prev) => cursor = prev,
                None => break,
            }
        }

        if cursor != *hash {
            self.cache
                .write_cache(hash, CacheSlot::RootBlock, CacheValue::Hash(cursor))
                .await;
        }
        Ok(Some(cursor))
    }

    /// Finds the tip of the chain containing `hash`.
    ///
    /// Walks to the chain root, then follows `next` links forward. The
    /// root's `head_block` slot is only a starting hint: the walk always
    /// continues from it, so a stale entry cannot produce a stale
    /// answer, and the slot is rewritten only when the walk observed at
    /// least one link. A single-block chain therefore reports no head;
    /// callers treat the root itself as the tip.
    pub async fn get_head_block(&self, hash: &BlockHash) -> Result<Option<BlockHash>> {
        let root = match self.get_root_block(hash).await? {
            Some(root) => root,
            None => return Ok(None),
        };

        let mut cursor = root;
        if let Some(value) = self.cache.read_cache(&root, CacheSlot::HeadBlock).await {
            if let Some(hint) = value.as_hash() {
                if self.read_block(&hint).await?.is_some() {
                    cursor = hint;
                }
            }
        }

        let mut moved = false;
        while let Some(next) = self.get_next_block(&cursor).await? {
            cursor = next;
            moved = true;
        }

        if cursor == root {
            return Ok(None);
        }
        if moved {
            self.cache
                .write_cache(&root, CacheSlot::HeadBlock, CacheValue::Hash(cursor))
                .await;
        }
        Ok(Some(cursor))
    }

    /// Validates the chain ending at `tip` by walking `prev` links.
    ///
    /// Total: broken links and timestamp regressions are returned in the
    /// report, never raised. Only collaborator I/O can fail.
    pub async fn validate_blockchain(&self, tip: &BlockHash) -> Result<ValidationReport> {
        let mut count = 0u64;
        let mut cursor = Some(*tip);
        let mut newer: Option<Block> = None;

        while let Some(hash) = cursor {
            let block = match self.read_block(&hash).await? {
                Some(b) => b,
                None => {
                    return Ok(ValidationReport::invalid(
                        count,
                        ValidationFailure::MissingBlock,
                        hash,
                    ))
                }
            };
            if let Some(newer) = &newer {
                if newer.timestamp < block.timestamp {
                    return Ok(ValidationReport::invalid(
                        count,
                        ValidationFailure::InvalidTimestamp,
                        newer.hash,
                    ));
                }
            }
            count += 1;
            cursor = block.prev;
            newer = Some(block);
        }

        Ok(ValidationReport::valid(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::providers::{ManualClock, SoftwareCrypto};
    use crate::storage::InMemoryStorage;

    type TestChain = Blockchain<InMemoryStorage, InMemoryCache, ManualClock, SoftwareCrypto>;

    fn test_chain() -> TestChain {
        Blockchain::new(
            InMemoryStorage::new(),
            InMemoryCache::new(),
            ManualClock::new(),
            SoftwareCrypto::new(),
        )
    }

    fn root_input(data: &[u8]) -> NewBlock {
        NewBlock {
            prev: None,
            data: data.to_vec(),
        }
    }

    async fn build_chain(chain: &TestChain, len: usize) -> Vec<BlockHash> {
        let mut hashes = Vec::with_capacity(len);
        let mut prev = None;
        for i in 0..len {
            let hash = chain
                .write_block(
                    &NewBlock {
                        prev,
                        data: format!("block {i}").into_bytes(),
                    },
                    &WriteOptions::default(),
                )
                .await
                .expect("write");
            prev = Some(hash);
            hashes.push(hash);
        }
        hashes
    }

    #[tokio::test]
    async fn write_then_read_string_payload() {
        let chain = test_chain();
        let hash = chain
            .write_block(&root_input(b"I'm a string!"), &WriteOptions::default())
            .await
            .expect("write");

        let block = chain
            .read_block(&hash)
            .await
            .expect("read")
            .expect("block should exist");
        assert_eq!(block.data, b"I'm a string!");
        assert!(block.prev.is_none());
        assert!(block.timestamp > 0);
        assert_ne!(block.nonce, 0);
        assert_eq!(block.hash, hash);
    }

    #[tokio::test]
    async fn hundred_block_chain_head_and_validation() {
        let chain = test_chain();
        let hashes = build_chain(&chain, 100).await;

        assert_eq!(chain.count_blocks().await.expect("count"), 100);

        let head = chain
            .get_head_block(&hashes[0])
            .await
            .expect("head walk")
            .expect("head should exist");
        assert_eq!(head, hashes[99]);

        let report = chain
            .validate_blockchain(&hashes[99])
            .await
            .expect("validate");
        assert!(report.is_valid);
        assert_eq!(report.block_count, 100);
    }

    #[tokio::test]
    async fn forced_zero_timestamp_is_rejected() {
        let chain = test_chain();
        let b1 = chain
            .write_block(&root_input(b"first"), &WriteOptions::default())
            .await
            .expect("write");

        chain.clock().set_next_timestamp(0);
        let err = chain
            .write_block(
                &NewBlock {
                    prev: Some(b1),
                    data: b"second".to_vec(),
                },
                &WriteOptions::default(),
            )
            .await
            .unwrap_err();

        match err {
            BlocktreeError::InvalidBlock { reason, .. } => {
                assert_eq!(reason, InvalidBlockReason::InvalidTimestamp);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(chain.count_blocks().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn second_successor_fails_with_next_block_exists() {
        let chain = test_chain();
        let hashes = build_chain(&chain, 2).await;

        let err = chain
            .write_block(
                &NewBlock {
                    prev: Some(hashes[0]),
                    data: b"competing".to_vec(),
                },
                &WriteOptions::default(),
            )
            .await
            .unwrap_err();

        match err {
            BlocktreeError::InvalidBlock { reason, .. } => {
                assert_eq!(reason, InvalidBlockReason::NextBlockExists);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_prev_is_rejected_when_validating() {
        let chain = test_chain();
        let ghost = BlockHash::compute(b"never written");

        let err = chain
            .write_block(
                &NewBlock {
                    prev: Some(ghost),
                    data: b"orphan".to_vec(),
                },
                &WriteOptions::default(),
            )
            .await
            .unwrap_err();
        match err {
            BlocktreeError::InvalidBlock { reason, block } => {
                assert_eq!(reason, InvalidBlockReason::IsNull);
                assert_eq!(block, Some(ghost));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // With validation off the orphan write goes through.
        let hash = chain
            .write_block(
                &NewBlock {
                    prev: Some(ghost),
                    data: b"orphan".to_vec(),
                },
                &WriteOptions { validate: false },
            )
            .await
            .expect("unvalidated write");
        assert!(chain.read_block(&hash).await.expect("read").is_some());
    }

    #[tokio::test]
    async fn root_of_head_is_root_again() {
        let chain = test_chain();
        let hashes = build_chain(&chain, 5).await;

        let head = chain
            .get_head_block(&hashes[0])
            .await
            .expect("walk")
            .expect("head");
        let root = chain
            .get_root_block(&head)
            .await
            .expect("walk")
            .expect("root");
        assert_eq!(root, hashes[0]);
    }

    #[tokio::test]
    async fn head_of_single_block_chain_is_none() {
        let chain = test_chain();
        let only = chain
            .write_block(&root_input(b"solo"), &WriteOptions::default())
            .await
            .expect("write");
        assert!(chain.get_head_block(&only).await.expect("walk").is_none());
    }

    #[tokio::test]
    async fn head_walk_continues_past_cached_hint() {
        let chain = test_chain();
        let hashes = build_chain(&chain, 3).await;

        // Populate the head cache.
        let head = chain
            .get_head_block(&hashes[0])
            .await
            .expect("walk")
            .expect("head");
        assert_eq!(head, hashes[2]);

        // Extend the chain; the stale cached head must not be returned.
        let b4 = chain
            .write_block(
                &NewBlock {
                    prev: Some(hashes[2]),
                    data: b"fourth".to_vec(),
                },
                &WriteOptions::default(),
            )
            .await
            .expect("write");

        let head = chain
            .get_head_block(&hashes[0])
            .await
            .expect("walk")
            .expect("head");
        assert_eq!(head, b4);
    }

    #[tokio::test]
    async fn next_block_scan_populates_cache() {
        let chain = test_chain();
        let hashes = build_chain(&chain, 2).await;

        assert!(chain
            .cache()
            .read_cache(&hashes[0], CacheSlot::Next)
            .await
            .is_none());

        let next = chain
            .get_next_block(&hashes[0])
            .await
            .expect("scan")
            .expect("successor");
        assert_eq!(next, hashes[1]);

        let cached = chain
            .cache()
            .read_cache(&hashes[0], CacheSlot::Next)
            .await
            .and_then(|v| v.as_hash());
        assert_eq!(cached, Some(hashes[1]));

        // Tip has no successor.
        assert!(chain
            .get_next_block(&hashes[1])
            .await
            .expect("scan")
            .is_none());
    }

    #[tokio::test]
    async fn list_blocks_filters_by_prefix() {
        let chain = test_chain();
        let hashes = build_chain(&chain, 6).await;

        let all = chain.list_blocks(None).await.expect("list");
        assert_eq!(all.len(), 6);

        let target = hashes[2];
        let matched = chain
            .list_blocks(Some(&target.as_bytes()[..5]))
            .await
            .expect("list");
        assert!(matched.contains(&target));
        for hash in matched {
            assert!(hash.as_bytes().starts_with(&target.as_bytes()[..5]));
        }
    }

    #[tokio::test]
    async fn read_block_of_null_hash_is_none() {
        let chain = test_chain();
        let null = BlockHash(crate::types::Hash256([0u8; 32]));
        assert!(chain.read_block(&null).await.expect("read").is_none());
        assert!(chain.read_raw_block(&null).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn validation_reports_missing_link() {
        let chain = test_chain();
        let ghost = BlockHash::compute(b"gone");
        // Write a block pointing at a never-stored prev, skipping checks.
        let tip = chain
            .write_block(
                &NewBlock {
                    prev: Some(ghost),
                    data: b"dangling".to_vec(),
                },
                &WriteOptions { validate: false },
            )
            .await
            .expect("write");

        let report = chain.validate_blockchain(&tip).await.expect("validate");
        assert!(!report.is_valid);
        assert_eq!(report.reason, Some(ValidationFailure::MissingBlock));
        assert_eq!(report.block, Some(ghost));
        assert_eq!(report.block_count, 1);
    }

    #[tokio::test]
    async fn validation_reports_timestamp_regression() {
        let chain = test_chain();
        let b1 = chain
            .write_block(&root_input(b"first"), &WriteOptions::default())
            .await
            .expect("write");

        // Force a regression past validation by disabling checks.
        chain.clock().set_next_timestamp(0);
        let b2 = chain
            .write_block(
                &NewBlock {
                    prev: Some(b1),
                    data: b"rewound".to_vec(),
                },
                &WriteOptions { validate: false },
            )
            .await
            .expect("write");

        let report = chain.validate_blockchain(&b2).await.expect("validate");
        assert!(!report.is_valid);
        assert_eq!(report.reason, Some(ValidationFailure::InvalidTimestamp));
        assert_eq!(report.block, Some(b2));
    }

    #[tokio::test]
    async fn raw_bytes_decode_back_to_the_same_block() {
        let chain = test_chain();
        let hash = chain
            .write_block(&root_input(b"raw me"), &WriteOptions::default())
            .await
            .expect("write");

        let raw = chain
            .read_raw_block(&hash)
            .await
            .expect("read")
            .expect("bytes");
        let block = chain.read_block_bytes(&raw).expect("decode");
        assert_eq!(block.hash, hash);
        assert_eq!(block.data, b"raw me");
    }
}

//! Authorized-key resolution.
//!
//! Authority over a chain is held by its ancestors: the walk for a block
//! being written starts at the block's `parent` chain root and climbs
//! parent edges toward the root trust anchor, at each level consulting
//! the most recent key-set-bearing block on that chain (a `keys` block,
//! or the `root` block itself, whose body is the root key set). The walk
//! ends at the first key set granting the signer the requested action
//! inside its validity window; reaching the top without a grant means
//! the signer is unauthorized.

use tracing::debug;

use crate::error::{BlocktreeError, InvalidSignatureReason, Result};
use crate::providers::{BlockStorage, CryptoProvider, SlotCache, TimeSource};
use crate::types::secure::{KeyAction, KeyDecision, KeySet};
use crate::types::{BlockHash, Layer, PublicKey};

use super::SecureBlocktree;

const L: Layer = Layer::SecureBlocktree;

impl<S, C, T, R> SecureBlocktree<S, C, T, R>
where
    S: BlockStorage,
    C: SlotCache,
    T: TimeSource,
    R: CryptoProvider,
{
    /// Finds the effective key set of the chain rooted at `chain_root`:
    /// the most recent `keys`-kind block, or the `root` block itself
    /// when the chain carries no later rotation.
    pub(super) async fn latest_key_set(
        &self,
        chain_root: &BlockHash,
    ) -> Result<Option<(BlockHash, KeySet)>> {
        let head = self
            .tree
            .chain()
            .get_head_block(chain_root)
            .await?
            .unwrap_or(*chain_root);

        let mut cursor = Some(head);
        while let Some(hash) = cursor {
            let block = match self.read_secure_block(&hash).await? {
                Some(b) => b,
                None => return Ok(None),
            };
            if let Some(keys) = block.body.as_keys() {
                return Ok(Some((hash, keys.clone())));
            }
            cursor = block.tree.prev();
        }
        Ok(None)
    }

    /// Walks key-set levels from `level_root` up to the forest root,
    /// returning the block whose key set grants `(public_key, action)`
    /// at time `at`, if any.
    pub(super) async fn resolve_authority(
        &self,
        level_root: &BlockHash,
        public_key: &PublicKey,
        action: KeyAction,
        at: u64,
    ) -> Result<Option<BlockHash>> {
        let mut level = *level_root;
        loop {
            if let Some((keys_block, set)) = self.latest_key_set(&level).await? {
                let decision = set.decision(action, public_key, at);
                debug!(level = %level, ?decision, "authority check");
                if decision == KeyDecision::Granted {
                    return Ok(Some(keys_block));
                }
            }

            let block = match self.tree.read_block(&level).await? {
                Some(b) => b,
                None => return Ok(None),
            };
            match block.parent {
                Some(parent) => level = parent,
                None => return Ok(None),
            }
        }
    }

    /// Like [`Self::resolve_authority`], but failure is an
    /// `unauthorized` signature error.
    pub(super) async fn authorize(
        &self,
        level_root: &BlockHash,
        public_key: &PublicKey,
        action: KeyAction,
        at: u64,
    ) -> Result<BlockHash> {
        self.resolve_authority(level_root, public_key, action, at)
            .await?
            .ok_or_else(|| {
                BlocktreeError::invalid_signature(L, InvalidSignatureReason::Unauthorized)
            })
    }

    /// Returns the ordered list of key-set blocks that govern `hash`,
    /// from its authorizing level up to the root trust anchor.
    pub async fn perform_signature_trace(&self, hash: &BlockHash) -> Result<Vec<BlockHash>> {
        let block = self.require_secure_block(hash).await?;

        let mut level = match block.tree.parent {
            Some(parent) => parent,
            // Root-chain blocks are governed by the root itself.
            None => match self.tree.chain().get_root_block(hash).await? {
                Some(root) => root,
                None => return Ok(Vec::new()),
            },
        };

        let mut trace = Vec::new();
        loop {
            if let Some((keys_block, _)) = self.latest_key_set(&level).await? {
                trace.push(keys_block);
            }
            let level_block = match self.tree.read_block(&level).await? {
                Some(b) => b,
                None => break,
            };
            match level_block.parent {
                Some(parent) => level = parent,
                None => break,
            }
        }
        Ok(trace)
    }
}

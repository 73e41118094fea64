//! Core domain types shared across the blocktree layers.
//!
//! This module defines strongly-typed hashes, key material wrappers, and
//! the layer tag. The goal is to avoid "naked" byte buffers in public
//! APIs and instead use domain-specific newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BlocktreeError, Result, SerializationReason};

/// L1 block records and their wire codec.
pub mod block;
/// L2 tree header and tree-block records.
pub mod tree;
/// L3 typed payloads: block kinds, key sets, options, signatures.
pub mod secure;

/// Length in bytes of all content hashes used by the stack.
pub const HASH_LEN: usize = 32;

/// Strongly-typed 256-bit hash wrapper (BLAKE3-256).
///
/// This is the backing representation for every fixed-size hash in the
/// stack. It is always exactly [`HASH_LEN`] bytes long.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// Computes a new [`Hash256`] as the BLAKE3-256 hash of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let h = blake3::hash(data);
        Hash256(*h.as_bytes())
    }

    /// Returns the underlying 32-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

/// Content hash identifying a block.
///
/// A `BlockHash` is the BLAKE3-256 digest of the block's full serialized
/// bytes. The all-zero value is the wire-level null sentinel and is never
/// a valid identity (it would require a preimage hashing to zero).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub Hash256);

impl BlockHash {
    /// Computes the content hash of serialized block bytes.
    pub fn compute(bytes: &[u8]) -> Self {
        BlockHash(Hash256::compute(bytes))
    }

    /// Returns the underlying 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }

    /// Whether this is the all-zero null sentinel.
    pub fn is_null(&self) -> bool {
        self.0 .0 == [0u8; HASH_LEN]
    }

    /// Parses a block hash from a byte slice.
    ///
    /// Fails with `SerializationError(invalid_block_hash)` when the slice
    /// is not exactly [`HASH_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_LEN {
            return Err(BlocktreeError::serialization(
                Layer::Blockchain,
                SerializationReason::InvalidBlockHash,
            ));
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(bytes);
        Ok(BlockHash(Hash256(arr)))
    }

    /// Parses a block hash from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| {
            BlocktreeError::serialization(
                Layer::Blockchain,
                SerializationReason::InvalidBlockHash,
            )
        })?;
        Self::from_slice(&bytes)
    }

    /// Hex rendering of the hash, as printed by the CLI.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Public key bytes, wrapped to avoid naked `Vec<u8>`.
///
/// The encoding is provider-specific (32 bytes for the bundled Ed25519
/// provider); this type does not interpret the material.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl PublicKey {
    /// Returns the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Detached signature bytes, as produced by the crypto provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Layer tag carried on the wire (L2 header) and on every error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// L1: the content-addressed append-only chain store.
    Blockchain,
    /// L2: the parent/child tree overlay.
    Blocktree,
    /// L3: typed, signature-authenticated blocks.
    SecureBlocktree,
}

impl Layer {
    /// Wire tag byte for this layer.
    pub fn tag(self) -> u8 {
        match self {
            Layer::Blockchain => 1,
            Layer::Blocktree => 2,
            Layer::SecureBlocktree => 3,
        }
    }

    /// Parses a wire tag byte.
    ///
    /// Fails with `SerializationError(invalid_layer)` for unknown tags.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Layer::Blockchain),
            2 => Ok(Layer::Blocktree),
            3 => Ok(Layer::SecureBlocktree),
            _ => Err(BlocktreeError::serialization(
                Layer::Blocktree,
                SerializationReason::InvalidLayer,
            )),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Blockchain => "blockchain",
            Layer::Blocktree => "blocktree",
            Layer::SecureBlocktree => "secure-blocktree",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256_compute_is_deterministic() {
        let a = Hash256::compute(b"blocktree");
        let b = Hash256::compute(b"blocktree");
        assert_eq!(a, b);
        assert_ne!(a, Hash256::compute(b"other"));
    }

    #[test]
    fn block_hash_null_sentinel() {
        let null = BlockHash(Hash256([0u8; HASH_LEN]));
        assert!(null.is_null());

        let real = BlockHash::compute(b"data");
        assert!(!real.is_null());
    }

    #[test]
    fn block_hash_hex_roundtrip() {
        let h = BlockHash::compute(b"roundtrip");
        let parsed = BlockHash::from_hex(&h.to_hex()).expect("hex should parse");
        assert_eq!(parsed, h);
    }

    #[test]
    fn block_hash_rejects_wrong_length() {
        let err = BlockHash::from_slice(&[1u8; 16]).unwrap_err();
        match err {
            crate::error::BlocktreeError::Serialization { reason, .. } => {
                assert_eq!(reason, SerializationReason::InvalidBlockHash);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn layer_tag_roundtrip() {
        for layer in [Layer::Blockchain, Layer::Blocktree, Layer::SecureBlocktree] {
            assert_eq!(Layer::from_tag(layer.tag()).unwrap(), layer);
        }
        assert!(Layer::from_tag(9).is_err());
    }
}

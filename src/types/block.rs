//! L1 block records and their wire codec.
//!
//! A block's identity is the BLAKE3-256 hash of its full serialized
//! bytes. The wire layout is, big-endian throughout:
//!
//! ```text
//! [1 byte: prev_len - 1]
//! [prev_len bytes: prev hash, or a single zero byte when null]
//! [8 bytes: nonce]
//! [8 bytes: timestamp]
//! [remaining: data]
//! ```
//!
//! A single zero byte in the `prev` slot denotes "no previous block"
//! (chain root).

use crate::codec;
use crate::error::{BlocktreeError, Result, SerializationReason};
use crate::types::{BlockHash, Layer, HASH_LEN};

const L: Layer = Layer::Blockchain;

/// Write input for [`crate::chain::Blockchain::write_block`].
///
/// Nonce, timestamp, and hash are generated by the layer and cannot be
/// supplied by the caller.
#[derive(Clone, Debug, Default)]
pub struct NewBlock {
    /// Previous block in the same chain; `None` starts a new chain.
    pub prev: Option<BlockHash>,
    /// Opaque layer-above payload.
    pub data: Vec<u8>,
}

/// A decoded L1 block.
///
/// `hash` is derived from the serialized bytes and is not itself part of
/// the wire format.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    /// Previous block in the same chain; `None` means chain root.
    pub prev: Option<BlockHash>,
    /// Random 64-bit uniqueness value. Not a proof-of-work counter.
    pub nonce: u64,
    /// Milliseconds since the Unix epoch; monotonic within a chain.
    pub timestamp: u64,
    /// Opaque layer-above payload.
    pub data: Vec<u8>,
    /// Content hash of the serialized bytes.
    pub hash: BlockHash,
}

impl Block {
    /// Serializes block fields into the canonical wire layout.
    pub fn encode_parts(
        prev: Option<&BlockHash>,
        nonce: u64,
        timestamp: u64,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(1 + HASH_LEN + 8 + 8 + data.len());
        match prev {
            Some(h) => {
                codec::put_uint(L, &mut buf, (HASH_LEN - 1) as u64, 1)?;
                buf.extend_from_slice(h.as_bytes());
            }
            None => {
                // Null prev: a length of one holding a single zero byte.
                codec::put_uint(L, &mut buf, 0, 1)?;
                buf.push(0);
            }
        }
        codec::put_uint(L, &mut buf, nonce, 8)?;
        codec::put_uint(L, &mut buf, timestamp, 8)?;
        buf.extend_from_slice(data);
        Ok(buf)
    }

    /// Re-serializes this block; the output hashes back to `self.hash`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Self::encode_parts(self.prev.as_ref(), self.nonce, self.timestamp, &self.data)
    }

    /// Decodes a block from its serialized bytes, deriving the content
    /// hash from the full buffer.
    pub fn decode(bytes: &[u8]) -> Result<Block> {
        let mut offset = 0;
        let prev_len = codec::get_uint(L, bytes, &mut offset, 1)? as usize + 1;

        let prev = match prev_len {
            1 => {
                let sentinel = codec::get_uint(L, bytes, &mut offset, 1)?;
                if sentinel != 0 {
                    return Err(BlocktreeError::serialization(
                        L,
                        SerializationReason::InvalidHash,
                    ));
                }
                None
            }
            len if len == HASH_LEN => {
                let end = offset + HASH_LEN;
                if end > bytes.len() {
                    return Err(BlocktreeError::serialization(
                        L,
                        SerializationReason::InvalidHash,
                    ));
                }
                let hash = BlockHash::from_slice(&bytes[offset..end])?;
                offset = end;
                Some(hash)
            }
            _ => {
                return Err(BlocktreeError::serialization(
                    L,
                    SerializationReason::InvalidHash,
                ))
            }
        };

        let nonce = codec::get_uint(L, bytes, &mut offset, 8)?;
        let timestamp = codec::get_uint(L, bytes, &mut offset, 8)?;
        let data = bytes[offset..].to_vec();

        Ok(Block {
            prev,
            nonce,
            timestamp,
            data,
            hash: BlockHash::compute(bytes),
        })
    }
}

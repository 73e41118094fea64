//! L2 tree header and tree-block records.
//!
//! The tree layer wraps L1 `data` with a fixed-width header:
//!
//! ```text
//! [32 bytes: parent hash, all zeros when null]
//! [1 byte:  layer tag]
//! [remaining: payload]
//! ```
//!
//! `parent` references the root of another chain, linking chain roots
//! into a tree. Non-root blocks may carry a parent value but it is not
//! consulted as a tree edge.

use crate::codec;
use crate::error::Result;
use crate::types::block::Block;
use crate::types::{BlockHash, Layer, HASH_LEN};

const L: Layer = Layer::Blocktree;

/// Write input for [`crate::tree::Blocktree::write_block`].
#[derive(Clone, Debug)]
pub struct NewTreeBlock {
    /// Previous block in the same chain; `None` starts a new chain.
    pub prev: Option<BlockHash>,
    /// Chain root this block's chain hangs under, if any.
    pub parent: Option<BlockHash>,
    /// Layer tag recorded in the header.
    pub layer: Layer,
    /// Layer-above payload.
    pub data: Vec<u8>,
}

impl NewTreeBlock {
    /// A plain tree-layer block with the given links and payload.
    pub fn new(prev: Option<BlockHash>, parent: Option<BlockHash>, data: Vec<u8>) -> Self {
        Self {
            prev,
            parent,
            layer: Layer::Blocktree,
            data,
        }
    }
}

/// A decoded L2 block: the underlying L1 record plus the parsed header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeBlock {
    /// The underlying L1 block; its `data` holds the full tree header.
    pub block: Block,
    /// Parent chain root, `None` when the header field is all zeros.
    pub parent: Option<BlockHash>,
    /// Layer tag from the header.
    pub layer: Layer,
    /// Bytes following the header.
    pub payload: Vec<u8>,
}

impl TreeBlock {
    /// Content hash of this block.
    pub fn hash(&self) -> BlockHash {
        self.block.hash
    }

    /// Previous block in the same chain.
    pub fn prev(&self) -> Option<BlockHash> {
        self.block.prev
    }

    /// Whether this block starts its chain.
    pub fn is_chain_root(&self) -> bool {
        self.block.prev.is_none()
    }

    /// Parses the tree header out of a decoded L1 block.
    pub fn from_block(block: Block) -> Result<TreeBlock> {
        let (parent, layer, payload) = decode_tree_data(&block.data)?;
        Ok(TreeBlock {
            block,
            parent,
            layer,
            payload,
        })
    }
}

/// Serializes the tree header followed by `payload` into L1 `data`.
pub fn encode_tree_data(parent: Option<&BlockHash>, layer: Layer, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HASH_LEN + 1 + payload.len());
    codec::put_opt_hash(&mut buf, parent);
    buf.push(layer.tag());
    buf.extend_from_slice(payload);
    buf
}

/// Splits L1 `data` into the parent link, layer tag, and payload.
pub fn decode_tree_data(data: &[u8]) -> Result<(Option<BlockHash>, Layer, Vec<u8>)> {
    let mut offset = 0;
    let parent = codec::get_opt_hash(L, data, &mut offset)?;
    let tag = codec::get_uint(L, data, &mut offset, 1)? as u8;
    let layer = Layer::from_tag(tag)?;
    Ok((parent, layer, data[offset..].to_vec()))
}

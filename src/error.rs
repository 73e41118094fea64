//! Error taxonomy for the blocktree stack.
//!
//! The taxonomy is deliberately flat: five error kinds, each carrying the
//! layer it was raised in and a machine-readable reason code. Validation
//! walks ([`crate::chain::Blockchain::validate_blockchain`],
//! [`crate::tree::Blocktree::validate_blocktree`]) never raise for chain
//! defects; they return reports instead. Write paths always raise.

use std::fmt;

use thiserror::Error;

use crate::types::{BlockHash, Layer};

/// Reason codes for [`BlocktreeError::Serialization`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SerializationReason {
    /// A block hash had the wrong length or was not valid hex.
    InvalidBlockHash,
    /// An embedded hash field could not be decoded.
    InvalidHash,
    /// A fixed-width integer was out of range, or the input was truncated.
    ArgumentOutOfBounds,
    /// The layer tag byte did not name a known layer.
    InvalidLayer,
}

impl SerializationReason {
    /// Stable, machine-readable reason code.
    pub fn code(self) -> &'static str {
        match self {
            SerializationReason::InvalidBlockHash => "invalid_block_hash",
            SerializationReason::InvalidHash => "invalid_hash",
            SerializationReason::ArgumentOutOfBounds => "argument_out_of_bounds",
            SerializationReason::InvalidLayer => "invalid_layer",
        }
    }
}

impl fmt::Display for SerializationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reason codes for [`BlocktreeError::InvalidBlock`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvalidBlockReason {
    /// The referenced block is null or does not resolve.
    IsNull,
    /// A block's timestamp is older than its predecessor's.
    InvalidTimestamp,
    /// The chain tip already has a successor.
    NextBlockExists,
    /// The parent reference does not resolve.
    InvalidParentBlock,
    /// The block kind is not a legal child of the parent's kind.
    InvalidParentType,
}

impl InvalidBlockReason {
    /// Stable, machine-readable reason code.
    pub fn code(self) -> &'static str {
        match self {
            InvalidBlockReason::IsNull => "is_null",
            InvalidBlockReason::InvalidTimestamp => "invalid_timestamp",
            InvalidBlockReason::NextBlockExists => "next_block_exists",
            InvalidBlockReason::InvalidParentBlock => "invalid_parent_block",
            InvalidBlockReason::InvalidParentType => "invalid_parent_type",
        }
    }
}

impl fmt::Display for InvalidBlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reason codes for [`BlocktreeError::InvalidSignature`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvalidSignatureReason {
    /// The signature does not verify against the declared public key.
    DoesNotMatch,
    /// No authorized key set covers the signer.
    Unauthorized,
    /// The block carries no signature record.
    NotFound,
}

impl InvalidSignatureReason {
    /// Stable, machine-readable reason code.
    pub fn code(self) -> &'static str {
        match self {
            InvalidSignatureReason::DoesNotMatch => "does_not_match",
            InvalidSignatureReason::Unauthorized => "unauthorized",
            InvalidSignatureReason::NotFound => "not_found",
        }
    }
}

impl fmt::Display for InvalidSignatureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reason codes for [`BlocktreeError::InvalidKey`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvalidKeyReason {
    /// No key entry matches.
    NotFound,
    /// A matching key entry exists but its validity window has passed.
    Expired,
    /// A matching key entry exists but was explicitly revoked.
    Revoked,
}

impl InvalidKeyReason {
    /// Stable, machine-readable reason code.
    pub fn code(self) -> &'static str {
        match self {
            InvalidKeyReason::NotFound => "not_found",
            InvalidKeyReason::Expired => "expired",
            InvalidKeyReason::Revoked => "revoked",
        }
    }
}

impl fmt::Display for InvalidKeyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors raised by the blocktree stack.
#[derive(Debug, Error)]
pub enum BlocktreeError {
    /// Byte-level encoding or decoding failure.
    #[error("serialization error at {layer}: {reason}")]
    Serialization {
        layer: Layer,
        reason: SerializationReason,
    },

    /// A block reference or write violated a structural invariant.
    #[error("invalid block at {layer}: {reason}")]
    InvalidBlock {
        layer: Layer,
        reason: InvalidBlockReason,
        /// The offending block, when one can be named.
        block: Option<BlockHash>,
    },

    /// A signature failed cryptographic or authorization checks.
    #[error("invalid signature at {layer}: {reason}")]
    InvalidSignature {
        layer: Layer,
        reason: InvalidSignatureReason,
    },

    /// A key lookup failed.
    #[error("invalid key at {layer}: {reason}")]
    InvalidKey {
        layer: Layer,
        reason: InvalidKeyReason,
    },

    /// Root installation was attempted on a non-empty store.
    #[error("root installation requires an empty store")]
    InvalidRoot,

    /// Collaborator I/O failure (byte store, broker, crypto provider).
    #[error("storage error: {0}")]
    Storage(String),
}

impl BlocktreeError {
    /// Shorthand constructor for serialization errors.
    pub fn serialization(layer: Layer, reason: SerializationReason) -> Self {
        BlocktreeError::Serialization { layer, reason }
    }

    /// Shorthand constructor for invalid-block errors.
    pub fn invalid_block(
        layer: Layer,
        reason: InvalidBlockReason,
        block: Option<BlockHash>,
    ) -> Self {
        BlocktreeError::InvalidBlock {
            layer,
            reason,
            block,
        }
    }

    /// Shorthand constructor for signature errors.
    pub fn invalid_signature(layer: Layer, reason: InvalidSignatureReason) -> Self {
        BlocktreeError::InvalidSignature { layer, reason }
    }

    /// Shorthand constructor for key errors.
    pub fn invalid_key(layer: Layer, reason: InvalidKeyReason) -> Self {
        BlocktreeError::InvalidKey { layer, reason }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BlocktreeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn serialization_error_display_carries_layer_and_reason() {
        let err = BlocktreeError::serialization(
            Layer::Blockchain,
            SerializationReason::ArgumentOutOfBounds,
        );
        assert_eq!(
            err.to_string(),
            "serialization error at blockchain: argument_out_of_bounds"
        );
    }

    #[test]
    fn invalid_block_error_display() {
        let err = BlocktreeError::invalid_block(
            Layer::Blocktree,
            InvalidBlockReason::InvalidParentBlock,
            None,
        );
        assert_eq!(
            err.to_string(),
            "invalid block at blocktree: invalid_parent_block"
        );
    }

    #[test]
    fn signature_error_display() {
        let err = BlocktreeError::invalid_signature(
            Layer::SecureBlocktree,
            InvalidSignatureReason::Unauthorized,
        );
        assert_eq!(
            err.to_string(),
            "invalid signature at secure-blocktree: unauthorized"
        );
    }

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(SerializationReason::InvalidBlockHash.code(), "invalid_block_hash");
        assert_eq!(InvalidBlockReason::NextBlockExists.code(), "next_block_exists");
        assert_eq!(InvalidSignatureReason::DoesNotMatch.code(), "does_not_match");
        assert_eq!(InvalidKeyReason::Revoked.code(), "revoked");
    }

    #[test]
    fn types_implement_std_error() {
        fn assert_is_error<E: StdError>() {}

        assert_is_error::<BlocktreeError>();
    }
}

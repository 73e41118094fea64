//! Blocktree library crate.
//!
//! A layered, content-addressed, signature-authenticated hierarchical
//! block store:
//!
//! - strongly-typed records and wire codecs (`types`, `codec`),
//! - the L1 append-only chain store (`chain`),
//! - the L2 parent/child tree overlay (`tree`),
//! - the L3 typed, key-authorized layer (`secure`),
//! - collaborator traits and bundled implementations (`providers`,
//!   `storage`, `cache`),
//! - and a top-level node configuration (`config`).
//!
//! Higher-level binaries compose these pieces; see `main.rs` for the
//! bundled CLI.

pub mod cache;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod providers;
pub mod secure;
pub mod storage;
pub mod tree;
pub mod types;

// Re-export top-level configuration.
pub use config::BlocktreeConfig;

// Re-export the error taxonomy.
pub use error::{
    BlocktreeError, InvalidBlockReason, InvalidKeyReason, InvalidSignatureReason, Result,
    SerializationReason,
};

// Re-export the three layers and their reports.
pub use chain::{Blockchain, ValidationFailure, ValidationReport, WriteOptions};
pub use secure::broker::InMemoryBroker;
pub use secure::{RootInstallation, SecureBlock, SecureBlocktree};
pub use tree::Blocktree;

// Re-export collaborator traits and bundled implementations.
pub use cache::{CacheSlot, CacheValue, InMemoryCache};
pub use providers::{
    BlockSigner, BlockStorage, BrokerToken, CryptoProvider, EncryptedSecret, KeyPair,
    KeyPairSigner, ManualClock, SecretRequest, SecretsBroker, SigningRequest, SlotCache,
    SoftwareCrypto, SystemClock, TimeSource,
};
pub use storage::{InMemoryStorage, RocksDbConfig, RocksDbStorage};

// Re-export domain types at the crate root for convenience.
pub use types::block::{Block, NewBlock};
pub use types::secure::{
    BlockKind, KeyAction, KeyDecision, KeyEntry, KeySet, OptionsRecord, SecureBody,
    SignatureRecord, VALID_TO_FOREVER, VALID_TO_REVOKED,
};
pub use types::tree::{NewTreeBlock, TreeBlock};
pub use types::{BlockHash, Hash256, Layer, PublicKey, Signature, HASH_LEN};

/// Type alias for the stack a "typical" persistent node runs: RocksDB
/// storage, an in-process cache, the system clock, and software crypto.
pub type DefaultSecureBlocktree =
    SecureBlocktree<RocksDbStorage, InMemoryCache, SystemClock, SoftwareCrypto>;

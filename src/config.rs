//! Top-level configuration for a blocktree node.
//!
//! This aggregates the sub-configs a wired-up binary needs. The goal is
//! a single `BlocktreeConfig` struct that `main.rs` can construct from
//! defaults, flags, or environment variables as needed.

use crate::storage::RocksDbConfig;

/// Top-level configuration for a blocktree node.
#[derive(Clone, Debug, Default)]
pub struct BlocktreeConfig {
    /// Persistent byte-store settings.
    pub storage: RocksDbConfig,
}

//! Byte-store backends.
//!
//! This module provides concrete implementations of the
//! [`crate::providers::BlockStorage`] trait, including:
//!
//! - an in-memory store ([`mem::InMemoryStorage`]) suitable for tests,
//! - a RocksDB-backed store ([`rocksdb::RocksDbStorage`]) for the CLI and
//!   persistent deployments.

pub mod mem;
pub mod rocksdb;

pub use mem::InMemoryStorage;
pub use rocksdb::{RocksDbConfig, RocksDbStorage};

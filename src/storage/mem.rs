//! In-memory byte store.
//!
//! This implementation is useful for unit tests and small demos. It keeps
//! all entries in a `HashMap` keyed by content hash. Lock sections are
//! short and never span an await point.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::providers::BlockStorage;
use crate::types::BlockHash;

/// In-memory implementation of [`BlockStorage`].
#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<BlockHash, Vec<u8>>>,
}

impl InMemoryStorage {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl BlockStorage for InMemoryStorage {
    async fn write_bytes(&self, bytes: &[u8]) -> Result<BlockHash> {
        let hash = BlockHash::compute(bytes);
        self.entries.write().insert(hash, bytes.to_vec());
        Ok(hash)
    }

    async fn read_bytes(&self, hash: &BlockHash) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(hash).cloned())
    }

    async fn find_in_storage(
        &self,
        pred: &(dyn for<'a> Fn(&'a [u8]) -> bool + Send + Sync),
    ) -> Result<Option<Vec<u8>>> {
        let guard = self.entries.read();
        Ok(guard.values().find(|bytes| pred(bytes)).cloned())
    }

    async fn map_in_storage(
        &self,
        f: &(dyn for<'a> Fn(&'a [u8]) -> Option<Vec<u8>> + Send + Sync),
    ) -> Result<Vec<Vec<u8>>> {
        let guard = self.entries.read();
        Ok(guard.values().filter_map(|bytes| f(bytes)).collect())
    }

    async fn list_keys(&self, prefix: Option<&[u8]>) -> Result<Vec<BlockHash>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|hash| match prefix {
                Some(p) => hash.as_bytes().starts_with(p),
                None => true,
            })
            .copied()
            .collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.entries.read().len() as u64)
    }
}

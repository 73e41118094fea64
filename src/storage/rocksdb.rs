//! RocksDB-backed byte store.
//!
//! This implementation persists blocks in a RocksDB instance with a
//! dedicated `"blocks"` column family mapping content hash (32 bytes) to
//! serialized block bytes. No other persisted structure exists; every
//! index over the store is a cache.

use std::path::Path;

use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};

use crate::error::{BlocktreeError, Result};
use crate::providers::BlockStorage;
use crate::types::BlockHash;

/// Configuration for [`RocksDbStorage`].
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/blocktree-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// RocksDB-backed implementation of [`BlockStorage`].
pub struct RocksDbStorage {
    db: DB,
}

impl RocksDbStorage {
    /// Opens (or creates) a RocksDB-backed store at the configured path.
    ///
    /// This sets up the `"blocks"` column family. The `"default"` column
    /// family is also created to keep RocksDB happy, but it is not used.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new("blocks", Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| BlocktreeError::Storage(format!("failed to open RocksDB: {e}")))?;

        Ok(Self { db })
    }

    fn cf_blocks(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle("blocks")
            .ok_or_else(|| BlocktreeError::Storage("missing 'blocks' column family".into()))
    }

    /// Runs `visit` over every stored value until it returns `false`.
    fn scan_values(&self, mut visit: impl FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        let cf = self.cf_blocks()?;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) =
                item.map_err(|e| BlocktreeError::Storage(format!("iterator failed: {e}")))?;
            if !visit(&key, &value) {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStorage for RocksDbStorage {
    async fn write_bytes(&self, bytes: &[u8]) -> Result<BlockHash> {
        let hash = BlockHash::compute(bytes);
        let cf = self.cf_blocks()?;
        self.db
            .put_cf(&cf, hash.as_bytes(), bytes)
            .map_err(|e| BlocktreeError::Storage(format!("put failed: {e}")))?;
        Ok(hash)
    }

    async fn read_bytes(&self, hash: &BlockHash) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_blocks()?;
        self.db
            .get_cf(&cf, hash.as_bytes())
            .map_err(|e| BlocktreeError::Storage(format!("get failed: {e}")))
    }

    async fn find_in_storage(
        &self,
        pred: &(dyn for<'a> Fn(&'a [u8]) -> bool + Send + Sync),
    ) -> Result<Option<Vec<u8>>> {
        let mut found = None;
        self.scan_values(|_, value| {
            if pred(value) {
                found = Some(value.to_vec());
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    async fn map_in_storage(
        &self,
        f: &(dyn for<'a> Fn(&'a [u8]) -> Option<Vec<u8>> + Send + Sync),
    ) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        self.scan_values(|_, value| {
            if let Some(mapped) = f(value) {
                out.push(mapped);
            }
            true
        })?;
        Ok(out)
    }

    async fn list_keys(&self, prefix: Option<&[u8]>) -> Result<Vec<BlockHash>> {
        let mut out = Vec::new();
        self.scan_values(|key, _| {
            let matches = match prefix {
                Some(p) => key.starts_with(p),
                None => true,
            };
            if matches {
                if let Ok(hash) = BlockHash::from_slice(key) {
                    out.push(hash);
                }
            }
            true
        })?;
        Ok(out)
    }

    async fn count(&self) -> Result<u64> {
        let mut n = 0u64;
        self.scan_values(|_, _| {
            n += 1;
            true
        })?;
        Ok(n)
    }
}

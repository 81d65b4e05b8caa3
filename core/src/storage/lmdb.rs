use anyhow::Result;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;

use super::{KvStore, WriteBatch, WriteOp};

/// Default LMDB map size: 10 GB.
const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024 * 1024;

/// LMDB-backed store. A single unnamed database holds every namespace;
/// the key prefixes of `storage::keys` keep them apart.
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, None)?;
        wtxn.commit()?;

        Ok(Self { env, db })
    }
}

impl KvStore for LmdbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.delete(&mut wtxn, key)?;
        wtxn.commit()?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        // One LMDB write transaction — commit is all-or-nothing.
        let mut wtxn = self.env.write_txn()?;
        for op in &batch.ops {
            match op {
                WriteOp::Put { key, value } => {
                    self.db.put(&mut wtxn, key, value)?;
                }
                WriteOp::Delete { key } => {
                    self.db.delete(&mut wtxn, key)?;
                }
            }
        }
        wtxn.commit()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.db.prefix_iter(&rtxn, prefix)? {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

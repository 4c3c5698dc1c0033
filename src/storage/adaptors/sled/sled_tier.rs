//! Durable tier on top of sled.
//!
//! Objects live in a single tree keyed by path, each value a bincode-encoded
//! [`Object`]. [`StorageTier::load`] reconstructs the full map on startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::OBJECTS_TREE;
use crate::key;
use crate::storage::tier::sort_ascending;
use crate::Object;
use crate::Result;
use crate::StorageError;
use crate::StorageTier;

pub struct SledTier {
    db: sled::Db,
    tree: sled::Tree,
    running: AtomicBool,
}

impl std::fmt::Debug for SledTier {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledTier").field("tree_len", &self.tree.len()).finish()
    }
}

impl SledTier {
    pub fn open(db_path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        debug!("open sled tier from path: {:?}", &db_path);

        let db = sled::Config::default()
            .path(db_path.as_ref())
            .cache_capacity(64 * 1024 * 1024) //64MB
            .flush_every_ms(Some(10))
            .use_compression(true)
            .compression_factor(1)
            .open()
            .map_err(|e| {
                warn!(
                    "Try to open DB at this location: {:?} and failed: {:?}",
                    db_path, e
                );
                StorageError::DbError(e.to_string())
            })?;

        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(OBJECTS_TREE)?;
        Ok(Self {
            db,
            tree,
            running: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn decode(
        key: &[u8],
        value: &[u8],
    ) -> Result<Object> {
        bincode::deserialize(value).map_err(|e| {
            error!(
                key = %String::from_utf8_lossy(key),
                "failed to decode persisted object: {:?}", e
            );
            e.into()
        })
    }
}

impl StorageTier for SledTier {
    fn name(&self) -> &'static str {
        "sled"
    }

    fn start(&self) -> Result<()> {
        debug!("start sled tier");
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        debug!("close sled tier");
        self.running.store(false, Ordering::Release);
        self.flush()
    }

    fn active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn get(
        &self,
        key: &str,
    ) -> Result<Option<Object>> {
        match self.tree.get(key.as_bytes())? {
            Some(value) => Ok(Some(Self::decode(key.as_bytes(), &value)?)),
            None => Ok(None),
        }
    }

    fn get_list(
        &self,
        pattern: &str,
    ) -> Result<Vec<Object>> {
        let mut objects = Vec::new();
        for item in self.tree.scan_prefix(key::glob_prefix(pattern).as_bytes()) {
            let (k, v) = item?;
            let matched = std::str::from_utf8(&k)
                .map(|k| key::matches(pattern, k))
                .unwrap_or(false);
            if matched {
                objects.push(Self::decode(&k, &v)?);
            }
        }
        sort_ascending(&mut objects);
        Ok(objects)
    }

    fn set(
        &self,
        key: &str,
        object: Object,
    ) -> Result<()> {
        let value = bincode::serialize(&object)?;
        self.tree.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn del(
        &self,
        key: &str,
    ) -> Result<bool> {
        Ok(self.tree.remove(key.as_bytes())?.is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(self.tree.len());
        for k in self.tree.iter().keys() {
            keys.push(String::from_utf8_lossy(&k?).into_owned());
        }
        Ok(keys)
    }

    fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        Ok(())
    }

    fn load(&self) -> Result<HashMap<String, Object>> {
        let mut entries = HashMap::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (k, v) = item?;
            let object = Self::decode(&k, &v)?;
            entries.insert(String::from_utf8_lossy(&k).into_owned(), object);
        }
        info!(count = entries.len(), "loaded objects from sled tier");
        Ok(entries)
    }
}

//! Key-value store abstraction consumed by the namespace layer.
//!
//! A store hosts named indexes addressed by 128-bit FIDs. Each index offers
//! atomic single-key get/set/delete and a forward-only prefix cursor ordered
//! lexicographically on the raw key bytes. The in-memory backend keeps one
//! `BTreeMap` per index and can be persisted as a bincode snapshot.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NsalError, Result};
use crate::types::Fid;

/// Key type for the KV store.
pub type Key = Vec<u8>;
/// Value type for the KV store.
pub type Value = Vec<u8>;
/// A key-value pair.
pub type KvPair = (Key, Value);

/// Single-use forward cursor over one key range.
///
/// Yields entries in key order and `None` at the end of the range. Backend
/// resources are released when the cursor is dropped, on every exit path.
pub trait KvCursor: Iterator<Item = Result<KvPair>> + Send {}

impl<T: Iterator<Item = Result<KvPair>> + Send> KvCursor for T {}

/// One opened index.
pub trait KvIndex: Send + Sync {
    /// FID the index was opened with.
    fn fid(&self) -> Fid;

    /// Get a value by key. Returns None if the key doesn't exist.
    fn get(&self, key: &[u8]) -> Result<Option<Value>>;

    /// Store a key-value pair, overwriting any existing value.
    fn set(&self, key: Key, value: Value) -> Result<()>;

    /// Delete a key. Fails with `NotFound` if the key doesn't exist.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Opens a cursor positioned at the first key starting with `prefix`.
    fn iter_prefix(&self, prefix: &[u8]) -> Result<Box<dyn KvCursor>>;

    /// Returns true if the key exists.
    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Index lifecycle of a KV backend.
pub trait KvStore: Send + Sync {
    /// Creates a new index. Fails with `AlreadyExists` if the FID is taken.
    fn index_create(&self, fid: &Fid) -> Result<Arc<dyn KvIndex>>;

    /// Opens an existing index. Fails with `NotFound` if it doesn't exist.
    fn index_open(&self, fid: &Fid) -> Result<Arc<dyn KvIndex>>;

    /// Deletes an index and all of its entries.
    fn index_delete(&self, fid: &Fid) -> Result<()>;
}

fn lock_err<E: std::fmt::Display>(e: E) -> NsalError {
    NsalError::Kv(format!("lock poisoned: {}", e))
}

struct MemoryIndex {
    fid: Fid,
    deleted: AtomicBool,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    open_cursors: Arc<AtomicUsize>,
}

impl MemoryIndex {
    fn check_live(&self) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(NsalError::not_found(format!("index {}", self.fid)));
        }
        Ok(())
    }
}

/// Handle to an index of a [`MemoryKvStore`].
#[derive(Clone)]
pub struct MemoryIndexHandle {
    inner: Arc<MemoryIndex>,
}

impl KvIndex for MemoryIndexHandle {
    fn fid(&self) -> Fid {
        self.inner.fid
    }

    fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        self.inner.check_live()?;
        let data = self.inner.data.read().map_err(lock_err)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: Key, value: Value) -> Result<()> {
        self.inner.check_live()?;
        let mut data = self.inner.data.write().map_err(lock_err)?;
        data.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.check_live()?;
        let mut data = self.inner.data.write().map_err(lock_err)?;
        match data.remove(key) {
            Some(_) => Ok(()),
            None => Err(NsalError::not_found(format!(
                "key of {} bytes in index {}",
                key.len(),
                self.inner.fid
            ))),
        }
    }

    fn iter_prefix(&self, prefix: &[u8]) -> Result<Box<dyn KvCursor>> {
        self.inner.check_live()?;
        self.inner.open_cursors.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryCursor {
            index: Arc::clone(&self.inner),
            prefix: prefix.to_vec(),
            last: None,
            done: false,
        }))
    }
}

struct MemoryCursor {
    index: Arc<MemoryIndex>,
    prefix: Vec<u8>,
    last: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for MemoryCursor {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let data = match self.index.data.read() {
            Ok(data) => data,
            Err(e) => {
                self.done = true;
                return Some(Err(lock_err(e)));
            }
        };
        let lower = match &self.last {
            Some(last) => Bound::Excluded(last.clone()),
            None => Bound::Included(self.prefix.clone()),
        };
        let entry = data
            .range::<Vec<u8>, _>((lower, Bound::Unbounded))
            .next()
            .filter(|(k, _)| k.starts_with(&self.prefix))
            .map(|(k, v)| (k.clone(), v.clone()));
        drop(data);
        match entry {
            Some((k, v)) => {
                self.last = Some(k.clone());
                Some(Ok((k, v)))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.index.open_cursors.fetch_sub(1, Ordering::AcqRel);
    }
}

/// In-memory KV store. Thread-safe via RwLock, one BTreeMap per index.
pub struct MemoryKvStore {
    indexes: RwLock<HashMap<Fid, Arc<MemoryIndex>>>,
    open_cursors: Arc<AtomicUsize>,
}

#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    indexes: Vec<IndexSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    fid: Fid,
    entries: Vec<KvPair>,
}

impl MemoryKvStore {
    /// Creates a new empty in-memory KV store.
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of cursors currently alive across all indexes.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::Acquire)
    }

    /// Number of indexes in the store.
    pub fn index_count(&self) -> usize {
        self.indexes.read().map(|m| m.len()).unwrap_or(0)
    }

    fn make_index(&self, fid: Fid, entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Arc<MemoryIndex> {
        Arc::new(MemoryIndex {
            fid,
            deleted: AtomicBool::new(false),
            data: RwLock::new(entries),
            open_cursors: Arc::clone(&self.open_cursors),
        })
    }

    /// Writes every index to `path` as a bincode snapshot.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let indexes = self.indexes.read().map_err(lock_err)?;
        let mut snapshot = StoreSnapshot {
            indexes: Vec::with_capacity(indexes.len()),
        };
        for (fid, index) in indexes.iter() {
            let data = index.data.read().map_err(lock_err)?;
            snapshot.indexes.push(IndexSnapshot {
                fid: *fid,
                entries: data.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            });
        }
        let bytes = bincode::serialize(&snapshot).map_err(|e| NsalError::Kv(e.to_string()))?;
        std::fs::write(path, bytes)?;
        debug!(path = %path.display(), indexes = snapshot.indexes.len(), "saved kv snapshot");
        Ok(())
    }

    /// Loads a store previously written by [`MemoryKvStore::save_snapshot`].
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: StoreSnapshot =
            bincode::deserialize(&bytes).map_err(|e| NsalError::Corrupted {
                what: "kv snapshot",
                reason: e.to_string(),
            })?;
        let store = Self::new();
        {
            let mut indexes = store.indexes.write().map_err(lock_err)?;
            for index in snapshot.indexes {
                let entries: BTreeMap<_, _> = index.entries.into_iter().collect();
                indexes.insert(index.fid, store.make_index(index.fid, entries));
            }
        }
        debug!(path = %path.display(), indexes = store.index_count(), "loaded kv snapshot");
        Ok(store)
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn index_create(&self, fid: &Fid) -> Result<Arc<dyn KvIndex>> {
        let mut indexes = self.indexes.write().map_err(lock_err)?;
        if indexes.contains_key(fid) {
            return Err(NsalError::AlreadyExists {
                what: format!("index {}", fid),
            });
        }
        let index = self.make_index(*fid, BTreeMap::new());
        indexes.insert(*fid, Arc::clone(&index));
        debug!(fid = %fid, "created index");
        Ok(Arc::new(MemoryIndexHandle { inner: index }))
    }

    fn index_open(&self, fid: &Fid) -> Result<Arc<dyn KvIndex>> {
        let indexes = self.indexes.read().map_err(lock_err)?;
        let index = indexes
            .get(fid)
            .ok_or_else(|| NsalError::not_found(format!("index {}", fid)))?;
        Ok(Arc::new(MemoryIndexHandle {
            inner: Arc::clone(index),
        }))
    }

    fn index_delete(&self, fid: &Fid) -> Result<()> {
        let mut indexes = self.indexes.write().map_err(lock_err)?;
        let index = indexes
            .remove(fid)
            .ok_or_else(|| NsalError::not_found(format!("index {}", fid)))?;
        index.deleted.store(true, Ordering::Release);
        debug!(fid = %fid, "deleted index");
        Ok(())
    }
}

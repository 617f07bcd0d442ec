//! Namespace registry.
//!
//! Each namespace owns one KV index, addressed by a FID derived from the
//! configured template. Namespace records live in the shared meta index under
//! `[NS_INFO][0][id]`; the id counter lives under `[NS_ID_NEXT][0]`.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use crate::config::NsalConfig;
use crate::error::{NsalError, Result};
use crate::keys;
use crate::kvstore::{KvCursor, KvIndex, KvStore};
use crate::types::{Fid, Str256};

/// Counter value assumed when the counter key is absent; the first id issued
/// is one more than this.
pub const NS_ID_INIT: u32 = 2;

/// A namespace: a named, separately indexed metadata domain.
#[derive(Clone)]
pub struct Namespace {
    id: u32,
    name: Str256,
    fid: Fid,
    index: Option<Arc<dyn KvIndex>>,
}

impl Namespace {
    /// Encoded record size: id, fixed-size name, index FID.
    pub const RECORD_SIZE: usize = 4 + Str256::ENCODED_SIZE + Fid::SIZE;

    /// Namespace id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Namespace name.
    pub fn name(&self) -> &Str256 {
        &self.name
    }

    /// FID of the namespace's own index.
    pub fn fid(&self) -> Fid {
        self.fid
    }

    /// Opened index, if any. Records decoded from a scan carry none.
    pub fn index(&self) -> Option<&Arc<dyn KvIndex>> {
        self.index.as_ref()
    }

    /// Returns the namespace index, opening it on first use.
    pub fn open_index(&mut self, kv: &dyn KvStore) -> Result<Arc<dyn KvIndex>> {
        if let Some(index) = &self.index {
            return Ok(Arc::clone(index));
        }
        let index = kv.index_open(&self.fid)?;
        self.index = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Encodes the persistent part of the record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::RECORD_SIZE);
        buf.extend_from_slice(&self.id.to_le_bytes());
        self.name.encode_into(&mut buf);
        self.fid.encode_into(&mut buf);
        buf
    }

    /// Decodes a record, rejecting any value whose size is not exact.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::RECORD_SIZE {
            return Err(NsalError::Corrupted {
                what: "namespace",
                reason: format!(
                    "record is {} bytes, expected {}",
                    bytes.len(),
                    Self::RECORD_SIZE
                ),
            });
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[..4]);
        let name = Str256::decode(&bytes[4..])?;
        let fid = Fid::from_bytes(&bytes[4 + Str256::ENCODED_SIZE..])?;
        Ok(Self {
            id: u32::from_le_bytes(id),
            name,
            fid,
            index: None,
        })
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fid", &self.fid)
            .field("open", &self.index.is_some())
            .finish()
    }
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.fid == other.fid
    }
}

/// Registry of namespaces stored in the meta index.
pub struct NamespaceRegistry {
    kv: Arc<dyn KvStore>,
    meta: Arc<dyn KvIndex>,
    fid_template: Fid,
    id_lock: Mutex<()>,
}

impl NamespaceRegistry {
    /// Opens the meta index named by the configuration, creating it on a
    /// fresh store.
    pub fn init(kv: Arc<dyn KvStore>, config: &NsalConfig) -> Result<Self> {
        let meta_fid = config.kvstore.meta_fid()?;
        let fid_template = config.kvstore.fid_template()?;
        let meta = match kv.index_open(&meta_fid) {
            Ok(index) => index,
            Err(e) if e.is_not_found() => {
                info!(fid = %meta_fid, "creating namespace meta index");
                kv.index_create(&meta_fid)?
            }
            Err(e) => return Err(e),
        };
        debug!(fid = %meta_fid, "namespace registry initialized");
        Ok(Self::with_index(kv, meta, fid_template))
    }

    /// Binds the registry to an already opened meta index.
    pub fn with_index(kv: Arc<dyn KvStore>, meta: Arc<dyn KvIndex>, fid_template: Fid) -> Self {
        Self {
            kv,
            meta,
            fid_template,
            id_lock: Mutex::new(()),
        }
    }

    /// Releases the registry.
    pub fn fini(self) {
        debug!(fid = %self.meta.fid(), "namespace registry finalized");
    }

    /// The shared meta index.
    pub fn meta_index(&self) -> Arc<dyn KvIndex> {
        Arc::clone(&self.meta)
    }

    /// The KV store namespaces are created in.
    pub fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    /// Allocates the next namespace id. Ids are never reused.
    pub fn next_id(&self) -> Result<u32> {
        let _guard = self
            .id_lock
            .lock()
            .map_err(|e| NsalError::Kv(format!("lock poisoned: {}", e)))?;
        self.next_id_unlocked()
    }

    /// Read-increment-write of the counter with no serialization. Two
    /// concurrent callers can observe the same value.
    pub(crate) fn next_id_unlocked(&self) -> Result<u32> {
        let key = keys::ns_id_next_key();
        let current = match self.meta.get(&key)? {
            Some(value) => {
                let raw: [u8; 4] = value.as_slice().try_into().map_err(|_| {
                    NsalError::Corrupted {
                        what: "namespace id counter",
                        reason: format!("value is {} bytes", value.len()),
                    }
                })?;
                u32::from_le_bytes(raw)
            }
            None => NS_ID_INIT,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| NsalError::invalid("namespace id space exhausted"))?;
        self.meta.set(key, next.to_le_bytes().to_vec())?;
        debug!(ns_id = next, "allocated namespace id");
        Ok(next)
    }

    /// Creates a namespace and its index.
    pub fn create(&self, name: &str) -> Result<Namespace> {
        let name = Str256::new(name)?;
        name.ensure_alphanumeric()?;

        let id = self.next_id()?;
        let fid = self.fid_template.with_lo(u64::from(id));
        let index = self.kv.index_create(&fid)?;

        let ns = Namespace {
            id,
            name,
            fid,
            index: Some(index),
        };
        if let Err(e) = self.meta.set(keys::ns_key(id), ns.encode()) {
            if let Err(cleanup) = self.kv.index_delete(&fid) {
                warn!(ns_id = id, error = %cleanup, "failed to remove index after failed create");
            }
            return Err(e);
        }
        info!(ns_id = id, name = %ns.name, fid = %fid, "created namespace");
        Ok(ns)
    }

    /// Deletes a namespace record and then its index.
    pub fn delete(&self, ns: &Namespace) -> Result<()> {
        self.meta.delete(&keys::ns_key(ns.id))?;
        self.kv.index_delete(&ns.fid)?;
        info!(ns_id = ns.id, name = %ns.name, "deleted namespace");
        Ok(())
    }

    /// Lazily enumerates every namespace record in key order.
    pub fn scan(&self) -> Result<NamespaceScan> {
        let cursor = self.meta.iter_prefix(&keys::ns_prefix())?;
        Ok(NamespaceScan {
            cursor: Some(cursor),
        })
    }

    /// Runs `f` on every namespace. The first error, from the store or from
    /// `f`, stops the scan and is returned.
    pub fn scan_with<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Namespace) -> Result<()>,
    {
        for ns in self.scan()? {
            f(ns?)?;
        }
        Ok(())
    }

    /// Looks a namespace up by id.
    pub fn get(&self, id: u32) -> Result<Namespace> {
        match self.meta.get(&keys::ns_key(id))? {
            Some(value) => Namespace::decode(&value),
            None => Err(NsalError::not_found(format!("namespace {}", id))),
        }
    }

    /// Finds the first namespace with the given name.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        for ns in self.scan()? {
            let ns = ns?;
            if ns.name.as_str() == name {
                return Ok(Some(ns));
            }
        }
        Ok(None)
    }
}

/// Single-pass iterator over namespace records.
///
/// A corrupted record yields one error and ends the scan. The cursor is
/// released as soon as the scan ends or the iterator is dropped.
pub struct NamespaceScan {
    cursor: Option<Box<dyn KvCursor>>,
}

impl Iterator for NamespaceScan {
    type Item = Result<Namespace>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        let item = match cursor.next() {
            None => None,
            Some(Err(e)) => Some(Err(e)),
            Some(Ok((key, value))) => Some(keys::parse_ns_key(&key).and_then(|id| {
                Namespace::decode(&value).map_err(|e| {
                    error!(ns_id = id, error = %e, "invalid namespace entry");
                    e
                })
            })),
        };
        if !matches!(item, Some(Ok(_))) {
            self.cursor = None;
        }
        item
    }
}

//! Tenant registry.
//!
//! A tenant is a variable-length record: fixed header (id, name, options
//! length) followed by an opaque options blob. Every encode, decode and
//! comparison works with the full computed size, never the header alone.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::{NsalError, Result};
use crate::keys;
use crate::kvstore::{KvCursor, KvIndex};
use crate::types::Str256;

/// Size of the fixed part of an encoded tenant record.
pub const TENANT_HEADER_SIZE: usize = 2 + Str256::ENCODED_SIZE + 2;

/// Largest options blob a tenant can carry.
pub const TENANT_OPTIONS_MAX: usize = u16::MAX as usize;

/// Tenant record. Its id is the id of the namespace it exports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tenant {
    id: u16,
    name: Str256,
    options: Vec<u8>,
}

impl Tenant {
    /// Builds a tenant record in memory without storing it.
    pub fn new(id: u16, name: Str256, options: &[u8]) -> Result<Self> {
        if options.len() > TENANT_OPTIONS_MAX {
            return Err(NsalError::TooBig {
                len: options.len(),
                max: TENANT_OPTIONS_MAX,
            });
        }
        Ok(Self {
            id,
            name,
            options: options.to_vec(),
        })
    }

    /// Tenant id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Tenant name.
    pub fn name(&self) -> &Str256 {
        &self.name
    }

    /// Opaque options blob.
    pub fn options(&self) -> &[u8] {
        &self.options
    }

    /// Encoded size: header plus options.
    pub fn encoded_len(&self) -> usize {
        TENANT_HEADER_SIZE + self.options.len()
    }

    /// Encodes the full record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.id.to_le_bytes());
        self.name.encode_into(&mut buf);
        buf.extend_from_slice(&(self.options.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.options);
        buf
    }

    /// Decodes a record, checking its size against its own options length.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TENANT_HEADER_SIZE {
            return Err(NsalError::Corrupted {
                what: "tenant",
                reason: format!(
                    "record is {} bytes, header alone is {}",
                    bytes.len(),
                    TENANT_HEADER_SIZE
                ),
            });
        }
        let id = u16::from_le_bytes([bytes[0], bytes[1]]);
        let name = Str256::decode(&bytes[2..])?;
        let size_at = 2 + Str256::ENCODED_SIZE;
        let options_size = u16::from_le_bytes([bytes[size_at], bytes[size_at + 1]]) as usize;
        if bytes.len() != TENANT_HEADER_SIZE + options_size {
            return Err(NsalError::Corrupted {
                what: "tenant",
                reason: format!(
                    "record is {} bytes, expected {}",
                    bytes.len(),
                    TENANT_HEADER_SIZE + options_size
                ),
            });
        }
        Ok(Self {
            id,
            name,
            options: bytes[TENANT_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Registry of tenants stored in a caller-owned meta index.
pub struct TenantRegistry {
    meta: Arc<dyn KvIndex>,
}

impl TenantRegistry {
    /// Binds the registry to a pre-opened meta index.
    pub fn module_init(meta: Arc<dyn KvIndex>) -> Self {
        debug!(fid = %meta.fid(), "tenant registry initialized");
        Self { meta }
    }

    /// Releases the registry. The meta index stays open for its owner.
    pub fn module_fini(self) {
        debug!("tenant registry finalized");
    }

    /// Creates and stores a tenant for namespace `ns_id`.
    pub fn create(&self, name: &str, ns_id: u16, options: &[u8]) -> Result<Tenant> {
        let name = Str256::new(name)?;
        name.ensure_alphanumeric()?;
        let tenant = Tenant::new(ns_id, name, options)?;
        self.meta.set(keys::tenant_key(ns_id), tenant.encode())?;
        info!(
            tenant_id = ns_id,
            name = %tenant.name,
            options = tenant.options.len(),
            "created tenant"
        );
        Ok(tenant)
    }

    /// Deletes a tenant record.
    pub fn delete(&self, tenant: &Tenant) -> Result<()> {
        self.meta.delete(&keys::tenant_key(tenant.id))?;
        info!(tenant_id = tenant.id, name = %tenant.name, "deleted tenant");
        Ok(())
    }

    /// Fetches one tenant by id.
    pub fn get(&self, id: u16) -> Result<Tenant> {
        match self.meta.get(&keys::tenant_key(id))? {
            Some(value) => Tenant::decode(&value),
            None => Err(NsalError::not_found(format!("tenant {}", id))),
        }
    }

    /// Lazily enumerates every tenant record in key order.
    pub fn scan(&self) -> Result<TenantScan> {
        let cursor = self.meta.iter_prefix(&keys::tenant_prefix())?;
        Ok(TenantScan {
            cursor: Some(cursor),
        })
    }

    /// Runs `f` on every tenant; the first error stops the scan and is
    /// returned unchanged.
    pub fn scan_with<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Tenant) -> Result<()>,
    {
        for tenant in self.scan()? {
            f(tenant?)?;
        }
        Ok(())
    }
}

/// Single-pass iterator over tenant records.
pub struct TenantScan {
    cursor: Option<Box<dyn KvCursor>>,
}

impl Iterator for TenantScan {
    type Item = Result<Tenant>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        let item = cursor.next().map(|entry| {
            let (key, value) = entry?;
            let id = keys::parse_tenant_key(&key)?;
            Tenant::decode(&value).map_err(|e| {
                error!(tenant_id = id, error = %e, "invalid tenant entry");
                e
            })
        });
        if !matches!(item, Some(Ok(_))) {
            self.cursor = None;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::{KvStore, MemoryKvStore};
    use crate::types::Fid;

    fn make_registry() -> (Arc<MemoryKvStore>, TenantRegistry) {
        let store = Arc::new(MemoryKvStore::new());
        let meta = store.index_create(&Fid::new(1, 1)).unwrap();
        (store, TenantRegistry::module_init(meta))
    }

    #[test]
    fn test_options_round_trip_all_lengths() {
        let (store, registry) = make_registry();
        let cases: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0x42],
            (0..TENANT_OPTIONS_MAX).map(|i| i as u8).collect(),
        ];
        for (i, options) in cases.iter().enumerate() {
            let id = 3 + i as u16;
            let created = registry.create("tenant", id, options).unwrap();
            assert_eq!(created.encoded_len(), TENANT_HEADER_SIZE + options.len());
            assert_eq!(created.encode().len(), created.encoded_len());

            let scanned: Vec<_> = registry.scan().unwrap().map(|r| r.unwrap()).collect();
            let found = scanned.iter().find(|t| t.id() == id).unwrap();
            assert_eq!(found.options(), options.as_slice());
            assert_eq!(found, &created);
        }
        assert_eq!(store.open_cursors(), 0);
    }

    #[test]
    fn test_options_too_big() {
        let (_store, registry) = make_registry();
        let options = vec![0u8; TENANT_OPTIONS_MAX + 1];
        let err = registry.create("tenant", 3, &options).unwrap_err();
        assert_eq!(err.to_errno(), libc::E2BIG);
        assert_eq!(registry.scan().unwrap().count(), 0);
    }

    #[test]
    fn test_copy_is_deep() {
        let (_store, registry) = make_registry();
        let original = registry.create("t1", 3, b"endpoint=a").unwrap();
        let copy = original.clone();
        drop(original);
        assert_eq!(copy.options(), b"endpoint=a");
        assert_eq!(copy.encoded_len(), TENANT_HEADER_SIZE + 10);
    }

    #[test]
    fn test_delete_and_double_delete() {
        let (_store, registry) = make_registry();
        let tenant = registry.create("t1", 3, b"").unwrap();
        registry.delete(&tenant).unwrap();
        assert_eq!(registry.scan().unwrap().count(), 0);
        assert!(registry.delete(&tenant).unwrap_err().is_not_found());
        assert!(registry.get(3).unwrap_err().is_not_found());
    }

    #[test]
    fn test_get() {
        let (_store, registry) = make_registry();
        registry.create("t1", 3, b"x=1").unwrap();
        let tenant = registry.get(3).unwrap();
        assert_eq!(tenant.name().as_str(), "t1");
        assert_eq!(tenant.options(), b"x=1");
    }

    #[test]
    fn test_create_rejects_non_alphanumeric() {
        let (_store, registry) = make_registry();
        match registry.create("bad name", 3, b"") {
            Err(NsalError::InvalidArgument { .. }) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_rejects_size_mismatch() {
        let (store, registry) = make_registry();
        let tenant = registry.create("t1", 3, b"abc").unwrap();
        let mut bytes = tenant.encode();
        bytes.push(0);
        registry.meta.set(keys::tenant_key(4), bytes).unwrap();

        let results: Vec<_> = registry.scan().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(NsalError::Corrupted { .. })));
        assert_eq!(store.open_cursors(), 0);
    }

    #[test]
    fn test_scan_with_propagates_callback_error() {
        let (store, registry) = make_registry();
        registry.create("a", 3, b"").unwrap();
        registry.create("b", 4, b"").unwrap();
        let mut seen = Vec::new();
        let result = registry.scan_with(|t| {
            seen.push(t.id());
            if t.id() == 3 {
                Err(NsalError::Range { required: 7 })
            } else {
                Ok(())
            }
        });
        match result {
            Err(NsalError::Range { required }) => assert_eq!(required, 7),
            other => panic!("expected Range, got {:?}", other),
        }
        assert_eq!(seen, vec![3]);
        assert_eq!(store.open_cursors(), 0);
    }

    #[test]
    fn test_decode_truncated_header() {
        assert!(matches!(
            Tenant::decode(&[0u8; 10]),
            Err(NsalError::Corrupted { .. })
        ));
    }
}

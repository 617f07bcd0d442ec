//! Extended attribute (xattr) store.
//!
//! Xattrs are stored in a namespace index under
//! `{object_id}{XATTR header}{len}{name}\0`. All attributes of one object
//! share the `{object_id}{XATTR header}` pattern and are listed in one scan.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{NsalError, Result};
use crate::keys;
use crate::kvstore::KvIndex;
use crate::types::{Fid, ObjectId};

/// Largest value an xattr may hold. Also the largest listing buffer
/// accepted by [`XattrStore::list`].
pub const MD_XATTR_SIZE_MAX: usize = 4096;

/// Result of a successful [`XattrStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XattrListing {
    /// Number of names written
    pub count: usize,
    /// Bytes written, terminators included
    pub size: usize,
}

/// Extended attribute store over one namespace index.
pub struct XattrStore {
    index: Arc<dyn KvIndex>,
}

fn xattr_key(oid: &ObjectId, name: &str) -> Result<Vec<u8>> {
    if name.is_empty() {
        return Err(NsalError::invalid("empty xattr name"));
    }
    keys::xattr_key(oid, name)
}

impl XattrStore {
    /// Creates a new XattrStore.
    pub fn new(index: Arc<dyn KvIndex>) -> Self {
        Self { index }
    }

    /// Sets an extended attribute, replacing any previous value.
    pub fn set(&self, oid: &ObjectId, name: &str, value: &[u8]) -> Result<()> {
        if value.len() > MD_XATTR_SIZE_MAX {
            return Err(NsalError::Range {
                required: value.len(),
            });
        }
        let key = xattr_key(oid, name)?;
        self.index.set(key, value.to_vec())?;
        trace!(oid = %oid, name, size = value.len(), "set xattr");
        Ok(())
    }

    /// Gets an extended attribute value.
    pub fn get(&self, oid: &ObjectId, name: &str) -> Result<Vec<u8>> {
        let key = xattr_key(oid, name)?;
        self.index
            .get(&key)?
            .ok_or_else(|| NsalError::not_found(format!("xattr {} of {}", name, oid)))
    }

    /// Returns whether the attribute exists. Errors other than absence are
    /// propagated.
    pub fn exists(&self, oid: &ObjectId, name: &str) -> Result<bool> {
        match self.get(oid, name) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes an extended attribute.
    pub fn delete(&self, oid: &ObjectId, name: &str) -> Result<()> {
        let key = xattr_key(oid, name)?;
        self.index.delete(&key)?;
        trace!(oid = %oid, name, "deleted xattr");
        Ok(())
    }

    /// Writes every attribute name of `oid`, each followed by a `\0`, into
    /// `buf`.
    ///
    /// An empty `buf` asks for the size only: the call fails with
    /// [`NsalError::Range`] carrying the number of bytes needed. A non-empty
    /// buffer too small for all names also fails with `Range`, leaving its
    /// contents unspecified. Buffers larger than [`MD_XATTR_SIZE_MAX`] are
    /// rejected with [`NsalError::TooBig`].
    pub fn list(&self, oid: &ObjectId, buf: &mut [u8]) -> Result<XattrListing> {
        if buf.len() > MD_XATTR_SIZE_MAX {
            return Err(NsalError::TooBig {
                len: buf.len(),
                max: MD_XATTR_SIZE_MAX,
            });
        }
        let size_only = buf.is_empty();
        let psize = Fid::SIZE + keys::PREFIX_SIZE;

        let mut offset = 0;
        let mut count = 0;
        for entry in self.index.iter_prefix(&keys::xattr_pattern(oid))? {
            let (key, _) = entry?;
            let name = key
                .get(psize + 1..key.len().saturating_sub(1))
                .filter(|name| !name.is_empty())
                .ok_or_else(|| NsalError::Corrupted {
                    what: "xattr key",
                    reason: format!("key of {} bytes has no name", key.len()),
                })?;
            let end = offset + name.len() + 1;
            if !size_only {
                if end > buf.len() {
                    debug!(oid = %oid, size = buf.len(), needed = end, "xattr list buffer too small");
                    return Err(NsalError::Range { required: end });
                }
                buf[offset..end - 1].copy_from_slice(name);
                buf[end - 1] = 0;
            }
            offset = end;
            count += 1;
        }

        if size_only {
            return Err(NsalError::Range { required: offset });
        }
        trace!(oid = %oid, count, size = offset, "listed xattrs");
        Ok(XattrListing {
            count,
            size: offset,
        })
    }

    /// Total buffer size [`XattrStore::list`] needs for `oid`.
    pub fn required_size(&self, oid: &ObjectId) -> Result<usize> {
        match self.list(oid, &mut []) {
            Err(NsalError::Range { required }) => Ok(required),
            Err(e) => Err(e),
            Ok(listing) => Ok(listing.size),
        }
    }

    /// Names of every attribute of `oid`, in key order.
    pub fn names(&self, oid: &ObjectId) -> Result<Vec<String>> {
        self.index
            .iter_prefix(&keys::xattr_pattern(oid))?
            .map(|entry| {
                let (key, _) = entry?;
                keys::parse_xattr_key(&key).map(|(_, name)| name)
            })
            .collect()
    }
}

//! Key codec shared by every record kind in the flat keyspace.
//!
//! Every key carries a two byte header `[record_type][schema_version]`.
//! Namespace-domain keys start with the header; node-domain keys that belong
//! to one object (xattrs) start with the object id so that a single prefix
//! scan enumerates everything attached to that object. Fields are packed in
//! declaration order, little-endian, without padding.

use crate::error::{NsalError, Result};
use crate::types::{Fid, NodeId, ObjectId, NAME_MAX};

/// The only schema version defined so far.
pub const SCHEMA_VERSION_0: u8 = 0;

/// Size of the common key header.
pub const PREFIX_SIZE: usize = 2;

/// Record types of the namespace domain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NsKeyType {
    /// Namespace record.
    NsInfo = 1,
    /// Namespace id counter.
    NsIdNext = 2,
    /// Tenant record.
    TenantInfo = 3,
    /// Tenant id counter (reserved; tenant ids follow namespace ids).
    TenantIdNext = 4,
}

/// Record types of the node domain (per-namespace index).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKeyType {
    /// Parent → child link.
    Child = 20,
    /// Basic (stat-like) attributes of a node.
    BasicAttr = 21,
    /// System attribute of a node.
    SystemAttr = 22,
    /// Extended attribute of an object.
    Xattr = 23,
}

/// Two byte header at the start of every key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyPrefix {
    /// Record type discriminant
    pub record_type: u8,
    /// Schema version of the record
    pub version: u8,
}

impl KeyPrefix {
    /// Header for a record type at the current schema version.
    pub const fn new(record_type: u8) -> Self {
        Self {
            record_type,
            version: SCHEMA_VERSION_0,
        }
    }

    /// Header for a namespace-domain record.
    pub const fn ns(kind: NsKeyType) -> Self {
        Self::new(kind as u8)
    }

    /// Header for a node-domain record.
    pub const fn node(kind: NodeKeyType) -> Self {
        Self::new(kind as u8)
    }

    /// Raw header bytes.
    pub fn encode(&self) -> [u8; PREFIX_SIZE] {
        [self.record_type, self.version]
    }

    /// Appends the header to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.encode());
    }

    /// Reads a header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PREFIX_SIZE {
            return Err(NsalError::invalid(format!(
                "key of {} bytes has no header",
                bytes.len()
            )));
        }
        Ok(Self {
            record_type: bytes[0],
            version: bytes[1],
        })
    }

    fn expect(bytes: &[u8], expected: KeyPrefix) -> Result<()> {
        let got = Self::parse(bytes)?;
        if got != expected {
            return Err(NsalError::invalid(format!(
                "key header {:?} does not match {:?}",
                got, expected
            )));
        }
        Ok(())
    }
}

/// Appends a name as `[len][bytes][0]`.
pub fn encode_name(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    if name.len() > NAME_MAX {
        return Err(NsalError::NameTooLong {
            len: name.len(),
            max: NAME_MAX,
        });
    }
    buf.push(name.len() as u8);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    Ok(())
}

/// Reads a `[len][bytes][0]` name from the start of `bytes`.
pub fn decode_name(bytes: &[u8]) -> Result<String> {
    let len = *bytes
        .first()
        .ok_or_else(|| NsalError::invalid("missing name length"))? as usize;
    if bytes.len() < 1 + len {
        return Err(NsalError::invalid(format!(
            "name field of {} bytes shorter than declared {}",
            bytes.len(),
            len
        )));
    }
    let name = std::str::from_utf8(&bytes[1..1 + len])
        .map_err(|e| NsalError::invalid(format!("name is not utf-8: {}", e)))?;
    Ok(name.to_string())
}

/// Scan prefix for all namespace records.
pub fn ns_prefix() -> Vec<u8> {
    KeyPrefix::ns(NsKeyType::NsInfo).encode().to_vec()
}

/// Key of a namespace record.
pub fn ns_key(ns_id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_SIZE + 4);
    KeyPrefix::ns(NsKeyType::NsInfo).encode_into(&mut key);
    key.extend_from_slice(&ns_id.to_le_bytes());
    key
}

/// Parses a namespace key back into its id.
pub fn parse_ns_key(key: &[u8]) -> Result<u32> {
    KeyPrefix::expect(key, KeyPrefix::ns(NsKeyType::NsInfo))?;
    let body: [u8; 4] = key[PREFIX_SIZE..]
        .try_into()
        .map_err(|_| NsalError::invalid(format!("namespace key of {} bytes", key.len())))?;
    Ok(u32::from_le_bytes(body))
}

/// Key of the namespace id counter (header only).
pub fn ns_id_next_key() -> Vec<u8> {
    KeyPrefix::ns(NsKeyType::NsIdNext).encode().to_vec()
}

/// Scan prefix for all tenant records.
pub fn tenant_prefix() -> Vec<u8> {
    KeyPrefix::ns(NsKeyType::TenantInfo).encode().to_vec()
}

/// Key of a tenant record.
pub fn tenant_key(tenant_id: u16) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_SIZE + 2);
    KeyPrefix::ns(NsKeyType::TenantInfo).encode_into(&mut key);
    key.extend_from_slice(&tenant_id.to_le_bytes());
    key
}

/// Parses a tenant key back into its id.
pub fn parse_tenant_key(key: &[u8]) -> Result<u16> {
    KeyPrefix::expect(key, KeyPrefix::ns(NsKeyType::TenantInfo))?;
    let body: [u8; 2] = key[PREFIX_SIZE..]
        .try_into()
        .map_err(|_| NsalError::invalid(format!("tenant key of {} bytes", key.len())))?;
    Ok(u16::from_le_bytes(body))
}

/// Scan pattern of all xattrs of one object: object id + header.
pub fn xattr_pattern(oid: &ObjectId) -> Vec<u8> {
    let mut key = Vec::with_capacity(Fid::SIZE + PREFIX_SIZE);
    oid.encode_into(&mut key);
    KeyPrefix::node(NodeKeyType::Xattr).encode_into(&mut key);
    key
}

/// Key of one xattr. Its length is the pattern size plus the actual name
/// length, never the maximum.
pub fn xattr_key(oid: &ObjectId, name: &str) -> Result<Vec<u8>> {
    let mut key = xattr_pattern(oid);
    key.reserve(name.len() + 2);
    encode_name(&mut key, name)?;
    Ok(key)
}

/// Parses an xattr key into its object id and name.
pub fn parse_xattr_key(key: &[u8]) -> Result<(ObjectId, String)> {
    let psize = Fid::SIZE + PREFIX_SIZE;
    if key.len() <= psize {
        return Err(NsalError::invalid(format!(
            "xattr key of {} bytes has no name",
            key.len()
        )));
    }
    let oid = Fid::from_bytes(key)?;
    KeyPrefix::expect(&key[Fid::SIZE..], KeyPrefix::node(NodeKeyType::Xattr))?;
    let name = decode_name(&key[psize..])?;
    Ok((oid, name))
}

/// Key of a node's basic attributes.
pub fn basic_attr_key(node_id: &NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_SIZE + Fid::SIZE);
    KeyPrefix::node(NodeKeyType::BasicAttr).encode_into(&mut key);
    node_id.encode_into(&mut key);
    key
}

/// Key of a node's system attribute.
pub fn sys_attr_key(node_id: &NodeId, attr_id: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_SIZE + Fid::SIZE + 1);
    KeyPrefix::node(NodeKeyType::SystemAttr).encode_into(&mut key);
    node_id.encode_into(&mut key);
    key.push(attr_id);
    key
}

/// Scan pattern of all child links of one parent.
pub fn child_pattern(parent: &NodeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(PREFIX_SIZE + Fid::SIZE);
    KeyPrefix::node(NodeKeyType::Child).encode_into(&mut key);
    parent.encode_into(&mut key);
    key
}

/// Key of a child link.
pub fn child_key(parent: &NodeId, name: &str) -> Result<Vec<u8>> {
    let mut key = child_pattern(parent);
    encode_name(&mut key, name)?;
    Ok(key)
}

/// Parses a child link key into its parent id and entry name.
pub fn parse_child_key(key: &[u8]) -> Result<(NodeId, String)> {
    KeyPrefix::expect(key, KeyPrefix::node(NodeKeyType::Child))?;
    let parent = Fid::from_bytes(&key[PREFIX_SIZE..])?;
    let name = decode_name(&key[PREFIX_SIZE + Fid::SIZE..])?;
    Ok((parent, name))
}

//! Node attribute container and node-level primitives.
//!
//! A node's basic attributes are an opaque blob prefixed with its u16 size.
//! System attributes are small opaque values keyed by `(node, attr_id)`.
//! Child links map `(parent, name)` to a child node id.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{NsalError, Result};
use crate::keys;
use crate::kvstore::KvIndex;
use crate::types::{Fid, NodeId};

/// Largest basic attribute blob a node can hold.
pub const NODE_ATTR_MAX: usize = u16::MAX as usize;

/// Size-prefixed basic attribute blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAttr {
    attr: Vec<u8>,
}

impl NodeAttr {
    /// Wraps a non-empty attribute blob.
    pub fn new(attr: &[u8]) -> Result<Self> {
        if attr.is_empty() {
            return Err(NsalError::invalid("empty node attribute"));
        }
        if attr.len() > NODE_ATTR_MAX {
            return Err(NsalError::TooBig {
                len: attr.len(),
                max: NODE_ATTR_MAX,
            });
        }
        Ok(Self {
            attr: attr.to_vec(),
        })
    }

    /// The attribute bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.attr
    }

    /// Encoded size, size field included.
    pub fn encoded_len(&self) -> usize {
        2 + self.attr.len()
    }

    /// `[size: u16][attr]`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&(self.attr.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.attr);
        buf
    }

    /// Decodes a container, requiring its length to match the size field.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(NsalError::Corrupted {
                what: "node attribute",
                reason: format!("value of {} bytes has no size field", bytes.len()),
            });
        }
        let size = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() != 2 + size {
            return Err(NsalError::Corrupted {
                what: "node attribute",
                reason: format!("value is {} bytes, expected {}", bytes.len(), 2 + size),
            });
        }
        Ok(Self {
            attr: bytes[2..].to_vec(),
        })
    }
}

/// A node of a namespace index together with its basic attributes.
pub struct KvNode {
    index: Arc<dyn KvIndex>,
    node_id: NodeId,
    attr: NodeAttr,
}

impl KvNode {
    /// Builds a node in memory. Nothing is stored until [`KvNode::dump`].
    pub fn new(index: Arc<dyn KvIndex>, node_id: NodeId, attr: &[u8]) -> Result<Self> {
        Ok(Self {
            index,
            node_id,
            attr: NodeAttr::new(attr)?,
        })
    }

    /// Loads a stored node.
    pub fn load(index: Arc<dyn KvIndex>, node_id: NodeId) -> Result<Self> {
        let value = index
            .get(&keys::basic_attr_key(&node_id))?
            .ok_or_else(|| NsalError::not_found(format!("node {}", node_id)))?;
        let attr = NodeAttr::decode(&value)?;
        debug!(node = %node_id, size = attr.encoded_len(), "loaded node");
        Ok(Self {
            index,
            node_id,
            attr,
        })
    }

    /// Node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Basic attributes.
    pub fn attr(&self) -> &NodeAttr {
        &self.attr
    }

    /// Replaces the in-memory basic attributes.
    pub fn set_attr(&mut self, attr: &[u8]) -> Result<()> {
        self.attr = NodeAttr::new(attr)?;
        Ok(())
    }

    /// Stores the basic attributes.
    pub fn dump(&self) -> Result<()> {
        self.index
            .set(keys::basic_attr_key(&self.node_id), self.attr.encode())?;
        debug!(node = %self.node_id, size = self.attr.encoded_len(), "dumped node");
        Ok(())
    }

    /// Removes the stored basic attributes.
    pub fn delete(&self) -> Result<()> {
        self.index.delete(&keys::basic_attr_key(&self.node_id))?;
        debug!(node = %self.node_id, "deleted node");
        Ok(())
    }

    /// Stores system attribute `attr_id` of this node.
    pub fn set_sys_attr(&self, attr_id: u8, value: &[u8]) -> Result<()> {
        set_sys_attr(self.index.as_ref(), &self.node_id, attr_id, value)
    }

    /// Reads system attribute `attr_id` of this node.
    pub fn get_sys_attr(&self, attr_id: u8) -> Result<Vec<u8>> {
        get_sys_attr(self.index.as_ref(), &self.node_id, attr_id)
    }

    /// Removes system attribute `attr_id` of this node.
    pub fn del_sys_attr(&self, attr_id: u8) -> Result<()> {
        del_sys_attr(self.index.as_ref(), &self.node_id, attr_id)
    }
}

impl fmt::Debug for KvNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvNode")
            .field("index", &self.index.fid())
            .field("node_id", &self.node_id)
            .field("attr", &self.attr)
            .finish()
    }
}

/// Stores a non-empty system attribute value.
pub fn set_sys_attr(index: &dyn KvIndex, node_id: &NodeId, attr_id: u8, value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(NsalError::invalid("empty system attribute"));
    }
    index.set(keys::sys_attr_key(node_id, attr_id), value.to_vec())?;
    debug!(node = %node_id, attr_id, size = value.len(), "set sys attr");
    Ok(())
}

/// Reads a system attribute; `NotFound` if absent.
pub fn get_sys_attr(index: &dyn KvIndex, node_id: &NodeId, attr_id: u8) -> Result<Vec<u8>> {
    index
        .get(&keys::sys_attr_key(node_id, attr_id))?
        .ok_or_else(|| NsalError::not_found(format!("sys attr {} of node {}", attr_id, node_id)))
}

/// Removes a system attribute.
pub fn del_sys_attr(index: &dyn KvIndex, node_id: &NodeId, attr_id: u8) -> Result<()> {
    index.delete(&keys::sys_attr_key(node_id, attr_id))
}

/// Links `child` under `parent` as `name`. Fails with `AlreadyExists` if the
/// name is taken.
pub fn link_child(index: &dyn KvIndex, parent: &NodeId, name: &str, child: &NodeId) -> Result<()> {
    let key = keys::child_key(parent, name)?;
    if index.contains_key(&key)? {
        return Err(NsalError::AlreadyExists {
            what: format!("entry {} under {}", name, parent),
        });
    }
    index.set(key, child.to_bytes().to_vec())?;
    debug!(parent = %parent, name, child = %child, "linked child");
    Ok(())
}

/// Resolves `name` under `parent`.
pub fn lookup_child(index: &dyn KvIndex, parent: &NodeId, name: &str) -> Result<NodeId> {
    let value = index
        .get(&keys::child_key(parent, name)?)?
        .ok_or_else(|| NsalError::not_found(format!("entry {} under {}", name, parent)))?;
    if value.len() != Fid::SIZE {
        return Err(NsalError::Corrupted {
            what: "child link",
            reason: format!("value is {} bytes", value.len()),
        });
    }
    Fid::from_bytes(&value)
}

/// Removes the link `name` under `parent`.
pub fn unlink_child(index: &dyn KvIndex, parent: &NodeId, name: &str) -> Result<()> {
    index.delete(&keys::child_key(parent, name)?)?;
    debug!(parent = %parent, name, "unlinked child");
    Ok(())
}

/// Returns true if `parent` has at least one child link.
pub fn has_children(index: &dyn KvIndex, parent: &NodeId) -> Result<bool> {
    let mut cursor = index.iter_prefix(&keys::child_pattern(parent))?;
    match cursor.next() {
        None => Ok(false),
        Some(entry) => entry.map(|_| true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::{KvStore, MemoryKvStore};

    fn make_index() -> (Arc<MemoryKvStore>, Arc<dyn KvIndex>) {
        let kv = Arc::new(MemoryKvStore::new());
        let index = kv.index_create(&Fid::new(3, 3)).unwrap();
        (kv, index)
    }

    #[test]
    fn test_node_attr_layout() {
        let attr = NodeAttr::new(b"abc").unwrap();
        assert_eq!(attr.encode(), vec![3, 0, b'a', b'b', b'c']);
        assert_eq!(attr.encoded_len(), 5);
        assert_eq!(NodeAttr::decode(&attr.encode()).unwrap(), attr);
    }

    #[test]
    fn test_node_attr_decode_checks_size() {
        assert!(NodeAttr::decode(&[3, 0, b'a']).is_err());
        assert!(NodeAttr::decode(&[1, 0, b'a', b'b']).is_err());
        assert!(NodeAttr::decode(&[1]).is_err());
    }

    #[test]
    fn test_node_attr_bounds() {
        assert!(NodeAttr::new(b"").is_err());
        assert!(NodeAttr::new(&vec![0u8; NODE_ATTR_MAX]).is_ok());
        assert!(matches!(
            NodeAttr::new(&vec![0u8; NODE_ATTR_MAX + 1]),
            Err(NsalError::TooBig { .. })
        ));
    }

    #[test]
    fn test_dump_load_delete() {
        let (_kv, index) = make_index();
        let id = Fid::from_ino(2);
        let node = KvNode::new(Arc::clone(&index), id, b"stat-bytes").unwrap();
        node.dump().unwrap();

        let loaded = KvNode::load(Arc::clone(&index), id).unwrap();
        assert_eq!(loaded.attr().as_bytes(), b"stat-bytes");
        assert_eq!(loaded.node_id(), id);

        loaded.delete().unwrap();
        assert!(KvNode::load(Arc::clone(&index), id).unwrap_err().is_not_found());
        assert!(loaded.delete().unwrap_err().is_not_found());
    }

    #[test]
    fn test_redump_after_set_attr() {
        let (_kv, index) = make_index();
        let id = Fid::from_ino(9);
        let mut node = KvNode::new(Arc::clone(&index), id, b"v1").unwrap();
        node.dump().unwrap();
        node.set_attr(b"version-two").unwrap();
        node.dump().unwrap();
        let loaded = KvNode::load(index, id).unwrap();
        assert_eq!(loaded.attr().as_bytes(), b"version-two");
    }

    #[test]
    fn test_sys_attrs() {
        let (_kv, index) = make_index();
        let node = KvNode::new(Arc::clone(&index), Fid::from_ino(2), b"x").unwrap();
        node.set_sys_attr(1, &7u64.to_le_bytes()).unwrap();
        node.set_sys_attr(2, b"other").unwrap();
        assert_eq!(node.get_sys_attr(1).unwrap(), 7u64.to_le_bytes());
        assert_eq!(node.get_sys_attr(2).unwrap(), b"other");

        node.del_sys_attr(1).unwrap();
        assert!(node.get_sys_attr(1).unwrap_err().is_not_found());
        assert!(node.set_sys_attr(3, b"").is_err());
    }

    #[test]
    fn test_child_links() {
        let (kv, index) = make_index();
        let root = Fid::from_ino(2);
        let child = Fid::from_ino(3);
        assert!(!has_children(index.as_ref(), &root).unwrap());

        link_child(index.as_ref(), &root, "dir1", &child).unwrap();
        assert_eq!(lookup_child(index.as_ref(), &root, "dir1").unwrap(), child);
        assert!(has_children(index.as_ref(), &root).unwrap());
        assert!(!has_children(index.as_ref(), &child).unwrap());

        match link_child(index.as_ref(), &root, "dir1", &Fid::from_ino(4)) {
            Err(NsalError::AlreadyExists { .. }) => {}
            other => panic!("expected AlreadyExists, got {:?}", other),
        }

        unlink_child(index.as_ref(), &root, "dir1").unwrap();
        assert!(lookup_child(index.as_ref(), &root, "dir1")
            .unwrap_err()
            .is_not_found());
        assert!(!has_children(index.as_ref(), &root).unwrap());
        assert_eq!(kv.open_cursors(), 0);
    }

    #[test]
    fn test_child_links_do_not_collide_with_attrs() {
        let (_kv, index) = make_index();
        let root = Fid::from_ino(2);
        KvNode::new(Arc::clone(&index), root, b"attrs")
            .unwrap()
            .dump()
            .unwrap();
        set_sys_attr(index.as_ref(), &root, 1, b"gen").unwrap();
        assert!(!has_children(index.as_ref(), &root).unwrap());
    }
}

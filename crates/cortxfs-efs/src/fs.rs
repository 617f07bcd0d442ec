//! One filesystem: a namespace, its opened index and an optional endpoint.
//!
//! Inodes are nodes of the namespace index addressed by `Fid::from_ino`.
//! Their `Stat` is bincode-encoded into the node's basic attributes. The
//! inode number generator is a system attribute of the root node.

use std::sync::{Arc, Mutex, RwLock};

use cortxfs_nsal::keys;
use cortxfs_nsal::kvnode::{self, KvNode};
use cortxfs_nsal::{
    Fid, KvIndex, KvStore, Namespace, NsalError, Tenant, XattrListing, XattrStore, NAME_MAX,
};
use tracing::{debug, info, warn};

use crate::access::{check_access, AccessFlags, Cred};
use crate::error::{EfsError, Result};
use crate::stat::{FileKind, Stat};

/// Inode number of every filesystem's root directory.
pub const ROOT_INODE: u64 = 2;

/// System attribute of the root node holding the last issued inode number.
pub const SYS_ATTR_INO_NUM_GEN: u8 = 1;

/// A filesystem backed by one namespace index.
pub struct Filesystem {
    ns: Namespace,
    index: Arc<dyn KvIndex>,
    xattrs: XattrStore,
    tenant: RwLock<Option<Tenant>>,
    ino_lock: Mutex<()>,
}

fn node_id(ino: u64) -> Fid {
    Fid::from_ino(ino)
}

fn check_entry_name(name: &str) -> Result<()> {
    if name.len() > NAME_MAX {
        return Err(NsalError::TooBig {
            len: name.len(),
            max: NAME_MAX,
        }
        .into());
    }
    // "." and ".." always exist; "/" names the root
    if name == "." || name == ".." || name == "/" {
        return Err(EfsError::AlreadyExists {
            name: name.to_string(),
        });
    }
    if name.is_empty() || name.contains('/') {
        return Err(EfsError::invalid(format!("bad entry name '{}'", name)));
    }
    Ok(())
}

impl Filesystem {
    /// Opens the index of `ns` and wraps it.
    pub fn open(mut ns: Namespace, kv: &dyn KvStore) -> Result<Self> {
        let index = ns.open_index(kv)?;
        Ok(Self::with_index(ns, index))
    }

    /// Wraps an already opened index of `ns`.
    pub fn with_index(ns: Namespace, index: Arc<dyn KvIndex>) -> Self {
        Self {
            xattrs: XattrStore::new(Arc::clone(&index)),
            ns,
            index,
            tenant: RwLock::new(None),
            ino_lock: Mutex::new(()),
        }
    }

    /// Namespace id, used as the filesystem id.
    pub fn id(&self) -> u32 {
        self.ns.id()
    }

    /// Filesystem name, the namespace name.
    pub fn name(&self) -> &str {
        self.ns.name().as_str()
    }

    /// Backing namespace.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Opened namespace index.
    pub fn index(&self) -> &Arc<dyn KvIndex> {
        &self.index
    }

    /// Endpoint tenant, if the filesystem is exported.
    pub fn tenant(&self) -> Option<Tenant> {
        match self.tenant.read() {
            Ok(t) => t.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True when an endpoint exists.
    pub fn is_exported(&self) -> bool {
        self.tenant().is_some()
    }

    pub(crate) fn set_tenant(&self, tenant: Option<Tenant>) {
        match self.tenant.write() {
            Ok(mut t) => *t = tenant,
            Err(poisoned) => *poisoned.into_inner() = tenant,
        }
    }

    /// Writes the root directory and seeds the inode generator.
    pub fn create_root(&self) -> Result<()> {
        let root = KvNode::new(
            Arc::clone(&self.index),
            node_id(ROOT_INODE),
            &Stat::root(ROOT_INODE).encode()?,
        )?;
        root.dump()?;
        root.set_sys_attr(SYS_ATTR_INO_NUM_GEN, &ROOT_INODE.to_le_bytes())?;
        debug!(fs = self.name(), "created root");
        Ok(())
    }

    /// Loads the attributes of `ino`.
    pub fn stat(&self, ino: u64) -> Result<Stat> {
        let node = KvNode::load(Arc::clone(&self.index), node_id(ino))?;
        let stat = Stat::decode(node.attr().as_bytes())?;
        if stat.ino != ino {
            return Err(NsalError::Corrupted {
                what: "stat",
                reason: format!("node {} holds stat of inode {}", ino, stat.ino),
            }
            .into());
        }
        Ok(stat)
    }

    /// Stores `stat` under its inode.
    pub fn set_stat(&self, stat: &Stat) -> Result<()> {
        KvNode::new(Arc::clone(&self.index), node_id(stat.ino), &stat.encode()?)?.dump()?;
        Ok(())
    }

    /// Issues the next inode number. Numbers are never reused.
    pub fn next_inode(&self) -> Result<u64> {
        let _guard = self
            .ino_lock
            .lock()
            .map_err(|e| NsalError::Kv(format!("lock poisoned: {}", e)))?;
        let root = node_id(ROOT_INODE);
        let value = kvnode::get_sys_attr(self.index.as_ref(), &root, SYS_ATTR_INO_NUM_GEN)?;
        let raw: [u8; 8] = value.as_slice().try_into().map_err(|_| NsalError::Corrupted {
            what: "inode generator",
            reason: format!("value is {} bytes", value.len()),
        })?;
        let ino = u64::from_le_bytes(raw)
            .checked_add(1)
            .ok_or_else(|| NsalError::invalid("inode number space exhausted"))?;
        kvnode::set_sys_attr(
            self.index.as_ref(),
            &root,
            SYS_ATTR_INO_NUM_GEN,
            &ino.to_le_bytes(),
        )?;
        debug!(fs = self.name(), ino, "allocated inode");
        Ok(ino)
    }

    /// Resolves `name` in directory `parent`.
    pub fn lookup_ino(&self, parent: u64, name: &str) -> Result<u64> {
        let child = kvnode::lookup_child(self.index.as_ref(), &node_id(parent), name)?;
        Ok(child.as_ino())
    }

    /// Creates `name` in directory `parent` and returns its attributes.
    pub fn create_entry(
        &self,
        cred: &Cred,
        parent: u64,
        name: &str,
        kind: FileKind,
        perm: u32,
    ) -> Result<Stat> {
        check_entry_name(name)?;
        let mut parent_stat = self.stat(parent)?;
        if !parent_stat.is_dir() {
            return Err(EfsError::NotADirectory { ino: parent });
        }
        check_access(cred, &parent_stat, AccessFlags::WRITE | AccessFlags::EXEC)?;

        match self.lookup_ino(parent, name) {
            Ok(_) => {
                return Err(EfsError::AlreadyExists {
                    name: name.to_string(),
                })
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let ino = self.next_inode()?;
        let stat = Stat::new(ino, kind, perm, cred);
        self.set_stat(&stat)?;
        let linked = kvnode::link_child(
            self.index.as_ref(),
            &node_id(parent),
            name,
            &node_id(ino),
        );
        if let Err(e) = linked {
            if let Err(cleanup) = self.index.delete(&keys::basic_attr_key(&node_id(ino))) {
                warn!(
                    fs = self.name(),
                    ino,
                    error = %cleanup,
                    "failed to remove node after failed link"
                );
            }
            return Err(e.into());
        }

        if kind == FileKind::Directory {
            parent_stat.nlink += 1;
        }
        parent_stat.touch_ctime();
        self.set_stat(&parent_stat)?;
        debug!(fs = self.name(), parent, name, ino, "created entry");
        Ok(stat)
    }

    /// Removes `name` from directory `parent`. Directories must be empty.
    pub fn remove_entry(&self, cred: &Cred, parent: u64, name: &str) -> Result<()> {
        check_entry_name(name)?;
        let mut parent_stat = self.stat(parent)?;
        if !parent_stat.is_dir() {
            return Err(EfsError::NotADirectory { ino: parent });
        }
        check_access(cred, &parent_stat, AccessFlags::WRITE | AccessFlags::EXEC)?;

        let ino = self.lookup_ino(parent, name)?;
        let stat = self.stat(ino)?;
        if stat.is_dir() && kvnode::has_children(self.index.as_ref(), &node_id(ino))? {
            return Err(EfsError::NotEmpty {
                name: name.to_string(),
            });
        }

        self.remove_all_xattrs(ino)?;
        kvnode::unlink_child(self.index.as_ref(), &node_id(parent), name)?;
        KvNode::load(Arc::clone(&self.index), node_id(ino))?.delete()?;

        if stat.is_dir() {
            parent_stat.nlink = parent_stat.nlink.saturating_sub(1);
        }
        parent_stat.touch_ctime();
        self.set_stat(&parent_stat)?;
        debug!(fs = self.name(), parent, name, ino, "removed entry");
        Ok(())
    }

    /// True when the root directory has no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!kvnode::has_children(
            self.index.as_ref(),
            &node_id(ROOT_INODE),
        )?)
    }

    /// Sets an extended attribute of `ino`.
    pub fn set_xattr(&self, ino: u64, name: &str, value: &[u8]) -> Result<()> {
        Ok(self.xattrs.set(&node_id(ino), name, value)?)
    }

    /// Reads an extended attribute of `ino`.
    pub fn get_xattr(&self, ino: u64, name: &str) -> Result<Vec<u8>> {
        Ok(self.xattrs.get(&node_id(ino), name)?)
    }

    /// Lists attribute names of `ino` into `buf`, NUL-separated.
    pub fn list_xattr(&self, ino: u64, buf: &mut [u8]) -> Result<XattrListing> {
        Ok(self.xattrs.list(&node_id(ino), buf)?)
    }

    /// Removes one extended attribute of `ino`.
    pub fn remove_xattr(&self, ino: u64, name: &str) -> Result<()> {
        Ok(self.xattrs.delete(&node_id(ino), name)?)
    }

    /// Deletes every xattr of `ino`: the names are listed first, then each
    /// one is removed.
    pub fn remove_all_xattrs(&self, ino: u64) -> Result<()> {
        let oid = node_id(ino);
        let names = self.xattrs.names(&oid)?;
        for name in &names {
            self.xattrs.delete(&oid, name)?;
        }
        if !names.is_empty() {
            info!(fs = self.name(), ino, count = names.len(), "removed all xattrs");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filesystem")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("exported", &self.is_exported())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortxfs_nsal::{MemoryKvStore, NamespaceRegistry, NsalConfig};

    fn make_fs() -> (Arc<MemoryKvStore>, Filesystem) {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = NamespaceRegistry::init(kv.clone(), &NsalConfig::default()).unwrap();
        let ns = registry.create("fs1").unwrap();
        let fs = Filesystem::open(ns, kv.as_ref()).unwrap();
        fs.create_root().unwrap();
        (kv, fs)
    }

    #[test]
    fn test_root_after_create() {
        let (_kv, fs) = make_fs();
        let root = fs.stat(ROOT_INODE).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.ino, ROOT_INODE);
        assert!(fs.is_empty().unwrap());
    }

    #[test]
    fn test_inode_numbers_start_after_root() {
        let (_kv, fs) = make_fs();
        assert_eq!(fs.next_inode().unwrap(), 3);
        assert_eq!(fs.next_inode().unwrap(), 4);
    }

    #[test]
    fn test_create_and_lookup_entry() {
        let (_kv, fs) = make_fs();
        let cred = Cred::new(1000, 1000);
        let dir = fs
            .create_entry(&cred, ROOT_INODE, "dir1", FileKind::Directory, 0o755)
            .unwrap();
        assert_eq!(dir.ino, 3);
        assert_eq!(fs.lookup_ino(ROOT_INODE, "dir1").unwrap(), 3);
        assert_eq!(fs.stat(3).unwrap(), dir);
        assert_eq!(fs.stat(ROOT_INODE).unwrap().nlink, 3);
        assert!(!fs.is_empty().unwrap());
    }

    #[test]
    fn test_create_duplicate() {
        let (_kv, fs) = make_fs();
        let cred = Cred::root();
        fs.create_entry(&cred, ROOT_INODE, "a", FileKind::RegularFile, 0o644)
            .unwrap();
        match fs.create_entry(&cred, ROOT_INODE, "a", FileKind::RegularFile, 0o644) {
            Err(EfsError::AlreadyExists { name }) => assert_eq!(name, "a"),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn test_create_needs_write_on_parent() {
        let (_kv, fs) = make_fs();
        let owner = Cred::new(1000, 1000);
        fs.create_entry(&owner, ROOT_INODE, "private", FileKind::Directory, 0o500)
            .unwrap();
        let err = fs
            .create_entry(&owner, 3, "x", FileKind::RegularFile, 0o644)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_create_under_file_is_not_a_directory() {
        let (_kv, fs) = make_fs();
        let cred = Cred::root();
        let file = fs
            .create_entry(&cred, ROOT_INODE, "f", FileKind::RegularFile, 0o644)
            .unwrap();
        assert!(matches!(
            fs.create_entry(&cred, file.ino, "x", FileKind::RegularFile, 0o644),
            Err(EfsError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_dot_names_already_exist() {
        let (_kv, fs) = make_fs();
        for name in [".", "..", "/"] {
            assert_eq!(
                fs.create_entry(&Cred::root(), ROOT_INODE, name, FileKind::Directory, 0o755)
                    .unwrap_err()
                    .to_errno(),
                libc::EEXIST,
                "name {:?}",
                name
            );
        }
    }

    #[test]
    fn test_entry_name_length() {
        let (_kv, fs) = make_fs();
        let long = "n".repeat(NAME_MAX + 1);
        assert_eq!(
            fs.create_entry(&Cred::root(), ROOT_INODE, &long, FileKind::RegularFile, 0o644)
                .unwrap_err()
                .to_errno(),
            libc::E2BIG
        );
        let max = "n".repeat(NAME_MAX);
        fs.create_entry(&Cred::root(), ROOT_INODE, &max, FileKind::RegularFile, 0o644)
            .unwrap();
        assert_eq!(fs.lookup_ino(ROOT_INODE, &max).unwrap(), 3);
    }

    #[test]
    fn test_inode_generator_exhausted() {
        let (_kv, fs) = make_fs();
        let root = node_id(ROOT_INODE);
        kvnode::set_sys_attr(
            fs.index().as_ref(),
            &root,
            SYS_ATTR_INO_NUM_GEN,
            &u64::MAX.to_le_bytes(),
        )
        .unwrap();
        assert_eq!(fs.next_inode().unwrap_err().to_errno(), libc::EINVAL);
        let stored =
            kvnode::get_sys_attr(fs.index().as_ref(), &root, SYS_ATTR_INO_NUM_GEN).unwrap();
        assert_eq!(stored, u64::MAX.to_le_bytes());
    }

    /// Links `name` to another node right after the new node is dumped, as
    /// a concurrent creator would.
    struct LinkRaceIndex {
        inner: Arc<dyn KvIndex>,
        trigger: Vec<u8>,
        link_key: Vec<u8>,
    }

    impl KvIndex for LinkRaceIndex {
        fn fid(&self) -> Fid {
            self.inner.fid()
        }
        fn get(&self, key: &[u8]) -> cortxfs_nsal::Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&self, key: Vec<u8>, value: Vec<u8>) -> cortxfs_nsal::Result<()> {
            let fire = key == self.trigger;
            self.inner.set(key, value)?;
            if fire {
                self.inner
                    .set(self.link_key.clone(), node_id(99).to_bytes().to_vec())?;
            }
            Ok(())
        }
        fn delete(&self, key: &[u8]) -> cortxfs_nsal::Result<()> {
            self.inner.delete(key)
        }
        fn iter_prefix(
            &self,
            prefix: &[u8],
        ) -> cortxfs_nsal::Result<Box<dyn cortxfs_nsal::KvCursor>> {
            self.inner.iter_prefix(prefix)
        }
    }

    #[test]
    fn test_failed_link_discards_new_node() {
        let (_kv, fs) = make_fs();
        let inner = Arc::clone(fs.index());
        let racing = Filesystem::with_index(
            fs.namespace().clone(),
            Arc::new(LinkRaceIndex {
                inner: Arc::clone(&inner),
                trigger: keys::basic_attr_key(&node_id(3)),
                link_key: keys::child_key(&node_id(ROOT_INODE), "x").unwrap(),
            }),
        );

        let err = racing
            .create_entry(&Cred::root(), ROOT_INODE, "x", FileKind::RegularFile, 0o644)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
        assert!(fs.stat(3).unwrap_err().is_not_found());
        assert_eq!(fs.lookup_ino(ROOT_INODE, "x").unwrap(), 99);
        assert_eq!(fs.stat(ROOT_INODE).unwrap().nlink, 2);
    }

    #[test]
    fn test_bad_entry_names() {
        let (_kv, fs) = make_fs();
        for name in ["", ".", "..", "a/b"] {
            assert!(fs
                .create_entry(&Cred::root(), ROOT_INODE, name, FileKind::RegularFile, 0o644)
                .is_err());
        }
    }

    #[test]
    fn test_remove_entry() {
        let (_kv, fs) = make_fs();
        let cred = Cred::root();
        let dir = fs
            .create_entry(&cred, ROOT_INODE, "d", FileKind::Directory, 0o755)
            .unwrap();
        fs.create_entry(&cred, dir.ino, "f", FileKind::RegularFile, 0o644)
            .unwrap();
        assert!(matches!(
            fs.remove_entry(&cred, ROOT_INODE, "d"),
            Err(EfsError::NotEmpty { .. })
        ));

        fs.set_xattr(dir.ino + 1, "user.k", b"v").unwrap();
        fs.remove_entry(&cred, dir.ino, "f").unwrap();
        assert!(fs.get_xattr(dir.ino + 1, "user.k").unwrap_err().is_not_found());
        fs.remove_entry(&cred, ROOT_INODE, "d").unwrap();
        assert!(fs.is_empty().unwrap());
        assert_eq!(fs.stat(ROOT_INODE).unwrap().nlink, 2);
        assert!(fs.stat(dir.ino).unwrap_err().is_not_found());
    }

    #[test]
    fn test_xattr_passthrough() {
        let (kv, fs) = make_fs();
        fs.set_xattr(ROOT_INODE, "a", b"1").unwrap();
        fs.set_xattr(ROOT_INODE, "bb", b"2").unwrap();
        let mut buf = [0u8; 5];
        let listing = fs.list_xattr(ROOT_INODE, &mut buf).unwrap();
        assert_eq!(listing.count, 2);
        assert_eq!(&buf, b"a\0bb\0");

        fs.remove_xattr(ROOT_INODE, "a").unwrap();
        assert_eq!(fs.get_xattr(ROOT_INODE, "bb").unwrap(), b"2");
        fs.remove_all_xattrs(ROOT_INODE).unwrap();
        assert!(fs.get_xattr(ROOT_INODE, "bb").unwrap_err().is_not_found());
        assert_eq!(kv.open_cursors(), 0);
    }

    #[test]
    fn test_concurrent_next_inode_is_unique() {
        let (_kv, fs) = make_fs();
        let fs = Arc::new(fs);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let fs = Arc::clone(&fs);
                std::thread::spawn(move || {
                    (0..25).map(|_| fs.next_inode().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 100);
        assert_eq!(all.first(), Some(&3));
    }
}

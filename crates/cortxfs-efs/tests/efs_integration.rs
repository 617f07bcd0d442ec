//! Filesystem registry, endpoints and handles over a shared in-memory store.

use std::sync::Arc;

use cortxfs_efs::{Cred, EfsError, FileHandle, FileKind, FsRegistry, ROOT_INODE};
use cortxfs_nsal::{MemoryKvStore, Nsal, NsalConfig};
use tempfile::TempDir;

fn make_registry(kv: &Arc<MemoryKvStore>) -> FsRegistry {
    FsRegistry::init(Nsal::init(kv.clone(), &NsalConfig::default()).unwrap()).unwrap()
}

#[test]
fn test_filesystem_tree_and_handles() {
    let kv = Arc::new(MemoryKvStore::new());
    let registry = make_registry(&kv);
    let fs = registry.create_fs("projects").unwrap();
    let user = Cred::new(1000, 1000);

    let dir = fs
        .create_entry(&user, ROOT_INODE, "src", FileKind::Directory, 0o755)
        .unwrap();
    let file = fs
        .create_entry(&user, dir.ino, "main", FileKind::RegularFile, 0o644)
        .unwrap();
    fs.set_xattr(file.ino, "user.lang", b"rust").unwrap();

    let root = FileHandle::get_root(&fs, &user).unwrap();
    let fh = root
        .lookup(&user, "src")
        .unwrap()
        .lookup(&user, "main")
        .unwrap();
    assert_eq!(fh.ino(), file.ino);
    assert_eq!(fh.stat().uid, 1000);

    let mut wire = [0u8; 16];
    fh.serialize(&mut wire).unwrap();
    let back = registry.handle_from_wire(&wire).unwrap();
    assert_eq!(back.key(), fh.key());
    assert_eq!(back.fs().get_xattr(back.ino(), "user.lang").unwrap(), b"rust");

    // a stranger cannot create in a 0755 directory it does not own
    let stranger = Cred::new(2000, 2000);
    assert!(matches!(
        fs.create_entry(&stranger, dir.ino, "x", FileKind::RegularFile, 0o644),
        Err(EfsError::PermissionDenied { .. })
    ));
    assert_eq!(kv.open_cursors(), 0);
}

#[test]
fn test_handles_outlive_deleted_filesystem_entry() {
    let kv = Arc::new(MemoryKvStore::new());
    let registry = make_registry(&kv);
    let fs = registry.create_fs("scratch").unwrap();
    fs.create_entry(&Cred::root(), ROOT_INODE, "tmp", FileKind::RegularFile, 0o600)
        .unwrap();
    let fh = FileHandle::get_root(&fs, &Cred::root())
        .unwrap()
        .lookup(&Cred::root(), "tmp")
        .unwrap();
    let mut wire = [0u8; 16];
    fh.serialize(&mut wire).unwrap();

    fs.remove_entry(&Cred::root(), ROOT_INODE, "tmp").unwrap();
    assert!(registry.handle_from_wire(&wire).unwrap_err().is_not_found());
    // the in-memory copy is still readable
    assert_eq!(fh.stat().perm(), 0o600);
}

#[test]
fn test_state_survives_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kv.snap");
    let wire = {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = make_registry(&kv);
        let fs = registry.create_fs("home").unwrap();
        fs.create_entry(&Cred::root(), ROOT_INODE, "alice", FileKind::Directory, 0o700)
            .unwrap();
        registry.create_endpoint("home", b"secType=sys").unwrap();

        let fh = FileHandle::get_root(&fs, &Cred::root())
            .unwrap()
            .lookup(&Cred::root(), "alice")
            .unwrap();
        let mut wire = [0u8; 16];
        fh.serialize(&mut wire).unwrap();
        drop(fh);
        drop(fs);
        registry.fini();
        kv.save_snapshot(&path).unwrap();
        wire
    };

    let kv = Arc::new(MemoryKvStore::load_snapshot(&path).unwrap());
    let registry = make_registry(&kv);
    let fs = registry.lookup("home").unwrap();
    assert_eq!(fs.tenant().unwrap().options(), b"secType=sys");

    let fh = registry.handle_from_wire(&wire).unwrap();
    assert!(fh.stat().is_dir());
    assert_eq!(fh.stat().perm(), 0o700);

    // inode and namespace counters continue where they stopped
    let next = fs
        .create_entry(&Cred::root(), ROOT_INODE, "bob", FileKind::Directory, 0o700)
        .unwrap();
    assert_eq!(next.ino, fh.ino() + 1);
    assert_eq!(registry.create_fs("other").unwrap().id(), fs.id() + 1);
}

#[test]
fn test_filesystems_are_isolated() {
    let kv = Arc::new(MemoryKvStore::new());
    let registry = make_registry(&kv);
    let a = registry.create_fs("a").unwrap();
    let b = registry.create_fs("b").unwrap();
    a.create_entry(&Cred::root(), ROOT_INODE, "only", FileKind::RegularFile, 0o644)
        .unwrap();

    assert!(b.lookup_ino(ROOT_INODE, "only").unwrap_err().is_not_found());
    assert!(b.is_empty().unwrap());
    registry.delete_fs("b").unwrap();
    assert_eq!(
        registry.delete_fs("a").unwrap_err().to_errno(),
        libc::ENOTEMPTY
    );
}

//! File handles.
//!
//! A handle pins a filesystem, an inode number and a private copy of the
//! inode's attributes. Its wire form is 16 bytes:
//! `[filesystem id: u64][inode: u64]`, little-endian.

use std::sync::Arc;

use cortxfs_nsal::NsalError;
use tracing::trace;

use crate::access::{check_access, AccessFlags, Cred};
use crate::error::{EfsError, Result};
use crate::fs::{Filesystem, ROOT_INODE};
use crate::stat::Stat;

/// Size of a serialized handle.
pub const SERIALIZED_SIZE: usize = 16;

/// Identity of a handle, usable as a map key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandleKey {
    /// Filesystem id
    pub fs_id: u64,
    /// Inode number
    pub ino: u64,
}

/// Reads the filesystem id and inode number out of a wire handle.
pub fn parse_wire(buf: &[u8]) -> Result<FileHandleKey> {
    if buf.len() != SERIALIZED_SIZE {
        return Err(EfsError::invalid(format!(
            "file handle is {} bytes, expected {}",
            buf.len(),
            SERIALIZED_SIZE
        )));
    }
    let mut fs_id = [0u8; 8];
    let mut ino = [0u8; 8];
    fs_id.copy_from_slice(&buf[..8]);
    ino.copy_from_slice(&buf[8..]);
    Ok(FileHandleKey {
        fs_id: u64::from_le_bytes(fs_id),
        ino: u64::from_le_bytes(ino),
    })
}

/// Handle of one inode. Clones are independent copies sharing the
/// filesystem.
#[derive(Clone)]
pub struct FileHandle {
    fs: Arc<Filesystem>,
    ino: u64,
    stat: Box<Stat>,
    key: FileHandleKey,
}

impl FileHandle {
    /// Builds a handle for `ino`. Attributes are loaded from the store unless
    /// the caller already has them.
    pub fn from_ino(fs: &Arc<Filesystem>, ino: u64, stat: Option<&Stat>) -> Result<Self> {
        let stat = match stat {
            Some(stat) => stat.clone(),
            None => fs.stat(ino)?,
        };
        let fh = Self {
            fs: Arc::clone(fs),
            ino,
            stat: Box::new(stat),
            key: FileHandleKey {
                fs_id: u64::from(fs.id()),
                ino,
            },
        };
        fh.check_invariant();
        Ok(fh)
    }

    /// Handle of the root directory; the caller needs read access to it.
    pub fn get_root(fs: &Arc<Filesystem>, cred: &Cred) -> Result<Self> {
        let fh = Self::from_ino(fs, ROOT_INODE, None)?;
        check_access(cred, &fh.stat, AccessFlags::READ)?;
        Ok(fh)
    }

    /// Resolves `name` in this directory. `..` of the root is the root.
    pub fn lookup(&self, cred: &Cred, name: &str) -> Result<FileHandle> {
        check_access(cred, &self.stat, AccessFlags::READ)?;
        if self.ino == ROOT_INODE && name == ".." {
            return Ok(self.clone());
        }
        let ino = self.fs.lookup_ino(self.ino, name)?;
        assert!(ino >= ROOT_INODE, "lookup resolved to reserved inode {}", ino);
        trace!(parent = self.ino, name, ino, "looked up handle");
        Self::from_ino(&self.fs, ino, None)
    }

    /// Writes the wire form into `buf` and returns the bytes written.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_invariant();
        if buf.len() < SERIALIZED_SIZE {
            return Err(NsalError::NoBuffers {
                needed: SERIALIZED_SIZE,
                available: buf.len(),
            }
            .into());
        }
        buf[..8].copy_from_slice(&self.key.fs_id.to_le_bytes());
        buf[8..SERIALIZED_SIZE].copy_from_slice(&self.ino.to_le_bytes());
        Ok(SERIALIZED_SIZE)
    }

    /// Rebuilds a handle of `fs` from its wire form. A handle minted by
    /// another filesystem is stale.
    pub fn deserialize(fs: &Arc<Filesystem>, buf: &[u8]) -> Result<Self> {
        let key = parse_wire(buf)?;
        if key.fs_id != u64::from(fs.id()) {
            return Err(EfsError::Stale { fs_id: key.fs_id });
        }
        Self::from_ino(fs, key.ino, None)
    }

    /// Size of the wire form.
    pub fn serialized_size() -> usize {
        SERIALIZED_SIZE
    }

    /// Owning filesystem.
    pub fn fs(&self) -> &Arc<Filesystem> {
        &self.fs
    }

    /// Inode number.
    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Attribute copy taken when the handle was built.
    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    /// Identity of the handle.
    pub fn key(&self) -> FileHandleKey {
        self.key
    }

    fn check_invariant(&self) {
        assert!(
            self.ino != 0 && self.stat.ino == self.ino,
            "file handle invariant violated: ino {} stat.ino {}",
            self.ino,
            self.stat.ino
        );
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("key", &self.key)
            .field("mode", &format_args!("{:o}", self.stat.mode))
            .finish()
    }
}

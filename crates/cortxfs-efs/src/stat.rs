//! POSIX-style attributes stored in a node's basic attribute container.

use std::time::{SystemTime, UNIX_EPOCH};

use cortxfs_nsal::NsalError;
use serde::{Deserialize, Serialize};

use crate::access::Cred;
use crate::error::Result;

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;
const S_IFREG: u32 = libc::S_IFREG as u32;
const S_IFLNK: u32 = libc::S_IFLNK as u32;

/// Type of a filesystem object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// Directory
    Directory,
    /// Regular file
    RegularFile,
    /// Symbolic link
    Symlink,
}

impl FileKind {
    /// Format bits of this kind.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileKind::Directory => S_IFDIR,
            FileKind::RegularFile => S_IFREG,
            FileKind::Symlink => S_IFLNK,
        }
    }

    /// Kind encoded in `mode`, if recognized.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFDIR => Some(FileKind::Directory),
            S_IFREG => Some(FileKind::RegularFile),
            S_IFLNK => Some(FileKind::Symlink),
            _ => None,
        }
    }
}

/// Attributes of one inode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Inode number
    pub ino: u64,
    /// Format and permission bits
    pub mode: u32,
    /// Link count
    pub nlink: u32,
    /// Owner
    pub uid: u32,
    /// Owning group
    pub gid: u32,
    /// Size in bytes
    pub size: u64,
    /// Access time, seconds since the epoch
    pub atime: i64,
    /// Modification time
    pub mtime: i64,
    /// Change time
    pub ctime: i64,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Stat {
    /// Attributes of a new object owned by `cred`. `perm` is masked to the
    /// permission bits.
    pub fn new(ino: u64, kind: FileKind, perm: u32, cred: &Cred) -> Self {
        let now = now_secs();
        Self {
            ino,
            mode: kind.mode_bits() | (perm & 0o7777),
            nlink: if kind == FileKind::Directory { 2 } else { 1 },
            uid: cred.uid,
            gid: cred.gid,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// Root directory attributes: world-accessible, owned by root, zero times.
    pub fn root(ino: u64) -> Self {
        Self {
            ino,
            mode: S_IFDIR | 0o777,
            nlink: 2,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }

    /// Kind from the format bits.
    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }

    /// True for directories.
    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Sets the change time to now.
    pub fn touch_ctime(&mut self) {
        self.ctime = now_secs();
    }

    /// Bincode form stored in the node attribute.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| {
            NsalError::Corrupted {
                what: "stat",
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Parses [`Stat::encode`] output.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            NsalError::Corrupted {
                what: "stat",
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#![warn(missing_docs)]

//! CORTX-FS filesystem layer.
//!
//! Filesystems live in NSAL namespaces, endpoints are NSAL tenants and file
//! handles pin an inode of a filesystem.

pub mod access;
pub mod cli;
pub mod error;
pub mod fs;
pub mod fs_registry;
pub mod handle;
pub mod stat;

pub use access::{check_access, AccessFlags, Cred};
pub use error::{EfsError, Result};
pub use fs::{Filesystem, ROOT_INODE};
pub use fs_registry::{FsListEntry, FsRegistry};
pub use handle::{FileHandle, FileHandleKey};
pub use stat::{FileKind, Stat};

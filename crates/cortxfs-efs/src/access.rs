//! POSIX permission checking
//!
//! Owner, group and other permission bits with a root bypass. The owner is
//! always allowed to change attributes of its own objects.

use std::ops::BitOr;

use crate::error::{EfsError, Result};
use crate::stat::Stat;

/// uid with superuser rights.
pub const ROOT_UID: u32 = 0;

/// Requested access, as a set of flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AccessFlags(pub u32);

impl AccessFlags {
    /// Read, or list a directory.
    pub const READ: AccessFlags = AccessFlags(1);
    /// Write, or modify directory entries.
    pub const WRITE: AccessFlags = AccessFlags(2);
    /// Execute, or search a directory.
    pub const EXEC: AccessFlags = AccessFlags(4);
    /// Change attributes.
    pub const SETATTR: AccessFlags = AccessFlags(8);

    /// True if every flag of `other` is set.
    pub fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 | rhs.0)
    }
}

/// Caller credentials.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cred {
    /// User id
    pub uid: u32,
    /// Primary group id
    pub gid: u32,
}

impl Cred {
    /// Credentials of `uid`:`gid`.
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Superuser credentials.
    pub fn root() -> Self {
        Self {
            uid: ROOT_UID,
            gid: 0,
        }
    }

    /// True for the superuser.
    pub fn is_root(&self) -> bool {
        self.uid == ROOT_UID
    }
}

/// Checks `flags` against the mode bits of `stat`.
pub fn check_access(cred: &Cred, stat: &Stat, flags: AccessFlags) -> Result<()> {
    if cred.is_root() {
        return Ok(());
    }

    // (read, write, exec) bits of the class the caller falls into
    let bits = if cred.uid == stat.uid {
        if flags.contains(AccessFlags::SETATTR) {
            return Ok(());
        }
        (0o400, 0o200, 0o100)
    } else if cred.gid == stat.gid {
        (0o040, 0o020, 0o010)
    } else {
        (0o004, 0o002, 0o001)
    };

    let mut check = 0;
    if flags.contains(AccessFlags::READ) {
        check |= bits.0;
    }
    if flags.contains(AccessFlags::WRITE) {
        check |= bits.1;
    }
    if flags.contains(AccessFlags::EXEC) {
        check |= bits.2;
    }

    if stat.mode & check != check {
        return Err(EfsError::PermissionDenied { ino: stat.ino });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::FileKind;

    fn make_stat(perm: u32, uid: u32, gid: u32) -> Stat {
        let mut stat = Stat::new(10, FileKind::RegularFile, perm, &Cred::new(uid, gid));
        stat.uid = uid;
        stat.gid = gid;
        stat
    }

    #[test]
    fn test_root_bypasses_all_checks() {
        let stat = make_stat(0o000, 1000, 1000);
        let flags = AccessFlags::READ | AccessFlags::WRITE | AccessFlags::EXEC;
        assert!(check_access(&Cred::root(), &stat, flags).is_ok());
    }

    #[test]
    fn test_owner_bits() {
        let stat = make_stat(0o600, 1000, 1000);
        let owner = Cred::new(1000, 1000);
        assert!(check_access(&owner, &stat, AccessFlags::READ | AccessFlags::WRITE).is_ok());
        assert!(check_access(&owner, &stat, AccessFlags::EXEC).is_err());
    }

    #[test]
    fn test_owner_may_always_setattr() {
        let stat = make_stat(0o000, 1000, 1000);
        let flags = AccessFlags::SETATTR | AccessFlags::WRITE;
        assert!(check_access(&Cred::new(1000, 1), &stat, flags).is_ok());
        assert!(check_access(&Cred::new(1001, 1), &stat, flags).is_err());
    }

    #[test]
    fn test_group_bits() {
        let stat = make_stat(0o640, 1000, 100);
        let member = Cred::new(2000, 100);
        assert!(check_access(&member, &stat, AccessFlags::READ).is_ok());
        assert!(check_access(&member, &stat, AccessFlags::WRITE).is_err());
    }

    #[test]
    fn test_other_bits() {
        let stat = make_stat(0o751, 1000, 100);
        let other = Cred::new(3000, 300);
        assert!(check_access(&other, &stat, AccessFlags::EXEC).is_ok());
        match check_access(&other, &stat, AccessFlags::READ) {
            Err(EfsError::PermissionDenied { ino }) => assert_eq!(ino, 10),
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[test]
    fn test_owner_class_is_exclusive() {
        // owner without read is denied even when "other" may read
        let stat = make_stat(0o044, 1000, 100);
        assert_eq!(
            check_access(&Cred::new(1000, 100), &stat, AccessFlags::READ)
                .unwrap_err()
                .to_errno(),
            libc::EPERM
        );
    }
}

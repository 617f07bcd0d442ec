//! Errors of the filesystem layer.

use cortxfs_nsal::NsalError;
use thiserror::Error;

/// Filesystem layer error. Each variant maps to one errno.
#[derive(Debug, Error)]
pub enum EfsError {
    /// Error from the namespace layer.
    #[error(transparent)]
    Nsal(#[from] NsalError),

    /// Mode bits deny the requested access.
    #[error("Permission denied for inode {ino}")]
    PermissionDenied {
        /// Inode the check ran against
        ino: u64,
    },

    /// A directory was required.
    #[error("Not a directory: {ino}")]
    NotADirectory {
        /// Inode that is not a directory
        ino: u64,
    },

    /// Directory or filesystem still has entries.
    #[error("Not empty: {name}")]
    NotEmpty {
        /// Directory or filesystem name
        name: String,
    },

    /// Name is taken.
    #[error("Already exists: {name}")]
    AlreadyExists {
        /// Conflicting name
        name: String,
    },

    /// Object does not exist.
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing object
        what: String,
    },

    /// Bad name, id or buffer.
    #[error("Invalid argument: {msg}")]
    InvalidArgument {
        /// Reason
        msg: String,
    },

    /// Handle refers to a filesystem that is not this one.
    #[error("Stale file handle: filesystem {fs_id}")]
    Stale {
        /// Filesystem id carried by the handle
        fs_id: u64,
    },
}

/// Result alias for the filesystem layer.
pub type Result<T> = std::result::Result<T, EfsError>;

impl EfsError {
    /// Builds an [`EfsError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        EfsError::InvalidArgument { msg: msg.into() }
    }

    /// True for every flavour of "does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            EfsError::NotFound { .. } => true,
            EfsError::Nsal(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Maps the error to a POSIX errno value.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            EfsError::Nsal(e) => e.to_errno(),
            EfsError::PermissionDenied { .. } => EPERM,
            EfsError::NotADirectory { .. } => ENOTDIR,
            EfsError::NotEmpty { .. } => ENOTEMPTY,
            EfsError::AlreadyExists { .. } => EEXIST,
            EfsError::NotFound { .. } => ENOENT,
            EfsError::InvalidArgument { .. } => EINVAL,
            EfsError::Stale { .. } => ESTALE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_errnos() {
        assert_eq!(EfsError::PermissionDenied { ino: 2 }.to_errno(), libc::EPERM);
        assert_eq!(EfsError::NotADirectory { ino: 3 }.to_errno(), libc::ENOTDIR);
        assert_eq!(
            EfsError::NotEmpty {
                name: "fs1".into()
            }
            .to_errno(),
            libc::ENOTEMPTY
        );
        assert_eq!(
            EfsError::AlreadyExists {
                name: "fs1".into()
            }
            .to_errno(),
            libc::EEXIST
        );
        assert_eq!(EfsError::Stale { fs_id: 9 }.to_errno(), libc::ESTALE);
        assert_eq!(EfsError::invalid("x").to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_nsal_errors_pass_through() {
        let err: EfsError = NsalError::NoBuffers {
            needed: 16,
            available: 4,
        }
        .into();
        assert_eq!(err.to_errno(), libc::ENOBUFS);

        let err: EfsError = NsalError::not_found("xattr").into();
        assert!(err.is_not_found());
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_display_is_transparent() {
        let inner = NsalError::Range { required: 5 };
        let msg = inner.to_string();
        let err: EfsError = inner.into();
        assert_eq!(err.to_string(), msg);
    }
}

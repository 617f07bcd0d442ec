//! Error types for the namespace abstraction layer.

use thiserror::Error;

/// Errors returned by every NSAL operation.
#[derive(Debug, Error)]
pub enum NsalError {
    /// Malformed argument (bad name, wrong-sized input, unparsable FID).
    #[error("invalid argument: {msg}")]
    InvalidArgument {
        /// What was wrong with the argument
        msg: String,
    },

    /// Record absent on get/delete.
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing record
        what: String,
    },

    /// Allocation failure.
    #[error("out of memory")]
    NoMemory,

    /// Caller-supplied buffer is smaller than the fixed wire size.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    NoBuffers {
        /// Bytes required
        needed: usize,
        /// Bytes supplied by the caller
        available: usize,
    },

    /// Value or listing does not fit the allowed range. `required` carries the
    /// total size the caller needs when it is known.
    #[error("result out of range (required {required} bytes)")]
    Range {
        /// Size in bytes the caller should retry with
        required: usize,
    },

    /// Name exceeds `NAME_MAX`.
    #[error("name too long: {len} > {max}")]
    NameTooLong {
        /// Length of the rejected name
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Payload exceeds a fixed bound.
    #[error("payload too big: {len} > {max}")]
    TooBig {
        /// Length of the rejected payload
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// An index or record with the same identity already exists.
    #[error("{what} already exists")]
    AlreadyExists {
        /// Description of the conflicting object
        what: String,
    },

    /// A stored record does not match its expected layout.
    #[error("corrupted {what}: {reason}")]
    Corrupted {
        /// Record kind
        what: &'static str,
        /// Detail of the mismatch
        reason: String,
    },

    /// Opaque error passed through from the KV backend.
    #[error("kv store error: {0}")]
    Kv(String),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NsalError>;

impl NsalError {
    /// Shorthand for [`NsalError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        NsalError::InvalidArgument { msg: msg.into() }
    }

    /// Shorthand for [`NsalError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        NsalError::NotFound { what: what.into() }
    }

    /// Returns true if this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NsalError::NotFound { .. })
    }

    /// Maps the error to the POSIX errno a filesystem front end reports.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            NsalError::InvalidArgument { .. } => EINVAL,
            NsalError::NotFound { .. } => ENOENT,
            NsalError::NoMemory => ENOMEM,
            NsalError::NoBuffers { .. } => ENOBUFS,
            NsalError::Range { .. } => ERANGE,
            NsalError::NameTooLong { .. } => ENAMETOOLONG,
            NsalError::TooBig { .. } => E2BIG,
            NsalError::AlreadyExists { .. } => EEXIST,
            NsalError::Corrupted { .. } => EIO,
            NsalError::Kv(_) => EIO,
            NsalError::Io(e) => e.raw_os_error().unwrap_or(EIO),
        }
    }
}

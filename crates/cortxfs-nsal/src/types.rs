use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{NsalError, Result};

/// Maximum length of a name (namespace, tenant, xattr, directory entry).
pub const NAME_MAX: usize = 255;

/// 128-bit identifier: KV index FIDs, object ids and node ids.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fid {
    /// High 64 bits
    pub hi: u64,
    /// Low 64 bits
    pub lo: u64,
}

/// Identifier of an object carrying extended attributes.
pub type ObjectId = Fid;

/// Identifier of a node (inode) in a namespace index.
pub type NodeId = Fid;

impl Fid {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Creates a new FID from its two halves.
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    /// Node id of an inode number: the inode goes into the high half.
    pub const fn from_ino(ino: u64) -> Self {
        Self { hi: ino, lo: 0 }
    }

    /// Inode number carried by a node id.
    pub fn as_ino(&self) -> u64 {
        self.hi
    }

    /// Returns a copy with the low 64 bits replaced.
    pub fn with_lo(self, lo: u64) -> Self {
        Self { hi: self.hi, lo }
    }

    /// Returns true for the all-zero FID.
    pub fn is_zero(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    /// Appends the packed little-endian encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.hi.to_le_bytes());
        buf.extend_from_slice(&self.lo.to_le_bytes());
    }

    /// Packed little-endian encoding.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.hi.to_le_bytes());
        out[8..].copy_from_slice(&self.lo.to_le_bytes());
        out
    }

    /// Decodes the first 16 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(NsalError::invalid(format!(
                "fid needs {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let mut hi = [0u8; 8];
        let mut lo = [0u8; 8];
        hi.copy_from_slice(&bytes[0..8]);
        lo.copy_from_slice(&bytes[8..16]);
        Ok(Self {
            hi: u64::from_le_bytes(hi),
            lo: u64::from_le_bytes(lo),
        })
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}", self.hi, self.lo)
    }
}

fn parse_hex_u64(part: &str) -> Result<u64> {
    let part = part.trim();
    let digits = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
        .unwrap_or(part);
    u64::from_str_radix(digits, 16)
        .map_err(|e| NsalError::invalid(format!("bad fid component '{}': {}", part, e)))
}

impl FromStr for Fid {
    type Err = NsalError;

    /// Parses `"<hi>:<lo>"`, both halves hexadecimal with optional `0x`.
    fn from_str(s: &str) -> Result<Self> {
        let (hi, lo) = s
            .split_once(':')
            .ok_or_else(|| NsalError::invalid(format!("fid '{}' is not <hi>:<lo>", s)))?;
        Ok(Self {
            hi: parse_hex_u64(hi)?,
            lo: parse_hex_u64(lo)?,
        })
    }
}

/// Bounded name of at most [`NAME_MAX`] bytes.
///
/// On disk it occupies a fixed 257 bytes: a length byte followed by a
/// zero-padded 256 byte buffer that always keeps a terminator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Str256(String);

impl Str256 {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = 1 + NAME_MAX + 1;

    /// Creates a bounded name, rejecting names longer than [`NAME_MAX`].
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.len() > NAME_MAX {
            return Err(NsalError::NameTooLong {
                len: name.len(),
                max: NAME_MAX,
            });
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty name.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the name is non-empty and ASCII alphanumeric.
    pub fn is_alphanumeric(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    /// Fails with `InvalidArgument` unless [`Str256::is_alphanumeric`] holds.
    pub fn ensure_alphanumeric(&self) -> Result<()> {
        if self.is_alphanumeric() {
            Ok(())
        } else {
            Err(NsalError::invalid(format!(
                "name '{}' must be alphanumeric",
                self.0
            )))
        }
    }

    /// Appends the fixed-size encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.push(self.0.len() as u8);
        buf.extend_from_slice(self.0.as_bytes());
        buf.resize(start + Self::ENCODED_SIZE, 0);
    }

    /// Decodes a fixed-size encoding from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::ENCODED_SIZE {
            return Err(NsalError::invalid(format!(
                "name field needs {} bytes, got {}",
                Self::ENCODED_SIZE,
                bytes.len()
            )));
        }
        let len = bytes[0] as usize;
        let name = std::str::from_utf8(&bytes[1..1 + len])
            .map_err(|e| NsalError::invalid(format!("name is not utf-8: {}", e)))?;
        Ok(Self(name.to_string()))
    }
}

impl fmt::Display for Str256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Str256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FromStr for Str256 {
    type Err = NsalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

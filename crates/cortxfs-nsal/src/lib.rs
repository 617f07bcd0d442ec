#![warn(missing_docs)]

//! CORTX-FS namespace abstraction layer: namespaces, tenants, extended
//! attributes and node attributes encoded as typed keys in a flat KV store.

pub mod config;
pub mod error;
pub mod keys;
pub mod kvnode;
pub mod kvstore;
pub mod namespace;
pub mod nsal;
pub mod tenant;
pub mod types;
pub mod xattr;

pub use config::{KvStoreConfig, NsalConfig};
pub use error::{NsalError, Result};
pub use kvnode::{KvNode, NodeAttr};
pub use kvstore::{KvCursor, KvIndex, KvPair, KvStore, MemoryKvStore};
pub use namespace::{Namespace, NamespaceRegistry, NamespaceScan};
pub use nsal::Nsal;
pub use tenant::{Tenant, TenantRegistry, TenantScan, TENANT_HEADER_SIZE};
pub use types::{Fid, NodeId, ObjectId, Str256, NAME_MAX};
pub use xattr::{XattrListing, XattrStore, MD_XATTR_SIZE_MAX};

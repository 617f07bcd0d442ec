//! Filesystem list and endpoints.
//!
//! Every namespace is a filesystem. An endpoint exports a filesystem and is
//! stored as a tenant that shares the filesystem's name and id.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cortxfs_nsal::{Nsal, NsalError, Str256};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EfsError, Result};
use crate::fs::Filesystem;
use crate::handle::{parse_wire, FileHandle};

/// One row of [`FsRegistry::list`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FsListEntry {
    /// Filesystem id
    pub id: u32,
    /// Filesystem name
    pub name: String,
    /// Endpoint options, if the filesystem is exported.
    pub endpoint: Option<String>,
}

/// Every filesystem of one NSAL, keyed by name.
pub struct FsRegistry {
    nsal: Nsal,
    filesystems: RwLock<BTreeMap<String, Arc<Filesystem>>>,
}

fn lock_err<E: std::fmt::Display>(e: E) -> EfsError {
    NsalError::Kv(format!("lock poisoned: {}", e)).into()
}

impl FsRegistry {
    /// Loads every filesystem from the namespace registry and attaches the
    /// stored endpoints.
    pub fn init(nsal: Nsal) -> Result<Self> {
        let mut filesystems: BTreeMap<String, Arc<Filesystem>> = BTreeMap::new();
        for ns in nsal.namespaces().scan()? {
            let ns = ns?;
            if let Some(kept) = filesystems.get(ns.name().as_str()) {
                warn!(
                    name = %ns.name(),
                    kept = kept.id(),
                    skipped = ns.id(),
                    "duplicate filesystem name"
                );
                continue;
            }
            let fs = Filesystem::open(ns, nsal.kv().as_ref())?;
            filesystems.insert(fs.name().to_string(), Arc::new(fs));
        }
        for tenant in nsal.tenants().scan()? {
            let tenant = tenant?;
            match filesystems.get(tenant.name().as_str()) {
                Some(fs) => fs.set_tenant(Some(tenant)),
                None => warn!(endpoint = %tenant.name(), "endpoint without filesystem"),
            }
        }
        info!(count = filesystems.len(), "filesystems loaded");
        Ok(Self {
            nsal,
            filesystems: RwLock::new(filesystems),
        })
    }

    /// Underlying namespace layer.
    pub fn nsal(&self) -> &Nsal {
        &self.nsal
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Arc<Filesystem>>>> {
        self.filesystems.read().map_err(lock_err)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Arc<Filesystem>>>> {
        self.filesystems.write().map_err(lock_err)
    }

    /// Creates a filesystem: namespace, index and root directory.
    pub fn create_fs(&self, name: &str) -> Result<Arc<Filesystem>> {
        let mut filesystems = self.write()?;
        if filesystems.contains_key(name) {
            return Err(EfsError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let ns = self.nsal.namespaces().create(name)?;
        let fs = match Filesystem::open(ns.clone(), self.nsal.kv().as_ref())
            .and_then(|fs| fs.create_root().map(|_| fs))
        {
            Ok(fs) => Arc::new(fs),
            Err(e) => {
                if let Err(cleanup) = self.nsal.namespaces().delete(&ns) {
                    warn!(name, error = %cleanup, "failed to remove namespace after failed create");
                }
                return Err(e);
            }
        };
        filesystems.insert(name.to_string(), Arc::clone(&fs));
        info!(name, fs_id = fs.id(), "created filesystem");
        Ok(fs)
    }

    /// Deletes an unexported, empty filesystem.
    pub fn delete_fs(&self, name: &str) -> Result<()> {
        let mut filesystems = self.write()?;
        let fs = filesystems.get(name).cloned().ok_or_else(|| EfsError::NotFound {
            what: format!("filesystem {}", name),
        })?;
        if fs.is_exported() {
            return Err(EfsError::invalid(format!(
                "filesystem {} is exported",
                name
            )));
        }
        if !fs.is_empty()? {
            return Err(EfsError::NotEmpty {
                name: name.to_string(),
            });
        }
        self.nsal.namespaces().delete(fs.namespace())?;
        filesystems.remove(name);
        info!(name, fs_id = fs.id(), "deleted filesystem");
        Ok(())
    }

    /// Finds a filesystem by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<Filesystem>> {
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| EfsError::NotFound {
                what: format!("filesystem {}", name),
            })
    }

    /// Finds a filesystem by id.
    pub fn get(&self, fs_id: u64) -> Result<Arc<Filesystem>> {
        self.read()?
            .values()
            .find(|fs| u64::from(fs.id()) == fs_id)
            .cloned()
            .ok_or_else(|| EfsError::NotFound {
                what: format!("filesystem id {}", fs_id),
            })
    }

    /// All filesystems, ordered by name.
    pub fn list(&self) -> Result<Vec<FsListEntry>> {
        Ok(self
            .read()?
            .values()
            .map(|fs| FsListEntry {
                id: fs.id(),
                name: fs.name().to_string(),
                endpoint: fs
                    .tenant()
                    .map(|t| String::from_utf8_lossy(t.options()).into_owned()),
            })
            .collect())
    }

    /// Exports filesystem `name`.
    pub fn create_endpoint(&self, name: &str, options: &[u8]) -> Result<()> {
        let fs = self.lookup(name)?;
        if fs.is_exported() {
            return Err(EfsError::AlreadyExists {
                name: format!("endpoint {}", name),
            });
        }
        let tenant_id = u16::try_from(fs.id()).map_err(|_| {
            EfsError::invalid(format!("filesystem id {} does not fit a tenant id", fs.id()))
        })?;
        let tenant = self.nsal.tenants().create(name, tenant_id, options)?;
        fs.set_tenant(Some(tenant));
        info!(name, tenant_id, "created endpoint");
        Ok(())
    }

    /// Removes the export of filesystem `name`.
    pub fn delete_endpoint(&self, name: &str) -> Result<()> {
        let fs = self.lookup(name)?;
        let tenant = fs.tenant().ok_or_else(|| EfsError::NotFound {
            what: format!("endpoint {}", name),
        })?;
        self.nsal.tenants().delete(&tenant)?;
        fs.set_tenant(None);
        info!(name, "deleted endpoint");
        Ok(())
    }

    /// Rebuilds a handle from its wire form, routing it by filesystem id.
    pub fn handle_from_wire(&self, buf: &[u8]) -> Result<FileHandle> {
        let key = parse_wire(buf)?;
        let fs = match self.get(key.fs_id) {
            Ok(fs) => fs,
            Err(e) if e.is_not_found() => return Err(EfsError::Stale { fs_id: key.fs_id }),
            Err(e) => return Err(e),
        };
        FileHandle::deserialize(&fs, buf)
    }

    /// Checks that `name` would be accepted as a filesystem name.
    pub fn validate_name(name: &str) -> Result<()> {
        Str256::new(name)?.ensure_alphanumeric()?;
        Ok(())
    }

    /// Releases the registry and the NSAL.
    pub fn fini(self) {
        self.nsal.fini();
    }
}

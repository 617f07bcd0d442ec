//! NSAL facade: one KV store, the shared meta index and the registries
//! bound to it.

use std::sync::Arc;

use tracing::info;

use crate::config::NsalConfig;
use crate::error::Result;
use crate::kvstore::KvStore;
use crate::namespace::NamespaceRegistry;
use crate::tenant::TenantRegistry;

/// Initialized namespace abstraction layer.
pub struct Nsal {
    kv: Arc<dyn KvStore>,
    namespaces: NamespaceRegistry,
    tenants: TenantRegistry,
}

impl Nsal {
    /// Opens the meta index and binds both registries to it.
    pub fn init(kv: Arc<dyn KvStore>, config: &NsalConfig) -> Result<Self> {
        let namespaces = NamespaceRegistry::init(Arc::clone(&kv), config)?;
        let tenants = TenantRegistry::module_init(namespaces.meta_index());
        info!(meta = %namespaces.meta_index().fid(), "nsal initialized");
        Ok(Self {
            kv,
            namespaces,
            tenants,
        })
    }

    /// The underlying KV store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Namespace registry.
    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    /// Tenant registry.
    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }

    /// Finalizes the registries.
    pub fn fini(self) {
        self.tenants.module_fini();
        self.namespaces.fini();
        info!("nsal finalized");
    }
}

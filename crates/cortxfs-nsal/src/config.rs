use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::Fid;

/// Settings of the `[kvstore]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvStoreConfig {
    /// FID of the meta index holding namespace and tenant records.
    pub ns_meta_fid: String,
    /// Template for namespace index FIDs; `lo` is replaced by the namespace id.
    pub ns_fid_template: String,
    /// Where the in-memory backend persists its snapshot, if anywhere.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            ns_meta_fid: String::from("0x7800000000000001:0x1"),
            ns_fid_template: String::from("0x7800000000000002:0x0"),
            snapshot_path: None,
        }
    }
}

impl KvStoreConfig {
    /// Parsed meta index FID.
    pub fn meta_fid(&self) -> Result<Fid> {
        self.ns_meta_fid.parse()
    }

    /// Parsed namespace FID template.
    pub fn fid_template(&self) -> Result<Fid> {
        self.ns_fid_template.parse()
    }
}

/// Top-level NSAL configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NsalConfig {
    /// KV store settings
    pub kvstore: KvStoreConfig,
}

impl NsalConfig {
    /// Loads the configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: NsalConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.kvstore.meta_fid()?;
        config.kvstore.fid_template()?;
        Ok(config)
    }
}

//! `cfs-efs` command line.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cortxfs_nsal::{MemoryKvStore, Nsal, NsalConfig};
use tracing::{info, warn};

use crate::fs_registry::FsRegistry;

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "cfs-efs")]
#[command(about = "CORTX-FS filesystem administration", long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "CORTXFS_CONFIG", default_value = "/etc/cortxfs/efs.toml")]
    pub config: PathBuf,

    /// Print listings as JSON.
    #[arg(long)]
    pub json: bool,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Clone)]
pub enum Command {
    /// Manage filesystems.
    Fs {
        /// Filesystem subcommand.
        #[command(subcommand)]
        cmd: FsCmd,
    },
    /// Manage endpoints.
    Endpoint {
        /// Endpoint subcommand.
        #[command(subcommand)]
        cmd: EndpointCmd,
    },
}

/// Filesystem commands.
#[derive(Subcommand, Clone)]
pub enum FsCmd {
    /// Create a filesystem.
    Create {
        /// Alphanumeric filesystem name.
        name: String,
    },
    /// Delete an empty, unexported filesystem.
    Delete {
        /// Filesystem name.
        name: String,
    },
    /// List filesystems.
    List,
}

/// Endpoint commands.
#[derive(Subcommand, Clone)]
pub enum EndpointCmd {
    /// Export a filesystem.
    Create {
        /// Filesystem name.
        name: String,
        /// Opaque endpoint options stored with the export.
        #[arg(short, long, default_value = "")]
        options: String,
    },
    /// Remove the export of a filesystem.
    Delete {
        /// Filesystem name.
        name: String,
    },
    /// List exported filesystems.
    List,
}

fn load_config(path: &Path) -> Result<NsalConfig> {
    if path.exists() {
        NsalConfig::from_file(path)
    } else {
        warn!("Config file not found, using defaults: {}", path.display());
        Ok(NsalConfig::default())
    }
}

fn open_store(config: &NsalConfig) -> Result<Arc<MemoryKvStore>> {
    let store = match &config.kvstore.snapshot_path {
        Some(path) if path.exists() => MemoryKvStore::load_snapshot(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?,
        _ => MemoryKvStore::new(),
    };
    Ok(Arc::new(store))
}

impl Cli {
    /// Loads the store, runs the command and writes the store back.
    pub fn run(self) -> Result<()> {
        let config = load_config(&self.config)?;
        let store = open_store(&config)?;
        let registry = FsRegistry::init(Nsal::init(store.clone(), &config)?)?;

        let stdout = std::io::stdout();
        self.execute(&registry, &mut stdout.lock())?;
        registry.fini();

        match &config.kvstore.snapshot_path {
            Some(path) => store
                .save_snapshot(path)
                .with_context(|| format!("saving snapshot {}", path.display()))?,
            None => info!("no snapshot path configured, changes are not persisted"),
        }
        Ok(())
    }

    /// Runs the command against `registry`, writing output to `out`.
    pub fn execute(&self, registry: &FsRegistry, out: &mut dyn Write) -> Result<()> {
        match &self.command {
            Command::Fs { cmd } => match cmd {
                FsCmd::Create { name } => {
                    let fs = registry.create_fs(name)?;
                    writeln!(out, "created filesystem {} (id {})", name, fs.id())?;
                }
                FsCmd::Delete { name } => {
                    registry.delete_fs(name)?;
                    writeln!(out, "deleted filesystem {}", name)?;
                }
                FsCmd::List => self.list(registry, out, false)?,
            },
            Command::Endpoint { cmd } => match cmd {
                EndpointCmd::Create { name, options } => {
                    registry.create_endpoint(name, options.as_bytes())?;
                    writeln!(out, "created endpoint {}", name)?;
                }
                EndpointCmd::Delete { name } => {
                    registry.delete_endpoint(name)?;
                    writeln!(out, "deleted endpoint {}", name)?;
                }
                EndpointCmd::List => self.list(registry, out, true)?,
            },
        }
        Ok(())
    }

    fn list(&self, registry: &FsRegistry, out: &mut dyn Write, exported_only: bool) -> Result<()> {
        let entries: Vec<_> = registry
            .list()?
            .into_iter()
            .filter(|e| !exported_only || e.endpoint.is_some())
            .collect();

        if self.json {
            writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
            return Ok(());
        }
        for entry in &entries {
            match &entry.endpoint {
                Some(options) => writeln!(out, "{}\t{}\texported\t{}", entry.id, entry.name, options)?,
                None => writeln!(out, "{}\t{}", entry.id, entry.name)?,
            }
        }
        Ok(())
    }
}

//! Startup checks and registry wiring.
//!
//! When lobbyd starts:
//! 1. Verify the config names every plugin it asks for and has a data
//!    directory when anything is stored on disk.
//! 2. Build the registry and register the local and plugin backends.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use lobby_bucket::{RedbBackend, RedbBindings, Registry};
use lobby_rpc::RpcBackend;
use tracing::info;

use crate::config::{Config, RegistryKind};

/// Name the local redb backend is registered under.
pub const REDB_BACKEND: &str = "redb";

/// Verify the configuration before touching the filesystem.
pub fn verify_config(config: &Config) -> anyhow::Result<()> {
    let on_disk = config.registry == RegistryKind::Redb || config.redb.backend;
    if on_disk && config.paths.data_dir.as_os_str().is_empty() {
        anyhow::bail!("paths.data-dir is required when the registry or a backend is stored on disk");
    }

    let mut seen = HashSet::new();
    for name in &config.plugins.backends {
        if name.is_empty() {
            anyhow::bail!("empty plugin backend name");
        }
        if !seen.insert(name.as_str()) {
            anyhow::bail!("plugin backend {:?} listed twice", name);
        }
        if config.redb.backend && name == REDB_BACKEND {
            anyhow::bail!("plugin backend {:?} clashes with the local redb backend", name);
        }
    }

    for name in config.plugins.config.keys() {
        if !seen.contains(name.as_str()) {
            tracing::warn!(plugin = %name, "plugin configured but not listed in plugins.backends");
        }
    }
    Ok(())
}

pub fn registry_path(config: &Config) -> PathBuf {
    config.paths.data_dir.join("registry.redb")
}

pub fn buckets_path(config: &Config) -> PathBuf {
    config.paths.data_dir.join("buckets.redb")
}

/// Build the registry described by `config`. Directories must exist.
pub fn build_registry(config: &Config) -> anyhow::Result<Registry> {
    let registry = match config.registry {
        RegistryKind::Memory => Registry::new(),
        RegistryKind::Redb => {
            let path = registry_path(config);
            let bindings = RedbBindings::open(&path)
                .with_context(|| format!("failed to open registry {}", path.display()))?;
            Registry::with_bindings(Box::new(bindings))?
        }
    };

    if config.redb.backend {
        let path = buckets_path(config);
        let backend = RedbBackend::open(&path)
            .with_context(|| format!("failed to open redb backend {}", path.display()))?;
        registry.register_backend(REDB_BACKEND, Arc::new(backend));
    }

    for (name, address) in config.backend_addresses() {
        let backend = RpcBackend::connect(&address, config.rpc_options(&name))
            .with_context(|| format!("failed to configure plugin {} at {}", name, address))?;
        registry.register_backend(&name, Arc::new(backend));
        info!(plugin = %name, %address, "plugin backend registered");
    }

    Ok(registry)
}

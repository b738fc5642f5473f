//! Server configuration, read from a TOML file.
//!
//! ```toml
//! registry = "redb"
//! [http]
//! port = 5656
//! [paths]
//! data-dir = "/var/lib/lobby"
//! [plugins]
//! backends = ["mem"]
//! [plugins.config.mem]
//! address = "127.0.0.1:7000"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context as _};
use lobby_rpc::RpcOptions;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HTTP_PORT: u16 = 5656;
pub const DEFAULT_GRPC_PORT: u16 = 5657;

/// Where bucket bindings are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// Bindings are lost on restart.
    #[default]
    Memory,
    /// Bindings are stored in `{data-dir}/registry.redb`.
    Redb,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debug: bool,
    pub registry: RegistryKind,
    pub http: HttpConfig,
    pub grpc: GrpcConfig,
    pub redb: RedbConfig,
    pub paths: Paths,
    pub plugins: Plugins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcConfig {
    pub port: u16,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GRPC_PORT,
        }
    }
}

/// Local redb backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedbConfig {
    /// Register a backend named "redb" stored in `{data-dir}/buckets.redb`.
    pub backend: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Paths {
    pub data_dir: PathBuf,
    pub plugin_dir: PathBuf,
    /// Defaults to `{data-dir}/sockets`.
    pub socket_dir: PathBuf,
}

impl Paths {
    pub fn socket_dir(&self) -> PathBuf {
        if self.socket_dir.as_os_str().is_empty() {
            self.data_dir.join("sockets")
        } else {
            self.socket_dir.clone()
        }
    }

    /// Create the data and socket directories if they don't exist.
    pub fn create(&self) -> anyhow::Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            bail!("unspecified data directory");
        }

        for dir in [self.data_dir.clone(), self.socket_dir()] {
            create_dir(&dir)?;
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> anyhow::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => bail!("'{}' is not a valid directory", path.display()),
        Err(_) => std::fs::create_dir_all(path)
            .with_context(|| format!("can't create directory {}", path.display())),
    }
}

/// Backend plugins reached over gRPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Plugins {
    /// Backend names, in registration order.
    pub backends: Vec<String>,
    pub config: BTreeMap<String, PluginConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PluginConfig {
    /// Defaults to `unix:{socket-dir}/{name}.sock`.
    pub address: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

impl Config {
    /// Resolve a config name or path. A bare name maps to
    /// `/etc/lobby/<name>.toml`; anything containing `/` or `.` is a path.
    pub fn resolve_path(name_or_path: &str) -> PathBuf {
        if name_or_path.contains('/') || name_or_path.contains('.') {
            PathBuf::from(name_or_path)
        } else {
            PathBuf::from(format!("/etc/lobby/{}.toml", name_or_path))
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Address of every configured backend plugin, as `(name, address)`.
    pub fn backend_addresses(&self) -> Vec<(String, String)> {
        let socket_dir = self.paths.socket_dir();
        self.plugins
            .backends
            .iter()
            .map(|name| {
                let address = self
                    .plugins
                    .config
                    .get(name)
                    .and_then(|c| c.address.clone())
                    .unwrap_or_else(|| {
                        format!("unix:{}", lobby_rpc::socket_path(&socket_dir, name).display())
                    });
                (name.clone(), address)
            })
            .collect()
    }

    pub fn rpc_options(&self, name: &str) -> RpcOptions {
        let plugin = self.plugins.config.get(name);
        RpcOptions {
            connect_timeout: plugin
                .and_then(|c| c.connect_timeout_ms)
                .map(Duration::from_millis),
            request_timeout: plugin
                .and_then(|c| c.request_timeout_ms)
                .map(Duration::from_millis),
        }
    }
}

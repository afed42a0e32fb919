//! keygrid.toml configuration parser.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a runnable single-process setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("store backend `etcd` requires at least one entry in store.etcd_endpoints")]
    MissingEtcdEndpoints,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygridConfig {
    pub server: ServerConfig,
    pub control: ControlConfig,
    pub proxy: ProxyConfig,
    pub watch: WatchConfig,
    pub node: NodeConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/keygrid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Number of nodes a new tenant resource is split across.
    pub default_cluster_size: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            default_cluster_size: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Ring positions resolved per entry key.
    pub replication_factor: usize,
    /// Maximum number of cached tenant range maps.
    pub cache_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            cache_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Concurrent handler invocations per watch.
    pub worker_threads: usize,
    /// How long `close` waits for in-flight handlers before abandoning them.
    pub close_grace_ms: u64,
}

impl WatchConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            worker_threads: 5,
            close_grace_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Interval between tombstone reaper passes.
    pub tombstone_interval_secs: u64,
}

impl NodeConfig {
    pub fn tombstone_interval(&self) -> Duration {
        Duration::from_secs(self.tombstone_interval_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tombstone_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Etcd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub etcd_endpoints: Vec<String>,
    /// Root prefix prepended to every key in the external store.
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            etcd_endpoints: Vec::new(),
            key_prefix: "keygrid/".to_string(),
        }
    }
}

impl KeygridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KeygridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check hard constraints and collect soft warnings.
    ///
    /// A resolver replication factor that differs from the cluster size used
    /// at creation time is legal but worth surfacing: entries then land on
    /// fewer (or more) distinct nodes than there are ranges.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.control.default_cluster_size == 0 {
            return Err(ConfigError::Zero("control.default_cluster_size"));
        }
        if self.proxy.replication_factor == 0 {
            return Err(ConfigError::Zero("proxy.replication_factor"));
        }
        if self.proxy.cache_capacity == 0 {
            return Err(ConfigError::Zero("proxy.cache_capacity"));
        }
        if self.watch.worker_threads == 0 {
            return Err(ConfigError::Zero("watch.worker_threads"));
        }
        if self.node.tombstone_interval_secs == 0 {
            return Err(ConfigError::Zero("node.tombstone_interval_secs"));
        }
        if self.store.backend == StoreBackend::Etcd && self.store.etcd_endpoints.is_empty() {
            return Err(ConfigError::MissingEtcdEndpoints);
        }

        let mut warnings = Vec::new();
        if self.proxy.replication_factor != self.control.default_cluster_size {
            warnings.push(format!(
                "proxy.replication_factor ({}) differs from control.default_cluster_size ({})",
                self.proxy.replication_factor, self.control.default_cluster_size
            ));
        }
        Ok(warnings)
    }
}

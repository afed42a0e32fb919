pub mod config;

pub use config::{
    ConfigError, ControlConfig, KeygridConfig, NodeConfig, ProxyConfig, ServerConfig,
    StoreBackend, StoreConfig, WatchConfig,
};

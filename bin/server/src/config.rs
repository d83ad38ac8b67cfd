//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional `blockflow.toml` and from
//! environment variables prefixed with `BLOCKFLOW`, using `__` to separate
//! nesting levels (for example `BLOCKFLOW__STORE__BACKEND=nats`).

use blockflow_workflow::nats::NatsConfig;
use blockflow_workflow::{DriverConfig, ExecutorConfig, WorkerConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// Server configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// NATS connection, used by the `nats` store backend.
    #[serde(default)]
    pub nats: NatsConfig,

    /// Where documents and data are stored.
    #[serde(default)]
    pub store: StoreConfig,

    /// Driver settings.
    #[serde(default)]
    pub engine: DriverConfig,

    /// Wake-up consumer settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Block executor endpoints.
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JetStream key-value bucket and work-queue stream.
    Nats,
    /// Local directory with an in-process wake-up channel.
    Fs,
    /// Process memory with an in-process wake-up channel.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use.
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Root directory for the `fs` backend.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Fs
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_root(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `blockflow.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("blockflow").required(false))
            .add_source(
                config::Environment::with_prefix("BLOCKFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

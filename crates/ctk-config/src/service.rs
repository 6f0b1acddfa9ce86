use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Env var named by `store.database_url_env` when the key is absent.
pub const DEFAULT_DATABASE_URL_ENV: &str = "CTK_DATABASE_URL";

/// Collection the app stores dispatch documents in.
pub const DEFAULT_COLLECTION: &str = "dispatches";

/// Typed service configuration. Every section and key has a default, so an
/// empty document yields a working in-memory service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8899)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Postgres => "postgres",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// NAME of the env var holding the database URL. Never the URL itself.
    pub database_url_env: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
            max_connections: 10,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub collection: String,
    /// Run the reactive watcher on the store's change feed.
    pub watch: bool,
    /// Periodic sweep backstop. Absent = sweep only on request.
    pub sweep_interval_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            watch: true,
            sweep_interval_secs: None,
        }
    }
}

impl SyncConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }
}

impl ServiceConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: ServiceConfig =
            serde_json::from_value(v.clone()).context("CONFIG_INVALID: service config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.collection.trim().is_empty() {
            bail!("CONFIG_INVALID: /sync/collection must not be empty");
        }
        if self.sync.sweep_interval_secs == Some(0) {
            bail!("CONFIG_INVALID: /sync/sweep_interval_secs must be > 0 (omit to disable)");
        }
        if self.store.max_connections == 0 {
            bail!("CONFIG_INVALID: /store/max_connections must be > 0");
        }
        if self.store.backend == StoreBackend::Postgres
            && self.store.database_url_env.trim().is_empty()
        {
            bail!("CONFIG_INVALID: /store/database_url_env is required for the postgres backend");
        }
        Ok(())
    }
}

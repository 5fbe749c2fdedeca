use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9090";
pub const DEFAULT_NOTIFY_CHANNEL: &str = "tollgate_policy_changed";
pub const DEFAULT_DOMAIN: &str = "default";
pub const DEFAULT_ADMIN_ROLE: &str = "admin";
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierBackend {
    Local,
    Postgres,
}

impl NotifierBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => bail!("unknown notifier backend: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

// Daemon configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub notifier: NotifierBackend,
    pub notify_channel: String,
    pub default_domain: String,
    pub admin_role: String,
}

#[derive(Debug, Default, Deserialize)]
struct AuthzConfigOverride {
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres_url: Option<String>,
    postgres_max_connections: Option<u32>,
    postgres_acquire_timeout_ms: Option<u64>,
    notifier: Option<String>,
    notify_channel: Option<String>,
    default_domain: Option<String>,
    admin_role: Option<String>,
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind = env_or("TOLLGATE_METRICS_BIND", DEFAULT_METRICS_BIND)
            .parse()
            .with_context(|| "parse TOLLGATE_METRICS_BIND")?;
        let storage = StorageBackend::parse(&env_or("TOLLGATE_STORAGE", "memory"))
            .with_context(|| "parse TOLLGATE_STORAGE")?;
        let notifier = NotifierBackend::parse(&env_or("TOLLGATE_NOTIFIER", "local"))
            .with_context(|| "parse TOLLGATE_NOTIFIER")?;
        let postgres = match std::env::var("TOLLGATE_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_or(
                    "TOLLGATE_POSTGRES_MAX_CONNECTIONS",
                    &DEFAULT_PG_MAX_CONNECTIONS.to_string(),
                )
                .parse()
                .with_context(|| "parse TOLLGATE_POSTGRES_MAX_CONNECTIONS")?,
                acquire_timeout_ms: env_or(
                    "TOLLGATE_POSTGRES_ACQUIRE_TIMEOUT_MS",
                    &DEFAULT_PG_ACQUIRE_TIMEOUT_MS.to_string(),
                )
                .parse()
                .with_context(|| "parse TOLLGATE_POSTGRES_ACQUIRE_TIMEOUT_MS")?,
            }),
            Err(_) => None,
        };
        Ok(Self {
            metrics_bind,
            storage,
            postgres,
            notifier,
            notify_channel: env_or("TOLLGATE_NOTIFY_CHANNEL", DEFAULT_NOTIFY_CHANNEL),
            default_domain: env_or("TOLLGATE_DEFAULT_DOMAIN", DEFAULT_DOMAIN),
            admin_role: env_or("TOLLGATE_ADMIN_ROLE", DEFAULT_ADMIN_ROLE),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("TOLLGATE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read TOLLGATE_CONFIG: {path}"))?;
            let override_cfg: AuthzConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse authz config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: AuthzConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = StorageBackend::parse(&value).with_context(|| "parse storage")?;
        }
        if let Some(value) = override_cfg.notifier {
            self.notifier = NotifierBackend::parse(&value).with_context(|| "parse notifier")?;
        }
        if let Some(url) = override_cfg.postgres_url {
            let postgres = self.postgres.get_or_insert_with(|| PostgresConfig {
                url: String::new(),
                max_connections: DEFAULT_PG_MAX_CONNECTIONS,
                acquire_timeout_ms: DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
            });
            postgres.url = url;
        }
        if let Some(postgres) = self.postgres.as_mut() {
            if let Some(value) = override_cfg.postgres_max_connections {
                postgres.max_connections = value;
            }
            if let Some(value) = override_cfg.postgres_acquire_timeout_ms {
                postgres.acquire_timeout_ms = value;
            }
        }
        if let Some(value) = override_cfg.notify_channel {
            self.notify_channel = value;
        }
        if let Some(value) = override_cfg.default_domain {
            self.default_domain = value;
        }
        if let Some(value) = override_cfg.admin_role {
            self.admin_role = value;
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

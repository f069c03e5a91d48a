use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

/// Where user records live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres { database_url: String, max_connections: u32 },
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub jwt: JwtConfig,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. A missing or blank `JWT_SECRET`
    /// is an error here so the process never starts without a signing key.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;
        if secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let store = match lookup("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                database_url: lookup("DATABASE_URL")
                    .context("DATABASE_URL must be set for the postgres store")?,
                max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            },
            "memory" => StoreBackend::Memory,
            other => bail!("unknown STORE_BACKEND {other:?} (expected postgres or memory)"),
        };

        Ok(Self {
            store,
            jwt: JwtConfig { secret },
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "APP_PORT", 8080)?,
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30)?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}

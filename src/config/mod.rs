use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::analytics::{AnalyticsSettings, CacheSettings, ServerZone};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub analytics: AnalyticsConfig,
    pub cache: CacheConfig,
    pub websocket: WebSocketConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// When set, write-only analytics endpoints require a matching `X-API-Key`
    pub api_key: Option<String>,
    /// `UTC` or a fixed offset such as `+08:00`
    pub timezone: String,
    pub dedup_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
    pub filtered_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub queue_capacity: usize,
    pub pong_wait_secs: u64,
    pub ping_interval_secs: u64,
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Single allowed origin; any origin when unset
    pub allow_origin: Option<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            pong_wait_secs: 60,
            ping_interval_secs: 54,
            max_message_bytes: 512,
        }
    }
}

impl WebSocketConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{value}'")),
        _ => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./folio.db?mode=rwc".to_string());

        let websocket = WebSocketConfig {
            queue_capacity: env_or("WS_QUEUE_CAPACITY", 256)?,
            pong_wait_secs: env_or("WS_PONG_WAIT_SECS", 60)?,
            // Below the pong wait so a ping always lands before the read deadline
            ping_interval_secs: env_or("WS_PING_INTERVAL_SECS", 54)?,
            max_message_bytes: env_or("WS_MAX_MESSAGE_BYTES", 512)?,
        };
        if websocket.ping_interval_secs == 0
            || websocket.ping_interval_secs >= websocket.pong_wait_secs
        {
            anyhow::bail!(
                "WS_PING_INTERVAL_SECS ({}) must be non-zero and below WS_PONG_WAIT_SECS ({})",
                websocket.ping_interval_secs,
                websocket.pong_wait_secs
            );
        }

        let config = Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env_or("SERVER_PORT", 8080)?,
            },
            analytics: AnalyticsConfig {
                api_key: env_opt("ANALYTICS_API_KEY"),
                timezone: std::env::var("SERVER_TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
                dedup_window_secs: env_or("DEDUP_WINDOW_SECS", 30)?,
            },
            cache: CacheConfig {
                max_entries: env_or("CACHE_MAX_ENTRIES", 10_000)?,
                ttl_secs: env_or("CACHE_TTL_SECS", 300)?,
                filtered_ttl_secs: env_or("CACHE_FILTERED_TTL_SECS", 120)?,
            },
            websocket,
            cors: CorsConfig {
                allow_origin: env_opt("CORS_ALLOW_ORIGIN"),
            },
        };

        // Fail at startup rather than on first request
        config.server_zone()?;

        Ok(config)
    }

    pub fn server_zone(&self) -> anyhow::Result<ServerZone> {
        ServerZone::parse(&self.analytics.timezone)
            .map_err(anyhow::Error::msg)
            .context("SERVER_TIMEZONE")
    }

    pub fn analytics_settings(&self) -> anyhow::Result<AnalyticsSettings> {
        Ok(AnalyticsSettings {
            zone: self.server_zone()?,
            dedup_window: Duration::from_secs(self.analytics.dedup_window_secs),
            cache: CacheSettings {
                max_entries: self.cache.max_entries,
                ttl: Duration::from_secs(self.cache.ttl_secs),
                filtered_ttl: Duration::from_secs(self.cache.filtered_ttl_secs),
            },
            queue_capacity: self.websocket.queue_capacity,
        })
    }
}

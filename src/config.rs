//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Secret used to derive session token hashes
    pub auth_secret: String,

    /// Base URL of the auth frontend (used in absolute redirects)
    pub auth_base_url: String,

    /// Origins allowed to issue state-changing requests. Entries may carry a
    /// wildcard subdomain prefix, e.g. `https://*.example.com`.
    pub auth_trusted_origins: Vec<String>,

    /// Header carrying the real client IP behind a proxy
    pub auth_ip_header: Option<String>,

    /// CDN base URL for image renditions
    pub cdn_base_url: Option<String>,

    /// Scheduler tick period
    pub scheduler_tick: Duration,

    /// Base delay for scheduler retry backoff
    pub scheduler_retry_base: Duration,

    /// Maximum execution attempts for a schedule
    pub scheduler_max_attempts: i32,

    /// Outbox publisher batch size
    pub outbox_batch_size: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let auth_secret =
            env::var("AUTH_SECRET").map_err(|_| ConfigError::MissingEnv("AUTH_SECRET"))?;

        let auth_base_url =
            env::var("AUTH_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let auth_trusted_origins = env::var("AUTH_TRUSTED_ORIGINS")
            .map(|v| parse_origins(&v))
            .unwrap_or_default();

        let auth_ip_header = env::var("AUTH_IP_HEADER").ok().filter(|v| !v.is_empty());

        let cdn_base_url = env::var("CDN_BASE_URL").ok().filter(|v| !v.is_empty());

        let scheduler_tick = env::var("SCHEDULER_TICK_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue("SCHEDULER_TICK_SECONDS"))?;

        let scheduler_retry_base = env::var("SCHEDULER_RETRY_BASE_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue("SCHEDULER_RETRY_BASE_MS"))?;

        let scheduler_max_attempts = env::var("SCHEDULER_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SCHEDULER_MAX_ATTEMPTS"))?;

        let outbox_batch_size = env::var("OUTBOX_BATCH_SIZE")
            .unwrap_or_else(|_| "100".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("OUTBOX_BATCH_SIZE"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            auth_secret,
            auth_base_url,
            auth_trusted_origins,
            auth_ip_header,
            cdn_base_url,
            scheduler_tick,
            scheduler_retry_base,
            scheduler_max_attempts,
            outbox_batch_size,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('/').to_string())
        .collect()
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

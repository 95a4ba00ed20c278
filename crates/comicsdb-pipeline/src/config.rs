//! Pipeline configuration
//!
//! Environment-based configuration for the database pool, object storage and
//! the Marvel API client.

use serde::{Deserialize, Serialize};

use crate::storage::StorageConfig;

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Postgres connection string
    pub database_url: String,
    /// Maximum pool connections
    pub max_connections: u32,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Marvel API configuration
    pub marvel: MarvelConfig,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// - `DATABASE_URL`: Postgres connection string (required)
    /// - `DATABASE_MAX_CONNECTIONS`: pool size (default 5)
    /// - storage: see [`StorageConfig::from_env`]
    /// - Marvel API: see [`MarvelConfig::from_env`]
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            database_url,
            max_connections,
            storage: StorageConfig::from_env()?,
            marvel: MarvelConfig::from_env()?,
        })
    }
}

/// Marvel API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarvelConfig {
    /// API base URL
    pub base_url: String,
    /// Public API key
    pub public_key: String,
    /// Private API key (request signing)
    pub private_key: String,
    /// Page size for list requests
    pub page_limit: u32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MarvelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gateway.marvel.com/v1/public/".to_string(),
            public_key: String::new(),
            private_key: String::new(),
            page_limit: 100,
            timeout_secs: 30,
        }
    }
}

impl MarvelConfig {
    /// Load configuration from environment variables
    ///
    /// - `MARVEL_BASE_URL`: API base URL (default: the public gateway)
    /// - `MARVEL_PUBLIC_KEY` / `MARVEL_PRIVATE_KEY`: key pair for signing
    /// - `MARVEL_PAGE_LIMIT`: page size (default 100)
    /// - `MARVEL_TIMEOUT_SECS`: request timeout (default 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MARVEL_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(key) = std::env::var("MARVEL_PUBLIC_KEY") {
            config.public_key = key;
        }
        if let Ok(key) = std::env::var("MARVEL_PRIVATE_KEY") {
            config.private_key = key;
        }
        if let Ok(limit) = std::env::var("MARVEL_PAGE_LIMIT") {
            config.page_limit = limit
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid MARVEL_PAGE_LIMIT: {}", limit))?;
        }
        if let Ok(timeout) = std::env::var("MARVEL_TIMEOUT_SECS") {
            config.timeout_secs = timeout
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid MARVEL_TIMEOUT_SECS: {}", timeout))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marvel_config_defaults() {
        let config = MarvelConfig::default();
        assert_eq!(config.base_url, "https://gateway.marvel.com/v1/public/");
        assert_eq!(config.page_limit, 100);
        assert_eq!(config.timeout_secs, 30);
    }
}

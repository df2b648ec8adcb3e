//! Configuration for the rewards backend

use doc_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Document store
    pub store: StoreConfig,

    /// Leaderboard paging
    pub leaderboard: LeaderboardConfig,

    /// Team assignment rules
    pub teams: TeamConfig,

    /// HTTP surface
    pub http: HttpConfig,

    /// Log output
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "rewards".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreConfig::default(),
            leaderboard: LeaderboardConfig::default(),
            teams: TeamConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Leaderboard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// Page size when the caller gives none
    pub default_page_size: u32,

    /// Largest page a caller may request
    pub max_page_size: u32,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// Team configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// Decimal places of a member's distance share
    pub assignment_precision: u32,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            assignment_precision: 2,
        }
    }
}

/// HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address
    pub listen_addr: String,

    /// Worker threads (0 = one per core)
    pub workers: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            workers: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable output
    pub json: bool,

    /// Default filter directive when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(backend) = std::env::var("REWARDS_STORE_BACKEND") {
            config.store.backend = backend
                .parse()
                .map_err(|e: doc_store::Error| crate::Error::Config(e.to_string()))?;
        }

        if let Ok(data_dir) = std::env::var("REWARDS_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(attempts) = std::env::var("REWARDS_TX_ATTEMPTS") {
            config.store.max_transaction_attempts = parse_env("REWARDS_TX_ATTEMPTS", &attempts)?;
        }

        if let Ok(precision) = std::env::var("REWARDS_ASSIGNMENT_PRECISION") {
            config.teams.assignment_precision =
                parse_env("REWARDS_ASSIGNMENT_PRECISION", &precision)?;
        }

        if let Ok(addr) = std::env::var("REWARDS_HTTP_ADDR") {
            config.http.listen_addr = addr;
        }

        if let Ok(json) = std::env::var("REWARDS_LOG_JSON") {
            config.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the services cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.store.max_transaction_attempts == 0 {
            return Err(crate::Error::Config(
                "store.max_transaction_attempts must be at least 1".to_string(),
            ));
        }
        if self.leaderboard.max_page_size == 0
            || self.leaderboard.default_page_size == 0
            || self.leaderboard.default_page_size > self.leaderboard.max_page_size
        {
            return Err(crate::Error::Config(
                "leaderboard page sizes must satisfy 1 <= default <= max".to_string(),
            ));
        }
        if self.teams.assignment_precision > 6 {
            return Err(crate::Error::Config(
                "teams.assignment_precision must be at most 6".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, value)))
}

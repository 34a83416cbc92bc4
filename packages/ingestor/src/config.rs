//! Runtime Configuration
//!
//! Loads daemon settings from environment variables with sensible defaults.
//! Only the node endpoint and the ABI provider key are required.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::RateLimitPolicy;

/// Default ABI provider endpoint
pub const DEFAULT_ETHERSCAN_API_URL: &str = "https://api.etherscan.io/api";

/// Default price provider endpoint
pub const DEFAULT_COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Default idle wait between poll ticks
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default cooldown after an HTTP 429
pub const DEFAULT_RATE_LIMIT_COOLDOWN_SECS: u64 = 60;

/// Default upper bound for the rate limit backoff
pub const DEFAULT_RATE_LIMIT_MAX_COOLDOWN_SECS: u64 = 600;

/// Default number of 429 retries before a call gives up
pub const DEFAULT_RATE_LIMIT_MAX_RETRIES: u32 = 5;

/// Default length of the active tier window
pub const DEFAULT_ACTIVE_WINDOW_HOURS: u64 = 24;

/// Precision assumed when a token does not answer `decimals()`
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

/// Default HTTP client timeout
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Chain node HTTP endpoint
    pub rpc_url: String,
    /// ABI provider API key
    pub etherscan_api_key: String,
    /// ABI provider base URL
    pub etherscan_api_url: String,
    /// Price provider base URL
    pub coingecko_api_url: String,
    /// SQLite connection string for the ledger
    pub database_url: String,
    /// Wait between poll ticks
    pub poll_interval: Duration,
    /// 429 handling shared by both HTTP providers
    pub rate_limit: RateLimitPolicy,
    /// Age after which an active entry is demoted
    pub active_window: Duration,
    /// Fallback token precision
    pub default_decimals: u8,
    /// Optional bound on the contract metadata cache
    pub metadata_cache_capacity: Option<usize>,
    /// reqwest client timeout
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rpc_url = get("RPC_URL").ok_or(ConfigError::Missing("RPC_URL"))?;
        let etherscan_api_key =
            get("ETHERSCAN_API_KEY").ok_or(ConfigError::Missing("ETHERSCAN_API_KEY"))?;

        let etherscan_api_url =
            get("ETHERSCAN_API_URL").unwrap_or_else(|| DEFAULT_ETHERSCAN_API_URL.to_string());
        let coingecko_api_url =
            get("COINGECKO_API_URL").unwrap_or_else(|| DEFAULT_COINGECKO_API_URL.to_string());
        let database_url = get("DATABASE_URL").unwrap_or_else(default_database_url);

        let poll_secs = parse_or(&get, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let cooldown_secs =
            parse_or(&get, "RATE_LIMIT_COOLDOWN_SECS", DEFAULT_RATE_LIMIT_COOLDOWN_SECS)?;
        let max_cooldown_secs = parse_or(
            &get,
            "RATE_LIMIT_MAX_COOLDOWN_SECS",
            DEFAULT_RATE_LIMIT_MAX_COOLDOWN_SECS,
        )?;
        let max_retries =
            parse_or(&get, "RATE_LIMIT_MAX_RETRIES", DEFAULT_RATE_LIMIT_MAX_RETRIES)?;
        let window_hours = parse_or(&get, "ACTIVE_WINDOW_HOURS", DEFAULT_ACTIVE_WINDOW_HOURS)?;
        let default_decimals = parse_or(&get, "DEFAULT_TOKEN_DECIMALS", DEFAULT_TOKEN_DECIMALS)?;
        let http_timeout_secs = parse_or(&get, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;

        let metadata_cache_capacity = match get("METADATA_CACHE_CAPACITY") {
            Some(raw) => Some(parse_value("METADATA_CACHE_CAPACITY", &raw)?),
            None => None,
        };

        if window_hours == 0 {
            return Err(ConfigError::Invalid {
                key: "ACTIVE_WINDOW_HOURS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            rpc_url,
            etherscan_api_key,
            etherscan_api_url,
            coingecko_api_url,
            database_url,
            poll_interval: Duration::from_secs(poll_secs),
            rate_limit: RateLimitPolicy::new(
                Duration::from_secs(cooldown_secs),
                Duration::from_secs(max_cooldown_secs.max(cooldown_secs)),
                max_retries,
            ),
            active_window: Duration::from_secs(window_hours * 3600),
            default_decimals,
            metadata_cache_capacity,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

/// Ledger database under the user's data directory, falling back to the cwd
fn default_database_url() -> String {
    let dir = dirs::data_dir()
        .map(|d| d.join("tokenflow"))
        .unwrap_or_else(|| PathBuf::from("."));
    format!("sqlite:{}?mode=rwc", dir.join("ledger.db").display())
}

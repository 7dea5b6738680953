//! Storefront client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All variables are optional.
//!
//! - `CARTWHEEL_API_URL` - Backend API root (default: `http://localhost:8080/api`)
//! - `CARTWHEEL_DATA_DIR` - Durable client storage directory (default: `.cartwheel`)
//! - `CARTWHEEL_CACHE_POLICY` - `server-confirmed` (default) or `optimistic-local`
//! - `CARTWHEEL_CATALOG_CACHE_TTL_SECS` - Product catalog cache TTL (default: 300)
//! - `CARTWHEEL_REQUEST_TIMEOUT_SECS` - Per-request network timeout (default: none)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::cache::CachePolicy;

const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_DATA_DIR: &str = ".cartwheel";
const DEFAULT_CATALOG_CACHE_TTL_SECS: u64 = 300;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront client configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Backend API root; endpoint paths are resolved against it
    pub api_url: Url,
    /// Directory holding the session id, cart snapshot and credential
    pub data_dir: PathBuf,
    /// Local cart cache update policy for this process
    pub cache_policy: CachePolicy,
    /// How long catalog responses are cached
    pub catalog_cache_ttl: Duration,
    /// Network-layer request timeout
    pub request_timeout: Option<Duration>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl StorefrontConfig {
    /// Configuration with defaults for everything but the backend and data
    /// directory.
    #[must_use]
    pub fn new(api_url: Url, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_url,
            data_dir: data_dir.into(),
            cache_policy: CachePolicy::default(),
            catalog_cache_ttl: Duration::from_secs(DEFAULT_CATALOG_CACHE_TTL_SECS),
            request_timeout: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = Url::parse(&get_env_or_default(&lookup, "CARTWHEEL_API_URL", DEFAULT_API_URL))
            .map_err(|e| ConfigError::InvalidEnvVar("CARTWHEEL_API_URL".to_string(), e.to_string()))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEnvVar(
                "CARTWHEEL_API_URL".to_string(),
                format!("unsupported scheme '{}'", api_url.scheme()),
            ));
        }

        let data_dir = PathBuf::from(get_env_or_default(&lookup, "CARTWHEEL_DATA_DIR", DEFAULT_DATA_DIR));

        let cache_policy = get_optional_env(&lookup, "CARTWHEEL_CACHE_POLICY")
            .map(|raw| raw.parse::<CachePolicy>())
            .transpose()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("CARTWHEEL_CACHE_POLICY".to_string(), e.to_string())
            })?
            .unwrap_or_default();

        let catalog_cache_ttl = Duration::from_secs(
            get_optional_secs(&lookup, "CARTWHEEL_CATALOG_CACHE_TTL_SECS")?
                .unwrap_or(DEFAULT_CATALOG_CACHE_TTL_SECS),
        );

        let request_timeout = get_optional_secs(&lookup, "CARTWHEEL_REQUEST_TIMEOUT_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            api_url,
            data_dir,
            cache_policy,
            catalog_cache_ttl,
            request_timeout,
            sentry_dsn: get_optional_env(&lookup, "SENTRY_DSN"),
            sentry_environment: get_optional_env(&lookup, "SENTRY_ENVIRONMENT"),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional environment variable. Blank values count as unset.
fn get_optional_env(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    get_optional_env(lookup, key).unwrap_or_else(|| default.to_string())
}

/// Get an optional whole number of seconds.
fn get_optional_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    get_optional_env(lookup, key)
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
        .transpose()
}

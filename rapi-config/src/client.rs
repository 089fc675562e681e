//! Settings shared by every request the API client issues.
//!
//! A [`ClientConfig`] can be assembled three ways:
//! - with [`ClientConfigBuilder`] in code,
//! - from the environment with [`ClientConfig::from_env`] (`API_BASE_URL`,
//!   `API_TIMEOUT_SECS`, `API_RETRIES`; a `.env` file is honoured),
//! - from the `api` section of a YAML document with [`ClientConfig::from_yaml`]:
//!
//! ```yaml
//! api:
//!     base_url: https://dashboard.example.com/api
//!     timeout: 30
//!     connect_timeout: 10
//!     retries: 2
//!     headers:
//!         x-client: dashboard
//!     cache:
//!         capacity: 100
//!         ttl: 300
//!         cleanup_interval: 300
//!     poll_interval_ms: 2000
//! ```
use crate::config::ConfigError;
use derive_builder::Builder;
use std::{collections::BTreeMap, time::Duration};

pub const BASE_URL_ENV: &str = "API_BASE_URL";
pub const TIMEOUT_ENV: &str = "API_TIMEOUT_SECS";
pub const RETRIES_ENV: &str = "API_RETRIES";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_USER_AGENT: &str = concat!("rapi/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Headers sent with every request unless a call overrides them.
/// Names are lowercase so call-site overrides replace them case-insensitively.
pub fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("accept".to_string(), "application/json".to_string()),
        ("content-type".to_string(), "application/json".to_string()),
    ])
}

#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(public, setter(into), build_fn(validate = "Self::validate"))]
pub struct ClientConfig {
    #[builder(default = "DEFAULT_BASE_URL.to_string()")]
    pub base_url: String,
    #[builder(default = "DEFAULT_TIMEOUT")]
    pub timeout: Duration,
    #[builder(default = "DEFAULT_CONNECT_TIMEOUT")]
    pub connect_timeout: Duration,
    #[builder(default = "DEFAULT_RETRIES")]
    pub retries: u32,
    #[builder(default = "DEFAULT_USER_AGENT.to_string()")]
    pub user_agent: String,
    #[builder(default = "default_headers()")]
    pub default_headers: BTreeMap<String, String>,
    #[builder(default = "DEFAULT_CACHE_CAPACITY")]
    pub cache_capacity: usize,
    #[builder(default = "DEFAULT_CACHE_TTL")]
    pub cache_ttl: Duration,
    #[builder(default = "DEFAULT_CLEANUP_INTERVAL")]
    pub cache_cleanup_interval: Duration,
    #[builder(default = "DEFAULT_POLL_INTERVAL")]
    pub poll_interval: Duration,
}

impl ClientConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.base_url {
            Some(url) if !is_http_url(url) => {
                Err(ConfigError::InvalidBaseUrl(url.clone()).to_string())
            }
            _ => Ok(()),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: default_headers(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `API_BASE_URL`, `API_TIMEOUT_SECS` and
    /// `API_RETRIES`. A `.env` file in the working directory is loaded first
    /// when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to load .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(base_url) = lookup(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid(TIMEOUT_ENV, e.to_string()))?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup(RETRIES_ENV) {
            config.retries = raw
                .trim()
                .parse::<u32>()
                .map_err(|e| ConfigError::invalid(RETRIES_ENV, e.to_string()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads the `api` section of a YAML document. Absent keys keep their
    /// defaults, present keys of the wrong type are rejected.
    pub fn from_yaml(api: &serde_yaml::Value) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = api.get("base_url") {
            config.base_url = yaml_str(value, "base_url")?.to_string();
        }
        if let Some(value) = api.get("timeout") {
            config.timeout = Duration::from_secs(yaml_u64(value, "timeout")?);
        }
        if let Some(value) = api.get("connect_timeout") {
            config.connect_timeout =
                Duration::from_secs(yaml_u64(value, "connect_timeout")?);
        }
        if let Some(value) = api.get("retries") {
            config.retries = u32::try_from(yaml_u64(value, "retries")?)
                .map_err(|e| ConfigError::invalid("retries", e.to_string()))?;
        }
        if let Some(value) = api.get("user_agent") {
            config.user_agent = yaml_str(value, "user_agent")?.to_string();
        }
        if let Some(value) = api.get("headers") {
            let headers = value
                .as_mapping()
                .ok_or_else(|| ConfigError::invalid("headers", "expected a mapping"))?;
            for (name, value) in headers {
                let name = yaml_str(name, "headers")?;
                let value = yaml_str(value, "headers")?;
                config
                    .default_headers
                    .insert(name.to_ascii_lowercase(), value.to_string());
            }
        }
        if let Some(cache) = api.get("cache") {
            if let Some(value) = cache.get("capacity") {
                config.cache_capacity = yaml_u64(value, "cache.capacity")? as usize;
            }
            if let Some(value) = cache.get("ttl") {
                config.cache_ttl = Duration::from_secs(yaml_u64(value, "cache.ttl")?);
            }
            if let Some(value) = cache.get("cleanup_interval") {
                config.cache_cleanup_interval =
                    Duration::from_secs(yaml_u64(value, "cache.cleanup_interval")?);
            }
        }
        if let Some(value) = api.get("poll_interval_ms") {
            config.poll_interval =
                Duration::from_millis(yaml_u64(value, "poll_interval_ms")?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_http_url(&self.base_url) {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::invalid("cache.capacity", "must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval_ms", "must be positive"));
        }
        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn yaml_str<'a>(value: &'a serde_yaml::Value, field: &str) -> Result<&'a str, ConfigError> {
    value
        .as_str()
        .ok_or_else(|| ConfigError::invalid(field, "expected a string"))
}

fn yaml_u64(value: &serde_yaml::Value, field: &str) -> Result<u64, ConfigError> {
    value
        .as_u64()
        .ok_or_else(|| ConfigError::invalid(field, "expected a non-negative integer"))
}

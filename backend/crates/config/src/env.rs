use serde::Deserialize;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> ShopsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            host: get_var_or("HOST", "0.0.0.0"),
            port: parse_var_or("PORT", 8080)?,
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the job polling loop and the credential cache.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub poll_interval_secs: u64,
    pub credential_cache_ttl_secs: u64,
    /// Reclaims jobs stuck in progress after this many seconds. Off (`0`) by
    /// default; a non-zero value must exceed the longest job run, otherwise a
    /// live job is handed to a second worker.
    pub stale_job_timeout_secs: u64,
    pub http_max_retries: u32,
    pub http_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            credential_cache_ttl_secs: 300,
            stale_job_timeout_secs: 0,
            http_max_retries: 3,
            http_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> ShopsyncResult<Self> {
        let d = Self::default();
        Ok(Self {
            poll_interval_secs: parse_var_or("WORKER_POLL_INTERVAL_SECS", d.poll_interval_secs)?,
            credential_cache_ttl_secs: parse_var_or(
                "CREDENTIAL_CACHE_TTL_SECS",
                d.credential_cache_ttl_secs,
            )?,
            stale_job_timeout_secs: parse_var_or(
                "STALE_JOB_TIMEOUT_SECS",
                d.stale_job_timeout_secs,
            )?,
            http_max_retries: parse_var_or("HTTP_MAX_RETRIES", d.http_max_retries)?,
            http_timeout_secs: parse_var_or("HTTP_TIMEOUT_SECS", d.http_timeout_secs)?,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn credential_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_cache_ttl_secs)
    }

    pub fn stale_job_timeout(&self) -> Option<Duration> {
        (self.stale_job_timeout_secs > 0).then(|| Duration::from_secs(self.stale_job_timeout_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyConfig {
    pub api_version: String,
    pub bulk_poll_interval_secs: u64,
    pub bulk_max_poll_attempts: u32,
    pub incremental_lookback_days: u32,
    /// Replaces `https://{shop domain}` when set (proxies, tests).
    pub base_url_override: Option<String>,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            api_version: "2024-10".to_string(),
            bulk_poll_interval_secs: 5,
            bulk_max_poll_attempts: 120,
            incremental_lookback_days: 7,
            base_url_override: None,
        }
    }
}

impl ShopifyConfig {
    pub fn from_env() -> ShopsyncResult<Self> {
        let d = Self::default();
        Ok(Self {
            api_version: get_var_or("SHOPIFY_API_VERSION", &d.api_version),
            bulk_poll_interval_secs: parse_var_or(
                "SHOPIFY_BULK_POLL_INTERVAL_SECS",
                d.bulk_poll_interval_secs,
            )?,
            bulk_max_poll_attempts: parse_var_or(
                "SHOPIFY_BULK_MAX_POLL_ATTEMPTS",
                d.bulk_max_poll_attempts,
            )?,
            incremental_lookback_days: parse_var_or(
                "SHOPIFY_INCREMENTAL_LOOKBACK_DAYS",
                d.incremental_lookback_days,
            )?,
            base_url_override: env::var("SHOPIFY_BASE_URL_OVERRIDE")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaConfig {
    pub api_base_url: String,
    pub api_version: String,
    pub page_size: u32,
    pub page_delay_ms: u64,
    pub reporting_delay_days: u32,
    pub incremental_lookback_days: u32,
    pub historical_days: u32,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://graph.facebook.com".to_string(),
            api_version: "v21.0".to_string(),
            page_size: 500,
            page_delay_ms: 100,
            reporting_delay_days: 0,
            incremental_lookback_days: 7,
            historical_days: 365,
        }
    }
}

impl MetaConfig {
    pub fn from_env() -> ShopsyncResult<Self> {
        let d = Self::default();
        Ok(Self {
            api_base_url: get_var_or("META_API_BASE_URL", &d.api_base_url)
                .trim_end_matches('/')
                .to_string(),
            api_version: get_var_or("META_API_VERSION", &d.api_version),
            page_size: parse_var_or("META_PAGE_SIZE", d.page_size)?,
            page_delay_ms: parse_var_or("META_PAGE_DELAY_MS", d.page_delay_ms)?,
            reporting_delay_days: parse_var_or(
                "META_REPORTING_DELAY_DAYS",
                d.reporting_delay_days,
            )?,
            incremental_lookback_days: parse_var_or(
                "META_INCREMENTAL_LOOKBACK_DAYS",
                d.incremental_lookback_days,
            )?,
            historical_days: parse_var_or("META_HISTORICAL_DAYS", d.historical_days)?,
        })
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

fn get_var(key: &str) -> ShopsyncResult<String> {
    env::var(key).map_err(|_| ShopsyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var_or<T>(key: &str, default: T) -> ShopsyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ShopsyncError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

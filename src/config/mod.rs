use std::{fs::File, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CrmTapError, Result};


pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const API_KEY_ENV: &str = "CRMTAP_API_KEY";

pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<ConnectorConfig> {
    let f = File::open(path)?;
    let cfg: ConnectorConfig = serde_yaml::from_reader(f)?;
    cfg.validate()?;
    Ok(cfg)
}

// ================== Public types ==================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub start_date: DateTime<Utc>,
    pub credentials: Credentials,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "credentials_title")]
pub enum Credentials {
    #[serde(rename = "API Key Credentials")]
    ApiKey { api_key: String },
    #[serde(rename = "OAuth Credentials")]
    OAuth {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default)]
        redirect_uri: Option<String>,
        #[serde(default)]
        token_expires: Option<DateTime<Utc>>,
    },
    #[serde(rename = "Private App Credentials")]
    PrivateApp { access_token: String },
}

impl Credentials {
    /// Token sent as `Authorization: Bearer ...`, if these credentials use one.
    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Credentials::ApiKey { .. } => None,
            Credentials::OAuth { access_token, .. } => access_token.as_deref(),
            Credentials::PrivateApp { access_token } => Some(access_token),
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            Credentials::ApiKey { api_key } => Some(api_key),
            _ => None,
        }
    }
}

/// Bounds for the retry loop in [`crate::http::retry::ApiClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    /// Used when a 429 carries no usable `Retry-After`.
    #[serde(default = "default_retry_after_ms")]
    pub default_retry_after_ms: u64,
    #[serde(default = "default_max_server_retries")]
    pub max_server_retries: u32,
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn default_retry_after(&self) -> Duration {
        Duration::from_millis(self.default_retry_after_ms)
    }

    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.min_backoff_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: default_max_rate_limit_retries(),
            default_retry_after_ms: default_retry_after_ms(),
            max_server_retries: default_max_server_retries(),
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_max_rate_limit_retries() -> u32 {
    5
}
fn default_retry_after_ms() -> u64 {
    60_000
}
fn default_max_server_retries() -> u32 {
    6
}
fn default_min_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    8_000
}

// ================== Validation & overrides ==================

impl ConnectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(CrmTapError::ConfigError(
                "page_size must be greater than zero".into(),
            ));
        }
        url::Url::parse(&self.base_url)?;
        match &self.credentials {
            Credentials::ApiKey { api_key } if api_key.trim().is_empty() => Err(
                CrmTapError::ConfigError("api_key must not be empty".into()),
            ),
            Credentials::PrivateApp { access_token } if access_token.trim().is_empty() => Err(
                CrmTapError::ConfigError("access_token must not be empty".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Replace the configured API key with `CRMTAP_API_KEY` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.credentials = Credentials::ApiKey { api_key: key };
            }
        }
    }
}

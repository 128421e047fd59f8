pub mod fetcher;
pub mod retry;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;

use crate::config::Credentials;
use crate::errors::Result;

/// Query parameters in the order they are put on the URL.
pub type QueryParams = IndexMap<String, String>;

/// Issues a GET against an API path and returns the decoded JSON body.
///
/// [`retry::ApiClient`] is the production implementation; the pagination and
/// merge code only ever talk to this trait.
#[async_trait]
pub trait Getter: Send + Sync {
    async fn get(&self, path: &str, params: &QueryParams) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct Http {
    headers: Option<IndexMap<String, String>>,
    bearer_auth: Option<String>,
}

impl Http {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_credentials(credentials: &Credentials) -> Self {
        let http = Self::new().header("accept", "application/json");
        match credentials.bearer_token() {
            Some(token) => http.bearer_auth(token),
            None => http,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let map = self.headers.get_or_insert_with(IndexMap::new);
        map.insert(key.into(), value.into());
        self
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.bearer_auth = Some(token.into());
        self
    }

    pub fn build_client(&self) -> Client {
        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(header_map) = &self.headers {
            for (key, value) in header_map {
                if let (Ok(name), Ok(val)) = (
                    reqwest::header::HeaderName::from_bytes(key.as_bytes()),
                    reqwest::header::HeaderValue::from_str(value),
                ) {
                    headers.insert(name, val);
                }
            }
        }
        if let Some(token) = &self.bearer_auth {
            match reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut header_value) => {
                    header_value.set_sensitive(true);
                    headers.insert(reqwest::header::AUTHORIZATION, header_value);
                }
                Err(_) => {
                    warn!("invalid characters in bearer token, skipping authorization header");
                }
            }
        }

        Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(std::time::Duration::from_secs(90)))
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}

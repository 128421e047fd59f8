use async_trait::async_trait;
use http::Extensions;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Request, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, Result as MwResult};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::{RetryDecision, RetryPolicy};
use serde_json::Value;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, debug_span, info, warn, Instrument};
use url::Url;

use crate::config::{ConnectorConfig, RetryConfig};
use crate::errors::{classify_error_body, error_in_success_body, CrmTapError, Result};
use crate::http::{Getter, Http, QueryParams};

/// Attempt number of the request currently going through the middleware stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct Attempt(pub u32);

struct AttemptLogger;

#[async_trait]
impl Middleware for AttemptLogger {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> MwResult<Response> {
        let attempt = extensions.get::<Attempt>().map(|a| a.0).unwrap_or(1);

        let method = req.method().clone();
        let url = req.url().clone();
        let t0 = Instant::now();
        debug!("→ attempt #{attempt} {method} {}", url.path());

        let res = next.run(req, extensions).await;

        match &res {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    "← attempt #{attempt} {} {} in {:?}",
                    resp.status(),
                    url.path(),
                    t0.elapsed()
                );
            }
            Ok(resp) => {
                info!(
                    "← attempt #{attempt} {} {} in {:?}",
                    resp.status(),
                    url.path(),
                    t0.elapsed()
                );
            }
            Err(err) => {
                warn!("⇠ attempt #{attempt} error after {:?}: {err}", t0.elapsed());
            }
        }
        res
    }
}

pub fn build_client_with_logging(reqwest_client: Client) -> ClientWithMiddleware {
    ClientBuilder::new(reqwest_client).with(AttemptLogger).build()
}

/// Read `Retry-After` as whole seconds; zero and unparsable values count as absent.
pub fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_retry_after)
}

/// Delay-seconds form only. Values that do not fit a `Duration` are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// HTTP client for the CRM API with bounded retries on 429 and 5xx.
#[derive(Clone)]
pub struct ApiClient {
    client: ClientWithMiddleware,
    base_url: Url,
    api_key: Option<String>,
    retry: RetryConfig,
    backoff: ExponentialBackoff,
}

impl ApiClient {
    pub fn new(base_url: &str, http: &Http, api_key: Option<String>, retry: RetryConfig) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let backoff = ExponentialBackoff::builder()
            .retry_bounds(retry.min_backoff(), retry.max_backoff())
            .build_with_max_retries(retry.max_server_retries);

        Ok(Self {
            client: build_client_with_logging(http.build_client()),
            base_url,
            api_key,
            retry,
            backoff,
        })
    }

    pub fn from_config(cfg: &ConnectorConfig) -> Result<Self> {
        let http = Http::from_credentials(&cfg.credentials);
        Self::new(
            &cfg.base_url,
            &http,
            cfg.credentials.api_key().map(str::to_string),
            cfg.retry.clone(),
        )
    }

    /// Send a GET to `path` and return its JSON body.
    ///
    /// 429 is retried after `Retry-After` (or the configured default), 5xx
    /// after an exponential backoff. Other failures are classified from the
    /// error body and returned without retrying.
    pub async fn execute(&self, path: &str, params: &QueryParams) -> Result<Value> {
        let url = self.base_url.join(path)?;
        let span = debug_span!("http.request", method = "GET", path = %url.path(), query_len = params.len());

        self.send_with_retry(&url, params).instrument(span).await
    }

    async fn send_with_retry(&self, url: &Url, params: &QueryParams) -> Result<Value> {
        let started = SystemTime::now();
        let mut attempt = 0u32;
        let mut rate_limited = 0u32;
        let mut server_failures = 0u32;

        loop {
            attempt += 1;
            let mut req = self
                .client
                .get(url.clone())
                .query(&params.iter().collect::<Vec<_>>())
                .with_extension(Attempt(attempt));
            if let Some(key) = &self.api_key {
                req = req.query(&[("hapikey", key.as_str())]);
            }

            let resp = req.send().await?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if rate_limited >= self.retry.max_rate_limit_retries {
                    return Err(CrmTapError::RateLimitExceeded {
                        url: url.path().to_string(),
                        attempts: attempt,
                    });
                }
                rate_limited += 1;
                let delay = retry_after(&resp).unwrap_or_else(|| self.retry.default_retry_after());
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status.is_server_error() {
                match self.backoff.should_retry(started, server_failures) {
                    RetryDecision::Retry { execute_after } => {
                        server_failures += 1;
                        let delay = execute_after
                            .duration_since(SystemTime::now())
                            .unwrap_or_default();
                        warn!(
                            attempt,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis() as u64,
                            "server error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    RetryDecision::DoNotRetry => {
                        return Err(CrmTapError::ServerError {
                            status: status.as_u16(),
                            url: url.path().to_string(),
                            attempts: attempt,
                        });
                    }
                }
            }

            break parse_and_handle_errors(resp).await;
        }
    }
}

async fn parse_and_handle_errors(resp: Response) -> Result<Value> {
    let status = resp.status();
    let bytes = resp.bytes().await?;

    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes);
        return Err(classify_error_body(status.as_u16(), &body));
    }

    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    let value: Value = serde_json::from_slice(&bytes)?;
    match error_in_success_body(status.as_u16(), &value) {
        Some(err) => Err(err),
        None => Ok(value),
    }
}

#[async_trait]
impl Getter for ApiClient {
    async fn get(&self, path: &str, params: &QueryParams) -> Result<Value> {
        self.execute(path, params).await
    }
}

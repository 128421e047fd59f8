// src/errors/mod.rs
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Main error type for crmtap operations
#[derive(Error, Debug)]
pub enum CrmTapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Date parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pagination error: {0}")]
    PaginationError(String),

    #[error("Rate limit exceeded for {url} after {attempts} attempts")]
    RateLimitExceeded { url: String, attempts: u32 },

    #[error("Server error {status} for {url} after {attempts} attempts")]
    ServerError {
        status: u16,
        url: String,
        attempts: u32,
    },

    #[error("Permission denied: {message}")]
    PermissionDenied {
        message: String,
        correlation_id: Option<String>,
    },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Writer error: {0}")]
    WriterError(String),
}

impl CrmTapError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CrmTapError::PermissionDenied { .. })
    }
}

/// Convenience Result type that uses CrmTapError
pub type Result<T> = std::result::Result<T, CrmTapError>;

/// Structured error body returned by the CRM API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub status: Option<String>,
    pub message: String,
    #[serde(default, rename = "correlationId")]
    pub correlation_id: Option<String>,
}

impl ApiErrorBody {
    /// The upstream phrases missing-scope failures as
    /// "... does not have proper permissions! (requires any of [...])".
    pub fn is_missing_scopes(&self) -> bool {
        let msg = self.message.to_lowercase();
        msg.contains("permissions") && msg.contains("requires")
    }

    pub fn is_error_status(&self) -> bool {
        self.status.as_deref() == Some("error")
    }
}

/// Turn a non-success body into an error variant.
///
/// Bodies that decode as [`ApiErrorBody`] and name missing scopes become
/// `PermissionDenied`; everything else is a generic `ApiError` carrying the
/// decoded message, or the raw body when it has no usable shape.
pub fn classify_error_body(status: u16, body: &str) -> CrmTapError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) if parsed.is_missing_scopes() => CrmTapError::PermissionDenied {
            message: parsed.message,
            correlation_id: parsed.correlation_id,
        },
        Ok(parsed) => CrmTapError::ApiError {
            status,
            message: parsed.message,
        },
        Err(_) => CrmTapError::ApiError {
            status,
            message: body.trim().to_string(),
        },
    }
}

/// A 2xx body can still carry `"status": "error"`; returns the classified
/// error in that case.
pub fn error_in_success_body(status: u16, body: &Value) -> Option<CrmTapError> {
    let parsed = ApiErrorBody::deserialize(body).ok()?;
    if !parsed.is_error_status() {
        return None;
    }
    Some(if parsed.is_missing_scopes() {
        CrmTapError::PermissionDenied {
            message: parsed.message,
            correlation_id: parsed.correlation_id,
        }
    } else {
        CrmTapError::ApiError {
            status,
            message: parsed.message,
        }
    })
}

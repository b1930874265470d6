//! Failure taxonomy for remote backend calls.

use reqwest::header::HeaderMap;
use serde::Deserialize;
use toolsuite_core::{ErrorKind, ToolFailure};

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur when calling a remote service.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Credential or account setting absent from the configuration.
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    /// Authentication failed.
    #[error("Authentication failed (status {status}): {message}")]
    Authentication { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Rate limited.
    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Connection failure, gateway error or timeout.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// Argument accepted by the schema but rejected by the backend's own rules.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Client could not be constructed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredential(_) | Self::Authentication { .. } => ErrorKind::AuthError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient(_) => ErrorKind::TransientNetworkError,
            Self::InvalidInput(_) => ErrorKind::ValidationError,
            Self::Api { .. } | Self::Decode(_) | Self::InvalidUrl(_) => ErrorKind::BackendError,
            Self::Config(_) => ErrorKind::InternalError,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Classify a non-success response.
    pub fn from_response(status: u16, headers: &HeaderMap, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            403 if header_value(headers, "x-ratelimit-remaining").as_deref() == Some("0") => {
                Self::RateLimited {
                    retry_after_secs: retry_after(headers),
                }
            }
            401 | 403 => Self::Authentication { status, message },
            404 => Self::NotFound(message),
            429 => Self::RateLimited {
                retry_after_secs: retry_after(headers),
            },
            502..=504 => Self::Transient(format!("status {}: {}", status, message)),
            _ => Self::Api { status, message },
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient(format!("request timed out: {}", err))
        } else if err.is_connect() {
            Self::Transient(format!("connection failed: {}", err))
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

impl From<BackendError> for ToolFailure {
    fn from(err: BackendError) -> Self {
        let failure = ToolFailure::new(err.kind(), err.to_string());
        match err {
            BackendError::RateLimited {
                retry_after_secs: Some(secs),
            } => failure.with_details(serde_json::json!({ "retry_after_secs": secs })),
            _ => failure,
        }
    }
}

/// Error bodies from GitHub, Sentry and OpenWeatherMap carry one of these.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "detail", alias = "error")]
    message: Option<String>,
}

fn extract_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { message: Some(m) }) => m,
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.chars().take(512).collect(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// Seconds to wait from `retry-after`, or from GitHub's `x-ratelimit-reset` epoch.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<u64> {
    if let Some(secs) = header_value(headers, "retry-after").and_then(|v| v.parse().ok()) {
        return Some(secs);
    }
    let reset: i64 = header_value(headers, "x-ratelimit-reset")?.parse().ok()?;
    let now = chrono::Utc::now().timestamp();
    Some(reset.saturating_sub(now).max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_status_classification() {
        let none = HeaderMap::new();
        assert_eq!(BackendError::from_response(401, &none, "").kind(), ErrorKind::AuthError);
        assert_eq!(BackendError::from_response(403, &none, "").kind(), ErrorKind::AuthError);
        assert_eq!(BackendError::from_response(404, &none, "").kind(), ErrorKind::NotFound);
        assert_eq!(BackendError::from_response(429, &none, "").kind(), ErrorKind::RateLimited);
        assert_eq!(
            BackendError::from_response(503, &none, "").kind(),
            ErrorKind::TransientNetworkError
        );
        assert_eq!(BackendError::from_response(500, &none, "").kind(), ErrorKind::BackendError);
        assert_eq!(BackendError::from_response(422, &none, "").kind(), ErrorKind::BackendError);
    }

    #[test]
    fn test_exhausted_quota_403_is_rate_limited() {
        let err = BackendError::from_response(
            403,
            &headers(&[("x-ratelimit-remaining", "0"), ("retry-after", "42")]),
            r#"{"message": "API rate limit exceeded"}"#,
        );
        match err {
            BackendError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, Some(42)),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn test_message_extraction() {
        let none = HeaderMap::new();
        let gh = BackendError::from_response(422, &none, r#"{"message": "Validation Failed"}"#);
        assert!(gh.to_string().contains("Validation Failed"));

        let sentry = BackendError::from_response(400, &none, r#"{"detail": "Invalid query"}"#);
        assert!(sentry.to_string().contains("Invalid query"));

        let plain = BackendError::from_response(500, &none, "upstream exploded");
        assert!(plain.to_string().contains("upstream exploded"));
    }

    #[test]
    fn test_into_tool_failure() {
        let failure: ToolFailure = BackendError::RateLimited {
            retry_after_secs: Some(7),
        }
        .into();
        assert_eq!(failure.kind, ErrorKind::RateLimited);
        assert_eq!(failure.details, Some(serde_json::json!({"retry_after_secs": 7})));

        let failure: ToolFailure = BackendError::MissingCredential("GITHUB_TOKEN").into();
        assert_eq!(failure.kind, ErrorKind::AuthError);
        assert!(failure.message.contains("GITHUB_TOKEN"));
    }
}

use std::time::Duration;

use engage_core::FailureClass;
use thiserror::Error;

/// Errors returned by the Reddit API client.
#[derive(Debug, Error)]
pub enum RedditError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 429 or a `RATELIMIT` entry in a reply response.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// 401, a rejected refresh token, or an `INVALID_TOKEN`/`USER_REQUIRED`
    /// reply error.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-2xx response.
    #[error("Reddit returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The reply endpoint accepted the request but reported an error in
    /// `json.errors` (locked thread, deleted parent, text too long, ...).
    #[error("Reddit rejected the request: {code}: {message}")]
    Rejected { code: String, message: String },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The attached request gate stopped admitting requests.
    #[error("request gate closed")]
    GateClosed,
}

/// Reply error codes that mean the posting credential is unusable.
const AUTH_ERROR_CODES: &[&str] = &["USER_REQUIRED", "INVALID_TOKEN", "BANNED_FROM_SUBREDDIT"];

impl RedditError {
    /// Builds the error for one entry of a reply response's `json.errors`.
    pub(crate) fn from_reply_error(code: &str, message: &str) -> Self {
        if code == "RATELIMIT" {
            return RedditError::RateLimited {
                message: message.to_string(),
                retry_after: crate::ratelimit::parse_rate_limit_hint(message),
            };
        }
        if AUTH_ERROR_CODES.contains(&code) {
            return RedditError::Unauthorized(format!("{code}: {message}"));
        }
        RedditError::Rejected {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Maps the error onto the pipeline-wide failure taxonomy.
    #[must_use]
    pub fn classify(&self) -> FailureClass {
        match self {
            RedditError::Http(e) => {
                if e.is_builder() {
                    FailureClass::Validation
                } else {
                    e.status().map_or(FailureClass::Transient, classify_status)
                }
            }
            RedditError::RateLimited { retry_after, .. } => FailureClass::RateLimited(*retry_after),
            RedditError::Unauthorized(_) => FailureClass::Auth,
            RedditError::Status { status, .. } => classify_status_code(*status),
            RedditError::Rejected { .. }
            | RedditError::Deserialize { .. }
            | RedditError::InvalidBaseUrl(_)
            | RedditError::GateClosed => FailureClass::Validation,
        }
    }

    /// Whether the read path should retry after a back-off delay.
    ///
    /// **Retriable:** timeouts, connection failures, 5xx, 429.
    /// **Not retriable:** auth failures, other 4xx, malformed bodies.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.classify().is_retriable()
    }

    /// `true` for 403/404 on a single resource: the item is gone or private
    /// and should be skipped, not reported.
    #[must_use]
    pub fn is_missing_resource(&self) -> bool {
        matches!(self, RedditError::Status { status: 403 | 404, .. })
    }
}

fn classify_status(status: reqwest::StatusCode) -> FailureClass {
    classify_status_code(status.as_u16())
}

fn classify_status_code(status: u16) -> FailureClass {
    match status {
        429 => FailureClass::RateLimited(None),
        401 | 403 => FailureClass::Auth,
        408 | 500..=599 => FailureClass::Transient,
        _ => FailureClass::Validation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratelimit_reply_error_carries_parsed_hint() {
        let err = RedditError::from_reply_error(
            "RATELIMIT",
            "Looks like you've been doing that a lot. Take a break for 4 minutes before trying again.",
        );
        assert_eq!(
            err.classify(),
            FailureClass::RateLimited(Some(Duration::from_secs(240)))
        );
    }

    #[test]
    fn token_reply_errors_are_auth() {
        let err = RedditError::from_reply_error("USER_REQUIRED", "Please log in to do that.");
        assert_eq!(err.classify(), FailureClass::Auth);
    }

    #[test]
    fn other_reply_errors_are_validation() {
        let err = RedditError::from_reply_error("THREAD_LOCKED", "that thread is locked");
        assert_eq!(err.classify(), FailureClass::Validation);
        assert!(!err.is_retriable());
    }

    #[test]
    fn status_codes_map_to_classes() {
        let status = |s: u16| RedditError::Status {
            status: s,
            body: String::new(),
        };
        assert_eq!(status(503).classify(), FailureClass::Transient);
        assert_eq!(status(429).classify(), FailureClass::RateLimited(None));
        assert_eq!(status(401).classify(), FailureClass::Auth);
        assert_eq!(status(422).classify(), FailureClass::Validation);
        assert!(status(502).is_retriable());
        assert!(!status(400).is_retriable());
    }

    #[test]
    fn missing_resource_detection() {
        let gone = RedditError::Status {
            status: 404,
            body: String::new(),
        };
        let broken = RedditError::Status {
            status: 500,
            body: String::new(),
        };
        assert!(gone.is_missing_resource());
        assert!(!broken.is_missing_resource());
    }

    #[test]
    fn deserialize_error_is_not_retriable() {
        let src = serde_json::from_str::<()>("invalid").unwrap_err();
        let err = RedditError::Deserialize {
            context: "test".to_owned(),
            source: src,
        };
        assert!(!err.is_retriable());
    }
}

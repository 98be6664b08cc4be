use std::time::Duration;

use engage_core::FailureClass;
use thiserror::Error;

/// Errors returned by language-model calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the provider.
    #[error("LLM provider returned status {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// 2xx response without any usable content.
    #[error("LLM response had no content")]
    EmptyResponse,

    /// The model declined to answer.
    #[error("LLM refused: {0}")]
    Refused(String),

    /// The content did not match the expected shape.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

impl LlmError {
    /// Maps the error onto the pipeline-wide failure taxonomy.
    #[must_use]
    pub fn classify(&self) -> FailureClass {
        match self {
            LlmError::Http(e) if e.is_builder() => FailureClass::Validation,
            LlmError::Http(_) => FailureClass::Transient,
            LlmError::Status {
                status,
                retry_after,
                ..
            } => match status {
                429 => FailureClass::RateLimited(*retry_after),
                401 | 403 => FailureClass::Auth,
                408 | 500..=599 => FailureClass::Transient,
                _ => FailureClass::Validation,
            },
            LlmError::EmptyResponse
            | LlmError::Refused(_)
            | LlmError::Deserialize { .. }
            | LlmError::InvalidBaseUrl(_) => FailureClass::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> LlmError {
        LlmError::Status {
            status: code,
            body: String::new(),
            retry_after: None,
        }
    }

    #[test]
    fn status_codes_map_to_classes() {
        assert_eq!(status(429).classify(), FailureClass::RateLimited(None));
        assert_eq!(status(500).classify(), FailureClass::Transient);
        assert_eq!(status(401).classify(), FailureClass::Auth);
        assert_eq!(status(400).classify(), FailureClass::Validation);
    }

    #[test]
    fn malformed_output_is_validation() {
        let source = serde_json::from_str::<()>("{").unwrap_err();
        let err = LlmError::Deserialize {
            context: "score batch".to_string(),
            source,
        };
        assert_eq!(err.classify(), FailureClass::Validation);
    }
}

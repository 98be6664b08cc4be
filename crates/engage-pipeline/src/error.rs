use engage_core::FailureClass;
use engage_db::DbError;
use engage_llm::LlmError;
use engage_reddit::RedditError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("Reddit error: {0}")]
    Reddit(#[from] RedditError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// A model response that parsed but broke the batch contract.
    #[error("invalid model response: {0}")]
    Validation(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("rate limiter closed")]
    LimiterClosed,
}

impl PipelineError {
    /// Maps the error onto the pipeline-wide failure taxonomy.
    #[must_use]
    pub fn classify(&self) -> FailureClass {
        match self {
            PipelineError::Reddit(e) => e.classify(),
            PipelineError::Llm(e) => e.classify(),
            PipelineError::Db(DbError::InvalidTransition { .. }) => FailureClass::Duplicate,
            PipelineError::Db(_) | PipelineError::Notify(_) | PipelineError::LimiterClosed => {
                FailureClass::Transient
            }
            PipelineError::Validation(_) | PipelineError::Io { .. } => FailureClass::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reddit_errors_keep_their_class() {
        let err = PipelineError::from(RedditError::RateLimited {
            message: "take a break for 4 minutes".to_string(),
            retry_after: Some(Duration::from_secs(240)),
        });
        assert_eq!(
            err.classify(),
            FailureClass::RateLimited(Some(Duration::from_secs(240)))
        );
    }

    #[test]
    fn lost_transition_race_is_duplicate() {
        let err = PipelineError::from(DbError::InvalidTransition {
            id: 3,
            expected_status: "scheduled",
        });
        assert_eq!(err.classify(), FailureClass::Duplicate);
    }

    #[test]
    fn validation_is_not_retriable() {
        assert!(!PipelineError::Validation("missing item 4".to_string())
            .classify()
            .is_retriable());
    }
}

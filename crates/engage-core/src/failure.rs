use std::fmt;
use std::time::Duration;

/// How a failed external call should be treated by its caller.
///
/// Every client error is mapped onto exactly one class; the posting state
/// machine and the ingest retry loop decide what to do from the class alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, connection failures, 5xx. Safe to retry with back-off.
    Transient,
    /// The platform asked us to slow down. Carries the wait it requested, if
    /// one could be read from the response.
    RateLimited(Option<Duration>),
    /// Malformed input or output, or a request the platform refuses for good
    /// (locked thread, deleted parent). Retrying will not help.
    Validation,
    /// Credentials missing, revoked, or refresh rejected.
    Auth,
    /// The target already exists. Not an error for idempotent writes.
    Duplicate,
}

impl FailureClass {
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::RateLimited(_))
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Transient => f.write_str("transient"),
            FailureClass::RateLimited(Some(wait)) => {
                write!(f, "rate limited ({}s)", wait.as_secs())
            }
            FailureClass::RateLimited(None) => f.write_str("rate limited"),
            FailureClass::Validation => f.write_str("validation"),
            FailureClass::Auth => f.write_str("auth"),
            FailureClass::Duplicate => f.write_str("duplicate"),
        }
    }
}

//! Pure outcome → transition rules for a posting attempt.
//!
//! Nothing here touches the database or the clock; callers pass `now` and
//! apply the returned [`Transition`] with a guarded update.

use std::time::Duration;

use chrono::{DateTime, Utc};
use engage_core::FailureClass;

/// Attempts after which a transiently failing interaction gives up.
pub const MAX_ATTEMPTS: i32 = 3;

/// Wait used when a rate-limit response carries no parseable hint.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10 * 60);

/// Hinted waits are stretched by this factor before rescheduling.
pub const RATE_LIMIT_SAFETY_FACTOR: f64 = 1.5;

/// First transient retry delay; doubles on each further failure.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(2 * 60);

/// Tokens expiring within this window are refreshed before posting.
pub const REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// What happened when we tried to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Posted {
        external_id: String,
        posted_at: DateTime<Utc>,
    },
    Failed {
        class: FailureClass,
        message: String,
    },
}

/// The status change to persist for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Posted {
        external_id: String,
        posted_at: DateTime<Utc>,
    },
    /// Stays `scheduled` with a later `scheduled_at`.
    Reschedule {
        scheduled_at: DateTime<Utc>,
        retry_count: i32,
        error_message: String,
    },
    PermanentlyFailed {
        retry_count: i32,
        error_message: String,
    },
}

impl Transition {
    /// Short label for logs and summaries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Transition::Posted { .. } => "posted",
            Transition::Reschedule { .. } => "rescheduled",
            Transition::PermanentlyFailed { .. } => "permanently_failed",
        }
    }
}

/// Decides the next state for an interaction that had `retry_count`
/// failures before this attempt.
///
/// Rate limits never consume a retry. Transient failures consume one and
/// back off 2, 4, 8… minutes until [`MAX_ATTEMPTS`] is reached. Auth,
/// validation and duplicate failures are terminal.
#[must_use]
pub fn next_transition(
    retry_count: i32,
    outcome: AttemptOutcome,
    now: DateTime<Utc>,
) -> Transition {
    let (class, message) = match outcome {
        AttemptOutcome::Posted {
            external_id,
            posted_at,
        } => {
            return Transition::Posted {
                external_id,
                posted_at,
            }
        }
        AttemptOutcome::Failed { class, message } => (class, message),
    };

    match class {
        FailureClass::RateLimited(hint) => {
            let wait = rate_limit_wait(hint);
            Transition::Reschedule {
                scheduled_at: now + to_chrono(wait),
                retry_count,
                error_message: format!("rate limited, retrying in {}s: {message}", wait.as_secs()),
            }
        }
        FailureClass::Transient => {
            let attempts = retry_count.saturating_add(1);
            if attempts >= MAX_ATTEMPTS {
                return Transition::PermanentlyFailed {
                    retry_count: attempts,
                    error_message: format!("gave up after {attempts} attempts: {message}"),
                };
            }
            Transition::Reschedule {
                scheduled_at: now + to_chrono(retry_delay(attempts)),
                retry_count: attempts,
                error_message: format!("attempt {attempts} failed: {message}"),
            }
        }
        FailureClass::Auth => Transition::PermanentlyFailed {
            retry_count,
            error_message: format!("authentication failed: {message}"),
        },
        FailureClass::Validation | FailureClass::Duplicate => Transition::PermanentlyFailed {
            retry_count,
            error_message: format!("rejected: {message}"),
        },
    }
}

/// `1.5 × hint`, or [`DEFAULT_RATE_LIMIT_WAIT`] without a hint.
#[must_use]
pub fn rate_limit_wait(hint: Option<Duration>) -> Duration {
    match hint {
        Some(hint) => hint.mul_f64(RATE_LIMIT_SAFETY_FACTOR),
        None => DEFAULT_RATE_LIMIT_WAIT,
    }
}

/// Delay before retry number `attempts` (1-based).
#[must_use]
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = u32::try_from(attempts.saturating_sub(1)).unwrap_or(0).min(10);
    BASE_RETRY_DELAY * 2u32.pow(exponent)
}

/// Whether a token expiring at `expires_at` must be refreshed before use.
#[must_use]
pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at - now < to_chrono(REFRESH_BUFFER)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
    }

    fn failed(class: FailureClass) -> AttemptOutcome {
        AttemptOutcome::Failed {
            class,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn success_is_posted() {
        let t = next_transition(
            2,
            AttemptOutcome::Posted {
                external_id: "t1_k9x".to_string(),
                posted_at: now(),
            },
            now(),
        );
        assert_eq!(
            t,
            Transition::Posted {
                external_id: "t1_k9x".to_string(),
                posted_at: now()
            }
        );
    }

    #[test]
    fn ten_minute_hint_waits_fifteen_and_keeps_retry_count() {
        let t = next_transition(
            1,
            failed(FailureClass::RateLimited(Some(Duration::from_secs(600)))),
            now(),
        );
        match t {
            Transition::Reschedule {
                scheduled_at,
                retry_count,
                ..
            } => {
                assert_eq!(scheduled_at, now() + chrono::Duration::minutes(15));
                assert_eq!(retry_count, 1);
            }
            other => panic!("expected reschedule, got {other:?}"),
        }
    }

    #[test]
    fn four_minute_hint_waits_six() {
        let t = next_transition(
            0,
            failed(FailureClass::RateLimited(Some(Duration::from_secs(240)))),
            now(),
        );
        assert!(matches!(
            t,
            Transition::Reschedule { scheduled_at, retry_count: 0, .. }
                if scheduled_at == now() + chrono::Duration::minutes(6)
        ));
    }

    #[test]
    fn rate_limit_without_hint_waits_default() {
        let t = next_transition(0, failed(FailureClass::RateLimited(None)), now());
        assert!(matches!(
            t,
            Transition::Reschedule { scheduled_at, .. }
                if scheduled_at == now() + chrono::Duration::minutes(10)
        ));
    }

    #[test]
    fn transient_failures_back_off_then_give_up_on_third() {
        let first = next_transition(0, failed(FailureClass::Transient), now());
        assert!(matches!(
            first,
            Transition::Reschedule { scheduled_at, retry_count: 1, .. }
                if scheduled_at == now() + chrono::Duration::minutes(2)
        ));

        let second = next_transition(1, failed(FailureClass::Transient), now());
        assert!(matches!(
            second,
            Transition::Reschedule { scheduled_at, retry_count: 2, .. }
                if scheduled_at == now() + chrono::Duration::minutes(4)
        ));

        let third = next_transition(2, failed(FailureClass::Transient), now());
        assert!(matches!(
            third,
            Transition::PermanentlyFailed { retry_count: 3, .. }
        ));
    }

    #[test]
    fn retry_count_never_exceeds_cap_through_the_machine() {
        let mut retry_count = 0;
        for _ in 0..10 {
            match next_transition(retry_count, failed(FailureClass::Transient), now()) {
                Transition::Reschedule { retry_count: r, .. } => retry_count = r,
                Transition::PermanentlyFailed { retry_count: r, .. } => {
                    retry_count = r;
                    break;
                }
                Transition::Posted { .. } => unreachable!(),
            }
        }
        assert_eq!(retry_count, MAX_ATTEMPTS);
    }

    #[test]
    fn auth_and_validation_are_terminal_without_consuming_retries() {
        for class in [FailureClass::Auth, FailureClass::Validation] {
            let t = next_transition(1, failed(class), now());
            match t {
                Transition::PermanentlyFailed {
                    retry_count,
                    error_message,
                } => {
                    assert_eq!(retry_count, 1);
                    assert!(error_message.contains("boom"));
                }
                other => panic!("expected permanent failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn refresh_gating_uses_five_minute_buffer() {
        assert!(needs_refresh(now() - chrono::Duration::seconds(1), now()));
        assert!(needs_refresh(now() + chrono::Duration::minutes(4), now()));
        assert!(!needs_refresh(now() + chrono::Duration::minutes(5), now()));
        assert!(!needs_refresh(now() + chrono::Duration::hours(1), now()));
    }
}

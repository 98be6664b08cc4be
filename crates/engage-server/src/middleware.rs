use std::{num::NonZeroU32, sync::Arc};

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultDirectRateLimiter, Quota, RateLimiter,
};
use uuid::Uuid;

use crate::api::ApiError;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID carried as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Process-wide request budget for the operator API.
#[derive(Clone)]
pub struct ApiThrottle {
    limiter: Arc<DefaultDirectRateLimiter>,
    clock: DefaultClock,
}

impl std::fmt::Debug for ApiThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiThrottle").finish_non_exhaustive()
    }
}

impl ApiThrottle {
    /// Allows `requests` per minute with a burst of the same size. Zero is
    /// treated as one.
    #[must_use]
    pub fn per_minute(requests: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// `None` when the request may proceed, otherwise whole seconds until
    /// the next cell frees up.
    fn retry_after_secs(&self) -> Option<u64> {
        match self.limiter.check() {
            Ok(()) => None,
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                Some(wait.as_secs() + u64::from(wait.subsec_nanos() > 0))
            }
        }
    }
}

/// Uses the incoming `x-request-id` or generates a `UUIDv4`, stores it as a
/// [`RequestId`] extension and echoes it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    res
}

/// Answers 429 with `Retry-After` once the [`ApiThrottle`] budget is spent.
pub async fn throttle(State(throttle): State<ApiThrottle>, req: Request, next: Next) -> Response {
    let Some(wait_secs) = throttle.retry_after_secs() else {
        return next.run(req).await;
    };

    let rid = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    tracing::debug!(request_id = %rid, wait_secs, "api request throttled");

    let mut res =
        ApiError::new(rid, "rate_limited", "too many requests, slow down").into_response();
    res.headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(wait_secs.max(1)));
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_spent_then_reports_a_wait() {
        let throttle = ApiThrottle::per_minute(2);
        assert_eq!(throttle.retry_after_secs(), None);
        assert_eq!(throttle.retry_after_secs(), None);

        let wait = throttle.retry_after_secs().expect("third request is throttled");
        assert!((1..=30).contains(&wait), "wait was {wait}s");
    }

    #[test]
    fn zero_budget_still_admits_one_request() {
        let throttle = ApiThrottle::per_minute(0);
        assert_eq!(throttle.retry_after_secs(), None);
        assert!(throttle.retry_after_secs().is_some());
    }

    #[test]
    fn clones_share_one_budget() {
        let throttle = ApiThrottle::per_minute(1);
        let other = throttle.clone();
        assert_eq!(throttle.retry_after_secs(), None);
        assert!(other.retry_after_secs().is_some());
    }
}

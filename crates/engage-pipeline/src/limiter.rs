//! Per-domain request limiter.
//!
//! One [`RateLimiter`] is built per process for each external dependency
//! (ingestion fetches, model calls, reply posts) and shared as
//! `Arc<RateLimiter>`. A permit enforces three limits together: a cap on
//! requests in flight, a minimum gap between request starts, and a rolling
//! request budget per window.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engage_core::{AppConfig, LimiterSettings};
use engage_reddit::{GatePermit, RedditError, RequestGate};
use governor::{DefaultDirectRateLimiter, Quota};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::PipelineError;

pub struct RateLimiter {
    name: &'static str,
    in_flight: Arc<Semaphore>,
    max_concurrent: usize,
    spacing: Option<DefaultDirectRateLimiter>,
    window: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("max_concurrent", &self.max_concurrent)
            .field("available", &self.in_flight.available_permits())
            .finish_non_exhaustive()
    }
}

/// Held for the duration of one request; dropping it frees the slot.
#[derive(Debug)]
pub struct RateLimitPermit {
    _slot: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// Zero spacing or a zero window budget disables that limit.
    #[must_use]
    pub fn new(name: &'static str, settings: LimiterSettings) -> Self {
        let max_concurrent = settings.max_concurrent.max(1);

        let spacing = Quota::with_period(Duration::from_millis(settings.min_spacing_ms))
            .map(governor::RateLimiter::direct);

        let window = u32::try_from(settings.requests_per_window)
            .ok()
            .and_then(NonZeroU32::new)
            .and_then(|budget| {
                let period = Duration::from_secs(settings.window_secs) / budget.get();
                Quota::with_period(period).map(|q| q.allow_burst(budget))
            })
            .map(governor::RateLimiter::direct);

        Self {
            name,
            in_flight: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            spacing,
            window,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Free in-flight slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Waits for an in-flight slot, then for the spacing and window limits.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LimiterClosed`] if the limiter was closed.
    pub async fn acquire(&self) -> Result<RateLimitPermit, PipelineError> {
        let slot = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::LimiterClosed)?;

        if let Some(spacing) = &self.spacing {
            spacing.until_ready().await;
        }
        if let Some(window) = &self.window {
            window.until_ready().await;
        }

        Ok(RateLimitPermit { _slot: slot })
    }
}

/// Lets the Reddit client charge every read attempt, retries included,
/// against this limiter.
#[async_trait]
impl RequestGate for RateLimiter {
    async fn admit(&self) -> Result<GatePermit, RedditError> {
        let permit = self.acquire().await.map_err(|_| RedditError::GateClosed)?;
        Ok(Box::new(permit))
    }
}

/// The three limiter domains, built once per process.
#[derive(Debug, Clone)]
pub struct Limiters {
    pub ingest: Arc<RateLimiter>,
    pub llm: Arc<RateLimiter>,
    pub post: Arc<RateLimiter>,
}

impl Limiters {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            ingest: Arc::new(RateLimiter::new("ingest", config.ingest_limiter)),
            llm: Arc::new(RateLimiter::new("llm", config.llm_limiter)),
            post: Arc::new(RateLimiter::new("post", config.post_limiter)),
        }
    }

    /// Limiters with no spacing or window limit; for tests and one-off CLI
    /// runs.
    #[must_use]
    pub fn unthrottled(max_concurrent: usize) -> Self {
        let settings = LimiterSettings {
            max_concurrent,
            min_spacing_ms: 0,
            requests_per_window: 0,
            window_secs: 0,
        };
        Self {
            ingest: Arc::new(RateLimiter::new("ingest", settings)),
            llm: Arc::new(RateLimiter::new("llm", settings)),
            post: Arc::new(RateLimiter::new("post", settings)),
        }
    }
}

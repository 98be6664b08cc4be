//! The engagement pipeline: ingest → filter → score → generate → post →
//! aggregate leads.
//!
//! Stages talk to the outside world through the traits in [`platform`],
//! [`engage_llm::LanguageModel`] and [`notify::Notifier`], and share one
//! [`PipelineContext`] that carries the pool, the per-domain rate limiters
//! and the tuning derived from [`engage_core::AppConfig`].

pub mod batch;
pub mod context;
pub mod engagement;
pub mod error;
pub mod filter;
pub mod generate;
pub mod ingest;
pub mod leads;
pub mod limiter;
pub mod notify;
pub mod platform;
pub mod posting;
pub mod runs;
pub mod scoring;

#[cfg(test)]
pub(crate) mod testing;

use engage_db::TenantRow;
use sqlx::PgPool;

pub use context::{PipelineContext, PipelineSettings};
pub use engagement::{run_engagement_pass, EngagementSummary};
pub use error::PipelineError;
pub use generate::{run_generation, GenerationSummary};
pub use ingest::{run_ingestion, IngestSummary};
pub use leads::{run_lead_aggregation, LeadSummary};
pub use limiter::{Limiters, RateLimiter};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use platform::{ContentSource, ReplyPlatform, SearchKey};
pub use posting::{approve, run_posting_pass, spawn_dispatcher, PostingSummary};
pub use runs::track_run;
pub use scoring::{run_scoring, ScoringSummary};

/// Loads the tenants a run applies to: the named one, or every active tenant.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] with [`engage_db::DbError::NotFound`] if the
/// slug is unknown, or if the query fails.
pub async fn load_tenants(
    pool: &PgPool,
    tenant_slug: Option<&str>,
) -> Result<Vec<TenantRow>, PipelineError> {
    match tenant_slug {
        Some(slug) => {
            let tenant = engage_db::get_tenant_by_slug(pool, slug)
                .await?
                .ok_or(engage_db::DbError::NotFound)?;
            Ok(vec![tenant])
        }
        None => Ok(engage_db::list_active_tenants(pool).await?),
    }
}

/// First `max` chars of `text`, on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

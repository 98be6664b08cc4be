//! Postgres persistence for tenants, discovered content, interactions and leads.
//!
//! Every uniqueness rule the pipeline relies on (item dedup, one live
//! interaction per parent, one lead per target user, one notification per
//! tenant per day) is enforced by a constraint in `migrations/`, and writes go
//! through `ON CONFLICT` so concurrent runs cannot duplicate rows.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{env, time::Duration};
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/engage-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &engage_core::AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("record not found")]
    NotFound,
    #[error("interaction {id} is not in status '{expected_status}'")]
    InvalidTransition {
        id: i64,
        expected_status: &'static str,
    },
    #[error("interaction {id} cannot be requeued: its item already has a live reply")]
    LiveReplyExists { id: i64 },
    #[error("pipeline run {id} is not in status '{expected_status}'")]
    InvalidRunTransition {
        id: i64,
        expected_status: &'static str,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Connect to a Postgres pool, reading `DATABASE_URL` from env and using
/// default pool settings.
///
/// # Errors
///
/// Returns [`DbError::MissingDatabaseUrl`] if `DATABASE_URL` is unset, or
/// [`DbError::Sqlx`] if the connection cannot be established.
pub async fn connect_pool_from_env() -> Result<PgPool, DbError> {
    let database_url = env::var("DATABASE_URL").map_err(|_| DbError::MissingDatabaseUrl)?;
    connect_pool(&database_url, PoolConfig::default())
        .await
        .map_err(DbError::from)
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    // The _sqlx_migrations table may not exist yet on a fresh database; treat
    // absence as zero applied.
    let applied_before: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    MIGRATOR.run(pool).await?;

    let applied_after: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

/// Run a health check: `SELECT 1` against the pool.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

pub mod accounts;
pub mod discovered_items;
pub mod interactions;
pub mod leads;
pub mod notifications;
pub mod pipeline_runs;
pub mod seed;
pub mod tenants;

pub use accounts::{
    get_account, get_account_for_tenant, lock_account_for_refresh, store_refreshed_tokens,
    upsert_platform_account, PlatformAccountRow,
};
pub use discovered_items::{
    existing_external_ids, get_item, insert_discovered_items, list_reply_candidates,
    list_unprocessed_items, list_unseen_embedded_items, mark_items_filtered, record_item_scores,
    store_item_embeddings,
    DiscoveredItemRow, ItemScore, NewDiscoveredItem,
};
pub use interactions::{
    approve_interaction, claim_due_interactions, count_new_interactions, get_interaction,
    has_interaction, insert_interaction, list_interactions, mark_permanently_failed, mark_posted,
    notify_interaction_due, requeue_interaction, reschedule_interaction, DueInteraction,
    InteractionRow, NewInteraction, INTERACTIONS_DUE_CHANNEL,
};
pub use leads::{
    get_lead_for_user, link_interactions_to_lead, list_leads, list_unlinked_posted,
    reconcile_lead_links, upsert_lead, LeadRow, NewLead, PostedInteraction,
};
pub use notifications::{claim_daily_notification, record_notification_result};
pub use pipeline_runs::{
    complete_pipeline_run, create_pipeline_run, fail_pipeline_run, get_pipeline_run,
    list_pipeline_runs, start_pipeline_run, PipelineRunRow,
};
pub use seed::seed_tenants;
pub use tenants::{get_tenant, get_tenant_by_slug, list_active_tenants, TenantRow};

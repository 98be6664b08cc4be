//! Database operations for `interactions`, the lifecycle of a generated reply.
//!
//! Status changes are single guarded `UPDATE`s: each one names the status it
//! expects to leave, and zero affected rows surfaces as
//! [`DbError::InvalidTransition`]. The pure decision of *which* transition to
//! take lives in the pipeline crate.

use chrono::{DateTime, Utc};
use engage_core::InteractionStatus;
use sqlx::PgPool;

use crate::DbError;

/// `LISTEN`/`NOTIFY` channel carrying the id of a newly due interaction.
pub const INTERACTIONS_DUE_CHANNEL: &str = "interactions_due";

const INTERACTION_COLUMNS: &str = "id, tenant_id, parent_item_id, target_platform_user, content, \
     status, retry_count, scheduled_at, locked_until, error_message, posted_external_id, \
     posted_at, lead_id, created_at, updated_at";

/// A row from the `interactions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InteractionRow {
    pub id: i64,
    pub tenant_id: i64,
    pub parent_item_id: i64,
    pub target_platform_user: String,
    pub content: String,
    pub status: String,
    pub retry_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub posted_external_id: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub lead_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly generated reply.
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub tenant_id: i64,
    pub parent_item_id: i64,
    pub target_platform_user: String,
    pub content: String,
}

/// A claimed, due interaction joined with what is needed to post it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueInteraction {
    pub id: i64,
    pub tenant_id: i64,
    pub content: String,
    pub retry_count: i32,
    pub scheduled_at: DateTime<Utc>,
    pub parent_external_id: String,
    pub parent_kind: String,
    /// `None` when the tenant has no active posting account.
    pub account_id: Option<i64>,
}

/// Whether any interaction, live or terminal, exists for the item.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn has_interaction(pool: &PgPool, parent_item_id: i64) -> Result<bool, DbError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM interactions WHERE parent_item_id = $1)",
    )
    .bind(parent_item_id)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// Inserts a `new` interaction.
///
/// Returns `None` when a live interaction already exists for the same tenant
/// and parent item; the partial unique index turns a racing insert into a
/// no-op instead of a second row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_interaction(
    pool: &PgPool,
    interaction: &NewInteraction,
) -> Result<Option<i64>, DbError> {
    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO interactions (tenant_id, parent_item_id, target_platform_user, content, status) \
         VALUES ($1, $2, $3, $4, 'new') \
         ON CONFLICT (tenant_id, parent_item_id) WHERE status IN ('new', 'scheduled') DO NOTHING \
         RETURNING id",
    )
    .bind(interaction.tenant_id)
    .bind(interaction.parent_item_id)
    .bind(&interaction.target_platform_user)
    .bind(&interaction.content)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}

/// Number of interactions awaiting review (`new`) for the tenant.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_new_interactions(pool: &PgPool, tenant_id: i64) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM interactions WHERE tenant_id = $1 AND status = 'new'",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Returns a single interaction by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row has the id, or [`DbError::Sqlx`]
/// if the query fails.
pub async fn get_interaction(pool: &PgPool, id: i64) -> Result<InteractionRow, DbError> {
    sqlx::query_as::<_, InteractionRow>(&format!(
        "SELECT {INTERACTION_COLUMNS} FROM interactions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Lists interactions, optionally filtered by status, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_interactions(
    pool: &PgPool,
    status: Option<InteractionStatus>,
    limit: i64,
) -> Result<Vec<InteractionRow>, DbError> {
    let rows = sqlx::query_as::<_, InteractionRow>(&format!(
        "SELECT {INTERACTION_COLUMNS} FROM interactions \
         WHERE ($1::TEXT IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(status.map(InteractionStatus::as_str))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Approves a reviewed reply: `new → scheduled` with the given post time.
///
/// Does not notify; pair with [`notify_interaction_due`].
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the interaction is not `new`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn approve_interaction(
    pool: &PgPool,
    id: i64,
    scheduled_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE interactions \
         SET status = 'scheduled', scheduled_at = $1, updated_at = NOW() \
         WHERE id = $2 AND status = 'new'",
    )
    .bind(scheduled_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            id,
            expected_status: InteractionStatus::New.as_str(),
        });
    }

    Ok(())
}

/// Sends `pg_notify` on [`INTERACTIONS_DUE_CHANNEL`] with the interaction id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the notify fails.
pub async fn notify_interaction_due(pool: &PgPool, id: i64) -> Result<(), DbError> {
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(INTERACTIONS_DUE_CHANNEL)
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Manual recovery: `permanently_failed → new` for re-review.
///
/// Resets `retry_count` and clears the schedule and lease. The last
/// `error_message` is kept so the reviewer can see why it failed.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the interaction is not
/// `permanently_failed`, [`DbError::LiveReplyExists`] if a live interaction
/// was created for the same item since the failure, or [`DbError::Sqlx`] if
/// the update fails.
pub async fn requeue_interaction(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE interactions \
         SET status = 'new', retry_count = 0, scheduled_at = NULL, locked_until = NULL, \
             updated_at = NOW() \
         WHERE id = $1 AND status = 'permanently_failed'",
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            DbError::LiveReplyExists { id }
        }
        other => DbError::Sqlx(other),
    })?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            id,
            expected_status: InteractionStatus::PermanentlyFailed.as_str(),
        });
    }

    Ok(())
}

/// Claims up to `limit` due interactions and leases them for `lease_secs`.
///
/// `FOR UPDATE SKIP LOCKED` plus the lease means concurrent claimers (two
/// triggers in one process or two processes) never receive the same row while
/// the lease is live. Rows come back in `scheduled_at` order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn claim_due_interactions(
    pool: &PgPool,
    limit: i64,
    lease_secs: f64,
) -> Result<Vec<DueInteraction>, DbError> {
    let rows = sqlx::query_as::<_, DueInteraction>(
        "WITH due AS ( \
             SELECT id FROM interactions \
             WHERE status = 'scheduled' \
               AND scheduled_at <= NOW() \
               AND (locked_until IS NULL OR locked_until < NOW()) \
             ORDER BY scheduled_at, id \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ), claimed AS ( \
             UPDATE interactions i \
             SET locked_until = NOW() + make_interval(secs => $2), updated_at = NOW() \
             FROM due \
             WHERE i.id = due.id \
             RETURNING i.id, i.tenant_id, i.parent_item_id, i.content, i.retry_count, i.scheduled_at \
         ) \
         SELECT c.id, c.tenant_id, c.content, c.retry_count, c.scheduled_at, \
                d.external_id AS parent_external_id, d.kind AS parent_kind, \
                a.id AS account_id \
         FROM claimed c \
         JOIN discovered_items d ON d.id = c.parent_item_id \
         LEFT JOIN platform_accounts a ON a.tenant_id = c.tenant_id AND a.is_active = true \
         ORDER BY c.scheduled_at, c.id",
    )
    .bind(limit)
    .bind(lease_secs)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

fn guard(id: i64, rows_affected: u64) -> Result<(), DbError> {
    if rows_affected == 0 {
        return Err(DbError::InvalidTransition {
            id,
            expected_status: InteractionStatus::Scheduled.as_str(),
        });
    }
    Ok(())
}

/// `scheduled → posted`.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the row is no longer
/// `scheduled`, or [`DbError::Sqlx`] if the update fails.
pub async fn mark_posted(
    pool: &PgPool,
    id: i64,
    posted_external_id: &str,
    posted_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE interactions \
         SET status = 'posted', posted_external_id = $1, posted_at = $2, \
             error_message = NULL, locked_until = NULL, updated_at = NOW() \
         WHERE id = $3 AND status = 'scheduled'",
    )
    .bind(posted_external_id)
    .bind(posted_at)
    .bind(id)
    .execute(pool)
    .await?;

    guard(id, result.rows_affected())
}

/// `scheduled → scheduled` at a later time, releasing the lease.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the row is no longer
/// `scheduled`, or [`DbError::Sqlx`] if the update fails.
pub async fn reschedule_interaction(
    pool: &PgPool,
    id: i64,
    scheduled_at: DateTime<Utc>,
    retry_count: i32,
    error_message: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE interactions \
         SET scheduled_at = $1, retry_count = $2, error_message = $3, \
             locked_until = NULL, updated_at = NOW() \
         WHERE id = $4 AND status = 'scheduled'",
    )
    .bind(scheduled_at)
    .bind(retry_count)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    guard(id, result.rows_affected())
}

/// `scheduled → permanently_failed`.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the row is no longer
/// `scheduled`, or [`DbError::Sqlx`] if the update fails.
pub async fn mark_permanently_failed(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    error_message: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE interactions \
         SET status = 'permanently_failed', retry_count = $1, error_message = $2, \
             locked_until = NULL, updated_at = NOW() \
         WHERE id = $3 AND status = 'scheduled'",
    )
    .bind(retry_count)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    guard(id, result.rows_affected())
}

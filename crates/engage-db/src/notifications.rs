//! Per-tenant, per-day notification dedup via `notification_log`.

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::DbError;

/// Reserve today's slot for a `(tenant, kind)` notification.
///
/// Returns `true` if this caller won the slot and should send; `false` if a
/// notification of this kind was already recorded for the tenant on `day`.
/// The row is written before the send, so a crash after sending cannot
/// produce a second message the same day.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn claim_daily_notification(
    pool: &PgPool,
    tenant_id: i64,
    kind: &str,
    day: NaiveDate,
) -> Result<bool, DbError> {
    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO notification_log (tenant_id, kind, notified_on, status) \
         VALUES ($1, $2, $3, 'pending') \
         ON CONFLICT (tenant_id, kind, notified_on) DO NOTHING \
         RETURNING id",
    )
    .bind(tenant_id)
    .bind(kind)
    .bind(day)
    .fetch_optional(pool)
    .await?;

    Ok(id.is_some())
}

/// Record the send outcome for a claimed notification slot.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no slot was claimed, or [`DbError::Sqlx`]
/// if the update fails.
pub async fn record_notification_result(
    pool: &PgPool,
    tenant_id: i64,
    kind: &str,
    day: NaiveDate,
    error: Option<&str>,
) -> Result<(), DbError> {
    let status = if error.is_some() { "failed" } else { "sent" };

    let result = sqlx::query(
        "UPDATE notification_log SET status = $1, error = $2 \
         WHERE tenant_id = $3 AND kind = $4 AND notified_on = $5",
    )
    .bind(status)
    .bind(error)
    .bind(tenant_id)
    .bind(kind)
    .bind(day)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

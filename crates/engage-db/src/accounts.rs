//! Database operations for `platform_accounts`, the per-tenant OAuth
//! credential used for posting.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::DbError;

const ACCOUNT_COLUMNS: &str = "id, tenant_id, username, access_token, refresh_token, \
     token_expires_at, is_active, updated_at";

/// A row from the `platform_accounts` table.
#[derive(Clone, sqlx::FromRow)]
pub struct PlatformAccountRow {
    pub id: i64,
    pub tenant_id: i64,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for PlatformAccountRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformAccountRow")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("username", &self.username)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("token_expires_at", &self.token_expires_at)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Returns the account by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no account has the id, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_account(pool: &PgPool, id: i64) -> Result<PlatformAccountRow, DbError> {
    sqlx::query_as::<_, PlatformAccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns the active posting account for a tenant, if one is connected.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_account_for_tenant(
    pool: &PgPool,
    tenant_id: i64,
) -> Result<Option<PlatformAccountRow>, DbError> {
    let row = sqlx::query_as::<_, PlatformAccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts \
         WHERE tenant_id = $1 AND is_active = true"
    ))
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Insert or replace the tenant's posting account.
///
/// Used by the connect flow. `token_expires_at` may be in the past to force a
/// refresh before the first post.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_platform_account(
    pool: &PgPool,
    tenant_id: i64,
    username: &str,
    access_token: &str,
    refresh_token: &str,
    token_expires_at: DateTime<Utc>,
) -> Result<i64, DbError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO platform_accounts (tenant_id, username, access_token, refresh_token, token_expires_at) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (tenant_id) DO UPDATE SET \
             username = EXCLUDED.username, \
             access_token = EXCLUDED.access_token, \
             refresh_token = EXCLUDED.refresh_token, \
             token_expires_at = EXCLUDED.token_expires_at, \
             is_active = true, \
             updated_at = NOW() \
         RETURNING id",
    )
    .bind(tenant_id)
    .bind(username)
    .bind(access_token)
    .bind(refresh_token)
    .bind(token_expires_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Take the per-account refresh lock inside `tx` and re-read the credential.
///
/// The lock is a transaction-scoped advisory lock keyed on the account id, so
/// it is released on commit or rollback. Callers must re-check staleness on
/// the returned row: another worker may have refreshed while this one waited.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the account vanished, or
/// [`DbError::Sqlx`] if the lock or read fails.
pub async fn lock_account_for_refresh(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
) -> Result<PlatformAccountRow, DbError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(account_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query_as::<_, PlatformAccountRow>(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM platform_accounts WHERE id = $1"
    ))
    .bind(account_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(DbError::NotFound)
}

/// Persist a refreshed token pair within the refresh-lock transaction.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the account vanished, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn store_refreshed_tokens(
    tx: &mut Transaction<'_, Postgres>,
    account_id: i64,
    access_token: &str,
    refresh_token: &str,
    token_expires_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE platform_accounts \
         SET access_token = $1, refresh_token = $2, token_expires_at = $3, updated_at = NOW() \
         WHERE id = $4",
    )
    .bind(access_token)
    .bind(refresh_token)
    .bind(token_expires_at)
    .bind(account_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

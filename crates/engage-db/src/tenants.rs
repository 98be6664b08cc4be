//! Database operations for the `tenants` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

const TENANT_COLUMNS: &str = "id, slug, name, product_description, keywords, communities, \
     score_threshold, max_pending_replies, auto_approve, notify_email, is_active, \
     created_at, updated_at";

/// A row from the `tenants` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TenantRow {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub product_description: String,
    pub keywords: Vec<String>,
    pub communities: Vec<String>,
    /// `0` disables the threshold.
    pub score_threshold: i32,
    pub max_pending_replies: i32,
    pub auto_approve: bool,
    pub notify_email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returns all active tenants, ordered by slug.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_tenants(pool: &PgPool) -> Result<Vec<TenantRow>, DbError> {
    let rows = sqlx::query_as::<_, TenantRow>(&format!(
        "SELECT {TENANT_COLUMNS} FROM tenants WHERE is_active = true ORDER BY slug"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns a single tenant by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no tenant has the id, or [`DbError::Sqlx`]
/// if the query fails.
pub async fn get_tenant(pool: &PgPool, id: i64) -> Result<TenantRow, DbError> {
    sqlx::query_as::<_, TenantRow>(&format!(
        "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns an active tenant by slug, or `None` if not found.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_tenant_by_slug(pool: &PgPool, slug: &str) -> Result<Option<TenantRow>, DbError> {
    let row = sqlx::query_as::<_, TenantRow>(&format!(
        "SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = $1 AND is_active = true"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

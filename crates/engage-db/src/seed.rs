use engage_core::TenantConfig;
use sqlx::PgPool;

use crate::DbError;

/// Upsert tenants from config into the database.
///
/// Returns the number of tenants processed (inserted or updated). All upserts
/// run inside a single transaction. Tenants absent from the file are left
/// untouched; deactivate them explicitly.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any database operation fails.
pub async fn seed_tenants(pool: &PgPool, tenants: &[TenantConfig]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut count = 0usize;

    for tenant in tenants {
        let communities = tenant.normalized_communities();
        let max_pending = i32::try_from(tenant.max_pending_replies).unwrap_or(i32::MAX);

        sqlx::query(
            "INSERT INTO tenants (slug, name, product_description, keywords, communities, \
                                  score_threshold, max_pending_replies, auto_approve, notify_email, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, true) \
             ON CONFLICT (slug) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 product_description = EXCLUDED.product_description, \
                 keywords = EXCLUDED.keywords, \
                 communities = EXCLUDED.communities, \
                 score_threshold = EXCLUDED.score_threshold, \
                 max_pending_replies = EXCLUDED.max_pending_replies, \
                 auto_approve = EXCLUDED.auto_approve, \
                 notify_email = EXCLUDED.notify_email, \
                 is_active = true, \
                 updated_at = NOW()",
        )
        .bind(tenant.slug())
        .bind(&tenant.name)
        .bind(&tenant.product)
        .bind(&tenant.keywords)
        .bind(&communities)
        .bind(i32::from(tenant.score_threshold))
        .bind(max_pending)
        .bind(tenant.auto_approve)
        .bind(&tenant.notify_email)
        .execute(&mut *tx)
        .await?;

        count += 1;
    }

    tx.commit().await?;
    Ok(count)
}

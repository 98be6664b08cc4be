//! Database operations for `discovered_items`.
//!
//! The dedup key is `(tenant_id, kind, external_id)`. Ingestion first asks
//! which ids of a page are already known, then inserts the rest with
//! `ON CONFLICT DO NOTHING` so a concurrent run cannot double-insert.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use engage_core::ItemKind;
use sqlx::PgPool;

use crate::DbError;

const ITEM_COLUMNS: &str = "id, tenant_id, external_id, kind, author, title, body, permalink, \
     community, up_score, down_score, created_utc, score, score_explanation, category, \
     embedding, processed, discovered_at";

/// A normalized item ready for insertion.
#[derive(Debug, Clone)]
pub struct NewDiscoveredItem {
    pub tenant_id: i64,
    pub external_id: String,
    pub kind: ItemKind,
    pub author: String,
    pub title: Option<String>,
    pub body: String,
    pub permalink: Option<String>,
    /// Post id of the containing thread; comments only.
    pub thread_external_id: Option<String>,
    pub community: String,
    pub up_score: i32,
    pub down_score: i32,
    pub created_utc: Option<DateTime<Utc>>,
}

/// A row from the `discovered_items` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DiscoveredItemRow {
    pub id: i64,
    pub tenant_id: i64,
    pub external_id: String,
    pub kind: String,
    pub author: String,
    pub title: Option<String>,
    pub body: String,
    pub permalink: Option<String>,
    pub community: String,
    pub up_score: i32,
    pub down_score: i32,
    pub created_utc: Option<DateTime<Utc>>,
    pub score: Option<i32>,
    pub score_explanation: Option<String>,
    pub category: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub processed: bool,
    pub discovered_at: DateTime<Utc>,
}

/// The scorer's verdict for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemScore {
    pub item_id: i64,
    pub score: i32,
    pub category: String,
    pub explanation: String,
}

/// Returns the subset of `external_ids` already stored for this tenant and kind.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn existing_external_ids(
    pool: &PgPool,
    tenant_id: i64,
    kind: ItemKind,
    external_ids: &[String],
) -> Result<HashSet<String>, DbError> {
    if external_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT external_id FROM discovered_items \
         WHERE tenant_id = $1 AND kind = $2 AND external_id = ANY($3)",
    )
    .bind(tenant_id)
    .bind(kind.as_str())
    .bind(external_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Inserts items, skipping any whose dedup key already exists.
///
/// Returns the number of rows actually inserted.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any insert fails; the batch is rolled back.
pub async fn insert_discovered_items(
    pool: &PgPool,
    items: &[NewDiscoveredItem],
) -> Result<u64, DbError> {
    if items.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for item in items {
        let result = sqlx::query(
            "INSERT INTO discovered_items (tenant_id, external_id, kind, author, title, body, \
                                           permalink, community, up_score, down_score, created_utc, \
                                           thread_external_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (tenant_id, kind, external_id) DO NOTHING",
        )
        .bind(item.tenant_id)
        .bind(&item.external_id)
        .bind(item.kind.as_str())
        .bind(&item.author)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.permalink)
        .bind(&item.community)
        .bind(item.up_score)
        .bind(item.down_score)
        .bind(item.created_utc)
        .bind(&item.thread_external_id)
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Returns a single item by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no item has the id, or [`DbError::Sqlx`]
/// if the query fails.
pub async fn get_item(pool: &PgPool, id: i64) -> Result<DiscoveredItemRow, DbError> {
    sqlx::query_as::<_, DiscoveredItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM discovered_items WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns up to `limit` unprocessed items for a tenant, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_unprocessed_items(
    pool: &PgPool,
    tenant_id: i64,
    limit: i64,
) -> Result<Vec<DiscoveredItemRow>, DbError> {
    let rows = sqlx::query_as::<_, DiscoveredItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM discovered_items \
         WHERE tenant_id = $1 AND processed = false \
         ORDER BY discovered_at, id \
         LIMIT $2"
    ))
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Scored, non-spam items discovered since `since` that have no interaction
/// yet, highest score first. The caller applies the tenant threshold.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_reply_candidates(
    pool: &PgPool,
    tenant_id: i64,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DiscoveredItemRow>, DbError> {
    let rows = sqlx::query_as::<_, DiscoveredItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM discovered_items d \
         WHERE d.tenant_id = $1 \
           AND d.processed = true \
           AND d.score IS NOT NULL \
           AND d.category IS DISTINCT FROM 'spam' \
           AND d.discovered_at >= $2 \
           AND NOT EXISTS (SELECT 1 FROM interactions i WHERE i.parent_item_id = d.id) \
         ORDER BY d.score DESC, d.discovered_at \
         LIMIT $3"
    ))
    .bind(tenant_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Marks items rejected by the quality filter as processed spam.
///
/// `rejections` pairs an item id with a human-readable reason list.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any update fails; the batch is rolled back.
pub async fn mark_items_filtered(
    pool: &PgPool,
    rejections: &[(i64, String)],
) -> Result<u64, DbError> {
    if rejections.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut updated = 0u64;

    for (item_id, reasons) in rejections {
        let result = sqlx::query(
            "UPDATE discovered_items \
             SET processed = true, category = 'spam', score_explanation = $1 \
             WHERE id = $2 AND processed = false",
        )
        .bind(reasons)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected();
    }

    tx.commit().await?;
    Ok(updated)
}

/// Stores scorer results and marks those items processed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any update fails; the batch is rolled back.
pub async fn record_item_scores(pool: &PgPool, scores: &[ItemScore]) -> Result<u64, DbError> {
    if scores.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut updated = 0u64;

    for score in scores {
        let result = sqlx::query(
            "UPDATE discovered_items \
             SET score = $1, category = $2, score_explanation = $3, processed = true \
             WHERE id = $4 AND processed = false",
        )
        .bind(score.score)
        .bind(&score.category)
        .bind(&score.explanation)
        .bind(score.item_id)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected();
    }

    tx.commit().await?;
    Ok(updated)
}

/// Stores embedding vectors for items.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any update fails; the batch is rolled back.
pub async fn store_item_embeddings(
    pool: &PgPool,
    embeddings: &[(i64, Vec<f32>)],
) -> Result<(), DbError> {
    if embeddings.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    for (item_id, vector) in embeddings {
        sqlx::query("UPDATE discovered_items SET embedding = $1 WHERE id = $2")
            .bind(vector)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Embedded, non-spam items without any interaction, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_unseen_embedded_items(
    pool: &PgPool,
    tenant_id: i64,
    limit: i64,
) -> Result<Vec<DiscoveredItemRow>, DbError> {
    let rows = sqlx::query_as::<_, DiscoveredItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM discovered_items d \
         WHERE d.tenant_id = $1 \
           AND d.embedding IS NOT NULL \
           AND d.category IS DISTINCT FROM 'spam' \
           AND NOT EXISTS (SELECT 1 FROM interactions i WHERE i.parent_item_id = d.id) \
         ORDER BY d.discovered_at DESC \
         LIMIT $2"
    ))
    .bind(tenant_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

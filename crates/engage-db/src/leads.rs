//! Database operations for `leads` and the interaction → lead back-link.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

const LEAD_COLUMNS: &str = "id, tenant_id, target_platform_user, score, summary, buying_signals, \
     pain_points, interaction_count, first_interaction_at, last_interaction_at, \
     created_at, updated_at";

/// A row from the `leads` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeadRow {
    pub id: i64,
    pub tenant_id: i64,
    pub target_platform_user: String,
    pub score: i32,
    pub summary: String,
    pub buying_signals: Vec<String>,
    pub pain_points: Vec<String>,
    pub interaction_count: i32,
    pub first_interaction_at: Option<DateTime<Utc>>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The analyser's assessment of one target user.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub tenant_id: i64,
    pub target_platform_user: String,
    pub score: i32,
    pub summary: String,
    pub buying_signals: Vec<String>,
    pub pain_points: Vec<String>,
    /// Interactions whose conversations the assessment was built from.
    pub analysed_interaction_ids: Vec<i64>,
}

/// A posted interaction not yet linked to a lead, with its parent item.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostedInteraction {
    pub id: i64,
    pub tenant_id: i64,
    pub target_platform_user: String,
    pub content: String,
    pub posted_external_id: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub parent_external_id: String,
    pub parent_kind: String,
    pub parent_thread_id: Option<String>,
    pub parent_title: Option<String>,
    pub parent_body: String,
    pub community: String,
}

/// Links unlinked posted interactions to the lead that already analysed
/// them.
///
/// A row qualifies only when its id is in the lead's
/// `analysed_interaction_ids`, i.e. a run wrote the lead from it and stopped
/// before the back-link. Interactions posted while a run was in flight are
/// left unlinked for analysis. Returns the number of rows linked.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reconcile_lead_links(pool: &PgPool) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE interactions i \
         SET lead_id = l.id, updated_at = NOW() \
         FROM leads l \
         WHERE i.status = 'posted' \
           AND i.lead_id IS NULL \
           AND l.tenant_id = i.tenant_id \
           AND l.target_platform_user = i.target_platform_user \
           AND i.id = ANY(l.analysed_interaction_ids)",
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Posted interactions with no lead link, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_unlinked_posted(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<PostedInteraction>, DbError> {
    let rows = sqlx::query_as::<_, PostedInteraction>(
        "SELECT i.id, i.tenant_id, i.target_platform_user, i.content, \
                i.posted_external_id, i.posted_at, \
                d.external_id AS parent_external_id, d.kind AS parent_kind, \
                d.thread_external_id AS parent_thread_id, \
                d.title AS parent_title, d.body AS parent_body, d.community \
         FROM interactions i \
         JOIN discovered_items d ON d.id = i.parent_item_id \
         WHERE i.status = 'posted' AND i.lead_id IS NULL \
         ORDER BY i.posted_at, i.id \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the lead for a tenant's target user, if one exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_lead_for_user(
    pool: &PgPool,
    tenant_id: i64,
    target_platform_user: &str,
) -> Result<Option<LeadRow>, DbError> {
    let row = sqlx::query_as::<_, LeadRow>(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads WHERE tenant_id = $1 AND target_platform_user = $2"
    ))
    .bind(tenant_id)
    .bind(target_platform_user)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts or updates the lead for `(tenant_id, target_platform_user)`.
///
/// Interaction count and first/last interaction times are recomputed from
/// all posted interactions for the user, so repeated upserts converge on the
/// same row. `analysed_interaction_ids` accumulates across upserts. Returns
/// the lead id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_lead(pool: &PgPool, lead: &NewLead) -> Result<i64, DbError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO leads (tenant_id, target_platform_user, score, summary, buying_signals, \
                            pain_points, interaction_count, first_interaction_at, last_interaction_at, \
                            analysed_interaction_ids) \
         SELECT $1, $2, $3, $4, $5, $6, COUNT(*)::INTEGER, MIN(posted_at), MAX(posted_at), $7 \
         FROM interactions \
         WHERE tenant_id = $1 AND target_platform_user = $2 AND status = 'posted' \
         ON CONFLICT (tenant_id, target_platform_user) DO UPDATE SET \
             score = EXCLUDED.score, \
             summary = EXCLUDED.summary, \
             buying_signals = EXCLUDED.buying_signals, \
             pain_points = EXCLUDED.pain_points, \
             interaction_count = EXCLUDED.interaction_count, \
             first_interaction_at = EXCLUDED.first_interaction_at, \
             last_interaction_at = EXCLUDED.last_interaction_at, \
             analysed_interaction_ids = ARRAY( \
                 SELECT DISTINCT unnest(leads.analysed_interaction_ids || EXCLUDED.analysed_interaction_ids) \
                 ORDER BY 1), \
             updated_at = NOW() \
         RETURNING id",
    )
    .bind(lead.tenant_id)
    .bind(&lead.target_platform_user)
    .bind(lead.score)
    .bind(&lead.summary)
    .bind(&lead.buying_signals)
    .bind(&lead.pain_points)
    .bind(&lead.analysed_interaction_ids)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Back-links interactions to their lead. Already-linked rows are skipped.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn link_interactions_to_lead(
    pool: &PgPool,
    lead_id: i64,
    interaction_ids: &[i64],
) -> Result<u64, DbError> {
    if interaction_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        "UPDATE interactions SET lead_id = $1, updated_at = NOW() \
         WHERE id = ANY($2) AND lead_id IS NULL",
    )
    .bind(lead_id)
    .bind(interaction_ids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Leads ordered by score, optionally restricted to one tenant slug.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_leads(
    pool: &PgPool,
    tenant_slug: Option<&str>,
    limit: i64,
) -> Result<Vec<LeadRow>, DbError> {
    let rows = sqlx::query_as::<_, LeadRow>(
        "SELECT l.id, l.tenant_id, l.target_platform_user, l.score, l.summary, \
                l.buying_signals, l.pain_points, l.interaction_count, \
                l.first_interaction_at, l.last_interaction_at, l.created_at, l.updated_at \
         FROM leads l \
         JOIN tenants t ON t.id = l.tenant_id \
         WHERE ($1::TEXT IS NULL OR t.slug = $1) \
         ORDER BY l.score DESC, l.last_interaction_at DESC NULLS LAST, l.id \
         LIMIT $2",
    )
    .bind(tenant_slug)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

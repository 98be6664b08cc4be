//! Content ingestion: fetch listings per tenant search key, normalize, and
//! persist only unseen items.

use std::collections::HashMap;

use engage_core::ItemKind;
use engage_db::{DbError, NewDiscoveredItem, TenantRow};
use engage_reddit::RedditItem;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use sqlx::PgPool;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::platform::SearchKey;

const REMOVED_SENTINELS: &[&str] = &["[deleted]", "[removed]"];

/// Totals for one ingestion run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestSummary {
    pub tenants: usize,
    pub keys: usize,
    pub fetched: usize,
    pub inserted: u64,
    pub already_known: usize,
    pub errors: Vec<String>,
}

impl IngestSummary {
    fn absorb(&mut self, other: IngestSummary) {
        self.tenants += other.tenants;
        self.keys += other.keys;
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.already_known += other.already_known;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Default)]
struct KeyOutcome {
    fetched: usize,
    inserted: u64,
    already_known: usize,
}

/// Search keys for a tenant: one site search per keyword, and the newest
/// posts and comments of each community. Duplicates are dropped, first
/// occurrence wins.
#[must_use]
pub fn search_keys(tenant: &TenantRow) -> Vec<SearchKey> {
    let mut keys: Vec<SearchKey> = Vec::new();

    for keyword in &tenant.keywords {
        let keyword = keyword.trim();
        if !keyword.is_empty() {
            keys.push(SearchKey::Keyword(keyword.to_string()));
        }
    }

    for community in &tenant.communities {
        let community = community.trim().trim_start_matches("r/");
        if !community.is_empty() {
            keys.push(SearchKey::CommunityPosts(community.to_string()));
            keys.push(SearchKey::CommunityComments(community.to_string()));
        }
    }

    let mut seen = std::collections::HashSet::new();
    keys.retain(|k| seen.insert(k.clone()));
    keys
}

/// Normalizes a listing item for storage.
///
/// Returns `None` for items with nothing left to read: a removed body and no
/// title. Everything else is kept for the quality filter to judge.
#[must_use]
pub fn normalize_item(tenant_id: i64, item: &RedditItem) -> Option<NewDiscoveredItem> {
    let body = item.body.trim();
    let title = item
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let removed = REMOVED_SENTINELS.iter().any(|s| body.eq_ignore_ascii_case(s));
    if title.is_none() && (removed || body.is_empty()) {
        return None;
    }

    Some(NewDiscoveredItem {
        tenant_id,
        external_id: item.id.clone(),
        kind: item.kind,
        author: item.author.clone(),
        title: title.map(str::to_string),
        body: body.to_string(),
        permalink: item.permalink.clone(),
        thread_external_id: thread_id(item),
        community: item.community.clone(),
        up_score: clamp_score(item.up_score),
        down_score: clamp_score(item.down_score),
        created_utc: item.created_utc,
    })
}

/// The post id a comment hangs under, from `link_id` (`t3_…`) or else the
/// `/comments/<post>/` segment of its permalink. `None` for posts.
#[must_use]
pub fn thread_id(item: &RedditItem) -> Option<String> {
    if item.kind != ItemKind::Comment {
        return None;
    }
    if let Some(link) = item.link_id.as_deref().filter(|l| !l.is_empty()) {
        return Some(link.trim_start_matches("t3_").to_string());
    }
    let permalink = item.permalink.as_deref()?;
    let mut segments = permalink.split('/').skip_while(|s| *s != "comments");
    segments.next()?;
    segments
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn clamp_score(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

/// Persists items not already stored for their tenant and kind.
///
/// The existence check is one query per kind; the insert itself ignores
/// conflicts, so a concurrent run that stored the same item in between
/// cannot produce a duplicate. Returns `(inserted, already_known)`.
///
/// # Errors
///
/// Returns [`DbError`] if the lookup or insert fails.
pub async fn store_new_items(
    pool: &PgPool,
    tenant_id: i64,
    items: Vec<NewDiscoveredItem>,
) -> Result<(u64, usize), DbError> {
    let mut by_kind: HashMap<ItemKind, Vec<NewDiscoveredItem>> = HashMap::new();
    for item in items {
        by_kind.entry(item.kind).or_default().push(item);
    }

    let mut fresh = Vec::new();
    let mut already_known = 0usize;

    for (kind, group) in by_kind {
        let ids: Vec<String> = group.iter().map(|i| i.external_id.clone()).collect();
        let existing = engage_db::existing_external_ids(pool, tenant_id, kind, &ids).await?;
        for item in group {
            if existing.contains(&item.external_id) {
                already_known += 1;
            } else {
                fresh.push(item);
            }
        }
    }

    let inserted = engage_db::insert_discovered_items(pool, &fresh).await?;
    Ok((inserted, already_known))
}

async fn ingest_key(
    ctx: &PipelineContext,
    tenant: &TenantRow,
    key: &SearchKey,
) -> Result<KeyOutcome, PipelineError> {
    let mut outcome = KeyOutcome::default();
    let mut after: Option<String> = None;

    for _ in 0..ctx.settings.page_count {
        let page = match ctx
            .source
            .fetch_page(key, after.as_deref(), ctx.settings.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_missing_resource() => {
                tracing::info!(tenant = %tenant.slug, key = %key, error = %e, "listing unavailable; skipping");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        outcome.fetched += page.items.len();
        let normalized: Vec<NewDiscoveredItem> = page
            .items
            .iter()
            .filter_map(|item| normalize_item(tenant.id, item))
            .collect();

        let (inserted, known) = store_new_items(&ctx.pool, tenant.id, normalized).await?;
        outcome.inserted += inserted;
        outcome.already_known += known;

        match page.after {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }

    Ok(outcome)
}

/// Ingests every search key of one tenant with bounded concurrency. A key
/// that fails is recorded in the summary; the other keys still run.
pub async fn ingest_tenant(ctx: &PipelineContext, tenant: &TenantRow) -> IngestSummary {
    let keys = search_keys(tenant);
    let mut summary = IngestSummary {
        tenants: 1,
        keys: keys.len(),
        ..IngestSummary::default()
    };

    let jobs: Vec<_> = keys
        .iter()
        .map(|key| async move { (key, ingest_key(ctx, tenant, key).await) }.boxed())
        .collect();
    let results: Vec<(&SearchKey, Result<KeyOutcome, PipelineError>)> = stream::iter(jobs)
        .buffer_unordered(ctx.settings.key_concurrency)
        .collect()
        .await;

    for (key, result) in results {
        match result {
            Ok(outcome) => {
                summary.fetched += outcome.fetched;
                summary.inserted += outcome.inserted;
                summary.already_known += outcome.already_known;
            }
            Err(e) => {
                tracing::warn!(tenant = %tenant.slug, key = %key, error = %e, "ingestion key failed");
                summary.errors.push(format!("{}: {key}: {e}", tenant.slug));
            }
        }
    }

    tracing::info!(
        tenant = %tenant.slug,
        keys = summary.keys,
        fetched = summary.fetched,
        inserted = summary.inserted,
        already_known = summary.already_known,
        failed_keys = summary.errors.len(),
        "ingestion complete"
    );

    summary
}

/// Ingests every active tenant, or only `tenant_slug` when given.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if the tenant list cannot be loaded.
/// Per-key failures are collected in the summary instead.
pub async fn run_ingestion(
    ctx: &PipelineContext,
    tenant_slug: Option<&str>,
) -> Result<IngestSummary, PipelineError> {
    let tenants = crate::load_tenants(&ctx.pool, tenant_slug).await?;
    let mut summary = IngestSummary::default();
    for tenant in &tenants {
        summary.absorb(ingest_tenant(ctx, tenant).await);
    }
    Ok(summary)
}

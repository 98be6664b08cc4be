//! Quality screening, batched model scoring and the tenant threshold.
//!
//! Unprocessed items are screened by the heuristic filter first; survivors
//! are scored in fixed-size batches. All batches of all tenants go through
//! one bounded scheduler and the shared model-call limiter. A batch whose
//! response is malformed or incomplete fails as a whole and its items stay
//! unprocessed for a later run.

use std::collections::HashSet;
use std::sync::Arc;

use engage_db::{DiscoveredItemRow, ItemScore, TenantRow};
use engage_llm::{complete_structured, CompletionRequest, LanguageModel};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::batch::{chunk_labelled, run_batches};
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::filter::{classify, FilterConfig, FilterInput};
use crate::limiter::RateLimiter;
use crate::truncate_chars;

const ITEM_TEXT_LIMIT: usize = 2000;

const SCORING_SYSTEM_PROMPT: &str = "You rate social media posts and comments for how likely the \
author is to benefit from the product described. For every item return its item_id, a score \
from 0 (irrelevant) to 100 (actively looking for exactly this product), a short lower-case \
category (for example: buying_intent, recommendation_request, pain_point, discussion, \
off_topic) and a one-sentence explanation. Return exactly one result per item.";

/// Structured response for one scoring batch.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScoreBatchResponse {
    pub results: Vec<ScoredItem>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScoredItem {
    pub item_id: i64,
    pub score: i64,
    pub category: String,
    pub explanation: String,
}

/// Totals for one scoring run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScoringSummary {
    pub items_seen: usize,
    pub filtered: u64,
    pub batches: usize,
    pub batches_failed: usize,
    pub scored: u64,
    pub embedded: usize,
    pub errors: Vec<String>,
}

struct ScoreJob {
    product: Arc<str>,
    items: Vec<DiscoveredItemRow>,
}

struct BatchScored {
    scored: u64,
    embedded: usize,
}

/// Keeps scored items that pass `threshold`.
///
/// `threshold <= 0` keeps every scored item; otherwise only items scoring
/// at least `threshold`. Items without a score are never kept.
pub fn apply_threshold<T>(items: Vec<T>, threshold: i32, score: impl Fn(&T) -> Option<i32>) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| match score(item) {
            Some(s) => threshold <= 0 || s >= threshold,
            None => false,
        })
        .collect()
}

/// Splits items into `(keep, rejections)`; each rejection pairs an item id
/// with its filter reasons.
#[must_use]
pub fn screen_items(
    items: Vec<DiscoveredItemRow>,
    config: &FilterConfig,
) -> (Vec<DiscoveredItemRow>, Vec<(i64, String)>) {
    let mut keep = Vec::with_capacity(items.len());
    let mut rejections = Vec::new();

    for item in items {
        let verdict = classify(
            &FilterInput {
                title: item.title.as_deref(),
                body: &item.body,
                up_score: i64::from(item.up_score),
                down_score: i64::from(item.down_score),
            },
            config,
        );
        if verdict.is_spam {
            rejections.push((item.id, format!("filtered: {}", verdict.describe())));
        } else {
            keep.push(item);
        }
    }

    (keep, rejections)
}

/// Title and body as one prompt-sized string.
#[must_use]
pub fn item_text(item: &DiscoveredItemRow) -> String {
    let text = match &item.title {
        Some(title) => format!("{title}\n\n{}", item.body),
        None => item.body.clone(),
    };
    truncate_chars(&text, ITEM_TEXT_LIMIT)
}

fn scoring_payload(product: &str, items: &[DiscoveredItemRow]) -> String {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            serde_json::json!({
                "item_id": item.id,
                "kind": item.kind,
                "community": item.community,
                "text": item_text(item),
            })
        })
        .collect();

    serde_json::json!({ "product": product, "items": items }).to_string()
}

/// Checks a batch response against the batch: every item exactly once, no
/// unknown ids, scores within 0..=100, non-empty category.
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] describing the first violation.
pub fn validate_scores(
    batch_ids: &[i64],
    response: ScoreBatchResponse,
) -> Result<Vec<ItemScore>, PipelineError> {
    let expected: HashSet<i64> = batch_ids.iter().copied().collect();
    let mut seen = HashSet::with_capacity(expected.len());
    let mut scores = Vec::with_capacity(expected.len());

    for result in response.results {
        if !expected.contains(&result.item_id) {
            return Err(PipelineError::Validation(format!(
                "unknown item_id {}",
                result.item_id
            )));
        }
        if !seen.insert(result.item_id) {
            return Err(PipelineError::Validation(format!(
                "item_id {} scored twice",
                result.item_id
            )));
        }
        let score = i32::try_from(result.score)
            .ok()
            .filter(|s| (0..=100).contains(s))
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "score {} for item {} is outside 0..=100",
                    result.score, result.item_id
                ))
            })?;
        let category = result.category.trim().to_lowercase();
        if category.is_empty() {
            return Err(PipelineError::Validation(format!(
                "item {} has an empty category",
                result.item_id
            )));
        }
        scores.push(ItemScore {
            item_id: result.item_id,
            score,
            category,
            explanation: result.explanation.trim().to_string(),
        });
    }

    if seen.len() != expected.len() {
        let mut missing: Vec<i64> = expected.difference(&seen).copied().collect();
        missing.sort_unstable();
        return Err(PipelineError::Validation(format!(
            "missing results for items {missing:?}"
        )));
    }

    Ok(scores)
}

/// Scores one batch with one model call.
///
/// # Errors
///
/// Returns [`PipelineError::Llm`] if the call fails or the content does not
/// parse, and [`PipelineError::Validation`] if it breaks the batch contract.
pub async fn score_batch(
    llm: &dyn LanguageModel,
    limiter: &RateLimiter,
    model: &str,
    product: &str,
    items: &[DiscoveredItemRow],
) -> Result<Vec<ItemScore>, PipelineError> {
    let request = CompletionRequest::new(model, SCORING_SYSTEM_PROMPT, scoring_payload(product, items))
        .temperature(0.0);

    let response: ScoreBatchResponse = {
        let _permit = limiter.acquire().await?;
        complete_structured(llm, request).await?
    };

    let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
    validate_scores(&ids, response)
}

/// Embeds each item's text in one call.
///
/// # Errors
///
/// Returns [`PipelineError::Llm`] if the embedding call fails.
pub async fn embed_items(
    llm: &dyn LanguageModel,
    limiter: &RateLimiter,
    model: &str,
    items: &[DiscoveredItemRow],
) -> Result<Vec<(i64, Vec<f32>)>, PipelineError> {
    let texts: Vec<String> = items.iter().map(item_text).collect();
    let vectors = {
        let _permit = limiter.acquire().await?;
        llm.embed(model, &texts).await?
    };
    Ok(items.iter().map(|i| i.id).zip(vectors).collect())
}

async fn score_and_store(ctx: &PipelineContext, job: ScoreJob) -> Result<BatchScored, PipelineError> {
    let scores = score_batch(
        ctx.llm.as_ref(),
        &ctx.limiters.llm,
        &ctx.settings.scoring_model,
        &job.product,
        &job.items,
    )
    .await?;

    let scored = engage_db::record_item_scores(&ctx.pool, &scores).await?;

    let mut embedded = 0;
    if let Some(model) = &ctx.settings.embedding_model {
        match embed_items(ctx.llm.as_ref(), &ctx.limiters.llm, model, &job.items).await {
            Ok(vectors) => {
                embedded = vectors.len();
                engage_db::store_item_embeddings(&ctx.pool, &vectors).await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, items = job.items.len(), "embedding failed; scores kept");
            }
        }
    }

    Ok(BatchScored { scored, embedded })
}

/// Screens and scores unprocessed items of every active tenant (or only
/// `tenant_slug`).
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if the tenant list cannot be loaded.
/// Per-tenant and per-batch failures are collected in the summary.
pub async fn run_scoring(
    ctx: &PipelineContext,
    tenant_slug: Option<&str>,
) -> Result<ScoringSummary, PipelineError> {
    let tenants = crate::load_tenants(&ctx.pool, tenant_slug).await?;
    let mut summary = ScoringSummary::default();
    let mut jobs: Vec<(String, ScoreJob)> = Vec::new();

    for tenant in &tenants {
        let items = match engage_db::list_unprocessed_items(
            &ctx.pool,
            tenant.id,
            ctx.settings.unprocessed_limit,
        )
        .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(tenant = %tenant.slug, error = %e, "failed to load unprocessed items");
                summary.errors.push(format!("{}: {e}", tenant.slug));
                continue;
            }
        };
        summary.items_seen += items.len();

        let (keep, rejections) = screen_items(items, &ctx.settings.filter);
        match engage_db::mark_items_filtered(&ctx.pool, &rejections).await {
            Ok(n) => summary.filtered += n,
            Err(e) => {
                tracing::error!(tenant = %tenant.slug, error = %e, "failed to mark filtered items");
                summary.errors.push(format!("{}: {e}", tenant.slug));
            }
        }

        let product: Arc<str> = Arc::from(tenant.product_description.as_str());
        for (label, items) in chunk_labelled(&tenant.slug, &keep, ctx.settings.scoring_batch_size) {
            jobs.push((
                label,
                ScoreJob {
                    product: Arc::clone(&product),
                    items,
                },
            ));
        }
    }

    let report = run_batches(jobs, ctx.settings.scoring_concurrency, |job| {
        score_and_store(ctx, job)
    })
    .await;

    summary.batches = report.total();
    summary.batches_failed = report.failed.len();
    for done in &report.succeeded {
        summary.scored += done.scored;
        summary.embedded += done.embedded;
    }
    for failure in &report.failed {
        summary.errors.push(format!("{}: {}", failure.label, failure.error));
    }

    tracing::info!(
        items = summary.items_seen,
        filtered = summary.filtered,
        batches = summary.batches,
        failed = summary.batches_failed,
        scored = summary.scored,
        "scoring complete"
    );

    Ok(summary)
}

/// Cosine similarity; `None` for mismatched lengths or a zero vector.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a * norm_b))
}

/// Orders embedded items by similarity to `query`, most similar first.
/// Items without a comparable embedding are dropped.
#[must_use]
pub fn rank_by_similarity(
    query: &[f32],
    items: Vec<DiscoveredItemRow>,
    top: usize,
) -> Vec<(DiscoveredItemRow, f32)> {
    let mut ranked: Vec<(DiscoveredItemRow, f32)> = items
        .into_iter()
        .filter_map(|item| {
            let similarity = cosine_similarity(query, item.embedding.as_deref()?)?;
            Some((item, similarity))
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top);
    ranked
}

/// The unseen items most similar to the tenant's product description.
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] if no embedding model is
/// configured, or the underlying database or model error.
pub async fn most_relevant_unseen(
    ctx: &PipelineContext,
    tenant: &TenantRow,
    top: usize,
) -> Result<Vec<(DiscoveredItemRow, f32)>, PipelineError> {
    let model = ctx
        .settings
        .embedding_model
        .as_deref()
        .ok_or_else(|| PipelineError::Validation("no embedding model configured".to_string()))?;

    let query = {
        let _permit = ctx.limiters.llm.acquire().await?;
        ctx.llm
            .embed(model, &[tenant.product_description.clone()])
            .await?
    };
    let Some(query) = query.into_iter().next() else {
        return Ok(Vec::new());
    };

    let candidates = engage_db::list_unseen_embedded_items(&ctx.pool, tenant.id, 500).await?;
    Ok(rank_by_similarity(&query, candidates, top))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item_row, ScriptedModel};

    #[test]
    fn threshold_sixty_keeps_sixty_and_above() {
        let kept = apply_threshold(vec![55, 60, 82], 60, |s| Some(*s));
        assert_eq!(kept, vec![60, 82]);
    }

    #[test]
    fn threshold_zero_keeps_every_scored_item() {
        let kept = apply_threshold(vec![Some(0), Some(55), None, Some(82)], 0, |s| *s);
        assert_eq!(kept, vec![Some(0), Some(55), Some(82)]);
    }

    #[test]
    fn screening_separates_spam() {
        let good = item_row(1, "Which CRM do you use for a five person team?");
        let spam = item_row(2, "[removed]");
        let (keep, rejections) = screen_items(vec![good, spam], &FilterConfig::default());
        assert_eq!(keep.len(), 1);
        assert_eq!(keep[0].id, 1);
        assert_eq!(rejections, vec![(2, "filtered: removed".to_string())]);
    }

    fn result(item_id: i64, score: i64) -> ScoredItem {
        ScoredItem {
            item_id,
            score,
            category: "Buying_Intent ".to_string(),
            explanation: "asks for a CRM".to_string(),
        }
    }

    #[test]
    fn complete_response_validates() {
        let scores = validate_scores(
            &[1, 2],
            ScoreBatchResponse {
                results: vec![result(2, 40), result(1, 90)],
            },
        )
        .unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[1].item_id, 1);
        assert_eq!(scores[1].category, "buying_intent");
    }

    #[test]
    fn missing_unknown_duplicate_and_out_of_range_fail_the_batch() {
        let cases = vec![
            vec![result(1, 90)],
            vec![result(1, 90), result(2, 10), result(3, 10)],
            vec![result(1, 90), result(1, 80), result(2, 10)],
            vec![result(1, 101), result(2, 10)],
        ];
        for results in cases {
            let err = validate_scores(&[1, 2], ScoreBatchResponse { results }).unwrap_err();
            assert!(matches!(err, PipelineError::Validation(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn scenario_item_scores_above_eighty() {
        let model = ScriptedModel::new().with_completion(
            r#"{"results":[{"item_id":11,"score":88,"category":"buying_intent","explanation":"asks for a CRM with budget"}]}"#,
        );
        let limiter = RateLimiter::new("llm", crate::testing::open_limits());
        let item = item_row(11, "need a CRM, budget $500, asap");

        let scores = score_batch(&model, &limiter, "m", "CRM tool", &[item])
            .await
            .unwrap();

        assert_eq!(scores.len(), 1);
        assert!(scores[0].score >= 80);
        let request = model.last_request().expect("model called");
        assert!(request.user.contains("need a CRM, budget $500, asap"));
        assert!(request.user.contains("CRM tool"));
    }

    #[tokio::test]
    async fn malformed_json_fails_the_batch() {
        let model = ScriptedModel::new().with_completion("{\"results\": [");
        let limiter = RateLimiter::new("llm", crate::testing::open_limits());
        let err = score_batch(&model, &limiter, "m", "CRM tool", &[item_row(1, "hi there")])
            .await
            .unwrap_err();
        assert!(!err.classify().is_retriable());
    }

    #[test]
    fn similarity_ranking_orders_and_truncates() {
        let mut a = item_row(1, "a");
        a.embedding = Some(vec![1.0, 0.0]);
        let mut b = item_row(2, "b");
        b.embedding = Some(vec![0.6, 0.8]);
        let c = item_row(3, "no embedding");

        let ranked = rank_by_similarity(&[0.0, 1.0], vec![a, b, c], 1);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.id, 2);
        assert!((ranked[0].1 - 0.8).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_mismatched_or_zero_vectors() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }
}

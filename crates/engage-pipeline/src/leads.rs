//! Lead aggregation over posted interactions.
//!
//! Each run first back-links interactions that an earlier, interrupted run
//! already analysed into a lead. The rest are grouped by tenant and target
//! user, the conversation around each reply is rebuilt from the platform,
//! and groups are analysed in small batches. A user who already has a lead
//! is re-analysed with the previous summary as context.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use engage_core::ItemKind;
use engage_db::{LeadRow, NewLead, PostedInteraction, TenantRow};
use engage_llm::{complete_structured, CompletionRequest, LanguageModel};
use engage_reddit::Thread;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::batch::{chunk_labelled, run_batches};
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::limiter::RateLimiter;
use crate::truncate_chars;

const CONVERSATION_LIMIT: usize = 6000;

const LEAD_SYSTEM_PROMPT: &str = "You qualify sales leads from community conversations. For each \
user, read the threads where we replied to them and return their username, a score from 0 (no \
interest) to 100 (ready to buy), a two-sentence summary of where they stand, and short lists of \
buying signals and pain points they expressed. When a previous summary is given, update it with \
the new activity rather than starting over. Return exactly one lead per user.";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LeadBatchResponse {
    pub leads: Vec<LeadAssessment>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LeadAssessment {
    pub username: String,
    pub score: i64,
    pub summary: String,
    pub buying_signals: Vec<String>,
    pub pain_points: Vec<String>,
}

/// Totals for one aggregation run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LeadSummary {
    pub reconciled: u64,
    pub interactions_seen: usize,
    pub groups: usize,
    pub batches: usize,
    pub batches_failed: usize,
    pub leads_upserted: usize,
    pub interactions_linked: u64,
    pub errors: Vec<String>,
}

/// Unlinked posted interactions of one target user of one tenant.
#[derive(Debug, Clone)]
pub struct LeadGroup {
    pub tenant_id: i64,
    pub username: String,
    pub interactions: Vec<PostedInteraction>,
    pub previous: Option<LeadRow>,
    pub conversation: String,
}

impl LeadGroup {
    fn interaction_ids(&self) -> Vec<i64> {
        self.interactions.iter().map(|i| i.id).collect()
    }
}

struct LeadJob {
    product: Arc<str>,
    groups: Vec<LeadGroup>,
}

/// Groups rows by `(tenant_id, target_platform_user)`, preserving order
/// within each group.
#[must_use]
pub fn group_unlinked(
    rows: Vec<PostedInteraction>,
) -> BTreeMap<(i64, String), Vec<PostedInteraction>> {
    let mut groups: BTreeMap<(i64, String), Vec<PostedInteraction>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.tenant_id, row.target_platform_user.clone()))
            .or_default()
            .push(row);
    }
    groups
}

/// Plain-text rendering of a thread, comments indented by depth.
#[must_use]
pub fn render_thread(thread: &Thread) -> String {
    let mut out = String::new();
    let post = &thread.post;
    if let Some(title) = &post.title {
        let _ = writeln!(out, "[{}] {title}", post.author);
    }
    if !post.body.is_empty() {
        let _ = writeln!(out, "{}", post.body);
    }
    for comment in &thread.comments {
        let indent = "  ".repeat(usize::try_from(comment.depth).unwrap_or(0) + 1);
        let _ = writeln!(out, "{indent}[{}] {}", comment.author, comment.body);
    }
    out
}

/// The stored parent text when the live thread is unavailable.
#[must_use]
pub fn fallback_text(interaction: &PostedInteraction) -> String {
    match &interaction.parent_title {
        Some(title) => format!("[{}] {title}\n{}\n", interaction.target_platform_user, interaction.parent_body),
        None => format!("[{}] {}\n", interaction.target_platform_user, interaction.parent_body),
    }
}

/// The post whose thread holds the replied-to item: the item itself for
/// posts, the stored containing post for comments.
fn thread_root(interaction: &PostedInteraction) -> Option<&str> {
    if interaction.parent_kind == ItemKind::Post.as_str() {
        Some(&interaction.parent_external_id)
    } else {
        interaction.parent_thread_id.as_deref()
    }
}

async fn conversation_for(ctx: &PipelineContext, interaction: &PostedInteraction) -> String {
    let mut text = if let Some(root) = thread_root(interaction) {
        match fetch_thread(ctx, root).await {
            Ok(Some(thread)) => render_thread(&thread),
            Ok(None) => fallback_text(interaction),
            Err(e) => {
                tracing::warn!(
                    interaction_id = interaction.id,
                    error = %e,
                    "thread fetch failed; using stored text"
                );
                fallback_text(interaction)
            }
        }
    } else {
        fallback_text(interaction)
    };

    let _ = writeln!(text, "  [our reply in r/{}] {}", interaction.community, interaction.content);
    text
}

async fn fetch_thread(
    ctx: &PipelineContext,
    post_id: &str,
) -> Result<Option<Thread>, PipelineError> {
    Ok(ctx
        .source
        .fetch_thread(post_id, ctx.settings.thread_depth, ctx.settings.thread_replies)
        .await?)
}

/// Rebuilds the conversation for every interaction of a group.
async fn build_group(
    ctx: &PipelineContext,
    tenant_id: i64,
    username: String,
    interactions: Vec<PostedInteraction>,
) -> Result<LeadGroup, PipelineError> {
    let previous = engage_db::get_lead_for_user(&ctx.pool, tenant_id, &username).await?;

    let mut conversation = String::new();
    for interaction in &interactions {
        conversation.push_str(&conversation_for(ctx, interaction).await);
        conversation.push('\n');
    }

    Ok(LeadGroup {
        tenant_id,
        username,
        interactions,
        previous,
        conversation: truncate_chars(&conversation, CONVERSATION_LIMIT),
    })
}

fn lead_payload(product: &str, groups: &[LeadGroup]) -> String {
    let users: Vec<serde_json::Value> = groups
        .iter()
        .map(|g| {
            serde_json::json!({
                "username": g.username,
                "previous_summary": g.previous.as_ref().map(|l| l.summary.as_str()),
                "previous_score": g.previous.as_ref().map(|l| l.score),
                "conversation": g.conversation,
            })
        })
        .collect();
    serde_json::json!({ "product": product, "users": users }).to_string()
}

/// Checks that the response covers exactly the requested usernames once
/// each with scores in `0..=100`. Returns assessments keyed by username.
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] describing the first violation.
pub fn validate_assessments(
    usernames: &[&str],
    response: LeadBatchResponse,
) -> Result<HashMap<String, LeadAssessment>, PipelineError> {
    let expected: HashSet<&str> = usernames.iter().copied().collect();
    let mut out = HashMap::with_capacity(expected.len());

    for lead in response.leads {
        if !expected.contains(lead.username.as_str()) {
            return Err(PipelineError::Validation(format!(
                "unknown username '{}'",
                lead.username
            )));
        }
        if !(0..=100).contains(&lead.score) {
            return Err(PipelineError::Validation(format!(
                "score {} for '{}' is outside 0..=100",
                lead.score, lead.username
            )));
        }
        if out.contains_key(&lead.username) {
            return Err(PipelineError::Validation(format!(
                "'{}' assessed twice",
                lead.username
            )));
        }
        out.insert(lead.username.clone(), lead);
    }

    if out.len() != expected.len() {
        let mut missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|u| !out.contains_key(*u))
            .collect();
        missing.sort_unstable();
        return Err(PipelineError::Validation(format!(
            "missing leads for {missing:?}"
        )));
    }

    Ok(out)
}

/// Analyses one batch of groups with one model call.
///
/// # Errors
///
/// Returns [`PipelineError::Llm`] if the call fails and
/// [`PipelineError::Validation`] if the response breaks the batch contract.
pub async fn assess_batch(
    llm: &dyn LanguageModel,
    limiter: &RateLimiter,
    model: &str,
    product: &str,
    groups: &[LeadGroup],
) -> Result<HashMap<String, LeadAssessment>, PipelineError> {
    let request = CompletionRequest::new(model, LEAD_SYSTEM_PROMPT, lead_payload(product, groups))
        .temperature(0.2);

    let response: LeadBatchResponse = {
        let _permit = limiter.acquire().await?;
        complete_structured(llm, request).await?
    };

    let usernames: Vec<&str> = groups.iter().map(|g| g.username.as_str()).collect();
    validate_assessments(&usernames, response)
}

#[derive(Debug, Default)]
struct BatchApplied {
    upserted: usize,
    linked: u64,
}

async fn assess_and_store(ctx: &PipelineContext, job: LeadJob) -> Result<BatchApplied, PipelineError> {
    let mut assessments = assess_batch(
        ctx.llm.as_ref(),
        &ctx.limiters.llm,
        &ctx.settings.reply_model,
        &job.product,
        &job.groups,
    )
    .await?;

    let mut applied = BatchApplied::default();
    for group in &job.groups {
        let Some(assessment) = assessments.remove(&group.username) else {
            continue;
        };
        let lead = NewLead {
            tenant_id: group.tenant_id,
            target_platform_user: group.username.clone(),
            score: i32::try_from(assessment.score).unwrap_or(0),
            summary: assessment.summary.trim().to_string(),
            buying_signals: assessment.buying_signals,
            pain_points: assessment.pain_points,
            analysed_interaction_ids: group.interaction_ids(),
        };
        let lead_id = engage_db::upsert_lead(&ctx.pool, &lead).await?;
        applied.upserted += 1;
        applied.linked +=
            engage_db::link_interactions_to_lead(&ctx.pool, lead_id, &group.interaction_ids())
                .await?;
        tracing::info!(
            tenant_id = group.tenant_id,
            user = %group.username,
            lead_id,
            score = lead.score,
            "lead updated"
        );
    }

    Ok(applied)
}

/// Aggregates leads for every active tenant (or only `tenant_slug`).
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if reconciliation, the tenant list or the
/// unlinked-interaction scan fails. Batch failures are collected in the
/// summary and their interactions stay unlinked for the next run.
pub async fn run_lead_aggregation(
    ctx: &PipelineContext,
    tenant_slug: Option<&str>,
) -> Result<LeadSummary, PipelineError> {
    let mut summary = LeadSummary {
        reconciled: engage_db::reconcile_lead_links(&ctx.pool).await?,
        ..LeadSummary::default()
    };
    if summary.reconciled > 0 {
        tracing::info!(linked = summary.reconciled, "reconciled interactions with existing leads");
    }

    let tenants: HashMap<i64, TenantRow> = crate::load_tenants(&ctx.pool, tenant_slug)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let rows: Vec<PostedInteraction> =
        engage_db::list_unlinked_posted(&ctx.pool, ctx.settings.lead_scan_limit)
            .await?
            .into_iter()
            .filter(|row| tenants.contains_key(&row.tenant_id))
            .collect();
    summary.interactions_seen = rows.len();

    let grouped = group_unlinked(rows);
    summary.groups = grouped.len();

    let mut by_tenant: BTreeMap<i64, Vec<LeadGroup>> = BTreeMap::new();
    for ((tenant_id, username), interactions) in grouped {
        match build_group(ctx, tenant_id, username.clone(), interactions).await {
            Ok(group) => by_tenant.entry(tenant_id).or_default().push(group),
            Err(e) => summary.errors.push(format!("{username}: {e}")),
        }
    }

    let mut jobs = Vec::new();
    for (tenant_id, groups) in by_tenant {
        let Some(tenant) = tenants.get(&tenant_id) else {
            continue;
        };
        let product: Arc<str> = Arc::from(tenant.product_description.as_str());
        for (label, chunk) in chunk_labelled(&tenant.slug, &groups, ctx.settings.lead_batch_size) {
            jobs.push((
                label,
                LeadJob {
                    product: Arc::clone(&product),
                    groups: chunk,
                },
            ));
        }
    }
    summary.batches = jobs.len();

    let report = run_batches(jobs, ctx.settings.scoring_concurrency, |job| {
        assess_and_store(ctx, job)
    })
    .await;

    summary.batches_failed = report.failed.len();
    for applied in report.succeeded {
        summary.leads_upserted += applied.upserted;
        summary.interactions_linked += applied.linked;
    }
    summary
        .errors
        .extend(report.failed.into_iter().map(|f| format!("{}: {}", f.label, f.error)));

    tracing::info!(
        groups = summary.groups,
        leads = summary.leads_upserted,
        linked = summary.interactions_linked,
        failed_batches = summary.batches_failed,
        "lead aggregation complete"
    );

    Ok(summary)
}

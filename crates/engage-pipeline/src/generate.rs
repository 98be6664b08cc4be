//! Reply drafting for items that cleared the tenant threshold.
//!
//! Each candidate is checked for an existing interaction before any model
//! call, the draft is sanitized to plain text, and the insert relies on the
//! live-interaction unique index so concurrent runs cannot create a second
//! live reply for the same item.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use engage_db::{DiscoveredItemRow, NewInteraction, TenantRow};
use engage_llm::{complete_structured, CompletionRequest, LanguageModel};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::limiter::RateLimiter;
use crate::scoring::{apply_threshold, item_text};

pub const MAX_REPLY_CHARS: usize = 1500;

/// `notification_log.kind` for the "replies waiting for review" message.
pub const REVIEW_PENDING: &str = "review_pending";

pub const DEFAULT_PERSONA: &str = "You are a founder who has tried many tools and likes helping \
people in online communities. Reply to the post below in two to four short sentences of plain \
text. Answer the actual question first, share one concrete experience, and only mention the \
product when it genuinely fits. No markdown, no lists, no links, no sign-off.";

static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid markdown link regex"));
static MD_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]+|>[ \t]?|[-*+][ \t]+|\d+\.[ \t]+)")
        .expect("valid markdown prefix regex")
});
static DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*[\u{2014}\u{2013}][ \t]*").expect("valid dash regex"));
static HSPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{00A0}]+").expect("valid whitespace regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DraftReply {
    pub reply: String,
}

/// Totals for one generation run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GenerationSummary {
    pub candidates: usize,
    pub created: usize,
    pub auto_approved: usize,
    pub duplicates: usize,
    pub capped_tenants: Vec<String>,
    pub notifications_sent: usize,
    pub errors: Vec<String>,
}

impl GenerationSummary {
    fn absorb(&mut self, other: GenerationSummary) {
        self.candidates += other.candidates;
        self.created += other.created;
        self.auto_approved += other.auto_approved;
        self.duplicates += other.duplicates;
        self.capped_tenants.extend(other.capped_tenants);
        self.notifications_sent += other.notifications_sent;
        self.errors.extend(other.errors);
    }
}

/// Reads the persona prompt file, or returns [`DEFAULT_PERSONA`].
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the file cannot be read.
pub fn load_persona(path: Option<&Path>) -> Result<String, PipelineError> {
    let Some(path) = path else {
        return Ok(DEFAULT_PERSONA.to_string());
    };
    let persona = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let persona = persona.trim();
    if persona.is_empty() {
        return Ok(DEFAULT_PERSONA.to_string());
    }
    Ok(persona.to_string())
}

/// Turns model output into plain reply text: markdown links become their
/// label, heading/list/quote markers and emphasis go, em and en dashes
/// become commas, curly quotes straighten, whitespace collapses, and the
/// result is capped at [`MAX_REPLY_CHARS`].
#[must_use]
pub fn sanitize_reply(raw: &str) -> String {
    let text = MD_LINK_RE.replace_all(raw, "$1");
    let text = MD_PREFIX_RE.replace_all(&text, "");
    let text = DASH_RE.replace_all(&text, ", ");

    let text: String = text
        .replace("**", "")
        .replace("__", "")
        .replace("~~", "")
        .chars()
        .filter(|c| !matches!(c, '*' | '`'))
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect::<String>()
        .replace('\u{2026}', "...")
        .replace("\r\n", "\n");

    let text = HSPACE_RE.replace_all(&text, " ");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let text = lines.join("\n");
    let text = BLANK_LINES_RE.replace_all(&text, "\n\n");

    let mut text = text.trim().to_string();
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = text[1..text.len() - 1].trim().to_string();
    }

    cap_reply(&text, MAX_REPLY_CHARS)
}

/// Truncates to `max` chars, preferring the last sentence end past 60% of
/// the limit, then the last space.
fn cap_reply(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    let floor = cut.len() * 3 / 5;

    if let Some(pos) = cut.rfind(['.', '!', '?']).filter(|p| *p >= floor) {
        return cut[..=pos].trim().to_string();
    }
    if let Some(pos) = cut.rfind(char::is_whitespace) {
        return cut[..pos].trim_end_matches([',', ' ']).trim().to_string();
    }
    cut
}

fn reply_payload(product: &str, item: &DiscoveredItemRow) -> String {
    serde_json::json!({
        "community": item.community,
        "author": item.author,
        "kind": item.kind,
        "post": item_text(item),
        "product": product,
    })
    .to_string()
}

/// Drafts and sanitizes one reply.
///
/// # Errors
///
/// Returns [`PipelineError::Llm`] if the model call fails and
/// [`PipelineError::Validation`] if nothing is left after sanitizing.
pub async fn draft_reply(
    llm: &dyn LanguageModel,
    limiter: &RateLimiter,
    model: &str,
    persona: &str,
    product: &str,
    item: &DiscoveredItemRow,
) -> Result<String, PipelineError> {
    let request = CompletionRequest::new(model, persona, reply_payload(product, item)).temperature(0.7);

    let draft: DraftReply = {
        let _permit = limiter.acquire().await?;
        complete_structured(llm, request).await?
    };

    let reply = sanitize_reply(&draft.reply);
    if reply.is_empty() {
        return Err(PipelineError::Validation(format!(
            "empty reply for item {}",
            item.id
        )));
    }
    Ok(reply)
}

/// Approves a fresh interaction on the tenant's behalf, scheduling it one to
/// ten minutes out, and wakes the posting worker.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if the approval or notify fails.
pub async fn auto_approve(
    pool: &PgPool,
    interaction_id: i64,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, PipelineError> {
    let delay = chrono::Duration::seconds(rand::random_range(60..=600));
    let scheduled_at = now + delay;
    crate::posting::approve(pool, interaction_id, scheduled_at).await?;
    Ok(scheduled_at)
}

/// Sends at most one review-pending message per tenant per UTC day.
///
/// The day's slot is claimed before sending; the outcome is recorded
/// afterwards. Returns whether a message went out.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if the notification log cannot be
/// written. Delivery failures are recorded on the log row, not returned.
pub async fn notify_review_pending(
    ctx: &PipelineContext,
    tenant: &TenantRow,
    pending: i64,
    now: DateTime<Utc>,
) -> Result<bool, PipelineError> {
    let day = now.date_naive();
    if !engage_db::claim_daily_notification(&ctx.pool, tenant.id, REVIEW_PENDING, day).await? {
        tracing::debug!(tenant = %tenant.slug, "review reminder already sent today");
        return Ok(false);
    }

    let Some(to) = tenant.notify_email.as_deref() else {
        tracing::warn!(tenant = %tenant.slug, "reply cap reached but tenant has no notify_email");
        engage_db::record_notification_result(
            &ctx.pool,
            tenant.id,
            REVIEW_PENDING,
            day,
            Some("tenant has no notify_email"),
        )
        .await?;
        return Ok(false);
    };

    let params = serde_json::json!({
        "tenant": tenant.name,
        "pending": pending,
        "limit": tenant.max_pending_replies,
    });

    match ctx.notifier.send(to, REVIEW_PENDING, &params).await {
        Ok(()) => {
            engage_db::record_notification_result(&ctx.pool, tenant.id, REVIEW_PENDING, day, None)
                .await?;
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(tenant = %tenant.slug, error = %e, "review reminder failed");
            let message = e.to_string();
            engage_db::record_notification_result(
                &ctx.pool,
                tenant.id,
                REVIEW_PENDING,
                day,
                Some(&message),
            )
            .await?;
            Ok(false)
        }
    }
}

/// Drafts replies for one tenant's candidates until the pending-review cap.
pub async fn generate_for_tenant(ctx: &PipelineContext, tenant: &TenantRow) -> GenerationSummary {
    let mut summary = GenerationSummary::default();
    let now = Utc::now();

    let candidates = match engage_db::list_reply_candidates(
        &ctx.pool,
        tenant.id,
        now - ctx.settings.candidate_window,
        ctx.settings.candidate_limit,
    )
    .await
    {
        Ok(rows) => apply_threshold(rows, tenant.score_threshold, |item| item.score),
        Err(e) => {
            summary.errors.push(format!("{}: {e}", tenant.slug));
            return summary;
        }
    };
    summary.candidates = candidates.len();

    for item in &candidates {
        match generate_one(ctx, tenant, item).await {
            Ok(GenerateOutcome::Created { auto_approved }) => {
                summary.created += 1;
                if auto_approved {
                    summary.auto_approved += 1;
                }
            }
            Ok(GenerateOutcome::Duplicate) => summary.duplicates += 1,
            Ok(GenerateOutcome::CapReached { pending }) => {
                tracing::info!(
                    tenant = %tenant.slug,
                    pending,
                    cap = tenant.max_pending_replies,
                    "pending reply cap reached; stopping generation"
                );
                summary.capped_tenants.push(tenant.slug.clone());
                match notify_review_pending(ctx, tenant, pending, now).await {
                    Ok(true) => summary.notifications_sent += 1,
                    Ok(false) => {}
                    Err(e) => summary.errors.push(format!("{}: {e}", tenant.slug)),
                }
                break;
            }
            Err(e) => {
                tracing::warn!(tenant = %tenant.slug, item_id = item.id, error = %e, "reply generation failed");
                summary.errors.push(format!("{}: item {}: {e}", tenant.slug, item.id));
            }
        }
    }

    tracing::info!(
        tenant = %tenant.slug,
        candidates = summary.candidates,
        created = summary.created,
        duplicates = summary.duplicates,
        "generation complete"
    );

    summary
}

enum GenerateOutcome {
    Created { auto_approved: bool },
    Duplicate,
    CapReached { pending: i64 },
}

async fn generate_one(
    ctx: &PipelineContext,
    tenant: &TenantRow,
    item: &DiscoveredItemRow,
) -> Result<GenerateOutcome, PipelineError> {
    let pending = engage_db::count_new_interactions(&ctx.pool, tenant.id).await?;
    if pending >= i64::from(tenant.max_pending_replies) {
        return Ok(GenerateOutcome::CapReached { pending });
    }

    if engage_db::has_interaction(&ctx.pool, item.id).await? {
        return Ok(GenerateOutcome::Duplicate);
    }

    let content = draft_reply(
        ctx.llm.as_ref(),
        &ctx.limiters.llm,
        &ctx.settings.reply_model,
        &ctx.settings.persona_prompt,
        &tenant.product_description,
        item,
    )
    .await?;

    let inserted = engage_db::insert_interaction(
        &ctx.pool,
        &NewInteraction {
            tenant_id: tenant.id,
            parent_item_id: item.id,
            target_platform_user: item.author.clone(),
            content,
        },
    )
    .await?;

    let Some(interaction_id) = inserted else {
        tracing::debug!(item_id = item.id, "live interaction already exists; skipping");
        return Ok(GenerateOutcome::Duplicate);
    };

    if tenant.auto_approve {
        auto_approve(&ctx.pool, interaction_id, Utc::now()).await?;
        return Ok(GenerateOutcome::Created { auto_approved: true });
    }

    Ok(GenerateOutcome::Created {
        auto_approved: false,
    })
}

/// Generates replies for every active tenant (or only `tenant_slug`).
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if the tenant list cannot be loaded.
pub async fn run_generation(
    ctx: &PipelineContext,
    tenant_slug: Option<&str>,
) -> Result<GenerationSummary, PipelineError> {
    let tenants = crate::load_tenants(&ctx.pool, tenant_slug).await?;
    let mut summary = GenerationSummary::default();
    for tenant in &tenants {
        summary.absorb(generate_for_tenant(ctx, tenant).await);
    }
    Ok(summary)
}

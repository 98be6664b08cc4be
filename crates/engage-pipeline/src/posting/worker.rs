//! One claim-and-process pass over due interactions.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use engage_core::FailureClass;
use engage_db::{DbError, DueInteraction};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::attempt::{apply_transition, ensure_fresh_token, post_once, Credential};
use super::state::{next_transition, AttemptOutcome, Transition};
use crate::context::PipelineContext;
use crate::error::PipelineError;

/// Headroom added to the lease per claimed row for the post call itself.
const POST_CALL_ALLOWANCE_SECS: u64 = 60;

/// Totals for one posting pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PostingSummary {
    pub claimed: usize,
    pub posted: usize,
    pub rescheduled: usize,
    pub failed: usize,
    /// Rows that left `scheduled` while being posted (operator action).
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl PostingSummary {
    fn absorb(&mut self, other: PostingSummary) {
        self.posted += other.posted;
        self.rescheduled += other.rescheduled;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    fn count(&mut self, transition: &Transition) {
        match transition {
            Transition::Posted { .. } => self.posted += 1,
            Transition::Reschedule { .. } => self.rescheduled += 1,
            Transition::PermanentlyFailed { .. } => self.failed += 1,
        }
    }
}

/// Lease long enough for a full claim to be posted sequentially on a single
/// account with maximum jitter.
#[must_use]
pub fn lease_secs(claim_limit: i64, jitter_max_secs: u64) -> f64 {
    let rows = u32::try_from(claim_limit.max(1)).unwrap_or(u32::MAX);
    let per_row = u32::try_from(jitter_max_secs.saturating_add(POST_CALL_ALLOWANCE_SECS))
        .unwrap_or(u32::MAX);
    f64::from(rows) * f64::from(per_row)
}

/// Random delay between two posts on the same account.
#[must_use]
pub fn jitter_delay(min_secs: u64, max_secs: u64) -> Duration {
    if max_secs <= min_secs {
        return Duration::from_secs(min_secs);
    }
    Duration::from_secs(rand::random_range(min_secs..=max_secs))
}

/// Splits claimed rows into per-account queues (keeping claim order) and the
/// rows whose tenant has no active account. Duplicate ids are dropped.
#[must_use]
pub fn group_by_account(
    rows: Vec<DueInteraction>,
) -> (BTreeMap<i64, Vec<DueInteraction>>, Vec<DueInteraction>) {
    let mut seen = HashSet::new();
    let mut groups: BTreeMap<i64, Vec<DueInteraction>> = BTreeMap::new();
    let mut orphans = Vec::new();

    for row in rows {
        if !seen.insert(row.id) {
            continue;
        }
        match row.account_id {
            Some(account_id) => groups.entry(account_id).or_default().push(row),
            None => orphans.push(row),
        }
    }

    (groups, orphans)
}

/// Claims due interactions and posts them: accounts concurrently, each
/// account sequentially with jitter between posts.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if the claim query fails. Per-row failures
/// are recorded on the rows and in the summary.
pub async fn run_posting_pass(ctx: &PipelineContext) -> Result<PostingSummary, PipelineError> {
    let settings = &ctx.settings;
    let claimed = engage_db::claim_due_interactions(
        &ctx.pool,
        settings.claim_limit,
        lease_secs(settings.claim_limit, settings.jitter_max_secs),
    )
    .await?;

    let mut summary = PostingSummary {
        claimed: claimed.len(),
        ..PostingSummary::default()
    };
    if claimed.is_empty() {
        return Ok(summary);
    }

    let (groups, orphans) = group_by_account(claimed);

    for due in orphans {
        let transition = next_transition(
            due.retry_count,
            AttemptOutcome::Failed {
                class: FailureClass::Auth,
                message: format!("tenant {} has no active posting account", due.tenant_id),
            },
            Utc::now(),
        );
        record(ctx, &due, &transition, &mut summary).await;
    }

    let account_count = groups.len();
    let reports: Vec<PostingSummary> = stream::iter(groups)
        .map(|(account_id, queue)| process_account(ctx, account_id, queue))
        .buffer_unordered(account_count.max(1))
        .collect()
        .await;

    for report in reports {
        summary.absorb(report);
    }

    tracing::info!(
        claimed = summary.claimed,
        posted = summary.posted,
        rescheduled = summary.rescheduled,
        failed = summary.failed,
        "posting pass complete"
    );

    Ok(summary)
}

async fn process_account(
    ctx: &PipelineContext,
    account_id: i64,
    queue: Vec<DueInteraction>,
) -> PostingSummary {
    let mut summary = PostingSummary::default();
    let mut credential: Option<Credential> = None;

    for (idx, due) in queue.iter().enumerate() {
        if idx > 0 {
            tokio::time::sleep(jitter_delay(
                ctx.settings.jitter_min_secs,
                ctx.settings.jitter_max_secs,
            ))
            .await;
        }

        let fresh = ensure_fresh_token(
            &ctx.pool,
            ctx.platform.as_ref(),
            account_id,
            credential.take(),
            Utc::now(),
        )
        .await;

        let current = match fresh {
            Ok(current) => current,
            Err(PipelineError::Reddit(e)) => {
                tracing::error!(account_id, error = %e, "token refresh failed; failing queued replies");
                let message = format!("token refresh failed: {e}");
                for rest in &queue[idx..] {
                    let transition = Transition::PermanentlyFailed {
                        retry_count: rest.retry_count,
                        error_message: message.clone(),
                    };
                    record(ctx, rest, &transition, &mut summary).await;
                }
                break;
            }
            Err(e) => {
                // Rows stay leased and are picked up once the lease lapses.
                tracing::error!(account_id, error = %e, "could not load posting credential");
                summary.errors.push(format!("account {account_id}: {e}"));
                break;
            }
        };

        let outcome = post_once(
            ctx.platform.as_ref(),
            &ctx.limiters.post,
            &current,
            due,
        )
        .await;
        credential = Some(current);

        let rate_limited = matches!(
            outcome,
            AttemptOutcome::Failed {
                class: FailureClass::RateLimited(_),
                ..
            }
        );
        let transition = next_transition(due.retry_count, outcome, Utc::now());
        record(ctx, due, &transition, &mut summary).await;

        if rate_limited {
            if let Transition::Reschedule { scheduled_at, .. } = &transition {
                defer_rest(ctx, &queue[idx + 1..], *scheduled_at, &mut summary).await;
            }
            break;
        }
    }

    summary
}

/// Pushes the account's remaining rows behind a rate-limited one without
/// spending their retries.
async fn defer_rest(
    ctx: &PipelineContext,
    rest: &[DueInteraction],
    scheduled_at: chrono::DateTime<Utc>,
    summary: &mut PostingSummary,
) {
    for due in rest {
        let transition = Transition::Reschedule {
            scheduled_at,
            retry_count: due.retry_count,
            error_message: "deferred: posting account is rate limited".to_string(),
        };
        record(ctx, due, &transition, summary).await;
    }
}

async fn record(
    ctx: &PipelineContext,
    due: &DueInteraction,
    transition: &Transition,
    summary: &mut PostingSummary,
) {
    match apply_transition(&ctx.pool, due.id, transition).await {
        Ok(()) => {
            tracing::info!(
                interaction_id = due.id,
                tenant_id = due.tenant_id,
                outcome = transition.label(),
                "interaction updated"
            );
            summary.count(transition);
        }
        Err(PipelineError::Db(DbError::InvalidTransition { .. })) => {
            tracing::warn!(interaction_id = due.id, "interaction left 'scheduled' during posting");
            summary.skipped += 1;
        }
        Err(e) => {
            tracing::error!(interaction_id = due.id, error = %e, "failed to record posting outcome");
            summary.errors.push(format!("interaction {}: {e}", due.id));
        }
    }
}

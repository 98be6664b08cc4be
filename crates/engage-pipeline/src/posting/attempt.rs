//! One posting attempt: token gating, the reply call, and persisting the
//! resulting transition.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use engage_core::{FailureClass, ItemKind};
use engage_db::{DueInteraction, PlatformAccountRow};
use engage_reddit::RedditError;
use sqlx::PgPool;

use super::state::{needs_refresh, AttemptOutcome, Transition};
use crate::error::PipelineError;
use crate::limiter::RateLimiter;
use crate::platform::ReplyPlatform;

/// The access token a worker posts with, cached per account for one pass.
#[derive(Clone)]
pub struct Credential {
    pub account_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &self.account_id)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<PlatformAccountRow> for Credential {
    fn from(row: PlatformAccountRow) -> Self {
        Self {
            account_id: row.id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at: row.token_expires_at,
        }
    }
}

/// Exchanges the refresh token if `credential` is stale; returns it
/// unchanged otherwise. The second value reports whether a refresh happened.
///
/// # Errors
///
/// Returns the platform error if the refresh grant fails.
pub async fn refresh_if_stale(
    platform: &dyn ReplyPlatform,
    credential: Credential,
    now: DateTime<Utc>,
) -> Result<(Credential, bool), RedditError> {
    if !needs_refresh(credential.expires_at, now) {
        return Ok((credential, false));
    }

    let grant = platform
        .refresh_access_token(&credential.refresh_token)
        .await?;

    Ok((
        Credential {
            account_id: credential.account_id,
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or(credential.refresh_token),
            expires_at: now + chrono::Duration::seconds(grant.expires_in),
        },
        true,
    ))
}

/// Returns a usable credential for `account_id`, refreshing it at most once
/// across workers.
///
/// A cached credential that is still fresh is returned without touching the
/// database. Otherwise the refresh runs inside a transaction holding the
/// account's advisory lock; the row is re-read under the lock so a worker
/// that waited on another's refresh reuses the new token.
///
/// # Errors
///
/// Returns [`PipelineError::Reddit`] if the refresh grant fails and
/// [`PipelineError::Db`] if the account cannot be read or updated.
pub async fn ensure_fresh_token(
    pool: &PgPool,
    platform: &dyn ReplyPlatform,
    account_id: i64,
    cached: Option<Credential>,
    now: DateTime<Utc>,
) -> Result<Credential, PipelineError> {
    if let Some(credential) = cached.filter(|c| !needs_refresh(c.expires_at, now)) {
        return Ok(credential);
    }

    let stored = Credential::from(engage_db::get_account(pool, account_id).await?);
    if !needs_refresh(stored.expires_at, now) {
        return Ok(stored);
    }

    refresh_locked(pool, platform, account_id, now).await
}

async fn refresh_locked(
    pool: &PgPool,
    platform: &dyn ReplyPlatform,
    account_id: i64,
    now: DateTime<Utc>,
) -> Result<Credential, PipelineError> {
    let mut tx = pool.begin().await.map_err(engage_db::DbError::from)?;
    let current = Credential::from(engage_db::lock_account_for_refresh(&mut tx, account_id).await?);

    let (credential, refreshed) = refresh_if_stale(platform, current, now).await?;
    if refreshed {
        engage_db::store_refreshed_tokens(
            &mut tx,
            account_id,
            &credential.access_token,
            &credential.refresh_token,
            credential.expires_at,
        )
        .await?;
        tracing::info!(account_id, expires_at = %credential.expires_at, "access token refreshed");
    }

    tx.commit().await.map_err(engage_db::DbError::from)?;
    Ok(credential)
}

/// Reddit fullname of the item a reply goes under.
///
/// # Errors
///
/// Returns [`PipelineError::Validation`] for an unknown stored kind.
pub fn parent_fullname(due: &DueInteraction) -> Result<String, PipelineError> {
    let kind = ItemKind::from_str(&due.parent_kind)
        .map_err(|e| PipelineError::Validation(format!("interaction {}: {e}", due.id)))?;
    Ok(format!("{}{}", kind.fullname_prefix(), due.parent_external_id))
}

/// Posts one reply and reports the outcome. Never returns an error: every
/// failure becomes [`AttemptOutcome::Failed`] with its class.
pub async fn post_once(
    platform: &dyn ReplyPlatform,
    limiter: &RateLimiter,
    credential: &Credential,
    due: &DueInteraction,
) -> AttemptOutcome {
    let parent = match parent_fullname(due) {
        Ok(parent) => parent,
        Err(e) => return failure(e.classify(), e.to_string()),
    };

    let _permit = match limiter.acquire().await {
        Ok(permit) => permit,
        Err(e) => return failure(e.classify(), e.to_string()),
    };

    match platform
        .post_reply(&credential.access_token, &parent, &due.content)
        .await
    {
        Ok(comment) => AttemptOutcome::Posted {
            external_id: comment.fullname,
            posted_at: Utc::now(),
        },
        Err(e) => failure(e.classify(), e.to_string()),
    }
}

fn failure(class: FailureClass, message: String) -> AttemptOutcome {
    AttemptOutcome::Failed { class, message }
}

/// Persists `transition` with the guarded status update it maps to.
///
/// # Errors
///
/// Returns [`PipelineError::Db`]; [`engage_db::DbError::InvalidTransition`]
/// means the row left `scheduled` while we were posting.
pub async fn apply_transition(
    pool: &PgPool,
    interaction_id: i64,
    transition: &Transition,
) -> Result<(), PipelineError> {
    match transition {
        Transition::Posted {
            external_id,
            posted_at,
        } => engage_db::mark_posted(pool, interaction_id, external_id, *posted_at).await?,
        Transition::Reschedule {
            scheduled_at,
            retry_count,
            error_message,
        } => {
            engage_db::reschedule_interaction(
                pool,
                interaction_id,
                *scheduled_at,
                *retry_count,
                error_message,
            )
            .await?;
        }
        Transition::PermanentlyFailed {
            retry_count,
            error_message,
        } => {
            engage_db::mark_permanently_failed(pool, interaction_id, *retry_count, error_message)
                .await?;
        }
    }
    Ok(())
}

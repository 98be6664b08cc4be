//! Posting: the interaction state machine, the attempt itself, the
//! claim-and-process worker and its push + poll dispatcher.

pub mod attempt;
pub mod dispatch;
pub mod state;
pub mod worker;

pub use attempt::{ensure_fresh_token, Credential};
pub use dispatch::{spawn_dispatcher, Dispatcher, Trigger};
pub use state::{needs_refresh, next_transition, AttemptOutcome, Transition};
pub use worker::{run_posting_pass, PostingSummary};

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::PipelineError;

/// Approves a reviewed reply for posting at `scheduled_at` and wakes the
/// dispatcher. The notify is sent after the status change is committed, so
/// a listener that reacts immediately always finds the row `scheduled`.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] with
/// [`engage_db::DbError::InvalidTransition`] if the interaction is not `new`.
pub async fn approve(
    pool: &PgPool,
    interaction_id: i64,
    scheduled_at: DateTime<Utc>,
) -> Result<(), PipelineError> {
    engage_db::approve_interaction(pool, interaction_id, scheduled_at).await?;
    engage_db::notify_interaction_due(pool, interaction_id).await?;
    tracing::info!(interaction_id, %scheduled_at, "interaction approved");
    Ok(())
}

//! The scheduled engagement pass: ingest → screen and score → generate.

use serde::Serialize;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::generate::{run_generation, GenerationSummary};
use crate::ingest::{run_ingestion, IngestSummary};
use crate::scoring::{run_scoring, ScoringSummary};

/// Per-stage totals of one engagement pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EngagementSummary {
    pub ingest: IngestSummary,
    pub scoring: ScoringSummary,
    pub generation: GenerationSummary,
}

impl EngagementSummary {
    /// Every per-key, per-batch and per-item error of the pass.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.ingest.errors.len() + self.scoring.errors.len() + self.generation.errors.len()
    }
}

/// Runs the three content stages in order for every active tenant (or only
/// `tenant_slug`). A stage's partial failures do not stop later stages.
///
/// # Errors
///
/// Returns [`PipelineError`] if a stage cannot start at all (tenant lookup
/// or listing queries).
pub async fn run_engagement_pass(
    ctx: &PipelineContext,
    tenant_slug: Option<&str>,
) -> Result<EngagementSummary, PipelineError> {
    let ingest = run_ingestion(ctx, tenant_slug).await?;
    tracing::info!(inserted = ingest.inserted, errors = ingest.errors.len(), "ingestion stage done");

    let scoring = run_scoring(ctx, tenant_slug).await?;
    tracing::info!(scored = scoring.scored, filtered = scoring.filtered, "scoring stage done");

    let generation = run_generation(ctx, tenant_slug).await?;
    tracing::info!(created = generation.created, "generation stage done");

    Ok(EngagementSummary {
        ingest,
        scoring,
        generation,
    })
}

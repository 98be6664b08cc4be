//! `pipeline_runs` bookkeeping around a job: create → start → run →
//! complete or fail.

use std::future::Future;

use sqlx::PgPool;

use crate::engagement::EngagementSummary;
use crate::error::PipelineError;
use crate::generate::GenerationSummary;
use crate::ingest::IngestSummary;
use crate::leads::LeadSummary;
use crate::posting::PostingSummary;
use crate::scoring::ScoringSummary;

/// The count recorded as `records_processed` for a finished run.
pub trait RunRecords {
    fn records(&self) -> u64;
}

impl RunRecords for IngestSummary {
    fn records(&self) -> u64 {
        self.inserted
    }
}

impl RunRecords for ScoringSummary {
    fn records(&self) -> u64 {
        self.scored
    }
}

impl RunRecords for GenerationSummary {
    fn records(&self) -> u64 {
        self.created as u64
    }
}

impl RunRecords for EngagementSummary {
    fn records(&self) -> u64 {
        self.ingest.inserted + self.scoring.scored + self.generation.records()
    }
}

impl RunRecords for PostingSummary {
    fn records(&self) -> u64 {
        self.posted as u64
    }
}

impl RunRecords for LeadSummary {
    fn records(&self) -> u64 {
        self.leads_upserted as u64
    }
}

/// Runs `job` as a tracked pipeline run of `run_type`.
///
/// Bookkeeping failures after the job has started never hide the job's own
/// result: a failed `complete` is logged and the run is marked failed on a
/// best-effort basis.
///
/// # Errors
///
/// Returns [`PipelineError::Db`] if the run row cannot be created or
/// started, or the job's own error.
pub async fn track_run<T, Fut>(
    pool: &PgPool,
    run_type: &'static str,
    trigger_source: &str,
    job: Fut,
) -> Result<T, PipelineError>
where
    T: RunRecords,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let run = engage_db::create_pipeline_run(pool, run_type, trigger_source).await?;
    if let Err(e) = engage_db::start_pipeline_run(pool, run.id).await {
        fail_run_best_effort(pool, run.id, run_type, format!("{e:#}")).await;
        return Err(e.into());
    }

    match job.await {
        Ok(output) => {
            let records = i32::try_from(output.records()).unwrap_or(i32::MAX);
            if let Err(e) = engage_db::complete_pipeline_run(pool, run.id, records).await {
                tracing::error!(run_id = run.id, error = %e, "failed to complete {run_type} run");
                fail_run_best_effort(pool, run.id, run_type, format!("{e:#}")).await;
            }
            Ok(output)
        }
        Err(e) => {
            fail_run_best_effort(pool, run.id, run_type, format!("{e:#}")).await;
            Err(e)
        }
    }
}

async fn fail_run_best_effort(pool: &PgPool, run_id: i64, context: &'static str, message: String) {
    if let Err(mark_err) = engage_db::fail_pipeline_run(pool, run_id, &message).await {
        tracing::error!(
            run_id,
            error = %mark_err,
            "failed to mark {context} run as failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engagement_records_sum_stages() {
        let summary = EngagementSummary {
            ingest: IngestSummary {
                inserted: 4,
                ..IngestSummary::default()
            },
            scoring: ScoringSummary {
                scored: 3,
                ..ScoringSummary::default()
            },
            generation: GenerationSummary {
                created: 2,
                ..GenerationSummary::default()
            },
        };
        assert_eq!(summary.records(), 9);
    }
}

//! Background job scheduler.
//!
//! Registers the recurring engagement pass and lead aggregation at server
//! startup. Posting is not scheduled here; the dispatcher drives it.

use std::sync::Arc;

use engage_pipeline::runs::RunRecords;
use engage_pipeline::{run_engagement_pass, run_lead_aggregation, track_run, PipelineContext};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

const TRIGGER: &str = "scheduler";

/// Builds and starts the scheduler. The returned handle must be kept alive
/// for the lifetime of the process; dropping it stops all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, a
/// cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(
    ctx: PipelineContext,
    config: Arc<engage_core::AppConfig>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_engagement_job(&scheduler, ctx.clone(), &config.engagement_cron).await?;
    register_leads_job(&scheduler, ctx, &config.leads_cron).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Ingest, score and generate for every active tenant.
async fn register_engagement_job(
    scheduler: &JobScheduler,
    ctx: PipelineContext,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let ctx = Arc::new(ctx);
    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        let running = Arc::clone(&running);

        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("scheduler: previous engagement pass still running; skipping");
                return;
            };
            tracing::info!("scheduler: starting engagement pass");
            let result = track_run(
                &ctx.pool,
                "engagement",
                TRIGGER,
                run_engagement_pass(&ctx, None),
            )
            .await;
            log_outcome("engagement", &result);
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered engagement job");
    Ok(())
}

/// Fold newly posted interactions into leads.
async fn register_leads_job(
    scheduler: &JobScheduler,
    ctx: PipelineContext,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let ctx = Arc::new(ctx);
    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let ctx = Arc::clone(&ctx);
        let running = Arc::clone(&running);

        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("scheduler: previous lead aggregation still running; skipping");
                return;
            };
            tracing::info!("scheduler: starting lead aggregation");
            let result = track_run(
                &ctx.pool,
                "leads",
                TRIGGER,
                run_lead_aggregation(&ctx, None),
            )
            .await;
            log_outcome("leads", &result);
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered leads job");
    Ok(())
}

fn log_outcome<T: RunRecords>(job: &str, result: &Result<T, engage_pipeline::PipelineError>) {
    match result {
        Ok(summary) => {
            tracing::info!(job, records = summary.records(), "scheduler: run complete");
        }
        Err(e) => tracing::error!(job, error = %e, "scheduler: run failed"),
    }
}

//! Pipeline stage handlers. Every stage runs as a tracked `pipeline_runs`
//! row with trigger source `cli`.

use clap::ValueEnum;
use engage_pipeline::runs::track_run;
use engage_pipeline::{
    run_engagement_pass, run_generation, run_ingestion, run_posting_pass, run_scoring,
    PipelineContext,
};
use serde::Serialize;

const TRIGGER: &str = "cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    Ingest,
    Score,
    Generate,
    All,
}

fn print_summary<T: Serialize>(label: &str, summary: &T) -> anyhow::Result<()> {
    println!("{label}:\n{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

pub(crate) async fn run_stage(
    pool: sqlx::PgPool,
    config: &engage_core::AppConfig,
    stage: Stage,
    tenant: Option<&str>,
) -> anyhow::Result<()> {
    let ctx = PipelineContext::from_app_config(pool, config)?;
    let pool = &ctx.pool;

    match stage {
        Stage::Ingest => {
            let summary = track_run(pool, "ingest", TRIGGER, run_ingestion(&ctx, tenant)).await?;
            print_summary("ingest", &summary)
        }
        Stage::Score => {
            let summary = track_run(pool, "score", TRIGGER, run_scoring(&ctx, tenant)).await?;
            print_summary("score", &summary)
        }
        Stage::Generate => {
            let summary =
                track_run(pool, "generate", TRIGGER, run_generation(&ctx, tenant)).await?;
            print_summary("generate", &summary)
        }
        Stage::All => {
            let summary =
                track_run(pool, "engagement", TRIGGER, run_engagement_pass(&ctx, tenant)).await?;
            if summary.error_count() > 0 {
                tracing::warn!(errors = summary.error_count(), "engagement pass finished with errors");
            }
            print_summary("engagement", &summary)
        }
    }
}

pub(crate) async fn run_post(
    pool: sqlx::PgPool,
    config: &engage_core::AppConfig,
) -> anyhow::Result<()> {
    let ctx = PipelineContext::from_app_config(pool, config)?;
    let summary = track_run(&ctx.pool, "post", TRIGGER, run_posting_pass(&ctx)).await?;
    print_summary("post", &summary)
}

pub(crate) async fn run_relevant(
    pool: sqlx::PgPool,
    config: &engage_core::AppConfig,
    tenant_slug: &str,
    top: usize,
) -> anyhow::Result<()> {
    let ctx = PipelineContext::from_app_config(pool, config)?;
    let tenant = engage_db::get_tenant_by_slug(&ctx.pool, tenant_slug)
        .await?
        .ok_or_else(|| anyhow::anyhow!("tenant '{tenant_slug}' not found"))?;

    let ranked = engage_pipeline::scoring::most_relevant_unseen(&ctx, &tenant, top).await?;
    if ranked.is_empty() {
        println!("no embedded, unseen items for {tenant_slug}");
        return Ok(());
    }
    for (item, similarity) in ranked {
        println!(
            "{similarity:.3}  r/{}  {}  {}",
            item.community,
            item.external_id,
            item.title.as_deref().unwrap_or(&item.body).chars().take(80).collect::<String>()
        );
    }
    Ok(())
}

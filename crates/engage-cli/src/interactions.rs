//! Review queue and lead commands.

use chrono::Utc;
use clap::Subcommand;
use engage_core::InteractionStatus;
use engage_pipeline::runs::track_run;
use engage_pipeline::{run_lead_aggregation, PipelineContext};

/// Sub-commands available under `interactions`.
#[derive(Debug, Subcommand)]
pub enum InteractionsCommands {
    /// List interactions, newest first
    List {
        /// new, scheduled, posted or permanently_failed
        #[arg(long)]
        status: Option<InteractionStatus>,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Approve a `new` interaction for posting
    Approve {
        id: i64,
        /// Delay before posting
        #[arg(long, default_value = "0")]
        in_minutes: i64,
    },
    /// Move a `permanently_failed` interaction back to review
    Requeue { id: i64 },
}

/// Sub-commands available under `leads`.
#[derive(Debug, Subcommand)]
pub enum LeadsCommands {
    /// Analyse posted interactions and update leads
    Aggregate {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// List leads by score
    List {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > 60 {
        format!("{}...", line.chars().take(60).collect::<String>())
    } else {
        line.to_string()
    }
}

pub(crate) async fn run_interactions(
    pool: &sqlx::PgPool,
    command: InteractionsCommands,
) -> anyhow::Result<()> {
    match command {
        InteractionsCommands::List { status, limit } => {
            let rows = engage_db::list_interactions(pool, status, limit.clamp(1, 500)).await?;
            if rows.is_empty() {
                println!("no interactions");
                return Ok(());
            }
            for row in rows {
                let when = row
                    .scheduled_at
                    .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
                println!(
                    "{:>6}  {:<18}  retries={}  at={}  u/{}  {}",
                    row.id,
                    row.status,
                    row.retry_count,
                    when,
                    row.target_platform_user,
                    preview(&row.content)
                );
                if let Some(error) = row.error_message {
                    println!("        last error: {error}");
                }
            }
        }
        InteractionsCommands::Approve { id, in_minutes } => {
            let at = Utc::now() + chrono::Duration::minutes(in_minutes.max(0));
            engage_pipeline::approve(pool, id, at).await?;
            println!("interaction {id} scheduled for {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        InteractionsCommands::Requeue { id } => {
            engage_db::requeue_interaction(pool, id).await?;
            println!("interaction {id} moved back to review");
        }
    }
    Ok(())
}

pub(crate) async fn run_leads(
    pool: sqlx::PgPool,
    config: &engage_core::AppConfig,
    command: LeadsCommands,
) -> anyhow::Result<()> {
    match command {
        LeadsCommands::Aggregate { tenant } => {
            let ctx = PipelineContext::from_app_config(pool, config)?;
            let summary = track_run(
                &ctx.pool,
                "leads",
                "cli",
                run_lead_aggregation(&ctx, tenant.as_deref()),
            )
            .await?;
            println!("leads:\n{}", serde_json::to_string_pretty(&summary)?);
        }
        LeadsCommands::List { tenant, limit } => {
            let leads = engage_db::list_leads(&pool, tenant.as_deref(), limit.clamp(1, 500)).await?;
            if leads.is_empty() {
                println!("no leads");
                return Ok(());
            }
            for lead in leads {
                println!(
                    "{:>3}  u/{:<20}  interactions={}  {}",
                    lead.score, lead.target_platform_user, lead.interaction_count, lead.summary
                );
                if !lead.buying_signals.is_empty() {
                    println!("     signals: {}", lead.buying_signals.join("; "));
                }
            }
        }
    }
    Ok(())
}

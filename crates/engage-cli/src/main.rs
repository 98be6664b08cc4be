mod accounts;
mod interactions;
mod pipeline;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::interactions::{InteractionsCommands, LeadsCommands};
use crate::pipeline::Stage;

#[derive(Debug, Parser)]
#[command(name = "engage-cli")]
#[command(about = "Engagement pipeline command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Run one pipeline stage, or the full engagement pass
    Run {
        #[arg(value_enum, default_value = "all")]
        stage: Stage,
        /// Restrict the run to one tenant slug
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Claim and post every due interaction once
    Post,
    /// Review and schedule generated replies
    Interactions {
        #[command(subcommand)]
        command: InteractionsCommands,
    },
    /// Aggregate and inspect leads
    Leads {
        #[command(subcommand)]
        command: LeadsCommands,
    },
    /// Store the posting account for a tenant
    Connect {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        username: String,
        /// OAuth refresh token with the `submit` scope
        #[arg(long, env = "ENGAGE_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,
    },
    /// Show the unseen items closest to a tenant's product description
    Relevant {
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value = "10")]
        top: usize,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
    /// Upsert tenants from the tenants file
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("engage-cli: no command given; see --help");
        return Ok(());
    };

    let config = engage_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = engage_db::PoolConfig::from_app_config(&config);
    let pool = engage_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db { command } => run_db(&pool, &config, command).await,
        Commands::Run { stage, tenant } => {
            pipeline::run_stage(pool, &config, stage, tenant.as_deref()).await
        }
        Commands::Post => pipeline::run_post(pool, &config).await,
        Commands::Interactions { command } => interactions::run_interactions(&pool, command).await,
        Commands::Leads { command } => interactions::run_leads(pool, &config, command).await,
        Commands::Connect {
            tenant,
            username,
            refresh_token,
        } => accounts::run_connect(&pool, &tenant, &username, &refresh_token).await,
        Commands::Relevant { tenant, top } => {
            pipeline::run_relevant(pool, &config, &tenant, top).await
        }
    }
}

async fn run_db(
    pool: &sqlx::PgPool,
    config: &engage_core::AppConfig,
    command: DbCommands,
) -> anyhow::Result<()> {
    match command {
        DbCommands::Ping => {
            engage_db::health_check(pool).await?;
            println!("database: ok");
        }
        DbCommands::Migrate => {
            let applied = engage_db::run_migrations(pool).await?;
            println!("migrations applied: {applied}");
        }
        DbCommands::Seed => {
            let file = engage_core::load_tenants(&config.tenants_path)?;
            let seeded = engage_db::seed_tenants(pool, &file.tenants).await?;
            println!(
                "seeded {seeded} tenants from {}",
                config.tenants_path.display()
            );
        }
    }
    Ok(())
}

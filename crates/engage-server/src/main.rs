mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use engage_pipeline::PipelineContext;
use tracing_subscriber::EnvFilter;

use crate::api::{build_app, default_throttle, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(engage_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = engage_db::PoolConfig::from_app_config(&config);
    let pool = engage_db::connect_pool(&config.database_url, pool_config).await?;
    engage_db::run_migrations(&pool).await?;

    let ctx = PipelineContext::from_app_config(pool.clone(), &config)?;
    let dispatcher = engage_pipeline::spawn_dispatcher(ctx.clone());
    let mut scheduler = scheduler::build_scheduler(ctx, Arc::clone(&config)).await?;

    let app = build_app(AppState { pool }, default_throttle());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "engage-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.abort();
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "scheduler shutdown failed");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}

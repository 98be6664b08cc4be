use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::app_config::{AppConfig, Environment, LimiterSettings};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so it can be tested with a plain
/// `HashMap` lookup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var).ok().filter(|v| !v.trim().is_empty())
    };

    let database_url = require("DATABASE_URL")?;
    let reddit_client_id = require("REDDIT_CLIENT_ID")?;
    let reddit_client_secret = require("REDDIT_CLIENT_SECRET")?;
    let llm_api_key = require("LLM_API_KEY")?;

    let env = parse_environment(&or_default("ENGAGE_ENV", "development"))?;
    let bind_addr: SocketAddr = parse_var(&lookup, "ENGAGE_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("ENGAGE_LOG_LEVEL", "info");
    let tenants_path = PathBuf::from(or_default("ENGAGE_TENANTS_PATH", "./config/tenants.yaml"));

    let db_max_connections = parse_var(&lookup, "ENGAGE_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_var(&lookup, "ENGAGE_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_var(&lookup, "ENGAGE_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let http_timeout_secs = parse_var(&lookup, "ENGAGE_HTTP_TIMEOUT_SECS", "30")?;
    let user_agent = or_default("ENGAGE_USER_AGENT", "engage/0.1 (reply-pipeline)");

    let llm_base_url = or_default("LLM_BASE_URL", "https://api.openai.com/v1");
    let scoring_model = or_default("LLM_SCORING_MODEL", "gpt-4o-mini");
    let reply_model = or_default("LLM_REPLY_MODEL", "gpt-4o-mini");
    let embedding_model = optional("LLM_EMBEDDING_MODEL");
    let persona_prompt_path = optional("ENGAGE_PERSONA_PROMPT_PATH").map(PathBuf::from);

    // Reddit publishes 100 QPM per OAuth client; split between fetch and post.
    let ingest_limiter = parse_limiter(&lookup, "ENGAGE_INGEST", (2, 700, 60, 60))?;
    let llm_limiter = parse_limiter(&lookup, "ENGAGE_LLM", (4, 200, 60, 60))?;
    let post_limiter = parse_limiter(&lookup, "ENGAGE_POST", (1, 2_000, 10, 60))?;

    let ingest_max_retries = parse_var(&lookup, "ENGAGE_INGEST_MAX_RETRIES", "3")?;
    let ingest_backoff_base_ms = parse_var(&lookup, "ENGAGE_INGEST_BACKOFF_BASE_MS", "1000")?;
    let ingest_page_count = parse_var(&lookup, "ENGAGE_INGEST_PAGE_COUNT", "2")?;
    let scoring_batch_size = parse_var(&lookup, "ENGAGE_SCORING_BATCH_SIZE", "20")?;
    let lead_batch_size = parse_var(&lookup, "ENGAGE_LEAD_BATCH_SIZE", "5")?;

    let post_poll_interval_secs = parse_var(&lookup, "ENGAGE_POST_POLL_INTERVAL_SECS", "30")?;
    let post_claim_limit = parse_var(&lookup, "ENGAGE_POST_CLAIM_LIMIT", "25")?;
    let post_jitter_min_secs: u64 = parse_var(&lookup, "ENGAGE_POST_JITTER_MIN_SECS", "30")?;
    let post_jitter_max_secs: u64 = parse_var(&lookup, "ENGAGE_POST_JITTER_MAX_SECS", "120")?;
    if post_jitter_min_secs > post_jitter_max_secs {
        return Err(ConfigError::InvalidEnvVar {
            var: "ENGAGE_POST_JITTER_MIN_SECS".to_string(),
            reason: format!(
                "minimum jitter {post_jitter_min_secs}s exceeds maximum {post_jitter_max_secs}s"
            ),
        });
    }

    let notify_webhook_url = optional("ENGAGE_NOTIFY_WEBHOOK_URL");
    let engagement_cron = or_default("ENGAGE_ENGAGEMENT_CRON", "0 */30 * * * *");
    let leads_cron = or_default("ENGAGE_LEADS_CRON", "0 15 * * * *");

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        tenants_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        http_timeout_secs,
        user_agent,
        reddit_client_id,
        reddit_client_secret,
        llm_api_key,
        llm_base_url,
        scoring_model,
        reply_model,
        embedding_model,
        persona_prompt_path,
        ingest_limiter,
        llm_limiter,
        post_limiter,
        ingest_max_retries,
        ingest_backoff_base_ms,
        ingest_page_count,
        scoring_batch_size,
        lead_batch_size,
        post_poll_interval_secs,
        post_claim_limit,
        post_jitter_min_secs,
        post_jitter_max_secs,
        notify_webhook_url,
        engagement_cron,
        leads_cron,
    })
}

fn parse_var<F, T>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(var).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Reads `<PREFIX>_MAX_CONCURRENT`, `<PREFIX>_MIN_SPACING_MS`,
/// `<PREFIX>_REQUESTS_PER_WINDOW` and `<PREFIX>_WINDOW_SECS`.
fn parse_limiter<F>(
    lookup: &F,
    prefix: &str,
    defaults: (usize, u64, usize, u64),
) -> Result<LimiterSettings, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let (concurrent, spacing, per_window, window) = defaults;
    let settings = LimiterSettings {
        max_concurrent: parse_var(
            lookup,
            &format!("{prefix}_MAX_CONCURRENT"),
            &concurrent.to_string(),
        )?,
        min_spacing_ms: parse_var(
            lookup,
            &format!("{prefix}_MIN_SPACING_MS"),
            &spacing.to_string(),
        )?,
        requests_per_window: parse_var(
            lookup,
            &format!("{prefix}_REQUESTS_PER_WINDOW"),
            &per_window.to_string(),
        )?,
        window_secs: parse_var(
            lookup,
            &format!("{prefix}_WINDOW_SECS"),
            &window.to_string(),
        )?,
    };

    if settings.max_concurrent == 0 || settings.requests_per_window == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: format!("{prefix}_MAX_CONCURRENT"),
            reason: "limiter concurrency and window quota must be at least 1".to_string(),
        });
    }

    Ok(settings)
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "ENGAGE_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

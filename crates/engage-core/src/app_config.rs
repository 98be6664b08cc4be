use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Sizing for one rate-limit domain (ingestion fetch, LLM call, platform post).
///
/// All three knobs apply at once: at most `max_concurrent` requests in flight,
/// at least `min_spacing_ms` between request starts, and no more than
/// `requests_per_window` starts inside any rolling `window_secs` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    pub max_concurrent: usize,
    pub min_spacing_ms: u64,
    pub requests_per_window: usize,
    pub window_secs: u64,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub tenants_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub scoring_model: String,
    pub reply_model: String,
    pub embedding_model: Option<String>,
    pub persona_prompt_path: Option<PathBuf>,
    pub ingest_limiter: LimiterSettings,
    pub llm_limiter: LimiterSettings,
    pub post_limiter: LimiterSettings,
    pub ingest_max_retries: u32,
    pub ingest_backoff_base_ms: u64,
    pub ingest_page_count: usize,
    pub scoring_batch_size: usize,
    pub lead_batch_size: usize,
    pub post_poll_interval_secs: u64,
    pub post_claim_limit: i64,
    pub post_jitter_min_secs: u64,
    pub post_jitter_max_secs: u64,
    pub notify_webhook_url: Option<String>,
    pub engagement_cron: String,
    pub leads_cron: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("tenants_path", &self.tenants_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("reddit_client_id", &self.reddit_client_id)
            .field("reddit_client_secret", &"[redacted]")
            .field("llm_api_key", &"[redacted]")
            .field("llm_base_url", &self.llm_base_url)
            .field("scoring_model", &self.scoring_model)
            .field("reply_model", &self.reply_model)
            .field("embedding_model", &self.embedding_model)
            .field("persona_prompt_path", &self.persona_prompt_path)
            .field("ingest_limiter", &self.ingest_limiter)
            .field("llm_limiter", &self.llm_limiter)
            .field("post_limiter", &self.post_limiter)
            .field("ingest_max_retries", &self.ingest_max_retries)
            .field("ingest_backoff_base_ms", &self.ingest_backoff_base_ms)
            .field("ingest_page_count", &self.ingest_page_count)
            .field("scoring_batch_size", &self.scoring_batch_size)
            .field("lead_batch_size", &self.lead_batch_size)
            .field("post_poll_interval_secs", &self.post_poll_interval_secs)
            .field("post_claim_limit", &self.post_claim_limit)
            .field("post_jitter_min_secs", &self.post_jitter_min_secs)
            .field("post_jitter_max_secs", &self.post_jitter_max_secs)
            .field(
                "notify_webhook_url",
                &self.notify_webhook_url.as_ref().map(|_| "[redacted]"),
            )
            .field("engagement_cron", &self.engagement_cron)
            .field("leads_cron", &self.leads_cron)
            .finish()
    }
}

//! Shared handles and tuning for every pipeline stage.

use std::sync::Arc;
use std::time::Duration;

use engage_core::AppConfig;
use engage_llm::{LanguageModel, OpenAiClient};
use engage_reddit::{RedditClient, RedditConfig, RequestGate};
use sqlx::PgPool;

use crate::error::PipelineError;
use crate::filter::FilterConfig;
use crate::generate::load_persona;
use crate::limiter::Limiters;
use crate::notify::{notifier_from_config, Notifier};
use crate::platform::{ContentSource, ReplyPlatform};

/// Listing page size requested from the platform.
pub const PAGE_SIZE: usize = 50;

/// Tuning knobs derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub page_size: usize,
    pub page_count: usize,
    pub key_concurrency: usize,
    pub filter: FilterConfig,
    pub scoring_model: String,
    pub scoring_batch_size: usize,
    pub scoring_concurrency: usize,
    pub unprocessed_limit: i64,
    pub embedding_model: Option<String>,
    pub reply_model: String,
    pub persona_prompt: String,
    /// How far back reply candidates are considered.
    pub candidate_window: chrono::Duration,
    pub candidate_limit: i64,
    pub lead_batch_size: usize,
    pub lead_scan_limit: i64,
    pub thread_depth: u32,
    pub thread_replies: usize,
    pub claim_limit: i64,
    pub jitter_min_secs: u64,
    pub jitter_max_secs: u64,
    pub poll_interval: Duration,
}

impl PipelineSettings {
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if a configured persona prompt file
    /// cannot be read.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            page_size: PAGE_SIZE,
            page_count: config.ingest_page_count.max(1),
            key_concurrency: config.ingest_limiter.max_concurrent.max(1),
            filter: FilterConfig::default(),
            scoring_model: config.scoring_model.clone(),
            scoring_batch_size: config.scoring_batch_size.max(1),
            scoring_concurrency: config.llm_limiter.max_concurrent.max(1),
            unprocessed_limit: 500,
            embedding_model: config.embedding_model.clone(),
            reply_model: config.reply_model.clone(),
            persona_prompt: load_persona(config.persona_prompt_path.as_deref())?,
            candidate_window: chrono::Duration::days(7),
            candidate_limit: 100,
            lead_batch_size: config.lead_batch_size.max(1),
            lead_scan_limit: 500,
            thread_depth: 3,
            thread_replies: 25,
            claim_limit: config.post_claim_limit.max(1),
            jitter_min_secs: config.post_jitter_min_secs,
            jitter_max_secs: config.post_jitter_max_secs.max(config.post_jitter_min_secs),
            poll_interval: Duration::from_secs(config.post_poll_interval_secs.max(1)),
        })
    }
}

/// Everything a stage needs: the pool, external collaborators behind traits,
/// the per-domain limiters and settings. Cheap to clone.
#[derive(Clone)]
pub struct PipelineContext {
    pub pool: PgPool,
    pub source: Arc<dyn ContentSource>,
    pub platform: Arc<dyn ReplyPlatform>,
    pub llm: Arc<dyn LanguageModel>,
    pub notifier: Arc<dyn Notifier>,
    pub limiters: Limiters,
    pub settings: Arc<PipelineSettings>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("limiters", &self.limiters)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Builds the production context: one Reddit client serving both the
    /// read and write seams, an OpenAI-compatible model client and the
    /// configured notifier. The client's reads are gated by the ingest
    /// limiter.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any client cannot be constructed or the
    /// persona prompt cannot be read.
    pub fn from_app_config(pool: PgPool, config: &AppConfig) -> Result<Self, PipelineError> {
        let limiters = Limiters::from_app_config(config);
        let reddit = Arc::new(
            RedditClient::new(RedditConfig::from_app_config(config))?
                .with_read_gate(Arc::clone(&limiters.ingest) as Arc<dyn RequestGate>),
        );
        let llm = Arc::new(OpenAiClient::from_app_config(config)?);

        Ok(Self {
            pool,
            source: Arc::clone(&reddit) as Arc<dyn ContentSource>,
            platform: reddit,
            llm,
            notifier: notifier_from_config(config)?,
            limiters,
            settings: Arc::new(PipelineSettings::from_app_config(config)?),
        })
    }
}

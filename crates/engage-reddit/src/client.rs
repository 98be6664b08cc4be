//! HTTP client for the Reddit API.
//!
//! Reads (search, community listings, threads) use an application-only token
//! from the client-credentials grant, cached until shortly before it expires.
//! Writes (replies) use the per-account user token passed in by the caller;
//! refreshing that token is a separate call so the caller can serialize it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, Url};
use tokio::sync::Mutex;

use crate::error::RedditError;
use crate::gate::RequestGate;
use crate::retry::retry_with_backoff;
use crate::types::{
    flatten_comments, AppTokenResponse, CommentResponse, CreatedThing, Listing, ListingPage,
    PostedComment, Thread, TokenGrant,
};

const DEFAULT_API_BASE_URL: &str = "https://oauth.reddit.com/";
const DEFAULT_AUTH_BASE_URL: &str = "https://www.reddit.com/";
const APP_TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Connection settings for [`RedditClient`].
#[derive(Clone)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl std::fmt::Debug for RedditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .finish()
    }
}

impl RedditConfig {
    #[must_use]
    pub fn from_app_config(config: &engage_core::AppConfig) -> Self {
        Self {
            client_id: config.reddit_client_id.clone(),
            client_secret: config.reddit_client_secret.clone(),
            user_agent: config.user_agent.clone(),
            timeout_secs: config.http_timeout_secs,
            max_retries: config.ingest_max_retries,
            backoff_base_ms: config.ingest_backoff_base_ms,
        }
    }
}

struct AppToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Client for the Reddit API.
///
/// Use [`RedditClient::new`] for production or
/// [`RedditClient::with_base_urls`] to point at a mock server in tests.
pub struct RedditClient {
    client: Client,
    config: RedditConfig,
    api_base: Url,
    auth_base: Url,
    app_token: Mutex<Option<AppToken>>,
    read_gate: Option<Arc<dyn RequestGate>>,
}

impl RedditClient {
    /// Creates a client pointed at the production Reddit hosts.
    ///
    /// # Errors
    ///
    /// Returns [`RedditError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(config: RedditConfig) -> Result<Self, RedditError> {
        Self::with_base_urls(config, DEFAULT_API_BASE_URL, DEFAULT_AUTH_BASE_URL)
    }

    /// Creates a client with custom API and auth hosts (for wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`RedditError::Http`] if the `reqwest::Client` cannot be
    /// constructed, or [`RedditError::InvalidBaseUrl`] if either URL is
    /// invalid.
    pub fn with_base_urls(
        config: RedditConfig,
        api_base: &str,
        auth_base: &str,
    ) -> Result<Self, RedditError> {
        // oauth.reddit.com sometimes blocks rustls via TLS fingerprinting.
        // If rejected, enable `native-tls` on reqwest and call `.use_native_tls()`.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config,
            api_base: normalise_base(api_base)?,
            auth_base: normalise_base(auth_base)?,
            app_token: Mutex::new(None),
            read_gate: None,
        })
    }

    /// Admits every read attempt (listings and threads, retries included)
    /// through `gate` before it is sent.
    #[must_use]
    pub fn with_read_gate(mut self, gate: Arc<dyn RequestGate>) -> Self {
        self.read_gate = Some(gate);
        self
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Site-wide search for posts matching `query`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RedditError`] once retries are exhausted or on a
    /// non-retriable failure.
    pub async fn search(
        &self,
        query: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListingPage, RedditError> {
        let mut params = vec![
            ("q", query.to_string()),
            ("sort", "new".to_string()),
            ("type", "link".to_string()),
            ("limit", limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(cursor) = after {
            params.push(("after", cursor.to_string()));
        }
        self.listing("search", &params).await
    }

    /// Newest posts in a community.
    ///
    /// # Errors
    ///
    /// Returns [`RedditError`] once retries are exhausted or on a
    /// non-retriable failure.
    pub async fn community_new(
        &self,
        community: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListingPage, RedditError> {
        self.community_listing(community, "new", after, limit).await
    }

    /// Newest comments across a community.
    ///
    /// # Errors
    ///
    /// Returns [`RedditError`] once retries are exhausted or on a
    /// non-retriable failure.
    pub async fn community_comments(
        &self,
        community: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListingPage, RedditError> {
        self.community_listing(community, "comments", after, limit)
            .await
    }

    async fn community_listing(
        &self,
        community: &str,
        listing: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListingPage, RedditError> {
        let mut params = vec![
            ("limit", limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(cursor) = after {
            params.push(("after", cursor.to_string()));
        }
        self.listing(&format!("r/{community}/{listing}"), &params)
            .await
    }

    async fn listing(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ListingPage, RedditError> {
        let url = self.api_url(path)?;
        let listing: Listing = retry_with_backoff(
            self.config.max_retries,
            self.config.backoff_base_ms,
            || self.get_json(url.clone(), params),
        )
        .await?;

        Ok(ListingPage {
            items: listing
                .data
                .children
                .into_iter()
                .filter_map(crate::types::RawThing::into_item)
                .collect(),
            after: listing.data.after,
        })
    }

    /// Reconstructs a post and its comment tree, at most `max_depth` levels
    /// deep and `max_replies` children per node.
    ///
    /// Returns `Ok(None)` when the post is deleted, private, or otherwise
    /// answers 403/404.
    ///
    /// # Errors
    ///
    /// Returns [`RedditError`] once retries are exhausted or on a
    /// non-retriable failure other than a missing resource.
    pub async fn fetch_thread(
        &self,
        post_id: &str,
        max_depth: u32,
        max_replies: usize,
    ) -> Result<Option<Thread>, RedditError> {
        let post_id = post_id.trim_start_matches("t3_");
        let url = self.api_url(&format!("comments/{post_id}"))?;
        let params = [
            ("depth", max_depth.to_string()),
            ("limit", max_replies.to_string()),
            ("raw_json", "1".to_string()),
        ];

        let result: Result<Vec<Listing>, RedditError> = retry_with_backoff(
            self.config.max_retries,
            self.config.backoff_base_ms,
            || self.get_json(url.clone(), &params),
        )
        .await;

        let listings = match result {
            Ok(listings) => listings,
            Err(e) if e.is_missing_resource() => {
                tracing::debug!(post_id, error = %e, "thread unavailable; skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut listings = listings.into_iter();
        let Some(post) = listings
            .next()
            .and_then(|l| l.data.children.into_iter().next())
            .and_then(crate::types::RawThing::into_item)
        else {
            return Ok(None);
        };

        let mut comments = Vec::new();
        if let Some(tree) = listings.next() {
            flatten_comments(tree.data.children, 0, max_depth, max_replies, &mut comments);
        }

        Ok(Some(Thread { post, comments }))
    }

    // -----------------------------------------------------------------------
    // OAuth
    // -----------------------------------------------------------------------

    /// Exchanges a user refresh token for a fresh access token.
    ///
    /// Not retried: the caller holds the per-account refresh lock and decides
    /// what a failure means for the interaction being posted.
    ///
    /// # Errors
    ///
    /// Returns [`RedditError::Unauthorized`] if Reddit rejects the refresh
    /// token, or another [`RedditError`] on transport or decode failure.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, RedditError> {
        let url = self.auth_url("api/v1/access_token")?;
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let body = check_status(response).await.map_err(|e| match e {
            RedditError::Status {
                status: 400,
                body,
            } => RedditError::Unauthorized(format!("refresh rejected: {body}")),
            other => other,
        })?;

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| RedditError::Deserialize {
                context: "access_token(refresh_token)".to_string(),
                source: e,
            })?;

        // Reddit answers some grant failures with 200 and an `error` field.
        if let Some(error) = value.get("error").and_then(serde_json::Value::as_str) {
            return Err(RedditError::Unauthorized(format!("refresh rejected: {error}")));
        }

        serde_json::from_value(value).map_err(|e| RedditError::Deserialize {
            context: "access_token(refresh_token)".to_string(),
            source: e,
        })
    }

    async fn app_token(&self) -> Result<String, RedditError> {
        let mut cached = self.app_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.token.clone());
            }
        }

        let url = self.auth_url("api/v1/access_token")?;
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let body = check_status(response).await?;

        let parsed: AppTokenResponse =
            serde_json::from_str(&body).map_err(|e| RedditError::Deserialize {
                context: "access_token(client_credentials)".to_string(),
                source: e,
            })?;

        let lifetime = (parsed.expires_in - APP_TOKEN_EXPIRY_MARGIN_SECS).max(0);
        let token = parsed.access_token;
        *cached = Some(AppToken {
            token: token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        });
        tracing::debug!(expires_in = parsed.expires_in, "obtained Reddit app token");

        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Posts `text` as a reply to `parent_fullname` (`t3_…` or `t1_…`) with
    /// the account's user token.
    ///
    /// # Errors
    ///
    /// - [`RedditError::RateLimited`] for 429 or a `RATELIMIT` reply error,
    ///   with the requested wait when one can be read.
    /// - [`RedditError::Unauthorized`] for 401 or token-related reply errors.
    /// - [`RedditError::Rejected`] for any other reply error.
    /// - [`RedditError::Http`]/[`RedditError::Status`] for transport failures.
    pub async fn post_comment(
        &self,
        access_token: &str,
        parent_fullname: &str,
        text: &str,
    ) -> Result<PostedComment, RedditError> {
        let url = self.api_url("api/comment")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .form(&[
                ("api_type", "json"),
                ("thing_id", parent_fullname),
                ("text", text),
            ])
            .send()
            .await?;

        let body = check_status(response).await?;
        let parsed: CommentResponse =
            serde_json::from_str(&body).map_err(|e| RedditError::Deserialize {
                context: format!("comment(thing_id={parent_fullname})"),
                source: e,
            })?;

        if let Some(first) = parsed.json.errors.first() {
            let code = first.first().and_then(serde_json::Value::as_str).unwrap_or("UNKNOWN");
            let message = first.get(1).and_then(serde_json::Value::as_str).unwrap_or(code);
            return Err(RedditError::from_reply_error(code, message));
        }

        let thing = parsed
            .json
            .data
            .and_then(|d| d.things.into_iter().next())
            .ok_or_else(|| RedditError::Rejected {
                code: "EMPTY_RESPONSE".to_string(),
                message: "reply accepted without a created comment".to_string(),
            })?;

        let created: CreatedThing =
            serde_json::from_value(thing.data).map_err(|e| RedditError::Deserialize {
                context: format!("comment(thing_id={parent_fullname}).things[0]"),
                source: e,
            })?;

        Ok(PostedComment {
            id: created.id,
            fullname: created.name,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn api_url(&self, path: &str) -> Result<Url, RedditError> {
        self.api_base
            .join(path)
            .map_err(|e| RedditError::InvalidBaseUrl(format!("{path}: {e}")))
    }

    fn auth_url(&self, path: &str) -> Result<Url, RedditError> {
        self.auth_base
            .join(path)
            .map_err(|e| RedditError::InvalidBaseUrl(format!("{path}: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        params: &[(&str, String)],
    ) -> Result<T, RedditError> {
        let token = self.app_token().await?;
        let context = url.path().to_string();
        let _permit = match &self.read_gate {
            Some(gate) => Some(gate.admit().await?),
            None => None,
        };
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(params)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked early; drop it so the next attempt fetches another.
            *self.app_token.lock().await = None;
        }

        let body = check_status(response).await?;
        serde_json::from_str(&body).map_err(|e| RedditError::Deserialize { context, source: e })
    }
}

/// Ensures the URL ends with exactly one slash so `join` appends rather than
/// replacing the last path segment.
fn normalise_base(base: &str) -> Result<Url, RedditError> {
    let normalised = format!("{}/", base.trim_end_matches('/'));
    Url::parse(&normalised).map_err(|e| RedditError::InvalidBaseUrl(format!("'{base}': {e}")))
}

/// Returns the body of a 2xx response or the matching error for anything else.
async fn check_status(response: Response) -> Result<String, RedditError> {
    let status = response.status();

    let reset_hint = response
        .headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0 && *secs < 86_400.0)
        .map(Duration::from_secs_f64);

    let body = response.text().await?;

    if status.is_success() {
        return Ok(body);
    }

    match status.as_u16() {
        429 => Err(RedditError::RateLimited {
            retry_after: reset_hint.or_else(|| crate::ratelimit::parse_rate_limit_hint(&body)),
            message: truncate(&body),
        }),
        401 => Err(RedditError::Unauthorized(truncate(&body))),
        code => Err(RedditError::Status {
            status: code,
            body: truncate(&body),
        }),
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedditConfig {
        RedditConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            user_agent: "engage-test/0.1".to_string(),
            timeout_secs: 5,
            max_retries: 0,
            backoff_base_ms: 0,
        }
    }

    #[test]
    fn base_url_gets_single_trailing_slash() {
        let client =
            RedditClient::with_base_urls(config(), "https://oauth.reddit.com//", "https://www.reddit.com")
                .expect("client");
        assert_eq!(
            client.api_url("r/startups/new").unwrap().as_str(),
            "https://oauth.reddit.com/r/startups/new"
        );
        assert_eq!(
            client.auth_url("api/v1/access_token").unwrap().as_str(),
            "https://www.reddit.com/api/v1/access_token"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = RedditClient::with_base_urls(config(), "not a url", "https://www.reddit.com");
        assert!(matches!(result, Err(RedditError::InvalidBaseUrl(_))));
    }

    #[test]
    fn truncate_keeps_short_bodies() {
        assert_eq!(truncate("short"), "short");
        assert_eq!(truncate(&"x".repeat(400)).chars().count(), 301);
    }

    #[test]
    fn config_debug_redacts_secret() {
        assert!(!format!("{:?}", config()).contains("\"secret\""));
    }
}

//! Seams between the pipeline and the external platform.
//!
//! Stages depend on these traits rather than on [`RedditClient`] directly so
//! they can run against in-memory fakes in tests.

use async_trait::async_trait;
use engage_reddit::{ListingPage, PostedComment, RedditClient, RedditError, Thread, TokenGrant};

/// One ingestion query for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchKey {
    /// Site-wide keyword search over posts.
    Keyword(String),
    /// Newest posts in a community.
    CommunityPosts(String),
    /// Newest comments in a community.
    CommunityComments(String),
}

impl std::fmt::Display for SearchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchKey::Keyword(q) => write!(f, "search:{q}"),
            SearchKey::CommunityPosts(c) => write!(f, "r/{c}/new"),
            SearchKey::CommunityComments(c) => write!(f, "r/{c}/comments"),
        }
    }
}

/// Read side of the platform: paged listings and thread reconstruction.
///
/// Request budgeting belongs to the implementation, per HTTP attempt. The
/// production client is gated by the ingest limiter.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_page(
        &self,
        key: &SearchKey,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListingPage, RedditError>;

    /// `Ok(None)` when the post no longer exists or is not visible.
    async fn fetch_thread(
        &self,
        post_id: &str,
        max_depth: u32,
        max_replies: usize,
    ) -> Result<Option<Thread>, RedditError>;
}

/// Write side of the platform: token refresh and reply posting.
#[async_trait]
pub trait ReplyPlatform: Send + Sync {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, RedditError>;

    async fn post_reply(
        &self,
        access_token: &str,
        parent_fullname: &str,
        text: &str,
    ) -> Result<PostedComment, RedditError>;
}

#[async_trait]
impl ContentSource for RedditClient {
    async fn fetch_page(
        &self,
        key: &SearchKey,
        after: Option<&str>,
        limit: usize,
    ) -> Result<ListingPage, RedditError> {
        match key {
            SearchKey::Keyword(q) => self.search(q, after, limit).await,
            SearchKey::CommunityPosts(c) => self.community_new(c, after, limit).await,
            SearchKey::CommunityComments(c) => self.community_comments(c, after, limit).await,
        }
    }

    async fn fetch_thread(
        &self,
        post_id: &str,
        max_depth: u32,
        max_replies: usize,
    ) -> Result<Option<Thread>, RedditError> {
        RedditClient::fetch_thread(self, post_id, max_depth, max_replies).await
    }
}

#[async_trait]
impl ReplyPlatform for RedditClient {
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, RedditError> {
        RedditClient::refresh_access_token(self, refresh_token).await
    }

    async fn post_reply(
        &self,
        access_token: &str,
        parent_fullname: &str,
        text: &str,
    ) -> Result<PostedComment, RedditError> {
        self.post_comment(access_token, parent_fullname, text).await
    }
}

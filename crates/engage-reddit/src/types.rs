//! Wire types for Reddit responses and the normalized values the client
//! returns.

use chrono::{DateTime, Utc};
use engage_core::ItemKind;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Public, normalized types
// ---------------------------------------------------------------------------

/// A post or comment, normalized from a listing child.
#[derive(Debug, Clone, PartialEq)]
pub struct RedditItem {
    pub kind: ItemKind,
    /// Base-36 id without the `t3_`/`t1_` prefix.
    pub id: String,
    pub author: String,
    /// Posts only.
    pub title: Option<String>,
    pub body: String,
    pub permalink: Option<String>,
    pub community: String,
    pub up_score: i64,
    pub down_score: i64,
    pub created_utc: Option<DateTime<Utc>>,
    /// For comments, the fullname of the post the comment belongs to.
    pub link_id: Option<String>,
}

impl RedditItem {
    /// The `t3_…`/`t1_…` fullname used as a reply target.
    #[must_use]
    pub fn fullname(&self) -> String {
        format!("{}{}", self.kind.fullname_prefix(), self.id)
    }
}

/// One page of a listing plus the cursor for the next page.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub items: Vec<RedditItem>,
    pub after: Option<String>,
}

/// A comment in a reconstructed thread, flattened depth-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadComment {
    pub id: String,
    pub author: String,
    pub body: String,
    /// `0` for top-level comments.
    pub depth: u32,
}

/// A post and (a bounded slice of) its comment tree.
#[derive(Debug, Clone)]
pub struct Thread {
    pub post: RedditItem,
    pub comments: Vec<ThreadComment>,
}

/// Result of an OAuth refresh-token grant.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Reddit only rotates the refresh token for some app types.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// The comment created by a successful reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedComment {
    pub id: String,
    pub fullname: String,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct AppTokenResponse {
    pub(crate) access_token: String,
    pub(crate) expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Listing {
    pub(crate) data: ListingData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub(crate) children: Vec<RawThing>,
    pub(crate) after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawThing {
    pub(crate) kind: String,
    pub(crate) data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    #[serde(default)]
    author: String,
    title: Option<String>,
    #[serde(default)]
    selftext: String,
    url: Option<String>,
    #[serde(default)]
    is_self: bool,
    permalink: Option<String>,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    downs: i64,
    created_utc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    body: String,
    permalink: Option<String>,
    #[serde(default)]
    subreddit: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    downs: i64,
    created_utc: Option<f64>,
    link_id: Option<String>,
    /// Either `""` or a nested listing.
    #[serde(default)]
    replies: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentResponse {
    pub(crate) json: CommentResponseJson,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentResponseJson {
    #[serde(default)]
    pub(crate) errors: Vec<Vec<serde_json::Value>>,
    pub(crate) data: Option<CommentResponseData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentResponseData {
    #[serde(default)]
    pub(crate) things: Vec<RawThing>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedThing {
    pub(crate) id: String,
    pub(crate) name: String,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn timestamp(created_utc: Option<f64>) -> Option<DateTime<Utc>> {
    #[allow(clippy::cast_possible_truncation)]
    created_utc.and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
}

impl RawThing {
    /// Normalizes a `t3` or `t1` child. Other kinds (`more`, awards, ...)
    /// and undecodable children yield `None`.
    pub(crate) fn into_item(self) -> Option<RedditItem> {
        match self.kind.as_str() {
            "t3" => {
                let post: RawPost = serde_json::from_value(self.data).ok()?;
                let body = if post.selftext.is_empty() && !post.is_self {
                    post.url.unwrap_or_default()
                } else {
                    post.selftext
                };
                Some(RedditItem {
                    kind: ItemKind::Post,
                    id: post.id,
                    author: post.author,
                    title: post.title,
                    body,
                    permalink: post.permalink,
                    community: post.subreddit,
                    up_score: post.ups,
                    down_score: post.downs,
                    created_utc: timestamp(post.created_utc),
                    link_id: None,
                })
            }
            "t1" => {
                let comment: RawComment = serde_json::from_value(self.data).ok()?;
                Some(comment_item(comment))
            }
            _ => None,
        }
    }
}

fn comment_item(comment: RawComment) -> RedditItem {
    RedditItem {
        kind: ItemKind::Comment,
        id: comment.id,
        author: comment.author,
        title: None,
        body: comment.body,
        permalink: comment.permalink,
        community: comment.subreddit,
        up_score: comment.ups,
        down_score: comment.downs,
        created_utc: timestamp(comment.created_utc),
        link_id: comment.link_id,
    }
}

/// Flattens a comment listing depth-first, keeping at most `max_depth`
/// levels and `max_replies` children per node.
pub(crate) fn flatten_comments(
    children: Vec<RawThing>,
    depth: u32,
    max_depth: u32,
    max_replies: usize,
    out: &mut Vec<ThreadComment>,
) {
    if depth >= max_depth {
        return;
    }

    for child in children
        .into_iter()
        .filter(|c| c.kind == "t1")
        .take(max_replies)
    {
        let Ok(comment) = serde_json::from_value::<RawComment>(child.data) else {
            continue;
        };
        let nested = serde_json::from_value::<Listing>(comment.replies)
            .map(|l| l.data.children)
            .unwrap_or_default();

        out.push(ThreadComment {
            id: comment.id,
            author: comment.author,
            body: comment.body,
            depth,
        });

        flatten_comments(nested, depth + 1, max_depth, max_replies, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(id: &str, replies: serde_json::Value) -> serde_json::Value {
        json!({
            "kind": "t1",
            "data": { "id": id, "author": format!("user_{id}"), "body": format!("body {id}"), "replies": replies }
        })
    }

    fn listing(children: Vec<serde_json::Value>) -> serde_json::Value {
        json!({ "kind": "Listing", "data": { "children": children, "after": null } })
    }

    #[test]
    fn post_child_normalizes_with_fullname() {
        let thing: RawThing = serde_json::from_value(json!({
            "kind": "t3",
            "data": {
                "id": "1abcde", "author": "founder_jane", "title": "Need a CRM",
                "selftext": "Spreadsheets are failing us", "is_self": true,
                "permalink": "/r/startups/comments/1abcde/need_a_crm/",
                "subreddit": "startups", "ups": 14, "downs": 0, "created_utc": 1_767_225_600.0
            }
        }))
        .unwrap();

        let item = thing.into_item().expect("post normalizes");
        assert_eq!(item.kind, ItemKind::Post);
        assert_eq!(item.fullname(), "t3_1abcde");
        assert_eq!(item.body, "Spreadsheets are failing us");
        assert_eq!(item.community, "startups");
        assert!(item.created_utc.is_some());
    }

    #[test]
    fn link_post_without_selftext_uses_url() {
        let thing: RawThing = serde_json::from_value(json!({
            "kind": "t3",
            "data": { "id": "x", "title": "Look", "selftext": "", "is_self": false, "url": "https://example.com/a" }
        }))
        .unwrap();
        assert_eq!(thing.into_item().unwrap().body, "https://example.com/a");
    }

    #[test]
    fn more_children_are_ignored() {
        let thing: RawThing =
            serde_json::from_value(json!({ "kind": "more", "data": { "count": 3 } })).unwrap();
        assert!(thing.into_item().is_none());
    }

    #[test]
    fn flatten_respects_depth_and_reply_caps() {
        let deep = comment(
            "a",
            listing(vec![comment(
                "b",
                listing(vec![comment("c", listing(vec![comment("d", json!(""))]))]),
            )]),
        );
        let children: Vec<RawThing> = vec![
            serde_json::from_value(deep).unwrap(),
            serde_json::from_value(comment("e", json!(""))).unwrap(),
            serde_json::from_value(comment("f", json!(""))).unwrap(),
        ];

        let mut out = Vec::new();
        flatten_comments(children, 0, 3, 2, &mut out);

        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "e"]);
        assert_eq!(out[2].depth, 2);
    }

    #[test]
    fn token_grant_debug_redacts() {
        let grant = TokenGrant {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_in: 3600,
            scope: None,
        };
        let rendered = format!("{grant:?}");
        assert!(!rendered.contains("secret"));
    }
}

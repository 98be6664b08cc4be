//! Reddit API client: listing search, thread reconstruction, OAuth token
//! refresh and reply posting.

pub mod client;
pub mod error;
pub mod gate;
pub mod ratelimit;
pub(crate) mod retry;
pub mod types;

pub use client::{RedditClient, RedditConfig};
pub use error::RedditError;
pub use gate::{GatePermit, RequestGate};
pub use ratelimit::parse_rate_limit_hint;
pub use types::{ListingPage, PostedComment, RedditItem, Thread, ThreadComment, TokenGrant};

//! Admission control for read requests.
//!
//! A [`RequestGate`] attached to the client is awaited before every read
//! attempt, retries included, so a caller's request budget sees each HTTP
//! call the client actually makes.

use async_trait::async_trait;

use crate::error::RedditError;

/// Held while one request is in flight; dropping it releases the slot.
pub type GatePermit = Box<dyn Send + Sync>;

#[async_trait]
pub trait RequestGate: Send + Sync {
    /// Waits until one more request may be sent.
    ///
    /// # Errors
    ///
    /// Returns [`RedditError::GateClosed`] if the gate no longer admits
    /// requests.
    async fn admit(&self) -> Result<GatePermit, RedditError>;
}

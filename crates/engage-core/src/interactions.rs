use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a stored status or kind string has no matching variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Lifecycle of a generated reply.
///
/// `new → scheduled → posted | permanently_failed`. `scheduled` may loop on
/// itself through back-off, and `permanently_failed → new` is the manual
/// re-review edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    New,
    Scheduled,
    Posted,
    PermanentlyFailed,
}

impl InteractionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionStatus::New => "new",
            InteractionStatus::Scheduled => "scheduled",
            InteractionStatus::Posted => "posted",
            InteractionStatus::PermanentlyFailed => "permanently_failed",
        }
    }

    /// Terminal states are never picked up again by automation.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InteractionStatus::Posted | InteractionStatus::PermanentlyFailed
        )
    }

    /// Whether a transition from `self` to `next` is part of the lifecycle.
    #[must_use]
    pub fn can_transition_to(self, next: InteractionStatus) -> bool {
        use InteractionStatus::{New, PermanentlyFailed, Posted, Scheduled};
        matches!(
            (self, next),
            (New, Scheduled)
                | (Scheduled, Scheduled | Posted | PermanentlyFailed)
                | (PermanentlyFailed, New)
        )
    }
}

impl fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(InteractionStatus::New),
            "scheduled" => Ok(InteractionStatus::Scheduled),
            "posted" => Ok(InteractionStatus::Posted),
            "permanently_failed" => Ok(InteractionStatus::PermanentlyFailed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Kind of discovered content. The platform id namespace differs per kind,
/// so dedup is keyed on `(kind, external_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    Comment,
}

impl ItemKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Post => "post",
            ItemKind::Comment => "comment",
        }
    }

    /// Reddit "fullname" prefix used when replying to an item of this kind.
    #[must_use]
    pub fn fullname_prefix(self) -> &'static str {
        match self {
            ItemKind::Post => "t3_",
            ItemKind::Comment => "t1_",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(ItemKind::Post),
            "comment" => Ok(ItemKind::Comment),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

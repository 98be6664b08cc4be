//! Extraction of the wait time embedded in Reddit's rate-limit messages.
//!
//! Reddit reports reply throttling as free text, e.g.
//! `"Looks like you've been doing that a lot. Take a break for 4 minutes
//! before trying again."`. The phrasing has drifted over the years, so the
//! parser only looks for a `<count> <unit>` pair anywhere in the message.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+|an?)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?)\b")
        .expect("valid rate-limit hint regex")
});

/// Returns the wait requested by a rate-limit message, if one is stated.
///
/// Units understood: seconds, minutes, hours (and their short forms). "a
/// minute" and "an hour" count as one. When several durations appear the
/// first one wins.
#[must_use]
pub fn parse_rate_limit_hint(message: &str) -> Option<Duration> {
    let caps = HINT_RE.captures(message)?;

    let count_raw = caps.get(1)?.as_str();
    let count: u64 = if count_raw.eq_ignore_ascii_case("a") || count_raw.eq_ignore_ascii_case("an")
    {
        1
    } else {
        count_raw.parse().ok()?
    };

    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    let secs_per_unit = if unit.starts_with('s') {
        1
    } else if unit.starts_with('m') {
        60
    } else {
        3_600
    };

    Some(Duration::from_secs(count.saturating_mul(secs_per_unit)))
}

//! Heuristic quality filter run before any paid model call.
//!
//! [`classify`] is pure: the same input and config always produce the same
//! verdict, with reasons in a fixed order.

use std::sync::LazyLock;

use regex::Regex;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://|www\.)([a-z0-9][a-z0-9.-]*)").expect("valid url regex")
});

const REMOVED_SENTINELS: &[&str] = &["[deleted]", "[removed]"];

const DEFAULT_SHORTENERS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "t.co",
    "goo.gl",
    "ow.ly",
    "is.gd",
    "buff.ly",
    "rebrand.ly",
    "cutt.ly",
    "shorturl.at",
];

const DEFAULT_ACRONYMS: &[&str] = &[
    "AI", "API", "B2B", "B2C", "CEO", "CRM", "CTO", "ERP", "FAQ", "HR", "IT", "KPI", "MVP", "ROI",
    "SAAS", "SEO", "SQL", "UI", "UK", "US", "USA", "UX",
];

/// Why an item was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterReason {
    Removed,
    TooManyLinks,
    ShortenerLink,
    ExcessiveCaps,
    TooLong,
    LowEngagement,
}

impl FilterReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FilterReason::Removed => "removed",
            FilterReason::TooManyLinks => "too_many_links",
            FilterReason::ShortenerLink => "shortener_link",
            FilterReason::ExcessiveCaps => "excessive_caps",
            FilterReason::TooLong => "too_long",
            FilterReason::LowEngagement => "low_engagement",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub max_links: usize,
    /// Share of upper-case words above which text counts as shouting.
    pub max_caps_ratio: f64,
    /// Fewer eligible words than this never trips the caps rule.
    pub min_caps_words: usize,
    pub max_length: usize,
    /// Lowest acceptable `up - down`.
    pub min_net_engagement: i64,
    pub shortener_domains: Vec<String>,
    /// Upper-case tokens that never count towards the caps ratio.
    pub acronyms: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_links: 3,
            max_caps_ratio: 0.5,
            min_caps_words: 5,
            max_length: 5000,
            min_net_engagement: -5,
            shortener_domains: DEFAULT_SHORTENERS.iter().map(|d| (*d).to_string()).collect(),
            acronyms: DEFAULT_ACRONYMS.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// The text and engagement of one candidate.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub title: Option<&'a str>,
    pub body: &'a str,
    pub up_score: i64,
    pub down_score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    pub is_spam: bool,
    pub reasons: Vec<FilterReason>,
}

impl FilterVerdict {
    /// Comma-separated reason codes, e.g. `too_many_links, shortener_link`.
    #[must_use]
    pub fn describe(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Classifies one candidate. Every rule is evaluated; several reasons can
/// fire at once.
#[must_use]
pub fn classify(input: &FilterInput<'_>, config: &FilterConfig) -> FilterVerdict {
    let text = match input.title {
        Some(title) if !title.trim().is_empty() => format!("{title}\n{}", input.body),
        _ => input.body.to_string(),
    };

    let mut reasons = Vec::new();

    let body = input.body.trim();
    if REMOVED_SENTINELS.iter().any(|s| body.eq_ignore_ascii_case(s)) {
        reasons.push(FilterReason::Removed);
    }

    let hosts: Vec<String> = URL_RE
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .map(|m| normalize_host(m.as_str()))
        .collect();

    if hosts.len() > config.max_links {
        reasons.push(FilterReason::TooManyLinks);
    }

    if hosts
        .iter()
        .any(|host| is_shortener(host, &config.shortener_domains))
    {
        reasons.push(FilterReason::ShortenerLink);
    }

    if caps_ratio_exceeded(&text, config) {
        reasons.push(FilterReason::ExcessiveCaps);
    }

    if text.chars().count() > config.max_length {
        reasons.push(FilterReason::TooLong);
    }

    if input.up_score.saturating_sub(input.down_score) < config.min_net_engagement {
        reasons.push(FilterReason::LowEngagement);
    }

    FilterVerdict {
        is_spam: !reasons.is_empty(),
        reasons,
    }
}

fn normalize_host(raw: &str) -> String {
    let host = raw.trim_end_matches('.').to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

fn is_shortener(host: &str, domains: &[String]) -> bool {
    domains.iter().any(|d| {
        let d = d.to_ascii_lowercase();
        host == d || host.ends_with(&format!(".{d}"))
    })
}

fn caps_ratio_exceeded(text: &str, config: &FilterConfig) -> bool {
    let mut eligible = 0usize;
    let mut upper = 0usize;

    for word in text.split_whitespace() {
        let letters: String = word.chars().filter(char::is_ascii_alphabetic).collect();
        if letters.len() < 2 {
            continue;
        }
        let canonical = letters.to_ascii_uppercase();
        if config.acronyms.iter().any(|a| {
            a.chars()
                .filter(char::is_ascii_alphabetic)
                .map(|c| c.to_ascii_uppercase())
                .eq(canonical.chars())
        }) {
            continue;
        }
        eligible += 1;
        if letters == canonical {
            upper += 1;
        }
    }

    if eligible < config.min_caps_words.max(1) {
        return false;
    }

    #[allow(clippy::cast_precision_loss)]
    let ratio = upper as f64 / eligible as f64;
    ratio > config.max_caps_ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(body: &str) -> FilterInput<'_> {
        FilterInput {
            title: None,
            body,
            up_score: 1,
            down_score: 0,
        }
    }

    #[test]
    fn ordinary_question_passes() {
        let verdict = classify(
            &input("We are five people and outgrew spreadsheets. Need a CRM, budget $500."),
            &FilterConfig::default(),
        );
        assert!(!verdict.is_spam);
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn sentinel_bodies_are_removed() {
        for body in ["[deleted]", " [removed] ", "[Deleted]"] {
            let verdict = classify(&input(body), &FilterConfig::default());
            assert_eq!(verdict.reasons, vec![FilterReason::Removed], "{body}");
        }
    }

    #[test]
    fn link_count_above_max_is_rejected() {
        let body = "see https://a.com https://b.com www.c.com and http://d.com";
        let verdict = classify(&input(body), &FilterConfig::default());
        assert_eq!(verdict.reasons, vec![FilterReason::TooManyLinks]);

        let three = "see https://a.com https://b.com https://c.com";
        assert!(!classify(&input(three), &FilterConfig::default()).is_spam);
    }

    #[test]
    fn shortener_domains_match_subdomains() {
        let verdict = classify(
            &input("grab it at https://www.bit.ly/x1 today"),
            &FilterConfig::default(),
        );
        assert_eq!(verdict.reasons, vec![FilterReason::ShortenerLink]);

        let not_shortener = classify(
            &input("docs at https://notbit.ly/x"),
            &FilterConfig::default(),
        );
        assert!(!not_shortener.is_spam);
    }

    #[test]
    fn shouting_is_rejected_but_acronyms_are_not() {
        let shouting = classify(
            &input("BUY THIS AMAZING CRM TOOL RIGHT NOW"),
            &FilterConfig::default(),
        );
        assert_eq!(shouting.reasons, vec![FilterReason::ExcessiveCaps]);

        let acronyms = classify(
            &input("Which CRM has the best API for SAAS and B2B teams in the USA?"),
            &FilterConfig::default(),
        );
        assert!(!acronyms.is_spam);
    }

    #[test]
    fn short_upper_case_text_does_not_trip_caps_rule() {
        assert!(!classify(&input("THANKS A LOT"), &FilterConfig::default()).is_spam);
    }

    #[test]
    fn length_and_engagement_limits() {
        let config = FilterConfig {
            max_length: 10,
            ..FilterConfig::default()
        };
        let long = classify(&input("this body is too long"), &config);
        assert_eq!(long.reasons, vec![FilterReason::TooLong]);

        let downvoted = classify(
            &FilterInput {
                title: None,
                body: "hello there",
                up_score: 2,
                down_score: 8,
            },
            &FilterConfig::default(),
        );
        assert_eq!(downvoted.reasons, vec![FilterReason::LowEngagement]);
    }

    #[test]
    fn multiple_reasons_fire_in_fixed_order() {
        let config = FilterConfig {
            max_links: 0,
            ..FilterConfig::default()
        };
        let verdict = classify(
            &FilterInput {
                title: Some("FREE MONEY CLICK HERE NOW PLEASE"),
                body: "https://tinyurl.com/abc",
                up_score: 0,
                down_score: 10,
            },
            &config,
        );
        assert_eq!(
            verdict.reasons,
            vec![
                FilterReason::TooManyLinks,
                FilterReason::ShortenerLink,
                FilterReason::ExcessiveCaps,
                FilterReason::LowEngagement,
            ]
        );
        assert_eq!(
            verdict.describe(),
            "too_many_links, shortener_link, excessive_caps, low_engagement"
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let config = FilterConfig::default();
        let item = FilterInput {
            title: Some("LOOK AT THIS OFFER TODAY ONLY"),
            body: "https://bit.ly/1 https://bit.ly/2 https://bit.ly/3 https://bit.ly/4",
            up_score: 0,
            down_score: 0,
        };
        let first = classify(&item, &config);
        let second = classify(&item, &config);
        assert_eq!(first, second);
        assert!(first.is_spam);
    }
}

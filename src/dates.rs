//! Date normalization for scraped publication dates.
//!
//! Blogs print dates in every format imaginable, often with decoration
//! (`Posted on Monday, March 3rd, 2024`). [`DateNormalizer`] strips the usual
//! decoration and tries a fixed priority list of formats. When nothing
//! matches it never fails: it returns a fallback timestamp derived from the
//! post's link and raw text, so the same post lands in the same place on
//! every run, and flags it so it sorts below every real date.

use crate::models::PublishedAt;
use crate::utils::collapse_whitespace;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Formats tried after RFC 3339, RFC 2822 and any per-source formats.
pub const DEFAULT_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
];

/// Fallback timestamps are spread over the first year after the Unix epoch.
const FALLBACK_SPAN_SECS: u64 = 365 * 24 * 60 * 60;

static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(published|posted|updated)(\s+on)?\s*:?\s*").expect("valid label regex")
});

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+").expect("valid weekday regex")
});

static ORDINAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("valid ordinal regex"));

/// Parses heterogeneous date strings into [`PublishedAt`] values.
#[derive(Debug, Clone)]
pub struct DateNormalizer {
    formats: Vec<String>,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl DateNormalizer {
    /// Build a normalizer that tries `source_formats` (chrono `strftime`
    /// patterns) before the [`DEFAULT_FORMATS`].
    pub fn new(source_formats: &[String]) -> Self {
        let formats = source_formats
            .iter()
            .cloned()
            .chain(DEFAULT_FORMATS.iter().map(|f| f.to_string()))
            .collect();
        Self { formats }
    }

    /// Try every known format in priority order. `None` when nothing matches.
    pub fn parse(&self, raw: &str) -> Option<DateTime<Utc>> {
        let text = collapse_whitespace(raw);
        if text.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(&text) {
            return Some(dt.with_timezone(&Utc));
        }

        let cleaned = strip_decoration(&text);
        self.formats
            .iter()
            .find_map(|format| parse_with_format(&cleaned, format))
    }

    /// Stamp a record's date. Never fails: unparseable input gets the
    /// deterministic [`fallback_timestamp`] for this `link`.
    pub fn normalize(&self, raw: &str, link: &str) -> PublishedAt {
        match self.parse(raw) {
            Some(at) => PublishedAt::genuine(at),
            None => {
                debug!(raw_date = %raw, %link, "Unrecognized date; using fallback timestamp");
                PublishedAt::fallback(fallback_timestamp(link, raw))
            }
        }
    }
}

/// Deterministic substitute timestamp for a post whose date could not be
/// parsed: the Unix epoch plus an offset taken from a SHA-256 of the link and
/// the raw date text. Stable across runs, processes and machines.
pub fn fallback_timestamp(link: &str, raw: &str) -> DateTime<Utc> {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    hasher.update([0u8]);
    hasher.update(raw.trim().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let offset = u64::from_be_bytes(prefix) % FALLBACK_SPAN_SECS;
    DateTime::from_timestamp(offset as i64, 0).unwrap_or_default()
}

fn strip_decoration(text: &str) -> String {
    let text = LABEL.replace(text, "");
    let text = WEEKDAY.replace(&text, "");
    ORDINAL.replace_all(&text, "$1").trim().to_string()
}

/// Try `format` as a zoned date-time, then a naive date-time (taken as UTC),
/// then a bare date at midnight UTC.
fn parse_with_format(text: &str, format: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(text, format) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parses_machine_formats() {
        let n = DateNormalizer::default();
        assert_eq!(
            n.parse("2024-03-05T10:30:00+02:00"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 8, 30, 0).unwrap())
        );
        assert_eq!(
            n.parse("Tue, 05 Mar 2024 10:30:00 +0000"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 10, 30, 0).unwrap())
        );
        assert_eq!(n.parse("2024-01-01"), Some(ymd(2024, 1, 1)));
    }

    #[test]
    fn test_parses_human_formats() {
        let n = DateNormalizer::default();
        assert_eq!(n.parse("March 5, 2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(n.parse("Mar 5, 2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(n.parse("5 March 2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(n.parse("03/05/2024"), Some(ymd(2024, 3, 5)));
    }

    #[test]
    fn test_strips_labels_weekdays_and_ordinals() {
        let n = DateNormalizer::default();
        assert_eq!(
            n.parse("Posted on Tuesday, March 5th, 2024"),
            Some(ymd(2024, 3, 5))
        );
        assert_eq!(n.parse("Published: 1st  January\n2024"), Some(ymd(2024, 1, 1)));
    }

    #[test]
    fn test_source_formats_take_priority() {
        // Ambiguous day/month: the default list reads it as US month/day.
        let us = DateNormalizer::default();
        assert_eq!(us.parse("03/05/2024"), Some(ymd(2024, 3, 5)));

        let eu = DateNormalizer::new(&["%d/%m/%Y".to_string()]);
        assert_eq!(eu.parse("03/05/2024"), Some(ymd(2024, 5, 3)));
    }

    #[test]
    fn test_naive_datetime_format_is_utc() {
        let n = DateNormalizer::new(&["%d.%m.%Y %H:%M".to_string()]);
        assert_eq!(
            n.parse("05.03.2024 14:15"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 14, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_garbage_gets_flagged_fallback() {
        let n = DateNormalizer::default();
        let stamped = n.normalize("garbage", "https://example.com/post");
        assert!(stamped.fallback);

        let real = n.normalize("1971-01-01", "https://example.com/other");
        assert!(!real.fallback);
        assert!(real > stamped);
    }

    #[test]
    fn test_empty_input_gets_fallback() {
        let n = DateNormalizer::default();
        assert!(n.parse("   ").is_none());
        assert!(n.normalize("", "https://example.com/a").fallback);
    }

    #[test]
    fn test_fallback_is_stable() {
        let first = fallback_timestamp("https://example.com/a", "garbage");
        let second = DateNormalizer::new(&["%Y".to_string()])
            .normalize("garbage", "https://example.com/a")
            .at;
        assert_eq!(first, second);
        assert_eq!(first, fallback_timestamp("https://example.com/a", "garbage"));
    }

    #[test]
    fn test_fallback_differs_per_link_and_stays_in_first_year() {
        let a = fallback_timestamp("https://example.com/a", "");
        let b = fallback_timestamp("https://example.com/b", "");
        assert_ne!(a, b);
        for ts in [a, b] {
            assert!(ts >= ymd(1970, 1, 1));
            assert!(ts < ymd(1971, 1, 1));
        }
    }
}

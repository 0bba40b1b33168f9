//! Merge and dedupe of freshly scraped records into the cached set.
//!
//! Records are keyed by [`normalize_link`]. When both sides carry a link the
//! fresh copy wins on every field except `published_at`, which is taken from
//! whichever copy has a genuine (parsed) date, preferring the fresh one. The
//! result is ordered newest first with ties broken by link, so merging is
//! deterministic, idempotent and never drops a cached record.

use crate::models::Record;
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use url::Url;

/// Canonical form of a post URL used as the dedupe key.
///
/// Drops the fragment and an empty `?`, strips trailing slashes from
/// non-root paths, and lets the URL parser lowercase the scheme and host and
/// remove default ports. Non-empty query strings are kept since some blogs
/// address posts by `?p=123`. Unparseable input is returned trimmed.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);
    if url.query() == Some("") {
        url.set_query(None);
    }
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

/// Resolve a possibly relative `href` against the page it was found on and
/// normalize it. `None` when the result is not an absolute http(s) URL.
pub fn resolve_link(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let resolved = match Url::parse(href) {
        Ok(absolute) => absolute,
        Err(_) => Url::parse(page_url).ok()?.join(href).ok()?,
    };
    match resolved.scheme() {
        "http" | "https" => Some(normalize_link(resolved.as_str())),
        _ => None,
    }
}

/// Newest first; equal timestamps fall back to link order.
pub fn record_order(a: &Record, b: &Record) -> Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| a.link.cmp(&b.link))
}

/// Merge `new_records` into `cached_records` and return the ordered result.
///
/// - one record per normalized link;
/// - fresh fields win, except a fresh fallback date never replaces a genuine
///   cached one;
/// - duplicates inside `new_records` keep the first occurrence (the earliest
///   page), borrowing a genuine date from a later copy if needed;
/// - output length is at least the number of distinct cached links.
pub fn merge(new_records: &[Record], cached_records: &[Record]) -> Vec<Record> {
    let fresh = dedupe(new_records);
    let mut merged = dedupe(cached_records);

    for (key, record) in fresh {
        match merged.entry(key) {
            Entry::Occupied(mut slot) => {
                let replacement = supersede(slot.get(), record);
                slot.insert(replacement);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    merged.into_values().sorted_by(record_order).collect()
}

/// Key every record by its normalized link, keeping the first sighting.
fn dedupe(records: &[Record]) -> HashMap<String, Record> {
    let mut by_link: HashMap<String, Record> = HashMap::with_capacity(records.len());
    for record in records {
        let key = normalize_link(&record.link);
        let keyed = Record {
            link: key.clone(),
            ..record.clone()
        };
        match by_link.entry(key) {
            Entry::Occupied(mut slot) => {
                let kept = keep_first(slot.get(), &keyed);
                slot.insert(kept);
            }
            Entry::Vacant(slot) => {
                slot.insert(keyed);
            }
        }
    }
    by_link
}

fn keep_first(first: &Record, later: &Record) -> Record {
    if first.published_at.fallback && later.published_at.is_genuine() {
        Record {
            published_at: later.published_at,
            ..first.clone()
        }
    } else {
        first.clone()
    }
}

fn supersede(cached: &Record, fresh: Record) -> Record {
    if fresh.published_at.fallback && cached.published_at.is_genuine() {
        Record {
            published_at: cached.published_at,
            ..fresh
        }
    } else {
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::DateNormalizer;
    use crate::models::PublishedAt;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn rec(link: &str, date: &str) -> Record {
        let link = format!("https://blog.example.com{link}");
        Record {
            title: format!("Post {link}"),
            published_at: DateNormalizer::default().normalize(date, &link),
            link,
            summary: None,
        }
    }

    fn links(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.link.as_str()).collect()
    }

    #[test]
    fn test_normalize_link() {
        assert_eq!(
            normalize_link("HTTPS://Blog.Example.com:443/posts/one/#comments"),
            "https://blog.example.com/posts/one"
        );
        assert_eq!(normalize_link("https://a.com/x?"), "https://a.com/x");
        assert_eq!(normalize_link("https://a.com/?p=12"), "https://a.com/?p=12");
        assert_eq!(normalize_link("https://a.com"), "https://a.com/");
        assert_eq!(normalize_link("  not a url "), "not a url");
    }

    #[test]
    fn test_normalize_link_is_idempotent() {
        for raw in ["https://a.com/x//", "https://a.com/x/?q=1#f", "https://a.com/"] {
            let once = normalize_link(raw);
            assert_eq!(normalize_link(&once), once);
        }
    }

    #[test]
    fn test_resolve_link() {
        let page = "https://blog.example.com/page/2/";
        assert_eq!(
            resolve_link(page, "/posts/a/"),
            Some("https://blog.example.com/posts/a".to_string())
        );
        assert_eq!(
            resolve_link(page, "../b"),
            Some("https://blog.example.com/page/b".to_string())
        );
        assert_eq!(resolve_link(page, "mailto:me@example.com"), None);
        assert_eq!(resolve_link(page, "  "), None);
    }

    #[test]
    fn test_scenario_new_post_sorts_first() {
        let cached = vec![rec("/a", "2024-01-01")];
        let fresh = vec![rec("/a", "2024-01-01"), rec("/b", "2024-02-01")];

        let merged = merge(&fresh, &cached);
        assert_eq!(
            links(&merged),
            vec!["https://blog.example.com/b", "https://blog.example.com/a"]
        );
    }

    #[test]
    fn test_garbage_date_kept_below_valid_dates() {
        let fresh = vec![
            rec("/old", "1970-01-02"),
            rec("/junk", "garbage"),
            rec("/new", "2024-02-01"),
        ];
        let merged = merge(&fresh, &[]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.last().unwrap().link, "https://blog.example.com/junk");
        assert!(merged.last().unwrap().published_at.fallback);
    }

    #[test]
    fn test_fresh_fields_win() {
        let cached = vec![rec("/a", "2024-01-01")];
        let mut edited = rec("/a/", "2024-01-02");
        edited.title = "Edited".to_string();
        edited.summary = Some("Now with summary".to_string());

        let merged = merge(&[edited], &cached);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Edited");
        assert_eq!(merged[0].summary.as_deref(), Some("Now with summary"));
        assert_eq!(
            merged[0].published_at,
            PublishedAt::genuine(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_genuine_cached_date_survives_fallback_refetch() {
        let cached = vec![rec("/a", "2024-01-01")];
        let mut refetched = rec("/a", "garbage");
        refetched.title = "Retitled".to_string();

        let merged = merge(&[refetched], &cached);
        assert_eq!(merged[0].title, "Retitled");
        assert_eq!(merged[0].published_at, cached[0].published_at);
    }

    #[test]
    fn test_duplicates_in_batch_collapse() {
        let fresh = vec![
            rec("/a", "garbage"),
            rec("/a#comments", "2024-03-01"),
            rec("/b", "2024-01-01"),
            rec("/b/", "2024-01-05"),
        ];
        let merged = merge(&fresh, &[]);
        assert_eq!(merged.len(), 2);

        let a = merged.iter().find(|r| r.link.ends_with("/a")).unwrap();
        assert!(a.published_at.is_genuine());
        let b = merged.iter().find(|r| r.link.ends_with("/b")).unwrap();
        assert_eq!(b.published_at.at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_ties_break_by_link() {
        let fresh = vec![rec("/c", "2024-01-01"), rec("/a", "2024-01-01"), rec("/b", "2024-01-01")];
        let merged = merge(&fresh, &[]);
        assert_eq!(
            links(&merged),
            vec![
                "https://blog.example.com/a",
                "https://blog.example.com/b",
                "https://blog.example.com/c"
            ]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let cached = vec![rec("/a", "2024-01-01"), rec("/z", "nope"), rec("/m", "2023-06-01")];
        let fresh = vec![rec("/b", "2024-02-01"), rec("/a", "garbage"), rec("/z", "2022-01-01")];

        let once = merge(&fresh, &cached);
        let twice = merge(&fresh, &once);
        assert_eq!(once, twice);
        assert_eq!(
            serde_json::to_vec(&once).unwrap(),
            serde_json::to_vec(&twice).unwrap()
        );
    }

    #[test]
    fn test_output_is_unique_ordered_and_grows_monotonically() {
        let cached: Vec<Record> = (1..=9).map(|d| rec(&format!("/c{d}"), &format!("2024-01-0{d}"))).collect();
        let fresh = vec![
            rec("/c3", "2024-01-03"),
            rec("/n1", "bad date"),
            rec("/n2", "2024-01-05"),
            rec("/n2", "2024-01-05"),
        ];

        let merged = merge(&fresh, &cached);
        assert!(merged.len() >= cached.len());
        assert_eq!(merged.len(), 11);

        let distinct: HashSet<&str> = merged.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(distinct.len(), merged.len());

        for pair in merged.windows(2) {
            assert!(pair[0].published_at >= pair[1].published_at);
            if pair[0].published_at == pair[1].published_at {
                assert!(pair[0].link < pair[1].link);
            }
        }
    }

    #[test]
    fn test_empty_fresh_batch_returns_cache_ordered() {
        let cached = vec![rec("/a", "2024-01-01"), rec("/b", "2024-02-01")];
        let merged = merge(&[], &cached);
        assert_eq!(
            links(&merged),
            vec!["https://blog.example.com/b", "https://blog.example.com/a"]
        );
    }
}

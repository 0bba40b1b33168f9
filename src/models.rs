//! Data models for scraped posts and the per-source cache.
//!
//! This module defines the core data structures used throughout the application:
//! - [`RawRecord`]: Unnormalized fields as a site parser found them on a page
//! - [`Record`]: A normalized post with an absolute link and an orderable date
//! - [`PublishedAt`]: A timestamp that remembers whether it was parsed or substituted
//! - [`SourceSnapshot`]: The persisted record set for one source
//! - [`RunMode`], [`RunContext`]: Per-invocation settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Version written into every cache file. Files carrying any other version
/// are rejected as corrupt.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// How deep a run paginates into a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Walk pagination up to the source's full-history bound.
    Full,
    /// Only the first page or two, enough to pick up new posts.
    #[default]
    Incremental,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Full => f.write_str("full"),
            RunMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Ephemeral settings for one run of one source. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub source_id: String,
    pub mode: RunMode,
}

/// A post as a site parser extracted it, before any normalization.
///
/// Every field is raw page text: `link` may be relative and `raw_date` may be
/// in any format (or empty).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub title: String,
    pub link: String,
    pub raw_date: String,
    pub summary: String,
}

/// Publication timestamp of a [`Record`].
///
/// `fallback` is set when the source date could not be parsed and `at` is a
/// deterministic substitute. Ordering ranks every genuine date above every
/// fallback date, then compares the instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishedAt {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub fallback: bool,
}

impl PublishedAt {
    pub fn genuine(at: DateTime<Utc>) -> Self {
        Self { at, fallback: false }
    }

    pub fn fallback(at: DateTime<Utc>) -> Self {
        Self { at, fallback: true }
    }

    pub fn is_genuine(&self) -> bool {
        !self.fallback
    }
}

impl Ord for PublishedAt {
    fn cmp(&self, other: &Self) -> Ordering {
        self.is_genuine()
            .cmp(&other.is_genuine())
            .then_with(|| self.at.cmp(&other.at))
    }
}

impl PartialOrd for PublishedAt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One post, keyed by its normalized absolute `link`.
///
/// Two records with the same link are the same logical item no matter how
/// their other fields differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub title: String,
    pub link: String,
    pub published_at: PublishedAt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// The persisted state of one source between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub schema_version: u32,
    pub source_id: String,
    /// Informational only; nothing branches on it.
    #[serde(default)]
    pub last_run_mode: Option<RunMode>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Merge output order: newest first, unique links.
    #[serde(default)]
    pub records: Vec<Record>,
}

impl SourceSnapshot {
    pub fn empty(source_id: &str) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            source_id: source_id.to_string(),
            last_run_mode: None,
            updated_at: None,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

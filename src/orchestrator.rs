//! One run of one source: load the cache, paginate, stamp dates, merge,
//! persist.
//!
//! The cache is rewritten only when at least one page was acquired, so a run
//! that cannot reach the source never replaces a good cache with less. The
//! returned [`RunReport`] always carries a usable record set for the feed
//! writers: the merged set when the save succeeded, otherwise the snapshot
//! that was on disk before the run.

use crate::cache::CacheStore;
use crate::dates::DateNormalizer;
use crate::merge::{merge, normalize_link, resolve_link};
use crate::models::{Record, RunContext, RunMode};
use crate::pagination::{DriveOutcome, PaginationDriver, PaginationLimits};
use crate::scrapers::{PageAcquirer, SiteParser};
use crate::utils::collapse_whitespace;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every intended page was acquired.
    Success,
    /// Some pages failed after at least one succeeded; the cache was updated.
    Partial,
    /// Nothing was acquired or the save failed; the cache is untouched.
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::Partial => f.write_str("partial"),
            RunStatus::Failure => f.write_str("failure"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub source_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    /// Ordered records for the feed writers.
    pub records: Vec<Record>,
    pub pages_fetched: usize,
    /// Links not present in the cache before this run.
    pub new_records: usize,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn failed(ctx: &RunContext, records: Vec<Record>, error: String) -> Self {
        Self {
            source_id: ctx.source_id.clone(),
            mode: ctx.mode,
            status: RunStatus::Failure,
            records,
            pages_fetched: 0,
            new_records: 0,
            warnings: Vec::new(),
            error: Some(error),
        }
    }
}

pub struct FetchOrchestrator<A, P> {
    cache: CacheStore,
    acquirer: A,
    parser: P,
    normalizer: DateNormalizer,
    limits: PaginationLimits,
}

impl<A, P> FetchOrchestrator<A, P>
where
    A: PageAcquirer,
    P: SiteParser,
{
    pub fn new(
        cache: CacheStore,
        acquirer: A,
        parser: P,
        normalizer: DateNormalizer,
        limits: PaginationLimits,
    ) -> Self {
        Self {
            cache,
            acquirer,
            parser,
            normalizer,
            limits,
        }
    }

    #[instrument(level = "info", skip_all, fields(source_id = %ctx.source_id, mode = %ctx.mode))]
    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        let (snapshot, cache_warning) = match self.cache.load_or_empty(&ctx.source_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "Cannot read cache; skipping run to avoid overwriting it");
                return RunReport::failed(ctx, Vec::new(), e.to_string());
            }
        };
        let mut warnings: Vec<String> = cache_warning.into_iter().collect();

        if snapshot.is_empty() {
            info!("No cached records; every fetched post counts as new");
        }
        let known: HashSet<String> = snapshot
            .records
            .iter()
            .map(|r| normalize_link(&r.link))
            .collect();
        let outcome = PaginationDriver::new(&self.acquirer, &self.parser, self.limits)
            .drive(ctx.mode, &known)
            .await;

        warnings.extend(outcome.pages.iter().filter_map(|page| {
            page.parse_error
                .as_ref()
                .map(|e| format!("page {} ({}) did not parse: {e}", page.number, page.url))
        }));
        if outcome.pages.first().is_some_and(|p| p.records.is_empty() && p.parse_error.is_none()) {
            warn!("First listing page has no posts; the selectors may need updating");
            warnings.push("first listing page has no posts".to_string());
        }
        debug!(stop = ?outcome.stop, pages = outcome.pages.len(), "Pagination outcome");
        let failure = outcome
            .failure
            .as_ref()
            .map(|f| format!("page {}: {}", f.page, f.error));

        if outcome.pages.is_empty() {
            let reason = failure.unwrap_or_else(|| "source returned no pages".to_string());
            warn!(%reason, "No pages acquired; cache left untouched");
            let mut report = RunReport::failed(ctx, snapshot.records, reason);
            report.warnings = warnings;
            return report;
        }

        let fresh = self.stamp_records(&outcome);
        let new_records = fresh
            .iter()
            .map(|r| r.link.as_str())
            .filter(|link| !known.contains(*link))
            .collect::<HashSet<_>>()
            .len();
        let merged = merge(&fresh, &snapshot.records);
        info!(
            fetched = fresh.len(),
            new = new_records,
            cached = snapshot.len(),
            merged = merged.len(),
            "Merged fresh records into cache"
        );

        let pages_fetched = outcome.pages_fetched();
        match self.cache.save(&ctx.source_id, merged, ctx.mode).await {
            Ok(saved) => {
                let status = if failure.is_some() {
                    RunStatus::Partial
                } else {
                    RunStatus::Success
                };
                RunReport {
                    source_id: ctx.source_id.clone(),
                    mode: ctx.mode,
                    status,
                    records: saved.records,
                    pages_fetched,
                    new_records,
                    warnings,
                    error: failure,
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to persist merged records; previous cache kept");
                RunReport {
                    source_id: ctx.source_id.clone(),
                    mode: ctx.mode,
                    status: RunStatus::Failure,
                    records: snapshot.records,
                    pages_fetched,
                    new_records: 0,
                    warnings,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Turn parsed page rows into records: absolute normalized links,
    /// trimmed titles, stamped dates. Rows without a usable title or link
    /// are dropped.
    fn stamp_records(&self, outcome: &DriveOutcome) -> Vec<Record> {
        let mut records = Vec::new();
        for page in &outcome.pages {
            for raw in &page.records {
                let title = collapse_whitespace(&raw.title);
                let Some(link) = resolve_link(&page.url, &raw.link) else {
                    debug!(href = %raw.link, page = page.number, "Dropping row with unusable link");
                    continue;
                };
                if title.is_empty() {
                    debug!(%link, "Dropping row without a title");
                    continue;
                }
                let summary = Some(collapse_whitespace(&raw.summary)).filter(|s| !s.is_empty());
                records.push(Record {
                    title,
                    published_at: self.normalizer.normalize(&raw.raw_date, &link),
                    link,
                    summary,
                });
            }
        }
        records
    }
}

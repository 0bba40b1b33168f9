//! The pagination driver: how many listing pages one run pulls.
//!
//! Pages are acquired strictly in order, one at a time, because each page's
//! `next` token comes from the page before it. After every page the driver
//! stops when:
//!
//! 1. the page limit for the run mode is reached ([`StopReason::Limit`]);
//! 2. the acquirer has no further page, or a page lists no posts
//!    ([`StopReason::Exhausted`]);
//! 3. incremental mode only, with `early_exit` on: every post on the page is
//!    already cached ([`StopReason::NoNewLinks`]).
//!
//! A failed or timed-out page ends the walk ([`StopReason::Failed`]) but
//! keeps the pages acquired before it. A page that does not parse counts as
//! acquired with zero posts, is reported, and the walk goes on.

use crate::errors::AcquisitionError;
use crate::merge::resolve_link;
use crate::models::{RawRecord, RunMode};
use crate::scrapers::{PageAcquirer, PageRequest, SiteParser};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Per-source depth and timing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationLimits {
    pub full_max_pages: usize,
    pub incremental_max_pages: usize,
    /// Stop an incremental run at the first page with nothing new.
    pub early_exit: bool,
    pub page_timeout: Duration,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self {
            full_max_pages: 50,
            incremental_max_pages: 2,
            early_exit: true,
            page_timeout: Duration::from_secs(30),
        }
    }
}

impl PaginationLimits {
    /// Raise the per-page deadline to `budget`, the worst case of an acquirer
    /// that retries internally, so the deadline never preempts its retries.
    pub fn with_page_budget(mut self, budget: Option<Duration>) -> Self {
        if let Some(budget) = budget {
            self.page_timeout = self.page_timeout.max(budget);
        }
        self
    }

    pub fn max_pages(&self, mode: RunMode) -> usize {
        let limit = match mode {
            RunMode::Full => self.full_max_pages,
            RunMode::Incremental => self.incremental_max_pages,
        };
        limit.max(1)
    }
}

/// One successfully acquired listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub number: usize,
    pub url: String,
    pub records: Vec<RawRecord>,
    /// Set when the page was acquired but did not parse.
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Limit,
    Exhausted,
    NoNewLinks,
    Failed,
}

#[derive(Debug)]
pub struct PageFailure {
    pub page: usize,
    pub error: AcquisitionError,
}

#[derive(Debug)]
pub struct DriveOutcome {
    pub pages: Vec<FetchedPage>,
    pub failure: Option<PageFailure>,
    pub stop: StopReason,
}

impl DriveOutcome {
    pub fn pages_fetched(&self) -> usize {
        self.pages.len()
    }
}

pub struct PaginationDriver<'a, A, P> {
    acquirer: &'a A,
    parser: &'a P,
    limits: PaginationLimits,
}

impl<'a, A, P> PaginationDriver<'a, A, P>
where
    A: PageAcquirer,
    P: SiteParser,
{
    pub fn new(acquirer: &'a A, parser: &'a P, limits: PaginationLimits) -> Self {
        Self {
            acquirer,
            parser,
            limits,
        }
    }

    /// Walk the listing for `mode`. `known_links` are the normalized links
    /// already cached, used only for the incremental early exit.
    #[instrument(level = "info", skip_all, fields(%mode))]
    pub async fn drive(&self, mode: RunMode, known_links: &HashSet<String>) -> DriveOutcome {
        let max_pages = self.limits.max_pages(mode);
        let mut pages: Vec<FetchedPage> = Vec::new();
        let mut request = PageRequest::first();

        while request.number <= max_pages {
            let number = request.number;
            let page = match timeout(self.limits.page_timeout, self.acquirer.fetch(&request)).await {
                Ok(Ok(Some(page))) => page,
                Ok(Ok(None)) => {
                    debug!(page = number, "Source has no further pages");
                    return finish(pages, None, StopReason::Exhausted);
                }
                Ok(Err(error)) => {
                    warn!(page = number, error = %error, "Page acquisition failed; keeping earlier pages");
                    return finish(pages, Some(PageFailure { page: number, error }), StopReason::Failed);
                }
                Err(_) => {
                    let error = AcquisitionError::Timeout {
                        page: number,
                        timeout: self.limits.page_timeout,
                    };
                    warn!(page = number, error = %error, "Page acquisition timed out; keeping earlier pages");
                    return finish(pages, Some(PageFailure { page: number, error }), StopReason::Failed);
                }
            };

            let (records, parse_error) = match self.parser.parse(&page.body) {
                Ok(records) => (records, None),
                Err(e) => {
                    warn!(page = number, url = %page.url, error = %e, "Page did not parse; treating it as empty");
                    (Vec::new(), Some(e.to_string()))
                }
            };

            let empty_listing = records.is_empty() && parse_error.is_none();
            let nothing_new = !records.is_empty()
                && records.iter().all(|r| {
                    resolve_link(&page.url, &r.link).is_some_and(|link| known_links.contains(&link))
                });
            debug!(page = number, records = records.len(), nothing_new, "Acquired page");

            pages.push(FetchedPage {
                number,
                url: page.url,
                records,
                parse_error,
            });

            if empty_listing {
                return finish(pages, None, StopReason::Exhausted);
            }
            if mode == RunMode::Incremental && self.limits.early_exit && nothing_new {
                return finish(pages, None, StopReason::NoNewLinks);
            }
            match page.next {
                Some(next) => {
                    request = PageRequest {
                        number: number + 1,
                        token: Some(next),
                    }
                }
                None => return finish(pages, None, StopReason::Exhausted),
            }
        }

        finish(pages, None, StopReason::Limit)
    }
}

fn finish(pages: Vec<FetchedPage>, failure: Option<PageFailure>, stop: StopReason) -> DriveOutcome {
    info!(pages = pages.len(), ?stop, failed = failure.is_some(), "Pagination finished");
    DriveOutcome { pages, failure, stop }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ParseError;
    use crate::scrapers::Page;
    use crate::scrapers::retry::RetryAcquirer;
    use std::sync::Mutex;

    /// Serves pages by number. The body lists the links it should parse to;
    /// `"!"` makes the parser fail and `"..."` makes the fetch hang.
    struct FakeSite {
        pages: Vec<Result<&'static str, u16>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl FakeSite {
        fn new(pages: Vec<Result<&'static str, u16>>) -> Self {
            Self { pages, requests: Mutex::new(Vec::new()) }
        }

        fn requested(&self) -> Vec<usize> {
            self.requests.lock().unwrap().iter().map(|r| r.number).collect()
        }
    }

    impl PageAcquirer for FakeSite {
        async fn fetch(&self, request: &PageRequest) -> Result<Option<Page>, AcquisitionError> {
            self.requests.lock().unwrap().push(request.clone());
            let Some(entry) = self.pages.get(request.number - 1) else {
                return Ok(None);
            };
            match entry {
                Ok("...") => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(None)
                }
                Ok(body) => Ok(Some(Page {
                    url: format!("https://blog.example.com/page/{}", request.number),
                    body: body.to_string(),
                    next: (request.number < self.pages.len()).then(|| format!("t{}", request.number + 1)),
                })),
                Err(status) => Err(AcquisitionError::Status {
                    status: *status,
                    url: "https://blog.example.com".to_string(),
                }),
            }
        }
    }

    struct LinkListParser;

    impl SiteParser for LinkListParser {
        fn parse(&self, raw_page: &str) -> Result<Vec<RawRecord>, ParseError> {
            if raw_page == "!" {
                return Err(ParseError::Unrecognized { selector: "li".into(), matched: 1 });
            }
            Ok(raw_page
                .split_whitespace()
                .map(|link| RawRecord {
                    title: link.to_string(),
                    link: link.to_string(),
                    ..Default::default()
                })
                .collect())
        }
    }

    fn limits(full: usize, incremental: usize) -> PaginationLimits {
        PaginationLimits {
            full_max_pages: full,
            incremental_max_pages: incremental,
            early_exit: true,
            page_timeout: Duration::from_millis(200),
        }
    }

    fn known(links: &[&str]) -> HashSet<String> {
        links.iter().map(|l| format!("https://blog.example.com{l}")).collect()
    }

    #[tokio::test]
    async fn test_full_mode_walks_until_source_ends() {
        let site = FakeSite::new(vec![Ok("/a /b"), Ok("/c"), Ok("/d")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 1))
            .drive(RunMode::Full, &HashSet::new())
            .await;

        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.pages_fetched(), 3);
        assert!(outcome.failure.is_none());
        assert_eq!(site.requested(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_tokens_are_threaded_through() {
        let site = FakeSite::new(vec![Ok("/a"), Ok("/b")]);
        PaginationDriver::new(&site, &LinkListParser, limits(10, 1))
            .drive(RunMode::Full, &HashSet::new())
            .await;

        let requests = site.requests.lock().unwrap();
        assert_eq!(requests[0].token, None);
        assert_eq!(requests[1].token.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_incremental_respects_limit() {
        let site = FakeSite::new(vec![Ok("/a"), Ok("/b"), Ok("/c"), Ok("/d")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 2))
            .drive(RunMode::Incremental, &HashSet::new())
            .await;

        assert_eq!(outcome.stop, StopReason::Limit);
        assert_eq!(site.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_incremental_early_exit_on_known_page() {
        let site = FakeSite::new(vec![Ok("/a /b"), Ok("/c")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 5))
            .drive(RunMode::Incremental, &known(&["/a", "/b"]))
            .await;

        assert_eq!(outcome.stop, StopReason::NoNewLinks);
        assert_eq!(site.requested(), vec![1]);
        assert_eq!(outcome.pages_fetched(), 1);
    }

    #[tokio::test]
    async fn test_full_mode_never_exits_early() {
        let site = FakeSite::new(vec![Ok("/a /b"), Ok("/c")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 5))
            .drive(RunMode::Full, &known(&["/a", "/b", "/c"]))
            .await;

        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(site.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_pages() {
        let site = FakeSite::new(vec![Ok("/a /b /c"), Err(502), Ok("/d")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 5))
            .drive(RunMode::Full, &HashSet::new())
            .await;

        assert_eq!(outcome.stop, StopReason::Failed);
        assert_eq!(outcome.pages_fetched(), 1);
        assert_eq!(outcome.pages[0].records.len(), 3);
        assert_eq!(outcome.failure.unwrap().page, 2);
    }

    #[tokio::test]
    async fn test_timeout_is_a_page_failure() {
        let site = FakeSite::new(vec![Ok("/a"), Ok("...")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 5))
            .drive(RunMode::Full, &HashSet::new())
            .await;

        assert_eq!(outcome.stop, StopReason::Failed);
        assert_eq!(outcome.pages_fetched(), 1);
        let failure = outcome.failure.unwrap();
        assert!(matches!(failure.error, AcquisitionError::Timeout { page: 2, .. }));
    }

    #[tokio::test]
    async fn test_parse_error_does_not_stop_pagination() {
        let site = FakeSite::new(vec![Ok("!"), Ok("/b")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 5))
            .drive(RunMode::Incremental, &HashSet::new())
            .await;

        assert_eq!(outcome.pages_fetched(), 2);
        assert!(outcome.pages[0].parse_error.is_some());
        assert!(outcome.pages[0].records.is_empty());
        assert_eq!(outcome.pages[1].records.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_listing_ends_walk() {
        let site = FakeSite::new(vec![Ok("/a"), Ok(""), Ok("/c")]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 5))
            .drive(RunMode::Full, &HashSet::new())
            .await;

        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(site.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_first_page_failure_yields_nothing() {
        let site = FakeSite::new(vec![Err(500)]);
        let outcome = PaginationDriver::new(&site, &LinkListParser, limits(10, 5))
            .drive(RunMode::Full, &HashSet::new())
            .await;

        assert_eq!(outcome.pages_fetched(), 0);
        assert!(outcome.failure.is_some());
    }

    /// Answers slowly: the first `slow_failures` calls stall for `stall`
    /// and then report a transient timeout; later calls serve one page.
    struct SlowSite {
        slow_failures: usize,
        stall: Duration,
        calls: Mutex<usize>,
    }

    impl PageAcquirer for SlowSite {
        async fn fetch(&self, request: &PageRequest) -> Result<Option<Page>, AcquisitionError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call <= self.slow_failures {
                tokio::time::sleep(self.stall).await;
                return Err(AcquisitionError::Timeout { page: request.number, timeout: self.stall });
            }
            Ok(Some(Page {
                url: "https://blog.example.com/".to_string(),
                body: "/a".to_string(),
                next: None,
            }))
        }
    }

    #[tokio::test]
    async fn test_page_deadline_leaves_room_for_retries() {
        let site = SlowSite {
            slow_failures: 2,
            stall: Duration::from_millis(200),
            calls: Mutex::new(0),
        };
        let page_timeout = Duration::from_millis(300);
        let retrying = RetryAcquirer::new(site, 3, Duration::from_millis(10))
            .with_max_jitter(Duration::ZERO)
            .with_attempt_timeout(page_timeout);
        let limits = PaginationLimits { page_timeout, ..limits(10, 5) }
            .with_page_budget(retrying.page_budget());

        let outcome = PaginationDriver::new(&retrying, &LinkListParser, limits)
            .drive(RunMode::Full, &HashSet::new())
            .await;

        assert!(outcome.failure.is_none(), "failure: {:?}", outcome.failure);
        assert_eq!(outcome.pages.len(), 1);
        assert_eq!(outcome.stop, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn test_retries_exhausted_within_deadline_report_last_error() {
        let site = SlowSite {
            slow_failures: 10,
            stall: Duration::from_millis(20),
            calls: Mutex::new(0),
        };
        let retrying = RetryAcquirer::new(site, 2, Duration::from_millis(1))
            .with_max_jitter(Duration::ZERO)
            .with_attempt_timeout(Duration::from_millis(100));
        let limits = limits(10, 5).with_page_budget(retrying.page_budget());

        let outcome = PaginationDriver::new(&retrying, &LinkListParser, limits)
            .drive(RunMode::Full, &HashSet::new())
            .await;

        assert_eq!(outcome.stop, StopReason::Failed);
        let failure = outcome.failure.unwrap();
        assert!(matches!(failure.error, AcquisitionError::Timeout { timeout, .. } if timeout == Duration::from_millis(20)));
    }

    #[test]
    fn test_page_budget_only_raises_deadline() {
        let base = limits(1, 1);
        assert_eq!(base.with_page_budget(None).page_timeout, Duration::from_millis(200));
        assert_eq!(
            base.with_page_budget(Some(Duration::from_millis(50))).page_timeout,
            Duration::from_millis(200)
        );
        assert_eq!(
            base.with_page_budget(Some(Duration::from_secs(2))).page_timeout,
            Duration::from_secs(2)
        );
    }
}

//! Page acquisition and listing parsing.
//!
//! The merge engine never talks to the network or walks HTML itself. It goes
//! through two capabilities:
//!
//! 1. **Acquisition** ([`PageAcquirer`]): produce the raw body of listing
//!    page `n`, plus a token for page `n + 1` if there is one
//! 2. **Parsing** ([`SiteParser`]): turn one raw page into [`RawRecord`]s
//!
//! # Implementations
//!
//! | Type | Module | Notes |
//! |------|--------|-------|
//! | [`HttpAcquirer`](http::HttpAcquirer) | [`http`] | Plain GET; next-link, URL-template or single-page pagination |
//! | [`RetryAcquirer`](retry::RetryAcquirer) | [`retry`] | Exponential backoff with jitter around any acquirer |
//! | [`SelectorParser`](selectors::SelectorParser) | [`selectors`] | CSS selectors from the source config |
//!
//! A JavaScript-rendering acquirer for "load more" listings fits the same
//! trait: the page number is the number of reveal interactions to perform.

use crate::errors::{AcquisitionError, ParseError};
use crate::models::RawRecord;

pub mod http;
pub mod retry;
pub mod selectors;

/// Which listing page to acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page (or interaction) number.
    pub number: usize,
    /// The `next` token of the previous page; `None` for page 1.
    pub token: Option<String>,
}

impl PageRequest {
    pub fn first() -> Self {
        Self { number: 1, token: None }
    }
}

/// One acquired listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Where the body came from; relative links resolve against it.
    pub url: String,
    pub body: String,
    /// Token for the following page, `None` when the listing ends here.
    pub next: Option<String>,
}

/// Source of raw listing pages. Implementations must be safe to call once
/// per page, strictly in order.
pub trait PageAcquirer {
    /// `Ok(None)` means the source has no such page: the listing is exhausted.
    async fn fetch(&self, request: &PageRequest) -> Result<Option<Page>, AcquisitionError>;
}

/// Site-specific extraction of posts from one listing page.
pub trait SiteParser {
    /// An empty `Vec` means the page lists no posts. `Err` means the page
    /// did not look like the expected listing at all.
    fn parse(&self, raw_page: &str) -> Result<Vec<RawRecord>, ParseError>;
}

//! Plain HTTP listing acquirer.
//!
//! Page 1 is always the source's configured `url`. Later pages depend on the
//! source's [`PaginationStyle`]:
//!
//! - `next_link`: the `href` of the first element matching the selector on
//!   the previous page, resolved against that page's final URL
//! - `url_template`: `{page}` replaced by the page number; a 404 past page 1
//!   means the listing ended
//! - `single`: there is no page 2

use crate::config::{PaginationStyle, SourceConfig};
use crate::errors::AcquisitionError;
use crate::merge::normalize_link;
use crate::scrapers::{Page, PageAcquirer, PageRequest};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpAcquirer {
    client: Client,
    source_id: String,
    base_url: Url,
    style: PaginationStyle,
    next_selector: Option<Selector>,
}

impl HttpAcquirer {
    pub fn new(
        source: &SourceConfig,
        user_agent: &str,
        request_timeout: Duration,
    ) -> Result<Self, AcquisitionError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()?;
        let base_url = Url::parse(&source.url)?;
        let next_selector = match &source.pagination {
            PaginationStyle::NextLink { selector } => Some(Selector::parse(selector).map_err(|e| {
                AcquisitionError::Other(format!("invalid next-link selector `{selector}`: {e}"))
            })?),
            _ => None,
        };

        Ok(Self {
            client,
            source_id: source.id.clone(),
            base_url,
            style: source.pagination.clone(),
            next_selector,
        })
    }

    /// URL for `request`, or `None` when the style has no such page.
    fn page_url(&self, request: &PageRequest) -> Result<Option<Url>, AcquisitionError> {
        if request.number <= 1 {
            return Ok(Some(self.base_url.clone()));
        }
        match &self.style {
            PaginationStyle::Single => Ok(None),
            PaginationStyle::NextLink { .. } => match &request.token {
                Some(token) => Ok(Some(self.base_url.join(token)?)),
                None => Ok(None),
            },
            PaginationStyle::UrlTemplate { template } => {
                let url = template.replace("{page}", &request.number.to_string());
                Ok(Some(Url::parse(&url)?))
            }
        }
    }

    fn next_token(&self, body: &str, page_url: &Url, number: usize) -> Option<String> {
        match &self.style {
            PaginationStyle::Single => None,
            PaginationStyle::UrlTemplate { .. } => Some((number + 1).to_string()),
            PaginationStyle::NextLink { .. } => {
                let selector = self.next_selector.as_ref()?;
                let document = Html::parse_document(body);
                let href = document
                    .select(selector)
                    .find_map(|element| element.value().attr("href"))?;
                let next = page_url.join(href.trim()).ok()?;
                // A "next" link pointing back at the same page would loop forever.
                if normalize_link(next.as_str()) == normalize_link(page_url.as_str()) {
                    return None;
                }
                Some(next.to_string())
            }
        }
    }
}

impl PageAcquirer for HttpAcquirer {
    #[instrument(level = "info", skip_all, fields(source_id = %self.source_id, page = request.number))]
    async fn fetch(&self, request: &PageRequest) -> Result<Option<Page>, AcquisitionError> {
        let Some(url) = self.page_url(request)? else {
            debug!("No further page for this pagination style");
            return Ok(None);
        };

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND
            && request.number > 1
            && matches!(self.style, PaginationStyle::UrlTemplate { .. })
        {
            debug!(%url, "Page template ran past the end of the listing");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AcquisitionError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await?;
        let next = self.next_token(&body, &final_url, request.number);
        info!(url = %final_url, bytes = body.len(), has_next = next.is_some(), "Fetched listing page");

        Ok(Some(Page {
            url: final_url.to_string(),
            body,
            next,
        }))
    }
}

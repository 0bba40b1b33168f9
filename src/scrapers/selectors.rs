//! Generic listing parser driven by CSS selectors from the source config.
//!
//! Each element matching `item` is one post. Inside it, the first `title`
//! match supplies the title text, the first `link` match (or the item itself
//! when it is an anchor) supplies the href, and the optional `date` and
//! `summary` selectors supply the rest. Dates prefer a `datetime` or
//! `content` attribute over the visible text, which is usually friendlier to
//! humans than to parsers.

use crate::config::SelectorConfig;
use crate::errors::ParseError;
use crate::models::RawRecord;
use crate::scrapers::SiteParser;
use crate::utils::{collapse_whitespace, truncate_for_log};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct SelectorParser {
    item_source: String,
    item: Selector,
    title: Selector,
    link: Selector,
    date: Option<Selector>,
    summary: Option<Selector>,
}

fn compile(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl SelectorParser {
    pub fn new(config: &SelectorConfig) -> Result<Self, ParseError> {
        Ok(Self {
            item_source: config.item.clone(),
            item: compile(&config.item)?,
            title: compile(&config.title)?,
            link: compile(&config.link)?,
            date: config.date.as_deref().map(compile).transpose()?,
            summary: config.summary.as_deref().map(compile).transpose()?,
        })
    }

    fn extract(&self, item: ElementRef<'_>) -> Option<RawRecord> {
        let title = item
            .select(&self.title)
            .next()
            .map(|el| element_text(&el))
            .unwrap_or_default();
        let link = item
            .select(&self.link)
            .find_map(|el| el.value().attr("href"))
            .or_else(|| item.value().attr("href"))
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        if title.is_empty() || link.is_empty() {
            debug!(
                title = %truncate_for_log(&title, 80),
                %link,
                "Skipping listing item without title or link"
            );
            return None;
        }

        let raw_date = self
            .date
            .as_ref()
            .and_then(|selector| item.select(selector).next())
            .map(|el| {
                el.value()
                    .attr("datetime")
                    .or_else(|| el.value().attr("content"))
                    .map(collapse_whitespace)
                    .unwrap_or_else(|| element_text(&el))
            })
            .unwrap_or_default();
        let summary = self
            .summary
            .as_ref()
            .and_then(|selector| item.select(selector).next())
            .map(|el| element_text(&el))
            .unwrap_or_default();

        Some(RawRecord {
            title,
            link,
            raw_date,
            summary,
        })
    }
}

impl SiteParser for SelectorParser {
    #[instrument(level = "debug", skip_all, fields(bytes = raw_page.len()))]
    fn parse(&self, raw_page: &str) -> Result<Vec<RawRecord>, ParseError> {
        let document = Html::parse_document(raw_page);
        let mut matched = 0usize;
        let mut records = Vec::new();

        for item in document.select(&self.item) {
            matched += 1;
            if let Some(record) = self.extract(item) {
                records.push(record);
            }
        }

        if matched > 0 && records.is_empty() {
            return Err(ParseError::Unrecognized {
                selector: self.item_source.clone(),
                matched,
            });
        }
        debug!(matched, parsed = records.len(), "Parsed listing page");
        Ok(records)
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

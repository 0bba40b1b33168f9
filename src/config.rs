//! YAML configuration: global paths and HTTP settings plus one entry per
//! scraped source.
//!
//! ```yaml
//! cache_dir: cache
//! feeds_dir: feeds
//! sources:
//!   - id: example
//!     title: Example Blog
//!     url: https://example.com/blog
//!     pagination: { kind: next_link, selector: "a.next" }
//!     selectors: { item: "article", title: "h2", link: "h2 a", date: "time" }
//! ```

use crate::cache::is_valid_source_id;
use crate::errors::ConfigError;
use crate::models::RunMode;
use crate::pagination::PaginationLimits;
use scraper::Selector;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_feeds_dir")]
    pub feeds_dir: PathBuf,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries per page for transient failures, on top of the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub title: String,
    /// First listing page; also the channel link in the generated feed.
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pagination: PaginationStyle,
    pub selectors: SelectorConfig,
    /// Extra chrono `strftime` patterns tried before the built-in ones.
    #[serde(default)]
    pub date_formats: Vec<String>,
    #[serde(default = "default_full_max_pages")]
    pub full_max_pages: usize,
    #[serde(default = "default_incremental_max_pages")]
    pub incremental_max_pages: usize,
    #[serde(default = "default_true")]
    pub early_exit: bool,
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    /// Cap on items in the generated feed. The cache itself is never capped.
    #[serde(default)]
    pub feed_max_items: Option<usize>,
}

/// How to reach page `n + 1` of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaginationStyle {
    /// The listing has a single page.
    #[default]
    Single,
    /// Follow the `href` of the first element matching `selector`.
    NextLink { selector: String },
    /// Substitute the page number for `{page}` in `template`.
    UrlTemplate { template: String },
}

/// CSS selectors for the generic listing parser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectorConfig {
    /// One match per post on the listing page.
    pub item: String,
    /// Relative to the item.
    pub title: String,
    /// Relative to the item; the first match's `href` is the post link.
    #[serde(default = "default_link_selector")]
    pub link: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_feeds_dir() -> PathBuf {
    PathBuf::from("feeds")
}

fn default_user_agent() -> String {
    format!("blog_feeds/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_max_retries() -> usize {
    3
}

fn default_full_max_pages() -> usize {
    50
}

fn default_incremental_max_pages() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_page_timeout_secs() -> u64 {
    30
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}

impl Config {
    /// Read, parse and validate the config file at `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config = Self::from_yaml(&text)?;
        info!(sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no sources configured".to_string()));
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate source id `{}`", source.id)));
            }
            source.validate()?;
        }
        Ok(())
    }
}

impl SourceConfig {
    pub fn max_pages(&self, mode: RunMode) -> usize {
        self.pagination_limits().max_pages(mode)
    }

    /// Soft limit for one acquisition attempt of one page.
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn pagination_limits(&self) -> PaginationLimits {
        PaginationLimits {
            full_max_pages: self.full_max_pages,
            incremental_max_pages: self.incremental_max_pages,
            early_exit: self.early_exit,
            page_timeout: self.page_timeout(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid(format!("source `{}`: {reason}", self.id));

        if !is_valid_source_id(&self.id) {
            return Err(invalid("id may only contain letters, digits, `-` and `_`".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(invalid("title is empty".to_string()));
        }
        Url::parse(&self.url).map_err(|e| invalid(format!("url `{}`: {e}", self.url)))?;
        if self.full_max_pages == 0 || self.incremental_max_pages == 0 {
            return Err(invalid("page limits must be at least 1".to_string()));
        }
        if self.feed_max_items == Some(0) {
            return Err(invalid("feed_max_items must be at least 1".to_string()));
        }
        if self.page_timeout_secs == 0 {
            return Err(invalid("page_timeout_secs must be at least 1".to_string()));
        }

        let mut selectors = vec![&self.selectors.item, &self.selectors.title, &self.selectors.link];
        selectors.extend(self.selectors.date.iter());
        selectors.extend(self.selectors.summary.iter());
        match &self.pagination {
            PaginationStyle::Single => {}
            PaginationStyle::NextLink { selector } => selectors.push(selector),
            PaginationStyle::UrlTemplate { template } => {
                if !template.contains("{page}") {
                    return Err(invalid(format!("url template `{template}` lacks `{{page}}`")));
                }
                let first = template.replace("{page}", "2");
                Url::parse(&first).map_err(|e| invalid(format!("url template `{template}`: {e}")))?;
            }
        }
        for selector in selectors {
            if let Err(e) = Selector::parse(selector) {
                return Err(invalid(format!("selector `{selector}`: {e}")));
            }
        }
        Ok(())
    }
}

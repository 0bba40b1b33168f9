//! Health check for generated feeds.
//!
//! Every `feed_*.xml` in the feeds directory must be well-formed XML with at
//! least one `<item>` (at any depth, not only under `rss > channel`), and
//! every item needs a link. Missing titles or dates and a newest item older
//! than the staleness threshold are warnings: the feed still works, but the
//! source's selectors may have drifted.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::fmt::{self, Write as _};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

pub const DEFAULT_STALE_DAYS: i64 = 30;

/// Text content of the fields checked on each `<item>`.
#[derive(Debug, Default)]
struct Item {
    title: String,
    link: String,
    pub_date: String,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Title,
    Link,
    PubDate,
}

impl Item {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::PubDate => &mut self.pub_date,
        }
    }
}

/// Collect every `<item>` in the document, wherever it is nested.
fn scan_items(xml: &str) -> Result<Vec<Item>, String> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut current: Option<Item> = None;
    let mut field: Option<Field> = None;
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("{e} at byte {}", reader.error_position()))?;
        match event {
            Event::Start(start) => {
                depth += 1;
                match (start.local_name().as_ref(), current.is_some()) {
                    (b"item", false) => current = Some(Item::default()),
                    (b"title", true) => field = Some(Field::Title),
                    (b"link", true) => field = Some(Field::Link),
                    (b"pubDate", true) => field = Some(Field::PubDate),
                    _ => {}
                }
            }
            Event::Empty(empty) => {
                if empty.local_name().as_ref() == b"item" && current.is_none() {
                    items.push(Item::default());
                }
            }
            Event::End(end) => {
                depth = depth.saturating_sub(1);
                match end.local_name().as_ref() {
                    b"item" => items.extend(current.take()),
                    b"title" | b"link" | b"pubDate" => field = None,
                    _ => {}
                }
            }
            Event::Text(text) => append(&mut current, field, &String::from_utf8_lossy(&text)),
            Event::CData(data) => append(&mut current, field, &String::from_utf8_lossy(&data)),
            Event::GeneralRef(_) => append(&mut current, field, "&"),
            Event::Eof => break,
            _ => {}
        }
    }

    if depth > 0 {
        return Err("unexpected end of document".to_string());
    }
    Ok(items)
}

fn append(current: &mut Option<Item>, field: Option<Field>, text: &str) {
    if let (Some(item), Some(field)) = (current.as_mut(), field) {
        item.field_mut(field).push_str(text);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Warn,
    Fail,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Warn => "WARN",
            HealthStatus::Fail => "FAIL",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedHealth {
    pub name: String,
    pub entries: usize,
    pub newest: Option<DateTime<Utc>>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl FeedHealth {
    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            entries: 0,
            newest: None,
            warnings: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn status(&self) -> HealthStatus {
        if !self.errors.is_empty() {
            HealthStatus::Fail
        } else if !self.warnings.is_empty() {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        }
    }
}

fn is_blank(field: &str) -> bool {
    field.trim().is_empty()
}

/// Check one feed document. `now` is the reference point for staleness.
pub fn check_feed_xml(name: &str, xml: &str, now: DateTime<Utc>, stale_days: i64) -> FeedHealth {
    let items = match scan_items(xml) {
        Ok(items) => items,
        Err(e) => return FeedHealth::failed(name, format!("Invalid XML: {e}")),
    };
    if items.is_empty() {
        return FeedHealth::failed(name, "No <item> entries found".to_string());
    }

    let total = items.len();
    let missing_titles = items.iter().filter(|i| is_blank(&i.title)).count();
    let missing_links = items.iter().filter(|i| is_blank(&i.link)).count();
    let missing_dates = items.iter().filter(|i| is_blank(&i.pub_date)).count();
    let newest = items
        .iter()
        .filter_map(|i| DateTime::parse_from_rfc2822(i.pub_date.trim()).ok())
        .map(|d| d.with_timezone(&Utc))
        .max();

    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    if missing_titles > 0 {
        warnings.push(format!("{missing_titles}/{total} entries missing title"));
    }
    if missing_links > 0 {
        errors.push(format!("{missing_links}/{total} entries missing link"));
    }
    if missing_dates > 0 {
        warnings.push(format!("{missing_dates}/{total} entries missing pubDate"));
    }
    if let Some(newest) = newest {
        let age = now - newest;
        if age > chrono::Duration::days(stale_days) {
            warnings.push(format!(
                "Stale: newest entry is {} days old ({})",
                age.num_days(),
                newest.format("%Y-%m-%d")
            ));
        }
    }

    FeedHealth {
        name: name.to_string(),
        entries: total,
        newest,
        warnings,
        errors,
    }
}

/// Check every `feed_*.xml` in `dir`, sorted by file name.
///
/// A missing directory is an error; an unreadable feed file is reported as
/// a failed feed.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub async fn check_feeds_dir(dir: &Path, now: DateTime<Utc>, stale_days: i64) -> io::Result<Vec<FeedHealth>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("feed_") && name.ends_with(".xml") {
            paths.push(entry.path());
        }
    }
    paths.sort();
    debug!(count = paths.len(), "Found feed files");

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let health = match fs::read_to_string(&path).await {
            Ok(xml) => check_feed_xml(&name, &xml, now, stale_days),
            Err(e) => FeedHealth::failed(&name, format!("Unreadable: {e}")),
        };
        results.push(health);
    }
    Ok(results)
}

/// Human-readable report: one status line per feed, `^` lines for warnings,
/// `!` lines for errors, then a summary.
pub fn render_report(dir: &Path, feeds: &[FeedHealth], verbose: bool) -> String {
    let mut out = String::new();
    let total = feeds.len();
    let _ = writeln!(out, "Checking {total} feeds in {}\n", dir.display());

    for feed in feeds {
        let _ = writeln!(out, "  [{:4}] {}", feed.status(), feed.name);
        if verbose {
            let _ = writeln!(out, "         Entries: {}", feed.entries);
            if let Some(newest) = feed.newest {
                let _ = writeln!(out, "         Newest:  {}", newest.format("%Y-%m-%d %H:%M"));
            }
        }
        for warning in &feed.warnings {
            let _ = writeln!(out, "         ^ {warning}");
        }
        for error in &feed.errors {
            let _ = writeln!(out, "         ! {error}");
        }
    }

    let count = |status| feeds.iter().filter(|f| f.status() == status).count();
    let (healthy, warned, failed) = (count(HealthStatus::Ok), count(HealthStatus::Warn), count(HealthStatus::Fail));
    let _ = writeln!(out, "\n--- Summary ---");
    let _ = writeln!(out, "  Healthy: {healthy}/{total}");
    if warned > 0 {
        let _ = writeln!(out, "  Warnings: {warned}/{total}");
    }
    if failed > 0 {
        let _ = writeln!(out, "  Errors: {failed}/{total}");
    }
    out
}

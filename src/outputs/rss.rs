//! RSS 2.0 feed generation.
//!
//! The channel's `lastBuildDate` is the newest item's date rather than the
//! wall clock, so regenerating a feed from an unchanged record set produces
//! identical bytes.

use crate::config::SourceConfig;
use crate::errors::FeedWriteError;
use crate::models::Record;
use crate::outputs::FeedWriter;
use crate::utils::write_atomic;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::path::PathBuf;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct RssWriter {
    feeds_dir: PathBuf,
}

impl RssWriter {
    pub fn new(feeds_dir: impl Into<PathBuf>) -> Self {
        Self {
            feeds_dir: feeds_dir.into(),
        }
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.feeds_dir.join(format!("feed_{source_id}.xml"))
    }
}

impl FeedWriter for RssWriter {
    #[instrument(level = "info", skip_all, fields(source_id = %source.id))]
    async fn write(&self, source: &SourceConfig, records: &[Record]) -> Result<PathBuf, FeedWriteError> {
        let limit = source.feed_max_items.unwrap_or(records.len());
        let items = &records[..limit.min(records.len())];
        let xml = render(source, items)?;

        let path = self.path_for(&source.id);
        write_atomic(&path, &xml)
            .await
            .map_err(|source| FeedWriteError::Io { path: path.clone(), source })?;
        info!(path = %path.display(), items = items.len(), "Wrote RSS feed");
        Ok(path)
    }
}

/// Serialize `records` as an RSS 2.0 document.
pub fn render(source: &SourceConfig, records: &[Record]) -> Result<Vec<u8>, FeedWriteError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(&mut writer, Event::Start(BytesStart::new("rss").with_attributes([("version", "2.0")])))?;
    emit(&mut writer, Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &source.title)?;
    text_element(&mut writer, "link", &source.url)?;
    let description = source
        .description
        .clone()
        .unwrap_or_else(|| format!("Posts from {}", source.title));
    text_element(&mut writer, "description", &description)?;
    if let Some(newest) = records.iter().map(|r| r.published_at.at).max() {
        text_element(&mut writer, "lastBuildDate", &newest.to_rfc2822())?;
    }

    for record in records {
        emit(&mut writer, Event::Start(BytesStart::new("item")))?;
        text_element(&mut writer, "title", &record.title)?;
        text_element(&mut writer, "link", &record.link)?;
        emit(
            &mut writer,
            Event::Start(BytesStart::new("guid").with_attributes([("isPermaLink", "true")])),
        )?;
        emit(&mut writer, Event::Text(BytesText::new(&record.link)))?;
        emit(&mut writer, Event::End(BytesEnd::new("guid")))?;
        text_element(&mut writer, "pubDate", &record.published_at.at.to_rfc2822())?;
        if let Some(summary) = &record.summary {
            text_element(&mut writer, "description", summary)?;
        }
        emit(&mut writer, Event::End(BytesEnd::new("item")))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("channel")))?;
    emit(&mut writer, Event::End(BytesEnd::new("rss")))?;

    let mut xml = writer.into_inner();
    xml.push(b'\n');
    Ok(xml)
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), FeedWriteError> {
    writer
        .write_event(event)
        .map_err(|e| FeedWriteError::Serialize(e.to_string()))
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), FeedWriteError> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

//! JSON export of a source's ordered records.
//!
//! ```text
//! json_dir/
//! └── <source_id>.json   # { source_id, title, url, records: [...] }
//! ```
//!
//! Unlike the RSS feed, the export is never capped: it mirrors the full
//! record set the run ended with.

use crate::config::SourceConfig;
use crate::errors::FeedWriteError;
use crate::models::Record;
use crate::outputs::FeedWriter;
use crate::utils::write_atomic;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, instrument};

#[derive(Debug, Serialize)]
struct Export<'a> {
    source_id: &'a str,
    title: &'a str,
    url: &'a str,
    records: &'a [Record],
}

#[derive(Debug, Clone)]
pub struct JsonWriter {
    dir: PathBuf,
}

impl JsonWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FeedWriter for JsonWriter {
    #[instrument(level = "info", skip_all, fields(json_dir = %self.dir.display(), source_id = %source.id))]
    async fn write(&self, source: &SourceConfig, records: &[Record]) -> Result<PathBuf, FeedWriteError> {
        let export = Export {
            source_id: &source.id,
            title: &source.title,
            url: &source.url,
            records,
        };
        let json = serde_json::to_vec_pretty(&export)
            .map_err(|e| FeedWriteError::Serialize(e.to_string()))?;

        let path = self.dir.join(format!("{}.json", source.id));
        info!(path = %path.display(), "Writing JSON");
        write_atomic(&path, &json)
            .await
            .map_err(|source| FeedWriteError::Io { path: path.clone(), source })?;
        info!(path = %path.display(), count = records.len(), "Wrote JSON export");
        Ok(path)
    }
}

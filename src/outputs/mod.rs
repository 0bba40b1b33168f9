//! Downstream artifacts generated from a run's record set.
//!
//! # Submodules
//!
//! - [`rss`]: RSS 2.0 feed per source, the artifact feed readers consume
//! - [`json`]: optional JSON export of the same ordered records
//!
//! # Output Structure
//!
//! ```text
//! feeds_dir/
//! ├── feed_example.xml
//! └── feed_other-blog.xml
//!
//! json_dir/
//! ├── example.json
//! └── other-blog.json
//! ```
//!
//! Both writers replace their file atomically, so a reader polling the
//! directory never sees a half-written artifact.

use crate::config::SourceConfig;
use crate::errors::FeedWriteError;
use crate::models::Record;
use std::path::PathBuf;

pub mod json;
pub mod rss;

/// Renders one source's ordered records to a file.
pub trait FeedWriter {
    /// Write the artifact for `source`, returning the path written.
    async fn write(&self, source: &SourceConfig, records: &[Record]) -> Result<PathBuf, FeedWriteError>;
}

//! Per-source JSON cache of the last successful record set.
//!
//! # Layout
//!
//! ```text
//! cache_dir/
//! ├── example-blog.json                      # SourceSnapshot, pretty JSON
//! └── broken-blog.json.corrupt-1718000000    # quarantined unreadable cache
//! ```
//!
//! Writes go through [`write_atomic`], so a crash or cancellation mid-save
//! leaves the previous file in place and concurrent readers never see a
//! half-written snapshot.

use crate::errors::CacheError;
use crate::models::{Record, RunMode, SNAPSHOT_SCHEMA_VERSION, SourceSnapshot};
use crate::utils::write_atomic;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Source ids double as file names, so they are restricted to a safe charset.
pub fn is_valid_source_id(source_id: &str) -> bool {
    !source_id.is_empty()
        && source_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, source_id: &str) -> Result<PathBuf, CacheError> {
        if !is_valid_source_id(source_id) {
            return Err(CacheError::InvalidSourceId(source_id.to_string()));
        }
        Ok(self.dir.join(format!("{source_id}.json")))
    }

    /// Read the snapshot for `source_id`.
    ///
    /// A missing file is a first run and yields an empty snapshot. A file
    /// that exists but does not deserialize, carries an unknown schema
    /// version, or belongs to another source is [`CacheError::Corrupt`].
    #[instrument(level = "info", skip(self))]
    pub async fn load(&self, source_id: &str) -> Result<SourceSnapshot, CacheError> {
        let path = self.path_for(source_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache yet; starting empty");
                return Ok(SourceSnapshot::empty(source_id));
            }
            Err(source) => return Err(CacheError::Read { path, source }),
        };

        let snapshot: SourceSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(CacheError::Corrupt {
                path,
                reason: format!("unsupported schema version {}", snapshot.schema_version),
            });
        }
        if snapshot.source_id != source_id {
            return Err(CacheError::Corrupt {
                path,
                reason: format!("snapshot belongs to source `{}`", snapshot.source_id),
            });
        }

        info!(records = snapshot.len(), "Loaded cache");
        Ok(snapshot)
    }

    /// Like [`load`](Self::load), but a corrupt cache is quarantined and
    /// replaced by an empty snapshot. The second element carries the warning
    /// for the run report. Read errors still propagate: an unreadable cache
    /// may be perfectly good and must not be overwritten.
    pub async fn load_or_empty(
        &self,
        source_id: &str,
    ) -> Result<(SourceSnapshot, Option<String>), CacheError> {
        match self.load(source_id).await {
            Ok(snapshot) => Ok((snapshot, None)),
            Err(CacheError::Corrupt { path, reason }) => {
                warn!(%source_id, path = %path.display(), %reason, "Corrupt cache; starting from an empty snapshot");
                let moved_to = quarantine(&path).await;
                let message = match moved_to {
                    Some(target) => format!(
                        "corrupt cache {} ({reason}); moved to {}",
                        path.display(),
                        target.display()
                    ),
                    None => format!("corrupt cache {} ({reason})", path.display()),
                };
                Ok((SourceSnapshot::empty(source_id), Some(message)))
            }
            Err(e) => Err(e),
        }
    }

    /// Atomically replace the snapshot for `source_id` with `records`.
    #[instrument(level = "info", skip(self, records), fields(records = records.len()))]
    pub async fn save(
        &self,
        source_id: &str,
        records: Vec<Record>,
        mode: RunMode,
    ) -> Result<SourceSnapshot, CacheError> {
        let path = self.path_for(source_id)?;
        let snapshot = SourceSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            source_id: source_id.to_string(),
            last_run_mode: Some(mode),
            updated_at: Some(Utc::now()),
            records,
        };
        let json = serde_json::to_vec_pretty(&snapshot).map_err(|e| CacheError::Write {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        write_atomic(&path, &json)
            .await
            .map_err(|source| CacheError::Write { path: path.clone(), source })?;

        info!(path = %path.display(), "Saved cache");
        Ok(snapshot)
    }

    /// Operator-triggered reset. Returns whether a cache file was removed.
    #[instrument(level = "info", skip(self))]
    pub async fn reset(&self, source_id: &str) -> Result<bool, CacheError> {
        let path = self.path_for(source_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Removed cache");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Write { path, source }),
        }
    }
}

/// Move an unreadable cache aside so the next save doesn't destroy it.
async fn quarantine(path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_string_lossy().into_owned();
    let target = path.with_file_name(format!("{file_name}.corrupt-{}", Utc::now().timestamp()));
    match fs::rename(path, &target).await {
        Ok(()) => Some(target),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to quarantine corrupt cache");
            None
        }
    }
}

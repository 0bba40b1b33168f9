//! Error types for each stage of a run.
//!
//! Only [`CacheError`] and [`ConfigError`] ever reach the top level. Page
//! level errors ([`AcquisitionError`], [`ParseError`]) are absorbed by the
//! pagination driver and surface as warnings in the run report. Unparseable
//! dates never become errors at all; the date normalizer substitutes a
//! fallback timestamp.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Failure to obtain one page from a source.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("page {page} timed out after {timeout:?}")]
    Timeout { page: usize, timeout: Duration },

    #[error("invalid page URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

impl AcquisitionError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AcquisitionError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            AcquisitionError::Status { status, .. } => *status == 429 || *status >= 500,
            AcquisitionError::Timeout { .. } => true,
            AcquisitionError::InvalidUrl(_) | AcquisitionError::Other(_) => false,
        }
    }
}

/// The page was fetched but its structure was not recognized.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("{matched} items matched `{selector}` but none had a title and link")]
    Unrecognized { selector: String, matched: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid source id `{0}` (use letters, digits, `-` and `_`)")]
    InvalidSourceId(String),

    #[error("corrupt cache at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to read cache {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write cache {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FeedWriteError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize feed: {0}")]
    Serialize(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transience() {
        let server = AcquisitionError::Status { status: 503, url: "https://a".into() };
        let throttled = AcquisitionError::Status { status: 429, url: "https://a".into() };
        let missing = AcquisitionError::Status { status: 404, url: "https://a".into() };
        assert!(server.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = AcquisitionError::Timeout { page: 2, timeout: Duration::from_secs(5) };
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "page 2 timed out after 5s");
    }

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::Corrupt {
            path: PathBuf::from("cache/a.json"),
            reason: "EOF".to_string(),
        };
        assert_eq!(err.to_string(), "corrupt cache at cache/a.json: EOF");
    }
}

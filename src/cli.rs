//! Command-line interface definitions for blog_feeds.
//!
//! The config path can come from `--config` or `BLOG_FEEDS_CONFIG`; every
//! other setting lives in the YAML file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Incrementally scrape blog listings into cached record sets and RSS feeds.
///
/// # Examples
///
/// ```sh
/// # Incremental run over every configured source
/// blog_feeds run
///
/// # Full re-walk of one source, also exporting JSON
/// blog_feeds --config feeds.yaml run --full --source example -j ./api
///
/// # Check generated feeds
/// blog_feeds check --verbose
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "BLOG_FEEDS_CONFIG", default_value = "blog_feeds.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Fetch sources, merge into their caches and regenerate feeds
    Run {
        /// Walk listings up to the full page bound instead of the incremental one
        #[arg(long)]
        full: bool,

        /// Only run these source ids (repeatable); all sources by default
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Sources fetched at the same time
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Also export each source's records as JSON into this directory
        #[arg(short, long)]
        json_dir: Option<PathBuf>,
    },

    /// Delete a source's cache so the next run starts from scratch
    Reset {
        #[arg(long)]
        source: String,
    },

    /// Validate generated feeds in the feeds directory
    Check {
        /// Show entry counts and newest dates
        #[arg(short, long)]
        verbose: bool,

        /// Warn when a feed's newest entry is older than this many days
        #[arg(long, default_value_t = crate::health::DEFAULT_STALE_DAYS)]
        stale_days: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["blog_feeds", "run"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Run {
                full: false,
                sources: vec![],
                concurrency: 4,
                json_dir: None,
            }
        );
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "blog_feeds",
            "-c",
            "/etc/feeds.yaml",
            "run",
            "--full",
            "--source",
            "a",
            "--source",
            "b",
            "-j",
            "/tmp/json",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/feeds.yaml"));
        match cli.command {
            Command::Run { full, sources, json_dir, .. } => {
                assert!(full);
                assert_eq!(sources, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(json_dir, Some(PathBuf::from("/tmp/json")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_reset_requires_source() {
        assert!(Cli::try_parse_from(["blog_feeds", "reset"]).is_err());
        let cli = Cli::try_parse_from(["blog_feeds", "reset", "--source", "example"]).unwrap();
        assert_eq!(cli.command, Command::Reset { source: "example".to_string() });
    }

    #[test]
    fn test_check_options() {
        let cli = Cli::try_parse_from(["blog_feeds", "check", "-v", "--stale-days", "7"]).unwrap();
        assert_eq!(cli.command, Command::Check { verbose: true, stale_days: 7 });
    }
}

//! Configuration module for the SDE mirror.
//!
//! All configuration is loaded from environment variables with sensible defaults.
//! The resulting struct is handed to each component explicitly.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LATEST_URL: &str =
    "https://developers.eveonline.com/static-data/tranquility/latest.jsonl";
pub const DEFAULT_CHANGES_URL: &str =
    "https://developers.eveonline.com/static-data/tranquility/changes/{build}.jsonl";
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://developers.eveonline.com/static-data/eve-online-static-data-latest-jsonl.zip";

/// Placeholder substituted with the build number in `changes_url`.
const BUILD_PLACEHOLDER: &str = "{build}";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one line-delimited JSON file per table
    pub snapshot_dir: PathBuf,
    /// Directory receiving one change-log file per synced build
    pub changelog_dir: PathBuf,
    /// Path to the SQLite index store
    pub index_path: PathBuf,
    /// Publisher "latest build" descriptor
    pub latest_url: String,
    /// Publisher change manifest, `{build}` is replaced by the build number
    pub changes_url: String,
    /// Publisher full snapshot archive
    pub archive_url: String,
    /// Timeout for manifest requests
    pub request_timeout: Duration,
    /// Timeout for the snapshot archive download
    pub download_timeout: Duration,
    /// Attempts per idempotent request (1 disables retries)
    pub retry_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// Maximum number of results returned by one search
    pub search_limit: usize,
    /// Rows per insert batch during an index rebuild
    pub index_batch_size: usize,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Build the index at startup when a snapshot exists but no index does
    pub auto_index: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(Path::new("./data"))
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            snapshot_dir: env_path("SDE_SNAPSHOT_DIR", defaults.snapshot_dir),
            changelog_dir: env_path("SDE_CHANGELOG_DIR", defaults.changelog_dir),
            index_path: env_path("SDE_INDEX_PATH", defaults.index_path),
            latest_url: env::var("SDE_LATEST_URL").unwrap_or(defaults.latest_url),
            changes_url: env::var("SDE_CHANGES_URL").unwrap_or(defaults.changes_url),
            archive_url: env::var("SDE_ARCHIVE_URL").unwrap_or(defaults.archive_url),
            request_timeout: Duration::from_secs(env_parse(
                "SDE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            download_timeout: Duration::from_secs(env_parse(
                "SDE_DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout.as_secs(),
            )),
            retry_attempts: env_parse("SDE_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_backoff: Duration::from_millis(env_parse(
                "SDE_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )),
            search_limit: env_parse("SDE_SEARCH_LIMIT", defaults.search_limit),
            index_batch_size: env_parse("SDE_INDEX_BATCH_SIZE", defaults.index_batch_size),
            bind_addr: env_parse("SDE_BIND_ADDR", defaults.bind_addr),
            log_level: env::var("SDE_LOG_LEVEL").unwrap_or(defaults.log_level),
            auto_index: env_parse("SDE_AUTO_INDEX", defaults.auto_index),
        }
    }

    /// Default configuration with every local path rooted at `root`.
    pub fn with_data_dir(root: &Path) -> Self {
        Self {
            snapshot_dir: root.join("eve_sde_jsonl"),
            changelog_dir: root.join("eve_sde_update"),
            index_path: root.join("eve_sde.db"),
            latest_url: DEFAULT_LATEST_URL.to_string(),
            changes_url: DEFAULT_CHANGES_URL.to_string(),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(1800),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            search_limit: 1000,
            index_batch_size: 1000,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            auto_index: false,
        }
    }

    /// URL of the change manifest for one build.
    pub fn changes_url_for(&self, build_number: i64) -> String {
        self.changes_url
            .replace(BUILD_PLACEHOLDER, &build_number.to_string())
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parse<T: FromStr + std::fmt::Debug>(key: &str, default: T) -> T {
    parse_or(key, env::var(key).ok(), default)
}

/// Parse a raw setting, keeping the default when it is absent or malformed.
fn parse_or<T: FromStr + std::fmt::Debug>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(
                    "Ignoring invalid {}={:?}, using default {:?}",
                    key,
                    value,
                    default
                );
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.snapshot_dir, PathBuf::from("./data/eve_sde_jsonl"));
        assert_eq!(config.changelog_dir, PathBuf::from("./data/eve_sde_update"));
        assert_eq!(config.index_path, PathBuf::from("./data/eve_sde.db"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.search_limit, 1000);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.log_level, "info");
        assert!(!config.auto_index);
    }

    #[test]
    fn test_changes_url_for_build() {
        let config = Config::default();
        assert_eq!(
            config.changes_url_for(3031812),
            "https://developers.eveonline.com/static-data/tranquility/changes/3031812.jsonl"
        );
    }

    #[test]
    fn test_parse_or_falls_back_on_garbage() {
        assert_eq!(parse_or("SDE_SEARCH_LIMIT", Some("250".into()), 1000usize), 250);
        assert_eq!(parse_or("SDE_SEARCH_LIMIT", Some("lots".into()), 1000usize), 1000);
        assert_eq!(parse_or("SDE_SEARCH_LIMIT", None, 1000usize), 1000);
        assert!(parse_or("SDE_AUTO_INDEX", Some(" true ".into()), false));
    }
}

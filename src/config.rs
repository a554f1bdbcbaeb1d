//! Configuration file parser for ~/.config/folio-feed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as likely typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FeedSettings, Relay, RelayError, RetryPolicy};
use crate::util::{validate_url, UrlValidationError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid feed_url: {0}")]
    FeedUrl(#[from] UrlValidationError),

    #[error("Invalid relay: {0}")]
    Relay(#[from] RelayError),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// Every key is optional; missing keys take their `Default` value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed to ingest.
    pub feed_url: String,

    /// Relays in priority order: `"direct"` or a template containing `{url}`.
    pub relays: Vec<String>,

    /// Cache document location. Defaults to `feed-cache.json` in the config directory.
    pub cache_path: Option<PathBuf>,

    /// Minutes a cached post list is served without a network fetch.
    pub cache_ttl_minutes: u64,

    /// Attempts per relay before moving to the next.
    pub attempts_per_relay: u32,

    /// Backoff before the first retry; doubles for each further retry.
    pub backoff_base_ms: u64,

    /// Bound on a single attempt, in seconds.
    pub attempt_timeout_secs: u64,

    /// Wait before retrying when there is nothing at all to show.
    pub empty_retry_delay_secs: u64,

    /// Ceiling on empty-state retries. Absent means retry until cancelled.
    pub max_empty_retries: Option<u32>,

    /// Maximum length of a post summary, in characters.
    pub summary_max_chars: usize,

    /// Refresh interval for `--watch`, in minutes.
    pub refresh_interval_minutes: u64,

    /// Permit loopback and private-network hosts for the feed and relays.
    pub allow_local_endpoints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: "https://shirokokun.substack.com/feed".to_string(),
            relays: vec![
                "direct".to_string(),
                "https://api.allorigins.win/raw?url={url}".to_string(),
                "https://corsproxy.io/?{url}".to_string(),
                "https://api.codetabs.com/v1/proxy?quest={url}".to_string(),
            ],
            cache_path: None,
            cache_ttl_minutes: 30,
            attempts_per_relay: 3,
            backoff_base_ms: 1000,
            attempt_timeout_secs: 10,
            empty_retry_delay_secs: 5,
            max_empty_retries: None,
            summary_max_chars: 200,
            refresh_interval_minutes: 30,
            allow_local_endpoints: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 12] = [
        "feed_url",
        "relays",
        "cache_path",
        "cache_ttl_minutes",
        "attempts_per_relay",
        "backoff_base_ms",
        "attempt_timeout_secs",
        "empty_retry_delay_secs",
        "max_empty_retries",
        "summary_max_chars",
        "refresh_interval_minutes",
        "allow_local_endpoints",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), feed = %config.feed_url, "Loaded configuration");
        Ok(config)
    }

    /// Resolves the cache document path, defaulting into `config_dir`.
    pub fn cache_path_in(&self, config_dir: &Path) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feed-cache.json"))
    }

    /// Validates the configuration and builds client settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::FeedUrl`] when `feed_url` is not an acceptable HTTP(S) URL
    /// - [`ConfigError::Relay`] when a relay is neither `direct` nor a valid template
    /// - [`ConfigError::Invalid`] for an empty relay list or zero-valued limits
    pub fn feed_settings(&self) -> Result<FeedSettings, ConfigError> {
        let feed_url = validate_url(&self.feed_url, self.allow_local_endpoints)?;

        if self.relays.is_empty() {
            return Err(ConfigError::Invalid {
                key: "relays",
                reason: "at least one relay (or \"direct\") is required".into(),
            });
        }
        let relays = self
            .relays
            .iter()
            .map(|entry| Relay::parse(entry, self.allow_local_endpoints))
            .collect::<Result<Vec<_>, _>>()?;

        for (key, value) in [
            ("attempts_per_relay", u64::from(self.attempts_per_relay)),
            ("attempt_timeout_secs", self.attempt_timeout_secs),
            ("cache_ttl_minutes", self.cache_ttl_minutes),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        Ok(FeedSettings {
            feed_url,
            relays,
            retry: RetryPolicy::new(
                self.attempts_per_relay,
                Duration::from_millis(self.backoff_base_ms),
            ),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60)),
            empty_retry_delay: Duration::from_secs(self.empty_retry_delay_secs),
            max_empty_retries: self.max_empty_retries,
            summary_chars: self.summary_max_chars,
        })
    }

    /// Interval between refreshes in `--watch` mode.
    pub fn refresh_interval(&self) -> Duration {
        let minutes = if self.refresh_interval_minutes == 0 {
            self.cache_ttl_minutes.max(1)
        } else {
            self.refresh_interval_minutes
        };
        Duration::from_secs(minutes.saturating_mul(60))
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Configuration file parser for `noctua.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`,
//! which has no feeds and no trigger secret. Unknown top-level keys are
//! accepted but logged, since they are usually typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{DEFAULT_MAX_FEED_BYTES, DEFAULT_USER_AGENT};
use crate::filter::FilterConfig;
use crate::ingest::IngestSettings;
use crate::storage::FeedRecord;

/// Environment variable that overrides `trigger_secret`.
pub const TRIGGER_SECRET_ENV: &str = "NOCTUA_TRIGGER_SECRET";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Feed {feed:?} in section {section:?} has an invalid URL: {reason}")]
    InvalidFeedUrl {
        section: String,
        feed: String,
        reason: String,
    },

    #[error("Failed to encode filter rules: {0}")]
    Encode(#[from] serde_json::Error),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// Custom Debug impl masks `trigger_secret`.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bearer token required by `POST /ingest`.
    /// The `NOCTUA_TRIGGER_SECRET` env var takes precedence.
    pub trigger_secret: Option<String>,

    pub server: ServerConfig,

    pub ingest: IngestConfig,

    /// Global filter layer, applied to every feed.
    pub filter: Option<FilterConfig>,

    /// Sections keyed by id. Iterated in id order.
    pub sections: BTreeMap<String, SectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address for `serve`.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// SQLite database file (`:memory:` for a throwaway store).
    pub database_path: String,
    pub fetch_timeout_secs: u64,
    pub store_timeout_secs: u64,
    /// 0 disables the whole-run timeout.
    pub run_timeout_secs: u64,
    pub max_concurrent_feeds: usize,
    pub max_feed_bytes: usize,
    pub user_agent: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_path: "noctua.db".to_string(),
            fetch_timeout_secs: 30,
            store_timeout_secs: 30,
            run_timeout_secs: 0,
            max_concurrent_feeds: 10,
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A named group of feeds sharing a filter layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SectionConfig {
    pub name: String,
    pub enabled: bool,
    pub filter: Option<FilterConfig>,
    pub feeds: Vec<FeedConfig>,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            filter: None,
            feeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
}

fn default_true() -> bool {
    true
}

/// Mask trigger_secret in Debug output.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "trigger_secret",
                &self.trigger_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("server", &self.server)
            .field("ingest", &self.ingest)
            .field("filter", &self.filter)
            .field("sections", &self.sections)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            sections = config.sections.len(),
            feeds = config.sections.values().map(|s| s.feeds.len()).sum::<usize>(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text, warning about unknown top-level keys.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["trigger_secret", "server", "ingest", "filter", "sections"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        Ok(toml::from_str(content)?)
    }

    /// The trigger secret, env var first. Blank values count as unset.
    pub fn trigger_secret(&self) -> Option<SecretString> {
        resolve_secret(
            std::env::var(TRIGGER_SECRET_ENV).ok(),
            self.trigger_secret.as_deref(),
        )
    }

    /// Registry records for every configured feed, with resolved filter rules.
    ///
    /// A feed is enabled only when both it and its section are. Filter rules
    /// cascade global → section → feed; an empty resolved rule set is stored
    /// as no blob. A URL listed twice keeps its first occurrence.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidFeedUrl` when a feed URL is not absolute http(s).
    pub fn feed_records(&self) -> Result<Vec<FeedRecord>, ConfigError> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();

        for (section_id, section) in &self.sections {
            for feed in &section.feeds {
                let url = feed.url.trim();
                validate_feed_url(url).map_err(|reason| ConfigError::InvalidFeedUrl {
                    section: section_id.clone(),
                    feed: feed.name.clone(),
                    reason,
                })?;

                let rules = FilterConfig::cascade(
                    self.filter.as_ref(),
                    section.filter.as_ref(),
                    feed.filter.as_ref(),
                );
                let blob = if rules.is_empty() {
                    None
                } else {
                    Some(rules.to_json()?)
                };

                let name = if feed.name.trim().is_empty() {
                    url
                } else {
                    feed.name.trim()
                };
                let mut record = FeedRecord::new(name, section_id, url, blob);
                record.enabled = section.enabled && feed.enabled;

                if !seen.insert(record.id.clone()) {
                    tracing::warn!(
                        feed = %url,
                        section = %section_id,
                        "Feed URL configured more than once, keeping the first"
                    );
                    continue;
                }
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Pipeline settings derived from `[ingest]`.
    pub fn ingest_settings(&self) -> IngestSettings {
        let ingest = &self.ingest;
        IngestSettings {
            fetch_timeout: Duration::from_secs(ingest.fetch_timeout_secs.max(1)),
            store_timeout: Duration::from_secs(ingest.store_timeout_secs.max(1)),
            run_timeout: (ingest.run_timeout_secs > 0)
                .then(|| Duration::from_secs(ingest.run_timeout_secs)),
            max_concurrent_feeds: ingest.max_concurrent_feeds.max(1),
            max_feed_bytes: ingest.max_feed_bytes,
            user_agent: ingest.user_agent.clone(),
        }
    }
}

fn resolve_secret(env_value: Option<String>, configured: Option<&str>) -> Option<SecretString> {
    env_value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            configured
                .filter(|v| !v.trim().is_empty())
                .map(str::to_owned)
        })
        .map(SecretString::from)
}

fn validate_feed_url(url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme {other:?}")),
    }
}

// ============================================================================
// Tests
// ============================================================================

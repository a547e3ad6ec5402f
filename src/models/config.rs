// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Request throttling and retry behavior
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Flickr source settings
    #[serde(default)]
    pub flickr: FlickrConfig,

    /// Internet Archive source settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Cache store settings
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        if self.fetcher.max_attempts == 0 {
            return Err(AppError::validation("fetcher.max_attempts must be > 0"));
        }
        if self.fetcher.base_delay_ms == 0 {
            return Err(AppError::validation("fetcher.base_delay_ms must be > 0"));
        }
        if self.fetcher.max_delay_ms < self.fetcher.base_delay_ms {
            return Err(AppError::validation(
                "fetcher.max_delay_ms must be >= fetcher.base_delay_ms",
            ));
        }
        if self.flickr.per_page == 0 || self.flickr.per_page > 500 {
            return Err(AppError::validation("flickr.per_page must be in 1..=500"));
        }
        if self.archive.per_page == 0 || self.archive.per_page > 10_000 {
            return Err(AppError::validation(
                "archive.per_page must be in 1..=10000",
            ));
        }
        if !self.flickr.enabled && !self.archive.enabled {
            return Err(AppError::validation("No sources enabled"));
        }
        Ok(())
    }
}

/// Request throttling and retry behavior, applied per source independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum interval between requests to one source, in milliseconds
    #[serde(default = "defaults::min_interval")]
    pub min_interval_ms: u64,

    /// Maximum fetch attempts per page before the source is exhausted
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "defaults::base_delay")]
    pub base_delay_ms: u64,

    /// Backoff delay cap in milliseconds
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            min_interval_ms: defaults::min_interval(),
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay(),
            max_delay_ms: defaults::max_delay(),
        }
    }
}

/// Flickr source settings.
///
/// The API key is treated as an opaque credential and is never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlickrConfig {
    /// Whether to fetch from Flickr at all
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// API key. Falls back to the FLICKR_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Free-text search query
    #[serde(default = "defaults::flickr_query")]
    pub query: String,

    /// Records per page (Flickr caps this at 500)
    #[serde(default = "defaults::flickr_per_page")]
    pub per_page: u32,
}

impl Default for FlickrConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            api_key: None,
            query: defaults::flickr_query(),
            per_page: defaults::flickr_per_page(),
        }
    }
}

/// Internet Archive source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Whether to fetch from the Internet Archive at all
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Lucene-style search query for the scrape endpoint
    #[serde(default = "defaults::archive_query")]
    pub query: String,

    /// Records per page
    #[serde(default = "defaults::archive_per_page")]
    pub per_page: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            query: defaults::archive_query(),
            per_page: defaults::archive_per_page(),
        }
    }
}

/// Cache store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Pretty-print the cached JSON files (easier to diff, larger on disk)
    #[serde(default = "defaults::pretty_json")]
    pub pretty_json: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            pretty_json: defaults::pretty_json(),
        }
    }
}

mod defaults {
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvester/0.1)".to_string()
    }

    pub fn timeout() -> u64 {
        30
    }

    pub fn min_interval() -> u64 {
        1000
    }

    pub fn max_attempts() -> u32 {
        5
    }

    pub fn base_delay() -> u64 {
        1000
    }

    // Matches the 64 second ceiling the upstream APIs tolerate well.
    pub fn max_delay() -> u64 {
        64_000
    }

    pub fn enabled() -> bool {
        true
    }

    pub fn flickr_query() -> String {
        "commons".to_string()
    }

    pub fn flickr_per_page() -> u32 {
        250
    }

    pub fn archive_query() -> String {
        "mediatype:image AND licenseurl:*creativecommons*".to_string()
    }

    pub fn archive_per_page() -> u32 {
        1000
    }

    pub fn pretty_json() -> bool {
        true
    }
}

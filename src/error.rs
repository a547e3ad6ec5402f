// src/error.rs

//! Unified error handling for the harvester application.

use std::fmt;

use thiserror::Error;

use crate::models::SourceKind;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Authentication rejected by the source. Aborts that source.
    #[error("Auth error for {source}: {message}")]
    Auth { source: SourceKind, message: String },

    /// The source asked us to back off. Retry the same cursor.
    #[error("Rate limited by {source}")]
    RateLimited { source: SourceKind },

    /// Network-level failure. Retry the same cursor.
    #[error("Transient network error for {source}: {message}")]
    TransientNetwork { source: SourceKind, message: String },

    /// The source returned a payload we cannot interpret.
    #[error("Malformed response from {source}: {message}")]
    MalformedResponse { source: SourceKind, message: String },

    /// A single record could not be normalized. Logged and skipped.
    #[error("Normalization error for {source}: {message}")]
    Normalization { source: SourceKind, message: String },

    /// Retry budget spent. The source is done with a partial result.
    #[error("Source {source} exhausted after retries: {cause}")]
    SourceExhausted {
        source: SourceKind,
        cause: Box<AppError>,
    },

    /// Cache commit failed. Fatal to the whole run.
    #[error("Cache write error: {0}")]
    CacheWrite(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSV export failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create an auth error for a source.
    pub fn auth(source: SourceKind, message: impl fmt::Display) -> Self {
        Self::Auth {
            source,
            message: message.to_string(),
        }
    }

    /// Create a rate-limit error for a source.
    pub fn rate_limited(source: SourceKind) -> Self {
        Self::RateLimited { source }
    }

    /// Create a transient network error for a source.
    pub fn transient(source: SourceKind, message: impl fmt::Display) -> Self {
        Self::TransientNetwork {
            source,
            message: message.to_string(),
        }
    }

    /// Create a malformed-response error for a source.
    pub fn malformed(source: SourceKind, message: impl fmt::Display) -> Self {
        Self::MalformedResponse {
            source,
            message: message.to_string(),
        }
    }

    /// Create a normalization error for a source.
    pub fn normalization(source: SourceKind, message: impl fmt::Display) -> Self {
        Self::Normalization {
            source,
            message: message.to_string(),
        }
    }

    /// Wrap the final error after the retry budget is spent.
    pub fn exhausted(source: SourceKind, cause: AppError) -> Self {
        Self::SourceExhausted {
            source,
            cause: Box::new(cause),
        }
    }

    /// Create a cache write error.
    pub fn cache_write(message: impl fmt::Display) -> Self {
        Self::CacheWrite(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the fetcher should retry the same cursor after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransientNetwork { .. }
        )
    }

    /// Whether this error terminates its source immediately, without retry.
    pub fn is_source_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::SourceExhausted { .. })
    }
}

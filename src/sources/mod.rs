// src/sources/mod.rs

//! Source adapters.
//!
//! Each adapter wraps one external archive API behind the uniform
//! [`SourceAdapter`] contract: one logical page request per call, classified
//! errors, no internal retries (retrying is the fetcher's job), stateless
//! across calls.

pub mod archive;
pub mod flickr;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{AppError, Result};
use crate::models::{RawRecord, SourceKind};

// Re-export for convenience
pub use archive::ArchiveAdapter;
pub use flickr::FlickrAdapter;

/// One page of raw records plus the token for the next page.
#[derive(Debug)]
pub struct FetchPage {
    pub records: Vec<RawRecord>,
    /// `None` when the source is exhausted
    pub next: Option<String>,
}

/// Uniform fetch contract over one external archive.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Which source this adapter serves.
    fn source(&self) -> SourceKind;

    /// Perform exactly one logical page request.
    ///
    /// `token` is the opaque cursor from the previous page, or `None` for
    /// the first call. Errors are classified: `Auth` is unrecoverable for
    /// the source, `RateLimited`/`TransientNetwork` mean "retry this same
    /// cursor", `MalformedResponse` means the page is unusable.
    async fn fetch_page(&self, token: Option<&str>) -> Result<FetchPage>;

    /// Token that skips past a malformed page, if this source's pagination
    /// allows advancing without a response. `None` means the source must
    /// abort on a malformed page.
    fn skip_token(&self, _token: Option<&str>) -> Option<String> {
        None
    }
}

/// Classify an HTTP status into the adapter error taxonomy.
pub(crate) fn classify_status(source: SourceKind, status: StatusCode) -> Option<AppError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(AppError::auth(source, format!("HTTP {status}")));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(AppError::rate_limited(source));
    }
    if status.is_server_error() {
        return Some(AppError::transient(source, format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Some(AppError::malformed(source, format!("HTTP {status}")));
    }
    None
}

/// Classify a reqwest transport error. Timeouts and connection failures are
/// retryable; anything else is treated as a malformed exchange.
pub(crate) fn classify_transport(source: SourceKind, error: reqwest::Error) -> AppError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        AppError::transient(source, error)
    } else {
        AppError::malformed(source, error)
    }
}

// src/sources/flickr.rs

//! Flickr source adapter.
//!
//! Talks to the `flickr.photos.search` REST endpoint. Pagination is
//! page-numbered: the cursor token is the 1-based page to fetch next, and
//! the source is exhausted once the reported page total is reached.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{FetcherConfig, FlickrConfig, RawRecord, SourceKind};
use crate::utils::http;

use super::{FetchPage, SourceAdapter, classify_status, classify_transport};

const REST_ENDPOINT: &str = "https://api.flickr.com/services/rest/";

/// Extra fields requested per photo so normalization needs no second call.
const EXTRAS: &str = "date_taken,owner_name,tags,url_m,license";

/// Flickr API error codes that indicate a credential problem.
const CODE_INVALID_KEY: u64 = 100;

/// Flickr API error codes for temporary service trouble.
const TRANSIENT_CODES: [u64; 2] = [105, 106];

/// Adapter for the Flickr photo search API.
pub struct FlickrAdapter {
    client: Client,
    api_key: String,
    query: String,
    per_page: u32,
}

impl FlickrAdapter {
    /// Create a new adapter. Fails if no API key is configured.
    pub fn new(config: &FlickrConfig, fetcher: &FetcherConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::config("Flickr API key missing (set [flickr] api_key or FLICKR_API_KEY)"))?;

        Ok(Self {
            client: http::create_async_client(fetcher)?,
            api_key,
            query: config.query.clone(),
            per_page: config.per_page,
        })
    }

    fn endpoint(&self, page: u32) -> Result<Url> {
        let url = Url::parse_with_params(
            REST_ENDPOINT,
            &[
                ("method", "flickr.photos.search"),
                ("api_key", self.api_key.as_str()),
                ("text", self.query.as_str()),
                ("extras", EXTRAS),
                ("per_page", &self.per_page.to_string()),
                ("page", &page.to_string()),
                ("format", "json"),
                ("nojsoncallback", "1"),
            ],
        )?;
        Ok(url)
    }

    /// Parse one response body into a page of raw records.
    fn parse_page(&self, body: &str, page: u32) -> Result<FetchPage> {
        let source = SourceKind::Flickr;
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| AppError::malformed(source, format!("invalid JSON: {e}")))?;

        if value.get("stat").and_then(|s| s.as_str()) == Some("fail") {
            return Err(Self::classify_api_failure(&value));
        }

        let photos = value
            .get("photos")
            .ok_or_else(|| AppError::malformed(source, "missing 'photos' object"))?;
        let pages = photos
            .get("pages")
            .and_then(|p| p.as_u64())
            .ok_or_else(|| AppError::malformed(source, "missing 'photos.pages'"))?;
        let items = photos
            .get("photo")
            .and_then(|p| p.as_array())
            .ok_or_else(|| AppError::malformed(source, "missing 'photos.photo' array"))?;

        let records = items
            .iter()
            .map(|item| RawRecord::new(source, item.clone()))
            .collect();

        // The reported total can shrink between runs. Past the end means
        // exhausted, not an error.
        let next = if u64::from(page) < pages {
            Some((page + 1).to_string())
        } else {
            None
        };

        Ok(FetchPage { records, next })
    }

    fn classify_api_failure(value: &serde_json::Value) -> AppError {
        let source = SourceKind::Flickr;
        let code = value.get("code").and_then(|c| c.as_u64()).unwrap_or(0);
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown API failure");

        if code == CODE_INVALID_KEY {
            AppError::auth(source, message)
        } else if TRANSIENT_CODES.contains(&code) {
            AppError::transient(source, format!("API code {code}: {message}"))
        } else {
            AppError::malformed(source, format!("API code {code}: {message}"))
        }
    }

    fn parse_token(token: Option<&str>) -> Result<u32> {
        match token {
            None => Ok(1),
            Some(t) => t.parse().map_err(|_| {
                AppError::malformed(SourceKind::Flickr, format!("bad page token '{t}'"))
            }),
        }
    }
}

#[async_trait]
impl SourceAdapter for FlickrAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Flickr
    }

    async fn fetch_page(&self, token: Option<&str>) -> Result<FetchPage> {
        let source = SourceKind::Flickr;
        let page = Self::parse_token(token)?;
        let url = self.endpoint(page)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(source, e))?;

        if let Some(err) = classify_status(source, response.status()) {
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(source, e))?;

        self.parse_page(&body, page)
    }

    fn skip_token(&self, token: Option<&str>) -> Option<String> {
        // Page numbers advance blindly, so one bad page can be skipped.
        Self::parse_token(token).ok().map(|p| (p + 1).to_string())
    }
}

// src/sources/archive.rs

//! Internet Archive source adapter.
//!
//! Talks to the scrape endpoint (`/services/search/v1/scrape`), which pages
//! with an opaque server-issued cursor. No cursor in a response means the
//! result set is exhausted. The endpoint needs no credentials.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ArchiveConfig, FetcherConfig, RawRecord, SourceKind};
use crate::utils::http;

use super::{FetchPage, SourceAdapter, classify_status, classify_transport};

const SCRAPE_ENDPOINT: &str = "https://archive.org/services/search/v1/scrape";

/// Metadata fields requested per item.
const FIELDS: &str = "identifier,title,creator,date,subject,licenseurl";

/// Adapter for the Internet Archive scrape API.
pub struct ArchiveAdapter {
    client: Client,
    query: String,
    per_page: u32,
}

impl ArchiveAdapter {
    pub fn new(config: &ArchiveConfig, fetcher: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_async_client(fetcher)?,
            query: config.query.clone(),
            per_page: config.per_page,
        })
    }

    fn endpoint(&self, token: Option<&str>) -> Result<Url> {
        let count = self.per_page.to_string();
        let mut params = vec![
            ("q", self.query.as_str()),
            ("fields", FIELDS),
            ("count", count.as_str()),
        ];
        if let Some(cursor) = token {
            params.push(("cursor", cursor));
        }
        Ok(Url::parse_with_params(SCRAPE_ENDPOINT, &params)?)
    }

    /// Parse one response body into a page of raw records.
    fn parse_page(&self, body: &str) -> Result<FetchPage> {
        let source = SourceKind::Archive;
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| AppError::malformed(source, format!("invalid JSON: {e}")))?;

        // The scrape endpoint reports failures in-band.
        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            return Err(AppError::malformed(source, error));
        }

        let items = value
            .get("items")
            .and_then(|i| i.as_array())
            .ok_or_else(|| AppError::malformed(source, "missing 'items' array"))?;

        let records = items
            .iter()
            .map(|item| RawRecord::new(source, item.clone()))
            .collect();

        let next = value
            .get("cursor")
            .and_then(|c| c.as_str())
            .map(str::to_string);

        Ok(FetchPage { records, next })
    }
}

#[async_trait]
impl SourceAdapter for ArchiveAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Archive
    }

    async fn fetch_page(&self, token: Option<&str>) -> Result<FetchPage> {
        let source = SourceKind::Archive;
        let url = self.endpoint(token)?;

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

        self.parse_page(&body)
    }

    // Cursors are server-issued, so a malformed page cannot be skipped.
}

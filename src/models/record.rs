// src/models/record.rs

//! Record data structures.
//!
//! `RawRecord` is the opaque per-source payload as fetched; `UnifiedRecord`
//! is the canonical shape both sources are mapped into.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One external archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Flickr,
    Archive,
}

impl SourceKind {
    /// All known sources, in the order they are driven.
    pub const ALL: [SourceKind; 2] = [SourceKind::Flickr, SourceKind::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Flickr => "flickr",
            SourceKind::Archive => "archive",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for SourceKind {}

/// A record as returned by one source adapter, before normalization.
///
/// The payload shape varies per source and is not interpreted until the
/// normalizer runs. Discarded after normalization, except for the payload
/// retained on the unified record for traceability.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub source: SourceKind,
    pub fetched_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl RawRecord {
    pub fn new(source: SourceKind, payload: serde_json::Value) -> Self {
        Self {
            source,
            fetched_at: Utc::now(),
            payload,
        }
    }
}

/// The canonical record shape both sources are mapped into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnifiedRecord {
    /// Source-qualified identifier, e.g. `"flickr:12345"`. Globally unique
    /// after merge.
    pub id: String,

    /// Record title, if the source provided one
    pub title: Option<String>,

    /// Author / uploader display name
    pub author: Option<String>,

    /// Creation timestamp as reported by the source
    pub created_at: Option<DateTime<Utc>>,

    /// Lowercased, trimmed, deduplicated tags in first-seen order
    #[serde(default)]
    pub tags: Vec<String>,

    /// URL of the media item
    pub media_url: String,

    /// Which archive this record came from
    pub source: SourceKind,

    /// Original payload, retained for traceability
    pub raw: serde_json::Value,

    /// When the record was fetched
    pub fetched_at: DateTime<Utc>,
}

impl UnifiedRecord {
    /// Build the source-qualified id from a source-native identifier.
    pub fn qualified_id(source: SourceKind, native_id: &str) -> String {
        format!("{}:{}", source, native_id)
    }
}
